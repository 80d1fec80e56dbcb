use crate::{Command, Error, Result, TelegramBot};
use teloxide::{requests::Requester, types::Message};
use tracing::{info, warn};

/// Handle bot commands
pub async fn handle_command(bot: &TelegramBot, msg: &Message, cmd: Command) -> Result<()> {
    let chat_id = msg.chat.id.0;
    let username = sender_name(msg);

    let reply = match cmd {
        Command::Start => {
            info!("[@{username}] Command: /start");
            Command::welcome_text().to_string()
        }
        Command::Help => {
            info!("[@{username}] Command: /help");
            Command::help_text().to_string()
        }
        Command::Reset => {
            info!("[@{username}] Command: /reset");
            if bot.reset_session(chat_id).await? {
                "Conversation history cleared".to_string()
            } else {
                "Nothing to clear yet".to_string()
            }
        }
        Command::Options => {
            info!("[@{username}] Command: /options");
            bot.options_text(chat_id).await?
        }
        Command::Set { name, value } => {
            info!("[@{username}] Command: /set {name} {value}");
            if name.is_empty() || value.is_empty() {
                Command::set_usage_text().to_string()
            } else {
                match bot.set_option(chat_id, &name, &value).await {
                    Ok(()) => format!("{name} set to {value}"),
                    Err(Error::Option(e)) => {
                        format!("{e}\nSend /options to see the available names.")
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    };

    bot.bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handle any message (commands or regular text)
pub async fn handle_message(bot: &TelegramBot, msg: &Message) -> Result<()> {
    let chat_id = msg.chat.id.0;
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let username = sender_name(msg);

    if !bot.is_allowed(chat_id) {
        warn!("[@{username}] Ignoring message from chat {chat_id}: not in allow list");
        return Ok(());
    }

    if let Some(cmd) = Command::parse_from_text(text) {
        return handle_command(bot, msg, cmd).await;
    }

    info!("[@{username}] Message: {text}");

    bot.bot
        .send_chat_action(msg.chat.id, teloxide::types::ChatAction::Typing)
        .await?;

    let Some(response) = bot.process_message(chat_id, &username, text).await? else {
        info!("[@{username}] No reply sent");
        return Ok(());
    };

    info!("[@{username}] Response: {response}");
    bot.bot.send_message(msg.chat.id, response).await?;

    Ok(())
}

fn sender_name(msg: &Message) -> String {
    msg.from
        .as_ref()
        .and_then(|u| u.username.clone())
        .unwrap_or_else(|| "unknown".to_string())
}
