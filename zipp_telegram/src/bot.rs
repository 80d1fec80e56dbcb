use crate::{Command, Error, Result};
use std::{fmt::Write as _, sync::Arc, time::Duration};
use teloxide::prelude::*;
use tokio::time::sleep;
use tracing::{info, warn};
use zipp_conversation::{ConversationHandler, IncomingMessage};

/// Telegram Bot relaying chat messages to the conversation handler
#[derive(Clone)]
pub struct TelegramBot {
    /// Teloxide bot instance
    pub bot: Bot,
    handler: Arc<ConversationHandler>,
    /// Allowed chat IDs; empty allows everyone
    allowed_chats: Arc<Vec<i64>>,
}

impl TelegramBot {
    pub fn new(
        token: &str,
        handler: Arc<ConversationHandler>,
        allowed_chats: &[String],
    ) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::Config("Telegram bot token is empty".into()));
        }

        Ok(Self {
            bot: Bot::new(token),
            handler,
            allowed_chats: Arc::new(parse_allowed_chats(allowed_chats)),
        })
    }

    #[must_use]
    pub fn is_allowed(&self, chat_id: i64) -> bool {
        chat_allowed(&self.allowed_chats, chat_id)
    }

    fn authorize(&self, chat_id: i64) -> Result<()> {
        if self.is_allowed(chat_id) {
            Ok(())
        } else {
            Err(Error::Unauthorized(chat_id))
        }
    }

    /// Reply to a chat message; `None` means nothing should be sent.
    pub async fn process_message(
        &self,
        chat_id: i64,
        sender: &str,
        text: &str,
    ) -> Result<Option<String>> {
        self.authorize(chat_id)?;
        let message = IncomingMessage::new(text, sender, chat_id);
        Ok(self.handler.respond(&message).await)
    }

    /// Forget a chat's history.
    pub async fn reset_session(&self, chat_id: i64) -> Result<bool> {
        self.authorize(chat_id)?;
        Ok(self.handler.reset(chat_id).await)
    }

    pub async fn set_option(&self, chat_id: i64, name: &str, raw_value: &str) -> Result<()> {
        self.authorize(chat_id)?;
        let value = Command::parse_value(raw_value);
        self.handler.set_option(chat_id, name, value).await?;
        Ok(())
    }

    /// Current sampling values for a chat, one per line.
    pub async fn options_text(&self, chat_id: i64) -> Result<String> {
        self.authorize(chat_id)?;
        let active = self.handler.active_options(chat_id).await;

        let mut text = String::from("Sampling options:\n");
        for (name, description) in self.handler.option_names() {
            let value = active
                .get(*name)
                .map_or_else(|| "(unset)".to_string(), ToString::to_string);
            let _ = writeln!(text, "{name} = {value}  ({description})");
        }
        Ok(text)
    }

    /// Test connection to Telegram API with backoff retry.
    /// Starts at 2s, increases by 2s each attempt, max 10s delay.
    /// Retries indefinitely until connection succeeds.
    async fn test_connection(&self) {
        const INITIAL_DELAY_SECS: u64 = 2;
        const MAX_DELAY_SECS: u64 = 10;

        let mut attempt = 1u64;
        loop {
            match self.bot.get_me().await {
                Ok(bot_user) => {
                    info!(
                        "Connected to Telegram API: @{} (id: {})",
                        bot_user
                            .user
                            .username
                            .unwrap_or_else(|| "no username".to_string()),
                        bot_user.user.id
                    );
                    return;
                }
                Err(e) => {
                    let delay_secs = (INITIAL_DELAY_SECS * attempt).min(MAX_DELAY_SECS);

                    warn!("Connection attempt {attempt} failed: {e}. Retrying in {delay_secs}s...");

                    // Only show detailed help on first failure
                    if attempt == 1 {
                        warn!("This may be due to:");
                        warn!("  - Network connectivity issues");
                        warn!("  - Firewall blocking api.telegram.org");
                        warn!("  - Invalid bot token");
                        warn!("  - Proxy or VPN configuration required");
                    }

                    sleep(Duration::from_secs(delay_secs)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run the bot until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
        use teloxide::dptree;
        use teloxide::types::Update;

        self.test_connection().await;

        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!("Failed to register bot commands: {e}");
        }

        let bot = self.bot.clone();

        let schema = dptree::entry().branch(Update::filter_message().endpoint({
            let zipp = self.clone();
            move |_bot: Bot, msg: teloxide::types::Message| {
                let zipp = zipp.clone();
                async move { crate::handler::handle_message(&zipp, &msg).await }
            }
        }));

        Dispatcher::builder(bot, schema)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Telegram dispatcher stopped");
        Ok(())
    }
}

fn parse_allowed_chats(ids: &[String]) -> Vec<i64> {
    ids.iter()
        .filter_map(|s| match s.trim().parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring invalid chat id in allow list: {s}");
                None
            }
        })
        .collect()
}

fn chat_allowed(allowed: &[i64], chat_id: i64) -> bool {
    allowed.is_empty() || allowed.contains(&chat_id)
}
