use serde_json::Value;
use teloxide::types::BotCommand;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Start,
    Help,
    Reset,
    Options,
    /// `/set <name> <value>`; either part may be empty when the user left it out
    Set { name: String, value: String },
}

impl Command {
    fn all() -> Vec<BotCommand> {
        [
            ("start", "Start talking to the bot"),
            ("help", "Show the command list"),
            ("reset", "Forget this chat's history"),
            ("options", "Show the sampling options for this chat"),
            ("set", "Set a sampling option: /set <name> <value>"),
        ]
        .into_iter()
        .map(|(command, description)| BotCommand::new(command, description))
        .collect()
    }

    #[must_use]
    pub fn bot_commands() -> Vec<BotCommand> {
        Self::all()
    }

    #[must_use]
    pub fn parse_from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        let (head, args) = text
            .split_once(char::is_whitespace)
            .map_or((text, ""), |(head, rest)| (head, rest.trim()));

        // Remove bot mention if present (e.g., "/start@my_bot")
        let head = head.split('@').next().unwrap_or(head).to_lowercase();

        match head.as_str() {
            "/start" => Some(Self::Start),
            "/help" => Some(Self::Help),
            "/reset" => Some(Self::Reset),
            "/options" => Some(Self::Options),
            "/set" => {
                let (name, value) = args
                    .split_once(char::is_whitespace)
                    .map_or((args, ""), |(name, value)| (name, value.trim()));
                Some(Self::Set {
                    name: name.to_string(),
                    value: value.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Option values are JSON when they parse as JSON, plain strings otherwise.
    #[must_use]
    pub fn parse_value(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    }

    #[must_use]
    pub const fn help_text() -> &'static str {
        r"
🤖 Zipp Telegram Bot

Commands:
/start   - Start talking to the bot
/reset   - Forget this chat's history
/options - Show the sampling options for this chat
/set <name> <value> - Change a sampling option
/help    - Show this help

Send any other message to chat!
"
    }

    #[must_use]
    pub const fn welcome_text() -> &'static str {
        r"
👋 Welcome to Zipp!

I remember what we talked about in this chat, so just keep typing.

Send /help to see the command list.
"
    }

    #[must_use]
    pub const fn set_usage_text() -> &'static str {
        "Usage: /set <name> <value>\nSend /options to see the available names."
    }
}
