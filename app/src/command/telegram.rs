use crate::command::{CommandStrategy, init_common_components};
use std::sync::Arc;
use tracing::info;
use zipp_telegram::TelegramBot;

/// Input for Telegram bot command.
pub struct TelegramInput {
    /// Optional bot token (overrides config)
    pub token: Option<String>,
    /// Optional allowed chat IDs (overrides config)
    pub allow_from: Option<Vec<String>>,
}

/// Strategy for running Telegram bot.
///
/// Memories are restored before the bot connects and saved after Ctrl+C,
/// once every pending turn has been recorded.
pub struct TelegramStrategy;

impl CommandStrategy for TelegramStrategy {
    type Input = TelegramInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let common = init_common_components().await?;
        let config = &common.config;

        if !config.telegram.enabled {
            anyhow::bail!("Telegram is not enabled in config. Set \"telegram.enabled\": true");
        }

        let token = if let Some(t) = input.token {
            t
        } else if !config.telegram.token.is_empty() {
            config.telegram.token.clone()
        } else {
            anyhow::bail!("Telegram bot token not configured. Set \"telegram.token\" in config");
        };

        let allow_from = input
            .allow_from
            .unwrap_or_else(|| config.telegram.allow_from.clone());

        info!("Starting Telegram bot...");
        let bot = TelegramBot::new(&token, Arc::clone(&common.handler), &allow_from)?;

        info!("Telegram bot is running. Press Ctrl+C to stop.");
        let result = bot.run().await;

        info!("Shutting down");
        common.shutdown().await?;
        result?;
        Ok(())
    }
}
