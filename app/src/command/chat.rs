//! Terminal chat through the same handler the bot uses.

use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use zipp_conversation::IncomingMessage;

use super::init_common_components;

const SENDER: &str = "terminal";

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Optional single message to send (non-interactive mode)
    pub message: Option<String>,
    /// Conversation to talk in
    pub conversation: i64,
}

/// Strategy for executing the Chat command.
#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let common = init_common_components().await?;
        let handler = &common.handler;
        let id = input.conversation;

        if let Some(text) = input.message {
            let message = IncomingMessage::new(text, SENDER, id);
            if let Some(reply) = handler.respond(&message).await {
                println!("{reply}");
            }
            return common.shutdown().await;
        }

        println!("=== Conversation {id} ===");
        println!("Type 'exit', 'quit', or Ctrl+D to end the session.\n");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut turns = 0_usize;
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let text = line.trim();

            if matches!(text, "exit" | "quit" | "q") {
                break;
            }
            if text.is_empty() {
                continue;
            }

            let message = IncomingMessage::new(text, SENDER, id);
            match handler.respond(&message).await {
                Some(reply) => println!("\n{reply}\n"),
                None => println!("\n(no reply)\n"),
            }
            turns += 1;
        }

        println!("\nSession ended. Turns this session: {turns}");
        info!("Conversation {id} ended after {turns} turns");
        common.shutdown().await
    }
}
