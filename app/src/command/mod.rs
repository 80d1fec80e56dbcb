//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy with its own input type. The helpers
//! here wire the backend, memory registry and handler from configuration,
//! and restore or save memories around a running front end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use zipp_config::Config;
use zipp_conversation::{ConversationHandler, HandlerConfig, PromptAssembler, PromptConfig};
use zipp_core::RoleLabels;
use zipp_memory::MemoryRegistry;
use zipp_providers::KoboldProvider;

mod chat;
mod info;
mod init;
mod telegram;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use info::InfoStrategy;
pub use init::InitStrategy;
pub use telegram::{TelegramInput, TelegramStrategy};
pub use version::VersionStrategy;

/// Core trait defining the contract for all command strategies.
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// Execute the command with the given input.
    ///
    /// # Errors
    /// Returns an error if command execution fails.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

fn build_provider(config: &Config) -> anyhow::Result<KoboldProvider> {
    KoboldProvider::new(
        config.backend.url.clone(),
        Duration::from_secs(config.backend.timeout_secs),
    )
}

fn build_prompt_config(config: &Config) -> PromptConfig {
    let settings = &config.prompt;
    let labels = RoleLabels::new(
        settings.user_label.clone(),
        settings.assistant_label.clone(),
    );
    let prompt = PromptConfig::new(labels)
        .with_budget(settings.max_context_tokens, settings.max_generation_tokens);

    match &settings.preamble {
        Some(preamble) => prompt.with_preamble(preamble.clone()),
        None => prompt,
    }
}

/// Wire a handler from configuration. Nothing touches the network here.
fn build_handler(config: &Config) -> anyhow::Result<ConversationHandler> {
    let provider = build_provider(config)?;
    info!(
        "Using {} memory, backend at {}",
        config.memory.kind,
        provider.base_url()
    );

    let registry = Arc::new(MemoryRegistry::new(config.memory.kind.factory()));
    let handler = ConversationHandler::new(
        Arc::new(provider),
        registry,
        PromptAssembler::new(build_prompt_config(config)),
    )
    .with_config(HandlerConfig {
        suppress_errors: config.handler.suppress_errors,
    });
    Ok(handler)
}

/// Components shared by the front ends.
struct CommonComponents {
    config: Config,
    handler: Arc<ConversationHandler>,
    state_path: PathBuf,
    options_path: PathBuf,
}

impl CommonComponents {
    /// Wait for pending recordings, then write every memory and option to disk.
    async fn shutdown(&self) -> anyhow::Result<()> {
        self.handler.drain().await;
        self.handler.save_options_to(&self.options_path).await?;
        self.handler.registry().save_to(&self.state_path).await?;
        info!(
            "Saved {} conversations to {}",
            self.handler.registry().len().await,
            self.state_path.display()
        );
        Ok(())
    }
}

/// Load config, build the handler and restore saved memories and options.
async fn init_common_components() -> anyhow::Result<CommonComponents> {
    let config = Config::load()?;
    let handler = Arc::new(build_handler(&config)?);

    let state_path = config.memory_state_path()?;
    let restored = handler.registry().load_from(&state_path).await;
    info!(
        "Restored {restored} conversations from {}",
        state_path.display()
    );

    let options_path = config.options_state_path()?;
    handler.load_options_from(&options_path).await;

    Ok(CommonComponents {
        config,
        handler,
        state_path,
        options_path,
    })
}
