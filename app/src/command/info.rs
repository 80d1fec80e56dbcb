use tracing::info;
use zipp_config::Config;
use zipp_providers::KoboldProvider;

use super::build_provider;

/// Strategy for displaying configuration information.
///
/// Prints the loaded configuration and asks the backend for its version,
/// model and context size.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        println!("=== zipp Configuration ===\n");

        println!("Backend:");
        println!("  URL: {}", config.backend.url);
        println!("  Timeout: {}s", config.backend.timeout_secs);
        let provider = build_provider(&config)?;
        print_backend_status(&provider).await;
        println!();

        println!("Prompt:");
        println!("  User Label: {}", config.prompt.user_label);
        println!("  Assistant Label: {}", config.prompt.assistant_label);
        println!("  Max Context Tokens: {}", config.prompt.max_context_tokens);
        println!(
            "  Max Generation Tokens: {}",
            config.prompt.max_generation_tokens
        );
        if let Some(ref preamble) = config.prompt.preamble {
            println!("  Preamble: {}", truncate(preamble, 60));
        }
        println!();

        println!("Memory:");
        println!("  Kind: {}", config.memory.kind);
        println!("  State File: {}", config.memory_state_path()?.display());
        println!();

        println!("Telegram:");
        println!("  Enabled: {}", config.telegram.enabled);
        println!("  Token: {}", mask_token(&config.telegram.token));
        if config.telegram.allow_from.is_empty() {
            println!("  Allow From: (empty - all users allowed)");
        } else {
            println!("  Allow From: {}", config.telegram.allow_from.join(", "));
        }
        println!("  Suppress Errors: {}", config.handler.suppress_errors);

        Ok(())
    }
}

async fn print_backend_status(provider: &KoboldProvider) {
    info!("Testing backend connection");
    match provider.version().await {
        Ok(version) => {
            println!("  Status: Connected (version {version})");
        }
        Err(e) => {
            println!("  Status: Connection failed");
            println!("  Error: {e}");
            return;
        }
    }

    match provider.model().await {
        Ok(model) => println!("  Model: {model}"),
        Err(e) => println!("  Model: unknown ({e})"),
    }
    match provider.max_context_length().await {
        Ok(length) => println!("  Max Context Length: {length}"),
        Err(e) => println!("  Max Context Length: unknown ({e})"),
    }
    match provider.max_length().await {
        Ok(length) => println!("  Max Generation Length: {length}"),
        Err(e) => println!("  Max Generation Length: unknown ({e})"),
    }
}

fn mask_token(token: &str) -> String {
    if token.is_empty() {
        "(not set)".to_string()
    } else if token.len() > 8 && token.is_char_boundary(8) {
        format!("{}...***", &token[..8])
    } else {
        "***".to_string()
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}
