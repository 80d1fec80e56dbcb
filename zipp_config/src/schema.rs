use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use zipp_core::MemoryKind;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub prompt: PromptSettings,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub handler: HandlerSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "BackendConfig::default_url")]
    pub url: String,
    #[serde(default = "BackendConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    fn default_url() -> String {
        "http://localhost:5001".to_string()
    }

    const fn default_timeout_secs() -> u64 {
        20
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptSettings {
    #[serde(default = "PromptSettings::default_user_label")]
    pub user_label: String,
    #[serde(default = "PromptSettings::default_assistant_label")]
    pub assistant_label: String,
    /// Replaces the generated framing preamble when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<String>,
    #[serde(default = "PromptSettings::default_max_context_tokens")]
    pub max_context_tokens: u32,
    #[serde(default = "PromptSettings::default_max_generation_tokens")]
    pub max_generation_tokens: u32,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            user_label: Self::default_user_label(),
            assistant_label: Self::default_assistant_label(),
            preamble: None,
            max_context_tokens: Self::default_max_context_tokens(),
            max_generation_tokens: Self::default_max_generation_tokens(),
        }
    }
}

impl PromptSettings {
    fn default_user_label() -> String {
        "User".to_string()
    }

    fn default_assistant_label() -> String {
        "Zipp".to_string()
    }

    const fn default_max_context_tokens() -> u32 {
        2048
    }

    const fn default_max_generation_tokens() -> u32 {
        512
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub kind: MemoryKind,
    /// Defaults to `~/zipp/memory.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    /// Defaults to `options.json` next to the state file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HandlerSettings {
    /// Send nothing instead of an error reply
    #[serde(default)]
    pub suppress_errors: bool,
}

const CONFIG_TEMPLATE: &str = r#"{
  "backend": {
    "url": "http://localhost:5001",
    "timeout_secs": 20
  },
  "prompt": {
    "user_label": "User",
    "assistant_label": "Zipp",
    "max_context_tokens": 2048,
    "max_generation_tokens": 512
  },
  "memory": {
    "kind": "basic"
  },
  "telegram": {
    "enabled": true,
    "token": "your-telegram-bot-token-here",
    "allow_from": []
  },
  "handler": {
    "suppress_errors": false
  }
}"#;

impl Config {
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("zipp"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'zipp init' to create config.",
                config_path.display()
            );
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        info!("Loading configuration from file: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Where conversation memories are saved between runs.
    pub fn memory_state_path(&self) -> anyhow::Result<PathBuf> {
        match &self.memory.state_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("memory.json")),
        }
    }

    /// Where per-conversation sampling overrides are saved between runs.
    pub fn options_state_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.memory.options_file {
            return Ok(path.clone());
        }
        let state = self.memory_state_path()?;
        Ok(state.with_file_name("options.json"))
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Edit the config file and add your Telegram bot token");
        println!("   2. Start a KoboldAI compatible server at the backend url");
        println!("   3. Run 'zipp telegram' to start the bot, or 'zipp chat' to talk locally");
        println!();
        println!("🔧 Configuration options:");
        println!("   - prompt.max_context_tokens: token budget of a whole prompt");
        println!("   - prompt.max_generation_tokens: tokens reserved for the reply");
        println!("   - memory.kind: \"basic\" keeps history, \"none\" disables it");
        println!("   - telegram.allow_from: chat ids allowed to talk to the bot (empty = all)");
        println!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn empty_object_uses_defaults() {
        let config: Config = serde_json::from_str("{}").expect("Failed to parse config");
        assert_eq!(config.backend.url, "http://localhost:5001");
        assert_eq!(config.backend.timeout_secs, 20);
        assert_eq!(config.prompt.max_context_tokens, 2048);
        assert_eq!(config.prompt.max_generation_tokens, 512);
        assert_eq!(config.prompt.assistant_label, "Zipp");
        assert_eq!(config.memory.kind, MemoryKind::Basic);
        assert!(!config.telegram.enabled);
        assert!(!config.handler.suppress_errors);
    }

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn partial_sections_keep_other_defaults() {
        let json = r#"{
            "prompt": {"assistant_label": "Bot", "max_context_tokens": 4096},
            "memory": {"kind": "none", "state_file": "/tmp/state.json"},
            "telegram": {"enabled": true, "token": "abc", "allow_from": ["1", "2"]}
        }"#;
        let config: Config = serde_json::from_str(json).expect("Failed to parse config");
        assert_eq!(config.prompt.assistant_label, "Bot");
        assert_eq!(config.prompt.user_label, "User");
        assert_eq!(config.prompt.max_context_tokens, 4096);
        assert_eq!(config.prompt.max_generation_tokens, 512);
        assert_eq!(config.memory.kind, MemoryKind::None);
        assert_eq!(
            config.memory_state_path().expect("state path"),
            PathBuf::from("/tmp/state.json")
        );
        assert_eq!(
            config.options_state_path().expect("options path"),
            PathBuf::from("/tmp/options.json")
        );
        assert_eq!(config.telegram.allow_from, vec!["1", "2"]);
    }

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn options_file_can_be_set_separately() {
        let json = r#"{"memory": {"state_file": "/tmp/a/state.json", "options_file": "/tmp/b/opts.json"}}"#;
        let config: Config = serde_json::from_str(json).expect("Failed to parse config");
        assert_eq!(
            config.options_state_path().expect("options path"),
            PathBuf::from("/tmp/b/opts.json")
        );
    }

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn template_parses() {
        let config: Config = serde_json::from_str(CONFIG_TEMPLATE).expect("Invalid template");
        assert!(config.telegram.enabled);
        assert_eq!(config.memory.kind, MemoryKind::Basic);
    }

    #[test]
    fn unknown_memory_kind_is_rejected() {
        let json = r#"{"memory": {"kind": "semantic"}}"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }
}
