mod schema;

pub use schema::{
    BackendConfig, Config, HandlerSettings, MemoryConfig, PromptSettings, TelegramConfig,
};
