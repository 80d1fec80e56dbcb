//! Per-message orchestration.
//!
//! A request holds its conversation's guard while the prompt is built and
//! the backend generates. The reply goes back to the caller right away; the
//! guard moves into a background task that appends both turns and fills in
//! their token counts before anyone else may touch the conversation.

use anyhow::Context;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use zipp_core::{
    EstimateMethod, GenerationError, GenerationOptions, Memory, Message, Role, TextGenerator,
    estimate_tokens,
};
use zipp_memory::{MemoryLock, MemoryRegistry};

use crate::prompt::{PromptAssembler, PromptError};

/// Reply sent when an internal invariant broke while handling a message.
pub const INTERNAL_ERROR_REPLY: &str = "[Internal error encountered during processing]";

/// Reply sent when the backend produced only whitespace.
pub const NO_RESPONSE_REPLY: &str = "[No response]";

/// A text message delivered by the messaging platform.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub text: String,
    pub sender: String,
    pub conversation_id: i64,
}

impl IncomingMessage {
    #[must_use]
    pub fn new(text: impl Into<String>, sender: impl Into<String>, conversation_id: i64) -> Self {
        Self {
            text: text.into(),
            sender: sender.into(),
            conversation_id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    /// Return no reply instead of an error sentinel
    pub suppress_errors: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("Unknown option: {0}")]
    Unknown(String),
}

#[derive(Debug, Error)]
enum TurnError {
    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

pub struct ConversationHandler {
    generator: Arc<dyn TextGenerator>,
    registry: Arc<MemoryRegistry>,
    assembler: Arc<PromptAssembler>,
    config: HandlerConfig,
    /// Sampling overrides per conversation id
    options: Mutex<HashMap<String, Map<String, Value>>>,
    recordings: Mutex<JoinSet<()>>,
}

impl ConversationHandler {
    #[must_use]
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        registry: Arc<MemoryRegistry>,
        assembler: PromptAssembler,
    ) -> Self {
        Self {
            generator,
            registry,
            assembler: Arc::new(assembler),
            config: HandlerConfig::default(),
            options: Mutex::new(HashMap::new()),
            recordings: Mutex::new(JoinSet::new()),
        }
    }

    #[must_use]
    pub const fn with_config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<MemoryRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn assembler(&self) -> &PromptAssembler {
        &self.assembler
    }

    /// Answer one message.
    ///
    /// Returns `None` only for failures while error replies are suppressed.
    pub async fn respond(&self, message: &IncomingMessage) -> Option<String> {
        let id = message.conversation_id.to_string();
        debug!(
            "Message from {} in conversation {id}: {:?}",
            message.sender, message.text
        );

        let guard = self.registry.resolve(&id).await;
        let options = self.generation_options(&id).await;
        let memory = guard.lock().await;

        // every early return drops `memory` and with it the lock
        let reply = match self.generate(&**memory, &message.text, &options).await {
            Ok(reply) => reply,
            Err(TurnError::Prompt(e)) => {
                error!("{e}");
                return self.error_reply(INTERNAL_ERROR_REPLY.to_string());
            }
            Err(TurnError::Generation(e)) => {
                error!(
                    "Encountered error while processing message {:?}: {e}",
                    message.text
                );
                return self.error_reply(format!("[{e}]"));
            }
        };

        let shown = if reply.trim().is_empty() {
            NO_RESPONSE_REPLY.to_string()
        } else {
            reply.clone()
        };

        self.spawn_recording(memory, message.text.clone(), reply)
            .await;
        tokio::task::yield_now().await;

        info!("Returning response");
        Some(shown)
    }

    /// Wait for every outstanding recording task.
    ///
    /// Call before saving memories or shutting down.
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.recordings.lock().await);
            if tasks.is_empty() {
                break;
            }
            info!("Waiting for {} recording tasks", tasks.len());
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!("Recording task failed: {e}");
                }
            }
        }
    }

    /// Forget a conversation's history.
    pub async fn reset(&self, conversation_id: i64) -> bool {
        self.registry.reset(&conversation_id.to_string()).await
    }

    /// Sampling option names and descriptions the backend accepts.
    #[must_use]
    pub fn option_names(&self) -> &[(&'static str, &'static str)] {
        self.generator.sampling_options()
    }

    /// Backend defaults, before any conversation overrides.
    #[must_use]
    pub fn default_options(&self) -> Map<String, Value> {
        self.generator.default_sampling()
    }

    /// Store a sampling override for one conversation.
    ///
    /// Only the option name is checked; values go to the backend as given.
    pub async fn set_option(
        &self,
        conversation_id: i64,
        name: &str,
        value: Value,
    ) -> Result<(), OptionError> {
        let known = self.generator.sampling_options();
        if !known.is_empty() && !known.iter().any(|(option, _)| *option == name) {
            return Err(OptionError::Unknown(name.to_string()));
        }

        info!("Setting option {name} = {value} for conversation {conversation_id}");
        self.options
            .lock()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Backend defaults with the conversation's overrides applied.
    pub async fn active_options(&self, conversation_id: i64) -> Map<String, Value> {
        self.active_sampling(&conversation_id.to_string()).await
    }

    /// Every conversation's sampling overrides, keyed by conversation id.
    pub async fn save_options(&self) -> BTreeMap<String, Map<String, Value>> {
        self.options
            .lock()
            .await
            .iter()
            .filter(|(_, overrides)| !overrides.is_empty())
            .map(|(id, overrides)| (id.clone(), overrides.clone()))
            .collect()
    }

    /// Replace all sampling overrides.
    pub async fn load_options(&self, options: BTreeMap<String, Map<String, Value>>) {
        *self.options.lock().await = options.into_iter().collect();
    }

    pub async fn save_options_to(&self, path: &Path) -> anyhow::Result<()> {
        info!("Saving sampling options to {}", path.display());
        let options = self.save_options().await;
        let json = serde_json::to_string_pretty(&options)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write options file {}", path.display()))?;
        Ok(())
    }

    /// Restore overrides from `path`, starting without any when it cannot be read.
    ///
    /// Returns the number of conversations with restored overrides.
    pub async fn load_options_from(&self, path: &Path) -> usize {
        match read_options(path).await {
            Ok(options) => {
                let count = options.len();
                self.load_options(options).await;
                info!("Restored sampling options for {count} conversations");
                count
            }
            Err(e) => {
                if path.exists() {
                    error!("{e:#}");
                } else {
                    warn!("{e:#}");
                }
                info!("Using default sampling options");
                self.load_options(BTreeMap::new()).await;
                0
            }
        }
    }

    async fn active_sampling(&self, id: &str) -> Map<String, Value> {
        let mut sampling = self.generator.default_sampling();
        if let Some(overrides) = self.options.lock().await.get(id) {
            for (key, value) in overrides {
                sampling.insert(key.clone(), value.clone());
            }
        }
        sampling
    }

    async fn generation_options(&self, id: &str) -> GenerationOptions {
        let sampling = self.active_sampling(id).await;
        GenerationOptions::new(self.assembler.config().max_generation_tokens)
            .with_stop_sequences(self.assembler.stop_sequences())
            .with_sampling(&sampling)
    }

    async fn generate(
        &self,
        memory: &dyn Memory,
        text: &str,
        options: &GenerationOptions,
    ) -> Result<String, TurnError> {
        let ranked = memory.get_related_history(text);
        let prompt = self.assembler.build(text, memory.log(), &ranked)?;
        debug!("Prompt:\n{prompt}");

        let reply = self.generator.generate(&prompt, options).await?;
        Ok(self.assembler.trim_reply(&reply).to_string())
    }

    async fn spawn_recording(&self, memory: MemoryLock, user_text: String, reply: String) {
        let generator = Arc::clone(&self.generator);
        let assembler = Arc::clone(&self.assembler);

        let mut tasks = self.recordings.lock().await;
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                error!("Recording task failed: {e}");
            }
        }
        tasks.spawn(record_turn(generator, assembler, memory, user_text, reply));
    }

    fn error_reply(&self, reply: String) -> Option<String> {
        if self.config.suppress_errors {
            debug!("Suppressing reply {reply:?}");
            None
        } else {
            Some(reply)
        }
    }
}

async fn read_options(path: &Path) -> anyhow::Result<BTreeMap<String, Map<String, Value>>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read options file {}", path.display()))?;
    let options = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse options file {}", path.display()))?;
    Ok(options)
}

/// Append the user and assistant turns, then backfill their token counts.
///
/// Runs to completion while holding the conversation lock.
async fn record_turn(
    generator: Arc<dyn TextGenerator>,
    assembler: Arc<PromptAssembler>,
    mut memory: MemoryLock,
    user_text: String,
    reply: String,
) {
    let user = Message::new(Role::User, user_text);
    let assistant = Message::new(Role::Assistant, reply);
    let user_text = assembler.render_turn(&user);
    let assistant_text = assembler.render_turn(&assistant);

    let start = memory.log().len();
    memory.add_log(user);
    memory.add_log(assistant);
    if memory.log().len() == start {
        debug!("Memory keeps no history, skipping token counts");
        return;
    }

    info!("Getting token counts");
    let (user_tokens, assistant_tokens) = tokio::join!(
        count_or_estimate(generator.as_ref(), &user_text),
        count_or_estimate(generator.as_ref(), &assistant_text),
    );

    for (index, tokens) in [(start, user_tokens), (start + 1, assistant_tokens)] {
        if let Err(e) = memory.set_tokens(index, tokens) {
            error!("Failed to store token count: {e}");
        }
    }
    info!("Messages saved to memory");
}

/// Backend token count, or the local estimate when the backend cannot give one.
async fn count_or_estimate(generator: &dyn TextGenerator, text: &str) -> u32 {
    let fallback = || estimate_tokens(text, EstimateMethod::Average).max(1);
    match generator.count_tokens(text).await {
        Ok(0) => {
            warn!("Backend counted zero tokens for {text:?}, using estimate");
            fallback()
        }
        Ok(tokens) => tokens,
        Err(e) => {
            warn!("Token count failed: {e}. Using estimate");
            fallback()
        }
    }
}
