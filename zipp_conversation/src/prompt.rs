//! Prompt assembly under a token budget.
//!
//! History is attached most relevant first until the budget runs out, then
//! laid out so the most relevant entries sit right above the new message.

use thiserror::Error;
use tracing::debug;
use zipp_core::{EstimateMethod, Message, Role, RoleLabels, estimate_tokens};

/// Invariant violations found while assembling a prompt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("History entry {0} has no token count")]
    InvalidState(usize),

    #[error("History index {index} out of bounds (log length {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}

#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub labels: RoleLabels,
    /// Framing text placed at the top of every prompt
    pub preamble: String,
    /// Token limit of the backend context
    pub max_total_tokens: u32,
    /// Tokens reserved for the generated reply
    pub max_generation_tokens: u32,
}

impl PromptConfig {
    #[must_use]
    pub fn new(labels: RoleLabels) -> Self {
        Self {
            preamble: Self::default_preamble(&labels),
            labels,
            max_total_tokens: 2048,
            max_generation_tokens: 512,
        }
    }

    #[must_use]
    pub fn default_preamble(labels: &RoleLabels) -> String {
        let user = labels.label(Role::User);
        let assistant = labels.label(Role::Assistant);
        format!(
            "[The following is a chat message log between {user} and {assistant}. \
             {assistant} follows instructions from {user}]\n\n\
             {user}: Hi.\n\
             {assistant}: Hello."
        )
    }

    #[must_use]
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    #[must_use]
    pub const fn with_budget(mut self, max_total_tokens: u32, max_generation_tokens: u32) -> Self {
        self.max_total_tokens = max_total_tokens;
        self.max_generation_tokens = max_generation_tokens;
        self
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self::new(RoleLabels::default())
    }
}

/// Turns a new message plus ranked history into one backend prompt.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    config: PromptConfig,
}

impl PromptAssembler {
    #[must_use]
    pub const fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &PromptConfig {
        &self.config
    }

    /// Tokens left for history once the reply, preamble and message are reserved.
    #[must_use]
    pub fn available_tokens(&self, message: &str) -> i64 {
        let reserved = i64::from(self.config.max_generation_tokens)
            + i64::from(estimate_tokens(&self.config.preamble, EstimateMethod::Average))
            + i64::from(estimate_tokens(message, EstimateMethod::Average));
        i64::from(self.config.max_total_tokens) - reserved
    }

    /// History entries that fit the budget, in relevance order.
    ///
    /// `ranked` lists indices into `log` from most to least relevant. Walking
    /// stops at the first entry that would overflow the budget.
    pub fn select_history(
        &self,
        message: &str,
        log: &[Message],
        ranked: &[usize],
    ) -> Result<Vec<usize>, PromptError> {
        let available = self.available_tokens(message);
        if available <= 0 {
            debug!("No room for history ({available} tokens available)");
            return Ok(Vec::new());
        }

        let mut accepted = Vec::new();
        let mut total = 0_i64;
        for &index in ranked {
            let entry = log.get(index).ok_or(PromptError::IndexOutOfBounds {
                index,
                len: log.len(),
            })?;
            if !entry.is_counted() {
                return Err(PromptError::InvalidState(index));
            }
            total += i64::from(entry.tokens);
            if total > available {
                debug!("Max tokens reached. Current count: {total}");
                break;
            }
            accepted.push(index);
        }
        Ok(accepted)
    }

    /// Preamble, then selected history, then the new message and an open
    /// assistant turn.
    pub fn build(
        &self,
        message: &str,
        log: &[Message],
        ranked: &[usize],
    ) -> Result<String, PromptError> {
        let accepted = self.select_history(message, log, ranked)?;
        let labels = &self.config.labels;

        let mut lines = Vec::with_capacity(accepted.len() + 2);
        lines.push(self.config.preamble.clone());
        lines.extend(accepted.iter().rev().map(|&index| labels.render(&log[index])));
        lines.push(format!(
            "{}: {message}\n{}: ",
            labels.label(Role::User),
            labels.label(Role::Assistant)
        ));
        Ok(lines.join("\n"))
    }

    /// Text handed to the backend tokenizer for a stored message.
    #[must_use]
    pub fn render_turn(&self, message: &Message) -> String {
        self.config.labels.render(message)
    }

    /// Stops generation when the model starts writing the user's next turn.
    #[must_use]
    pub fn stop_sequences(&self) -> Vec<String> {
        vec![format!("{}:", self.config.labels.label(Role::User))]
    }

    /// Drop a trailing stop sequence the backend left in the reply.
    #[must_use]
    pub fn trim_reply<'a>(&self, reply: &'a str) -> &'a str {
        let stop = format!("{}:", self.config.labels.label(Role::User));
        reply.strip_suffix(stop.as_str()).unwrap_or(reply)
    }
}
