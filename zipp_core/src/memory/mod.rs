//! Per-conversation message memory.
//!
//! A [`Memory`] owns the chronological log of one conversation and ranks its
//! entries by relevance for prompt building. Implementations are swapped via
//! a [`MemoryFactory`] without touching call sites.

mod basic;
mod none;
mod types;

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use basic::BasicMemory;
pub use none::NoMemory;
pub use types::{Message, Role, RoleLabels};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Log index {index} out of bounds (log length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Message at index {0} already has a token count")]
    AlreadyCounted(usize),
}

/// Ordered message log of a single conversation.
///
/// Index 0 is the oldest entry. Callers read the log through [`Memory::log`]
/// and only ever grow it through [`Memory::add_log`].
pub trait Memory: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> MemoryKind;

    fn log(&self) -> &[Message];

    /// Append a message at the tail of the log.
    fn add_log(&mut self, message: Message);

    /// Write the finalized token count of an uncounted entry.
    fn set_tokens(&mut self, index: usize, tokens: u32) -> Result<(), MemoryError>;

    /// Indices into [`Memory::log`], most relevant first.
    ///
    /// Must not mutate the memory and must only return valid indices.
    fn get_related_history(&self, query: &str) -> Vec<usize>;

    fn to_record(&self) -> MemoryRecord;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    #[default]
    Basic,
    None,
}

impl MemoryKind {
    /// Factory producing empty memories of this kind.
    #[must_use]
    pub fn factory(self) -> Arc<dyn MemoryFactory> {
        match self {
            Self::Basic => Arc::new(BasicMemoryFactory),
            Self::None => Arc::new(NoMemoryFactory),
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Self::Basic),
            "none" => Ok(Self::None),
            _ => Err(anyhow::anyhow!("unknown memory kind: {s}")),
        }
    }
}

/// Builds fresh memories for newly seen conversations.
pub trait MemoryFactory: Send + Sync {
    fn make_memory(&self) -> Box<dyn Memory>;
}

impl<F> MemoryFactory for F
where
    F: Fn() -> Box<dyn Memory> + Send + Sync,
{
    fn make_memory(&self) -> Box<dyn Memory> {
        self()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMemoryFactory;

impl MemoryFactory for BasicMemoryFactory {
    fn make_memory(&self) -> Box<dyn Memory> {
        debug!("Creating new BasicMemory");
        Box::new(BasicMemory::new())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoMemoryFactory;

impl MemoryFactory for NoMemoryFactory {
    fn make_memory(&self) -> Box<dyn Memory> {
        debug!("Creating new NoMemory");
        Box::new(NoMemory)
    }
}

/// Persisted form of a memory, tagged with its concrete type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "__class__")]
pub enum MemoryRecord {
    BasicMemory {
        #[serde(default, deserialize_with = "skip_null_entries")]
        log: Vec<Message>,
    },
    NoMemory,
}

impl MemoryRecord {
    #[must_use]
    pub const fn kind(&self) -> MemoryKind {
        match self {
            Self::BasicMemory { .. } => MemoryKind::Basic,
            Self::NoMemory => MemoryKind::None,
        }
    }

    #[must_use]
    pub fn into_memory(self) -> Box<dyn Memory> {
        match self {
            Self::BasicMemory { log } => Box::new(BasicMemory::from_log(log)),
            Self::NoMemory => Box::new(NoMemory),
        }
    }
}

fn skip_null_entries<'de, D>(deserializer: D) -> Result<Vec<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Vec<Option<Message>> = Vec::deserialize(deserializer)?;
    Ok(entries.into_iter().flatten().collect())
}
