use super::{Memory, MemoryError, MemoryKind, MemoryRecord, Message};

/// Keeps every message and ranks history by recency.
#[derive(Debug, Clone, Default)]
pub struct BasicMemory {
    // 0 is the oldest entry
    log: Vec<Message>,
}

impl BasicMemory {
    #[must_use]
    pub const fn new() -> Self {
        Self { log: Vec::new() }
    }

    #[must_use]
    pub const fn from_log(log: Vec<Message>) -> Self {
        Self { log }
    }
}

impl Memory for BasicMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Basic
    }

    fn log(&self) -> &[Message] {
        &self.log
    }

    fn add_log(&mut self, message: Message) {
        self.log.push(message);
    }

    fn set_tokens(&mut self, index: usize, tokens: u32) -> Result<(), MemoryError> {
        let len = self.log.len();
        let message = self
            .log
            .get_mut(index)
            .ok_or(MemoryError::IndexOutOfBounds { index, len })?;
        if message.is_counted() {
            return Err(MemoryError::AlreadyCounted(index));
        }
        message.tokens = tokens;
        Ok(())
    }

    fn get_related_history(&self, _query: &str) -> Vec<usize> {
        (0..self.log.len()).rev().collect()
    }

    fn to_record(&self) -> MemoryRecord {
        MemoryRecord::BasicMemory {
            log: self.log.clone(),
        }
    }
}
