use super::{Memory, MemoryError, MemoryKind, MemoryRecord, Message};

/// Disables history tracking: nothing is stored, nothing is related.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMemory;

impl Memory for NoMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::None
    }

    fn log(&self) -> &[Message] {
        &[]
    }

    fn add_log(&mut self, _message: Message) {}

    fn set_tokens(&mut self, _index: usize, _tokens: u32) -> Result<(), MemoryError> {
        Ok(())
    }

    fn get_related_history(&self, _query: &str) -> Vec<usize> {
        Vec::new()
    }

    fn to_record(&self) -> MemoryRecord {
        MemoryRecord::NoMemory
    }
}
