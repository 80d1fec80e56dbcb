use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use zipp_core::Memory;

/// Exclusive access to one conversation's memory.
///
/// Owned so it can be handed to a background task and released there.
pub type MemoryLock = OwnedMutexGuard<Box<dyn Memory>>;

/// A memory paired with its own lock.
///
/// The lock is the only way to reach the memory, so it can never guard
/// another conversation. Clones share the same memory and lock.
#[derive(Debug, Clone)]
pub struct MemoryGuard {
    memory: Arc<Mutex<Box<dyn Memory>>>,
}

impl MemoryGuard {
    #[must_use]
    pub fn new(memory: Box<dyn Memory>) -> Self {
        Self {
            memory: Arc::new(Mutex::new(memory)),
        }
    }

    /// Wait for the lock. Waiters are served in arrival order.
    pub async fn lock(&self) -> MemoryLock {
        Arc::clone(&self.memory).lock_owned().await
    }

    /// Whether both handles point at the same memory.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.memory, &other.memory)
    }
}
