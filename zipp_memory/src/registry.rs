use anyhow::Context;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use zipp_core::{MemoryFactory, MemoryRecord};

use crate::guard::MemoryGuard;

/// Conversation id to [`MemoryGuard`] mapping.
///
/// Guards are created lazily on first access and stay stable for the life of
/// the registry, unless the conversation is reset or state is reloaded.
pub struct MemoryRegistry {
    factory: Arc<dyn MemoryFactory>,
    guards: Mutex<HashMap<String, MemoryGuard>>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new(factory: Arc<dyn MemoryFactory>) -> Self {
        Self {
            factory,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Guard for `id`, created through the factory on first access.
    pub async fn resolve(&self, id: &str) -> MemoryGuard {
        debug!("Accessing memory ID: {id}");
        let mut guards = self.guards.lock().await;
        guards
            .entry(id.to_owned())
            .or_insert_with(|| {
                debug!("Creating new memory for {id}");
                MemoryGuard::new(self.factory.make_memory())
            })
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.guards.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.guards.lock().await.is_empty()
    }

    /// Known conversation ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.guards.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget a conversation. Returns whether it existed.
    pub async fn reset(&self, id: &str) -> bool {
        let removed = self.guards.lock().await.remove(id).is_some();
        if removed {
            info!("Reset memory for conversation {id}");
        }
        removed
    }

    /// Snapshot every memory.
    ///
    /// Each guard is acquired in turn, so pending work on a conversation
    /// finishes before its memory is captured.
    pub async fn save_all(&self) -> BTreeMap<String, MemoryRecord> {
        let guards: Vec<(String, MemoryGuard)> = self
            .guards
            .lock()
            .await
            .iter()
            .map(|(id, guard)| (id.clone(), guard.clone()))
            .collect();

        let mut records = BTreeMap::new();
        for (id, guard) in guards {
            let memory = guard.lock().await;
            records.insert(id, memory.to_record());
        }
        records
    }

    /// Replace the registry contents with restored memories.
    ///
    /// Previously handed out guards are detached; each restored memory gets a
    /// fresh lock.
    pub async fn load_all(&self, records: BTreeMap<String, MemoryRecord>) {
        let restored: HashMap<String, MemoryGuard> = records
            .into_iter()
            .map(|(id, record)| (id, MemoryGuard::new(record.into_memory())))
            .collect();
        *self.guards.lock().await = restored;
    }

    pub async fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        info!("Saving memory to {}", path.display());
        let records = self.save_all().await;
        let json = serde_json::to_string_pretty(&records)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write memory file {}", path.display()))?;

        info!("Saved {} conversation memories", records.len());
        Ok(())
    }

    /// Restore from `path`, falling back to an empty registry.
    ///
    /// A missing or unreadable file is never fatal. Returns the number of
    /// restored conversations.
    pub async fn load_from(&self, path: &Path) -> usize {
        info!("Loading memory from {}", path.display());

        match read_records(path).await {
            Ok(records) => {
                let count = records.len();
                self.load_all(records).await;
                info!("Restored {count} conversation memories");
                count
            }
            Err(e) => {
                if path.exists() {
                    error!("{e:#}");
                } else {
                    warn!("{e:#}");
                }
                info!("Using empty memory");
                self.load_all(BTreeMap::new()).await;
                0
            }
        }
    }
}

async fn read_records(path: &Path) -> anyhow::Result<BTreeMap<String, MemoryRecord>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read memory file {}", path.display()))?;
    let records = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse memory file {}", path.display()))?;
    Ok(records)
}
