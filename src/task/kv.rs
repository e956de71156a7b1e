use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::task_store::TaskStore;
use crate::a2a::Task;
use crate::errors::{BridgeError, BridgeResult};

/// Minimal contract a distributed key-value engine must provide for task
/// persistence. Values are opaque bytes; TTL is per key.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> BridgeResult<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> BridgeResult<()>;
    async fn delete(&self, key: &str) -> BridgeResult<()>;
    async fn list_keys(&self, prefix: &str) -> BridgeResult<Vec<String>>;
}

/// Task store over any [`KeyValueBackend`], with a configurable key prefix
/// and TTL.
///
/// Snapshots are stored as JSON under `{prefix}task:{id}`. The revision
/// check is read-then-write: safe because a task is mutated only by the
/// one adapter execution that owns it, and different task ids never share
/// a key. Expiry is delegated to the backend via TTL.
pub struct KvTaskStore {
    backend: Arc<dyn KeyValueBackend>,
    prefix: String,
    ttl: Option<Duration>,
}

impl KvTaskStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend,
            prefix: "taskbridge:".to_string(),
            ttl: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn task_key(&self, task_id: &str) -> String {
        format!("{}task:{}", self.prefix, task_id)
    }

    fn decode(&self, bytes: &[u8]) -> BridgeResult<Task> {
        serde_json::from_slice(bytes).map_err(|e| BridgeError::Serialization {
            format: "json".to_string(),
            reason: format!("corrupt task snapshot: {e}"),
        })
    }
}

#[async_trait]
impl TaskStore for KvTaskStore {
    async fn get(&self, task_id: &str) -> BridgeResult<Option<Task>> {
        match self.backend.get(&self.task_key(task_id)).await? {
            Some(bytes) => Ok(Some(self.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, task: &Task) -> BridgeResult<()> {
        let key = self.task_key(&task.id);

        if let Some(bytes) = self.backend.get(&key).await? {
            let stored = self.decode(&bytes)?;
            if task.revision < stored.revision {
                return Err(BridgeError::VersionConflict {
                    task_id: task.id.clone(),
                    attempted: task.revision,
                    stored: stored.revision,
                });
            }
            if task.revision == stored.revision {
                return Ok(());
            }
        }

        let bytes = serde_json::to_vec(task)?;
        self.backend.put(&key, bytes, self.ttl).await
    }

    async fn find_by_context(&self, context_id: &str) -> BridgeResult<Vec<Task>> {
        let prefix = format!("{}task:", self.prefix);
        let mut tasks = Vec::new();
        for key in self.backend.list_keys(&prefix).await? {
            if let Some(bytes) = self.backend.get(&key).await? {
                let task = self.decode(&bytes)?;
                if task.context_id == context_id {
                    tasks.push(task);
                }
            }
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn delete(&self, task_id: &str) -> BridgeResult<()> {
        self.backend.delete(&self.task_key(task_id)).await
    }
}

/// In-process [`KeyValueBackend`] with TTL, for tests and single-node use.
pub struct MemoryKvBackend {
    entries: RwLock<HashMap<String, StoredValue>>,
}

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<tokio::time::Instant>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn is_expired(value: &StoredValue) -> bool {
        value
            .expires_at
            .is_some_and(|deadline| tokio::time::Instant::now() >= deadline)
    }
}

impl Default for MemoryKvBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryKvBackend {
    async fn get(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|value| !Self::is_expired(value))
            .map(|value| value.bytes.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> BridgeResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at: ttl.map(|ttl| tokio::time::Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> BridgeResult<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, value)| key.starts_with(prefix) && !Self::is_expired(value))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::{Message, TaskState};

    fn kv_store() -> KvTaskStore {
        KvTaskStore::new(Arc::new(MemoryKvBackend::new())).with_prefix("test:")
    }

    #[tokio::test]
    async fn test_kv_round_trip() {
        let store = kv_store();
        let mut task = Task::new("ctx-kv");
        task.push_message(Message::user_text("what's the weather in Paris?"));

        store.save(&task).await.unwrap();
        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);
    }

    #[tokio::test]
    async fn test_kv_version_conflict() {
        let store = kv_store();
        let mut task = Task::new("ctx-kv");
        store.save(&task).await.unwrap();

        task.bump_revision();
        task.set_state(TaskState::Working, None);
        store.save(&task).await.unwrap();

        let mut stale = task.clone();
        stale.revision = 1;
        assert!(matches!(
            store.save(&stale).await,
            Err(BridgeError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_kv_find_by_context() {
        let store = kv_store();
        let a = Task::new("ctx-a");
        let b = Task::new("ctx-a");
        let c = Task::new("ctx-b");
        for task in [&a, &b, &c] {
            store.save(task).await.unwrap();
        }

        let found = store.find_by_context("ctx-a").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|t| t.context_id == "ctx-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kv_ttl_expiry() {
        let store = kv_store().with_ttl(Duration::from_secs(60));
        let task = Task::new("ctx-ttl");
        store.save(&task).await.unwrap();
        assert!(store.get(&task.id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.get(&task.id).await.unwrap().is_none());
    }
}
