use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::task_store::TaskStore;
use crate::a2a::Task;
use crate::errors::{BridgeError, BridgeResult};

/// In-memory task store for development and tests.
///
/// Process-lifetime only. Eviction is optional but supported for symmetry
/// with production backends: when a capacity is set, inserting a new task
/// beyond it evicts the least recently written one.
pub struct InMemoryTaskStore {
    inner: Arc<RwLock<Inner>>,
    max_tasks: Option<usize>,
}

struct Inner {
    tasks: HashMap<String, Task>,
    /// Write order, oldest first. Drives capacity eviction.
    order: VecDeque<String>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                tasks: HashMap::new(),
                order: VecDeque::new(),
            })),
            max_tasks: None,
        }
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = Some(max_tasks.max(1));
        self
    }

    /// Number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.tasks.is_empty()
    }

    fn touch_order(order: &mut VecDeque<String>, task_id: &str) {
        order.retain(|id| id != task_id);
        order.push_back(task_id.to_string());
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: &str) -> BridgeResult<Option<Task>> {
        let inner = self.inner.read().await;
        Ok(inner.tasks.get(task_id).cloned())
    }

    async fn save(&self, task: &Task) -> BridgeResult<()> {
        let mut inner = self.inner.write().await;

        if let Some(stored) = inner.tasks.get(&task.id) {
            if task.revision < stored.revision {
                return Err(BridgeError::VersionConflict {
                    task_id: task.id.clone(),
                    attempted: task.revision,
                    stored: stored.revision,
                });
            }
            if task.revision == stored.revision {
                // Idempotent re-save of an already committed revision.
                return Ok(());
            }
        } else if let Some(max) = self.max_tasks {
            if inner.tasks.len() >= max {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.tasks.remove(&oldest);
                }
            }
        }

        inner.tasks.insert(task.id.clone(), task.clone());
        Self::touch_order(&mut inner.order, &task.id);
        Ok(())
    }

    async fn find_by_context(&self, context_id: &str) -> BridgeResult<Vec<Task>> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|task| task.context_id == context_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn delete(&self, task_id: &str) -> BridgeResult<()> {
        let mut inner = self.inner.write().await;
        inner.tasks.remove(task_id);
        inner.order.retain(|id| id != task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::{Message, TaskState};

    #[tokio::test]
    async fn test_save_get_round_trip() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::new("ctx-1");
        task.push_message(Message::user_text("roll a d6"));

        store.save(&task).await.unwrap();
        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);
    }

    #[tokio::test]
    async fn test_stale_revision_is_rejected() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::new("ctx-1");
        store.save(&task).await.unwrap();

        task.bump_revision();
        task.set_state(TaskState::Working, None);
        store.save(&task).await.unwrap();

        let mut stale = task.clone();
        stale.revision = 1;
        stale.history.clear();
        let err = store.save(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::VersionConflict { attempted: 1, stored: 2, .. }
        ));

        // The stored snapshot is untouched by the rejected write.
        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.revision, 2);
        assert_eq!(loaded.state(), TaskState::Working);
    }

    #[tokio::test]
    async fn test_equal_revision_save_is_a_noop() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::new("ctx-1");
        task.push_message(Message::user_text("once"));
        store.save(&task).await.unwrap();
        store.save(&task).await.unwrap();

        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.artifacts.len(), 0);
    }

    #[tokio::test]
    async fn test_find_by_context_newest_first() {
        let store = InMemoryTaskStore::new();
        let first = Task::new("ctx-a");
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = Task::new("ctx-a");
        let other = Task::new("ctx-b");
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        store.save(&other).await.unwrap();

        let found = store.find_by_context("ctx-a").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, second.id);
        assert_eq!(found[1].id, first.id);
    }

    #[tokio::test]
    async fn test_capacity_eviction_drops_oldest() {
        let store = InMemoryTaskStore::new().with_max_tasks(2);
        let t1 = Task::new("ctx");
        let t2 = Task::new("ctx");
        let t3 = Task::new("ctx");
        store.save(&t1).await.unwrap();
        store.save(&t2).await.unwrap();
        store.save(&t3).await.unwrap();

        assert!(store.get(&t1.id).await.unwrap().is_none());
        assert!(store.get(&t2.id).await.unwrap().is_some());
        assert!(store.get(&t3.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("ctx");
        store.save(&task).await.unwrap();
        store.delete(&task.id).await.unwrap();
        store.delete(&task.id).await.unwrap();
        assert!(store.get(&task.id).await.unwrap().is_none());
    }
}
