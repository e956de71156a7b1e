use async_trait::async_trait;

use crate::a2a::Task;
use crate::errors::BridgeResult;

/// Persistence contract for task snapshots.
///
/// Backends key snapshots by task id and support lookup by id and by
/// conversation context. `save` is an upsert guarded by the task's
/// `revision` field:
///
/// - a revision **below** the stored one is stale and must be rejected
///   with [`BridgeError::VersionConflict`](crate::errors::BridgeError),
///   never merged or silently applied;
/// - a revision **equal** to the stored one is an idempotent no-op, so
///   at-least-once write retries are safe;
/// - a revision **above** the stored one replaces the snapshot.
///
/// Reads return the most recently committed snapshot. Stale reads across
/// processes are acceptable (eventual consistency), but a `get` after a
/// successful `save` in the same process must return the just-written
/// value.
///
/// Expiry and eviction (TTL or capacity) are the backend's concern; the
/// adapter never deletes live tasks itself. Concurrent `save` calls for
/// different task ids must never interfere.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch a snapshot by task id. `Ok(None)` when unknown or expired.
    async fn get(&self, task_id: &str) -> BridgeResult<Option<Task>>;

    /// Upsert a snapshot, enforcing the revision rules above.
    async fn save(&self, task: &Task) -> BridgeResult<()>;

    /// All snapshots belonging to a conversation context, newest first.
    async fn find_by_context(&self, context_id: &str) -> BridgeResult<Vec<Task>>;

    /// Remove a snapshot. Idempotent; unknown ids succeed silently.
    async fn delete(&self, task_id: &str) -> BridgeResult<()>;
}
