use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{BridgeError, BridgeResult};

/// Bounded exponential backoff for transient failures.
///
/// Permanent errors (per [`BridgeError::is_retryable`]) propagate on the
/// first attempt; transient ones are retried up to `max_attempts` with a
/// doubling delay capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after `retries_used` failures.
    pub fn backoff_delay(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::from_millis(0);
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let shift = retries_used.min(20);
        let backoff_ms = base_ms.saturating_mul(1u128 << shift).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }

    /// Run `f`, retrying transient failures per this policy.
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> BridgeResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut retries_used = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries_used + 1 < attempts => {
                    let delay = self.backoff_delay(retries_used);
                    retries_used += 1;
                    tracing::warn!(
                        operation,
                        error = %e,
                        retry_attempt = retries_used,
                        retry_in_ms = delay.as_millis() as u64,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Persistence for completed step results, keyed by run id + step name.
#[async_trait]
pub trait StepCache: Send + Sync {
    async fn get(&self, key: &str) -> BridgeResult<Option<Value>>;
    async fn put(&self, key: &str, value: Value) -> BridgeResult<()>;
}

/// In-process step cache. Survives replays within a process; production
/// deployments back this with the same engine as the task store.
pub struct MemoryStepCache {
    entries: DashMap<String, Value>,
}

impl MemoryStepCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for MemoryStepCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepCache for MemoryStepCache {
    async fn get(&self, key: &str) -> BridgeResult<Option<Value>> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn put(&self, key: &str, value: Value) -> BridgeResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// At-most-once-side-effect execution of workflow steps.
///
/// `step(name, fn)` runs `fn` on first invocation and caches the result
/// under the wrapper's run id plus `name`; any replay with the same key
/// returns the cached value without invoking `fn` again. This is what
/// keeps a retried workflow from re-rolling dice or re-charging an API.
pub struct DurableStepWrapper {
    cache: Arc<dyn StepCache>,
    run_id: String,
    policy: RetryPolicy,
}

impl DurableStepWrapper {
    pub fn new(run_id: impl Into<String>, cache: Arc<dyn StepCache>) -> Self {
        Self {
            cache,
            run_id: run_id.into(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn step_key(&self, name: &str) -> String {
        format!("{}::{}", self.run_id, name)
    }

    /// Execute `f` once per step key, replay-safe.
    ///
    /// Transient failures of `f` are retried per the policy before anything
    /// is cached; only a successful result is recorded. Permanent errors
    /// propagate immediately and leave the step un-cached, so a later
    /// replay may try again.
    pub async fn step<T, F, Fut>(&self, name: &str, f: F) -> BridgeResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let key = self.step_key(name);

        if let Some(cached) = self.cache.get(&key).await? {
            tracing::debug!(step = name, run_id = %self.run_id, "replaying cached step result");
            return serde_json::from_value(cached).map_err(|e| BridgeError::Serialization {
                format: "json".to_string(),
                reason: format!("cached step result for '{key}' is corrupt: {e}"),
            });
        }

        let value = self.policy.run(name, &f).await?;
        self.cache.put(&key, serde_json::to_value(&value)?).await?;
        Ok(value)
    }
}
