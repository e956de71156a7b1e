/// Main error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // === Request validation ===
    #[error("Validation error: {field}: {reason}")]
    Validation { field: String, reason: String },

    // === Agent execution ===
    #[error("Agent execution failed: {reason}")]
    AgentExecution { reason: String },

    #[error("Agent execution failed: {source}")]
    AgentSource {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // === Task lifecycle ===
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Task cannot be canceled: {task_id} is {state}")]
    TaskNotCancelable { task_id: String, state: String },

    #[error("Invalid task state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Execution canceled: {task_id}")]
    Canceled { task_id: String },

    // === Persistence ===
    #[error(
        "Version conflict on task {task_id}: write revision {attempted} is behind stored revision {stored}"
    )]
    VersionConflict {
        task_id: String,
        attempted: u64,
        stored: u64,
    },

    #[error("Transient I/O error: {operation}: {reason}")]
    TransientIo { operation: String, reason: String },

    #[error("Serialization error: {format}: {reason}")]
    Serialization { format: String, reason: String },

    // === General ===
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Internal error: {component}: {reason}")]
    Internal { component: String, reason: String },
}

impl BridgeError {
    /// Whether a retry with backoff can reasonably succeed.
    ///
    /// A caller-supplied deadline overrun is deliberately fatal: by the
    /// time it fires there is no time left to spend on retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientIo { .. } => true,

            Self::Validation { .. }
            | Self::AgentExecution { .. }
            | Self::AgentSource { .. }
            | Self::TaskNotFound { .. }
            | Self::TaskNotCancelable { .. }
            | Self::InvalidStateTransition { .. }
            | Self::Canceled { .. }
            | Self::VersionConflict { .. }
            | Self::Serialization { .. }
            | Self::Timeout { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Error category for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::AgentExecution { .. } | Self::AgentSource { .. } => "agent",
            Self::TaskNotFound { .. }
            | Self::TaskNotCancelable { .. }
            | Self::InvalidStateTransition { .. }
            | Self::Canceled { .. } => "task",
            Self::VersionConflict { .. }
            | Self::TransientIo { .. }
            | Self::Serialization { .. } => "store",
            Self::Timeout { .. } | Self::Internal { .. } => "system",
        }
    }

    /// Whether this should be logged at error level rather than warn.
    pub fn is_error_level(&self) -> bool {
        matches!(
            self,
            Self::Internal { .. } | Self::Serialization { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(error: serde_json::Error) -> Self {
        BridgeError::Serialization {
            format: "json".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for BridgeError {
    fn from(_error: tokio::time::error::Elapsed) -> Self {
        BridgeError::Timeout {
            operation: "execute".to_string(),
            duration_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        let io = BridgeError::TransientIo {
            operation: "save".to_string(),
            reason: "connection reset".to_string(),
        };
        assert!(io.is_retryable());
        assert_eq!(io.category(), "store");

        let timeout = BridgeError::Timeout {
            operation: "execute".to_string(),
            duration_ms: 30_000,
        };
        assert!(!timeout.is_retryable());

        let conflict = BridgeError::VersionConflict {
            task_id: "t1".to_string(),
            attempted: 2,
            stored: 5,
        };
        assert!(!conflict.is_retryable());
        assert!(!conflict.is_error_level());
    }

    #[test]
    fn test_json_conversion() {
        let err: BridgeError = serde_json::from_str::<serde_json::Value>("not json")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), "store");
        assert!(err.is_error_level());
    }
}
