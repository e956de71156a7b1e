//! Bridge between tool-calling conversational agents and the A2A task
//! lifecycle.
//!
//! The [`TaskLifecycleAdapter`] decides whether a request is answered as a
//! stateless message or a lifecycle-tracked task, drives the task state
//! machine while the agent is still generating, extracts artifacts from
//! tool output, persists incremental snapshots to a pluggable store, and
//! supports durable replay so retried work never re-executes side effects.

pub mod a2a;
pub mod adapter;
pub mod agent;
pub mod artifacts;
pub mod config;
pub mod durable;
pub mod errors;
pub mod registry;
pub mod routing;
pub mod task;

// Re-export the core surface for easier access
pub use adapter::{ExecuteOptions, ProtocolEventStream, TaskLifecycleAdapter};
pub use agent::{AgentEvent, AgentEventStream, ConversationalAgent, FinishReason};
pub use config::{ExecutionConfig, ExecutionMode};
pub use errors::{BridgeError, BridgeResult};
pub use routing::{ResponseTypeDecision, ResponseTypeRouter};
pub use task::{InMemoryTaskStore, KvTaskStore, TaskStore};
