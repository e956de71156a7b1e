pub mod events;
pub mod scripted;

pub use events::{AgentEvent, AgentEventStream, AgentFault, FinishReason};
pub use scripted::ScriptedAgent;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::a2a::Message;
use crate::errors::BridgeResult;

/// Per-call context handed to the agent alongside the message history.
///
/// Carries the ids of the surrounding task and conversation plus the
/// cancellation token the adapter will trip when the caller cancels.
/// Agents should observe the token between generation steps; in-flight
/// non-cancelable tool calls are allowed to resolve.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub context_id: String,
    pub task_id: Option<String>,
    pub cancel: CancellationToken,
    pub metadata: HashMap<String, Value>,
}

impl CallContext {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            task_id: None,
            cancel: CancellationToken::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The outcome of a tool call, as surfaced to artifact extraction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolOutcome {
    pub tool_name: String,
    pub result: Value,
}

/// A complete, non-streamed generation result. Serializable so durable
/// step caches can replay it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentReply {
    pub text: String,
    pub tool_outcomes: Vec<ToolOutcome>,
    pub finish: FinishReason,
}

impl AgentReply {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_outcomes: Vec::new(),
            finish: FinishReason::Stop,
        }
    }
}

/// The conversational capability the adapter consumes.
///
/// Implementations wrap an LLM-driven tool-calling loop. `stream` returns a
/// finite, single-consumption event sequence; it is not restartable, and
/// the adapter never polls it again after a terminal event.
#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    /// Stable agent name, used for registry lookups and logs.
    fn name(&self) -> &str;

    /// Run a full generation turn and return the consolidated result.
    async fn generate(
        &self,
        messages: Vec<Message>,
        ctx: CallContext,
    ) -> BridgeResult<AgentReply>;

    /// Run a generation turn as an ordered event stream.
    async fn stream(
        &self,
        messages: Vec<Message>,
        ctx: CallContext,
    ) -> BridgeResult<AgentEventStream>;
}
