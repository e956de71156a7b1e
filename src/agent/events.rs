use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// Why a generation turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The agent produced a complete answer.
    Stop,
    /// The agent is pausing for a follow-up message from the user.
    InputRequired,
}

/// A failure reported by the agent mid-stream.
///
/// `retryable` separates transient faults (rate limits, connection resets)
/// from permanent ones (bad request, content refusal). The adapter only
/// retries transient faults, and only when durability is enabled.
#[derive(Debug, Clone)]
pub struct AgentFault {
    pub message: String,
    pub retryable: bool,
}

impl AgentFault {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// One event of an agent's generation stream, emitted strictly in
/// generation order. `Finish` and `Error` are terminal: nothing follows
/// them, and a well-formed stream ends with exactly one of the two.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A chunk of the agent's visible reply text.
    TextDelta(String),
    /// A chunk of hidden reasoning; forwarded but never persisted into the
    /// task history.
    ReasoningDelta(String),
    /// The agent started a tool call.
    ToolCallStart { name: String, arguments: Value },
    /// A tool call resolved with the given payload.
    ToolResult { name: String, result: Value },
    Finish(FinishReason),
    Error(AgentFault),
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish(_) | Self::Error(_))
    }
}

/// A finite, single-consumption sequence of agent events.
///
/// Pull-based by construction: the consumer polls, the producer cannot push
/// past backpressure, and ownership transfer makes restarting impossible.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;
