use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::events::{AgentEvent, AgentEventStream, FinishReason};
use super::{AgentReply, CallContext, ConversationalAgent, ToolOutcome};
use crate::a2a::Message;
use crate::errors::{BridgeError, BridgeResult};

/// Deterministic agent that replays pre-scripted event turns.
///
/// Each call to `stream` or `generate` consumes the next scripted turn in
/// order. Used by tests and demos; keeping it in the library mirrors how
/// model mocks ship as regular modules elsewhere in the stack.
pub struct ScriptedAgent {
    name: String,
    turns: Mutex<VecDeque<Vec<AgentEvent>>>,
    invocations: AtomicUsize,
    inter_event_delay: Option<Duration>,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            turns: Mutex::new(VecDeque::new()),
            invocations: AtomicUsize::new(0),
            inter_event_delay: None,
        }
    }

    /// Queue a turn of events ending with `Finish` or `Error`.
    pub fn push_turn(&self, events: Vec<AgentEvent>) {
        self.turns.lock().unwrap().push_back(events);
    }

    pub fn with_turn(self, events: Vec<AgentEvent>) -> Self {
        self.push_turn(events);
        self
    }

    /// Sleep between events, to let tests interleave cancellation.
    pub fn with_inter_event_delay(mut self, delay: Duration) -> Self {
        self.inter_event_delay = Some(delay);
        self
    }

    /// How many times `stream`/`generate` have been called.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn next_turn(&self) -> Vec<AgentEvent> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![AgentEvent::Finish(FinishReason::Stop)])
    }
}

#[async_trait]
impl ConversationalAgent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        _messages: Vec<Message>,
        _ctx: CallContext,
    ) -> BridgeResult<AgentReply> {
        let mut text = String::new();
        let mut tool_outcomes = Vec::new();
        let mut finish = FinishReason::Stop;

        for event in self.next_turn() {
            match event {
                AgentEvent::TextDelta(delta) => text.push_str(&delta),
                AgentEvent::ReasoningDelta(_) => {}
                AgentEvent::ToolCallStart { .. } => {}
                AgentEvent::ToolResult { name, result } => tool_outcomes.push(ToolOutcome {
                    tool_name: name,
                    result,
                }),
                AgentEvent::Finish(reason) => finish = reason,
                AgentEvent::Error(fault) => {
                    return Err(BridgeError::AgentExecution {
                        reason: fault.message,
                    });
                }
            }
        }

        Ok(AgentReply {
            text,
            tool_outcomes,
            finish,
        })
    }

    async fn stream(
        &self,
        _messages: Vec<Message>,
        _ctx: CallContext,
    ) -> BridgeResult<AgentEventStream> {
        let events = self.next_turn();
        let delay = self.inter_event_delay;

        let stream = async_stream::stream! {
            for event in events {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
