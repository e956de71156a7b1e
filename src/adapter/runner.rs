use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::a2a::{
    Message, MessageRole, Part, SendStreamingMessageResult, Task, TaskState, TaskStatus,
    TaskStatusUpdateEvent, TaskArtifactUpdateEvent,
};
use crate::agent::{AgentEvent, ConversationalAgent, CallContext, FinishReason};
use crate::artifacts::ArtifactExtractor;
use crate::config::ExecutionConfig;
use crate::durable::RetryPolicy;
use crate::errors::{BridgeError, BridgeResult};
use crate::task::TaskStore;

/// How one agent-stream consumption ended.
pub(super) enum DriveOutcome {
    Finished(FinishReason),
    Canceled,
}

/// One streaming execution: consumes the agent's event stream in order,
/// mutates the owned task, persists at checkpoints, and emits protocol
/// events into the bounded channel.
pub(super) struct Runner {
    pub agent: Arc<dyn ConversationalAgent>,
    pub store: Arc<dyn TaskStore>,
    pub extractor: Arc<dyn ArtifactExtractor>,
    pub config: ExecutionConfig,
    pub retry_policy: RetryPolicy,
    pub durable: bool,
    pub tx: mpsc::Sender<SendStreamingMessageResult>,
    pub cancel: CancellationToken,
}

impl Runner {
    /// Drive `task` to a terminal or input-required outcome. `inbound` is
    /// already appended to the task history and the submitted snapshot is
    /// already persisted.
    pub async fn run(self, mut task: Task, inbound: Message, deadline: Option<Duration>) {
        if let Err(e) = self.enter_working(&mut task).await {
            self.fail(&mut task, e).await;
            return;
        }

        let drive_result = match deadline {
            Some(limit) => {
                match tokio::time::timeout(limit, self.drive_with_retries(&mut task, &inbound))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(BridgeError::Timeout {
                        operation: "execute".to_string(),
                        duration_ms: limit.as_millis() as u64,
                    }),
                }
            }
            None => self.drive_with_retries(&mut task, &inbound).await,
        };

        match drive_result {
            Ok(DriveOutcome::Finished(_)) => {}
            Ok(DriveOutcome::Canceled) => self.finish_canceled(&mut task).await,
            Err(e) => self.fail(&mut task, e).await,
        }
    }

    /// Transition into `working`, emit the status update, persist.
    async fn enter_working(&self, task: &mut Task) -> BridgeResult<()> {
        if task.state() != TaskState::Working {
            if !task.state().can_transition_to(TaskState::Working) {
                return Err(BridgeError::InvalidStateTransition {
                    from: task.state().to_string(),
                    to: TaskState::Working.to_string(),
                });
            }
            let note = self.stamp(
                task,
                Message::agent_text(self.config.working_status_text.as_str()),
            );
            task.set_state(TaskState::Working, Some(note));
        }
        self.emit_status(task, task.status.clone()).await;
        self.persist(task).await
    }

    /// Retry wrapper around [`Self::attempt`]. Transient agent faults are
    /// retried with backoff only when durability is enabled; a replayed
    /// attempt relies on step caching downstream to keep tool side effects
    /// at-most-once.
    async fn drive_with_retries(
        &self,
        task: &mut Task,
        inbound: &Message,
    ) -> BridgeResult<DriveOutcome> {
        let mut retries_used = 0;
        loop {
            match self.attempt(task, inbound).await {
                Err(e)
                    if e.is_retryable()
                        && self.durable
                        && retries_used + 1 < self.retry_policy.max_attempts =>
                {
                    let delay = self.retry_policy.backoff_delay(retries_used);
                    retries_used += 1;
                    tracing::warn!(
                        task_id = %task.id,
                        error = %e,
                        retry_attempt = retries_used,
                        retry_in_ms = delay.as_millis() as u64,
                        "retrying agent invocation after transient fault"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// One pass over a fresh agent event stream.
    async fn attempt(&self, task: &mut Task, inbound: &Message) -> BridgeResult<DriveOutcome> {
        let prompt = self.build_prompt(task, inbound);
        let ctx = CallContext::new(task.context_id.clone())
            .with_task_id(task.id.clone())
            .with_cancel(self.cancel.clone());

        let mut stream = self.agent.stream(prompt, ctx).await?;
        let mut buffer = String::new();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    // Dropping the stream stops polling; an in-flight
                    // non-cancelable tool call inside the agent resolves on
                    // its own and is not forcibly interrupted.
                    return Ok(DriveOutcome::Canceled);
                }
                event = stream.next() => {
                    let Some(event) = event else {
                        return Err(BridgeError::AgentExecution {
                            reason: "agent stream ended without a finish event".to_string(),
                        });
                    };
                    if self.config.debug_logging {
                        tracing::debug!(task_id = %task.id, ?event, "agent event");
                    }
                    match event {
                        AgentEvent::TextDelta(delta) => {
                            buffer.push_str(&delta);
                            let event = self.delta_status(task, &delta, false);
                            self.emit(SendStreamingMessageResult::TaskStatusUpdate(event)).await;
                        }
                        AgentEvent::ReasoningDelta(delta) => {
                            // Forwarded for observability, never buffered
                            // into the final reply or the task history.
                            let event = self.delta_status(task, &delta, true);
                            self.emit(SendStreamingMessageResult::TaskStatusUpdate(event)).await;
                        }
                        AgentEvent::ToolCallStart { name, arguments } => {
                            self.on_tool_call_start(task, &buffer, &name, arguments).await?;
                        }
                        AgentEvent::ToolResult { name, result } => {
                            self.on_tool_result(task, &name, &result).await?;
                        }
                        AgentEvent::Finish(reason) => {
                            self.finish(task, &mut buffer, reason).await?;
                            return Ok(DriveOutcome::Finished(reason));
                        }
                        AgentEvent::Error(fault) => {
                            return Err(if fault.retryable {
                                BridgeError::TransientIo {
                                    operation: "agent_stream".to_string(),
                                    reason: fault.message,
                                }
                            } else {
                                BridgeError::AgentExecution {
                                    reason: fault.message,
                                }
                            });
                        }
                    }
                }
            }
        }
    }

    /// Tool boundary: announce the call and flush a progress checkpoint so
    /// a crash never loses more than the deltas since the last boundary.
    async fn on_tool_call_start(
        &self,
        task: &mut Task,
        buffer: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> BridgeResult<()> {
        let mut note = Message {
            kind: "message".to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            role: MessageRole::Agent,
            parts: vec![Part::data(serde_json::json!({
                "tool": name,
                "arguments": arguments,
            }))],
            context_id: Some(task.context_id.clone()),
            task_id: Some(task.id.clone()),
            metadata: None,
        };
        note.metadata = Some(HashMap::from([(
            "toolCall".to_string(),
            serde_json::Value::Bool(true),
        )]));

        let status = TaskStatus {
            state: TaskState::Working,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            message: Some(note),
        };
        self.emit_status(task, status).await;

        self.checkpoint(task, buffer);
        self.persist(task).await
    }

    /// Tool result boundary: extract artifacts, append the new ones, emit
    /// artifact updates, persist.
    async fn on_tool_result(
        &self,
        task: &mut Task,
        name: &str,
        result: &serde_json::Value,
    ) -> BridgeResult<()> {
        let artifacts = self.extractor.extract(name, result);
        if artifacts.is_empty() {
            return Ok(());
        }

        let mut appended = Vec::new();
        for artifact in artifacts {
            if task.push_artifact(artifact.clone()) {
                appended.push(artifact);
            } else {
                tracing::warn!(
                    task_id = %task.id,
                    artifact_id = %artifact.artifact_id,
                    "dropping artifact with duplicate id"
                );
            }
        }

        self.persist(task).await?;
        for artifact in appended {
            let event = TaskArtifactUpdateEvent::new(task, artifact);
            self.emit(SendStreamingMessageResult::TaskArtifactUpdate(event))
                .await;
        }
        Ok(())
    }

    /// Finalize the buffered text into one agent message, transition, and
    /// flush the final write.
    async fn finish(
        &self,
        task: &mut Task,
        buffer: &mut String,
        reason: FinishReason,
    ) -> BridgeResult<()> {
        if !buffer.is_empty() {
            let reply = self.stamp(task, Message::agent_text(std::mem::take(buffer)));
            task.push_message(reply);
        }

        let next = match reason {
            FinishReason::Stop => TaskState::Completed,
            FinishReason::InputRequired => TaskState::InputRequired,
        };
        if !task.state().can_transition_to(next) {
            return Err(BridgeError::InvalidStateTransition {
                from: task.state().to_string(),
                to: next.to_string(),
            });
        }
        task.set_state(next, None);
        self.persist(task).await?;

        self.emit_status(task, task.status.clone()).await;
        self.emit(SendStreamingMessageResult::Task(task.clone())).await;
        Ok(())
    }

    async fn finish_canceled(&self, task: &mut Task) {
        if task.state().can_transition_to(TaskState::Canceled) {
            task.set_state(TaskState::Canceled, None);
            if let Err(e) = self.persist(task).await {
                tracing::warn!(task_id = %task.id, error = %e, "failed to persist canceled snapshot");
            }
        }
        self.emit_status(task, task.status.clone()).await;
        self.emit(SendStreamingMessageResult::Task(task.clone())).await;
    }

    /// Terminal failure: persist when the table allows it, and always hand
    /// the caller a final failed event rather than silence.
    async fn fail(&self, task: &mut Task, error: BridgeError) {
        if error.is_error_level() {
            tracing::error!(task_id = %task.id, error = %error, "execution failed");
        } else {
            tracing::warn!(task_id = %task.id, error = %error, "execution failed");
        }

        let note = self.stamp(task, Message::agent_text(error.to_string()));
        if task.state().can_transition_to(TaskState::Failed) {
            task.set_state(TaskState::Failed, Some(note));
            if let Err(persist_err) = self.persist(task).await {
                tracing::warn!(
                    task_id = %task.id,
                    error = %persist_err,
                    "failed to persist failed snapshot"
                );
            }
            self.emit_status(task, task.status.clone()).await;
        } else {
            // The task never reached working (or the store lost it); the
            // snapshot stays as last persisted, but the caller still gets
            // a terminal event.
            let status = TaskStatus {
                state: TaskState::Failed,
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
                message: Some(note),
            };
            self.emit_status(task, status).await;
        }
        self.emit(SendStreamingMessageResult::Task(task.clone())).await;
    }

    fn build_prompt(&self, task: &Task, inbound: &Message) -> Vec<Message> {
        if self.config.include_history_in_prompt {
            task.history.clone()
        } else {
            vec![inbound.clone()]
        }
    }

    /// Record streamed progress on the status message so checkpoints carry
    /// the partial text.
    fn checkpoint(&self, task: &mut Task, buffer: &str) {
        if buffer.is_empty() {
            return;
        }
        let partial = self.stamp(task, Message::agent_text(buffer));
        task.status.message = Some(partial);
        task.status.timestamp = Some(chrono::Utc::now().to_rfc3339());
    }

    fn delta_status(&self, task: &Task, delta: &str, reasoning: bool) -> TaskStatusUpdateEvent {
        let mut chunk = self.stamp(task, Message::agent_text(delta));
        let mut metadata = HashMap::new();
        metadata.insert("partial".to_string(), serde_json::Value::Bool(true));
        if reasoning {
            metadata.insert("reasoning".to_string(), serde_json::Value::Bool(true));
        }
        chunk.metadata = Some(metadata);

        TaskStatusUpdateEvent::new(
            task,
            TaskStatus {
                state: TaskState::Working,
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
                message: Some(chunk),
            },
        )
    }

    fn stamp(&self, task: &Task, mut message: Message) -> Message {
        message.context_id = Some(task.context_id.clone());
        message.task_id = Some(task.id.clone());
        message
    }

    async fn emit_status(&self, task: &Task, status: TaskStatus) {
        let event = TaskStatusUpdateEvent::new(task, status);
        self.emit(SendStreamingMessageResult::TaskStatusUpdate(event))
            .await;
    }

    async fn emit(&self, item: SendStreamingMessageResult) {
        if self.tx.send(item).await.is_err() {
            // The caller stopped listening; keep going so the terminal
            // snapshot is still persisted.
            tracing::debug!("protocol event receiver dropped");
        }
    }

    async fn persist(&self, task: &mut Task) -> BridgeResult<()> {
        persist_task(&self.store, &self.retry_policy, task).await
    }
}

/// Bump the revision and write, absorbing transient store failures and
/// recovering once from an unexpected revision conflict. A second conflict
/// surfaces as transient I/O; stored history is never overwritten blindly.
pub(super) async fn persist_task(
    store: &Arc<dyn TaskStore>,
    policy: &RetryPolicy,
    task: &mut Task,
) -> BridgeResult<()> {
    task.bump_revision();
    match save_with_retries(store, policy, task).await {
        Ok(()) => Ok(()),
        Err(BridgeError::VersionConflict { stored, .. }) => {
            tracing::warn!(
                task_id = %task.id,
                stored_revision = stored,
                "revision conflict during execution, rebasing onto stored revision"
            );
            task.revision = stored + 1;
            match save_with_retries(store, policy, task).await {
                Ok(()) => Ok(()),
                Err(BridgeError::VersionConflict { task_id, .. }) => Err(BridgeError::TransientIo {
                    operation: "task_store.save".to_string(),
                    reason: format!("persistent revision conflict on task {task_id}"),
                }),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

async fn save_with_retries(
    store: &Arc<dyn TaskStore>,
    policy: &RetryPolicy,
    task: &Task,
) -> BridgeResult<()> {
    policy.run("task_store.save", || store.save(task)).await
}
