mod runner;

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::a2a::{
    Message, MessageRole, MessageSendParams, SendMessageResult, SendStreamingMessageResult, Task,
    TaskIdParams, TaskQueryParams, TaskState,
};
use crate::agent::{AgentEvent, CallContext, ConversationalAgent};
use crate::artifacts::{ArtifactExtractor, DataArtifactExtractor};
use crate::config::{ExecutionConfig, ExecutionMode};
use crate::durable::{DurableStepWrapper, RetryPolicy, StepCache};
use crate::errors::{BridgeError, BridgeResult};
use crate::routing::{ResponseTypeDecision, ResponseTypeRouter, RouteContext};
use crate::task::TaskStore;

use runner::{persist_task, Runner};

/// Ordered protocol events produced by one streaming execution.
pub type ProtocolEventStream =
    Pin<Box<dyn Stream<Item = SendStreamingMessageResult> + Send>>;

/// Per-call execution knobs supplied by the caller.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Cooperative cancellation signal, observed at event boundaries.
    pub cancel: CancellationToken,
    /// Overall deadline for the execution. Exceeding it is fatal, not
    /// transient.
    pub deadline: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }
}

/// The bridge between a conversational agent and the A2A task lifecycle.
///
/// Owns the state machine. Decides message-vs-task per request, creates or
/// continues the task, consumes the agent's event stream strictly in
/// order, extracts artifacts at tool boundaries, persists snapshots at
/// checkpoints, and emits ordered protocol events. One adapter serves many
/// concurrent executions across unrelated task ids; all mutable state is
/// partitioned by task id.
pub struct TaskLifecycleAdapter {
    agent: Arc<dyn ConversationalAgent>,
    store: Arc<dyn TaskStore>,
    router: ResponseTypeRouter,
    extractor: Arc<dyn ArtifactExtractor>,
    config: ExecutionConfig,
    step_cache: Option<Arc<dyn StepCache>>,
    retry_policy: RetryPolicy,
    /// message id -> watch over the winning execution's task id. Entries
    /// live only while the winning execution runs.
    inflight: Arc<DashMap<String, watch::Receiver<Option<String>>>>,
    /// task id -> cancellation token of the live execution.
    cancellations: Arc<DashMap<String, CancellationToken>>,
}

impl TaskLifecycleAdapter {
    pub fn new(agent: Arc<dyn ConversationalAgent>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            agent,
            store,
            router: ResponseTypeRouter::default(),
            extractor: Arc::new(DataArtifactExtractor),
            config: ExecutionConfig::default(),
            step_cache: None,
            retry_policy: RetryPolicy::default(),
            inflight: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
        }
    }

    pub fn with_router(mut self, router: ResponseTypeRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArtifactExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable durable execution: transient agent faults are retried, and
    /// generate-mode invocations are cached per (task id, step).
    pub fn with_durability(mut self, cache: Arc<dyn StepCache>) -> Self {
        self.step_cache = Some(cache);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Dispatch on the configured mode, normalizing both shapes to an
    /// event stream.
    pub async fn execute(
        &self,
        params: MessageSendParams,
        options: ExecuteOptions,
    ) -> BridgeResult<ProtocolEventStream> {
        match self.config.mode {
            ExecutionMode::Stream => self.stream_message(params, options).await,
            ExecutionMode::Generate => {
                let result = self.send_message(params, options).await?;
                let item = match result {
                    SendMessageResult::Task(task) => SendStreamingMessageResult::Task(task),
                    SendMessageResult::Message(message) => {
                        SendStreamingMessageResult::Message(message)
                    }
                };
                Ok(Box::pin(tokio_stream::once(item)))
            }
        }
    }

    /// `message/stream`: run the agent and stream ordered protocol events.
    ///
    /// Validation failures and unknown task references reject synchronously
    /// before any task is created. Every accepted execution delivers a
    /// terminal event on the returned stream.
    pub async fn stream_message(
        &self,
        params: MessageSendParams,
        options: ExecuteOptions,
    ) -> BridgeResult<ProtocolEventStream> {
        validate(&params)?;
        let message_id = params.message.message_id.clone();

        let id_tx = match self.claim_message(&message_id) {
            Claim::Winner(id_tx) => id_tx,
            Claim::Duplicate(rx) => {
                let task = self.await_winner(rx).await?;
                return Ok(Box::pin(tokio_stream::once(
                    SendStreamingMessageResult::Task(task),
                )));
            }
        };

        let prepared = match self.prepare(&params).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.inflight.remove(&message_id);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(32);
        match prepared {
            Prepared::Duplicate(task) => {
                // Same message id already in this task's history: a retry
                // of completed work. Hand back the snapshot, invoke nothing.
                let _ = id_tx.send(Some(task.id.clone()));
                self.inflight.remove(&message_id);
                let _ = tx.send(SendStreamingMessageResult::Task(task)).await;
            }
            Prepared::Ephemeral => {
                self.spawn_ephemeral(params.message.clone(), options, tx, message_id);
            }
            Prepared::Tracked { task, inbound } => {
                let _ = id_tx.send(Some(task.id.clone()));
                self.cancellations
                    .insert(task.id.clone(), options.cancel.clone());

                let runner = Runner {
                    agent: Arc::clone(&self.agent),
                    store: Arc::clone(&self.store),
                    extractor: Arc::clone(&self.extractor),
                    config: self.config.clone(),
                    retry_policy: self.retry_policy.clone(),
                    durable: self.step_cache.is_some(),
                    tx,
                    cancel: options.cancel.clone(),
                };
                let inflight = Arc::clone(&self.inflight);
                let cancellations = Arc::clone(&self.cancellations);
                let task_id = task.id.clone();
                let deadline = options.deadline;

                tokio::spawn(async move {
                    runner.run(task, inbound, deadline).await;
                    cancellations.remove(&task_id);
                    inflight.remove(&message_id);
                    // Dropped here so duplicate waiters holding the watch
                    // see the task id for as long as the execution lives.
                    drop(id_tx);
                });
            }
        }

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// `message/send`: one consolidated result, message or task.
    pub async fn send_message(
        &self,
        params: MessageSendParams,
        options: ExecuteOptions,
    ) -> BridgeResult<SendMessageResult> {
        validate(&params)?;
        let message_id = params.message.message_id.clone();

        let id_tx = match self.claim_message(&message_id) {
            Claim::Winner(id_tx) => id_tx,
            Claim::Duplicate(rx) => {
                let task = self.await_winner(rx).await?;
                return Ok(SendMessageResult::Task(task));
            }
        };

        let result = self.send_message_inner(&params, &options, &id_tx).await;
        self.inflight.remove(&message_id);
        result
    }

    async fn send_message_inner(
        &self,
        params: &MessageSendParams,
        options: &ExecuteOptions,
        id_tx: &watch::Sender<Option<String>>,
    ) -> BridgeResult<SendMessageResult> {
        match self.prepare(params).await? {
            Prepared::Duplicate(task) => {
                let _ = id_tx.send(Some(task.id.clone()));
                Ok(SendMessageResult::Task(task))
            }
            Prepared::Ephemeral => {
                let ctx = CallContext::new(
                    params
                        .message
                        .context_id
                        .clone()
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                )
                .with_cancel(options.cancel.clone());
                let reply = self
                    .agent
                    .generate(vec![params.message.clone()], ctx)
                    .await?;
                Ok(SendMessageResult::Message(Message::agent_text(reply.text)))
            }
            Prepared::Tracked { mut task, inbound } => {
                let _ = id_tx.send(Some(task.id.clone()));
                self.cancellations
                    .insert(task.id.clone(), options.cancel.clone());
                let outcome = self.run_generate(&mut task, &inbound, options).await;
                self.cancellations.remove(&task.id);

                match outcome {
                    Ok(()) => Ok(SendMessageResult::Task(task)),
                    Err(e) if task.state().can_transition_to(TaskState::Failed) => {
                        tracing::warn!(task_id = %task.id, error = %e, "generate execution failed");
                        let note = Message::agent_text(e.to_string());
                        task.set_state(TaskState::Failed, Some(note));
                        if let Err(persist_err) =
                            persist_task(&self.store, &self.retry_policy, &mut task).await
                        {
                            tracing::warn!(
                                task_id = %task.id,
                                error = %persist_err,
                                "failed to persist failed snapshot"
                            );
                        }
                        Ok(SendMessageResult::Task(task))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Generate-mode execution against an owned task.
    async fn run_generate(
        &self,
        task: &mut Task,
        inbound: &Message,
        options: &ExecuteOptions,
    ) -> BridgeResult<()> {
        if task.state() != TaskState::Working {
            if !task.state().can_transition_to(TaskState::Working) {
                return Err(BridgeError::InvalidStateTransition {
                    from: task.state().to_string(),
                    to: TaskState::Working.to_string(),
                });
            }
            task.set_state(TaskState::Working, None);
        }
        persist_task(&self.store, &self.retry_policy, task).await?;

        let prompt = if self.config.include_history_in_prompt {
            task.history.clone()
        } else {
            vec![inbound.clone()]
        };
        let ctx = CallContext::new(task.context_id.clone())
            .with_task_id(task.id.clone())
            .with_cancel(options.cancel.clone());

        let agent = Arc::clone(&self.agent);
        let invoke = move || {
            let prompt = prompt.clone();
            let ctx = ctx.clone();
            let agent = Arc::clone(&agent);
            async move { agent.generate(prompt, ctx).await }
        };

        let step_cache = self.step_cache.clone();
        let retry_policy = self.retry_policy.clone();
        // One workflow run per (task, inbound message): replays of the
        // same request share the run id, later continuations do not.
        let run_id = format!("{}:{}", task.id, inbound.message_id);
        let reply_fut = async move {
            match step_cache {
                Some(cache) => {
                    // Replays of an interrupted run reuse the cached reply
                    // instead of re-invoking the agent.
                    DurableStepWrapper::new(run_id, cache)
                        .with_policy(retry_policy)
                        .step("agent_generate", invoke)
                        .await
                }
                None => invoke().await,
            }
        };

        let reply = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                if task.state().can_transition_to(TaskState::Canceled) {
                    task.set_state(TaskState::Canceled, None);
                    persist_task(&self.store, &self.retry_policy, task).await?;
                }
                return Ok(());
            }
            reply = async {
                match options.deadline {
                    Some(limit) => tokio::time::timeout(limit, reply_fut)
                        .await
                        .map_err(|_| BridgeError::Timeout {
                            operation: "execute".to_string(),
                            duration_ms: limit.as_millis() as u64,
                        })?,
                    None => reply_fut.await,
                }
            } => reply?,
        };

        for outcome in &reply.tool_outcomes {
            for artifact in self.extractor.extract(&outcome.tool_name, &outcome.result) {
                if !task.push_artifact(artifact.clone()) {
                    tracing::warn!(
                        task_id = %task.id,
                        artifact_id = %artifact.artifact_id,
                        "dropping artifact with duplicate id"
                    );
                }
            }
        }

        if !reply.text.is_empty() {
            let mut message = Message::agent_text(reply.text);
            message.context_id = Some(task.context_id.clone());
            message.task_id = Some(task.id.clone());
            task.push_message(message);
        }

        let next = match reply.finish {
            crate::agent::FinishReason::Stop => TaskState::Completed,
            crate::agent::FinishReason::InputRequired => TaskState::InputRequired,
        };
        if !task.state().can_transition_to(next) {
            return Err(BridgeError::InvalidStateTransition {
                from: task.state().to_string(),
                to: next.to_string(),
            });
        }
        task.set_state(next, None);
        persist_task(&self.store, &self.retry_policy, task).await
    }

    /// `tasks/get`, with optional history truncation to the most recent N
    /// entries.
    pub async fn get_task(&self, params: TaskQueryParams) -> BridgeResult<Task> {
        let mut task = self
            .store
            .get(&params.id)
            .await?
            .ok_or_else(|| BridgeError::TaskNotFound {
                task_id: params.id.clone(),
            })?;

        if let Some(history_length) = params.history_length {
            if history_length >= 0 {
                let limit = history_length as usize;
                if task.history.len() > limit {
                    task.history = task.history.split_off(task.history.len() - limit);
                }
            }
        }
        Ok(task)
    }

    /// `tasks/cancel`. A live execution is signaled cooperatively and
    /// transitions on its own; a dormant task transitions directly.
    pub async fn cancel_task(&self, params: TaskIdParams) -> BridgeResult<Task> {
        let task = self
            .store
            .get(&params.id)
            .await?
            .ok_or_else(|| BridgeError::TaskNotFound {
                task_id: params.id.clone(),
            })?;

        if task.state().is_terminal() {
            return Err(BridgeError::TaskNotCancelable {
                task_id: task.id,
                state: task.status.state.to_string(),
            });
        }

        if let Some(entry) = self.cancellations.get(&params.id) {
            entry.value().cancel();
            // The owning execution observes the signal at its next event
            // boundary and persists the canceled snapshot itself.
            return Ok(task);
        }

        let mut task = task;
        task.set_state(TaskState::Canceled, None);
        persist_task(&self.store, &self.retry_policy, &mut task).await?;
        Ok(task)
    }

    /// All tasks of one conversation context, newest first.
    pub async fn list_tasks(&self, context_id: &str) -> BridgeResult<Vec<Task>> {
        self.store.find_by_context(context_id).await
    }

    // ===== internals =====

    fn claim_message(&self, message_id: &str) -> Claim {
        use dashmap::mapref::entry::Entry;
        match self.inflight.entry(message_id.to_string()) {
            Entry::Occupied(entry) => Claim::Duplicate(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (id_tx, id_rx) = watch::channel(None);
                entry.insert(id_rx);
                Claim::Winner(id_tx)
            }
        }
    }

    /// Wait for the winning execution of a duplicate message id to publish
    /// its task id, then return that task's snapshot.
    async fn await_winner(&self, mut rx: watch::Receiver<Option<String>>) -> BridgeResult<Task> {
        let task_id = match rx.wait_for(|id| id.is_some()).await {
            Ok(id) => id.clone().expect("watch satisfied with some id"),
            Err(_) => {
                // The winner went away before a task existed (it failed
                // validation-adjacent setup or answered ephemerally).
                return Err(BridgeError::TransientIo {
                    operation: "dedup".to_string(),
                    reason: "duplicate of a request that produced no task".to_string(),
                });
            }
        };
        self.store
            .get(&task_id)
            .await?
            .ok_or(BridgeError::TaskNotFound { task_id })
    }

    /// Resolve the inbound request into an execution plan. No agent work
    /// happens here; this is safe to run before any task exists.
    async fn prepare(&self, params: &MessageSendParams) -> BridgeResult<Prepared> {
        let message = &params.message;

        if let Some(task_id) = &message.task_id {
            let task =
                self.store
                    .get(task_id)
                    .await?
                    .ok_or_else(|| BridgeError::TaskNotFound {
                        task_id: task_id.clone(),
                    })?;

            let already_seen = task.contains_message(&message.message_id);
            if already_seen
                && (task.state().is_terminal() || task.state() == TaskState::InputRequired)
            {
                // A retry of work that already ran to rest. Hand back the
                // snapshot; nothing re-executes.
                return Ok(Prepared::Duplicate(task));
            }
            if task.state().is_terminal() {
                return Err(BridgeError::InvalidStateTransition {
                    from: task.state().to_string(),
                    to: TaskState::Working.to_string(),
                });
            }

            // Continuations of a live task never downgrade to a message.
            // A seen message id on a mid-flight task is a replay after an
            // interruption: the message is not re-appended, and durable
            // step caching keeps replayed side effects at-most-once.
            let mut task = task;
            let mut inbound = message.clone();
            inbound.context_id = Some(task.context_id.clone());
            inbound.task_id = Some(task.id.clone());
            if task.push_message(inbound.clone()) {
                persist_task(&self.store, &self.retry_policy, &mut task).await?;
            }
            return Ok(Prepared::Tracked { task, inbound });
        }

        let decision = self
            .router
            .decide(RouteContext {
                message,
                existing_task: None,
            })
            .await;

        match decision {
            ResponseTypeDecision::Message => Ok(Prepared::Ephemeral),
            ResponseTypeDecision::Task => {
                let context_id = message
                    .context_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let mut task = Task::new(context_id);
                let mut inbound = message.clone();
                inbound.context_id = Some(task.context_id.clone());
                inbound.task_id = Some(task.id.clone());
                task.push_message(inbound.clone());
                // Initial write: the submitted snapshot at revision 1.
                self.retry_policy
                    .run("task_store.save", || self.store.save(&task))
                    .await?;
                Ok(Prepared::Tracked { task, inbound })
            }
        }
    }

    /// Ephemeral reply: consume the stream into one message, no task, no
    /// persistence.
    fn spawn_ephemeral(
        &self,
        message: Message,
        options: ExecuteOptions,
        tx: mpsc::Sender<SendStreamingMessageResult>,
        message_id: String,
    ) {
        let agent = Arc::clone(&self.agent);
        let inflight = Arc::clone(&self.inflight);
        let context_id = message
            .context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let cancel = options.cancel;

        tokio::spawn(async move {
            let ctx = CallContext::new(context_id.clone()).with_cancel(cancel.clone());
            let outcome = agent.stream(vec![message], ctx).await;
            let mut buffer = String::new();

            let reply = match outcome {
                Ok(mut stream) => loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break None,
                        event = stream.next() => match event {
                            Some(AgentEvent::TextDelta(delta)) => buffer.push_str(&delta),
                            Some(AgentEvent::Finish(_)) | None => {
                                break Some(Message::agent_text(std::mem::take(&mut buffer)));
                            }
                            Some(AgentEvent::Error(fault)) => {
                                tracing::warn!(error = %fault.message, "ephemeral reply failed");
                                break Some(Message::agent_text(format!(
                                    "The request could not be completed: {}",
                                    fault.message
                                )));
                            }
                            Some(_) => {}
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "ephemeral agent invocation failed");
                    Some(Message::agent_text(format!(
                        "The request could not be completed: {e}"
                    )))
                }
            };

            if let Some(mut reply) = reply {
                reply.context_id = Some(context_id);
                let _ = tx.send(SendStreamingMessageResult::Message(reply)).await;
            }
            inflight.remove(&message_id);
        });
    }
}

enum Claim {
    Winner(watch::Sender<Option<String>>),
    Duplicate(watch::Receiver<Option<String>>),
}

enum Prepared {
    /// The message id is already part of this task's history.
    Duplicate(Task),
    /// Router chose an ephemeral message; no task will exist.
    Ephemeral,
    /// A task ready to execute, inbound message appended and persisted.
    Tracked { task: Task, inbound: Message },
}

fn validate(params: &MessageSendParams) -> BridgeResult<()> {
    let message = &params.message;
    if message.message_id.trim().is_empty() {
        return Err(BridgeError::Validation {
            field: "message.messageId".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if message.parts.is_empty() {
        return Err(BridgeError::Validation {
            field: "message.parts".to_string(),
            reason: "must contain at least one part".to_string(),
        });
    }
    if message.role != MessageRole::User {
        return Err(BridgeError::Validation {
            field: "message.role".to_string(),
            reason: "inbound messages must have the user role".to_string(),
        });
    }
    Ok(())
}
