use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A2A protocol data model.
///
/// Field names and serialized shapes follow the A2A JSON schema; only the
/// types the task lifecycle needs are defined here. Wire envelopes
/// (JSON-RPC, SSE framing) are a transport concern and live elsewhere.

// ============================================================================
// Task lifecycle
// ============================================================================

/// Lifecycle state of a task.
///
/// The lifecycle is `submitted -> working -> {input-required, completed,
/// failed, canceled}`, with `input-required` returning to `working` when a
/// continuation message arrives. The last three states are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Canceled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether a transition from `self` to `next` is a valid forward step
    /// of the lifecycle table. Self-transitions are not steps.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Submitted, Working)
                | (Submitted, Canceled)
                | (Working, InputRequired)
                | (Working, Completed)
                | (Working, Failed)
                | (Working, Canceled)
                | (InputRequired, Working)
                | (InputRequired, Canceled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    /// ISO 8601 datetime of the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Optional status message shown alongside the state, including the
    /// partial agent message carried by streaming delta updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            timestamp: Some(Utc::now().to_rfc3339()),
            message: None,
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }
}

/// A stateful, lifecycle-tracked unit of agent work.
///
/// Owned exclusively by the adapter execution that is driving it; persisted
/// snapshots belong to the store. `revision` increases monotonically with
/// every persisted write and is the store's compare-and-set token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub kind: String, // Always "task"
    pub id: String,
    #[serde(rename = "contextId")]
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub history: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub artifacts: Vec<Artifact>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Task {
    /// Create a new task in `submitted` within the given context.
    pub fn new(context_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            kind: "task".to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            status: TaskStatus::new(TaskState::Submitted),
            history: Vec::new(),
            artifacts: Vec::new(),
            created_at: now,
            updated_at: now,
            revision: 1,
            metadata: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.status.state
    }

    /// Append a message to the history. Returns false (and leaves the task
    /// untouched) when the message id is already present; history is
    /// append-only and ids are never reused within a task.
    pub fn push_message(&mut self, message: Message) -> bool {
        if self.contains_message(&message.message_id) {
            return false;
        }
        self.history.push(message);
        self.updated_at = Utc::now();
        true
    }

    pub fn contains_message(&self, message_id: &str) -> bool {
        self.history.iter().any(|m| m.message_id == message_id)
    }

    /// Append an artifact. Returns false when an artifact with the same id
    /// already exists; artifact ids are unique within a task.
    pub fn push_artifact(&mut self, artifact: Artifact) -> bool {
        if self
            .artifacts
            .iter()
            .any(|a| a.artifact_id == artifact.artifact_id)
        {
            return false;
        }
        self.artifacts.push(artifact);
        self.updated_at = Utc::now();
        true
    }

    /// Move to `state`, stamping the status timestamp. The caller is
    /// responsible for checking `can_transition_to` first.
    pub fn set_state(&mut self, state: TaskState, message: Option<Message>) {
        self.status = TaskStatus {
            state,
            timestamp: Some(Utc::now().to_rfc3339()),
            message,
        };
        self.updated_at = Utc::now();
    }

    /// Bump the revision ahead of a persistence write.
    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }
}

// ============================================================================
// Messages and parts
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// One turn of conversation, composed of ordered parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub kind: String, // Always "message"
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub role: MessageRole,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "contextId")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "taskId")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::text(MessageRole::User, text)
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self::text(MessageRole::Agent, text)
    }

    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            role,
            parts: vec![Part::Text {
                text: text.into(),
                metadata: None,
            }],
            context_id: None,
            task_id: None,
            metadata: None,
        }
    }

    /// Concatenated text of all text parts.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text { text, .. } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// A typed content unit inside a message or artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
    File {
        file: FileContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
    Data {
        data: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn data(data: serde_json::Value) -> Self {
        Part::Data {
            data,
            metadata: None,
        }
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Part::Data { data, .. } => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FileContent {
    WithBytes {
        /// base64-encoded payload
        bytes: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    WithUri {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// A named output produced by tool execution, distinct from conversational
/// text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    #[serde(rename = "artifactId")]
    pub artifact_id: String,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

// ============================================================================
// Request parameters
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendParams {
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<MessageSendConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl MessageSendParams {
    pub fn from_message(message: Message) -> Self {
        Self {
            message,
            configuration: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageSendConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "historyLength")]
    pub history_length: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueryParams {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "historyLength")]
    pub history_length: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIdParams {
    pub id: String,
}

// ============================================================================
// Results and streaming events
// ============================================================================

/// Result of `message/send`: a lifecycle-tracked task or an ephemeral
/// message, chosen by the response type router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendMessageResult {
    Task(Task),
    Message(Message),
}

/// One item of a `message/stream` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SendStreamingMessageResult {
    Task(Task),
    Message(Message),
    TaskStatusUpdate(TaskStatusUpdateEvent),
    TaskArtifactUpdate(TaskArtifactUpdateEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusUpdateEvent {
    pub kind: String, // Always "status-update"
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "contextId")]
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl TaskStatusUpdateEvent {
    pub fn new(task: &Task, status: TaskStatus) -> Self {
        let is_final = status.state.is_terminal();
        Self {
            kind: "status-update".to_string(),
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            status,
            is_final,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskArtifactUpdateEvent {
    pub kind: String, // Always "artifact-update"
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "contextId")]
    pub context_id: String,
    pub artifact: Artifact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "lastChunk")]
    pub last_chunk: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl TaskArtifactUpdateEvent {
    pub fn new(task: &Task, artifact: Artifact) -> Self {
        Self {
            kind: "artifact-update".to_string(),
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            artifact,
            append: None,
            last_chunk: Some(true),
            metadata: None,
        }
    }
}

// ============================================================================
// Agent discovery
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename = "stateTransitionHistory"
    )]
    pub state_transition_history: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
}

/// Self-description of an agent, published for discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub version: String,
    pub capabilities: AgentCapabilities,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skills: Vec<AgentSkill>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_table() {
        use TaskState::*;
        assert!(Submitted.can_transition_to(Working));
        assert!(Working.can_transition_to(InputRequired));
        assert!(Working.can_transition_to(Completed));
        assert!(Working.can_transition_to(Failed));
        assert!(Working.can_transition_to(Canceled));
        assert!(InputRequired.can_transition_to(Working));

        // No reversals, no skips, nothing out of a terminal state.
        assert!(!Working.can_transition_to(Submitted));
        assert!(!Submitted.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Working));
        assert!(!Failed.can_transition_to(Working));
        assert!(!Canceled.can_transition_to(Working));
        assert!(!InputRequired.can_transition_to(Completed));
    }

    #[test]
    fn test_state_serialization_is_kebab_case() {
        let json = serde_json::to_string(&TaskState::InputRequired).unwrap();
        assert_eq!(json, "\"input-required\"");
    }

    #[test]
    fn test_history_rejects_duplicate_message_ids() {
        let mut task = Task::new("ctx");
        let msg = Message::user_text("hello");
        assert!(task.push_message(msg.clone()));
        assert!(!task.push_message(msg));
        assert_eq!(task.history.len(), 1);
    }

    #[test]
    fn test_artifact_ids_unique_within_task() {
        let mut task = Task::new("ctx");
        let artifact = Artifact {
            artifact_id: "a1".to_string(),
            parts: vec![Part::text("x")],
            name: None,
            description: None,
            metadata: None,
        };
        assert!(task.push_artifact(artifact.clone()));
        assert!(!task.push_artifact(artifact));
        assert_eq!(task.artifacts.len(), 1);
    }

    #[test]
    fn test_task_round_trips_through_json() {
        let mut task = Task::new("ctx-1");
        task.push_message(Message::user_text("roll a die"));
        task.set_state(TaskState::Working, None);
        task.bump_revision();

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
        assert_eq!(back.revision, 2);
    }

    #[test]
    fn test_status_update_final_flag_follows_terminality() {
        let task = Task::new("ctx");
        let working = TaskStatusUpdateEvent::new(&task, TaskStatus::new(TaskState::Working));
        assert!(!working.is_final);
        let done = TaskStatusUpdateEvent::new(&task, TaskStatus::new(TaskState::Completed));
        assert!(done.is_final);
    }
}
