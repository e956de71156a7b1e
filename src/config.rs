/// How the adapter invokes the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One consolidated generation per request.
    Generate,
    /// Event-streamed generation with incremental delivery.
    Stream,
}

/// Static per-adapter configuration. Passed by value at construction,
/// never global state. The pluggable hooks (response classifier, artifact
/// extractor) are trait objects on the adapter builder rather than fields
/// here.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Status text attached to the initial `working` update.
    pub working_status_text: String,
    /// Whether the stored task history is replayed into the agent prompt
    /// ahead of the inbound message.
    pub include_history_in_prompt: bool,
    /// Gates verbose per-event tracing.
    pub debug_logging: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Stream,
            working_status_text: "Working on it...".to_string(),
            include_history_in_prompt: true,
            debug_logging: false,
        }
    }
}

impl ExecutionConfig {
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_working_status_text(mut self, text: impl Into<String>) -> Self {
        self.working_status_text = text.into();
        self
    }

    pub fn with_include_history_in_prompt(mut self, include: bool) -> Self {
        self.include_history_in_prompt = include;
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }
}
