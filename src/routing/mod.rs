use async_trait::async_trait;
use std::sync::Arc;

use crate::a2a::{Message, Part, Task};
use crate::errors::BridgeResult;

/// Whether a request is answered as an ephemeral message or as a
/// lifecycle-tracked task. Computed once per new (non-continuation)
/// request and handled by exhaustive match everywhere downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTypeDecision {
    Message,
    Task,
}

/// Pluggable classifier behind the router. Implementations may be
/// heuristic or call out to a model; either way the router treats a
/// failure as "no opinion" and applies its fallback.
#[async_trait]
pub trait ResponseClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> BridgeResult<ResponseTypeDecision>;
}

/// Inputs to one routing decision.
pub struct RouteContext<'a> {
    pub message: &'a Message,
    pub existing_task: Option<&'a Task>,
}

/// Decides message-vs-task per incoming request.
///
/// Continuations of a live task are always tasks; everything else goes to
/// the classifier, with a configured fallback when classification fails.
/// Safe to invoke before any task exists: the only side effect is the
/// classification call itself.
pub struct ResponseTypeRouter {
    classifier: Arc<dyn ResponseClassifier>,
    fallback: ResponseTypeDecision,
}

impl ResponseTypeRouter {
    pub fn new(classifier: Arc<dyn ResponseClassifier>) -> Self {
        Self {
            classifier,
            // Task preserves full lifecycle tracking, so it is the safer
            // default when classification is unavailable.
            fallback: ResponseTypeDecision::Task,
        }
    }

    pub fn with_fallback(mut self, fallback: ResponseTypeDecision) -> Self {
        self.fallback = fallback;
        self
    }

    pub async fn decide(&self, ctx: RouteContext<'_>) -> ResponseTypeDecision {
        if let Some(task) = ctx.existing_task {
            if !task.state().is_terminal() {
                // Continuations never downgrade to ephemeral messages.
                return ResponseTypeDecision::Task;
            }
        }

        let text = extract_text(ctx.message);
        match self.classifier.classify(&text).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback = ?self.fallback,
                    "response type classifier failed, applying fallback"
                );
                self.fallback
            }
        }
    }
}

impl Default for ResponseTypeRouter {
    fn default() -> Self {
        Self::new(Arc::new(KeywordClassifier::default()))
    }
}

fn extract_text(message: &Message) -> String {
    let mut out = String::new();
    for part in &message.parts {
        if let Part::Text { text, .. } = part {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(text);
        }
    }
    out
}

/// Heuristic classifier: short conversational phrases become messages,
/// anything that reads like a work request becomes a task.
pub struct KeywordClassifier {
    message_markers: Vec<&'static str>,
    max_message_words: usize,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            message_markers: vec![
                "hi", "hello", "hey", "thanks", "thank you", "ok", "okay", "bye", "goodbye",
                "yes", "no", "what is", "who is", "how are",
            ],
            max_message_words: 6,
        }
    }
}

#[async_trait]
impl ResponseClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> BridgeResult<ResponseTypeDecision> {
        let normalized = text.trim().trim_end_matches(['.', '!', '?']).to_lowercase();
        if normalized.is_empty() {
            return Ok(ResponseTypeDecision::Task);
        }

        let word_count = normalized.split_whitespace().count();
        let conversational = self
            .message_markers
            .iter()
            .any(|marker| normalized == *marker || normalized.starts_with(&format!("{marker} ")));

        if conversational && word_count <= self.max_message_words {
            Ok(ResponseTypeDecision::Message)
        } else {
            Ok(ResponseTypeDecision::Task)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::TaskState;
    use crate::errors::BridgeError;

    struct FailingClassifier;

    #[async_trait]
    impl ResponseClassifier for FailingClassifier {
        async fn classify(&self, _text: &str) -> BridgeResult<ResponseTypeDecision> {
            Err(BridgeError::AgentExecution {
                reason: "classifier model unavailable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_continuation_of_live_task_is_always_a_task() {
        let router = ResponseTypeRouter::default();
        let mut task = Task::new("ctx");
        task.set_state(TaskState::InputRequired, None);
        let message = Message::user_text("hi");

        let decision = router
            .decide(RouteContext {
                message: &message,
                existing_task: Some(&task),
            })
            .await;
        assert_eq!(decision, ResponseTypeDecision::Task);
    }

    #[tokio::test]
    async fn test_terminal_task_reference_falls_through_to_classifier() {
        let router = ResponseTypeRouter::default();
        let mut task = Task::new("ctx");
        task.set_state(TaskState::Working, None);
        task.set_state(TaskState::Completed, None);
        let message = Message::user_text("thanks");

        let decision = router
            .decide(RouteContext {
                message: &message,
                existing_task: Some(&task),
            })
            .await;
        assert_eq!(decision, ResponseTypeDecision::Message);
    }

    #[tokio::test]
    async fn test_keyword_classifier_routes_work_requests_to_task() {
        let router = ResponseTypeRouter::default();
        let message = Message::user_text("Parse this expense report and file the totals");

        let decision = router
            .decide(RouteContext {
                message: &message,
                existing_task: None,
            })
            .await;
        assert_eq!(decision, ResponseTypeDecision::Task);
    }

    #[tokio::test]
    async fn test_classifier_failure_applies_fallback() {
        let router = ResponseTypeRouter::new(Arc::new(FailingClassifier));
        let message = Message::user_text("hello");

        let decision = router
            .decide(RouteContext {
                message: &message,
                existing_task: None,
            })
            .await;
        assert_eq!(decision, ResponseTypeDecision::Task);

        let router = router.with_fallback(ResponseTypeDecision::Message);
        let decision = router
            .decide(RouteContext {
                message: &message,
                existing_task: None,
            })
            .await;
        assert_eq!(decision, ResponseTypeDecision::Message);
    }
}
