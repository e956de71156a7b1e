use serde_json::Value;

use crate::a2a::{Artifact, Part};

/// Maps tool output into zero or more immutable artifact records.
///
/// Infallible by contract: implementations turn internal failures into
/// zero artifacts plus a logged warning. Callers must not assume exactly
/// one artifact per tool call.
pub trait ArtifactExtractor: Send + Sync {
    fn extract(&self, tool_name: &str, tool_result: &Value) -> Vec<Artifact>;
}

/// Default extractor.
///
/// Tool results that carry an explicit `artifacts` array are parsed as
/// A2A artifacts; any other non-null result is wrapped whole into a single
/// data-part artifact named after the tool. A malformed `artifacts` array
/// yields nothing rather than a guessed-at record.
pub struct DataArtifactExtractor;

impl ArtifactExtractor for DataArtifactExtractor {
    fn extract(&self, tool_name: &str, tool_result: &Value) -> Vec<Artifact> {
        if tool_result.is_null() {
            return Vec::new();
        }

        if let Some(declared) = tool_result.get("artifacts") {
            return match serde_json::from_value::<Vec<Artifact>>(declared.clone()) {
                Ok(mut artifacts) => {
                    for artifact in &mut artifacts {
                        if artifact.artifact_id.is_empty() {
                            artifact.artifact_id = uuid::Uuid::new_v4().to_string();
                        }
                    }
                    artifacts
                }
                Err(e) => {
                    tracing::warn!(
                        tool = tool_name,
                        error = %e,
                        "tool declared artifacts that failed to parse, dropping them"
                    );
                    Vec::new()
                }
            };
        }

        vec![Artifact {
            artifact_id: uuid::Uuid::new_v4().to_string(),
            parts: vec![Part::data(tool_result.clone())],
            name: Some(format!("{tool_name}-result")),
            description: None,
            metadata: None,
        }]
    }
}

/// Extractor that never produces artifacts. Useful when tool output is
/// purely conversational.
pub struct NullArtifactExtractor;

impl ArtifactExtractor for NullArtifactExtractor {
    fn extract(&self, _tool_name: &str, _tool_result: &Value) -> Vec<Artifact> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_result_extracts_nothing() {
        let extracted = DataArtifactExtractor.extract("roll_dice", &Value::Null);
        assert!(extracted.is_empty());
    }

    #[test]
    fn test_plain_result_wraps_into_one_data_artifact() {
        let result = json!({"value": 4, "sides": 6});
        let extracted = DataArtifactExtractor.extract("roll_dice", &result);

        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].name.as_deref(), Some("roll_dice-result"));
        assert!(!extracted[0].artifact_id.is_empty());
        assert_eq!(extracted[0].parts[0].as_data(), Some(&result));
    }

    #[test]
    fn test_declared_artifacts_are_parsed() {
        let result = json!({
            "artifacts": [
                {
                    "artifactId": "receipt-1",
                    "name": "receipt",
                    "parts": [{"kind": "text", "text": "total: $12.00"}]
                },
                {
                    "artifactId": "",
                    "parts": [{"kind": "data", "data": {"total_cents": 1200}}]
                }
            ]
        });
        let extracted = DataArtifactExtractor.extract("parse_expense", &result);

        assert_eq!(extracted.len(), 2);
        assert_eq!(extracted[0].artifact_id, "receipt-1");
        // Blank ids are filled in so uniqueness within the task holds.
        assert!(!extracted[1].artifact_id.is_empty());
    }

    #[test]
    fn test_malformed_declared_artifacts_extract_nothing() {
        let result = json!({"artifacts": "not-an-array"});
        let extracted = DataArtifactExtractor.extract("parse_expense", &result);
        assert!(extracted.is_empty());
    }
}
