//! Structured task result

use serde::{Deserialize, Serialize};

/// Default conclusion title used by the worker
pub const DEFAULT_TITLE: &str = "Task results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// An artifact produced by a task, listed in its artifact list file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<serde_json::Value>,
}

/// The structured success/failure result attached to `Task::result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conclusion {
    pub conclusion: Outcome,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_table: Option<serde_json::Value>,
}

impl Conclusion {
    pub fn success(summary: impl Into<String>) -> Self {
        Self::new(Outcome::Success, summary)
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self::new(Outcome::Failure, summary)
    }

    fn new(conclusion: Outcome, summary: impl Into<String>) -> Self {
        Self {
            conclusion,
            title: DEFAULT_TITLE.to_string(),
            summary: summary.into(),
            text: String::new(),
            artifacts: Vec::new(),
            summary_table: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.conclusion == Outcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_shape() {
        let conclusion = Conclusion::failure("Task timeout");
        let value = serde_json::to_value(&conclusion).unwrap();
        assert_eq!(
            value,
            json!({
                "conclusion": "failure",
                "title": "Task results",
                "summary": "Task timeout",
                "text": ""
            })
        );
    }

    #[test]
    fn test_artifact_type_field() {
        let artifact: Artifact = serde_json::from_value(json!({
            "title": "Coverage",
            "url": "https://ci/coverage",
            "type": "link"
        }))
        .unwrap();
        assert_eq!(artifact.artifact_type, "link");
        assert!(artifact.metadata.is_none());
    }
}
