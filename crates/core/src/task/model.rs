//! Task model definitions

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scm::Scm;
use crate::conclusion::Conclusion;
use crate::config::WorkerConfig;

/// Task status as reported on the response channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// Timing information recorded by the worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Details of the worker that picked up the task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub node: String,
    pub version: String,
    #[serde(rename = "workerID")]
    pub worker_id: String,
    #[serde(rename = "workerName", default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// The pipeline task definition this unit of work was created from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: String,
    #[serde(default)]
    pub number: u64,
}

/// One schedulable unit of CI work tied to a single SCM revision.
///
/// Unknown fields are kept in `extra` so that a task pushed back to the
/// response channel carries everything the scheduler originally sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "taskID")]
    pub task_id: String,
    pub owner: String,
    pub repository: String,
    pub build_number: u64,
    pub build_key: String,
    #[serde(rename = "buildID", default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    #[serde(default)]
    pub task: TaskRef,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub stats: TaskStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerInfo>,
    #[serde(default)]
    pub scm: Scm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_config: Option<WorkerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Conclusion>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Create a task for the given repository and build
    pub fn new(
        task_id: impl Into<String>,
        owner: impl Into<String>,
        repository: impl Into<String>,
        build_key: impl Into<String>,
        build_number: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            owner: owner.into(),
            repository: repository.into(),
            build_key: build_key.into(),
            build_number,
            ..Default::default()
        }
    }

    /// Set the task definition reference
    pub fn with_task_ref(mut self, id: impl Into<String>, number: u64) -> Self {
        self.task = TaskRef {
            id: id.into(),
            number,
        };
        self
    }

    /// Set the source-control descriptor
    pub fn with_scm(mut self, scm: Scm) -> Self {
        self.scm = scm;
        self
    }

    /// Set the per-task worker configuration
    pub fn with_worker_config(mut self, worker_config: WorkerConfig) -> Self {
        self.worker_config = Some(worker_config);
        self
    }

    /// Add a pipeline config value
    pub fn with_config_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_wire_task() {
        let raw = json!({
            "taskID": "t-1",
            "owner": "octo",
            "repository": "widgets",
            "buildNumber": 12,
            "buildKey": "main",
            "buildID": "octo-widgets-main-12",
            "task": {"id": "unit-tests", "number": 2},
            "status": "queued",
            "stats": {},
            "scm": {
                "branch": {"name": "main", "sha": "latest"},
                "sshURL": "git@github.com:octo/widgets.git"
            },
            "config": {"xcode": {"value": "15.1"}},
            "workerConfig": {"taskCommand": "build.sh"},
            "queuedAt": "2024-01-01T00:00:00Z"
        });

        let task: Task = serde_json::from_value(raw).unwrap();
        assert_eq!(task.task_id, "t-1");
        assert_eq!(task.build_number, 12);
        assert_eq!(task.task.id, "unit-tests");
        assert_eq!(task.task.number, 2);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.build_id.as_deref(), Some("octo-widgets-main-12"));
        assert!(task.extra.contains_key("queuedAt"));
    }

    #[test]
    fn test_unknown_fields_survive_serialization() {
        let raw = json!({
            "taskID": "t-1",
            "owner": "octo",
            "repository": "widgets",
            "buildNumber": 1,
            "buildKey": "main",
            "queuedAt": "2024-01-01T00:00:00Z"
        });
        let task: Task = serde_json::from_value(raw).unwrap();
        let back = serde_json::to_value(&task).unwrap();
        assert_eq!(back["queuedAt"], "2024-01-01T00:00:00Z");
        assert_eq!(back["status"], "queued");
    }

    #[test]
    fn test_status_names() {
        assert_eq!(TaskStatus::InProgress.as_str(), "in_progress");
        assert_eq!(
            serde_json::to_value(TaskStatus::InProgress).unwrap(),
            json!("in_progress")
        );
    }
}
