//! In-process script tasks
//!
//! A task command whose path ends in [`SCRIPT_EXTENSION`] is not spawned.
//! It is looked up in a [`ScriptRegistry`] and executed in-process.
//! Registrations are keyed by the command's resolved path; registering the
//! same path again replaces the earlier plugin.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use stampede_core::{Conclusion, ExecutionPlan};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Level};

/// Extension marking a command as a script task
pub const SCRIPT_EXTENSION: &str = "task";

/// A task implemented in-process
#[async_trait]
pub trait ScriptTask: Send + Sync {
    /// Run the task in `working_dir`. Errors are reported as a failed task.
    async fn execute(
        &self,
        plan: &ExecutionPlan,
        working_dir: &Path,
        log: &TaskLog,
    ) -> anyhow::Result<Conclusion>;
}

/// Script tasks by resolved command path
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    scripts: HashMap<PathBuf, Arc<dyn ScriptTask>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` names a script task
    pub fn is_script(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION)
    }

    pub fn register(&mut self, path: impl Into<PathBuf>, script: Arc<dyn ScriptTask>) {
        let path = path.into();
        if self.scripts.insert(path.clone(), script).is_some() {
            info!("Replaced script task {:?}", path);
        }
    }

    pub fn get(&self, path: &Path) -> Option<Arc<dyn ScriptTask>> {
        self.scripts.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("scripts", &self.scripts.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Logger handed to script tasks. Lines are appended to the task's stdout
/// log and mirrored to tracing.
pub struct TaskLog {
    path: Option<PathBuf>,
    file: Mutex<Option<tokio::fs::File>>,
}

impl TaskLog {
    /// Log appending to `path`, or to tracing only when `None`
    pub async fn open(path: Option<PathBuf>) -> Self {
        let file = match &path {
            Some(path) => match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
            {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("Unable to open task log {:?}: {}", path, e);
                    None
                }
            },
            None => None,
        };

        Self {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        self.write(Level::INFO, message.as_ref()).await;
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        self.write(Level::ERROR, message.as_ref()).await;
    }

    async fn write(&self, level: Level, message: &str) {
        if level == Level::ERROR {
            error!(target: "task_runner::script", "{}", message);
        } else {
            info!(target: "task_runner::script", "{}", message);
        }

        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            let line = format!(
                "{} {} {}\n",
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                level,
                message
            );
            let written = match file.write_all(line.as_bytes()).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!("Unable to write task log: {}", e);
            }
        }
    }
}
