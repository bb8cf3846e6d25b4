//! Task process spawning

use std::path::{Path, PathBuf};
use std::process::Stdio;

use stampede_core::Environment;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::{Result, RunnerError};

/// Everything needed to start a task command
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Absolute path of the command
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Complete environment of the child; nothing else is inherited
    pub env: Environment,
    /// Shell used to launch the command, if any
    pub shell: Option<String>,
    /// Append-mode log for stdout. `None` discards output.
    pub stdout_log: Option<PathBuf>,
    /// Append-mode log for stderr. `None` shares the stdout log.
    pub stderr_log: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: Environment::new(),
            shell: None,
            stdout_log: None,
            stderr_log: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn with_shell(mut self, shell: Option<String>) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_logs(mut self, stdout: Option<PathBuf>, stderr: Option<PathBuf>) -> Self {
        self.stdout_log = stdout;
        self.stderr_log = stderr;
        self
    }
}

/// Open `path` for appending, creating it when missing
pub async fn open_append(path: &Path) -> Result<std::fs::File> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| RunnerError::LogFile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(file.into_std().await)
}

async fn output_stdio(
    stdout_log: Option<&Path>,
    stderr_log: Option<&Path>,
) -> Result<(Stdio, Stdio)> {
    let stdout = match stdout_log {
        Some(path) => Some(open_append(path).await?),
        None => None,
    };

    let stderr = match (stderr_log, &stdout) {
        (Some(path), _) => Stdio::from(open_append(path).await?),
        (None, Some(file)) => {
            let shared = file.try_clone().map_err(|source| RunnerError::LogFile {
                path: stdout_log.map(Path::to_path_buf).unwrap_or_default(),
                source,
            })?;
            Stdio::from(shared)
        }
        (None, None) => Stdio::null(),
    };

    let stdout = stdout.map(Stdio::from).unwrap_or_else(Stdio::null);
    Ok((stdout, stderr))
}

/// Spawn the task process.
///
/// With a shell the command is started as `<shell> -c 'exec "$0" "$@"'`, so
/// the shell's startup behaviour applies while arguments are still passed
/// through untouched.
pub async fn spawn(spec: &ProcessSpec) -> Result<Child> {
    let (stdout, stderr) =
        output_stdio(spec.stdout_log.as_deref(), spec.stderr_log.as_deref()).await?;

    let mut cmd = match &spec.shell {
        Some(shell) => {
            let mut c = Command::new(shell);
            c.arg("-c").arg("exec \"$0\" \"$@\"").arg(&spec.program);
            c
        }
        None => Command::new(&spec.program),
    };

    cmd.args(&spec.args)
        .current_dir(&spec.working_dir)
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true);

    debug!("Task arguments: {:?}", spec.args);
    let child = cmd.spawn().map_err(|e| {
        let command = match &spec.shell {
            Some(shell) => format!("{} -c {}", shell, spec.program.display()),
            None => spec.program.display().to_string(),
        };
        RunnerError::spawn_failed(command, e)
    })?;

    info!(
        "Spawned {} in {:?} (pid {:?})",
        spec.program.display(),
        spec.working_dir,
        child.id()
    );
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base_env() -> Environment {
        std::env::vars().filter(|(k, _)| k == "PATH").collect()
    }

    #[tokio::test]
    async fn test_stdout_and_stderr_share_log_by_default() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("stdout.log");
        tokio::fs::write(&log, "previous\n").await.unwrap();

        let spec = ProcessSpec::new("/bin/sh", dir.path())
            .with_args(vec!["-c".into(), "echo out; echo err >&2".into()])
            .with_env(base_env())
            .with_logs(Some(log.clone()), None);
        let status = spawn(&spec).await.unwrap().wait().await.unwrap();
        assert!(status.success());

        let content = tokio::fs::read_to_string(&log).await.unwrap();
        assert!(content.starts_with("previous\n"));
        assert!(content.contains("out\n"));
        assert!(content.contains("err\n"));
    }

    #[tokio::test]
    async fn test_separate_stderr_log_and_environment() {
        let dir = TempDir::new().unwrap();
        let stdout = dir.path().join("stdout.log");
        let stderr = dir.path().join("stderr.log");
        let mut env = base_env();
        env.insert("STAMP_OWNER".into(), "octo".into());

        let spec = ProcessSpec::new("/bin/sh", dir.path())
            .with_args(vec!["-c".into(), "echo $STAMP_OWNER; pwd >&2".into()])
            .with_env(env)
            .with_logs(Some(stdout.clone()), Some(stderr.clone()));
        spawn(&spec).await.unwrap().wait().await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&stdout).await.unwrap(), "octo\n");
        let pwd = tokio::fs::read_to_string(&stderr).await.unwrap();
        assert!(pwd.trim().ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_shell_passes_arguments_verbatim() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("args.sh");
        tokio::fs::write(&script, "#!/bin/sh\nfor a in \"$@\"; do echo \"[$a]\"; done\n")
            .await
            .unwrap();
        let status = tokio::process::Command::new("chmod")
            .arg("+x")
            .arg(&script)
            .status()
            .await
            .unwrap();
        assert!(status.success());
        let log = dir.path().join("out.log");

        let spec = ProcessSpec::new(&script, dir.path())
            .with_args(vec!["a b".into(), "$HOME;".into()])
            .with_env(base_env())
            .with_shell(Some("/bin/sh".into()))
            .with_logs(Some(log.clone()), None);
        spawn(&spec).await.unwrap().wait().await.unwrap();

        assert_eq!(
            tokio::fs::read_to_string(&log).await.unwrap(),
            "[a b]\n[$HOME;]\n"
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let spec = ProcessSpec::new(dir.path().join("nope"), dir.path());
        let err = spawn(&spec).await.unwrap_err();
        assert!(matches!(err, RunnerError::SpawnFailed { .. }));
    }
}
