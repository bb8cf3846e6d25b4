//! Conclusion assembly
//!
//! Tasks may leave files in their working directory that refine the result
//! reported for them: a summary, a longer text, an artifact list and a
//! summary table. Missing or unreadable files never fail a task; the worker
//! falls back to its defaults and logs what it could not use.

use std::path::Path;

use stampede_core::{Artifact, Conclusion, Outcome};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

/// Upper bound, in bytes, read from the end of a summary or text file
pub const MAX_TAIL_BYTES: u64 = 63_000;

/// Inputs for one assembled conclusion. File names are relative to the
/// working directory.
#[derive(Debug, Clone)]
pub struct ConclusionRequest<'a> {
    pub outcome: Outcome,
    pub title: &'a str,
    pub default_summary: &'a str,
    pub summary_file: Option<&'a str>,
    pub default_text: &'a str,
    pub text_file: Option<&'a str>,
    pub artifact_list_file: Option<&'a str>,
    pub summary_table_file: Option<&'a str>,
}

/// Build the conclusion for a finished task
pub async fn assemble(working_dir: &Path, request: &ConclusionRequest<'_>) -> Conclusion {
    let summary = match read_optional_tail(working_dir, request.summary_file).await {
        Some(summary) => summary,
        None => request.default_summary.to_string(),
    };
    let text = match read_optional_tail(working_dir, request.text_file).await {
        Some(text) => text,
        None => request.default_text.to_string(),
    };

    let artifacts = match request.artifact_list_file {
        Some(name) => read_artifacts(working_dir, name).await,
        None => Vec::new(),
    };

    let summary_table = match request.summary_table_file {
        Some(name) => read_json(working_dir, name).await,
        None => None,
    };

    Conclusion {
        conclusion: request.outcome,
        title: request.title.to_string(),
        summary,
        text,
        artifacts,
        summary_table,
    }
}

async fn read_optional_tail(working_dir: &Path, name: Option<&str>) -> Option<String> {
    let path = working_dir.join(name?);
    match read_tail(&path, MAX_TAIL_BYTES).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Unable to read {:?}: {}", path, e);
            None
        }
    }
}

/// Read at most the last `limit` bytes of a file. When the file is cut
/// mid-line, the partial first line is dropped. Lines are joined with `\n`.
pub async fn read_tail(path: &Path, limit: u64) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let truncated = len > limit;
    if truncated {
        // One extra byte tells whether the cut falls on a line start
        file.seek(std::io::SeekFrom::Start(len - limit - 1)).await?;
    }

    let mut buf = Vec::with_capacity(len.min(limit.saturating_add(1)) as usize);
    file.read_to_end(&mut buf).await?;
    let (partial, body) = match buf.split_first() {
        Some((&preceding, rest)) if truncated => (preceding != b'\n', rest),
        _ => (false, buf.as_slice()),
    };
    let content = String::from_utf8_lossy(body);

    let mut lines = content.lines();
    if partial {
        lines.next();
    }
    Ok(lines.collect::<Vec<_>>().join("\n"))
}

async fn read_artifacts(working_dir: &Path, name: &str) -> Vec<Artifact> {
    let path = working_dir.join(name);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Unable to read artifact list {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_slice());

    let mut artifacts = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping artifact list line {}: {}", line + 1, e);
                continue;
            }
        };

        let field = |i: usize| record.get(i).filter(|v| !v.is_empty());
        let Some(title) = field(0) else {
            continue;
        };

        let mut artifact = Artifact {
            title: title.to_string(),
            url: field(1).unwrap_or_default().to_string(),
            artifact_type: field(2).unwrap_or_default().to_string(),
            metadata: None,
            contents: None,
        };
        if let Some(metadata_file) = field(3) {
            artifact.metadata = read_json(working_dir, metadata_file).await;
        }
        if let Some(contents_file) = field(4) {
            artifact.contents = read_json(working_dir, contents_file).await;
        }
        artifacts.push(artifact);
    }

    debug!("Loaded {} artifacts from {:?}", artifacts.len(), path);
    artifacts
}

async fn read_json(working_dir: &Path, name: &str) -> Option<serde_json::Value> {
    let path = working_dir.join(name);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Unable to read {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {:?}, not valid JSON: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stampede_core::conclusion::DEFAULT_TITLE;
    use tempfile::TempDir;

    fn failure_request() -> ConclusionRequest<'static> {
        ConclusionRequest {
            outcome: Outcome::Failure,
            title: DEFAULT_TITLE,
            default_summary: "Task Failed",
            summary_file: Some("error-summary.md"),
            default_text: "",
            text_file: Some("error-text.md"),
            artifact_list_file: Some("artifacts.csv"),
            summary_table_file: Some("table.json"),
        }
    }

    #[tokio::test]
    async fn test_defaults_when_no_files() {
        let dir = TempDir::new().unwrap();
        let conclusion = assemble(dir.path(), &failure_request()).await;

        assert_eq!(conclusion.conclusion, Outcome::Failure);
        assert_eq!(conclusion.title, DEFAULT_TITLE);
        assert_eq!(conclusion.summary, "Task Failed");
        assert_eq!(conclusion.text, "");
        assert!(conclusion.artifacts.is_empty());
        assert!(conclusion.summary_table.is_none());
    }

    #[tokio::test]
    async fn test_files_replace_defaults() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("error-summary.md"), "build failed: linker error\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("error-text.md"), "line 1\r\nline 2\n")
            .await
            .unwrap();

        let conclusion = assemble(dir.path(), &failure_request()).await;
        assert_eq!(conclusion.summary, "build failed: linker error");
        assert_eq!(conclusion.text, "line 1\nline 2");
    }

    #[tokio::test]
    async fn test_artifacts_and_attachments() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join("artifacts.csv"),
            "Coverage, https://ci.example.com/cov, link\n\
             Tests,https://ci.example.com/tests,cloudwatch,meta.json,contents.json\n\
             Broken,https://ci.example.com/b,link,bad.json,missing.json\n",
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("meta.json"), r#"{"group":"ci"}"#)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("contents.json"), "[1,2]").await.unwrap();
        tokio::fs::write(dir.path().join("bad.json"), "{not json").await.unwrap();

        let conclusion = assemble(dir.path(), &failure_request()).await;
        let artifacts = &conclusion.artifacts;
        assert_eq!(artifacts.len(), 3);

        assert_eq!(artifacts[0].title, "Coverage");
        assert_eq!(artifacts[0].url, "https://ci.example.com/cov");
        assert_eq!(artifacts[0].artifact_type, "link");
        assert!(artifacts[0].metadata.is_none());

        assert_eq!(artifacts[1].metadata, Some(json!({"group": "ci"})));
        assert_eq!(artifacts[1].contents, Some(json!([1, 2])));

        assert!(artifacts[2].metadata.is_none());
        assert!(artifacts[2].contents.is_none());
    }

    #[tokio::test]
    async fn test_invalid_summary_table_is_ignored() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("table.json"), "[[").await.unwrap();
        let conclusion = assemble(dir.path(), &failure_request()).await;
        assert!(conclusion.summary_table.is_none());

        tokio::fs::write(dir.path().join("table.json"), r#"[{"label":"tests","value":12}]"#)
            .await
            .unwrap();
        let conclusion = assemble(dir.path(), &failure_request()).await;
        assert_eq!(
            conclusion.summary_table,
            Some(json!([{"label": "tests", "value": 12}]))
        );
    }

    #[tokio::test]
    async fn test_assembly_is_idempotent() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("error-summary.md"), "boom").await.unwrap();
        tokio::fs::write(
            dir.path().join("artifacts.csv"),
            "Log,https://ci.example.com/log,link\n",
        )
        .await
        .unwrap();

        let first = assemble(dir.path(), &failure_request()).await;
        let second = assemble(dir.path(), &failure_request()).await;
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_tail_drops_partial_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.log");
        let content: String = (0..100).map(|i| format!("line-{:03}\n", i)).collect();
        tokio::fs::write(&path, &content).await.unwrap();

        // Each line is 9 bytes; the last 40 bytes cut into line 095
        let tail = read_tail(&path, 40).await.unwrap();
        assert_eq!(tail, "line-096\nline-097\nline-098\nline-099");

        let whole = read_tail(&path, 10_000).await.unwrap();
        assert_eq!(whole.lines().count(), 100);
    }

    #[tokio::test]
    async fn test_tail_keeps_line_cut_at_its_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.log");
        let content: String = (0..100).map(|i| format!("line-{:03}\n", i)).collect();
        tokio::fs::write(&path, &content).await.unwrap();

        // 36 bytes start exactly at line 096
        let tail = read_tail(&path, 36).await.unwrap();
        assert_eq!(tail, "line-096\nline-097\nline-098\nline-099");

        let last = read_tail(&path, 9).await.unwrap();
        assert_eq!(last, "line-099");
    }
}
