//! Task environment building
//!
//! Projects task fields into the process environment handed to the task
//! command. Every exported name carries the plan's prefix (`STAMP_` by
//! default); build scripts depend on these names.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::plan::ExecutionPlan;
use crate::task::Task;

pub type Environment = BTreeMap<String, String>;

/// Build the task environment on top of the current process environment
pub fn build(task: &Task, plan: &ExecutionPlan, working_dir: &Path) -> Environment {
    build_from(std::env::vars(), task, plan, working_dir)
}

/// Build the task environment on top of `base`.
///
/// Variables in `base` that already carry the prefix are dropped so values
/// exported for an earlier task never leak into this one.
pub fn build_from(
    base: impl IntoIterator<Item = (String, String)>,
    task: &Task,
    plan: &ExecutionPlan,
    working_dir: &Path,
) -> Environment {
    let prefix = plan.environment_variable_prefix.as_str();
    let mut env: Environment = base
        .into_iter()
        .filter(|(key, _)| !key.starts_with(prefix))
        .collect();

    let mut export = |name: &str, value: String| {
        env.insert(format!("{}{}", prefix, name), value);
    };

    if let Some(config) = &task.config {
        for (key, value) in config {
            debug!("Exporting config key {}", key);
            export(&key.to_uppercase(), config_value(value));
        }
    }

    export("OWNER", task.owner.clone());
    export("REPO", task.repository.clone());
    export("BUILDNUMBER", task.build_number.to_string());
    export("TASK", task.task.id.clone());
    export("BUILDID", task.build_id.clone().unwrap_or_default());
    export("TASKID", task.task_id.clone());
    export("WORKINGDIR", working_dir.to_string_lossy().to_string());
    export(
        "ACCESSTOKEN",
        task.scm.access_token.clone().unwrap_or_default(),
    );

    if let Some(pr) = &task.scm.pull_request {
        export("BUILDKEY", format!("pullrequest-{}", pr.number));
        export("PULLREQUESTNUMBER", pr.number.to_string());
        export("PULLREQUESTBRANCH", pr.head.git_ref.clone());
        export("PULLREQUESTBASEBRANCH", pr.base.git_ref.clone());
        export("GITSHABASE", pr.base.sha.clone());
        export("GITSHAHEAD", pr.head.sha.clone());
        export("PRTITLE", pr.title.clone());
        export(
            "PRBODYLENGTH",
            pr.body_length.map(|len| len.to_string()).unwrap_or_default(),
        );
        export("PRMILESTONE", pr.milestone.clone().unwrap_or_default());
        export("PRLABELS", pr.labels.join(","));
        if let Some(login) = &pr.login {
            export("PULLREQUESTLOGIN", login.clone());
        }
    }

    if let Some(branch) = &task.scm.branch {
        export("BUILDKEY", branch.name.clone());
        export("BRANCH", branch.name.clone());
        export("GITSHA", branch.sha.clone());
    }

    if let Some(release) = &task.scm.release {
        export("BUILDKEY", release.name.clone());
        export("RELEASE", release.name.clone());
        export("TAG", release.tag.clone());
        export("GITSHA", release.sha.clone());
    }

    env
}

/// Render the environment as a shell-sourceable `export KEY="value"` dump
pub fn render_exports(env: &Environment) -> String {
    let mut out = String::new();
    for (key, value) in env {
        out.push_str("export ");
        out.push_str(key);
        out.push_str("=\"");
        for ch in value.chars() {
            if matches!(ch, '"' | '\\' | '$' | '`') {
                out.push('\\');
            }
            out.push(ch);
        }
        out.push_str("\"\n");
    }
    out
}

/// Config values are either scalars or `{ "value": ... }` records
fn config_value(value: &serde_json::Value) -> String {
    let value = match value {
        serde_json::Value::Object(map) => map.get("value").unwrap_or(value),
        other => other,
    };
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
