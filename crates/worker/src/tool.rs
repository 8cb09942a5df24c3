//! External tool invocation.
//!
//! The render tool is an opaque subprocess; its only contract is the
//! command line:
//!
//! ```text
//! <tool> --script <path> -- --output <abs-output-dir>
//!        [--characters a,b] [--param KEY=VAL]...
//! ```
//!
//! Exit 0 is success, anything else is failure. All output the tool writes
//! outside the passed output directory is discarded. stdout and stderr are
//! captured to the job's log file.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use posegrid_core::error::CoreError;
use posegrid_core::failure::FailureCause;
use posegrid_core::job::JobManifest;

/// Result of one tool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    /// `exit_code` is `None` when the tool died on a signal.
    Failed { exit_code: Option<i32> },
    TimedOut,
}

/// Build the tool argv for a manifest. Overrides are emitted in key order,
/// so the command line is deterministic for a given manifest.
pub fn tool_args(manifest: &JobManifest, script_path: &Path, output_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--script".to_string(),
        script_path.display().to_string(),
        "--".to_string(),
        "--output".to_string(),
        output_dir.display().to_string(),
    ];

    if let Some(characters) = &manifest.params.characters {
        if !characters.is_empty() {
            args.push("--characters".to_string());
            args.push(characters.join(","));
        }
    }

    for (key, value) in &manifest.params.overrides {
        args.push("--param".to_string());
        args.push(format!("{key}={}", scalar_to_string(value)));
    }

    args
}

/// Render a scalar override for the command line: strings bare, everything
/// else in its JSON form.
fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run the tool with CWD = `cwd`, capturing stdout and stderr into
/// `log_path`. A `None` timeout means unbounded (debug mode).
pub async fn run_tool(
    binary: &str,
    args: &[String],
    cwd: &Path,
    log_path: &Path,
    timeout: Option<Duration>,
) -> Result<ToolOutcome, CoreError> {
    let log = std::fs::File::create(log_path)
        .map_err(|e| CoreError::Internal(format!("Failed to create log file: {e}")))?;
    let log_err = log
        .try_clone()
        .map_err(|e| CoreError::Internal(format!("Failed to clone log handle: {e}")))?;

    let mut child = tokio::process::Command::new(binary)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CoreError::Execution {
            cause: FailureCause::ToolError,
            message: format!("Failed to spawn tool '{binary}': {e}"),
        })?;

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status
                .map_err(|e| CoreError::Internal(format!("Failed to wait for tool: {e}")))?,
            Err(_) => {
                // Render tools run single-process; killing the direct
                // child is what stops GPU spend.
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(ToolOutcome::TimedOut);
            }
        },
        None => child
            .wait()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to wait for tool: {e}")))?,
    };

    if status.success() {
        Ok(ToolOutcome::Success)
    } else {
        Ok(ToolOutcome::Failed {
            exit_code: status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posegrid_core::job::{JobKind, JobParams};
    use std::path::PathBuf;

    fn manifest() -> JobManifest {
        let mut params = JobParams::new("rendering/multi_angle.py", "multi_angle");
        params.characters = Some(vec!["X Bot".into(), "Dancer".into()]);
        params
            .overrides
            .insert("samples".into(), serde_json::json!(64));
        params
            .overrides
            .insert("engine".into(), serde_json::json!("eevee"));
        JobManifest::new(JobKind::Render, params)
    }

    #[test]
    fn argv_follows_the_contract() {
        let script = PathBuf::from("/ws/scripts/rendering/multi_angle.py");
        let output = PathBuf::from("/ws/output/render_1");
        let args = tool_args(&manifest(), &script, &output);

        assert_eq!(
            args,
            vec![
                "--script",
                "/ws/scripts/rendering/multi_angle.py",
                "--",
                "--output",
                "/ws/output/render_1",
                "--characters",
                "X Bot,Dancer",
                // BTreeMap ordering: engine before samples.
                "--param",
                "engine=eevee",
                "--param",
                "samples=64",
            ]
        );
    }

    #[test]
    fn characters_flag_is_omitted_when_absent() {
        let mut m = manifest();
        m.params.characters = None;
        m.params.overrides.clear();
        let args = tool_args(&m, Path::new("s.py"), Path::new("out"));
        assert!(!args.contains(&"--characters".to_string()));
        assert!(!args.contains(&"--param".to_string()));
    }

    #[test]
    fn scalars_render_bare_strings_and_json_rest() {
        assert_eq!(scalar_to_string(&serde_json::json!("eevee")), "eevee");
        assert_eq!(scalar_to_string(&serde_json::json!(64)), "64");
        assert_eq!(scalar_to_string(&serde_json::json!(true)), "true");
        assert_eq!(scalar_to_string(&serde_json::json!(null)), "null");
    }
}
