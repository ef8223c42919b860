//! Script step execution (§4.5): inline-with-shebang, inline-piped-to
//! `$SHELL`, and file steps, each with a per-step timeout and
//! `continueOnError` downgrade.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mcpbench_core::{McpBenchError, McpBenchResult, Step};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Result of running one script step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub success: bool,
    pub output: String,
    pub error: String,
}

/// Run `step` with `cwd` as its working directory (ignored for `file`
/// steps, which run from the script's own directory). `task_base_dir`
/// resolves a `file` step's relative path.
pub async fn run_step(
    step: &Step,
    cwd: &Path,
    task_base_dir: &Path,
) -> McpBenchResult<StepOutput> {
    let timeout = step
        .timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);

    let outcome = if let Some(body) = &step.inline {
        run_inline(body, cwd, &step.env, timeout).await
    } else if let Some(rel_path) = &step.file {
        run_file(task_base_dir, rel_path, &step.env, timeout).await
    } else {
        // Unreachable once `Step::validate` has run at spec-load time.
        Err(McpBenchError::Task(
            "step has neither inline nor file body".into(),
        ))
    };

    match outcome {
        Ok(output) => Ok(output),
        Err(e) if step.continue_on_error => Ok(StepOutput {
            success: false,
            output: String::new(),
            error: e.to_string(),
        }),
        Err(e) => Err(e),
    }
}

async fn run_inline(
    body: &str,
    cwd: &Path,
    env: &std::collections::HashMap<String, String>,
    timeout: Duration,
) -> McpBenchResult<StepOutput> {
    if body.trim_start().starts_with("#!") {
        run_inline_with_shebang(body, cwd, env, timeout).await
    } else {
        run_piped_to_shell(body, cwd, env, timeout).await
    }
}

async fn run_inline_with_shebang(
    body: &str,
    cwd: &Path,
    env: &std::collections::HashMap<String, String>,
    timeout: Duration,
) -> McpBenchResult<StepOutput> {
    let script_path = cwd.join(format!(".mcpbench-step-{}.sh", uuid_like_suffix()));
    write_executable(&script_path, body).await?;

    let result = run_command(Command::new(&script_path), cwd, env, timeout).await;
    let _ = tokio::fs::remove_file(&script_path).await;
    result
}

async fn run_piped_to_shell(
    body: &str,
    cwd: &Path,
    env: &std::collections::HashMap<String, String>,
    timeout: Duration,
) -> McpBenchResult<StepOutput> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/usr/bin/bash".to_string());
    let mut cmd = Command::new(&shell);
    cmd.current_dir(cwd).envs(env.clone());
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| McpBenchError::Task(format!("failed to spawn {shell}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(body.as_bytes())
            .await
            .map_err(|e| McpBenchError::Task(format!("failed writing script to {shell} stdin: {e}")))?;
    }

    wait_with_timeout(child, timeout).await
}

async fn run_file(
    task_base_dir: &Path,
    rel_path: &str,
    env: &std::collections::HashMap<String, String>,
    timeout: Duration,
) -> McpBenchResult<StepOutput> {
    let script_path = task_base_dir.join(rel_path);
    ensure_executable(&script_path).await?;
    let script_dir = script_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    run_command(Command::new(&script_path), &script_dir, env, timeout).await
}

async fn run_command(
    mut cmd: Command,
    cwd: &Path,
    env: &std::collections::HashMap<String, String>,
    timeout: Duration,
) -> McpBenchResult<StepOutput> {
    cmd.current_dir(cwd)
        .envs(env.clone())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    let child = cmd
        .spawn()
        .map_err(|e| McpBenchError::Task(format!("failed to spawn step: {e}")))?;
    wait_with_timeout(child, timeout).await
}

async fn wait_with_timeout(
    child: tokio::process::Child,
    timeout: Duration,
) -> McpBenchResult<StepOutput> {
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = format!("{stdout}{stderr}");
            if output.status.success() {
                Ok(StepOutput {
                    success: true,
                    output: combined,
                    error: String::new(),
                })
            } else {
                Err(McpBenchError::Task(format!(
                    "step exited with {}: {combined}",
                    output.status
                )))
            }
        }
        Ok(Err(e)) => Err(McpBenchError::Task(format!("failed waiting for step: {e}"))),
        Err(_) => Err(McpBenchError::Task(format!(
            "step timed out after {:?}",
            timeout
        ))),
    }
}

async fn write_executable(path: &Path, body: &str) -> McpBenchResult<()> {
    tokio::fs::write(path, body).await?;
    set_executable(path).await
}

async fn ensure_executable(path: &Path) -> McpBenchResult<()> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(McpBenchError::Task(format!(
            "script file not found: {}",
            path.display()
        )));
    }
    set_executable(path).await
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> McpBenchResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = tokio::fs::metadata(path).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(perms.mode() | 0o111);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> McpBenchResult<()> {
    Ok(())
}

fn uuid_like_suffix() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn inline_without_shebang_runs_via_shell() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step {
            inline: Some("echo hello".to_string()),
            file: None,
            timeout_seconds: None,
            continue_on_error: false,
            env: HashMap::new(),
        };
        let out = run_step(&step, dir.path(), dir.path()).await.unwrap();
        assert!(out.success);
        assert!(out.output.contains("hello"));
    }

    #[tokio::test]
    async fn inline_with_shebang_is_executed_directly() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step {
            inline: Some("#!/usr/bin/env bash\necho direct".to_string()),
            file: None,
            timeout_seconds: None,
            continue_on_error: false,
            env: HashMap::new(),
        };
        let out = run_step(&step, dir.path(), dir.path()).await.unwrap();
        assert!(out.success);
        assert!(out.output.contains("direct"));
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_zero_exit_fails_unless_continue_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step {
            inline: Some("exit 1".to_string()),
            file: None,
            timeout_seconds: None,
            continue_on_error: false,
            env: HashMap::new(),
        };
        assert!(run_step(&step, dir.path(), dir.path()).await.is_err());

        let lenient = Step {
            continue_on_error: true,
            ..step
        };
        let out = run_step(&lenient, dir.path(), dir.path()).await.unwrap();
        assert!(!out.success);
    }

    #[tokio::test]
    async fn step_env_is_visible_to_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("MCPBENCH_STEP_VAR".to_string(), "present".to_string());
        let step = Step {
            inline: Some("echo $MCPBENCH_STEP_VAR".to_string()),
            file: None,
            timeout_seconds: None,
            continue_on_error: false,
            env,
        };
        let out = run_step(&step, dir.path(), dir.path()).await.unwrap();
        assert!(out.output.contains("present"));
    }
}
