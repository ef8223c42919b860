//! Loads `kind`-discriminated spec files and expands `TaskSet` selectors
//! into a concrete, ordered list of task files (§4.7).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mcpbench_core::{AgentSpec, EvalSpec, MCPConfig, TaskAssertions, TaskSet, TaskSpec};

/// One resolved task: its file path, parsed spec, and the assertions
/// that apply to it (inherited from the owning TaskSet).
pub struct ResolvedTask {
    pub path: PathBuf,
    pub spec: TaskSpec,
    pub assertions: TaskAssertions,
}

pub async fn load_eval_spec(path: &Path) -> Result<EvalSpec> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read eval spec '{}'", path.display()))?;
    EvalSpec::from_str(&text).with_context(|| format!("invalid eval spec '{}'", path.display()))
}

pub async fn load_agent_spec(path: &Path) -> Result<AgentSpec> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read agent spec '{}'", path.display()))?;
    AgentSpec::from_str(&text).with_context(|| format!("invalid agent spec '{}'", path.display()))
}

pub async fn load_mcp_config(path: &Path) -> Result<MCPConfig> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read MCP config '{}'", path.display()))?;
    MCPConfig::from_str(&text).with_context(|| format!("invalid MCP config '{}'", path.display()))
}

/// Resolve every TaskSet in `eval.config.task_sets` against `base_dir`
/// into an ordered list of tasks. Within a glob TaskSet, matches are
/// sorted lexicographically by path; TaskSets themselves keep their
/// declaration order.
pub async fn resolve_tasks(eval: &EvalSpec, base_dir: &Path) -> Result<Vec<ResolvedTask>> {
    let mut resolved = Vec::new();
    for task_set in &eval.config.task_sets {
        let paths = expand_task_set(task_set, base_dir)?;
        for path in paths {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read task '{}'", path.display()))?;
            let spec = TaskSpec::from_str(&text)
                .with_context(|| format!("invalid task '{}'", path.display()))?;
            resolved.push(ResolvedTask {
                path,
                spec,
                assertions: task_set.assertions.clone().unwrap_or_default(),
            });
        }
    }
    Ok(resolved)
}

fn expand_task_set(task_set: &TaskSet, base_dir: &Path) -> Result<Vec<PathBuf>> {
    if let Some(path) = &task_set.path {
        return Ok(vec![base_dir.join(path)]);
    }
    let pattern = task_set.glob.as_ref().ok_or_else(|| {
        // Unreachable once `TaskSet::validate` has run at spec-load time.
        anyhow::anyhow!("task set has neither path nor glob")
    })?;
    let full_pattern = base_dir.join(pattern);
    let mut matches: Vec<PathBuf> = glob::glob(&full_pattern.to_string_lossy())
        .with_context(|| format!("invalid glob pattern '{pattern}'"))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to read glob matches for '{pattern}'"))?;
    matches.sort();
    Ok(matches)
}
