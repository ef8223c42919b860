//! Eval Runner (§4.7): loads an eval spec and its referents, then drives
//! each resolved task through the full Server Manager / Task Orchestrator
//! / Assertion Engine pipeline in order.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use mcpbench_core::{AgentSpec, Difficulty, EvalResult};
use mcpbench_exec::{AgentRunner, TaskRunner};
use mcpbench_mcp::ServerManager;
use regex::Regex;
use tracing::{error, info, warn};

use crate::loader::{load_agent_spec, load_eval_spec, load_mcp_config, resolve_tasks};

/// Emitted once per task, before and after it runs, so a caller (the CLI,
/// a test) can render progress without the runner depending on any
/// particular UI.
#[derive(Debug, Clone)]
pub enum Progress {
    TaskStart { name: String },
    TaskComplete { name: String, passed: bool },
}

/// A progress callback. Defaults to a no-op.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

fn noop_progress() -> ProgressFn {
    Arc::new(|_| {})
}

/// Drives one eval spec end to end. Construct via [`EvalRunner::load`].
pub struct EvalRunner {
    eval_dir: std::path::PathBuf,
    agent_spec: AgentSpec,
    mcp_config: mcpbench_core::MCPConfig,
    tasks: Vec<crate::loader::ResolvedTask>,
    progress: ProgressFn,
}

impl EvalRunner {
    /// Load the eval spec at `eval_path` plus its referenced agent spec,
    /// MCP config, and resolved task set, filtering tasks by `name_filter`
    /// (an unset filter behaves as `.`, matching everything).
    pub async fn load(eval_path: &Path, name_filter: Option<&str>) -> Result<Self> {
        let eval_dir = eval_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Path::new(".").to_path_buf());
        let eval = load_eval_spec(eval_path).await?;

        let agent_path = eval_dir.join(&eval.config.agent_file);
        let mcp_path = eval_dir.join(&eval.config.mcp_config_file);
        let agent_spec = load_agent_spec(&agent_path).await?;
        let mcp_config = load_mcp_config(&mcp_path).await?;

        let pattern = name_filter.unwrap_or(".");
        let regex = Regex::new(pattern)
            .with_context(|| format!("invalid task name filter '{pattern}'"))?;

        let mut tasks = resolve_tasks(&eval, &eval_dir).await?;
        tasks.retain(|t| regex.is_match(&t.spec.metadata.name));

        Ok(Self {
            eval_dir,
            agent_spec,
            mcp_config,
            tasks,
            progress: noop_progress(),
        })
    }

    /// Replace the default no-op progress callback.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = progress;
        self
    }

    /// Names of the tasks this runner will execute, in execution order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.spec.metadata.name.as_str()).collect()
    }

    /// Run every resolved task in order, returning one [`EvalResult`] per
    /// task in that same order.
    pub async fn run(&self) -> Result<Vec<EvalResult>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let name = task.spec.metadata.name.clone();
            (self.progress)(Progress::TaskStart { name: name.clone() });

            let result = self.run_one(task).await;
            let passed = result.task_passed;
            results.push(result);

            (self.progress)(Progress::TaskComplete { name, passed });
        }
        Ok(results)
    }

    async fn run_one(&self, task: &crate::loader::ResolvedTask) -> EvalResult {
        let task_base_dir = task
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.eval_dir.clone());
        let task_path = task.path.display().to_string();
        let task_name = task.spec.metadata.name.clone();
        let difficulty = task.spec.metadata.difficulty;

        let manager = match ServerManager::new(&self.mcp_config).await {
            Ok(m) => Arc::new(m),
            Err(e) => return failed_result(task_name, task_path, difficulty, format!("failed to build server manager: {e}")),
        };

        if let Err(e) = manager.start().await {
            manager.close().await;
            return failed_result(task_name, task_path, difficulty, format!("failed to start MCP servers: {e}"));
        }

        self.run_task_phases(task, &task_base_dir, manager, &task_name, &task_path, difficulty)
            .await
    }

    async fn run_task_phases(
        &self,
        task: &crate::loader::ResolvedTask,
        task_base_dir: &Path,
        manager: Arc<ServerManager>,
        task_name: &str,
        task_path: &str,
        difficulty: Option<Difficulty>,
    ) -> EvalResult {
        let runner = TaskRunner::new(task.spec.clone(), task_base_dir.to_path_buf());

        if let Err(e) = runner.setup().await {
            manager.close().await;
            return failed_result(
                task_name.to_string(),
                task_path.to_string(),
                difficulty,
                format!("setup failed: {e}"),
            );
        }

        let agent_runner = AgentRunner::new(self.agent_spec.clone()).with_mcp_server_info(manager.clone());
        let agent_result = runner.run_agent(&agent_runner).await;

        // A proxy's lifecycle is scoped to one task: created before
        // run-agent, torn down before verify (§3 Lifecycles). The call
        // history lives in the proxies' own state and survives `close`,
        // so it's safe to snapshot either side of the teardown.
        let history = manager.get_all_call_history().await;
        manager.close().await;

        let agent_output = match agent_result {
            Ok(output) => output,
            Err(e) => {
                error!(task = task_name, "agent execution failed: {e}");
                return EvalResult {
                    task_name: task_name.to_string(),
                    task_path: task_path.to_string(),
                    task_passed: false,
                    task_output: String::new(),
                    task_error: e.to_string(),
                    agent_execution_error: true,
                    difficulty,
                    assertion_results: mcpbench_core::AssertionResults::default(),
                    all_assertions_passed: false,
                    call_history: history,
                };
            }
        };

        let verify_result = runner.verify().await;
        if let Err(e) = runner.cleanup().await {
            warn!(task = task_name, "cleanup failed: {e}");
        }

        let (task_passed, task_error) = match &verify_result {
            Ok(output) => (output.success, output.error.clone()),
            Err(e) => (false, e.to_string()),
        };

        let assertion_results = mcpbench_assert::evaluate(&history, &task.assertions);
        let all_assertions_passed = assertion_results.all_passed();

        info!(task = task_name, passed = task_passed, "task complete");

        EvalResult {
            task_name: task_name.to_string(),
            task_path: task_path.to_string(),
            task_passed: task_passed && all_assertions_passed,
            task_output: agent_output.output,
            task_error,
            agent_execution_error: false,
            difficulty,
            assertion_results,
            all_assertions_passed,
            call_history: history,
        }
    }
}

fn failed_result(
    task_name: String,
    task_path: String,
    difficulty: Option<Difficulty>,
    error: String,
) -> EvalResult {
    EvalResult {
        task_name,
        task_path,
        task_passed: false,
        task_output: String::new(),
        task_error: error,
        agent_execution_error: false,
        difficulty,
        assertion_results: mcpbench_core::AssertionResults::default(),
        all_assertions_passed: false,
        call_history: mcpbench_core::CallHistory::default(),
    }
}
