//! Task Orchestrator (`TaskRunner`, §4.4): Setup → RunAgent → Verify →
//! Cleanup, in that order.

use std::path::PathBuf;

use mcpbench_core::{McpBenchError, McpBenchResult, TaskSpec};
use tracing::info;

use crate::agent::{AgentOutput, AgentRunner};
use crate::script::{run_step, StepOutput};

/// No-op success used for absent `setup`/`cleanup` steps.
fn noop_output() -> StepOutput {
    StepOutput {
        success: true,
        output: String::new(),
        error: String::new(),
    }
}

/// Drives a single task through its lifecycle phases. Phases 1, 3, 4 run
/// user-authored scripts (§4.5); phase 2 runs the templated agent
/// subprocess (§4.6).
pub struct TaskRunner {
    spec: TaskSpec,
    task_base_dir: PathBuf,
}

impl TaskRunner {
    pub fn new(spec: TaskSpec, task_base_dir: PathBuf) -> Self {
        Self { spec, task_base_dir }
    }

    /// No-op success when `steps.setup` is absent.
    pub async fn setup(&self) -> McpBenchResult<StepOutput> {
        match &self.spec.steps.setup {
            None => Ok(noop_output()),
            Some(step) => {
                info!(task = %self.spec.metadata.name, phase = "setup", "running");
                run_step(step, &self.task_base_dir, &self.task_base_dir).await
            }
        }
    }

    /// Resolve the prompt text (inline body or file contents) and invoke
    /// the agent runner.
    pub async fn run_agent(&self, agent_runner: &AgentRunner) -> McpBenchResult<AgentOutput> {
        info!(task = %self.spec.metadata.name, phase = "run_agent", "running");
        let prompt = self.resolve_prompt().await?;
        agent_runner.run_task(&prompt).await
    }

    async fn resolve_prompt(&self) -> McpBenchResult<String> {
        let prompt_step = &self.spec.steps.prompt;
        if let Some(inline) = &prompt_step.inline {
            Ok(inline.clone())
        } else if let Some(file) = &prompt_step.file {
            let path = self.task_base_dir.join(file);
            tokio::fs::read_to_string(&path).await.map_err(|e| {
                McpBenchError::Task(format!("failed to read prompt file '{}': {e}", path.display()))
            })
        } else {
            // Unreachable once `Step::validate` has run at spec-load time.
            Err(McpBenchError::Task("steps.prompt has no body".into()))
        }
    }

    pub async fn verify(&self) -> McpBenchResult<StepOutput> {
        info!(task = %self.spec.metadata.name, phase = "verify", "running");
        run_step(&self.spec.steps.verify, &self.task_base_dir, &self.task_base_dir).await
    }

    /// No-op success when `steps.cleanup` is absent. Errors here are the
    /// caller's responsibility to surface via progress only (§4.9).
    pub async fn cleanup(&self) -> McpBenchResult<StepOutput> {
        match &self.spec.steps.cleanup {
            None => Ok(noop_output()),
            Some(step) => {
                info!(task = %self.spec.metadata.name, phase = "cleanup", "running");
                run_step(step, &self.task_base_dir, &self.task_base_dir).await
            }
        }
    }

    pub fn task_name(&self) -> &str {
        &self.spec.metadata.name
    }

    pub fn difficulty(&self) -> Option<mcpbench_core::Difficulty> {
        self.spec.metadata.difficulty
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mcpbench_core::{Step, TaskMetadata, TaskSteps};
    use std::collections::HashMap;

    fn spec_with(setup: Option<Step>, verify_body: &str) -> TaskSpec {
        TaskSpec {
            kind: "Task".to_string(),
            metadata: TaskMetadata {
                name: "t".to_string(),
                difficulty: None,
            },
            steps: TaskSteps {
                setup,
                prompt: Step {
                    inline: Some("do the task".to_string()),
                    file: None,
                    timeout_seconds: None,
                    continue_on_error: false,
                    env: HashMap::new(),
                },
                verify: Step {
                    inline: Some(verify_body.to_string()),
                    file: None,
                    timeout_seconds: None,
                    continue_on_error: false,
                    env: HashMap::new(),
                },
                cleanup: None,
            },
        }
    }

    #[tokio::test]
    async fn absent_setup_and_cleanup_are_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(spec_with(None, "exit 0"), dir.path().to_path_buf());
        assert!(runner.setup().await.unwrap().success);
        assert!(runner.cleanup().await.unwrap().success);
    }

    #[tokio::test]
    async fn verify_failure_propagates_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(spec_with(None, "exit 1"), dir.path().to_path_buf());
        assert!(runner.verify().await.is_err());
    }

    #[tokio::test]
    async fn resolve_prompt_reads_file_when_set() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("prompt.txt"), "file prompt").await.unwrap();
        let mut spec = spec_with(None, "exit 0");
        spec.steps.prompt = Step {
            inline: None,
            file: Some("prompt.txt".to_string()),
            timeout_seconds: None,
            continue_on_error: false,
            env: HashMap::new(),
        };
        let runner = TaskRunner::new(spec, dir.path().to_path_buf());
        assert_eq!(runner.resolve_prompt().await.unwrap(), "file prompt");
    }
}
