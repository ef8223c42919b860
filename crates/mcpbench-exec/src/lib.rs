//! Task orchestrator, script step execution, and agent runner.
//!
//! [`TaskRunner`] sequences a task's Setup → RunAgent → Verify → Cleanup
//! phases. [`run_step`] executes the user-authored scripts behind the
//! first three phases. [`AgentRunner`] expands an [`mcpbench_core::AgentSpec`]'s
//! templates and spawns the agent subprocess for RunAgent.

mod agent;
mod script;
mod task;

pub use agent::{AgentOutput, AgentRunner, McpServerInfo};
#[cfg(feature = "embedded-agent")]
pub use agent::EmbeddedAgent;
pub use script::{run_step, StepOutput};
pub use task::TaskRunner;
