//! Shared data model for the MCP tool-calling eval harness.
//!
//! Re-exports the wire types used across every other crate in the
//! workspace: [`ServerConfig`]/[`MCPConfig`] (connection config),
//! [`CallHistory`] (recorded interactions), and the spec/result types
//! ([`AgentSpec`], [`TaskSpec`], [`EvalSpec`], [`TaskAssertions`],
//! [`EvalResult`]).

mod config;
mod error;
mod history;
mod spec;

pub use config::{expand_env_refs, MCPConfig, ServerConfig, ServerTransport};
pub use error::{McpBenchError, McpBenchResult};
pub use history::{CallHistory, CallRecord, PromptGet, ResourceRead, ToolCall};
pub use spec::{
    AgentSpec, AssertionResults, AssertionVerdict, CallKind, CallOrderEntry, Difficulty,
    EvalConfig, EvalMetadata, EvalResult, EvalSpec, PromptTarget, ResourceTarget, Step,
    TaskAssertions, TaskMetadata, TaskSet, TaskSpec, TaskSteps, ToolTarget,
};
