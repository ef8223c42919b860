//! Agent Runner (§4.6): template expansion plus a templated subprocess
//! spawn, grounded on the teacher's `ClaudeCodeBackend` spawn-and-capture
//! idiom but generalized to an arbitrary `$SHELL -c <expanded>` command.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use mcpbench_core::{AgentSpec, McpBenchError, McpBenchResult};
use tokio::process::Command;
use tracing::{info, warn};

/// Matches the script step default (§4.5); the agent subprocess gets no
/// separate per-spec override, so the same derived timeout bounds it.
const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Decouples the Agent Runner from the concrete `ServerManager` type so
/// the spec can be bound to runtime state via [`AgentRunner::with_mcp_server_info`]
/// (§4.6).
#[async_trait::async_trait]
pub trait McpServerInfo: Send + Sync {
    /// File paths the agent should be pointed at via `argTemplateMcpServer`.
    async fn get_mcp_server_files(&self) -> McpBenchResult<Vec<PathBuf>>;
    /// `serverName → allowed tool names`.
    fn get_allowed_tools(&self) -> HashMap<String, Vec<String>>;
}

#[async_trait::async_trait]
impl McpServerInfo for mcpbench_mcp::ServerManager {
    async fn get_mcp_server_files(&self) -> McpBenchResult<Vec<PathBuf>> {
        self.get_mcp_server_files().await
    }
    fn get_allowed_tools(&self) -> HashMap<String, Vec<String>> {
        self.get_allowed_tools()
    }
}

/// Combined stdout+stderr output of an agent subprocess run.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub output: String,
    pub success: bool,
}

/// Spawns an agent subprocess per [`AgentSpec`], expanding its templates
/// against the MCP server info supplied by the Server Manager.
pub struct AgentRunner {
    spec: AgentSpec,
    server_info: Option<std::sync::Arc<dyn McpServerInfo>>,
}

impl AgentRunner {
    /// Build a runner with no server info bound yet.
    pub fn new(spec: AgentSpec) -> Self {
        Self {
            spec,
            server_info: None,
        }
    }

    /// Bind the runtime MCP server info (decoupled from spec per §4.6).
    pub fn with_mcp_server_info(mut self, info: std::sync::Arc<dyn McpServerInfo>) -> Self {
        self.server_info = Some(info);
        self
    }

    /// Run the templated agent command against `prompt` in a fresh temp
    /// directory, preserved on failure, removed on success.
    pub async fn run_task(&self, prompt: &str) -> McpBenchResult<AgentOutput> {
        self.run_task_with_timeout(prompt, DEFAULT_AGENT_TIMEOUT).await
    }

    async fn run_task_with_timeout(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> McpBenchResult<AgentOutput> {
        let server_info = self
            .server_info
            .as_ref()
            .ok_or_else(|| McpBenchError::Agent("no McpServerInfo bound".into()))?;

        let files = server_info.get_mcp_server_files().await?;
        let mcp_server_file_args = files
            .iter()
            .map(|f| expand(&self.spec.arg_template_mcp_server, &[("File", &f.to_string_lossy())]))
            .collect::<Vec<_>>()
            .join(" ");

        let mut allowed_tool_args = Vec::new();
        for (server_name, tools) in server_info.get_allowed_tools() {
            for tool_name in tools {
                allowed_tool_args.push(expand(
                    &self.spec.arg_template_allowed_tools,
                    &[("ServerName", &server_name), ("ToolName", &tool_name)],
                ));
            }
        }
        let allowed_tool_args = allowed_tool_args.join(&self.spec.allowed_tools_join_separator);

        let expanded_command = expand(
            &self.spec.run_prompt,
            &[
                ("McpServerFileArgs", &mcp_server_file_args),
                ("AllowedToolArgs", &allowed_tool_args),
                ("Prompt", prompt),
            ],
        );

        let work_dir = tempfile::TempDir::new()?;
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/usr/bin/bash".to_string());

        let mut cmd = Command::new(&shell);
        cmd.arg("-c")
            .arg(&expanded_command)
            .current_dir(work_dir.path())
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        if self.spec.isolated_home {
            let home = work_dir.path().join("home");
            tokio::fs::create_dir_all(&home).await?;
            cmd.env("HOME", &home);
        }

        info!(command = %expanded_command, "spawning agent");
        let child = cmd
            .spawn()
            .map_err(|e| McpBenchError::Agent(format!("failed to spawn agent: {e}")))?;
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(McpBenchError::Agent(format!("failed waiting for agent: {e}"))),
            Err(_) => {
                return Err(McpBenchError::Agent(format!(
                    "agent timed out after {timeout:?}"
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{stdout}{stderr}");
        let success = output.status.success();

        let debug_requested = std::env::var("MCPBENCH_DEBUG").is_ok_and(|v| !v.is_empty());
        if success && !debug_requested {
            drop(work_dir);
        } else {
            let kept_path = work_dir.into_path();
            warn!(path = %kept_path.display(), success, "preserved agent working directory");
        }

        Ok(AgentOutput {
            output: combined,
            success,
        })
    }
}

fn expand(template: &str, fields: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in fields {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Optional embedded (non-subprocess) agent path, gated behind the
/// `embedded-agent` feature per the resolved Open Question (§9): never
/// constructed by the default `EvalRunner` flow.
#[cfg(feature = "embedded-agent")]
#[async_trait::async_trait]
pub trait EmbeddedAgent: Send + Sync {
    /// Run `prompt` against an in-process agent loop instead of a
    /// spawned subprocess.
    async fn run_task(&self, prompt: &str) -> McpBenchResult<AgentOutput>;
}
