//! End-to-end tests driving [`EvalRunner`] against a mock stdio MCP
//! server and a mock agent shell script (spec.md §8 scenarios S1-S4).
//!
//! S5/S6 (assertion bound and callOrder semantics) are covered directly
//! against the assertion engine in `mcpbench-assert`'s own test suite.

use std::io::Write;
use std::path::Path;

#[path = "../src/loader.rs"]
mod loader;
#[path = "../src/runner.rs"]
mod runner;

use runner::EvalRunner;

fn write_executable(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).expect("create script");
    file.write_all(contents.as_bytes()).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata().expect("stat script").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod script");
    }
    path
}

const MOCK_SERVER_SCRIPT: &str = r#"#!/usr/bin/env bash
while IFS= read -r line; do
  id=$(echo "$line" | grep -o '"id":[0-9]*' | head -1 | cut -d: -f2)
  method=$(echo "$line" | grep -o '"method":"[^"]*"' | head -1 | cut -d: -f2 | tr -d '"')
  case "$method" in
    initialize)
      echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{\"tools\":{}},\"serverInfo\":{\"name\":\"mock\",\"version\":\"0\"}}}"
      ;;
    tools/list)
      echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"tools\":[{\"name\":\"tool_a\",\"description\":\"\",\"inputSchema\":{}}]}}"
      ;;
    tools/call)
      echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"ok\"}],\"isError\":false}}"
      ;;
  esac
done
"#;

/// Reads `{File}` out of the agent's `--mcp` argument, calls `tool_a` on
/// the mirrored proxy, and echoes `done`. Exits non-zero (without
/// calling the tool) when invoked with `--fail`.
const MOCK_AGENT_SCRIPT: &str = r#"#!/usr/bin/env bash
set -e
mcp_file=""
fail=0
while [[ $# -gt 0 ]]; do
  case "$1" in
    --mcp) mcp_file="$2"; shift 2 ;;
    --fail) fail=1; shift ;;
    *) break ;;
  esac
done

if [[ "$fail" == "1" ]]; then
  echo "agent crashed" >&2
  exit 1
fi

url=$(grep -o '"url":"[^"]*"' "$mcp_file" | head -1 | sed -E 's/"url":"(.*)"/\1/')
curl -s -X POST "$url" -H 'Content-Type: application/json' \
  -d '{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"tool_a","arguments":{}}}' > /dev/null
echo "done"
"#;

fn write_mcp_config(dir: &Path, server_script: &Path) -> std::path::PathBuf {
    let json = format!(
        r#"{{"mcpServers":{{"mock":{{"type":"stdio","command":"bash","args":["{}"]}}}}}}"#,
        server_script.display()
    );
    let path = dir.join("mcp.json");
    std::fs::write(&path, json).expect("write mcp config");
    path
}

fn write_agent_spec(dir: &Path, agent_script: &Path, extra_args: &str) -> std::path::PathBuf {
    let yaml = format!(
        "kind: Agent\nargTemplateMcpServer: \"--mcp {{File}}\"\nargTemplateAllowedTools: \"--allow {{ServerName}}:{{ToolName}}\"\nrunPrompt: \"{} {extra_args} {{McpServerFileArgs}} {{Prompt}}\"\n",
        agent_script.display()
    );
    let path = dir.join("agent.yaml");
    std::fs::write(&path, yaml).expect("write agent spec");
    path
}

fn write_task(dir: &Path, name: &str, verify_inline: &str) -> std::path::PathBuf {
    let yaml = format!(
        "kind: Task\nmetadata:\n  name: {name}\nsteps:\n  prompt:\n    inline: \"run the task\"\n  verify:\n    inline: \"{verify_inline}\"\n"
    );
    let path = dir.join(format!("{name}.yaml"));
    std::fs::write(&path, yaml).expect("write task");
    path
}

fn write_eval(dir: &Path, glob: &str) -> std::path::PathBuf {
    let yaml = format!(
        "kind: Eval\nmetadata:\n  name: e\nconfig:\n  agentFile: agent.yaml\n  mcpConfigFile: mcp.json\n  taskSets:\n    - glob: \"{glob}\"\n"
    );
    let path = dir.join("eval.yaml");
    std::fs::write(&path, yaml).expect("write eval spec");
    path
}

#[tokio::test]
async fn s1_happy_path_records_tool_call_and_passes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = write_executable(dir.path(), "server.sh", MOCK_SERVER_SCRIPT);
    let agent = write_executable(dir.path(), "agent.sh", MOCK_AGENT_SCRIPT);
    write_mcp_config(dir.path(), &server);
    write_agent_spec(dir.path(), &agent, "");
    write_task(dir.path(), "t1", "exit 0");
    let eval_path = write_eval(dir.path(), "t1.yaml");

    let runner = EvalRunner::load(&eval_path, None).await.expect("load eval");
    let results = runner.run().await.expect("run eval");

    assert_eq!(results.len(), 1);
    assert!(results[0].task_passed);
    assert_eq!(results[0].call_history.tool_calls.len(), 1);
    assert_eq!(results[0].call_history.tool_calls[0].tool_name, "tool_a");
}

#[tokio::test]
async fn s2_verify_failure_keeps_recorded_tool_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = write_executable(dir.path(), "server.sh", MOCK_SERVER_SCRIPT);
    let agent = write_executable(dir.path(), "agent.sh", MOCK_AGENT_SCRIPT);
    write_mcp_config(dir.path(), &server);
    write_agent_spec(dir.path(), &agent, "");
    write_task(dir.path(), "t1", "exit 1");
    let eval_path = write_eval(dir.path(), "t1.yaml");

    let runner = EvalRunner::load(&eval_path, None).await.expect("load eval");
    let results = runner.run().await.expect("run eval");

    assert_eq!(results.len(), 1);
    assert!(!results[0].task_passed);
    assert_eq!(results[0].call_history.tool_calls.len(), 1);
}

#[tokio::test]
async fn s3_agent_failure_sets_agent_execution_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = write_executable(dir.path(), "server.sh", MOCK_SERVER_SCRIPT);
    let agent = write_executable(dir.path(), "agent.sh", MOCK_AGENT_SCRIPT);
    write_mcp_config(dir.path(), &server);
    write_agent_spec(dir.path(), &agent, "--fail");
    write_task(dir.path(), "t1", "exit 0");
    let eval_path = write_eval(dir.path(), "t1.yaml");

    let runner = EvalRunner::load(&eval_path, None).await.expect("load eval");
    let results = runner.run().await.expect("run eval");

    assert_eq!(results.len(), 1);
    assert!(!results[0].task_passed);
    assert!(results[0].agent_execution_error);
}

#[tokio::test]
async fn s4_multi_task_mixed_outcomes_preserve_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = write_executable(dir.path(), "server.sh", MOCK_SERVER_SCRIPT);
    let agent = write_executable(dir.path(), "agent.sh", MOCK_AGENT_SCRIPT);
    write_mcp_config(dir.path(), &server);
    write_agent_spec(dir.path(), &agent, "");
    write_task(dir.path(), "t1", "exit 0");
    write_task(dir.path(), "t2", "exit 1");
    write_task(dir.path(), "t3", "exit 0");
    let eval_path = write_eval(dir.path(), "t*.yaml");

    let runner = EvalRunner::load(&eval_path, None).await.expect("load eval");
    let results = runner.run().await.expect("run eval");

    assert_eq!(results.len(), 3);
    let names: Vec<&str> = results.iter().map(|r| r.task_name.as_str()).collect();
    assert_eq!(names, vec!["t1", "t2", "t3"]);
    let passed: Vec<bool> = results.iter().map(|r| r.task_passed).collect();
    assert_eq!(passed, vec![true, false, true]);
}
