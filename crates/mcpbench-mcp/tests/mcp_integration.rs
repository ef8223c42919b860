//! Integration tests against a mock stdio MCP server (a tiny shell
//! script speaking line-delimited JSON-RPC) and, through it, the full
//! `McpClient` → `McpProxy` → `ServerManager` stack.

use std::collections::HashMap;
use std::io::Write;

use mcpbench_core::{MCPConfig, ServerConfig, ServerTransport};
use mcpbench_mcp::ServerManager;

/// Writes a mock MCP server script to a temp file and returns its path.
/// The script answers `initialize`, `tools/list`, and `tools/call` for a
/// single tool named `tool_a` that always returns `"ok"`.
fn write_mock_server() -> tempfile::TempPath {
    let script = r#"#!/usr/bin/env bash
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
    let mut file = tempfile::NamedTempFile::new().expect("create temp script");
    file.write_all(script.as_bytes()).expect("write script");
    let path = file.into_temp_path();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod script");
    }
    path
}

fn mock_config(script_path: &std::path::Path) -> MCPConfig {
    let mut servers = HashMap::new();
    servers.insert(
        "mock".to_string(),
        ServerConfig {
            transport: ServerTransport::Stdio {
                command: "bash".to_string(),
                args: vec![script_path.to_string_lossy().into_owned()],
                env: HashMap::new(),
            },
            disabled: false,
            enable_all_tools: true,
            allowed_tools: vec![],
        },
    );
    MCPConfig { mcp_servers: servers }
}

#[tokio::test]
async fn server_manager_starts_proxy_and_records_tool_call() {
    let script = write_mock_server();
    let config = mock_config(&script);

    let manager = ServerManager::new(&config).await.expect("connect to mock server");
    manager.start().await.expect("start proxy fleet");

    let files = manager.get_mcp_server_files().await.expect("materialize config");
    assert_eq!(files.len(), 1);
    let written = tokio::fs::read_to_string(&files[0]).await.expect("read mcp-server.json");
    let mirrored: MCPConfig = MCPConfig::from_str(&written).expect("parse mirrored config");
    let mock_server = &mirrored.mcp_servers["mock"];
    let url = match &mock_server.transport {
        ServerTransport::Http { url, .. } => url.clone(),
        ServerTransport::Stdio { .. } => panic!("expected proxy to mirror as http"),
    };

    let http = reqwest::Client::new();
    let resp: serde_json::Value = http
        .post(&url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "tool_a", "arguments": {}}
        }))
        .send()
        .await
        .expect("call proxy")
        .json()
        .await
        .expect("parse proxy response");
    assert_eq!(resp["result"]["content"][0]["text"], "ok");

    let history = manager.get_all_call_history().await;
    assert_eq!(history.tool_calls.len(), 1);
    assert_eq!(history.tool_calls[0].tool_name, "tool_a");
    assert!(history.tool_calls[0].record.success);

    manager.close().await;
}

#[tokio::test]
async fn allowed_tools_reflects_enable_all_tools() {
    let script = write_mock_server();
    let config = mock_config(&script);

    let manager = ServerManager::new(&config).await.expect("connect to mock server");
    let allowed = manager.get_allowed_tools();
    assert_eq!(allowed["mock"], vec!["tool_a".to_string()]);
    manager.close().await;
}
