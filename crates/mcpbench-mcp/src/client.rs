//! MCP client: opens a session with a single backing server over stdio or
//! HTTP and exposes a typed RPC surface (§4.1).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mcpbench_core::{McpBenchError, McpBenchResult, ServerConfig, ServerTransport};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::protocol::{
    InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpGetPromptResult,
    McpPromptDef, McpReadResourceResult, McpResourceDef, McpResourceTemplateDef, McpToolDef,
    McpToolResult, ServerCapabilities,
};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

enum Transport {
    Stdio {
        child: Child,
        stdin: tokio::process::ChildStdin,
        pending: PendingMap,
        _reader: tokio::task::JoinHandle<()>,
    },
    Http {
        http: reqwest::Client,
        url: String,
        headers: HashMap<String, String>,
    },
}

/// A connected session with one backing MCP server.
pub struct McpClient {
    transport: Transport,
    next_id: AtomicU64,
    capabilities: ServerCapabilities,
}

impl McpClient {
    /// Connect to `config`, performing the `initialize` handshake and
    /// caching the reported capability set. Connection errors are fatal
    /// for the containing task (§4.1).
    pub async fn connect(name: &str, config: &ServerConfig) -> McpBenchResult<Self> {
        let transport = match &config.transport {
            ServerTransport::Stdio { command, args, env } => {
                Self::spawn_stdio(name, command, args, env).await?
            }
            ServerTransport::Http { url, headers } => Transport::Http {
                http: reqwest::Client::new(),
                url: url.clone(),
                headers: headers.clone(),
            },
        };

        let mut client = Self {
            transport,
            next_id: AtomicU64::new(1),
            capabilities: ServerCapabilities::default(),
        };

        let init = client.initialize().await?;
        client.capabilities = init.capabilities;
        info!(
            server = name,
            tools = client.capabilities.has_tools(),
            resources = client.capabilities.has_resources(),
            prompts = client.capabilities.has_prompts(),
            "mcp handshake complete"
        );
        client
            .notify("notifications/initialized", None)
            .await?;
        Ok(client)
    }

    async fn spawn_stdio(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> McpBenchResult<Transport> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env.clone())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            McpBenchError::Mcp(format!("failed to spawn mcp server '{name}' ({command}): {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpBenchError::Mcp(format!("{name}: no stdin handle")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpBenchError::Mcp(format!("{name}: no stdout handle")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpBenchError::Mcp(format!("{name}: no stderr handle")))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let server_name = name.to_string();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(&line) {
                            Ok(resp) => {
                                let mut map = reader_pending.lock().await;
                                if let Some(tx) = map.remove(&resp.id) {
                                    let _ = tx.send(resp);
                                }
                            }
                            Err(e) => debug!(server = %server_name, error = %e, "unparseable line from mcp server"),
                        }
                    }
                    Ok(None) => {
                        error!(server = %server_name, "mcp server stdout closed");
                        break;
                    }
                    Err(e) => {
                        error!(server = %server_name, error = %e, "error reading mcp server stdout");
                        break;
                    }
                }
            }
        });

        let stderr_name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(server = %stderr_name, "{line}");
            }
        });

        Ok(Transport::Stdio {
            child,
            stdin,
            pending,
            _reader: reader,
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> McpBenchResult<Value> {
        match &mut self.transport {
            Transport::Stdio { stdin, pending, .. } => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let req = JsonRpcRequest::new(id, method, params);
                let (tx, rx) = oneshot::channel();
                pending.lock().await.insert(id, tx);

                let mut line = serde_json::to_string(&req)?;
                line.push('\n');
                stdin.write_all(line.as_bytes()).await.map_err(|e| {
                    McpBenchError::Mcp(format!("failed writing to mcp server stdin: {e}"))
                })?;

                let resp = rx.await.map_err(|_| {
                    McpBenchError::Mcp(format!("mcp server closed before responding to {method}"))
                })?;
                Self::unwrap_response(method, resp)
            }
            Transport::Http { http, url, headers } => {
                let id = self.next_id();
                let req = JsonRpcRequest::new(id, method, params);
                let mut builder = http.post(url).json(&req);
                for (k, v) in headers {
                    builder = builder.header(k, v);
                }
                let resp: JsonRpcResponse = builder
                    .send()
                    .await
                    .map_err(|e| McpBenchError::Mcp(format!("http request to '{url}' failed: {e}")))?
                    .json()
                    .await
                    .map_err(|e| McpBenchError::Mcp(format!("invalid json-rpc response: {e}")))?;
                Self::unwrap_response(method, resp)
            }
        }
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> McpBenchResult<()> {
        match &mut self.transport {
            Transport::Stdio { stdin, .. } => {
                let note = JsonRpcNotification::new(method, params);
                let mut line = serde_json::to_string(&note)?;
                line.push('\n');
                stdin
                    .write_all(line.as_bytes())
                    .await
                    .map_err(|e| McpBenchError::Mcp(format!("failed writing notification: {e}")))?;
                Ok(())
            }
            Transport::Http { http, url, headers } => {
                let note = JsonRpcNotification::new(method, params);
                let mut builder = http.post(url).json(&note);
                for (k, v) in headers {
                    builder = builder.header(k, v);
                }
                builder
                    .send()
                    .await
                    .map_err(|e| McpBenchError::Mcp(format!("http notify to '{url}' failed: {e}")))?;
                Ok(())
            }
        }
    }

    fn unwrap_response(method: &str, resp: JsonRpcResponse) -> McpBenchResult<Value> {
        if let Some(err) = resp.error {
            return Err(McpBenchError::Mcp(format!("{method}: {err}")));
        }
        resp.result
            .ok_or_else(|| McpBenchError::Mcp(format!("{method}: empty result")))
    }

    async fn initialize(&mut self) -> McpBenchResult<InitializeResult> {
        let params = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "mcpbench", "version": env!("CARGO_PKG_VERSION")},
        });
        let result = self.request("initialize", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpBenchError::Mcp(format!("invalid initialize result: {e}")))
    }

    /// Cached capability flags from the initial handshake.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    fn ensure_capable(&self, want: &str, has: bool) -> McpBenchResult<()> {
        if has {
            Ok(())
        } else {
            Err(McpBenchError::Mcp(format!(
                "CapabilityNotSupported: server does not advertise {want}"
            )))
        }
    }

    /// `tools/list`.
    pub async fn list_tools(&mut self) -> McpBenchResult<Vec<McpToolDef>> {
        self.ensure_capable("tools", self.capabilities.has_tools())?;
        let result = self.request("tools/list", None).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| McpBenchError::Mcp("tools/list: missing 'tools' field".into()))?;
        serde_json::from_value(tools)
            .map_err(|e| McpBenchError::Mcp(format!("invalid tools/list result: {e}")))
    }

    /// `resources/list`.
    pub async fn list_resources(&mut self) -> McpBenchResult<Vec<McpResourceDef>> {
        self.ensure_capable("resources", self.capabilities.has_resources())?;
        let result = self.request("resources/list", None).await?;
        let resources = result.get("resources").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(resources)
            .map_err(|e| McpBenchError::Mcp(format!("invalid resources/list result: {e}")))
    }

    /// `resources/templates/list`.
    pub async fn list_resource_templates(
        &mut self,
    ) -> McpBenchResult<Vec<McpResourceTemplateDef>> {
        self.ensure_capable("resources", self.capabilities.has_resources())?;
        let result = self.request("resources/templates/list", None).await?;
        let templates = result
            .get("resourceTemplates")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(templates)
            .map_err(|e| McpBenchError::Mcp(format!("invalid resources/templates/list result: {e}")))
    }

    /// `prompts/list`.
    pub async fn list_prompts(&mut self) -> McpBenchResult<Vec<McpPromptDef>> {
        self.ensure_capable("prompts", self.capabilities.has_prompts())?;
        let result = self.request("prompts/list", None).await?;
        let prompts = result.get("prompts").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(prompts)
            .map_err(|e| McpBenchError::Mcp(format!("invalid prompts/list result: {e}")))
    }

    /// `tools/call`.
    pub async fn call_tool(&mut self, name: &str, args: Value) -> McpBenchResult<McpToolResult> {
        self.ensure_capable("tools", self.capabilities.has_tools())?;
        let params = json!({"name": name, "arguments": args});
        let result = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpBenchError::Mcp(format!("invalid tools/call result: {e}")))
    }

    /// `resources/read`.
    pub async fn read_resource(&mut self, uri: &str) -> McpBenchResult<McpReadResourceResult> {
        self.ensure_capable("resources", self.capabilities.has_resources())?;
        let params = json!({"uri": uri});
        let result = self.request("resources/read", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpBenchError::Mcp(format!("invalid resources/read result: {e}")))
    }

    /// `prompts/get`.
    pub async fn get_prompt(&mut self, name: &str, args: Value) -> McpBenchResult<McpGetPromptResult> {
        self.ensure_capable("prompts", self.capabilities.has_prompts())?;
        let params = json!({"name": name, "arguments": args});
        let result = self.request("prompts/get", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpBenchError::Mcp(format!("invalid prompts/get result: {e}")))
    }

    /// Best-effort liveness check: a stdio child that has exited, or an
    /// HTTP transport (always considered alive between calls).
    pub fn is_alive(&mut self) -> bool {
        match &mut self.transport {
            Transport::Stdio { child, .. } => !matches!(child.try_wait(), Ok(Some(_))),
            Transport::Http { .. } => true,
        }
    }

    /// Terminate a stdio child process; a no-op for HTTP transports.
    pub async fn close(&mut self) {
        if let Transport::Stdio { child, .. } = &mut self.transport {
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_params() {
        let req = JsonRpcRequest::new(1, "tools/call", Some(json!({"name": "x"})));
        let s = serde_json::to_string(&req).unwrap();
        assert!(s.contains("\"method\":\"tools/call\""));
    }

    #[test]
    fn unwrap_response_surfaces_rpc_error() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: None,
            error: Some(crate::protocol::JsonRpcError {
                code: -32601,
                message: "method not found".into(),
                data: None,
            }),
        };
        let err = McpClient::unwrap_response("tools/call", resp).unwrap_err();
        assert!(matches!(err, McpBenchError::Mcp(_)));
    }

    #[tokio::test]
    async fn http_transport_completes_handshake_and_calls_tool() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(move |req: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap();
                match body.get("method").and_then(Value::as_str) {
                    Some("initialize") => ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": body["id"],
                        "result": {
                            "protocolVersion": "2024-11-05",
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "mock", "version": "0.0.0"},
                        }
                    })),
                    Some("notifications/initialized") => ResponseTemplate::new(200),
                    Some("tools/call") => ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": body["id"],
                        "result": {"content": [], "isError": false},
                    })),
                    other => panic!("unexpected method: {other:?}"),
                }
            })
            .mount(&server)
            .await;

        let config = ServerConfig {
            transport: ServerTransport::Http {
                url: format!("{}/mcp", server.uri()),
                headers: HashMap::new(),
            },
            disabled: false,
            enable_all_tools: true,
            allowed_tools: Vec::new(),
        };

        let mut client = McpClient::connect("mock", &config).await.unwrap();
        assert!(client.capabilities().has_tools());

        let result = client.call_tool("tool_a", json!({})).await.unwrap();
        assert!(!result.is_error);
        assert!(client.is_alive());
    }
}
