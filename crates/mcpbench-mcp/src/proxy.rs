//! MCP Proxy Server: a capability-mirroring HTTP MCP server that
//! transparently forwards to a real backing server while recording every
//! interaction (§4.2).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use mcpbench_core::{
    CallHistory, CallRecord, McpBenchError, McpBenchResult, PromptGet, ResourceRead, ServerConfig,
    ServerTransport, ToolCall,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::McpClient;
use crate::protocol::{InitializeResult, McpPromptDef, McpResourceDef, McpResourceTemplateDef, McpToolDef};

/// Grace period the proxy waits for in-flight requests to finish after
/// cancellation before forcing the listener closed (§4.2, §5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Snapshot {
    tools: Vec<McpToolDef>,
    resources: Vec<McpResourceDef>,
    resource_templates: Vec<McpResourceTemplateDef>,
    prompts: Vec<McpPromptDef>,
}

struct ProxyState {
    server_name: String,
    client: Mutex<McpClient>,
    recorder: Mutex<CallHistory>,
    snapshot: Snapshot,
    allowed_tools: Vec<String>,
    start: Instant,
}

impl ProxyState {
    fn elapsed_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }
}

/// A running (or not-yet-started) mirror proxy for one backing server.
pub struct McpProxy {
    state: Arc<ProxyState>,
    upstream_headers: HashMap<String, String>,
    cancel: CancellationToken,
    ready: Arc<Notify>,
    addr: Arc<std::sync::Mutex<Option<SocketAddr>>>,
    startup_error: Arc<std::sync::Mutex<Option<String>>>,
}

impl McpProxy {
    /// Connect to the backing server and take the one-shot capability
    /// snapshot. The proxy does not re-list after this point (§4.2 Design
    /// choice).
    pub async fn new(server_name: &str, config: &ServerConfig) -> McpBenchResult<Self> {
        let mut client = McpClient::connect(server_name, config).await?;

        let tools = if client.capabilities().has_tools() {
            client.list_tools().await?
        } else {
            Vec::new()
        };
        let resources = if client.capabilities().has_resources() {
            client.list_resources().await?
        } else {
            Vec::new()
        };
        let resource_templates = if client.capabilities().has_resources() {
            client.list_resource_templates().await?
        } else {
            Vec::new()
        };
        let prompts = if client.capabilities().has_prompts() {
            client.list_prompts().await?
        } else {
            Vec::new()
        };

        let allowed_tools = if config.enable_all_tools {
            tools.iter().map(|t| t.name.clone()).collect()
        } else {
            config
                .allowed_tools
                .iter()
                .filter(|name| tools.iter().any(|t| &t.name == *name))
                .cloned()
                .collect()
        };

        let upstream_headers = match &config.transport {
            ServerTransport::Http { headers, .. } => headers.clone(),
            ServerTransport::Stdio { .. } => HashMap::new(),
        };

        let state = Arc::new(ProxyState {
            server_name: server_name.to_string(),
            client: Mutex::new(client),
            recorder: Mutex::new(CallHistory::default()),
            snapshot: Snapshot {
                tools,
                resources,
                resource_templates,
                prompts,
            },
            allowed_tools,
            start: Instant::now(),
        });

        Ok(Self {
            state,
            upstream_headers,
            cancel: CancellationToken::new(),
            ready: Arc::new(Notify::new()),
            addr: Arc::new(std::sync::Mutex::new(None)),
            startup_error: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    /// Bind a random free localhost port and serve `/mcp` until `cancel`
    /// fires, then shut down with a 5-second grace (§4.2, §5).
    pub async fn run(&self) -> McpBenchResult<()> {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) => {
                *self.startup_error.lock().unwrap_or_else(|p| p.into_inner()) =
                    Some(e.to_string());
                self.ready.notify_waiters();
                return Err(McpBenchError::Mcp(format!(
                    "proxy for '{}' failed to bind: {e}",
                    self.state.server_name
                )));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| McpBenchError::Mcp(format!("failed to read bound addr: {e}")))?;
        *self.addr.lock().unwrap_or_else(|p| p.into_inner()) = Some(local_addr);
        self.ready.notify_waiters();
        info!(server = %self.state.server_name, addr = %local_addr, "proxy listening");

        let router = Router::new()
            .route("/mcp", post(handle_mcp))
            .route("/healthz", get(health))
            .with_state(self.state.clone());

        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
        });
        tokio::pin!(handle);

        tokio::select! {
            res = &mut handle => {
                return map_join_result(res, &self.state.server_name);
            }
            _ = self.cancel.cancelled() => {}
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(res) => map_join_result(res, &self.state.server_name),
            Err(_) => {
                warn!(server = %self.state.server_name, "proxy did not shut down within grace period");
                Ok(())
            }
        }
    }

    /// Block until the listener is bound (or return the startup error).
    pub async fn wait_ready(&self) -> McpBenchResult<()> {
        loop {
            if let Some(err) = self.startup_error.lock().unwrap_or_else(|p| p.into_inner()).clone() {
                return Err(McpBenchError::Mcp(err));
            }
            if self.addr.lock().unwrap_or_else(|p| p.into_inner()).is_some() {
                return Ok(());
            }
            self.ready.notified().await;
        }
    }

    /// `ServerConfig{type=http, url=…}` pointing at this proxy, with
    /// pass-through headers inherited from the backing config.
    pub fn get_config(&self) -> McpBenchResult<ServerConfig> {
        let addr = self
            .addr
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .ok_or_else(|| McpBenchError::Mcp("proxy not ready".into()))?;
        Ok(ServerConfig {
            transport: ServerTransport::Http {
                url: format!("http://{addr}/mcp"),
                headers: self.upstream_headers.clone(),
            },
            disabled: false,
            enable_all_tools: true,
            allowed_tools: self.state.allowed_tools.clone(),
        })
    }

    /// Names of tools the agent is permitted to call.
    pub fn get_allowed_tools(&self) -> Vec<String> {
        self.state.allowed_tools.clone()
    }

    /// Snapshot copy of everything recorded so far.
    pub async fn get_call_history(&self) -> CallHistory {
        self.state.recorder.lock().await.clone()
    }

    /// Cancel the run context and (the caller should) await `run`'s
    /// return to observe shutdown completion.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

fn map_join_result(
    res: Result<std::io::Result<()>, tokio::task::JoinError>,
    server_name: &str,
) -> McpBenchResult<()> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(McpBenchError::Mcp(format!(
            "proxy '{server_name}' http server error: {e}"
        ))),
        Err(e) => Err(McpBenchError::Mcp(format!(
            "proxy '{server_name}' task panicked: {e}"
        ))),
    }
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn handle_mcp(State(state): State<Arc<ProxyState>>, Json(body): Json<Value>) -> impl IntoResponse {
    let id = body.get("id").and_then(Value::as_u64);
    let method = body.get("method").and_then(Value::as_str).unwrap_or("").to_string();
    let params = body.get("params").cloned().unwrap_or(Value::Null);

    let Some(id) = id else {
        // Notification (e.g. notifications/initialized) — fire and forget.
        return StatusCode::ACCEPTED.into_response();
    };

    let result = dispatch(&state, &method, params).await;
    let body = match result {
        Ok(value) => json!({"jsonrpc": "2.0", "id": id, "result": value}),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32000, "message": e.to_string()}
        }),
    };
    Json(body).into_response()
}

async fn dispatch(state: &Arc<ProxyState>, method: &str, params: Value) -> McpBenchResult<Value> {
    match method {
        "initialize" => Ok(serde_json::to_value(InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: mirrored_capabilities(state),
            server_info: crate::protocol::ServerInfo {
                name: format!("mcpbench-proxy-{}", state.server_name),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })?),
        "tools/list" => Ok(json!({"tools": state.snapshot.tools})),
        "resources/list" => Ok(json!({"resources": state.snapshot.resources})),
        "resources/templates/list" => {
            Ok(json!({"resourceTemplates": state.snapshot.resource_templates}))
        }
        "prompts/list" => Ok(json!({"prompts": state.snapshot.prompts})),
        "tools/call" => call_tool(state, params).await,
        "resources/read" => read_resource(state, params).await,
        "prompts/get" => get_prompt(state, params).await,
        other => Err(McpBenchError::Mcp(format!("unsupported method: {other}"))),
    }
}

fn mirrored_capabilities(state: &ProxyState) -> crate::protocol::ServerCapabilities {
    crate::protocol::ServerCapabilities {
        tools: (!state.snapshot.tools.is_empty()).then(|| json!({})),
        resources: (!state.snapshot.resources.is_empty()).then(|| json!({})),
        prompts: (!state.snapshot.prompts.is_empty()).then(|| json!({})),
    }
}

async fn call_tool(state: &Arc<ProxyState>, params: Value) -> McpBenchResult<Value> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| McpBenchError::Mcp("tools/call: missing 'name'".into()))?
        .to_string();
    let args = params.get("arguments").cloned().unwrap_or(Value::Null);

    let start = state.elapsed_ms();
    let outcome = {
        let mut client = state.client.lock().await;
        client.call_tool(&name, args.clone()).await
    };

    let (record, result_value) = match &outcome {
        Ok(result) => (
            CallRecord::new(state.server_name.clone(), start, None),
            serde_json::to_value(result)?,
        ),
        Err(e) => (
            CallRecord::new(state.server_name.clone(), start, Some(e.to_string())),
            Value::Null,
        ),
    };

    state.recorder.lock().await.tool_calls.push(ToolCall {
        record,
        tool_name: name,
        request: args,
        result: result_value.clone(),
    });

    outcome.map(|_| result_value)
}

async fn read_resource(state: &Arc<ProxyState>, params: Value) -> McpBenchResult<Value> {
    let uri = params
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| McpBenchError::Mcp("resources/read: missing 'uri'".into()))?
        .to_string();

    let start = state.elapsed_ms();
    let outcome = {
        let mut client = state.client.lock().await;
        client.read_resource(&uri).await
    };

    let (record, result_value) = match &outcome {
        Ok(result) => (
            CallRecord::new(state.server_name.clone(), start, None),
            serde_json::to_value(result)?,
        ),
        Err(e) => (
            CallRecord::new(state.server_name.clone(), start, Some(e.to_string())),
            Value::Null,
        ),
    };

    state.recorder.lock().await.resource_reads.push(ResourceRead {
        record,
        uri,
        result: result_value.clone(),
    });

    outcome.map(|_| result_value)
}

async fn get_prompt(state: &Arc<ProxyState>, params: Value) -> McpBenchResult<Value> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| McpBenchError::Mcp("prompts/get: missing 'name'".into()))?
        .to_string();
    let args = params.get("arguments").cloned().unwrap_or(Value::Null);

    let start = state.elapsed_ms();
    let outcome = {
        let mut client = state.client.lock().await;
        client.get_prompt(&name, args.clone()).await
    };

    let (record, result_value) = match &outcome {
        Ok(result) => (
            CallRecord::new(state.server_name.clone(), start, None),
            serde_json::to_value(result)?,
        ),
        Err(e) => (
            CallRecord::new(state.server_name.clone(), start, Some(e.to_string())),
            Value::Null,
        ),
    };

    state.recorder.lock().await.prompt_gets.push(PromptGet {
        record,
        prompt_name: name,
        request: args,
        result: result_value.clone(),
    });

    outcome.map(|_| result_value)
}
