//! MCP client, recording proxy, and fleet manager.
//!
//! [`McpClient`] speaks JSON-RPC to a single backing server over stdio or
//! HTTP. [`McpProxy`] wraps a client in a capability-mirroring HTTP
//! server that records every interaction. [`ServerManager`] owns a fleet
//! of proxies for one task and renders the client-facing config file.

mod client;
mod manager;
mod protocol;
mod proxy;

pub use client::McpClient;
pub use manager::ServerManager;
pub use protocol::{
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    McpContent, McpGetPromptResult, McpPromptDef, McpReadResourceResult, McpResourceDef,
    McpResourceTemplateDef, McpToolDef, McpToolResult, ServerCapabilities, ServerInfo,
};
pub use proxy::McpProxy;
