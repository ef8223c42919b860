//! MCP server configuration: [`ServerConfig`] and [`MCPConfig`].

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{McpBenchError, McpBenchResult};

/// One backing MCP server, as declared in an MCP config file (§6.2).
///
/// The `type` tag is inferred when absent: a `command` field implies
/// `stdio`, a `url` field implies `http`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerTransport {
    /// Spawn `command args…` and speak JSON-RPC over stdin/stdout.
    Stdio {
        /// Executable to spawn.
        command: String,
        /// Arguments passed to `command`.
        #[serde(default)]
        args: Vec<String>,
        /// Environment variables merged over the parent process env.
        /// Values may reference `${VAR}` / `${VAR:-default}`.
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Speak streamable-HTTP JSON-RPC against `url`.
    Http {
        /// Base URL of the backing server's MCP endpoint.
        url: String,
        /// Headers attached to every request (e.g. `Authorization`).
        /// Values may reference `${VAR}` / `${VAR:-default}`.
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Untagged mirror of every field either variant of [`ServerTransport`]
/// accepts, used to infer the tag when `type` is absent.
#[derive(Deserialize)]
struct RawServerTransport {
    #[serde(rename = "type")]
    type_: Option<String>,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl<'de> Deserialize<'de> for ServerTransport {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawServerTransport::deserialize(deserializer)?;
        let tag = raw
            .type_
            .as_deref()
            .map(str::to_string)
            .or_else(|| {
                if raw.command.is_some() {
                    Some("stdio".to_string())
                } else if raw.url.is_some() {
                    Some("http".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                serde::de::Error::custom(
                    "cannot infer server transport: expected 'type', or a 'command' (stdio) or 'url' (http) field",
                )
            })?;

        match tag.as_str() {
            "stdio" => Ok(ServerTransport::Stdio {
                command: raw
                    .command
                    .ok_or_else(|| serde::de::Error::missing_field("command"))?,
                args: raw.args,
                env: raw.env,
            }),
            "http" => Ok(ServerTransport::Http {
                url: raw
                    .url
                    .ok_or_else(|| serde::de::Error::missing_field("url"))?,
                headers: raw.headers,
            }),
            other => Err(serde::de::Error::unknown_variant(other, &["stdio", "http"])),
        }
    }
}

/// A single entry in an [`MCPConfig`]'s `mcpServers` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport-specific fields.
    #[serde(flatten)]
    pub transport: ServerTransport,
    /// Skip this server entirely at load time.
    #[serde(default)]
    pub disabled: bool,
    /// When true, expose every tool the backing server advertises.
    /// When false, only `allowed_tools` is exposed.
    #[serde(default = "default_true", rename = "enableAllTools")]
    pub enable_all_tools: bool,
    /// Explicit allow-list used when `enable_all_tools` is false.
    #[serde(default, rename = "alwaysAllow")]
    pub allowed_tools: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// `serverName → ServerConfig`, the shape read from and written to disk
/// (§6.2). Keys must be unique (guaranteed by the underlying map) and are
/// validated as local identifiers at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MCPConfig {
    /// The backing servers, keyed by name.
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, ServerConfig>,
}

impl MCPConfig {
    /// Parse an `MCPConfig` from a JSON or YAML document and expand every
    /// `${VAR}` / `${VAR:-default}` reference against the process
    /// environment. A missing required variable is a hard [`McpBenchError::Config`].
    pub fn from_str(text: &str) -> McpBenchResult<Self> {
        let mut parsed: MCPConfig = parse_json_or_yaml(text)?;
        for (name, server) in parsed.mcp_servers.iter_mut() {
            validate_identifier(name)?;
            expand_server_env(server)?;
        }
        Ok(parsed)
    }

    /// Servers left after dropping `disabled` entries.
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.mcp_servers.iter().filter(|(_, s)| !s.disabled)
    }
}

fn validate_identifier(name: &str) -> McpBenchResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(McpBenchError::Config(format!(
            "invalid server name '{name}': must be a local identifier"
        )))
    }
}

fn expand_server_env(server: &mut ServerConfig) -> McpBenchResult<()> {
    match &mut server.transport {
        ServerTransport::Stdio { env: vars, .. } => {
            for v in vars.values_mut() {
                *v = expand_env_refs(v)?;
            }
        }
        ServerTransport::Http { headers, .. } => {
            for v in headers.values_mut() {
                *v = expand_env_refs(v)?;
            }
        }
    }
    Ok(())
}

/// Expand every `${VAR}` and `${VAR:-default}` occurrence in `text`.
///
/// A bare `${VAR}` with no default is a hard error when `VAR` is unset.
pub fn expand_env_refs(text: &str) -> McpBenchResult<String> {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            let end = text[i..]
                .find('}')
                .map(|off| i + off)
                .ok_or_else(|| McpBenchError::Config(format!("unterminated ${{..}} in '{text}'")))?;
            let inner = &text[i + 2..end];
            let (var, default) = match inner.split_once(":-") {
                Some((v, d)) => (v, Some(d)),
                None => (inner, None),
            };
            match env::var(var) {
                Ok(val) => out.push_str(&val),
                Err(_) => match default {
                    Some(d) => out.push_str(d),
                    None => {
                        return Err(McpBenchError::Config(format!(
                            "missing required environment variable '{var}'"
                        )))
                    }
                },
            }
            i = end + 1;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    Ok(out)
}

/// Try JSON first, then YAML — the same heuristic used for eval/agent/task
/// spec files throughout the workspace.
pub(crate) fn parse_json_or_yaml<T: serde::de::DeserializeOwned>(
    text: &str,
) -> McpBenchResult<T> {
    match serde_json::from_str(text) {
        Ok(v) => Ok(v),
        Err(json_err) => serde_yaml_ng::from_str(text).map_err(|yaml_err| {
            McpBenchError::Config(format!(
                "not valid JSON ({json_err}) or YAML ({yaml_err})"
            ))
        }),
    }
}
