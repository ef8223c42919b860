//! Server Manager: owns the fleet of per-task proxies (§4.3).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use mcpbench_core::{CallHistory, MCPConfig, McpBenchError, McpBenchResult};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::info;

use crate::proxy::McpProxy;

/// Owns one [`McpProxy`] per enabled backing server and coordinates them
/// as a unit. One `start`, one `close`, both called by the same owner
/// (§4.3 Concurrency contract).
pub struct ServerManager {
    proxies: HashMap<String, Arc<McpProxy>>,
    run_handles: Mutex<Vec<JoinHandle<McpBenchResult<()>>>>,
    temp_dir: Mutex<Option<tempfile::TempDir>>,
}

impl ServerManager {
    /// Connect to every enabled server in `config` and take its
    /// capability snapshot. Does not yet bind any ports — call
    /// [`Self::start`] for that.
    pub async fn new(config: &MCPConfig) -> McpBenchResult<Self> {
        let mut proxies = HashMap::new();
        for (name, server) in config.enabled_servers() {
            let proxy = McpProxy::new(name, server).await?;
            proxies.insert(name.clone(), Arc::new(proxy));
        }
        Ok(Self {
            proxies,
            run_handles: Mutex::new(Vec::new()),
            temp_dir: Mutex::new(None),
        })
    }

    /// Fan `run` out across all proxies and return once every proxy has
    /// signaled ready, or the first one fails to start.
    pub async fn start(&self) -> McpBenchResult<()> {
        let mut handles = Vec::with_capacity(self.proxies.len());
        for proxy in self.proxies.values() {
            let proxy = proxy.clone();
            handles.push(tokio::spawn(async move { proxy.run().await }));
        }
        *self.run_handles.lock().await = handles;

        let mut ready_set = JoinSet::new();
        for proxy in self.proxies.values() {
            let proxy = proxy.clone();
            ready_set.spawn(async move { proxy.wait_ready().await });
        }

        while let Some(res) = ready_set.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(join_err) => {
                    return Err(McpBenchError::Mcp(format!(
                        "proxy readiness task panicked: {join_err}"
                    )))
                }
            }
        }

        info!(count = self.proxies.len(), "all proxies ready");
        Ok(())
    }

    /// Lazily materialize a temp directory with one `mcp-server.json` file
    /// whose `ServerConfig`s point at proxy URLs instead of the real
    /// backing servers. Returned as a list so callers expecting one file
    /// per server can be accommodated without a format change (§4.3).
    pub async fn get_mcp_server_files(&self) -> McpBenchResult<Vec<PathBuf>> {
        let mut guard = self.temp_dir.lock().await;
        if guard.is_none() {
            let dir = tempfile::TempDir::new()?;
            let mut mirrored = MCPConfig::default();
            for (name, proxy) in &self.proxies {
                mirrored.mcp_servers.insert(name.clone(), proxy.get_config()?);
            }
            let path = dir.path().join("mcp-server.json");
            let json = serde_json::to_string_pretty(&mirrored)?;
            tokio::fs::write(&path, json).await?;
            *guard = Some(dir);
        }
        let path = guard
            .as_ref()
            .map(|d| d.path().join("mcp-server.json"))
            .ok_or_else(|| McpBenchError::Mcp("temp dir vanished".into()))?;
        Ok(vec![path])
    }

    /// Names of tools the agent may call, per server.
    pub fn get_allowed_tools(&self) -> HashMap<String, Vec<String>> {
        self.proxies
            .iter()
            .map(|(name, proxy)| (name.clone(), proxy.get_allowed_tools()))
            .collect()
    }

    /// Combine each proxy's history into one chronologically sorted
    /// sequence (§4.3, §5 Ordering guarantees).
    ///
    /// `merge_sorted` tie-breaks same-timestamp calls by input order, so
    /// proxies are visited in server-name order rather than `HashMap`'s
    /// unspecified iteration order — otherwise the tie-break would vary
    /// from run to run.
    pub async fn get_all_call_history(&self) -> CallHistory {
        let mut names: Vec<&String> = self.proxies.keys().collect();
        names.sort();
        let mut histories = Vec::with_capacity(names.len());
        for name in names {
            histories.push(self.proxies[name].get_call_history().await);
        }
        CallHistory::merge_sorted(histories)
    }

    /// Cancel every proxy, wait for their run tasks, and remove the temp
    /// directory. Idempotent: a second call is a benign no-op.
    pub async fn close(&self) {
        for proxy in self.proxies.values() {
            proxy.close();
        }
        let mut handles = self.run_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.temp_dir.lock().await.take();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_with_no_servers_has_no_proxies() {
        let config = MCPConfig::default();
        let manager = ServerManager::new(&config).await.unwrap();
        assert!(manager.get_allowed_tools().is_empty());
        let history = manager.get_all_call_history().await;
        assert!(history.is_empty());
        manager.close().await;
    }
}
