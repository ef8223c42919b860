//! Shared error type for every crate in the workspace.

/// Top-level error for the eval harness.
///
/// Mirrors the four error categories from the failure-semantics design:
/// configuration, infrastructure, task/logic, and backing-server errors are
/// all represented here, but only configuration and infrastructure errors
/// are expected to cross a task boundary — task/logic errors are captured
/// into `EvalResult` instead of propagated (see `mcpbench-cli::runner`).
#[derive(Debug, thiserror::Error)]
pub enum McpBenchError {
    /// Bad YAML/JSON, unknown `kind`, missing required env var, bad regex,
    /// conflicting step fields — anything caught eagerly at load time.
    #[error("config error: {0}")]
    Config(String),

    /// MCP handshake, transport, or capability errors.
    #[error("mcp error: {0}")]
    Mcp(String),

    /// Task lifecycle, script execution, or agent-spawn errors.
    #[error("task error: {0}")]
    Task(String),

    /// Agent runner / template expansion errors.
    #[error("agent error: {0}")]
    Agent(String),

    /// Assertion engine errors (distinct from a failed predicate, which is
    /// not an error — see `mcpbench-assert`).
    #[error("assertion error: {0}")]
    Assertion(String),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Glob pattern failure.
    #[error("glob error: {0}")]
    Glob(#[from] glob::PatternError),

    /// Filesystem / process I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the workspace.
pub type McpBenchResult<T> = Result<T, McpBenchError>;
