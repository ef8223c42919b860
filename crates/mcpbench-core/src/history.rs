//! The recorded-interaction data model: [`CallRecord`] and [`CallHistory`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields common to any recorded MCP interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Name of the backing server the call was forwarded to.
    #[serde(rename = "serverName")]
    pub server_name: String,
    /// Monotonic timestamp assigned at call start (`start := now()`).
    pub timestamp: i64,
    /// `true` iff the backing server returned no error.
    pub success: bool,
    /// String form of the failure; empty when `success`.
    #[serde(default)]
    pub error: String,
}

impl CallRecord {
    /// `success == (error == "")`, enforced once instead of at every
    /// call site that builds a record.
    pub fn new(server_name: impl Into<String>, timestamp: i64, error: Option<String>) -> Self {
        match error {
            Some(e) => Self {
                server_name: server_name.into(),
                timestamp,
                success: false,
                error: e,
            },
            None => Self {
                server_name: server_name.into(),
                timestamp,
                success: true,
                error: String::new(),
            },
        }
    }
}

/// A recorded `callTool` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(flatten)]
    pub record: CallRecord,
    /// Duplicated for quick filtering without destructuring `request`.
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub request: Value,
    pub result: Value,
}

/// A recorded `readResource` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRead {
    #[serde(flatten)]
    pub record: CallRecord,
    pub uri: String,
    pub result: Value,
}

/// A recorded `getPrompt` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGet {
    #[serde(flatten)]
    pub record: CallRecord,
    #[serde(rename = "promptName")]
    pub prompt_name: String,
    pub request: Value,
    pub result: Value,
}

/// Three ordered sequences of recorded MCP interactions.
///
/// Per-server histories preserve insertion order; an aggregated history
/// (built via [`CallHistory::merge_sorted`]) is sorted ascending by
/// `timestamp` with ties broken by per-server insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallHistory {
    #[serde(rename = "toolCalls")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(rename = "resourceReads")]
    pub resource_reads: Vec<ResourceRead>,
    #[serde(rename = "promptGets")]
    pub prompt_gets: Vec<PromptGet>,
}

impl CallHistory {
    /// Merge several per-proxy histories into one, stably sorted by
    /// `timestamp` within each of the three kinds. A `sort_by_key` /
    /// `sort_by` in Rust's standard library is guaranteed stable, so
    /// histories that arrive in per-proxy insertion order keep that order
    /// on a timestamp tie.
    pub fn merge_sorted(histories: impl IntoIterator<Item = CallHistory>) -> CallHistory {
        let mut merged = CallHistory::default();
        for h in histories {
            merged.tool_calls.extend(h.tool_calls);
            merged.resource_reads.extend(h.resource_reads);
            merged.prompt_gets.extend(h.prompt_gets);
        }
        merged
            .tool_calls
            .sort_by_key(|c| c.record.timestamp);
        merged
            .resource_reads
            .sort_by_key(|c| c.record.timestamp);
        merged
            .prompt_gets
            .sort_by_key(|c| c.record.timestamp);
        merged
    }

    /// Total number of recorded interactions across all three kinds.
    pub fn len(&self) -> usize {
        self.tool_calls.len() + self.resource_reads.len() + self.prompt_gets.len()
    }

    /// `true` iff no interaction of any kind was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tool_call(server: &str, ts: i64, name: &str) -> ToolCall {
        ToolCall {
            record: CallRecord::new(server, ts, None),
            tool_name: name.to_string(),
            request: Value::Null,
            result: Value::Null,
        }
    }

    #[test]
    fn merge_sorted_orders_by_timestamp() {
        let mut h1 = CallHistory::default();
        h1.tool_calls.push(tool_call("a", 10, "x"));
        h1.tool_calls.push(tool_call("a", 30, "y"));
        let mut h2 = CallHistory::default();
        h2.tool_calls.push(tool_call("b", 20, "z"));

        let merged = CallHistory::merge_sorted([h1, h2]);
        let ts: Vec<i64> = merged.tool_calls.iter().map(|t| t.record.timestamp).collect();
        assert_eq!(ts, vec![10, 20, 30]);
    }

    #[test]
    fn merge_sorted_breaks_ties_by_insertion_order() {
        let mut h1 = CallHistory::default();
        h1.tool_calls.push(tool_call("a", 5, "first"));
        let mut h2 = CallHistory::default();
        h2.tool_calls.push(tool_call("b", 5, "second"));

        let merged = CallHistory::merge_sorted([h1, h2]);
        let names: Vec<&str> = merged
            .tool_calls
            .iter()
            .map(|t| t.tool_name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn call_record_success_matches_error_emptiness() {
        let ok = CallRecord::new("s", 1, None);
        assert!(ok.success && ok.error.is_empty());
        let err = CallRecord::new("s", 1, Some("boom".into()));
        assert!(!err.success && err.error == "boom");
    }
}
