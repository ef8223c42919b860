//! Evaluates a [`TaskAssertions`] against a [`CallHistory`] (§4.8).

use std::collections::HashMap;

use mcpbench_core::{
    AssertionResults, AssertionVerdict, CallHistory, CallKind, CallOrderEntry, PromptTarget,
    ResourceTarget, TaskAssertions, ToolTarget,
};
use regex::Regex;

/// Evaluate every present predicate in `assertions` against `history`.
/// `history` is treated as immutable for the duration of evaluation
/// (§3 Invariants).
pub fn evaluate(history: &CallHistory, assertions: &TaskAssertions) -> AssertionResults {
    AssertionResults {
        tools_used: assertions
            .tools_used
            .as_ref()
            .map(|targets| tools_used(history, targets)),
        require_any: assertions
            .require_any
            .as_ref()
            .map(|targets| require_any(history, targets)),
        tools_not_used: assertions
            .tools_not_used
            .as_ref()
            .map(|targets| tools_not_used(history, targets)),
        min_tool_calls: assertions
            .min_tool_calls
            .map(|n| min_tool_calls(history, n)),
        max_tool_calls: assertions
            .max_tool_calls
            .map(|n| max_tool_calls(history, n)),
        resources_read: assertions
            .resources_read
            .as_ref()
            .map(|targets| resources_read(history, targets)),
        resources_not_read: assertions
            .resources_not_read
            .as_ref()
            .map(|targets| resources_not_read(history, targets)),
        prompts_used: assertions
            .prompts_used
            .as_ref()
            .map(|targets| prompts_used(history, targets)),
        prompts_not_used: assertions
            .prompts_not_used
            .as_ref()
            .map(|targets| prompts_not_used(history, targets)),
        call_order: assertions
            .call_order
            .as_ref()
            .map(|entries| call_order(history, entries)),
        no_duplicate_calls: assertions
            .no_duplicate_calls
            .and_then(|enabled| enabled.then(|| no_duplicate_calls(history))),
    }
}

fn compiled(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))
}

fn tool_matches(server: &str, tool_name: &str, target: &ToolTarget) -> Result<bool, String> {
    if target.server != server {
        return Ok(false);
    }
    if let Some(exact) = &target.tool {
        return Ok(exact == tool_name);
    }
    if let Some(pattern) = &target.tool_pattern {
        return Ok(compiled(pattern)?.is_match(tool_name));
    }
    Ok(true)
}

fn resource_matches(server: &str, uri: &str, target: &ResourceTarget) -> Result<bool, String> {
    if target.server != server {
        return Ok(false);
    }
    if let Some(exact) = &target.uri {
        return Ok(exact == uri);
    }
    if let Some(pattern) = &target.uri_pattern {
        return Ok(compiled(pattern)?.is_match(uri));
    }
    Ok(true)
}

fn prompt_matches(server: &str, prompt_name: &str, target: &PromptTarget) -> Result<bool, String> {
    if target.server != server {
        return Ok(false);
    }
    if let Some(exact) = &target.prompt {
        return Ok(exact == prompt_name);
    }
    if let Some(pattern) = &target.prompt_pattern {
        return Ok(compiled(pattern)?.is_match(prompt_name));
    }
    Ok(true)
}

fn tools_used(history: &CallHistory, targets: &[ToolTarget]) -> AssertionVerdict {
    let mut missing = Vec::new();
    for target in targets {
        let found = match history
            .tool_calls
            .iter()
            .try_fold(false, |acc, c| {
                Ok::<bool, String>(acc || tool_matches(&c.record.server_name, &c.tool_name, target)?)
            }) {
            Ok(found) => found,
            Err(e) => return invalid_pattern_verdict(&e),
        };
        if !found {
            missing.push(describe_tool_target(target));
        }
    }
    if missing.is_empty() {
        AssertionVerdict {
            passed: true,
            reason: "all required tools were used".to_string(),
            details: vec![],
        }
    } else {
        AssertionVerdict {
            passed: false,
            reason: "one or more required tools were never called".to_string(),
            details: missing,
        }
    }
}

fn require_any(history: &CallHistory, targets: &[ToolTarget]) -> AssertionVerdict {
    for target in targets {
        match history.tool_calls.iter().try_fold(false, |acc, c| {
            Ok::<bool, String>(acc || tool_matches(&c.record.server_name, &c.tool_name, target)?)
        }) {
            Ok(true) => {
                return AssertionVerdict {
                    passed: true,
                    reason: format!("matched {}", describe_tool_target(target)),
                    details: vec![],
                }
            }
            Ok(false) => {}
            Err(e) => return invalid_pattern_verdict(&e),
        }
    }
    AssertionVerdict {
        passed: false,
        reason: "none of the candidate tools were used".to_string(),
        details: targets.iter().map(describe_tool_target).collect(),
    }
}

fn tools_not_used(history: &CallHistory, targets: &[ToolTarget]) -> AssertionVerdict {
    let mut hits = Vec::new();
    for target in targets {
        match history.tool_calls.iter().try_fold(false, |acc, c| {
            Ok::<bool, String>(acc || tool_matches(&c.record.server_name, &c.tool_name, target)?)
        }) {
            Ok(true) => hits.push(describe_tool_target(target)),
            Ok(false) => {}
            Err(e) => return invalid_pattern_verdict(&e),
        }
    }
    if hits.is_empty() {
        AssertionVerdict {
            passed: true,
            reason: "none of the forbidden tools were used".to_string(),
            details: vec![],
        }
    } else {
        AssertionVerdict {
            passed: false,
            reason: "a forbidden tool was used".to_string(),
            details: hits,
        }
    }
}

fn min_tool_calls(history: &CallHistory, n: usize) -> AssertionVerdict {
    let actual = history.tool_calls.len();
    AssertionVerdict {
        passed: actual >= n,
        reason: format!("expected at least {n} tool call(s), got {actual}"),
        details: vec![],
    }
}

fn max_tool_calls(history: &CallHistory, n: usize) -> AssertionVerdict {
    let actual = history.tool_calls.len();
    AssertionVerdict {
        passed: actual <= n,
        reason: format!("expected at most {n} tool call(s), got {actual}"),
        details: vec![],
    }
}

fn resources_read(history: &CallHistory, targets: &[ResourceTarget]) -> AssertionVerdict {
    let mut missing = Vec::new();
    for target in targets {
        match history.resource_reads.iter().try_fold(false, |acc, c| {
            Ok::<bool, String>(acc || resource_matches(&c.record.server_name, &c.uri, target)?)
        }) {
            Ok(true) => {}
            Ok(false) => missing.push(describe_resource_target(target)),
            Err(e) => return invalid_pattern_verdict(&e),
        }
    }
    if missing.is_empty() {
        AssertionVerdict {
            passed: true,
            reason: "all required resources were read".to_string(),
            details: vec![],
        }
    } else {
        AssertionVerdict {
            passed: false,
            reason: "one or more required resources were never read".to_string(),
            details: missing,
        }
    }
}

fn resources_not_read(history: &CallHistory, targets: &[ResourceTarget]) -> AssertionVerdict {
    let mut hits = Vec::new();
    for target in targets {
        match history.resource_reads.iter().try_fold(false, |acc, c| {
            Ok::<bool, String>(acc || resource_matches(&c.record.server_name, &c.uri, target)?)
        }) {
            Ok(true) => hits.push(describe_resource_target(target)),
            Ok(false) => {}
            Err(e) => return invalid_pattern_verdict(&e),
        }
    }
    if hits.is_empty() {
        AssertionVerdict {
            passed: true,
            reason: "none of the forbidden resources were read".to_string(),
            details: vec![],
        }
    } else {
        AssertionVerdict {
            passed: false,
            reason: "a forbidden resource was read".to_string(),
            details: hits,
        }
    }
}

fn prompts_used(history: &CallHistory, targets: &[PromptTarget]) -> AssertionVerdict {
    let mut missing = Vec::new();
    for target in targets {
        match history.prompt_gets.iter().try_fold(false, |acc, c| {
            Ok::<bool, String>(acc || prompt_matches(&c.record.server_name, &c.prompt_name, target)?)
        }) {
            Ok(true) => {}
            Ok(false) => missing.push(describe_prompt_target(target)),
            Err(e) => return invalid_pattern_verdict(&e),
        }
    }
    if missing.is_empty() {
        AssertionVerdict {
            passed: true,
            reason: "all required prompts were used".to_string(),
            details: vec![],
        }
    } else {
        AssertionVerdict {
            passed: false,
            reason: "one or more required prompts were never fetched".to_string(),
            details: missing,
        }
    }
}

fn prompts_not_used(history: &CallHistory, targets: &[PromptTarget]) -> AssertionVerdict {
    let mut hits = Vec::new();
    for target in targets {
        match history.prompt_gets.iter().try_fold(false, |acc, c| {
            Ok::<bool, String>(acc || prompt_matches(&c.record.server_name, &c.prompt_name, target)?)
        }) {
            Ok(true) => hits.push(describe_prompt_target(target)),
            Ok(false) => {}
            Err(e) => return invalid_pattern_verdict(&e),
        }
    }
    if hits.is_empty() {
        AssertionVerdict {
            passed: true,
            reason: "none of the forbidden prompts were used".to_string(),
            details: vec![],
        }
    } else {
        AssertionVerdict {
            passed: false,
            reason: "a forbidden prompt was used".to_string(),
            details: hits,
        }
    }
}

struct TimelineEntry {
    timestamp: i64,
    kind: CallKind,
    server: String,
    name: String,
}

fn combined_timeline(history: &CallHistory) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = Vec::with_capacity(history.len());
    entries.extend(history.tool_calls.iter().map(|c| TimelineEntry {
        timestamp: c.record.timestamp,
        kind: CallKind::Tool,
        server: c.record.server_name.clone(),
        name: c.tool_name.clone(),
    }));
    entries.extend(history.resource_reads.iter().map(|c| TimelineEntry {
        timestamp: c.record.timestamp,
        kind: CallKind::Resource,
        server: c.record.server_name.clone(),
        name: c.uri.clone(),
    }));
    entries.extend(history.prompt_gets.iter().map(|c| TimelineEntry {
        timestamp: c.record.timestamp,
        kind: CallKind::Prompt,
        server: c.record.server_name.clone(),
        name: c.prompt_name.clone(),
    }));
    entries.sort_by_key(|e| e.timestamp);
    entries
}

fn call_order(history: &CallHistory, entries: &[CallOrderEntry]) -> AssertionVerdict {
    let timeline = combined_timeline(history);
    let mut cursor = 0usize;
    for wanted in entries {
        let found = timeline[cursor..].iter().position(|e| {
            e.kind == wanted.kind && e.server == wanted.server && e.name == wanted.name
        });
        match found {
            Some(offset) => cursor += offset + 1,
            None => {
                return AssertionVerdict {
                    passed: false,
                    reason: "call order is not a subsequence of the recorded history".to_string(),
                    details: vec![format!(
                        "missing {:?} {}:{} after position {cursor}",
                        wanted.kind, wanted.server, wanted.name
                    )],
                }
            }
        }
    }
    AssertionVerdict {
        passed: true,
        reason: "call order matched as a subsequence".to_string(),
        details: vec![],
    }
}

fn no_duplicate_calls(history: &CallHistory) -> AssertionVerdict {
    let mut seen: HashMap<(String, String, String), usize> = HashMap::new();
    for call in &history.tool_calls {
        let fingerprint = (
            call.record.server_name.clone(),
            call.tool_name.clone(),
            normalize_arguments(&call.request),
        );
        *seen.entry(fingerprint).or_insert(0) += 1;
    }
    let duplicates: Vec<String> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|((server, tool, _), count)| format!("{server}:{tool} called {count} times with identical arguments"))
        .collect();
    if duplicates.is_empty() {
        AssertionVerdict {
            passed: true,
            reason: "no duplicate tool calls".to_string(),
            details: vec![],
        }
    } else {
        AssertionVerdict {
            passed: false,
            reason: "duplicate tool calls detected".to_string(),
            details: duplicates,
        }
    }
}

fn normalize_arguments(value: &serde_json::Value) -> String {
    // serde_json's default `Map` is a `BTreeMap` (the `preserve_order`
    // feature is not enabled), so object keys already serialize in
    // sorted order — this string is a stable fingerprint of `value`.
    serde_json::to_string(value).unwrap_or_default()
}

fn invalid_pattern_verdict(err: &str) -> AssertionVerdict {
    AssertionVerdict {
        passed: false,
        reason: err.to_string(),
        details: vec![],
    }
}

fn describe_tool_target(target: &ToolTarget) -> String {
    match (&target.tool, &target.tool_pattern) {
        (Some(name), _) => format!("{}:{}", target.server, name),
        (None, Some(pattern)) => format!("{}:~{}", target.server, pattern),
        (None, None) => format!("{}:*", target.server),
    }
}

fn describe_resource_target(target: &ResourceTarget) -> String {
    match (&target.uri, &target.uri_pattern) {
        (Some(uri), _) => format!("{}:{}", target.server, uri),
        (None, Some(pattern)) => format!("{}:~{}", target.server, pattern),
        (None, None) => format!("{}:*", target.server),
    }
}

fn describe_prompt_target(target: &PromptTarget) -> String {
    match (&target.prompt, &target.prompt_pattern) {
        (Some(name), _) => format!("{}:{}", target.server, name),
        (None, Some(pattern)) => format!("{}:~{}", target.server, pattern),
        (None, None) => format!("{}:*", target.server),
    }
}
