//! Spec file data model: [`AgentSpec`], [`TaskSpec`], [`EvalSpec`],
//! [`TaskAssertions`], and the [`EvalResult`] output shape.

use serde::{Deserialize, Serialize};

use crate::config::parse_json_or_yaml;
use crate::error::{McpBenchError, McpBenchResult};
use crate::history::CallHistory;

/// `easy` | `medium` | `hard`, or unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// `metadata.name` / `metadata.difficulty` shared by task files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub name: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

/// A single script step: exactly one of `inline` or `file`.
///
/// Deserialized permissively (both fields optional) and validated with
/// [`Step::validate`] immediately after parsing, matching the load-time
/// "conflicting fields on a step" configuration error from §7.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub inline: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    /// Overrides the 5-minute default timeout for this step.
    #[serde(default, rename = "timeoutSeconds")]
    pub timeout_seconds: Option<u64>,
    /// Downgrade a non-zero exit to a failed `StepOutput` instead of
    /// raising a task error.
    #[serde(default, rename = "continueOnError")]
    pub continue_on_error: bool,
    /// Extra environment set for the duration of this step only.
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

impl Step {
    /// Reject a step that declares both `inline` and `file`, or neither.
    pub fn validate(&self, field_name: &str) -> McpBenchResult<()> {
        match (&self.inline, &self.file) {
            (Some(_), Some(_)) => Err(McpBenchError::Config(format!(
                "{field_name}: both inline and file set, exactly one is required"
            ))),
            (None, None) => Err(McpBenchError::Config(format!(
                "{field_name}.inline or {field_name}.file must be set"
            ))),
            _ => Ok(()),
        }
    }
}

/// The four lifecycle steps of a task. `setup`/`cleanup` are optional;
/// `prompt`/`verify` are mandatory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSteps {
    #[serde(default)]
    pub setup: Option<Step>,
    pub prompt: Step,
    pub verify: Step,
    #[serde(default)]
    pub cleanup: Option<Step>,
}

/// A `kind: Task` spec file (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: String,
    pub metadata: TaskMetadata,
    pub steps: TaskSteps,
}

impl TaskSpec {
    /// Parse and validate a `TaskSpec` document, enforcing the
    /// `kind: Task` discriminator and the per-step inline/file invariant.
    ///
    /// Assertions belong on the owning `TaskSet`, not the task file
    /// itself (§9 Open Question 2); a task file that also declares an
    /// `assertions` block is rejected here rather than silently ignored
    /// or merged.
    pub fn from_str(text: &str) -> McpBenchResult<Self> {
        let raw: serde_json::Value = parse_json_or_yaml(text)?;
        if raw.get("assertions").is_some() {
            return Err(McpBenchError::Config(
                "assertions must be declared on the task set, not the task".to_string(),
            ));
        }
        let spec: TaskSpec = serde_json::from_value(raw)
            .map_err(|e| McpBenchError::Config(format!("invalid task spec: {e}")))?;
        if spec.kind != "Task" {
            return Err(McpBenchError::Config(format!(
                "expected kind: Task, got '{}'",
                spec.kind
            )));
        }
        if let Some(setup) = &spec.steps.setup {
            setup.validate("steps.setup")?;
        }
        spec.steps.prompt.validate("steps.prompt")?;
        spec.steps.verify.validate("steps.verify")?;
        if let Some(cleanup) = &spec.steps.cleanup {
            cleanup.validate("steps.cleanup")?;
        }
        Ok(spec)
    }
}

/// A `kind: Agent` spec file (§3, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub kind: String,
    /// Applied once per generated MCP config file, field `{File}`.
    #[serde(rename = "argTemplateMcpServer")]
    pub arg_template_mcp_server: String,
    /// Applied once per allowed tool, fields `{ServerName}`, `{ToolName}`.
    #[serde(rename = "argTemplateAllowedTools")]
    pub arg_template_allowed_tools: String,
    /// Top-level command template, fields `{McpServerFileArgs}`,
    /// `{AllowedToolArgs}`, `{Prompt}`.
    #[serde(rename = "runPrompt")]
    pub run_prompt: String,
    /// Separator used to join expanded `argTemplateAllowedTools` results.
    #[serde(default = "default_join_separator", rename = "allowedToolsJoinSeparator")]
    pub allowed_tools_join_separator: String,
    /// Request an isolated `$HOME` for the agent subprocess.
    #[serde(default, rename = "isolatedHome")]
    pub isolated_home: bool,
}

fn default_join_separator() -> String {
    " ".to_string()
}

impl AgentSpec {
    /// Parse and validate an `AgentSpec` document.
    pub fn from_str(text: &str) -> McpBenchResult<Self> {
        let spec: AgentSpec = parse_json_or_yaml(text)?;
        if spec.kind != "Agent" {
            return Err(McpBenchError::Config(format!(
                "expected kind: Agent, got '{}'",
                spec.kind
            )));
        }
        for (field_name, template) in [
            ("argTemplateMcpServer", &spec.arg_template_mcp_server),
            ("argTemplateAllowedTools", &spec.arg_template_allowed_tools),
            ("runPrompt", &spec.run_prompt),
        ] {
            validate_template_fields(field_name, template)?;
        }
        Ok(spec)
    }
}

const KNOWN_TEMPLATE_FIELDS: &[&str] = &[
    "File",
    "ServerName",
    "ToolName",
    "McpServerFileArgs",
    "AllowedToolArgs",
    "Prompt",
];

/// Reject templates referencing unknown `{Field}` placeholders at parse
/// time rather than at expansion time (§9 Templating).
fn validate_template_fields(field_name: &str, template: &str) -> McpBenchResult<()> {
    static FIELD_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = FIELD_RE.get_or_init(|| {
        regex::Regex::new(r"\{([^{}]*)\}").expect("static template-field pattern is valid")
    });

    for caps in re.captures_iter(template) {
        let name = &caps[1];
        if !KNOWN_TEMPLATE_FIELDS.contains(&name) {
            return Err(McpBenchError::Config(format!(
                "{field_name}: unknown template field '{{{name}}}'"
            )));
        }
    }
    if template.matches('{').count() != template.matches('}').count() {
        return Err(McpBenchError::Config(format!(
            "{field_name}: unterminated '{{' in template"
        )));
    }
    Ok(())
}

/// `server` + exact/regex/any target, shared shape across the `tools*`
/// predicates (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTarget {
    pub server: String,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default, rename = "toolPattern")]
    pub tool_pattern: Option<String>,
}

/// `server` + exact/regex/any target for `resources*` predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTarget {
    pub server: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default, rename = "uriPattern")]
    pub uri_pattern: Option<String>,
}

/// `server` + exact/regex/any target for `prompts*` predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTarget {
    pub server: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, rename = "promptPattern")]
    pub prompt_pattern: Option<String>,
}

/// Which of the three recorded kinds a `callOrder` entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Tool,
    Resource,
    Prompt,
}

/// One entry in a `callOrder` assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOrderEntry {
    #[serde(rename = "type")]
    pub kind: CallKind,
    pub server: String,
    pub name: String,
}

/// The declarative predicate set evaluated against a [`CallHistory`]
/// (§4.8). Every field is optional; absence of the whole struct means
/// "no assertions", vacuously true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskAssertions {
    #[serde(default, rename = "toolsUsed")]
    pub tools_used: Option<Vec<ToolTarget>>,
    #[serde(default, rename = "requireAny")]
    pub require_any: Option<Vec<ToolTarget>>,
    #[serde(default, rename = "toolsNotUsed")]
    pub tools_not_used: Option<Vec<ToolTarget>>,
    #[serde(default, rename = "minToolCalls")]
    pub min_tool_calls: Option<usize>,
    #[serde(default, rename = "maxToolCalls")]
    pub max_tool_calls: Option<usize>,
    #[serde(default, rename = "resourcesRead")]
    pub resources_read: Option<Vec<ResourceTarget>>,
    #[serde(default, rename = "resourcesNotRead")]
    pub resources_not_read: Option<Vec<ResourceTarget>>,
    #[serde(default, rename = "promptsUsed")]
    pub prompts_used: Option<Vec<PromptTarget>>,
    #[serde(default, rename = "promptsNotUsed")]
    pub prompts_not_used: Option<Vec<PromptTarget>>,
    #[serde(default, rename = "callOrder")]
    pub call_order: Option<Vec<CallOrderEntry>>,
    #[serde(default, rename = "noDuplicateCalls")]
    pub no_duplicate_calls: Option<bool>,
}

/// One TaskSet: a path-or-glob selector plus an optional shared
/// assertion set (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSet {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub glob: Option<String>,
    #[serde(default)]
    pub assertions: Option<TaskAssertions>,
}

impl TaskSet {
    /// Reject a TaskSet declaring both or neither of `path`/`glob`.
    pub fn validate(&self) -> McpBenchResult<()> {
        match (&self.path, &self.glob) {
            (Some(_), Some(_)) => Err(McpBenchError::Config(
                "taskSet: exactly one of path or glob is required, both set".into(),
            )),
            (None, None) => Err(McpBenchError::Config(
                "taskSet: exactly one of path or glob is required, neither set".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// `config.*` block of an eval spec file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(rename = "agentFile")]
    pub agent_file: String,
    #[serde(rename = "mcpConfigFile")]
    pub mcp_config_file: String,
    #[serde(rename = "taskSets")]
    pub task_sets: Vec<TaskSet>,
}

/// `metadata.name` of an eval spec file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalMetadata {
    pub name: String,
}

/// A `kind: Eval` spec file (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSpec {
    pub kind: String,
    pub metadata: EvalMetadata,
    pub config: EvalConfig,
}

impl EvalSpec {
    /// Parse and validate an `EvalSpec` document.
    pub fn from_str(text: &str) -> McpBenchResult<Self> {
        let spec: EvalSpec = parse_json_or_yaml(text)?;
        if spec.kind != "Eval" {
            return Err(McpBenchError::Config(format!(
                "expected kind: Eval, got '{}'",
                spec.kind
            )));
        }
        for task_set in &spec.config.task_sets {
            task_set.validate()?;
        }
        Ok(spec)
    }
}

/// Pass/fail verdict for one predicate (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionVerdict {
    pub passed: bool,
    pub reason: String,
    #[serde(default)]
    pub details: Vec<String>,
}

/// Structured verdict, one optional entry per predicate kind, mirroring
/// the shape of [`TaskAssertions`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssertionResults {
    #[serde(default, rename = "toolsUsed")]
    pub tools_used: Option<AssertionVerdict>,
    #[serde(default, rename = "requireAny")]
    pub require_any: Option<AssertionVerdict>,
    #[serde(default, rename = "toolsNotUsed")]
    pub tools_not_used: Option<AssertionVerdict>,
    #[serde(default, rename = "minToolCalls")]
    pub min_tool_calls: Option<AssertionVerdict>,
    #[serde(default, rename = "maxToolCalls")]
    pub max_tool_calls: Option<AssertionVerdict>,
    #[serde(default, rename = "resourcesRead")]
    pub resources_read: Option<AssertionVerdict>,
    #[serde(default, rename = "resourcesNotRead")]
    pub resources_not_read: Option<AssertionVerdict>,
    #[serde(default, rename = "promptsUsed")]
    pub prompts_used: Option<AssertionVerdict>,
    #[serde(default, rename = "promptsNotUsed")]
    pub prompts_not_used: Option<AssertionVerdict>,
    #[serde(default, rename = "callOrder")]
    pub call_order: Option<AssertionVerdict>,
    #[serde(default, rename = "noDuplicateCalls")]
    pub no_duplicate_calls: Option<AssertionVerdict>,
}

impl AssertionResults {
    fn entries(&self) -> [&Option<AssertionVerdict>; 10] {
        [
            &self.tools_used,
            &self.require_any,
            &self.tools_not_used,
            &self.min_tool_calls,
            &self.max_tool_calls,
            &self.resources_read,
            &self.resources_not_read,
            &self.prompts_used,
            &self.prompts_not_used,
            &self.call_order,
        ]
    }

    /// Count of non-absent sub-fields, including `noDuplicateCalls`.
    pub fn total_assertions(&self) -> usize {
        self.entries().iter().filter(|e| e.is_some()).count()
            + usize::from(self.no_duplicate_calls.is_some())
    }

    /// Count of sub-fields present and passed.
    pub fn passed_assertions(&self) -> usize {
        let mut n = self
            .entries()
            .iter()
            .filter(|e| e.as_ref().is_some_and(|v| v.passed))
            .count();
        if self.no_duplicate_calls.as_ref().is_some_and(|v| v.passed) {
            n += 1;
        }
        n
    }

    /// Conjunction of every present verdict.
    pub fn all_passed(&self) -> bool {
        self.entries().iter().all(|e| e.as_ref().is_none_or(|v| v.passed))
            && self
                .no_duplicate_calls
                .as_ref()
                .is_none_or(|v| v.passed)
    }
}

/// Per-task outcome emitted by the Eval Runner (§3, §6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    #[serde(rename = "taskName")]
    pub task_name: String,
    #[serde(rename = "taskPath")]
    pub task_path: String,
    #[serde(rename = "taskPassed")]
    pub task_passed: bool,
    /// Agent's combined stdout+stderr.
    #[serde(rename = "taskOutput")]
    pub task_output: String,
    #[serde(default, rename = "taskError")]
    pub task_error: String,
    /// `true` iff the agent subprocess itself failed to produce output.
    #[serde(rename = "agentExecutionError")]
    pub agent_execution_error: bool,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(rename = "assertionResults")]
    pub assertion_results: AssertionResults,
    #[serde(rename = "allAssertionsPassed")]
    pub all_assertions_passed: bool,
    #[serde(rename = "callHistory")]
    pub call_history: CallHistory,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn task_spec_rejects_wrong_kind() {
        let yaml = "kind: Eval\nmetadata:\n  name: x\nsteps:\n  prompt:\n    inline: echo hi\n  verify:\n    inline: exit 0\n";
        let err = TaskSpec::from_str(yaml).unwrap_err();
        assert!(matches!(err, McpBenchError::Config(_)));
    }

    #[test]
    fn task_spec_rejects_empty_prompt() {
        let yaml = "kind: Task\nmetadata:\n  name: x\nsteps:\n  prompt: {}\n  verify:\n    inline: exit 0\n";
        let err = TaskSpec::from_str(yaml).unwrap_err();
        assert!(matches!(err, McpBenchError::Config(msg) if msg.contains("prompt.inline or prompt.file")));
    }

    #[test]
    fn task_spec_rejects_conflicting_step_fields() {
        let yaml = "kind: Task\nmetadata:\n  name: x\nsteps:\n  prompt:\n    inline: hi\n    file: x.sh\n  verify:\n    inline: exit 0\n";
        let err = TaskSpec::from_str(yaml).unwrap_err();
        assert!(matches!(err, McpBenchError::Config(_)));
    }

    #[test]
    fn task_spec_parses_valid_document() {
        let yaml = "kind: Task\nmetadata:\n  name: my-task\n  difficulty: easy\nsteps:\n  prompt:\n    inline: do the thing\n  verify:\n    inline: exit 0\n";
        let spec = TaskSpec::from_str(yaml).unwrap();
        assert_eq!(spec.metadata.name, "my-task");
        assert_eq!(spec.metadata.difficulty, Some(Difficulty::Easy));
    }

    #[test]
    fn task_spec_rejects_assertions_declared_on_the_task() {
        let yaml = "kind: Task\nmetadata:\n  name: x\nsteps:\n  prompt:\n    inline: hi\n  verify:\n    inline: exit 0\nassertions:\n  toolsUsed: []\n";
        let err = TaskSpec::from_str(yaml).unwrap_err();
        assert!(matches!(
            err,
            McpBenchError::Config(msg) if msg == "assertions must be declared on the task set, not the task"
        ));
    }

    #[test]
    fn agent_spec_rejects_unknown_template_field() {
        let yaml = "kind: Agent\nargTemplateMcpServer: \"--mcp-config {Bogus}\"\nargTemplateAllowedTools: \"--allow {ToolName}\"\nrunPrompt: \"agent {Prompt}\"\n";
        let err = AgentSpec::from_str(yaml).unwrap_err();
        assert!(matches!(err, McpBenchError::Config(msg) if msg.contains("unknown template field")));
    }

    #[test]
    fn agent_spec_parses_valid_document() {
        let yaml = "kind: Agent\nargTemplateMcpServer: \"--mcp-config {File}\"\nargTemplateAllowedTools: \"--allow {ServerName}:{ToolName}\"\nrunPrompt: \"agent {McpServerFileArgs} {AllowedToolArgs} {Prompt}\"\n";
        let spec = AgentSpec::from_str(yaml).unwrap();
        assert_eq!(spec.allowed_tools_join_separator, " ");
    }

    #[test]
    fn task_set_requires_exactly_one_of_path_or_glob() {
        let both = TaskSet {
            path: Some("a".into()),
            glob: Some("b".into()),
            assertions: None,
        };
        assert!(both.validate().is_err());
        let neither = TaskSet {
            path: None,
            glob: None,
            assertions: None,
        };
        assert!(neither.validate().is_err());
        let ok = TaskSet {
            path: Some("a".into()),
            glob: None,
            assertions: None,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn assertion_results_counts_match_spec() {
        let mut results = AssertionResults::default();
        results.min_tool_calls = Some(AssertionVerdict {
            passed: true,
            reason: "ok".into(),
            details: vec![],
        });
        results.max_tool_calls = Some(AssertionVerdict {
            passed: false,
            reason: "too many".into(),
            details: vec![],
        });
        assert_eq!(results.total_assertions(), 2);
        assert_eq!(results.passed_assertions(), 1);
        assert!(!results.all_passed());
    }
}
