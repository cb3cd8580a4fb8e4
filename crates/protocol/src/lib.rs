use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ToolNextAction {
    pub tool: String,
    pub args: serde_json::Value,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    /// `validation`, `state` or `internal`
    pub kind: String,
    pub details: Option<serde_json::Value>,
    pub hint: Option<String>,
    #[serde(default)]
    pub next_actions: Vec<ToolNextAction>,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind: kind.into(),
            details: None,
            hint: None,
            next_actions: Vec::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_next_action(
        mut self,
        tool: impl Into<String>,
        args: serde_json::Value,
        reason: impl Into<String>,
    ) -> Self {
        self.next_actions.push(ToolNextAction {
            tool: tool.into(),
            args,
            reason: reason.into(),
        });
        self
    }
}

// ============================================================================
// Tool requests
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct ThinkRequest {
    /// The reasoning step
    #[serde(alias = "thought")]
    #[schemars(description = "Text of this reasoning step")]
    pub text: String,

    #[serde(alias = "thought_number")]
    #[schemars(description = "1-based position of this thought")]
    pub sequence_number: i64,

    #[schemars(description = "Current estimate of how many thoughts are needed; raised automatically if exceeded")]
    pub total_thoughts: i64,

    #[schemars(description = "Whether another thought should follow this one")]
    pub next_thought_needed: bool,

    #[serde(default)]
    #[schemars(description = "Branch to record on (default: active branch). Unknown ids fork a new branch")]
    pub branch_id: Option<String>,

    #[serde(default)]
    #[schemars(description = "When forking a new branch, the sequence number to fork from (default: tip of the active branch)")]
    pub branch_from_sequence: Option<i64>,

    #[serde(default)]
    #[schemars(description = "Marks this thought as a revision of an earlier one")]
    pub is_revision: Option<bool>,

    #[serde(default)]
    #[schemars(description = "Sequence number being revised (required with is_revision); that slot is rewritten in place")]
    pub revises_sequence: Option<i64>,

    #[serde(default)]
    #[schemars(description = "Self-assessed quality 0-10 (default 5)")]
    pub score: Option<f64>,

    #[serde(default)]
    #[schemars(description = "Ask for a reflection checkpoint after this thought")]
    pub request_reflection: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BranchAction {
    List,
    Fork,
    Switch,
    Merge,
    Compare,
    Remove,
    Clear,
}

impl BranchAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Fork => "fork",
            Self::Switch => "switch",
            Self::Merge => "merge",
            Self::Compare => "compare",
            Self::Remove => "remove",
            Self::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct BranchRequest {
    #[schemars(description = "One of: list, fork, switch, merge, compare, remove, clear")]
    pub action: BranchAction,

    #[serde(default)]
    #[schemars(description = "Branch to fork, switch to, remove or clear")]
    pub branch_id: Option<String>,

    #[serde(default)]
    #[schemars(description = "Fork point on the active branch (fork only)")]
    pub from_sequence: Option<i64>,

    #[serde(default)]
    #[schemars(description = "Source branch (merge, compare)")]
    pub source: Option<String>,

    #[serde(default)]
    #[schemars(description = "Target branch (merge, compare; merge defaults to main)")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct HistoryRequest {
    #[serde(default)]
    #[schemars(description = "Branch to read (default: active branch)")]
    pub branch_id: Option<String>,

    #[serde(default)]
    #[schemars(description = "Only thoughts submitted on this branch, without inherited ones")]
    pub own_only: Option<bool>,

    #[serde(default)]
    #[schemars(description = "Return at most this many of the most recent thoughts")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ProvideInputRequest {
    #[schemars(description = "Answer to the pending reflection prompts")]
    pub response: String,

    #[serde(default)]
    #[schemars(description = "Id of the pending request being answered (optional)")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotAction {
    Export,
    Import,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct SnapshotRequest {
    #[schemars(description = "export returns the full state; import replaces it")]
    pub action: SnapshotAction,

    #[serde(default)]
    #[schemars(description = "Snapshot document previously returned by export (import only)")]
    pub snapshot: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn think_request_accepts_sequential_thinking_names() {
        let request: ThinkRequest = serde_json::from_value(json!({
            "thought": "first step",
            "thought_number": 1,
            "total_thoughts": 3,
            "next_thought_needed": true,
        }))
        .expect("parse");
        assert_eq!(request.text, "first step");
        assert_eq!(request.sequence_number, 1);
        assert_eq!(request.branch_id, None);
        assert_eq!(request.is_revision, None);
    }

    #[test]
    fn negative_numbers_reach_validation() {
        let request: ThinkRequest = serde_json::from_value(json!({
            "text": "x",
            "sequence_number": -4,
            "total_thoughts": 0,
            "next_thought_needed": false,
        }))
        .expect("parse");
        assert_eq!(request.sequence_number, -4);
    }

    #[test]
    fn branch_actions_are_snake_case() {
        let request: BranchRequest =
            serde_json::from_value(json!({ "action": "merge", "source": "alt" })).expect("parse");
        assert_eq!(request.action, BranchAction::Merge);
        assert_eq!(request.action.as_str(), "merge");
        assert!(serde_json::from_value::<BranchRequest>(json!({ "action": "rebase" })).is_err());
    }

    #[test]
    fn envelope_serializes_next_actions() {
        let envelope = ErrorEnvelope::new("unknown_branch", "state", "Unknown branch: ghost")
            .with_hint("List branches first")
            .with_next_action("branch", json!({ "action": "list" }), "see existing branches");
        let value = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(value["kind"], "state");
        assert_eq!(value["next_actions"][0]["tool"], "branch");

        let back: ErrorEnvelope = serde_json::from_value(value).expect("parse");
        assert_eq!(back, envelope);
    }
}
