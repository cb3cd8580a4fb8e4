//! MCP tools for branchable sequential thinking.
//!
//! Every tool locks the one [`ThinkingSession`], so calls are applied strictly
//! one after another.

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thinking_core::{
    storage_from_config, Branch, Snapshot, SubmitThought, ThinkingConfig, ThinkingError,
    ThinkingSession, MAIN_BRANCH,
};
use thinking_protocol::{
    BranchAction, BranchRequest, ErrorEnvelope, HistoryRequest, ProvideInputRequest,
    SnapshotAction, SnapshotRequest, ThinkRequest,
};
use tokio::sync::Mutex;

struct ServiceState {
    session: Mutex<ThinkingSession>,
}

#[derive(Clone)]
pub struct ThinkingService {
    tool_router: ToolRouter<Self>,
    state: Arc<ServiceState>,
}

impl ThinkingService {
    pub async fn new(config: ThinkingConfig) -> Self {
        let storage = storage_from_config(&config.storage);
        Self::with_session(ThinkingSession::open(config, storage).await)
    }

    pub fn with_session(session: ThinkingSession) -> Self {
        Self {
            tool_router: Self::tool_router(),
            state: Arc::new(ServiceState {
                session: Mutex::new(session),
            }),
        }
    }
}

#[tool_handler]
impl ServerHandler for ThinkingService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("Structured step-by-step reasoning with branches. Submit each step with 'sequential_thinking'; the response flags repeated reasoning (cycles) and asks for reflection at checkpoints. Answer checkpoints with 'provide_input'. Use 'branch' to fork, switch, compare and merge lines of reasoning, 'history' to read them back, and 'snapshot'/'reset' to save or clear state.".into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Result helpers
// ============================================================================

fn json_result<T: Serialize>(value: &T) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )])
}

fn tool_error_envelope(envelope: ErrorEnvelope) -> CallToolResult {
    CallToolResult::error(vec![Content::text(
        serde_json::to_string_pretty(&envelope).unwrap_or_default(),
    )])
}

fn invalid_request(message: impl Into<String>) -> CallToolResult {
    tool_error_envelope(ErrorEnvelope::new("invalid_request", "validation", message))
}

fn thinking_error(err: &ThinkingError) -> CallToolResult {
    let envelope = ErrorEnvelope::new(err.code(), err.kind().as_str(), err.to_string());
    let envelope = match err {
        ThinkingError::UnknownBranch(_) => envelope.with_next_action(
            "branch",
            json!({ "action": "list" }),
            "see which branches exist",
        ),
        ThinkingError::BranchLimitExceeded { limit } => envelope
            .with_hint("Remove or merge a branch before forking another")
            .with_details(json!({ "limit": limit }))
            .with_next_action("branch", json!({ "action": "list" }), "pick a branch to remove"),
        ThinkingError::NoCommonAncestor {
            source_id,
            target_id,
        } => envelope
            .with_hint("Only branches that share at least one thought can be merged")
            .with_details(json!({ "source": source_id, "target": target_id }))
            .with_next_action(
                "branch",
                json!({ "action": "compare", "source": source_id, "target": target_id }),
                "see which thoughts each branch holds",
            ),
        ThinkingError::ProtectedBranch(_) => {
            envelope.with_hint("The main branch can be cleared but not removed")
        }
        ThinkingError::NoPendingInput => envelope.with_hint(
            "Input is only accepted while a reflection checkpoint is pending",
        ),
        ThinkingError::RevisionWithoutTarget => envelope
            .with_hint("Set revises_sequence to a sequence number listed on the branch")
            .with_next_action("history", json!({}), "see which sequence numbers exist"),
        _ => envelope,
    };
    tool_error_envelope(envelope)
}

fn required<'a>(value: &'a Option<String>, field: &str, action: BranchAction) -> Result<&'a str, CallToolResult> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| invalid_request(format!("'{field}' is required for action '{}'", action.as_str())))
}

fn submit_from_request(request: ThinkRequest) -> SubmitThought {
    SubmitThought {
        text: request.text,
        sequence_number: request.sequence_number,
        total_thoughts: request.total_thoughts,
        next_thought_needed: request.next_thought_needed,
        branch_id: request.branch_id,
        branch_from_sequence: request.branch_from_sequence,
        is_revision: request.is_revision.unwrap_or(false),
        revises_sequence: request.revises_sequence,
        score: request.score,
        request_reflection: request.request_reflection.unwrap_or(false),
    }
}

#[derive(Serialize)]
struct SwitchResult<'a> {
    active_branch: &'a str,
    branch: &'a Branch,
}

// ============================================================================
// Tool Implementations
// ============================================================================

#[tool_router]
impl ThinkingService {
    #[tool(description = "Record one reasoning step. Reports whether it repeats earlier reasoning (cycle), which branch it landed on, and whether a reflection checkpoint is due. Passing an unknown branch_id forks a new branch from the active one.")]
    pub async fn sequential_thinking(
        &self,
        Parameters(request): Parameters<ThinkRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut session = self.state.session.lock().await;
        match session.submit_thought(submit_from_request(request)).await {
            Ok(outcome) => Ok(json_result(&outcome)),
            Err(err) => Ok(thinking_error(&err)),
        }
    }

    #[tool(description = "Manage reasoning branches: list, fork, switch, merge, compare, remove, clear.")]
    pub async fn branch(
        &self,
        Parameters(request): Parameters<BranchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let action = request.action;
        let mut session = self.state.session.lock().await;
        let result = match action {
            BranchAction::List => return Ok(json_result(&session.overview())),
            BranchAction::Fork => {
                let id = match required(&request.branch_id, "branch_id", action) {
                    Ok(id) => id,
                    Err(result) => return Ok(result),
                };
                session
                    .fork_branch(id, request.from_sequence)
                    .await
                    .map(|forked| json_result(&forked))
            }
            BranchAction::Switch => {
                let id = match required(&request.branch_id, "branch_id", action) {
                    Ok(id) => id,
                    Err(result) => return Ok(result),
                };
                session.switch_branch(id).map(|branch| {
                    json_result(&SwitchResult {
                        active_branch: &branch.id,
                        branch,
                    })
                })
            }
            BranchAction::Merge => {
                let source = request.source.clone().or_else(|| request.branch_id.clone());
                let source = match required(&source, "source", action) {
                    Ok(id) => id,
                    Err(result) => return Ok(result),
                };
                let target = request
                    .target
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .unwrap_or(MAIN_BRANCH);
                session
                    .merge_branches(source, target)
                    .await
                    .map(|merged| json_result(&merged))
            }
            BranchAction::Compare => {
                let source = match required(&request.source, "source", action) {
                    Ok(id) => id,
                    Err(result) => return Ok(result),
                };
                let target = request
                    .target
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .unwrap_or(MAIN_BRANCH);
                session
                    .compare_branches(source, target)
                    .map(|comparison| json_result(&comparison))
            }
            BranchAction::Remove => {
                let id = match required(&request.branch_id, "branch_id", action) {
                    Ok(id) => id,
                    Err(result) => return Ok(result),
                };
                session
                    .remove_branch(id)
                    .await
                    .map(|removed| json_result(&removed))
            }
            BranchAction::Clear => {
                let id = request
                    .branch_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| session.tree().active().to_string());
                session
                    .clear_branch(&id)
                    .await
                    .map(|cleared| json_result(&cleared))
            }
        };
        Ok(result.unwrap_or_else(|err| thinking_error(&err)))
    }

    #[tool(description = "Read back the thoughts of a branch (default: active) in order.")]
    pub async fn history(
        &self,
        Parameters(request): Parameters<HistoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.state.session.lock().await;
        let branch_id = request.branch_id.as_deref().map(str::trim);
        match session.history(branch_id, request.own_only.unwrap_or(false)) {
            Ok(mut history) => {
                if let Some(limit) = request.limit {
                    let skip = history.thoughts.len().saturating_sub(limit);
                    history.thoughts.drain(..skip);
                }
                Ok(json_result(&history))
            }
            Err(err) => Ok(thinking_error(&err)),
        }
    }

    #[tool(description = "Answer the pending reflection checkpoint and return its branch to active.")]
    pub async fn provide_input(
        &self,
        Parameters(request): Parameters<ProvideInputRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.response.trim().is_empty() {
            return Ok(invalid_request("'response' must not be empty"));
        }
        let mut session = self.state.session.lock().await;
        match session.provide_input(request.request_id.as_deref(), &request.response) {
            Ok(receipt) => Ok(json_result(&receipt)),
            Err(err) => Ok(thinking_error(&err)),
        }
    }

    #[tool(description = "Export all thoughts and branches as JSON, or import such a document to replace the current state.")]
    pub async fn snapshot(
        &self,
        Parameters(request): Parameters<SnapshotRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut session = self.state.session.lock().await;
        match request.action {
            SnapshotAction::Export => Ok(json_result(&session.export())),
            SnapshotAction::Import => {
                let Some(raw) = request.snapshot else {
                    return Ok(invalid_request("'snapshot' is required for action 'import'"));
                };
                let snapshot: Snapshot = match serde_json::from_value(raw) {
                    Ok(snapshot) => snapshot,
                    Err(err) => return Ok(invalid_request(format!("Invalid snapshot: {err}"))),
                };
                Ok(json_result(&session.import(snapshot).await))
            }
        }
    }

    #[tool(description = "Clear every thought and branch, in memory and in storage.")]
    pub async fn reset(&self) -> Result<CallToolResult, McpError> {
        let mut session = self.state.session.lock().await;
        Ok(json_result(&session.reset().await))
    }
}
