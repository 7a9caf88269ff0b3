use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use switchboard_core::collaborators::UpdateSink;
use switchboard_core::ids::{ApprovalId, ChannelId, NoticeKey};
use switchboard_engine::{
    ChannelState, DecisionReason, EngineError, PendingApprovalInfo, RunRequest, RunTicket,
    SignalOutcome,
};

use crate::server::AppState;
use crate::ws;

/// Error body: `{"error": message, "kind": kind}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::ChannelBusy(_) => StatusCode::CONFLICT,
            EngineError::Collaborator(_) | EngineError::Approval(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Spawn(_) | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: e.error_kind(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    pub prompt: String,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Deserialize)]
pub struct SignalBody {
    pub responder: String,
    pub approved: bool,
}

/// What the agent's permission hook posts.
#[derive(Debug, Deserialize)]
pub struct HookRequest {
    pub channel_id: ChannelId,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
}

/// Answer in the agent's permission-prompt format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum HookResponse {
    Allow {
        #[serde(rename = "updatedInput")]
        updated_input: Value,
    },
    Deny {
        message: String,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
}

fn deny_message(reason: DecisionReason) -> &'static str {
    match reason {
        DecisionReason::UserDenied => "Denied by the user",
        DecisionReason::TimedOut => "No answer before the approval timed out",
        DecisionReason::Fallback => "No approver could be reached",
        DecisionReason::Cancelled => "The run was stopped",
        DecisionReason::SafeTool | DecisionReason::UserApproved => "Denied",
    }
}

fn signal_status(outcome: SignalOutcome) -> StatusCode {
    match outcome {
        SignalOutcome::Resolved => StatusCode::OK,
        SignalOutcome::NotFound => StatusCode::NOT_FOUND,
        SignalOutcome::WrongResponder => StatusCode::FORBIDDEN,
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "active_channels": state.orchestrator.registry().active_count(),
        "pending_approvals": state.orchestrator.broker().pending_count(),
        "listeners": state.sink.subscriber_count(),
    }))
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<RunTicket>), ApiError> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    let sink: Arc<dyn UpdateSink> = Arc::new(state.sink.clone());
    let ticket = state
        .orchestrator
        .submit(RunRequest {
            channel: channel_id,
            prompt: body.prompt,
            requester: body.requester,
            folder: body.folder,
            display_name: body.display_name,
            sink,
            replace: body.replace,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

pub async fn stop_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
) -> Json<Value> {
    let stopped = state.orchestrator.stop(&channel_id).await;
    Json(json!({ "stopped": stopped }))
}

pub async fn reset_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
) -> Json<Value> {
    let was_active = state.orchestrator.reset(&channel_id).await;
    Json(json!({ "cleared": true, "was_active": was_active }))
}

pub async fn channel_state(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
) -> Json<ChannelState> {
    Json(state.orchestrator.state(&channel_id))
}

pub async fn list_approvals(State(state): State<AppState>) -> Json<Vec<PendingApprovalInfo>> {
    Json(state.orchestrator.broker().pending())
}

pub async fn resolve_approval(
    State(state): State<AppState>,
    Path(request_id): Path<ApprovalId>,
    Json(body): Json<SignalBody>,
) -> (StatusCode, Json<Value>) {
    let outcome = state
        .orchestrator
        .broker()
        .resolve(&request_id, &body.responder, body.approved);
    (signal_status(outcome), Json(json!({ "outcome": outcome })))
}

pub async fn resolve_notice(
    State(state): State<AppState>,
    Path(notice_key): Path<NoticeKey>,
    Json(body): Json<SignalBody>,
) -> (StatusCode, Json<Value>) {
    let outcome = state.orchestrator.broker().resolve_by_external_signal(
        &notice_key,
        &body.responder,
        body.approved,
    );
    (signal_status(outcome), Json(json!({ "outcome": outcome })))
}

/// Blocks until the human (or the timeout) decides.
pub async fn permission_hook(
    State(state): State<AppState>,
    Json(request): Json<HookRequest>,
) -> Json<HookResponse> {
    let HookRequest {
        channel_id,
        tool_name,
        input,
    } = request;
    let decision = state
        .orchestrator
        .request_permission(&channel_id, &tool_name, input.clone())
        .await;
    let response = match decision {
        Ok(decision) if decision.allowed => HookResponse::Allow {
            updated_input: input,
        },
        Ok(decision) => HookResponse::Deny {
            message: deny_message(decision.reason).to_string(),
        },
        Err(e) => {
            warn!(channel_id = %channel_id, tool_name = %tool_name, error = %e, "permission request failed");
            HookResponse::Deny {
                message: "Switchboard is shutting down".to_string(),
            }
        }
    };
    info!(channel_id = %channel_id, tool_name = %tool_name, allowed = matches!(response, HookResponse::Allow { .. }), "permission hook answered");
    Json(response)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let updates = state.sink.subscribe();
    ws.on_upgrade(move |socket| ws::handle_ws_connection(socket, updates, query.channel_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_response_matches_permission_prompt_format() {
        let allow = serde_json::to_value(HookResponse::Allow {
            updated_input: json!({"command": "ls"}),
        })
        .unwrap();
        assert_eq!(allow, json!({"behavior": "allow", "updatedInput": {"command": "ls"}}));

        let deny = serde_json::to_value(HookResponse::Deny {
            message: "no".into(),
        })
        .unwrap();
        assert_eq!(deny, json!({"behavior": "deny", "message": "no"}));
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        let busy = ApiError::from(EngineError::ChannelBusy(ChannelId::from_raw("C1")));
        assert_eq!(busy.status, StatusCode::CONFLICT);
        assert_eq!(busy.kind, "channel_busy");

        let spawn = ApiError::from(EngineError::Spawn("no such dir".into()));
        assert_eq!(spawn.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn hook_request_input_is_optional() {
        let req: HookRequest =
            serde_json::from_value(json!({"channel_id": "C1", "tool_name": "Bash"})).unwrap();
        assert_eq!(req.input, Value::Null);
    }
}
