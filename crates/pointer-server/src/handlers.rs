//! JSON handlers for the message and quick-edit API.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use pointer_core::ids::{ConversationId, MessageId, ProjectId};
use pointer_engine::EngineError;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    pub message_id: MessageId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub project_id: ProjectId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    pub message_ids: Vec<MessageId>,
    /// Whether anything was processing.
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickEditRequest {
    #[serde(default)]
    pub selected_code: String,
    #[serde(default)]
    pub full_code: String,
    #[serde(default)]
    pub instruction: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickEditResponse {
    pub edited_code: String,
}

/// Engine errors mapped onto HTTP statuses.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::EmptyMessage | EngineError::MissingField(_) => StatusCode::BAD_REQUEST,
            EngineError::Store(_) | EngineError::Workflow(_) | EngineError::Provider(_) => {
                tracing::error!(error = %self.0, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({ "success": false, "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let submission = state
        .service
        .send_message(&request.conversation_id, &request.message)
        .await?;
    Ok(Json(SendMessageResponse {
        success: true,
        message_id: submission.message_id,
    }))
}

pub async fn cancel_messages(
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let message_ids = state.service.cancel_project(&request.project_id).await?;
    Ok(Json(CancelResponse {
        success: true,
        cancelled: !message_ids.is_empty(),
        message_ids,
    }))
}

pub async fn quick_edit(
    State(state): State<AppState>,
    Json(request): Json<QuickEditRequest>,
) -> Result<Json<QuickEditResponse>, ApiError> {
    let edited_code = state
        .quick_edit
        .quick_edit(&request.selected_code, &request.full_code, &request.instruction)
        .await?;
    Ok(Json(QuickEditResponse { edited_code }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.service.engine().active_count();
    (
        StatusCode::OK,
        Json(json!({ "status": "healthy", "activeTurns": active })),
    )
}
