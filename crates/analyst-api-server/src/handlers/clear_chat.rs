use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;

use super::required;
use crate::models::analysis::{ClearChatRequest, ClearChatResponse};
use crate::services::AnalysisService;
use crate::utils::error::ApiError;

pub async fn clear_chat_handler(
    State(service): State<Arc<AnalysisService>>,
    payload: Result<Json<ClearChatRequest>, JsonRejection>,
) -> Result<Json<ClearChatResponse>, ApiError> {
    let Json(request) = payload?;
    let session_id = required(request.session_id, "session_id")?;

    let cleared = service.clear_chat(&session_id);

    Ok(Json(ClearChatResponse {
        status: "success".to_string(),
        message: format!("Chat history cleared ({cleared} exchanges)"),
        session_id,
        cleared,
    }))
}
