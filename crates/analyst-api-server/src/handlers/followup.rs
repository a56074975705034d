use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;

use super::required;
use crate::models::analysis::{FollowupRequest, FollowupResponse};
use crate::services::AnalysisService;
use crate::utils::error::ApiError;

pub async fn followup_handler(
    State(service): State<Arc<AnalysisService>>,
    payload: Result<Json<FollowupRequest>, JsonRejection>,
) -> Result<Json<FollowupResponse>, ApiError> {
    let Json(request) = payload?;
    let session_id = required(request.session_id, "session_id")?;
    let instruction = required(request.followup_prompt, "followup_prompt")?;

    let outcome = service.followup(&session_id, &instruction).await?;

    Ok(Json(FollowupResponse {
        session_id: outcome.session_id,
        result: outcome.result,
        history_len: outcome.history_len,
    }))
}
