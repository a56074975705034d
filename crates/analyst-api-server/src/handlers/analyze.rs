use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;

use super::required;
use crate::models::analysis::{AnalyzeRequest, AnalyzeResponse};
use crate::services::AnalysisService;
use crate::utils::error::ApiError;

pub async fn analyze_handler(
    State(service): State<Arc<AnalysisService>>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let Json(request) = payload?;
    let site_url = required(request.site_url, "site_url")?;

    let outcome = service
        .analyze(&site_url, request.session_id.as_deref())
        .await?;

    Ok(Json(AnalyzeResponse {
        session_id: outcome.session_id,
        result: outcome.result,
        pages: outcome.pages,
    }))
}
