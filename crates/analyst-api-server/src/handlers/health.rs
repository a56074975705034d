use axum::{extract::State, http::StatusCode, Json};

use crate::models::analysis::PingResponse;
use crate::sessions::SessionStore;

pub async fn ping(State(sessions): State<SessionStore>) -> (StatusCode, Json<PingResponse>) {
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "alive".to_string(),
            timestamp: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            sessions: sessions.len(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
