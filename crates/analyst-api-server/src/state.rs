use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Settings;
use crate::services::AnalysisService;
use crate::sessions::SessionStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: SessionStore,
    pub analysis: Arc<AnalysisService>,
}

impl FromRef<AppState> for SessionStore {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for Arc<AnalysisService> {
    fn from_ref(state: &AppState) -> Self {
        state.analysis.clone()
    }
}
