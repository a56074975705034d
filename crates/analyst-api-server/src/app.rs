use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::config::Settings;
use crate::handlers;
use crate::services::{AnalysisService, LlmService, PromptLoader, ReliableProvider, SiteCrawler};
use crate::sessions::{SessionStore, StoreLimits};
use crate::state::AppState;
use crate::utils::limiters::Limiters;

/// Wires the session store, model client and helpers from settings.
pub fn build_state(settings: Settings) -> Result<AppState> {
    let sessions = SessionStore::new(StoreLimits::from(&settings.sessions));

    let llm_service =
        LlmService::new(settings.llm.clone()).context("Failed to create model provider client")?;
    let llm = Arc::new(ReliableProvider::from_config(llm_service, &settings.llm));

    let prompts =
        PromptLoader::new(settings.prompts.clone()).context("Failed to create prompt loader")?;
    let crawler = SiteCrawler::new(settings.crawler.clone()).context("Failed to create crawler")?;
    let limiters = Arc::new(Limiters::new(&settings.limits));

    let analysis = Arc::new(AnalysisService::new(
        sessions.clone(),
        llm,
        prompts,
        crawler,
        limiters,
        settings.sessions.max_context_chars,
    ));

    Ok(AppState {
        settings: Arc::new(settings),
        sessions,
        analysis,
    })
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.settings.server.body_limit_bytes;

    Router::new()
        .route("/ping", get(handlers::health::ping))
        .route("/analyze", post(handlers::analyze::analyze_handler))
        .route("/followup", post(handlers::followup::followup_handler))
        .route("/clear-chat", post(handlers::clear_chat::clear_chat_handler))
        .with_state(state)
        // Browser front-end calls the API directly
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(DefaultBodyLimit::max(body_limit))
}
