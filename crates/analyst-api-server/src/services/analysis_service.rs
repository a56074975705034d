use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::crawler::{parse_site_url, SiteCrawler};
use super::llm_service::LlmProvider;
use super::prompt_loader::{PromptKind, PromptLoader};
use crate::models::chat::ChatMessage;
use crate::sessions::{Exchange, ExchangeKind, SessionStore};
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub session_id: String,
    pub result: String,
    pub pages: usize,
}

#[derive(Debug, Clone)]
pub struct FollowupOutcome {
    pub session_id: String,
    pub result: String,
    pub history_len: usize,
}

/// Assembles the follow-up call: system prompt, stored exchanges in
/// insertion order, then the new instruction.
///
/// With a non-zero `max_context_chars`, the oldest exchanges are left out
/// until the replayed history fits.
pub fn build_followup_messages(
    system_prompt: &str,
    history: &[Exchange],
    instruction: &str,
    max_context_chars: usize,
) -> Vec<ChatMessage> {
    let mut start = 0;
    if max_context_chars > 0 {
        let mut total: usize = history.iter().map(Exchange::char_len).sum();
        while start < history.len() && total > max_context_chars {
            total -= history[start].char_len();
            start += 1;
        }
        if start > 0 {
            debug!("Context budget: dropped {} oldest exchange(s)", start);
        }
    }

    let mut messages = Vec::with_capacity(2 + 2 * (history.len() - start));
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history[start..].iter().flat_map(Exchange::to_messages));
    messages.push(ChatMessage::user(instruction));
    messages
}

/// Orchestrates `/analyze`, `/followup` and `/clear-chat`.
pub struct AnalysisService {
    sessions: SessionStore,
    llm: Arc<dyn LlmProvider>,
    prompts: PromptLoader,
    crawler: SiteCrawler,
    limiters: Arc<Limiters>,
    max_context_chars: usize,
}

impl AnalysisService {
    pub fn new(
        sessions: SessionStore,
        llm: Arc<dyn LlmProvider>,
        prompts: PromptLoader,
        crawler: SiteCrawler,
        limiters: Arc<Limiters>,
        max_context_chars: usize,
    ) -> Self {
        Self {
            sessions,
            llm,
            prompts,
            crawler,
            limiters,
            max_context_chars,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Crawls `site_url`, asks the model for an analysis and records the exchange.
    pub async fn analyze(
        &self,
        site_url: &str,
        session_id: Option<&str>,
    ) -> Result<AnalysisOutcome, ApiError> {
        let start = Instant::now();
        let site_url = parse_site_url(site_url)?;

        let session_id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(existing) => existing.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        // The session is only stored once the model call succeeds
        info!(
            "Analyze: session={}, site={}, prior_exchanges={}",
            session_id,
            site_url,
            self.sessions.get_history(&session_id).len()
        );

        let main_prompt = self.prompts.load(PromptKind::Main).await?;

        let site = {
            let (_permit, waited) = Limiters::acquire_timed(
                self.limiters.crawl.clone(),
                self.limiters.acquire_timeout,
                "crawl",
            )
            .await
            .map_err(|e| ApiError::Busy(e.to_string()))?;
            debug!("Crawl permit acquired after {:?}", waited);
            self.crawler.crawl(&site_url).await
        };

        let user_payload = serde_json::to_string(&serde_json::json!({ "site": site }))
            .map_err(|e| ApiError::InternalError(format!("failed to encode site data: {e}")))?;
        let messages = vec![
            ChatMessage::system(main_prompt),
            ChatMessage::user(user_payload.clone()),
        ];

        let result = self.call_model(&messages).await?;

        let history_len = self.sessions.append_exchange(
            &session_id,
            Exchange::new(ExchangeKind::Analysis, user_payload, result.clone()),
        );
        info!(
            "Analyze done: session={}, pages={}, result_chars={}, history_len={}, elapsed={:?}",
            session_id,
            site.count,
            result.chars().count(),
            history_len,
            start.elapsed()
        );

        Ok(AnalysisOutcome {
            session_id,
            result,
            pages: site.count,
        })
    }

    /// Replays the session history plus `instruction`. History is only
    /// extended when the model call succeeds and the session was not
    /// cleared in the meantime.
    pub async fn followup(
        &self,
        session_id: &str,
        instruction: &str,
    ) -> Result<FollowupOutcome, ApiError> {
        let start = Instant::now();
        let followup_prompt = self.prompts.load(PromptKind::Followup).await?;

        let (history, generation) = self.sessions.history_snapshot(session_id);
        info!(
            "Follow-up: session={}, history={} exchange(s), instruction_chars={}",
            session_id,
            history.len(),
            instruction.chars().count()
        );

        let messages = build_followup_messages(
            &followup_prompt,
            &history,
            instruction,
            self.max_context_chars,
        );
        let result = self.call_model(&messages).await?;

        let exchange = Exchange::new(ExchangeKind::Followup, instruction, result.clone());
        let history_len = match self
            .sessions
            .append_exchange_at(session_id, exchange, generation)
        {
            Some(len) => len,
            None => {
                warn!(
                    "Session {} was cleared during follow-up, exchange not recorded",
                    session_id
                );
                self.sessions.get_history(session_id).len()
            }
        };
        info!(
            "Follow-up done: session={}, history_len={}, elapsed={:?}",
            session_id,
            history_len,
            start.elapsed()
        );

        Ok(FollowupOutcome {
            session_id: session_id.to_string(),
            result,
            history_len,
        })
    }

    /// Returns how many exchanges were discarded.
    pub fn clear_chat(&self, session_id: &str) -> usize {
        let cleared = self.sessions.clear(session_id);
        info!("Cleared chat: session={}, exchanges={}", session_id, cleared);
        cleared
    }

    async fn call_model(&self, messages: &[ChatMessage]) -> Result<String, ApiError> {
        let (_permit, waited) = Limiters::acquire_timed(
            self.limiters.llm.clone(),
            self.limiters.acquire_timeout,
            "llm",
        )
        .await
        .map_err(|e| ApiError::Busy(e.to_string()))?;
        debug!("LLM permit acquired after {:?}", waited);

        Ok(self.llm.complete(messages).await?)
    }
}
