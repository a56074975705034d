use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PromptsConfig;

/// Documents shorter than this are most likely an error page or an empty export.
const SUSPICIOUS_PROMPT_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to fetch prompt document {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("prompt document {url} returned status {status}")]
    Status { url: String, status: StatusCode },

    #[error("{0} prompt is empty")]
    Empty(PromptKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Main,
    Followup,
}

impl std::fmt::Display for PromptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptKind::Main => write!(f, "main"),
            PromptKind::Followup => write!(f, "follow-up"),
        }
    }
}

/// Resolves system prompts from remote plain-text exports or inline config.
#[derive(Clone)]
pub struct PromptLoader {
    client: Client,
    config: PromptsConfig,
}

impl PromptLoader {
    pub fn new(config: PromptsConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds.max(1)))
            .build()?;
        Ok(Self { client, config })
    }

    pub async fn load(&self, kind: PromptKind) -> Result<String, PromptError> {
        let (url, inline) = match kind {
            PromptKind::Main => (&self.config.main_prompt_url, &self.config.main_prompt),
            PromptKind::Followup => (&self.config.followup_prompt_url, &self.config.followup_prompt),
        };

        let text = match url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => self.fetch(url).await?,
            None => inline.trim().to_string(),
        };

        if text.is_empty() {
            return Err(PromptError::Empty(kind));
        }
        debug!("Loaded {} prompt ({} chars)", kind, text.chars().count());
        Ok(text)
    }

    async fn fetch(&self, url: &str) -> Result<String, PromptError> {
        info!("Fetching prompt document: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| PromptError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Prompt document {} returned {}: {}",
                url,
                status,
                body.chars().take(500).collect::<String>()
            );
            return Err(PromptError::Status {
                url: url.to_string(),
                status,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|source| PromptError::Fetch {
                url: url.to_string(),
                source,
            })?
            .trim()
            .to_string();

        info!("Prompt document loaded ({} chars)", text.chars().count());
        if text.chars().count() < SUSPICIOUS_PROMPT_CHARS {
            warn!(
                "Suspiciously short prompt document: {}",
                text.chars().take(SUSPICIOUS_PROMPT_CHARS).collect::<String>()
            );
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inline_only() -> PromptsConfig {
        PromptsConfig {
            main_prompt: "  main instructions  ".to_string(),
            followup_prompt: "followup instructions".to_string(),
            ..PromptsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_inline_prompts_are_trimmed() {
        let loader = PromptLoader::new(inline_only()).unwrap();
        assert_eq!(loader.load(PromptKind::Main).await.unwrap(), "main instructions");
        assert_eq!(
            loader.load(PromptKind::Followup).await.unwrap(),
            "followup instructions"
        );
    }

    #[tokio::test]
    async fn test_blank_inline_prompt_is_an_error() {
        let loader = PromptLoader::new(PromptsConfig {
            main_prompt: "   ".to_string(),
            ..inline_only()
        })
        .unwrap();
        assert!(matches!(
            loader.load(PromptKind::Main).await,
            Err(PromptError::Empty(PromptKind::Main))
        ));
    }

    #[tokio::test]
    async fn test_remote_document_wins_over_inline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc/main"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\nremote main prompt\n"))
            .expect(2)
            .mount(&server)
            .await;

        let loader = PromptLoader::new(PromptsConfig {
            main_prompt_url: Some(format!("{}/doc/main", server.uri())),
            ..inline_only()
        })
        .unwrap();

        // Fetched on every call so document edits apply immediately
        assert_eq!(loader.load(PromptKind::Main).await.unwrap(), "remote main prompt");
        assert_eq!(loader.load(PromptKind::Main).await.unwrap(), "remote main prompt");
        assert_eq!(
            loader.load(PromptKind::Followup).await.unwrap(),
            "followup instructions"
        );
    }

    #[tokio::test]
    async fn test_non_200_document_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc/followup"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let loader = PromptLoader::new(PromptsConfig {
            followup_prompt_url: Some(format!("{}/doc/followup", server.uri())),
            ..inline_only()
        })
        .unwrap();

        let err = loader.load(PromptKind::Followup).await.unwrap_err();
        assert!(matches!(err, PromptError::Status { status, .. } if status == StatusCode::FORBIDDEN));
    }
}
