use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub prompts: PromptsConfig,
    pub crawler: CrawlerConfig,
    pub sessions: SessionsConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    /// 0 disables the client timeout; analysis calls on large sites can run for minutes.
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-5-mini".to_string(),
            timeout_seconds: 0,
            max_retries: 2,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
            breaker_failure_threshold: 5,
            breaker_cooldown_seconds: 30,
        }
    }
}

/// System prompts. A URL, when set, wins over the inline text and is
/// fetched on every request.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    pub main_prompt_url: Option<String>,
    pub followup_prompt_url: Option<String>,
    pub main_prompt: String,
    pub followup_prompt: String,
    pub fetch_timeout_seconds: u64,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            main_prompt_url: None,
            followup_prompt_url: None,
            main_prompt: "You are a website analyst. The user message is a JSON object with the \
                          crawled pages of a site. Produce a structured analysis of the business, \
                          its offer, audience, positioning and the weaknesses of the site."
                .to_string(),
            followup_prompt: "You are refining a website analysis you wrote earlier in this \
                              conversation. Apply the user's correction and return the full \
                              updated analysis."
                .to_string(),
            fetch_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CrawlerConfig {
    pub max_pages: usize,
    pub max_depth: usize,
    pub timeout_seconds: u64,
    pub user_agent: String,
    pub max_text_chars: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: 25,
            max_depth: 1,
            timeout_seconds: 30,
            user_agent: "NeuroAnalystBot/1.0".to_string(),
            max_text_chars: 20_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionsConfig {
    pub ttl_hours: u64,
    pub max_sessions: usize,
    /// 0 = unlimited
    pub max_exchanges: usize,
    /// 0 = unlimited
    pub max_context_chars: usize,
    pub cleanup_interval_seconds: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            max_sessions: 100,
            max_exchanges: 50,
            max_context_chars: 0,
            cleanup_interval_seconds: 300,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub crawl_concurrency: usize,
    pub llm_concurrency: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            crawl_concurrency: 4,
            llm_concurrency: 8,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl Settings {
    /// Loads `.env`, `config/settings.toml` (optional) and `APP__*` variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        // Conventional variables used by hosting platforms and the OpenAI SDKs.
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {port}"))?;
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if std::env::var("APP__LLM__API_KEY").is_err() {
            builder = builder.set_override_option("llm.api_key", std::env::var("OPENAI_API_KEY").ok())?;
        }

        let settings = Self::from_builder(builder)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder.build().context("Failed to build configuration")?;
        let settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.trim().is_empty() {
            anyhow::bail!("model provider API key is not set (APP__LLM__API_KEY or OPENAI_API_KEY)");
        }
        if self.llm.base_url.trim().is_empty() {
            anyhow::bail!("llm.base_url must not be empty");
        }
        if self.crawler.max_pages == 0 {
            anyhow::bail!("crawler.max_pages must be at least 1");
        }
        Ok(())
    }

    /// Last four characters of the API key, for startup logs.
    pub fn api_key_hint(&self) -> String {
        let key = self.llm.api_key.trim();
        let tail: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("...{tail}")
    }
}
