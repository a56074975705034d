pub mod settings;

pub use settings::{
    CrawlerConfig, LimitsConfig, LlmConfig, PromptsConfig, ServerConfig, SessionsConfig, Settings,
};
