pub mod analysis_service;
pub mod crawler;
pub mod llm_service;
pub mod prompt_loader;
pub mod reliable;

pub use analysis_service::AnalysisService;
pub use crawler::SiteCrawler;
pub use llm_service::{LlmError, LlmProvider, LlmService};
pub use prompt_loader::PromptLoader;
pub use reliable::ReliableProvider;
