use serde::{Deserialize, Serialize};

// ===== REQUEST MODELS =====
// Required fields are optional here so missing values become a 400 with a
// readable message instead of a serde rejection.

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FollowupRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub followup_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub session_id: String,
    pub result: String,
    pub pages: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowupResponse {
    pub session_id: String,
    pub result: String,
    pub history_len: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearChatResponse {
    pub status: String,
    pub message: String,
    pub session_id: String,
    pub cleared: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
    pub timestamp: String,
    pub sessions: usize,
    pub version: String,
}
