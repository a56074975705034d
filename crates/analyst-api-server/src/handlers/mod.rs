pub mod analyze;
pub mod clear_chat;
pub mod followup;
pub mod health;

use crate::utils::error::ApiError;

/// Rejects missing or blank request fields.
pub(crate) fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}
