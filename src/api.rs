use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Default)]
pub struct ClipboardQuery {
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveRequest {
    pub content: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// Server-assigned write time; older servers may omit it.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl SaveResponse {
    pub fn saved(timestamp: i64) -> Self {
        SaveResponse {
            success: true,
            message: "Content saved".to_owned(),
            timestamp: Some(timestamp),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: &str) -> Self {
        ErrorResponse { error: msg.to_owned() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
