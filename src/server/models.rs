use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub strs: Vec<String>,
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub strs: Vec<String>,
    pub language: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}
