use axum::http::StatusCode;
use tracing::{info, warn};

use crate::cache::translate_cached;
use crate::error::{JobError, TranslateError};
use crate::job::TranslationJob;
use crate::providers::Provider;

use super::models::{TranslateRequest, TranslateResponse};
use super::state::ServerState;

#[derive(Debug)]
pub(crate) struct ServerError {
    pub(crate) status: StatusCode,
    pub(crate) code: &'static str,
    pub(crate) message: String,
}

impl ServerError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request",
            message: message.into(),
        }
    }

    fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            code: "timeout",
            message: message.into(),
        }
    }
}

impl From<JobError> for ServerError {
    fn from(err: JobError) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            JobError::RequestShape(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            JobError::Chunk(TranslateError::RetryExhausted { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable")
            }
            JobError::Chunk(TranslateError::Remote { source, .. }) if source.is_transient() => {
                (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable")
            }
            JobError::Chunk(TranslateError::Remote { .. }) => (StatusCode::BAD_GATEWAY, "model_error"),
            JobError::Chunk(TranslateError::MalformedModelOutput { .. }) => {
                (StatusCode::BAD_GATEWAY, "malformed_model_output")
            }
            JobError::Chunk(TranslateError::Prompt { .. }) | JobError::Reassembly(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        Self {
            status,
            code,
            message,
        }
    }
}

pub(crate) async fn translate_request<P: Provider>(
    state: &ServerState<P>,
    request: TranslateRequest,
) -> Result<TranslateResponse, ServerError> {
    if request.strs.is_empty() {
        return Err(ServerError::bad_request("strs must not be empty"));
    }
    if request.language.trim().is_empty() {
        return Err(ServerError::bad_request("language must not be empty"));
    }

    let items = request.strs.len();
    info!(items, language = %request.language, "translate request");
    let job = TranslationJob::new(request.strs, request.language);
    let outcome = tokio::time::timeout(
        state.request_timeout,
        translate_cached(&state.dispatcher, state.cache.as_ref(), job),
    )
    .await
    .map_err(|_| {
        warn!(items, "request timed out");
        ServerError::timeout(format!(
            "translation did not finish within {}s",
            state.request_timeout.as_secs()
        ))
    })?;

    let result = outcome?;
    Ok(TranslateResponse {
        strs: result.items,
        language: result.language,
        fallback: result.fallback,
    })
}
