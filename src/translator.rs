use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::TranslateError;
use crate::job::{Chunk, ChunkResult, ChunkStatus};
use crate::providers::{Provider, ProviderError, RetryPolicy, wait_with_backoff};
use crate::settings::Settings;
use crate::translations::{self, PromptStyle, TOOL_NAME, tool_spec};

/// Translates one chunk per model call. Cloning is cheap and clones share the
/// provider handle and the call limiter.
#[derive(Debug, Clone)]
pub struct Translator<P: Provider> {
    provider: P,
    style: PromptStyle,
    retry: RetryPolicy,
    limiter: Arc<Semaphore>,
}

impl<P: Provider> Translator<P> {
    pub fn new(provider: P, settings: &Settings) -> Self {
        Self {
            provider,
            style: settings.prompt_style,
            retry: settings.retry_policy(),
            limiter: Arc::new(Semaphore::new(settings.max_concurrent_calls.max(1))),
        }
    }

    pub fn with_prompt_style(mut self, style: PromptStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn prompt_style(&self) -> PromptStyle {
        self.style
    }

    /// Translates `chunk` into `target_language`.
    ///
    /// Transient provider failures are retried with the unchanged chunk up to
    /// the policy's limit. A response that does not answer every key of the
    /// chunk exactly once fails with [`TranslateError::MalformedModelOutput`].
    pub async fn translate(
        &self,
        chunk: &Chunk,
        target_language: &str,
    ) -> Result<ChunkResult, TranslateError> {
        let prompt_error = |err: anyhow::Error| TranslateError::Prompt {
            chunk_id: chunk.id,
            message: format!("{:#}", err),
        };
        let system_prompt =
            translations::render_system_prompt(self.style, target_language).map_err(prompt_error)?;
        let user_input =
            translations::render_user_input(chunk, target_language).map_err(prompt_error)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(chunk = chunk.id, items = chunk.len(), attempt, "calling model");
            match self.call(system_prompt.clone(), user_input.clone()).await {
                Ok(response) => {
                    let translations = translations::parse_tool_args(response.args.clone(), chunk)
                        .map_err(|err| {
                            let raw = response.args.to_string();
                            debug!(chunk = chunk.id, raw = %raw, "rejected model output");
                            TranslateError::MalformedModelOutput {
                                chunk_id: chunk.id,
                                reason: format!("{:#}", err),
                                raw,
                                chunk: chunk.clone(),
                            }
                        })?;
                    let status = if attempt == 1 {
                        ChunkStatus::Translated
                    } else {
                        ChunkStatus::Retried { attempts: attempt }
                    };
                    return Ok(ChunkResult {
                        chunk_id: chunk.id,
                        translations,
                        status,
                        usage: response.usage,
                    });
                }
                Err(ProviderError::InvalidResponse { message, raw, .. }) => {
                    debug!(chunk = chunk.id, raw = %raw, "unusable model response");
                    return Err(TranslateError::MalformedModelOutput {
                        chunk_id: chunk.id,
                        reason: message,
                        raw,
                        chunk: chunk.clone(),
                    });
                }
                Err(err) if err.is_transient() => {
                    if attempt > self.retry.max_retries {
                        warn!(chunk = chunk.id, attempts = attempt, "retries exhausted: {}", err);
                        return Err(TranslateError::RetryExhausted {
                            chunk_id: chunk.id,
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let wait = self.retry.delay_for(err.retry_after());
                    wait_with_backoff(chunk.id, attempt, self.retry.max_retries, wait, &err).await;
                }
                Err(err) => {
                    return Err(TranslateError::Remote {
                        chunk_id: chunk.id,
                        source: err,
                    });
                }
            }
        }
    }

    async fn call(
        &self,
        system_prompt: String,
        user_input: String,
    ) -> Result<crate::providers::ProviderResponse, ProviderError> {
        // the limiter is never closed, so a failed acquire cannot happen
        let _permit = self.limiter.acquire().await.ok();
        self.provider
            .clone()
            .register_tool(tool_spec())
            .append_system_input(system_prompt)
            .append_user_input(user_input)
            .call_tool(TOOL_NAME)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{Step, TestProvider, denied, rate_limited, suffix_args};
    use serde_json::json;
    use std::time::Duration;

    fn chunk(values: &[&str]) -> Chunk {
        Chunk {
            id: 3,
            texts: values
                .iter()
                .enumerate()
                .map(|(key, value)| (key, value.to_string()))
                .collect(),
        }
    }

    fn translator(provider: TestProvider, max_retries: u32) -> Translator<TestProvider> {
        Translator::new(provider, &Settings::default()).with_retry_policy(RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn translates_every_key() {
        let provider = TestProvider::suffix("!");
        let result = translator(provider.clone(), 3)
            .translate(&chunk(&["a", "b"]), "German")
            .await
            .expect("translate");
        assert_eq!(result.chunk_id, 3);
        assert_eq!(result.status, ChunkStatus::Translated);
        assert_eq!(
            result.translations.into_values().collect::<Vec<_>>(),
            vec!["a!", "b!"]
        );
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_retried_with_the_same_chunk() {
        let provider = TestProvider::new(|texts, call| {
            if call < 2 {
                Step::err(rate_limited())
            } else {
                Step::ok(suffix_args(texts, "!"))
            }
        });
        let source = chunk(&["a", "b"]);
        let result = translator(provider.clone(), 3)
            .translate(&source, "German")
            .await
            .expect("translate");
        assert_eq!(result.status, ChunkStatus::Retried { attempts: 3 });
        assert_eq!(provider.calls(), 3);
        assert!(provider.seen().iter().all(|seen| *seen == source.texts));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let provider = TestProvider::new(|_, _| Step::err(rate_limited()));
        let err = translator(provider.clone(), 2)
            .translate(&chunk(&["a"]), "German")
            .await
            .unwrap_err();
        match err {
            TranslateError::RetryExhausted {
                chunk_id, attempts, ..
            } => {
                assert_eq!(chunk_id, 3);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let provider = TestProvider::new(|_, _| Step::err(denied()));
        let err = translator(provider.clone(), 5)
            .translate(&chunk(&["a"]), "German")
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::Remote { chunk_id: 3, .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn key_mismatch_is_malformed_output_with_raw_and_chunk() {
        let provider = TestProvider::new(|_, _| {
            Step::ok(json!({"translations": [{"key": 0, "text": "A"}]}))
        });
        let source = chunk(&["a", "b"]);
        let err = translator(provider.clone(), 3)
            .translate(&source, "German")
            .await
            .unwrap_err();
        match err {
            TranslateError::MalformedModelOutput {
                reason, raw, chunk, ..
            } => {
                assert_eq!(reason, "expected 2 translations, got 1");
                assert!(raw.contains("\"A\""));
                assert_eq!(chunk, source);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn unusable_provider_response_is_malformed_output() {
        let provider = TestProvider::new(|_, _| {
            Step::err(ProviderError::InvalidResponse {
                provider: "Test",
                message: "no tool call returned".to_string(),
                raw: "plain text".to_string(),
            })
        });
        let err = translator(provider, 3)
            .translate(&chunk(&["a"]), "German")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TranslateError::MalformedModelOutput { ref raw, .. } if raw == "plain text"
        ));
    }

    #[tokio::test]
    async fn limiter_bounds_concurrent_calls() {
        let provider = TestProvider::new(|texts, _| {
            Step::ok(suffix_args(texts, "!")).after(Duration::from_millis(20))
        });
        let mut settings = Settings::default();
        settings.max_concurrent_calls = 2;
        let translator = Translator::new(provider.clone(), &settings);

        let chunks = (0..6)
            .map(|id| Chunk {
                id,
                texts: [(0, format!("item {id}"))].into_iter().collect(),
            })
            .collect::<Vec<_>>();
        let started = tokio::time::Instant::now();
        let results = futures_util::future::join_all(
            chunks
                .iter()
                .map(|chunk| translator.translate(chunk, "German")),
        )
        .await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(provider.calls(), 6);
        // three waves of two calls each
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
