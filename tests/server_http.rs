use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use batch_llm_translator::providers::{
    Provider, ProviderError, ProviderFuture, ProviderResponse, ToolSpec,
};
use batch_llm_translator::server::{ServerState, router};
use batch_llm_translator::settings::Settings;
use batch_llm_translator::{Dispatcher, FailurePolicy, Translator};
use serde_json::{Value, json};

/// Upper-cases every value. "boom" is rejected, "busy" is always rate limited,
/// "drop" goes missing from the answer and "slow" takes a second.
#[derive(Clone, Default)]
struct Upper {
    user_input: Option<String>,
}

impl Provider for Upper {
    fn append_system_input(self, _input: String) -> Self {
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.user_input = Some(input);
        self
    }

    fn register_tool(self, _tool: ToolSpec) -> Self {
        self
    }

    fn call_tool(self, _tool_name: &str) -> ProviderFuture {
        Box::pin(async move {
            let input = self.user_input.unwrap_or_default();
            let start = input.find('{').unwrap_or(0);
            let chunk: BTreeMap<String, String> =
                serde_json::from_str(&input[start..]).unwrap_or_default();

            if chunk.values().any(|text| text == "boom") {
                return Err(ProviderError::Api {
                    provider: "Stub",
                    status: 400,
                    message: "rejected".to_string(),
                });
            }
            if chunk.values().any(|text| text == "busy") {
                return Err(ProviderError::RateLimited {
                    provider: "Stub",
                    status: 429,
                    message: "slow down".to_string(),
                    retry_after: None,
                });
            }
            if chunk.values().any(|text| text == "slow") {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            let entries = chunk
                .iter()
                .filter(|(_, text)| text.as_str() != "drop")
                .map(|(key, text)| {
                    json!({"key": key.parse::<usize>().unwrap_or(0), "text": text.to_uppercase()})
                })
                .collect::<Vec<_>>();
            Ok(ProviderResponse {
                args: json!({ "translations": entries }),
                model: None,
                usage: None,
            })
        })
    }
}

async fn spawn_server(timeout: Duration) -> String {
    spawn_server_with(Settings::default(), timeout).await
}

async fn spawn_server_with(settings: Settings, timeout: Duration) -> String {
    let dispatcher = Dispatcher::new(Translator::new(Upper::default(), &settings), &settings);
    let state = ServerState::new(dispatcher, &settings).with_request_timeout(timeout);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(Arc::new(state))).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn post(base: &str, body: String) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{}/translate", base))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn translates_in_request_order() {
    let base = spawn_server(Duration::from_secs(5)).await;
    let strs = ["a", "b", "c", "d", "e", "f", "g"];
    let (status, body) = post(
        &base,
        json!({"strs": strs, "language": "Korean"}).to_string(),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"strs": ["A", "B", "C", "D", "E", "F", "G"], "language": "Korean"})
    );
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let base = spawn_server(Duration::from_secs(5)).await;
    for body in [
        "not json".to_string(),
        json!({"strs": "a", "language": "Korean"}).to_string(),
        json!({"strs": [1, 2], "language": "Korean"}).to_string(),
        json!({"strs": ["a"]}).to_string(),
        json!({"strs": [], "language": "Korean"}).to_string(),
        json!({"strs": ["a"], "language": "  "}).to_string(),
    ] {
        let (status, response) = post(&base, body.clone()).await;
        assert_eq!(status, 400, "{}", body);
        assert_eq!(response["code"], "invalid_request", "{}", body);
    }
}

#[tokio::test]
async fn rejected_call_is_a_model_error() {
    let base = spawn_server(Duration::from_secs(5)).await;
    let (status, body) = post(
        &base,
        json!({"strs": ["ok", "boom"], "language": "Korean"}).to_string(),
    )
    .await;
    assert_eq!(status, 502);
    assert_eq!(body["code"], "model_error");
    assert!(body.get("strs").is_none());
}

#[tokio::test]
async fn missing_key_is_malformed_output() {
    let base = spawn_server(Duration::from_secs(5)).await;
    let (status, body) = post(
        &base,
        json!({"strs": ["keep", "drop"], "language": "Korean"}).to_string(),
    )
    .await;
    assert_eq!(status, 502);
    assert_eq!(body["code"], "malformed_model_output");
}

#[tokio::test]
async fn exhausted_retries_are_model_unavailable() {
    let mut settings = Settings::default();
    settings.max_retries = 1;
    settings.retry_backoff = Duration::from_millis(5);
    let base = spawn_server_with(settings, Duration::from_secs(5)).await;
    let (status, body) = post(
        &base,
        json!({"strs": ["ok", "busy"], "language": "Korean"}).to_string(),
    )
    .await;
    assert_eq!(status, 503);
    assert_eq!(body["code"], "model_unavailable");
}

#[tokio::test]
async fn keep_original_reports_fallback_indices() {
    let mut settings = Settings::default();
    settings.on_chunk_failure = FailurePolicy::KeepOriginal;
    let base = spawn_server_with(settings, Duration::from_secs(5)).await;
    let (status, body) = post(
        &base,
        json!({"strs": ["a", "boom", "c"], "language": "Korean"}).to_string(),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"strs": ["A", "boom", "C"], "language": "Korean", "fallback": [1]})
    );
}

#[tokio::test]
async fn slow_job_times_out() {
    let base = spawn_server(Duration::from_millis(50)).await;
    let (status, body) = post(
        &base,
        json!({"strs": ["slow"], "language": "Korean"}).to_string(),
    )
    .await;
    assert_eq!(status, 504);
    assert_eq!(body["code"], "timeout");
}

#[tokio::test]
async fn health_carries_cors_headers() {
    let base = spawn_server(Duration::from_secs(5)).await;
    let response = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok()),
        Some("*")
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}
