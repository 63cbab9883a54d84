use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::providers::{Provider, ProviderError, ProviderFuture, ProviderResponse, ToolSpec};

pub(crate) struct Step {
    pub(crate) delay: Duration,
    pub(crate) reply: Result<Value, ProviderError>,
}

impl Step {
    pub(crate) fn ok(args: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Ok(args),
        }
    }

    pub(crate) fn err(err: ProviderError) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Err(err),
        }
    }

    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Behavior = dyn Fn(&BTreeMap<usize, String>, usize) -> Step + Send + Sync;

/// Scripted provider. The behaviour sees the chunk decoded from the user
/// message and the zero-based index of the call.
#[derive(Clone)]
pub(crate) struct TestProvider {
    user_input: Option<String>,
    behavior: Arc<Behavior>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<BTreeMap<usize, String>>>>,
}

impl TestProvider {
    pub(crate) fn new(
        behavior: impl Fn(&BTreeMap<usize, String>, usize) -> Step + Send + Sync + 'static,
    ) -> Self {
        Self {
            user_input: None,
            behavior: Arc::new(behavior),
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn suffix(suffix: &'static str) -> Self {
        Self::new(move |texts, _| Step::ok(suffix_args(texts, suffix)))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<BTreeMap<usize, String>> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl Provider for TestProvider {
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
        let texts = decode_user_input(self.user_input.as_deref().unwrap_or_default());
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().expect("seen lock").push(texts.clone());
        let step = (self.behavior)(&texts, index);
        Box::pin(async move {
            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
            step.reply.map(|args| ProviderResponse {
                args,
                model: Some("test".to_string()),
                usage: None,
            })
        })
    }
}

pub(crate) fn decode_user_input(input: &str) -> BTreeMap<usize, String> {
    let Some(start) = input.find('{') else {
        return BTreeMap::new();
    };
    let object: BTreeMap<String, String> =
        serde_json::from_str(&input[start..]).expect("chunk object");
    object
        .into_iter()
        .map(|(key, value)| (key.parse().expect("numeric key"), value))
        .collect()
}

pub(crate) fn suffix_args(texts: &BTreeMap<usize, String>, suffix: &str) -> Value {
    let entries = texts
        .iter()
        .map(|(key, text)| json!({"key": key, "text": format!("{}{}", text, suffix)}))
        .collect::<Vec<_>>();
    json!({ "translations": entries })
}

pub(crate) fn rate_limited() -> ProviderError {
    ProviderError::RateLimited {
        provider: "Test",
        status: 429,
        message: "slow down".to_string(),
        retry_after: None,
    }
}

pub(crate) fn denied() -> ProviderError {
    ProviderError::Api {
        provider: "Test",
        status: 401,
        message: "invalid key".to_string(),
    }
}
