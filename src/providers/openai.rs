use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::retry::{classify_failure, retry_after};
use super::{
    DEFAULT_CALL_TIMEOUT, Message, MessageRole, Provider, ProviderError, ProviderFuture,
    ProviderResponse, ProviderUsage, ToolSpec, env_base_url, format_error_parts, http_client,
};

const NAME: &str = "OpenAI";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI chat completions. Any compatible host (Groq, local gateways) works
/// through `OPENAI_BASE_URL` or [`OpenAI::with_base_url`].
#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    model: String,
    temperature: Option<f32>,
    base_url: String,
    client: reqwest::Client,
    messages: Vec<Message>,
    tools: Vec<ToolSpec>,
}

impl OpenAI {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            base_url: env_base_url("OPENAI_BASE_URL", DEFAULT_BASE_URL),
            client: http_client(DEFAULT_CALL_TIMEOUT),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Upper bound on one whole call, connect and body read included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn find_tool(&self, name: &str) -> Result<&ToolSpec, ProviderError> {
        self.tools
            .iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| ProviderError::ToolNotRegistered(name.to_string()))
    }
}

impl Provider for OpenAI {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn register_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    fn call_tool(self, tool_name: &str) -> ProviderFuture {
        let tool_name = tool_name.to_string();
        Box::pin(async move {
            let tool = self.find_tool(&tool_name)?.clone();
            let url = format!("{}/chat/completions", self.base_url);

            let messages = self
                .messages
                .iter()
                .map(|message| match message.role {
                    MessageRole::System => json!({"role": "system", "content": message.content}),
                    MessageRole::User => json!({"role": "user", "content": message.content}),
                })
                .collect::<Vec<_>>();

            let mut body = json!({
                "model": self.model,
                "messages": messages,
                "tools": [
                    {
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters
                        }
                    }
                ],
                "tool_choice": {"type": "function", "function": {"name": tool.name}}
            });
            if let Some(temperature) = self.temperature {
                body["temperature"] = json!(temperature);
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.key)
                .json(&body)
                .send()
                .await
                .map_err(|source| ProviderError::Transport {
                    provider: NAME,
                    source,
                })?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response
                .text()
                .await
                .map_err(|source| ProviderError::Transport {
                    provider: NAME,
                    source,
                })?;
            if status.is_success() {
                return extract_tool_response(&text, &tool_name, &self.model);
            }
            Err(classify_failure(
                NAME,
                status,
                &text,
                extract_openai_error(&text),
                retry_after,
            ))
        })
    }
}

fn invalid(message: impl Into<String>, raw: &str) -> ProviderError {
    ProviderError::InvalidResponse {
        provider: NAME,
        message: message.into(),
        raw: raw.to_string(),
    }
}

fn extract_tool_response(
    text: &str,
    tool_name: &str,
    fallback_model: &str,
) -> Result<ProviderResponse, ProviderError> {
    let payload: OpenAIResponse = serde_json::from_str(text)
        .map_err(|err| invalid(format!("failed to parse response JSON: {}", err), text))?;
    let tool_call = payload
        .choices
        .first()
        .and_then(|choice| choice.message.tool_calls.first())
        .ok_or_else(|| invalid("no tool call returned", text))?;

    if tool_call.function.name != tool_name {
        return Err(invalid(
            format!("unexpected tool name '{}'", tool_call.function.name),
            text,
        ));
    }

    let args: serde_json::Value = serde_json::from_str(&tool_call.function.arguments)
        .map_err(|err| {
            invalid(
                format!("failed to parse tool arguments: {}", err),
                &tool_call.function.arguments,
            )
        })?;
    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse { args, model, usage })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, error.code))
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    function: OpenAIFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}
