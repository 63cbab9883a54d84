use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::retry::{classify_failure, retry_after};
use super::{
    DEFAULT_CALL_TIMEOUT, Message, MessageRole, Provider, ProviderError, ProviderFuture,
    ProviderResponse, ProviderUsage, ToolSpec, env_base_url, format_error_parts, http_client,
};

const NAME: &str = "Claude";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
pub(crate) const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const MAX_TOKENS: u32 = 8192;

#[derive(Debug, Clone)]
pub struct Claude {
    key: String,
    model: String,
    temperature: Option<f32>,
    url: String,
    client: reqwest::Client,
    messages: Vec<Message>,
    tools: Vec<ToolSpec>,
}

impl Claude {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            url: env_base_url("ANTHROPIC_BASE_URL", DEFAULT_BASE_URL),
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

    /// Full messages endpoint URL, e.g. `http://localhost:8080/v1/messages`.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn find_tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

impl Provider for Claude {
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
            let tool = self
                .find_tool(&tool_name)
                .cloned()
                .ok_or_else(|| ProviderError::ToolNotRegistered(tool_name.clone()))?;

            let (system_inputs, user_inputs): (Vec<&Message>, Vec<&Message>) = self
                .messages
                .iter()
                .partition(|message| matches!(message.role, MessageRole::System));

            let system = system_inputs
                .into_iter()
                .map(|message| message.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");

            let messages = user_inputs
                .into_iter()
                .map(|message| {
                    json!({
                        "role": "user",
                        "content": [{"type": "text", "text": message.content}]
                    })
                })
                .collect::<Vec<_>>();

            let mut body = json!({
                "model": self.model,
                "max_tokens": MAX_TOKENS,
                "messages": messages,
                "tools": [
                    {
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters
                    }
                ],
                "tool_choice": {"type": "tool", "name": tool.name}
            });
            if !system.trim().is_empty() {
                body["system"] = json!(system);
            }
            if let Some(temperature) = self.temperature {
                body["temperature"] = json!(temperature);
            }

            let response = self
                .client
                .post(&self.url)
                .header("x-api-key", &self.key)
                .header("anthropic-version", "2023-06-01")
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
                extract_claude_error(&text),
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
    let payload: ClaudeResponse = serde_json::from_str(text)
        .map_err(|err| invalid(format!("failed to parse response JSON: {}", err), text))?;
    for block in &payload.content {
        if block.kind == "tool_use" && block.name.as_deref() == Some(tool_name) {
            let input = block
                .input
                .clone()
                .ok_or_else(|| invalid("tool_use missing input", text))?;
            let model = payload
                .model
                .filter(|value| !value.trim().is_empty())
                .or_else(|| Some(fallback_model.to_string()));
            let usage = payload.usage.map(|usage| ProviderUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage
                    .input_tokens
                    .zip(usage.output_tokens)
                    .map(|(input, output)| input + output),
            });
            return Ok(ProviderResponse {
                args: input,
                model,
                usage,
            });
        }
    }

    Err(invalid("no tool call returned", text))
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, None))
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    model: Option<String>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    name: Option<String>,
    input: Option<serde_json::Value>,
}
