use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use super::retry::{classify_failure, retry_after};
use super::{
    DEFAULT_CALL_TIMEOUT, Message, MessageRole, Provider, ProviderError, ProviderFuture,
    ProviderResponse, ProviderUsage, ToolSpec, env_base_url, format_error_parts, http_client,
};

const NAME: &str = "Gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub(crate) const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct Gemini {
    key: String,
    model: String,
    temperature: Option<f32>,
    base_url: String,
    client: reqwest::Client,
    messages: Vec<Message>,
    tools: Vec<ToolSpec>,
}

impl Gemini {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            base_url: env_base_url("GEMINI_BASE_URL", DEFAULT_BASE_URL),
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

    fn find_tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

impl Provider for Gemini {
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
            let url = format!("{}/{}:generateContent", self.base_url, self.model);

            let (system_inputs, user_inputs): (Vec<&Message>, Vec<&Message>) = self
                .messages
                .iter()
                .partition(|message| matches!(message.role, MessageRole::System));

            let system_instruction = system_inputs
                .into_iter()
                .map(|message| message.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");

            let contents = user_inputs
                .into_iter()
                .map(|message| {
                    json!({
                        "role": "user",
                        "parts": [{"text": message.content}]
                    })
                })
                .collect::<Vec<_>>();

            let mut body = json!({
                "contents": contents,
                "systemInstruction": if system_instruction.trim().is_empty() { Value::Null } else { json!({"parts": [{"text": system_instruction}]}) },
                "tools": [
                    {
                        "function_declarations": [
                            {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters
                            }
                        ]
                    }
                ],
                "tool_config": {
                    "function_calling_config": {
                        "mode": "ANY",
                        "allowed_function_names": [tool.name]
                    }
                }
            });
            if let Some(temperature) = self.temperature {
                body["generationConfig"] = json!({"temperature": temperature});
            }

            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.key)
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
                extract_gemini_error(&text),
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
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| invalid(format!("failed to parse response JSON: {}", err), text))?;
    let candidate = payload
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .ok_or_else(|| invalid("no candidate returned", text))?;

    for part in &candidate.parts {
        if let Some(function_call) = &part.function_call
            && function_call.name == tool_name
        {
            let model = payload
                .model_version
                .filter(|value| !value.trim().is_empty())
                .or_else(|| Some(fallback_model.to_string()));
            let usage = payload.usage_metadata.map(|usage| ProviderUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            });
            return Ok(ProviderResponse {
                args: function_call.args.clone(),
                model,
                usage,
            });
        }
    }

    Err(invalid("no tool call returned", text))
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(
        error.message,
        error.status,
        error.code.map(|value| value.to_string()),
    ))
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(rename = "functionCall")]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}
