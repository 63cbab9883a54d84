//! Prompt rendering and the structured-output protocol spoken with the model.
//!
//! Protocol v1: the user message carries the chunk as a JSON object whose
//! keys are the chunk's integer keys, and the model must answer with a forced
//! `deliver_translations` tool call shaped as
//! `{"translations": [{"key": 0, "text": "..."}, ...]}` with exactly one entry
//! per input key.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tera::{Context as TeraContext, Tera};

use crate::job::Chunk;
use crate::providers::ToolSpec;

pub const TOOL_NAME: &str = "deliver_translations";
pub const PROTOCOL_VERSION: u32 = 1;

const INTERFACE_PROMPT: &str = include_str!("prompts/interface.tera");
const PROSE_PROMPT: &str = include_str!("prompts/prose.tera");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptStyle {
    /// Short, independent UI strings translated literally.
    #[default]
    Interface,
    /// Long-form passages translated naturally.
    Prose,
}

impl PromptStyle {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "interface" | "ui" => Some(PromptStyle::Interface),
            "prose" | "text" => Some(PromptStyle::Prose),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptStyle::Interface => "interface",
            PromptStyle::Prose => "prose",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            PromptStyle::Interface => INTERFACE_PROMPT,
            PromptStyle::Prose => PROSE_PROMPT,
        }
    }
}

pub fn tool_spec() -> ToolSpec {
    let parameters = json!({
        "type": "object",
        "properties": {
            "translations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "key": {"type": "integer"},
                        "text": {"type": "string"}
                    },
                    "required": ["key", "text"]
                }
            }
        },
        "required": ["translations"]
    });

    ToolSpec {
        name: TOOL_NAME.to_string(),
        description: "Return one translated text for every key of the input object.".to_string(),
        parameters,
    }
}

pub fn render_system_prompt(style: PromptStyle, target_language: &str) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("target_language", target_language.trim());
    context.insert("tool_name", TOOL_NAME);

    let rendered = Tera::one_off(style.template(), &context, false)
        .with_context(|| format!("failed to render {} system prompt", style.as_str()))?;
    Ok(rendered.trim().to_string())
}

/// The user message for one chunk. Keys are written in ascending numeric
/// order so the model sees the items in source order.
pub fn render_user_input(chunk: &Chunk, target_language: &str) -> Result<String> {
    let mut lines = Vec::with_capacity(chunk.len());
    for (key, text) in &chunk.texts {
        let value = serde_json::to_string(text).with_context(|| "failed to encode chunk text")?;
        lines.push(format!("  \"{}\": {}", key, value));
    }
    Ok(format!(
        "Translate the following {} values into {}:\n\n{{\n{}\n}}",
        chunk.len(),
        target_language.trim(),
        lines.join(",\n")
    ))
}

#[derive(Debug, Deserialize)]
struct ToolArgs {
    translations: Vec<ToolEntry>,
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    key: usize,
    text: String,
}

/// Validates tool arguments against the chunk they answer.
pub fn parse_tool_args(value: Value, chunk: &Chunk) -> Result<BTreeMap<usize, String>> {
    let args: ToolArgs = serde_json::from_value(value)
        .with_context(|| format!("arguments do not follow protocol v{}", PROTOCOL_VERSION))?;

    let mut translations = BTreeMap::new();
    for entry in args.translations {
        if translations.insert(entry.key, entry.text).is_some() {
            return Err(anyhow!("key {} appears more than once", entry.key));
        }
    }

    if translations.len() != chunk.len() {
        return Err(anyhow!(
            "expected {} translations, got {}",
            chunk.len(),
            translations.len()
        ));
    }
    if !translations.keys().copied().eq(chunk.keys()) {
        let unexpected = translations
            .keys()
            .filter(|key| !chunk.texts.contains_key(*key))
            .collect::<Vec<_>>();
        return Err(anyhow!("unexpected keys {:?}", unexpected));
    }
    Ok(translations)
}
