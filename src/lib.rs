use anyhow::{Context, Result, anyhow};
use std::num::NonZeroUsize;
use std::path::Path;
use tracing::{info, warn};

pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod logging;
pub mod partition;
pub mod providers;
pub mod reassemble;
pub mod server;
pub mod settings;
pub mod text;
pub mod translations;
pub mod translator;

#[cfg(test)]
mod test_util;

pub use cache::TranslationCache;
pub use dispatcher::{Dispatcher, FailurePolicy};
pub use error::{JobError, ReassemblyError, TranslateError};
pub use job::{Chunk, ChunkResult, ChunkStatus, TranslationJob, TranslationResult};
pub use providers::{Claude, Gemini, OpenAI, Provider, ProviderImpl, ProviderKind, ProviderUsage};
pub use translations::PromptStyle;
pub use translator::Translator;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub lang: String,
    pub model: Option<String>,
    pub key: Option<String>,
    pub settings_path: Option<String>,
    pub fan_out: Option<usize>,
    pub paragraphs: bool,
    pub addr: Option<String>,
}

/// Translates `input` once and returns the text to print. Each non-blank
/// line is an item, or each paragraph with `paragraphs` set.
pub async fn run(config: Config, input: Option<String>) -> Result<String> {
    let settings = load_settings(&config)?;
    let input = input.unwrap_or_default();
    let items = if config.paragraphs {
        text::split_paragraphs(&input)
    } else {
        text::split_lines(&input)
    };
    if items.is_empty() {
        return Err(anyhow!("stdin is empty"));
    }
    if config.lang.trim().is_empty() {
        return Err(anyhow!("target language is empty"));
    }

    let provider = build_provider(&config, &settings)?;
    let mut translator = Translator::new(provider, &settings);
    if config.paragraphs {
        translator = translator.with_prompt_style(PromptStyle::Prose);
    }
    let dispatcher = Dispatcher::new(translator, &settings);

    let result = dispatcher
        .run(TranslationJob::new(items, config.lang))
        .await
        .with_context(|| "translation failed")?;
    if !result.fallback.is_empty() {
        warn!(items = ?result.fallback, "some items were left untranslated");
    }

    Ok(if config.paragraphs {
        text::join_paragraphs(&result.items)
    } else {
        result.items.join("\n")
    })
}

/// Serves `POST /translate` until interrupted.
pub async fn serve(config: Config) -> Result<()> {
    let settings = load_settings(&config)?;
    let provider = build_provider(&config, &settings)?;
    let dispatcher = Dispatcher::new(Translator::new(provider, &settings), &settings);
    let state = server::ServerState::new(dispatcher, &settings);
    let addr = config
        .addr
        .clone()
        .unwrap_or_else(|| settings.server_addr.clone());
    server::run_server(state, &addr).await
}

fn load_settings(config: &Config) -> Result<settings::Settings> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    if let Some(fan_out) = config.fan_out {
        settings.fan_out =
            NonZeroUsize::new(fan_out).ok_or_else(|| anyhow!("--fan-out must be at least 1"))?;
    }
    Ok(settings)
}

fn build_provider(config: &Config, settings: &settings::Settings) -> Result<ProviderImpl> {
    let model_arg = config.model.as_deref().or(settings.model.as_deref());
    let selection = providers::resolve_provider_selection(model_arg, config.key.as_deref())?;
    let key = providers::resolve_key(selection.provider, config.key.as_deref())
        .with_context(|| "no API key found for selected provider")?;
    let model = selection
        .requested_model
        .unwrap_or_else(|| selection.provider.default_model().to_string());
    info!(
        provider = selection.provider.as_str(),
        model = %model,
        fan_out = settings.fan_out.get(),
        "using model"
    );
    Ok(providers::build_provider(
        selection.provider,
        key,
        model,
        settings.temperature,
        settings.call_timeout,
    ))
}
