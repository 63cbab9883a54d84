use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatcher::FailurePolicy;
use crate::providers::{DEFAULT_CALL_TIMEOUT, RetryPolicy};
use crate::translations::PromptStyle;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub fan_out: NonZeroUsize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_concurrent_calls: usize,
    pub on_chunk_failure: FailurePolicy,
    pub prompt_style: PromptStyle,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub call_timeout: Duration,
    pub server_addr: String,
    pub request_timeout: Duration,
    pub cache_enabled: bool,
    pub cache_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fan_out: NonZeroUsize::new(5).unwrap_or(NonZeroUsize::MIN),
            max_retries: 3,
            retry_backoff: Duration::from_secs(30),
            max_concurrent_calls: 16,
            on_chunk_failure: FailurePolicy::Fail,
            prompt_style: PromptStyle::Interface,
            model: None,
            temperature: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            server_addr: "0.0.0.0:3001".to_string(),
            request_timeout: Duration::from_secs(120),
            cache_enabled: true,
            cache_capacity: 10_000,
        }
    }
}

impl Settings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.retry_backoff,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    translator: Option<TranslatorSettings>,
    model: Option<ModelSettings>,
    server: Option<ServerSettings>,
    cache: Option<CacheSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslatorSettings {
    fan_out: Option<usize>,
    max_retries: Option<u32>,
    retry_backoff_secs: Option<u64>,
    max_concurrent_calls: Option<usize>,
    on_chunk_failure: Option<String>,
    prompt_style: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelSettings {
    model: Option<String>,
    temperature: Option<f32>,
    call_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    addr: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheSettings {
    enabled: Option<bool>,
    capacity: Option<usize>,
}

/// Loads settings from the embedded defaults, then every settings file that
/// exists, later files overriding earlier ones.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults)?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            settings.merge_file(&path)?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        let parsed: SettingsFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        self.merge(parsed)
            .with_context(|| format!("invalid settings: {}", path.display()))
    }

    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(translator) = incoming.translator {
            if let Some(fan_out) = translator.fan_out {
                self.fan_out = NonZeroUsize::new(fan_out)
                    .ok_or_else(|| anyhow!("translator.fan_out must be at least 1"))?;
            }
            if let Some(retries) = translator.max_retries {
                self.max_retries = retries;
            }
            if let Some(secs) = translator.retry_backoff_secs {
                self.retry_backoff = Duration::from_secs(secs);
            }
            if let Some(limit) = translator.max_concurrent_calls {
                if limit == 0 {
                    return Err(anyhow!("translator.max_concurrent_calls must be at least 1"));
                }
                self.max_concurrent_calls = limit;
            }
            if let Some(policy) = translator.on_chunk_failure {
                self.on_chunk_failure = FailurePolicy::parse(&policy).ok_or_else(|| {
                    anyhow!(
                        "unknown translator.on_chunk_failure '{}' (expected fail or keep_original)",
                        policy
                    )
                })?;
            }
            if let Some(style) = translator.prompt_style {
                self.prompt_style = PromptStyle::parse(&style).ok_or_else(|| {
                    anyhow!(
                        "unknown translator.prompt_style '{}' (expected interface or prose)",
                        style
                    )
                })?;
            }
        }
        if let Some(model) = incoming.model {
            if let Some(name) = model.model
                && !name.trim().is_empty()
            {
                self.model = Some(name);
            }
            if let Some(temperature) = model.temperature {
                self.temperature = Some(temperature);
            }
            if let Some(secs) = model.call_timeout_secs {
                if secs == 0 {
                    return Err(anyhow!("model.call_timeout_secs must be at least 1"));
                }
                self.call_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = server.addr
                && !addr.trim().is_empty()
            {
                self.server_addr = addr;
            }
            if let Some(secs) = server.request_timeout_secs
                && secs > 0
            {
                self.request_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(cache) = incoming.cache {
            if let Some(enabled) = cache.enabled {
                self.cache_enabled = enabled;
            }
            if let Some(capacity) = cache.capacity {
                self.cache_capacity = capacity;
            }
        }
        Ok(())
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".batch-llm-translator"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn embedded_defaults_parse() {
        let mut settings = Settings::default();
        let parsed: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML).expect("defaults");
        settings.merge(parsed).expect("merge");
        assert_eq!(settings.fan_out.get(), 5);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_backoff, Duration::from_secs(30));
        assert_eq!(settings.on_chunk_failure, FailurePolicy::Fail);
        assert_eq!(settings.prompt_style, PromptStyle::Interface);
        assert!(settings.model.is_none());
        assert_eq!(settings.temperature, Some(0.3));
        assert_eq!(settings.call_timeout, Duration::from_secs(60));
        assert_eq!(settings.server_addr, "0.0.0.0:3001");
    }

    #[test]
    fn extra_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "[translator]\nfan_out = 3\non_chunk_failure = \"keep_original\"\n[cache]\nenabled = false"
        )
        .expect("write");
        let settings = load_settings(Some(file.path())).expect("settings");
        assert_eq!(settings.fan_out.get(), 3);
        assert_eq!(settings.on_chunk_failure, FailurePolicy::KeepOriginal);
        assert!(!settings.cache_enabled);
    }

    #[test]
    fn zero_fan_out_is_rejected() {
        let mut settings = Settings::default();
        let parsed: SettingsFile = toml::from_str("[translator]\nfan_out = 0").expect("parse");
        assert!(settings.merge(parsed).is_err());
    }

    #[test]
    fn call_timeout_is_read_and_zero_rejected() {
        let mut settings = Settings::default();
        let parsed: SettingsFile =
            toml::from_str("[model]\ncall_timeout_secs = 15").expect("parse");
        settings.merge(parsed).expect("merge");
        assert_eq!(settings.call_timeout, Duration::from_secs(15));

        let parsed: SettingsFile = toml::from_str("[model]\ncall_timeout_secs = 0").expect("parse");
        assert!(settings.merge(parsed).is_err());
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let mut settings = Settings::default();
        let parsed: SettingsFile =
            toml::from_str("[translator]\non_chunk_failure = \"ignore\"").expect("parse");
        let err = settings.merge(parsed).unwrap_err();
        assert!(err.to_string().contains("on_chunk_failure"));
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        let err = load_settings(Some(Path::new("/nonexistent/settings.toml"))).unwrap_err();
        assert!(err.to_string().contains("settings file not found"));
    }
}
