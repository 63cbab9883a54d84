//! Process-local memo of finished translations, keyed by the md5 of the
//! source text and the target language. Entries are evicted oldest first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::dispatcher::Dispatcher;
use crate::error::JobError;
use crate::job::{TranslationJob, TranslationResult};
use crate::providers::Provider;
use crate::settings::Settings;

#[derive(Debug)]
pub struct TranslationCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// `None` when caching is switched off or has no room.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        (settings.cache_enabled && settings.cache_capacity > 0)
            .then(|| Self::new(settings.cache_capacity))
    }

    pub fn get(&self, language: &str, text: &str) -> Option<String> {
        self.lock().entries.get(&cache_key(language, text)).cloned()
    }

    pub fn insert(&self, language: &str, text: &str, translation: String) {
        if self.capacity == 0 {
            return;
        }
        let key = cache_key(language, text);
        let mut inner = self.lock();
        if inner.entries.insert(key.clone(), translation).is_some() {
            return;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // entries are plain strings, a panic elsewhere cannot leave them torn
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn cache_key(language: &str, text: &str) -> String {
    let language = language.trim().to_lowercase();
    format!("{:x}", md5::compute(format!("{}\u{0}{}", language, text)))
}

/// Runs `job` through `dispatcher`, answering items already in `cache` without
/// a model call and storing every fresh translation.
///
/// Fallback indices are reported against the original job.
pub async fn translate_cached<P: Provider>(
    dispatcher: &Dispatcher<P>,
    cache: Option<&TranslationCache>,
    job: TranslationJob,
) -> Result<TranslationResult, JobError> {
    let Some(cache) = cache else {
        return dispatcher.run(job).await;
    };
    if job.target_language.trim().is_empty() {
        return Err(JobError::RequestShape("target language is empty".to_string()));
    }

    let TranslationJob {
        items,
        target_language,
    } = job;
    let mut output = items
        .iter()
        .map(|item| cache.get(&target_language, item))
        .collect::<Vec<_>>();
    let missing = output
        .iter()
        .enumerate()
        .filter(|(_, hit)| hit.is_none())
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    debug!(
        hits = items.len() - missing.len(),
        misses = missing.len(),
        "cache lookup"
    );

    if missing.is_empty() {
        return Ok(TranslationResult {
            items: output.into_iter().flatten().collect(),
            language: target_language,
            fallback: Vec::new(),
            usage: None,
        });
    }

    let pending = missing
        .iter()
        .map(|&index| items[index].clone())
        .collect::<Vec<_>>();
    let fresh = dispatcher
        .run(TranslationJob::new(pending, target_language.clone()))
        .await?;

    let fell_back = fresh
        .fallback
        .iter()
        .map(|&position| missing[position])
        .collect::<Vec<_>>();
    for (position, translation) in fresh.items.into_iter().enumerate() {
        let index = missing[position];
        if fresh.fallback.binary_search(&position).is_err() {
            cache.insert(&target_language, &items[index], translation.clone());
        }
        output[index] = Some(translation);
    }

    Ok(TranslationResult {
        items: output
            .into_iter()
            .zip(items)
            .map(|(translated, original)| translated.unwrap_or(original))
            .collect(),
        language: target_language,
        fallback: fell_back,
        usage: fresh.usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::FailurePolicy;
    use crate::providers::RetryPolicy;
    use crate::test_util::{Step, TestProvider, rate_limited, suffix_args};
    use crate::translator::Translator;
    use std::time::Duration;

    fn dispatcher(provider: TestProvider) -> Dispatcher<TestProvider> {
        let settings = Settings::default();
        let translator = Translator::new(provider, &settings).with_retry_policy(RetryPolicy {
            max_retries: 0,
            backoff: Duration::from_millis(1),
        });
        Dispatcher::new(translator, &settings)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn evicts_oldest_entry_first() {
        let cache = TranslationCache::new(2);
        cache.insert("ko", "a", "A".to_string());
        cache.insert("ko", "b", "B".to_string());
        cache.insert("ko", "c", "C".to_string());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("ko", "a"), None);
        assert_eq!(cache.get("ko", "c").as_deref(), Some("C"));
    }

    #[test]
    fn language_is_part_of_the_key() {
        let cache = TranslationCache::new(4);
        cache.insert("Korean", "next", "다음".to_string());
        assert_eq!(cache.get(" korean ", "next").as_deref(), Some("다음"));
        assert_eq!(cache.get("Japanese", "next"), None);
    }

    #[test]
    fn disabled_by_settings() {
        let mut settings = Settings::default();
        settings.cache_enabled = false;
        assert!(TranslationCache::from_settings(&settings).is_none());
        settings.cache_enabled = true;
        settings.cache_capacity = 0;
        assert!(TranslationCache::from_settings(&settings).is_none());
    }

    #[tokio::test]
    async fn second_job_only_sends_new_items() {
        let provider = TestProvider::suffix("!");
        let dispatcher = dispatcher(provider.clone());
        let cache = TranslationCache::new(100);

        let first = translate_cached(
            &dispatcher,
            Some(&cache),
            TranslationJob::new(strings(&["a", "b"]), "ko"),
        )
        .await
        .expect("first");
        assert_eq!(first.items, strings(&["a!", "b!"]));
        assert_eq!(provider.calls(), 2);

        let second = translate_cached(
            &dispatcher,
            Some(&cache),
            TranslationJob::new(strings(&["b", "c", "a"]), "ko"),
        )
        .await
        .expect("second");
        assert_eq!(second.items, strings(&["b!", "c!", "a!"]));
        assert_eq!(provider.calls(), 3);
        assert_eq!(provider.seen().last().map(|seen| seen.len()), Some(1));
    }

    #[tokio::test]
    async fn fully_cached_job_makes_no_calls() {
        let provider = TestProvider::suffix("!");
        let dispatcher = dispatcher(provider.clone());
        let cache = TranslationCache::new(10);
        cache.insert("ko", "a", "에이".to_string());
        let result = translate_cached(
            &dispatcher,
            Some(&cache),
            TranslationJob::new(strings(&["a"]), "ko"),
        )
        .await
        .expect("job");
        assert_eq!(result.items, strings(&["에이"]));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn fallback_indices_map_back_and_are_not_cached() {
        let provider = TestProvider::new(|texts, _| {
            if texts.values().any(|text| text == "z") {
                Step::err(rate_limited())
            } else {
                Step::ok(suffix_args(texts, "!"))
            }
        });
        let dispatcher =
            dispatcher(provider).with_failure_policy(FailurePolicy::KeepOriginal);
        let cache = TranslationCache::new(10);
        cache.insert("ko", "a", "A".to_string());

        let result = translate_cached(
            &dispatcher,
            Some(&cache),
            TranslationJob::new(strings(&["a", "y", "z"]), "ko"),
        )
        .await
        .expect("job");
        assert_eq!(result.items, strings(&["A", "y!", "z"]));
        assert_eq!(result.fallback, vec![2]);
        assert_eq!(cache.get("ko", "z"), None);
        assert_eq!(cache.get("ko", "y").as_deref(), Some("y!"));
    }
}
