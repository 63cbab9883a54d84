use std::time::Duration;

use crate::cache::TranslationCache;
use crate::dispatcher::Dispatcher;
use crate::providers::Provider;
use crate::settings::Settings;

/// Shared by every request. The provider behind `dispatcher` is built once
/// at startup.
pub struct ServerState<P: Provider> {
    pub(crate) dispatcher: Dispatcher<P>,
    pub(crate) cache: Option<TranslationCache>,
    pub(crate) request_timeout: Duration,
}

impl<P: Provider> ServerState<P> {
    pub fn new(dispatcher: Dispatcher<P>, settings: &Settings) -> Self {
        Self {
            dispatcher,
            cache: TranslationCache::from_settings(settings),
            request_timeout: settings.request_timeout,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }
}
