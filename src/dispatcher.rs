use futures_util::future::{join_all, try_join_all};
use std::num::NonZeroUsize;
use tracing::{error, info, warn};

use crate::error::JobError;
use crate::job::{Chunk, ChunkResult, ChunkStatus, TranslationJob, TranslationResult};
use crate::partition::partition;
use crate::providers::{Provider, ProviderUsage};
use crate::reassemble::reassemble;
use crate::settings::Settings;
use crate::translator::Translator;

/// What a job does when one of its chunks cannot be translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The whole job fails.
    #[default]
    Fail,
    /// The chunk keeps its original strings and their indices are reported.
    KeepOriginal,
}

impl FailurePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "fail" => Some(FailurePolicy::Fail),
            "keep_original" | "keep-original" => Some(FailurePolicy::KeepOriginal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Fail => "fail",
            FailurePolicy::KeepOriginal => "keep_original",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher<P: Provider> {
    translator: Translator<P>,
    fan_out: NonZeroUsize,
    policy: FailurePolicy,
}

impl<P: Provider> Dispatcher<P> {
    pub fn new(translator: Translator<P>, settings: &Settings) -> Self {
        Self {
            translator,
            fan_out: settings.fan_out,
            policy: settings.on_chunk_failure,
        }
    }

    pub fn with_fan_out(mut self, fan_out: NonZeroUsize) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn fan_out(&self) -> NonZeroUsize {
        self.fan_out
    }

    pub async fn run(&self, job: TranslationJob) -> Result<TranslationResult, JobError> {
        self.run_job(job, self.fan_out).await
    }

    /// Splits the job into `fan_out` chunks, translates them concurrently and
    /// joins the results in input order.
    ///
    /// All chunk calls are driven inside the returned future, so dropping it
    /// abandons every call still in flight.
    pub async fn run_job(
        &self,
        job: TranslationJob,
        fan_out: NonZeroUsize,
    ) -> Result<TranslationResult, JobError> {
        let TranslationJob {
            items,
            target_language,
        } = job;
        if target_language.trim().is_empty() {
            return Err(JobError::RequestShape("target language is empty".to_string()));
        }

        let total = items.len();
        let chunks = partition(items, fan_out);
        let lens = chunks.iter().map(Chunk::len).collect::<Vec<_>>();
        info!(
            items = total,
            chunks = chunks.len(),
            language = %target_language,
            "dispatching job"
        );

        let calls = chunks
            .iter()
            .map(|chunk| self.translator.translate(chunk, &target_language))
            .collect::<Vec<_>>();
        let results = match self.policy {
            FailurePolicy::Fail => try_join_all(calls).await.map_err(|err| {
                error!(chunk = err.chunk_id(), "job failed: {}", err);
                err
            })?,
            FailurePolicy::KeepOriginal => join_all(calls)
                .await
                .into_iter()
                .zip(&chunks)
                .map(|(outcome, chunk)| match outcome {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(chunk = chunk.id, "keeping original text: {}", err);
                        ChunkResult::fell_back(chunk)
                    }
                })
                .collect(),
        };

        let fallback = fallback_indices(&results, &lens);
        let usage = results.iter().fold(None, |total, result| {
            ProviderUsage::merge(total, result.usage.as_ref())
        });
        if let Some(usage) = &usage {
            info!(
                prompt_tokens = usage.prompt_tokens.unwrap_or(0),
                completion_tokens = usage.completion_tokens.unwrap_or(0),
                total_tokens = usage.total_tokens.unwrap_or(0),
                "token usage"
            );
        }

        let items = reassemble(results, &lens)?;
        Ok(TranslationResult {
            items,
            language: target_language,
            fallback,
            usage,
        })
    }
}

fn fallback_indices(results: &[ChunkResult], lens: &[usize]) -> Vec<usize> {
    let offsets = lens
        .iter()
        .scan(0, |offset, len| {
            let start = *offset;
            *offset += len;
            Some(start)
        })
        .collect::<Vec<_>>();
    let mut indices = results
        .iter()
        .filter(|result| result.status == ChunkStatus::FellBack)
        .filter_map(|result| {
            let start = *offsets.get(result.chunk_id)?;
            let len = *lens.get(result.chunk_id)?;
            Some(start..start + len)
        })
        .flatten()
        .collect::<Vec<_>>();
    indices.sort_unstable();
    indices
}
