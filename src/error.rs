use thiserror::Error;

use crate::job::Chunk;
use crate::providers::ProviderError;

/// Why a single chunk could not be translated.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("chunk {chunk_id}: malformed model output: {reason}")]
    MalformedModelOutput {
        chunk_id: usize,
        reason: String,
        raw: String,
        chunk: Chunk,
    },
    #[error("chunk {chunk_id}: gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        chunk_id: usize,
        attempts: u32,
        #[source]
        last: ProviderError,
    },
    #[error("chunk {chunk_id}: {source}")]
    Remote {
        chunk_id: usize,
        #[source]
        source: ProviderError,
    },
    #[error("chunk {chunk_id}: failed to build prompt: {message}")]
    Prompt { chunk_id: usize, message: String },
}

impl TranslateError {
    pub fn chunk_id(&self) -> usize {
        match self {
            TranslateError::MalformedModelOutput { chunk_id, .. }
            | TranslateError::RetryExhausted { chunk_id, .. }
            | TranslateError::Remote { chunk_id, .. }
            | TranslateError::Prompt { chunk_id, .. } => *chunk_id,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("expected {expected} chunk results, got {got}")]
    ChunkCount { expected: usize, got: usize },
    #[error("missing result for chunk {0}")]
    MissingChunk(usize),
    #[error("chunk {chunk_id} returned keys {got:?}, expected 0..{expected}")]
    KeyMismatch {
        chunk_id: usize,
        expected: usize,
        got: Vec<usize>,
    },
}

/// Job-level failure; the whole job yields nothing when one of these occurs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid request: {0}")]
    RequestShape(String),
    #[error(transparent)]
    Chunk(#[from] TranslateError),
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
}
