use std::collections::BTreeMap;

use crate::providers::ProviderUsage;

/// One end-to-end request: ordered source strings and the language to
/// translate them into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationJob {
    pub items: Vec<String>,
    pub target_language: String,
}

impl TranslationJob {
    pub fn new(items: Vec<String>, target_language: impl Into<String>) -> Self {
        Self {
            items,
            target_language: target_language.into(),
        }
    }
}

/// A contiguous slice of a job. Keys are dense `0..len` in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: usize,
    pub texts: BTreeMap<usize, String>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.texts.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> + '_ {
        self.texts.values().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Translated,
    /// Succeeded after this many attempts in total.
    Retried { attempts: u32 },
    /// The chunk failed and carries its original strings.
    FellBack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResult {
    pub chunk_id: usize,
    pub translations: BTreeMap<usize, String>,
    pub status: ChunkStatus,
    pub usage: Option<ProviderUsage>,
}

impl ChunkResult {
    pub fn translated(chunk_id: usize, translations: BTreeMap<usize, String>) -> Self {
        Self {
            chunk_id,
            translations,
            status: ChunkStatus::Translated,
            usage: None,
        }
    }

    pub fn fell_back(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id,
            translations: chunk.texts.clone(),
            status: ChunkStatus::FellBack,
            usage: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub items: Vec<String>,
    pub language: String,
    /// Indices into `items` that hold untranslated originals.
    pub fallback: Vec<usize>,
    pub usage: Option<ProviderUsage>,
}
