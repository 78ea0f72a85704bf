//! batcher.rs
//!
//! Splits a (possibly lazy) sequence of documents into upload batches of at
//! most `BatchSize` documents, in input order. The last batch may be short;
//! an empty input yields no batches.

use std::num::NonZeroUsize;

use thiserror::Error;

use crate::transform::doc_normalizer::NormalizedDoc;

/// Hard per-request document limit of the search service.
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Error, PartialEq)]
#[error("batch size must be between 1 and {MAX_BATCH_SIZE}, got {0}")]
pub struct InvalidBatchSize(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize(NonZeroUsize);

impl BatchSize {
    pub fn new(n: usize) -> Result<Self, InvalidBatchSize> {
        match NonZeroUsize::new(n) {
            Some(nz) if n <= MAX_BATCH_SIZE => Ok(Self(nz)),
            _ => Err(InvalidBatchSize(n)),
        }
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        const MAX: NonZeroUsize = match NonZeroUsize::new(MAX_BATCH_SIZE) {
            Some(n) => n,
            None => panic!("MAX_BATCH_SIZE must be non-zero"),
        };
        Self(MAX)
    }
}

impl std::fmt::Display for BatchSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BatchSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: usize = s.trim().parse().map_err(|e| format!("{e}"))?;
        BatchSize::new(n).map_err(|e| e.to_string())
    }
}

/// One upload unit. `sequence` is 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub sequence: usize,
    docs: Vec<NormalizedDoc>,
}

impl Batch {
    pub fn documents(&self) -> &[NormalizedDoc] {
        &self.docs
    }

    pub fn ids(&self) -> Vec<String> {
        self.docs.iter().map(|d| d.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Lazy batching adapter returned by [`batches`].
pub struct Batches<I> {
    inner: I,
    size: usize,
    next_sequence: usize,
}

impl<I> Iterator for Batches<I>
where
    I: Iterator<Item = NormalizedDoc>,
{
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let docs: Vec<NormalizedDoc> = self.inner.by_ref().take(self.size).collect();
        if docs.is_empty() {
            return None;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Some(Batch { sequence, docs })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lo, hi) = self.inner.size_hint();
        (lo.div_ceil(self.size), hi.map(|h| h.div_ceil(self.size)))
    }
}

pub fn batches<I>(docs: I, size: BatchSize) -> Batches<I::IntoIter>
where
    I: IntoIterator<Item = NormalizedDoc>,
{
    Batches {
        inner: docs.into_iter(),
        size: size.get(),
        next_sequence: 1,
    }
}

/// Number of batches `n` documents produce: `ceil(n / size)`.
pub fn batch_count(n: usize, size: BatchSize) -> usize {
    n.div_ceil(size.get())
}
