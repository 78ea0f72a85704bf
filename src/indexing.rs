// src/indexing.rs
//! Bulk ingestion pipeline:
//! - read the tabular source once (file or URL)
//! - normalize → NormalizedDoc (malformed rows set aside)
//! - partition into fixed-size batches, input order preserved
//! - upload each batch with bounded retries
//! - report what was sent, what failed and why
//!
//! Batches are independent, so up to `concurrency` of them may be in flight at
//! once; results are still folded into the report in batch order. A failed
//! batch never stops the run; an authentication failure or a cancellation
//! stops scheduling new batches.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::client::retry::RetryPolicy;
use crate::client::search_client::{
    DocumentUploader, IndexAction, IndexingResult, SearchClient, TransportError,
};
use crate::index::batcher::{Batch, BatchSize, batch_count, batches};
use crate::ingest::source_reader::{
    RecordSet, SourceError, SourceFormat, SourceLocation, read_records,
};
use crate::transform::doc_normalizer::{DocNormalizer, MalformedRecord, NormalizedDoc};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("reading source: {0}")]
    Source(#[from] SourceError),

    #[error("ingestion aborted: {0}")]
    Fatal(String),

    #[error("no batch could be sent ({failed} failed)")]
    NothingSent { failed: usize },

    #[error("ingestion cancelled after {sent} of {total} batches")]
    Cancelled { sent: usize, total: usize },
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: BatchSize,
    pub retry: RetryPolicy,
    /// Batches in flight at once; 1 uploads strictly one after another.
    pub concurrency: usize,
    pub action: IndexAction,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: BatchSize::default(),
            retry: RetryPolicy::default(),
            concurrency: 1,
            action: IndexAction::Upload,
        }
    }
}

/// Cooperative cancellation, checked before each batch starts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    pub id: String,
    pub status_code: u16,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    pub sequence: usize,
    pub ids: Vec<String>,
    pub error: String,
}

/// Everything a run did, for the console summary and the optional JSON file.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub index: String,
    pub records_read: usize,
    pub documents_normalized: usize,
    pub malformed: Vec<MalformedRecord>,
    pub duplicate_ids: Vec<String>,
    pub batches_total: usize,
    pub batches_sent: usize,
    pub batches_failed: usize,
    pub batches_skipped: usize,
    pub documents_sent: usize,
    pub documents_succeeded: usize,
    pub document_failures: Vec<DocumentFailure>,
    pub failed_batches: Vec<FailedBatch>,
    pub cancelled: bool,
    pub aborted: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new<S: Into<String>>(index: S) -> Self {
        Self {
            index: index.into(),
            records_read: 0,
            documents_normalized: 0,
            malformed: Vec::new(),
            duplicate_ids: Vec::new(),
            batches_total: 0,
            batches_sent: 0,
            batches_failed: 0,
            batches_skipped: 0,
            documents_sent: 0,
            documents_succeeded: 0,
            document_failures: Vec::new(),
            failed_batches: Vec::new(),
            cancelled: false,
            aborted: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Isolated document or batch failures do not fail the run; an abort, a
    /// cancellation, or a run where every attempted batch failed does.
    pub fn outcome(&self) -> Result<(), IngestError> {
        if let Some(reason) = &self.aborted {
            return Err(IngestError::Fatal(reason.clone()));
        }
        if self.cancelled {
            return Err(IngestError::Cancelled {
                sent: self.batches_sent,
                total: self.batches_total,
            });
        }
        if self.batches_sent == 0 && self.batches_failed > 0 {
            return Err(IngestError::NothingSent {
                failed: self.batches_failed,
            });
        }
        Ok(())
    }

    fn record(&mut self, outcome: BatchOutcome) {
        match outcome {
            BatchOutcome::Sent { sequence, docs, results } => {
                self.batches_sent += 1;
                self.documents_sent += docs;
                for r in results {
                    if r.status {
                        self.documents_succeeded += 1;
                    } else {
                        self.document_failures.push(DocumentFailure {
                            id: r.key,
                            status_code: r.status_code,
                            message: r.error_message,
                        });
                    }
                }
                info!(batch = sequence, docs, "batch sent");
            }
            BatchOutcome::Failed { sequence, ids, error } => {
                self.batches_failed += 1;
                error!(batch = sequence, docs = ids.len(), error = %error, "batch failed");
                if error.is_fatal() && self.aborted.is_none() {
                    self.aborted = Some(error.to_string());
                }
                self.failed_batches.push(FailedBatch {
                    sequence,
                    ids,
                    error: error.to_string(),
                });
            }
            BatchOutcome::Skipped { sequence, cancelled } => {
                self.batches_skipped += 1;
                self.cancelled |= cancelled;
                warn!(batch = sequence, cancelled, "batch skipped");
            }
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "index:                {}", self.index)?;
        writeln!(f, "records read:         {}", self.records_read)?;
        writeln!(f, "documents normalized: {}", self.documents_normalized)?;
        writeln!(
            f,
            "batches sent:         {} of {} ({} failed, {} skipped)",
            self.batches_sent, self.batches_total, self.batches_failed, self.batches_skipped
        )?;
        writeln!(
            f,
            "documents sent:       {} ({} accepted)",
            self.documents_sent, self.documents_succeeded
        )?;
        if !self.malformed.is_empty() {
            writeln!(f, "malformed records:    {}", self.malformed.len())?;
            for m in &self.malformed {
                writeln!(f, "  - {}", m.reason)?;
            }
        }
        if !self.duplicate_ids.is_empty() {
            writeln!(f, "duplicate ids:        {}", self.duplicate_ids.join(", "))?;
        }
        if !self.document_failures.is_empty() {
            writeln!(f, "rejected documents:   {}", self.document_failures.len())?;
            for d in &self.document_failures {
                writeln!(
                    f,
                    "  - {} [{}] {}",
                    d.id,
                    d.status_code,
                    d.message.as_deref().unwrap_or("")
                )?;
            }
        }
        for b in &self.failed_batches {
            writeln!(
                f,
                "failed batch #{} ({} docs, ids {}..{}): {}",
                b.sequence,
                b.ids.len(),
                b.ids.first().map(String::as_str).unwrap_or(""),
                b.ids.last().map(String::as_str).unwrap_or(""),
                b.error
            )?;
        }
        if self.cancelled {
            writeln!(f, "run was cancelled")?;
        }
        if let Some(reason) = &self.aborted {
            writeln!(f, "run aborted: {reason}")?;
        }
        Ok(())
    }
}

enum BatchOutcome {
    Sent {
        sequence: usize,
        docs: usize,
        results: Vec<IndexingResult>,
    },
    Failed {
        sequence: usize,
        ids: Vec<String>,
        error: TransportError,
    },
    Skipped {
        sequence: usize,
        cancelled: bool,
    },
}

/// Submits batches to an uploader and folds the results into a report.
pub struct UploadDriver<'a, U: DocumentUploader + ?Sized> {
    uploader: &'a U,
    options: &'a IngestOptions,
    cancel: CancelFlag,
    abort: AtomicBool,
    progress: ProgressBar,
}

impl<'a, U: DocumentUploader + ?Sized> UploadDriver<'a, U> {
    pub fn new(uploader: &'a U, options: &'a IngestOptions, cancel: CancelFlag) -> Self {
        Self {
            uploader,
            options,
            cancel,
            abort: AtomicBool::new(false),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run<I>(&self, batches: I, report: &mut RunReport)
    where
        I: IntoIterator<Item = Batch>,
    {
        let mut outcomes = stream::iter(batches)
            .map(|batch| self.upload_one(batch))
            .buffered(self.options.concurrency.max(1));

        while let Some(outcome) = outcomes.next().await {
            if let BatchOutcome::Failed { error, .. } = &outcome {
                if error.is_fatal() {
                    self.abort.store(true, Ordering::SeqCst);
                }
            }
            report.record(outcome);
            self.progress.inc(1);
        }

        self.progress.finish_and_clear();
    }

    async fn upload_one(&self, batch: Batch) -> BatchOutcome {
        let sequence = batch.sequence;
        if self.abort.load(Ordering::SeqCst) {
            return BatchOutcome::Skipped {
                sequence,
                cancelled: false,
            };
        }
        if self.cancel.is_cancelled() {
            return BatchOutcome::Skipped {
                sequence,
                cancelled: true,
            };
        }

        let label = format!("batch #{sequence}");
        let action = self.options.action;
        let uploader = self.uploader;
        let docs = batch.documents();
        let result = self
            .options
            .retry
            .run(&label, move || uploader.upload_batch(docs, action))
            .await;

        match result {
            Ok(results) => BatchOutcome::Sent {
                sequence,
                docs: batch.len(),
                results,
            },
            Err(error) => BatchOutcome::Failed {
                sequence,
                ids: batch.ids(),
                error,
            },
        }
    }
}

/// Normalizes, batches and uploads an in-memory record set.
pub async fn ingest_records<U: DocumentUploader + ?Sized>(
    uploader: &U,
    index: &str,
    records: &RecordSet,
    normalizer: &DocNormalizer,
    options: &IngestOptions,
    cancel: CancelFlag,
    progress: ProgressBar,
) -> RunReport {
    let mut report = RunReport::new(index);
    report.records_read = records.len();

    let normalized = normalizer.normalize_all(records);
    report.documents_normalized = normalized.documents.len();
    report.malformed = normalized.malformed;
    report.duplicate_ids = duplicate_ids(&normalized.documents);
    if !report.duplicate_ids.is_empty() {
        warn!(
            count = report.duplicate_ids.len(),
            "duplicate document ids; later documents overwrite earlier ones"
        );
    }

    report.batches_total = batch_count(normalized.documents.len(), options.batch_size);
    progress.set_length(report.batches_total as u64);
    info!(
        index,
        documents = report.documents_normalized,
        batches = report.batches_total,
        batch_size = options.batch_size.get(),
        concurrency = options.concurrency,
        "uploading"
    );

    UploadDriver::new(uploader, options, cancel)
        .with_progress(progress)
        .run(batches(normalized.documents, options.batch_size), &mut report)
        .await;

    report.finished_at = Some(Utc::now());
    report
}

/// Reads the source and ingests it into the client's index.
pub async fn index(
    client: &SearchClient,
    source: &str,
    format: Option<SourceFormat>,
    normalizer: &DocNormalizer,
    options: &IngestOptions,
    cancel: CancelFlag,
) -> Result<RunReport, IngestError> {
    let location = SourceLocation::parse(source);
    let format = format.unwrap_or_else(|| SourceFormat::infer(&location));
    eprintln!(
        "Ingesting:\n  source: {location}\n  index: {}\n",
        client.index_name()
    );

    let records = read_records(&location, format, client.http()).await?;

    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{prefix} {bar:40} {pos}/{len} batches {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix("[upload]");

    Ok(ingest_records(client, client.index_name(), &records, normalizer, options, cancel, pb).await)
}

fn duplicate_ids(docs: &[NormalizedDoc]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(docs.len());
    let mut dups = Vec::new();
    for d in docs {
        if !seen.insert(d.id.as_str()) && !dups.contains(&d.id) {
            dups.push(d.id.clone());
        }
    }
    dups
}
