//! Batched, double-buffered writes to the document store.
//!
//! The producer fills one buffer. When it reaches the threshold the whole buffer moves
//! into a flush task and a fresh one takes its place, so the producer never waits on
//! the store. Each flush reports back through its task handle; shutdown joins them all.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use crate::error::TelemetryError;
use crate::settings::Settings;
use crate::store::{Document, DocumentStore, ID_FIELD};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct WriteCacheConfig {
    pub threshold: usize,
    pub max_concurrent_flushes: usize,
    pub flush_timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for WriteCacheConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for WriteCacheConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            threshold: settings.write_threshold.max(1),
            max_concurrent_flushes: settings.max_concurrent_flushes.max(1),
            flush_timeout: settings.flush_timeout(),
            retries: settings.flush_retries,
            retry_backoff: settings.retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    pub generation: u64,
    pub documents: usize,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub appended: u64,
    pub flushed: u64,
    pub batches: usize,
    /// Batches that needed more than one attempt.
    pub retried: usize,
}

pub struct WriteCache<S: DocumentStore> {
    store: Arc<S>,
    collection: Arc<str>,
    config: WriteCacheConfig,
    buffer: Vec<Document>,
    generation: u64,
    appended: u64,
    permits: Arc<Semaphore>,
    flushes: JoinSet<Result<FlushOutcome>>,
    completed: Vec<FlushOutcome>,
}

impl<S: DocumentStore> WriteCache<S> {
    pub fn new(store: Arc<S>, collection: impl Into<String>, config: WriteCacheConfig) -> Self {
        let collection: String = collection.into();
        Self {
            store,
            collection: Arc::from(collection.as_str()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_flushes.max(1))),
            buffer: Vec::with_capacity(config.threshold),
            config,
            generation: 0,
            appended: 0,
            flushes: JoinSet::new(),
            completed: Vec::new(),
        }
    }

    /// Documents waiting in the active buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Flush tasks not yet collected.
    pub fn in_flight(&self) -> usize {
        self.flushes.len()
    }

    /// Adds one document; hands the buffer off once it is full.
    ///
    /// Fails if an earlier flush has already failed for good. Must be called from
    /// within a Tokio runtime.
    pub fn append(&mut self, document: Document) -> Result<()> {
        self.reap_finished()?;

        self.buffer.push(document);
        self.appended += 1;
        if self.buffer.len() >= self.config.threshold {
            self.hand_off();
        }
        Ok(())
    }

    /// Flushes whatever is buffered and waits for every outstanding flush.
    ///
    /// All flushes are awaited even when one fails; the first failure is returned.
    pub async fn flush_remaining(mut self) -> Result<FlushReport> {
        if !self.buffer.is_empty() {
            log_debug!(
                "flushing final {} documents to {}",
                self.buffer.len(),
                self.collection
            );
            self.hand_off();
        }

        let mut first_error = None;
        while let Some(joined) = self.flushes.join_next().await {
            match flatten(joined) {
                Ok(outcome) => self.completed.push(outcome),
                Err(err) => {
                    log_warn!("flush into {} failed: {err:#}", self.collection);
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let report = FlushReport {
            appended: self.appended,
            flushed: self.completed.iter().map(|o| o.documents as u64).sum(),
            batches: self.completed.len(),
            retried: self.completed.iter().filter(|o| o.attempts > 1).count(),
        };
        log_info!(
            "{} documents written to {} in {} batches",
            report.flushed,
            self.collection,
            report.batches
        );
        Ok(report)
    }

    fn hand_off(&mut self) {
        let mut batch =
            std::mem::replace(&mut self.buffer, Vec::with_capacity(self.config.threshold));
        // Ids are fixed before the first attempt: an attempt that timed out may still
        // land, and its retry must then match the same rows.
        batch.iter_mut().for_each(assign_id);
        self.generation += 1;

        let job = FlushJob {
            store: Arc::clone(&self.store),
            collection: Arc::clone(&self.collection),
            generation: self.generation,
            batch,
            permits: Arc::clone(&self.permits),
            timeout: self.config.flush_timeout,
            retries: self.config.retries,
            retry_backoff: self.config.retry_backoff,
        };
        self.flushes.spawn(job.run());
    }

    fn reap_finished(&mut self) -> Result<()> {
        while let Some(joined) = self.flushes.try_join_next() {
            let outcome = flatten(joined)?;
            self.completed.push(outcome);
        }
        Ok(())
    }
}

fn assign_id(document: &mut Document) {
    if let Some(fields) = document.as_object_mut() {
        fields
            .entry(ID_FIELD)
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    }
}

fn flatten(joined: Result<Result<FlushOutcome>, JoinError>) -> Result<FlushOutcome> {
    joined.map_err(|err| anyhow!("flush task did not complete: {err}"))?
}

/// One buffer generation, owned outright by its flush task.
struct FlushJob<S: DocumentStore> {
    store: Arc<S>,
    collection: Arc<str>,
    generation: u64,
    batch: Vec<Document>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    retries: u32,
    retry_backoff: Duration,
}

impl<S: DocumentStore> FlushJob<S> {
    async fn run(self) -> Result<FlushOutcome> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("flush pool closed")?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt().await {
                Ok(written) => {
                    if written != self.batch.len() {
                        log_warn!(
                            "generation {} wrote {written} of {} documents",
                            self.generation,
                            self.batch.len()
                        );
                    }
                    log_debug!(
                        "generation {} flushed {written} documents to {}",
                        self.generation,
                        self.collection
                    );
                    return Ok(FlushOutcome {
                        generation: self.generation,
                        documents: written,
                        attempts,
                    });
                }
                Err(err) if attempts <= self.retries => {
                    log_warn!(
                        "generation {} attempt {attempts} failed, retrying: {err}",
                        self.generation
                    );
                    tokio::time::sleep(self.retry_backoff.saturating_mul(attempts)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn attempt(&self) -> Result<usize, TelemetryError> {
        let insert = self.store.insert_many(&self.collection, &self.batch);
        match tokio::time::timeout(self.timeout, insert).await {
            Ok(Ok(written)) => Ok(written),
            Ok(Err(err)) => Err(TelemetryError::Persistence {
                collection: self.collection.to_string(),
                documents: self.batch.len(),
                message: format!("{err:#}"),
            }),
            Err(_) => Err(TelemetryError::FlushTimeout {
                collection: self.collection.to_string(),
                documents: self.batch.len(),
                timeout: self.timeout,
            }),
        }
    }
}
