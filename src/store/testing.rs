//! In-memory store for unit tests, with knobs for simulating outages.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::error::TelemetryError;

use super::{CursorPosition, Document, DocumentStore, FindQuery, StoredDocument, ID_FIELD};

#[derive(Debug, Default, Clone)]
pub(crate) struct Behaviour {
    /// Fail this many `insert_many` calls before accepting writes.
    pub failures_before_success: u32,
    /// Sleep this long inside every `insert_many`.
    pub stall: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    collections: BTreeMap<String, Vec<StoredDocument>>,
    next_id: i64,
    batches: Vec<usize>,
    attempts: u32,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<Inner>,
    behaviour: Behaviour,
}

impl MemoryStore {
    pub fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            inner: Mutex::default(),
            behaviour,
        }
    }

    /// Sizes of the successful `insert_many` calls, in completion order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().unwrap().batches.clone()
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock().unwrap().attempts
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .map(|docs| docs.iter().map(|d| d.document.clone()).collect())
            .unwrap_or_default()
    }
}

fn document_id(document: &Document) -> Option<String> {
    document.get(ID_FIELD).and_then(|id| id.as_str()).map(str::to_string)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize> {
        let attempt = {
            let mut inner = self.inner.lock().unwrap();
            inner.attempts += 1;
            inner.attempts
        };
        if attempt <= self.behaviour.failures_before_success {
            bail!("simulated outage on attempt {attempt}");
        }
        if let Some(stall) = self.behaviour.stall {
            tokio::time::sleep(stall).await;
        }

        let mut inner = self.inner.lock().unwrap();
        let known: BTreeSet<String> = inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter_map(|d| document_id(&d.document)).collect())
            .unwrap_or_default();
        let mut stored = Vec::with_capacity(documents.len());
        for document in documents {
            if document_id(document).is_some_and(|id| known.contains(&id)) {
                continue;
            }
            inner.next_id += 1;
            let ts = document
                .get("ts")
                .and_then(|ts| ts.as_str())
                .unwrap_or_default()
                .to_string();
            stored.push(StoredDocument {
                position: CursorPosition {
                    ts,
                    id: inner.next_id,
                },
                document: document.clone(),
            });
        }
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(stored);
        inner.batches.push(documents.len());
        Ok(documents.len())
    }

    async fn find_page(
        &self,
        query: &FindQuery,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        let inner = self.inner.lock().unwrap();
        let Some(docs) = inner.collections.get(&query.collection) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<StoredDocument> = docs
            .iter()
            .filter(|d| d.document.get(&query.field).is_some())
            .filter(|d| after.map_or(true, |after| d.position > *after))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.position.cmp(&b.position));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().unwrap().collections.keys().cloned().collect())
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.collections.contains_key(name) {
            return Err(TelemetryError::DuplicateDestination(name.to_string()).into());
        }
        inner.collections.insert(name.to_string(), Vec::new());
        Ok(())
    }
}
