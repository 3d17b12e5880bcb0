//! Persistence seam: the handful of document-store operations the pipeline needs.

use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
pub(crate) mod testing;

/// One serialised document: a JSON object.
pub type Document = serde_json::Value;

/// Key a document is stored under within its collection.
pub const ID_FIELD: &str = "_id";

/// "Documents in `collection` that have `field`", ordered by `ts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindQuery {
    pub collection: String,
    pub field: String,
}

impl FindQuery {
    pub fn field_exists(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
        }
    }
}

/// Keyset position of a stored document: its `ts` text and insertion id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CursorPosition {
    pub ts: String,
    pub id: i64,
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub position: CursorPosition,
    pub document: Document,
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Writes all documents or none; returns how many are now stored.
    ///
    /// Documents are keyed by their `_id` within a collection: one already stored
    /// under that id is left alone and still counted, so a repeated batch is
    /// harmless.
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize>;

    /// Up to `limit` matches strictly after `after`, in `(ts, id)` order.
    async fn find_page(
        &self,
        query: &FindQuery,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>>;

    async fn collection_names(&self) -> Result<Vec<String>>;

    /// Claims `name`; fails with `DuplicateDestination` if it is already taken.
    async fn create_collection(&self, name: &str) -> Result<()>;
}

/// Forward-only cursor over a [`FindQuery`], fetched a page at a time.
pub struct DocumentCursor<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    query: FindQuery,
    page_size: usize,
    after: Option<CursorPosition>,
    buffered: VecDeque<StoredDocument>,
    exhausted: bool,
}

impl<'a, S: DocumentStore + ?Sized> DocumentCursor<'a, S> {
    pub fn new(store: &'a S, query: FindQuery, page_size: usize) -> Self {
        Self {
            store,
            query,
            page_size: page_size.max(1),
            after: None,
            buffered: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Document>> {
        if self.buffered.is_empty() && !self.exhausted {
            let page = self
                .store
                .find_page(&self.query, self.after.as_ref(), self.page_size)
                .await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.after = Some(last.position.clone());
            }
            self.buffered.extend(page);
        }

        Ok(self.buffered.pop_front().map(|stored| stored.document))
    }

    pub async fn collect_all(mut self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        while let Some(document) = self.next().await? {
            documents.push(document);
        }
        Ok(documents)
    }
}
