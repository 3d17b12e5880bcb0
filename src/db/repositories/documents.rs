use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::db::{
    helpers::{json_field_path, to_i64},
    Database,
};
use crate::error::TelemetryError;
use crate::store::{
    CursorPosition, Document, DocumentStore, FindQuery, StoredDocument, ID_FIELD,
};

#[async_trait]
impl DocumentStore for Database {
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize> {
        let collection = collection.to_string();
        let mut records = Vec::with_capacity(documents.len());
        for document in documents {
            let Value::Object(fields) = document else {
                bail!("documents must be JSON objects, got {document}");
            };
            let mut fields = fields.clone();
            let doc_id = match fields.get(ID_FIELD).and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => {
                    let id = Uuid::new_v4().to_string();
                    fields.insert(ID_FIELD.into(), Value::String(id.clone()));
                    id
                }
            };
            let ts = fields
                .get("ts")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let body = serde_json::to_string(&fields).context("failed to serialise document")?;
            records.push((doc_id, ts, body));
        }

        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open insert transaction")?;
            tx.execute(
                "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, ?2)",
                params![collection, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to register collection {collection}"))?;
            {
                // A document already present under the same id came from an earlier
                // attempt at this batch; it counts as written.
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO documents (collection, doc_id, ts, body)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (doc_id, ts, body) in &records {
                    let inserted = stmt
                        .execute(params![collection, doc_id, ts, body])
                        .with_context(|| format!("failed to insert document {doc_id}"))?;
                    if inserted == 0 {
                        debug!("document {doc_id} already stored in {collection}");
                    }
                }
            }
            tx.commit().context("failed to commit bulk insert")?;
            Ok(records.len())
        })
        .await
    }

    async fn find_page(
        &self,
        query: &FindQuery,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        let collection = query.collection.clone();
        let path = json_field_path(&query.field);
        let (after_ts, after_id) = after
            .map(|p| (p.ts.clone(), p.id))
            .unwrap_or_else(|| (String::new(), 0));
        let limit = to_i64(limit)?;

        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ts, body
                 FROM documents
                 WHERE collection = ?1
                   AND json_type(body, ?2) IS NOT NULL
                   AND (ts, id) > (?3, ?4)
                 ORDER BY ts ASC, id ASC
                 LIMIT ?5",
            )?;

            let mut rows = stmt.query(params![collection, path, after_ts, after_id, limit])?;
            let mut page = Vec::new();
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let ts: String = row.get(1)?;
                let body: String = row.get(2)?;
                let document: Document = serde_json::from_str(&body)
                    .with_context(|| format!("stored document {id} is not valid JSON"))?;
                page.push(StoredDocument {
                    position: CursorPosition { ts, id },
                    document,
                });
            }
            Ok(page)
        })
        .await
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name ASC")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
        .await
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.execute(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT name FROM collections WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(TelemetryError::DuplicateDestination(name).into());
            }
            conn.execute(
                "INSERT INTO collections (name, created_at) VALUES (?1, ?2)",
                params![name, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to create collection {name}"))?;
            Ok(())
        })
        .await
    }
}
