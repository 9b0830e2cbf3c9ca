//! `PostgreSQL` document store.
//!
//! Documents live in the `documents` table, one row per document. Queries
//! are built at runtime because document bodies are schemaless JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;

use zone_editor_core::{CollectionPath, DocumentPath};

use super::{
    ChangeEvent, ChangeFeed, ChangeKind, Document, DocumentStore, StoreError, Write, WriteBatch,
};

/// `serialization_failure`: a concurrent transaction won a conflict.
const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`, also safe to retry.
const DEADLOCK_DETECTED: &str = "40P01";

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    path: String,
    data: Json<serde_json::Value>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            path: DocumentPath::parse(&row.path)?,
            data: row.data.0,
            updated_at: row.updated_at,
        })
    }
}

fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && matches!(
            db.code().as_deref(),
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED)
        )
    {
        return StoreError::Aborted;
    }
    StoreError::Database(err)
}

// =============================================================================
// Store
// =============================================================================

/// Document store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    changes: ChangeFeed,
}

impl PgDocumentStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            changes: ChangeFeed::new(),
        }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply(
        tx: &mut Transaction<'_, Postgres>,
        writes: &WriteBatch,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        let mut events = Vec::with_capacity(writes.len());
        for write in writes.writes() {
            match write {
                Write::Create { path, data } => {
                    let result = sqlx::query(
                        r"
                        INSERT INTO documents (path, collection, doc_id, data)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (path) DO NOTHING
                        ",
                    )
                    .bind(path.as_str())
                    .bind(path.parent().as_str())
                    .bind(path.id())
                    .bind(Json(data))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_db_error)?;

                    if result.rows_affected() == 0 {
                        return Err(StoreError::AlreadyExists(path.clone()));
                    }
                    events.push(ChangeEvent::new(ChangeKind::Created, path.clone()));
                }
                Write::Set { path, data } => {
                    let inserted: bool = sqlx::query_scalar(
                        r"
                        INSERT INTO documents (path, collection, doc_id, data)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (path)
                        DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
                        RETURNING (xmax = 0) AS inserted
                        ",
                    )
                    .bind(path.as_str())
                    .bind(path.parent().as_str())
                    .bind(path.id())
                    .bind(Json(data))
                    .fetch_one(&mut **tx)
                    .await
                    .map_err(map_db_error)?;

                    let kind = if inserted {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Updated
                    };
                    events.push(ChangeEvent::new(kind, path.clone()));
                }
                Write::Delete { path } => {
                    let result = sqlx::query("DELETE FROM documents WHERE path = $1")
                        .bind(path.as_str())
                        .execute(&mut **tx)
                        .await
                        .map_err(map_db_error)?;

                    if result.rows_affected() > 0 {
                        events.push(ChangeEvent::new(ChangeKind::Deleted, path.clone()));
                    }
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    #[instrument(skip(self), fields(path = %path))]
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT path, data, updated_at FROM documents WHERE path = $1",
        )
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        row.map(Document::try_from).transpose()
    }

    #[instrument(skip(self), fields(collection = %collection))]
    async fn list(
        &self,
        collection: &CollectionPath,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT path, data, updated_at
            FROM documents
            WHERE collection = $1
            ORDER BY doc_id COLLATE "C"
            LIMIT $2
            "#,
        )
        .bind(collection.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.into_iter().map(Document::try_from).collect()
    }

    #[instrument(skip(self, writes), fields(writes = writes.len()))]
    async fn commit_transaction(&self, writes: WriteBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        let events = Self::apply(&mut tx, &writes).await?;
        tx.commit().await.map_err(map_db_error)?;

        self.changes.publish(events);
        Ok(())
    }

    #[instrument(skip(self, writes), fields(writes = writes.len()))]
    async fn commit_batch(&self, writes: WriteBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let events = Self::apply(&mut tx, &writes).await?;
        tx.commit().await.map_err(map_db_error)?;

        self.changes.publish(events);
        Ok(())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_db_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn store() -> PgDocumentStore {
        let url = std::env::var("FUNCTIONS_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        PgDocumentStore::new(pool)
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database (FUNCTIONS_DATABASE_URL)"]
    async fn test_roundtrip_and_ordered_list() {
        let store = store().await;
        let prefix = crate::db::generate_document_id();
        let collection = CollectionPath::parse(&format!("scratch/{prefix}/items")).unwrap();

        let mut batch = WriteBatch::new();
        for id in ["b", "a", "c"] {
            batch.set(collection.doc(id), &json!({ "id": id })).unwrap();
        }
        store.commit_batch(batch).await.unwrap();

        let docs = store.list(&collection, 2).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id().into_inner()).collect();
        assert_eq!(ids, ["a", "b"]);

        let doc = store.get(&collection.doc("c")).await.unwrap().unwrap();
        assert_eq!(doc.data, json!({ "id": "c" }));
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database (FUNCTIONS_DATABASE_URL)"]
    async fn test_create_conflict_rolls_back() {
        let store = store().await;
        let prefix = crate::db::generate_document_id();
        let collection = CollectionPath::parse(&format!("scratch/{prefix}/items")).unwrap();

        let mut first = WriteBatch::new();
        first.create(collection.doc("x"), &json!({})).unwrap();
        store.commit_transaction(first).await.unwrap();

        let mut second = WriteBatch::new();
        second.create(collection.doc("y"), &json!({})).unwrap();
        second.create(collection.doc("x"), &json!({})).unwrap();
        assert!(matches!(
            store.commit_transaction(second).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(store.get(&collection.doc("y")).await.unwrap().is_none());
    }
}
