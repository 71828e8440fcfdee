//! Content record persistence.
//!
//! All queries operate on the `content_records` table. The unique key is
//! `(collection, author_address, content_id)`; delete and restore overwrite
//! the row in place. Lifecycle rules are enforced by the Transition Builder,
//! not in SQL.

use chrono::Utc;
use frl_core::{AuthorAddress, Collection, ContentId, FrlError};
use frl_crypto::Ed25519Signature;
use frl_state::{ContentBody, ContentFlags, ContentRecord, RecordStore};
use sqlx::PgPool;

/// [`RecordStore`] backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Store using `pool`. Migrations must already have run.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn infra(e: sqlx::Error) -> FrlError {
    FrlError::TransientInfra(format!("content_records: {e}"))
}

/// Insert or overwrite a content row.
pub async fn upsert(pool: &PgPool, record: &ContentRecord) -> Result<(), sqlx::Error> {
    let body = serde_json::to_value(&record.body)
        .map_err(|e| sqlx::Error::Protocol(format!("failed to serialize content body: {e}")))?;
    let seq = i64::try_from(record.author_sequence_number)
        .map_err(|_| sqlx::Error::Protocol("author sequence number out of range".to_string()))?;
    let height = i64::try_from(record.block_height)
        .map_err(|_| sqlx::Error::Protocol("block height out of range".to_string()))?;

    sqlx::query(
        "INSERT INTO content_records
             (collection, author_address, content_id, body, author_sequence_number,
              block_height, is_deleted, is_restored, author_signature, accepted_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
         ON CONFLICT (collection, author_address, content_id) DO UPDATE SET
             body = EXCLUDED.body,
             author_sequence_number = EXCLUDED.author_sequence_number,
             block_height = EXCLUDED.block_height,
             is_deleted = EXCLUDED.is_deleted,
             is_restored = EXCLUDED.is_restored,
             author_signature = EXCLUDED.author_signature,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(record.collection().as_str())
    .bind(record.author.as_str())
    .bind(record.content_id.as_str())
    .bind(&body)
    .bind(seq)
    .bind(height)
    .bind(record.flags.is_deleted)
    .bind(record.flags.is_restored)
    .bind(record.author_signature.to_hex())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch one row.
pub async fn get(
    pool: &PgPool,
    collection: Collection,
    author: &AuthorAddress,
    content_id: &ContentId,
) -> Result<Option<ContentRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, RecordRow>(
        "SELECT collection, author_address, content_id, body, author_sequence_number,
                block_height, is_deleted, is_restored, author_signature
         FROM content_records
         WHERE collection = $1 AND author_address = $2 AND content_id = $3",
    )
    .bind(collection.as_str())
    .bind(author.as_str())
    .bind(content_id.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(RecordRow::into_record).transpose()
}

/// Every row of a collection in acceptance order.
pub async fn load_all(pool: &PgPool, collection: Collection) -> Result<Vec<ContentRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RecordRow>(
        "SELECT collection, author_address, content_id, body, author_sequence_number,
                block_height, is_deleted, is_restored, author_signature
         FROM content_records
         WHERE collection = $1
         ORDER BY block_height, author_sequence_number, author_address, content_id",
    )
    .bind(collection.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RecordRow::into_record).collect()
}

#[async_trait::async_trait]
impl RecordStore for PgRecordStore {
    async fn upsert(&self, record: &ContentRecord) -> Result<(), FrlError> {
        upsert(&self.pool, record).await.map_err(infra)
    }

    async fn get(
        &self,
        collection: Collection,
        author: &AuthorAddress,
        content_id: &ContentId,
    ) -> Result<Option<ContentRecord>, FrlError> {
        get(&self.pool, collection, author, content_id).await.map_err(infra)
    }

    async fn load_all(&self, collection: Collection) -> Result<Vec<ContentRecord>, FrlError> {
        load_all(&self.pool, collection).await.map_err(infra)
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct RecordRow {
    collection: String,
    author_address: String,
    content_id: String,
    body: serde_json::Value,
    author_sequence_number: i64,
    block_height: i64,
    is_deleted: bool,
    is_restored: bool,
    author_signature: String,
}

impl RecordRow {
    /// A row that does not decode is an error, never skipped: replay must
    /// see every accepted record.
    fn into_record(self) -> Result<ContentRecord, sqlx::Error> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            sqlx::Error::Protocol(format!(
                "corrupt content row {}/{}/{}: {what}: {e}",
                self.collection, self.author_address, self.content_id
            ))
        };
        let collection: Collection = self
            .collection
            .parse()
            .map_err(|e| corrupt("collection", &e))?;
        let body: ContentBody =
            serde_json::from_value(self.body.clone()).map_err(|e| corrupt("body", &e))?;
        if body.collection() != collection {
            return Err(corrupt("body", &"payload belongs to another collection"));
        }
        let author = AuthorAddress::new(self.author_address.clone()).map_err(|e| corrupt("author", &e))?;
        let content_id = ContentId::new(self.content_id.clone()).map_err(|e| corrupt("content_id", &e))?;
        let author_signature =
            Ed25519Signature::from_hex(&self.author_signature).map_err(|e| corrupt("signature", &e))?;
        let author_sequence_number =
            u64::try_from(self.author_sequence_number).map_err(|e| corrupt("sequence", &e))?;
        let block_height = u64::try_from(self.block_height).map_err(|e| corrupt("block height", &e))?;

        Ok(ContentRecord {
            author,
            content_id,
            body,
            author_sequence_number,
            block_height,
            flags: ContentFlags {
                is_deleted: self.is_deleted,
                is_restored: self.is_restored,
            },
            author_signature,
        })
    }
}
