use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use custodian_core::model::OffChainObject;
use custodian_core::types::{Hash, PublicKey, Signature, Timestamp};
use custodian_core::LedgerError;

use crate::pool::StorePool;

/// Persistence for `off_chain_data` (C5).
pub struct OffChainStore<'a> {
    pool: &'a StorePool,
}

impl<'a> OffChainStore<'a> {
    pub fn new(pool: &'a StorePool) -> Self {
        Self { pool }
    }

    pub async fn put(&self, obj: &OffChainObject) -> Result<(), LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query(
                    "INSERT INTO off_chain_data (data_hash, signature, file_path, file_size, \
                     content_type, encryption_iv, encryption_salt, signer_public_key, created_at) \
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
                )
                .bind(obj.data_hash.as_hex())
                .bind(obj.signature.as_str())
                .bind(&obj.file_path)
                .bind(obj.file_size)
                .bind(&obj.content_type)
                .bind(&obj.encryption_iv)
                .bind(&obj.encryption_salt)
                .bind(obj.signer_public_key.as_str())
                .bind(obj.created_at)
                .execute(p)
                .await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query(
                    "INSERT INTO off_chain_data (data_hash, signature, file_path, file_size, \
                     content_type, encryption_iv, encryption_salt, signer_public_key, created_at) \
                     VALUES (?,?,?,?,?,?,?,?,?)",
                )
                .bind(obj.data_hash.as_hex())
                .bind(obj.signature.as_str())
                .bind(&obj.file_path)
                .bind(obj.file_size)
                .bind(&obj.content_type)
                .bind(&obj.encryption_iv)
                .bind(&obj.encryption_salt)
                .bind(obj.signer_public_key.as_str())
                .bind(obj.created_at)
                .execute(p)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn get(&self, data_hash: &str) -> Result<Option<OffChainObject>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let row = sqlx::query("SELECT * FROM off_chain_data WHERE data_hash = $1")
                    .bind(data_hash)
                    .fetch_optional(p)
                    .await?;
                row.map(row_to_object_pg).transpose()
            }
            StorePool::Sqlite(p) => {
                let row = sqlx::query("SELECT * FROM off_chain_data WHERE data_hash = ?")
                    .bind(data_hash)
                    .fetch_optional(p)
                    .await?;
                row.map(row_to_object_sqlite).transpose()
            }
        }
    }

    /// Objects older than `ORPHAN_TTL_SECS` and referenced by no block.
    /// `referenced_hashes` is supplied by the caller (the chain engine, which
    /// owns the authoritative view of which blocks reference which objects).
    pub async fn list_orphans(
        &self,
        now: Timestamp,
        ttl_secs: i64,
        referenced_hashes: &[String],
    ) -> Result<Vec<OffChainObject>, LedgerError> {
        let all = self.list_all().await?;
        Ok(all
            .into_iter()
            .filter(|o| now - o.created_at >= ttl_secs && !referenced_hashes.iter().any(|h| h == o.data_hash.as_hex()))
            .collect())
    }

    pub async fn list_all(&self) -> Result<Vec<OffChainObject>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let rows = sqlx::query("SELECT * FROM off_chain_data ORDER BY created_at ASC").fetch_all(p).await?;
                rows.into_iter().map(row_to_object_pg).collect()
            }
            StorePool::Sqlite(p) => {
                let rows = sqlx::query("SELECT * FROM off_chain_data ORDER BY created_at ASC").fetch_all(p).await?;
                rows.into_iter().map(row_to_object_sqlite).collect()
            }
        }
    }

    /// Idempotent: deleting an already-absent object is not an error (§4.5).
    pub async fn delete(&self, data_hash: &str) -> Result<(), LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query("DELETE FROM off_chain_data WHERE data_hash = $1").bind(data_hash).execute(p).await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query("DELETE FROM off_chain_data WHERE data_hash = ?").bind(data_hash).execute(p).await?;
            }
        }
        Ok(())
    }
}

fn row_to_object_pg(row: PgRow) -> Result<OffChainObject, LedgerError> {
    object_from_row(
        row.try_get("data_hash").map_err(LedgerError::from)?,
        row.try_get("signature").map_err(LedgerError::from)?,
        row.try_get("file_path").map_err(LedgerError::from)?,
        row.try_get("file_size").map_err(LedgerError::from)?,
        row.try_get("content_type").map_err(LedgerError::from)?,
        row.try_get("encryption_iv").map_err(LedgerError::from)?,
        row.try_get("encryption_salt").map_err(LedgerError::from)?,
        row.try_get("signer_public_key").map_err(LedgerError::from)?,
        row.try_get("created_at").map_err(LedgerError::from)?,
    )
}

fn row_to_object_sqlite(row: SqliteRow) -> Result<OffChainObject, LedgerError> {
    object_from_row(
        row.try_get("data_hash").map_err(LedgerError::from)?,
        row.try_get("signature").map_err(LedgerError::from)?,
        row.try_get("file_path").map_err(LedgerError::from)?,
        row.try_get("file_size").map_err(LedgerError::from)?,
        row.try_get("content_type").map_err(LedgerError::from)?,
        row.try_get("encryption_iv").map_err(LedgerError::from)?,
        row.try_get("encryption_salt").map_err(LedgerError::from)?,
        row.try_get("signer_public_key").map_err(LedgerError::from)?,
        row.try_get("created_at").map_err(LedgerError::from)?,
    )
}

#[allow(clippy::too_many_arguments)]
fn object_from_row(
    data_hash: String,
    signature: String,
    file_path: String,
    file_size: i64,
    content_type: String,
    encryption_iv: Option<String>,
    encryption_salt: Option<String>,
    signer_public_key: String,
    created_at: Timestamp,
) -> Result<OffChainObject, LedgerError> {
    Ok(OffChainObject {
        data_hash: Hash(data_hash),
        signature: Signature(signature),
        file_path,
        file_size,
        content_type,
        encryption_iv,
        encryption_salt,
        signer_public_key: PublicKey(signer_public_key),
        created_at,
    })
}
