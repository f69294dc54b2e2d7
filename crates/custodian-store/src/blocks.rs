use futures::stream::{Stream, StreamExt};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use custodian_core::model::{Block, OffChainRef};
use custodian_core::types::{BlockNumber, Hash, PublicKey, Signature, Timestamp};
use custodian_core::LedgerError;

use crate::pool::StorePool;

/// Persistence for `blocks` (C2). All queries observe a consistent snapshot
/// of admitted blocks; reads never block on the scroll pipeline (§4.2).
pub struct BlockStore<'a> {
    pool: &'a StorePool,
}

impl<'a> BlockStore<'a> {
    pub fn new(pool: &'a StorePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, block: &Block) -> Result<(), LedgerError> {
        let keywords = serde_json::to_string(&block.keywords).map_err(err_str)?;
        let metadata = serde_json::to_string(&block.custom_metadata).map_err(err_str)?;
        let off_chain_ref = block
            .off_chain_ref
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(err_str)?;

        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query(
                    "INSERT INTO blocks (block_number, previous_hash, data, timestamp, hash, \
                     signature, signer_public_key, is_encrypted, category, keywords, \
                     custom_metadata, off_chain_ref) \
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
                )
                .bind(block.block_number)
                .bind(block.previous_hash.as_hex())
                .bind(&block.data)
                .bind(block.timestamp)
                .bind(block.hash.as_hex())
                .bind(block.signature.as_str())
                .bind(block.signer_public_key.as_str())
                .bind(block.is_encrypted)
                .bind(&block.category)
                .bind(keywords)
                .bind(metadata)
                .bind(off_chain_ref)
                .execute(p)
                .await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query(
                    "INSERT INTO blocks (block_number, previous_hash, data, timestamp, hash, \
                     signature, signer_public_key, is_encrypted, category, keywords, \
                     custom_metadata, off_chain_ref) \
                     VALUES (?,?,?,?,?,?,?,?,?,?,?,?)",
                )
                .bind(block.block_number)
                .bind(block.previous_hash.as_hex())
                .bind(&block.data)
                .bind(block.timestamp)
                .bind(block.hash.as_hex())
                .bind(block.signature.as_str())
                .bind(block.signer_public_key.as_str())
                .bind(block.is_encrypted)
                .bind(&block.category)
                .bind(keywords)
                .bind(metadata)
                .bind(off_chain_ref)
                .execute(p)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn get_by_number(&self, n: BlockNumber) -> Result<Option<Block>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let row = sqlx::query("SELECT * FROM blocks WHERE block_number = $1")
                    .bind(n)
                    .fetch_optional(p)
                    .await?;
                row.map(row_to_block_pg).transpose()
            }
            StorePool::Sqlite(p) => {
                let row = sqlx::query("SELECT * FROM blocks WHERE block_number = ?")
                    .bind(n)
                    .fetch_optional(p)
                    .await?;
                row.map(row_to_block_sqlite).transpose()
            }
        }
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<Block>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let row = sqlx::query("SELECT * FROM blocks WHERE hash = $1")
                    .bind(hash)
                    .fetch_optional(p)
                    .await?;
                row.map(row_to_block_pg).transpose()
            }
            StorePool::Sqlite(p) => {
                let row = sqlx::query("SELECT * FROM blocks WHERE hash = ?")
                    .bind(hash)
                    .fetch_optional(p)
                    .await?;
                row.map(row_to_block_sqlite).transpose()
            }
        }
    }

    pub async fn get_last(&self) -> Result<Option<Block>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let row = sqlx::query("SELECT * FROM blocks ORDER BY block_number DESC LIMIT 1")
                    .fetch_optional(p)
                    .await?;
                row.map(row_to_block_pg).transpose()
            }
            StorePool::Sqlite(p) => {
                let row = sqlx::query("SELECT * FROM blocks ORDER BY block_number DESC LIMIT 1")
                    .fetch_optional(p)
                    .await?;
                row.map(row_to_block_sqlite).transpose()
            }
        }
    }

    pub async fn count(&self) -> Result<u64, LedgerError> {
        let c: i64 = match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query("SELECT COUNT(*) AS c FROM blocks").fetch_one(p).await?.try_get("c")
            }
            StorePool::Sqlite(p) => {
                sqlx::query("SELECT COUNT(*) AS c FROM blocks").fetch_one(p).await?.try_get("c")
            }
        }
        .map_err(|e: sqlx::Error| LedgerError::from(e))?;
        Ok(c as u64)
    }

    pub async fn exists(&self, n: BlockNumber) -> Result<bool, LedgerError> {
        Ok(self.get_by_number(n).await?.is_some())
    }

    pub async fn delete_by_number(&self, n: BlockNumber) -> Result<(), LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query("DELETE FROM blocks WHERE block_number = $1").bind(n).execute(p).await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query("DELETE FROM blocks WHERE block_number = ?").bind(n).execute(p).await?;
            }
        }
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<(), LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query("DELETE FROM blocks").execute(p).await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query("DELETE FROM blocks").execute(p).await?;
            }
        }
        Ok(())
    }

    /// Delete every block with `block_number > n`. Returns the count removed.
    pub async fn delete_after(&self, n: BlockNumber) -> Result<u64, LedgerError> {
        let affected = match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query("DELETE FROM blocks WHERE block_number > $1").bind(n).execute(p).await?.rows_affected()
            }
            StorePool::Sqlite(p) => {
                sqlx::query("DELETE FROM blocks WHERE block_number > ?").bind(n).execute(p).await?.rows_affected()
            }
        };
        Ok(affected)
    }

    pub async fn by_time_range(&self, start: Timestamp, end: Timestamp) -> Result<Vec<Block>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let rows = sqlx::query(
                    "SELECT * FROM blocks WHERE timestamp >= $1 AND timestamp <= $2 ORDER BY block_number ASC",
                )
                .bind(start)
                .bind(end)
                .fetch_all(p)
                .await?;
                rows.into_iter().map(row_to_block_pg).collect()
            }
            StorePool::Sqlite(p) => {
                let rows = sqlx::query(
                    "SELECT * FROM blocks WHERE timestamp >= ? AND timestamp <= ? ORDER BY block_number ASC",
                )
                .bind(start)
                .bind(end)
                .fetch_all(p)
                .await?;
                rows.into_iter().map(row_to_block_sqlite).collect()
            }
        }
    }

    pub async fn by_signer(&self, pk: &str) -> Result<Vec<Block>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let rows = sqlx::query("SELECT * FROM blocks WHERE signer_public_key = $1 ORDER BY block_number ASC")
                    .bind(pk)
                    .fetch_all(p)
                    .await?;
                rows.into_iter().map(row_to_block_pg).collect()
            }
            StorePool::Sqlite(p) => {
                let rows = sqlx::query("SELECT * FROM blocks WHERE signer_public_key = ? ORDER BY block_number ASC")
                    .bind(pk)
                    .fetch_all(p)
                    .await?;
                rows.into_iter().map(row_to_block_sqlite).collect()
            }
        }
    }

    pub async fn count_by_signer(&self, pk: &str) -> Result<u64, LedgerError> {
        let c: i64 = match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query("SELECT COUNT(*) AS c FROM blocks WHERE signer_public_key = $1")
                    .bind(pk)
                    .fetch_one(p)
                    .await?
                    .try_get("c")
            }
            StorePool::Sqlite(p) => {
                sqlx::query("SELECT COUNT(*) AS c FROM blocks WHERE signer_public_key = ?")
                    .bind(pk)
                    .fetch_one(p)
                    .await?
                    .try_get("c")
            }
        }
        .map_err(|e: sqlx::Error| LedgerError::from(e))?;
        Ok(c as u64)
    }

    /// Substring search over `data`. Bounded by the caller via `custodian-query`'s
    /// `MAX_BATCH_SIZE`/`DEFAULT_MAX_SEARCH_RESULTS`; this method itself is
    /// unbounded and is only ever invoked through the streaming layer.
    pub async fn search_content(&self, substring: &str) -> Result<Vec<Block>, LedgerError> {
        let pattern = format!("%{}%", substring.replace('%', "\\%").replace('_', "\\_"));
        match self.pool {
            StorePool::Postgres(p) => {
                let rows = sqlx::query("SELECT * FROM blocks WHERE data LIKE $1 ORDER BY block_number ASC")
                    .bind(&pattern)
                    .fetch_all(p)
                    .await?;
                rows.into_iter().map(row_to_block_pg).collect()
            }
            StorePool::Sqlite(p) => {
                let rows = sqlx::query("SELECT * FROM blocks WHERE data LIKE ? ORDER BY block_number ASC")
                    .bind(&pattern)
                    .fetch_all(p)
                    .await?;
                rows.into_iter().map(row_to_block_sqlite).collect()
            }
        }
    }

    /// A true server-side cursor over every block, ascending. `None` for
    /// backends that don't support one (SQLite), in which case the caller
    /// falls back to `page_after`'s keyset pagination (§4.8).
    pub fn cursor_all(&self) -> Option<impl Stream<Item = Result<Block, LedgerError>> + Send + '_> {
        match self.pool {
            StorePool::Postgres(p) => {
                let rows = sqlx::query("SELECT * FROM blocks ORDER BY block_number ASC").fetch(p);
                Some(rows.map(|r| r.map_err(LedgerError::from).and_then(row_to_block_pg)))
            }
            StorePool::Sqlite(_) => None,
        }
    }

    /// One page of a keyset-paginated scroll: blocks with `block_number >
    /// after`, ascending, at most `batch` rows. Used by `custodian-query`'s
    /// streaming layer as the SQLite fallback strategy (§4.8) and, for
    /// Postgres, internally by the server-side cursor path.
    pub async fn page_after(&self, after: BlockNumber, batch: i64) -> Result<Vec<Block>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let rows = sqlx::query("SELECT * FROM blocks WHERE block_number > $1 ORDER BY block_number ASC LIMIT $2")
                    .bind(after)
                    .bind(batch)
                    .fetch_all(p)
                    .await?;
                rows.into_iter().map(row_to_block_pg).collect()
            }
            StorePool::Sqlite(p) => {
                let rows = sqlx::query("SELECT * FROM blocks WHERE block_number > ? ORDER BY block_number ASC LIMIT ?")
                    .bind(after)
                    .bind(batch)
                    .fetch_all(p)
                    .await?;
                rows.into_iter().map(row_to_block_sqlite).collect()
            }
        }
    }
}

fn err_str(e: serde_json::Error) -> LedgerError {
    LedgerError::StorageError(e.to_string())
}

fn row_to_block_pg(row: PgRow) -> Result<Block, LedgerError> {
    block_from_parts(
        row.try_get("block_number").map_err(sqlx_err)?,
        row.try_get("previous_hash").map_err(sqlx_err)?,
        row.try_get("data").map_err(sqlx_err)?,
        row.try_get("timestamp").map_err(sqlx_err)?,
        row.try_get("hash").map_err(sqlx_err)?,
        row.try_get("signature").map_err(sqlx_err)?,
        row.try_get("signer_public_key").map_err(sqlx_err)?,
        row.try_get("is_encrypted").map_err(sqlx_err)?,
        row.try_get("category").map_err(sqlx_err)?,
        row.try_get("keywords").map_err(sqlx_err)?,
        row.try_get("custom_metadata").map_err(sqlx_err)?,
        row.try_get("off_chain_ref").map_err(sqlx_err)?,
    )
}

fn row_to_block_sqlite(row: SqliteRow) -> Result<Block, LedgerError> {
    block_from_parts(
        row.try_get("block_number").map_err(sqlx_err)?,
        row.try_get("previous_hash").map_err(sqlx_err)?,
        row.try_get("data").map_err(sqlx_err)?,
        row.try_get("timestamp").map_err(sqlx_err)?,
        row.try_get("hash").map_err(sqlx_err)?,
        row.try_get("signature").map_err(sqlx_err)?,
        row.try_get("signer_public_key").map_err(sqlx_err)?,
        row.try_get("is_encrypted").map_err(sqlx_err)?,
        row.try_get("category").map_err(sqlx_err)?,
        row.try_get("keywords").map_err(sqlx_err)?,
        row.try_get("custom_metadata").map_err(sqlx_err)?,
        row.try_get("off_chain_ref").map_err(sqlx_err)?,
    )
}

fn sqlx_err(e: sqlx::Error) -> LedgerError {
    LedgerError::from(e)
}

#[allow(clippy::too_many_arguments)]
fn block_from_parts(
    block_number: BlockNumber,
    previous_hash: String,
    data: Option<String>,
    timestamp: Timestamp,
    hash: String,
    signature: String,
    signer_public_key: String,
    is_encrypted: bool,
    category: Option<String>,
    keywords_json: String,
    metadata_json: String,
    off_chain_ref_json: Option<String>,
) -> Result<Block, LedgerError> {
    let keywords: Vec<String> = serde_json::from_str(&keywords_json).map_err(err_str)?;
    let custom_metadata = serde_json::from_str(&metadata_json).map_err(err_str)?;
    let off_chain_ref: Option<OffChainRef> = off_chain_ref_json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(err_str)?;

    Ok(Block {
        block_number,
        previous_hash: Hash(previous_hash),
        data,
        timestamp,
        hash: Hash(hash),
        signature: Signature(signature),
        signer_public_key: PublicKey(signer_public_key),
        is_encrypted,
        category,
        keywords,
        custom_metadata,
        off_chain_ref,
    })
}
