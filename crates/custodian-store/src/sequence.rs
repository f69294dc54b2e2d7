use custodian_core::types::BlockNumber;
use custodian_core::LedgerError;

use crate::pool::StorePool;

const SEQUENCE_NAME: &str = "blocks";

/// Persistence for the `block_sequence` singleton allocator (§3, entity
/// `BlockSequence`). The chain engine's writer lock is what actually makes
/// "allocate next number" safe under concurrency (§4.4); this type is a thin
/// accessor over the persisted counter.
pub struct BlockSequenceStore<'a> {
    pool: &'a StorePool,
}

impl<'a> BlockSequenceStore<'a> {
    pub fn new(pool: &'a StorePool) -> Self {
        Self { pool }
    }

    pub async fn peek(&self) -> Result<BlockNumber, LedgerError> {
        let value: Option<BlockNumber> = match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query_scalar("SELECT next_value FROM block_sequence WHERE sequence_name = $1")
                    .bind(SEQUENCE_NAME)
                    .fetch_optional(p)
                    .await?
            }
            StorePool::Sqlite(p) => {
                sqlx::query_scalar("SELECT next_value FROM block_sequence WHERE sequence_name = ?")
                    .bind(SEQUENCE_NAME)
                    .fetch_optional(p)
                    .await?
            }
        };
        Ok(value.unwrap_or(0))
    }

    /// Persist `next` as the new counter value (upsert).
    pub async fn set(&self, next: BlockNumber) -> Result<(), LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query(
                    "INSERT INTO block_sequence (sequence_name, next_value) VALUES ($1, $2) \
                     ON CONFLICT (sequence_name) DO UPDATE SET next_value = EXCLUDED.next_value",
                )
                .bind(SEQUENCE_NAME)
                .bind(next)
                .execute(p)
                .await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query(
                    "INSERT INTO block_sequence (sequence_name, next_value) VALUES (?, ?) \
                     ON CONFLICT (sequence_name) DO UPDATE SET next_value = excluded.next_value",
                )
                .bind(SEQUENCE_NAME)
                .bind(next)
                .execute(p)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query("DELETE FROM block_sequence WHERE sequence_name = $1").bind(SEQUENCE_NAME).execute(p).await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query("DELETE FROM block_sequence WHERE sequence_name = ?").bind(SEQUENCE_NAME).execute(p).await?;
            }
        }
        Ok(())
    }
}
