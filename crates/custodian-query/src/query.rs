//! Streaming query layer (C8, §4.8): every unbounded-result operation
//! exposes a bounded `search` shape and a constant-memory `stream` shape.
//! Database strategy selection happens once, in `stream`: a server-side
//! cursor when the backend supports one, keyset pagination otherwise.

use std::sync::Arc;

use futures::StreamExt;

use custodian_core::model::Block;
use custodian_core::{LedgerError, DEFAULT_BATCH_SIZE, DEFAULT_MAX_SEARCH_RESULTS, MAX_BATCH_SIZE};
use custodian_store::{BlockStore, StorePool};

use crate::wildcard::wildcard_match;

#[derive(PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Stop,
}

pub struct QueryLayer {
    pool: Arc<StorePool>,
}

impl QueryLayer {
    pub fn new(pool: Arc<StorePool>) -> Self {
        Self { pool }
    }

    fn validate_max_results(max_results: usize) -> Result<(), LedgerError> {
        if max_results == 0 {
            return Err(LedgerError::LimitExceeded { kind: "max_results".to_string(), limit: 0 });
        }
        if max_results > MAX_BATCH_SIZE {
            return Err(LedgerError::LimitExceeded { kind: "max_results".to_string(), limit: MAX_BATCH_SIZE });
        }
        Ok(())
    }

    /// Visit every block in ascending order, constant memory, until the
    /// consumer signals `Stop` or the chain is exhausted. Chooses a
    /// server-side cursor when the backend supports one; otherwise falls
    /// back to keyset pagination with `batch = DEFAULT_BATCH_SIZE` (§4.8).
    pub async fn stream<F>(&self, mut consumer: F) -> Result<(), LedgerError>
    where
        F: FnMut(&Block) -> StreamControl + Send,
    {
        let blocks = BlockStore::new(&self.pool);

        if self.pool.supports_server_side_cursor() {
            if let Some(cursor) = blocks.cursor_all() {
                tokio::pin!(cursor);
                while let Some(item) = cursor.next().await {
                    let block = item?;
                    if consumer(&block) == StreamControl::Stop {
                        return Ok(());
                    }
                }
                return Ok(());
            }
        }

        let mut after = -1;
        loop {
            let page = blocks.page_after(after, DEFAULT_BATCH_SIZE as i64).await?;
            if page.is_empty() {
                return Ok(());
            }
            for b in &page {
                after = b.block_number;
                if consumer(b) == StreamControl::Stop {
                    return Ok(());
                }
            }
        }
    }

    /// Bounded substring search over `data` (§4.8).
    pub async fn search(&self, substring: &str, max_results: usize) -> Result<Vec<Block>, LedgerError> {
        Self::validate_max_results(max_results)?;
        let mut results = Vec::new();
        self.stream(|b| {
            if b.data.as_deref().is_some_and(|d| d.contains(substring)) {
                results.push(b.clone());
            }
            if results.len() >= max_results {
                StreamControl::Stop
            } else {
                StreamControl::Continue
            }
        })
        .await?;
        Ok(results)
    }

    /// Search over encrypted payloads. Decryption is expensive, so once
    /// `max_results` is reached no further block is decrypted (§4.8).
    pub async fn search_encrypted_term(&self, password: &str, term: &str, max_results: usize) -> Result<Vec<Block>, LedgerError> {
        Self::validate_max_results(max_results)?;
        let mut results = Vec::new();
        self.stream(|b| {
            if b.is_encrypted {
                if let Some(envelope) = &b.data {
                    if let Ok(plaintext) = custodian_crypto::decrypt_gcm(envelope, password) {
                        if String::from_utf8_lossy(&plaintext).contains(term) {
                            results.push(b.clone());
                        }
                    }
                }
            }
            if results.len() >= max_results {
                StreamControl::Stop
            } else {
                StreamControl::Continue
            }
        })
        .await?;
        Ok(results)
    }

    /// Wildcard search over a `custom_metadata` key, capped at
    /// `DEFAULT_MAX_SEARCH_RESULTS` regardless of caller input (§4.8).
    pub async fn search_metadata_wildcard(&self, key: &str, pattern: &str) -> Result<Vec<Block>, LedgerError> {
        let mut results = Vec::new();
        self.stream(|b| {
            if let Some(value) = b.custom_metadata.get(key) {
                if wildcard_match(pattern, value) {
                    results.push(b.clone());
                }
            }
            if results.len() >= DEFAULT_MAX_SEARCH_RESULTS {
                StreamControl::Stop
            } else {
                StreamControl::Continue
            }
        })
        .await?;
        Ok(results)
    }

    /// Bounded, time-ordered scan restricted to a signer.
    pub async fn by_signer(&self, signer_public_key: &str, max_results: usize) -> Result<Vec<Block>, LedgerError> {
        Self::validate_max_results(max_results)?;
        let mut results = Vec::new();
        self.stream(|b| {
            if b.signer_public_key.as_str() == signer_public_key {
                results.push(b.clone());
            }
            if results.len() >= max_results {
                StreamControl::Stop
            } else {
                StreamControl::Continue
            }
        })
        .await?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodian_core::types::{Hash, PublicKey, Signature};
    use custodian_store::ensure_schema;
    use std::collections::BTreeMap;

    async fn temp_pool(name: &str) -> Arc<StorePool> {
        let path = std::env::temp_dir().join(format!("custodian_query_test_{}.db", name));
        let _ = std::fs::remove_file(&path);
        let pool = StorePool::connect_sqlite(path.to_str().unwrap()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        Arc::new(pool)
    }

    fn block(n: i64, data: &str) -> Block {
        Block {
            block_number: n,
            previous_hash: Hash(format!("h{}", n - 1)),
            data: Some(data.to_string()),
            timestamp: 1000 + n,
            hash: Hash(format!("h{}", n)),
            signature: Signature("sig".to_string()),
            signer_public_key: PublicKey("pk-1".to_string()),
            is_encrypted: false,
            category: None,
            keywords: Vec::new(),
            custom_metadata: BTreeMap::new(),
            off_chain_ref: None,
        }
    }

    #[tokio::test]
    async fn search_stops_at_max_results() {
        let pool = temp_pool("search_stops").await;
        let blocks = BlockStore::new(&pool);
        for n in 0..5 {
            blocks.save(&block(n, "needle here")).await.unwrap();
        }

        let query = QueryLayer::new(pool);
        let results = query.search("needle", 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn rejects_zero_and_oversized_max_results() {
        let pool = temp_pool("search_bounds").await;
        let query = QueryLayer::new(pool);
        assert!(query.search("x", 0).await.is_err());
        assert!(query.search("x", MAX_BATCH_SIZE + 1).await.is_err());
    }
}
