//! The chain engine (C4) — block admission, validation, rollback, export/import,
//! dangerous key deletion. All mutating operations serialize through a single
//! writer lock (§4.4); readers (validation, queries) never block on it.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{info, warn};

use custodian_core::model::{Block, DeletionImpact, ValidationResult};
use custodian_core::types::{BlockNumber, PublicKey, Timestamp};
use custodian_core::{LedgerError, MAX_BLOCK_DATA_LENGTH, MAX_BLOCK_SIZE_BYTES, PROGRESS_REPORT_INTERVAL};
use custodian_crypto::KeyPair;
use custodian_store::{AuthLog, BlockStore, BlockSequenceStore, StorePool};

use crate::validation::validate_against_predecessor;

fn now_epoch() -> Timestamp {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64
}

/// Optional progress callback invoked every `PROGRESS_REPORT_INTERVAL` blocks
/// during a large rollback. Arguments: blocks removed so far, total planned.
pub type RollbackProgress<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// Owns the single global writer lock over block admission, authorization
/// mutations, rollback, and import (§4.4). Validation and queries read
/// through `self.pool` directly and never take the lock.
pub struct ChainEngine {
    pool: Arc<StorePool>,
    writer_lock: Mutex<()>,
}

impl ChainEngine {
    pub fn new(pool: Arc<StorePool>) -> Self {
        Self { pool, writer_lock: Mutex::new(()) }
    }

    pub fn pool(&self) -> &Arc<StorePool> {
        &self.pool
    }

    /// Write block 0 directly, bypassing normal admission (I1). No-op if the
    /// chain already has a genesis block.
    pub async fn init_genesis(&self) -> Result<(), LedgerError> {
        let _guard = self.writer_lock.lock().await;
        let blocks = BlockStore::new(&self.pool);
        if blocks.get_last().await?.is_some() {
            return Ok(());
        }

        let genesis = Block {
            block_number: custodian_core::GENESIS_BLOCK_NUMBER,
            previous_hash: custodian_core::types::Hash::genesis_sentinel(),
            data: None,
            timestamp: now_epoch(),
            hash: custodian_core::types::Hash::genesis_sentinel(),
            signature: custodian_core::types::Signature::genesis_sentinel(),
            signer_public_key: PublicKey::genesis_sentinel(),
            is_encrypted: false,
            category: None,
            keywords: Vec::new(),
            custom_metadata: Default::default(),
            off_chain_ref: None,
        };
        blocks.save(&genesis).await?;
        let seq = BlockSequenceStore::new(&self.pool);
        seq.set(1).await?;
        info!("genesis block written");
        Ok(())
    }

    /// Admit a new block signed by `keypair` (§4.4.1).
    pub async fn admit(
        &self,
        payload: Option<String>,
        keypair: &KeyPair,
        category: Option<String>,
        keywords: Vec<String>,
        custom_metadata: std::collections::BTreeMap<String, String>,
    ) -> Result<Block, LedgerError> {
        self.admit_inner(payload.unwrap_or_default(), false, keypair, category, keywords, custom_metadata).await
    }

    /// Admit a new block whose payload is encrypted at rest with
    /// `encrypt_gcm` under `password` before being stored and signed (C1,
    /// §4.8 encrypted-term search). The signature and hash cover the
    /// ciphertext envelope, not the plaintext.
    pub async fn admit_encrypted(
        &self,
        plaintext: &[u8],
        password: &str,
        keypair: &KeyPair,
        category: Option<String>,
        keywords: Vec<String>,
        custom_metadata: std::collections::BTreeMap<String, String>,
    ) -> Result<Block, LedgerError> {
        let envelope = custodian_crypto::encrypt_gcm(plaintext, password).map_err(|e| LedgerError::CryptoError(e.to_string()))?;
        self.admit_inner(envelope, true, keypair, category, keywords, custom_metadata).await
    }

    async fn admit_inner(
        &self,
        data: String,
        is_encrypted: bool,
        keypair: &KeyPair,
        category: Option<String>,
        keywords: Vec<String>,
        custom_metadata: std::collections::BTreeMap<String, String>,
    ) -> Result<Block, LedgerError> {
        if data.len() > MAX_BLOCK_SIZE_BYTES {
            return Err(LedgerError::BlockTooLarge { actual: data.len(), limit: MAX_BLOCK_SIZE_BYTES });
        }
        if data.chars().count() > MAX_BLOCK_DATA_LENGTH {
            return Err(LedgerError::BlockTooLarge { actual: data.chars().count(), limit: MAX_BLOCK_DATA_LENGTH });
        }

        let _guard = self.writer_lock.lock().await;

        let t = now_epoch();
        let auth = AuthLog::new(&self.pool);
        if !auth.was_authorized_at(&keypair.public_key, t).await? {
            return Err(LedgerError::Unauthorized(keypair.public_key.as_str().to_string()));
        }

        let blocks = BlockStore::new(&self.pool);
        let last = blocks.get_last().await?.ok_or_else(|| LedgerError::Other("chain has no genesis".into()))?;
        let n = last.block_number + 1;

        let preimage = custodian_core::canonical_preimage(n, last.hash.as_hex(), &data, t, keypair.public_key.as_str());
        let hash = custodian_crypto::hash(&preimage);
        let signature = keypair.sign(&preimage).map_err(|e| LedgerError::CryptoError(e.to_string()))?;

        let block = Block {
            block_number: n,
            previous_hash: last.hash.clone(),
            data: if data.is_empty() { None } else { Some(data) },
            timestamp: t,
            hash,
            signature,
            signer_public_key: keypair.public_key.clone(),
            is_encrypted,
            category,
            keywords,
            custom_metadata,
            off_chain_ref: None,
        };

        // Step 6: re-validate the block we just built. The authorization fact
        // was already established above against the same timestamp `t`, so
        // the injected predicate here only needs to answer "yes" for that
        // already-proven case.
        let defects = validate_against_predecessor(&block, &last, |_, _| true);
        if !defects.is_empty() {
            return Err(LedgerError::Other(format!("freshly built block failed self-validation: {:?}", defects)));
        }

        blocks.save(&block).await?;
        let seq = BlockSequenceStore::new(&self.pool);
        seq.set(n + 1).await?;
        Ok(block)
    }

    /// Validate the whole chain from block 0 forward (§4.4.2).
    pub async fn validate_chain(&self) -> Result<ValidationResult, LedgerError> {
        let blocks = BlockStore::new(&self.pool);
        let auth = AuthLog::new(&self.pool);

        let mut result = ValidationResult::default();
        let total = blocks.count().await?;
        result.total_blocks = total;
        if total == 0 {
            result.summary = "empty chain".to_string();
            return Ok(result);
        }

        let mut prev = blocks.get_by_number(0).await?.ok_or(LedgerError::BlockNotFound(0))?;
        let mut structurally_intact = true;
        let mut fully_compliant = true;
        let mut valid_blocks: u64 = 1;
        let mut revoked_blocks: u64 = 0;

        let mut after = 0;
        loop {
            let page = blocks.page_after(after, custodian_core::DEFAULT_BATCH_SIZE as i64).await?;
            if page.is_empty() {
                break;
            }
            for b in page {
                after = b.block_number;

                let auth_ok = auth.was_authorized_at(&b.signer_public_key, b.timestamp).await?;
                let defects = validate_against_predecessor(&b, &prev, |_, _| auth_ok);

                let structural_defects: Vec<_> = defects
                    .iter()
                    .filter(|d| !matches!(d, custodian_core::model::BlockDefect::NotAuthorizedAtTimestamp))
                    .collect();

                if !structural_defects.is_empty() {
                    structurally_intact = false;
                    fully_compliant = false;
                } else if !auth_ok {
                    fully_compliant = false;
                } else {
                    valid_blocks += 1;
                    if !auth.is_authorized_now(&b.signer_public_key).await? {
                        revoked_blocks += 1;
                    }
                }

                prev = b;
            }
        }

        result.is_structurally_intact = structurally_intact;
        result.is_fully_compliant = fully_compliant;
        result.valid_blocks = valid_blocks;
        result.revoked_blocks = revoked_blocks;
        result.summary = format!(
            "{}/{} blocks valid, structurally_intact={}, fully_compliant={}, revoked={}",
            valid_blocks, total, structurally_intact, fully_compliant, revoked_blocks
        );
        Ok(result)
    }

    /// Remove the last `k` blocks, never genesis (§4.4.3).
    pub async fn rollback_n(&self, k: u64, progress: Option<&RollbackProgress<'_>>) -> Result<u64, LedgerError> {
        let _guard = self.writer_lock.lock().await;
        let blocks = BlockStore::new(&self.pool);
        let count = blocks.count().await?;
        if k == 0 {
            return Ok(0);
        }
        if k >= count {
            return Err(LedgerError::Other(format!("rollback_n({}) would remove genesis (count={})", k, count)));
        }
        let last = blocks.get_last().await?.ok_or(LedgerError::BlockNotFound(0))?;
        let floor = last.block_number - k as i64;
        self.rollback_to_locked(floor, progress).await
    }

    /// `delete_after(n)` (§4.4.3).
    pub async fn rollback_to(&self, n: BlockNumber, progress: Option<&RollbackProgress<'_>>) -> Result<u64, LedgerError> {
        let _guard = self.writer_lock.lock().await;
        self.rollback_to_locked(n, progress).await
    }

    /// Shared implementation; caller must already hold `writer_lock`.
    async fn rollback_to_locked(&self, n: BlockNumber, progress: Option<&RollbackProgress<'_>>) -> Result<u64, LedgerError> {
        let blocks = BlockStore::new(&self.pool);
        let count = blocks.count().await?;
        let last = blocks.get_last().await?.ok_or(LedgerError::BlockNotFound(0))?;
        if n < custodian_core::GENESIS_BLOCK_NUMBER {
            return Err(LedgerError::Other("rollback cannot remove genesis".to_string()));
        }
        let planned = (last.block_number - n).max(0) as u64;
        if planned == 0 {
            return Ok(0);
        }

        // Streaming deletion in bounded batches, reporting progress every
        // PROGRESS_REPORT_INTERVAL blocks (§4.4.3).
        let batch = PROGRESS_REPORT_INTERVAL.min(count.max(1));
        let mut removed: u64 = 0;
        let mut cursor = last.block_number;
        while cursor > n {
            let floor = (cursor - batch as i64).max(n);
            blocks.delete_after(floor).await?;
            removed += (cursor - floor) as u64;
            cursor = floor;
            if let Some(cb) = progress {
                cb(removed, planned);
            }
        }
        let seq = BlockSequenceStore::new(&self.pool);
        seq.set(n + 1).await?;
        info!(removed, "rollback complete");
        Ok(removed)
    }

    /// `can_delete(pk)` (§4.4.5).
    pub async fn can_delete(&self, pk: &PublicKey) -> Result<DeletionImpact, LedgerError> {
        let auth = AuthLog::new(&self.pool);
        let blocks = BlockStore::new(&self.pool);
        let exists = auth.list_all().await?.iter().any(|k| &k.public_key == pk);
        let affected = blocks.count_by_signer(pk.as_str()).await?;
        let message = if !exists {
            format!("no authorization record for {}", pk)
        } else if affected == 0 {
            "safe to delete: no blocks signed by this key".to_string()
        } else {
            format!("{} blocks were signed by this key", affected)
        };
        Ok(DeletionImpact { exists, affected_block_count: affected, message })
    }

    /// Physical delete iff `can_safely_delete` (§4.4.5).
    pub async fn delete(&self, pk: &PublicKey) -> Result<bool, LedgerError> {
        let _guard = self.writer_lock.lock().await;
        let impact = self.can_delete(pk).await?;
        if !impact.can_safely_delete() {
            return Ok(false);
        }
        let auth = AuthLog::new(&self.pool);
        auth.delete(pk).await?;
        Ok(true)
    }

    /// Stream the chain and authorization log to `writer` (§4.4.4). A reader;
    /// does not take the writer lock.
    pub async fn export<W: tokio::io::AsyncWrite + Unpin>(&self, writer: W, now: Timestamp) -> Result<(), LedgerError> {
        crate::export::export_to(&self.pool, writer, now).await
    }

    /// Atomic-replace import (§4.4.4). Takes the writer lock for the
    /// duration of the clear-and-reload.
    pub async fn import<R: tokio::io::AsyncRead + Unpin>(&self, reader: R) -> Result<ValidationResult, LedgerError> {
        let _guard = self.writer_lock.lock().await;
        crate::export::import_from(self, reader).await
    }

    /// Forced delete, bypassing the `affected == 0` guard (§4.4.5).
    pub async fn dangerously_delete(&self, pk: &PublicKey, force: bool, reason: &str) -> Result<(), LedgerError> {
        let _guard = self.writer_lock.lock().await;
        let impact = self.can_delete(pk).await?;
        if !impact.exists {
            return Err(LedgerError::AuthKeyNotFound(pk.as_str().to_string()));
        }
        if impact.affected_block_count > 0 && !force {
            return Err(LedgerError::Other(format!(
                "refusing to delete {}: {} blocks depend on it (force=false)",
                pk, impact.affected_block_count
            )));
        }
        let auth = AuthLog::new(&self.pool);
        let removed = auth.delete(pk).await?;
        warn!(%pk, reason, removed, "dangerous key deletion performed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodian_store::{ensure_schema, AuthLog};

    async fn temp_engine(name: &str) -> ChainEngine {
        let path = std::env::temp_dir().join(format!("custodian_chain_engine_test_{}.db", name));
        let _ = std::fs::remove_file(&path);
        let pool = StorePool::connect_sqlite(path.to_str().unwrap()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        ChainEngine::new(Arc::new(pool))
    }

    #[tokio::test]
    async fn admit_builds_on_genesis_and_validates() {
        let engine = temp_engine("admit").await;
        engine.init_genesis().await.unwrap();

        let kp = KeyPair::generate();
        AuthLog::new(engine.pool()).add(&kp.public_key, "alice", custodian_core::types::Role::Writer, now_epoch() - 10).await.unwrap();

        let b1 = engine.admit(Some("a".to_string()), &kp, None, Vec::new(), Default::default()).await.unwrap();
        assert_eq!(b1.block_number, 1);

        let result = engine.validate_chain().await.unwrap();
        assert!(result.is_structurally_intact);
        assert!(result.is_fully_compliant);
        assert_eq!(result.total_blocks, 2);
    }

    #[tokio::test]
    async fn unauthorized_signer_is_rejected() {
        let engine = temp_engine("unauthorized").await;
        engine.init_genesis().await.unwrap();
        let kp = KeyPair::generate();
        let err = engine.admit(Some("x".to_string()), &kp, None, Vec::new(), Default::default()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn rollback_n_removes_recent_blocks_but_not_genesis() {
        let engine = temp_engine("rollback").await;
        engine.init_genesis().await.unwrap();
        let kp = KeyPair::generate();
        AuthLog::new(engine.pool()).add(&kp.public_key, "alice", custodian_core::types::Role::Writer, now_epoch() - 10).await.unwrap();

        engine.admit(Some("a".to_string()), &kp, None, Vec::new(), Default::default()).await.unwrap();
        engine.admit(Some("b".to_string()), &kp, None, Vec::new(), Default::default()).await.unwrap();

        let removed = engine.rollback_n(2, None).await.unwrap();
        assert_eq!(removed, 2);

        let blocks = BlockStore::new(engine.pool());
        assert_eq!(blocks.count().await.unwrap(), 1);
        assert!(blocks.get_by_number(0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dangerously_delete_breaks_compliance_but_not_structure() {
        let engine = temp_engine("dangerous_delete").await;
        engine.init_genesis().await.unwrap();
        let kp = KeyPair::generate();
        AuthLog::new(engine.pool()).add(&kp.public_key, "alice", custodian_core::types::Role::Writer, now_epoch() - 10).await.unwrap();
        engine.admit(Some("a".to_string()), &kp, None, Vec::new(), Default::default()).await.unwrap();

        engine.dangerously_delete(&kp.public_key, true, "test").await.unwrap();
        let result = engine.validate_chain().await.unwrap();
        assert!(result.is_structurally_intact);
        assert!(!result.is_fully_compliant);
    }

    #[tokio::test]
    async fn admit_encrypted_stores_ciphertext_and_validates() {
        let engine = temp_engine("admit_encrypted").await;
        engine.init_genesis().await.unwrap();
        let kp = KeyPair::generate();
        AuthLog::new(engine.pool()).add(&kp.public_key, "alice", custodian_core::types::Role::Writer, now_epoch() - 10).await.unwrap();

        let block = engine
            .admit_encrypted(b"top secret payload", "correct horse battery staple", &kp, None, Vec::new(), Default::default())
            .await
            .unwrap();

        assert!(block.is_encrypted);
        let envelope = block.data.as_deref().unwrap();
        assert_ne!(envelope, "top secret payload");
        let plaintext = custodian_crypto::decrypt_gcm(envelope, "correct horse battery staple").unwrap();
        assert_eq!(plaintext, b"top secret payload");

        let result = engine.validate_chain().await.unwrap();
        assert!(result.is_fully_compliant);
    }
}
