//! Off-chain content-addressed store (C5, §4.5). Wraps `custodian_store`'s
//! row-level persistence with the filesystem write/read and the
//! hash+signature integrity check that makes a read trustworthy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use custodian_core::model::{OffChainObject, OffChainRef};
use custodian_core::types::Timestamp;
use custodian_core::LedgerError;
use custodian_crypto::KeyPair;
use custodian_store::{BlockStore, OffChainStore, StorePool};

pub struct OffChainManager {
    pool: Arc<StorePool>,
    base_dir: PathBuf,
}

impl OffChainManager {
    pub fn new(pool: Arc<StorePool>, base_dir: impl Into<PathBuf>) -> Self {
        Self { pool, base_dir: base_dir.into() }
    }

    /// Persist `bytes` at a path derived from its digest and return the
    /// `off_chain_ref` a block should carry (§4.5).
    pub async fn write(
        &self,
        keypair: &KeyPair,
        bytes: &[u8],
        content_type: &str,
        encryption_iv: Option<String>,
        encryption_salt: Option<String>,
        now: Timestamp,
    ) -> Result<OffChainRef, LedgerError> {
        let data_hash = custodian_crypto::hash(bytes);
        let signature = keypair.sign(bytes).map_err(|e| LedgerError::CryptoError(e.to_string()))?;
        let file_path = data_hash.as_hex().to_string();

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| LedgerError::StorageError(e.to_string()))?;
        tokio::fs::write(self.base_dir.join(&file_path), bytes)
            .await
            .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        let obj = OffChainObject {
            data_hash: data_hash.clone(),
            signature: signature.clone(),
            file_path: file_path.clone(),
            file_size: bytes.len() as i64,
            content_type: content_type.to_string(),
            encryption_iv: encryption_iv.clone(),
            encryption_salt: encryption_salt.clone(),
            signer_public_key: keypair.public_key.clone(),
            created_at: now,
        };
        OffChainStore::new(&self.pool).put(&obj).await?;

        Ok(OffChainRef {
            data_hash,
            signature,
            file_path,
            file_size: obj.file_size,
            content_type: obj.content_type,
            encryption_iv,
            encryption_salt,
            signer_public_key: obj.signer_public_key,
        })
    }

    /// Read and verify a referenced object: `hash(bytes) = data_hash` and
    /// `verify(signer, bytes, signature)` both hold before the bytes are
    /// handed back (§4.5).
    pub async fn read(&self, reference: &OffChainRef) -> Result<Vec<u8>, LedgerError> {
        let bytes = tokio::fs::read(self.base_dir.join(&reference.file_path))
            .await
            .map_err(|e| LedgerError::OffChainObjectNotFound(e.to_string()))?;

        let computed = custodian_crypto::hash(&bytes);
        if computed.as_hex() != reference.data_hash.as_hex() {
            return Err(LedgerError::OffChainIntegrityFailure(format!(
                "digest mismatch for {}",
                reference.file_path
            )));
        }
        custodian_crypto::verify(&reference.signer_public_key, &bytes, &reference.signature)
            .map_err(|_| LedgerError::OffChainIntegrityFailure(format!("signature mismatch for {}", reference.file_path)))?;

        Ok(bytes)
    }

    /// Delete every off-chain object older than `ttl_secs` and unreferenced
    /// by any block. Deletion is idempotent. Returns the count removed.
    pub async fn cleanup_orphans(&self, now: Timestamp, ttl_secs: i64) -> Result<u64, LedgerError> {
        let referenced = self.referenced_hashes().await?;
        let store = OffChainStore::new(&self.pool);
        let orphans = store.list_orphans(now, ttl_secs, &referenced).await?;
        for orphan in &orphans {
            store.delete(orphan.data_hash.as_hex()).await?;
            let _ = tokio::fs::remove_file(self.base_dir.join(&orphan.file_path)).await;
        }
        Ok(orphans.len() as u64)
    }

    async fn referenced_hashes(&self) -> Result<Vec<String>, LedgerError> {
        let blocks = BlockStore::new(&self.pool);
        let mut referenced = Vec::new();
        let mut after = -1;
        loop {
            let page = blocks.page_after(after, custodian_core::DEFAULT_BATCH_SIZE as i64).await?;
            if page.is_empty() {
                break;
            }
            for b in &page {
                if let Some(r) = &b.off_chain_ref {
                    referenced.push(r.data_hash.as_hex().to_string());
                }
                after = b.block_number;
            }
        }
        Ok(referenced)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
