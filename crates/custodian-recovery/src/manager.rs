//! Recovery manager (C6, §4.6): diagnosis of a damaged chain and an ordered
//! set of self-healing strategies.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use custodian_chain::{validate_against_predecessor, ChainEngine};
use custodian_core::model::{BlockDefect, CorruptedBlock, DiagnosisReport, RecoveryAttempt, RecoveryMethod};
use custodian_core::types::{BlockNumber, PublicKey, Role, Timestamp};
use custodian_core::{LedgerError, DEFAULT_ROLLBACK_SAFETY_MARGIN, LARGE_ROLLBACK_THRESHOLD, MAX_CORRUPTED_SAMPLE};
use custodian_store::{AuthLog, BlockStore, StorePool};

fn now_epoch() -> Timestamp {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64
}

/// Scans and, on request, repairs a ledger. Holds a reference to the chain
/// engine it operates on rather than owning its own writer lock — rollback
/// and other mutations still serialize through `ChainEngine`.
pub struct RecoveryManager {
    engine: Arc<ChainEngine>,
    safety_margin: f64,
}

impl RecoveryManager {
    pub fn new(engine: Arc<ChainEngine>) -> Self {
        Self { engine, safety_margin: DEFAULT_ROLLBACK_SAFETY_MARGIN }
    }

    pub fn with_safety_margin(engine: Arc<ChainEngine>, safety_margin: f64) -> Self {
        Self { engine, safety_margin }
    }

    fn pool(&self) -> &Arc<StorePool> {
        self.engine.pool()
    }

    /// Classify every non-genesis block as valid or corrupted (§4.6). The
    /// sample of corrupted blocks is capped at `MAX_CORRUPTED_SAMPLE` to
    /// avoid unbounded memory on a badly damaged chain.
    pub async fn diagnose(&self) -> Result<DiagnosisReport, LedgerError> {
        let blocks = BlockStore::new(self.pool());
        let auth = AuthLog::new(self.pool());

        let total = blocks.count().await?;
        let mut prev = match blocks.get_by_number(0).await? {
            Some(b) => b,
            None => {
                return Ok(DiagnosisReport { total_blocks: 0, corrupted_count: 0, corrupted_sample: Vec::new(), is_healthy: true });
            }
        };

        let mut corrupted_count: u64 = 0;
        let mut sample = Vec::new();
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
                if !defects.is_empty() {
                    corrupted_count += 1;
                    if sample.len() < MAX_CORRUPTED_SAMPLE {
                        sample.push(CorruptedBlock { block_number: b.block_number, defects });
                    }
                }
                prev = b;
            }
        }

        Ok(DiagnosisReport { total_blocks: total, corrupted_count, corrupted_sample: sample, is_healthy: corrupted_count == 0 })
    }

    /// The first block number (if any) whose predecessor-relative validation
    /// fails on structural grounds (ignoring authorization, which
    /// `re_authorize` may still fix).
    async fn first_structural_defect(&self) -> Result<Option<BlockNumber>, LedgerError> {
        let blocks = BlockStore::new(self.pool());
        let mut prev = match blocks.get_by_number(0).await? {
            Some(b) => b,
            None => return Ok(None),
        };
        let mut after = 0;
        loop {
            let page = blocks.page_after(after, custodian_core::DEFAULT_BATCH_SIZE as i64).await?;
            if page.is_empty() {
                return Ok(None);
            }
            for b in page {
                after = b.block_number;
                let defects = validate_against_predecessor(&b, &prev, |_, _| true);
                let structural = defects.iter().any(|d| !matches!(d, BlockDefect::NotAuthorizedAtTimestamp));
                if structural {
                    return Ok(Some(b.block_number));
                }
                prev = b;
            }
        }
    }

    /// Try re-authorize, then bounded rollback, then partial export, in that
    /// order, stopping at the first that succeeds (§4.6).
    pub async fn recover(&self, pk: &PublicKey, owner_name: &str) -> Result<Vec<RecoveryAttempt>, LedgerError> {
        let mut attempts = Vec::new();

        let reauth = self.try_reauthorize(pk, owner_name).await?;
        let reauth_succeeded = reauth.success;
        attempts.push(reauth);
        if reauth_succeeded {
            return Ok(attempts);
        }

        let rollback = self.try_bounded_rollback().await?;
        let rollback_succeeded = rollback.success;
        attempts.push(rollback);
        if rollback_succeeded {
            return Ok(attempts);
        }

        attempts.push(self.try_partial_export().await?);
        Ok(attempts)
    }

    async fn try_reauthorize(&self, pk: &PublicKey, owner_name: &str) -> Result<RecoveryAttempt, LedgerError> {
        let blocks = BlockStore::new(self.pool());
        let signed = blocks.by_signer(pk.as_str()).await?;
        let earliest = signed.iter().map(|b| b.timestamp).min();

        let Some(earliest_ts) = earliest else {
            return Ok(RecoveryAttempt {
                method: RecoveryMethod::ReAuthorize,
                success: false,
                message: format!("no blocks signed by {}", pk),
                timestamp: now_epoch(),
            });
        };

        let auth = AuthLog::new(self.pool());
        auth.add(pk, owner_name, Role::Writer, earliest_ts - 1).await?;

        let result = self.engine.validate_chain().await?;
        let success = result.is_fully_compliant;
        Ok(RecoveryAttempt {
            method: RecoveryMethod::ReAuthorize,
            success,
            message: if success {
                format!("re-authorized {} as of {}; chain is fully compliant", pk, earliest_ts - 1)
            } else {
                format!("re-authorized {} but chain is still not fully compliant", pk)
            },
            timestamp: now_epoch(),
        })
    }

    async fn try_bounded_rollback(&self) -> Result<RecoveryAttempt, LedgerError> {
        let blocks = BlockStore::new(self.pool());
        let total = blocks.count().await?;
        let Some(first_bad) = self.first_structural_defect().await? else {
            return Ok(RecoveryAttempt {
                method: RecoveryMethod::BoundedRollback,
                success: false,
                message: "no structural defect found to roll back past".to_string(),
                timestamp: now_epoch(),
            });
        };

        let to_drop = total.saturating_sub(first_bad as u64);
        let limit = (LARGE_ROLLBACK_THRESHOLD as f64 * self.safety_margin) as u64;
        if to_drop > limit {
            return Ok(RecoveryAttempt {
                method: RecoveryMethod::BoundedRollback,
                success: false,
                message: format!("would drop {} blocks, exceeding the {} safety margin of {}", to_drop, LARGE_ROLLBACK_THRESHOLD, limit),
                timestamp: now_epoch(),
            });
        }

        let removed = self.engine.rollback_to(first_bad - 1, None).await?;
        Ok(RecoveryAttempt {
            method: RecoveryMethod::BoundedRollback,
            success: true,
            message: format!("rolled back {} blocks to restore structural integrity", removed),
            timestamp: now_epoch(),
        })
    }

    /// Count-only "export" of the valid prefix: walks the cursor and counts
    /// blocks before the first structural defect without accumulating them,
    /// per the count-only requirement of §4.6's third strategy.
    async fn try_partial_export(&self) -> Result<RecoveryAttempt, LedgerError> {
        let blocks = BlockStore::new(self.pool());
        let limit = self.first_structural_defect().await?.unwrap_or(i64::MAX);
        let mut count: u64 = 0;
        let mut after = -1;
        'pages: loop {
            let page = blocks.page_after(after, custodian_core::DEFAULT_BATCH_SIZE as i64).await?;
            if page.is_empty() {
                break;
            }
            for b in &page {
                if b.block_number >= limit {
                    break 'pages;
                }
                count += 1;
            }
            after = page.last().expect("page checked non-empty above").block_number;
        }
        Ok(RecoveryAttempt {
            method: RecoveryMethod::PartialExport,
            success: true,
            message: format!("valid prefix of {} blocks identified for export", count),
            timestamp: now_epoch(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodian_chain::ChainEngine;
    use custodian_core::model::Block;
    use custodian_core::types::{Hash, Signature};
    use custodian_crypto::KeyPair;
    use custodian_store::ensure_schema;
    use std::collections::BTreeMap;

    async fn temp_manager(name: &str) -> (Arc<ChainEngine>, RecoveryManager) {
        let path = std::env::temp_dir().join(format!("custodian_recovery_test_{}.db", name));
        let _ = std::fs::remove_file(&path);
        let pool = StorePool::connect_sqlite(path.to_str().unwrap()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let engine = Arc::new(ChainEngine::new(Arc::new(pool)));
        engine.init_genesis().await.unwrap();
        let manager = RecoveryManager::new(Arc::clone(&engine));
        (engine, manager)
    }

    /// S6: dangerously delete a signer's authorization, then `recover` —
    /// the re-authorize strategy should restore full compliance and the
    /// ladder should stop there without trying rollback or export.
    #[tokio::test]
    async fn recover_via_reauthorize_after_dangerous_delete() {
        let (engine, manager) = temp_manager("reauthorize").await;
        let kp = KeyPair::generate();
        AuthLog::new(engine.pool()).add(&kp.public_key, "alice", Role::Writer, now_epoch() - 100).await.unwrap();
        engine.admit(Some("a".to_string()), &kp, None, Vec::new(), Default::default()).await.unwrap();

        engine.dangerously_delete(&kp.public_key, true, "test").await.unwrap();
        let before = engine.validate_chain().await.unwrap();
        assert!(!before.is_fully_compliant);

        let attempts = manager.recover(&kp.public_key, "alice").await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].method, RecoveryMethod::ReAuthorize);
        assert!(attempts[0].success);

        let after = engine.validate_chain().await.unwrap();
        assert!(after.is_fully_compliant);
    }

    /// A structurally corrupted tail (no authorization fix can help) falls
    /// through to bounded rollback, which drops it and succeeds.
    #[tokio::test]
    async fn recover_via_bounded_rollback_when_reauthorize_cannot_help() {
        let (engine, manager) = temp_manager("bounded_rollback").await;
        let kp = KeyPair::generate();
        AuthLog::new(engine.pool()).add(&kp.public_key, "alice", Role::Writer, now_epoch() - 100).await.unwrap();
        engine.admit(Some("a".to_string()), &kp, None, Vec::new(), Default::default()).await.unwrap();

        let blocks = BlockStore::new(engine.pool());
        let corrupt = Block {
            block_number: 2,
            previous_hash: Hash("not-the-real-previous-hash".to_string()),
            data: Some("corrupt".to_string()),
            timestamp: now_epoch(),
            hash: Hash("bogus".to_string()),
            signature: Signature("bogus".to_string()),
            signer_public_key: kp.public_key.clone(),
            is_encrypted: false,
            category: None,
            keywords: Vec::new(),
            custom_metadata: BTreeMap::new(),
            off_chain_ref: None,
        };
        blocks.save(&corrupt).await.unwrap();

        // No public key in this test is ever associated with the corrupt
        // block's bogus signer in a way re-authorize could fix; the defect
        // is structural (hash/signature), so re-authorize fails first.
        let unrelated = PublicKey("unrelated-key-never-signed-anything".to_string());
        let attempts = manager.recover(&unrelated, "nobody").await.unwrap();

        assert_eq!(attempts[0].method, RecoveryMethod::ReAuthorize);
        assert!(!attempts[0].success);
        assert_eq!(attempts[1].method, RecoveryMethod::BoundedRollback);
        assert!(attempts[1].success);

        let after = engine.validate_chain().await.unwrap();
        assert!(after.is_structurally_intact);
    }

    /// When the safety margin forbids the rollback bounded-rollback would
    /// need, the ladder falls through to the count-only partial export.
    #[tokio::test]
    async fn recover_via_partial_export_when_rollback_exceeds_safety_margin() {
        let path = std::env::temp_dir().join("custodian_recovery_test_partial_export.db");
        let _ = std::fs::remove_file(&path);
        let pool = StorePool::connect_sqlite(path.to_str().unwrap()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let engine = Arc::new(ChainEngine::new(Arc::new(pool)));
        engine.init_genesis().await.unwrap();
        let manager = RecoveryManager::with_safety_margin(Arc::clone(&engine), 0.0);

        let kp = KeyPair::generate();
        AuthLog::new(engine.pool()).add(&kp.public_key, "alice", Role::Writer, now_epoch() - 100).await.unwrap();
        engine.admit(Some("a".to_string()), &kp, None, Vec::new(), Default::default()).await.unwrap();

        let blocks = BlockStore::new(engine.pool());
        let corrupt = Block {
            block_number: 2,
            previous_hash: Hash("not-the-real-previous-hash".to_string()),
            data: Some("corrupt".to_string()),
            timestamp: now_epoch(),
            hash: Hash("bogus".to_string()),
            signature: Signature("bogus".to_string()),
            signer_public_key: kp.public_key.clone(),
            is_encrypted: false,
            category: None,
            keywords: Vec::new(),
            custom_metadata: BTreeMap::new(),
            off_chain_ref: None,
        };
        blocks.save(&corrupt).await.unwrap();

        let unrelated = PublicKey("unrelated-key-never-signed-anything".to_string());
        let attempts = manager.recover(&unrelated, "nobody").await.unwrap();

        assert_eq!(attempts[0].method, RecoveryMethod::ReAuthorize);
        assert!(!attempts[0].success);
        assert_eq!(attempts[1].method, RecoveryMethod::BoundedRollback);
        assert!(!attempts[1].success);
        assert_eq!(attempts[2].method, RecoveryMethod::PartialExport);
        assert!(attempts[2].success);
        assert!(attempts[2].message.contains('2'));
    }
}
