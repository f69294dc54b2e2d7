use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{BlockNumber, Hash, PublicKey, Role, Signature, Timestamp};

// ── Block ────────────────────────────────────────────────────────────────────

/// The unit of admission (§3, entity `Block`).
///
/// Block 0 ("genesis") is structurally special: `previous_hash = "0"`,
/// `signer_public_key = "GENESIS"`, `signature = "GENESIS"` (I1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub block_number: BlockNumber,
    pub previous_hash: Hash,
    /// UTF-8 payload, or `None` when the payload lives off-chain (see
    /// `off_chain_ref`).
    pub data: Option<String>,
    pub timestamp: Timestamp,
    pub hash: Hash,
    pub signature: Signature,
    pub signer_public_key: PublicKey,
    pub is_encrypted: bool,
    pub category: Option<String>,
    pub keywords: Vec<String>,
    pub custom_metadata: BTreeMap<String, String>,
    pub off_chain_ref: Option<OffChainRef>,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.block_number == crate::constants::GENESIS_BLOCK_NUMBER
    }

    /// The byte length of `data`, 0 when the payload is off-chain or absent.
    pub fn data_byte_len(&self) -> usize {
        self.data.as_ref().map(|d| d.len()).unwrap_or(0)
    }

    /// The character length of `data`, 0 when the payload is off-chain or absent.
    pub fn data_char_len(&self) -> usize {
        self.data.as_ref().map(|d| d.chars().count()).unwrap_or(0)
    }
}

/// The off-chain pointer carried by a block whose payload has been offloaded
/// to the content-addressed store (C5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OffChainRef {
    pub data_hash: Hash,
    pub signature: Signature,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: String,
    pub encryption_iv: Option<String>,
    pub encryption_salt: Option<String>,
    pub signer_public_key: PublicKey,
}

// ── OffChainObject ───────────────────────────────────────────────────────────

/// Content-addressed payload metadata (§3, entity `OffChainObject`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OffChainObject {
    pub data_hash: Hash,
    pub signature: Signature,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: String,
    pub encryption_iv: Option<String>,
    pub encryption_salt: Option<String>,
    pub signer_public_key: PublicKey,
    pub created_at: Timestamp,
}

// ── AuthorizedKey ────────────────────────────────────────────────────────────

/// An append-only authorization record (§3, entity `AuthorizedKey`).
///
/// Multiple records may exist for the same public key over time: revoke
/// then re-authorize creates a new record rather than mutating the old one
/// (I6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizedKey {
    pub public_key: PublicKey,
    pub owner_name: String,
    pub created_at: Timestamp,
    pub revoked_at: Option<Timestamp>,
    pub is_active: bool,
    pub role: Role,
}

impl AuthorizedKey {
    /// True if this record was the active authorization for its key at `t`.
    pub fn was_active_at(&self, t: Timestamp) -> bool {
        self.created_at <= t && self.revoked_at.map(|r| t < r).unwrap_or(true)
    }
}

// ── BlockSequence ────────────────────────────────────────────────────────────

/// Singleton allocator of the next block number (§3, entity `BlockSequence`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BlockSequence {
    pub next_value: BlockNumber,
}

// ── Validation results (§4.4.2, §4.6) ────────────────────────────────────────

/// Result of validating the whole chain from block 0 forward.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ValidationResult {
    /// I2/I3 hold and every signature verifies.
    pub is_structurally_intact: bool,
    /// Structurally intact AND I4 holds for every block.
    pub is_fully_compliant: bool,
    pub total_blocks: u64,
    pub valid_blocks: u64,
    /// Signed by a key authorized at admission time but not currently
    /// authorized. An audit-trail marker, not a structural defect (see the
    /// Open Questions resolution in SPEC_FULL.md §12).
    pub revoked_blocks: u64,
    pub summary: String,
}

/// Why a single block failed §4.4.2 validation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum BlockDefect {
    PreviousHashMismatch,
    NonContiguousNumber,
    HashMismatch,
    InvalidSignature,
    NotAuthorizedAtTimestamp,
}

/// One entry of a diagnosis's bounded corrupted-block sample (§4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorruptedBlock {
    pub block_number: BlockNumber,
    pub defects: Vec<BlockDefect>,
}

/// Output of `RecoveryManager::diagnose()` (§4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosisReport {
    pub total_blocks: u64,
    pub corrupted_count: u64,
    /// Bounded to `MAX_CORRUPTED_SAMPLE` entries even when `corrupted_count`
    /// is larger, to avoid OOM on a badly damaged chain.
    pub corrupted_sample: Vec<CorruptedBlock>,
    pub is_healthy: bool,
}

/// One recovery strategy attempt (§4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub method: RecoveryMethod,
    pub success: bool,
    pub message: String,
    pub timestamp: Timestamp,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecoveryMethod {
    ReAuthorize,
    BoundedRollback,
    PartialExport,
}

/// Outcome of `can_delete(pk)` (§4.4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionImpact {
    pub exists: bool,
    pub affected_block_count: u64,
    pub message: String,
}

impl DeletionImpact {
    pub fn can_safely_delete(&self) -> bool {
        self.exists && self.affected_block_count == 0
    }
}
