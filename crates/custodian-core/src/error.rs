use thiserror::Error;

/// The root error taxonomy (§7). Every fallible operation across the
/// workspace returns a tagged variant of this enum (or a crate-local enum
/// that wraps it) — never a sentinel value.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ── Admission / validation ───────────────────────────────────────────────
    #[error("block payload too large: {actual} exceeds limit {limit}")]
    BlockTooLarge { actual: usize, limit: usize },

    #[error("public key {0} is not authorized at the admission timestamp")]
    Unauthorized(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("hash mismatch: expected {expected}, computed {computed}")]
    InvalidHash { expected: String, computed: String },

    #[error("sequence gap: expected block number {expected}, got {got}")]
    SequenceGap { expected: i64, got: i64 },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("cryptographic operation failed: {0}")]
    CryptoError(String),

    // ── Chain-level ──────────────────────────────────────────────────────────
    #[error("chain corrupted in range {start}..{end} ({count} blocks affected)")]
    ChainCorrupted { start: i64, end: i64, count: u64 },

    #[error("concurrency conflict: single-writer discipline was bypassed")]
    ConcurrencyConflict,

    // ── Off-chain store ───────────────────────────────────────────────────────
    #[error("off-chain object integrity check failed for {0}")]
    OffChainIntegrityFailure(String),

    #[error("off-chain object not found: {0}")]
    OffChainObjectNotFound(String),

    // ── Indexing coordinator ─────────────────────────────────────────────────
    #[error("indexer busy for operation {0}")]
    IndexerBusy(String),

    #[error("indexer cancelled: {0}")]
    IndexerCancelled(String),

    #[error("indexer timed out waiting for completion")]
    IndexerTimeout,

    // ── Streaming / search ────────────────────────────────────────────────────
    #[error("limit exceeded: {kind} limit is {limit}")]
    LimitExceeded { kind: String, limit: usize },

    // ── Recovery ──────────────────────────────────────────────────────────────
    #[error("all recovery strategies exhausted for {0}")]
    RecoveryExhausted(String),

    // ── Not found / generic ───────────────────────────────────────────────────
    #[error("block not found: {0}")]
    BlockNotFound(i64),

    #[error("authorization record not found for key {0}")]
    AuthKeyNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::StorageError(e.to_string())
    }
}
