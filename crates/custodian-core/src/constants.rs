//! ─── Memory-safety constants (C10) ─────────────────────────────────────────
//!
//! Centralized caps shared by every component so that a single spot governs
//! how much memory a request can make the process allocate.

// ── Block size limits ────────────────────────────────────────────────────────

/// Maximum serialized block size, in bytes.
pub const MAX_BLOCK_SIZE_BYTES: usize = 1024 * 1024;

/// Maximum `data` length, in UTF-8 characters.
pub const MAX_BLOCK_DATA_LENGTH: usize = 10_000;

// ── Batch / pagination ───────────────────────────────────────────────────────

/// Default page size used by keyset pagination and server-side cursors.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Hard upper bound any caller-supplied batch size is clamped against.
pub const MAX_BATCH_SIZE: usize = 10_000;

// ── Search ────────────────────────────────────────────────────────────────────

/// Default cap on wildcard/metadata search result sets.
pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 10_000;

// ── Export ────────────────────────────────────────────────────────────────────

/// Export sizes at or below this are considered routine.
pub const SAFE_EXPORT_LIMIT: u64 = 100_000;

/// Export sizes above this log a warning; streaming export still proceeds
/// unconditionally (see the Open Questions resolution in SPEC_FULL.md §12).
pub const MAX_EXPORT_LIMIT: u64 = 500_000;

// ── Rollback ──────────────────────────────────────────────────────────────────

/// Rollback ranges at or above this size are considered "large" and require
/// the safety-margin check in the recovery manager's bounded-rollback strategy.
pub const LARGE_ROLLBACK_THRESHOLD: u64 = 100_000;

/// How often (in blocks) a long-running rollback reports progress.
pub const PROGRESS_REPORT_INTERVAL: u64 = 5_000;

// ── Metadata ──────────────────────────────────────────────────────────────────

/// Maximum number of keys considered when walking `custom_metadata`.
pub const MAX_JSON_METADATA_ITERATIONS: usize = 100;

// ── Off-chain store ───────────────────────────────────────────────────────────

/// Age (seconds) after which an unreferenced off-chain object is orphaned.
pub const ORPHAN_TTL_SECS: i64 = 24 * 3600;

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Poll interval used by `wait_for_completion` while watching the active-task
/// counter.
pub const COORDINATOR_POLL_INTERVAL_MS: u64 = 50;

/// How long `shutdown()` waits for the semaphore to free up before proceeding.
pub const COORDINATOR_SHUTDOWN_GRACE_SECS: u64 = 5;

// ── Genesis sentinels ─────────────────────────────────────────────────────────

pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_SIGNER: &str = "GENESIS";
pub const GENESIS_SIGNATURE: &str = "GENESIS";
pub const GENESIS_BLOCK_NUMBER: i64 = 0;

// ── Recovery defaults (configuration surface defaults, §6) ───────────────────

pub const DEFAULT_RECOVERY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_ROLLBACK_SAFETY_MARGIN: f64 = 0.15;

// ── Recovery diagnosis sampling ───────────────────────────────────────────────

/// Maximum number of corrupted blocks retained in a diagnosis sample, to
/// avoid unbounded memory use when a large fraction of the chain is broken.
pub const MAX_CORRUPTED_SAMPLE: usize = 100;
