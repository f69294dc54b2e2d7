//! Streaming export / atomic-replace import (§4.4.4).
//!
//! Export never materializes the full block list: each page fetched from the
//! cursor is serialized and flushed immediately. Import is not held to the
//! same constant-memory bar in the reference description (only the export
//! streamer is required to avoid buffering the whole array), so it reads the
//! whole document, applies the §4.3 temporal adjustments, then replaces the
//! store atomically.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use custodian_core::model::{AuthorizedKey, Block, ValidationResult};
use custodian_core::types::Timestamp;
use custodian_core::{LedgerError, DEFAULT_BATCH_SIZE, MAX_EXPORT_LIMIT, SAFE_EXPORT_LIMIT};
use custodian_store::{AuthLog, BlockStore, StorePool};

use crate::engine::ChainEngine;

const EXPORT_VERSION: &str = "1";

#[derive(Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: String,
    #[serde(rename = "exportTimestamp")]
    pub export_timestamp: Timestamp,
    #[serde(rename = "totalBlocks")]
    pub total_blocks: u64,
    pub blocks: Vec<Block>,
    #[serde(rename = "authorizedKeys")]
    pub authorized_keys: Vec<AuthorizedKey>,
}

/// Stream every block and the full authorization log (including revoked
/// records) to `writer` as a self-describing JSON document. Constant memory
/// regardless of chain size: at most one page of blocks is held at a time.
pub async fn export_to<W: AsyncWrite + Unpin>(
    pool: &Arc<StorePool>,
    mut writer: W,
    now: Timestamp,
) -> Result<(), LedgerError> {
    let blocks = BlockStore::new(pool);
    let auth = AuthLog::new(pool);

    let total = blocks.count().await?;
    if total > MAX_EXPORT_LIMIT {
        warn!(total, limit = MAX_EXPORT_LIMIT, "export exceeds MAX_EXPORT_LIMIT, proceeding");
    } else if total > SAFE_EXPORT_LIMIT {
        warn!(total, limit = SAFE_EXPORT_LIMIT, "export exceeds SAFE_EXPORT_LIMIT, proceeding");
    }

    writer
        .write_all(format!(r#"{{"version":"{}","exportTimestamp":{},"totalBlocks":{},"blocks":["#, EXPORT_VERSION, now, total).as_bytes())
        .await
        .map_err(io_err)?;

    let mut after = -1;
    let mut first = true;
    loop {
        let page = blocks.page_after(after, DEFAULT_BATCH_SIZE as i64).await?;
        if page.is_empty() {
            break;
        }
        for b in &page {
            if !first {
                writer.write_all(b",").await.map_err(io_err)?;
            }
            first = false;
            let json = serde_json::to_string(b).map_err(json_err)?;
            writer.write_all(json.as_bytes()).await.map_err(io_err)?;
            after = b.block_number;
        }
    }

    writer.write_all(br#"],"authorizedKeys":"#).await.map_err(io_err)?;
    let keys = auth.list_all().await?;
    let keys_json = serde_json::to_string(&keys).map_err(json_err)?;
    writer.write_all(keys_json.as_bytes()).await.map_err(io_err)?;
    writer.write_all(b"}").await.map_err(io_err)?;
    writer.flush().await.map_err(io_err)?;
    Ok(())
}

/// Atomic replacement import: clear the block store and authorization log,
/// load authorization records (with temporal adjustment), then blocks in
/// order, then validate. Never leaves the old and new chain mixed: the
/// clearing and reloading happen under the engine's writer lock via
/// `ChainEngine`'s callers, as `import` itself is invoked under that lock.
pub async fn import_from<R: AsyncRead + Unpin>(
    engine: &ChainEngine,
    mut reader: R,
) -> Result<ValidationResult, LedgerError> {
    let pool = engine.pool();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.map_err(io_err)?;
    let mut doc: ExportDocument = serde_json::from_slice(&buf).map_err(json_err)?;

    apply_temporal_adjustments(&mut doc);

    let blocks = BlockStore::new(pool);
    let auth = AuthLog::new(pool);
    blocks.delete_all().await?;
    auth.clear_all().await?;

    for key in &doc.authorized_keys {
        auth.insert_raw(key).await?;
    }
    for block in &doc.blocks {
        blocks.save(block).await?;
    }

    engine.validate_chain().await
}

/// §4.3: if a key's `created_at` is later than the earliest block it signed,
/// rewind it to one minute before that block. If a revoked record carries no
/// `revoked_at`, set it to one minute after the latest block it signed.
fn apply_temporal_adjustments(doc: &mut ExportDocument) {
    let mut earliest: HashMap<String, Timestamp> = HashMap::new();
    let mut latest: HashMap<String, Timestamp> = HashMap::new();
    for b in &doc.blocks {
        let signer = b.signer_public_key.as_str().to_string();
        earliest.entry(signer.clone()).and_modify(|t| *t = (*t).min(b.timestamp)).or_insert(b.timestamp);
        latest.entry(signer).and_modify(|t| *t = (*t).max(b.timestamp)).or_insert(b.timestamp);
    }

    for key in &mut doc.authorized_keys {
        let signer = key.public_key.as_str();
        if let Some(&first_ts) = earliest.get(signer) {
            if key.created_at > first_ts {
                key.created_at = first_ts - 60;
            }
        }
        if !key.is_active && key.revoked_at.is_none() {
            if let Some(&last_ts) = latest.get(signer) {
                key.revoked_at = Some(last_ts + 60);
            }
        }
    }
}

fn io_err(e: std::io::Error) -> LedgerError {
    LedgerError::StorageError(e.to_string())
}

fn json_err(e: serde_json::Error) -> LedgerError {
    LedgerError::StorageError(e.to_string())
}
