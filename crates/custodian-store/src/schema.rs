use custodian_core::LedgerError;

use crate::pool::StorePool;

/// Recommended schema from §6, Postgres dialect.
const POSTGRES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    id                  BIGSERIAL PRIMARY KEY,
    block_number        BIGINT NOT NULL UNIQUE,
    previous_hash       TEXT NOT NULL,
    data                TEXT,
    timestamp           BIGINT NOT NULL,
    hash                TEXT NOT NULL,
    signature           TEXT NOT NULL,
    signer_public_key   TEXT NOT NULL,
    is_encrypted        BOOLEAN NOT NULL DEFAULT FALSE,
    category            TEXT,
    keywords            TEXT,
    custom_metadata     TEXT,
    off_chain_ref       TEXT
);
CREATE INDEX IF NOT EXISTS idx_blocks_hash ON blocks (hash);
CREATE INDEX IF NOT EXISTS idx_blocks_signer ON blocks (signer_public_key);
CREATE INDEX IF NOT EXISTS idx_blocks_timestamp ON blocks (timestamp);

CREATE TABLE IF NOT EXISTS authorized_keys (
    id              BIGSERIAL PRIMARY KEY,
    public_key      TEXT NOT NULL,
    owner_name      TEXT NOT NULL,
    role            TEXT NOT NULL,
    created_at      BIGINT NOT NULL,
    revoked_at      BIGINT,
    is_active       BOOLEAN NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_authorized_keys_pk ON authorized_keys (public_key);

CREATE TABLE IF NOT EXISTS off_chain_data (
    id                  BIGSERIAL PRIMARY KEY,
    data_hash           TEXT NOT NULL UNIQUE,
    signature           TEXT NOT NULL,
    file_path           TEXT NOT NULL,
    file_size           BIGINT NOT NULL,
    content_type        TEXT NOT NULL,
    encryption_iv        TEXT,
    encryption_salt      TEXT,
    signer_public_key    TEXT NOT NULL,
    created_at          BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS block_sequence (
    sequence_name   TEXT PRIMARY KEY,
    next_value      BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS configuration (
    config_key      TEXT NOT NULL,
    config_type     TEXT NOT NULL,
    config_value    TEXT NOT NULL,
    PRIMARY KEY (config_key, config_type)
);

CREATE TABLE IF NOT EXISTS configuration_audit (
    id              BIGSERIAL PRIMARY KEY,
    config_key      TEXT NOT NULL,
    config_type     TEXT NOT NULL,
    old_value       TEXT,
    new_value       TEXT,
    changed_at      BIGINT NOT NULL
);
"#;

/// Same schema, SQLite dialect (no `BIGSERIAL`; `INTEGER PRIMARY KEY`
/// autoincrements, `BOOLEAN` is stored as `INTEGER`).
const SQLITE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    block_number        INTEGER NOT NULL UNIQUE,
    previous_hash       TEXT NOT NULL,
    data                TEXT,
    timestamp           INTEGER NOT NULL,
    hash                TEXT NOT NULL,
    signature           TEXT NOT NULL,
    signer_public_key   TEXT NOT NULL,
    is_encrypted        INTEGER NOT NULL DEFAULT 0,
    category            TEXT,
    keywords            TEXT,
    custom_metadata     TEXT,
    off_chain_ref       TEXT
);
CREATE INDEX IF NOT EXISTS idx_blocks_hash ON blocks (hash);
CREATE INDEX IF NOT EXISTS idx_blocks_signer ON blocks (signer_public_key);
CREATE INDEX IF NOT EXISTS idx_blocks_timestamp ON blocks (timestamp);

CREATE TABLE IF NOT EXISTS authorized_keys (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    public_key      TEXT NOT NULL,
    owner_name      TEXT NOT NULL,
    role            TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    revoked_at      INTEGER,
    is_active       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_authorized_keys_pk ON authorized_keys (public_key);

CREATE TABLE IF NOT EXISTS off_chain_data (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    data_hash           TEXT NOT NULL UNIQUE,
    signature           TEXT NOT NULL,
    file_path           TEXT NOT NULL,
    file_size           INTEGER NOT NULL,
    content_type        TEXT NOT NULL,
    encryption_iv        TEXT,
    encryption_salt      TEXT,
    signer_public_key    TEXT NOT NULL,
    created_at          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS block_sequence (
    sequence_name   TEXT PRIMARY KEY,
    next_value      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS configuration (
    config_key      TEXT NOT NULL,
    config_type     TEXT NOT NULL,
    config_value    TEXT NOT NULL,
    PRIMARY KEY (config_key, config_type)
);

CREATE TABLE IF NOT EXISTS configuration_audit (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    config_key      TEXT NOT NULL,
    config_type     TEXT NOT NULL,
    old_value       TEXT,
    new_value       TEXT,
    changed_at      INTEGER NOT NULL
);
"#;

/// Create every table from §6's recommended schema if it does not already
/// exist. Idempotent — safe to call on every startup.
pub async fn ensure_schema(pool: &StorePool) -> Result<(), LedgerError> {
    match pool {
        StorePool::Postgres(p) => {
            for stmt in split_statements(POSTGRES_DDL) {
                sqlx::query(stmt).execute(p).await?;
            }
        }
        StorePool::Sqlite(p) => {
            for stmt in split_statements(SQLITE_DDL) {
                sqlx::query(stmt).execute(p).await?;
            }
        }
    }
    Ok(())
}

fn split_statements(ddl: &str) -> impl Iterator<Item = &str> {
    ddl.split(';').map(str::trim).filter(|s| !s.is_empty())
}
