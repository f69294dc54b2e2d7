use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use custodian_core::model::AuthorizedKey;
use custodian_core::types::{PublicKey, Role, Timestamp};
use custodian_core::LedgerError;

use crate::pool::StorePool;

/// Persistence for `authorized_keys` (C3). Append-only: `add`/`revoke` never
/// mutate an existing row's `created_at`; `revoke` sets `revoked_at` and
/// `is_active = false` on the latest active record.
pub struct AuthLog<'a> {
    pool: &'a StorePool,
}

impl<'a> AuthLog<'a> {
    pub fn new(pool: &'a StorePool) -> Self {
        Self { pool }
    }

    /// Idempotent-by-current-state: rejects (returns `false`) if an active
    /// record already exists for `pk`.
    pub async fn add(
        &self,
        pk: &PublicKey,
        owner_name: &str,
        role: Role,
        created_at: Timestamp,
    ) -> Result<bool, LedgerError> {
        if self.is_authorized_now(pk).await? {
            return Ok(false);
        }
        let role_str = role.to_string();
        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query(
                    "INSERT INTO authorized_keys (public_key, owner_name, role, created_at, revoked_at, is_active) \
                     VALUES ($1,$2,$3,$4,NULL,TRUE)",
                )
                .bind(pk.as_str())
                .bind(owner_name)
                .bind(&role_str)
                .bind(created_at)
                .execute(p)
                .await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query(
                    "INSERT INTO authorized_keys (public_key, owner_name, role, created_at, revoked_at, is_active) \
                     VALUES (?,?,?,?,NULL,1)",
                )
                .bind(pk.as_str())
                .bind(owner_name)
                .bind(&role_str)
                .bind(created_at)
                .execute(p)
                .await?;
            }
        }
        Ok(true)
    }

    /// Revoke the most recent active record for `pk`. Returns `false` if
    /// there was none.
    pub async fn revoke(&self, pk: &PublicKey, now: Timestamp) -> Result<bool, LedgerError> {
        let affected = match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query(
                    "UPDATE authorized_keys SET is_active = FALSE, revoked_at = $1 \
                     WHERE public_key = $2 AND is_active = TRUE",
                )
                .bind(now)
                .bind(pk.as_str())
                .execute(p)
                .await?
                .rows_affected()
            }
            StorePool::Sqlite(p) => {
                sqlx::query(
                    "UPDATE authorized_keys SET is_active = 0, revoked_at = ? \
                     WHERE public_key = ? AND is_active = 1",
                )
                .bind(now)
                .bind(pk.as_str())
                .execute(p)
                .await?
                .rows_affected()
            }
        };
        Ok(affected > 0)
    }

    /// Insert a record verbatim, preserving its `created_at`/`revoked_at`/
    /// `is_active` as given. Used by import, which has already applied the
    /// temporal adjustments of §4.3 and must not re-derive them.
    pub async fn insert_raw(&self, key: &AuthorizedKey) -> Result<(), LedgerError> {
        let role_str = key.role.to_string();
        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query(
                    "INSERT INTO authorized_keys (public_key, owner_name, role, created_at, revoked_at, is_active) \
                     VALUES ($1,$2,$3,$4,$5,$6)",
                )
                .bind(key.public_key.as_str())
                .bind(&key.owner_name)
                .bind(&role_str)
                .bind(key.created_at)
                .bind(key.revoked_at)
                .bind(key.is_active)
                .execute(p)
                .await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query(
                    "INSERT INTO authorized_keys (public_key, owner_name, role, created_at, revoked_at, is_active) \
                     VALUES (?,?,?,?,?,?)",
                )
                .bind(key.public_key.as_str())
                .bind(&key.owner_name)
                .bind(&role_str)
                .bind(key.created_at)
                .bind(key.revoked_at)
                .bind(key.is_active)
                .execute(p)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn is_authorized_now(&self, pk: &PublicKey) -> Result<bool, LedgerError> {
        let row: Option<i64> = match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query_scalar("SELECT 1 FROM authorized_keys WHERE public_key = $1 AND is_active = TRUE LIMIT 1")
                    .bind(pk.as_str())
                    .fetch_optional(p)
                    .await?
            }
            StorePool::Sqlite(p) => {
                sqlx::query_scalar("SELECT 1 FROM authorized_keys WHERE public_key = ? AND is_active = 1 LIMIT 1")
                    .bind(pk.as_str())
                    .fetch_optional(p)
                    .await?
            }
        };
        Ok(row.is_some())
    }

    /// Finds the latest record with `created_at <= t` and checks it was
    /// active at `t` (§4.3).
    pub async fn was_authorized_at(&self, pk: &PublicKey, t: Timestamp) -> Result<bool, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let row = sqlx::query(
                    "SELECT revoked_at FROM authorized_keys WHERE public_key = $1 AND created_at <= $2 \
                     ORDER BY created_at DESC LIMIT 1",
                )
                .bind(pk.as_str())
                .bind(t)
                .fetch_optional(p)
                .await?;
                Ok(match row {
                    None => false,
                    Some(r) => {
                        let revoked_at: Option<Timestamp> = r.try_get("revoked_at").map_err(LedgerError::from)?;
                        revoked_at.map(|rt| t < rt).unwrap_or(true)
                    }
                })
            }
            StorePool::Sqlite(p) => {
                let row = sqlx::query(
                    "SELECT revoked_at FROM authorized_keys WHERE public_key = ? AND created_at <= ? \
                     ORDER BY created_at DESC LIMIT 1",
                )
                .bind(pk.as_str())
                .bind(t)
                .fetch_optional(p)
                .await?;
                Ok(match row {
                    None => false,
                    Some(r) => {
                        let revoked_at: Option<Timestamp> = r.try_get("revoked_at").map_err(LedgerError::from)?;
                        revoked_at.map(|rt| t < rt).unwrap_or(true)
                    }
                })
            }
        }
    }

    pub async fn list_active(&self) -> Result<Vec<AuthorizedKey>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let rows = sqlx::query("SELECT * FROM authorized_keys WHERE is_active = TRUE ORDER BY created_at ASC")
                    .fetch_all(p)
                    .await?;
                rows.into_iter().map(row_to_key_pg).collect()
            }
            StorePool::Sqlite(p) => {
                let rows = sqlx::query("SELECT * FROM authorized_keys WHERE is_active = 1 ORDER BY created_at ASC")
                    .fetch_all(p)
                    .await?;
                rows.into_iter().map(row_to_key_sqlite).collect()
            }
        }
    }

    pub async fn list_all(&self) -> Result<Vec<AuthorizedKey>, LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                let rows = sqlx::query("SELECT * FROM authorized_keys ORDER BY created_at ASC").fetch_all(p).await?;
                rows.into_iter().map(row_to_key_pg).collect()
            }
            StorePool::Sqlite(p) => {
                let rows = sqlx::query("SELECT * FROM authorized_keys ORDER BY created_at ASC").fetch_all(p).await?;
                rows.into_iter().map(row_to_key_sqlite).collect()
            }
        }
    }

    /// Physical delete of every record, for atomic import replacement (§4.4.4).
    pub async fn clear_all(&self) -> Result<(), LedgerError> {
        match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query("DELETE FROM authorized_keys").execute(p).await?;
            }
            StorePool::Sqlite(p) => {
                sqlx::query("DELETE FROM authorized_keys").execute(p).await?;
            }
        }
        Ok(())
    }

    /// Physical delete of every record for `pk` (used by `dangerously_delete`, §4.4.5).
    pub async fn delete(&self, pk: &PublicKey) -> Result<u64, LedgerError> {
        let affected = match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query("DELETE FROM authorized_keys WHERE public_key = $1").bind(pk.as_str()).execute(p).await?.rows_affected()
            }
            StorePool::Sqlite(p) => {
                sqlx::query("DELETE FROM authorized_keys WHERE public_key = ?").bind(pk.as_str()).execute(p).await?.rows_affected()
            }
        };
        Ok(affected)
    }

    pub async fn count_active_super_admins(&self) -> Result<u64, LedgerError> {
        let c: i64 = match self.pool {
            StorePool::Postgres(p) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM authorized_keys WHERE is_active = TRUE AND role = 'super_admin'",
                )
                .fetch_one(p)
                .await?
            }
            StorePool::Sqlite(p) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM authorized_keys WHERE is_active = 1 AND role = 'super_admin'",
                )
                .fetch_one(p)
                .await?
            }
        };
        Ok(c as u64)
    }

    pub async fn get_total_count(&self) -> Result<u64, LedgerError> {
        let c: i64 = match self.pool {
            StorePool::Postgres(p) => sqlx::query_scalar("SELECT COUNT(*) FROM authorized_keys").fetch_one(p).await?,
            StorePool::Sqlite(p) => sqlx::query_scalar("SELECT COUNT(*) FROM authorized_keys").fetch_one(p).await?,
        };
        Ok(c as u64)
    }
}

fn parse_role(s: &str) -> Role {
    match s {
        "super_admin" => Role::SuperAdmin,
        "admin" => Role::Admin,
        "writer" => Role::Writer,
        _ => Role::ReadOnly,
    }
}

fn row_to_key_pg(row: PgRow) -> Result<AuthorizedKey, LedgerError> {
    let role: String = row.try_get("role").map_err(LedgerError::from)?;
    Ok(AuthorizedKey {
        public_key: PublicKey(row.try_get("public_key").map_err(LedgerError::from)?),
        owner_name: row.try_get("owner_name").map_err(LedgerError::from)?,
        created_at: row.try_get("created_at").map_err(LedgerError::from)?,
        revoked_at: row.try_get("revoked_at").map_err(LedgerError::from)?,
        is_active: row.try_get("is_active").map_err(LedgerError::from)?,
        role: parse_role(&role),
    })
}

fn row_to_key_sqlite(row: SqliteRow) -> Result<AuthorizedKey, LedgerError> {
    let role: String = row.try_get("role").map_err(LedgerError::from)?;
    Ok(AuthorizedKey {
        public_key: PublicKey(row.try_get("public_key").map_err(LedgerError::from)?),
        owner_name: row.try_get("owner_name").map_err(LedgerError::from)?,
        created_at: row.try_get("created_at").map_err(LedgerError::from)?,
        revoked_at: row.try_get("revoked_at").map_err(LedgerError::from)?,
        is_active: row.try_get("is_active").map_err(LedgerError::from)?,
        role: parse_role(&role),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::StorePool;
    use crate::schema::ensure_schema;

    async fn temp_store(name: &str) -> StorePool {
        let path = std::env::temp_dir().join(format!("custodian_auth_log_test_{}.db", name));
        let _ = std::fs::remove_file(&path);
        let pool = StorePool::connect_sqlite(path.to_str().unwrap()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn add_then_revoke_then_reauthorize_creates_new_record() {
        let pool = temp_store("add_revoke_reauth").await;
        let log = AuthLog::new(&pool);
        let pk = PublicKey("pk-1".to_string());

        assert!(log.add(&pk, "alice", Role::Writer, 1_000).await.unwrap());
        assert!(!log.add(&pk, "alice", Role::Writer, 1_000).await.unwrap());
        assert!(log.is_authorized_now(&pk).await.unwrap());

        assert!(log.revoke(&pk, 2_000).await.unwrap());
        assert!(!log.is_authorized_now(&pk).await.unwrap());

        assert!(log.add(&pk, "alice", Role::Writer, 3_000).await.unwrap());
        assert!(log.is_authorized_now(&pk).await.unwrap());
        assert_eq!(log.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn was_authorized_at_respects_revocation_window() {
        let pool = temp_store("was_authorized_at").await;
        let log = AuthLog::new(&pool);
        let pk = PublicKey("pk-2".to_string());

        log.add(&pk, "bob", Role::Writer, 1_000).await.unwrap();
        log.revoke(&pk, 2_000).await.unwrap();

        assert!(log.was_authorized_at(&pk, 1_500).await.unwrap());
        assert!(!log.was_authorized_at(&pk, 2_500).await.unwrap());
        assert!(!log.was_authorized_at(&pk, 500).await.unwrap());
    }
}
