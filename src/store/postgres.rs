//! PostgreSQL pairing store.
//!
//! Schema lives in `migrations/` and is applied with refinery. Every
//! transition is a single `UPDATE ... WHERE status = 'pending' ... RETURNING`
//! so Postgres row locking picks the winner of concurrent writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;
use uuid::Uuid;

use super::PairingStore;
use crate::error::DatabaseError;
use crate::pairing::code::PairingCode;
use crate::pairing::permissions::Permissions;
use crate::pairing::record::{PairingRecord, PairingStatus};

refinery::embed_migrations!("migrations");

/// Unique index guarding one pending record per child.
const PENDING_CHILD_INDEX: &str = "pairing_records_pending_child";

const RECORD_COLUMNS: &str = "id, child_id, parent_id, pairing_code, status, permissions, \
                              expires_at, activated_at, created_at, updated_at";

pub struct PostgresPairingStore {
    pool: Pool,
}

impl PostgresPairingStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from a connection URL.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self, DatabaseError> {
        let mut config = deadpool_postgres::Config::new();
        config.url = Some(url.to_string());
        config.pool = Some(deadpool_postgres::PoolConfig::new(pool_size));
        let pool = config.create_pool(
            Some(deadpool_postgres::Runtime::Tokio1),
            tokio_postgres::NoTls,
        )?;
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn().await?;
        let client: &mut tokio_postgres::Client = &mut conn;
        let report = migrations::runner()
            .run_async(client)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        for migration in report.applied_migrations() {
            tracing::info!(migration = %migration, "Applied migration");
        }
        Ok(())
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

/// Sort constraint violations into the variants the service reacts to.
fn classify(e: tokio_postgres::Error) -> DatabaseError {
    match e.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
            let constraint = e
                .as_db_error()
                .and_then(|db| db.constraint())
                .unwrap_or_default()
                .to_string();
            if constraint == PENDING_CHILD_INDEX {
                DatabaseError::IntegrityRace(constraint)
            } else {
                DatabaseError::DuplicateKey(constraint)
            }
        }
        Some(code) if *code == SqlState::FOREIGN_KEY_VIOLATION => {
            DatabaseError::IntegrityRace(e.to_string())
        }
        _ => DatabaseError::Postgres(e),
    }
}

fn row_to_record(row: &Row) -> Result<PairingRecord, DatabaseError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<PairingStatus>()
        .map_err(DatabaseError::Serialization)?;

    let code: String = row.try_get("pairing_code")?;
    let pairing_code = PairingCode::parse(&code)
        .map_err(|_| DatabaseError::Serialization("malformed stored pairing code".to_string()))?;

    let permissions: Option<serde_json::Value> = row.try_get("permissions")?;
    let permissions = permissions
        .map(serde_json::from_value::<Permissions>)
        .transpose()
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

    Ok(PairingRecord {
        id: row.try_get("id")?,
        child_id: row.try_get("child_id")?,
        parent_id: row.try_get("parent_id")?,
        pairing_code,
        status,
        permissions,
        expires_at: row.try_get("expires_at")?,
        activated_at: row.try_get("activated_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn single(row: Option<Row>) -> Result<Option<PairingRecord>, DatabaseError> {
    row.as_ref().map(row_to_record).transpose()
}

#[async_trait]
impl PairingStore for PostgresPairingStore {
    async fn supersede_and_insert(
        &self,
        record: &PairingRecord,
    ) -> Result<Vec<PairingRecord>, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let sql = format!(
            r#"
            UPDATE pairing_records
            SET status = 'expired', updated_at = $2
            WHERE child_id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );
        let rows = tx
            .query(&sql, &[&record.child_id, &record.created_at])
            .await
            .map_err(classify)?;
        let superseded = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()?;

        tx.execute(
            r#"
            INSERT INTO pairing_records
                (id, child_id, parent_id, pairing_code, status, permissions,
                 expires_at, activated_at, created_at, updated_at)
            VALUES ($1, $2, NULL, $3, 'pending', NULL, $4, NULL, $5, $5)
            "#,
            &[
                &record.id,
                &record.child_id,
                &record.pairing_code.as_str(),
                &record.expires_at,
                &record.created_at,
            ],
        )
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(superseded)
    }

    async fn pending_code_exists(&self, code: &PairingCode) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT 1 FROM pairing_records WHERE pairing_code = $1 AND status = 'pending'",
                &[&code.as_str()],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn bind_parent(
        &self,
        code: &PairingCode,
        parent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!(
            r#"
            UPDATE pairing_records
            SET parent_id = $2, updated_at = $3
            WHERE pairing_code = $1
              AND status = 'pending'
              AND parent_id IS NULL
              AND expires_at > $3
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );
        let row = conn
            .query_opt(&sql, &[&code.as_str(), &parent_id, &now])
            .await
            .map_err(classify)?;
        single(row)
    }

    async fn find_bound(
        &self,
        code: &PairingCode,
        parent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!(
            r#"
            SELECT {}
            FROM pairing_records
            WHERE pairing_code = $1
              AND parent_id = $2
              AND status = 'pending'
              AND expires_at > $3
            "#,
            RECORD_COLUMNS
        );
        let row = conn
            .query_opt(&sql, &[&code.as_str(), &parent_id, &now])
            .await?;
        single(row)
    }

    async fn activate(
        &self,
        id: Uuid,
        child_id: Uuid,
        permissions: Permissions,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let permissions = serde_json::to_value(permissions)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let sql = format!(
            r#"
            UPDATE pairing_records
            SET status = 'active', permissions = $3, activated_at = $4, updated_at = $4
            WHERE id = $1
              AND child_id = $2
              AND status = 'pending'
              AND parent_id IS NOT NULL
              AND expires_at > $4
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );
        let row = conn
            .query_opt(&sql, &[&id, &child_id, &permissions, &now])
            .await
            .map_err(classify)?;
        single(row)
    }

    async fn reject(
        &self,
        id: Uuid,
        child_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!(
            r#"
            UPDATE pairing_records
            SET status = 'rejected', updated_at = $3
            WHERE id = $1 AND child_id = $2 AND status = 'pending' AND expires_at > $3
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );
        let row = conn
            .query_opt(&sql, &[&id, &child_id, &now])
            .await
            .map_err(classify)?;
        single(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PairingRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!("SELECT {} FROM pairing_records WHERE id = $1", RECORD_COLUMNS);
        let row = conn.query_opt(&sql, &[&id]).await?;
        single(row)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let expired = conn
            .execute(
                r#"
                UPDATE pairing_records
                SET status = 'expired', updated_at = $1
                WHERE status = 'pending' AND expires_at <= $1
                "#,
                &[&now],
            )
            .await?;
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_columns_cover_record_fields() {
        for column in [
            "id",
            "child_id",
            "parent_id",
            "pairing_code",
            "status",
            "permissions",
            "expires_at",
            "activated_at",
            "created_at",
            "updated_at",
        ] {
            assert!(RECORD_COLUMNS.contains(column), "missing {}", column);
        }
    }

    #[tokio::test]
    async fn test_connect_builds_pool_lazily() {
        // Pool creation does not dial the server.
        let store = PostgresPairingStore::connect("postgres://localhost:1/pairlink", 2);
        assert!(store.is_ok());
    }
}
