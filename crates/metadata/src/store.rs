//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ArtifactRepo, DeviceRepo};
use async_trait::async_trait;
use pwnhub_core::timestamp::format_timestamp;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: DeviceRepo + ArtifactRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_secs: u64) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        // A single connection serializes every write, so a heartbeat and an
        // upload for the same device can never interleave inside SQLite.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(path = %path.display(), "Opened SQLite metadata store");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

fn encode_ts(ts: OffsetDateTime) -> MetadataResult<String> {
    Ok(format_timestamp(ts)?)
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{ArtifactRow, DeviceRow, NewArtifact};
    use pwnhub_core::{HeartbeatRequest, Patch, RegisterRequest};
    use sqlx::QueryBuilder;

    const DEVICE_COLUMNS: &str = "serial, name, hostname, ssh_fingerprint, image_generation, \
         handshake_count, last_seen, last_ip, ssh_provisioned";

    const ARTIFACT_COLUMNS: &str = "id, serial, filename, size_bytes, content_hash, uploaded_at";

    #[async_trait]
    impl DeviceRepo for SqliteStore {
        async fn register_device(
            &self,
            request: &RegisterRequest,
            client_ip: Option<&str>,
            now: OffsetDateTime,
        ) -> MetadataResult<DeviceRow> {
            let last_seen = encode_ts(now)?;
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO devices (serial, hostname, ssh_fingerprint, image_generation,
                                     handshake_count, last_seen, last_ip)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(serial) DO UPDATE SET
                    hostname = excluded.hostname,
                    ssh_fingerprint = excluded.ssh_fingerprint,
                    image_generation = excluded.image_generation,
                    handshake_count = excluded.handshake_count,
                    last_seen = excluded.last_seen,
                    last_ip = excluded.last_ip
                "#,
            )
            .bind(&request.serial)
            .bind(&request.hostname)
            .bind(&request.ssh_fingerprint)
            .bind(request.image_generation.unwrap_or(0))
            .bind(request.handshake_count.unwrap_or(0))
            .bind(&last_seen)
            .bind(client_ip)
            .execute(&mut *tx)
            .await?;

            let row = sqlx::query_as::<_, DeviceRow>(&format!(
                "SELECT {DEVICE_COLUMNS} FROM devices WHERE serial = ?"
            ))
            .bind(&request.serial)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(row)
        }

        async fn heartbeat_device(
            &self,
            request: &HeartbeatRequest,
            client_ip: Option<&str>,
            now: OffsetDateTime,
        ) -> MetadataResult<()> {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE devices SET last_seen = ");
            qb.push_bind(encode_ts(now)?);
            qb.push(", last_ip = ");
            qb.push_bind(client_ip.map(str::to_string));

            if let Some(hostname) = request.hostname.clone().into_update() {
                qb.push(", hostname = ");
                qb.push_bind(hostname);
            }
            if let Some(fingerprint) = request.ssh_fingerprint.clone().into_update() {
                qb.push(", ssh_fingerprint = ");
                qb.push_bind(fingerprint);
            }
            for (column, patch) in [
                ("image_generation", request.image_generation.clone()),
                ("handshake_count", request.handshake_count.clone()),
            ] {
                match patch {
                    Patch::Absent => {}
                    Patch::Null => {
                        return Err(MetadataError::Constraint(format!(
                            "{column} cannot be null"
                        )));
                    }
                    Patch::Value(value) => {
                        qb.push(format!(", {column} = "));
                        qb.push_bind(value);
                    }
                }
            }

            qb.push(" WHERE serial = ");
            qb.push_bind(request.serial.clone());

            let result = qb.build().execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "device {}",
                    request.serial
                )));
            }
            Ok(())
        }

        async fn ensure_device(&self, serial: &str, now: OffsetDateTime) -> MetadataResult<bool> {
            let result = sqlx::query(
                "INSERT INTO devices (serial, last_seen) VALUES (?, ?) ON CONFLICT(serial) DO NOTHING",
            )
            .bind(serial)
            .bind(encode_ts(now)?)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn get_device(&self, serial: &str) -> MetadataResult<Option<DeviceRow>> {
            let row = sqlx::query_as::<_, DeviceRow>(&format!(
                "SELECT {DEVICE_COLUMNS} FROM devices WHERE serial = ?"
            ))
            .bind(serial)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_devices(&self) -> MetadataResult<Vec<DeviceRow>> {
            let rows = sqlx::query_as::<_, DeviceRow>(&format!(
                "SELECT {DEVICE_COLUMNS} FROM devices \
                 ORDER BY last_seen IS NULL, last_seen DESC, serial"
            ))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_ssh_provisioned(&self, serial: &str, provisioned: bool) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE devices SET ssh_provisioned = ? WHERE serial = ?")
                .bind(provisioned)
                .bind(serial)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("device {serial}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ArtifactRepo for SqliteStore {
        async fn record_artifact(&self, artifact: &NewArtifact) -> MetadataResult<ArtifactRow> {
            let uploaded_at = encode_ts(artifact.uploaded_at)?;
            let mut tx = self.pool.begin().await?;

            let inserted = sqlx::query(
                "INSERT INTO artifacts (serial, filename, size_bytes, content_hash, uploaded_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&artifact.serial)
            .bind(&artifact.filename)
            .bind(artifact.size_bytes)
            .bind(&artifact.content_hash)
            .bind(&uploaded_at)
            .execute(&mut *tx)
            .await;

            let id = match inserted {
                Ok(result) => result.last_insert_rowid(),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    tx.rollback().await?;
                    return Err(MetadataError::AlreadyExists(format!(
                        "artifact {}/{}",
                        artifact.serial, artifact.filename
                    )));
                }
                Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                    tx.rollback().await?;
                    return Err(MetadataError::NotFound(format!(
                        "device {}",
                        artifact.serial
                    )));
                }
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e.into());
                }
            };

            let updated = sqlx::query(
                "UPDATE devices SET handshake_count = handshake_count + 1 WHERE serial = ?",
            )
            .bind(&artifact.serial)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() != 1 {
                tx.rollback().await?;
                return Err(MetadataError::NotFound(format!(
                    "device {}",
                    artifact.serial
                )));
            }

            tx.commit().await?;

            Ok(ArtifactRow {
                id,
                serial: artifact.serial.clone(),
                filename: artifact.filename.clone(),
                size_bytes: artifact.size_bytes,
                content_hash: artifact.content_hash.clone(),
                uploaded_at: Some(artifact.uploaded_at),
            })
        }

        async fn get_artifact(
            &self,
            serial: &str,
            filename: &str,
        ) -> MetadataResult<Option<ArtifactRow>> {
            let row = sqlx::query_as::<_, ArtifactRow>(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE serial = ? AND filename = ?"
            ))
            .bind(serial)
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_artifacts(&self) -> MetadataResult<Vec<ArtifactRow>> {
            let rows = sqlx::query_as::<_, ArtifactRow>(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM artifacts \
                 ORDER BY uploaded_at IS NULL, uploaded_at DESC, id DESC"
            ))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_device_artifacts(&self, serial: &str) -> MetadataResult<Vec<ArtifactRow>> {
            let rows = sqlx::query_as::<_, ArtifactRow>(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE serial = ? \
                 ORDER BY uploaded_at IS NULL, uploaded_at DESC, id DESC"
            ))
            .bind(serial)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_device_artifacts_oldest_first(
            &self,
            serial: &str,
        ) -> MetadataResult<Vec<ArtifactRow>> {
            let rows = sqlx::query_as::<_, ArtifactRow>(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE serial = ? \
                 ORDER BY uploaded_at ASC, id ASC"
            ))
            .bind(serial)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_artifact(&self, id: i64) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM artifacts WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn recount_handshakes(&self, serial: &str) -> MetadataResult<i64> {
            let mut tx = self.pool.begin().await?;

            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifacts WHERE serial = ?")
                .bind(serial)
                .fetch_one(&mut *tx)
                .await?;

            let updated = sqlx::query("UPDATE devices SET handshake_count = ? WHERE serial = ?")
                .bind(count)
                .bind(serial)
                .execute(&mut *tx)
                .await?;

            if updated.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(MetadataError::NotFound(format!("device {serial}")));
            }

            tx.commit().await?;
            Ok(count)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    serial TEXT NOT NULL UNIQUE,
    name TEXT,
    hostname TEXT,
    ssh_fingerprint TEXT,
    image_generation INTEGER NOT NULL DEFAULT 0,
    handshake_count INTEGER NOT NULL DEFAULT 0,
    last_seen TEXT,
    last_ip TEXT,
    ssh_provisioned INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON devices(last_seen);

CREATE TABLE IF NOT EXISTS artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    serial TEXT NOT NULL REFERENCES devices(serial),
    filename TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    uploaded_at TEXT,
    UNIQUE (serial, filename)
);
CREATE INDEX IF NOT EXISTS idx_artifacts_serial_uploaded ON artifacts(serial, uploaded_at);
CREATE INDEX IF NOT EXISTS idx_artifacts_uploaded ON artifacts(uploaded_at);
"#;
