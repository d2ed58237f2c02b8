use crate::config::Config;
use crate::error::StoreError;
use crate::model::{ClipboardId, ClipboardRecord};
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::path::Path;
use std::time::Duration;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_clipboards.sql", include_str!("migrations/001_clipboards.sql"))];

pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    turso_url: Option<String>,
    turso_auth_token: Option<String>,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_replica(turso_url: &Option<String>, turso_auth_token: &Option<String>) -> bool {
        turso_url.is_some() && turso_auth_token.is_some()
    }

    pub async fn sync(&self) -> Result<(), StoreError> {
        if Self::is_replica(&self.turso_url, &self.turso_auth_token) {
            self.db.sync().await.map_err(|e| StoreError::Sync(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool, StoreError> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<(), StoreError> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql).await.map_err(|source| StoreError::Migration {
            name: name.to_string(),
            source,
        })?;

        Self::record_migration(conn, name).await
    }

    /// Opens the database named in `app.database` under `data_dir`. Returns
    /// `Ok(None)` when no database is configured.
    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Option<Self>, StoreError> {
        let Some(name) = cfg.app.get_db() else {
            return Ok(None);
        };
        let path = data_dir.join(name);
        let turso_url = cfg.app.turso_url.clone().filter(|s| !s.is_empty());
        let turso_auth_token = cfg.app.turso_auth_token.clone().filter(|s| !s.is_empty());

        let db = match (&turso_url, &turso_auth_token) {
            (Some(url), Some(token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                Builder::new_synced_database(&path, url.clone(), token.clone())
                    .sync_interval(sync_interval)
                    .build()
                    .await?
            }
            _ => Builder::new_local(&path).build().await?,
        };

        Self::init(db, turso_url, turso_auth_token).await.map(Some)
    }

    pub async fn open_local(path: &Path) -> Result<Self, StoreError> {
        let db = Builder::new_local(path).build().await?;
        Self::init(db, None, None).await
    }

    async fn init(
        db: LibsqlDatabase,
        turso_url: Option<String>,
        turso_auth_token: Option<String>,
    ) -> Result<Self, StoreError> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;

        for (filename, sql) in SYSTEM_MIGRATIONS.iter().chain(MIGRATIONS) {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            db,
            conn,
            turso_url,
            turso_auth_token,
        })
    }

    /// Returns the zero record when `id` was never written or has expired.
    pub async fn get_record(&self, id: &ClipboardId, now: i64) -> Result<ClipboardRecord, StoreError> {
        let query = "SELECT content, timestamp FROM clipboards WHERE key = ? AND expires_at > ?";
        let mut rows = self.conn.query(query, libsql::params![id.store_key(), now]).await?;

        match rows.next().await? {
            Some(row) => Ok(ClipboardRecord {
                content: row.get::<String>(0)?,
                timestamp: row.get::<i64>(1)?,
            }),
            None => Ok(ClipboardRecord::default()),
        }
    }

    pub async fn set_record(
        &self,
        id: &ClipboardId,
        content: &str,
        now: i64,
        retention_millis: i64,
    ) -> Result<ClipboardRecord, StoreError> {
        let query = r#"
            INSERT INTO clipboards (key, content, timestamp, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content = excluded.content,
                timestamp = excluded.timestamp,
                expires_at = excluded.expires_at
        "#;
        let expires_at = now.saturating_add(retention_millis);
        self.conn
            .execute(query, libsql::params![id.store_key(), content, now, expires_at])
            .await?;

        Ok(ClipboardRecord::new(content, now))
    }

    pub async fn purge_expired(&self, now: i64) -> Result<u64, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM clipboards WHERE expires_at <= ?", libsql::params![now])
            .await?;
        Ok(removed)
    }
}
