//! Clipboard store accessor.
//!
//! [`FallbackStore`] is the handle the service passes around through its
//! state. When a database is configured every operation goes there first; if
//! the database fails the operation is served from an in-process
//! [`MemoryStore`] so the API keeps working without persistence guarantees.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::db::Database;
use crate::error::StoreError;
use crate::model::{ClipboardId, ClipboardRecord, now_millis};

#[derive(Debug, Clone)]
struct Entry {
    record: ClipboardRecord,
    expires_at: i64,
}

/// Ephemeral store with the same expiry semantics as the database table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &ClipboardId, now: i64) -> ClipboardRecord {
        let entries = self.entries.read().await;
        match entries.get(&id.store_key()) {
            Some(entry) if entry.expires_at > now => entry.record.clone(),
            _ => ClipboardRecord::default(),
        }
    }

    pub async fn set(&self, id: &ClipboardId, content: &str, now: i64, retention_millis: i64) -> ClipboardRecord {
        let record = ClipboardRecord::new(content, now);
        let entry = Entry {
            record: record.clone(),
            expires_at: now.saturating_add(retention_millis),
        };
        self.entries.write().await.insert(id.store_key(), entry);
        record
    }

    pub async fn purge_expired(&self, now: i64) -> u64 {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        (before - entries.len()) as u64
    }
}

pub struct FallbackStore {
    db: Option<Arc<Database>>,
    memory: MemoryStore,
    retention_millis: i64,
}

impl FallbackStore {
    pub fn new(db: Option<Arc<Database>>, retention_millis: i64) -> Self {
        if db.is_none() {
            tracing::warn!("no database configured, clipboard contents will not survive a restart");
        }
        FallbackStore {
            db,
            memory: MemoryStore::new(),
            retention_millis,
        }
    }

    pub fn memory_only(retention_millis: i64) -> Self {
        FallbackStore {
            db: None,
            memory: MemoryStore::new(),
            retention_millis,
        }
    }

    pub fn database(&self) -> Option<&Arc<Database>> {
        self.db.as_ref()
    }

    /// Writes made while the database was down live only in memory, so
    /// both backends are consulted and the newer record wins.
    pub async fn get(&self, id: &ClipboardId) -> Result<ClipboardRecord, StoreError> {
        let now = now_millis();
        let from_memory = self.memory.get(id, now).await;
        let Some(db) = &self.db else {
            return Ok(from_memory);
        };

        match db.get_record(id, now).await {
            Ok(from_db) if from_db.timestamp >= from_memory.timestamp => Ok(from_db),
            Ok(_) => {
                tracing::debug!(id = %id, "memory store holds a write newer than the database");
                Ok(from_memory)
            }
            Err(e) => {
                tracing::warn!(error = %e, id = %id, "database unavailable, reading from memory store");
                Ok(from_memory)
            }
        }
    }

    pub async fn set(&self, id: &ClipboardId, content: &str) -> Result<ClipboardRecord, StoreError> {
        let now = now_millis();
        if let Some(db) = &self.db {
            match db.set_record(id, content, now, self.retention_millis).await {
                Ok(record) => return Ok(record),
                Err(e) => {
                    tracing::warn!(error = %e, id = %id, "database unavailable, writing to memory store");
                }
            }
        }
        Ok(self.memory.set(id, content, now, self.retention_millis).await)
    }

    /// Drops expired records from every backend, returning how many went.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = now_millis();
        let mut removed = self.memory.purge_expired(now).await;
        if let Some(db) = &self.db {
            removed += db.purge_expired(now).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEEK_MS: i64 = 7 * 24 * 60 * 60 * 1000;

    #[tokio::test]
    async fn test_round_trip() {
        let store = FallbackStore::memory_only(WEEK_MS);
        let id = ClipboardId::from("t1");

        store.set(&id, "hello").await.unwrap();
        let record = store.get(&id).await.unwrap();

        assert_eq!(record.content, "hello");
        assert!(record.timestamp > 0);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = FallbackStore::memory_only(WEEK_MS);
        let id = ClipboardId::from("shared");

        let first = store.set(&id, "one").await.unwrap();
        store.set(&id, "two").await.unwrap();
        let record = store.get(&id).await.unwrap();

        assert_eq!(record.content, "two");
        assert!(record.timestamp >= first.timestamp);
    }

    #[tokio::test]
    async fn test_ids_are_isolated() {
        let store = FallbackStore::memory_only(WEEK_MS);
        store.set(&ClipboardId::from("A"), "only for a").await.unwrap();

        let b = store.get(&ClipboardId::from("B")).await.unwrap();
        assert_eq!(b, ClipboardRecord::default());
    }

    #[tokio::test]
    async fn test_memory_expiry() {
        let memory = MemoryStore::new();
        let id = ClipboardId::from("x");
        memory.set(&id, "brief", 1_000, 100).await;

        assert_eq!(memory.get(&id, 1_050).await.content, "brief");
        assert!(memory.get(&id, 1_100).await.is_empty());
        assert_eq!(memory.purge_expired(1_100).await, 1);
    }

    #[tokio::test]
    async fn test_database_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_local(&dir.path().join("clips.db")).await.unwrap();
        let store = FallbackStore::new(Some(Arc::new(db)), WEEK_MS);
        let id = ClipboardId::from("persisted");

        store.set(&id, "on disk").await.unwrap();

        let db = store.database().unwrap();
        let record = db.get_record(&id, now_millis()).await.unwrap();
        assert_eq!(record.content, "on disk");
        assert!(store.memory.get(&id, now_millis()).await.is_empty());
    }

    #[tokio::test]
    async fn test_write_during_outage_survives_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_local(&dir.path().join("clips.db")).await.unwrap();
        let store = FallbackStore::new(Some(Arc::new(db)), WEEK_MS);
        let id = ClipboardId::from("flaky");
        let db = store.database().unwrap().clone();

        store.set(&id, "one").await.unwrap();
        db.connection().execute("ALTER TABLE clipboards RENAME TO clipboards_off", ()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.set(&id, "two").await.unwrap();
        db.connection().execute("ALTER TABLE clipboards_off RENAME TO clipboards", ()).await.unwrap();

        let record = store.get(&id).await.unwrap();
        assert_eq!(record, second);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.set(&id, "three").await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().content, "three");
    }

    #[tokio::test]
    async fn test_broken_database_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_local(&dir.path().join("clips.db")).await.unwrap();
        db.connection().execute("DROP TABLE clipboards", ()).await.unwrap();

        let store = FallbackStore::new(Some(Arc::new(db)), WEEK_MS);
        let id = ClipboardId::from("degraded");

        store.set(&id, "kept in memory").await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().content, "kept in memory");
    }
}
