use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sayword_core::{BackendKind, CacheStore, SaywordError};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedModel {
    pub backend: String,
    pub cached_at: String,
}

/// Cached-model flags in a small SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    db_path: PathBuf,
}

impl SqliteCacheStore {
    pub fn default_db_path() -> PathBuf {
        crate::settings::default_data_dir().join("sayword.db")
    }

    pub fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, String> {
        Connection::open(&self.db_path).map_err(|e| e.to_string())
    }

    fn init_schema(&self) -> Result<(), String> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS model_cache (
              backend TEXT PRIMARY KEY,
              cached_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn cached_models(&self) -> Result<Vec<CachedModel>, String> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT backend, cached_at FROM model_cache ORDER BY backend")
            .map_err(|e| e.to_string())?;
        let mut rows = stmt.query([]).map_err(|e| e.to_string())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| e.to_string())? {
            let backend: String = row.get(0).map_err(|e| e.to_string())?;
            let cached_at: i64 = row.get(1).map_err(|e| e.to_string())?;
            let cached_at = Utc
                .timestamp_opt(cached_at, 0)
                .single()
                .unwrap_or_else(Utc::now)
                .to_rfc3339();
            out.push(CachedModel { backend, cached_at });
        }
        Ok(out)
    }

    pub fn clear(&self) -> Result<usize, String> {
        let conn = self.open()?;
        conn.execute("DELETE FROM model_cache", [])
            .map_err(|e| e.to_string())
    }
}

impl CacheStore for SqliteCacheStore {
    fn is_cached(&self, backend: BackendKind) -> sayword_core::Result<bool> {
        let conn = self.open().map_err(SaywordError::CacheStore)?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM model_cache WHERE backend = ?1",
                params![backend.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SaywordError::CacheStore(e.to_string()))?;
        Ok(found.is_some())
    }

    fn mark_cached(&self, backend: BackendKind) -> sayword_core::Result<()> {
        let conn = self.open().map_err(SaywordError::CacheStore)?;
        conn.execute(
            "INSERT OR IGNORE INTO model_cache (backend, cached_at) VALUES (?1, ?2)",
            params![backend.as_str(), Utc::now().timestamp()],
        )
        .map_err(|e| SaywordError::CacheStore(e.to_string()))?;
        Ok(())
    }
}
