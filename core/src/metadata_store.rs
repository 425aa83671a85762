//! Metadata store: filename-keyed artifact metadata backed by SQLite.
//!
//! A single connection guarded by a mutex serves both the event loop and
//! worker callbacks — one writer active at a time.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value as Json;

use crate::error::{DispatchError, Result};

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Json,
}

impl MetadataStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DispatchError::Persistence(e.to_string()))?;
        }
        let conn = Connection::open(db_path).map_err(|e| DispatchError::Persistence(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT UNIQUE NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                metadata TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_created ON images(created_at DESC);",
        )
        .map_err(|e| DispatchError::Persistence(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| DispatchError::Persistence(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT UNIQUE NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                metadata TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_created ON images(created_at DESC);",
        )
        .map_err(|e| DispatchError::Persistence(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// INSERT OR REPLACE semantics: re-saving an existing filename overwrites
    /// metadata without changing the row's identity.
    pub fn save(&self, filename: &str, metadata: &Json) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let metadata_json =
            serde_json::to_string(metadata).map_err(|e| DispatchError::Persistence(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO images (filename, created_at, metadata) VALUES (?1, ?2, ?3)",
            rusqlite::params![filename, now, metadata_json],
        )
        .map_err(|e| DispatchError::Persistence(e.to_string()))?;
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Result<Option<Json>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT metadata FROM images WHERE filename = ?1")
            .map_err(|e| DispatchError::Persistence(e.to_string()))?;
        let mut rows = stmt
            .query(rusqlite::params![filename])
            .map_err(|e| DispatchError::Persistence(e.to_string()))?;
        if let Some(row) = rows.next().map_err(|e| DispatchError::Persistence(e.to_string()))? {
            let raw: Option<String> = row.get(0).map_err(|e| DispatchError::Persistence(e.to_string()))?;
            return raw
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| DispatchError::Persistence(e.to_string()));
        }
        Ok(None)
    }

    pub fn list(&self, limit: i64, offset: i64) -> Result<Vec<ArtifactRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT filename, created_at, metadata FROM images
                 ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            )
            .map_err(|e| DispatchError::Persistence(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![limit, offset], |row| {
                let filename: String = row.get(0)?;
                let created_at: String = row.get(1)?;
                let metadata: Option<String> = row.get(2)?;
                Ok((filename, created_at, metadata))
            })
            .map_err(|e| DispatchError::Persistence(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (filename, created_at, metadata) =
                row.map_err(|e| DispatchError::Persistence(e.to_string()))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let metadata = metadata
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| DispatchError::Persistence(e.to_string()))?
                .unwrap_or(Json::Null);
            out.push(ArtifactRecord { filename, created_at, metadata });
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))
            .map_err(|e| DispatchError::Persistence(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_then_get_round_trips() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.save("a.png", &json!({"prompt": "a cat", "seed": 42})).unwrap();
        let got = store.get("a.png").unwrap().unwrap();
        assert_eq!(got["prompt"], "a cat");
        assert_eq!(got["seed"], 42);
    }

    #[test]
    fn save_overwrites_without_changing_identity() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.save("a.png", &json!({"v": 1})).unwrap();
        store.save("a.png", &json!({"v": 2})).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("a.png").unwrap().unwrap()["v"], 2);
    }

    #[test]
    fn list_orders_by_created_at_desc() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.save("first.png", &json!({})).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save("second.png", &json!({})).unwrap();
        let listed = store.list(10, 0).unwrap();
        assert_eq!(listed[0].filename, "second.png");
        assert_eq!(listed[1].filename, "first.png");
    }

    #[test]
    fn missing_filename_returns_none() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert!(store.get("missing.png").unwrap().is_none());
    }
}
