use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::Value;

use super::ResultCache;

/// SQLite-backed analysis result cache.
///
/// Rows are keyed by `(cache_key, version)`; opening with a newer version
/// makes older rows invisible so results are recomputed.
pub struct SqliteCache {
    connection: Mutex<Connection>,
    version: u32,
}

impl SqliteCache {
    pub fn open(db_path: &Path, version: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cache directory {}", parent.display()))?;
        }

        let connection = Connection::open(db_path).context("opening analysis cache db")?;
        Self::init(connection, version)
    }

    /// A private cache that lives as long as this value.
    pub fn in_memory(version: u32) -> Result<Self> {
        let connection = Connection::open_in_memory().context("opening in-memory cache db")?;
        Self::init(connection, version)
    }

    fn init(connection: Connection, version: u32) -> Result<Self> {
        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS results (
                    cache_key   TEXT NOT NULL,
                    version     INTEGER NOT NULL,
                    created_at  TEXT NOT NULL,
                    result_json TEXT NOT NULL,
                    PRIMARY KEY (cache_key, version)
                );",
            )
            .context("creating cache table")?;

        Ok(Self {
            connection: Mutex::new(connection),
            version,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Drop rows written by other versions; returns how many went.
    pub fn prune_stale(&self) -> Result<usize> {
        let conn = self
            .connection
            .lock()
            .map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;

        let removed = conn
            .execute("DELETE FROM results WHERE version != ?1", [self.version])
            .context("pruning stale cache rows")?;
        Ok(removed)
    }
}

impl ResultCache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self
            .connection
            .lock()
            .map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;

        let mut stmt = conn.prepare_cached(
            "SELECT result_json FROM results WHERE cache_key = ?1 AND version = ?2",
        )?;

        let result = stmt.query_row(rusqlite::params![key, self.version], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        });

        match result {
            Ok(json) => {
                let value = serde_json::from_str(&json).context("deserializing cached result")?;
                Ok(Some(value))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("querying analysis cache"),
        }
    }

    fn put(&self, key: &str, value: &Value) -> Result<()> {
        let json = serde_json::to_string(value).context("serializing result for cache")?;
        let now = chrono::Utc::now().to_rfc3339();

        let conn = self
            .connection
            .lock()
            .map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;

        conn.execute(
            "INSERT OR REPLACE INTO results (cache_key, version, created_at, result_json)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![key, self.version, now, json],
        )?;

        Ok(())
    }
}
