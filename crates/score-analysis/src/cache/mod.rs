//! Result caching for analyses.
//!
//! Results are stored as JSON values under a [`CacheKey`]. A failing cache
//! never fails an analysis: lookup and store errors are logged and the
//! computation proceeds uncached.

pub mod key;
pub mod sqlite;

pub use key::CacheKey;
pub use sqlite::SqliteCache;

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Storage for analysis results keyed by [`CacheKey`] strings.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn put(&self, key: &str, value: &Value) -> Result<()>;
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ResultCache for NoCache {
    fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: &Value) -> Result<()> {
        Ok(())
    }
}

/// Return the cached result for `key`, or run `compute` and cache its output.
///
/// Errors from `compute` propagate and nothing is cached for them.
pub fn memoize<T, E, F>(cache: &dyn ResultCache, key: &CacheKey, compute: F) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T, E>,
{
    match cache.get(key.as_str()) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(hit) => {
                info!(key = %key, "cache hit");
                return Ok(hit);
            }
            Err(e) => warn!(key = %key, error = %e, "discarding undecodable cache entry"),
        },
        Ok(None) => {}
        Err(e) => warn!(key = %key, error = %e, "cache lookup failed"),
    }

    info!(key = %key, "cache miss, computing");
    let result = compute()?;

    match serde_json::to_value(&result) {
        Ok(value) => {
            if let Err(e) = cache.put(key.as_str(), &value) {
                warn!(key = %key, error = %e, "failed to store result in cache");
            }
        }
        Err(e) => warn!(key = %key, error = %e, "result not cacheable"),
    }

    Ok(result)
}
