use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};

use crate::db::Database;

/// Durable string key/value storage used as a local cache.
///
/// Not assumed transactional across calls. Implementations must be usable from
/// any thread; the queue calls them between awaits.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn multi_remove(&self, keys: &[&str]) -> Result<()>;
}

/// SQLite-backed key/value store shared by the queue and the plan service.
pub struct LocalStore {
    db: Mutex<Database>,
}

impl LocalStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| anyhow!("Local database lock poisoned"))
    }
}

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.lock()?.kv_get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.kv_set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.kv_remove(key)?;
        Ok(())
    }

    fn multi_remove(&self, keys: &[&str]) -> Result<()> {
        self.lock()?.kv_remove_many(keys)?;
        Ok(())
    }
}
