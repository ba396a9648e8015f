// ============================================================================
// Local Storage — Embedded key-value store (redb)
// ============================================================================
// Whole collections are stored as JSON documents under a string key and
// rewritten on every mutation. Collections stay small (projects, in-flight
// jobs), so read-modify-write of the full value is fine.
// Default path: ~/.narrio/narrio.redb (override via NARRIO_DB_PATH env var)
// ============================================================================

mod projects;
mod registry;

pub use projects::{ProjectStats, ProjectStore};
pub use registry::JobRegistry;

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

const COLLECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("collections");

/// Durable byte store addressed by key
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn save(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Returns whether a value was present
    fn remove(&self, key: &str) -> Result<bool>;
}

/// Load a JSON collection; a missing key is an empty collection
pub fn load_collection<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Vec<T>> {
    match store.load(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| anyhow!("Failed to deserialize collection '{}': {}", key, e)),
        None => Ok(Vec::new()),
    }
}

/// Replace a JSON collection
pub fn save_collection<T: Serialize>(store: &dyn KeyValueStore, key: &str, items: &[T]) -> Result<()> {
    let bytes = serde_json::to_vec(items)
        .map_err(|e| anyhow!("Failed to serialize collection '{}': {}", key, e))?;
    store.save(key, &bytes)
}

// ============================================================================
// redb-backed store
// ============================================================================

/// File-backed store surviving process restarts
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses NARRIO_DB_PATH env var or ~/.narrio/narrio.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("NARRIO_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let narrio_dir = home.join(".narrio");
            std::fs::create_dir_all(&narrio_dir)
                .map_err(|e| anyhow!("Failed to create .narrio directory: {}", e))?;
            narrio_dir.join("narrio.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path).map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure the table exists by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(COLLECTIONS)
                .map_err(|e| anyhow!("Failed to create collections table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for RedbStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(COLLECTIONS)
            .map_err(|e| anyhow!("Failed to open collections table: {}", e))?;

        let value = table
            .get(key)
            .map_err(|e| anyhow!("Failed to get '{}': {}", key, e))?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(COLLECTIONS)
                .map_err(|e| anyhow!("Failed to open collections table: {}", e))?;
            table
                .insert(key, value)
                .map_err(|e| anyhow!("Failed to insert '{}': {}", key, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored '{}' ({} bytes)", key, value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(COLLECTIONS)
                .map_err(|e| anyhow!("Failed to open collections table: {}", e))?;
            removed = table
                .remove(key)
                .map_err(|e| anyhow!("Failed to remove '{}': {}", key, e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            debug!("Deleted '{}'", key);
        }
        Ok(removed)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store, for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        Ok(entries.remove(key).is_some())
    }
}
