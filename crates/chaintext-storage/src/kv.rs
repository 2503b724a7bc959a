//! Key-value persistence backends.
//!
//! The chain store writes through a minimal [`KeyValueStore`]
//! (`get` / `put` / `keys`). Two backends ship: [`MemoryStore`] for
//! tests and ephemeral nodes, and [`SledStore`] for the daemon.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chaintext_types::{ChaintextError, Result};

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// Durable string-keyed byte storage.
///
/// Implementations must return keys from [`keys`](Self::keys) in
/// ascending byte order.
pub trait KeyValueStore: Send + Sync {
    /// Fetches the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Lists every key starting with `prefix`, ascending.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Forces buffered writes to durable storage.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`KeyValueStore`]. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries.lock().map_err(|_| ChaintextError::StorageError {
            reason: "memory store lock poisoned".into(),
        })
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock()?.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// Name of the sled tree holding chain rows.
const CHAIN_TREE: &str = "chain";

/// sled-backed [`KeyValueStore`].
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::StorageError`] if the database or its
    /// tree cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| ChaintextError::StorageError {
            reason: format!("failed to open sled database: {e}"),
        })?;
        let tree = db.open_tree(CHAIN_TREE).map_err(|e| ChaintextError::StorageError {
            reason: format!("failed to open tree '{CHAIN_TREE}': {e}"),
        })?;
        Ok(Self { db, tree })
    }

    /// Flushes all pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::StorageError`] if the flush fails.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| ChaintextError::StorageError {
            reason: format!("failed to flush database: {e}"),
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("entries", &self.tree.len())
            .finish()
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let raw = self.tree.get(key.as_bytes()).map_err(|e| ChaintextError::StorageError {
            reason: format!("sled get failed: {e}"),
        })?;
        Ok(raw.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.tree
            .insert(key.as_bytes(), value)
            .map_err(|e| ChaintextError::StorageError {
                reason: format!("sled insert failed: {e}"),
            })?;
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(|e| ChaintextError::StorageError {
                reason: format!("sled scan_prefix failed: {e}"),
            })?;
            let key = String::from_utf8(key.to_vec()).map_err(|e| ChaintextError::StorageError {
                reason: format!("non-UTF-8 key in chain tree: {e}"),
            })?;
            keys.push(key);
        }
        Ok(keys)
    }

    fn flush(&self) -> Result<()> {
        SledStore::flush(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_put_get() -> Result<()> {
        let store = MemoryStore::new();
        assert!(store.get("a")?.is_none());
        store.put("a", b"1")?;
        store.put("a", b"2")?;
        assert_eq!(store.get("a")?, Some(b"2".to_vec()));
        Ok(())
    }

    #[test]
    fn memory_store_keys_by_prefix_sorted() -> Result<()> {
        let store = MemoryStore::new();
        store.put("chain/lobby/0000000000000001", b"b")?;
        store.put("chain/lobby/0000000000000000", b"a")?;
        store.put("chain/dev/0000000000000000", b"c")?;
        store.put("chain/lobbyx/0000000000000000", b"d")?;

        let keys = store.keys("chain/lobby/")?;
        assert_eq!(
            keys,
            vec![
                "chain/lobby/0000000000000000".to_string(),
                "chain/lobby/0000000000000001".to_string(),
            ]
        );
        Ok(())
    }
}
