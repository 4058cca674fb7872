//! Keyed storage backends.
//!
//! Login state is small but durable: one active session record and one
//! salt per account subject. Both live behind the [`KeyValueStore`] trait
//! so tests run against an in-memory map while deployments point at a
//! state directory on disk.
//!
//! `put_if_absent` is the load-bearing operation: account salts must be
//! written exactly once and never overwritten, because the salt decides
//! which on-chain address a subject resolves to.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::types::{Result, TurnstileError};

// =============================================================================
// Trait
// =============================================================================

/// Minimal keyed byte store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Store `value` only if `key` is vacant.
    ///
    /// Returns the value that ended up stored: the existing one when the
    /// key was already occupied, otherwise `value`. Atomic with respect to
    /// concurrent calls on the same store.
    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<Vec<u8>>;

    /// Remove `key`. Removing a vacant key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Map-backed store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<Vec<u8>> {
        let entry = self.entries.entry(key.to_string()).or_insert(value);
        Ok(entry.value().clone())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// File Store
// =============================================================================

/// One-file-per-key store rooted at a state directory.
///
/// Writes go through a temp file plus rename so a crash mid-write never
/// leaves a torn value behind.
pub struct FileStore {
    root: PathBuf,
    // Serializes check-then-write in put_if_absent.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            TurnstileError::Store(format!(
                "Failed to create state directory {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Map a key to a file name that is readable but collision-free.
    ///
    /// Keys may contain separators like `/`, so the sanitized prefix is
    /// paired with a short digest of the exact key.
    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.root.join(format!("{sanitized}-{}.bin", &digest[..8]))
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TurnstileError::Store(format!("Failed to read {key}: {e}"))),
        }
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp = self
            .root
            .join(format!(".tmp-{}", uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| TurnstileError::Store(format!("Failed to write {key}: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| TurnstileError::Store(format!("Failed to commit {key}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(key, &value).await
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<Vec<u8>> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read(key).await? {
            return Ok(existing);
        }
        self.write(key, &value).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TurnstileError::Store(format!(
                "Failed to delete {key}: {e}"
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("turnstile-store-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let store = MemoryStore::new();

        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", b"one".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));

        store.set("a", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_put_if_absent_keeps_first_value() {
        let store = MemoryStore::new();

        let first = store.put_if_absent("salt/alice", b"1".to_vec()).await.unwrap();
        let second = store.put_if_absent("salt/alice", b"2".to_vec()).await.unwrap();

        assert_eq!(first, b"1".to_vec());
        assert_eq!(second, b"1".to_vec());
        assert_eq!(store.get("salt/alice").await.unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_memory_delete_missing_key_is_ok() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            store.delete("nope").await.unwrap();
        });
    }

    #[tokio::test]
    async fn test_file_roundtrip() {
        let store = FileStore::new(temp_root()).unwrap();

        assert_eq!(store.get("login/session").await.unwrap(), None);
        store.set("login/session", b"record".to_vec()).await.unwrap();
        assert_eq!(
            store.get("login/session").await.unwrap(),
            Some(b"record".to_vec())
        );

        store.delete("login/session").await.unwrap();
        assert_eq!(store.get("login/session").await.unwrap(), None);
        store.delete("login/session").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_put_if_absent_keeps_first_value() {
        let store = FileStore::new(temp_root()).unwrap();

        let first = store.put_if_absent("salt/bob", b"77".to_vec()).await.unwrap();
        let second = store.put_if_absent("salt/bob", b"88".to_vec()).await.unwrap();

        assert_eq!(first, b"77".to_vec());
        assert_eq!(second, b"77".to_vec());
    }

    #[tokio::test]
    async fn test_file_keys_with_separators_do_not_collide() {
        let store = FileStore::new(temp_root()).unwrap();

        store.set("salt/a_b", b"x".to_vec()).await.unwrap();
        store.set("salt_a/b", b"y".to_vec()).await.unwrap();

        assert_eq!(store.get("salt/a_b").await.unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.get("salt_a/b").await.unwrap(), Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let root = temp_root();
        {
            let store = FileStore::new(&root).unwrap();
            store.set("salt/carol", b"314".to_vec()).await.unwrap();
        }

        let reopened = FileStore::new(&root).unwrap();
        assert_eq!(
            reopened.get("salt/carol").await.unwrap(),
            Some(b"314".to_vec())
        );
    }
}
