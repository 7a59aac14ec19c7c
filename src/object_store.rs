//! Object Store Gateway: put/get/delete opaque byte blobs keyed by path.
//!
//! Backed by the local filesystem rooted at a configured directory, the way
//! the teacher's `SqliteMemoryStore` roots its database file under a
//! configured directory and creates it on demand.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Abstracts over blob storage so the publish pipeline does not depend on a
/// concrete backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed object store rooted at `root_dir`.
pub struct FsObjectStore {
    root_dir: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }
        fs::write(&path, bytes).await.map_err(Error::Io)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key);
        fs::read(&path).await.map_err(Error::Io)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Storage key convention: `raw/<title>_<first-4-hex-of-fingerprint>.<ext>`.
pub fn storage_key(title: &str, file_hash: u64, extension: &str) -> String {
    let hex = format!("{file_hash:016x}");
    let short = &hex[..4];
    format!("raw/{title}_{short}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_convention() {
        let key = storage_key("battery-spec", 0x1234abcd_00000000, "txt");
        assert_eq!(key, "raw/battery-spec_1234.txt");
    }

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("raw/doc_ab12.txt", b"hello").await.unwrap();
        let bytes = store.get("raw/doc_ab12.txt").await.unwrap();
        assert_eq!(bytes, b"hello");

        store.delete("raw/doc_ab12.txt").await.unwrap();
        assert!(store.get("raw/doc_ab12.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.delete("raw/never-existed.txt").await.is_ok());
    }

    /// Exercises the trait boundary itself (not the filesystem backend)
    /// with a mocked expectation, the way a caller that only depends on
    /// `dyn ObjectStore` should be testable without touching disk.
    #[tokio::test]
    async fn test_mocked_object_store_satisfies_trait_boundary() {
        let mut mock = MockObjectStore::new();
        mock.expect_put()
            .withf(|key: &str, bytes: &[u8]| key == "raw/doc_ab12.txt" && bytes == b"hello")
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_get()
            .withf(|key: &str| key == "raw/doc_ab12.txt")
            .times(1)
            .returning(|_| Ok(b"hello".to_vec()));

        let store: &dyn ObjectStore = &mock;
        store.put("raw/doc_ab12.txt", b"hello").await.unwrap();
        let bytes = store.get("raw/doc_ab12.txt").await.unwrap();
        assert_eq!(bytes, b"hello");
    }
}
