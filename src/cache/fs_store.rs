//! Filesystem-backed cache store.
//!
//! Layout: one directory per generation under the store root. Each entry is a
//! JSON metadata sidecar (`<id>.json`) plus a raw body file (`<id>.bin`),
//! where `<id>` is the SHA-256 digest of the entry key. Writes go through a
//! temporary file and an atomic rename so readers never observe a torn entry.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tokio::fs;

use super::entry::{CacheEntry, EntryKey};
use super::store::{CacheStore, StoreError};

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    method: String,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    cached_at_unix_ms: i64,
}

/// Persistent store rooted at a directory.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Initialise the store, creating the root directory if necessary.
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn generation_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        // Generation names become directory names; reject anything that
        // could escape the root.
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(StoreError::InvalidGeneration {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(name))
    }

    fn write_atomic(dir: &Path, target: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(contents)?;
        file.persist(target).map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FsStore {
    async fn open(&self, generation: &str) -> Result<(), StoreError> {
        let dir = self.generation_dir(generation)?;
        fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn put(
        &self,
        generation: &str,
        key: &EntryKey,
        entry: CacheEntry,
    ) -> Result<(), StoreError> {
        let dir = self.generation_dir(generation)?;
        fs::create_dir_all(&dir).await?;

        let id = key.storage_id();
        let meta = EntryMeta {
            method: key.method.clone(),
            url: key.url.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            cached_at_unix_ms: (entry.cached_at.unix_timestamp_nanos() / 1_000_000) as i64,
        };
        let meta_json = serde_json::to_vec(&meta).map_err(|err| StoreError::Corrupt {
            id: id.clone(),
            reason: err.to_string(),
        })?;

        // Body first, meta last: a reader that finds the meta can rely on
        // the body being present.
        Self::write_atomic(&dir, &dir.join(format!("{id}.bin")), &entry.body)?;
        Self::write_atomic(&dir, &dir.join(format!("{id}.json")), &meta_json)?;
        Ok(())
    }

    async fn get(
        &self,
        generation: &str,
        key: &EntryKey,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let dir = self.generation_dir(generation)?;
        let id = key.storage_id();

        let meta_bytes = match fs::read(dir.join(format!("{id}.json"))).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let meta: EntryMeta =
            serde_json::from_slice(&meta_bytes).map_err(|err| StoreError::Corrupt {
                id: id.clone(),
                reason: err.to_string(),
            })?;

        let body = match fs::read(dir.join(format!("{id}.bin"))).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Corrupt {
                    id,
                    reason: "metadata present but body file missing".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let cached_at = OffsetDateTime::from_unix_timestamp_nanos(
            i128::from(meta.cached_at_unix_ms) * 1_000_000,
        )
        .map_err(|err| StoreError::Corrupt {
            id,
            reason: format!("cached_at out of range: {err}"),
        })?;

        Ok(Some(CacheEntry {
            status: meta.status,
            headers: meta.headers,
            body: Bytes::from(body),
            cached_at,
        }))
    }

    async fn list_generations(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(dirent) = entries.next_entry().await? {
            if dirent.file_type().await?.is_dir() {
                names.push(dirent.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_generation(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.generation_dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
