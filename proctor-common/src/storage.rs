//! Object store abstraction
//!
//! The pipeline moves files in and out of a bucket through this trait so the
//! stages can be wired to test doubles or alternate backends. Keys are
//! forward-slash paths relative to the bucket root; a "folder" is just a key
//! prefix ending in `/`. Operations are fallible and individually retryable;
//! there is no transaction across multiple files.

use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All object keys under `prefix`, in lexical order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Fetch one object to a local file, creating parent directories
    async fn download(&self, remote: &str, local: &Path) -> Result<()>;

    /// Store a local file under the given key, creating parent directories
    async fn upload(&self, local: &Path, remote: &str) -> Result<()>;

    /// Delete every object under `prefix`; returns the number removed
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Bucket rooted at a local directory (the deployment mounts the real
/// bucket; tests point it at a tempdir).
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key to an on-disk path, rejecting traversal components.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let trimmed = key.trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("empty object key".to_string()));
        }
        let mut path = self.root.clone();
        for part in trimmed.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(Error::InvalidInput(format!("invalid object key: {}", key)));
            }
            path.push(part);
        }
        Ok(path)
    }

    /// Recursively collect keys under a directory.
    async fn collect_keys(&self, dir: PathBuf) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![dir];

        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix)?;
        self.collect_keys(dir).await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let source = self.resolve(remote)?;
        if !source.is_file() {
            return Err(Error::NotFound(format!("object not found: {}", remote)));
        }
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, local)
            .await
            .map_err(|e| Error::Storage(format!("download {} failed: {}", remote, e)))?;
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let dest = self.resolve(remote)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &dest)
            .await
            .map_err(|e| Error::Storage(format!("upload to {} failed: {}", remote, e)))?;
        tracing::debug!(key = remote, "Object uploaded");
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let dir = self.resolve(prefix)?;
        let count = self.collect_keys(dir.clone()).await?.len() as u64;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(prefix, count, "Prefix deleted");
        Ok(count)
    }
}

/// File name portion of an object key.
pub fn key_file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
