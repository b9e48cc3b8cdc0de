//! Statement file storage
//!
//! Files live under `{userId}/{accountId}/{timestamp}-{fileName}`. The first
//! key segment names the owner, and only the owner may read a key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use crate::error::{Error, Result};

/// Keyed blob storage for uploaded statements
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Fails with `Error::NotFound` when the key does not exist
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Reduce a client file name to a safe single path segment
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "statement".to_string()
    } else {
        cleaned.to_string()
    }
}

fn check_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\', '\0'])
    {
        return Err(Error::Storage(format!("invalid key segment: {:?}", segment)));
    }
    Ok(())
}

/// Reject keys that could escape the storage root
pub fn validate_key(key: &str) -> Result<()> {
    if key.starts_with('/') {
        return Err(Error::Storage(format!("absolute key: {}", key)));
    }
    for segment in key.split('/') {
        check_segment(segment)?;
    }
    Ok(())
}

/// Storage key for a new upload
pub fn object_key(
    user_id: &str,
    account_id: i64,
    file_name: &str,
    uploaded_at: DateTime<Utc>,
) -> Result<String> {
    check_segment(user_id)?;
    Ok(format!(
        "{}/{}/{}-{}",
        user_id,
        account_id,
        uploaded_at.timestamp_millis(),
        sanitize_file_name(file_name)
    ))
}

/// Owner segment of a key
pub fn key_owner(key: &str) -> Option<&str> {
    key.split('/').next().filter(|s| !s.is_empty())
}

/// Allow access only to keys under the caller's own prefix
pub fn authorize_key(key: &str, user_id: &str) -> Result<()> {
    validate_key(key)?;
    match key_owner(key) {
        Some(owner) if owner == user_id => Ok(()),
        _ => Err(Error::Forbidden(format!("{} may not access {}", user_id, key))),
    }
}

/// Object store on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(path).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
