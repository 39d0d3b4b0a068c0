//! Registration store
//!
//! A registration binds an access token to the S3 endpoint and credentials
//! supplied at sign-in. Stores are keyed by the token; the last write wins.

use crate::s3::{Credentials, S3ClientConfig};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Sub-directory of the datastore holding one file per token
const REGISTRATION_DIR: &str = "registration";

/// Registration store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt registration: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// S3 endpoint and credentials bound to one access token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub host: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub access_key_secret: String,
    #[serde(default)]
    pub root_id: String,
}

impl Registration {
    /// All connection fields present
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty()
            && !self.region.is_empty()
            && !self.bucket.is_empty()
            && !self.access_key.is_empty()
            && !self.access_key_secret.is_empty()
    }

    pub fn client_config(&self) -> S3ClientConfig {
        S3ClientConfig {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            host: self.host.clone(),
            credentials: Credentials::new(&self.access_key, &self.access_key_secret),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("host", &self.host)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("access_key_secret", &"<redacted>")
            .field("root_id", &self.root_id)
            .finish()
    }
}

/// Token-keyed registration storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn get(&self, token: &str) -> Result<Option<Registration>, StoreError>;

    /// Store a registration, replacing any previous one for the token
    async fn put(&self, token: &str, registration: &Registration) -> Result<bool, StoreError>;

    /// Remove a registration; a missing token is not an error
    async fn delete(&self, token: &str) -> Result<(), StoreError>;
}

/// Tokens become file names, so only plain identifiers are accepted
fn check_token(token: &str) -> Result<(), StoreError> {
    if token.is_empty()
        || !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StoreError::InvalidToken);
    }
    Ok(())
}

/// One JSON file per token under `<path>/registration/`
#[derive(Debug, Clone)]
pub struct FileRegistrationStore {
    dir: PathBuf,
}

impl FileRegistrationStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            dir: path.as_ref().join(REGISTRATION_DIR),
        }
    }

    fn file_path(&self, token: &str) -> Result<PathBuf, StoreError> {
        check_token(token)?;
        Ok(self.dir.join(token))
    }
}

#[async_trait]
impl RegistrationStore for FileRegistrationStore {
    async fn get(&self, token: &str) -> Result<Option<Registration>, StoreError> {
        let path = self.file_path(token)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, token: &str, registration: &Registration) -> Result<bool, StoreError> {
        let path = self.file_path(token)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let temp_path = self
            .dir
            .join(format!("{}~{}", token, uuid::Uuid::new_v4().simple()));
        let data = serde_json::to_vec_pretty(registration)?;
        tokio::fs::write(&temp_path, data).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(bucket = %registration.bucket, "Registration stored");
        Ok(true)
    }

    async fn delete(&self, token: &str) -> Result<(), StoreError> {
        let path = self.file_path(token)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryRegistrationStore {
    entries: RwLock<HashMap<String, Registration>>,
}

impl MemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl RegistrationStore for MemoryRegistrationStore {
    async fn get(&self, token: &str) -> Result<Option<Registration>, StoreError> {
        Ok(self.entries.read().get(token).cloned())
    }

    async fn put(&self, token: &str, registration: &Registration) -> Result<bool, StoreError> {
        check_token(token)?;
        self.entries
            .write()
            .insert(token.to_string(), registration.clone());
        Ok(true)
    }

    async fn delete(&self, token: &str) -> Result<(), StoreError> {
        self.entries.write().remove(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        Registration {
            host: "s3.amazonaws.com".into(),
            region: "us-east-1".into(),
            bucket: "photos".into(),
            access_key: "AKIDEXAMPLE".into(),
            access_key_secret: "secret".into(),
            root_id: String::new(),
        }
    }

    #[test]
    fn test_completeness() {
        let mut reg = registration();
        assert!(reg.is_complete());
        reg.bucket.clear();
        assert!(!reg.is_complete());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let output = format!("{:?}", registration());
        assert!(output.contains("AKIDEXAMPLE"));
        assert!(!output.contains("\"secret\""));
    }

    #[test]
    fn test_client_config() {
        let config = registration().client_config();
        assert_eq!(config.bucket, "photos");
        assert_eq!(config.credentials.access_key_id(), "AKIDEXAMPLE");
    }

    #[test]
    fn test_token_check() {
        assert!(check_token("0123abcdef").is_ok());
        assert!(check_token("").is_err());
        assert!(check_token("../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRegistrationStore::new(dir.path());

        assert!(store.get("abc123").await.unwrap().is_none());
        assert!(store.put("abc123", &registration()).await.unwrap());
        assert_eq!(store.get("abc123").await.unwrap(), Some(registration()));
        assert!(dir.path().join("registration").join("abc123").exists());

        store.delete("abc123").await.unwrap();
        assert!(store.get("abc123").await.unwrap().is_none());
        // Deleting again is a no-op
        store.delete("abc123").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRegistrationStore::new(dir.path());

        store.put("tok", &registration()).await.unwrap();
        let mut updated = registration();
        updated.bucket = "videos".into();
        store.put("tok", &updated).await.unwrap();

        assert_eq!(store.get("tok").await.unwrap().unwrap().bucket, "videos");
        let leftovers = std::fs::read_dir(dir.path().join("registration"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("registration")).unwrap();
        std::fs::write(dir.path().join("registration").join("bad"), b"{not json").unwrap();

        let store = FileRegistrationStore::new(dir.path());
        assert!(matches!(store.get("bad").await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryRegistrationStore::new();
        assert!(store.is_empty());
        store.put("tok", &registration()).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("tok").await.unwrap().is_some());
        store.delete("tok").await.unwrap();
        assert!(store.get("tok").await.unwrap().is_none());
    }
}
