//! Key-value storage backends for persisted session state

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::Result;

/// Document file holding all persisted session keys
const STORE_FILE: &str = "session_store.json";

/// Default directory for persisted session state.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("learner-app")
}

/// Persistent string key-value storage.
///
/// `set_many` and `remove_many` apply all entries in a single backend
/// operation; credential records are replaced through them so a reader can
/// never observe an access token and a refresh token of different origin.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;

    async fn remove_many(&self, keys: &[&str]) -> Result<()>;

    /// Drop every stored key.
    async fn wipe(&self) -> Result<()>;
}

/// File-backed storage: a single JSON object document in the data directory.
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles on the document.
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            path: data_dir.as_ref().join(STORE_FILE),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    async fn save(&self, document: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(document)?;
        fs::write(&self.path, contents).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)]).await
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        for (key, value) in entries {
            document.insert((*key).to_string(), (*value).to_string());
        }
        self.save(&document).await
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        for key in keys {
            document.remove(*key);
        }
        self.save(&document).await
    }

    async fn wipe(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        if self.path.exists() {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }
}

/// In-memory storage for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    document: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.document.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.document
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut document = self.document.lock().await;
        for (key, value) in entries {
            document.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut document = self.document.lock().await;
        for key in keys {
            document.remove(*key);
        }
        Ok(())
    }

    async fn wipe(&self) -> Result<()> {
        self.document.lock().await.clear();
        Ok(())
    }
}
