//! Stable per-installation identity

use std::sync::Arc;

use log::warn;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::StorageBackend;

pub(crate) const DEVICE_ID_KEY: &str = "device_id";

/// Resolves the stable identifier for this installation.
///
/// The identifier namespaces stored credentials and tells the backend which
/// physical session is acting. Resolution never fails: if persisting the
/// generated value goes wrong, the failure is logged and the value is kept
/// for the life of the process.
pub struct DeviceIdentity {
    storage: Arc<dyn StorageBackend>,
    cached: Mutex<Option<String>>,
}

impl DeviceIdentity {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            cached: Mutex::new(None),
        }
    }

    /// Idempotent after the first call; generates and persists an identifier
    /// on first use.
    pub async fn get_or_create(&self) -> String {
        let mut cached = self.cached.lock().await;
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        let id = match self.storage.get(DEVICE_ID_KEY).await {
            Ok(Some(existing)) if !existing.is_empty() => existing,
            Ok(_) => {
                let generated = Uuid::new_v4().to_string();
                if let Err(e) = self.storage.set(DEVICE_ID_KEY, &generated).await {
                    warn!("Failed to persist device id: {e}");
                }
                generated
            }
            Err(e) => {
                warn!("Failed to read device id, generating an ephemeral one: {e}");
                Uuid::new_v4().to_string()
            }
        };

        *cached = Some(id.clone());
        id
    }

    /// Forget this device: drop the persisted identifier. The next
    /// resolution generates a fresh one.
    pub async fn forget(&self) -> Result<()> {
        self.cached.lock().await.take();
        self.storage.remove_many(&[DEVICE_ID_KEY]).await
    }
}
