//! Persistent credential records, namespaced by device identity

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use crate::device::DeviceIdentity;
use crate::error::Result;
use crate::storage::StorageBackend;

/// Bump when the persisted layout changes. A mismatch at startup wipes all
/// previously stored session state before anything else runs.
pub(crate) const SCHEMA_VERSION: &str = "2";

const SCHEMA_VERSION_KEY: &str = "auth_version";
const SESSION_EXPIRED_KEY: &str = "session_expired";

const ACCESS_TOKEN_PREFIX: &str = "access_token";
const REFRESH_TOKEN_PREFIX: &str = "refresh_token";
const ISSUED_AT_PREFIX: &str = "issued_at";
const ACCOUNT_EMAIL_PREFIX: &str = "account_email";

/// One stored credential set. The access and refresh tokens are always
/// replaced together; a record with tokens of different origin cannot exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix milliseconds at which the pair was issued.
    pub issued_at: i64,
    pub account_email: String,
}

pub struct CredentialStore {
    storage: Arc<dyn StorageBackend>,
    device: Arc<DeviceIdentity>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn StorageBackend>, device: Arc<DeviceIdentity>) -> Self {
        Self { storage, device }
    }

    pub async fn device_id(&self) -> String {
        self.device.get_or_create().await
    }

    fn key(prefix: &str, device_id: &str) -> String {
        format!("{prefix}.{device_id}")
    }

    /// Replace the stored credential record.
    ///
    /// Partial credentials are never persisted: any empty argument makes
    /// this a logged no-op returning `false`. On success all record fields
    /// are written in one storage operation.
    pub async fn set_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        email: &str,
    ) -> Result<bool> {
        if access_token.is_empty() || refresh_token.is_empty() || email.is_empty() {
            warn!("Refusing to store a partial credential record");
            return Ok(false);
        }

        let device_id = self.device_id().await;
        let issued_at = Utc::now().timestamp_millis().to_string();
        self.storage
            .set_many(&[
                (&Self::key(ACCESS_TOKEN_PREFIX, &device_id), access_token),
                (&Self::key(REFRESH_TOKEN_PREFIX, &device_id), refresh_token),
                (&Self::key(ISSUED_AT_PREFIX, &device_id), &issued_at),
                (&Self::key(ACCOUNT_EMAIL_PREFIX, &device_id), email),
                (SCHEMA_VERSION_KEY, SCHEMA_VERSION),
            ])
            .await?;
        Ok(true)
    }

    /// Remove the credential record for the current device. Idempotent.
    pub async fn clear_tokens(&self) -> Result<()> {
        let device_id = self.device_id().await;
        self.storage
            .remove_many(&[
                &Self::key(ACCESS_TOKEN_PREFIX, &device_id),
                &Self::key(REFRESH_TOKEN_PREFIX, &device_id),
                &Self::key(ISSUED_AT_PREFIX, &device_id),
                &Self::key(ACCOUNT_EMAIL_PREFIX, &device_id),
            ])
            .await
    }

    /// Read the stored credential record, if a complete one exists.
    pub async fn record(&self) -> Result<Option<CredentialRecord>> {
        let device_id = self.device_id().await;
        let access_token = self
            .storage
            .get(&Self::key(ACCESS_TOKEN_PREFIX, &device_id))
            .await?;
        let refresh_token = self
            .storage
            .get(&Self::key(REFRESH_TOKEN_PREFIX, &device_id))
            .await?;
        let account_email = self
            .storage
            .get(&Self::key(ACCOUNT_EMAIL_PREFIX, &device_id))
            .await?;

        let (Some(access_token), Some(refresh_token), Some(account_email)) =
            (access_token, refresh_token, account_email)
        else {
            return Ok(None);
        };
        if access_token.is_empty() || refresh_token.is_empty() || account_email.is_empty() {
            return Ok(None);
        }

        // A missing or unreadable timestamp parses to 0, which forces an
        // immediate proactive refresh rather than trusting token age.
        let issued_at = self
            .storage
            .get(&Self::key(ISSUED_AT_PREFIX, &device_id))
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        Ok(Some(CredentialRecord {
            access_token,
            refresh_token,
            issued_at,
            account_email,
        }))
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.record().await?.map(|record| record.access_token))
    }

    /// Remaining time before the proactive refresh should fire:
    /// `max(0, validity - (now - issued_at))`. Zero when no record exists.
    pub async fn time_until_refresh(&self, validity: Duration) -> Result<Duration> {
        let Some(record) = self.record().await? else {
            return Ok(Duration::ZERO);
        };
        let age_ms = (Utc::now().timestamp_millis() - record.issued_at).max(0) as u64;
        let validity_ms = validity.as_millis() as u64;
        Ok(Duration::from_millis(validity_ms.saturating_sub(age_ms)))
    }

    /// Compare the persisted schema version with the compiled-in one. On
    /// mismatch, wipe credentials and identity state and write the new
    /// version. Returns `true` when a migration happened, meaning prior
    /// session state cannot be trusted.
    pub async fn migrate_if_needed(&self) -> Result<bool> {
        let stored = self.storage.get(SCHEMA_VERSION_KEY).await?;
        if stored.as_deref() == Some(SCHEMA_VERSION) {
            return Ok(false);
        }

        info!(
            "Storage schema changed ({} -> {SCHEMA_VERSION}), wiping session state",
            stored.as_deref().unwrap_or("none")
        );
        self.clear_tokens().await?;
        self.storage.remove_many(&[SESSION_EXPIRED_KEY]).await?;
        self.device.forget().await?;
        self.storage.set(SCHEMA_VERSION_KEY, SCHEMA_VERSION).await?;
        Ok(true)
    }

    /// Mark that the session ended because the backend rejected its refresh
    /// credential.
    pub async fn set_session_expired(&self) -> Result<()> {
        self.storage.set(SESSION_EXPIRED_KEY, "true").await
    }

    /// One-shot read of the session-expired marker; clears it so the
    /// message is shown exactly once.
    pub async fn take_session_expired(&self) -> Result<bool> {
        let expired = self.storage.get(SESSION_EXPIRED_KEY).await?.as_deref() == Some("true");
        if expired {
            self.storage.remove_many(&[SESSION_EXPIRED_KEY]).await?;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> CredentialStore {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let device = Arc::new(DeviceIdentity::new(storage.clone()));
        CredentialStore::new(storage, device)
    }

    #[tokio::test]
    async fn set_tokens_round_trip() {
        let store = store();
        assert!(store
            .set_tokens("A1", "R1", "e@x.com")
            .await
            .expect("set_tokens"));

        let record = store.record().await.expect("record").expect("some record");
        assert_eq!(record.access_token, "A1");
        assert_eq!(record.refresh_token, "R1");
        assert_eq!(record.account_email, "e@x.com");
        assert!(record.issued_at > 0);
    }

    #[tokio::test]
    async fn partial_credentials_are_not_persisted() {
        let store = store();
        assert!(!store.set_tokens("", "R1", "e@x.com").await.expect("set"));
        assert!(!store.set_tokens("A1", "", "e@x.com").await.expect("set"));
        assert!(!store.set_tokens("A1", "R1", "").await.expect("set"));
        assert_eq!(store.record().await.expect("record"), None);

        // A refused write leaves an existing record untouched.
        assert!(store.set_tokens("A1", "R1", "e@x.com").await.expect("set"));
        assert!(!store.set_tokens("A2", "", "e@x.com").await.expect("set"));
        let record = store.record().await.expect("record").expect("record kept");
        assert_eq!(record.access_token, "A1");
    }

    #[tokio::test]
    async fn clear_tokens_is_idempotent() {
        let store = store();
        store
            .set_tokens("A1", "R1", "e@x.com")
            .await
            .expect("set_tokens");
        store.clear_tokens().await.expect("clear");
        store.clear_tokens().await.expect("clear again");
        assert_eq!(store.record().await.expect("record"), None);
        assert_eq!(store.access_token().await.expect("token"), None);
    }

    #[tokio::test]
    async fn time_until_refresh_starts_at_the_full_window() {
        let store = store();
        store
            .set_tokens("A1", "R1", "e@x.com")
            .await
            .expect("set_tokens");

        let validity = Duration::from_secs(3300);
        let remaining = store
            .time_until_refresh(validity)
            .await
            .expect("time_until_refresh");
        assert!(remaining <= validity);
        assert!(remaining > validity - Duration::from_secs(5));
    }

    #[tokio::test]
    async fn time_until_refresh_without_record_is_zero() {
        let store = store();
        let remaining = store
            .time_until_refresh(Duration::from_secs(3300))
            .await
            .expect("time_until_refresh");
        assert_eq!(remaining, Duration::ZERO);
    }

    #[tokio::test]
    async fn migration_wipes_state_and_updates_version() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let device = Arc::new(DeviceIdentity::new(storage.clone()));
        let store = CredentialStore::new(storage.clone(), device);

        store
            .set_tokens("A1", "R1", "e@x.com")
            .await
            .expect("set_tokens");
        storage
            .set(SCHEMA_VERSION_KEY, "1")
            .await
            .expect("age the version");

        assert!(store.migrate_if_needed().await.expect("migrate"));
        assert_eq!(store.record().await.expect("record"), None);
        assert_eq!(
            storage.get(SCHEMA_VERSION_KEY).await.expect("get").as_deref(),
            Some(SCHEMA_VERSION)
        );

        // Once current, migration is a no-op.
        assert!(!store.migrate_if_needed().await.expect("migrate"));
    }

    #[tokio::test]
    async fn session_expired_marker_reads_once() {
        let store = store();
        assert!(!store.take_session_expired().await.expect("take"));

        store.set_session_expired().await.expect("set");
        assert!(store.take_session_expired().await.expect("take"));
        assert!(!store.take_session_expired().await.expect("take again"));
    }
}
