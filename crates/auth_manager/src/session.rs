//! Public session facade consumed by the UI layer

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use log::{info, warn};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::coordinator::RefreshCoordinator;
use crate::device::DeviceIdentity;
use crate::error::{AuthError, Result};
use crate::scheduler::RefreshScheduler;
use crate::storage::StorageBackend;
use crate::store::CredentialStore;

/// HTTP request timeout for auth endpoint calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    device_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    email: &'a str,
    token: &'a str,
    device_id: &'a str,
}

/// Token pair issued by the verification endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
struct LogoutRequest<'a> {
    device_id: &'a str,
}

/// The session context: login, logout, authenticated-state queries and the
/// only public door to the coordinated token refresh.
///
/// Everything hangs off this explicit object rather than ambient globals,
/// so multiple simulated sessions can coexist in one process under test.
pub struct SessionManager {
    config: AuthConfig,
    http: Arc<ClientWithMiddleware>,
    device: Arc<DeviceIdentity>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl SessionManager {
    pub fn new(config: AuthConfig, storage: Arc<dyn StorageBackend>) -> Arc<Self> {
        let http = Arc::new(Self::build_retry_client());
        let device = Arc::new(DeviceIdentity::new(Arc::clone(&storage)));
        let store = Arc::new(CredentialStore::new(storage, Arc::clone(&device)));
        let scheduler = Arc::new(RefreshScheduler::new());
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            scheduler,
            Arc::clone(&http),
            config.clone(),
        );

        Arc::new(Self {
            config,
            http,
            device,
            store,
            coordinator,
        })
    }

    fn build_retry_client() -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("http client");

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub async fn device_id(&self) -> String {
        self.device.get_or_create().await
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        self.store.access_token().await
    }

    /// Ask the backend to email a one-time login code to the account.
    /// `username` is only needed when the account does not exist yet.
    pub async fn request_login_code(
        &self,
        email: &str,
        username: Option<&str>,
    ) -> anyhow::Result<String> {
        let device_id = self.device_id().await;
        let url = format!("{}/auth/login", self.config.api_base);
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest {
                email,
                username,
                device_id: &device_id,
            })
            .send()
            .await
            .context("Failed to send login request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("login request failed ({status}): {body}"));
        }
        let parsed: LoginResponse = response
            .json()
            .await
            .context("Failed to parse login response")?;
        Ok(parsed.message)
    }

    /// Exchange the emailed code for a token pair and open the session.
    pub async fn verify_code(&self, email: &str, code: &str) -> anyhow::Result<()> {
        let device_id = self.device_id().await;
        let url = format!("{}/auth/verify", self.config.api_base);
        let response = self
            .http
            .post(&url)
            .json(&VerifyRequest {
                email,
                token: code,
                device_id: &device_id,
            })
            .send()
            .await
            .context("Failed to send verification request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("verification failed ({status}): {body}"));
        }
        let pair: TokenPair = response
            .json()
            .await
            .context("Failed to parse verification response")?;

        self.login(&pair.token, &pair.refresh_token, email).await?;
        Ok(())
    }

    /// Open a session from an issued token pair.
    ///
    /// Prior credentials are cleared first so stale state from a previous
    /// account cannot leak into the new session; the session counts as
    /// authenticated only once the store accepts the new set.
    pub async fn login(&self, access_token: &str, refresh_token: &str, email: &str) -> Result<()> {
        self.coordinator.advance_epoch();
        self.coordinator.cancel_refresh_timer().await;
        self.store.clear_tokens().await?;

        if !self.store.set_tokens(access_token, refresh_token, email).await? {
            return Err(AuthError::MissingCredentials(
                "login requires an access token, a refresh token and an email".to_string(),
            ));
        }
        self.coordinator.arm_refresh_timer().await;
        info!("Session opened");
        Ok(())
    }

    /// Close the session. The backend is notified best-effort so it can
    /// invalidate the refresh credential server-side; local state is
    /// cleared regardless of the network outcome.
    pub async fn logout(&self) -> Result<()> {
        self.coordinator.advance_epoch();
        self.coordinator.cancel_refresh_timer().await;

        let device_id = self.device_id().await;
        let url = format!("{}/auth/logout", self.config.api_base);
        match self
            .http
            .post(&url)
            .json(&LogoutRequest {
                device_id: &device_id,
            })
            .send()
            .await
        {
            Ok(response) if !response.status().is_success() => {
                warn!("Logout notification returned {}", response.status());
            }
            Err(e) => warn!("Logout notification failed: {e}"),
            Ok(_) => {}
        }

        self.store.clear_tokens().await?;
        info!("Session closed");
        Ok(())
    }

    /// Close the session locally without notifying the backend. This is the
    /// middleware's path after the backend has already rejected the refresh
    /// credential.
    pub async fn force_logout(&self) -> Result<()> {
        self.coordinator.advance_epoch();
        self.coordinator.cancel_refresh_timer().await;
        self.store.clear_tokens().await
    }

    /// One-shot: reports whether the previous session ended because the
    /// backend rejected its refresh credential, then clears the marker.
    pub async fn is_session_expired(&self) -> bool {
        match self.store.take_session_expired().await {
            Ok(expired) => expired,
            Err(e) => {
                warn!("Could not read session-expired marker: {e}");
                false
            }
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(self.store.record().await, Ok(Some(_)))
    }

    /// Restore session state at startup. Returns whether a usable session
    /// exists; after a schema migration this is always `false`, even if
    /// stale tokens technically remained on disk.
    pub async fn initialize_from_storage(&self) -> Result<bool> {
        if self.store.migrate_if_needed().await? {
            return Ok(false);
        }
        if self.store.record().await?.is_some() {
            self.coordinator.arm_refresh_timer().await;
            return Ok(true);
        }
        Ok(false)
    }

    /// Obtain a fresh access token through the single-flight coordinator.
    /// The only public path to the refresh endpoint.
    pub async fn refresh_access_token(&self) -> Result<String> {
        self.coordinator.refresh().await
    }

    /// Remaining time before the proactive refresh fires.
    pub async fn time_until_refresh(&self) -> Result<Duration> {
        self.store
            .time_until_refresh(Duration::from_secs(self.config.token_validity_secs))
            .await
    }
}
