//! Single-flight refresh of the access credential

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{error, info, warn};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::scheduler::RefreshScheduler;
use crate::store::{CredentialRecord, CredentialStore};

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    email: &'a str,
    refresh_token: &'a str,
    device_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: Option<String>,
    refresh_token: Option<String>,
}

enum CoordinatorState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<Result<String>>>,
    },
}

/// Guarantees at most one refresh call is in flight. Callers arriving while
/// one is running are queued and settle with that call's outcome, in FIFO
/// order; a second network call is never issued.
///
/// Both the proactive timer and the request middleware funnel through here;
/// no other code path may hit the refresh endpoint.
pub struct RefreshCoordinator {
    state: Mutex<CoordinatorState>,
    store: Arc<CredentialStore>,
    scheduler: Arc<RefreshScheduler>,
    http: Arc<ClientWithMiddleware>,
    config: AuthConfig,
    // Handed to the timer task so an armed timer never keeps the
    // coordinator alive.
    weak_self: Weak<RefreshCoordinator>,
    // Session epoch: bumped on login and logout. A refresh settling under a
    // stale epoch is discarded so it cannot resurrect a closed session.
    epoch: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        scheduler: Arc<RefreshScheduler>,
        http: Arc<ClientWithMiddleware>,
        config: AuthConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            state: Mutex::new(CoordinatorState::Idle),
            store,
            scheduler,
            http,
            config,
            weak_self: weak_self.clone(),
            epoch: AtomicU64::new(0),
        })
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Invalidate any refresh still in flight; its result will be discarded
    /// when it settles.
    pub fn advance_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Obtain a fresh access token.
    ///
    /// With no stored credentials this fails immediately, without queuing,
    /// so legitimate callers are never blocked behind a doomed attempt.
    pub async fn refresh(&self) -> Result<String> {
        let Some(record) = self.store.record().await? else {
            return Err(AuthError::MissingCredentials(
                "refresh token or account email not stored".to_string(),
            ));
        };
        let device_id = self.store.device_id().await;

        // Join an in-flight refresh instead of starting a second one.
        let waiter = {
            let mut state = self.state.lock().await;
            match &mut *state {
                CoordinatorState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                CoordinatorState::Idle => {
                    *state = CoordinatorState::Refreshing {
                        waiters: Vec::new(),
                    };
                    None
                }
            }
        };
        if let Some(waiter) = waiter {
            return waiter.await.unwrap_or_else(|_| {
                Err(AuthError::Network("refresh call was dropped".to_string()))
            });
        }

        let epoch = self.current_epoch();
        let outcome = self.execute_refresh(&record, &device_id, epoch).await;

        // Settle: back to idle unconditionally, then drain waiters in FIFO
        // order with the same outcome.
        let waiters = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, CoordinatorState::Idle) {
                CoordinatorState::Refreshing { waiters } => waiters,
                CoordinatorState::Idle => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    async fn execute_refresh(
        &self,
        record: &CredentialRecord,
        device_id: &str,
        epoch: u64,
    ) -> Result<String> {
        let url = format!("{}/auth/refresh-token", self.config.api_base);
        let body = RefreshRequest {
            email: &record.account_email,
            refresh_token: &record.refresh_token,
            device_id,
        };

        let response = self.http.post(&url).json(&body).send().await.map_err(|e| {
            warn!("Refresh request failed to send: {e}");
            AuthError::Network(e.to_string())
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!("Refresh credential rejected with status {status}");
            if self.current_epoch() == epoch {
                self.store.set_session_expired().await?;
                self.store.clear_tokens().await?;
            }
            return Err(AuthError::Unauthorized(format!(
                "refresh token rejected ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Network(format!(
                "refresh failed with status {status}: {body}"
            )));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let (Some(token), Some(refresh_token)) = (parsed.token, parsed.refresh_token) else {
            return Err(AuthError::InvalidResponse(
                "token or refresh_token missing from response".to_string(),
            ));
        };

        if self.current_epoch() != epoch {
            // A logout or a new login happened while the call was in
            // flight; honoring this result would resurrect a closed session.
            info!("Discarding refresh result from a closed session");
            return Err(AuthError::Unauthorized(
                "session closed during refresh".to_string(),
            ));
        }

        self.store
            .set_tokens(&token, &refresh_token, &record.account_email)
            .await?;
        self.arm_refresh_timer().await;
        info!("Access token refreshed");
        Ok(token)
    }

    /// Arm the proactive timer to run this coordinator when the stored
    /// access token nears expiry.
    pub fn arm_refresh_timer(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let validity = Duration::from_secs(self.config.token_validity_secs);
            let delay = match self.store.time_until_refresh(validity).await {
                Ok(delay) => delay,
                Err(e) => {
                    warn!("Could not compute refresh delay: {e}");
                    return;
                }
            };

            let weak = self.weak_self.clone();
            self.scheduler
                .arm(delay, async move {
                    if let Some(coordinator) = weak.upgrade() {
                        if let Err(e) = coordinator.refresh().await {
                            warn!("Scheduled refresh failed: {e}");
                        }
                    }
                })
                .await;
        })
    }

    pub async fn cancel_refresh_timer(&self) {
        self.scheduler.cancel().await;
    }
}
