//! Credential attachment and the coordinated retry after a refresh

use std::sync::Arc;

use async_trait::async_trait;
use http::Extensions;
use log::{debug, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};

use auth_manager::SessionManager;

/// Endpoints that manage credentials themselves: no token attachment, and a
/// 401 from them is never answered with a refresh-and-replay.
const SKIP_PATHS: &[&str] = &["/auth/login", "/auth/verify", "/auth/refresh-token"];

pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Attaches the current access credential and device identity to outgoing
/// requests, and answers a 401 with exactly one coordinated refresh and one
/// replay of the original request.
pub struct AuthMiddleware {
    session: Arc<SessionManager>,
}

impl AuthMiddleware {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    fn is_skipped(url: &reqwest::Url) -> bool {
        SKIP_PATHS.iter().any(|skip| url.path().ends_with(skip))
    }

    /// Credentials are read from the store on every request, never cached:
    /// the token may have rotated since the request was built.
    async fn attach_credentials(&self, req: &mut Request) {
        match self.session.access_token().await {
            Ok(Some(token)) => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    req.headers_mut().insert(AUTHORIZATION, value);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read access token: {e}"),
        }

        let device_id = self.session.device_id().await;
        if let Ok(value) = device_id.parse() {
            req.headers_mut().insert(DEVICE_ID_HEADER, value);
        }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        if Self::is_skipped(req.url()) {
            return next.run(req, extensions).await;
        }

        // Clone before the body is consumed; streaming bodies cannot be
        // replayed and fall through without the retry path.
        let retry_req = req.try_clone();

        self.attach_credentials(&mut req).await;
        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut retry_req) = retry_req else {
            debug!("401 on a request with a non-replayable body, returning as-is");
            return Ok(response);
        };

        match self.session.refresh_access_token().await {
            Ok(_) => {
                debug!("Replaying request after token refresh");
                self.attach_credentials(&mut retry_req).await;
                let retried = next.run(retry_req, extensions).await?;
                if retried.status() == StatusCode::UNAUTHORIZED {
                    // The backend rejects even the freshly refreshed token;
                    // a second refresh would loop forever.
                    warn!("Request still unauthorized after refresh, closing session");
                    if let Err(e) = self.session.force_logout().await {
                        warn!("Forced logout failed: {e}");
                    }
                }
                Ok(retried)
            }
            Err(e) => {
                warn!("Token refresh failed, closing session: {e}");
                if let Err(logout_err) = self.session.force_logout().await {
                    warn!("Forced logout failed: {logout_err}");
                }
                Ok(response)
            }
        }
    }
}
