//! Integration tests for the session facade

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use auth_manager::{AuthConfig, AuthError, MemoryStorage, SessionManager, StorageBackend};

const CURRENT_SCHEMA_VERSION: &str = "2";

fn config_for(api_base: String, token_validity_secs: u64) -> AuthConfig {
    AuthConfig {
        api_base,
        token_validity_secs,
    }
}

async fn seed_credentials(storage: &MemoryStorage, device_id: &str, version: &str) {
    storage.set("device_id", device_id).await.expect("seed");
    storage.set("auth_version", version).await.expect("seed");
    storage
        .set(&format!("access_token.{device_id}"), "A1")
        .await
        .expect("seed");
    storage
        .set(&format!("refresh_token.{device_id}"), "R1")
        .await
        .expect("seed");
    storage
        .set(&format!("account_email.{device_id}"), "e@x.com")
        .await
        .expect("seed");
    storage
        .set(
            &format!("issued_at.{device_id}"),
            &chrono::Utc::now().timestamp_millis().to_string(),
        )
        .await
        .expect("seed");
}

/// A persisted schema version older than the compiled-in one invalidates
/// everything: startup reports not-authenticated even though valid-looking
/// tokens are on disk, and the version marker is updated.
#[tokio::test]
async fn migration_reports_not_authenticated() {
    let storage = Arc::new(MemoryStorage::new());
    seed_credentials(&storage, "device-1", "1").await;

    let session = SessionManager::new(
        config_for("http://localhost:5000".to_string(), 3300),
        storage.clone(),
    );

    assert!(!session.initialize_from_storage().await.expect("initialize"));
    assert!(!session.is_authenticated().await);
    assert_eq!(
        storage.get("auth_version").await.expect("get").as_deref(),
        Some(CURRENT_SCHEMA_VERSION)
    );
}

#[tokio::test]
async fn initialize_restores_a_current_session() {
    let storage = Arc::new(MemoryStorage::new());
    seed_credentials(&storage, "device-1", CURRENT_SCHEMA_VERSION).await;

    let session = SessionManager::new(
        config_for("http://localhost:5000".to_string(), 3300),
        storage,
    );

    assert!(session.initialize_from_storage().await.expect("initialize"));
    assert!(session.is_authenticated().await);
    assert_eq!(
        session.access_token().await.expect("token").as_deref(),
        Some("A1")
    );
}

#[tokio::test]
async fn initialize_without_tokens_is_not_authenticated() {
    let session = SessionManager::new(
        config_for("http://localhost:5000".to_string(), 3300),
        Arc::new(MemoryStorage::new()),
    );
    assert!(!session.initialize_from_storage().await.expect("initialize"));
}

/// Immediately after login the proactive timer has the full validity
/// window ahead of it.
#[tokio::test]
async fn login_starts_the_full_validity_window() {
    let validity = Duration::from_secs(3300);
    let session = SessionManager::new(
        config_for("http://localhost:5000".to_string(), validity.as_secs()),
        Arc::new(MemoryStorage::new()),
    );
    session.login("A1", "R1", "e@x.com").await.expect("login");

    let remaining = session.time_until_refresh().await.expect("remaining");
    assert!(remaining <= validity);
    assert!(remaining > validity - Duration::from_secs(5));
}

#[tokio::test]
async fn login_refuses_partial_credentials() {
    let session = SessionManager::new(
        config_for("http://localhost:5000".to_string(), 3300),
        Arc::new(MemoryStorage::new()),
    );

    let err = session
        .login("A1", "", "e@x.com")
        .await
        .expect_err("partial login must fail");
    assert!(matches!(err, AuthError::MissingCredentials(_)));
    assert!(!session.is_authenticated().await);
}

/// Logout notifies the backend, clears local state and disarms the
/// proactive timer: with a one-second validity window, no refresh call
/// arrives after logout.
#[tokio::test]
async fn logout_clears_state_and_stops_the_timer() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Logged out successfully"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let session = SessionManager::new(
        config_for(mock_server.uri(), 1),
        Arc::new(MemoryStorage::new()),
    );
    session.login("A1", "R1", "e@x.com").await.expect("login");
    session.logout().await.expect("logout");

    assert!(!session.is_authenticated().await);
    assert_eq!(session.access_token().await.expect("token"), None);

    // Long enough for the armed one-second timer to have fired if logout
    // had failed to cancel it.
    tokio::time::sleep(Duration::from_millis(1500)).await;
}

/// The backend notification is best-effort: a failing logout endpoint does
/// not keep the local session alive.
#[tokio::test]
async fn logout_clears_state_when_the_backend_rejects() {
    let mock_server = MockServer::start().await;
    // No /auth/logout mock mounted: the notification gets a 404.

    let session = SessionManager::new(
        config_for(mock_server.uri(), 3300),
        Arc::new(MemoryStorage::new()),
    );
    session.login("A1", "R1", "e@x.com").await.expect("login");
    session.logout().await.expect("logout");

    assert!(!session.is_authenticated().await);
}

/// The verification endpoint issues the token pair that opens the session.
#[tokio::test]
async fn verify_code_opens_the_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "A1",
            "refresh_token": "R1"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionManager::new(
        config_for(mock_server.uri(), 3300),
        Arc::new(MemoryStorage::new()),
    );
    session
        .verify_code("e@x.com", "123456")
        .await
        .expect("verify");

    assert!(session.is_authenticated().await);
    assert_eq!(
        session.access_token().await.expect("token").as_deref(),
        Some("A1")
    );
}

#[tokio::test]
async fn request_login_code_surfaces_the_backend_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Authentication token generated"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionManager::new(
        config_for(mock_server.uri(), 3300),
        Arc::new(MemoryStorage::new()),
    );
    let message = session
        .request_login_code("e@x.com", Some("learner"))
        .await
        .expect("request code");
    assert_eq!(message, "Authentication token generated");
}
