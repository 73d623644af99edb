//! # Auth Manager
//!
//! Session and credential lifecycle coordination for the learning-app
//! client: a stable per-installation device identity, a persistent
//! credential store with schema-version migration, a proactive refresh
//! timer, and a single-flight refresh coordinator shared by the timer and
//! the request layer.

pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod store;

// Re-exports
pub use config::AuthConfig;
pub use coordinator::RefreshCoordinator;
pub use device::DeviceIdentity;
pub use error::{AuthError, Result};
pub use scheduler::RefreshScheduler;
pub use session::{SessionManager, TokenPair};
pub use storage::{default_data_dir, FileStorage, MemoryStorage, StorageBackend};
pub use store::{CredentialRecord, CredentialStore};
