//! # API Client
//!
//! Authenticated request layer for the learning-app client. The middleware
//! attaches the current access credential and device identity to every
//! outgoing request, and answers an authorization failure with exactly one
//! coordinated refresh and one replay of the original request.

pub mod client;
pub mod error;
pub mod middleware;

// Re-exports
pub use client::{ApiClient, QuizSummary};
pub use error::ApiError;
pub use middleware::AuthMiddleware;
