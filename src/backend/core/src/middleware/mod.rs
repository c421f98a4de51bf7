//! HTTP middleware for Gatehouse.
pub mod auth;
pub mod tracing;

pub use auth::{AuthConfig, SessionVerifier, StoreSessionVerifier, TokenSource, VerifiedSession};
pub use tracing::{RequestId, RequestLoggingConfig, RequestLoggingLayer, RequestLoggingService};
