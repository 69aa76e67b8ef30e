//! Pluggable authentication.
//!
//! The bridge does not validate credentials itself. When an [`Authenticator`] is configured on
//! the [`crate::server::Server`], it runs before every call and a failure is reported to the
//! caller as `unauthenticated`.
use async_trait::async_trait;
use http::HeaderMap;

/// Claims produced by a successful authentication.
pub type Claims = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("{0}")]
    InvalidCredentials(String),
    #[error("authentication failed: {0}")]
    Other(#[source] crate::BoxError),
}

#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the credentials carried by the request headers.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthError>;
}
