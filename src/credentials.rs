//! Bearer credential resolution.
//!
//! The transport asks its provider for a token on every call, so logging in or
//! out takes effect without rebuilding anything.

use std::sync::Arc;
use tracing::warn;

use crate::session::SessionStore;

/// Supplies the bearer token for the next request.
pub trait CredentialProvider: Send + Sync {
  /// Current token, or `None` to send the request unauthenticated.
  fn token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
  F: Fn() -> Option<String> + Send + Sync,
{
  fn token(&self) -> Option<String> {
    self()
  }
}

/// A fixed token (or none).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
  pub fn new(token: impl Into<String>) -> Self {
    Self(Some(token.into()))
  }

  pub fn none() -> Self {
    Self(None)
  }
}

impl CredentialProvider for StaticToken {
  fn token(&self) -> Option<String> {
    self.0.clone()
  }
}

/// Reads the persisted session token, falling back to a configured token.
#[derive(Clone)]
pub struct SessionCredentials {
  store: Arc<SessionStore>,
  fallback: Option<String>,
}

impl SessionCredentials {
  pub fn new(store: Arc<SessionStore>, fallback: Option<String>) -> Self {
    Self { store, fallback }
  }
}

impl CredentialProvider for SessionCredentials {
  fn token(&self) -> Option<String> {
    match self.store.token() {
      Ok(Some(token)) => Some(token),
      Ok(None) => self.fallback.clone(),
      Err(e) => {
        warn!(error = %e, "failed to read session token, using fallback");
        self.fallback.clone()
      }
    }
  }
}
