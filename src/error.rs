//! Error types for the access layer.
//!
//! Every error here is `Clone`: a failed query stores its error on the cache
//! entry and every subscription observes the same value.

use std::fmt;
use thiserror::Error;

/// Result type for access-layer operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by queries, mutations and the transport.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("failed to decode response: {0}")]
  Decode(String),

  #[error("failed to encode request: {0}")]
  Encode(String),

  #[error("invalid configuration: {0}")]
  Config(String),

  /// The cache context was torn down while a caller was waiting on it.
  #[error("cache context closed")]
  Closed,
}

impl ApiError {
  pub fn decode(err: impl fmt::Display) -> Self {
    ApiError::Decode(err.to_string())
  }

  pub fn encode(err: impl fmt::Display) -> Self {
    ApiError::Encode(err.to_string())
  }

  /// HTTP status of the failed call, if the server answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Transport(TransportError::Status { status, .. }) => Some(*status),
      _ => None,
    }
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, ApiError::Validation(_))
  }
}

/// A network failure or a non-2xx response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("request failed with status {status}: {body}")]
  Status { status: u16, body: String },

  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out")]
  Timeout,
}

impl From<reqwest::Error> for TransportError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      return TransportError::Timeout;
    }
    match err.status() {
      Some(status) => TransportError::Status {
        status: status.as_u16(),
        body: err.to_string(),
      },
      None => TransportError::Network(err.to_string()),
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    ApiError::Transport(err.into())
  }
}

/// A single field that failed local validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
  pub field: &'static str,
  pub message: String,
}

impl fmt::Display for FieldError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.field, self.message)
  }
}

/// Pre-flight validation failure. Never reaches the network.
#[derive(Debug, Clone, Default, Error, PartialEq, Eq)]
#[error("validation failed: {}", join_fields(.fields))]
pub struct ValidationError {
  pub fields: Vec<FieldError>,
}

impl ValidationError {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record `message` against `field` unless `ok` holds.
  pub fn check(mut self, ok: bool, field: &'static str, message: impl Into<String>) -> Self {
    if !ok {
      self.fields.push(FieldError {
        field,
        message: message.into(),
      });
    }
    self
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  pub fn into_result(self) -> Result<(), ValidationError> {
    if self.is_empty() {
      Ok(())
    } else {
      Err(self)
    }
  }

  pub fn message_for(&self, field: &str) -> Option<&str> {
    self
      .fields
      .iter()
      .find(|f| f.field == field)
      .map(|f| f.message.as_str())
  }
}

fn join_fields(fields: &[FieldError]) -> String {
  fields
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(", ")
}

/// No data has been fetched for an entry yet.
///
/// Not a failure: lets consumers tell a first load apart from a failed one.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("no data cached yet")]
pub struct CacheMiss;
