//! Cache keys: (endpoint name, serialized arguments).

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{ApiError, ApiResult};

/// Identifies one cache entry.
///
/// Arguments are serialized to canonical JSON (object keys sorted) and hashed,
/// so equal arguments always land on the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  endpoint: &'static str,
  args_hash: String,
}

impl CacheKey {
  pub fn new<A: Serialize + ?Sized>(endpoint: &'static str, args: &A) -> ApiResult<Self> {
    let canonical = serde_json::to_value(args)
      .and_then(|v| serde_json::to_string(&v))
      .map_err(ApiError::encode)?;

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());

    Ok(Self {
      endpoint,
      args_hash: hex::encode(hasher.finalize()),
    })
  }

  pub fn endpoint(&self) -> &'static str {
    self.endpoint
  }

  pub fn args_hash(&self) -> &str {
    &self.args_hash
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}({})", self.endpoint, &self.args_hash[..12])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_same_args_same_key() {
    let a = CacheKey::new("getUsers", &json!({ "page": 1, "limit": 10 })).unwrap();
    let b = CacheKey::new("getUsers", &json!({ "limit": 10, "page": 1 })).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn test_endpoint_and_args_distinguish() {
    let users = CacheKey::new("getUsers", &()).unwrap();
    let roles = CacheKey::new("getRoles", &()).unwrap();
    assert_ne!(users, roles);

    let one = CacheKey::new("getUser", "1").unwrap();
    let two = CacheKey::new("getUser", "2").unwrap();
    assert_ne!(one, two);
  }

  #[test]
  fn test_display_is_short() {
    let key = CacheKey::new("getRoles", &()).unwrap();
    assert_eq!(key.args_hash().len(), 64);
    assert!(key.to_string().starts_with("getRoles("));
  }
}
