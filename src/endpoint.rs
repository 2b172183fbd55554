//! Endpoint descriptors.
//!
//! Each network operation is a zero-sized type implementing either
//! [`QueryEndpoint`] (cacheable read) or [`MutationEndpoint`] (one-shot write).
//! A descriptor builds the request from its arguments, transforms the raw
//! payload into a typed result, and declares the cache tags it provides or
//! invalidates.

use serde::Serialize;
use tracing::warn;

use crate::cache::{CacheKey, EntityCache, PatchToken, Tag};
use crate::error::{ApiResult, ValidationError};
use crate::transport::{RawResponse, Request};

/// A cacheable, re-fetchable read.
pub trait QueryEndpoint: 'static {
  /// Endpoint name, part of every cache key.
  const NAME: &'static str;

  type Args: Serialize + Clone + Send + Sync + 'static;
  type Output: Send + Sync + 'static;

  fn request(args: &Self::Args) -> ApiResult<Request>;

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output>;

  /// Tags this result belongs to. `output` is `None` when the fetch failed.
  ///
  /// Untagged results are never refreshed by mutations.
  fn provides(_args: &Self::Args, _output: Option<&Self::Output>) -> Vec<Tag> {
    Vec::new()
  }
}

/// A one-shot write.
pub trait MutationEndpoint: 'static {
  const NAME: &'static str;

  /// Serialize invocations that share an [`exclusive_key`](Self::exclusive_key).
  const EXCLUSIVE: bool = false;

  type Args: Serialize + Send + Sync + 'static;
  type Output: Send + 'static;

  /// Local pre-flight checks. Failing here never touches the network.
  fn validate(_args: &Self::Args) -> Result<(), ValidationError> {
    Ok(())
  }

  fn request(args: &Self::Args) -> ApiResult<Request>;

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output>;

  /// Tags to invalidate once the write has succeeded.
  fn invalidates(_args: &Self::Args, _output: &Self::Output) -> Vec<Tag> {
    Vec::new()
  }

  /// Patch cached query results before the request is sent.
  fn optimistic(_args: &Self::Args, _updates: &mut OptimisticUpdates<'_>) {}

  /// Lock key for `EXCLUSIVE` descriptors. Defaults to the full arguments.
  fn exclusive_key(args: &Self::Args) -> ApiResult<CacheKey> {
    CacheKey::new(Self::NAME, args)
  }
}

/// Collects the optimistic patches of one mutation invocation.
pub struct OptimisticUpdates<'a> {
  cache: &'a EntityCache,
  tokens: Vec<PatchToken>,
}

impl<'a> OptimisticUpdates<'a> {
  pub(crate) fn new(cache: &'a EntityCache) -> Self {
    Self {
      cache,
      tokens: Vec::new(),
    }
  }

  /// Patch the cached result of query `Q` for `args`, if there is one.
  ///
  /// Returns false when nothing was cached for those arguments.
  pub fn update_query<Q, F>(&mut self, args: &Q::Args, recipe: F) -> bool
  where
    Q: QueryEndpoint,
    Q::Output: Clone,
    F: FnOnce(&mut Q::Output),
  {
    let key = match CacheKey::new(Q::NAME, args) {
      Ok(key) => key,
      Err(e) => {
        warn!(endpoint = Q::NAME, error = %e, "cannot key optimistic update");
        return false;
      }
    };
    match self.cache.apply_patch::<Q::Output, _>(&key, recipe) {
      Some(token) => {
        self.tokens.push(token);
        true
      }
      None => false,
    }
  }

  pub(crate) fn into_tokens(self) -> Vec<PatchToken> {
    self.tokens
  }
}
