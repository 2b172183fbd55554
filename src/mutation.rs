//! Mutation runtime: one-shot writes with optimistic patches and tag
//! invalidation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, PatchToken, UndoOutcome};
use crate::endpoint::{MutationEndpoint, OptimisticUpdates};
use crate::error::ApiResult;
use crate::query::QueryRuntime;

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Executes [`MutationEndpoint`]s.
///
/// Concurrent invocations are independent; nothing is merged or
/// de-duplicated unless the descriptor is `EXCLUSIVE`.
#[derive(Clone)]
pub struct MutationRuntime {
  queries: QueryRuntime,
  locks: Arc<Mutex<HashMap<CacheKey, KeyLock>>>,
}

impl MutationRuntime {
  pub fn new(queries: QueryRuntime) -> Self {
    Self {
      queries,
      locks: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  fn locks(&self) -> MutexGuard<'_, HashMap<CacheKey, KeyLock>> {
    self.locks.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Run `M` with `args`.
  ///
  /// 1. Validate locally (no request on failure)
  /// 2. Apply optimistic patches
  /// 3. Send the request
  /// 4. On success: commit patches, then invalidate declared tags
  /// 5. On failure: undo patches and return the error
  ///
  /// Dropping the returned future before it completes undoes the patches
  /// as well.
  pub async fn mutate<M: MutationEndpoint>(&self, args: M::Args) -> ApiResult<M::Output> {
    M::validate(&args)?;
    let request = M::request(&args)?;

    let lock = if M::EXCLUSIVE {
      Some(self.key_lock(M::exclusive_key(&args)?))
    } else {
      None
    };
    let guard = match &lock {
      Some(lock) => Some(lock.lock().await),
      None => None,
    };

    let patches = {
      let mut updates = OptimisticUpdates::new(self.queries.cache());
      M::optimistic(&args, &mut updates);
      PendingPatches::new(self.queries.clone(), updates.into_tokens())
    };

    let result = self
      .queries
      .transport()
      .execute(request)
      .await
      .and_then(M::transform_response);

    let result = match result {
      Ok(output) => {
        patches.commit();
        let tags = M::invalidates(&args, &output);
        let refetched = self.queries.invalidate(&tags);
        info!(
          mutation = M::NAME,
          tags = tags.len(),
          refetched,
          "mutation committed"
        );
        Ok(output)
      }
      Err(error) => {
        warn!(mutation = M::NAME, error = %error, "mutation failed");
        patches.roll_back();
        Err(error)
      }
    };

    drop(guard);
    if lock.is_some() {
      drop(lock);
      self.locks().retain(|_, l| Arc::strong_count(l) > 1);
    }
    result
  }

  fn key_lock(&self, key: CacheKey) -> KeyLock {
    self.locks().entry(key).or_default().clone()
  }
}

/// Optimistic patches of one in-flight mutation.
///
/// Undone on drop unless committed, so a cancelled mutation leaves no
/// patched values behind.
struct PendingPatches {
  queries: QueryRuntime,
  tokens: Vec<PatchToken>,
}

impl PendingPatches {
  fn new(queries: QueryRuntime, tokens: Vec<PatchToken>) -> Self {
    Self { queries, tokens }
  }

  fn commit(mut self) {
    for token in self.tokens.drain(..) {
      self.queries.cache().commit_patch(token);
    }
  }

  fn roll_back(self) {
    drop(self);
  }
}

impl Drop for PendingPatches {
  fn drop(&mut self) {
    if self.tokens.is_empty() {
      return;
    }
    debug!(patches = self.tokens.len(), "rolling back optimistic patches");
    // Newest first, so stacked patches unwind in order
    for token in self.tokens.drain(..).rev() {
      match self.queries.cache().undo_patch(token) {
        UndoOutcome::Restored => {}
        // Already marked stale; refetch only while a runtime is around
        UndoOutcome::Superseded(key) => {
          if tokio::runtime::Handle::try_current().is_ok() {
            self.queries.refetch(&key);
          }
        }
        UndoOutcome::Missing => debug!(?token, "patched entry is gone, nothing to roll back"),
      }
    }
  }
}
