//! Query runtime: drives queries to completion and keeps subscriptions informed.
//!
//! Modelled on TanStack/RTK Query. A [`Subscription`] binds a consumer to one
//! cache entry; the runtime fetches through the transport when the entry is
//! missing, stale or asked to refresh, and shares one in-flight request among
//! every subscriber of the same (endpoint, arguments).
//!
//! # Example
//!
//! ```ignore
//! let mut roles = runtime.subscribe::<GetRoles>(())?;
//!
//! // In event loop tick
//! if roles.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! let result = roles.result();
//! match result.data() {
//!     Ok(roles) => render_roles(roles, result.is_fetching()),
//!     Err(CacheMiss) if result.is_error() => render_error(result.error()),
//!     Err(CacheMiss) => render_spinner(),
//! }
//! ```

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::cache::{
  CacheKey, CachedValue, CommitOutcome, EntityCache, EntrySnapshot, FetchOutcome, FetchStatus, Tag,
};
use crate::endpoint::QueryEndpoint;
use crate::error::{ApiError, ApiResult, CacheMiss};
use crate::transport::Transport;

/// When a new subscription refetches data that is already cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MountRefetch {
  /// Use cached data unless it is stale.
  #[default]
  Never,
  Always,
  /// Refetch when the cached data is at least this old.
  OlderThan(Duration),
}

impl MountRefetch {
  fn wants_refetch(&self, fetched_at: Option<DateTime<Utc>>) -> bool {
    match self {
      MountRefetch::Never => false,
      MountRefetch::Always => true,
      MountRefetch::OlderThan(max_age) => fetched_at
        .map(|t| {
          (Utc::now() - t)
            .to_std()
            .map(|age| age >= *max_age)
            .unwrap_or(false)
        })
        .unwrap_or(true),
    }
  }
}

/// Runtime-wide defaults.
#[derive(Debug, Clone)]
pub struct CacheOptions {
  /// How long an entry without subscribers is kept before eviction.
  pub keep_unused_for: Duration,
  pub refetch_on_focus: bool,
  pub refetch_on_mount: MountRefetch,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      keep_unused_for: Duration::from_secs(60),
      refetch_on_focus: false,
      refetch_on_mount: MountRefetch::Never,
    }
  }
}

/// Refetch triggers for one subscription. Argument changes and tag
/// invalidation always trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
  pub refetch_on_mount: MountRefetch,
  pub refetch_on_focus: bool,
}

impl From<&CacheOptions> for SubscribeOptions {
  fn from(options: &CacheOptions) -> Self {
    Self {
      refetch_on_mount: options.refetch_on_mount,
      refetch_on_focus: options.refetch_on_focus,
    }
  }
}

/// What a subscriber sees of its entry.
#[derive(Debug)]
pub struct QueryResult<T> {
  pub status: FetchStatus,
  /// Last good data. Kept while refetching and after a failed refetch.
  pub data: Option<Arc<T>>,
  pub error: Option<ApiError>,
  pub is_stale: bool,
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T: Send + Sync + 'static> QueryResult<T> {
  fn from_snapshot(snapshot: Option<EntrySnapshot>) -> Self {
    match snapshot {
      Some(snapshot) => Self {
        status: snapshot.status,
        data: snapshot.data_as::<T>(),
        error: snapshot.error,
        is_stale: snapshot.stale,
        fetched_at: snapshot.fetched_at,
      },
      None => Self {
        status: FetchStatus::Idle,
        data: None,
        error: None,
        is_stale: false,
        fetched_at: None,
      },
    }
  }
}

impl<T> QueryResult<T> {
  /// Cached data, or [`CacheMiss`] if nothing has been fetched yet.
  pub fn data(&self) -> Result<&T, CacheMiss> {
    self.data.as_deref().ok_or(CacheMiss)
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }

  /// First load: fetching with nothing to show yet.
  pub fn is_loading(&self) -> bool {
    self.status == FetchStatus::Loading && self.data.is_none()
  }

  /// Any request in flight, including background refetches.
  pub fn is_fetching(&self) -> bool {
    self.status == FetchStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == FetchStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == FetchStatus::Error
  }
}

impl<T> Clone for QueryResult<T> {
  fn clone(&self) -> Self {
    Self {
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      is_stale: self.is_stale,
      fetched_at: self.fetched_at,
    }
  }
}

/// Loads one entry from the network.
type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchOutcome> + Send + Sync>;

fn fetcher_for<E: QueryEndpoint>(transport: Transport, args: E::Args) -> Fetcher {
  Arc::new(move || {
    let transport = transport.clone();
    let args = args.clone();
    Box::pin(async move {
      let result = match E::request(&args) {
        Ok(request) => transport
          .execute(request)
          .await
          .and_then(E::transform_response),
        Err(e) => Err(e),
      };
      match result {
        Ok(output) => {
          let tags = E::provides(&args, Some(&output));
          Ok((Arc::new(output) as CachedValue, tags))
        }
        Err(error) => Err((error, E::provides(&args, None))),
      }
    })
  })
}

struct RuntimeInner {
  cache: Arc<EntityCache>,
  transport: Transport,
  options: CacheOptions,
  fetchers: Mutex<HashMap<CacheKey, Fetcher>>,
}

/// Runs queries against a shared [`EntityCache`].
///
/// Cheap to clone; clones share the cache and in-flight bookkeeping. Methods
/// that may start a request must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct QueryRuntime {
  inner: Arc<RuntimeInner>,
}

impl QueryRuntime {
  pub fn new(transport: Transport, cache: Arc<EntityCache>, options: CacheOptions) -> Self {
    Self {
      inner: Arc::new(RuntimeInner {
        cache,
        transport,
        options,
        fetchers: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn cache(&self) -> &Arc<EntityCache> {
    &self.inner.cache
  }

  pub fn transport(&self) -> &Transport {
    &self.inner.transport
  }

  pub fn options(&self) -> &CacheOptions {
    &self.inner.options
  }

  fn fetchers(&self) -> MutexGuard<'_, HashMap<CacheKey, Fetcher>> {
    self
      .inner
      .fetchers
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Subscribe with the runtime's default triggers.
  pub fn subscribe<E: QueryEndpoint>(&self, args: E::Args) -> ApiResult<Subscription<E>> {
    self.subscribe_with::<E>(args, SubscribeOptions::from(&self.inner.options))
  }

  /// Subscribe to `E` for `args`, fetching if nothing usable is cached.
  pub fn subscribe_with<E: QueryEndpoint>(
    &self,
    args: E::Args,
    options: SubscribeOptions,
  ) -> ApiResult<Subscription<E>> {
    let key = CacheKey::new(E::NAME, &args)?;
    self.register::<E>(&key, &args);
    let rx = self.inner.cache.subscribe(&key, options.refetch_on_focus);

    if self.wants_fetch(&key, options.refetch_on_mount) {
      self.ensure_fetch(&key);
    }

    Ok(Subscription {
      runtime: self.clone(),
      key,
      args,
      options,
      rx,
    })
  }

  /// Fetch through the cache once and return the result.
  ///
  /// Fresh cached data is returned without a request.
  pub async fn fetch<E: QueryEndpoint>(&self, args: E::Args) -> ApiResult<Arc<E::Output>> {
    let mut subscription = self.subscribe_with::<E>(args, SubscribeOptions::default())?;
    let result = subscription.settled().await;
    match (result.status, result.data, result.error) {
      (FetchStatus::Success, Some(data), _) => Ok(data),
      (FetchStatus::Error, _, Some(error)) => Err(error),
      _ => Err(ApiError::Closed),
    }
  }

  /// Read the cached state of `E` for `args` without subscribing.
  pub fn select<E: QueryEndpoint>(&self, args: &E::Args) -> ApiResult<QueryResult<E::Output>> {
    let key = CacheKey::new(E::NAME, args)?;
    Ok(QueryResult::from_snapshot(self.inner.cache.get(&key)))
  }

  /// Start a new request for `key`, superseding any in flight.
  pub fn refetch(&self, key: &CacheKey) -> bool {
    let Some(fetcher) = self.fetchers().get(key).cloned() else {
      debug!(key = %key, "no fetcher registered, skipping refetch");
      return false;
    };
    let seq = self.inner.cache.begin_fetch(key);
    self.spawn_fetch(key.clone(), seq, fetcher);
    true
  }

  /// Invalidate `tags`; every active entry carrying them refetches once.
  ///
  /// Returns the number of refetches started.
  pub fn invalidate(&self, tags: &[Tag]) -> usize {
    let keys = self.inner.cache.invalidate(tags);
    keys.iter().filter(|key| self.refetch(key)).count()
  }

  /// Window regained focus: refetch entries whose subscribers opted in.
  pub fn notify_focus(&self) -> usize {
    let keys = self.inner.cache.focus_keys();
    keys.iter().filter(|key| self.refetch(key)).count()
  }

  /// Evict unused entries whose grace period has elapsed.
  pub fn collect_garbage(&self) -> usize {
    let evicted = self
      .inner
      .cache
      .collect_garbage(self.inner.options.keep_unused_for);
    let mut fetchers = self.fetchers();
    for key in &evicted {
      fetchers.remove(key);
    }
    evicted.len()
  }

  /// Drop every entry. Live subscriptions observe the cache as closed.
  pub fn teardown(&self) {
    self.inner.cache.clear();
    self.fetchers().clear();
  }

  fn register<E: QueryEndpoint>(&self, key: &CacheKey, args: &E::Args) {
    let transport = self.inner.transport.clone();
    self
      .fetchers()
      .entry(key.clone())
      .or_insert_with(|| fetcher_for::<E>(transport, args.clone()));
  }

  fn wants_fetch(&self, key: &CacheKey, mount: MountRefetch) -> bool {
    let Some(snapshot) = self.inner.cache.get(key) else {
      return true;
    };
    match snapshot.status {
      FetchStatus::Idle | FetchStatus::Error => true,
      FetchStatus::Loading => false,
      FetchStatus::Success => snapshot.stale || mount.wants_refetch(snapshot.fetched_at),
    }
  }

  /// Start a request for `key` unless one is already in flight.
  fn ensure_fetch(&self, key: &CacheKey) -> bool {
    let Some(fetcher) = self.fetchers().get(key).cloned() else {
      return false;
    };
    match self.inner.cache.try_begin_fetch(key) {
      Some(seq) => {
        self.spawn_fetch(key.clone(), seq, fetcher);
        true
      }
      None => {
        debug!(key = %key, "joining in-flight request");
        false
      }
    }
  }

  fn spawn_fetch(&self, key: CacheKey, seq: u64, fetcher: Fetcher) {
    debug!(key = %key, seq, "starting fetch");
    let runtime = self.clone();
    tokio::spawn(async move {
      let outcome = fetcher().await;
      let commit = runtime.inner.cache.complete_fetch(&key, seq, outcome);
      debug!(key = %key, seq, ?commit, "fetch finished");
      if commit == CommitOutcome::Committed && runtime.inner.cache.subscribers(&key) == 0 {
        runtime.schedule_eviction(&key);
      }
    });
  }

  fn release(&self, key: &CacheKey, on_focus: bool) {
    if self.inner.cache.unsubscribe(key, on_focus) == 0 {
      self.schedule_eviction(key);
    }
  }

  fn schedule_eviction(&self, key: &CacheKey) {
    let grace = self.inner.options.keep_unused_for;
    if grace.is_zero() {
      self.evict(key, grace);
      return;
    }
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        let runtime = self.clone();
        let key = key.clone();
        handle.spawn(async move {
          tokio::time::sleep(grace).await;
          runtime.evict(&key, grace);
        });
      }
      Err(_) => debug!(key = %key, "no runtime for delayed eviction, leaving for collect_garbage"),
    }
  }

  fn evict(&self, key: &CacheKey, grace: Duration) {
    if self.inner.cache.evict_if_unused(key, grace) {
      self.fetchers().remove(key);
    }
  }
}

/// A live binding from a consumer to one cache entry.
///
/// Dropping it unsubscribes. An in-flight request keeps running and populates
/// the cache, but nothing is delivered to the dropped subscription.
pub struct Subscription<E: QueryEndpoint> {
  runtime: QueryRuntime,
  key: CacheKey,
  args: E::Args,
  options: SubscribeOptions,
  rx: watch::Receiver<u64>,
}

impl<E: QueryEndpoint> Subscription<E> {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn args(&self) -> &E::Args {
    &self.args
  }

  pub fn result(&self) -> QueryResult<E::Output> {
    QueryResult::from_snapshot(self.runtime.inner.cache.get(&self.key))
  }

  pub fn data(&self) -> Option<Arc<E::Output>> {
    self.result().data
  }

  /// Returns `true` if the entry changed since the last poll.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    match self.rx.has_changed() {
      Ok(true) => {
        self.rx.borrow_and_update();
        true
      }
      _ => false,
    }
  }

  /// Wait for the next change to the entry.
  pub async fn changed(&mut self) -> ApiResult<()> {
    self.rx.changed().await.map_err(|_| ApiError::Closed)
  }

  /// Wait until no request is in flight and return the result.
  pub async fn settled(&mut self) -> QueryResult<E::Output> {
    loop {
      self.rx.borrow_and_update();
      let result = self.result();
      if !matches!(result.status, FetchStatus::Idle | FetchStatus::Loading) {
        return result;
      }
      if self.rx.changed().await.is_err() {
        return self.result();
      }
    }
  }

  /// Force a new request, even if one is in flight or data is fresh.
  pub fn refetch(&self) -> bool {
    self.runtime.refetch(&self.key)
  }

  /// Rebind to new arguments. Always fetches for the new arguments unless a
  /// request for them is already in flight.
  pub fn set_args(&mut self, args: E::Args) -> ApiResult<()> {
    let key = CacheKey::new(E::NAME, &args)?;
    if key == self.key {
      self.args = args;
      return Ok(());
    }

    self.runtime.register::<E>(&key, &args);
    let rx = self
      .runtime
      .inner
      .cache
      .subscribe(&key, self.options.refetch_on_focus);
    self
      .runtime
      .release(&self.key, self.options.refetch_on_focus);

    self.key = key;
    self.args = args;
    self.rx = rx;
    self.runtime.ensure_fetch(&self.key);
    Ok(())
  }
}

impl<E: QueryEndpoint> Drop for Subscription<E> {
  fn drop(&mut self) {
    self
      .runtime
      .release(&self.key, self.options.refetch_on_focus);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mount_refetch_policy() {
    let now = Utc::now();
    let old = now - chrono::Duration::minutes(10);

    assert!(!MountRefetch::Never.wants_refetch(Some(old)));
    assert!(MountRefetch::Always.wants_refetch(Some(now)));

    let five_min = MountRefetch::OlderThan(Duration::from_secs(300));
    assert!(five_min.wants_refetch(Some(old)));
    assert!(!five_min.wants_refetch(Some(now)));
    assert!(five_min.wants_refetch(None));
  }

  #[test]
  fn test_result_from_missing_entry() {
    let result = QueryResult::<u32>::from_snapshot(None);
    assert_eq!(result.status, FetchStatus::Idle);
    assert_eq!(result.data(), Err(CacheMiss));
    assert!(!result.is_loading());
  }

  #[test]
  fn test_loading_vs_fetching() {
    let mut result = QueryResult::<u32> {
      status: FetchStatus::Loading,
      data: None,
      error: None,
      is_stale: false,
      fetched_at: None,
    };
    assert!(result.is_loading());
    assert!(result.is_fetching());

    result.data = Some(Arc::new(7));
    assert!(!result.is_loading());
    assert!(result.is_fetching());
    assert_eq!(result.data(), Ok(&7));
  }

  #[test]
  fn test_subscribe_options_follow_defaults() {
    let options = CacheOptions {
      refetch_on_focus: true,
      refetch_on_mount: MountRefetch::Always,
      ..CacheOptions::default()
    };
    let subscribe = SubscribeOptions::from(&options);
    assert!(subscribe.refetch_on_focus);
    assert_eq!(subscribe.refetch_on_mount, MountRefetch::Always);
  }
}
