//! Tag-indexed in-memory entity cache.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::key::CacheKey;
use super::tag::Tag;
use crate::error::ApiError;

/// A cached, type-erased query result.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Result of one fetch: the value and the tags it provides, or the error and
/// the tags the entry provides anyway.
pub(crate) type FetchOutcome = Result<(CachedValue, Vec<Tag>), (ApiError, Vec<Tag>)>;

/// Fetch status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
  Idle,
  Loading,
  Success,
  Error,
}

/// Handle for undoing an optimistic patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchToken(u64);

/// What happened when a patch was undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
  /// The pre-patch value is back in place.
  Restored,
  /// The entry changed after the patch; it was marked stale instead.
  Superseded(CacheKey),
  /// The token or the entry no longer exists.
  Missing,
}

/// What happened to a finished fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
  Committed,
  /// A newer request for the same entry was issued; this result was dropped.
  Superseded,
  /// The entry was evicted or the cache cleared.
  Discarded,
}

struct CacheEntry {
  data: Option<CachedValue>,
  status: FetchStatus,
  error: Option<ApiError>,
  tags: BTreeSet<Tag>,
  subscribers: usize,
  focus_subscribers: usize,
  fetched_at: Option<DateTime<Utc>>,
  stale: bool,
  /// Sequence number of the most recently issued request, 0 if none.
  seq: u64,
  released_at: Option<Instant>,
  version: watch::Sender<u64>,
}

impl CacheEntry {
  fn new() -> Self {
    let (version, _) = watch::channel(0);
    Self {
      data: None,
      status: FetchStatus::Idle,
      error: None,
      tags: BTreeSet::new(),
      subscribers: 0,
      focus_subscribers: 0,
      fetched_at: None,
      stale: false,
      seq: 0,
      released_at: Some(Instant::now()),
      version,
    }
  }

  fn notify(&self) {
    self.version.send_modify(|v| *v = v.wrapping_add(1));
  }

  fn snapshot(&self) -> EntrySnapshot {
    EntrySnapshot {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      tags: self.tags.iter().cloned().collect(),
      subscribers: self.subscribers,
      fetched_at: self.fetched_at,
      stale: self.stale,
    }
  }
}

/// Point-in-time view of a cache entry.
#[derive(Clone)]
pub struct EntrySnapshot {
  pub data: Option<CachedValue>,
  pub status: FetchStatus,
  /// Last failure; kept until the next successful fetch.
  pub error: Option<ApiError>,
  pub tags: Vec<Tag>,
  pub subscribers: usize,
  pub fetched_at: Option<DateTime<Utc>>,
  pub stale: bool,
}

impl EntrySnapshot {
  /// The cached value as `T`, if present and of that type.
  pub fn data_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.data.clone()?.downcast::<T>().ok()
  }
}

impl fmt::Debug for EntrySnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntrySnapshot")
      .field("has_data", &self.data.is_some())
      .field("status", &self.status)
      .field("error", &self.error)
      .field("tags", &self.tags)
      .field("subscribers", &self.subscribers)
      .field("fetched_at", &self.fetched_at)
      .field("stale", &self.stale)
      .finish()
  }
}

struct PatchRecord {
  key: CacheKey,
  snapshot: CachedValue,
  patched: CachedValue,
}

#[derive(Default)]
struct CacheInner {
  entries: HashMap<CacheKey, CacheEntry>,
  by_tag: HashMap<Tag, HashSet<CacheKey>>,
  by_kind: HashMap<String, HashSet<CacheKey>>,
  patches: HashMap<PatchToken, PatchRecord>,
  next_patch: u64,
  /// Request sequence, shared by all entries and never reset, so a request
  /// issued before an entry was dropped cannot match its replacement.
  next_seq: u64,
}

impl CacheInner {
  fn issue_seq(&mut self) -> u64 {
    self.next_seq += 1;
    self.next_seq
  }

  fn entry(&mut self, key: &CacheKey) -> &mut CacheEntry {
    self
      .entries
      .entry(key.clone())
      .or_insert_with(CacheEntry::new)
  }

  fn set_tags(&mut self, key: &CacheKey, tags: impl IntoIterator<Item = Tag>) {
    let new: BTreeSet<Tag> = tags.into_iter().collect();
    let old = match self.entries.get_mut(key) {
      Some(entry) => std::mem::replace(&mut entry.tags, new.clone()),
      None => return,
    };
    self.unindex(key, &old);
    for tag in new {
      self
        .by_kind
        .entry(tag.kind().to_string())
        .or_default()
        .insert(key.clone());
      self.by_tag.entry(tag).or_default().insert(key.clone());
    }
  }

  fn unindex(&mut self, key: &CacheKey, tags: &BTreeSet<Tag>) {
    for tag in tags {
      if let Some(keys) = self.by_tag.get_mut(tag) {
        keys.remove(key);
        if keys.is_empty() {
          self.by_tag.remove(tag);
        }
      }
      if let Some(keys) = self.by_kind.get_mut(tag.kind()) {
        keys.remove(key);
        if keys.is_empty() {
          self.by_kind.remove(tag.kind());
        }
      }
    }
  }

  fn matching(&self, tags: &[Tag]) -> HashSet<CacheKey> {
    let mut keys = HashSet::new();
    for tag in tags {
      let hits = if tag.is_kind_wide() {
        self.by_kind.get(tag.kind())
      } else {
        self.by_tag.get(tag)
      };
      if let Some(hits) = hits {
        keys.extend(hits.iter().cloned());
      }
    }
    keys
  }

  fn remove(&mut self, key: &CacheKey) {
    if let Some(entry) = self.entries.remove(key) {
      self.unindex(key, &entry.tags);
    }
  }
}

/// Process-wide store of query results keyed by (endpoint, arguments).
///
/// All operations are synchronous and take one short critical section, so
/// they are atomic with respect to each other.
#[derive(Default)]
pub struct EntityCache {
  inner: Mutex<CacheInner>,
}

impl EntityCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, CacheInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn get(&self, key: &CacheKey) -> Option<EntrySnapshot> {
    self.lock().entries.get(key).map(CacheEntry::snapshot)
  }

  pub fn get_data<T: Any + Send + Sync>(&self, key: &CacheKey) -> Option<Arc<T>> {
    self.get(key)?.data_as::<T>()
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    self.lock().entries.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn subscribers(&self, key: &CacheKey) -> usize {
    self
      .lock()
      .entries
      .get(key)
      .map(|e| e.subscribers)
      .unwrap_or(0)
  }

  /// Keys of every entry currently associated with `tag`.
  pub fn keys_for_tag(&self, tag: &Tag) -> Vec<CacheKey> {
    self
      .lock()
      .matching(std::slice::from_ref(tag))
      .into_iter()
      .collect()
  }

  /// Create or overwrite an entry with a successful result.
  pub fn put(&self, key: &CacheKey, value: CachedValue, tags: impl IntoIterator<Item = Tag>) {
    let mut inner = self.lock();
    let entry = inner.entry(key);
    entry.data = Some(value);
    if entry.status != FetchStatus::Loading {
      entry.status = FetchStatus::Success;
    }
    entry.error = None;
    entry.stale = false;
    entry.fetched_at = Some(Utc::now());
    entry.notify();
    inner.set_tags(key, tags);
  }

  /// Mark every entry whose tags intersect `tags` as stale.
  ///
  /// Data stays in place (stale-while-revalidate). Returns the keys that have
  /// active subscriptions and therefore need a refetch.
  pub fn invalidate(&self, tags: &[Tag]) -> Vec<CacheKey> {
    let mut inner = self.lock();
    let matched = inner.matching(tags);
    let mut active = Vec::new();

    for key in &matched {
      if let Some(entry) = inner.entries.get_mut(key) {
        entry.stale = true;
        entry.notify();
        if entry.subscribers > 0 {
          active.push(key.clone());
        }
      }
    }

    debug!(
      tags = ?tags.iter().map(ToString::to_string).collect::<Vec<_>>(),
      matched = matched.len(),
      active = active.len(),
      "invalidated cache entries"
    );
    active
  }

  /// Mark a single entry stale. Returns true if it has subscribers.
  pub fn mark_stale(&self, key: &CacheKey) -> bool {
    let mut inner = self.lock();
    match inner.entries.get_mut(key) {
      Some(entry) => {
        entry.stale = true;
        entry.notify();
        entry.subscribers > 0
      }
      None => false,
    }
  }

  /// Apply `recipe` to a copy of the cached value and swap it in.
  ///
  /// Returns `None` when the entry holds no data of type `T`.
  pub fn apply_patch<T, F>(&self, key: &CacheKey, recipe: F) -> Option<PatchToken>
  where
    T: Any + Clone + Send + Sync,
    F: FnOnce(&mut T),
  {
    let mut inner = self.lock();

    let (snapshot, patched) = {
      let entry = inner.entries.get_mut(key)?;
      let current = entry.data.clone()?;
      let Some(typed) = (*current).downcast_ref::<T>() else {
        warn!(key = %key, "optimistic patch type does not match cached value");
        return None;
      };
      let mut draft = typed.clone();
      recipe(&mut draft);
      let patched: CachedValue = Arc::new(draft);
      entry.data = Some(patched.clone());
      entry.notify();
      (current, patched)
    };

    inner.next_patch += 1;
    let token = PatchToken(inner.next_patch);
    inner.patches.insert(
      token,
      PatchRecord {
        key: key.clone(),
        snapshot,
        patched,
      },
    );
    debug!(key = %key, ?token, "applied optimistic patch");
    Some(token)
  }

  /// Keep a patch; the undo snapshot is dropped.
  pub fn commit_patch(&self, token: PatchToken) {
    self.lock().patches.remove(&token);
  }

  /// Put back the value a patch replaced.
  pub fn undo_patch(&self, token: PatchToken) -> UndoOutcome {
    let mut inner = self.lock();
    let Some(record) = inner.patches.remove(&token) else {
      return UndoOutcome::Missing;
    };
    let Some(entry) = inner.entries.get_mut(&record.key) else {
      return UndoOutcome::Missing;
    };

    match &entry.data {
      Some(current) if Arc::ptr_eq(current, &record.patched) => {
        entry.data = Some(record.snapshot);
        entry.notify();
        debug!(key = %record.key, ?token, "rolled back optimistic patch");
        UndoOutcome::Restored
      }
      _ => {
        entry.stale = true;
        entry.notify();
        warn!(key = %record.key, ?token, "entry changed after patch, marking stale");
        UndoOutcome::Superseded(record.key)
      }
    }
  }

  pub(crate) fn subscribe(&self, key: &CacheKey, on_focus: bool) -> watch::Receiver<u64> {
    let mut inner = self.lock();
    let entry = inner.entry(key);
    entry.subscribers += 1;
    if on_focus {
      entry.focus_subscribers += 1;
    }
    entry.released_at = None;
    entry.version.subscribe()
  }

  /// Drop one subscription. Returns the remaining subscriber count.
  pub(crate) fn unsubscribe(&self, key: &CacheKey, on_focus: bool) -> usize {
    let mut inner = self.lock();
    let Some(entry) = inner.entries.get_mut(key) else {
      return 0;
    };
    entry.subscribers = entry.subscribers.saturating_sub(1);
    if on_focus {
      entry.focus_subscribers = entry.focus_subscribers.saturating_sub(1);
    }
    if entry.subscribers == 0 {
      entry.released_at = Some(Instant::now());
    }
    entry.subscribers
  }

  /// Keys with at least one focus-refetching subscription.
  pub(crate) fn focus_keys(&self) -> Vec<CacheKey> {
    self
      .lock()
      .entries
      .iter()
      .filter(|(_, e)| e.focus_subscribers > 0)
      .map(|(k, _)| k.clone())
      .collect()
  }

  /// Start a request for `key`. Returns its sequence number.
  pub(crate) fn begin_fetch(&self, key: &CacheKey) -> u64 {
    let mut inner = self.lock();
    let seq = inner.issue_seq();
    let entry = inner.entry(key);
    entry.seq = seq;
    entry.status = FetchStatus::Loading;
    entry.notify();
    seq
  }

  /// Like [`begin_fetch`](Self::begin_fetch), unless a request is already in
  /// flight for `key`.
  pub(crate) fn try_begin_fetch(&self, key: &CacheKey) -> Option<u64> {
    let mut inner = self.lock();
    if inner.entries.get(key).map(|e| e.status) == Some(FetchStatus::Loading) {
      return None;
    }
    let seq = inner.issue_seq();
    let entry = inner.entry(key);
    entry.seq = seq;
    entry.status = FetchStatus::Loading;
    entry.notify();
    Some(seq)
  }

  /// Commit a finished request if it is still the latest one for `key`.
  pub(crate) fn complete_fetch(
    &self,
    key: &CacheKey,
    seq: u64,
    outcome: FetchOutcome,
  ) -> CommitOutcome {
    let mut inner = self.lock();
    let Some(entry) = inner.entries.get_mut(key) else {
      return CommitOutcome::Discarded;
    };
    if entry.seq != seq {
      debug!(key = %key, seq, latest = entry.seq, "discarding superseded response");
      return CommitOutcome::Superseded;
    }

    let tags = match outcome {
      Ok((value, tags)) => {
        entry.data = Some(value);
        entry.status = FetchStatus::Success;
        entry.error = None;
        entry.stale = false;
        entry.fetched_at = Some(Utc::now());
        tags
      }
      Err((error, tags)) => {
        entry.status = FetchStatus::Error;
        entry.error = Some(error);
        tags
      }
    };
    entry.notify();
    inner.set_tags(key, tags);
    CommitOutcome::Committed
  }

  /// Evict `key` if nobody has subscribed to it for at least `grace` and no
  /// request is in flight.
  pub fn evict_if_unused(&self, key: &CacheKey, grace: Duration) -> bool {
    let mut inner = self.lock();
    let evictable = inner.entries.get(key).is_some_and(|e| is_evictable(e, grace));
    if evictable {
      inner.remove(key);
      debug!(key = %key, "evicted unused cache entry");
    }
    evictable
  }

  /// Evict every unused entry past its grace period. Returns the evicted keys.
  pub fn collect_garbage(&self, grace: Duration) -> Vec<CacheKey> {
    let mut inner = self.lock();
    let expired: Vec<CacheKey> = inner
      .entries
      .iter()
      .filter(|(_, e)| is_evictable(e, grace))
      .map(|(k, _)| k.clone())
      .collect();
    for key in &expired {
      inner.remove(key);
    }
    expired
  }

  /// Drop every entry and pending patch.
  ///
  /// Sequence and patch counters survive, so requests and patches issued
  /// before the clear never match anything created after it.
  pub fn clear(&self) {
    let mut inner = self.lock();
    let count = inner.entries.len();
    *inner = CacheInner {
      next_patch: inner.next_patch,
      next_seq: inner.next_seq,
      ..CacheInner::default()
    };
    debug!(entries = count, "cleared entity cache");
  }
}

fn is_evictable(entry: &CacheEntry, grace: Duration) -> bool {
  entry.subscribers == 0
    && entry.status != FetchStatus::Loading
    && entry.released_at.is_some_and(|t| t.elapsed() >= grace)
}
