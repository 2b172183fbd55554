//! Normalized, tag-indexed cache of server-fetched results.
//!
//! This module provides:
//! - Entries keyed by (endpoint name, serialized arguments)
//! - Tag-based invalidation with stale-while-revalidate semantics
//! - Optimistic patches recorded as snapshots, undone on failure
//! - Per-entry request sequencing so late responses never overwrite fresh data

mod key;
mod store;
mod tag;

pub use key::CacheKey;
pub(crate) use store::FetchOutcome;
pub use store::{
  CachedValue, CommitOutcome, EntityCache, EntrySnapshot, FetchStatus, PatchToken, UndoOutcome,
};
pub use tag::{Tag, LIST_ID};
