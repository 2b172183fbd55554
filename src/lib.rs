//! Client-side API access layer for a press-accreditation workflow.
//!
//! Typed endpoint descriptors are executed over HTTP with per-call bearer
//! authentication. Query results live in a tag-indexed cache shared by every
//! subscriber; mutations patch it optimistically and invalidate the tags they
//! declare, which refetches the affected queries.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod mutation;
pub mod push;
pub mod query;
pub mod session;
pub mod transport;

pub use cache::{CacheKey, EntityCache, FetchStatus, Tag};
pub use context::ApiContext;
pub use credentials::{CredentialProvider, SessionCredentials, StaticToken};
pub use endpoint::{MutationEndpoint, OptimisticUpdates, QueryEndpoint};
pub use error::{ApiError, ApiResult, CacheMiss, TransportError, ValidationError};
pub use query::{CacheOptions, MountRefetch, QueryResult, SubscribeOptions, Subscription};
pub use transport::{Blob, RawResponse, Request, Transport};
