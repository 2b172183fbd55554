//! The cache context: one constructible object owning the cache and runtimes.

use std::sync::Arc;

use crate::cache::{EntityCache, Tag};
use crate::endpoint::{MutationEndpoint, QueryEndpoint};
use crate::error::ApiResult;
use crate::mutation::MutationRuntime;
use crate::query::{CacheOptions, QueryResult, QueryRuntime, SubscribeOptions, Subscription};
use crate::transport::Transport;

/// Entry point of the access layer.
///
/// Create one at startup and pass it (or clones of it) to consumers; call
/// [`teardown`](Self::teardown) on logout. Clones share all state.
#[derive(Clone)]
pub struct ApiContext {
  queries: QueryRuntime,
  mutations: MutationRuntime,
}

impl ApiContext {
  pub fn new(transport: Transport, options: CacheOptions) -> Self {
    let queries = QueryRuntime::new(transport, Arc::new(EntityCache::new()), options);
    let mutations = MutationRuntime::new(queries.clone());
    Self { queries, mutations }
  }

  pub fn queries(&self) -> &QueryRuntime {
    &self.queries
  }

  pub fn mutations(&self) -> &MutationRuntime {
    &self.mutations
  }

  pub fn cache(&self) -> &Arc<EntityCache> {
    self.queries.cache()
  }

  pub fn transport(&self) -> &Transport {
    self.queries.transport()
  }

  pub fn subscribe<E: QueryEndpoint>(&self, args: E::Args) -> ApiResult<Subscription<E>> {
    self.queries.subscribe::<E>(args)
  }

  pub fn subscribe_with<E: QueryEndpoint>(
    &self,
    args: E::Args,
    options: SubscribeOptions,
  ) -> ApiResult<Subscription<E>> {
    self.queries.subscribe_with::<E>(args, options)
  }

  pub async fn fetch<E: QueryEndpoint>(&self, args: E::Args) -> ApiResult<Arc<E::Output>> {
    self.queries.fetch::<E>(args).await
  }

  pub fn select<E: QueryEndpoint>(&self, args: &E::Args) -> ApiResult<QueryResult<E::Output>> {
    self.queries.select::<E>(args)
  }

  pub async fn mutate<M: MutationEndpoint>(&self, args: M::Args) -> ApiResult<M::Output> {
    self.mutations.mutate::<M>(args).await
  }

  pub fn invalidate(&self, tags: &[Tag]) -> usize {
    self.queries.invalidate(tags)
  }

  pub fn notify_focus(&self) -> usize {
    self.queries.notify_focus()
  }

  pub fn teardown(&self) {
    self.queries.teardown();
  }
}
