#![allow(dead_code)]

use accredit::query::{QueryResult, Subscription};
use accredit::{ApiContext, CacheOptions, QueryEndpoint, StaticToken, Transport};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

pub const TOKEN: &str = "test-token";

pub fn context(server: &MockServer) -> ApiContext {
  context_with(server, CacheOptions::default())
}

pub fn context_with(server: &MockServer, options: CacheOptions) -> ApiContext {
  let transport = Transport::new(&server.uri(), Arc::new(StaticToken::new(TOKEN))).unwrap();
  ApiContext::new(transport, options)
}

/// Wait (bounded) until the subscription's result satisfies `done`.
pub async fn wait_for<E, F>(subscription: &mut Subscription<E>, done: F) -> QueryResult<E::Output>
where
  E: QueryEndpoint,
  F: Fn(&QueryResult<E::Output>) -> bool,
{
  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      let result = subscription.result();
      if done(&result) {
        return result;
      }
      subscription.changed().await.unwrap();
    }
  })
  .await
  .expect("subscription did not reach the expected state")
}

/// Wait (bounded) until the server has seen `count` requests.
pub async fn wait_for_requests(server: &MockServer, count: usize) {
  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      let seen = server.received_requests().await.unwrap_or_default().len();
      if seen >= count {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("server did not receive the expected requests")
}

pub async fn requests_to(server: &MockServer, method: &str, path: &str) -> usize {
  server
    .received_requests()
    .await
    .unwrap_or_default()
    .iter()
    .filter(|r| r.method.as_str() == method && r.url.path() == path)
    .count()
}

pub fn users(count: usize) -> Value {
  let data: Vec<Value> = (1..=count)
    .map(|i| {
      json!({
        "id": i.to_string(),
        "fullName": format!("User {}", i),
        "email": format!("user{}@example.org", i),
      })
    })
    .collect();
  json!({ "data": data, "total": count })
}

pub fn roles(names: &[&str]) -> Value {
  Value::Array(
    names
      .iter()
      .enumerate()
      .map(|(i, name)| json!({ "id": (i + 1).to_string(), "name": name }))
      .collect(),
  )
}
