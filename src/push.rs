//! Out-of-band entity-change notifications.
//!
//! The server pushes small JSON frames such as
//! `{"type": "application:created", "id": 42}`. A [`PushRouter`] maps each
//! event to cache tags and the listener invalidates them, which refetches
//! every mounted subscription carrying those tags.

use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt::Display;
use tracing::{debug, info, warn};

use crate::cache::Tag;
use crate::error::{ApiError, ApiResult, TransportError};
use crate::query::QueryRuntime;
use crate::transport::{error_body, Transport};

/// One decoded push notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushEvent {
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default, deserialize_with = "id_as_string")]
  pub id: Option<String>,
  #[serde(default)]
  pub payload: Value,
}

impl PushEvent {
  pub fn new(kind: impl Into<String>, id: Option<&str>) -> Self {
    Self {
      kind: kind.into(),
      id: id.map(String::from),
      payload: Value::Null,
    }
  }

  pub fn from_frame(frame: &str) -> ApiResult<Self> {
    serde_json::from_str(frame).map_err(ApiError::decode)
  }
}

// Ids arrive as numbers or strings depending on the emitter
fn id_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Option::<Value>::deserialize(deserializer)? {
    Some(Value::String(s)) => Some(s),
    Some(Value::Number(n)) => Some(n.to_string()),
    _ => None,
  })
}

/// Maps push events to the cache tags they make stale.
pub trait PushRouter: Send + Sync {
  fn tags_for(&self, event: &PushEvent) -> Vec<Tag>;
}

impl<F> PushRouter for F
where
  F: Fn(&PushEvent) -> Vec<Tag> + Send + Sync,
{
  fn tags_for(&self, event: &PushEvent) -> Vec<Tag> {
    self(event)
  }
}

/// Applies push events to a query runtime.
pub struct PushListener<R> {
  queries: QueryRuntime,
  router: R,
}

impl<R: PushRouter> PushListener<R> {
  pub fn new(queries: QueryRuntime, router: R) -> Self {
    Self { queries, router }
  }

  /// Invalidate the tags for `event`. Returns the number of refetches started.
  pub fn handle(&self, event: &PushEvent) -> usize {
    let tags = self.router.tags_for(event);
    if tags.is_empty() {
      debug!(kind = %event.kind, "push event has no cache impact");
      return 0;
    }
    let refetched = self.queries.invalidate(&tags);
    info!(kind = %event.kind, id = ?event.id, refetched, "applied push event");
    refetched
  }

  pub fn handle_frame(&self, frame: &str) -> ApiResult<usize> {
    let event = PushEvent::from_frame(frame)?;
    Ok(self.handle(&event))
  }

  /// Consume frames until the stream ends. Bad frames are logged and skipped.
  ///
  /// Returns the number of events applied.
  pub async fn run<S, E>(&self, mut frames: S) -> usize
  where
    S: Stream<Item = Result<String, E>> + Unpin,
    E: Display,
  {
    let mut applied = 0;
    while let Some(frame) = frames.next().await {
      match frame {
        Ok(frame) => match self.handle_frame(&frame) {
          Ok(_) => applied += 1,
          Err(e) => warn!(error = %e, "skipping malformed push frame"),
        },
        Err(e) => warn!(error = %e, "push channel error"),
      }
    }
    info!(applied, "push channel closed");
    applied
  }
}

/// Open a server-sent-events channel and yield each event's data field.
///
/// `path` is resolved against the transport's base URL (absolute URLs are
/// used as-is) and authenticated with the transport's current token.
pub async fn sse_frames(
  transport: &Transport,
  path: &str,
) -> ApiResult<BoxStream<'static, ApiResult<String>>> {
  let url = transport.url_for(path)?;
  let mut builder = transport
    .http()
    .get(url)
    .header(reqwest::header::ACCEPT, "text/event-stream");
  if let Some(token) = transport.current_token() {
    builder = builder.bearer_auth(token);
  }

  let response = builder.send().await.map_err(TransportError::from)?;
  let status = response.status();
  if !status.is_success() {
    let body = error_body(response, path).await;
    return Err(
      TransportError::Status {
        status: status.as_u16(),
        body,
      }
      .into(),
    );
  }

  let frames = response
    .bytes_stream()
    .eventsource()
    .filter_map(|event| async move {
      match event {
        Ok(event) if event.data.trim().is_empty() => None,
        Ok(event) => Some(Ok(event.data)),
        Err(e) => Some(Err(ApiError::Transport(TransportError::Network(
          e.to_string(),
        )))),
      }
    });
  Ok(frames.boxed())
}
