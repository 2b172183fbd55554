//! HTTP transport: turns a resolved [`Request`] into a call and a raw payload.
//!
//! The transport holds no state beyond its HTTP client, base URL and credential
//! provider. It does not cache and does not retry.

use reqwest::{multipart, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::credentials::CredentialProvider;
use crate::error::{ApiError, ApiResult, TransportError};

/// How the response body should be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseKind {
  #[default]
  Json,
  Blob,
}

/// One part of a multipart form body.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
  Text {
    name: String,
    value: String,
  },
  File {
    name: String,
    file_name: String,
    mime: String,
    bytes: Vec<u8>,
  },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
  #[default]
  Empty,
  Json(Value),
  Form(Vec<FormPart>),
}

/// A fully resolved request, relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: RequestBody,
  pub response: ResponseKind,
  /// Per-call timeout. There is no default.
  pub timeout: Option<Duration>,
}

impl Request {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: RequestBody::Empty,
      response: ResponseKind::Json,
      timeout: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::POST, path)
  }

  pub fn put(path: impl Into<String>) -> Self {
    Self::new(Method::PUT, path)
  }

  pub fn patch(path: impl Into<String>) -> Self {
    Self::new(Method::PATCH, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  pub fn query(mut self, key: &str, value: impl ToString) -> Self {
    self.query.push((key.to_string(), value.to_string()));
    self
  }

  /// Serialize `body` as the JSON request body.
  pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> ApiResult<Self> {
    self.body = RequestBody::Json(serde_json::to_value(body).map_err(ApiError::encode)?);
    Ok(self)
  }

  pub fn form(mut self, parts: Vec<FormPart>) -> Self {
    self.body = RequestBody::Form(parts);
    self
  }

  pub fn blob_response(mut self) -> Self {
    self.response = ResponseKind::Blob;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// Binary response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
  pub content_type: Option<String>,
  pub bytes: Vec<u8>,
}

/// Untransformed response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
  Json(Value),
  Blob(Blob),
}

impl RawResponse {
  /// Deserialize a JSON payload into `T`.
  pub fn json<T: DeserializeOwned>(self) -> ApiResult<T> {
    match self {
      RawResponse::Json(value) => serde_json::from_value(value).map_err(ApiError::decode),
      RawResponse::Blob(_) => Err(ApiError::Decode(
        "expected a JSON body, got binary".to_string(),
      )),
    }
  }

  pub fn blob(self) -> ApiResult<Blob> {
    match self {
      RawResponse::Blob(blob) => Ok(blob),
      RawResponse::Json(_) => Err(ApiError::Decode(
        "expected a binary body, got JSON".to_string(),
      )),
    }
  }
}

/// Executes requests against a base URL with per-call bearer authentication.
#[derive(Clone)]
pub struct Transport {
  http: reqwest::Client,
  base_url: Url,
  credentials: Arc<dyn CredentialProvider>,
}

impl Transport {
  pub fn new(base_url: &str, credentials: Arc<dyn CredentialProvider>) -> ApiResult<Self> {
    Self::with_client(reqwest::Client::new(), base_url, credentials)
  }

  pub fn with_client(
    http: reqwest::Client,
    base_url: &str,
    credentials: Arc<dyn CredentialProvider>,
  ) -> ApiResult<Self> {
    // Url::join drops the last segment unless the base ends with a slash
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url = Url::parse(&normalized)
      .map_err(|e| ApiError::Config(format!("invalid base url {}: {}", base_url, e)))?;

    Ok(Self {
      http,
      base_url,
      credentials,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Resolve `path` against the base URL.
  pub fn url_for(&self, path: &str) -> ApiResult<Url> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ApiError::Config(format!("invalid path {}: {}", path, e)))
  }

  /// Current bearer token, resolved now.
  pub fn current_token(&self) -> Option<String> {
    self.credentials.token()
  }

  pub(crate) fn http(&self) -> &reqwest::Client {
    &self.http
  }

  /// Send `request` and return the raw payload of a 2xx response.
  pub async fn execute(&self, request: Request) -> ApiResult<RawResponse> {
    let url = self.url_for(&request.path)?;
    let mut builder = self.http.request(request.method.clone(), url);

    if !request.query.is_empty() {
      builder = builder.query(&request.query);
    }
    if let Some(token) = self.credentials.token() {
      builder = builder.bearer_auth(token);
    }
    if let Some(timeout) = request.timeout {
      builder = builder.timeout(timeout);
    }
    builder = match request.body {
      RequestBody::Empty => builder,
      RequestBody::Json(body) => builder.json(&body),
      RequestBody::Form(parts) => builder.multipart(build_form(parts)?),
    };

    debug!(method = %request.method, path = %request.path, "sending request");

    let response = builder.send().await.map_err(TransportError::from)?;
    let status = response.status();

    if !status.is_success() {
      let body = error_body(response, &request.path).await;
      warn!(
        method = %request.method,
        path = %request.path,
        status = status.as_u16(),
        "request failed"
      );
      return Err(
        TransportError::Status {
          status: status.as_u16(),
          body,
        }
        .into(),
      );
    }

    match request.response {
      ResponseKind::Json => {
        let bytes = response.bytes().await.map_err(TransportError::from)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
          return Ok(RawResponse::Json(Value::Null));
        }
        let value = serde_json::from_slice(&bytes).map_err(ApiError::decode)?;
        Ok(RawResponse::Json(value))
      }
      ResponseKind::Blob => {
        let content_type = response
          .headers()
          .get(reqwest::header::CONTENT_TYPE)
          .and_then(|v| v.to_str().ok())
          .map(String::from);
        let bytes = response.bytes().await.map_err(TransportError::from)?;
        Ok(RawResponse::Blob(Blob {
          content_type,
          bytes: bytes.to_vec(),
        }))
      }
    }
  }
}

fn build_form(parts: Vec<FormPart>) -> ApiResult<multipart::Form> {
  let mut form = multipart::Form::new();
  for part in parts {
    form = match part {
      FormPart::Text { name, value } => form.text(name, value),
      FormPart::File {
        name,
        file_name,
        mime,
        bytes,
      } => {
        let part = multipart::Part::bytes(bytes)
          .file_name(file_name)
          .mime_str(&mime)
          .map_err(|e| ApiError::Encode(format!("invalid mime type {}: {}", mime, e)))?;
        form.part(name, part)
      }
    };
  }
  Ok(form)
}

/// Body of a non-success response, for the error. A body that cannot be
/// read is logged and reported as empty.
pub(crate) async fn error_body(response: reqwest::Response, path: &str) -> String {
  let status = response.status().as_u16();
  match response.text().await {
    Ok(body) => body,
    Err(e) => {
      warn!(path, status, error = %e, "failed to read error response body");
      String::new()
    }
  }
}
