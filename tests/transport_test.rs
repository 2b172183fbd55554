use accredit::transport::ResponseKind;
use accredit::{ApiError, RawResponse, Request, StaticToken, Transport, TransportError};
use serde_json::json;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_token_is_resolved_per_call() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/ping"))
    .and(header("authorization", "Bearer first"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "who": "first" })))
    .expect(1)
    .mount(&mock_server)
    .await;
  Mock::given(method("GET"))
    .and(path("/ping"))
    .and(header("authorization", "Bearer second"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "who": "second" })))
    .expect(1)
    .mount(&mock_server)
    .await;

  let current = Arc::new(Mutex::new(Some("first".to_string())));
  let provider = {
    let current = current.clone();
    move || current.lock().unwrap().clone()
  };
  let transport = Transport::new(&mock_server.uri(), Arc::new(provider)).unwrap();

  let first = transport.execute(Request::get("/ping")).await.unwrap();
  assert_eq!(first, RawResponse::Json(json!({ "who": "first" })));

  *current.lock().unwrap() = Some("second".to_string());
  let second = transport.execute(Request::get("/ping")).await.unwrap();
  assert_eq!(second, RawResponse::Json(json!({ "who": "second" })));
}

#[tokio::test]
async fn test_no_token_sends_no_authorization() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/public"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
    .mount(&mock_server)
    .await;

  let transport = Transport::new(&mock_server.uri(), Arc::new(StaticToken::none())).unwrap();
  transport.execute(Request::get("/public")).await.unwrap();

  let requests = mock_server.received_requests().await.unwrap();
  assert_eq!(requests.len(), 1);
  assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
  let mock_server = MockServer::start().await;

  Mock::given(method("POST"))
    .and(path("/users"))
    .and(body_json(json!({ "email": "taken@example.org" })))
    .respond_with(ResponseTemplate::new(422).set_body_string("email already registered"))
    .mount(&mock_server)
    .await;

  let transport = Transport::new(&mock_server.uri(), Arc::new(StaticToken::new("t"))).unwrap();
  let request = Request::post("/users")
    .json(&json!({ "email": "taken@example.org" }))
    .unwrap();
  let err = transport.execute(request).await.unwrap_err();

  assert_eq!(err.status(), Some(422));
  match err {
    ApiError::Transport(TransportError::Status { body, .. }) => {
      assert_eq!(body, "email already registered")
    }
    other => panic!("unexpected error: {:?}", other),
  }
}

#[tokio::test]
async fn test_binary_and_empty_bodies() {
  let mock_server = MockServer::start().await;
  let pdf = b"%PDF-1.7 badge".to_vec();

  Mock::given(method("GET"))
    .and(path("/badges/5"))
    .respond_with(
      ResponseTemplate::new(200).set_body_raw(pdf.clone(), "application/pdf"),
    )
    .mount(&mock_server)
    .await;
  Mock::given(method("DELETE"))
    .and(path("/users/5"))
    .respond_with(ResponseTemplate::new(204))
    .mount(&mock_server)
    .await;

  let transport = Transport::new(&mock_server.uri(), Arc::new(StaticToken::new("t"))).unwrap();

  let request = Request::get("/badges/5").blob_response();
  assert_eq!(request.response, ResponseKind::Blob);
  let blob = transport.execute(request).await.unwrap().blob().unwrap();
  assert_eq!(blob.bytes, pdf);
  assert_eq!(blob.content_type.as_deref(), Some("application/pdf"));

  let empty = transport.execute(Request::delete("/users/5")).await.unwrap();
  assert_eq!(empty, RawResponse::Json(serde_json::Value::Null));
}

#[tokio::test]
async fn test_query_parameters_and_base_path() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/v1/applications"))
    .and(query_param("status", "pending"))
    .and(query_param("page", "2"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [], "total": 0 })))
    .expect(1)
    .mount(&mock_server)
    .await;

  let base = format!("{}/v1", mock_server.uri());
  let transport = Transport::new(&base, Arc::new(StaticToken::none())).unwrap();
  let request = Request::get("/applications")
    .query("status", "pending")
    .query("page", 2);
  transport.execute(request).await.unwrap();
}

#[tokio::test]
async fn test_connection_failure_is_network_error() {
  // Nothing listens on the discard port
  let transport = Transport::new("http://127.0.0.1:9", Arc::new(StaticToken::none())).unwrap();
  let err = transport.execute(Request::get("/roles")).await.unwrap_err();
  assert!(matches!(
    err,
    ApiError::Transport(TransportError::Network(_))
  ));
}

#[tokio::test]
async fn test_unreadable_error_body_keeps_the_status() {
  use tokio::io::{AsyncReadExt, AsyncWriteExt};

  // Promises 100 bytes of body, sends 5, then hangs up
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let base = format!("http://{}", listener.local_addr().unwrap());
  tokio::spawn(async move {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = [0u8; 1024];
    let _ = socket.read(&mut buf).await;
    socket
      .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 100\r\n\r\nshort")
      .await
      .unwrap();
    socket.shutdown().await.unwrap();
  });

  let transport = Transport::new(&base, Arc::new(StaticToken::none())).unwrap();
  let err = transport.execute(Request::get("/roles")).await.unwrap_err();
  assert_eq!(err.status(), Some(503));
  match err {
    ApiError::Transport(TransportError::Status { body, .. }) => assert!(body.is_empty()),
    other => panic!("unexpected error: {:?}", other),
  }
}
