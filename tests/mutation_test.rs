mod common;

use accredit::api::mutations::{CreateUser, ReviewApplication, SetPermission};
use accredit::api::queries::{GetApplication, GetRolePermissions, GetUsers};
use accredit::api::types::{
  ApplicationStatus, Decision, NewUser, PageRequest, PermissionChange, Review,
};
use accredit::ApiError;
use common::{context, requests_to, users, wait_for, wait_for_requests};
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn permissions(p1: bool, p2: bool) -> serde_json::Value {
  json!([
    { "id": "p1", "name": "review_applications", "granted": p1 },
    { "id": "p2", "name": "manage_users", "granted": p2 }
  ])
}

fn grant_p1() -> PermissionChange {
  PermissionChange {
    role_id: "1".to_string(),
    permission_id: "p1".to_string(),
    granted: true,
  }
}

fn approve(id: &str) -> Review {
  Review {
    application_id: id.to_string(),
    decision: Decision::Approve,
    reason: None,
  }
}

fn jane() -> NewUser {
  NewUser {
    full_name: "Jane".to_string(),
    email: "jane@x.com".to_string(),
    password: "s3cretpass".to_string(),
    role_id: "2".to_string(),
  }
}

#[tokio::test]
async fn test_create_user_refreshes_every_list_subscriber_once() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/users"))
    .respond_with(ResponseTemplate::new(200).set_body_json(users(10)))
    .up_to_n_times(1)
    .mount(&mock_server)
    .await;
  Mock::given(method("GET"))
    .and(path("/users"))
    .respond_with(ResponseTemplate::new(200).set_body_json(users(11)))
    .mount(&mock_server)
    .await;
  Mock::given(method("POST"))
    .and(path("/users"))
    .and(body_partial_json(json!({ "fullName": "Jane", "email": "jane@x.com" })))
    .respond_with(ResponseTemplate::new(201).set_body_json(json!({
      "id": "11",
      "fullName": "Jane",
      "email": "jane@x.com",
      "roleId": "2"
    })))
    .expect(1)
    .mount(&mock_server)
    .await;

  let ctx = context(&mock_server);
  let mut table = ctx.subscribe::<GetUsers>(PageRequest::default()).unwrap();
  let mut counter = ctx.subscribe::<GetUsers>(PageRequest::default()).unwrap();
  assert_eq!(table.settled().await.data().unwrap().data.len(), 10);

  let created = ctx.mutate::<CreateUser>(jane()).await.unwrap();
  assert_eq!(created.id, "11");

  let table_now = wait_for(&mut table, |r| r.data().is_ok_and(|p| p.data.len() == 11)).await;
  let counter_now = wait_for(&mut counter, |r| r.data().is_ok_and(|p| p.data.len() == 11)).await;
  assert_eq!(table_now.data().unwrap().total, 11);
  assert_eq!(counter_now.data().unwrap().total, 11);

  tokio::time::sleep(Duration::from_millis(100)).await;
  assert_eq!(requests_to(&mock_server, "GET", "/users").await, 2);
}

#[tokio::test]
async fn test_invalid_input_never_reaches_the_server() {
  let mock_server = MockServer::start().await;

  Mock::given(method("POST"))
    .and(path("/users"))
    .respond_with(ResponseTemplate::new(201))
    .expect(0)
    .mount(&mock_server)
    .await;

  let ctx = context(&mock_server);
  let bad = NewUser {
    email: "jane".to_string(),
    password: "short".to_string(),
    ..jane()
  };
  match ctx.mutate::<CreateUser>(bad).await {
    Err(ApiError::Validation(err)) => {
      assert!(err.message_for("email").is_some());
      assert!(err.message_for("password").is_some());
    }
    other => panic!("expected validation error, got {:?}", other.map(|u| u.id)),
  }
  assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_permission_grant_rolls_back() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/roles/1/permissions"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([
      { "id": "p1", "name": "review_applications", "granted": false },
      { "id": "p2", "name": "manage_users", "granted": true }
    ])))
    .expect(1)
    .mount(&mock_server)
    .await;
  Mock::given(method("PUT"))
    .and(path("/roles/1/permissions/p1"))
    .respond_with(
      ResponseTemplate::new(500)
        .set_body_string("boom")
        .set_delay(Duration::from_millis(200)),
    )
    .expect(1)
    .mount(&mock_server)
    .await;

  let ctx = context(&mock_server);
  let mut permissions = ctx
    .subscribe::<GetRolePermissions>("1".to_string())
    .unwrap();
  let before = permissions.settled().await;
  let original = before.data.clone().unwrap();
  assert!(!original[0].granted);

  let mutation = {
    let ctx = ctx.clone();
    tokio::spawn(async move {
      ctx
        .mutate::<SetPermission>(PermissionChange {
          role_id: "1".to_string(),
          permission_id: "p1".to_string(),
          granted: true,
        })
        .await
    })
  };

  let patched = wait_for(&mut permissions, |r| {
    r.data().is_ok_and(|p| p[0].granted)
  })
  .await;
  assert!(patched.data().unwrap()[1].granted);

  let err = mutation.await.unwrap().unwrap_err();
  assert_eq!(err.status(), Some(500));

  let restored = ctx
    .select::<GetRolePermissions>(&"1".to_string())
    .unwrap();
  assert!(!restored.data().unwrap()[0].granted);
  assert_eq!(restored.data().unwrap(), original.as_ref());
  // Rollback restores without a refetch
  assert_eq!(requests_to(&mock_server, "GET", "/roles/1/permissions").await, 1);
}

#[tokio::test]
async fn test_review_patches_then_confirms() {
  let mock_server = MockServer::start().await;
  let application = |status: &str| {
    json!({
      "id": "9",
      "fullName": "Ada Reporter",
      "email": "ada@press.example",
      "status": status
    })
  };

  Mock::given(method("GET"))
    .and(path("/applications/9"))
    .respond_with(ResponseTemplate::new(200).set_body_json(application("pending")))
    .up_to_n_times(1)
    .mount(&mock_server)
    .await;
  Mock::given(method("GET"))
    .and(path("/applications/9"))
    .respond_with(ResponseTemplate::new(200).set_body_json(application("approved")))
    .mount(&mock_server)
    .await;
  Mock::given(method("PATCH"))
    .and(path("/applications/9/status"))
    .and(body_partial_json(json!({ "status": "approved" })))
    .respond_with(ResponseTemplate::new(200).set_body_json(application("approved")))
    .expect(1)
    .mount(&mock_server)
    .await;

  let ctx = context(&mock_server);
  let mut subscription = ctx.subscribe::<GetApplication>("9".to_string()).unwrap();
  assert_eq!(
    subscription.settled().await.data().unwrap().status,
    ApplicationStatus::Pending
  );

  let reviewed = ctx
    .mutate::<ReviewApplication>(Review {
      application_id: "9".to_string(),
      decision: Decision::Approve,
      reason: None,
    })
    .await
    .unwrap();
  assert_eq!(reviewed.status, ApplicationStatus::Approved);

  // Optimistic value is visible at once; the invalidation refetch confirms it
  assert_eq!(
    subscription.result().data().unwrap().status,
    ApplicationStatus::Approved
  );
  wait_for_requests(&mock_server, 3).await;
  let confirmed = wait_for(&mut subscription, |r| r.is_success() && !r.is_stale).await;
  assert_eq!(confirmed.data().unwrap().status, ApplicationStatus::Approved);
  assert_eq!(requests_to(&mock_server, "GET", "/applications/9").await, 2);
}

#[tokio::test]
async fn test_cancelled_mutation_rolls_back() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/roles/1/permissions"))
    .respond_with(ResponseTemplate::new(200).set_body_json(permissions(false, true)))
    .mount(&mock_server)
    .await;
  Mock::given(method("PUT"))
    .and(path("/roles/1/permissions/p1"))
    .respond_with(
      ResponseTemplate::new(500)
        .set_body_string("boom")
        .set_delay(Duration::from_millis(1000)),
    )
    .mount(&mock_server)
    .await;

  let ctx = context(&mock_server);
  let mut subscription = ctx
    .subscribe::<GetRolePermissions>("1".to_string())
    .unwrap();
  assert!(!subscription.settled().await.data().unwrap()[0].granted);

  let timed_out = tokio::time::timeout(
    Duration::from_millis(100),
    ctx.mutate::<SetPermission>(grant_p1()),
  )
  .await;
  assert!(timed_out.is_err());

  let restored = ctx
    .select::<GetRolePermissions>(&"1".to_string())
    .unwrap();
  assert!(!restored.data().unwrap()[0].granted);

  // Still rolled back once the abandoned request would have failed
  tokio::time::sleep(Duration::from_millis(1200)).await;
  let later = ctx
    .select::<GetRolePermissions>(&"1".to_string())
    .unwrap();
  assert!(!later.data().unwrap()[0].granted);
  assert_eq!(requests_to(&mock_server, "GET", "/roles/1/permissions").await, 1);
}

#[tokio::test]
async fn test_failed_grant_after_refetch_refetches_instead_of_restoring() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/roles/1/permissions"))
    .respond_with(ResponseTemplate::new(200).set_body_json(permissions(false, true)))
    .up_to_n_times(1)
    .mount(&mock_server)
    .await;
  // Someone else revoked p2 in the meantime
  Mock::given(method("GET"))
    .and(path("/roles/1/permissions"))
    .respond_with(ResponseTemplate::new(200).set_body_json(permissions(false, false)))
    .mount(&mock_server)
    .await;
  Mock::given(method("PUT"))
    .and(path("/roles/1/permissions/p1"))
    .respond_with(
      ResponseTemplate::new(500)
        .set_body_string("boom")
        .set_delay(Duration::from_millis(400)),
    )
    .expect(1)
    .mount(&mock_server)
    .await;

  let ctx = context(&mock_server);
  let mut subscription = ctx
    .subscribe::<GetRolePermissions>("1".to_string())
    .unwrap();
  assert!(subscription.settled().await.data().unwrap()[1].granted);

  let mutation = {
    let ctx = ctx.clone();
    tokio::spawn(async move { ctx.mutate::<SetPermission>(grant_p1()).await })
  };
  wait_for(&mut subscription, |r| r.data().is_ok_and(|p| p[0].granted)).await;

  // A refetch lands while the grant is in flight
  assert!(subscription.refetch());
  let refetched = wait_for(&mut subscription, |r| {
    r.is_success() && r.data().is_ok_and(|p| !p[1].granted)
  })
  .await;
  assert!(!refetched.data().unwrap()[0].granted);

  let err = mutation.await.unwrap().unwrap_err();
  assert_eq!(err.status(), Some(500));

  // Rollback must not resurrect the pre-patch snapshot; it refetches
  wait_for_requests(&mock_server, 4).await;
  let settled = wait_for(&mut subscription, |r| r.is_success() && !r.is_stale).await;
  let data = settled.data().unwrap();
  assert!(!data[0].granted);
  assert!(!data[1].granted);
  assert_eq!(requests_to(&mock_server, "GET", "/roles/1/permissions").await, 3);
}

#[tokio::test]
async fn test_exclusive_reviews_reach_the_server_one_at_a_time() {
  let mock_server = MockServer::start().await;

  Mock::given(method("PATCH"))
    .and(path("/applications/9/status"))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(json!({
          "id": "9",
          "fullName": "Ada Reporter",
          "email": "ada@press.example",
          "status": "approved"
        }))
        .set_delay(Duration::from_millis(300)),
    )
    .expect(2)
    .mount(&mock_server)
    .await;

  let ctx = context(&mock_server);
  let started = Instant::now();
  let first = {
    let ctx = ctx.clone();
    tokio::spawn(async move { ctx.mutate::<ReviewApplication>(approve("9")).await })
  };
  let second = {
    let ctx = ctx.clone();
    tokio::spawn(async move { ctx.mutate::<ReviewApplication>(approve("9")).await })
  };

  // The second review waits for the first response before sending
  tokio::time::sleep(Duration::from_millis(150)).await;
  assert_eq!(requests_to(&mock_server, "PATCH", "/applications/9/status").await, 1);

  first.await.unwrap().unwrap();
  second.await.unwrap().unwrap();
  assert!(started.elapsed() >= Duration::from_millis(600));
  assert_eq!(requests_to(&mock_server, "PATCH", "/applications/9/status").await, 2);
}

#[tokio::test]
async fn test_concurrent_creates_are_not_merged() {
  let mock_server = MockServer::start().await;

  Mock::given(method("POST"))
    .and(path("/users"))
    .respond_with(
      ResponseTemplate::new(201)
        .set_body_json(json!({
          "id": "11",
          "fullName": "Jane",
          "email": "jane@x.com",
          "roleId": "2"
        }))
        .set_delay(Duration::from_millis(200)),
    )
    .expect(2)
    .mount(&mock_server)
    .await;

  let ctx = context(&mock_server);
  let started = Instant::now();
  let (a, b) = tokio::join!(
    ctx.mutate::<CreateUser>(jane()),
    ctx.mutate::<CreateUser>(jane())
  );
  assert_eq!(a.unwrap().id, "11");
  assert_eq!(b.unwrap().id, "11");
  // Both were in flight together
  assert!(started.elapsed() < Duration::from_millis(400));
  assert_eq!(requests_to(&mock_server, "POST", "/users").await, 2);
}
