//! Read endpoints of the accreditation backend.

use crate::api::tags::{
  list_with_ids, APPLICATION, BADGE, EMBASSY, INVITATION_LETTER, LANDING, NOTIFICATION,
  ORGANIZATION, PERMISSION, ROLE, USER,
};
use crate::api::types::{
  Application, ApplicationFilter, Embassy, InvitationLetter, LandingContent, Notification,
  Organization, Page, PageRequest, Permission, Role, User,
};
use crate::cache::Tag;
use crate::endpoint::QueryEndpoint;
use crate::error::ApiResult;
use crate::transport::{Blob, RawResponse, Request};

/// Paginated user list
pub struct GetUsers;

impl QueryEndpoint for GetUsers {
  const NAME: &'static str = "getUsers";
  type Args = PageRequest;
  type Output = Page<User>;

  fn request(args: &PageRequest) -> ApiResult<Request> {
    Ok(
      Request::get("/users")
        .query("page", args.page)
        .query("limit", args.limit),
    )
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(_args: &PageRequest, output: Option<&Page<User>>) -> Vec<Tag> {
    match output {
      Some(page) => list_with_ids(USER, page.data.iter().map(|u| u.id.as_str())),
      None => vec![Tag::list(USER)],
    }
  }
}

pub struct GetUser;

impl QueryEndpoint for GetUser {
  const NAME: &'static str = "getUser";
  type Args = String;
  type Output = User;

  fn request(id: &String) -> ApiResult<Request> {
    Ok(Request::get(format!("/users/{}", id)))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(id: &String, _output: Option<&User>) -> Vec<Tag> {
    vec![Tag::with_id(USER, id)]
  }
}

pub struct GetRoles;

impl QueryEndpoint for GetRoles {
  const NAME: &'static str = "getRoles";
  type Args = ();
  type Output = Vec<Role>;

  fn request(_args: &()) -> ApiResult<Request> {
    Ok(Request::get("/roles"))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(_args: &(), output: Option<&Vec<Role>>) -> Vec<Tag> {
    match output {
      Some(roles) => list_with_ids(ROLE, roles.iter().map(|r| r.id.as_str())),
      None => vec![Tag::list(ROLE)],
    }
  }
}

/// Permissions of one role, each with its granted flag
pub struct GetRolePermissions;

impl QueryEndpoint for GetRolePermissions {
  const NAME: &'static str = "getRolePermissions";
  type Args = String;
  type Output = Vec<Permission>;

  fn request(role_id: &String) -> ApiResult<Request> {
    Ok(Request::get(format!("/roles/{}/permissions", role_id)))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(role_id: &String, _output: Option<&Vec<Permission>>) -> Vec<Tag> {
    vec![Tag::with_id(PERMISSION, role_id)]
  }
}

pub struct GetOrganizations;

impl QueryEndpoint for GetOrganizations {
  const NAME: &'static str = "getOrganizations";
  type Args = ();
  type Output = Vec<Organization>;

  fn request(_args: &()) -> ApiResult<Request> {
    Ok(Request::get("/organizations"))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(_args: &(), output: Option<&Vec<Organization>>) -> Vec<Tag> {
    match output {
      Some(orgs) => list_with_ids(ORGANIZATION, orgs.iter().map(|o| o.id.as_str())),
      None => vec![Tag::list(ORGANIZATION)],
    }
  }
}

/// Accreditation applications, optionally filtered by status
pub struct GetApplications;

impl QueryEndpoint for GetApplications {
  const NAME: &'static str = "getApplications";
  type Args = ApplicationFilter;
  type Output = Page<Application>;

  fn request(filter: &ApplicationFilter) -> ApiResult<Request> {
    let mut request = Request::get("/applications")
      .query("page", filter.page.page)
      .query("limit", filter.page.limit);
    if let Some(status) = filter.status {
      request = request.query("status", status.as_str());
    }
    Ok(request)
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(_args: &ApplicationFilter, output: Option<&Page<Application>>) -> Vec<Tag> {
    match output {
      Some(page) => list_with_ids(APPLICATION, page.data.iter().map(|a| a.id.as_str())),
      None => vec![Tag::list(APPLICATION)],
    }
  }
}

pub struct GetApplication;

impl QueryEndpoint for GetApplication {
  const NAME: &'static str = "getApplication";
  type Args = String;
  type Output = Application;

  fn request(id: &String) -> ApiResult<Request> {
    Ok(Request::get(format!("/applications/{}", id)))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(id: &String, _output: Option<&Application>) -> Vec<Tag> {
    vec![Tag::with_id(APPLICATION, id)]
  }
}

pub struct GetEmbassies;

impl QueryEndpoint for GetEmbassies {
  const NAME: &'static str = "getEmbassies";
  type Args = ();
  type Output = Vec<Embassy>;

  fn request(_args: &()) -> ApiResult<Request> {
    Ok(Request::get("/embassies"))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(_args: &(), output: Option<&Vec<Embassy>>) -> Vec<Tag> {
    match output {
      Some(embassies) => list_with_ids(EMBASSY, embassies.iter().map(|e| e.id.as_str())),
      None => vec![Tag::list(EMBASSY)],
    }
  }
}

/// Invitation letters attached to one application
pub struct GetInvitationLetters;

impl QueryEndpoint for GetInvitationLetters {
  const NAME: &'static str = "getInvitationLetters";
  type Args = String;
  type Output = Vec<InvitationLetter>;

  fn request(application_id: &String) -> ApiResult<Request> {
    Ok(Request::get(format!(
      "/applications/{}/invitation-letters",
      application_id
    )))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(application_id: &String, _output: Option<&Vec<InvitationLetter>>) -> Vec<Tag> {
    vec![
      Tag::list(INVITATION_LETTER),
      Tag::with_id(INVITATION_LETTER, application_id),
    ]
  }
}

/// Rendered badge (PDF) for an approved application
pub struct GetBadge;

impl QueryEndpoint for GetBadge {
  const NAME: &'static str = "getBadge";
  type Args = String;
  type Output = Blob;

  fn request(application_id: &String) -> ApiResult<Request> {
    Ok(Request::get(format!("/badges/{}", application_id)).blob_response())
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.blob()
  }

  fn provides(application_id: &String, _output: Option<&Blob>) -> Vec<Tag> {
    vec![Tag::with_id(BADGE, application_id)]
  }
}

pub struct GetLandingContent;

impl QueryEndpoint for GetLandingContent {
  const NAME: &'static str = "getLandingContent";
  type Args = ();
  type Output = LandingContent;

  fn request(_args: &()) -> ApiResult<Request> {
    Ok(Request::get("/landing"))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(_args: &(), _output: Option<&LandingContent>) -> Vec<Tag> {
    vec![Tag::new(LANDING)]
  }
}

pub struct GetNotifications;

impl QueryEndpoint for GetNotifications {
  const NAME: &'static str = "getNotifications";
  type Args = ();
  type Output = Vec<Notification>;

  fn request(_args: &()) -> ApiResult<Request> {
    Ok(Request::get("/notifications"))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Self::Output> {
    raw.json()
  }

  fn provides(_args: &(), _output: Option<&Vec<Notification>>) -> Vec<Tag> {
    vec![Tag::list(NOTIFICATION)]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::ApplicationStatus;
  use crate::transport::ResponseKind;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  #[test]
  fn test_users_request_and_tags() {
    let request = GetUsers::request(&PageRequest { page: 2, limit: 25 }).unwrap();
    assert_eq!(request.path, "/users");
    assert_eq!(
      request.query,
      vec![
        ("page".to_string(), "2".to_string()),
        ("limit".to_string(), "25".to_string())
      ]
    );

    let page = GetUsers::transform_response(RawResponse::Json(json!({
      "data": [{ "id": "7", "fullName": "Jane Doe", "email": "jane@x.com" }],
      "total": 1
    })))
    .unwrap();
    assert_eq!(page.data[0].full_name, "Jane Doe");
    assert!(page.data[0].is_active);
    assert_eq!(
      GetUsers::provides(&PageRequest::default(), Some(&page)),
      vec![Tag::list(USER), Tag::with_id(USER, 7)]
    );
    assert_eq!(
      GetUsers::provides(&PageRequest::default(), None),
      vec![Tag::list(USER)]
    );
  }

  #[test]
  fn test_applications_status_filter() {
    let filter = ApplicationFilter {
      status: Some(ApplicationStatus::Pending),
      page: PageRequest::default(),
    };
    let request = GetApplications::request(&filter).unwrap();
    assert!(request
      .query
      .contains(&("status".to_string(), "pending".to_string())));

    let unfiltered = GetApplications::request(&ApplicationFilter::default()).unwrap();
    assert_eq!(unfiltered.query.len(), 2);
  }

  #[test]
  fn test_badge_is_binary() {
    let request = GetBadge::request(&"42".to_string()).unwrap();
    assert_eq!(request.path, "/badges/42");
    assert_eq!(request.response, ResponseKind::Blob);
  }

  #[test]
  fn test_permissions_tagged_by_role() {
    assert_eq!(
      GetRolePermissions::provides(&"3".to_string(), None),
      vec![Tag::with_id(PERMISSION, 3)]
    );
  }
}
