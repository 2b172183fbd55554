//! Write endpoints of the accreditation backend.

use serde_json::json;

use crate::api::queries::{GetApplication, GetLandingContent, GetNotifications, GetRolePermissions};
use crate::api::tags::{
  APPLICATION, BADGE, EMBASSY, INVITATION_LETTER, LANDING, NOTIFICATION, ORGANIZATION, PERMISSION,
  ROLE, USER,
};
use crate::api::types::{
  Application, Credentials, Decision, Embassy, InvitationLetter, LandingContent, LetterUpload,
  NewEmbassy, NewOrganization, NewRole, NewUser, Organization, PermissionChange, Review, Role,
  Session, User, UserUpdate,
};
use crate::cache::{CacheKey, Tag};
use crate::endpoint::{MutationEndpoint, OptimisticUpdates};
use crate::error::{ApiResult, ValidationError};
use crate::transport::{FormPart, RawResponse, Request};

const MIN_PASSWORD_LEN: usize = 8;

fn looks_like_email(value: &str) -> bool {
  match value.trim().split_once('@') {
    Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
    None => false,
  }
}

fn blank(value: &str) -> bool {
  value.trim().is_empty()
}

pub struct Login;

impl MutationEndpoint for Login {
  const NAME: &'static str = "login";
  type Args = Credentials;
  type Output = Session;

  fn validate(args: &Credentials) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(looks_like_email(&args.email), "email", "enter a valid email address")
      .check(!args.password.is_empty(), "password", "password is required")
      .into_result()
  }

  fn request(args: &Credentials) -> ApiResult<Request> {
    Request::post("/auth/login").json(args)
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Session> {
    raw.json()
  }
}

pub struct CreateUser;

impl MutationEndpoint for CreateUser {
  const NAME: &'static str = "createUser";
  type Args = NewUser;
  type Output = User;

  fn validate(args: &NewUser) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(!blank(&args.full_name), "fullName", "full name is required")
      .check(looks_like_email(&args.email), "email", "enter a valid email address")
      .check(
        args.password.chars().count() >= MIN_PASSWORD_LEN,
        "password",
        format!("password must be at least {} characters", MIN_PASSWORD_LEN),
      )
      .check(!blank(&args.role_id), "roleId", "select a role")
      .into_result()
  }

  fn request(args: &NewUser) -> ApiResult<Request> {
    Request::post("/users").json(args)
  }

  fn transform_response(raw: RawResponse) -> ApiResult<User> {
    raw.json()
  }

  fn invalidates(_args: &NewUser, _output: &User) -> Vec<Tag> {
    vec![Tag::list(USER)]
  }
}

pub struct UpdateUser;

impl MutationEndpoint for UpdateUser {
  const NAME: &'static str = "updateUser";
  type Args = UserUpdate;
  type Output = User;

  fn validate(args: &UserUpdate) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(!blank(&args.id), "id", "user id is required")
      .check(
        args.email.as_deref().map_or(true, looks_like_email),
        "email",
        "enter a valid email address",
      )
      .check(
        args.full_name.as_deref().map_or(true, |name| !blank(name)),
        "fullName",
        "full name cannot be empty",
      )
      .into_result()
  }

  fn request(args: &UserUpdate) -> ApiResult<Request> {
    Request::patch(format!("/users/{}", args.id)).json(args)
  }

  fn transform_response(raw: RawResponse) -> ApiResult<User> {
    raw.json()
  }

  fn invalidates(args: &UserUpdate, _output: &User) -> Vec<Tag> {
    vec![Tag::list(USER), Tag::with_id(USER, &args.id)]
  }
}

pub struct DeleteUser;

impl MutationEndpoint for DeleteUser {
  const NAME: &'static str = "deleteUser";
  type Args = String;
  type Output = ();

  fn validate(id: &String) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(!blank(id), "id", "user id is required")
      .into_result()
  }

  fn request(id: &String) -> ApiResult<Request> {
    Ok(Request::delete(format!("/users/{}", id)))
  }

  fn transform_response(_raw: RawResponse) -> ApiResult<()> {
    Ok(())
  }

  fn invalidates(id: &String, _output: &()) -> Vec<Tag> {
    vec![Tag::list(USER), Tag::with_id(USER, id)]
  }
}

pub struct CreateRole;

impl MutationEndpoint for CreateRole {
  const NAME: &'static str = "createRole";
  type Args = NewRole;
  type Output = Role;

  fn validate(args: &NewRole) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(!blank(&args.name), "name", "role name is required")
      .into_result()
  }

  fn request(args: &NewRole) -> ApiResult<Request> {
    Request::post("/roles").json(args)
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Role> {
    raw.json()
  }

  fn invalidates(_args: &NewRole, _output: &Role) -> Vec<Tag> {
    vec![Tag::list(ROLE)]
  }
}

/// Grant or revoke one permission of a role.
///
/// The cached permission list of that role flips immediately and is restored
/// if the server refuses.
pub struct SetPermission;

impl MutationEndpoint for SetPermission {
  const NAME: &'static str = "setPermission";
  type Args = PermissionChange;
  type Output = ();

  fn validate(args: &PermissionChange) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(!blank(&args.role_id), "roleId", "role id is required")
      .check(
        !blank(&args.permission_id),
        "permissionId",
        "permission id is required",
      )
      .into_result()
  }

  fn request(args: &PermissionChange) -> ApiResult<Request> {
    Request::put(format!(
      "/roles/{}/permissions/{}",
      args.role_id, args.permission_id
    ))
    .json(&json!({ "granted": args.granted }))
  }

  fn transform_response(_raw: RawResponse) -> ApiResult<()> {
    Ok(())
  }

  fn invalidates(args: &PermissionChange, _output: &()) -> Vec<Tag> {
    vec![Tag::with_id(PERMISSION, &args.role_id)]
  }

  fn optimistic(args: &PermissionChange, updates: &mut OptimisticUpdates<'_>) {
    updates.update_query::<GetRolePermissions, _>(&args.role_id, |permissions| {
      for permission in permissions.iter_mut() {
        if permission.id == args.permission_id {
          permission.granted = args.granted;
        }
      }
    });
  }
}

/// Approve or reject an application.
///
/// Reviews of the same application never overlap.
pub struct ReviewApplication;

impl MutationEndpoint for ReviewApplication {
  const NAME: &'static str = "reviewApplication";
  const EXCLUSIVE: bool = true;
  type Args = Review;
  type Output = Application;

  fn validate(args: &Review) -> Result<(), ValidationError> {
    let reason_given = args.reason.as_deref().is_some_and(|r| !blank(r));
    ValidationError::new()
      .check(!blank(&args.application_id), "applicationId", "application id is required")
      .check(
        args.decision != Decision::Reject || reason_given,
        "reason",
        "a reason is required when rejecting",
      )
      .into_result()
  }

  fn request(args: &Review) -> ApiResult<Request> {
    Request::patch(format!("/applications/{}/status", args.application_id)).json(&json!({
      "status": args.decision.resulting_status(),
      "reason": args.reason,
    }))
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Application> {
    raw.json()
  }

  fn invalidates(args: &Review, _output: &Application) -> Vec<Tag> {
    vec![
      Tag::list(APPLICATION),
      Tag::with_id(APPLICATION, &args.application_id),
      Tag::with_id(BADGE, &args.application_id),
    ]
  }

  fn optimistic(args: &Review, updates: &mut OptimisticUpdates<'_>) {
    let status = args.decision.resulting_status();
    updates.update_query::<GetApplication, _>(&args.application_id, |application| {
      application.status = status;
    });
  }

  fn exclusive_key(args: &Review) -> ApiResult<CacheKey> {
    CacheKey::new(Self::NAME, &args.application_id)
  }
}

pub struct CreateOrganization;

impl MutationEndpoint for CreateOrganization {
  const NAME: &'static str = "createOrganization";
  type Args = NewOrganization;
  type Output = Organization;

  fn validate(args: &NewOrganization) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(!blank(&args.name), "name", "organization name is required")
      .into_result()
  }

  fn request(args: &NewOrganization) -> ApiResult<Request> {
    Request::post("/organizations").json(args)
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Organization> {
    raw.json()
  }

  fn invalidates(_args: &NewOrganization, _output: &Organization) -> Vec<Tag> {
    vec![Tag::list(ORGANIZATION)]
  }
}

pub struct CreateEmbassy;

impl MutationEndpoint for CreateEmbassy {
  const NAME: &'static str = "createEmbassy";
  type Args = NewEmbassy;
  type Output = Embassy;

  fn validate(args: &NewEmbassy) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(!blank(&args.name), "name", "embassy name is required")
      .check(!blank(&args.country), "country", "country is required")
      .check(
        args.email.as_deref().map_or(true, looks_like_email),
        "email",
        "enter a valid email address",
      )
      .into_result()
  }

  fn request(args: &NewEmbassy) -> ApiResult<Request> {
    Request::post("/embassies").json(args)
  }

  fn transform_response(raw: RawResponse) -> ApiResult<Embassy> {
    raw.json()
  }

  fn invalidates(_args: &NewEmbassy, _output: &Embassy) -> Vec<Tag> {
    vec![Tag::list(EMBASSY)]
  }
}

/// Attach a PDF invitation letter to an application (multipart upload).
pub struct UploadInvitationLetter;

impl MutationEndpoint for UploadInvitationLetter {
  const NAME: &'static str = "uploadInvitationLetter";
  type Args = LetterUpload;
  type Output = InvitationLetter;

  fn validate(args: &LetterUpload) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(!blank(&args.application_id), "applicationId", "application id is required")
      .check(
        args.file_name.to_ascii_lowercase().ends_with(".pdf"),
        "file",
        "invitation letters must be PDF files",
      )
      .check(!args.bytes.is_empty(), "file", "file is empty")
      .into_result()
  }

  fn request(args: &LetterUpload) -> ApiResult<Request> {
    Ok(
      Request::post(format!(
        "/applications/{}/invitation-letters",
        args.application_id
      ))
      .form(vec![
        FormPart::Text {
          name: "applicationId".to_string(),
          value: args.application_id.clone(),
        },
        FormPart::File {
          name: "file".to_string(),
          file_name: args.file_name.clone(),
          mime: "application/pdf".to_string(),
          bytes: args.bytes.clone(),
        },
      ]),
    )
  }

  fn transform_response(raw: RawResponse) -> ApiResult<InvitationLetter> {
    raw.json()
  }

  fn invalidates(args: &LetterUpload, _output: &InvitationLetter) -> Vec<Tag> {
    vec![Tag::with_id(INVITATION_LETTER, &args.application_id)]
  }
}

pub struct UpdateLandingContent;

impl MutationEndpoint for UpdateLandingContent {
  const NAME: &'static str = "updateLandingContent";
  type Args = LandingContent;
  type Output = LandingContent;

  fn validate(args: &LandingContent) -> Result<(), ValidationError> {
    ValidationError::new()
      .check(!blank(&args.title), "title", "title is required")
      .into_result()
  }

  fn request(args: &LandingContent) -> ApiResult<Request> {
    Request::put("/landing").json(args)
  }

  fn transform_response(raw: RawResponse) -> ApiResult<LandingContent> {
    raw.json()
  }

  fn invalidates(_args: &LandingContent, _output: &LandingContent) -> Vec<Tag> {
    vec![Tag::new(LANDING)]
  }

  fn optimistic(args: &LandingContent, updates: &mut OptimisticUpdates<'_>) {
    updates.update_query::<GetLandingContent, _>(&(), |content| *content = args.clone());
  }
}

pub struct MarkNotificationRead;

impl MutationEndpoint for MarkNotificationRead {
  const NAME: &'static str = "markNotificationRead";
  type Args = String;
  type Output = ();

  fn request(id: &String) -> ApiResult<Request> {
    Ok(Request::patch(format!("/notifications/{}/read", id)))
  }

  fn transform_response(_raw: RawResponse) -> ApiResult<()> {
    Ok(())
  }

  fn invalidates(_id: &String, _output: &()) -> Vec<Tag> {
    vec![Tag::list(NOTIFICATION)]
  }

  fn optimistic(id: &String, updates: &mut OptimisticUpdates<'_>) {
    updates.update_query::<GetNotifications, _>(&(), |notifications| {
      if let Some(n) = notifications.iter_mut().find(|n| &n.id == id) {
        n.read = true;
      }
    });
  }
}
