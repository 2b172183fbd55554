//! Domain types exchanged with the accreditation backend.

use serde::{Deserialize, Serialize};

/// A page of results from a paginated list endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
  pub data: Vec<T>,
  #[serde(default)]
  pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
  pub page: u32,
  pub limit: u32,
}

impl Default for PageRequest {
  fn default() -> Self {
    Self { page: 1, limit: 10 }
  }
}

/// Console user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: String,
  pub full_name: String,
  pub email: String,
  #[serde(default)]
  pub role_id: Option<String>,
  #[serde(default)]
  pub role: Option<String>,
  #[serde(default = "default_true")]
  pub is_active: bool,
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
  pub full_name: String,
  pub email: String,
  pub password: String,
  pub role_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
  #[serde(skip)]
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub full_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub role_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRole {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// A permission as seen from one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub granted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionChange {
  pub role_id: String,
  pub permission_id: String,
  pub granted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub country: Option<String>,
  #[serde(default)]
  pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrganization {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub country: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
  Pending,
  Approved,
  Rejected,
}

impl ApplicationStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ApplicationStatus::Pending => "pending",
      ApplicationStatus::Approved => "approved",
      ApplicationStatus::Rejected => "rejected",
    }
  }
}

/// Journalist accreditation application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
  pub id: String,
  pub full_name: String,
  pub email: String,
  #[serde(default)]
  pub organization_id: Option<String>,
  pub status: ApplicationStatus,
  #[serde(default)]
  pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationFilter {
  pub status: Option<ApplicationStatus>,
  pub page: PageRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
  Approve,
  Reject,
}

impl Decision {
  pub fn resulting_status(&self) -> ApplicationStatus {
    match self {
      Decision::Approve => ApplicationStatus::Approved,
      Decision::Reject => ApplicationStatus::Rejected,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
  pub application_id: String,
  pub decision: Decision,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embassy {
  pub id: String,
  pub name: String,
  pub country: String,
  #[serde(default)]
  pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEmbassy {
  pub name: String,
  pub country: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationLetter {
  pub id: String,
  pub application_id: String,
  pub file_url: String,
}

/// Letter upload, sent as a multipart form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetterUpload {
  pub application_id: String,
  pub file_name: String,
  pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandingContent {
  pub title: String,
  #[serde(default)]
  pub subtitle: Option<String>,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub hero_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub id: String,
  pub message: String,
  #[serde(default)]
  pub read: bool,
  #[serde(default)]
  pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
  pub email: String,
  pub password: String,
}

/// Successful login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
  pub token: String,
  #[serde(default)]
  pub user: Option<User>,
}
