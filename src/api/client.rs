//! Session-aware facade over [`ApiContext`] for the accreditation backend.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;

use crate::api::mutations::{CreateUser, Login, ReviewApplication, SetPermission};
use crate::api::queries::{GetApplications, GetBadge, GetRoles, GetUsers};
use crate::api::tags::push_tags;
use crate::api::types::{
  Application, ApplicationFilter, Credentials, NewUser, Page, PageRequest, PermissionChange,
  Review, Role, Session, User,
};
use crate::config::Config;
use crate::context::ApiContext;
use crate::credentials::SessionCredentials;
use crate::push::{sse_frames, PushEvent, PushListener};
use crate::query::CacheOptions;
use crate::session::SessionStore;
use crate::transport::{Blob, Transport};

type Router = fn(&PushEvent) -> Vec<crate::cache::Tag>;

/// One logged-in (or anonymous) console session.
pub struct AccreditClient {
  context: ApiContext,
  session: Arc<SessionStore>,
  push_url: Option<String>,
}

impl AccreditClient {
  /// Build from configuration, with the session stored in the default
  /// data directory.
  pub fn new(config: &Config) -> Result<Self> {
    let session = Arc::new(SessionStore::open()?);
    let mut client = Self::with_session(
      &config.api.base_url,
      session,
      Config::fallback_token(),
      config.cache_options(),
    )?;
    client.push_url = config.push.url.clone();
    Ok(client)
  }

  pub fn with_session(
    base_url: &str,
    session: Arc<SessionStore>,
    fallback_token: Option<String>,
    options: CacheOptions,
  ) -> Result<Self> {
    let credentials = Arc::new(SessionCredentials::new(session.clone(), fallback_token));
    let transport = Transport::new(base_url, credentials)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", base_url, e))?;
    Ok(Self {
      context: ApiContext::new(transport, options),
      session,
      push_url: None,
    })
  }

  pub fn with_push_url(mut self, url: impl Into<String>) -> Self {
    self.push_url = Some(url.into());
    self
  }

  pub fn push_url(&self) -> Option<&str> {
    self.push_url.as_deref()
  }

  pub fn context(&self) -> &ApiContext {
    &self.context
  }

  pub fn is_logged_in(&self) -> Result<bool> {
    Ok(self.session.token()?.is_some())
  }

  /// Authenticate and persist the session token.
  pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
    let session = self
      .context
      .mutate::<Login>(Credentials {
        email: email.to_string(),
        password: password.to_string(),
      })
      .await?;
    self.session.set_token(&session.token)?;
    // Anything cached so far was fetched with the previous identity
    self.context.teardown();
    info!("logged in");
    Ok(session)
  }

  /// Forget the session token and drop every cached result.
  pub fn logout(&self) -> Result<()> {
    self.session.clear_token()?;
    self.context.teardown();
    info!("logged out");
    Ok(())
  }

  pub async fn roles(&self) -> Result<Arc<Vec<Role>>> {
    Ok(self.context.fetch::<GetRoles>(()).await?)
  }

  pub async fn users(&self, page: PageRequest) -> Result<Arc<Page<User>>> {
    Ok(self.context.fetch::<GetUsers>(page).await?)
  }

  pub async fn applications(&self, filter: ApplicationFilter) -> Result<Arc<Page<Application>>> {
    Ok(self.context.fetch::<GetApplications>(filter).await?)
  }

  pub async fn badge(&self, application_id: &str) -> Result<Arc<Blob>> {
    Ok(
      self
        .context
        .fetch::<GetBadge>(application_id.to_string())
        .await?,
    )
  }

  pub async fn create_user(&self, user: NewUser) -> Result<User> {
    Ok(self.context.mutate::<CreateUser>(user).await?)
  }

  pub async fn set_permission(&self, change: PermissionChange) -> Result<()> {
    Ok(self.context.mutate::<SetPermission>(change).await?)
  }

  pub async fn review(&self, review: Review) -> Result<Application> {
    Ok(self.context.mutate::<ReviewApplication>(review).await?)
  }

  /// Listener applying backend push events to this client's cache.
  pub fn push_listener(&self) -> PushListener<Router> {
    PushListener::new(self.context.queries().clone(), push_tags as Router)
  }

  /// Follow the configured push channel until it closes.
  ///
  /// Returns the number of events applied.
  pub async fn follow_push(&self) -> Result<usize> {
    let url = self
      .push_url
      .as_deref()
      .ok_or_else(|| eyre!("No push channel configured (push.url)"))?;
    let frames = sse_frames(self.context.transport(), url).await?;
    Ok(self.push_listener().run(frames).await)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client() -> AccreditClient {
    let session = Arc::new(SessionStore::open_in_memory().unwrap());
    AccreditClient::with_session(
      "http://localhost:9",
      session,
      None,
      CacheOptions::default(),
    )
    .unwrap()
  }

  #[test]
  fn test_invalid_base_url() {
    let session = Arc::new(SessionStore::open_in_memory().unwrap());
    assert!(
      AccreditClient::with_session("not a url", session, None, CacheOptions::default()).is_err()
    );
  }

  #[test]
  fn test_logout_clears_token() {
    let client = client();
    client.session.set_token("abc").unwrap();
    assert!(client.is_logged_in().unwrap());
    assert_eq!(client.context.transport().current_token().as_deref(), Some("abc"));

    client.logout().unwrap();
    assert!(!client.is_logged_in().unwrap());
    assert_eq!(client.context.transport().current_token(), None);
  }

  #[tokio::test]
  async fn test_follow_push_requires_url() {
    assert!(client().follow_push().await.is_err());
  }

  #[tokio::test]
  async fn test_login_validates_before_sending() {
    // Port 9 is never contacted: validation fails first
    assert!(client().login("not-an-email", "").await.is_err());
  }
}
