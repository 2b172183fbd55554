//! Tag kinds of the accreditation catalog and push-event routing.

use crate::cache::Tag;
use crate::push::PushEvent;

pub const USER: &str = "User";
pub const ROLE: &str = "Role";
pub const PERMISSION: &str = "Permission";
pub const ORGANIZATION: &str = "Organization";
pub const APPLICATION: &str = "Application";
pub const EMBASSY: &str = "Embassy";
pub const INVITATION_LETTER: &str = "InvitationLetter";
pub const BADGE: &str = "Badge";
pub const LANDING: &str = "Landing";
pub const NOTIFICATION: &str = "Notification";

/// List tag plus one id tag per item.
pub(crate) fn list_with_ids<'a>(
  kind: &'static str,
  ids: impl IntoIterator<Item = &'a str>,
) -> Vec<Tag> {
  std::iter::once(Tag::list(kind))
    .chain(ids.into_iter().map(|id| Tag::with_id(kind, id)))
    .collect()
}

/// Tags made stale by a server push event.
pub fn push_tags(event: &PushEvent) -> Vec<Tag> {
  let id = event.id.as_deref();
  match event.kind.as_str() {
    "application:created" | "newApplication" => {
      vec![Tag::list(APPLICATION), Tag::list(NOTIFICATION)]
    }
    "application:updated" => match id {
      Some(id) => vec![
        Tag::list(APPLICATION),
        Tag::with_id(APPLICATION, id),
        Tag::with_id(BADGE, id),
      ],
      None => vec![Tag::new(APPLICATION), Tag::new(BADGE)],
    },
    "notification" | "notification:created" => vec![Tag::list(NOTIFICATION)],
    "user:created" | "user:deleted" => vec![Tag::list(USER)],
    "user:updated" => match id {
      Some(id) => vec![Tag::list(USER), Tag::with_id(USER, id)],
      None => vec![Tag::new(USER)],
    },
    "role:updated" => vec![Tag::new(ROLE), Tag::new(PERMISSION)],
    "landing:updated" => vec![Tag::new(LANDING)],
    _ => Vec::new(),
  }
}
