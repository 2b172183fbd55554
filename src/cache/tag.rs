//! Cache tags used to group entries for coordinated invalidation.

use std::borrow::Cow;
use std::fmt;

/// Id used by collection queries, e.g. `User:LIST`.
pub const LIST_ID: &str = "LIST";

/// A label attached to cache entries, optionally scoped to one entity id.
///
/// Invalidating a bare kind (`User`) matches every entry that provides any
/// `User` tag. Invalidating `User:3` matches only entries providing `User:3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
  kind: Cow<'static, str>,
  id: Option<String>,
}

impl Tag {
  pub const fn new(kind: &'static str) -> Self {
    Self {
      kind: Cow::Borrowed(kind),
      id: None,
    }
  }

  pub fn with_id(kind: &'static str, id: impl ToString) -> Self {
    Self {
      kind: Cow::Borrowed(kind),
      id: Some(id.to_string()),
    }
  }

  pub fn list(kind: &'static str) -> Self {
    Self::with_id(kind, LIST_ID)
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn id(&self) -> Option<&str> {
    self.id.as_deref()
  }

  /// True for tags without an id, which match the whole kind on invalidation.
  pub fn is_kind_wide(&self) -> bool {
    self.id.is_none()
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.id {
      Some(id) => write!(f, "{}:{}", self.kind, id),
      None => f.write_str(&self.kind),
    }
  }
}
