//! Persisted client session storage backed by SQLite.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

const TOKEN_KEY: &str = "token";

/// Key/value session storage that survives restarts.
///
/// The token is read on every request, so it is kept in memory and only
/// written through to the database.
pub struct SessionStore {
  conn: Mutex<Connection>,
  token: RwLock<Option<String>>,
}

impl SessionStore {
  /// Open the session database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the session database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open session database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Non-persistent store, mostly for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory session database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SESSION_SCHEMA)
      .map_err(|e| eyre!("Failed to run session migrations: {}", e))?;

    let token = conn
      .query_row(
        "SELECT value FROM session WHERE key = ?",
        params![TOKEN_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read session token: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      token: RwLock::new(token),
    })
  }

  fn cache_token(&self, token: Option<&str>) {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = token.map(str::to_string);
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("accredit").join("session.db"))
  }

  pub fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM session WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read session key {}: {}", key, e))
  }

  pub fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO session (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write session key {}: {}", key, e))?;

    if key == TOKEN_KEY {
      self.cache_token(Some(value));
    }
    Ok(())
  }

  pub fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM session WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove session key {}: {}", key, e))?;

    if key == TOKEN_KEY {
      self.cache_token(None);
    }
    Ok(())
  }

  /// The bearer token of the logged-in user, if any. Never touches the
  /// database.
  pub fn token(&self) -> Result<Option<String>> {
    Ok(
      self
        .token
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone(),
    )
  }

  pub fn set_token(&self, token: &str) -> Result<()> {
    self.set(TOKEN_KEY, token)
  }

  pub fn clear_token(&self) -> Result<()> {
    self.remove(TOKEN_KEY)
  }
}

const SESSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
