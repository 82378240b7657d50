//! Local identity cache.
//!
//! The backend does not authenticate; a participant is whatever address and
//! username they present. This cache remembers the last username used per
//! address so rejoining a courtroom keeps a stable identity across runs.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use crate::session::now_ms;

static DEFAULT_DB_PATH: Lazy<PathBuf> = Lazy::new(|| {
    let base = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(".moot").join("profiles.db")
});

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("profile cache sql error: {0}")]
    Sql(#[from] rusqlite::Error),
}

pub struct ProfileCache {
    conn: Mutex<Connection>,
}

impl ProfileCache {
    /// Open (and create if needed) the cache at `path`.
    pub fn open(path: &Path) -> Result<ProfileCache, ProfileError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS profiles (
                address TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                updated_ms INTEGER NOT NULL
            )",
            [],
        )?;
        debug!(path = %path.display(), "profile cache open");
        Ok(ProfileCache {
            conn: Mutex::new(conn),
        })
    }

    /// Open the cache at `~/.moot/profiles.db`.
    pub fn open_default() -> Result<ProfileCache, ProfileError> {
        Self::open(&DEFAULT_DB_PATH)
    }

    /// Record `username` as the name for `address`, replacing any earlier one.
    pub fn remember(&self, address: &str, username: &str) -> Result<(), ProfileError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO profiles (address, username, updated_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(address) DO UPDATE SET
                 username = excluded.username,
                 updated_ms = excluded.updated_ms",
            params![address, username, now_ms() as i64],
        )?;
        Ok(())
    }

    /// The last username recorded for `address`, if any.
    pub fn lookup(&self, address: &str) -> Result<Option<String>, ProfileError> {
        let conn = self.conn.lock().unwrap();
        let name = conn
            .query_row(
                "SELECT username FROM profiles WHERE address = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }
}
