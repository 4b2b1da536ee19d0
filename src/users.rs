//! Local user records, keyed by provider email address.
//!
//! Persisted in SQLite so user ids — and therefore collection names and
//! dedup-cache files — stay stable across restarts.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct UserStore {
    db_path: PathBuf,
}

impl UserStore {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_db()?;
        Ok(store)
    }

    /// Look up a user by email, creating the record on first login.
    pub fn upsert_by_email(&self, email: &str) -> Result<User, AppError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::Store("users: empty email".into()));
        }

        let conn = self.open_conn()?;
        if let Some(user) = Self::find_by_email(&conn, &email)? {
            return Ok(user);
        }

        conn.execute(
            "INSERT INTO users (email, created_at) VALUES (?1, ?2)",
            params![email, now_iso8601()],
        )
        .map_err(|e| AppError::Store(format!("users: insert {email}: {e}")))?;

        Ok(User {
            id: conn.last_insert_rowid(),
            email,
        })
    }

    pub fn get(&self, user_id: i64) -> Result<Option<User>, AppError> {
        let conn = self.open_conn()?;
        conn.query_row(
            "SELECT id, email FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Store(format!("users: get {user_id}: {e}")))
    }

    fn find_by_email(conn: &Connection, email: &str) -> Result<Option<User>, AppError> {
        conn.query_row(
            "SELECT id, email FROM users WHERE email = ?1",
            params![email],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Store(format!("users: find {email}: {e}")))
    }

    fn init_db(&self) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| AppError::Store(format!("users: initialize schema: {e}")))?;
        Ok(())
    }

    fn open_conn(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| AppError::Store(format!("users: open {}: {e}", self.db_path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AppError::Store(format!("users: set journal_mode WAL: {e}")))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| AppError::Store(format!("users: set busy_timeout: {e}")))?;
        Ok(conn)
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_store() -> (TempDir, UserStore) {
        let temp = TempDir::new().expect("tempdir");
        let store = UserStore::open(&temp.path().join("users.db")).expect("open users db");
        (temp, store)
    }

    #[test]
    fn upsert_creates_then_reuses() {
        let (_temp, store) = make_store();
        let first = store.upsert_by_email("a@example.com").unwrap();
        let second = store.upsert_by_email("a@example.com").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn email_is_normalised() {
        let (_temp, store) = make_store();
        let first = store.upsert_by_email("A@Example.COM ").unwrap();
        let second = store.upsert_by_email("a@example.com").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.email, "a@example.com");
    }

    #[test]
    fn distinct_emails_get_distinct_ids() {
        let (_temp, store) = make_store();
        let a = store.upsert_by_email("a@example.com").unwrap();
        let b = store.upsert_by_email("b@example.com").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn get_returns_none_for_unknown_id() {
        let (_temp, store) = make_store();
        assert!(store.get(999).unwrap().is_none());
    }

    #[test]
    fn empty_email_is_rejected() {
        let (_temp, store) = make_store();
        assert!(store.upsert_by_email("   ").is_err());
    }
}
