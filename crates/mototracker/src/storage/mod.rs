//! Storage layer for mototracker.
//!
//! This module provides the `SQLite`-backed local store for accounts,
//! vehicles, emergency contacts and telemetry. A single [`Storage`] handle is
//! opened at startup and shared (`Arc<Storage>`) with every component that
//! needs it; statements are serialized through one connection.

mod fleet;
pub mod migrations;
mod samples;
pub mod schema;
mod users;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Metadata key holding the logged-in user id.
const SESSION_USER_KEY: &str = "session.user_id";

/// Metadata key holding the start of the current route.
const ROUTE_STARTED_KEY: &str = "route.started_at";

/// Local store handle.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets the sync task read while ingest writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the connection.
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("storage connection mutex poisoned"))
    }

    /// Read a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_meta(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM metadata WHERE key = ?1", [key])?;
        Ok(())
    }

    /// The logged-in user, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn session_user_id(&self) -> Result<Option<i64>> {
        Ok(self
            .get_meta(SESSION_USER_KEY)?
            .and_then(|v| v.parse().ok()))
    }

    /// Record the logged-in user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_session_user_id(&self, user_id: i64) -> Result<()> {
        self.set_meta(SESSION_USER_KEY, &user_id.to_string())
    }

    /// Forget the logged-in user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_session(&self) -> Result<()> {
        self.delete_meta(SESSION_USER_KEY)
    }

    /// When the current route started, if one is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn route_started_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_meta(ROUTE_STARTED_KEY)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Mark the start of a route.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_route_started_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_meta(ROUTE_STARTED_KEY, &at.to_rfc3339())
    }

    /// Clear the route marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_route(&self) -> Result<()> {
        self.delete_meta(ROUTE_STARTED_KEY)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };

        let newest_sample: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM sensor_data ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            users: count("SELECT COUNT(*) FROM users")?,
            motorcycles: count("SELECT COUNT(*) FROM motorcycles")?,
            emergency_contacts: count("SELECT COUNT(*) FROM emergency_contacts")?,
            sensor_samples: count("SELECT COUNT(*) FROM sensor_data")?,
            accidents: count("SELECT COUNT(*) FROM accident_events")?,
            unsynced_users: count("SELECT COUNT(*) FROM users WHERE synced = 0")?,
            unsynced_motorcycles: count("SELECT COUNT(*) FROM motorcycles WHERE synced = 0")?,
            unsynced_contacts: count("SELECT COUNT(*) FROM emergency_contacts WHERE synced = 0")?,
            unsynced_samples: count("SELECT COUNT(*) FROM sensor_data WHERE synced = 0")?,
            newest_sample,
            db_size_bytes,
        })
    }
}

/// Row counts and sync backlog of the local store.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StorageStats {
    /// Registered users.
    pub users: i64,
    /// Stored motorcycles.
    pub motorcycles: i64,
    /// Stored emergency contacts.
    pub emergency_contacts: i64,
    /// Stored sensor samples.
    pub sensor_samples: i64,
    /// Stored accident events.
    pub accidents: i64,
    /// Users not yet acknowledged remotely.
    pub unsynced_users: i64,
    /// Motorcycles not yet acknowledged remotely.
    pub unsynced_motorcycles: i64,
    /// Contacts not yet acknowledged remotely.
    pub unsynced_contacts: i64,
    /// Sensor samples not yet acknowledged remotely.
    pub unsynced_samples: i64,
    /// Timestamp of the most recently stored sample.
    pub newest_sample: Option<String>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Convert an SQLite boolean column.
fn flag(value: i64) -> bool {
    value != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_metadata_round_trip() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.get_meta("k").unwrap(), None);

        storage.set_meta("k", "v1").unwrap();
        storage.set_meta("k", "v2").unwrap();
        assert_eq!(storage.get_meta("k").unwrap().as_deref(), Some("v2"));

        storage.delete_meta("k").unwrap();
        assert_eq!(storage.get_meta("k").unwrap(), None);
    }

    #[test]
    fn test_session_user() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.session_user_id().unwrap(), None);

        storage.set_session_user_id(7).unwrap();
        assert_eq!(storage.session_user_id().unwrap(), Some(7));

        storage.clear_session().unwrap();
        assert_eq!(storage.session_user_id().unwrap(), None);
    }

    #[test]
    fn test_route_marker() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.route_started_at().unwrap().is_none());

        let now = Utc::now();
        storage.set_route_started_at(now).unwrap();
        let stored = storage.route_started_at().unwrap().unwrap();
        assert_eq!(stored.timestamp(), now.timestamp());

        storage.clear_route().unwrap();
        assert!(storage.route_started_at().unwrap().is_none());
    }

    #[test]
    fn test_stats_empty() {
        let storage = Storage::open_in_memory().unwrap();
        let stats = storage.stats().unwrap();

        assert_eq!(stats.users, 0);
        assert_eq!(stats.sensor_samples, 0);
        assert!(stats.newest_sample.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_open_file_based_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("mototracker_test_{}", std::process::id()));
        let db_path = dir.join("nested").join("mototracker.db");
        let _ = std::fs::remove_dir_all(&dir);

        let storage = Storage::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(storage.path(), db_path);
        assert!(storage.stats().unwrap().db_size_bytes > 0);

        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
