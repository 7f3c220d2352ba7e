//! Error types for mototracker.
//!
//! This module defines all error types used throughout the mototracker crate,
//! providing detailed context for debugging and user-facing messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for mototracker operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// A record referenced by id does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// The id that missed.
        id: i64,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Telemetry Errors ===
    /// A device frame could not be decoded into telemetry.
    #[error("malformed telemetry frame: {message}")]
    Decode {
        /// What the decoder rejected.
        message: String,
    },

    // === Device Link Errors ===
    /// The device listener could not bind its endpoint.
    #[error("failed to bind device link on {addr}: {source}")]
    LinkBind {
        /// Address we tried to listen on.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Account Errors ===
    /// A form field failed validation.
    #[error("invalid {field}: {message}")]
    Validation {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// Registration with an email that is already taken.
    #[error("email already registered: {0}")]
    EmailTaken(String),

    /// Login failed.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// An operation needed a logged-in user and there is none.
    #[error("no user is logged in")]
    NoActiveSession,

    // === Remote Errors ===
    /// The remote document store rejected or failed a write.
    #[error("remote write to '{collection}' failed: {message}")]
    Remote {
        /// Target collection.
        collection: String,
        /// Description of what went wrong.
        message: String,
    },

    /// HTTP transport failure talking to the remote store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for mototracker operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a telemetry decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a form validation error.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a remote write error.
    #[must_use]
    pub fn remote(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Check if this error came from decoding a device frame.
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Check if this error is a remote-side or transport failure.
    ///
    /// These are the failures the sync layer treats as retryable.
    #[must_use]
    pub fn is_remote_error(&self) -> bool {
        matches!(
            self,
            Self::Remote { .. } | Self::Http(_) | Self::Timeout { .. }
        )
    }

    /// Check if this error was caused by user input.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::EmailTaken(_)
                | Self::InvalidCredentials
                | Self::NoActiveSession
                | Self::NotFound { .. }
        )
    }
}
