// ❌ Errors - one enum for the whole core
//
// Every operation returns `Result`. The variants map onto the kinds of
// failure the front end treats differently:
// - Validation: bad input, nothing was attempted
// - Authorization: caller does not own the device it tried to change
// - Storage: the database refused a read or write (writes are rolled back)
// - NotFound: the referenced row does not exist
//
// Reporting reads swallow storage errors (see `reporting`); everything else
// propagates.

use thiserror::Error;

use crate::entities::Owner;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, KilluaError>;

/// Coarse classification used by the CLI to pick exit codes and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Storage,
    Config,
    Io,
}

/// Main error type.
#[derive(Debug, Error)]
pub enum KilluaError {
    /// User input was rejected before touching storage.
    #[error("{0}")]
    Validation(String),

    /// Caller tried to modify a device it does not own.
    #[error("device {device_id} belongs to {device_owner}, not {caller}")]
    Unauthorized {
        device_id: i64,
        device_owner: Owner,
        caller: Owner,
    },

    /// Referenced row is missing.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// SQLite failure (connectivity, constraint, bad SQL).
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// MySQL failure (connection, constraint, bad SQL).
    #[cfg(feature = "mysql")]
    #[error("storage error: {0}")]
    Mysql(#[from] mysql::Error),

    /// A column held a value of an unexpected type.
    #[error("unexpected column value: {0}")]
    Decode(String),

    /// Configuration file or override was invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl KilluaError {
    /// Shorthand for building a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        KilluaError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            KilluaError::Validation(_) => ErrorKind::Validation,
            KilluaError::Unauthorized { .. } => ErrorKind::Authorization,
            KilluaError::NotFound { .. } => ErrorKind::NotFound,
            KilluaError::Sqlite(_) | KilluaError::Decode(_) => ErrorKind::Storage,
            #[cfg(feature = "mysql")]
            KilluaError::Mysql(_) => ErrorKind::Storage,
            KilluaError::Config(_) => ErrorKind::Config,
            KilluaError::Io(_) | KilluaError::Csv(_) => ErrorKind::Io,
        }
    }

    /// True for errors the user can fix by changing their input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::Authorization | ErrorKind::NotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            KilluaError::validation("nothing to save").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            KilluaError::NotFound { entity: "record", id: 7 }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            KilluaError::Sqlite(rusqlite::Error::InvalidQuery).kind(),
            ErrorKind::Storage
        );
        assert!(!KilluaError::Decode("x".into()).is_user_error());
    }

    #[test]
    fn test_unauthorized_message() {
        let err = KilluaError::Unauthorized {
            device_id: 3,
            device_owner: Owner::User(1),
            caller: Owner::User(2),
        };
        assert_eq!(err.to_string(), "device 3 belongs to user #1, not user #2");
        assert!(err.is_user_error());
    }
}
