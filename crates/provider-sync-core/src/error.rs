//! Error types for provider-sync-core
//!
//! Errors fall into three groups, reflected by [`Error::exit_code`]:
//!
//! - **Validation**: configuration and input problems (exit code 1)
//! - **System**: IO and the upstream registry (exit code 2)
//! - **Execution**: database, locking and constraint conflicts (exit code 3)

use thiserror::Error;

/// Core error type for provider sync operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Database errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A firm name is already held by another firm
    #[error("Duplicate firm name: {name}")]
    DuplicateName { name: String },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate entry, rows still referenced)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration is present but unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration or input failed a validation rule
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Malformed input (snapshot JSON, config TOML, labels)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Filesystem errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Upstream registry could not be reached or answered with an error
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// Lock store failures
    #[error("Lock error: {0}")]
    LockError(String),

    /// Fallback
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Machine-readable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::DuplicateName { .. } => "DUPLICATE_NAME",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::IoError(_) => "IO_ERROR",
            Self::RegistryError(_) => "REGISTRY_ERROR",
            Self::LockError(_) => "LOCK_ERROR",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Process exit code for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig(_) | Self::ValidationError(_) | Self::ParseError(_) => 1,
            Self::IoError(_) | Self::RegistryError(_) => 2,
            Self::DatabaseError(_)
            | Self::DuplicateName { .. }
            | Self::NotFound(_)
            | Self::Conflict(_)
            | Self::LockError(_) => 3,
            Self::Unknown(_) => 4,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(format!("Failed to parse JSON: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ParseError(format!("Failed to parse TOML: {err}"))
    }
}

/// Result type alias for provider-sync-core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::DatabaseError("x".into()).code(), "DATABASE_ERROR");
        assert_eq!(
            Error::DuplicateName {
                name: "Acme".into()
            }
            .code(),
            "DUPLICATE_NAME"
        );
        assert_eq!(Error::LockError("x".into()).code(), "LOCK_ERROR");
    }

    #[test]
    fn test_exit_codes_group_by_category() {
        assert_eq!(Error::InvalidConfig("x".into()).exit_code(), 1);
        assert_eq!(Error::RegistryError("x".into()).exit_code(), 2);
        assert_eq!(Error::Conflict("x".into()).exit_code(), 3);
        assert_eq!(Error::Unknown("x".into()).exit_code(), 4);
    }

    #[test]
    fn test_json_error_becomes_parse_error() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .map_err(Error::from)
            .err()
            .unwrap_or_else(|| Error::Unknown("expected error".into()));
        assert_eq!(err.code(), "PARSE_ERROR");
    }
}
