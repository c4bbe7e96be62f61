//! Error types for CARREL operations

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("No active transaction on this thread")]
    NoActiveTransaction,

    #[error("A transaction is already active on this thread")]
    TransactionAlreadyActive,

    #[error("Write to {path} failed: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Illegal characters in tag: {tag}")]
    IllegalTagCharacters { tag: String },

    #[error("Operation not allowed on archived version: {path}")]
    ArchivedVersion { path: String },

    #[error("Link cannot point to itself: {path}")]
    SelfLink { path: String },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Rating {rating} out of range 0..=5")]
    RatingOutOfRange { rating: u8 },

    #[error("Resource {path} is not associated with aspect {aspect}")]
    AspectNotAssociated { path: String, aspect: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown remote instance: {instance_id}")]
    UnknownInstance { instance_id: String },

    #[error("Unknown database configuration: {name}")]
    UnknownDatabase { name: String },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to initialize telemetry: {reason}")]
    Telemetry { reason: String },
}

/// Master error type for all CARREL errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Resource not found: {path}")]
    NotFound { path: String },

    #[error("User {user} is not authorized to {action} {path}")]
    AuthorizationDenied {
        user: String,
        action: String,
        path: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("Server content error: {reason}")]
    ServerContent { reason: String },

    #[error("Session error: {reason}")]
    Session { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl RegistryError {
    pub fn not_found(path: impl Into<String>) -> Self {
        RegistryError::NotFound { path: path.into() }
    }

    pub fn denied(user: impl Into<String>, action: impl ToString, path: impl Into<String>) -> Self {
        RegistryError::AuthorizationDenied {
            user: user.into(),
            action: action.to_string(),
            path: path.into(),
        }
    }

    pub fn server_content(reason: impl Into<String>) -> Self {
        RegistryError::ServerContent {
            reason: reason.into(),
        }
    }

    pub fn session(reason: impl Into<String>) -> Self {
        RegistryError::Session {
            reason: reason.into(),
        }
    }

    /// True for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }
}

/// Result type alias for CARREL operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

// =============================================================================
// TESTS
// =============================================================================
