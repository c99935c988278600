//! Error types for Crosscast

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrosscastError>;

/// Top-level error for orchestrator entry points.
///
/// Per-account failures during a fan-out never surface here; they are
/// reported as [`AttemptError`] values inside the returned result set.
#[derive(Error, Debug)]
pub enum CrosscastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Token vault error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("no active accounts resolved for this publish request")]
    NoActiveAccounts,

    #[error("account {0} does not belong to the requesting user")]
    ForeignAccount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid post status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Failures raised by the token vault.
///
/// Malformed ciphertext and a wrong key are both reported here; the vault
/// never returns garbage plaintext silently.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("ciphertext is empty")]
    Empty,

    #[error("ciphertext is missing the iv separator")]
    MissingSeparator,

    #[error("ciphertext is not valid hex")]
    InvalidHex,

    #[error("initialization vector must be {expected} bytes, got {got}")]
    InvalidIv { expected: usize, got: usize },

    #[error("decryption failed under the configured key")]
    DecryptFailed,

    #[error("decrypted payload is not valid utf-8")]
    InvalidUtf8,

    #[error("encryption failed")]
    EncryptFailed,
}

/// Per-account failure during a publish attempt.
///
/// Cloneable so attempts can be recorded and inspected after the fan-out.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptError {
    #[error("Credential decryption failed: {0}")]
    Crypto(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String, wait_secs: u64 },

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Media upload rejected: {0}")]
    Upload(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

impl AttemptError {
    /// True for failures that warrant the one-shot refresh-and-retry.
    pub fn is_auth(&self) -> bool {
        matches!(self, AttemptError::Auth(_))
    }
}

impl From<CryptoError> for AttemptError {
    fn from(error: CryptoError) -> Self {
        AttemptError::Crypto(error.to_string())
    }
}
