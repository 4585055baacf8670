//! Error types for lifecycle management.

use thiserror::Error;

/// Errors from lifecycle operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file I/O failed.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration could not be serialized.
    #[error("config serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A grant or rule operation against the backing store failed.
    #[error(transparent)]
    Store(#[from] inkstone_authz::StoreError),

    /// The delegator holds no valid grant covering what they tried to
    /// delegate.
    #[error("user {delegator} holds no valid grant to delegate")]
    NotDelegable { delegator: inkstone_types::UserId },

    /// The grant window is inverted or empty.
    #[error("grant window is empty: expires at or before it begins")]
    EmptyWindow,
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
