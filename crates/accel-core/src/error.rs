//! Error handling for the shared core types

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing core identifiers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A field name or code that is not part of the catalog
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Malformed identifiers (device indices, bus ids)
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl Error {
    /// Create an unknown field error
    pub fn unknown_field(msg: impl Into<String>) -> Self {
        Self::UnknownField(msg.into())
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::UnknownField(_) => "unknown_field",
            Error::InvalidIdentifier(_) => "invalid_identifier",
        }
    }
}
