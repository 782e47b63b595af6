use thiserror::Error;

/// A3S Inspect error types
#[derive(Error, Debug)]
pub enum InspectError {
    /// Malformed image or repository reference
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Container registry error (manifest, blob, tag or referrers fetch)
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// The registry does not implement the OCI 1.1 referrers endpoint
    #[error("Referrers API not supported: {0}")]
    ReferrersUnsupported(String),

    /// A requested SBOM or VEX layer does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed envelope, PEM block or certificate
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl InspectError {
    /// Build a registry error for `registry`.
    pub fn registry(registry: impl Into<String>, message: impl Into<String>) -> Self {
        InspectError::RegistryError {
            registry: registry.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for InspectError {
    fn from(err: serde_json::Error) -> Self {
        InspectError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for InspectError {
    fn from(err: serde_yaml::Error) -> Self {
        InspectError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S Inspect operations
pub type Result<T> = std::result::Result<T, InspectError>;
