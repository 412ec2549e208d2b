//! Error types for Berth translation, manifest and secret operations.

use thiserror::Error;

/// Main error type for Berth operations
#[derive(Error, Debug)]
pub enum BerthError {
    /// Server intent is incomplete or inconsistent; never retried
    #[error("invalid server intent '{0}': {1}")]
    Validation(String, String),

    /// Project manifest failed validation
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Requested environment has no secret provider config
    #[error("environment '{0}' not found in secrets config")]
    UnknownEnvironment(String),

    /// Secret key absent from the provider
    #[error("secret '{1}' not found in environment '{0}'")]
    SecretNotFound(String, String),

    /// Backing Secret object absent from the cluster
    #[error("secret object '{1}' not found for environment '{0}'")]
    SecretObjectNotFound(String, String),

    /// Operation not supported by the provider kind
    #[error("'{1}' is not supported by the secret provider for environment '{0}': {2}")]
    Unsupported(String, String, String),

    /// Credential, network or timeout failure reaching a secret backend
    #[error("secret provider for environment '{0}' unreachable: {1}")]
    ProviderConnectivity(String, String),

    /// Dotenv source exists but could not be loaded
    #[error("failed to load env file '{0}': {1}")]
    EnvFile(String, String),

    /// Data could not be traversed for redaction; the result is withheld
    #[error("sanitization failed: {0}")]
    Sanitization(String),

    /// Rendering an object to its text form failed
    #[error("failed to serialize {0}: {1}")]
    Serialization(String, String),
}

impl BerthError {
    /// True for failures a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, BerthError::ProviderConnectivity(..))
    }
}

/// Result type alias for Berth operations
pub type Result<T> = std::result::Result<T, BerthError>;
