//! Credential reconciliation error types.
//!
//! Errors fall into four groups: structural validation failures detected
//! before any remote call, "client is gone" signals, remote API failures
//! surfaced verbatim, and cancellation between remote calls.

use std::fmt;

/// Errors that can occur while validating, reading or reconciling the
/// authentication configuration of a client.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// A credential-bearing configuration has no credentials.
    #[error("Client Credentials Missing: {path}: {message}")]
    CredentialsMissing {
        /// Path of the offending field in the desired configuration.
        path: String,
        /// Description of what is missing.
        message: String,
    },

    /// A credential violates a structural rule of its authentication method.
    #[error("Client Credentials Invalid: {path}: {message}")]
    CredentialsInvalid {
        /// Path of the offending field in the desired configuration.
        path: String,
        /// Description of the violated rule.
        message: String,
    },

    /// The client (or a credential) no longer exists remotely.
    #[error("Not found: {message}")]
    NotFound {
        /// Description of the missing resource.
        message: String,
    },

    /// The management API rejected a request.
    #[error("Management API error (status {status}): {message}")]
    Api {
        /// HTTP status code returned by the API.
        status: u16,
        /// Error message returned by the API.
        message: String,
    },

    /// The management API could not be reached.
    #[error("Network error: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// The remote state violates an invariant the reconciler relies on.
    #[error("Remote state conflict: {message}")]
    Conflict {
        /// Description of the conflicting state.
        message: String,
    },

    /// The run was cancelled or its deadline passed before a remote call.
    #[error("Cancelled before {step}")]
    Cancelled {
        /// The remote step that was not issued.
        step: String,
    },

    /// The configuration of the reconciler itself is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl CredentialsError {
    /// Creates a new `CredentialsMissing` error.
    #[must_use]
    pub fn missing(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CredentialsMissing {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `CredentialsInvalid` error.
    #[must_use]
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CredentialsInvalid {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a new `Api` error.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Creates a new `Network` error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Cancelled` error.
    #[must_use]
    pub fn cancelled(step: impl Into<String>) -> Self {
        Self::Cancelled { step: step.into() }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error was raised before any remote call.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::CredentialsMissing { .. } | Self::CredentialsInvalid { .. }
        )
    }

    /// Returns `true` if the remote resource no longer exists.
    ///
    /// Callers should drop their local representation instead of failing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the error came from the remote side.
    #[must_use]
    pub fn is_remote_error(&self) -> bool {
        matches!(
            self,
            Self::Api { .. } | Self::Network { .. } | Self::Conflict { .. }
        )
    }

    /// Returns the error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CredentialsMissing { .. } | Self::CredentialsInvalid { .. } => {
                ErrorCategory::Validation
            }
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Api { .. } | Self::Network { .. } | Self::Conflict { .. } => {
                ErrorCategory::Remote
            }
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of reconciliation errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Structural validation of the desired configuration.
    Validation,
    /// The remote client no longer exists.
    NotFound,
    /// Failures reported by or while reaching the management API.
    Remote,
    /// Cancellation or deadline expiry.
    Cancelled,
    /// Reconciler configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Remote => write!(f, "remote"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
