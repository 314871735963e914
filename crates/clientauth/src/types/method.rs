//! Token endpoint authentication methods and application types.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::credential::CredentialType;

// =============================================================================
// Authentication Method
// =============================================================================

/// Mechanism a client uses to authenticate at the token endpoint.
///
/// Exactly one method is active per client. The first three variants use no
/// credential records; the other three reference credentials of a single
/// [`CredentialType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMethod {
    /// No client authentication (public clients).
    None,
    /// Client secret in the request body.
    ClientSecretPost,
    /// Client secret via HTTP Basic Auth.
    ClientSecretBasic,
    /// Client assertion JWT signed with a registered key.
    PrivateKeyJwt,
    /// Mutual TLS with a CA-issued certificate.
    TlsClientAuth,
    /// Mutual TLS with a self-signed certificate.
    SelfSignedTlsClientAuth,
}

impl AuthenticationMethod {
    /// All methods, in wire order.
    pub const ALL: [Self; 6] = [
        Self::None,
        Self::ClientSecretPost,
        Self::ClientSecretBasic,
        Self::PrivateKeyJwt,
        Self::TlsClientAuth,
        Self::SelfSignedTlsClientAuth,
    ];

    /// Methods that are bound through credential references.
    pub const CREDENTIAL_BEARING: [Self; 3] = [
        Self::PrivateKeyJwt,
        Self::TlsClientAuth,
        Self::SelfSignedTlsClientAuth,
    ];

    /// Returns the wire name of the method.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretPost => "client_secret_post",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::PrivateKeyJwt => "private_key_jwt",
            Self::TlsClientAuth => "tls_client_auth",
            Self::SelfSignedTlsClientAuth => "self_signed_tls_client_auth",
        }
    }

    /// Returns `true` if the method is bound through credential references.
    #[must_use]
    pub fn uses_credentials(&self) -> bool {
        Self::CREDENTIAL_BEARING.contains(self)
    }

    /// Returns `true` for the two shared-secret methods.
    #[must_use]
    pub fn uses_shared_secret(&self) -> bool {
        matches!(self, Self::ClientSecretPost | Self::ClientSecretBasic)
    }

    /// Returns the credential type this method references, if any.
    #[must_use]
    pub fn credential_type(&self) -> Option<CredentialType> {
        match self {
            Self::PrivateKeyJwt => Some(CredentialType::PublicKey),
            Self::TlsClientAuth => Some(CredentialType::CertSubjectDn),
            Self::SelfSignedTlsClientAuth => Some(CredentialType::X509Cert),
            Self::None | Self::ClientSecretPost | Self::ClientSecretBasic => None,
        }
    }

    /// Returns the maximum number of credentials the method accepts.
    #[must_use]
    pub fn max_credentials(&self) -> Option<usize> {
        match self {
            Self::PrivateKeyJwt => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for AuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Application Type
// =============================================================================

/// Application type of a client, as reported by the management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppType {
    /// Native (mobile/desktop) application.
    Native,
    /// Single-page application.
    Spa,
    /// Server-side web application.
    RegularWeb,
    /// Machine-to-machine application.
    NonInteractive,
    /// Any other application type.
    #[serde(other)]
    Other,
}

impl AppType {
    /// Returns the authentication method a client of this type falls back to
    /// when its credential configuration is removed.
    #[must_use]
    pub fn default_authentication_method(&self) -> AuthenticationMethod {
        match self {
            Self::Native | Self::Spa => AuthenticationMethod::None,
            Self::RegularWeb | Self::NonInteractive => AuthenticationMethod::ClientSecretPost,
            Self::Other => AuthenticationMethod::ClientSecretBasic,
        }
    }
}

/// Default method for an optional application type.
///
/// A client without an application type falls back to `client_secret_basic`.
#[must_use]
pub fn default_method_for(app_type: Option<AppType>) -> AuthenticationMethod {
    app_type
        .map(|t| t.default_authentication_method())
        .unwrap_or(AuthenticationMethod::ClientSecretBasic)
}
