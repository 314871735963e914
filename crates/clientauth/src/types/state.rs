//! Normalized credential configuration of a client.
//!
//! The expander produces a [`CredentialsState`] from the desired
//! configuration and the reader produces one from the remote client, so the
//! two can be compared structurally.

use serde::{Deserialize, Serialize};

use super::credential::Credential;
use super::method::AuthenticationMethod;

// =============================================================================
// Method Binding
// =============================================================================

/// The active authentication method together with its credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MethodBinding {
    /// No client authentication.
    None,
    /// Client secret in the request body.
    ClientSecretPost,
    /// Client secret via HTTP Basic Auth.
    ClientSecretBasic,
    /// Signed JWT assertion, 1–2 public keys.
    PrivateKeyJwt {
        /// Attached public keys.
        credentials: Vec<Credential>,
    },
    /// CA-issued mTLS, one or more subject DNs or certificates.
    TlsClientAuth {
        /// Attached certificate credentials.
        credentials: Vec<Credential>,
    },
    /// Self-signed mTLS, one or more certificates.
    SelfSignedTlsClientAuth {
        /// Attached certificates.
        credentials: Vec<Credential>,
    },
}

impl MethodBinding {
    /// Builds a binding for `method` with the given credentials.
    ///
    /// Credentials are dropped for methods that do not use them.
    #[must_use]
    pub fn new(method: AuthenticationMethod, credentials: Vec<Credential>) -> Self {
        match method {
            AuthenticationMethod::None => Self::None,
            AuthenticationMethod::ClientSecretPost => Self::ClientSecretPost,
            AuthenticationMethod::ClientSecretBasic => Self::ClientSecretBasic,
            AuthenticationMethod::PrivateKeyJwt => Self::PrivateKeyJwt { credentials },
            AuthenticationMethod::TlsClientAuth => Self::TlsClientAuth { credentials },
            AuthenticationMethod::SelfSignedTlsClientAuth => {
                Self::SelfSignedTlsClientAuth { credentials }
            }
        }
    }

    /// Returns the method of this binding.
    #[must_use]
    pub fn method(&self) -> AuthenticationMethod {
        match self {
            Self::None => AuthenticationMethod::None,
            Self::ClientSecretPost => AuthenticationMethod::ClientSecretPost,
            Self::ClientSecretBasic => AuthenticationMethod::ClientSecretBasic,
            Self::PrivateKeyJwt { .. } => AuthenticationMethod::PrivateKeyJwt,
            Self::TlsClientAuth { .. } => AuthenticationMethod::TlsClientAuth,
            Self::SelfSignedTlsClientAuth { .. } => AuthenticationMethod::SelfSignedTlsClientAuth,
        }
    }

    /// Returns the attached credentials (empty for secret/none methods).
    #[must_use]
    pub fn credentials(&self) -> &[Credential] {
        match self {
            Self::PrivateKeyJwt { credentials }
            | Self::TlsClientAuth { credentials }
            | Self::SelfSignedTlsClientAuth { credentials } => credentials,
            Self::None | Self::ClientSecretPost | Self::ClientSecretBasic => &[],
        }
    }

    /// Returns the ids of the attached credentials, skipping uncreated ones.
    #[must_use]
    pub fn credential_ids(&self) -> Vec<&str> {
        self.credentials()
            .iter()
            .filter_map(|c| c.id.as_deref())
            .collect()
    }
}

// =============================================================================
// Signed Request Object
// =============================================================================

/// Signed request object configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequestObject {
    /// Whether authorization requests must be signed.
    pub required: bool,
    /// Public keys used to verify signed requests.
    pub credentials: Vec<Credential>,
}

impl SignedRequestObject {
    /// Returns the ids of the verification credentials, skipping uncreated ones.
    #[must_use]
    pub fn credential_ids(&self) -> Vec<&str> {
        self.credentials
            .iter()
            .filter_map(|c| c.id.as_deref())
            .collect()
    }
}

// =============================================================================
// Credentials State
// =============================================================================

/// Credential configuration of one client, desired or observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsState {
    /// Client identifier.
    pub client_id: String,

    /// Active method and its credentials. `None` leaves the method unmanaged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_method: Option<MethodBinding>,

    /// Shared secret for the secret methods. Never serialized.
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,

    /// Signed request object configuration. `None` leaves it unmanaged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_request_object: Option<SignedRequestObject>,
}

impl CredentialsState {
    /// Creates a state that manages nothing.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authentication_method: None,
            client_secret: None,
            signed_request_object: None,
        }
    }

    /// Returns the active method, if managed.
    #[must_use]
    pub fn method(&self) -> Option<AuthenticationMethod> {
        self.authentication_method.as_ref().map(MethodBinding::method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialType;

    #[test]
    fn test_binding_roundtrip_through_method() {
        for method in AuthenticationMethod::ALL {
            assert_eq!(MethodBinding::new(method, Vec::new()).method(), method);
        }
    }

    #[test]
    fn test_secret_binding_drops_credentials() {
        let binding = MethodBinding::new(
            AuthenticationMethod::ClientSecretPost,
            vec![Credential::new(CredentialType::PublicKey)],
        );
        assert!(binding.credentials().is_empty());
    }

    #[test]
    fn test_credential_ids_skip_uncreated() {
        let binding = MethodBinding::PrivateKeyJwt {
            credentials: vec![
                Credential::new(CredentialType::PublicKey).with_id("cred_1"),
                Credential::new(CredentialType::PublicKey),
            ],
        };
        assert_eq!(binding.credential_ids(), vec!["cred_1"]);
    }

    #[test]
    fn test_state_serialization_hides_secret() {
        let mut state = CredentialsState::new("app_1");
        state.authentication_method = Some(MethodBinding::ClientSecretPost);
        state.client_secret = Some("s3cr3t".to_string());

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["authentication_method"]["method"], "client_secret_post");
        assert!(json.get("client_secret").is_none());
    }
}
