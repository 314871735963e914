//! Desired-configuration expansion and validation.
//!
//! [`expand`] turns a raw [`ClientCredentialsConfig`] into the normalized
//! [`CredentialsState`] the reconciler diffs against. All structural rules
//! are checked here, before any remote call, and every error carries the
//! path of the offending field.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::CredResult;
use crate::cert;
use crate::error::CredentialsError;
use crate::types::{
    AuthenticationMethod, Credential, CredentialType, CredentialsState, MethodBinding,
    SignedRequestObject, SigningAlgorithm,
};

// =============================================================================
// Desired Configuration
// =============================================================================

/// Desired credential configuration of one client, as written by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientCredentialsConfig {
    /// Client identifier.
    pub client_id: String,

    /// Method to activate. `None` leaves the method unmanaged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_method: Option<AuthenticationMethod>,

    /// Shared secret for `client_secret_post` / `client_secret_basic`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Credentials for the credential-bearing methods, in binding order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<CredentialDescriptor>,

    /// Signed request object configuration. `None` leaves it unmanaged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_request_object: Option<SignedRequestObjectDescriptor>,
}

/// One desired credential, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialDescriptor {
    /// Pins the entry to an existing remote credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Friendly label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Credential type; inferred from the method when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_type: Option<CredentialType>,

    /// PEM public key or certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pem: Option<String>,

    /// Certificate subject DN (`tls_client_auth` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_dn: Option<String>,

    /// JOSE signing algorithm (`public_key` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    /// Derive the expiry from the certificate (`public_key` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_expiry_from_cert: Option<bool>,

    /// RFC 3339 expiry timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Desired signed request object configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedRequestObjectDescriptor {
    /// Whether authorization requests must be signed.
    #[serde(default)]
    pub required: bool,

    /// Verification keys, in binding order.
    #[serde(default)]
    pub credentials: Vec<CredentialDescriptor>,
}

// =============================================================================
// Expansion
// =============================================================================

/// Validates `config` and returns the normalized desired state.
///
/// # Errors
///
/// Returns `CredentialsMissing` when a credential-bearing method or signed
/// request object has no credentials, and `CredentialsInvalid` for any other
/// structural violation.
pub fn expand(config: &ClientCredentialsConfig) -> CredResult<CredentialsState> {
    if config.client_id.trim().is_empty() {
        return Err(CredentialsError::invalid("client_id", "must not be empty"));
    }

    let method = config.authentication_method;
    let secret = non_blank(config.client_secret.as_deref());

    if secret.is_some() && !method.is_some_and(|m| m.uses_shared_secret()) {
        return Err(CredentialsError::invalid(
            "client_secret",
            "only allowed with client_secret_post or client_secret_basic",
        ));
    }

    let binding = match method {
        Some(method) if method.uses_credentials() => {
            let credentials = expand_method_credentials(method, &config.credentials)?;
            Some(MethodBinding::new(method, credentials))
        }
        Some(method) => {
            if !config.credentials.is_empty() {
                return Err(CredentialsError::invalid(
                    "credentials",
                    format!("{method} does not use credentials"),
                ));
            }
            Some(MethodBinding::new(method, Vec::new()))
        }
        None => {
            if !config.credentials.is_empty() {
                return Err(CredentialsError::invalid(
                    "credentials",
                    "credentials require a credential-bearing authentication_method",
                ));
            }
            None
        }
    };

    let signed_request_object = config
        .signed_request_object
        .as_ref()
        .map(expand_signed_request_object)
        .transpose()?;

    Ok(CredentialsState {
        client_id: config.client_id.clone(),
        authentication_method: binding,
        client_secret: secret.map(str::to_string),
        signed_request_object,
    })
}

fn expand_method_credentials(
    method: AuthenticationMethod,
    descriptors: &[CredentialDescriptor],
) -> CredResult<Vec<Credential>> {
    if descriptors.is_empty() {
        return Err(CredentialsError::missing(
            "credentials",
            format!("{method} requires at least one credential"),
        ));
    }
    if let Some(max) = method.max_credentials()
        && descriptors.len() > max
    {
        return Err(CredentialsError::invalid(
            "credentials",
            format!("{method} accepts at most {max} credentials, got {}", descriptors.len()),
        ));
    }

    let expected = method
        .credential_type()
        .ok_or_else(|| CredentialsError::internal(format!("{method} has no credential type")))?;

    descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| expand_credential(&format!("credentials[{i}]"), expected, d))
        .collect()
}

fn expand_signed_request_object(
    descriptor: &SignedRequestObjectDescriptor,
) -> CredResult<SignedRequestObject> {
    if descriptor.credentials.is_empty() {
        return Err(CredentialsError::missing(
            "signed_request_object.credentials",
            "signed request object requires at least one credential",
        ));
    }
    let credentials = descriptor
        .credentials
        .iter()
        .enumerate()
        .map(|(i, d)| {
            expand_credential(
                &format!("signed_request_object.credentials[{i}]"),
                CredentialType::PublicKey,
                d,
            )
        })
        .collect::<CredResult<Vec<_>>>()?;

    Ok(SignedRequestObject {
        required: descriptor.required,
        credentials,
    })
}

/// Validates one descriptor against the credential type its binding needs.
fn expand_credential(
    path: &str,
    expected: CredentialType,
    descriptor: &CredentialDescriptor,
) -> CredResult<Credential> {
    let field = |name: &str| format!("{path}.{name}");

    if let Some(declared) = descriptor.credential_type
        && declared != expected
    {
        return Err(CredentialsError::invalid(
            field("credential_type"),
            format!("expected {expected}, got {declared}"),
        ));
    }

    let pem = non_blank(descriptor.pem.as_deref());
    let subject_dn = non_blank(descriptor.subject_dn.as_deref());

    match expected {
        CredentialType::CertSubjectDn => {
            if pem.is_some() == subject_dn.is_some() {
                return Err(CredentialsError::invalid(
                    path,
                    "exactly one of pem or subject_dn must be set",
                ));
            }
        }
        CredentialType::PublicKey | CredentialType::X509Cert => {
            if pem.is_none() {
                return Err(CredentialsError::invalid(field("pem"), "pem is required"));
            }
            if subject_dn.is_some() {
                return Err(CredentialsError::invalid(
                    field("subject_dn"),
                    format!("not allowed for {expected} credentials"),
                ));
            }
        }
    }

    if expected == CredentialType::X509Cert && !pem.is_some_and(cert::is_certificate) {
        return Err(CredentialsError::invalid(
            field("pem"),
            "x509_cert credentials require a CERTIFICATE PEM",
        ));
    }

    if expected != CredentialType::PublicKey {
        if descriptor.algorithm.is_some() {
            return Err(CredentialsError::invalid(
                field("algorithm"),
                "only allowed for public_key credentials",
            ));
        }
        if descriptor.parse_expiry_from_cert.is_some() {
            return Err(CredentialsError::invalid(
                field("parse_expiry_from_cert"),
                "only allowed for public_key credentials",
            ));
        }
    }

    let algorithm = descriptor
        .algorithm
        .as_deref()
        .map(|alg| {
            SigningAlgorithm::parse(alg).ok_or_else(|| {
                CredentialsError::invalid(
                    field("algorithm"),
                    format!("unsupported algorithm {alg}, expected RS256, RS384 or PS256"),
                )
            })
        })
        .transpose()?;

    let parse_expiry = descriptor.parse_expiry_from_cert.unwrap_or(false);
    if parse_expiry && !pem.is_some_and(cert::is_certificate) {
        return Err(CredentialsError::invalid(
            field("parse_expiry_from_cert"),
            "requires pem to be a certificate",
        ));
    }

    let expires_at = descriptor
        .expires_at
        .as_deref()
        .map(|raw| {
            OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| {
                CredentialsError::invalid(field("expires_at"), format!("not RFC 3339: {e}"))
            })
        })
        .transpose()?;

    let mut credential = Credential::new(expected).with_parse_expiry_from_cert(parse_expiry);
    credential.id = non_blank(descriptor.id.as_deref()).map(str::to_string);
    credential.name = non_blank(descriptor.name.as_deref()).map(str::to_string);
    credential.pem = pem.map(str::to_string);
    credential.subject_dn = subject_dn.map(str::to_string);
    credential.algorithm = algorithm;
    credential.expires_at = expires_at;
    Ok(credential)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
