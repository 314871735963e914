//! Client credential domain types.
//!
//! A [`Credential`] is one cryptographic artifact bound to a client: a public
//! key (or certificate) for `private_key_jwt` and signed request objects, a
//! certificate subject DN for CA-issued mTLS, or a self-signed certificate.
//! The field names follow the management API wire format.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cert;

// =============================================================================
// Credential Type
// =============================================================================

/// Kind of material a credential carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// PEM public key or certificate used to verify signed JWTs.
    PublicKey,
    /// Subject distinguished name of a CA-issued client certificate.
    CertSubjectDn,
    /// PEM encoded self-signed X.509 certificate.
    X509Cert,
}

impl CredentialType {
    /// Returns the wire name of the credential type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PublicKey => "public_key",
            Self::CertSubjectDn => "cert_subject_dn",
            Self::X509Cert => "x509_cert",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Signing Algorithm
// =============================================================================

/// Signing algorithms accepted for `public_key` credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 using SHA-256.
    #[default]
    RS256,
    /// RSASSA-PKCS1-v1_5 using SHA-384.
    RS384,
    /// RSASSA-PSS using SHA-256.
    PS256,
}

impl SigningAlgorithm {
    /// Returns the JOSE name of the algorithm.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::PS256 => "PS256",
        }
    }

    /// Parses a JOSE algorithm name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RS256" => Some(Self::RS256),
            "RS384" => Some(Self::RS384),
            "PS256" => Some(Self::PS256),
            _ => None,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Credential
// =============================================================================

/// Outcome of comparing a desired credential with an observed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMatch {
    /// Every immutable field matches.
    Same,
    /// At least one immutable field differs.
    Different,
    /// The checkable fields match but the observed side does not reveal
    /// the key material.
    Unverifiable,
}

/// A credential bound to a client.
///
/// Desired credentials produced by the expander carry no remote-assigned
/// fields; observed credentials returned by the management API carry all of
/// them. Once created, only `expires_at` may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Remote identifier, `None` until the credential is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Friendly label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Kind of material carried by the credential.
    pub credential_type: CredentialType,

    /// PEM material. Immutable after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pem: Option<String>,

    /// Subject DN for CA-issued mTLS certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_dn: Option<String>,

    /// Signing algorithm, only meaningful for `public_key`.
    #[serde(default, rename = "alg", skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<SigningAlgorithm>,

    /// Derive `expires_at` from the certificate in `pem`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_expiry_from_cert: bool,

    /// Expiry timestamp; the only field that may be updated in place.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,

    /// Creation timestamp (remote-assigned).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub created_at: Option<OffsetDateTime>,

    /// Last update timestamp (remote-assigned).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub updated_at: Option<OffsetDateTime>,

    /// Key identifier (remote-assigned).
    #[serde(default, rename = "kid", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// SHA-256 certificate thumbprint, only for self-signed certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint_sha256: Option<String>,
}

impl Credential {
    /// Creates an empty credential of the given type.
    #[must_use]
    pub fn new(credential_type: CredentialType) -> Self {
        Self {
            id: None,
            name: None,
            credential_type,
            pem: None,
            subject_dn: None,
            algorithm: None,
            parse_expiry_from_cert: false,
            expires_at: None,
            created_at: None,
            updated_at: None,
            key_id: None,
            thumbprint_sha256: None,
        }
    }

    /// Sets the remote identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the friendly name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the PEM material.
    #[must_use]
    pub fn with_pem(mut self, pem: impl Into<String>) -> Self {
        self.pem = Some(pem.into());
        self
    }

    /// Sets the certificate subject DN.
    #[must_use]
    pub fn with_subject_dn(mut self, subject_dn: impl Into<String>) -> Self {
        self.subject_dn = Some(subject_dn.into());
        self
    }

    /// Sets the signing algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// Requests that the expiry be derived from the certificate.
    #[must_use]
    pub fn with_parse_expiry_from_cert(mut self, parse: bool) -> Self {
        self.parse_expiry_from_cert = parse;
        self
    }

    /// Sets the expiry timestamp.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns the signing algorithm in effect.
    ///
    /// `public_key` credentials default to `RS256`; other types have none.
    #[must_use]
    pub fn effective_algorithm(&self) -> Option<SigningAlgorithm> {
        match self.credential_type {
            CredentialType::PublicKey => Some(self.algorithm.unwrap_or_default()),
            _ => None,
        }
    }

    /// Compares the immutable fields of `self` against `observed`.
    ///
    /// The remote side never echoes `pem`. Self-signed certificates are
    /// still compared through `thumbprint_sha256`; other material that
    /// cannot be checked yields [`IdentityMatch::Unverifiable`].
    #[must_use]
    pub fn compare_identity(&self, observed: &Credential) -> IdentityMatch {
        if self.credential_type != observed.credential_type {
            return IdentityMatch::Different;
        }
        if self.name.is_some() && self.name != observed.name {
            return IdentityMatch::Different;
        }
        if self.subject_dn != observed.subject_dn {
            return IdentityMatch::Different;
        }
        if observed.algorithm.is_some() && self.effective_algorithm() != observed.effective_algorithm()
        {
            return IdentityMatch::Different;
        }

        match (&self.pem, &observed.pem) {
            (Some(desired), Some(actual)) if normalize_pem(desired) != normalize_pem(actual) => {
                IdentityMatch::Different
            }
            (Some(desired), None) => match (&self.credential_type, &observed.thumbprint_sha256) {
                (CredentialType::X509Cert, Some(thumbprint)) => {
                    match cert::certificate_thumbprint(desired) {
                        Ok(computed) if &computed == thumbprint => IdentityMatch::Same,
                        _ => IdentityMatch::Different,
                    }
                }
                _ => IdentityMatch::Unverifiable,
            },
            _ => IdentityMatch::Same,
        }
    }

    /// Returns `true` if `observed` provably carries the same immutable
    /// fields.
    #[must_use]
    pub fn same_identity(&self, observed: &Credential) -> bool {
        self.compare_identity(observed) == IdentityMatch::Same
    }

    /// Builds the creation payload for this credential.
    #[must_use]
    pub fn to_new_credential(&self) -> NewCredential {
        NewCredential {
            credential_type: self.credential_type,
            name: self.name.clone(),
            pem: self.pem.clone(),
            subject_dn: self.subject_dn.clone(),
            algorithm: match self.credential_type {
                CredentialType::PublicKey => self.effective_algorithm(),
                _ => None,
            },
            parse_expiry_from_cert: self.parse_expiry_from_cert,
            expires_at: self.expires_at,
        }
    }

    /// Returns a short human label for logs.
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.id, &self.name) {
            (Some(id), Some(name)) => format!("{name} ({id})"),
            (Some(id), None) => id.clone(),
            (None, Some(name)) => name.clone(),
            (None, None) => format!("unnamed {}", self.credential_type),
        }
    }
}

/// Normalizes PEM text for comparison (line endings and surrounding space).
#[must_use]
pub fn normalize_pem(pem: &str) -> String {
    pem.replace("\r\n", "\n").trim().to_string()
}

// =============================================================================
// Request Payloads
// =============================================================================

/// Payload for creating a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCredential {
    /// Kind of material carried by the credential.
    pub credential_type: CredentialType,

    /// Friendly label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// PEM material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pem: Option<String>,

    /// Subject DN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_dn: Option<String>,

    /// Signing algorithm.
    #[serde(default, rename = "alg", skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<SigningAlgorithm>,

    /// Derive the expiry from the certificate.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_expiry_from_cert: bool,

    /// Explicit expiry; wins over the certificate expiry.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

/// Payload for the in-place credential update.
///
/// The management API only supports changing the expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    /// New expiry timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}
