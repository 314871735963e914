//! X.509 helpers for credential material.
//!
//! Used to validate certificate PEMs before they are submitted and by the
//! in-memory backend to derive the values the remote side assigns.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use x509_parser::pem::parse_x509_pem;

use crate::CredResult;
use crate::error::CredentialsError;
use crate::types::credential::normalize_pem;

/// Returns `true` if the PEM block is an X.509 certificate.
#[must_use]
pub fn is_certificate(pem: &str) -> bool {
    pem.contains("-----BEGIN CERTIFICATE-----")
}

/// Decodes a PEM certificate into DER bytes.
fn certificate_der(pem: &str) -> CredResult<Vec<u8>> {
    let normalized = normalize_pem(pem);
    let (_, block) = parse_x509_pem(normalized.as_bytes())
        .map_err(|e| CredentialsError::invalid("pem", format!("invalid PEM: {e}")))?;
    if block.label != "CERTIFICATE" {
        return Err(CredentialsError::invalid(
            "pem",
            format!("expected a CERTIFICATE PEM block, found {}", block.label),
        ));
    }
    Ok(block.contents)
}

/// Returns the `notAfter` timestamp of a PEM certificate.
///
/// # Errors
///
/// Returns a `CredentialsInvalid` error if the PEM is not a parsable
/// certificate.
pub fn certificate_not_after(pem: &str) -> CredResult<OffsetDateTime> {
    let der = certificate_der(pem)?;
    let (_, cert) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| CredentialsError::invalid("pem", format!("failed to parse certificate: {e}")))?;
    Ok(cert.validity().not_after.to_datetime())
}

/// Returns the base64url SHA-256 thumbprint of a PEM certificate.
///
/// # Errors
///
/// Returns a `CredentialsInvalid` error if the PEM is not a certificate.
pub fn certificate_thumbprint(pem: &str) -> CredResult<String> {
    let der = certificate_der(pem)?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(&der)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const SIGNING_CERT: &str = include_str!("../tests/fixtures/signing_cert.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/public_key.pem");

    #[test]
    fn test_not_after_from_certificate() {
        assert_eq!(
            certificate_not_after(SIGNING_CERT).unwrap(),
            datetime!(2036-10-13 13:23:44 UTC)
        );
    }

    #[test]
    fn test_public_key_is_not_a_certificate() {
        assert!(!is_certificate(PUBLIC_KEY));
        assert!(is_certificate(SIGNING_CERT));
        let err = certificate_not_after(PUBLIC_KEY).unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_thumbprint_is_stable_base64url() {
        let first = certificate_thumbprint(SIGNING_CERT).unwrap();
        let second = certificate_thumbprint(&SIGNING_CERT.replace('\n', "\r\n")).unwrap();
        assert_eq!(first, second);
        // 32 bytes of SHA-256 encode to 43 unpadded base64url characters.
        assert_eq!(first.len(), 43);
        assert!(!first.contains('='));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(certificate_thumbprint("not a pem").is_err());
    }
}
