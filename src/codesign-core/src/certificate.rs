//! Certificate validation against the pinned root authority.
//!
//! A signing certificate is trusted for a scope only if all of these hold,
//! checked in order:
//!
//! 1. It parses as a PEM X.509 certificate.
//! 2. It was issued by the pinned root: issuer DN equals the root subject DN
//!    and the root key verifies the certificate signature.
//! 3. Its subject CN equals the requested scope, or equals `core`.
//!
//! The root is loaded once into a [`TrustAnchor`]. A certificate embedded in
//! a manifest is never consulted as a trust anchor.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use const_oid::ObjectIdentifier;
use tracing::{debug, warn};
use x509_cert::der::{DecodePem, Encode, Tag, Tagged};
use x509_cert::Certificate;

use codesign_crypto::{verify_pkcs1v15, DigestAlgorithm, PssVerifier};

use crate::error::IntegrityError;
use crate::types::CORE_SCOPE;

/// `id-at-commonName`
const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

fn chain_invalid(reason: impl Into<String>) -> IntegrityError {
    IntegrityError::CertificateChainInvalid {
        reason: reason.into(),
    }
}

fn parse_pem(pem: &[u8]) -> Result<Certificate, IntegrityError> {
    Certificate::from_pem(pem).map_err(|e| chain_invalid(format!("cannot parse certificate: {e}")))
}

fn spki_der(cert: &Certificate) -> Result<Vec<u8>, IntegrityError> {
    cert.tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| chain_invalid(format!("cannot encode public key: {e}")))
}

/// Extract the first CN attribute of the certificate subject.
fn common_name(cert: &Certificate) -> Option<String> {
    cert.tbs_certificate
        .subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == COMMON_NAME)
        .and_then(|atv| match atv.value.tag() {
            Tag::Utf8String | Tag::PrintableString | Tag::Ia5String => {
                std::str::from_utf8(atv.value.value()).ok().map(str::to_owned)
            },
            _ => None,
        })
}

/// The pinned root certificate.
///
/// Immutable after construction; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    certificate: Certificate,
    public_key_der: Vec<u8>,
}

impl TrustAnchor {
    /// Build a trust anchor from a PEM root certificate.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::CertificateChainInvalid`] if the PEM does not
    /// hold a certificate.
    pub fn from_pem(pem: &[u8]) -> Result<Self, IntegrityError> {
        let certificate = parse_pem(pem)?;
        let public_key_der = spki_der(&certificate)?;
        Ok(Self {
            certificate,
            public_key_der,
        })
    }

    /// Load the trust anchor from a file.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Io`] if the file cannot be read, or the
    /// errors of [`TrustAnchor::from_pem`].
    pub fn load(path: &Path) -> Result<Self, IntegrityError> {
        let pem = std::fs::read(path).map_err(|e| IntegrityError::io(path, e))?;
        let anchor = Self::from_pem(&pem)?;
        debug!(
            path = %path.display(),
            subject = %anchor.subject(),
            "certificate: loaded trust anchor"
        );
        Ok(anchor)
    }

    /// Root subject as an RFC 4514 string.
    #[must_use]
    pub fn subject(&self) -> String {
        self.certificate.tbs_certificate.subject.to_string()
    }

    /// Check that `cert` was issued and signed by this root.
    fn verify_issued(&self, cert: &Certificate) -> Result<(), IntegrityError> {
        let tbs = &cert.tbs_certificate;
        if tbs.issuer != self.certificate.tbs_certificate.subject {
            return Err(chain_invalid(format!(
                "issuer '{}' is not the trusted root",
                tbs.issuer
            )));
        }

        if cert.signature_algorithm != tbs.signature {
            return Err(chain_invalid("signature algorithm mismatch"));
        }
        let digest = DigestAlgorithm::from_rsa_signature_oid(&cert.signature_algorithm.oid)
            .ok_or_else(|| {
                chain_invalid(format!(
                    "unsupported signature algorithm {}",
                    cert.signature_algorithm.oid
                ))
            })?;

        let tbs_der = tbs
            .to_der()
            .map_err(|e| chain_invalid(format!("cannot encode certificate body: {e}")))?;
        let signature = cert
            .signature
            .as_bytes()
            .ok_or_else(|| chain_invalid("certificate signature has unused bits"))?;

        let valid = verify_pkcs1v15(&self.public_key_der, digest, &tbs_der, signature)
            .map_err(|e| chain_invalid(e.to_string()))?;
        if valid {
            Ok(())
        } else {
            Err(chain_invalid("certificate signature does not verify under the root key"))
        }
    }
}

/// A certificate that passed validation for a scope.
#[derive(Debug, Clone)]
pub struct ValidatedCertificate {
    common_name: String,
    public_key_der: Vec<u8>,
}

impl ValidatedCertificate {
    /// Subject CN.
    #[must_use]
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// DER `SubjectPublicKeyInfo`.
    #[must_use]
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// Verifier for manifest signatures made by this certificate's key.
    ///
    /// # Errors
    ///
    /// Returns error if the key is not an RSA key.
    pub fn signature_verifier(&self) -> Result<PssVerifier, IntegrityError> {
        Ok(PssVerifier::from_spki_der(&self.public_key_der)?)
    }
}

/// Validates signing certificates against a [`TrustAnchor`].
#[derive(Debug, Clone, Copy)]
pub struct CertificateValidator<'a> {
    anchor: &'a TrustAnchor,
    enforce_validity_period: bool,
}

impl<'a> CertificateValidator<'a> {
    /// Create a validator for `anchor`.
    #[must_use]
    pub fn new(anchor: &'a TrustAnchor) -> Self {
        Self {
            anchor,
            enforce_validity_period: false,
        }
    }

    /// Also reject certificates outside their validity window.
    #[must_use]
    pub fn with_validity_period(mut self, enforce: bool) -> Self {
        self.enforce_validity_period = enforce;
        self
    }

    /// Validate `pem` for `expected_scope`.
    ///
    /// A certificate whose CN is `core` is accepted for every scope.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::CertificateChainInvalid`] if the certificate
    /// does not parse or was not issued by the root, and
    /// [`IntegrityError::CertificateScopeMismatch`] if its CN does not match.
    pub fn validate(
        &self,
        pem: &str,
        expected_scope: &str,
    ) -> Result<ValidatedCertificate, IntegrityError> {
        let cert = parse_pem(pem.as_bytes())?;
        self.anchor.verify_issued(&cert)?;

        if self.enforce_validity_period {
            check_validity_period(&cert)?;
        }

        let subject = cert.tbs_certificate.subject.to_string();
        let cn = match common_name(&cert) {
            Some(cn) if cn == expected_scope || cn == CORE_SCOPE => cn,
            _ => {
                warn!(
                    requested = expected_scope,
                    subject = %subject,
                    "certificate: scope mismatch"
                );
                return Err(IntegrityError::CertificateScopeMismatch {
                    requested: expected_scope.to_string(),
                    actual: subject,
                });
            },
        };

        debug!(scope = expected_scope, cn = %cn, "certificate: validated");
        Ok(ValidatedCertificate {
            common_name: cn,
            public_key_der: spki_der(&cert)?,
        })
    }
}

/// Verifier for the key certified by `pem`, without any trust check.
///
/// Signing uses this to reject a private key that does not belong to the
/// certificate it is about to embed.
///
/// # Errors
///
/// Returns [`IntegrityError::CertificateChainInvalid`] if the PEM does not
/// hold a certificate, or a crypto error if the key is not RSA.
pub fn certified_key_verifier(pem: &str) -> Result<PssVerifier, IntegrityError> {
    let cert = parse_pem(pem.as_bytes())?;
    Ok(PssVerifier::from_spki_der(&spki_der(&cert)?)?)
}

fn check_validity_period(cert: &Certificate) -> Result<(), IntegrityError> {
    let validity = &cert.tbs_certificate.validity;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    if now < validity.not_before.to_unix_duration() {
        return Err(chain_invalid("certificate is not yet valid"));
    }
    if now > validity.not_after.to_unix_duration() {
        return Err(chain_invalid("certificate has expired"));
    }
    Ok(())
}
