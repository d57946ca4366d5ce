//! Error types for signing and verification operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while signing or verifying a tree.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// No manifest exists at the expected path.
    #[error("Signature data not found: {}", path.display())]
    ManifestNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// Manifest exists but does not decode into the expected structure.
    #[error("Signature data is malformed: {reason}")]
    ManifestMalformed {
        /// Reason decoding failed.
        reason: String,
    },

    /// Certificate could not be parsed or was not issued by the pinned root.
    #[error("Certificate is not valid: {reason}")]
    CertificateChainInvalid {
        /// Reason the chain was rejected.
        reason: String,
    },

    /// Certificate chains correctly but is issued for a different scope.
    #[error("Certificate is not valid for required scope. (Requested: {requested}, current: {actual})")]
    CertificateScopeMismatch {
        /// Scope the caller asked for.
        requested: String,
        /// Subject of the presented certificate.
        actual: String,
    },

    /// Manifest signature does not verify under the certificate key.
    #[error("Signature could not get verified.")]
    SignatureInvalid,

    /// Signing key does not belong to the signing certificate.
    #[error("Private key does not match the certificate public key")]
    KeyMismatch,

    /// Application id could not be resolved to an install path.
    #[error("App not found: {app_id}")]
    AppNotFound {
        /// The unresolved application id.
        app_id: String,
    },

    /// Filesystem error during walk, read or write.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Encoding a manifest or a result document failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] codesign_crypto::CryptoError),
}

impl IntegrityError {
    /// Wrap an I/O error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable class name recorded in the `EXCEPTION` report.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ManifestNotFound { .. } => "ManifestNotFound",
            Self::ManifestMalformed { .. } => "ManifestMalformed",
            Self::CertificateChainInvalid { .. } => "CertificateChainInvalid",
            Self::CertificateScopeMismatch { .. } => "CertificateScopeMismatch",
            Self::SignatureInvalid => "SignatureInvalid",
            Self::KeyMismatch => "KeyMismatch",
            Self::AppNotFound { .. } => "AppNotFound",
            Self::Io { .. } => "IOFailure",
            Self::Serialization(_) => "Serialization",
            Self::Crypto(_) => "Crypto",
        }
    }

    /// Whether this error means the manifest or its certificate must not be
    /// trusted, as opposed to an environmental failure.
    #[must_use]
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            Self::ManifestMalformed { .. }
                | Self::CertificateChainInvalid { .. }
                | Self::CertificateScopeMismatch { .. }
                | Self::SignatureInvalid
        )
    }
}

impl From<serde_json::Error> for IntegrityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
