//! Algorithm identifiers.

use const_oid::ObjectIdentifier;

/// `sha256WithRSAEncryption` (PKCS#1 v1.5).
pub const SHA256_WITH_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// `sha384WithRSAEncryption` (PKCS#1 v1.5).
pub const SHA384_WITH_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");

/// `sha512WithRSAEncryption` (PKCS#1 v1.5).
pub const SHA512_WITH_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

/// Digest algorithm used by a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Digest output size in bytes.
    #[must_use]
    pub const fn output_size(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Map an X.509 `signatureAlgorithm` OID to the digest it uses.
    ///
    /// Only the RSA PKCS#1 v1.5 family is recognised; certificate authorities
    /// for code signing are RSA roots.
    #[must_use]
    pub fn from_rsa_signature_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == SHA256_WITH_RSA_ENCRYPTION {
            Some(Self::Sha256)
        } else if *oid == SHA384_WITH_RSA_ENCRYPTION {
            Some(Self::Sha384)
        } else if *oid == SHA512_WITH_RSA_ENCRYPTION {
            Some(Self::Sha512)
        } else {
            None
        }
    }
}

/// Digest used for file contents and for the RSA-PSS message and MGF1.
///
/// Changing this breaks every manifest ever signed.
pub const CONTENT_DIGEST: DigestAlgorithm = DigestAlgorithm::Sha512;

/// Length of a hex-encoded [`CONTENT_DIGEST`] value.
pub const CONTENT_DIGEST_HEX_LEN: usize = CONTENT_DIGEST.output_size() * 2;
