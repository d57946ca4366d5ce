//! Signing and verification traits.
//!
//! Manifest signing only ever goes through these traits, so callers can swap
//! in an HSM-backed signer without touching the orchestration code.

use crate::error::CryptoError;

/// Produces signatures over an opaque payload.
pub trait PayloadSigner {
    /// Human-readable scheme name (for logs).
    fn scheme(&self) -> &'static str;

    /// DER-encoded `SubjectPublicKeyInfo` of the signing key.
    fn public_key_der(&self) -> Result<Vec<u8>, CryptoError>;

    /// Sign data and return the raw signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Verifies signatures over an opaque payload.
///
/// Verification answers only yes or no. A malformed signature and a
/// well-formed but wrong one are indistinguishable to the caller.
pub trait PayloadVerifier {
    /// Human-readable scheme name (for logs).
    fn scheme(&self) -> &'static str;

    /// Verify `signature` over `data`.
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
}
