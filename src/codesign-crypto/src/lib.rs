//! # codesign-crypto
//!
//! Cryptographic primitives for tree code signing.
//!
//! This crate wraps the RustCrypto implementations used by `codesign-core`:
//! - **Content digests**: SHA-512 over raw file bytes
//! - **Manifest signatures**: RSA-PSS, SHA-512 message digest and MGF1
//! - **Certificate signatures**: RSA PKCS#1 v1.5 (SHA-256/384/512), used
//!   only to check that a signing certificate was issued by the pinned root
//!
//! ## Fixed Algorithms
//!
//! The digest is a module-wide constant ([`CONTENT_DIGEST`]). Signer and
//! verifier must agree on it bit for bit:
//!
//! ```text
//! file digest   = hex(SHA-512(file bytes))
//! signature     = RSA-PSS-SHA512(canonical hash mapping)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod digest;
mod error;
mod pkcs1v15;
mod rsa_pss;
mod signer;
mod types;

pub use digest::{hash_file, sha512_hex};
pub use error::CryptoError;
pub use pkcs1v15::verify_pkcs1v15;
pub use rsa_pss::{PssSigner, PssVerifier};
pub use signer::{PayloadSigner, PayloadVerifier};
pub use types::{
    DigestAlgorithm, CONTENT_DIGEST, CONTENT_DIGEST_HEX_LEN, SHA256_WITH_RSA_ENCRYPTION,
    SHA384_WITH_RSA_ENCRYPTION, SHA512_WITH_RSA_ENCRYPTION,
};

/// Constant-time byte comparison.
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Returns `true` if the slices are equal, `false` otherwise.
///
/// The length check still returns early; digest lengths are public.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
