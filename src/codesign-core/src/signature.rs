//! Manifest signatures over the canonical hash mapping.
//!
//! The canonical encoding is compact JSON of the sorted mapping:
//!
//! ```text
//! {"appinfo/info.xml":"<sha512hex>","lib/app.php":"<sha512hex>"}
//! ```
//!
//! Signer and verifier must produce these exact bytes; any whitespace or
//! ordering difference invalidates the signature.

use codesign_crypto::{PayloadSigner, PayloadVerifier};
use tracing::debug;

use crate::error::IntegrityError;
use crate::types::HashMapping;

/// Canonical byte encoding of a hash mapping.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn canonical_encoding(hashes: &HashMapping) -> Result<Vec<u8>, IntegrityError> {
    Ok(serde_json::to_vec(hashes)?)
}

/// Sign the canonical encoding of `hashes`.
///
/// # Errors
///
/// Returns error if encoding or signing fails.
pub fn sign(hashes: &HashMapping, signer: &dyn PayloadSigner) -> Result<Vec<u8>, IntegrityError> {
    let payload = canonical_encoding(hashes)?;
    let signature = signer.sign(&payload)?;
    debug!(
        scheme = signer.scheme(),
        files = hashes.len(),
        payload_len = payload.len(),
        "signature: signed hash mapping"
    );
    Ok(signature)
}

/// Verify `signature` over the canonical encoding of `hashes`.
///
/// Every failure, including an encoding error, is reported as `false`.
#[must_use]
pub fn verify(hashes: &HashMapping, signature: &[u8], verifier: &dyn PayloadVerifier) -> bool {
    match canonical_encoding(hashes) {
        Ok(payload) => verifier.verify(&payload, signature),
        Err(_) => false,
    }
}
