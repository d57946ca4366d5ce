//! RSA PKCS#1 v1.5 verification for X.509 certificate signatures.
//!
//! Certificate authorities sign with `sha*WithRSAEncryption`; this module
//! checks those signatures. Manifest payloads never use it.

use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::CryptoError;
use crate::types::DigestAlgorithm;

/// Verify a PKCS#1 v1.5 signature made by the key in `spki_der`.
///
/// Returns `Ok(false)` for any signature that does not verify, and an error
/// only when the public key itself cannot be parsed.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPublicKey`] if `spki_der` is not an RSA key.
pub fn verify_pkcs1v15(
    spki_der: &[u8],
    digest: DigestAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let public_key = RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::invalid_public_key(e.to_string()))?;

    let Ok(signature) = Signature::try_from(signature) else {
        return Ok(false);
    };

    let valid = match digest {
        DigestAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(public_key)
            .verify(data, &signature)
            .is_ok(),
        DigestAlgorithm::Sha384 => VerifyingKey::<Sha384>::new(public_key)
            .verify(data, &signature)
            .is_ok(),
        DigestAlgorithm::Sha512 => VerifyingKey::<Sha512>::new(public_key)
            .verify(data, &signature)
            .is_ok(),
    };
    Ok(valid)
}
