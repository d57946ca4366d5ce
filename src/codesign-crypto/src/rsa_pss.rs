//! RSA-PSS signatures with SHA-512.
//!
//! The message digest and the MGF1 digest are both SHA-512 and the salt is
//! as long as the digest (64 bytes). No other padding is accepted.

use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha512;

use crate::error::CryptoError;
use crate::signer::{PayloadSigner, PayloadVerifier};

const SCHEME: &str = "RSA-PSS-SHA512";

/// RSA-PSS (SHA-512) signer.
pub struct PssSigner {
    signing_key: BlindedSigningKey<Sha512>,
    public_key: RsaPublicKey,
}

impl PssSigner {
    /// Create a signer from an RSA private key.
    #[must_use]
    pub fn new(private_key: RsaPrivateKey) -> Self {
        let public_key = RsaPublicKey::from(&private_key);
        Self {
            signing_key: BlindedSigningKey::<Sha512>::new(private_key),
            public_key,
        }
    }

    /// Create a signer from a PEM private key.
    ///
    /// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) and PKCS#1
    /// (`BEGIN RSA PRIVATE KEY`) encodings.
    ///
    /// # Errors
    ///
    /// Returns error if the PEM is not an RSA private key in either form.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|pkcs8_err| {
                RsaPrivateKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
                    CryptoError::invalid_private_key(format!(
                        "not PKCS#8 ({pkcs8_err}) or PKCS#1 ({pkcs1_err})"
                    ))
                })
            })?;
        Ok(Self::new(private_key))
    }

    /// Get the public half of the key.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

impl PayloadSigner for PssSigner {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn public_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.public_key
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::invalid_public_key(e.to_string()))
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self
            .signing_key
            .try_sign_with_rng(&mut OsRng, data)
            .map_err(|e| CryptoError::signing_failed(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

/// RSA-PSS (SHA-512) verifier.
pub struct PssVerifier {
    verifying_key: VerifyingKey<Sha512>,
}

impl PssVerifier {
    /// Create a verifier from an RSA public key.
    #[must_use]
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self {
            verifying_key: VerifyingKey::<Sha512>::new(public_key),
        }
    }

    /// Create a verifier from a DER `SubjectPublicKeyInfo`, as found in an
    /// X.509 certificate.
    ///
    /// # Errors
    ///
    /// Returns error if the key is not an RSA public key.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, CryptoError> {
        let public_key = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| CryptoError::invalid_public_key(e.to_string()))?;
        Ok(Self::new(public_key))
    }
}

impl PayloadVerifier for PssVerifier {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        self.verifying_key.verify(data, &signature).is_ok()
    }
}
