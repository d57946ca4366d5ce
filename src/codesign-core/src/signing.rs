//! Manifest production.
//!
//! Signing needs no trust anchor: the certificate is embedded as given and
//! only checked against the signing key. Whether it chains to the pinned
//! root is decided at verification time.

use std::path::Path;
use std::sync::Arc;

use codesign_crypto::PayloadSigner;
use tracing::{info, instrument, warn};

use crate::certificate::certified_key_verifier;
use crate::config::IntegrityConfig;
use crate::error::IntegrityError;
use crate::locator::{AppLocator, DirectoryAppLocator};
use crate::manifest::Manifest;
use crate::signature;
use crate::types::{APP_MANIFEST_PATH, CORE_MANIFEST_PATH};
use crate::walker::HashWalker;

/// Hashes trees and writes signed manifests into them.
pub struct TreeSigner {
    config: IntegrityConfig,
    locator: Arc<dyn AppLocator>,
    walker: HashWalker,
}

impl std::fmt::Debug for TreeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSigner")
            .field("platform_root", &self.config.platform_root)
            .finish_non_exhaustive()
    }
}

impl TreeSigner {
    /// Create a signer resolving app ids through `locator`.
    pub fn new(config: IntegrityConfig, locator: Arc<dyn AppLocator>) -> Self {
        let walker = HashWalker::new(&config);
        Self {
            config,
            locator,
            walker,
        }
    }

    /// Create a signer with the directory locator for `config`.
    pub fn from_config(config: IntegrityConfig) -> Self {
        let locator = Arc::new(DirectoryAppLocator::from_config(&config));
        Self::new(config, locator)
    }

    /// Hash `root`, sign the mapping and write `<root>/appinfo/signature.json`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::KeyMismatch`] if `signer` does not hold the
    /// key certified by `certificate_pem`, or any hashing, signing or write
    /// error. Nothing is written on error.
    pub fn sign_tree(
        &self,
        root: &Path,
        certificate_pem: &str,
        signer: &dyn PayloadSigner,
    ) -> Result<Manifest, IntegrityError> {
        self.sign_into(root, &root.join(APP_MANIFEST_PATH), certificate_pem, signer)
    }

    /// Sign an installed app by id.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::AppNotFound`] if the id cannot be resolved,
    /// or the errors of [`TreeSigner::sign_tree`].
    pub fn sign_app(
        &self,
        app_id: &str,
        certificate_pem: &str,
        signer: &dyn PayloadSigner,
    ) -> Result<Manifest, IntegrityError> {
        let root = self.locator.app_path(app_id)?;
        self.sign_tree(&root, certificate_pem, signer)
    }

    /// Sign the platform tree into `core/signature.json`.
    ///
    /// # Errors
    ///
    /// Same as [`TreeSigner::sign_tree`].
    pub fn sign_core(
        &self,
        certificate_pem: &str,
        signer: &dyn PayloadSigner,
    ) -> Result<Manifest, IntegrityError> {
        let root = &self.config.platform_root;
        self.sign_into(root, &root.join(CORE_MANIFEST_PATH), certificate_pem, signer)
    }

    #[instrument(skip_all, fields(root = %root.display()))]
    fn sign_into(
        &self,
        root: &Path,
        manifest_path: &Path,
        certificate_pem: &str,
        signer: &dyn PayloadSigner,
    ) -> Result<Manifest, IntegrityError> {
        // Parse up front so a bad certificate fails before hashing
        let verifier = certified_key_verifier(certificate_pem)?;

        let hashes = self.walker.hash_tree(root)?;
        let signature = signature::sign(&hashes, signer)?;

        // The signature must verify under the certificate key, otherwise the
        // manifest could never pass verification.
        if !signature::verify(&hashes, &signature, &verifier) {
            warn!("Signer: signing key does not match certificate");
            return Err(IntegrityError::KeyMismatch);
        }

        let manifest = Manifest {
            hashes,
            signature,
            certificate: certificate_pem.to_string(),
        };
        manifest.write_atomic(manifest_path)?;
        info!(
            manifest = %manifest_path.display(),
            files = manifest.hashes.len(),
            scheme = signer.scheme(),
            "Signer: tree signed"
        );
        Ok(manifest)
    }
}
