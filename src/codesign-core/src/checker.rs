//! Signing and verification orchestration.
//!
//! ## Verification Flow
//!
//! ```text
//! LoadingManifest ─► ValidatingCertificate ─► VerifyingSignature
//!                                                   │
//!                      Done ◄─ Diffing ◄─ RecomputingHashes
//! ```
//!
//! Any stage may abort. An aborted run never yields a partial diff: it is
//! reported as the `EXCEPTION` sentinel so a broken manifest can never pass
//! as a clean tree.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use codesign_crypto::PayloadSigner;
use tracing::{debug, error, info, instrument, warn};

use crate::certificate::{CertificateValidator, TrustAnchor};
use crate::config::IntegrityConfig;
use crate::diff::{diff, DifferenceReport};
use crate::error::IntegrityError;
use crate::locator::{AppLocator, DirectoryAppLocator};
use crate::manifest::Manifest;
use crate::signature;
use crate::signing::TreeSigner;
use crate::store::{CachedResultStore, FileResultStore, MemoryResultStore, ResultStore};
use crate::types::{APP_MANIFEST_PATH, CORE_MANIFEST_PATH, CORE_SCOPE};
use crate::walker::HashWalker;

/// Stage of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    /// Reading and decoding the manifest.
    LoadingManifest,
    /// Checking the embedded certificate against the root.
    ValidatingCertificate,
    /// Checking the manifest signature.
    VerifyingSignature,
    /// Hashing the live tree.
    RecomputingHashes,
    /// Comparing signed and live hashes.
    Diffing,
    /// Finished.
    Done,
}

impl fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadingManifest => "loading manifest",
            Self::ValidatingCertificate => "validating certificate",
            Self::VerifyingSignature => "verifying signature",
            Self::RecomputingHashes => "recomputing hashes",
            Self::Diffing => "diffing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// A verification run that stopped before producing a diff.
#[derive(Debug)]
pub struct Aborted {
    /// Stage that failed.
    pub stage: VerificationStage,
    /// Why it failed.
    pub error: IntegrityError,
}

impl Aborted {
    fn at(stage: VerificationStage) -> impl FnOnce(IntegrityError) -> Self {
        move |error| Self { stage, error }
    }
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "verification aborted while {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for Aborted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Signs trees and verifies them against their manifests.
///
/// All collaborators are shared and read-only except the result store.
pub struct Checker {
    config: IntegrityConfig,
    anchor: Arc<TrustAnchor>,
    locator: Arc<dyn AppLocator>,
    store: Arc<dyn ResultStore>,
    signer: TreeSigner,
    walker: HashWalker,
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checker")
            .field("platform_root", &self.config.platform_root)
            .field("anchor", &self.anchor.subject())
            .finish_non_exhaustive()
    }
}

impl Checker {
    /// Create a checker from explicit collaborators.
    pub fn new(
        config: IntegrityConfig,
        anchor: Arc<TrustAnchor>,
        locator: Arc<dyn AppLocator>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let walker = HashWalker::new(&config);
        let signer = TreeSigner::new(config.clone(), Arc::clone(&locator));
        Self {
            config,
            anchor,
            locator,
            store,
            signer,
            walker,
        }
    }

    /// Create a checker with the default collaborators for `config`.
    ///
    /// Results persist to `config.result_store_path` when set and stay in
    /// memory otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if the root certificate cannot be loaded.
    pub fn from_config(config: IntegrityConfig) -> Result<Self, IntegrityError> {
        info!(
            platform_root = %config.platform_root.display(),
            root_certificate = %config.root_certificate_path().display(),
            "Checker: initializing"
        );
        let anchor = Arc::new(TrustAnchor::load(&config.root_certificate_path())?);
        let locator: Arc<dyn AppLocator> = Arc::new(DirectoryAppLocator::from_config(&config));
        let store: Arc<dyn ResultStore> = match config.result_store_path {
            Some(ref path) => Arc::new(CachedResultStore::new(FileResultStore::new(path))),
            None => Arc::new(MemoryResultStore::new()),
        };
        Ok(Self::new(config, anchor, locator, store))
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &IntegrityConfig {
        &self.config
    }

    // =========================================================================
    // Signing
    // =========================================================================

    /// Hash `root`, sign the mapping and write `<root>/appinfo/signature.json`.
    ///
    /// # Errors
    ///
    /// See [`TreeSigner::sign_tree`].
    pub fn sign_tree(
        &self,
        root: &Path,
        certificate_pem: &str,
        signer: &dyn PayloadSigner,
    ) -> Result<Manifest, IntegrityError> {
        self.signer.sign_tree(root, certificate_pem, signer)
    }

    /// Sign an installed app by id.
    ///
    /// # Errors
    ///
    /// See [`TreeSigner::sign_app`].
    pub fn sign_app(
        &self,
        app_id: &str,
        certificate_pem: &str,
        signer: &dyn PayloadSigner,
    ) -> Result<Manifest, IntegrityError> {
        self.signer.sign_app(app_id, certificate_pem, signer)
    }

    /// Sign the platform tree into `core/signature.json`.
    ///
    /// # Errors
    ///
    /// See [`TreeSigner::sign_core`].
    pub fn sign_core(
        &self,
        certificate_pem: &str,
        signer: &dyn PayloadSigner,
    ) -> Result<Manifest, IntegrityError> {
        self.signer.sign_core(certificate_pem, signer)
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Verify `root` against the manifest at `manifest_path` for `scope`,
    /// reporting where an aborted run stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Aborted`] if any stage before the diff fails.
    pub fn try_verify_tree(
        &self,
        manifest_path: &Path,
        root: &Path,
        scope: &str,
    ) -> Result<DifferenceReport, Aborted> {
        use VerificationStage::*;

        debug!(scope, stage = %LoadingManifest, path = %manifest_path.display(), "Checker: stage");
        let manifest = Manifest::load(manifest_path).map_err(Aborted::at(LoadingManifest))?;

        debug!(scope, stage = %ValidatingCertificate, "Checker: stage");
        let certificate = CertificateValidator::new(&self.anchor)
            .with_validity_period(self.config.enforce_validity_period)
            .validate(&manifest.certificate, scope)
            .map_err(Aborted::at(ValidatingCertificate))?;

        debug!(scope, stage = %VerifyingSignature, cn = certificate.common_name(), "Checker: stage");
        let verifier = certificate
            .signature_verifier()
            .map_err(Aborted::at(VerifyingSignature))?;
        if !signature::verify(&manifest.hashes, &manifest.signature, &verifier) {
            return Err(Aborted::at(VerifyingSignature)(IntegrityError::SignatureInvalid));
        }

        debug!(scope, stage = %RecomputingHashes, "Checker: stage");
        let current = self
            .walker
            .hash_tree(root)
            .map_err(Aborted::at(RecomputingHashes))?;

        debug!(scope, stage = %Diffing, "Checker: stage");
        let report = diff(&manifest.hashes, &current);

        debug!(scope, stage = %Done, differences = ?report.discrepancies().map(|d| d.len()), "Checker: stage");
        Ok(report)
    }

    /// Verify `root` against the manifest at `manifest_path` for `scope`.
    ///
    /// Never fails: an aborted run is returned as the `EXCEPTION` report.
    #[must_use]
    pub fn verify_tree(&self, manifest_path: &Path, root: &Path, scope: &str) -> DifferenceReport {
        match self.try_verify_tree(manifest_path, root, scope) {
            Ok(report) => report,
            Err(aborted) => {
                if aborted.error.is_trust_failure() {
                    error!(
                        scope,
                        stage = %aborted.stage,
                        class = aborted.error.kind(),
                        "Checker: manifest not trusted: {}", aborted.error
                    );
                } else {
                    warn!(
                        scope,
                        stage = %aborted.stage,
                        class = aborted.error.kind(),
                        "Checker: verification aborted: {}", aborted.error
                    );
                }
                DifferenceReport::exception(&aborted.error)
            },
        }
    }

    /// Verify an installed app and record the result under its id.
    #[instrument(skip(self))]
    pub fn verify_app_signature(&self, app_id: &str) -> DifferenceReport {
        let report = match self.locator.app_path(app_id) {
            Ok(root) => self.verify_tree(&root.join(APP_MANIFEST_PATH), &root, app_id),
            Err(e) => {
                warn!(app_id, "Checker: {}", e);
                DifferenceReport::exception(&e)
            },
        };
        self.record(app_id, &report);
        report
    }

    /// Verify the platform tree and record the result under `core`.
    #[instrument(skip(self))]
    pub fn verify_core_signature(&self) -> DifferenceReport {
        let root = &self.config.platform_root;
        let report = self.verify_tree(&root.join(CORE_MANIFEST_PATH), root, CORE_SCOPE);
        self.record(CORE_SCOPE, &report);
        report
    }

    fn record(&self, scope: &str, report: &DifferenceReport) {
        let stored = if report.is_empty() {
            self.store.remove(scope)
        } else {
            self.store.set(scope, report)
        };
        if let Err(e) = stored {
            warn!(scope, "Checker: failed to store result: {}", e);
        }

        if report.is_empty() {
            info!(scope, "Checker: integrity check passed");
        } else {
            warn!(scope, "Checker: integrity check failed");
        }
    }

    /// Whether the last recorded result for `scope` is clean.
    ///
    /// Scopes never verified count as passing.
    #[must_use]
    pub fn has_passed(&self, scope: &str) -> bool {
        self.store.get(scope).map_or(true, |report| report.is_empty())
    }

    /// Whether every recorded result is clean.
    #[must_use]
    pub fn has_passed_check(&self) -> bool {
        self.store.all().values().all(DifferenceReport::is_empty)
    }

    /// All recorded failures, by scope.
    #[must_use]
    pub fn results(&self) -> std::collections::BTreeMap<String, DifferenceReport> {
        self.store.all()
    }

    /// Verify the platform and the given apps.
    ///
    /// The platform is always verified. An app is verified when it ships
    /// with the platform or carries a manifest; other apps are skipped.
    #[instrument(skip_all, fields(apps = app_ids.len()))]
    pub fn run_instance_verification(&self, app_ids: &[String]) -> InstanceReport {
        let mut report = InstanceReport {
            core: self.verify_core_signature(),
            ..InstanceReport::default()
        };

        for app_id in app_ids {
            if !self.should_verify_app(app_id) {
                debug!(app_id = %app_id, "Checker: unsigned app skipped");
                report.skipped.push(app_id.clone());
                continue;
            }
            let result = self.verify_app_signature(app_id);
            report.apps.push((app_id.clone(), result));
        }

        info!(
            verified_apps = report.apps.len(),
            skipped_apps = report.skipped.len(),
            passed = report.passed(),
            "Checker: instance verification finished"
        );
        report
    }

    /// Verify the platform and every installed app.
    pub fn run_full_instance_verification(&self) -> InstanceReport {
        self.run_instance_verification(&self.locator.all_app_ids())
    }

    fn should_verify_app(&self, app_id: &str) -> bool {
        if self.locator.is_shipped(app_id) {
            return true;
        }
        self.locator
            .app_path(app_id)
            .map(|root| root.join(APP_MANIFEST_PATH).is_file())
            .unwrap_or(false)
    }
}

/// Outcome of an instance-wide verification.
#[derive(Debug, Clone, Default)]
pub struct InstanceReport {
    /// Platform result.
    pub core: DifferenceReport,
    /// Verified apps and their results, in request order.
    pub apps: Vec<(String, DifferenceReport)>,
    /// Apps skipped because they are neither shipped nor signed.
    pub skipped: Vec<String>,
}

impl InstanceReport {
    /// Whether the platform and every verified app are clean.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.core.is_empty() && self.apps.iter().all(|(_, r)| r.is_empty())
    }

    /// Non-empty results, by scope.
    #[must_use]
    pub fn failures(&self) -> Vec<(&str, &DifferenceReport)> {
        std::iter::once((CORE_SCOPE, &self.core))
            .chain(self.apps.iter().map(|(id, r)| (id.as_str(), r)))
            .filter(|(_, r)| !r.is_empty())
            .collect()
    }
}
