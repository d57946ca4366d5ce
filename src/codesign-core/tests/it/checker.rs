//! End-to-end signing and verification against a temporary platform tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use codesign_core::types::{APP_MANIFEST_PATH, CORE_MANIFEST_PATH, ROOT_CERTIFICATE_PATH};
use codesign_core::{
    Checker, DirectoryAppLocator, IntegrityConfig, IntegrityError, Manifest, MemoryResultStore,
    TreeSigner, TrustAnchor, VerificationStage,
};
use codesign_crypto::PssSigner;

const ROOT: &str = include_str!("../fixtures/root.crt");
const CORE_CERT: &str = include_str!("../fixtures/core.crt");
const CORE_KEY: &str = include_str!("../fixtures/core.key");
const CORE_PKCS1_KEY: &str = include_str!("../fixtures/core.pkcs1.key");
const CALENDAR_CERT: &str = include_str!("../fixtures/calendar.crt");
const CALENDAR_KEY: &str = include_str!("../fixtures/calendar.key");
const CONTACTS_CERT: &str = include_str!("../fixtures/contacts.crt");
const CONTACTS_KEY: &str = include_str!("../fixtures/contacts.key");
const ROGUE_CALENDAR_CERT: &str = include_str!("../fixtures/rogue-calendar.crt");
const ROGUE_CALENDAR_KEY: &str = include_str!("../fixtures/rogue-calendar.key");
const FORGED_CALENDAR_CERT: &str = include_str!("../fixtures/forged-calendar.crt");
const FORGED_CALENDAR_KEY: &str = include_str!("../fixtures/forged-calendar.key");

// =============================================================================
// Fixture platform
// =============================================================================

/// A platform install in a temp dir:
///
/// ```text
/// index.php, lib/base.php, core/shipped.json (ships "calendar")
/// resources/codesigning/root.crt
/// data/, config/                 (excluded)
/// apps/{calendar,contacts,notes} (appinfo/info.xml, lib/app.php)
/// ```
struct Platform {
    dir: tempfile::TempDir,
}

impl Platform {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let platform = Self { dir };

        platform.write(ROOT_CERTIFICATE_PATH, ROOT);
        platform.write("index.php", "<?php require 'lib/base.php';\n");
        platform.write("lib/base.php", "<?php // base\n");
        platform.write("core/shipped.json", r#"{"shippedApps": ["calendar"]}"#);
        platform.write("data/admin/files/notes.txt", "user data");
        platform.write("config/config.php", "<?php $CONFIG = [];\n");

        for app in ["calendar", "contacts", "notes"] {
            platform.write(
                &format!("apps/{app}/appinfo/info.xml"),
                &format!("<info><id>{app}</id></info>\n"),
            );
            platform.write(&format!("apps/{app}/lib/app.php"), &format!("<?php // {app}\n"));
        }
        platform
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn app(&self, app_id: &str) -> PathBuf {
        self.root().join("apps").join(app_id)
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn config(&self) -> IntegrityConfig {
        IntegrityConfig::for_platform_root(self.root())
    }

    fn checker(&self) -> Checker {
        Checker::from_config(self.config()).unwrap()
    }
}

fn signer(key_pem: &str) -> PssSigner {
    PssSigner::from_pem(key_pem).unwrap()
}

fn sign_app(checker: &Checker, app_id: &str, cert: &str, key: &str) -> Manifest {
    checker.sign_app(app_id, cert, &signer(key)).unwrap()
}

fn exception_class(report: &codesign_core::DifferenceReport) -> &str {
    report
        .failure()
        .map(|f| f.class.as_str())
        .unwrap_or_else(|| panic!("expected EXCEPTION report, got {report:?}"))
}

// =============================================================================
// Round trip and single-change detection
// =============================================================================

#[test]
fn test_sign_then_verify_is_clean() {
    let platform = Platform::new();
    let checker = platform.checker();

    let manifest = sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);
    assert_eq!(
        manifest.hashes.keys().collect::<Vec<_>>(),
        vec!["appinfo/info.xml", "lib/app.php"]
    );
    assert!(platform.app("calendar").join(APP_MANIFEST_PATH).is_file());

    let report = checker.verify_app_signature("calendar");
    assert!(report.is_empty(), "unexpected report: {report:?}");
    assert!(checker.has_passed("calendar"));
    assert!(checker.has_passed_check());
}

#[test]
fn test_manifest_on_disk_round_trips() {
    let platform = Platform::new();
    let checker = platform.checker();

    let manifest = sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);
    let loaded = Manifest::load(&platform.app("calendar").join(APP_MANIFEST_PATH)).unwrap();
    assert_eq!(loaded, manifest);
    assert_eq!(loaded.certificate, CALENDAR_CERT);
}

#[test]
fn test_modified_file_is_single_invalid_hash() {
    let platform = Platform::new();
    let checker = platform.checker();
    sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);

    platform.write("apps/calendar/lib/app.php", "<?php // backdoor\n");

    let report = checker.verify_app_signature("calendar");
    let d = report.discrepancies().unwrap();
    assert_eq!(d.len(), 1);
    let entry = &d.invalid_hashes["lib/app.php"];
    assert_eq!(entry.current, codesign_crypto::sha512_hex(b"<?php // backdoor\n"));
    assert_ne!(entry.expected, entry.current);
    assert!(!checker.has_passed("calendar"));
}

#[test]
fn test_added_file_is_single_extra_file() {
    let platform = Platform::new();
    let checker = platform.checker();
    sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);

    platform.write("apps/calendar/lib/shell.php", "<?php system($_GET['c']);\n");

    let report = checker.verify_app_signature("calendar");
    let d = report.discrepancies().unwrap();
    assert_eq!(d.len(), 1);
    assert_eq!(d.extra_files["lib/shell.php"].expected, "");
}

#[test]
fn test_deleted_file_is_single_file_missing() {
    let platform = Platform::new();
    let checker = platform.checker();
    sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);

    fs::remove_file(platform.app("calendar").join("lib/app.php")).unwrap();

    let report = checker.verify_app_signature("calendar");
    let d = report.discrepancies().unwrap();
    assert_eq!(d.len(), 1);
    assert_eq!(d.missing_files["lib/app.php"].current, "");
}

#[test]
fn test_excluded_files_do_not_affect_result() {
    let platform = Platform::new();
    let checker = platform.checker();
    sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);

    platform.write("apps/calendar/.git/HEAD", "ref: refs/heads/main");
    platform.write("apps/calendar/lib/.DS_Store", "finder");
    platform.write("apps/calendar/lib/app.php.swp", "vim");

    assert!(checker.verify_app_signature("calendar").is_empty());
}

#[test]
fn test_hash_mapping_is_deterministic() {
    let platform = Platform::new();
    let checker = platform.checker();

    let first = sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);
    let second = sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);

    assert_eq!(
        serde_json::to_vec(&first.hashes).unwrap(),
        serde_json::to_vec(&second.hashes).unwrap()
    );
    // PSS signatures differ between runs; the rewritten manifest still verifies
    assert!(checker.verify_app_signature("calendar").is_empty());
}

// =============================================================================
// Trust failures
// =============================================================================

#[test]
fn test_foreign_issuer_is_rejected_before_signature_check() {
    let platform = Platform::new();
    let checker = platform.checker();
    sign_app(&checker, "calendar", ROGUE_CALENDAR_CERT, ROGUE_CALENDAR_KEY);

    let app = platform.app("calendar");
    let aborted = checker
        .try_verify_tree(&app.join(APP_MANIFEST_PATH), &app, "calendar")
        .unwrap_err();
    assert_eq!(aborted.stage, VerificationStage::ValidatingCertificate);
    assert!(matches!(aborted.error, IntegrityError::CertificateChainInvalid { .. }));

    let report = checker.verify_app_signature("calendar");
    assert_eq!(exception_class(&report), "CertificateChainInvalid");
    assert!(!checker.has_passed("calendar"));
}

#[test]
fn test_lookalike_root_is_rejected_by_signature_check() {
    // Issuer DN equals the pinned root subject, the issuing key does not
    let platform = Platform::new();
    let checker = platform.checker();
    sign_app(&checker, "calendar", FORGED_CALENDAR_CERT, FORGED_CALENDAR_KEY);

    let app = platform.app("calendar");
    let aborted = checker
        .try_verify_tree(&app.join(APP_MANIFEST_PATH), &app, "calendar")
        .unwrap_err();
    assert_eq!(aborted.stage, VerificationStage::ValidatingCertificate);
    match aborted.error {
        IntegrityError::CertificateChainInvalid { ref reason } => {
            assert!(reason.contains("does not verify"), "reason: {reason}");
        },
        ref other => panic!("unexpected error: {other:?}"),
    }

    let report = checker.verify_app_signature("calendar");
    assert_eq!(exception_class(&report), "CertificateChainInvalid");
    assert!(!checker.has_passed("calendar"));
}

#[test]
fn test_core_certificate_valid_for_any_app() {
    let platform = Platform::new();
    let checker = platform.checker();

    sign_app(&checker, "contacts", CORE_CERT, CORE_KEY);
    assert!(checker.verify_app_signature("contacts").is_empty());
}

#[test]
fn test_app_certificate_rejected_for_other_app() {
    let platform = Platform::new();
    let checker = platform.checker();

    checker
        .sign_tree(&platform.app("contacts"), CALENDAR_CERT, &signer(CALENDAR_KEY))
        .unwrap();

    let report = checker.verify_app_signature("contacts");
    assert_eq!(exception_class(&report), "CertificateScopeMismatch");
    let message = &report.failure().unwrap().message;
    assert!(message.contains("Requested: contacts"), "message: {message}");
    assert!(message.contains("CN=calendar"), "message: {message}");
}

#[test]
fn test_tampered_signature_is_rejected() {
    let platform = Platform::new();
    let checker = platform.checker();
    let mut manifest = sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);

    manifest.signature[10] ^= 0x01;
    let path = platform.app("calendar").join(APP_MANIFEST_PATH);
    manifest.write_atomic(&path).unwrap();

    let app = platform.app("calendar");
    let aborted = checker.try_verify_tree(&path, &app, "calendar").unwrap_err();
    assert_eq!(aborted.stage, VerificationStage::VerifyingSignature);
    assert_eq!(
        exception_class(&checker.verify_app_signature("calendar")),
        "SignatureInvalid"
    );
}

#[test]
fn test_rewritten_hashes_break_signature() {
    let platform = Platform::new();
    let checker = platform.checker();
    let mut manifest = sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);

    // Attacker edits a file and patches its digest in the manifest
    platform.write("apps/calendar/lib/app.php", "<?php // patched\n");
    manifest.hashes.insert(
        "lib/app.php".into(),
        codesign_crypto::sha512_hex(b"<?php // patched\n"),
    );
    manifest
        .write_atomic(&platform.app("calendar").join(APP_MANIFEST_PATH))
        .unwrap();

    let report = checker.verify_app_signature("calendar");
    assert_eq!(exception_class(&report), "SignatureInvalid");
}

#[test]
fn test_missing_manifest() {
    let platform = Platform::new();
    let checker = platform.checker();

    let report = checker.verify_app_signature("contacts");
    assert_eq!(exception_class(&report), "ManifestNotFound");
}

#[test]
fn test_corrupt_manifest() {
    let platform = Platform::new();
    let checker = platform.checker();
    platform.write("apps/contacts/appinfo/signature.json", "{\"hashes\": ");

    let report = checker.verify_app_signature("contacts");
    assert_eq!(exception_class(&report), "ManifestMalformed");

    // Structurally valid JSON, missing fields
    platform.write("apps/contacts/appinfo/signature.json", "{\"hashes\": {}}");
    let report = checker.verify_app_signature("contacts");
    assert_eq!(exception_class(&report), "ManifestMalformed");
}

#[test]
fn test_unknown_app() {
    let platform = Platform::new();
    let checker = platform.checker();

    let report = checker.verify_app_signature("../../etc");
    assert_eq!(exception_class(&report), "AppNotFound");
    assert!(!checker.has_passed("../../etc"));
}

#[cfg(unix)]
#[test]
fn test_planted_non_utf8_file_fails_verification() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let platform = Platform::new();
    let checker = platform.checker();
    sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);

    let planted = platform.app("calendar").join(OsStr::from_bytes(b"lib\xfe"));
    fs::write(planted, "<?php system($_GET['c']);\n").unwrap();

    let report = checker.verify_app_signature("calendar");
    assert_eq!(exception_class(&report), "IOFailure");
    assert!(!checker.has_passed("calendar"));
}

#[cfg(unix)]
#[test]
fn test_non_utf8_file_cannot_be_signed() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let platform = Platform::new();
    let checker = platform.checker();
    fs::write(platform.app("calendar").join(OsStr::from_bytes(b"lib\xff")), "x").unwrap();

    let err = checker
        .sign_app("calendar", CALENDAR_CERT, &signer(CALENDAR_KEY))
        .unwrap_err();
    assert_eq!(err.kind(), "IOFailure");
    assert!(!platform.app("calendar").join(APP_MANIFEST_PATH).exists());
}

// =============================================================================
// Signing errors
// =============================================================================

#[test]
fn test_key_mismatch_writes_nothing() {
    let platform = Platform::new();
    let checker = platform.checker();

    let err = checker
        .sign_app("calendar", CALENDAR_CERT, &signer(CONTACTS_KEY))
        .unwrap_err();
    assert!(matches!(err, IntegrityError::KeyMismatch));
    assert!(!platform.app("calendar").join(APP_MANIFEST_PATH).exists());
}

#[test]
fn test_sign_unknown_app_fails() {
    let platform = Platform::new();
    let checker = platform.checker();

    let err = checker
        .sign_app("missing", CONTACTS_CERT, &signer(CONTACTS_KEY))
        .unwrap_err();
    assert!(matches!(err, IntegrityError::AppNotFound { .. }));
}

#[test]
fn test_signing_does_not_need_root_certificate() {
    let platform = Platform::new();
    fs::remove_file(platform.root().join(ROOT_CERTIFICATE_PATH)).unwrap();
    assert!(Checker::from_config(platform.config()).is_err());

    let tree_signer = TreeSigner::from_config(platform.config());
    tree_signer
        .sign_app("calendar", CALENDAR_CERT, &signer(CALENDAR_KEY))
        .unwrap();

    platform.write(ROOT_CERTIFICATE_PATH, ROOT);
    assert!(platform.checker().verify_app_signature("calendar").is_empty());
}

#[test]
fn test_sign_with_garbage_certificate_fails() {
    let platform = Platform::new();
    let checker = platform.checker();

    let err = checker
        .sign_app("calendar", "not a certificate", &signer(CALENDAR_KEY))
        .unwrap_err();
    assert!(matches!(err, IntegrityError::CertificateChainInvalid { .. }));
}

// =============================================================================
// Platform tree
// =============================================================================

#[test]
fn test_core_round_trip() {
    let platform = Platform::new();
    let checker = platform.checker();

    let manifest = checker.sign_core(CORE_CERT, &signer(CORE_PKCS1_KEY)).unwrap();
    assert!(platform.root().join(CORE_MANIFEST_PATH).is_file());
    assert!(manifest.hashes.contains_key("index.php"));
    assert!(manifest.hashes.contains_key(ROOT_CERTIFICATE_PATH));
    assert!(!manifest.hashes.keys().any(|k| k.starts_with("apps/")));
    assert!(!manifest.hashes.keys().any(|k| k.starts_with("data/")));
    assert!(!manifest.hashes.keys().any(|k| k.starts_with("config/")));

    // App and data churn is outside the platform scope
    sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);
    platform.write("data/admin/files/new.txt", "upload");
    platform.write("config/config.php", "<?php $CONFIG = ['debug' => true];\n");

    assert!(checker.verify_core_signature().is_empty());
    assert!(checker.has_passed("core"));
}

#[test]
fn test_core_requires_core_certificate() {
    let platform = Platform::new();
    let checker = platform.checker();

    checker
        .sign_core(CALENDAR_CERT, &signer(CALENDAR_KEY))
        .unwrap();
    let report = checker.verify_core_signature();
    assert_eq!(exception_class(&report), "CertificateScopeMismatch");
}

// =============================================================================
// Instance verification and result storage
// =============================================================================

#[test]
fn test_instance_verification_skips_unsigned_optional_apps() {
    let platform = Platform::new();
    let checker = platform.checker();

    checker.sign_core(CORE_CERT, &signer(CORE_KEY)).unwrap();
    // "contacts" is not shipped but signed; "calendar" is shipped but
    // unsigned; "notes" is neither.
    sign_app(&checker, "contacts", CONTACTS_CERT, CONTACTS_KEY);

    let apps: Vec<String> = ["calendar", "contacts", "notes"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let report = checker.run_instance_verification(&apps);

    assert!(report.core.is_empty());
    assert_eq!(report.skipped, vec!["notes"]);
    let verified: Vec<_> = report.apps.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(verified, vec!["calendar", "contacts"]);

    assert_eq!(exception_class(&report.apps[0].1), "ManifestNotFound");
    assert!(report.apps[1].1.is_empty());
    assert!(!report.passed());

    assert!(checker.has_passed("core"));
    assert!(checker.has_passed("contacts"));
    assert!(checker.has_passed("notes"));
    assert!(!checker.has_passed("calendar"));
    assert!(!checker.has_passed_check());
    assert_eq!(checker.results().keys().collect::<Vec<_>>(), vec!["calendar"]);
}

#[test]
fn test_full_instance_verification_covers_installed_apps() {
    let platform = Platform::new();
    let checker = platform.checker();

    checker.sign_core(CORE_CERT, &signer(CORE_KEY)).unwrap();
    sign_app(&checker, "calendar", CALENDAR_CERT, CALENDAR_KEY);
    sign_app(&checker, "notes", CORE_CERT, CORE_KEY);

    let report = checker.run_full_instance_verification();
    assert!(report.passed(), "failures: {:?}", report.failures());
    assert_eq!(report.skipped, vec!["contacts"]);
    assert!(checker.has_passed_check());
}

#[test]
fn test_results_survive_restart_and_clear_on_pass() {
    let platform = Platform::new();
    let state = tempfile::tempdir().unwrap();
    let config = IntegrityConfig {
        result_store_path: Some(state.path().join("results.json")),
        ..platform.config()
    };

    let first = Checker::from_config(config.clone()).unwrap();
    assert!(!first.verify_app_signature("contacts").is_empty());

    let second = Checker::from_config(config.clone()).unwrap();
    assert!(!second.has_passed("contacts"));
    assert_eq!(
        exception_class(&second.results()["contacts"]),
        "ManifestNotFound"
    );

    sign_app(&second, "contacts", CONTACTS_CERT, CONTACTS_KEY);
    assert!(second.verify_app_signature("contacts").is_empty());

    let third = Checker::from_config(config).unwrap();
    assert!(third.has_passed("contacts"));
    assert!(third.results().is_empty());
}

#[test]
fn test_explicit_collaborators() {
    let platform = Platform::new();
    let config = platform.config();
    let anchor = Arc::new(TrustAnchor::from_pem(ROOT.as_bytes()).unwrap());
    // Nothing shipped, only the default app directory
    let locator = Arc::new(DirectoryAppLocator::new(config.app_directory_paths(), Vec::new()));
    let store = Arc::new(MemoryResultStore::new());
    let checker = Checker::new(config, anchor, locator, store);

    checker.sign_core(CORE_CERT, &signer(CORE_KEY)).unwrap();
    let report = checker.run_full_instance_verification();
    assert!(report.passed());
    assert!(report.apps.is_empty());
    assert_eq!(report.skipped, vec!["calendar", "contacts", "notes"]);
}

#[test]
fn test_missing_root_certificate_fails_construction() {
    let platform = Platform::new();
    fs::remove_file(platform.root().join(ROOT_CERTIFICATE_PATH)).unwrap();

    let err = Checker::from_config(platform.config()).unwrap_err();
    assert_eq!(err.kind(), "IOFailure");
}
