//! Shared types and fixed paths.

use std::collections::BTreeMap;

/// Root-relative path (forward slashes, no leading slash) → hex SHA-512.
///
/// `BTreeMap` keeps keys sorted, which is what makes the canonical encoding
/// reproducible between signer and verifier.
pub type HashMapping = BTreeMap<String, String>;

/// Scope reserved for the platform tree. Certificates with this CN are
/// accepted for every scope.
pub const CORE_SCOPE: &str = "core";

/// Manifest location inside an application tree.
pub const APP_MANIFEST_PATH: &str = "appinfo/signature.json";

/// Manifest location inside the platform tree.
pub const CORE_MANIFEST_PATH: &str = "core/signature.json";

/// Root certificate location inside the platform tree.
pub const ROOT_CERTIFICATE_PATH: &str = "resources/codesigning/root.crt";

/// Shipped-app list inside the platform tree.
pub const SHIPPED_APPS_PATH: &str = "core/shipped.json";
