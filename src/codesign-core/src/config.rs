//! Configuration for the integrity checker.

use std::path::{Path, PathBuf};

use crate::types::ROOT_CERTIFICATE_PATH;

/// Configuration for code signing and verification.
#[derive(Debug, Clone)]
pub struct IntegrityConfig {
    /// Platform installation root (the "core" tree).
    pub platform_root: PathBuf,
    /// Pinned root certificate. Relative paths resolve against `platform_root`.
    pub root_certificate: PathBuf,
    /// Directories holding installed apps. Relative paths resolve against
    /// `platform_root`.
    pub app_directories: Vec<PathBuf>,
    /// Data directory outside the default `data/` folder, excluded from
    /// hashing like the default one.
    pub custom_data_directory: Option<PathBuf>,
    /// Reject certificates outside their notBefore/notAfter window.
    pub enforce_validity_period: bool,
    /// Worker threads for hashing file contents (1 = hash inline).
    pub hash_threads: usize,
    /// JSON file backing the result store; `None` keeps results in memory.
    pub result_store_path: Option<PathBuf>,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            platform_root: PathBuf::from("."),
            root_certificate: PathBuf::from(ROOT_CERTIFICATE_PATH),
            app_directories: vec![PathBuf::from("apps")],
            custom_data_directory: None,
            enforce_validity_period: false,
            hash_threads: 1,
            result_store_path: None,
        }
    }
}

impl IntegrityConfig {
    /// Default configuration for a platform installed at `platform_root`.
    pub fn for_platform_root(platform_root: impl Into<PathBuf>) -> Self {
        Self {
            platform_root: platform_root.into(),
            ..Self::default()
        }
    }

    /// Absolute path of the pinned root certificate.
    #[must_use]
    pub fn root_certificate_path(&self) -> PathBuf {
        self.resolve(&self.root_certificate)
    }

    /// Absolute paths of the app directories.
    #[must_use]
    pub fn app_directory_paths(&self) -> Vec<PathBuf> {
        self.app_directories.iter().map(|p| self.resolve(p)).collect()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.platform_root.join(path)
        }
    }
}
