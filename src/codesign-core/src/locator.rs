//! Application lookup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::IntegrityConfig;
use crate::error::IntegrityError;
use crate::types::SHIPPED_APPS_PATH;

/// Resolves application ids to install paths. Read-only.
pub trait AppLocator: Send + Sync {
    /// Install path of `app_id`.
    fn app_path(&self, app_id: &str) -> Result<PathBuf, IntegrityError>;

    /// Every installed application id.
    fn all_app_ids(&self) -> Vec<String>;

    /// Whether `app_id` ships with the platform.
    fn is_shipped(&self, app_id: &str) -> bool;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShippedApps {
    #[serde(default)]
    shipped_apps: Vec<String>,
}

/// Locates apps as subdirectories (containing `appinfo/`) of the configured
/// app directories. Shipped apps are listed in `core/shipped.json`.
#[derive(Debug, Clone)]
pub struct DirectoryAppLocator {
    app_roots: Vec<PathBuf>,
    shipped: BTreeSet<String>,
}

impl DirectoryAppLocator {
    /// Build a locator from explicit parts.
    pub fn new(app_roots: Vec<PathBuf>, shipped: impl IntoIterator<Item = String>) -> Self {
        Self {
            app_roots,
            shipped: shipped.into_iter().collect(),
        }
    }

    /// Build a locator for the platform described by `config`.
    pub fn from_config(config: &IntegrityConfig) -> Self {
        let shipped = load_shipped(&config.platform_root.join(SHIPPED_APPS_PATH));
        Self::new(config.app_directory_paths(), shipped)
    }
}

fn load_shipped(path: &Path) -> Vec<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %path.display(), "Locator: no shipped app list ({})", e);
            return Vec::new();
        },
    };
    match serde_json::from_slice::<ShippedApps>(&bytes) {
        Ok(list) => list.shipped_apps,
        Err(e) => {
            warn!(path = %path.display(), "Locator: cannot parse shipped app list: {}", e);
            Vec::new()
        },
    }
}

/// App ids are single path segments.
fn is_valid_app_id(app_id: &str) -> bool {
    !app_id.is_empty()
        && app_id != "."
        && app_id != ".."
        && !app_id.contains(['/', '\\', '\0'])
}

impl AppLocator for DirectoryAppLocator {
    fn app_path(&self, app_id: &str) -> Result<PathBuf, IntegrityError> {
        if is_valid_app_id(app_id) {
            for root in &self.app_roots {
                let candidate = root.join(app_id);
                if candidate.join("appinfo").is_dir() {
                    return Ok(candidate);
                }
            }
        }
        Err(IntegrityError::AppNotFound {
            app_id: app_id.to_string(),
        })
    }

    fn all_app_ids(&self) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for root in &self.app_roots {
            let Ok(entries) = std::fs::read_dir(root) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.join("appinfo").is_dir() {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    ids.insert(name.to_string());
                }
            }
        }
        ids.into_iter().collect()
    }

    fn is_shipped(&self, app_id: &str) -> bool {
        self.shipped.contains(app_id)
    }
}
