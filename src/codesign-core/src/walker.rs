//! Deterministic hash walk over a directory tree.
//!
//! Produces the [`HashMapping`] that gets signed: every regular file under a
//! root, keyed by its root-relative path, valued by hex SHA-512.
//!
//! ## Exclusions
//!
//! - **By name** (anywhere in the tree, directories pruned): version control
//!   metadata, OS metadata files, editor swap files.
//! - **By path** (resolved against the platform root, exact match): folders
//!   that legitimately differ between installations such as `data/` and
//!   `config/`, plus the configured custom data directory.
//! - **Manifests**: `appinfo/signature.json` and `core/signature.json`, only
//!   at exactly those relative paths.
//!
//! ## Symlinks
//!
//! Symlinks are resolved: a linked file is hashed by its target's bytes and a
//! linked directory is descended into. A symlink loop fails the walk.
//!
//! ## File names
//!
//! Every hashed path must be valid UTF-8. Any other name fails the walk with
//! an I/O error rather than being mapped to a lossy key.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::config::IntegrityConfig;
use crate::error::IntegrityError;
use crate::types::{HashMapping, APP_MANIFEST_PATH, CORE_MANIFEST_PATH};

/// File and directory names never hashed.
const EXCLUDED_NAMES: &[&str] = &[
    // version control
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    "CVS",
    // OS metadata
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    ".directory",
    ".webapp",
    ".rnd",
];

/// Name suffixes never hashed (editor swap and backup files).
const EXCLUDED_SUFFIXES: &[&str] = &[".swp", ".swo", "~"];

/// Platform-root folders excluded from every walk.
const EXCLUDED_PLATFORM_FOLDERS: &[&str] = &[
    "data",
    "themes",
    "config",
    "apps",
    "assets",
    "lost+found",
    "updater",
    "_oc_upgrade",
];

/// Check if a file or directory name is excluded.
fn is_excluded_name(name: &str) -> bool {
    EXCLUDED_NAMES.contains(&name) || EXCLUDED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Check if a relative path is one of the two manifest locations.
fn is_manifest_path(relative: &str) -> bool {
    relative == APP_MANIFEST_PATH || relative == CORE_MANIFEST_PATH
}

/// Root-relative path with forward slashes.
///
/// A component that is not UTF-8 fails the walk: a lossy key could collide
/// with another file's key and hide it from the diff.
fn relative_path(root: &Path, path: &Path) -> Result<Option<String>, IntegrityError> {
    let Ok(relative) = path.strip_prefix(root) else {
        return Ok(None);
    };
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            IntegrityError::io(
                path,
                io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
            )
        })?;
        parts.push(part);
    }
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts.join("/")))
}

/// Canonical form of a path if it exists, the path itself otherwise.
fn canonical_or_self(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Enumerates and hashes a tree.
#[derive(Debug, Clone)]
pub struct HashWalker {
    /// Absolute folders pruned from the walk.
    excluded_folders: Vec<PathBuf>,
    /// Hashing threads.
    threads: usize,
}

impl HashWalker {
    /// Create a walker with the exclusions implied by `config`.
    pub fn new(config: &IntegrityConfig) -> Self {
        let platform_root = canonical_or_self(&config.platform_root);
        let mut excluded_folders: Vec<PathBuf> = EXCLUDED_PLATFORM_FOLDERS
            .iter()
            .map(|folder| platform_root.join(folder))
            .collect();
        if let Some(ref custom) = config.custom_data_directory {
            excluded_folders.push(canonical_or_self(custom));
        }

        Self {
            excluded_folders,
            threads: config.hash_threads.max(1),
        }
    }

    /// Hash every included file under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Io`] if any directory cannot be listed, any
    /// file cannot be read, or a symlink loop is found.
    pub fn hash_tree(&self, root: &Path) -> Result<HashMapping, IntegrityError> {
        let root = std::fs::canonicalize(root).map_err(|e| IntegrityError::io(root, e))?;
        let files = self.collect_files(&root)?;
        debug!(
            root = %root.display(),
            files = files.len(),
            threads = self.threads,
            "walker: collected files"
        );

        if self.threads <= 1 || files.len() < 2 {
            return files
                .into_iter()
                .map(|(relative, path)| hash_entry(relative, &path))
                .collect();
        }

        let chunk_size = files.len().div_ceil(self.threads);
        std::thread::scope(|scope| {
            let workers: Vec<_> = files
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|(relative, path)| hash_entry(relative.clone(), path))
                            .collect::<Result<Vec<_>, _>>()
                    })
                })
                .collect();

            let mut hashes = HashMapping::new();
            for worker in workers {
                let chunk = worker.join().map_err(|_| {
                    IntegrityError::io(
                        &root,
                        io::Error::new(io::ErrorKind::Other, "hash worker panicked"),
                    )
                })??;
                hashes.extend(chunk);
            }
            Ok(hashes)
        })
    }

    /// List `(relative, absolute)` for every file that will be hashed.
    fn collect_files(&self, root: &Path) -> Result<Vec<(String, PathBuf)>, IntegrityError> {
        let mut files = Vec::new();
        let walk = WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| {
                let excluded_name = entry.file_name().to_str().is_some_and(is_excluded_name);
                let excluded_folder = entry.file_type().is_dir()
                    && self.excluded_folders.iter().any(|f| f == entry.path());
                if excluded_name || excluded_folder {
                    trace!(path = %entry.path().display(), "walker: excluded");
                }
                !excluded_name && !excluded_folder
            });

        for entry in walk {
            let entry = entry.map_err(|e| {
                let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                IntegrityError::io(path, e.into())
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = relative_path(root, entry.path())? else {
                continue;
            };
            if is_manifest_path(&relative) {
                continue;
            }
            files.push((relative, entry.into_path()));
        }
        Ok(files)
    }
}

fn hash_entry(relative: String, path: &Path) -> Result<(String, String), IntegrityError> {
    let digest = codesign_crypto::hash_file(path).map_err(|e| IntegrityError::io(path, e))?;
    Ok((relative, digest))
}
