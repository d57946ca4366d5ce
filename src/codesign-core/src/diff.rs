//! Classified differences between a signed and a live hash mapping.
//!
//! ## Report Format
//!
//! ```json
//! {
//!   "EXTRA_FILE":   { "lib/new.php":  { "expected": "",    "current": "..." } },
//!   "FILE_MISSING": { "lib/gone.php": { "expected": "...", "current": ""    } },
//!   "INVALID_HASH": { "lib/edit.php": { "expected": "...", "current": "..." } }
//! }
//! ```
//!
//! or, when verification could not complete:
//!
//! ```json
//! { "EXCEPTION": { "class": "SignatureInvalid", "message": "..." } }
//! ```
//!
//! An empty object means the tree matches its manifest.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IntegrityError;
use crate::types::HashMapping;

/// Discrepancy classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DifferenceKind {
    /// Present now, absent from the manifest.
    ExtraFile,
    /// Present in the manifest, absent now.
    FileMissing,
    /// Present in both, digests differ.
    InvalidHash,
}

impl DifferenceKind {
    /// Report key for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ExtraFile => "EXTRA_FILE",
            Self::FileMissing => "FILE_MISSING",
            Self::InvalidHash => "INVALID_HASH",
        }
    }
}

impl fmt::Display for DifferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected and current digest of one file. `""` means absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDifference {
    /// Digest recorded in the manifest.
    pub expected: String,
    /// Digest of the file on disk.
    pub current: String,
}

/// The three discrepancy buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Discrepancies {
    /// Files not covered by the manifest.
    #[serde(rename = "EXTRA_FILE", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_files: BTreeMap<String, FileDifference>,
    /// Signed files no longer present.
    #[serde(rename = "FILE_MISSING", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub missing_files: BTreeMap<String, FileDifference>,
    /// Signed files whose content changed.
    #[serde(rename = "INVALID_HASH", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub invalid_hashes: BTreeMap<String, FileDifference>,
}

impl Discrepancies {
    /// Bucket for `kind`.
    #[must_use]
    pub fn bucket(&self, kind: DifferenceKind) -> &BTreeMap<String, FileDifference> {
        match kind {
            DifferenceKind::ExtraFile => &self.extra_files,
            DifferenceKind::FileMissing => &self.missing_files,
            DifferenceKind::InvalidHash => &self.invalid_hashes,
        }
    }

    /// Total number of differing paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extra_files.len() + self.missing_files.len() + self.invalid_hashes.len()
    }

    /// Whether no path differs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Error recorded when verification could not run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportException {
    /// Error kind (see [`IntegrityError::kind`]).
    pub class: String,
    /// Human-readable message.
    pub message: String,
}

/// Outcome of verifying one scope.
///
/// The exception form is a sentinel and never carries discrepancies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DifferenceReport {
    /// Verification failed before a diff could be produced.
    Exception {
        /// The failure.
        #[serde(rename = "EXCEPTION")]
        exception: ReportException,
    },
    /// Verification completed; lists every differing path.
    Discrepancies(Discrepancies),
}

impl Default for DifferenceReport {
    fn default() -> Self {
        Self::Discrepancies(Discrepancies::default())
    }
}

impl DifferenceReport {
    /// Sentinel report for a failed verification.
    #[must_use]
    pub fn exception(error: &IntegrityError) -> Self {
        Self::Exception {
            exception: ReportException {
                class: error.kind().to_string(),
                message: error.to_string(),
            },
        }
    }

    /// Whether the tree is faithful to its manifest.
    ///
    /// The exception sentinel is never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Exception { .. } => false,
            Self::Discrepancies(d) => d.is_empty(),
        }
    }

    /// Discrepancies, if verification completed.
    #[must_use]
    pub fn discrepancies(&self) -> Option<&Discrepancies> {
        match self {
            Self::Discrepancies(d) => Some(d),
            Self::Exception { .. } => None,
        }
    }

    /// Failure, if verification did not complete.
    #[must_use]
    pub fn failure(&self) -> Option<&ReportException> {
        match self {
            Self::Exception { exception } => Some(exception),
            Self::Discrepancies(_) => None,
        }
    }
}

/// Classify every path whose presence or digest differs.
#[must_use]
pub fn diff(expected: &HashMapping, current: &HashMapping) -> DifferenceReport {
    let mut report = Discrepancies::default();

    for (path, expected_hash) in expected {
        match current.get(path) {
            None => {
                report.missing_files.insert(
                    path.clone(),
                    FileDifference {
                        expected: expected_hash.clone(),
                        current: String::new(),
                    },
                );
            },
            Some(current_hash)
                if !codesign_crypto::constant_time_eq(
                    expected_hash.as_bytes(),
                    current_hash.as_bytes(),
                ) =>
            {
                report.invalid_hashes.insert(
                    path.clone(),
                    FileDifference {
                        expected: expected_hash.clone(),
                        current: current_hash.clone(),
                    },
                );
            },
            Some(_) => {},
        }
    }

    for (path, current_hash) in current {
        if !expected.contains_key(path) {
            report.extra_files.insert(
                path.clone(),
                FileDifference {
                    expected: String::new(),
                    current: current_hash.clone(),
                },
            );
        }
    }

    DifferenceReport::Discrepancies(report)
}
