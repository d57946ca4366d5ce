//! # codesign-core
//!
//! Signed manifests and integrity verification for installed application
//! trees and the platform tree.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Checker                              │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ TrustAnchor  │  │  AppLocator  │  │ ResultStore  │      │
//! │  │ (pinned root)│  │ (id → path)  │  │ (per scope)  │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │     Manifest → CertificateValidator → signature   │      │
//! │  │          (chain, CN scope, RSA-PSS check)         │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │           HashWalker → diff → report              │      │
//! │  │  (SHA-512 per file, EXTRA / MISSING / INVALID)    │      │
//! │  └──────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - **Pinned root**: certificates are only trusted if issued by the root
//!   loaded at startup, never by a certificate embedded in a manifest
//! - **Fail-closed**: any failure to verify becomes the `EXCEPTION` report,
//!   which never counts as passing
//! - **Deterministic payload**: the signed bytes are the sorted hash mapping

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod certificate;
pub mod checker;
pub mod config;
pub mod diff;
pub mod error;
pub mod locator;
pub mod manifest;
pub mod signature;
pub mod signing;
pub mod store;
pub mod types;
pub mod walker;

pub use certificate::{CertificateValidator, TrustAnchor, ValidatedCertificate};
pub use checker::{Aborted, Checker, InstanceReport, VerificationStage};
pub use config::IntegrityConfig;
pub use diff::{
    diff, DifferenceKind, DifferenceReport, Discrepancies, FileDifference, ReportException,
};
pub use error::IntegrityError;
pub use locator::{AppLocator, DirectoryAppLocator};
pub use manifest::Manifest;
pub use signing::TreeSigner;
pub use store::{CachedResultStore, FileResultStore, MemoryResultStore, ResultStore};
pub use types::{HashMapping, CORE_SCOPE};
pub use walker::HashWalker;
