//! Signed manifest encoding.
//!
//! ## Format
//!
//! UTF-8 JSON document stored at `appinfo/signature.json` (apps) or
//! `core/signature.json` (platform):
//!
//! ```json
//! {
//!   "hashes": {
//!     "appinfo/info.xml": "sha512hex...",
//!     "lib/app.php": "sha512hex..."
//!   },
//!   "signature": "base64 RSA-PSS signature over the canonical hashes",
//!   "certificate": "-----BEGIN CERTIFICATE-----\n..."
//! }
//! ```

use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IntegrityError;
use crate::types::HashMapping;

/// A signed hash mapping plus the certificate that vouches for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Relative path → hex SHA-512.
    pub hashes: HashMapping,
    /// RSA-PSS signature over the canonical encoding of `hashes`.
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    /// PEM-encoded signing certificate.
    pub certificate: String,
}

impl Manifest {
    /// Decode a manifest from its on-disk bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::ManifestMalformed`] for anything that is not
    /// a complete manifest document.
    pub fn decode(bytes: &[u8]) -> Result<Self, IntegrityError> {
        serde_json::from_slice(bytes).map_err(|e| IntegrityError::ManifestMalformed {
            reason: e.to_string(),
        })
    }

    /// Encode the manifest as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, IntegrityError> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Load a manifest from a file.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::ManifestNotFound`] if the file does not
    /// exist, [`IntegrityError::Io`] if it cannot be read, and
    /// [`IntegrityError::ManifestMalformed`] if it cannot be decoded.
    pub fn load(path: &Path) -> Result<Self, IntegrityError> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => IntegrityError::ManifestNotFound {
                path: path.to_path_buf(),
            },
            _ => IntegrityError::io(path, e),
        })?;
        Self::decode(&bytes)
    }

    /// Write the manifest to `path`, replacing any existing file atomically.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or any filesystem step fails. On error the
    /// previous file (if any) is left untouched.
    pub fn write_atomic(&self, path: &Path) -> Result<(), IntegrityError> {
        let bytes = self.encode()?;
        write_file_atomic(path, &bytes)?;
        debug!(
            path = %path.display(),
            files = self.hashes.len(),
            "manifest: written"
        );
        Ok(())
    }
}

/// Write `bytes` to a temp file next to `path`, sync it, then rename over
/// `path`.
pub(crate) fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), IntegrityError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| IntegrityError::io(dir, e))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| IntegrityError::io(dir, e))?;
    temp.as_file_mut()
        .write_all(bytes)
        .map_err(|e| IntegrityError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| IntegrityError::io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| IntegrityError::io(path, e.error))?;
    Ok(())
}

mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}
