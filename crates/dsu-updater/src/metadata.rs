//! Version descriptor parsing and verification.
//!
//! The update server publishes one descriptor per flavour, channel and
//! operating system. Its wire format is a single-line JSON object, a newline,
//! and a minisign detached signature over the JSON bytes:
//!
//! ```text
//! {"version":"2.1.0","binary":{"binaryPath":"...","binarySignature":"..."},"releaseNotes":"...","timestamp":1700000000}
//! untrusted comment: signature from minisign secret key
//! RWQ...
//! trusted comment: timestamp:1700000000	file:app-latest-windows.json
//! ...
//! ```
//!
//! The split point is the first `}` immediately followed by a newline, so the
//! JSON body must not contain raw newlines. The binary carries its own
//! signature inside the JSON; both signatures are checked independently.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::UpdateError;
use crate::keys::TrustedKeySet;

/// Delimiter between the JSON body and the signature block.
const BODY_DELIMITER: &str = "}\n";

/// Release timestamp as published, either text or integer seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Integer seconds since the epoch
    Seconds(i64),
    /// Free-form text
    Text(String),
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(secs) => write!(f, "{}", secs),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Location and signature of the update binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryDescriptor {
    /// Path of the binary relative to the server base path
    pub path: String,
    /// Minisign signature over the binary's bytes
    pub signature: String,
}

/// Parsed contents of a version descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    /// Version offered by the server
    pub version: Version,
    /// Binary to download
    pub binary: BinaryDescriptor,
    /// Release notes shown in the confirmation prompt
    pub release_notes: String,
    /// Release timestamp
    pub timestamp: Timestamp,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUpdateInfo {
    version: String,
    binary: WireBinary,
    release_notes: String,
    timestamp: Timestamp,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBinary {
    binary_path: String,
    binary_signature: String,
}

impl TryFrom<WireUpdateInfo> for UpdateInfo {
    type Error = UpdateError;

    fn try_from(wire: WireUpdateInfo) -> Result<Self, Self::Error> {
        let version = Version::parse(&wire.version).map_err(|e| {
            UpdateError::MetadataParseError(format!("invalid version {:?}: {}", wire.version, e))
        })?;

        if wire.binary.binary_path.is_empty() {
            return Err(UpdateError::MetadataParseError(
                "binary path is empty".to_string(),
            ));
        }

        Ok(Self {
            version,
            binary: BinaryDescriptor {
                path: wire.binary.binary_path,
                signature: wire.binary.binary_signature,
            },
            release_notes: wire.release_notes,
            timestamp: wire.timestamp,
        })
    }
}

/// Parses version descriptors and binds them to a trusted key set.
#[derive(Debug, Clone)]
pub struct MetadataCodec {
    keys: Arc<TrustedKeySet>,
}

impl MetadataCodec {
    /// Create a codec that verifies against `keys`.
    pub fn new(keys: Arc<TrustedKeySet>) -> Self {
        Self { keys }
    }

    /// Split and parse a raw descriptor.
    ///
    /// Parsing does not verify anything; call
    /// [`UpdateMetadata::verify_metadata_signature`] before acting on the
    /// result. If no signature follows the JSON the signature is empty,
    /// which never verifies.
    ///
    /// # Errors
    ///
    /// Returns `MetadataParseError` if the JSON is malformed, a required
    /// field is missing or has the wrong type, or the version is not a
    /// semantic version.
    pub fn parse(&self, raw: &str) -> Result<UpdateMetadata, UpdateError> {
        let (json, signature) = split_descriptor(raw);

        let wire: WireUpdateInfo = serde_json::from_str(json)?;
        let info = UpdateInfo::try_from(wire)?;

        debug!(
            version = %info.version,
            binary = %info.binary.path,
            signature_present = !signature.is_empty(),
            "parsed update metadata"
        );

        Ok(UpdateMetadata {
            info,
            raw_json: json.to_string(),
            signature: signature.to_string(),
            keys: Arc::clone(&self.keys),
        })
    }
}

/// Split a descriptor into its JSON body and signature block.
///
/// Without a `}` + newline delimiter the whole input is treated as the body
/// and the signature is empty.
fn split_descriptor(raw: &str) -> (&str, &str) {
    match raw.find(BODY_DELIMITER) {
        Some(end) => {
            let json = &raw[..=end];
            let signature = &raw[end + BODY_DELIMITER.len()..];
            (json, signature)
        }
        None => (raw.trim_end(), ""),
    }
}

/// A parsed descriptor together with the exact bytes that were signed.
pub struct UpdateMetadata {
    info: UpdateInfo,
    raw_json: String,
    signature: String,
    keys: Arc<TrustedKeySet>,
}

impl UpdateMetadata {
    /// Parsed descriptor fields.
    pub fn info(&self) -> &UpdateInfo {
        &self.info
    }

    /// The JSON body exactly as received.
    pub fn raw_json(&self) -> &str {
        &self.raw_json
    }

    /// The detached signature block, possibly empty.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Check the descriptor signature over the raw JSON body.
    pub fn verify_metadata_signature(&self) -> bool {
        let valid = self.keys.verify(self.raw_json.as_bytes(), &self.signature);
        if valid {
            info!(version = %self.info.version, "metadata signature verified");
        } else {
            error!(version = %self.info.version, "metadata did not pass signature check");
        }
        valid
    }

    /// Check a downloaded binary against the signature declared in the
    /// descriptor.
    ///
    /// An unreadable file is never trusted.
    pub async fn verify_binary_signature(&self, path: &Path) -> bool {
        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read update binary");
                return false;
            }
        };

        let valid = self.verify_binary_bytes(&contents);
        if valid {
            info!(path = %path.display(), bytes = contents.len(), "binary signature verified");
        } else {
            error!(path = %path.display(), "update did not pass signature check");
        }
        valid
    }

    /// Check in-memory binary contents against the declared signature.
    pub fn verify_binary_bytes(&self, contents: &[u8]) -> bool {
        self.keys.verify(contents, &self.info.binary.signature)
    }
}

impl fmt::Debug for UpdateMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateMetadata")
            .field("info", &self.info)
            .field("signature_len", &self.signature.len())
            .finish()
    }
}
