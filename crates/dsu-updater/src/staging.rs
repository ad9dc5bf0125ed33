//! Native updater staging.
//!
//! After a binary passes signature verification it is described to the
//! platform's native updater through a small manifest written next to it in
//! the scratch directory. The two supported installer families want different
//! shapes:
//!
//! - Windows: a `RELEASES` file with one `<sha1> <filename> <size>` line. The
//!   feed location is the directory holding it.
//! - macOS: an `update.json` stub `{"url":"file://<binary>"}`. The feed
//!   location is a `file://` URL of the stub itself.
//!
//! SHA-1 is only used because the Windows format requires it; authenticity
//! has already been established by the minisign check.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use semver::Version;
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::error::UpdateError;
use crate::random::random_name;

/// Buffer size for reading files during hash computation.
const HASH_BUFFER_SIZE: usize = 8192;

/// Platforms with a native updater this crate can hand off to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Squirrel-style installer fed by a `RELEASES` file
    Windows,
    /// Squirrel-style installer fed by a JSON stub
    MacOs,
}

impl Platform {
    /// The platform this binary was built for.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` everywhere automatic updates are not
    /// available.
    pub fn current() -> Result<Self, UpdateError> {
        if cfg!(target_os = "windows") {
            Ok(Self::Windows)
        } else if cfg!(target_os = "macos") {
            Ok(Self::MacOs)
        } else {
            Err(UpdateError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            ))
        }
    }

    /// Operating system component of the metadata file name.
    pub fn metadata_os_name(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::MacOs => "macOS",
        }
    }

    /// File name to download the update binary to.
    ///
    /// The Windows installer only accepts full packages named
    /// `<app>-<major>.<minor>.<patch>-full.nupkg`.
    pub fn binary_file_name(&self, app_name: &str, version: &Version) -> String {
        match self {
            Self::Windows => format!(
                "{}-{}.{}.{}-full.nupkg",
                app_name, version.major, version.minor, version.patch
            ),
            Self::MacOs => format!("{}.zip", random_name()),
        }
    }

    /// Name of the manifest file the native updater reads.
    pub fn manifest_file_name(&self) -> &'static str {
        match self {
            Self::Windows => "RELEASES",
            Self::MacOs => "update.json",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metadata_os_name())
    }
}

/// Manifest describing a verified binary to the native updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingManifest {
    /// Single `<sha1> <filename> <size>` record
    Releases {
        sha1: String,
        file_name: String,
        size: u64,
    },
    /// JSON stub pointing at the binary
    UrlStub { url: String },
}

impl StagingManifest {
    /// Describe `binary` in the shape `platform` expects.
    ///
    /// # Errors
    ///
    /// Returns `StagingError` if the binary cannot be read or has no file
    /// name.
    pub fn for_binary(platform: Platform, binary: &Path) -> Result<Self, UpdateError> {
        match platform {
            Platform::Windows => {
                let file_name = binary
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| {
                        UpdateError::StagingError(format!(
                            "binary path has no file name: {}",
                            binary.display()
                        ))
                    })?
                    .to_string();
                let (sha1, size) = sha1_and_size(binary)?;
                Ok(Self::Releases {
                    sha1,
                    file_name,
                    size,
                })
            }
            Platform::MacOs => Ok(Self::UrlStub {
                url: file_url(binary),
            }),
        }
    }

    /// The manifest file contents.
    pub fn render(&self) -> String {
        match self {
            Self::Releases {
                sha1,
                file_name,
                size,
            } => format!("{} {} {}", sha1, file_name, size),
            Self::UrlStub { url } => serde_json::json!({ "url": url }).to_string(),
        }
    }
}

/// A manifest written to disk and the location to register with the native
/// updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpdate {
    /// Path of the written manifest
    pub manifest_path: PathBuf,
    /// Feed location for the native updater
    pub feed_url: String,
}

/// Write the native updater manifest for a verified binary.
///
/// The manifest is written into the binary's directory.
///
/// # Errors
///
/// Returns `StagingError` if the manifest cannot be built or written.
pub fn stage(platform: Platform, binary: &Path) -> Result<StagedUpdate, UpdateError> {
    let dir = binary.parent().ok_or_else(|| {
        UpdateError::StagingError(format!("binary has no parent directory: {}", binary.display()))
    })?;

    let manifest = StagingManifest::for_binary(platform, binary)?;
    let manifest_path = dir.join(platform.manifest_file_name());
    let contents = manifest.render();
    debug!(manifest = %contents, "rendered staging manifest");

    std::fs::write(&manifest_path, contents).map_err(|e| {
        UpdateError::StagingError(format!(
            "failed to write {}: {}",
            manifest_path.display(),
            e
        ))
    })?;

    let feed_url = match platform {
        Platform::Windows => dir.display().to_string(),
        Platform::MacOs => file_url(&manifest_path),
    };

    info!(
        platform = %platform,
        manifest = %manifest_path.display(),
        feed = %feed_url,
        "staged update for native updater"
    );

    Ok(StagedUpdate {
        manifest_path,
        feed_url,
    })
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn sha1_and_size(path: &Path) -> Result<(String, u64), UpdateError> {
    let mut file = File::open(path).map_err(|e| {
        UpdateError::StagingError(format!("failed to open {}: {}", path.display(), e))
    })?;

    let mut hasher = Sha1::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let read = file.read(&mut buffer).map_err(|e| {
            UpdateError::StagingError(format!("failed to read {}: {}", path.display(), e))
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok((hex::encode(hasher.finalize()), size))
}
