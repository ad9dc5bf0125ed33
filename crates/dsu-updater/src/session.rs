//! Scratch download directories.
//!
//! All downloads for an update cycle land below one namespace directory,
//! `<temp>/<namespace>/updates`. Each download session gets its own randomly
//! named child. The orchestrator removes the whole `updates` directory at
//! well-defined points, so an artifact that has not been verified never
//! survives into a later cycle.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::UpdateError;
use crate::random::random_name;

/// Name of the directory holding all download sessions.
const UPDATES_DIR: &str = "updates";

/// Owner of the scratch area for one application.
#[derive(Debug, Clone)]
pub struct ScratchArea {
    root: PathBuf,
}

impl ScratchArea {
    /// Scratch area at `<temp_dir>/<namespace>/updates`.
    pub fn new(temp_dir: &Path, namespace: &str) -> Self {
        Self {
            root: temp_dir.join(namespace).join(UPDATES_DIR),
        }
    }

    /// The `updates` directory that [`purge`](Self::purge) removes.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove every download session and everything in them.
    ///
    /// A missing directory is not an error.
    pub async fn purge(&self) -> Result<(), UpdateError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                info!(path = %self.root.display(), "removed update download directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.root.display(), "no update download directory to remove");
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "failed to clean update download directory");
                Err(e.into())
            }
        }
    }

    /// Create a fresh, randomly named session directory.
    pub async fn open_session(&self) -> Result<DownloadSession, UpdateError> {
        let dir = self.root.join(random_name());
        tokio::fs::create_dir_all(&dir).await?;
        debug!(path = %dir.display(), "opened download session");
        Ok(DownloadSession { dir })
    }
}

/// One download directory inside the scratch area.
#[derive(Debug)]
pub struct DownloadSession {
    dir: PathBuf,
}

impl DownloadSession {
    /// The session directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh path for a metadata download.
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", random_name()))
    }

    /// Path for a binary download named `file_name`.
    pub fn binary_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Remove this session's directory.
    pub async fn close(self) -> Result<(), UpdateError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
