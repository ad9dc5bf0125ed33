//! Interfaces to the host application.
//!
//! The orchestrator decides when a prompt is shown and what it says; the host
//! renders it. Likewise the host owns the platform's native updater and the
//! power-state notifications. Everything here is a trait so hosts and tests can
//! supply their own implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;

use crate::error::UpdateError;

/// Localization keys used by the update prompts.
pub mod strings {
    pub const RESTART: &str = "restart";
    pub const LATER: &str = "later";
    pub const UPDATE_DIALOG_TITLE: &str = "updateDialogTitle";
    pub const UPDATE_DIALOG_DETAIL: &str = "updateDialogDetail";
    pub const NO_RELEASE_NOTES: &str = "noReleaseNotesAvailable";
    pub const OK_BUTTON: &str = "okButton";
    pub const UPDATE_FAILED_TITLE: &str = "updateFailedTitle";
    pub const UPDATE_FAILED_MESSAGE: &str = "updateFailedMessage";
    pub const UPDATE_FAILED_DETAIL: &str = "updateFailedDetailMessage";
}

/// Index of the restart button in a confirmation prompt.
pub const RESTART_BUTTON: usize = 0;

/// Visual category of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Informational prompt with a choice
    Info,
    /// Error notice
    Error,
}

/// A prompt for the host to present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Visual category
    pub kind: PromptKind,
    /// Button labels, in order; the selected index is returned
    pub buttons: Vec<String>,
    /// Window title
    pub title: String,
    /// Main message
    pub message: String,
    /// Secondary text
    pub detail: String,
}

impl Prompt {
    /// Restart-or-later prompt for a downloaded update.
    ///
    /// Empty release notes are replaced by a localized placeholder.
    pub fn confirmation(localizer: &dyn Localizer, app_name: &str, release_notes: &str) -> Self {
        let detail = if release_notes.is_empty() {
            localizer.localize(strings::NO_RELEASE_NOTES)
        } else {
            release_notes.to_string()
        };

        Self {
            kind: PromptKind::Info,
            buttons: vec![
                localizer.localize(strings::RESTART),
                localizer.localize(strings::LATER),
            ],
            title: format!("{} {}", localizer.localize(strings::UPDATE_DIALOG_TITLE), app_name),
            message: localizer.localize(strings::UPDATE_DIALOG_DETAIL),
            detail,
        }
    }

    /// Generic notice that the update could not be completed.
    pub fn update_failed(localizer: &dyn Localizer) -> Self {
        Self {
            kind: PromptKind::Error,
            buttons: vec![localizer.localize(strings::OK_BUTTON)],
            title: localizer.localize(strings::UPDATE_FAILED_TITLE),
            message: localizer.localize(strings::UPDATE_FAILED_MESSAGE),
            detail: localizer.localize(strings::UPDATE_FAILED_DETAIL),
        }
    }
}

/// Presents prompts and reports the user's choice.
#[async_trait]
pub trait Dialog: Send + Sync {
    /// Show `prompt` and return the index of the selected button.
    async fn show_choice(&self, prompt: &Prompt) -> Result<usize, UpdateError>;
}

/// Looks up localized strings.
pub trait Localizer: Send + Sync {
    /// Localized text for `key`.
    fn localize(&self, key: &str) -> String;
}

/// Map-backed localizer that falls back to the key itself.
#[derive(Debug, Clone, Default)]
pub struct MapLocalizer {
    strings: HashMap<String, String>,
}

impl MapLocalizer {
    /// An empty localizer; every lookup falls back to the key.
    pub fn new() -> Self {
        Self::default()
    }

    /// English strings for every prompt key.
    pub fn english() -> Self {
        Self::new()
            .with(strings::RESTART, "Restart")
            .with(strings::LATER, "Later")
            .with(strings::UPDATE_DIALOG_TITLE, "Update available for")
            .with(
                strings::UPDATE_DIALOG_DETAIL,
                "A new version has been downloaded. Restart the application to apply the update.",
            )
            .with(strings::NO_RELEASE_NOTES, "No release notes available.")
            .with(strings::OK_BUTTON, "OK")
            .with(strings::UPDATE_FAILED_TITLE, "Update failed")
            .with(
                strings::UPDATE_FAILED_MESSAGE,
                "The update could not be downloaded or verified.",
            )
            .with(
                strings::UPDATE_FAILED_DETAIL,
                "Please check the project website for news about this release.",
            )
    }

    /// Add or replace a string.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.strings.insert(key.into(), value.into());
        self
    }
}

impl From<HashMap<String, String>> for MapLocalizer {
    fn from(strings: HashMap<String, String>) -> Self {
        Self { strings }
    }
}

impl Localizer for MapLocalizer {
    fn localize(&self, key: &str) -> String {
        match self.strings.get(key) {
            Some(value) => value.clone(),
            None => {
                warn!(key, "missing localization");
                key.to_string()
            }
        }
    }
}

/// The platform's native update mechanism.
#[async_trait]
pub trait NativeUpdater: Send + Sync {
    /// Register the location of a staged update.
    fn set_feed_url(&self, url: &str) -> Result<(), UpdateError>;

    /// Ask the native updater to ingest the registered update.
    ///
    /// Resolves once the update is ready to be installed.
    async fn check_for_updates(&self) -> Result<(), UpdateError>;

    /// Quit the application, install the update and relaunch.
    fn quit_and_install(&self) -> Result<(), UpdateError>;
}

/// Power-state notifications from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// The system is about to sleep
    Suspend,
    /// The system woke up
    Resume,
}
