//! Console implementations of the host collaborators
//!
//! The CLI has no windowing system, so prompts are printed to stderr and the
//! choice is read from stdin. There is no native updater either; the dry-run
//! updater checks that the staged manifest exists and reports what a real
//! installer would have been given.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use dsu_updater::{Dialog, NativeUpdater, Prompt, PromptKind, UpdateError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Prefix of feed URLs that point at a local manifest file.
const FILE_URL_PREFIX: &str = "file://";

/// Manifest read from a feed directory.
const RELEASES_FILE: &str = "RELEASES";

/// Dialog that prompts on the terminal.
#[derive(Debug, Default)]
pub struct ConsoleDialog {
    /// Answer every prompt with this button instead of reading stdin
    preset: Option<usize>,
}

impl ConsoleDialog {
    /// Prompt interactively.
    pub fn interactive() -> Self {
        Self { preset: None }
    }

    /// Answer every prompt with `button` without reading stdin.
    pub fn with_answer(button: usize) -> Self {
        Self {
            preset: Some(button),
        }
    }
}

/// Render a prompt as terminal text, buttons numbered from 1.
pub fn render_prompt(prompt: &Prompt) -> String {
    let marker = match prompt.kind {
        PromptKind::Info => "ℹ",
        PromptKind::Error => "✗",
    };

    let mut text = format!("{} {}\n\n{}\n", marker, prompt.title, prompt.message);
    if !prompt.detail.is_empty() {
        text.push_str(&format!("\n{}\n", prompt.detail));
    }
    text.push('\n');
    for (index, label) in prompt.buttons.iter().enumerate() {
        text.push_str(&format!("  [{}] {}\n", index + 1, label));
    }
    text
}

/// Parse a 1-based button choice; an empty line selects the last button.
pub fn parse_choice(line: &str, button_count: usize) -> Option<usize> {
    let line = line.trim();
    if line.is_empty() {
        return button_count.checked_sub(1);
    }
    match line.parse::<usize>() {
        Ok(choice) if (1..=button_count).contains(&choice) => Some(choice - 1),
        _ => None,
    }
}

#[async_trait]
impl Dialog for ConsoleDialog {
    async fn show_choice(&self, prompt: &Prompt) -> Result<usize, UpdateError> {
        eprint!("{}", render_prompt(prompt));

        if let Some(button) = self.preset {
            eprintln!("> {}", button + 1);
            return Ok(button);
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            eprint!("> ");
            let line = lines
                .next_line()
                .await
                .map_err(|e| UpdateError::DialogError(e.to_string()))?
                .ok_or_else(|| UpdateError::DialogError("stdin closed".to_string()))?;

            match parse_choice(&line, prompt.buttons.len()) {
                Some(choice) => return Ok(choice),
                None => eprintln!("Enter a number between 1 and {}", prompt.buttons.len()),
            }
        }
    }
}

/// Native updater stand-in that validates the staged feed and installs
/// nothing.
#[derive(Debug, Default)]
pub struct DryRunUpdater {
    feed_url: Mutex<Option<String>>,
}

impl DryRunUpdater {
    /// Create a dry-run updater.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last registered feed URL.
    pub fn feed_url(&self) -> Option<String> {
        self.feed_url
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Local manifest file a feed URL refers to.
    fn manifest_for(feed_url: &str) -> PathBuf {
        match feed_url.strip_prefix(FILE_URL_PREFIX) {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(feed_url).join(RELEASES_FILE),
        }
    }
}

#[async_trait]
impl NativeUpdater for DryRunUpdater {
    fn set_feed_url(&self, url: &str) -> Result<(), UpdateError> {
        info!(feed_url = url, "feed registered");
        *self
            .feed_url
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(url.to_string());
        Ok(())
    }

    async fn check_for_updates(&self) -> Result<(), UpdateError> {
        let feed_url = self
            .feed_url()
            .ok_or_else(|| UpdateError::NativeUpdaterError("no feed registered".to_string()))?;
        let manifest = Self::manifest_for(&feed_url);

        let content = tokio::fs::read_to_string(&manifest).await.map_err(|e| {
            UpdateError::NativeUpdaterError(format!(
                "cannot read staged manifest {}: {}",
                manifest.display(),
                e
            ))
        })?;
        if content.trim().is_empty() {
            return Err(UpdateError::NativeUpdaterError(
                "staged manifest is empty".to_string(),
            ));
        }

        info!(manifest = %manifest.display(), "staged update is ready");
        Ok(())
    }

    fn quit_and_install(&self) -> Result<(), UpdateError> {
        warn!(feed_url = ?self.feed_url(), "dry run: not installing the staged update");
        Ok(())
    }
}
