//! Update orchestrator - sequences one update cycle at a time.
//!
//! A cycle downloads the version descriptor, verifies it, compares versions,
//! downloads and verifies the binary, stages it for the native updater and
//! asks the user to restart. Verification of the descriptor strictly precedes
//! the binary download, and verification of the binary strictly precedes
//! staging; there is no path that stages unverified content.
//!
//! State is process-lifetime only and never persisted:
//! - `is_running` refuses overlapping cycles
//! - `is_suspended` refuses new cycles between suspend and resume
//! - `queued` remembers a downloaded update awaiting confirmation
//! - `error_prompt_shown_at` rate-limits the generic error prompt

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use semver::Version;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::UpdaterConfig;
use crate::error::UpdateError;
use crate::host::{Dialog, Localizer, NativeUpdater, PowerEvent, Prompt, RESTART_BUTTON};
use crate::metadata::{MetadataCodec, UpdateMetadata};
use crate::session::{DownloadSession, ScratchArea};
use crate::staging::{self, Platform, StagedUpdate};
use crate::transport::{Fetcher, PinnedTransport};
use crate::version::is_newer_version;

/// Phase of the current (or last) update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// No cycle in progress
    Idle,
    /// Downloading and verifying the version descriptor
    Checking,
    /// Descriptor was malformed or not signed by a trusted key
    MetadataRejected,
    /// Server offers nothing newer than the running version
    NoUpdateAvailable,
    /// Server offers nothing newer than the queued update
    AlreadyQueued,
    /// Downloading and verifying the binary
    Downloading,
    /// Binary was not signed by a trusted key
    BinaryRejected,
    /// Binary is verified and described to the native updater
    Staged,
    /// Waiting for the user to choose restart or later
    AwaitingConfirmation,
    /// User chose restart
    Installing,
    /// User chose later
    Deferred,
}

/// Why a check did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle is in progress
    AlreadyRunning,
    /// The system is suspended
    Suspended,
}

/// Result of a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No cycle was started
    Skipped(SkipReason),
    /// Nothing newer than the running version
    NoUpdateAvailable { latest: Version },
    /// User chose to restart into `version`
    Installing { version: Version, already_queued: bool },
    /// User deferred `version`; it stays queued
    Deferred { version: Version, already_queued: bool },
}

/// A verified and staged update awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUpdate {
    /// Version of the staged update
    pub version: Version,
    /// Release notes shown in the confirmation prompt
    pub release_notes: String,
}

/// Process-lifetime orchestrator state.
#[derive(Debug, Clone)]
pub struct OrchestratorState {
    /// A cycle is in progress
    pub is_running: bool,
    /// The system is suspended
    pub is_suspended: bool,
    /// Update awaiting confirmation
    pub queued: Option<QueuedUpdate>,
    /// When the error prompt was last shown
    pub error_prompt_shown_at: Option<Instant>,
    /// Current cycle phase
    pub phase: CyclePhase,
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self {
            is_running: false,
            is_suspended: false,
            queued: None,
            error_prompt_shown_at: None,
            phase: CyclePhase::Idle,
        }
    }
}

/// Host-provided collaborators.
pub struct Collaborators {
    /// Presents prompts
    pub dialog: Box<dyn Dialog>,
    /// Localizes prompt text
    pub localizer: Box<dyn Localizer>,
    /// The platform's native updater
    pub native_updater: Box<dyn NativeUpdater>,
}

/// Orchestrates update cycles.
///
/// # Example
///
/// ```ignore
/// use dsu_updater::{Collaborators, UpdateOrchestrator, UpdaterConfig};
///
/// let config = UpdaterConfig::load_from_file(path)?;
/// let orchestrator = UpdateOrchestrator::from_config(config, "2.1.0", collaborators).await?;
///
/// match orchestrator.check_for_updates().await? {
///     CycleOutcome::Deferred { version, .. } => println!("{} is queued", version),
///     outcome => println!("{:?}", outcome),
/// }
/// ```
pub struct UpdateOrchestrator {
    config: UpdaterConfig,
    current_version: Version,
    platform: Platform,
    codec: MetadataCodec,
    fetcher: Box<dyn Fetcher>,
    dialog: Box<dyn Dialog>,
    localizer: Box<dyn Localizer>,
    native_updater: Box<dyn NativeUpdater>,
    scratch: ScratchArea,
    state: Mutex<OrchestratorState>,
}

impl UpdateOrchestrator {
    /// Create an orchestrator and remove any downloads left over from a
    /// previous run.
    ///
    /// # Arguments
    ///
    /// * `config` - Updater configuration
    /// * `current_version` - Version of the running application
    /// * `platform` - Native updater family to stage for
    /// * `codec` - Descriptor codec bound to the trusted keys
    /// * `fetcher` - Downloads server paths to local files
    /// * `collaborators` - Dialog, localization and native updater
    pub async fn new(
        config: UpdaterConfig,
        current_version: Version,
        platform: Platform,
        codec: MetadataCodec,
        fetcher: Box<dyn Fetcher>,
        collaborators: Collaborators,
    ) -> Self {
        let scratch = config.scratch_area();
        let orchestrator = Self {
            config,
            current_version,
            platform,
            codec,
            fetcher,
            dialog: collaborators.dialog,
            localizer: collaborators.localizer,
            native_updater: collaborators.native_updater,
            scratch,
            state: Mutex::new(OrchestratorState::default()),
        };
        orchestrator.purge_scratch().await;

        info!(
            current_version = %orchestrator.current_version,
            platform = %orchestrator.platform,
            "update orchestrator ready"
        );
        orchestrator
    }

    /// Create an orchestrator talking to the configured server over a pinned
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is incomplete
    /// - `current_version` is not a semantic version
    /// - The current platform has no supported native updater
    /// - Keys or pins cannot be decoded
    pub async fn from_config(
        config: UpdaterConfig,
        current_version: &str,
        collaborators: Collaborators,
    ) -> Result<Self, UpdateError> {
        let platform = Platform::current()?;
        Self::from_config_for_platform(config, current_version, platform, collaborators).await
    }

    /// Like [`from_config`](Self::from_config), but staging for an explicit
    /// platform instead of the one this binary was built for.
    pub async fn from_config_for_platform(
        config: UpdaterConfig,
        current_version: &str,
        platform: Platform,
        collaborators: Collaborators,
    ) -> Result<Self, UpdateError> {
        config.validate()?;
        let current_version = Version::parse(current_version)?;
        let codec = MetadataCodec::new(Arc::new(config.trusted_keys()?));
        let transport = PinnedTransport::from_config(&config.server)?;

        Ok(Self::new(
            config,
            current_version,
            platform,
            codec,
            Box::new(transport),
            collaborators,
        )
        .await)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> OrchestratorState {
        self.lock_state().clone()
    }

    /// Version of the running application.
    pub fn current_version(&self) -> &Version {
        &self.current_version
    }

    /// Apply a power-state notification.
    ///
    /// A cycle already in progress is not cancelled.
    pub fn handle_power_event(&self, event: PowerEvent) {
        let mut state = self.lock_state();
        match event {
            PowerEvent::Suspend => {
                state.is_suspended = true;
                info!(cycle_running = state.is_running, "system suspended, update checks paused");
            }
            PowerEvent::Resume => {
                state.is_suspended = false;
                info!("system resumed, update checks enabled");
            }
        }
    }

    /// Run one update cycle.
    ///
    /// Refused without side effects while another cycle is running or the
    /// system is suspended.
    ///
    /// # Errors
    ///
    /// Any failure aborts the cycle. The running flag is cleared before the
    /// error prompt is shown (at most once per cooldown window), so the next
    /// scheduled check may retry while the prompt is still open.
    pub async fn check_for_updates(&self) -> Result<CycleOutcome, UpdateError> {
        {
            let mut state = self.lock_state();
            if state.is_running {
                debug!("update check already running, skipping");
                return Ok(CycleOutcome::Skipped(SkipReason::AlreadyRunning));
            }
            if state.is_suspended {
                debug!("system suspended, skipping update check");
                return Ok(CycleOutcome::Skipped(SkipReason::Suspended));
            }
            state.is_running = true;
        }
        let running = RunningGuard { state: &self.state };

        let result = self.run_cycle().await;
        // The error prompt may wait on the user; later checks must not.
        drop(running);

        match result {
            Ok(outcome) => {
                info!(outcome = ?outcome, "update cycle finished");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, retryable = e.is_retryable(), "update cycle failed");
                self.show_error_prompt().await;
                Err(e)
            }
        }
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, UpdateError> {
        let queued = self.lock_state().queued.clone();
        if queued.is_none() {
            self.purge_scratch().await;
        }

        self.enter(CyclePhase::Checking);
        let metadata = match self.fetch_metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                self.enter(CyclePhase::MetadataRejected);
                return Err(e);
            }
        };
        let candidate = metadata.info().version.clone();

        if let Some(queued) = queued {
            if !is_newer_version(&queued.version, &candidate) {
                self.enter(CyclePhase::AlreadyQueued);
                info!(
                    queued = %queued.version,
                    available = %candidate,
                    "update already queued, asking again"
                );
                return self
                    .confirm(queued.version, &queued.release_notes, true)
                    .await;
            }
        }

        if !is_newer_version(&self.current_version, &candidate) {
            self.enter(CyclePhase::NoUpdateAvailable);
            info!(
                current = %self.current_version,
                available = %candidate,
                "no update available"
            );
            return Ok(CycleOutcome::NoUpdateAvailable { latest: candidate });
        }

        self.enter(CyclePhase::Downloading);
        info!(current = %self.current_version, available = %candidate, "update available");
        let staged = self.download_and_stage(&metadata).await?;
        self.enter(CyclePhase::Staged);

        if let Err(e) = self.hand_off(&staged).await {
            self.lock_state().queued = None;
            self.purge_scratch().await;
            return Err(e);
        }

        let release_notes = metadata.info().release_notes.clone();
        self.lock_state().queued = Some(QueuedUpdate {
            version: candidate.clone(),
            release_notes: release_notes.clone(),
        });

        self.confirm(candidate, &release_notes, false).await
    }

    /// Download, parse and verify the version descriptor.
    async fn fetch_metadata(&self) -> Result<UpdateMetadata, UpdateError> {
        let server_path = self
            .config
            .metadata_path(self.platform, &self.current_version);
        let session = self.scratch.open_session().await?;
        let local_path = session.metadata_path();

        let fetched = self.fetcher.fetch(&server_path, &local_path).await;
        let contents = match fetched {
            Ok(_) => tokio::fs::read(&local_path).await,
            Err(e) => {
                self.close_session(session).await;
                return Err(e);
            }
        };
        self.close_session(session).await;

        let raw = String::from_utf8(contents?)
            .map_err(|e| UpdateError::MetadataParseError(format!("metadata is not UTF-8: {}", e)))?;
        if raw.trim().is_empty() {
            warn!(path = %server_path, "update server returned empty metadata");
            return Err(UpdateError::EmptyResponse);
        }

        let metadata = self.codec.parse(&raw)?;
        if !metadata.verify_metadata_signature() {
            return Err(UpdateError::MetadataSignatureInvalid);
        }
        Ok(metadata)
    }

    /// Download and verify the binary, then write the native manifest.
    ///
    /// The scratch area is purged before the download and again on any
    /// failure.
    async fn download_and_stage(
        &self,
        metadata: &UpdateMetadata,
    ) -> Result<StagedUpdate, UpdateError> {
        self.lock_state().queued = None;
        self.purge_scratch().await;

        let info = metadata.info();
        let session = self.scratch.open_session().await?;
        let binary = session.binary_path(
            &self
                .platform
                .binary_file_name(&self.config.app.name, &info.version),
        );
        let server_path = self.config.binary_path(&info.binary.path);

        if let Err(e) = self.fetcher.fetch(&server_path, &binary).await {
            self.purge_scratch().await;
            return Err(e);
        }

        if !metadata.verify_binary_signature(&binary).await {
            self.enter(CyclePhase::BinaryRejected);
            self.purge_scratch().await;
            return Err(UpdateError::BinarySignatureInvalid);
        }

        match staging::stage(self.platform, &binary) {
            Ok(staged) => Ok(staged),
            Err(e) => {
                self.purge_scratch().await;
                Err(e)
            }
        }
    }

    /// Register the staged update with the native updater and let it ingest
    /// the update.
    async fn hand_off(&self, staged: &StagedUpdate) -> Result<(), UpdateError> {
        info!(feed = %staged.feed_url, "handing update to native updater");
        self.native_updater.set_feed_url(&staged.feed_url)?;

        let settle = self.config.schedule.handoff_settle();
        if settle > Duration::ZERO {
            tokio::time::sleep(settle).await;
        }

        self.native_updater.check_for_updates().await?;
        info!("native updater accepted the update");
        Ok(())
    }

    /// Ask the user to restart into `version`.
    ///
    /// A dialog failure leaves the update queued.
    async fn confirm(
        &self,
        version: Version,
        release_notes: &str,
        already_queued: bool,
    ) -> Result<CycleOutcome, UpdateError> {
        self.enter(CyclePhase::AwaitingConfirmation);
        let prompt = Prompt::confirmation(&*self.localizer, &self.config.app.name, release_notes);

        match self.dialog.show_choice(&prompt).await {
            Ok(RESTART_BUTTON) => {
                self.enter(CyclePhase::Installing);
                info!(version = %version, "user chose to restart into update");
                self.native_updater.quit_and_install()?;
                Ok(CycleOutcome::Installing {
                    version,
                    already_queued,
                })
            }
            Ok(choice) => {
                self.enter(CyclePhase::Deferred);
                info!(version = %version, choice, "user deferred update");
                Ok(CycleOutcome::Deferred {
                    version,
                    already_queued,
                })
            }
            Err(e) => {
                self.enter(CyclePhase::Deferred);
                warn!(version = %version, error = %e, "could not show update prompt, keeping update queued");
                Ok(CycleOutcome::Deferred {
                    version,
                    already_queued,
                })
            }
        }
    }

    /// Show the generic error prompt unless it was shown within the
    /// cooldown window.
    async fn show_error_prompt(&self) {
        let cooldown = self.config.schedule.error_prompt_cooldown();
        let now = Instant::now();
        {
            let mut state = self.lock_state();
            if let Some(shown_at) = state.error_prompt_shown_at {
                let elapsed = now.duration_since(shown_at);
                if elapsed < cooldown {
                    info!(
                        elapsed_secs = elapsed.as_secs(),
                        cooldown_secs = cooldown.as_secs(),
                        "suppressing update error prompt"
                    );
                    return;
                }
            }
            state.error_prompt_shown_at = Some(now);
        }

        let prompt = Prompt::update_failed(&*self.localizer);
        if let Err(e) = self.dialog.show_choice(&prompt).await {
            warn!(error = %e, "could not show update error prompt");
        }
    }

    async fn purge_scratch(&self) {
        if let Err(e) = self.scratch.purge().await {
            error!(error = %e, "an error occurred while cleaning the download folder");
        }
    }

    async fn close_session(&self, session: DownloadSession) {
        let dir = session.dir().display().to_string();
        if let Err(e) = session.close().await {
            warn!(path = %dir, error = %e, "failed to remove download session");
        }
    }

    fn enter(&self, phase: CyclePhase) {
        let mut state = self.lock_state();
        if state.phase != phase {
            debug!(from = ?state.phase, to = ?phase, "update cycle transition");
            state.phase = phase;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Returns the orchestrator to `Idle` and clears the running flag when a
/// cycle ends, including when the cycle's future is dropped.
struct RunningGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.phase != CyclePhase::Idle {
            debug!(from = ?state.phase, to = ?CyclePhase::Idle, "update cycle transition");
            state.phase = CyclePhase::Idle;
        }
        state.is_running = false;
    }
}
