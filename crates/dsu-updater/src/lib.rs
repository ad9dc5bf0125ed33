//! # dsu-updater
//!
//! Secure self-update client for a desktop application.
//!
//! This crate handles:
//! - Trusted minisign keys, where a signature from any one key is sufficient
//! - Certificate-pinned HTTPS downloads that stream straight to disk
//! - Parsing and verifying signed version descriptors and binaries
//! - Staging verified binaries for the platform's native updater
//! - The update cycle state machine and its periodic scheduling
//!
//! ## Security
//!
//! - The descriptor is verified before anything it names is downloaded
//! - The binary is verified before it is staged
//! - Every connection to the update host must present a pinned public key
//! - Any verification failure aborts the cycle and removes downloaded files

pub mod config;
pub mod error;
pub mod host;
pub mod keys;
pub mod metadata;
pub mod orchestrator;
#[cfg(test)]
mod proptests;
pub mod random;
pub mod scheduler;
pub mod session;
pub mod staging;
#[cfg(test)]
mod testutil;
pub mod transport;
pub mod version;

// Re-export main types for convenience
pub use config::{AppConfig, ScheduleConfig, ServerConfig, SigningConfig, UpdaterConfig};
pub use error::UpdateError;
pub use host::{Dialog, Localizer, MapLocalizer, NativeUpdater, PowerEvent, Prompt, PromptKind};
pub use keys::TrustedKeySet;
pub use metadata::{BinaryDescriptor, MetadataCodec, Timestamp, UpdateInfo, UpdateMetadata};
pub use orchestrator::{
    Collaborators, CycleOutcome, CyclePhase, OrchestratorState, QueuedUpdate, SkipReason,
    UpdateOrchestrator,
};
pub use scheduler::{CheckScheduler, PowerNotifier};
pub use staging::{Platform, StagedUpdate};
pub use transport::{spki_pin, CertificatePins, Fetcher, PinnedTransport};
pub use version::{channel_name, is_newer};
