//! Configuration structures for the updater.
//!
//! Defines the update server endpoint and pins, trusted signing keys,
//! application naming, and check scheduling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::keys::TrustedKeySet;
use crate::session::ScratchArea;
use crate::staging::Platform;
use crate::version::channel_name;

/// Main updater configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Update server endpoint
    #[serde(default)]
    pub server: ServerConfig,

    /// Trusted signing keys
    #[serde(default)]
    pub signing: SigningConfig,

    /// Application naming
    #[serde(default)]
    pub app: AppConfig,

    /// Check scheduling
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check that the configuration can drive an update check.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the hostname, signing keys or certificate
    /// pins are missing.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.server.hostname.trim().is_empty() {
            return Err(UpdateError::ConfigError(
                "server.hostname must not be empty".to_string(),
            ));
        }
        if self.signing.keys.is_empty() {
            return Err(UpdateError::ConfigError(
                "signing.keys must contain at least one key".to_string(),
            ));
        }
        if self.server.certificate_pins.is_empty() {
            return Err(UpdateError::ConfigError(
                "server.certificate_pins must contain at least one pin".to_string(),
            ));
        }
        if self.app.name.trim().is_empty() {
            return Err(UpdateError::ConfigError("app.name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Decode the configured signing keys.
    pub fn trusted_keys(&self) -> Result<TrustedKeySet, UpdateError> {
        TrustedKeySet::from_encoded(&self.signing.keys, self.signing.allow_legacy_signatures)
    }

    /// Scratch area for downloads.
    pub fn scratch_area(&self) -> ScratchArea {
        ScratchArea::new(&self.app.temp_dir(), &self.app.scratch_namespace)
    }

    /// Server path of the metadata file for the running version.
    ///
    /// Format: `<base_path>/<flavour>-<channel>-<os>.json`
    pub fn metadata_path(&self, platform: Platform, current: &Version) -> String {
        format!(
            "{}/{}-{}-{}.json",
            self.server.base_path.trim_end_matches('/'),
            self.app.flavour,
            channel_name(current),
            platform.metadata_os_name()
        )
    }

    /// Server path of a binary referenced by metadata.
    pub fn binary_path(&self, binary_path: &str) -> String {
        format!(
            "{}/{}",
            self.server.base_path.trim_end_matches('/'),
            binary_path.trim_start_matches('/')
        )
    }
}

/// Update server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host name; must match the certificate
    #[serde(default)]
    pub hostname: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path prefix for all downloads
    #[serde(default)]
    pub base_path: String,

    /// Base64 SHA-256 hashes of accepted server public keys
    #[serde(default)]
    pub certificate_pins: Vec<String>,

    /// Additional PEM root certificates to trust
    #[serde(default)]
    pub extra_root_certificates: Vec<PathBuf>,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: default_port(),
            base_path: String::new(),
            certificate_pins: Vec::new(),
            extra_root_certificates: Vec::new(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl ServerConfig {
    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Trusted signing keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Minisign public keys, as the two-line box or the bare base64 line
    #[serde(default)]
    pub keys: Vec<String>,

    /// Accept signatures over the raw payload as well as prehashed ones
    #[serde(default = "default_true")]
    pub allow_legacy_signatures: bool,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            allow_legacy_signatures: true,
        }
    }
}

/// Application naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Executable name, used in prompts and Windows package names
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Build flavour, part of the metadata file name
    #[serde(default = "default_flavour")]
    pub flavour: String,

    /// Directory under the temp dir that holds downloads
    #[serde(default = "default_scratch_namespace")]
    pub scratch_namespace: String,

    /// Temp dir override (empty = OS temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            flavour: default_flavour(),
            scratch_namespace: default_scratch_namespace(),
            temp_dir: None,
        }
    }
}

impl AppConfig {
    /// Get the temp dir, defaulting to the OS temp dir.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Check scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Delay before the first check after start-up, in seconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Interval between checks, in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Minimum time between two error prompts, in seconds
    #[serde(default = "default_error_prompt_cooldown")]
    pub error_prompt_cooldown_secs: u64,

    /// Delay between registering a feed and asking the native updater to
    /// check it, in milliseconds
    #[serde(default = "default_handoff_settle")]
    pub handoff_settle_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            interval_secs: default_interval(),
            error_prompt_cooldown_secs: default_error_prompt_cooldown(),
            handoff_settle_ms: default_handoff_settle(),
        }
    }
}

impl ScheduleConfig {
    /// Delay before the first check.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Interval between checks, never zero.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Error prompt cooldown.
    pub fn error_prompt_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_prompt_cooldown_secs)
    }

    /// Native updater settle delay.
    pub fn handoff_settle(&self) -> Duration {
        Duration::from_millis(self.handoff_settle_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when neither flags nor RUST_LOG are set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    443
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_app_name() -> String {
    "desktop-app".to_string()
}

fn default_flavour() -> String {
    "consumer".to_string()
}

fn default_scratch_namespace() -> String {
    "desktop-app-updater".to_string()
}

fn default_initial_delay() -> u64 {
    30
}

fn default_interval() -> u64 {
    3 * 60 * 60
}

fn default_error_prompt_cooldown() -> u64 {
    15 * 60
}

fn default_handoff_settle() -> u64 {
    2000
}

fn default_log_level() -> String {
    "warn".to_string()
}
