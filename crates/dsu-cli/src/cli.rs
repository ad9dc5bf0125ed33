//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use dsu_updater::host::RESTART_BUTTON;
use dsu_updater::transport::certificates_from_pem;
use dsu_updater::{
    channel_name, is_newer, spki_pin, CheckScheduler, Collaborators, MapLocalizer, MetadataCodec,
    Platform, TrustedKeySet, UpdateError, UpdateOrchestrator,
};
use semver::Version;
use tokio::sync::watch;
use tracing::info;

use crate::config::CliConfig;
use crate::console::{ConsoleDialog, DryRunUpdater};
use crate::output::{ComparisonReport, MetadataReport, OutputFormat, OutputFormatter, PinReport};
use crate::ExitCode;

/// Button index of "later" in the confirmation prompt.
const LATER_BUTTON: usize = 1;

/// dsu - desktop self-updater CLI
#[derive(Parser, Debug)]
#[command(name = "dsu")]
#[command(version, about = "Verify, pin and check signed desktop updates")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (overrides config)
    #[arg(long, global = true)]
    pub output: Option<OutputFormat>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (transport and verification tracing)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: CliConfig) -> anyhow::Result<ExitCode> {
        let format = match self.output {
            Some(format) => format,
            None => config
                .output
                .format
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
        };
        let output = OutputFormatter::new(format, self.verbose);

        match self.command {
            Commands::VerifyMetadata(args) => args.execute(&config, &output).await,
            Commands::VerifyBinary(args) => {
                VerifyMetadataArgs::from(args)
                    .execute(&config, &output)
                    .await
            }
            Commands::Compare(args) => args.execute(&output),
            Commands::Pin(args) => args.execute(&output).await,
            Commands::Check(args) => args.execute(config, &output).await,
            Commands::InitConfig(args) => args.execute(&config, &output),
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify a signed version descriptor and optionally its binary
    VerifyMetadata(VerifyMetadataArgs),
    /// Verify a binary against a signed version descriptor
    VerifyBinary(VerifyBinaryArgs),
    /// Compare two versions the way the updater does
    Compare(CompareArgs),
    /// Compute certificate pins from a PEM file
    Pin(PinArgs),
    /// Run an update check against the configured server
    Check(CheckArgs),
    /// Write a configuration file with default values
    InitConfig(InitConfigArgs),
}

/// Arguments for the verify-metadata command
#[derive(Parser, Debug)]
pub struct VerifyMetadataArgs {
    /// Descriptor file (JSON, newline, detached signature)
    pub file: PathBuf,

    /// Binary to check against the descriptor's binary signature
    #[arg(long)]
    pub binary: Option<PathBuf>,

    /// Trusted public key (can be specified multiple times; overrides config)
    #[arg(long = "key")]
    pub keys: Vec<String>,
}

impl VerifyMetadataArgs {
    pub async fn execute(
        self,
        config: &CliConfig,
        output: &OutputFormatter,
    ) -> anyhow::Result<ExitCode> {
        let signing = &config.updater.signing;
        let keys = if self.keys.is_empty() {
            TrustedKeySet::from_encoded(&signing.keys, signing.allow_legacy_signatures)
        } else {
            TrustedKeySet::from_encoded(&self.keys, signing.allow_legacy_signatures)
        };
        let keys = match keys {
            Ok(keys) => keys,
            Err(e) => return Ok(report_error(output, &e)),
        };

        output.progress(&format!("Reading {}", self.file.display()));
        let raw = tokio::fs::read_to_string(&self.file)
            .await
            .with_context(|| format!("failed to read {}", self.file.display()))?;

        let codec = MetadataCodec::new(Arc::new(keys));
        let metadata = match codec.parse(&raw) {
            Ok(metadata) => metadata,
            Err(e) => return Ok(report_error(output, &e)),
        };

        let metadata_ok = metadata.verify_metadata_signature();
        let binary_ok = match &self.binary {
            Some(path) => {
                output.progress(&format!("Checking {}", path.display()));
                Some(metadata.verify_binary_signature(path).await)
            }
            None => None,
        };

        let report = MetadataReport::new(metadata.info(), metadata_ok, binary_ok);
        print_if_any(&output.format_metadata(&report));

        if report.all_valid() {
            Ok(ExitCode::Success)
        } else {
            output.error("signature check failed");
            Ok(ExitCode::VerificationFailed)
        }
    }
}

/// Arguments for the verify-binary command
#[derive(Parser, Debug)]
pub struct VerifyBinaryArgs {
    /// Descriptor file (JSON, newline, detached signature)
    pub metadata: PathBuf,

    /// Binary to check
    pub binary: PathBuf,

    /// Trusted public key (can be specified multiple times; overrides config)
    #[arg(long = "key")]
    pub keys: Vec<String>,
}

impl From<VerifyBinaryArgs> for VerifyMetadataArgs {
    fn from(args: VerifyBinaryArgs) -> Self {
        Self {
            file: args.metadata,
            binary: Some(args.binary),
            keys: args.keys,
        }
    }
}

/// Arguments for the compare command
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Version of the running application
    pub current: String,

    /// Version offered by the server
    pub candidate: String,
}

impl CompareArgs {
    /// Exits with `NoUpdate` when the candidate is not newer.
    pub fn execute(self, output: &OutputFormatter) -> anyhow::Result<ExitCode> {
        for version in [&self.current, &self.candidate] {
            if let Err(e) = Version::parse(version) {
                let error = UpdateError::from(e);
                return Ok(report_error(output, &error));
            }
        }

        let current = Version::parse(&self.current)?;
        let report = ComparisonReport {
            is_newer: is_newer(&self.current, &self.candidate),
            channel: channel_name(&current),
            current: self.current,
            candidate: self.candidate,
        };
        print_if_any(&output.format_comparison(&report));

        Ok(if report.is_newer {
            ExitCode::Success
        } else {
            ExitCode::NoUpdate
        })
    }
}

/// Arguments for the pin command
#[derive(Parser, Debug)]
pub struct PinArgs {
    /// PEM file with one or more certificates
    pub cert: PathBuf,
}

impl PinArgs {
    pub async fn execute(self, output: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let pem = tokio::fs::read(&self.cert)
            .await
            .with_context(|| format!("failed to read {}", self.cert.display()))?;

        let pins = certificates_from_pem(&pem).and_then(|certs| {
            certs
                .iter()
                .enumerate()
                .map(|(index, cert)| {
                    Ok(PinReport {
                        index,
                        pin: spki_pin(cert)?,
                    })
                })
                .collect::<Result<Vec<_>, UpdateError>>()
        });

        match pins {
            Ok(pins) => {
                print_if_any(&output.format_pins(&pins));
                Ok(ExitCode::Success)
            }
            Err(e) => Ok(report_error(output, &e)),
        }
    }
}

/// Platform to stage updates for
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlatformArg {
    Windows,
    Macos,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Windows => Platform::Windows,
            PlatformArg::Macos => Platform::MacOs,
        }
    }
}

/// Arguments for the check command
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Version of the running application
    #[arg(long)]
    pub current_version: String,

    /// Stage for this platform instead of the one dsu was built for
    #[arg(long, value_enum)]
    pub platform: Option<PlatformArg>,

    /// Keep checking on the configured schedule until interrupted
    #[arg(long)]
    pub watch: bool,

    /// Answer the restart prompt with "restart" without asking
    #[arg(long, conflicts_with = "later")]
    pub restart: bool,

    /// Answer the restart prompt with "later" without asking
    #[arg(long)]
    pub later: bool,
}

impl CheckArgs {
    fn dialog(&self) -> ConsoleDialog {
        if self.restart {
            ConsoleDialog::with_answer(RESTART_BUTTON)
        } else if self.later {
            ConsoleDialog::with_answer(LATER_BUTTON)
        } else {
            ConsoleDialog::interactive()
        }
    }

    pub async fn execute(
        self,
        config: CliConfig,
        output: &OutputFormatter,
    ) -> anyhow::Result<ExitCode> {
        let collaborators = Collaborators {
            dialog: Box::new(self.dialog()),
            localizer: Box::new(MapLocalizer::english()),
            native_updater: Box::new(DryRunUpdater::new()),
        };
        let schedule = config.updater.schedule.clone();

        let orchestrator = match self.platform {
            Some(platform) => {
                UpdateOrchestrator::from_config_for_platform(
                    config.updater,
                    &self.current_version,
                    platform.into(),
                    collaborators,
                )
                .await
            }
            None => {
                UpdateOrchestrator::from_config(config.updater, &self.current_version, collaborators)
                    .await
            }
        };
        let orchestrator = match orchestrator {
            Ok(orchestrator) => Arc::new(orchestrator),
            Err(e) => return Ok(report_error(output, &e)),
        };

        if self.watch {
            let (scheduler, _notifier) = CheckScheduler::new(Arc::clone(&orchestrator), &schedule);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(scheduler.run(shutdown_rx));

            output.progress("Watching for updates, press Ctrl+C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl+C")?;
            info!("interrupt received, stopping");

            let _ = shutdown_tx.send(true);
            handle.await.context("scheduler task failed")?;
            return Ok(ExitCode::Success);
        }

        output.progress(&format!("Checking for updates to {}", self.current_version));
        match orchestrator.check_for_updates().await {
            Ok(outcome) => {
                print_if_any(&output.format_outcome(&outcome));
                Ok(match outcome {
                    dsu_updater::CycleOutcome::NoUpdateAvailable { .. } => ExitCode::NoUpdate,
                    _ => ExitCode::Success,
                })
            }
            Err(e) => Ok(report_error(output, &e)),
        }
    }
}

/// Arguments for the init-config command
#[derive(Parser, Debug)]
pub struct InitConfigArgs {
    /// Where to write the file (defaults to the platform config directory)
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

impl InitConfigArgs {
    pub fn execute(self, config: &CliConfig, output: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let path = match self.path.or_else(CliConfig::default_path) {
            Some(path) => path,
            None => {
                output.error("no config directory available; pass --path");
                return Ok(ExitCode::InvalidInput);
            }
        };

        if path.exists() && !self.force {
            output.error(&format!(
                "{} already exists; pass --force to overwrite",
                path.display()
            ));
            return Ok(ExitCode::InvalidInput);
        }

        config.save(&path)?;
        output.success(&format!("Wrote {}", path.display()));
        Ok(ExitCode::Success)
    }
}

fn report_error(output: &OutputFormatter, error: &UpdateError) -> ExitCode {
    let code = ExitCode::for_error(error);
    let message = output.format_error_with_code(error, code);
    if !message.is_empty() {
        if output.format() == OutputFormat::Json {
            println!("{message}");
        } else {
            eprintln!("{message}");
        }
    }
    code
}

fn print_if_any(text: &str) {
    if !text.is_empty() {
        println!("{text}");
    }
}
