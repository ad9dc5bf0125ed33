//! Output formatting for CLI results
//!
//! Three output formats are supported:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting and automation
//! - Quiet: Minimal output, exit codes only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use dsu_updater::{CycleOutcome, SkipReason, UpdateInfo};
use serde::Serialize;

use crate::ExitCode;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for scripting
    Json,
    /// Minimal output - exit codes only
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper for consistent schema
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    /// Whether the operation was successful
    pub success: bool,
    /// The response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Command that was executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    /// Create a successful response with command context
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    /// Create an error response
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

/// Descriptor verification result.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataReport {
    pub version: String,
    pub binary_path: String,
    pub release_notes: String,
    pub timestamp: String,
    pub metadata_signature_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_signature_valid: Option<bool>,
}

impl MetadataReport {
    /// Build a report for `info`.
    pub fn new(info: &UpdateInfo, metadata_ok: bool, binary_ok: Option<bool>) -> Self {
        Self {
            version: info.version.to_string(),
            binary_path: info.binary.path.clone(),
            release_notes: info.release_notes.clone(),
            timestamp: info.timestamp.to_string(),
            metadata_signature_valid: metadata_ok,
            binary_signature_valid: binary_ok,
        }
    }

    /// Whether every performed check passed.
    pub fn all_valid(&self) -> bool {
        self.metadata_signature_valid && self.binary_signature_valid.unwrap_or(true)
    }
}

/// Version comparison result.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub current: String,
    pub candidate: String,
    pub is_newer: bool,
    pub channel: String,
}

/// Certificate pin for one certificate.
#[derive(Debug, Clone, Serialize)]
pub struct PinReport {
    pub index: usize,
    pub pin: String,
}

/// Update check result.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub already_queued: bool,
}

impl From<&CycleOutcome> for OutcomeReport {
    fn from(outcome: &CycleOutcome) -> Self {
        match outcome {
            CycleOutcome::Skipped(SkipReason::AlreadyRunning) => Self {
                outcome: "skipped: already running".to_string(),
                version: None,
                already_queued: false,
            },
            CycleOutcome::Skipped(SkipReason::Suspended) => Self {
                outcome: "skipped: suspended".to_string(),
                version: None,
                already_queued: false,
            },
            CycleOutcome::NoUpdateAvailable { latest } => Self {
                outcome: "no update available".to_string(),
                version: Some(latest.to_string()),
                already_queued: false,
            },
            CycleOutcome::Installing {
                version,
                already_queued,
            } => Self {
                outcome: "installing".to_string(),
                version: Some(version.to_string()),
                already_queued: *already_queued,
            },
            CycleOutcome::Deferred {
                version,
                already_queued,
            } => Self {
                outcome: "deferred".to_string(),
                version: Some(version.to_string()),
                already_queued: *already_queued,
            },
        }
    }
}

/// Formats output for different modes
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    /// Get the current output format
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    /// Format a descriptor verification report
    pub fn format_metadata(&self, report: &MetadataReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Version", &report.version]);
                table.add_row(vec!["Binary Path", &report.binary_path]);
                table.add_row(vec!["Timestamp", &report.timestamp]);
                table.add_row(vec![
                    "Release Notes",
                    if report.release_notes.is_empty() {
                        "-"
                    } else {
                        report.release_notes.as_str()
                    },
                ]);
                table.add_row(vec![
                    "Metadata Signature",
                    validity(report.metadata_signature_valid),
                ]);
                if let Some(valid) = report.binary_signature_valid {
                    table.add_row(vec!["Binary Signature", validity(valid)]);
                }
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(report, "verify-metadata"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format a version comparison
    pub fn format_comparison(&self, report: &ComparisonReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Current", &report.current]);
                table.add_row(vec!["Candidate", &report.candidate]);
                table.add_row(vec!["Newer", if report.is_newer { "yes" } else { "no" }]);
                table.add_row(vec!["Channel", &report.channel]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(report, "compare"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format certificate pins
    pub fn format_pins(&self, pins: &[PinReport]) -> String {
        match self.format {
            OutputFormat::Table => {
                if pins.is_empty() {
                    return "No certificates found.".to_string();
                }
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Certificate", "SPKI SHA-256 Pin"]);
                for pin in pins {
                    table.add_row(vec![pin.index.to_string(), pin.pin.clone()]);
                }
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&pins, "pin"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format the result of an update check
    pub fn format_outcome(&self, outcome: &CycleOutcome) -> String {
        let report = OutcomeReport::from(outcome);
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Outcome", &report.outcome]);
                table.add_row(vec!["Version", report.version.as_deref().unwrap_or("-")]);
                table.add_row(vec![
                    "Already Queued",
                    if report.already_queued { "yes" } else { "no" },
                ]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&report, "check"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format error with exit code context
    pub fn format_error_with_code(&self, error: &dyn std::error::Error, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {error}"),
            OutputFormat::Json => {
                let response = JsonResponse::error(&error.to_string());
                let mut output = match serde_json::to_value(&response) {
                    Ok(value) => value,
                    Err(e) => return format!("{{\"error\": \"{e}\"}}"),
                };
                output["exit_code"] = serde_json::json!(code as i32);
                output["exit_code_name"] = serde_json::json!(code.name());
                self.to_json(&output)
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format progress message (only shown in verbose mode)
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    /// Format success message
    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    /// Format error message
    pub fn error(&self, message: &str) {
        if self.format == OutputFormat::Table {
            eprintln!("✗ {message}");
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        self.to_json(&JsonResponse::success_with_command(value, command))
    }
}

fn property_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table
}

fn validity(valid: bool) -> &'static str {
    if valid {
        "valid"
    } else {
        "INVALID"
    }
}
