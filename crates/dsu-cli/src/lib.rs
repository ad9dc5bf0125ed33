//! dsu - command-line front end for the desktop self-updater
//!
//! This crate provides a command-line interface for:
//! - Verifying signed version descriptors and update binaries
//! - Comparing versions the way the updater does
//! - Computing certificate pins for the update server
//! - Running update checks against a configured server

pub mod cli;
pub mod config;
pub mod console;
pub mod output;

#[cfg(test)]
mod proptests;

pub use cli::Cli;
pub use config::{CliConfig, ConfigError};
pub use output::{OutputFormat, OutputFormatter};

/// Exit codes for CLI operations
///
/// Exit codes provide machine-readable status for scripting:
/// - 0: Success - operation completed successfully
/// - 1: General error - unspecified error occurred
/// - 2: Verification failed - a signature or pin did not check out
/// - 3: No update - the server offers nothing newer
/// - 4: Connection failed - could not reach the update server
/// - 5: Invalid input - bad arguments or data provided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// Signature or pin verification failed (exit code 2)
    VerificationFailed = 2,
    /// Nothing newer is available (exit code 3)
    NoUpdate = 3,
    /// Connection failed (exit code 4)
    ConnectionFailed = 4,
    /// Invalid input provided (exit code 5)
    InvalidInput = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::VerificationFailed => "VERIFICATION_FAILED",
            ExitCode::NoUpdate => "NO_UPDATE",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
        }
    }

    /// Map an updater error to the exit code scripts should see.
    pub fn for_error(error: &dsu_updater::UpdateError) -> Self {
        use dsu_updater::UpdateError;

        match error {
            UpdateError::CertificatePinMismatch { .. }
            | UpdateError::MetadataSignatureInvalid
            | UpdateError::BinarySignatureInvalid => ExitCode::VerificationFailed,
            UpdateError::NetworkError(_)
            | UpdateError::UnexpectedStatus { .. }
            | UpdateError::EmptyResponse => ExitCode::ConnectionFailed,
            UpdateError::InvalidVersion(_)
            | UpdateError::InvalidKey(_)
            | UpdateError::InvalidPin(_)
            | UpdateError::ConfigError(_)
            | UpdateError::UnsupportedPlatform(_) => ExitCode::InvalidInput,
            _ => ExitCode::GeneralError,
        }
    }
}
