use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BoldError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid FASTA input: {0}")]
    InvalidFasta(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP request timed out: {0}")]
    Timeout(String),

    #[error("BOLD rejected the batch: {0}")]
    Submission(String),

    #[error("BOLD returned status {status} for the batch: {message}")]
    SubmissionStatus { status: u16, message: String },

    #[error("BOLD {engine} engine did not respond within {seconds}s")]
    ServiceTimeout { engine: String, seconds: u64 },

    #[error("fetching {locator} failed after {attempts} attempts: {reason}")]
    FetchFailed {
        locator: String,
        attempts: u32,
        reason: String,
    },

    #[error("malformed result page: {0}")]
    MalformedPage(String),

    #[error("too many bad connections ({attempts} failed submissions); try a smaller batch size")]
    #[diagnostic(help("already committed batches are kept; rerun the same command to resume"))]
    TooManyBadConnections { attempts: u32 },

    #[error("failed to parse specimen data: {0}")]
    SpecimenParse(String),

    #[error("checkpoint does not match input: {0}")]
    #[diagnostic(help("remove the checkpoint file or pass --restart to start over"))]
    CheckpointMismatch(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl BoldError {
    /// Transient failures that a bounded retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BoldError::Http(_)
                | BoldError::Timeout(_)
                | BoldError::Submission(_)
                | BoldError::SubmissionStatus { .. }
                | BoldError::ServiceTimeout { .. }
                | BoldError::MalformedPage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_fatal() {
        assert!(!BoldError::InvalidConfiguration("batch size".into()).is_retryable());
        assert!(!BoldError::TooManyBadConnections { attempts: 3 }.is_retryable());
        assert!(
            BoldError::ServiceTimeout {
                engine: "coi".into(),
                seconds: 300
            }
            .is_retryable()
        );
    }
}
