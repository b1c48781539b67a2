// BSDM
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Error taxonomy for the console monitor
//!
//! Errors are split by how far they are allowed to travel:
//!
//! - [`BsdmError`] terminates the run and maps onto a process exit code.
//! - [`ProcessingError`] is produced by block analyzers and never leaves the
//!   pipeline; the block's contribution is simply missing from the model.
//! - [`SourceError`] covers line-source I/O and is lifted into [`BsdmError`].
//! - [`SinkError`] covers result reporting and is logged at the boundary.

use crate::model::validator::RamConfigStatus;
use thiserror::Error;

/// Exit code for a successful qualification
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for configuration errors
pub const EXIT_CONFIG: u8 = 1;
/// Exit code when no line source could be identified
pub const EXIT_SOURCE_CLASSIFICATION: u8 = 2;
/// Exit code for mixed DIMM models
pub const EXIT_HOMOGENEITY: u8 = 102;
/// Exit code for a DIMM population that differs from the node configuration
pub const EXIT_POPULATION: u8 = 103;
/// Exit code for memory trained below the reference frequency
pub const EXIT_FREQUENCY: u8 = 104;
/// Exit code when the goal graph could not be resolved
pub const EXIT_DATA_MISSING: u8 = 120;
/// Exit code when a rank margin is below its guideline
pub const EXIT_RMT_MARGIN: u8 = 121;
/// Exit code when the repair test reports a failing DIMM
pub const EXIT_STEP_FAILED: u8 = 122;
/// Exit code for an operator interrupt
pub const EXIT_CANCELLED: u8 = 130;

/// Result type for terminal operations
pub type BsdmResult<T> = Result<T, BsdmError>;

/// Terminal errors of a monitoring run
#[derive(Error, Debug)]
pub enum BsdmError {
    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The source argument is neither a log file, a console device nor a reachable BMC
    #[error("cannot classify data source '{target}': {reason}")]
    SourceClassification { target: String, reason: String },

    /// The active line source failed
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The memory configuration does not match the node configuration
    #[error("RAM configuration check failed: {0}")]
    Validation(RamConfigStatus),

    /// The goal graph could not be resolved within the pass budget
    #[error("insufficient data to reach the goal, unresolved: {}", .unresolved.join(", "))]
    InsufficientData { unresolved: Vec<String> },

    /// The goal graph is not a DAG
    #[error("invalid testplan: {0}")]
    Scheduler(String),

    /// Operator interrupt
    #[error("interrupted by operator")]
    Cancelled,
}

impl BsdmError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            BsdmError::Config(_) | BsdmError::Scheduler(_) => EXIT_CONFIG,
            BsdmError::SourceClassification { .. } => EXIT_SOURCE_CLASSIFICATION,
            BsdmError::Source(_) => EXIT_DATA_MISSING,
            BsdmError::Validation(status) => status.failure_exit_code().unwrap_or(EXIT_CONFIG),
            BsdmError::InsufficientData { .. } => EXIT_DATA_MISSING,
            BsdmError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Create a configuration error from anything displayable
    pub fn config(message: impl std::fmt::Display) -> Self {
        BsdmError::Config(message.to_string())
    }
}

/// Recoverable failure of a block analyzer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("block '{block}' has no header row")]
    MissingHeader { block: String },

    #[error("block '{block}' does not carry a socket id")]
    MissingSocketId { block: String },

    #[error("malformed content in block '{block}': {detail}")]
    Malformed { block: String, detail: String },

    #[error("analyzer for block '{block}' panicked: {detail}")]
    Panicked { block: String, detail: String },

    #[error("no analyzer available for block '{block}'")]
    Unhandled { block: String },
}

/// Failures of a line source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error on {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("source '{0}' cannot be restarted")]
    NotRestartable(String),

    #[error("SOL session with {host} failed: {detail}")]
    Session { host: String, detail: String },
}

impl SourceError {
    pub(crate) fn io(target: impl Into<String>, source: std::io::Error) -> Self {
        SourceError::Io { target: target.into(), source }
    }
}

/// Failures while handing a result to a reporting sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write result: {0}")]
    Io(#[from] std::io::Error),

    #[error("result submission rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_taxonomy() {
        assert_eq!(BsdmError::config("bad").exit_code(), EXIT_CONFIG);
        assert_eq!(
            BsdmError::SourceClassification { target: "x".into(), reason: "y".into() }.exit_code(),
            EXIT_SOURCE_CLASSIFICATION
        );
        assert_eq!(BsdmError::InsufficientData { unresolved: vec![] }.exit_code(), EXIT_DATA_MISSING);
        assert_eq!(BsdmError::Cancelled.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_insufficient_data_lists_goals() {
        let err = BsdmError::InsufficientData { unresolved: vec!["ram_conf_validator".into(), "rmt.send_results".into()] };
        assert_eq!(err.to_string(), "insufficient data to reach the goal, unresolved: ram_conf_validator, rmt.send_results");
    }
}
