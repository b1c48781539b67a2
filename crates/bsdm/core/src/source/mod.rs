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

//! Line sources
//!
//! A run reads exactly one source: a captured log file, a directly attached
//! serial console, or an IPMI Serial-Over-LAN session. All of them yield
//! normalized [`LogLine`]s through the [`LineSource`] trait.

pub mod file;
pub mod normalize;
#[cfg(unix)]
pub mod serial;
pub mod sol;

use crate::config::BsdmConfig;
use crate::error::{BsdmError, BsdmResult, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub use file::LogFileSource;
pub use normalize::{LineAssembler, strip_control_sequences};
#[cfg(unix)]
pub use serial::SerialSource;
pub use sol::{SolSource, presence_ping};

/// A normalized console line and the moment it arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl LogLine {
    /// Normalize raw text and stamp it with the current time
    pub fn new(raw: &str) -> Self {
        Self::at(raw, Utc::now())
    }

    pub fn at(raw: &str, received_at: DateTime<Utc>) -> Self {
        let trimmed = raw.trim_end_matches(['\r', '\n']);
        Self {
            text: strip_control_sequences(trimmed).into_owned(),
            received_at,
        }
    }
}

/// Kind of console the run is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    LogFile,
    SerialConsole,
    Sol,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::LogFile => write!(f, "log file"),
            SourceKind::SerialConsole => write!(f, "serial console"),
            SourceKind::Sol => write!(f, "SOL session"),
        }
    }
}

/// Lazy sequence of console lines
#[async_trait]
pub trait LineSource: Send {
    /// Human readable origin, e.g. the path or host
    fn describe(&self) -> String;

    fn kind(&self) -> SourceKind;

    /// Next line, `None` at end of stream
    ///
    /// Live sources suspend the calling task while waiting for data and end
    /// the stream once their idle timeout elapses.
    async fn next_line(&mut self) -> Result<Option<LogLine>, SourceError>;

    /// Rewind to the first line
    async fn restart(&mut self) -> Result<(), SourceError> {
        Err(SourceError::NotRestartable(self.describe()))
    }

    /// Release the device or session
    async fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// In-memory source used for replays and tests
#[derive(Debug, Clone)]
pub struct ReplaySource {
    name: String,
    lines: Vec<String>,
    pending: VecDeque<String>,
    closed: bool,
}

impl ReplaySource {
    pub fn new(name: impl Into<String>, lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        Self {
            name: name.into(),
            pending: lines.iter().cloned().collect(),
            lines,
            closed: false,
        }
    }

    /// Build from a transcript, one line per `\n`
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, text.lines())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Lines not consumed yet
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl LineSource for ReplaySource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LogFile
    }

    async fn next_line(&mut self) -> Result<Option<LogLine>, SourceError> {
        Ok(self.pending.pop_front().map(|l| LogLine::new(&l)))
    }

    async fn restart(&mut self) -> Result<(), SourceError> {
        self.pending = self.lines.iter().cloned().collect();
        self.closed = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.closed = true;
        Ok(())
    }
}

/// Decide which kind of source a command line argument designates
///
/// A non-empty regular file is a log file and a character device is a serial
/// console. Anything that does not exist on the filesystem is treated as a
/// management network host and must answer an RMCP presence ping.
pub async fn classify_source(target: &str, config: &BsdmConfig) -> BsdmResult<SourceKind> {
    let classification_error = |reason: String| BsdmError::SourceClassification {
        target: target.to_string(),
        reason,
    };

    match tokio::fs::metadata(target).await {
        Ok(meta) => {
            if meta.is_file() && meta.len() > 0 {
                return Ok(SourceKind::LogFile);
            }
            if is_char_device(&meta) {
                return Ok(SourceKind::SerialConsole);
            }
            Err(classification_error("path is neither a non-empty log file nor a console device".to_string()))
        }
        Err(_) => {
            let timeout = Duration::from_millis(config.sol.probe_timeout_ms);
            debug!(host = target, port = config.sol.port, "probing BMC presence");
            match presence_ping(target, config.sol.port, timeout).await {
                Ok(true) => Ok(SourceKind::Sol),
                Ok(false) => Err(classification_error("host did not answer the RMCP presence ping".to_string())),
                Err(e) => Err(classification_error(e.to_string())),
            }
        }
    }
}

#[cfg(unix)]
fn is_char_device(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    meta.file_type().is_char_device()
}

#[cfg(not(unix))]
fn is_char_device(_meta: &std::fs::Metadata) -> bool {
    false
}

/// Classify the argument and open the matching source
pub async fn open_source(target: &str, config: &BsdmConfig) -> BsdmResult<Box<dyn LineSource>> {
    let kind = classify_source(target, config).await?;
    info!(target, kind = %kind, "data source identified");
    let idle = Duration::from_secs(config.base.idle_timeout_secs);
    let source: Box<dyn LineSource> = match kind {
        SourceKind::LogFile => Box::new(LogFileSource::open(Path::new(target)).await?),
        #[cfg(unix)]
        SourceKind::SerialConsole => Box::new(SerialSource::open(Path::new(target), config.base.baud_rate, idle)?),
        #[cfg(not(unix))]
        SourceKind::SerialConsole => {
            return Err(BsdmError::SourceClassification {
                target: target.to_string(),
                reason: "serial consoles are only supported on unix".to_string(),
            });
        }
        SourceKind::Sol => Box::new(SolSource::activate(target, &config.sol, idle).await?),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_line_normalizes() {
        let line = LogLine::new("\x1b[0mSTOP_DIMMINFO_TABLE\r\n");
        assert_eq!(line.text, "STOP_DIMMINFO_TABLE");
    }

    #[tokio::test]
    async fn test_replay_source_restart_and_close() {
        let mut source = ReplaySource::new("replay", ["a", "b"]);
        assert_eq!(source.next_line().await.unwrap().unwrap().text, "a");
        assert_eq!(source.remaining(), 1);
        source.restart().await.unwrap();
        assert_eq!(source.remaining(), 2);
        source.close().await.unwrap();
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn test_classify_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        std::fs::write(&path, "START_DIMMINFO_TABLE\n").unwrap();
        let kind = classify_source(path.to_str().unwrap(), &BsdmConfig::default()).await.unwrap();
        assert_eq!(kind, SourceKind::LogFile);
    }

    #[tokio::test]
    async fn test_classify_empty_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.log");
        std::fs::write(&path, "").unwrap();
        let err = classify_source(path.to_str().unwrap(), &BsdmConfig::default()).await.unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_SOURCE_CLASSIFICATION);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_classify_char_device() {
        let kind = classify_source("/dev/null", &BsdmConfig::default()).await.unwrap();
        assert_eq!(kind, SourceKind::SerialConsole);
    }
}
