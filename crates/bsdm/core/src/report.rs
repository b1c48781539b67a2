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

//! Result records, sinks and the run transcript

use crate::error::SinkError;
use crate::model::{ChassisInfo, Component, FailureEvent, RamConfigStatus, Severity};
use crate::qualification::Verdict;
use crate::segmenter::BootLifecycle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Record handed to the reporting sinks, one per qualification test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationResult {
    pub test: String,
    pub status: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub environment: ChassisInfo,
    pub components: Vec<Component>,
    pub ram_config: Option<RamConfigStatus>,
    pub tags: Vec<String>,
    pub data: serde_json::Value,
    pub failure_events: Vec<FailureEvent>,
    pub lifecycle: BootLifecycle,
}

impl QualificationResult {
    /// Model id of the first component, used for tagging and file names
    pub fn primary_model(&self) -> Option<&str> {
        self.components.first().map(|c| c.model.as_str())
    }

    /// `<model>_<test>_<started_at>.json`
    pub fn file_name(&self) -> String {
        let model = self.primary_model().unwrap_or("unknown").replace(['/', ' '], "-");
        format!("{model}_{}_{}.json", self.test, self.started_at.format("%Y%m%dT%H%M%SZ"))
    }
}

/// Destination of result records
pub trait ResultSink: Send {
    fn name(&self) -> &str;

    fn submit(&mut self, result: &QualificationResult) -> Result<(), SinkError>;
}

/// Pretty JSON on any writer, stdout in the CLI
pub struct WriterSink<W: Write + Send> {
    name: String,
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self { name: name.into(), writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new("stdout", std::io::stdout())
    }
}

impl<W: Write + Send> ResultSink for WriterSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, result: &QualificationResult) -> Result<(), SinkError> {
        serde_json::to_writer_pretty(&mut self.writer, result)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// One JSON file per result under a directory
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ResultSink for DirectorySink {
    fn name(&self) -> &str {
        "directory"
    }

    fn submit(&mut self, result: &QualificationResult) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(result.file_name());
        let body = serde_json::to_vec_pretty(result)?;
        std::fs::write(&path, body)?;
        info!(path = %path.display(), test = %result.test, "result written");
        self.written.push(path);
        Ok(())
    }
}

/// Keeps results in memory, shared with the caller
#[derive(Clone, Default)]
pub struct MemorySink {
    results: Arc<Mutex<Vec<QualificationResult>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<QualificationResult> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ResultSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn submit(&mut self, result: &QualificationResult) -> Result<(), SinkError> {
        self.results
            .lock()
            .map_err(|_| SinkError::Rejected("result store poisoned".to_string()))?
            .push(result.clone());
        Ok(())
    }
}

/// Everything a run produced, for the transcript and the exit code
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub exit_code: u8,
    pub error: Option<String>,
    pub lines_read: usize,
    pub blocks_processed: usize,
    pub block_errors: usize,
    pub chassis: ChassisInfo,
    pub components: usize,
    pub ram_config: Option<RamConfigStatus>,
    pub failure_events: Vec<FailureEvent>,
    pub lifecycle: BootLifecycle,
    pub results: Vec<QualificationResult>,
    pub unresolved: Vec<String>,
    pub passes: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("unknown")
}

/// Human readable end of run report
pub fn render_transcript(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "BSDM run on {}", summary.source);
    let _ = writeln!(
        out,
        "  lines: {}  blocks: {}  block errors: {}  passes: {}",
        summary.lines_read, summary.blocks_processed, summary.block_errors, summary.passes
    );

    let chassis = &summary.chassis;
    let _ = writeln!(
        out,
        "  system: {} {} (S/N {}), baseboard {} {}",
        or_unknown(&chassis.system_vendor),
        or_unknown(&chassis.system_model),
        or_unknown(&chassis.system_serial),
        or_unknown(&chassis.baseboard_vendor),
        or_unknown(&chassis.baseboard_model)
    );

    let lifecycle = &summary.lifecycle;
    if lifecycle.power_on_count > 0 {
        let _ = writeln!(out, "  power-ons: {} (restarts: {})", lifecycle.power_on_count, lifecycle.restarts());
    }
    if let Some(cp) = &lifecycle.last_checkpoint {
        let _ = writeln!(out, "  last checkpoint: socket {} {} {} {}", cp.socket, cp.major, cp.minor, cp.code);
    }

    let _ = writeln!(out, "  components: {}", summary.components);
    match &summary.ram_config {
        Some(status) => {
            let check = |c: Option<bool>| match c {
                Some(true) => "PASS",
                Some(false) => "FAIL",
                None => "skipped",
            };
            let _ = writeln!(
                out,
                "  RAM config: homogeneity {} population {} frequency {}",
                check(status.homogeneity),
                check(status.population),
                check(status.ddr_frequency)
            );
            if !status.is_pass() {
                let _ = writeln!(out, "    {status}");
            }
        }
        None => {
            let _ = writeln!(out, "  RAM config: not validated");
        }
    }

    if !summary.failure_events.is_empty() {
        let _ = writeln!(out, "  failure events:");
        for event in &summary.failure_events {
            let severity = match event.severity {
                Severity::Warning => "warning",
                Severity::Critical => "critical",
            };
            let _ = writeln!(out, "    [{severity}] {} {}: {}", event.block, event.slot_label, event.message);
        }
    }

    for result in &summary.results {
        let _ = write!(out, "  {}: {}", result.test, result.status);
        match &result.failure_reason {
            Some(reason) => {
                let _ = writeln!(out, " ({reason})");
            }
            None => {
                let _ = writeln!(out);
            }
        }
    }

    if !summary.unresolved.is_empty() {
        let _ = writeln!(out, "  unresolved goals: {}", summary.unresolved.join(", "));
    }
    if let Some(error) = &summary.error {
        let _ = writeln!(out, "  error: {error}");
    }
    let _ = writeln!(out, "  exit code: {}", summary.exit_code);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn result() -> QualificationResult {
        let started = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        QualificationResult {
            test: "signal_integrity".into(),
            status: Verdict::Fail,
            failure_reason: Some("margins below guideline: RxDqs- 6 < 8".into()),
            started_at: started,
            finished_at: started,
            environment: ChassisInfo::default(),
            components: Vec::new(),
            ram_config: None,
            tags: vec!["lab".into()],
            data: json!({ "worst_case": [] }),
            failure_events: Vec::new(),
            lifecycle: BootLifecycle::default(),
        }
    }

    #[test]
    fn test_file_name_without_components() {
        assert_eq!(result().file_name(), "unknown_signal_integrity_20250304T050607Z.json");
    }

    #[test]
    fn test_writer_sink_emits_json() {
        let mut sink = WriterSink::new("buffer", Vec::new());
        sink.submit(&result()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&sink.into_inner()).unwrap();
        assert_eq!(value["status"], "fail");
        assert_eq!(value["test"], "signal_integrity");
    }

    #[test]
    fn test_directory_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path().join("out"));
        assert_eq!(sink.dir(), dir.path().join("out"));
        sink.submit(&result()).unwrap();
        assert_eq!(sink.written().len(), 1);
        let body = std::fs::read_to_string(&sink.written()[0]).unwrap();
        let back: QualificationResult = serde_json::from_str(&body).unwrap();
        assert_eq!(back, result());
    }

    #[test]
    fn test_transcript_mentions_verdicts() {
        let summary = RunSummary {
            source: "console.log".into(),
            exit_code: 121,
            results: vec![result()],
            unresolved: vec!["step.send_results".into()],
            ..Default::default()
        };
        let text = render_transcript(&summary);
        assert!(text.contains("signal_integrity: FAIL (margins below guideline: RxDqs- 6 < 8)"));
        assert!(text.contains("RAM config: not validated"));
        assert!(text.contains("unresolved goals: step.send_results"));
        assert!(text.contains("exit code: 121"));
    }
}
