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

//! Repair qualification (STEP / Post-Package Repair)
//!
//! The test BIOS prints one summary line per DIMM and one line per failed
//! cell. The verdict is categorical: every tested DIMM must report `Pass`.

use super::{EngineContext, QualificationEngine, Verdict};
use crate::config::NodeConfig;
use crate::error::{EXIT_STEP_FAILED, ProcessingError};
use crate::processors::ProcessorKind;
use crate::scheduler::EngineKind;
use crate::segmenter::ClosedBlock;
use regex::Captures;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Block carrying the repair test output
pub const STEP_BLOCK: &str = "@SEC Run CPGC Test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pass,
    Fail,
    Empty,
}

impl StepStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "Pass" => Some(StepStatus::Pass),
            "Fail" => Some(StepStatus::Fail),
            "Empty" => Some(StepStatus::Empty),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pass => "Pass",
            StepStatus::Fail => "Fail",
            StepStatus::Empty => "Empty",
        };
        f.write_str(s)
    }
}

/// `PPR:<status>(<result>)` suffix of a failed cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub status: String,
    pub result: Option<String>,
}

impl RepairOutcome {
    pub fn is_repaired(&self) -> bool {
        self.status.eq_ignore_ascii_case("done") && self.result.as_deref().is_none_or(|r| r == "PASS")
    }
}

/// Bit-level coordinates of one failing cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCell {
    pub slot: String,
    pub pattern_mask: String,
    pub socket: u32,
    pub channel: u32,
    pub dimm: u32,
    pub rank: u32,
    pub cid: u32,
    pub bank_group: u32,
    pub bank: u32,
    pub row: String,
    pub column: String,
    pub dq: u32,
    pub repair: Option<RepairOutcome>,
}

/// Per-DIMM summary line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub serial: String,
    pub production_week: String,
    pub test_status: StepStatus,
    pub ppr_status: Option<String>,
}

/// Outcome of a DIMM once its failed cells are taken into account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimmClassification {
    Healthy,
    Repaired,
    Unrepaired,
    NotTested,
}

pub fn classify(record: &StepRecord, cells: &[&FailedCell]) -> DimmClassification {
    match record.test_status {
        StepStatus::Empty => DimmClassification::NotTested,
        StepStatus::Fail => DimmClassification::Unrepaired,
        StepStatus::Pass if cells.is_empty() => DimmClassification::Healthy,
        StepStatus::Pass if cells.iter().all(|c| c.repair.as_ref().is_some_and(RepairOutcome::is_repaired)) => DimmClassification::Repaired,
        StepStatus::Pass => DimmClassification::Unrepaired,
    }
}

#[derive(Default)]
pub struct StepEngine {
    test_mode: Option<String>,
    records: BTreeMap<String, StepRecord>,
    failed_cells: Vec<FailedCell>,
    classification: BTreeMap<String, DimmClassification>,
    verdict: Option<Verdict>,
}

impl StepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn test_mode(&self) -> Option<&str> {
        self.test_mode.as_deref()
    }

    pub fn records(&self) -> &BTreeMap<String, StepRecord> {
        &self.records
    }

    pub fn failed_cells(&self) -> &[FailedCell] {
        &self.failed_cells
    }

    pub fn classification(&self) -> &BTreeMap<String, DimmClassification> {
        &self.classification
    }

    fn failing_dimms(&self) -> Vec<&String> {
        self.records
            .iter()
            .filter(|(_, r)| r.test_status == StepStatus::Fail)
            .map(|(label, _)| label)
            .collect()
    }
}

fn number(caps: &Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i).and_then(|m| m.as_str().parse().ok())
}

fn text(caps: &Captures<'_>, i: usize) -> Option<String> {
    caps.get(i).map(|m| m.as_str().trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_failed_cell(caps: &Captures<'_>, node: &NodeConfig) -> Option<FailedCell> {
    let (socket, channel, dimm) = (number(caps, 2)?, number(caps, 3)?, number(caps, 4)?);
    Some(FailedCell {
        slot: node.slot_label(socket, channel, dimm),
        pattern_mask: text(caps, 1)?,
        socket,
        channel,
        dimm,
        rank: number(caps, 5)?,
        cid: number(caps, 6)?,
        bank_group: number(caps, 7)?,
        bank: number(caps, 8)?,
        row: text(caps, 9)?,
        column: text(caps, 10)?,
        dq: number(caps, 11)?,
        repair: text(caps, 12).map(|status| RepairOutcome {
            status,
            result: text(caps, 13),
        }),
    })
}

impl QualificationEngine for StepEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Step
    }

    fn test_name(&self) -> &'static str {
        "repair_qualification"
    }

    fn processor(&self) -> ProcessorKind {
        ProcessorKind::StepResults
    }

    fn processing_rules(&self, _node: &NodeConfig) -> Vec<(String, ProcessorKind)> {
        vec![(STEP_BLOCK.to_string(), ProcessorKind::StepResults)]
    }

    fn process_block(&mut self, block: &ClosedBlock, ctx: &EngineContext<'_>) -> Result<bool, ProcessingError> {
        info!(block = %block.name, "processing STEP results");
        let fields = ctx.fields;
        for line in &block.lines {
            if let Some(caps) = fields.step_failed_cell.captures(line) {
                match parse_failed_cell(&caps, ctx.node) {
                    Some(cell) => {
                        debug!(slot = %cell.slot, rank = cell.rank, row = %cell.row, column = %cell.column, "failed cell");
                        self.failed_cells.push(cell);
                    }
                    None => warn!(line = %line, "STEP failed cell line skipped"),
                }
            } else if let Some(caps) = fields.step_dimm_result.captures(line) {
                let slot = number(&caps, 1).zip(number(&caps, 2)).zip(number(&caps, 3));
                let status = caps.get(6).and_then(|m| StepStatus::parse(m.as_str()));
                let (Some(((s, c), d)), Some(test_status)) = (slot, status) else {
                    warn!(line = %line, "STEP summary line skipped");
                    continue;
                };
                let label = ctx.node.slot_label(s, c, d);
                info!(slot = %label, status = %test_status, "STEP result");
                self.records.insert(
                    label,
                    StepRecord {
                        serial: text(&caps, 5).unwrap_or_default(),
                        production_week: text(&caps, 4).unwrap_or_default(),
                        test_status,
                        ppr_status: text(&caps, 7),
                    },
                );
            } else if let Some(caps) = fields.step_test_mode.captures(line) {
                self.test_mode = text(&caps, 1);
            }
        }
        Ok(!self.records.is_empty())
    }

    fn result_completeness(&mut self, ctx: &EngineContext<'_>) -> bool {
        let labels = ctx.component_labels();
        if labels.is_empty() || self.records.is_empty() {
            return false;
        }
        let missing: Vec<&String> = labels.iter().filter(|l| !self.records.contains_key(*l)).collect();
        if !missing.is_empty() {
            info!(missing = ?missing, "STEP results incomplete");
        }
        missing.is_empty()
    }

    fn reduce(&mut self, _ctx: &EngineContext<'_>) -> bool {
        self.classification = self
            .records
            .iter()
            .map(|(label, record)| {
                let cells: Vec<&FailedCell> = self.failed_cells.iter().filter(|c| &c.slot == label).collect();
                (label.clone(), classify(record, &cells))
            })
            .collect();
        !self.classification.is_empty()
    }

    /// Verdict over the summary lines only. A `Pass` DIMM whose failed cells
    /// were not all repaired still passes and is reported as `unrepaired` in
    /// the classification. `Empty` DIMMs are ignored, so a run where nothing
    /// was tested passes.
    fn qualify(&mut self, _ctx: &EngineContext<'_>) -> bool {
        let failing = self.failing_dimms();
        if failing.is_empty() {
            info!(dimms = self.records.len(), "STEP qualification passed");
            self.verdict = Some(Verdict::Pass);
        } else {
            error!(dimms = ?failing, "STEP repair test failed");
            self.verdict = Some(Verdict::Fail);
        }
        true
    }

    fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    fn failure_reason(&self) -> Option<String> {
        if self.verdict != Some(Verdict::Fail) {
            return None;
        }
        let dimms: Vec<&str> = self.failing_dimms().into_iter().map(String::as_str).collect();
        Some(format!("repair test failed on {}", dimms.join(", ")))
    }

    fn result_data(&self) -> serde_json::Value {
        json!({
            "test_mode": self.test_mode,
            "records": self.records,
            "classification": self.classification,
            "failed_cells": self.failed_cells,
        })
    }

    fn fail_exit_code(&self) -> u8 {
        EXIT_STEP_FAILED
    }
}
