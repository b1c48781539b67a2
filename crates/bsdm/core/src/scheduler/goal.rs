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

//! Goal identifiers of the testplan

use crate::processors::ProcessorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualification engine families
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Rmt,
    Step,
}

impl EngineKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            EngineKind::Rmt => "rmt",
            EngineKind::Step => "step",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Stages every engine contributes, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineStage {
    ResultCompleteness,
    /// Worst case reduction for RMT, classification for STEP
    Reduce,
    Qualification,
    SendResults,
}

/// Node of the goal graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GoalId {
    /// Leaf standing for "console data arrived", never succeeds by execution
    ConsoleData,
    /// Satisfied when a block of this kind has been processed
    Process(ProcessorKind),
    RamConfValidator,
    Engine(EngineKind, EngineStage),
}

impl GoalId {
    pub fn engine(kind: EngineKind, stage: EngineStage) -> Self {
        GoalId::Engine(kind, stage)
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalId::ConsoleData => f.write_str("console_data"),
            GoalId::Process(kind) => f.write_str(kind.goal_name()),
            GoalId::RamConfValidator => f.write_str("ram_conf_validator"),
            GoalId::Engine(kind, stage) => {
                let stage = match (kind, stage) {
                    (_, EngineStage::ResultCompleteness) => "result_completeness",
                    (EngineKind::Rmt, EngineStage::Reduce) => "worst_case",
                    (EngineKind::Step, EngineStage::Reduce) => "classification",
                    (_, EngineStage::Qualification) => "qualification",
                    (_, EngineStage::SendResults) => "send_results",
                };
                write!(f, "{kind}.{stage}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_names() {
        assert_eq!(GoalId::ConsoleData.to_string(), "console_data");
        assert_eq!(GoalId::Process(ProcessorKind::DimmTable).to_string(), "process_dimm_info");
        assert_eq!(GoalId::RamConfValidator.to_string(), "ram_conf_validator");
        assert_eq!(GoalId::engine(EngineKind::Rmt, EngineStage::Reduce).to_string(), "rmt.worst_case");
        assert_eq!(GoalId::engine(EngineKind::Step, EngineStage::Reduce).to_string(), "step.classification");
        assert_eq!(GoalId::engine(EngineKind::Step, EngineStage::SendResults).to_string(), "step.send_results");
    }
}
