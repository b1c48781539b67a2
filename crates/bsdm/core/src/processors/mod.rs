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

//! Block processor registry and built-in analyzers
//!
//! The registry maps a block name to a [`ProcessorKind`]. Built-in kinds are
//! analyzed here against the shared model; engine kinds are forwarded by the
//! pipeline to the owning qualification engine.

pub mod chassis;
pub mod failures;
pub mod tables;

use crate::config::{NodeConfig, ProcessorsConfig};
use crate::error::ProcessingError;
use crate::grammar::FieldPatterns;
use crate::model::MemorySubsystemModel;
use crate::segmenter::ClosedBlock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Analyzer selected for a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    ChassisInfo,
    SocketTable,
    DimmTable,
    TrainingFailures,
    MemTest,
    SmmCorrectedError,
    RmtResults,
    StepResults,
}

impl ProcessorKind {
    /// Goal satisfied by a successful run of this processor
    pub fn goal_name(&self) -> &'static str {
        match self {
            ProcessorKind::ChassisInfo => "process_chassis_info",
            ProcessorKind::SocketTable => "process_socket_info",
            ProcessorKind::DimmTable => "process_dimm_info",
            ProcessorKind::TrainingFailures => "process_training_info",
            ProcessorKind::MemTest => "process_mbist",
            ProcessorKind::SmmCorrectedError => "process_smm_ce_handler",
            ProcessorKind::RmtResults => "process_rmt_results",
            ProcessorKind::StepResults => "process_step_results",
        }
    }

    /// Processed by a qualification engine rather than a built-in analyzer
    pub fn is_engine(&self) -> bool {
        matches!(self, ProcessorKind::RmtResults | ProcessorKind::StepResults)
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.goal_name())
    }
}

/// State an analyzer may read and update
pub struct AnalyzerContext<'a> {
    pub model: &'a mut MemorySubsystemModel,
    pub fields: &'a FieldPatterns,
    pub node: &'a NodeConfig,
}

/// Run a built-in analyzer
///
/// `Ok(true)` means the block completed the processor's goal, `Ok(false)` that
/// it was consumed but more data is needed.
pub fn analyze(kind: ProcessorKind, block: &ClosedBlock, ctx: &mut AnalyzerContext<'_>) -> Result<bool, ProcessingError> {
    match kind {
        ProcessorKind::ChassisInfo => chassis::process_chassis_info(block, ctx),
        ProcessorKind::SocketTable => tables::process_socket_table(block, ctx),
        ProcessorKind::DimmTable => tables::process_dimm_table(block, ctx),
        ProcessorKind::TrainingFailures => failures::process_training(block, ctx),
        ProcessorKind::MemTest => failures::process_memtest(block, ctx),
        ProcessorKind::SmmCorrectedError => failures::process_smm(block, ctx),
        ProcessorKind::RmtResults | ProcessorKind::StepResults => Err(ProcessingError::Unhandled { block: block.name.clone() }),
    }
}

/// Block name to processor table, built once per run
#[derive(Debug, Clone, Default)]
pub struct ProcessorRegistry {
    rules: BTreeMap<String, ProcessorKind>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in rules with one socket table per configured socket
    pub fn with_defaults(node: &NodeConfig) -> Self {
        let mut registry = Self::new();
        registry.register("InitFruStrings", ProcessorKind::ChassisInfo);
        registry.register("DIMMINFO_TABLE", ProcessorKind::DimmTable);
        registry.register("Rx Dq/Dqs Basic", ProcessorKind::TrainingFailures);
        registry.register("MemTest", ProcessorKind::MemTest);
        registry.register("Corrected Memory Error", ProcessorKind::SmmCorrectedError);
        for socket in 0..node.sockets_count {
            registry.register(format!("SOCKET_{socket}_TABLE"), ProcessorKind::SocketTable);
        }
        registry
    }

    pub fn register(&mut self, block: impl Into<String>, kind: ProcessorKind) {
        let block = block.into();
        debug!(block = %block, processor = %kind, "processing rule registered");
        self.rules.insert(block, kind);
    }

    pub fn register_all(&mut self, rules: impl IntoIterator<Item = (String, ProcessorKind)>) {
        for (block, kind) in rules {
            self.register(block, kind);
        }
    }

    /// Apply configured rules over the current table
    pub fn merge_config(&mut self, config: &ProcessorsConfig) {
        self.register_all(config.rules.iter().map(|(k, v)| (k.clone(), *v)));
    }

    pub fn get(&self, block: &str) -> Option<ProcessorKind> {
        self.rules.get(block).copied()
    }

    pub fn contains(&self, block: &str) -> bool {
        self.rules.contains_key(block)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let registry = ProcessorRegistry::with_defaults(&NodeConfig::default());
        assert_eq!(registry.get("SOCKET_0_TABLE"), Some(ProcessorKind::SocketTable));
        assert_eq!(registry.get("SOCKET_1_TABLE"), Some(ProcessorKind::SocketTable));
        assert_eq!(registry.get("SOCKET_2_TABLE"), None);
        assert_eq!(registry.get("InitFruStrings"), Some(ProcessorKind::ChassisInfo));
        assert!(!registry.contains("BSSA_RMT"));
    }

    #[test]
    fn test_config_overrides() {
        let mut registry = ProcessorRegistry::with_defaults(&NodeConfig::default());
        let mut config = ProcessorsConfig::default();
        config.rules.insert("MemTest".into(), ProcessorKind::TrainingFailures);
        config.rules.insert("MRC_DIMM_INFO".into(), ProcessorKind::DimmTable);
        registry.merge_config(&config);
        assert_eq!(registry.get("MemTest"), Some(ProcessorKind::TrainingFailures));
        assert_eq!(registry.get("MRC_DIMM_INFO"), Some(ProcessorKind::DimmTable));
    }

    #[test]
    fn test_goal_names() {
        assert_eq!(ProcessorKind::SocketTable.goal_name(), "process_socket_info");
        assert_eq!(ProcessorKind::RmtResults.to_string(), "process_rmt_results");
        assert!(ProcessorKind::StepResults.is_engine());
        assert!(!ProcessorKind::DimmTable.is_engine());
    }
}
