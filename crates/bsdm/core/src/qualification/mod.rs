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

//! Qualification engines
//!
//! Engines contribute their own goals to the testplan and their own block
//! processing rules. The scheduler drives them through the same four stages:
//! result completeness, reduction, qualification and result submission.

pub mod rmt;
pub mod step;

use crate::config::{BsdmConfig, NodeConfig};
use crate::error::ProcessingError;
use crate::grammar::FieldPatterns;
use crate::model::MemorySubsystemModel;
use crate::processors::ProcessorKind;
use crate::scheduler::{EngineKind, EngineStage, GoalId, Testplan};
use crate::segmenter::ClosedBlock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use rmt::{RMT_PARAMETERS, RmtEngine, WorstMargin, reduce_worst_case};
pub use step::{StepEngine, StepStatus};

/// Final categorical outcome of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail => f.write_str("FAIL"),
        }
    }
}

/// Read-only view engines work against
pub struct EngineContext<'a> {
    pub model: &'a MemorySubsystemModel,
    pub node: &'a NodeConfig,
    pub fields: &'a FieldPatterns,
}

impl EngineContext<'_> {
    /// Slot labels of every inventory component
    pub fn component_labels(&self) -> BTreeSet<String> {
        self.model.components.iter().map(|c| c.slot.clone()).collect()
    }
}

pub trait QualificationEngine: Send {
    fn kind(&self) -> EngineKind;

    /// Name of the test in the result record
    fn test_name(&self) -> &'static str;

    /// Processor kind of the blocks this engine consumes
    fn processor(&self) -> ProcessorKind;

    /// Block names routed to this engine
    fn processing_rules(&self, node: &NodeConfig) -> Vec<(String, ProcessorKind)>;

    /// Goals contributed to the testplan
    fn testplan(&self) -> Testplan {
        standard_testplan(self.kind(), self.processor(), false)
    }

    /// Consume one closed block, `Ok(true)` once results are available
    fn process_block(&mut self, block: &ClosedBlock, ctx: &EngineContext<'_>) -> Result<bool, ProcessingError>;

    fn result_completeness(&mut self, ctx: &EngineContext<'_>) -> bool;

    fn reduce(&mut self, ctx: &EngineContext<'_>) -> bool;

    /// Decide the verdict, `true` once one was reached
    fn qualify(&mut self, ctx: &EngineContext<'_>) -> bool;

    fn verdict(&self) -> Option<Verdict>;

    fn failure_reason(&self) -> Option<String>;

    /// Test specific part of the result record
    fn result_data(&self) -> serde_json::Value;

    /// Exit code when the verdict is FAIL
    fn fail_exit_code(&self) -> u8;

    fn run_stage(&mut self, stage: EngineStage, ctx: &EngineContext<'_>) -> bool {
        match stage {
            EngineStage::ResultCompleteness => self.result_completeness(ctx),
            EngineStage::Reduce => self.reduce(ctx),
            EngineStage::Qualification => self.qualify(ctx),
            // Submission is owned by the pipeline
            EngineStage::SendResults => self.verdict().is_some(),
        }
    }
}

/// `process -> completeness -> reduce -> qualification -> send_results`
pub fn standard_testplan(kind: EngineKind, processor: ProcessorKind, qualification_needs_validator: bool) -> Testplan {
    let goal = |stage| GoalId::engine(kind, stage);
    let mut plan = Testplan::new();
    plan.insert(GoalId::Process(processor), BTreeSet::from([GoalId::ConsoleData]));
    plan.insert(
        goal(EngineStage::ResultCompleteness),
        BTreeSet::from([GoalId::Process(processor), GoalId::RamConfValidator]),
    );
    plan.insert(goal(EngineStage::Reduce), BTreeSet::from([goal(EngineStage::ResultCompleteness)]));
    let mut qualification = BTreeSet::from([goal(EngineStage::Reduce)]);
    if qualification_needs_validator {
        qualification.insert(GoalId::RamConfValidator);
    }
    plan.insert(goal(EngineStage::Qualification), qualification);
    plan.insert(goal(EngineStage::SendResults), BTreeSet::from([goal(EngineStage::Qualification)]));
    plan
}

/// Engines enabled by the mission section
pub fn engines_from_config(config: &BsdmConfig) -> Vec<Box<dyn QualificationEngine>> {
    let mut engines: Vec<Box<dyn QualificationEngine>> = Vec::new();
    if config.mission.rmt {
        engines.push(Box::new(RmtEngine::new(config.rmt.guidelines.clone())));
    }
    if config.mission.step {
        engines.push(Box::new(StepEngine::new()));
    }
    engines
}
