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

//! Rank Margin Tool (signal integrity) qualification
//!
//! Each rank line carries 14 signed margins. The worst case of a parameter is
//! the smallest magnitude over every DIMM and rank, with all DIMMs attaining
//! it kept. A parameter whose worst case is below its guideline magnitude
//! fails the run.

use super::{EngineContext, QualificationEngine, Verdict, standard_testplan};
use crate::config::{GuidelineConfig, NodeConfig};
use crate::error::{EXIT_RMT_MARGIN, ProcessingError};
use crate::processors::ProcessorKind;
use crate::scheduler::{EngineKind, Testplan};
use crate::segmenter::ClosedBlock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Margin parameters in console column order
pub const RMT_PARAMETERS: [&str; 14] = [
    "RxDqs-", "RxDqs+", "RxV-", "RxV+", "TxDq-", "TxDq+", "TxV-", "TxV+", "Cmd-", "Cmd+", "CmdV-", "CmdV+", "Ctl-", "Ctl+",
];

const RANK_LINE_TOKENS: usize = RMT_PARAMETERS.len() + 1;

pub type RankMargins = [i32; 14];

/// DIMM label to rank to margins
pub type RmtResults = BTreeMap<String, BTreeMap<u32, RankMargins>>;

/// Worst case of one parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorstMargin {
    pub parameter: String,
    /// Signed value of the first entry attaining the minimum magnitude
    pub value: i32,
    pub magnitude: u32,
    pub dimms: BTreeSet<String>,
}

/// Smallest slack between a worst case and its guideline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginSlack {
    pub parameter: String,
    pub worst_case: i32,
    pub guideline: i32,
    pub slack: i64,
}

/// Per-parameter minimum magnitude with its tie set
pub fn reduce_worst_case(results: &RmtResults) -> Vec<WorstMargin> {
    let mut worst: Vec<Option<WorstMargin>> = vec![None; RMT_PARAMETERS.len()];
    for (label, ranks) in results {
        for margins in ranks.values() {
            for (index, value) in margins.iter().enumerate() {
                let magnitude = value.unsigned_abs();
                match &mut worst[index] {
                    Some(current) if magnitude > current.magnitude => {}
                    Some(current) if magnitude == current.magnitude => {
                        current.dimms.insert(label.clone());
                    }
                    slot => {
                        *slot = Some(WorstMargin {
                            parameter: RMT_PARAMETERS[index].to_string(),
                            value: *value,
                            magnitude,
                            dimms: BTreeSet::from([label.clone()]),
                        });
                    }
                }
            }
        }
    }
    worst.into_iter().flatten().collect()
}

/// Parameters failing their guideline, and the smallest slack among those checked
pub fn compare_guidelines(worst_case: &[WorstMargin], guidelines: &BTreeMap<String, i32>) -> (Vec<MarginSlack>, Option<MarginSlack>) {
    let mut failing = Vec::new();
    let mut smallest: Option<MarginSlack> = None;
    for worst in worst_case {
        let Some(&guideline) = guidelines.get(&worst.parameter) else {
            continue;
        };
        let slack = MarginSlack {
            parameter: worst.parameter.clone(),
            worst_case: worst.value,
            guideline,
            slack: i64::from(worst.magnitude) - i64::from(guideline.unsigned_abs()),
        };
        if slack.slack < 0 {
            failing.push(slack.clone());
        }
        // Strict comparison keeps the first parameter on ties
        if smallest.as_ref().is_none_or(|s| slack.slack < s.slack) {
            smallest = Some(slack);
        }
    }
    (failing, smallest)
}

pub struct RmtEngine {
    guidelines: GuidelineConfig,
    results: RmtResults,
    worst_case: Vec<WorstMargin>,
    applied_guidelines: BTreeMap<String, i32>,
    failing: Vec<MarginSlack>,
    worst_margin: Option<MarginSlack>,
    verdict: Option<Verdict>,
}

impl RmtEngine {
    pub fn new(guidelines: GuidelineConfig) -> Self {
        Self {
            guidelines,
            results: RmtResults::new(),
            worst_case: Vec::new(),
            applied_guidelines: BTreeMap::new(),
            failing: Vec::new(),
            worst_margin: None,
            verdict: None,
        }
    }

    pub fn results(&self) -> &RmtResults {
        &self.results
    }

    pub fn worst_case(&self) -> &[WorstMargin] {
        &self.worst_case
    }

    pub fn worst_margin(&self) -> Option<&MarginSlack> {
        self.worst_margin.as_ref()
    }

    /// Parse one rank line into slot label, rank and margins
    fn parse_rank_line(&self, line: &str, ctx: &EngineContext<'_>) -> Option<(String, u32, RankMargins)> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let caps = ctx.fields.rmt_rank.captures(tokens.first()?)?;
        if tokens.len() != RANK_LINE_TOKENS {
            warn!(line = %line, tokens = tokens.len(), "RMT rank line with unexpected shape skipped");
            return None;
        }
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let (socket, channel, dimm, rank) = (number(1)?, number(2)?, number(3)?, number(4)?);

        let mut margins = [0i32; 14];
        for (slot, token) in margins.iter_mut().zip(&tokens[1..]) {
            match token.parse() {
                Ok(value) => *slot = value,
                Err(_) => {
                    warn!(line = %line, value = %token, "RMT rank line with invalid margin skipped");
                    return None;
                }
            }
        }
        Some((ctx.node.slot_label(socket, channel, dimm), rank, margins))
    }
}

impl QualificationEngine for RmtEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Rmt
    }

    fn test_name(&self) -> &'static str {
        "signal_integrity"
    }

    fn processor(&self) -> ProcessorKind {
        ProcessorKind::RmtResults
    }

    fn processing_rules(&self, node: &NodeConfig) -> Vec<(String, ProcessorKind)> {
        let mut rules = vec![("BSSA_RMT".to_string(), ProcessorKind::RmtResults)];
        rules.extend((0..node.sockets_count).map(|n| (format!("RMT_N{n}"), ProcessorKind::RmtResults)));
        rules
    }

    fn testplan(&self) -> Testplan {
        standard_testplan(self.kind(), self.processor(), true)
    }

    fn process_block(&mut self, block: &ClosedBlock, ctx: &EngineContext<'_>) -> Result<bool, ProcessingError> {
        info!(block = %block.name, "processing RMT results");
        let mut parsed = 0usize;
        for line in &block.lines {
            if let Some((label, rank, margins)) = self.parse_rank_line(line, ctx) {
                self.results.entry(label).or_default().insert(rank, margins);
                parsed += 1;
            }
        }
        debug!(block = %block.name, parsed, dimms = self.results.len(), "RMT block parsed");
        Ok(!self.results.is_empty())
    }

    fn result_completeness(&mut self, ctx: &EngineContext<'_>) -> bool {
        if self.results.is_empty() {
            return false;
        }
        let missing: Vec<String> = ctx.component_labels().into_iter().filter(|l| !self.results.contains_key(l)).collect();
        if !missing.is_empty() {
            info!(missing = ?missing, "RMT results incomplete");
        }
        missing.is_empty()
    }

    fn reduce(&mut self, _ctx: &EngineContext<'_>) -> bool {
        self.worst_case = reduce_worst_case(&self.results);
        !self.worst_case.is_empty()
    }

    fn qualify(&mut self, ctx: &EngineContext<'_>) -> bool {
        let frequency = ctx.model.ddr_frequency();
        self.applied_guidelines = self.guidelines.for_frequency(frequency);
        let (failing, smallest) = compare_guidelines(&self.worst_case, &self.applied_guidelines);

        if failing.is_empty() {
            self.worst_margin = smallest;
            self.verdict = Some(Verdict::Pass);
            info!(worst_margin = ?self.worst_margin.as_ref().map(|m| &m.parameter), "RMT qualification passed");
        } else {
            for f in &failing {
                error!(parameter = %f.parameter, worst_case = f.worst_case, guideline = f.guideline, "RMT margin below guideline");
            }
            self.verdict = Some(Verdict::Fail);
        }
        self.failing = failing;
        true
    }

    fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    fn failure_reason(&self) -> Option<String> {
        if self.verdict != Some(Verdict::Fail) {
            return None;
        }
        let params: Vec<String> = self
            .failing
            .iter()
            .map(|f| format!("{} {} < {}", f.parameter, f.worst_case.unsigned_abs(), f.guideline.unsigned_abs()))
            .collect();
        Some(format!("margins below guideline: {}", params.join(", ")))
    }

    fn result_data(&self) -> serde_json::Value {
        let results: BTreeMap<&String, BTreeMap<u32, BTreeMap<&str, i32>>> = self
            .results
            .iter()
            .map(|(label, ranks)| {
                let ranks = ranks
                    .iter()
                    .map(|(rank, margins)| (*rank, RMT_PARAMETERS.iter().copied().zip(margins.iter().copied()).collect()))
                    .collect();
                (label, ranks)
            })
            .collect();
        json!({
            "results": results,
            "worst_case": self.worst_case,
            "guidelines": self.applied_guidelines,
            "failing": self.failing,
            "worst_margin": self.worst_margin,
        })
    }

    fn fail_exit_code(&self) -> u8 {
        EXIT_RMT_MARGIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use crate::model::{Component, DimmAttributes, MemorySubsystemModel, SlotAddress};

    fn margins(base: i32) -> RankMargins {
        [base; 14]
    }

    fn rank_line(slot: &str, values: &RankMargins) -> String {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        format!("{slot} {}", values.join(" "))
    }

    #[test]
    fn test_reduce_keeps_tie_set() {
        let mut results = RmtResults::new();
        let mut a = margins(10);
        a[0] = -6;
        let mut b = margins(12);
        b[0] = 6;
        b[1] = 3;
        results.entry("A1".into()).or_default().insert(0, a);
        results.entry("B1".into()).or_default().insert(1, b);

        let worst = reduce_worst_case(&results);
        assert_eq!(worst.len(), 14);
        assert_eq!(worst[0].parameter, "RxDqs-");
        assert_eq!(worst[0].magnitude, 6);
        assert_eq!(worst[0].value, -6);
        assert_eq!(worst[0].dimms, BTreeSet::from(["A1".to_string(), "B1".to_string()]));
        assert_eq!(worst[1].dimms, BTreeSet::from(["B1".to_string()]));
        assert_eq!(reduce_worst_case(&results), worst);
    }

    #[test]
    fn test_guideline_failure() {
        let worst = vec![WorstMargin {
            parameter: "RxDqs-".into(),
            value: -6,
            magnitude: 6,
            dimms: BTreeSet::from(["A1".to_string()]),
        }];
        let guidelines = BTreeMap::from([("RxDqs-".to_string(), 8)]);
        let (failing, _) = compare_guidelines(&worst, &guidelines);
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].slack, -2);
    }

    #[test]
    fn test_smallest_slack_tie_prefers_first_parameter() {
        let mut results = RmtResults::new();
        results.entry("A1".into()).or_default().insert(0, margins(10));
        let worst = reduce_worst_case(&results);
        let guidelines = BTreeMap::from([("TxDq+".to_string(), 7), ("RxV-".to_string(), 7), ("Unknown".to_string(), 1)]);
        let (failing, smallest) = compare_guidelines(&worst, &guidelines);
        assert!(failing.is_empty());
        assert_eq!(smallest.unwrap().parameter, "RxV-");
    }

    #[test]
    fn test_process_block_skips_malformed_lines() {
        let grammar = Grammar::builtin().unwrap();
        let mut node = NodeConfig::default();
        node.slot_labels.insert("0.0.0".into(), "CPU0_A0".into());
        let mut model = MemorySubsystemModel::new();
        let attrs = DimmAttributes {
            vendor: Some("Samsung".into()),
            ..Default::default()
        };
        model.components.push(Component::from_slot(SlotAddress::new(0, 0, 0), &attrs, &node));
        let ctx = EngineContext {
            model: &model,
            node: &node,
            fields: &grammar.fields,
        };

        let mut short = rank_line("N0.C0.D0.R1", &margins(1));
        short.truncate(short.rfind(' ').unwrap());
        let block = ClosedBlock {
            name: "BSSA_RMT".into(),
            socket_id: None,
            lines: vec![
                "RMT results".into(),
                rank_line("N0.C0.D0.R0", &margins(9)),
                short,
                "N0.C0.D0.R2 1 2 3 4 5 6 7 8 9 10 11 12 13 x".into(),
            ],
            forced: false,
            truncated: false,
        };

        let mut engine = RmtEngine::new(GuidelineConfig::default());
        assert!(engine.process_block(&block, &ctx).unwrap());
        assert_eq!(engine.results()["CPU0_A0"].len(), 1);
        assert!(engine.result_completeness(&ctx));
        assert!(engine.reduce(&ctx));
        assert!(engine.worst_case().iter().all(|w| w.magnitude == 9));
    }

    #[test]
    fn test_qualify_uses_frequency_overrides() {
        let grammar = Grammar::builtin().unwrap();
        let node = NodeConfig::default();
        let mut model = MemorySubsystemModel::new();
        model.system.insert("DDR Freq".into(), "DDR4-2933".into());
        let ctx = EngineContext {
            model: &model,
            node: &node,
            fields: &grammar.fields,
        };

        let mut guidelines = GuidelineConfig::default();
        guidelines.common.insert("RxDqs-".into(), 5);
        guidelines.frequencies.insert("2933".into(), BTreeMap::from([("RxDqs-".to_string(), 8)]));

        let mut engine = RmtEngine::new(guidelines);
        engine.results.entry("A1".into()).or_default().insert(0, margins(6));
        engine.reduce(&ctx);
        assert!(engine.qualify(&ctx));
        assert_eq!(engine.verdict(), Some(Verdict::Fail));
        assert!(engine.failure_reason().unwrap().contains("RxDqs- 6 < 8"));
        assert_eq!(engine.fail_exit_code(), EXIT_RMT_MARGIN);
    }
}
