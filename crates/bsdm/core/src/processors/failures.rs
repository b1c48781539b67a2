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

//! Rank failure analyzers: training, MemTest and SMM corrected errors

use super::AnalyzerContext;
use crate::error::ProcessingError;
use crate::model::{FailureEvent, Severity, SlotAddress};
use crate::segmenter::ClosedBlock;
use regex::Captures;
use std::collections::BTreeMap;
use tracing::{info, warn};

fn number(caps: &Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}

/// Slot and rank from the first four capture groups
fn rank_location(caps: &Captures<'_>) -> Option<(SlotAddress, u32)> {
    Some((SlotAddress::new(number(caps, 1)?, number(caps, 2)?, number(caps, 3)?), number(caps, 4)?))
}

fn event(ctx: &AnalyzerContext<'_>, block: &ClosedBlock, severity: Severity, slot: SlotAddress, rank: u32, message: &str) -> FailureEvent {
    FailureEvent {
        severity,
        block: block.name.clone(),
        slot,
        slot_label: ctx.node.slot_label(slot.socket, slot.channel, slot.dimm),
        rank: Some(rank),
        message: message.to_string(),
        details: BTreeMap::new(),
    }
}

pub fn process_training(block: &ClosedBlock, ctx: &mut AnalyzerContext<'_>) -> Result<bool, ProcessingError> {
    for line in &block.lines {
        let Some(caps) = ctx.fields.training_failure.captures(line) else {
            continue;
        };
        let Some((slot, rank)) = rank_location(&caps) else {
            warn!(block = %block.name, line = %line, "unparseable training failure");
            continue;
        };
        let mut failure = event(ctx, block, Severity::Critical, slot, rank, "Failed RdDqDqs");
        if let Some(strobe) = caps.get(5) {
            failure.details.insert("strobe".to_string(), strobe.as_str().to_string());
        }
        warn!(slot = %failure.slot_label, rank, "training failure");
        ctx.model.record_failure(failure);
    }
    Ok(true)
}

pub fn process_memtest(block: &ClosedBlock, ctx: &mut AnalyzerContext<'_>) -> Result<bool, ProcessingError> {
    info!("processing MemTest results");
    let mut current: Option<FailureEvent> = None;
    let mut in_warning = false;

    for line in &block.lines {
        if let Some(caps) = ctx.fields.memtest_failure.captures(line) {
            if let Some(done) = current.take() {
                ctx.model.record_failure(done);
            }
            in_warning = false;
            match rank_location(&caps) {
                Some((slot, rank)) => {
                    warn!(slot = %slot, rank, "MemTest failure");
                    current = Some(event(ctx, block, Severity::Warning, slot, rank, "MemTest Failure"));
                }
                None => warn!(block = %block.name, line = %line, "unparseable MemTest failure"),
            }
            continue;
        }

        if let Some(caps) = ctx.fields.enhanced_warning.captures(line) {
            if let Some(failure) = current.as_mut() {
                let kind = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                failure.details.insert("warning_type".to_string(), kind.to_string());
                in_warning = true;
            }
            continue;
        }

        if line.trim().is_empty() {
            in_warning = false;
            continue;
        }
        if in_warning {
            if let Some(failure) = current.as_mut() {
                failure.details.extend(parse_key_values(line));
            }
        }
    }

    if let Some(done) = current.take() {
        ctx.model.record_failure(done);
    }
    Ok(true)
}

pub fn process_smm(block: &ClosedBlock, ctx: &mut AnalyzerContext<'_>) -> Result<bool, ProcessingError> {
    for line in &block.lines {
        let Some(caps) = ctx.fields.smm_error.captures(line) else {
            continue;
        };
        match rank_location(&caps) {
            Some((slot, rank)) => {
                warn!(slot = %slot, rank, "corrected memory error");
                let failure = event(ctx, block, Severity::Critical, slot, rank, "Corrected Memory Error");
                ctx.model.record_failure(failure);
            }
            None => warn!(block = %block.name, line = %line, "unparseable corrected error location"),
        }
    }
    Ok(true)
}

/// `Socket = 0, Channel = 1, Rank: 2` style pairs, keys snake cased
pub fn parse_key_values(line: &str) -> Vec<(String, String)> {
    line.split(", ")
        .filter_map(|piece| {
            let piece = piece.trim_matches(|c: char| c == ' ' || c == ',');
            let (key, value) = piece.split_once("= ").or_else(|| piece.split_once(": ")).or_else(|| piece.rsplit_once(' '))?;
            let key = key.trim().trim_end_matches(['=', ':']).trim().to_lowercase().replace(' ', "_");
            (!key.is_empty()).then(|| (key, value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::grammar::Grammar;
    use crate::model::MemorySubsystemModel;

    fn block(name: &str, lines: &[&str]) -> ClosedBlock {
        ClosedBlock {
            name: name.into(),
            socket_id: None,
            lines: lines.iter().map(|l| l.to_string()).collect(),
            forced: false,
            truncated: false,
        }
    }

    fn run(f: fn(&ClosedBlock, &mut AnalyzerContext<'_>) -> Result<bool, ProcessingError>, b: &ClosedBlock) -> MemorySubsystemModel {
        let grammar = Grammar::builtin().unwrap();
        let mut node = NodeConfig::default();
        node.slot_labels.insert("1.2.0".into(), "CPU1_C0".into());
        let mut model = MemorySubsystemModel::new();
        let mut ctx = AnalyzerContext {
            model: &mut model,
            fields: &grammar.fields,
            node: &node,
        };
        assert!(f(b, &mut ctx).unwrap());
        model
    }

    #[test]
    fn test_training_failure() {
        let model = run(process_training, &block("Rx Dq/Dqs Basic", &["noise", "N1.C2.D0.R1.S05: Failed RdDqDqs"]));
        assert_eq!(model.failure_events.len(), 1);
        let event = &model.failure_events[0];
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.slot_label, "CPU1_C0");
        assert_eq!(event.rank, Some(1));
        assert_eq!(event.details["strobe"], "05");
    }

    #[test]
    fn test_memtest_with_enhanced_warning() {
        let model = run(
            process_memtest,
            &block(
                "MemTest",
                &[
                    "N0.C1.D0.R0: MemTest Failure!",
                    "Enhanced warning of type 2 logged:",
                    "  Socket = 0, Channel = 1, Dimm = 0",
                    "  Error Count: 12",
                    "",
                    "N0.C3.D1.R1: MemTest Failure!",
                ],
            ),
        );
        assert_eq!(model.failure_events.len(), 2);
        let first = &model.failure_events[0];
        assert_eq!(first.severity, Severity::Warning);
        assert_eq!(first.details["warning_type"], "2");
        assert_eq!(first.details["channel"], "1");
        assert_eq!(first.details["error_count"], "12");
        assert!(model.failure_events[1].details.is_empty());
        assert_eq!(model.failure_events[1].slot_label, "N0.C3.D1");
    }

    #[test]
    fn test_smm_corrected_error() {
        let model = run(process_smm, &block("Corrected Memory Error", &["Last Err Info Node=1 ddrch=2 dimm=0 rank=1"]));
        assert_eq!(model.failure_events[0].slot, SlotAddress::new(1, 2, 0));
        assert_eq!(model.failure_events[0].severity, Severity::Critical);
    }

    #[test]
    fn test_parse_key_values() {
        let pairs = parse_key_values("Socket = 0, Dimm Rank: 3, Retry 4");
        assert_eq!(
            pairs,
            vec![
                ("socket".to_string(), "0".to_string()),
                ("dimm_rank".to_string(), "3".to_string()),
                ("retry".to_string(), "4".to_string())
            ]
        );
    }
}
