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

//! System and baseboard identity from the FRU string updates

use super::AnalyzerContext;
use crate::error::ProcessingError;
use crate::segmenter::ClosedBlock;
use regex::Regex;
use tracing::{debug, info};

fn capture(regex: &Regex, line: &str) -> Option<String> {
    let value = regex.captures(line)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn process_chassis_info(block: &ClosedBlock, ctx: &mut AnalyzerContext<'_>) -> Result<bool, ProcessingError> {
    let fields = ctx.fields;
    let chassis = &mut ctx.model.chassis;
    for line in &block.lines {
        let targets = [
            (&fields.system_vendor, &mut chassis.system_vendor),
            (&fields.system_model, &mut chassis.system_model),
            (&fields.system_serial, &mut chassis.system_serial),
            (&fields.baseboard_vendor, &mut chassis.baseboard_vendor),
            (&fields.baseboard_model, &mut chassis.baseboard_model),
        ];
        for (regex, slot) in targets {
            if let Some(value) = capture(regex, line) {
                debug!(value = %value, "chassis field");
                *slot = Some(value);
            }
        }
    }

    if chassis.is_complete() {
        info!(
            serial = chassis.system_serial.as_deref().unwrap_or_default(),
            baseboard = chassis.baseboard_model.as_deref().unwrap_or_default(),
            "chassis identified"
        );
        Ok(true)
    } else {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::grammar::Grammar;
    use crate::model::MemorySubsystemModel;

    fn block(lines: &[&str]) -> ClosedBlock {
        ClosedBlock {
            name: "InitFruStrings".into(),
            socket_id: None,
            lines: lines.iter().map(|l| l.to_string()).collect(),
            forced: false,
            truncated: false,
        }
    }

    #[test]
    fn test_chassis_fields() {
        let grammar = Grammar::builtin().unwrap();
        let node = NodeConfig::default();
        let mut model = MemorySubsystemModel::new();
        let mut ctx = AnalyzerContext {
            model: &mut model,
            fields: &grammar.fields,
            node: &node,
        };

        let done = process_chassis_info(
            &block(&[
                "SystemManufacturer: UpdateStr: Quanta",
                " SystemProductName: UpdateStr: D52B-1U",
                "SystemSerialNumber: UpdateStr: 12345678",
            ]),
            &mut ctx,
        )
        .unwrap();
        assert!(!done);

        let done = process_chassis_info(&block(&["BaseBoardProductName: UpdateStr: S5B"]), &mut ctx).unwrap();
        assert!(done);
        assert_eq!(model.chassis.system_vendor.as_deref(), Some("Quanta"));
        assert_eq!(model.chassis.system_model.as_deref(), Some("D52B-1U"));
        assert_eq!(model.chassis.baseboard_model.as_deref(), Some("S5B"));
    }
}
