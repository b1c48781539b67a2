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

//! Compiled console grammar
//!
//! All vendor specific patterns live in [`GrammarConfig`]; this module turns
//! them into regexes once at startup so a bad pattern fails the run before any
//! line is read.

use crate::config::GrammarConfig;
use crate::error::{BsdmError, BsdmResult};
use crate::segmenter::markers::{MarkerFamily, sort_by_priority};
use regex::Regex;

/// Patterns watched outside of block nesting
#[derive(Debug, Clone)]
pub struct LifecyclePatterns {
    pub power_on: Regex,
    pub power_off: Regex,
    pub checkpoint: Regex,
}

/// Field patterns used by the analyzers and engines
#[derive(Debug, Clone)]
pub struct FieldPatterns {
    pub system_vendor: Regex,
    pub system_model: Regex,
    pub system_serial: Regex,
    pub baseboard_vendor: Regex,
    pub baseboard_model: Regex,
    pub training_failure: Regex,
    pub memtest_failure: Regex,
    pub enhanced_warning: Regex,
    pub smm_error: Regex,
    pub rmt_rank: Regex,
    pub step_test_mode: Regex,
    pub step_dimm_result: Regex,
    pub step_failed_cell: Regex,
}

#[derive(Debug, Clone)]
pub struct Grammar {
    pub version: String,
    /// Sorted by descending priority
    pub families: Vec<MarkerFamily>,
    pub fatal_error: Regex,
    pub lifecycle: LifecyclePatterns,
    pub fields: FieldPatterns,
}

impl Grammar {
    pub fn compile(config: &GrammarConfig) -> BsdmResult<Self> {
        if config.families.is_empty() {
            return Err(BsdmError::config("grammar defines no marker family"));
        }
        let mut families = config.families.iter().map(MarkerFamily::from_config).collect::<BsdmResult<Vec<_>>>()?;
        sort_by_priority(&mut families);

        Ok(Self {
            version: config.version.clone(),
            families,
            fatal_error: compile("fatal_error", &config.fatal_error)?,
            lifecycle: LifecyclePatterns {
                power_on: compile("power_on", &config.power_on)?,
                power_off: compile("power_off", &config.power_off)?,
                checkpoint: compile("checkpoint", &config.checkpoint)?,
            },
            fields: FieldPatterns {
                system_vendor: compile("system_vendor", &config.system_vendor)?,
                system_model: compile("system_model", &config.system_model)?,
                system_serial: compile("system_serial", &config.system_serial)?,
                baseboard_vendor: compile("baseboard_vendor", &config.baseboard_vendor)?,
                baseboard_model: compile("baseboard_model", &config.baseboard_model)?,
                training_failure: compile("training_failure", &config.training_failure)?,
                memtest_failure: compile("memtest_failure", &config.memtest_failure)?,
                enhanced_warning: compile("enhanced_warning", &config.enhanced_warning)?,
                smm_error: compile("smm_error", &config.smm_error)?,
                rmt_rank: compile("rmt_rank", &config.rmt_rank)?,
                step_test_mode: compile("step_test_mode", &config.step_test_mode)?,
                step_dimm_result: compile("step_dimm_result", &config.step_dimm_result)?,
                step_failed_cell: compile("step_failed_cell", &config.step_failed_cell)?,
            },
        })
    }

    /// The built-in Purley/Cascade Lake grammar
    pub fn builtin() -> BsdmResult<Self> {
        Self::compile(&GrammarConfig::default())
    }
}

fn compile(field: &str, pattern: &str) -> BsdmResult<Regex> {
    Regex::new(pattern).map_err(|e| BsdmError::config(format!("grammar field '{field}': {e}")))
}
