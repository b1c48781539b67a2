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

//! RAM configuration checks: population, homogeneity and frequency

use super::MemorySubsystemModel;
use crate::config::{ChecksConfig, NodeConfig};
use crate::error::{EXIT_FREQUENCY, EXIT_HOMOGENEITY, EXIT_POPULATION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationCounts {
    pub sockets_count: u32,
    pub channels_count: u32,
    pub dimms_count: u32,
}

impl fmt::Display for PopulationCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sockets, {} channels, {} DIMMs", self.sockets_count, self.channels_count, self.dimms_count)
    }
}

/// Outcome of the enabled checks, `None` for a disabled check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamConfigStatus {
    pub homogeneity: Option<bool>,
    pub population: Option<bool>,
    pub ddr_frequency: Option<bool>,
    pub counts: PopulationCounts,
    pub expected: PopulationCounts,
    /// Distinct model ids of the populated slots
    pub models: BTreeSet<String>,
    pub frequency_mts: Option<u32>,
    pub expected_frequency_mts: u32,
}

impl RamConfigStatus {
    pub fn is_pass(&self) -> bool {
        [self.homogeneity, self.population, self.ddr_frequency].iter().all(|c| *c != Some(false))
    }

    /// Exit code of the last failing check, in homogeneity, population, frequency order
    pub fn failure_exit_code(&self) -> Option<u8> {
        [
            (self.homogeneity, EXIT_HOMOGENEITY),
            (self.population, EXIT_POPULATION),
            (self.ddr_frequency, EXIT_FREQUENCY),
        ]
        .iter()
        .filter(|(check, _)| *check == Some(false))
        .map(|(_, code)| *code)
        .last()
    }
}

impl fmt::Display for RamConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failures = Vec::new();
        if self.homogeneity == Some(false) {
            failures.push(format!("DIMMs are not the same ({})", self.models.iter().cloned().collect::<Vec<_>>().join(", ")));
        }
        if self.population == Some(false) {
            failures.push(format!("population {} instead of {}", self.counts, self.expected));
        }
        if self.ddr_frequency == Some(false) {
            let found = self.frequency_mts.map(|f| f.to_string()).unwrap_or_else(|| "unknown".to_string());
            failures.push(format!("RAM initialized at {found} MT/s instead of {} MT/s", self.expected_frequency_mts));
        }
        if failures.is_empty() { write!(f, "pass") } else { write!(f, "{}", failures.join("; ")) }
    }
}

/// Count what the socket tables report
pub fn count_population(model: &MemorySubsystemModel) -> PopulationCounts {
    let mut counts = PopulationCounts::default();
    for socket in model.sockets.values() {
        let channels = socket.channels.values().filter(|c| !c.dimms.is_empty()).count() as u32;
        if channels > 0 {
            counts.sockets_count += 1;
            counts.channels_count += channels;
        }
    }
    counts.dimms_count = model.populated_slots().count() as u32;
    counts
}

/// Run the enabled checks against the node configuration
pub fn validate(model: &MemorySubsystemModel, checks: &ChecksConfig, node: &NodeConfig) -> RamConfigStatus {
    let counts = count_population(model);
    let expected = PopulationCounts {
        sockets_count: node.sockets_count,
        channels_count: node.channels_count,
        dimms_count: node.dimms_count,
    };
    let models: BTreeSet<String> = model.populated_slots().map(|(_, dimm)| dimm.model_id()).collect();
    let frequency_mts = model.ddr_frequency();

    let mut status = RamConfigStatus {
        counts,
        expected,
        models,
        frequency_mts,
        expected_frequency_mts: node.por_ram_freq,
        ..Default::default()
    };

    if checks.homogeneity {
        let same = status.models.len() <= 1;
        if !same {
            error!(models = ?status.models, "wrong RAM config: DIMMs are not the same");
        }
        status.homogeneity = Some(same);
    }
    if checks.population {
        let matches = counts == expected;
        if !matches {
            error!(found = %counts, expected = %expected, "DIMM population is wrong");
        }
        status.population = Some(matches);
    }
    if checks.frequency {
        let at_por = frequency_mts == Some(node.por_ram_freq);
        if !at_por {
            error!(found = ?frequency_mts, expected = node.por_ram_freq, "wrong RAM config: unexpected DDR frequency");
        }
        status.ddr_frequency = Some(at_por);
    }
    status
}
