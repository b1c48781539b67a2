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

//! Component inventory derived from the slot tree

use super::{DimmAttributes, MemorySubsystemModel, SlotAddress};
use crate::config::NodeConfig;
use serde::{Deserialize, Serialize};

/// One physically populated DIMM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: String,
    pub pn: String,
    pub model: String,
    /// `YYWW`
    pub prod_date: String,
    pub serial: String,
    pub vendor: String,
    pub dram_vendor: String,
    /// Capacity in GB
    pub size: String,
    pub organisation: String,
    pub form_factor: String,
    pub speed: String,
    pub timings: String,
    pub slot: String,
    #[serde(skip)]
    pub address: Option<SlotAddress>,
}

impl Component {
    pub fn from_slot(address: SlotAddress, dimm: &DimmAttributes, node: &NodeConfig) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        let (size, organisation) = split_organisation(dimm.organisation.as_deref().unwrap_or_default());
        Self {
            kind: "RAM".to_string(),
            pn: text(&dimm.part_number),
            model: dimm.model_id(),
            prod_date: normalize_production_week(dimm.production_week.as_deref().unwrap_or_default()),
            serial: text(&dimm.serial),
            vendor: text(&dimm.vendor),
            dram_vendor: text(&dimm.dram_vendor),
            size,
            organisation,
            form_factor: text(&dimm.form_factor),
            speed: text(&dimm.frequency),
            timings: text(&dimm.timing),
            slot: node.slot_label(address.socket, address.channel, address.dimm),
            address: Some(address),
        }
    }
}

/// One component per populated slot
pub fn build_inventory(model: &MemorySubsystemModel, node: &NodeConfig) -> Vec<Component> {
    model.populated_slots().map(|(address, dimm)| Component::from_slot(address, dimm, node)).collect()
}

/// `32GB(2Rx4 8Gb)` into `("32", "2Rx4 8Gb")`
pub fn split_organisation(raw: &str) -> (String, String) {
    let raw = raw.trim();
    if let Some((size, rest)) = raw.split_once("GB(") {
        if !size.is_empty() && size.chars().all(|c| c.is_ascii_digit()) {
            if let Some(org) = rest.strip_suffix(')') {
                return (size.to_string(), org.trim().to_string());
            }
        }
    }
    (String::new(), raw.to_string())
}

/// `ww08 2019` into `1908`, anything else unchanged
pub fn normalize_production_week(raw: &str) -> String {
    let raw = raw.trim();
    let parsed = raw.strip_prefix("ww").and_then(|rest| rest.split_once(' ')).and_then(|(week, year)| {
        let year = year.trim().strip_prefix("20")?;
        let valid = |s: &str| s.len() == 2 && s.chars().all(|c| c.is_ascii_digit());
        (valid(week) && valid(year)).then(|| format!("{year}{week}"))
    });
    parsed.unwrap_or_else(|| raw.to_string())
}
