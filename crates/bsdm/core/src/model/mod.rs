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

//! Memory subsystem model
//!
//! The model is built incrementally by the block analyzers: a tree of
//! socket, channel and DIMM slot attributes, chassis identity, failure events
//! and boot lifecycle. It is owned by one pipeline and passed by reference.

pub mod inventory;
pub mod validator;

use crate::segmenter::BootLifecycle;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use inventory::{Component, build_inventory};
pub use validator::{PopulationCounts, RamConfigStatus, validate};

/// Vendor value of an empty slot
pub const NOT_INSTALLED: &str = "Not installed";

/// Socket, channel and DIMM position of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotAddress {
    pub socket: u32,
    pub channel: u32,
    pub dimm: u32,
}

impl SlotAddress {
    pub fn new(socket: u32, channel: u32, dimm: u32) -> Self {
        Self { socket, channel, dimm }
    }

    /// Key of the slot label table
    pub fn label_key(&self) -> String {
        format!("{}.{}.{}", self.socket, self.channel, self.dimm)
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}.C{}.D{}", self.socket, self.channel, self.dimm)
    }
}

/// Rows of a socket table, in the order the BIOS prints them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimmAttribute {
    Vendor,
    DramVendor,
    RcdVendor,
    Organisation,
    FormFactor,
    Frequency,
    ProductionWeek,
    PartNumber,
    Serial,
}

impl DimmAttribute {
    pub const ORDER: [DimmAttribute; 9] = [
        DimmAttribute::Vendor,
        DimmAttribute::DramVendor,
        DimmAttribute::RcdVendor,
        DimmAttribute::Organisation,
        DimmAttribute::FormFactor,
        DimmAttribute::Frequency,
        DimmAttribute::ProductionWeek,
        DimmAttribute::PartNumber,
        DimmAttribute::Serial,
    ];
}

/// Attributes of one DIMM slot as printed by the socket table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimmAttributes {
    pub vendor: Option<String>,
    pub dram_vendor: Option<String>,
    pub rcd_vendor: Option<String>,
    pub organisation: Option<String>,
    pub form_factor: Option<String>,
    pub frequency: Option<String>,
    pub timing: Option<String>,
    pub production_week: Option<String>,
    pub part_number: Option<String>,
    pub serial: Option<String>,
}

impl DimmAttributes {
    /// Store a table cell; the frequency row carries `<freq> <timing>`
    pub fn set(&mut self, attribute: DimmAttribute, value: String) {
        match attribute {
            DimmAttribute::Vendor => self.vendor = Some(value),
            DimmAttribute::DramVendor => self.dram_vendor = Some(value),
            DimmAttribute::RcdVendor => self.rcd_vendor = Some(value),
            DimmAttribute::Organisation => self.organisation = Some(value),
            DimmAttribute::FormFactor => self.form_factor = Some(value),
            DimmAttribute::Frequency => {
                let mut parts = value.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(freq), Some(timing), None) => {
                        self.frequency = Some(freq.to_string());
                        self.timing = Some(timing.to_string());
                    }
                    _ => self.frequency = Some(value),
                }
            }
            DimmAttribute::ProductionWeek => self.production_week = Some(value),
            DimmAttribute::PartNumber => self.part_number = Some(value),
            DimmAttribute::Serial => self.serial = Some(value),
        }
    }

    /// Vendor present and not the empty-slot sentinel
    pub fn is_populated(&self) -> bool {
        self.vendor.as_deref().is_some_and(|v| !v.is_empty() && v != NOT_INSTALLED)
    }

    /// `<part number>_<RCD VENDOR>`
    pub fn model_id(&self) -> String {
        format!(
            "{}_{}",
            self.part_number.as_deref().unwrap_or_default(),
            self.rcd_vendor.as_deref().unwrap_or_default().to_uppercase()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub dimms: BTreeMap<u32, DimmAttributes>,
    /// Per-channel values of the DIMM info table
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketInfo {
    pub channels: BTreeMap<u32, ChannelInfo>,
    pub parameters: BTreeMap<String, String>,
}

/// System and baseboard identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChassisInfo {
    pub system_vendor: Option<String>,
    pub system_model: Option<String>,
    pub system_serial: Option<String>,
    pub baseboard_vendor: Option<String>,
    pub baseboard_model: Option<String>,
}

impl ChassisInfo {
    pub fn is_complete(&self) -> bool {
        self.system_serial.is_some() && self.baseboard_model.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// A rank level failure reported on the console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub severity: Severity,
    /// Block the event was found in
    pub block: String,
    pub slot: SlotAddress,
    pub slot_label: String,
    pub rank: Option<u32>,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

/// Everything learned about the memory subsystem during a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySubsystemModel {
    pub sockets: BTreeMap<u32, SocketInfo>,
    /// `System` column of the DIMM info table
    pub system: BTreeMap<String, String>,
    pub chassis: ChassisInfo,
    pub components: Vec<Component>,
    pub failure_events: Vec<FailureEvent>,
    pub lifecycle: BootLifecycle,
    /// Sockets whose table has been parsed
    pub socket_tables_seen: BTreeSet<u32>,
    pub ram_config: Option<RamConfigStatus>,
}

impl MemorySubsystemModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimm_mut(&mut self, slot: SlotAddress) -> &mut DimmAttributes {
        self.sockets
            .entry(slot.socket)
            .or_default()
            .channels
            .entry(slot.channel)
            .or_default()
            .dimms
            .entry(slot.dimm)
            .or_default()
    }

    pub fn dimm(&self, slot: SlotAddress) -> Option<&DimmAttributes> {
        self.sockets.get(&slot.socket)?.channels.get(&slot.channel)?.dimms.get(&slot.dimm)
    }

    /// Every slot with its attributes, in socket/channel/dimm order
    pub fn slots(&self) -> impl Iterator<Item = (SlotAddress, &DimmAttributes)> {
        self.sockets.iter().flat_map(|(s, socket)| {
            socket
                .channels
                .iter()
                .flat_map(move |(c, channel)| channel.dimms.iter().map(move |(d, dimm)| (SlotAddress::new(*s, *c, *d), dimm)))
        })
    }

    pub fn populated_slots(&self) -> impl Iterator<Item = (SlotAddress, &DimmAttributes)> {
        self.slots().filter(|(_, dimm)| dimm.is_populated())
    }

    /// Operating frequency in MT/s from `DDR Freq`, e.g. `DDR4-2666`
    pub fn ddr_frequency(&self) -> Option<u32> {
        self.system
            .get("DDR Freq")
            .or_else(|| self.sockets.values().find_map(|s| s.parameters.get("DDR Freq")))
            .and_then(|raw| parse_frequency(raw))
    }

    pub fn record_failure(&mut self, event: FailureEvent) {
        self.failure_events.push(event);
    }
}

/// `DDR4-2666` and `2666` both yield 2666
pub fn parse_frequency(raw: &str) -> Option<u32> {
    raw.rsplit('-').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dimm(vendor: &str, pn: &str, rcd: &str) -> DimmAttributes {
        DimmAttributes {
            vendor: Some(vendor.to_string()),
            part_number: Some(pn.to_string()),
            rcd_vendor: Some(rcd.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_populated_sentinel() {
        assert!(dimm("Samsung", "M393", "IDT").is_populated());
        assert!(!dimm(NOT_INSTALLED, "", "").is_populated());
        assert!(!DimmAttributes::default().is_populated());
    }

    #[test]
    fn test_model_id() {
        assert_eq!(dimm("Samsung", "M393A4K40CB2-CTD", "idt").model_id(), "M393A4K40CB2-CTD_IDT");
    }

    #[test]
    fn test_frequency_cell_split() {
        let mut attrs = DimmAttributes::default();
        attrs.set(DimmAttribute::Frequency, "2666 19-19-19".to_string());
        assert_eq!(attrs.frequency.as_deref(), Some("2666"));
        assert_eq!(attrs.timing.as_deref(), Some("19-19-19"));

        attrs.set(DimmAttribute::Frequency, "2933".to_string());
        assert_eq!(attrs.frequency.as_deref(), Some("2933"));
    }

    #[test]
    fn test_slot_iteration_order() {
        let mut model = MemorySubsystemModel::new();
        *model.dimm_mut(SlotAddress::new(1, 0, 0)) = dimm("Samsung", "A", "B");
        *model.dimm_mut(SlotAddress::new(0, 2, 1)) = dimm(NOT_INSTALLED, "", "");
        *model.dimm_mut(SlotAddress::new(0, 2, 0)) = dimm("Samsung", "A", "B");

        let slots: Vec<_> = model.slots().map(|(s, _)| s.to_string()).collect();
        assert_eq!(slots, vec!["N0.C2.D0", "N0.C2.D1", "N1.C0.D0"]);
        assert_eq!(model.populated_slots().count(), 2);
    }

    #[test]
    fn test_ddr_frequency_lookup() {
        let mut model = MemorySubsystemModel::new();
        assert_eq!(model.ddr_frequency(), None);
        model.sockets.entry(0).or_default().parameters.insert("DDR Freq".into(), "DDR4-2400".into());
        assert_eq!(model.ddr_frequency(), Some(2400));
        model.system.insert("DDR Freq".into(), "DDR4-2666".into());
        assert_eq!(model.ddr_frequency(), Some(2666));
        assert_eq!(parse_frequency("garbage"), None);
    }
}
