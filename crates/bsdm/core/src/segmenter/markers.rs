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

//! Start/stop marker families

use crate::config::MarkerFamilyConfig;
use crate::error::{BsdmError, BsdmResult};
use regex::Regex;

/// A named pair of start and end patterns
#[derive(Debug, Clone)]
pub struct MarkerFamily {
    /// Family name, used in logs only
    pub name: String,
    start: Regex,
    end: Regex,
    /// Priority for matching (higher = tested first)
    pub priority: u32,
}

impl MarkerFamily {
    pub fn new(name: impl Into<String>, start: &str, end: &str, priority: u32) -> BsdmResult<Self> {
        let name = name.into();
        let start = compile_named(&name, "start", start)?;
        let end = compile_named(&name, "end", end)?;
        Ok(Self { name, start, end, priority })
    }

    pub fn from_config(config: &MarkerFamilyConfig) -> BsdmResult<Self> {
        Self::new(config.name.clone(), &config.start, &config.end, config.priority)
    }

    /// Block name announced by a start marker on this line
    pub fn match_start(&self, line: &str) -> Option<String> {
        capture_name(&self.start, line)
    }

    /// Block name announced by an end marker on this line
    pub fn match_end(&self, line: &str) -> Option<String> {
        capture_name(&self.end, line)
    }

    /// True when the line closes the block called `name`
    pub fn closes(&self, line: &str, name: &str) -> bool {
        self.match_end(line).is_some_and(|n| n == name)
    }
}

fn compile_named(family: &str, role: &str, pattern: &str) -> BsdmResult<Regex> {
    let regex = Regex::new(pattern).map_err(|e| BsdmError::config(format!("marker family '{family}' {role} pattern: {e}")))?;
    if regex.captures_len() < 2 {
        return Err(BsdmError::config(format!(
            "marker family '{family}' {role} pattern must capture the block name"
        )));
    }
    Ok(regex)
}

fn capture_name(regex: &Regex, line: &str) -> Option<String> {
    regex.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str().trim().to_string())
}

/// Sort families so the highest priority is tested first, stable for equal priorities
pub fn sort_by_priority(families: &mut [MarkerFamily]) {
    families.sort_by(|a, b| b.priority.cmp(&a.priority));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrammarConfig;

    fn defaults() -> Vec<MarkerFamily> {
        let mut families: Vec<_> = GrammarConfig::default().families.iter().map(|f| MarkerFamily::from_config(f).unwrap()).collect();
        sort_by_priority(&mut families);
        families
    }

    #[test]
    fn test_priority_order() {
        let names: Vec<_> = defaults().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["smm", "imc", "base", "acpi"]);
    }

    #[test]
    fn test_base_family() {
        let base = defaults().into_iter().find(|f| f.name == "base").unwrap();
        assert_eq!(base.match_start("START_SOCKET_0_TABLE").as_deref(), Some("SOCKET_0_TABLE"));
        assert!(base.closes("STOP_SOCKET_0_TABLE", "SOCKET_0_TABLE"));
        assert!(!base.closes("STOP_SOCKET_1_TABLE", "SOCKET_0_TABLE"));
    }

    #[test]
    fn test_imc_family() {
        let imc = defaults().into_iter().find(|f| f.name == "imc").unwrap();
        assert_eq!(imc.match_start("Rx Dq/Dqs Basic -- Started").as_deref(), Some("Rx Dq/Dqs Basic"));
        assert!(imc.closes("Rx Dq/Dqs Basic - 15ms", "Rx Dq/Dqs Basic"));
        assert!(imc.closes("@SEC Run CPGC Test -- 1234 ms", "@SEC Run CPGC Test"));
        assert!(imc.match_start("lowercase -- Started").is_none());
    }

    #[test]
    fn test_smm_and_acpi_families() {
        let families = defaults();
        let smm = &families[0];
        assert_eq!(smm.match_start("Corrected Memory Error Hander start!").as_deref(), Some("Corrected Memory Error"));
        assert!(smm.closes("Corrected Memory Error Hander end!", "Corrected Memory Error"));
        let acpi = &families[3];
        assert_eq!(acpi.match_start("PciBus: Class ID:  03").as_deref(), Some("PciBus"));
        assert!(acpi.closes("PciBus Exiting...", "PciBus"));
    }

    #[test]
    fn test_pattern_without_capture_is_rejected() {
        let err = MarkerFamily::new("broken", "START", "STOP", 1).unwrap_err();
        assert!(matches!(err, BsdmError::Config(_)));
        assert!(MarkerFamily::new("broken", "(", "STOP_(.*)", 1).is_err());
    }
}
