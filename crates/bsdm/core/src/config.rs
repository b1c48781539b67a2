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

//! Run configuration
//!
//! Every section carries `#[serde(default)]` so a partial TOML file only needs
//! to mention what differs from the built-in Purley/Cascade Lake setup.

use crate::error::{BsdmError, BsdmResult};
use crate::processors::ProcessorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable consulted when no `--config` flag is given
pub const CONFIG_ENV_VAR: &str = "BSDM_CONFIG";
/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "bsdm.toml";

/// Complete configuration of one monitoring run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BsdmConfig {
    pub base: BaseConfig,
    pub report: ReportConfig,
    pub checks: ChecksConfig,
    pub node: NodeConfig,
    pub mission: MissionConfig,
    pub rmt: RmtConfig,
    pub sol: SolConfig,
    pub grammar: GrammarConfig,
    pub processors: ProcessorsConfig,
}

impl BsdmConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> BsdmResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| BsdmError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content).map_err(|e| BsdmError::config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Resolve the configuration: CLI path, then environment, then working directory, then defaults
    pub fn resolve_config(cli_config: Option<PathBuf>) -> BsdmResult<Self> {
        if let Some(path) = cli_config {
            debug!(path = %path.display(), "loading configuration from command line");
            return Self::load_from_file(path);
        }
        if let Ok(env_config) = std::env::var(CONFIG_ENV_VAR) {
            debug!(path = %env_config, "loading configuration from {}", CONFIG_ENV_VAR);
            return Self::load_from_file(env_config);
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            debug!(path = %local.display(), "loading configuration from working directory");
            return Self::load_from_file(local);
        }
        debug!("using built-in configuration");
        Ok(Self::default())
    }

    /// Enable or disable the RMT engine
    pub fn with_rmt(mut self, enable: bool) -> Self {
        self.mission.rmt = enable;
        self
    }

    /// Enable or disable the STEP engine
    pub fn with_step(mut self, enable: bool) -> Self {
        self.mission.step = enable;
        self
    }

    /// Replace the node topology
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }

    /// Set the bound on scheduler resolution passes
    pub fn with_max_resolution_passes(mut self, passes: usize) -> Self {
        self.base.max_resolution_passes = passes;
        self
    }
}

/// Generic run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    /// Idle wait for new data on a live source before the stream is considered ended
    pub idle_timeout_secs: u64,
    /// Upper bound of dependency resolution passes at end of stream
    pub max_resolution_passes: usize,
    /// Nesting limit of open blocks
    pub max_block_depth: usize,
    /// Serial console line speed
    pub baud_rate: u32,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            max_resolution_passes: 10,
            max_block_depth: 32,
            baud_rate: 115_200,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory for result files, none disables the directory sink
    pub output_dir: Option<PathBuf>,
    pub tags: Vec<String>,
}

/// Toggles of the RAM configuration checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksConfig {
    pub population: bool,
    pub homogeneity: bool,
    pub frequency: bool,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            population: true,
            homogeneity: true,
            frequency: true,
        }
    }
}

/// Declared topology of the node under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub sockets_count: u32,
    /// Total channels across all sockets
    pub channels_count: u32,
    /// Total populated DIMMs across all sockets
    pub dimms_count: u32,
    pub dimm_per_channel: u32,
    /// Point-of-reference memory frequency in MT/s
    pub por_ram_freq: u32,
    /// `"socket.channel.dimm"` to silkscreen slot name
    pub slot_labels: BTreeMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sockets_count: 2,
            channels_count: 12,
            dimms_count: 24,
            dimm_per_channel: 2,
            por_ram_freq: 2666,
            slot_labels: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    /// Slot label for a `(socket, channel, dimm)` triple, falling back to `N<s>.C<c>.D<d>`
    pub fn slot_label(&self, socket: u32, channel: u32, dimm: u32) -> String {
        self.slot_labels
            .get(&format!("{socket}.{channel}.{dimm}"))
            .cloned()
            .unwrap_or_else(|| format!("N{socket}.C{channel}.D{dimm}"))
    }
}

/// Enabled qualification engines
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub rmt: bool,
    pub step: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RmtConfig {
    pub guidelines: GuidelineConfig,
}

/// Margin thresholds: a common set overridden per operating frequency
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidelineConfig {
    pub common: BTreeMap<String, i32>,
    pub frequencies: BTreeMap<String, BTreeMap<String, i32>>,
}

impl GuidelineConfig {
    /// Effective thresholds for a frequency in MT/s
    pub fn for_frequency(&self, frequency: Option<u32>) -> BTreeMap<String, i32> {
        let mut merged = self.common.clone();
        if let Some(overrides) = frequency.and_then(|f| self.frequencies.get(&f.to_string())) {
            merged.extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        }
        merged
    }
}

/// IPMI Serial-Over-LAN access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolConfig {
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Wait for the RMCP presence pong
    pub probe_timeout_ms: u64,
    pub ipmitool: PathBuf,
}

impl Default for SolConfig {
    fn default() -> Self {
        Self {
            port: 623,
            username: "ADMIN".to_string(),
            password: "ADMIN".to_string(),
            probe_timeout_ms: 1500,
            ipmitool: PathBuf::from("ipmitool"),
        }
    }
}

/// One start/stop marker family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerFamilyConfig {
    pub name: String,
    /// Pattern whose first capture group is the block name
    pub start: String,
    /// Pattern whose first capture group must equal the open block name
    pub end: String,
    /// Higher priority families are tested first
    pub priority: u32,
}

impl MarkerFamilyConfig {
    fn new(name: &str, start: &str, end: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            priority,
        }
    }
}

/// Versioned console grammar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrammarConfig {
    pub version: String,
    pub families: Vec<MarkerFamilyConfig>,
    pub fatal_error: String,
    pub power_on: String,
    pub power_off: String,
    pub checkpoint: String,
    pub system_vendor: String,
    pub system_model: String,
    pub system_serial: String,
    pub baseboard_vendor: String,
    pub baseboard_model: String,
    pub training_failure: String,
    pub memtest_failure: String,
    pub enhanced_warning: String,
    pub smm_error: String,
    pub rmt_rank: String,
    pub step_test_mode: String,
    pub step_dimm_result: String,
    pub step_failed_cell: String,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            version: "purley-mrc-1".to_string(),
            families: vec![
                MarkerFamilyConfig::new("smm", r"^(.*?) Hander start!", r"^(.*?) Hander end!", 40),
                MarkerFamilyConfig::new("imc", r"^([A-Z@].*?) -- Started", r"^([A-Z@].*?) -*=? ?[0-9]+ ?ms$", 30),
                MarkerFamilyConfig::new("base", r"START_([0-9A-Z_]+)", r"STOP_([0-9A-Z_]+)", 20),
                MarkerFamilyConfig::new("acpi", r"^(.*?): Class ID:.*", r"^(.*?) Exiting\.\.\.", 10),
            ],
            fatal_error: r"Major Code = [0-9]+, Minor Code = [0-9]+".to_string(),
            power_on: r"Status Code Available".to_string(),
            power_off: r"SecSMI. S5 Trap".to_string(),
            checkpoint: r"Checkpoint Code: Socket ([0-9]+), (0x[0-9A-Fa-f]+), (0x[0-9A-Fa-f]+), (0x[0-9A-Fa-f]+)".to_string(),
            system_vendor: r"SystemManufacturer: UpdateStr: (.*)".to_string(),
            system_model: r"SystemProductName: UpdateStr: (.*)".to_string(),
            system_serial: r"SystemSerialNumber: UpdateStr: (.*)".to_string(),
            baseboard_vendor: r"BaseBoardManufacturer: UpdateStr: (.*)".to_string(),
            baseboard_model: r"BaseBoardProductName: UpdateStr: (.*)".to_string(),
            training_failure: r"N([0-9]+)\.C([0-9]+)\.D([0-9]+)\.R([0-9]+)\.S([0-9]+): Failed RdDqDqs".to_string(),
            memtest_failure: r"^N([0-9]+)\.C([0-9]+)\.D([0-9]+)\.R([0-9]+): MemTest Failure!".to_string(),
            enhanced_warning: r"Enhanced warning of type ([0-9]+) logged:".to_string(),
            smm_error: r"Last Err Info Node=([0-9]+) ddrch=([0-9]+) dimm=([0-9]+) rank=([0-9]+)".to_string(),
            rmt_rank: r"^N([0-9]+)\.C([0-9]+)\.D([0-9]+)\.R([0-9]+)$".to_string(),
            step_test_mode: r"^Test Mode : (.*?)\.?$".to_string(),
            step_dimm_result: r"^N([0-9]+)\.C([0-9]+)\.D([0-9]+):\s+\[S/N: ([0-9]{4})_([A-Z0-9]+)\] (Pass|Fail|Empty)(?:\(([A-Za-z ]+)\))?"
                .to_string(),
            step_failed_cell: concat!(
                r"\[FailedPatternBitMask (0x[0-9A-Fa-f]+)\] N([0-9]+)\.C([0-9]+)\.D([0-9]+)\. FAIL: ",
                r"R([0-9]+)\.CID([0-9]+)\.BG([0-9]+)\.BA([0-9]+)\.ROW:(0x[0-9a-fA-F]+)\.COL:(0x[0-9a-fA-F]+)\.DQ([0-9]+)\.",
                r"(?:PPR:([A-Za-z]+)(?:\(([A-Z]+)\))?)?"
            )
            .to_string(),
        }
    }
}

/// Additional block name to processor rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorsConfig {
    pub rules: BTreeMap<String, ProcessorKind>,
}
