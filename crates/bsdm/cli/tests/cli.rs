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


use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const CONFIG: &str = r#"
[node]
sockets_count = 1
channels_count = 1
dimms_count = 1
por_ram_freq = 2666

[rmt.guidelines.common]
"RxDqs-" = 5
"#;

const CONSOLE: &str = "\
Status Code Available
InitFruStrings: Class ID:  03
SystemSerialNumber: UpdateStr: 42
BaseBoardProductName: UpdateStr: X11DPi
InitFruStrings Exiting...
START_SOCKET_0_TABLE
S|  Channel 0          |
0|  Samsung            |
 |  DRAM: Samsung      |
 |  RCD: IDT           |
 |  32GB(2Rx4 8Gb)     |
 |  RDIMM              |
 |  2666 19-19-19      |
 |  ww08 2019          |
 |  M393A4K40CB2-CTD   |
 |  SN: 3A2B1C0D       |
STOP_SOCKET_0_TABLE
START_DIMMINFO_TABLE
          |   System    |  Socket 0   |
DDR Freq  |  DDR4-2666  |             |
STOP_DIMMINFO_TABLE
START_BSSA_RMT
N0.C0.D0.R0 9 9 9 9 9 9 9 9 9 9 9 9 9 9
STOP_BSSA_RMT
";

fn workspace(console: &str, config: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("console.log"), console).unwrap();
    std::fs::write(dir.path().join("bsdm.toml"), config).unwrap();
    dir
}

fn bsdm(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bsdm").unwrap();
    cmd.current_dir(dir).env_remove("BSDM_CONFIG").env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_log_file_passes() {
    let dir = workspace(CONSOLE, CONFIG);
    bsdm(dir.path())
        .arg("console.log")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("homogeneity PASS population PASS frequency PASS"))
        .stdout(predicate::str::contains("exit code: 0"));
}

#[test]
fn test_rmt_results_as_json() {
    let dir = workspace(CONSOLE, CONFIG);
    let output = bsdm(dir.path()).args(["console.log", "--rmt", "--json", "-T", "lab,nightly"]).output().unwrap();
    assert_eq!(output.status.code(), Some(0));

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["test"], "signal_integrity");
    assert_eq!(result["status"], "pass");
    assert_eq!(result["environment"]["system_serial"], "42");
    assert_eq!(result["tags"], serde_json::json!(["lab", "nightly", "M393A4K40CB2-CTD_IDT"]));
    assert!(String::from_utf8_lossy(&output.stderr).contains("signal_integrity: PASS"));
}

#[test]
fn test_output_dir_and_disable_sending() {
    let dir = workspace(CONSOLE, CONFIG);
    let out = dir.path().join("results");
    bsdm(dir.path()).arg("console.log").arg("--rmt").arg("--output-dir").arg(&out).assert().code(0);
    let files: Vec<_> = std::fs::read_dir(&out).unwrap().collect();
    assert_eq!(files.len(), 1);

    let skipped = dir.path().join("skipped");
    bsdm(dir.path())
        .arg("console.log")
        .arg("--rmt")
        .arg("--disable-sending")
        .arg("--output-dir")
        .arg(&skipped)
        .assert()
        .code(0);
    assert!(!skipped.exists());
}

#[test]
fn test_frequency_failure_exit_code() {
    let dir = workspace(&CONSOLE.replace("DDR4-2666", "DDR4-2400"), CONFIG);
    bsdm(dir.path())
        .arg("console.log")
        .assert()
        .code(104)
        .stdout(predicate::str::contains("RAM initialized at 2400 MT/s instead of 2666 MT/s"));
}

#[test]
fn test_insufficient_data_exit_code() {
    let dir = workspace("START_SOCKET_0_TABLE\nS| Channel 0 |\nSTOP_SOCKET_0_TABLE\n", CONFIG);
    bsdm(dir.path())
        .arg("console.log")
        .assert()
        .code(120)
        .stdout(predicate::str::contains("unresolved goals:"));
}

#[test]
fn test_empty_file_is_not_a_source() {
    let dir = workspace(CONSOLE, CONFIG);
    std::fs::write(dir.path().join("empty.log"), "").unwrap();
    bsdm(dir.path()).arg("empty.log").assert().code(2);
}

#[test]
fn test_invalid_config_exit_code() {
    let dir = workspace(CONSOLE, "[node]\nsockets_count = \"two\"\n");
    bsdm(dir.path()).arg("console.log").assert().code(1);

    let dir = workspace(CONSOLE, "[grammar]\nfatal_error = \"(\"\n");
    bsdm(dir.path()).arg("console.log").assert().code(1);
}
