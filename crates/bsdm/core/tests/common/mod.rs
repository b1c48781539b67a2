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


//! Synthetic MRC console transcripts

#![allow(dead_code)]

pub const PART: &str = "M393A4K40CB2-CTD";
pub const ODD_PART: &str = "HMA84GR7AFR4N-VK";

/// One socket table, `part_for` returns `None` for an empty slot
pub fn socket_table(socket: u32, channels: u32, per_channel: u32, part_for: impl Fn(u32, u32) -> Option<&'static str>) -> String {
    let separator = "=".repeat(60);
    let mut lines = vec![format!("START_SOCKET_{socket}_TABLE"), "CLX Socket table".to_string(), separator.clone()];
    let header: String = (0..channels).map(|ch| format!("  Channel {ch}  |")).collect();
    lines.push(format!("S|{header}"));
    lines.push(separator.clone());

    for dimm in 0..per_channel {
        for attribute in 0..9 {
            let first = if attribute == 0 { dimm.to_string() } else { " ".to_string() };
            let row: String = (0..channels)
                .map(|ch| {
                    let value = match part_for(ch, dimm) {
                        None if attribute == 0 => "Not installed".to_string(),
                        None => String::new(),
                        Some(part) => match attribute {
                            0 => "Samsung".to_string(),
                            1 => "DRAM: Samsung".to_string(),
                            2 => "RCD: IDT".to_string(),
                            3 => "32GB(2Rx4 8Gb)".to_string(),
                            4 => "RDIMM".to_string(),
                            5 => "2666 19-19-19".to_string(),
                            6 => "ww08 2019".to_string(),
                            7 => part.to_string(),
                            _ => format!("SN: {socket}{ch:02}{dimm}A1B2"),
                        },
                    };
                    format!("  {value:<18}|")
                })
                .collect();
            lines.push(format!("{first}|{row}"));
        }
        lines.push("-".repeat(60));
    }
    lines.push(separator);
    lines.push(format!("STOP_SOCKET_{socket}_TABLE"));
    lines.join("\n")
}

pub fn dimm_info_table(frequency: u32) -> String {
    [
        "START_DIMMINFO_TABLE".to_string(),
        "=".repeat(60),
        "          |   System    |  Socket 0   |  Socket 1   |".to_string(),
        "=".repeat(60),
        format!("DDR Freq  |  DDR4-{frequency}  |             |             |"),
        "DDR Vdd   |  1.200V     |             |             |".to_string(),
        "Ch0 CL    |  N/A        |  19         |  19         |".to_string(),
        "=".repeat(60),
        "STOP_DIMMINFO_TABLE".to_string(),
    ]
    .join("\n")
}

pub fn chassis_block() -> String {
    [
        "InitFruStrings: Class ID:  03",
        "SystemManufacturer: UpdateStr: Acme",
        "SystemProductName: UpdateStr: R-100",
        "SystemSerialNumber: UpdateStr: 100200300",
        "BaseBoardManufacturer: UpdateStr: Acme",
        "BaseBoardProductName: UpdateStr: X11DPi",
        "InitFruStrings Exiting...",
    ]
    .join("\n")
}

/// Power on, chassis, both socket tables and the DIMM info table of a 2x6x2 node
pub fn boot_log(part_for: impl Fn(u32, u32, u32) -> Option<&'static str>, frequency: u32) -> String {
    let mut parts = vec![
        "Status Code Available".to_string(),
        "Checkpoint Code: Socket 0, 0xB0, 0x00, 0x0001".to_string(),
        chassis_block(),
    ];
    for socket in 0..2 {
        parts.push(socket_table(socket, 6, 2, |ch, d| part_for(socket, ch, d)));
    }
    parts.push(dimm_info_table(frequency));
    parts.join("\n")
}

pub fn uniform(_socket: u32, _channel: u32, _dimm: u32) -> Option<&'static str> {
    Some(PART)
}

/// RMT rank line with every margin set to `base`
pub fn rank_line(socket: u32, channel: u32, dimm: u32, rank: u32, margins: &[i32; 14]) -> String {
    let values: Vec<String> = margins.iter().map(|m| m.to_string()).collect();
    format!("N{socket}.C{channel}.D{dimm}.R{rank} {}", values.join(" "))
}

/// RMT block covering every slot of a 2x6x2 node
pub fn rmt_block(margins_for: impl Fn(u32, u32, u32, u32) -> [i32; 14]) -> String {
    let mut lines = vec!["START_BSSA_RMT".to_string(), "RMT results summary".to_string()];
    for socket in 0..2 {
        for channel in 0..6 {
            for dimm in 0..2 {
                for rank in 0..2 {
                    lines.push(rank_line(socket, channel, dimm, rank, &margins_for(socket, channel, dimm, rank)));
                }
            }
        }
    }
    lines.push("STOP_BSSA_RMT".to_string());
    lines.join("\n")
}

/// STEP block with one summary line per slot of a 2x6x2 node
pub fn step_block(status_for: impl Fn(u32, u32, u32) -> &'static str, extra: &[&str]) -> String {
    let mut lines = vec!["@SEC Run CPGC Test -- Started".to_string(), "Test Mode : Enhanced PPR.".to_string()];
    lines.extend(extra.iter().map(|l| l.to_string()));
    for socket in 0..2 {
        for channel in 0..6 {
            for dimm in 0..2 {
                lines.push(format!(
                    "N{socket}.C{channel}.D{dimm}:  [S/N: 1908_{socket}{channel:02}{dimm}A1B2] {}",
                    status_for(socket, channel, dimm)
                ));
            }
        }
    }
    lines.push("@SEC Run CPGC Test -- 5321 ms".to_string());
    lines.join("\n")
}
