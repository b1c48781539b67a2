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

//! Pipe delimited MRC tables
//!
//! The socket table prints one column per channel and one row group per DIMM
//! slot; each row of the group is one attribute. The DIMM info table prints
//! one column for the system and one per socket.

use super::AnalyzerContext;
use crate::error::ProcessingError;
use crate::model::{DimmAttribute, SlotAddress};
use crate::segmenter::ClosedBlock;
use tracing::{debug, info, warn};

const CPU_BANNERS: [&str; 4] = ["BDX", "CLX", "SKX", "ICX"];
const SYSTEM_COLUMN: &str = "System";
const DDR_FREQ: &str = "DDR Freq";

fn is_separator(line: &str) -> bool {
    line.starts_with(&"=".repeat(10)) || line.starts_with(&"-".repeat(10))
}

fn cells(line: &str) -> Vec<&str> {
    line.split('|').map(str::trim).collect()
}

/// Last numeric token of a header cell, `Channel 3` gives 3
fn trailing_number(cell: &str) -> Option<u32> {
    cell.split_whitespace().filter_map(|t| t.parse().ok()).last()
}

/// Text after the last `:` of a cell
fn cell_value(cell: &str) -> &str {
    cell.rsplit(':').next().unwrap_or(cell).trim()
}

pub fn process_socket_table(block: &ClosedBlock, ctx: &mut AnalyzerContext<'_>) -> Result<bool, ProcessingError> {
    let socket = block.socket_id.ok_or_else(|| ProcessingError::MissingSocketId { block: block.name.clone() })?;
    info!(socket, "processing socket info table");

    if let Some(existing) = ctx.model.sockets.get_mut(&socket) {
        existing.channels.values_mut().for_each(|c| c.dimms.clear());
    }

    let mut header: Option<Vec<Option<u32>>> = None;
    let mut dimm: Option<u32> = None;
    let mut attribute = 0usize;

    for line in &block.lines {
        if line.trim().is_empty() || is_separator(line) || CPU_BANNERS.iter().any(|b| line.starts_with(b)) {
            continue;
        }
        let row = cells(line);
        if row[0] == "S" {
            header = Some(row[1..].iter().map(|c| trailing_number(c)).collect());
            continue;
        }
        let Some(columns) = header.as_ref() else {
            debug!(line = %line, "socket table row before header");
            continue;
        };

        if !row[0].is_empty() {
            match row[0].parse::<u32>() {
                Ok(id) if id < ctx.node.dimm_per_channel => {
                    dimm = Some(id);
                    attribute = 0;
                }
                Ok(id) => {
                    warn!(block = %block.name, dimm = id, "DIMM index beyond the slots per channel skipped");
                    dimm = None;
                    continue;
                }
                Err(_) => {
                    warn!(block = %block.name, line = %line, "malformed socket table row skipped");
                    continue;
                }
            }
        }
        let Some(dimm) = dimm else {
            continue;
        };
        let Some(&kind) = DimmAttribute::ORDER.get(attribute) else {
            continue;
        };

        for (index, channel) in columns.iter().enumerate() {
            let (Some(channel), Some(cell)) = (channel, row.get(index + 1)) else {
                continue;
            };
            let value = cell_value(cell);
            if value.is_empty() {
                continue;
            }
            ctx.model.dimm_mut(SlotAddress::new(socket, *channel, dimm)).set(kind, value.to_string());
        }
        attribute += 1;
    }

    if header.is_none() {
        return Err(ProcessingError::MissingHeader { block: block.name.clone() });
    }

    ctx.model.socket_tables_seen.insert(socket);
    let seen = (0..ctx.node.sockets_count).filter(|s| ctx.model.socket_tables_seen.contains(s)).count() as u32;
    debug!(socket, seen, expected = ctx.node.sockets_count, "socket table parsed");
    Ok(seen >= ctx.node.sockets_count)
}

pub fn process_dimm_table(block: &ClosedBlock, ctx: &mut AnalyzerContext<'_>) -> Result<bool, ProcessingError> {
    info!("processing DIMM info table");
    let mut header: Option<Vec<String>> = None;

    for line in &block.lines {
        if is_separator(line) {
            continue;
        }
        let row = cells(line);
        if line.starts_with(&" ".repeat(10)) {
            header = Some(row[1..].iter().map(|c| c.to_string()).collect());
            continue;
        }
        let Some(columns) = header.as_ref() else {
            continue;
        };
        let key = row[0];
        if key.is_empty() {
            continue;
        }
        let channel_param = channel_parameter(key);

        for (index, column) in columns.iter().enumerate() {
            let Some(value) = row.get(index + 1).map(|v| v.trim()) else {
                continue;
            };
            if value.is_empty() || value == "N/A" || column.is_empty() {
                continue;
            }
            let value = value.to_string();
            if column == SYSTEM_COLUMN {
                ctx.model.system.insert(key.to_string(), value);
                continue;
            }
            let Some(socket) = trailing_number(column) else {
                debug!(column = %column, "unknown DIMM info column");
                continue;
            };
            let socket_info = ctx.model.sockets.entry(socket).or_default();
            match channel_param {
                Some((channel, param)) => {
                    socket_info.channels.entry(channel).or_default().parameters.insert(param.to_string(), value);
                }
                None => {
                    socket_info.parameters.insert(key.to_string(), value);
                }
            }
        }
    }

    if header.is_none() {
        return Err(ProcessingError::MissingHeader { block: block.name.clone() });
    }
    let Some(frequency) = ctx.model.ddr_frequency() else {
        let raw = ctx
            .model
            .system
            .get(DDR_FREQ)
            .or_else(|| ctx.model.sockets.values().find_map(|s| s.parameters.get(DDR_FREQ)));
        return match raw {
            Some(raw) => Err(ProcessingError::Malformed {
                block: block.name.clone(),
                detail: format!("unparseable {DDR_FREQ} '{raw}'"),
            }),
            None => {
                debug!("DIMM info table without operating frequency");
                Ok(false)
            }
        };
    };
    debug!(frequency, "DIMM info table parsed");
    Ok(true)
}

/// `Ch3 CL` into `(3, "CL")`
fn channel_parameter(key: &str) -> Option<(u32, &str)> {
    let (channel, param) = key.split_once(char::is_whitespace)?;
    let channel = channel.strip_prefix("Ch")?.parse().ok()?;
    Some((channel, param.trim()))
}
