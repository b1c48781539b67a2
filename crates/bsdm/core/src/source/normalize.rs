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

//! Line normalization shared by every source

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::debug;

fn escape_sequence() -> Option<&'static Regex> {
    static ESCAPE: OnceLock<Option<Regex>> = OnceLock::new();
    // CSI sequences and the two byte ESC forms
    ESCAPE.get_or_init(|| Regex::new(r"\x1B(?:\[[0-?]*[ -/]*[@-~]|[@-Z\\-_])").ok()).as_ref()
}

/// Remove terminal escape sequences and control characters other than tab
pub fn strip_control_sequences(line: &str) -> Cow<'_, str> {
    let stripped = match escape_sequence() {
        Some(escape) => escape.replace_all(line, ""),
        None => Cow::Borrowed(line),
    };
    if stripped.chars().any(|c| c.is_control() && c != '\t') {
        Cow::Owned(stripped.chars().filter(|c| !c.is_control() || *c == '\t').collect())
    } else {
        stripped
    }
}

/// Longest line kept pending before it is flushed without a terminator
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits a byte stream into lossily decoded lines
#[derive(Debug)]
pub struct LineAssembler {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline
    scanned: usize,
    limit: usize,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            limit: limit.max(1),
        }
    }

    /// Append bytes and return every line completed by them
    ///
    /// A line reaching the length limit is emitted as is and the rest of it
    /// starts a new line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0;
        for index in self.scanned..self.pending.len() {
            if self.pending[index] == b'\n' {
                lines.push(decode(&self.pending[start..index]));
                start = index + 1;
            } else if index + 1 - start >= self.limit {
                debug!(bytes = self.limit, "overlong console line flushed");
                lines.push(decode(&self.pending[start..=index]));
                start = index + 1;
            }
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();
        lines
    }

    /// Flush a trailing partial line
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        self.scanned = 0;
        Some(decode(&raw))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
