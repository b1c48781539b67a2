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

//! Block segmentation
//!
//! The segmenter is a stack machine over normalized console lines. Start
//! markers of registered blocks push, the matching end marker of the top block
//! pops, and only the top block accumulates lines. A fatal error marker closes
//! the innermost block whatever its own end pattern is.
//!
//! Every stack frame owns its buffer, so a block reopened under a still open
//! block of the same name does not disturb the outer lines. The content of
//! the last closed block of each name is kept until the next one closes.

pub mod lifecycle;
pub mod markers;

use crate::grammar::Grammar;
use markers::MarkerFamily;
use regex::Regex;
use std::collections::HashMap;
use tracing::{trace, warn};

pub use lifecycle::{BootLifecycle, LifecycleEvent, LifecycleWatcher, PostCheckpoint};

/// One active block instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenBlock {
    pub name: String,
    /// Index of the family whose start marker opened the block
    pub family: usize,
    /// Position on the stack, 0 for the outermost block
    pub depth: usize,
    pub lines: Vec<String>,
}

/// A block handed over for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedBlock {
    pub name: String,
    pub socket_id: Option<u32>,
    pub lines: Vec<String>,
    /// Closed by the fatal error marker
    pub forced: bool,
    /// Still open at end of stream
    pub truncated: bool,
}

/// What a single line did to the segmenter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    Opened(String),
    /// Start marker dropped by push validation
    Rejected { name: String, reason: String },
    Buffered,
    /// No block open
    Discarded,
    Closed(ClosedBlock),
}

pub struct BlockSegmenter {
    families: Vec<MarkerFamily>,
    fatal_error: Regex,
    stack: Vec<OpenBlock>,
    closed: HashMap<String, Vec<String>>,
    fatal_latched: bool,
    max_depth: usize,
}

impl BlockSegmenter {
    /// `families` must already be sorted by priority
    pub fn new(families: Vec<MarkerFamily>, fatal_error: Regex, max_depth: usize) -> Self {
        Self {
            families,
            fatal_error,
            stack: Vec::new(),
            closed: HashMap::new(),
            fatal_latched: false,
            max_depth,
        }
    }

    pub fn from_grammar(grammar: &Grammar, max_depth: usize) -> Self {
        Self::new(grammar.families.clone(), grammar.fatal_error.clone(), max_depth)
    }

    /// Feed one normalized line
    ///
    /// `is_registered` tells whether a processor exists for a block name; start
    /// markers of unknown blocks are observed and otherwise ignored.
    pub fn feed(&mut self, line: &str, is_registered: impl Fn(&str) -> bool) -> SegmentEvent {
        if let Some((family, name)) = self.match_start(line, &is_registered) {
            return self.push(family, name);
        }

        let Some(top) = self.stack.last_mut() else {
            return SegmentEvent::Discarded;
        };

        if self.fatal_error.is_match(line) {
            warn!(block = %top.name, "fatal error marker inside block");
            self.fatal_latched = true;
        }

        let end_matched = self.families[top.family].closes(line, &top.name);
        if self.fatal_latched || end_matched {
            let forced = self.fatal_latched && !end_matched;
            self.fatal_latched = false;
            return SegmentEvent::Closed(self.pop(forced, false));
        }

        top.lines.push(line.to_string());
        SegmentEvent::Buffered
    }

    /// Close every block still open, innermost first
    pub fn finish(&mut self) -> Vec<ClosedBlock> {
        let mut closed = Vec::with_capacity(self.stack.len());
        while !self.stack.is_empty() {
            closed.push(self.pop(false, true));
        }
        self.fatal_latched = false;
        closed
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn open_blocks(&self) -> &[OpenBlock] {
        &self.stack
    }

    /// Lines of the innermost open block called `name`, else of the last closed one
    pub fn buffer(&self, name: &str) -> Option<&[String]> {
        self.stack
            .iter()
            .rev()
            .find(|b| b.name == name)
            .map(|b| b.lines.as_slice())
            .or_else(|| self.closed.get(name).map(Vec::as_slice))
    }

    fn match_start(&self, line: &str, is_registered: &impl Fn(&str) -> bool) -> Option<(usize, String)> {
        for (index, family) in self.families.iter().enumerate() {
            if let Some(name) = family.match_start(line) {
                if is_registered(&name) {
                    return Some((index, name));
                }
                trace!(block = %name, family = %family.name, "unregistered block ignored");
            }
        }
        None
    }

    fn push(&mut self, family: usize, name: String) -> SegmentEvent {
        let reason = if name.is_empty() {
            Some("empty block name".to_string())
        } else if self.stack.len() >= self.max_depth {
            Some(format!("nesting deeper than {}", self.max_depth))
        } else {
            None
        };
        if let Some(reason) = reason {
            warn!(block = %name, %reason, "start marker dropped");
            return SegmentEvent::Rejected { name, reason };
        }

        trace!(block = %name, depth = self.stack.len(), "block opened");
        self.stack.push(OpenBlock {
            name: name.clone(),
            family,
            depth: self.stack.len(),
            lines: Vec::new(),
        });
        SegmentEvent::Opened(name)
    }

    fn pop(&mut self, forced: bool, truncated: bool) -> ClosedBlock {
        let (block, lines) = self.stack.pop().map(|b| (b.name, b.lines)).unwrap_or_default();
        self.closed.insert(block.clone(), lines.clone());
        trace!(block = %block, lines = lines.len(), forced, truncated, "block closed");
        ClosedBlock {
            socket_id: infer_socket_id(&block),
            name: block,
            lines,
            forced,
            truncated,
        }
    }
}

/// Numeric id formed by the digits of a block name
pub fn infer_socket_id(name: &str) -> Option<u32> {
    let digits: String = name.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}
