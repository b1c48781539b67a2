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

//! Boot lifecycle markers, watched independently of block nesting

use crate::grammar::LifecyclePatterns;
use crate::source::LogLine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Last POST checkpoint reported by the BIOS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCheckpoint {
    pub socket: u32,
    pub major: String,
    pub minor: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootLifecycle {
    pub power_on_count: u32,
    pub session_started_at: Option<DateTime<Utc>>,
    pub powered_off_at: Option<DateTime<Utc>>,
    pub last_checkpoint: Option<PostCheckpoint>,
}

impl BootLifecycle {
    /// Number of power-ons after the first one
    pub fn restarts(&self) -> u32 {
        self.power_on_count.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    PowerOn,
    Restart(u32),
    PowerOff,
    Checkpoint(PostCheckpoint),
}

pub struct LifecycleWatcher {
    patterns: LifecyclePatterns,
}

impl LifecycleWatcher {
    pub fn new(patterns: LifecyclePatterns) -> Self {
        Self { patterns }
    }

    pub fn observe(&self, line: &LogLine, state: &mut BootLifecycle) -> Option<LifecycleEvent> {
        if self.patterns.power_on.is_match(&line.text) {
            state.power_on_count += 1;
            if state.power_on_count == 1 {
                state.session_started_at = Some(line.received_at);
                info!("server powered on, job session started");
                return Some(LifecycleEvent::PowerOn);
            }
            info!(restarts = state.restarts(), "server restarted");
            return Some(LifecycleEvent::Restart(state.restarts()));
        }
        if self.patterns.power_off.is_match(&line.text) {
            state.powered_off_at = Some(line.received_at);
            info!("server powered off, job session ended");
            return Some(LifecycleEvent::PowerOff);
        }
        let caps = self.patterns.checkpoint.captures(&line.text)?;
        let field = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
        let checkpoint = PostCheckpoint {
            socket: field(1).parse().unwrap_or_default(),
            major: field(2),
            minor: field(3),
            code: field(4),
        };
        state.last_checkpoint = Some(checkpoint.clone());
        Some(LifecycleEvent::Checkpoint(checkpoint))
    }
}
