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


//! BSDM core library
//!
//! Scrapes the BIOS memory reference code debug console (log file, serial
//! console or IPMI Serial-Over-LAN), segments it into debug blocks, builds the
//! memory subsystem model and drives the qualification engines through a
//! dependency-resolved testplan.

pub mod config;
pub mod error;
pub mod grammar;
pub mod model;
pub mod pipeline;
pub mod processors;
pub mod qualification;
pub mod report;
pub mod scheduler;
pub mod segmenter;
pub mod source;

pub use config::{BsdmConfig, NodeConfig};
pub use error::{BsdmError, BsdmResult, ProcessingError, SinkError, SourceError};
pub use grammar::Grammar;
pub use model::{Component, MemorySubsystemModel, RamConfigStatus, SlotAddress};
pub use pipeline::Pipeline;
pub use qualification::{QualificationEngine, Verdict};
pub use report::{DirectorySink, MemorySink, QualificationResult, ResultSink, RunSummary, WriterSink, render_transcript};
pub use scheduler::{DependencyScheduler, GoalId};
pub use segmenter::{BlockSegmenter, ClosedBlock};
pub use source::{LineSource, LogLine, ReplaySource, SourceKind, classify_source, open_source};
