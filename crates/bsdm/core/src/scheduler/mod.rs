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

//! Dependency scheduler
//!
//! A re-entrant topological evaluator over the testplan. Each pass:
//!
//! 1. drops processed goals from the graph keys,
//! 2. collects ready goals (empty prerequisite set, or only ever named as a
//!    prerequisite),
//! 3. executes each ready goal once, recording successes,
//! 4. removes processed goals from every remaining prerequisite set.
//!
//! A goal that fails stays eligible for later passes, since its data may
//! still arrive on the console.

pub mod goal;
pub mod graph;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use tracing::{debug, trace};

pub use goal::{EngineKind, EngineStage, GoalId};
pub use graph::{GoalGraphBuilder, Testplan};

/// Outcome of one resolution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub executed: usize,
    pub succeeded: usize,
}

pub struct DependencyScheduler<G> {
    graph: BTreeMap<G, BTreeSet<G>>,
    processed: BTreeSet<G>,
    max_passes: usize,
    total_passes: usize,
}

impl<G: Ord + Clone + Display> DependencyScheduler<G> {
    pub fn new(graph: BTreeMap<G, BTreeSet<G>>, max_passes: usize) -> Self {
        Self {
            graph,
            processed: BTreeSet::new(),
            max_passes: max_passes.max(1),
            total_passes: 0,
        }
    }

    /// Record a goal satisfied outside of execution, e.g. by a processed block
    pub fn mark_processed(&mut self, goal: G) {
        self.processed.insert(goal);
    }

    pub fn is_processed(&self, goal: &G) -> bool {
        self.processed.contains(goal)
    }

    /// True once every goal has been satisfied
    pub fn is_complete(&self) -> bool {
        self.graph.keys().all(|g| self.processed.contains(g))
    }

    pub fn processed(&self) -> &BTreeSet<G> {
        &self.processed
    }

    /// Goals still waiting, as graph keys
    pub fn unresolved(&self) -> Vec<G> {
        self.graph.keys().filter(|g| !self.processed.contains(g)).cloned().collect()
    }

    pub fn total_passes(&self) -> usize {
        self.total_passes
    }

    /// Goals executable in the next pass
    pub fn ready_goals(&self) -> BTreeSet<G> {
        let mut ready: BTreeSet<G> = self.graph.iter().filter(|(_, deps)| deps.is_empty()).map(|(g, _)| g.clone()).collect();
        for deps in self.graph.values() {
            ready.extend(deps.iter().filter(|d| !self.graph.contains_key(*d)).cloned());
        }
        ready.retain(|g| !self.processed.contains(g));
        ready
    }

    fn prune(&mut self) {
        let processed = &self.processed;
        self.graph.retain(|goal, _| !processed.contains(goal));
        for deps in self.graph.values_mut() {
            deps.retain(|d| !processed.contains(d));
        }
    }

    /// Run one pass, stopping at the first terminal error
    pub fn resolve_pass<E>(&mut self, mut exec: impl FnMut(&G) -> Result<bool, E>) -> Result<PassOutcome, E> {
        self.prune();
        let ready = self.ready_goals();
        let mut outcome = PassOutcome::default();
        self.total_passes += 1;

        for goal in ready {
            outcome.executed += 1;
            if exec(&goal)? {
                debug!(goal = %goal, "goal reached");
                self.processed.insert(goal);
                outcome.succeeded += 1;
            } else {
                trace!(goal = %goal, "goal not reached yet");
            }
        }

        self.prune();
        Ok(outcome)
    }

    /// Repeat passes while they make progress, up to the pass bound
    pub fn resolve<E>(&mut self, mut exec: impl FnMut(&G) -> Result<bool, E>) -> Result<usize, E> {
        let mut succeeded = 0;
        for _ in 0..self.max_passes {
            if self.is_complete() {
                break;
            }
            let outcome = self.resolve_pass(&mut exec)?;
            succeeded += outcome.succeeded;
            if outcome.succeeded == 0 {
                break;
            }
        }
        Ok(succeeded)
    }

    /// Final resolution at end of stream, returning goals that were never reached
    pub fn finalize<E>(&mut self, mut exec: impl FnMut(&G) -> Result<bool, E>) -> Result<Vec<G>, E> {
        for _ in 0..self.max_passes {
            if self.is_complete() {
                break;
            }
            self.resolve_pass(&mut exec)?;
        }
        self.prune();
        Ok(self.unresolved())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn plan(edges: &[(&'static str, &[&'static str])]) -> BTreeMap<&'static str, BTreeSet<&'static str>> {
        edges.iter().map(|(g, deps)| (*g, deps.iter().copied().collect())).collect()
    }

    fn base() -> BTreeMap<&'static str, BTreeSet<&'static str>> {
        plan(&[
            ("socket", &["console"]),
            ("dimm", &["console"]),
            ("validator", &["socket", "dimm"]),
            ("send", &["validator"]),
        ])
    }

    #[test]
    fn test_leaf_goals_are_ready() {
        let scheduler = DependencyScheduler::new(base(), 10);
        assert_eq!(scheduler.ready_goals(), BTreeSet::from(["console"]));
    }

    #[test]
    fn test_goals_execute_as_data_arrives() {
        let mut scheduler = DependencyScheduler::new(base(), 10);
        let executed = std::cell::RefCell::new(Vec::new());
        let mut exec = |g: &&'static str| -> Result<bool, ()> {
            executed.borrow_mut().push(*g);
            Ok(*g != "console")
        };

        scheduler.mark_processed("socket");
        scheduler.resolve(&mut exec).unwrap();
        assert!(!executed.borrow().contains(&"validator"));

        scheduler.mark_processed("dimm");
        scheduler.resolve(&mut exec).unwrap();
        assert!(scheduler.is_complete());
        assert_eq!(executed.borrow().iter().filter(|g| **g == "validator").count(), 1);
        assert_eq!(executed.borrow().iter().filter(|g| **g == "send").count(), 1);
    }

    #[test]
    fn test_failed_goal_is_retried() {
        let mut scheduler = DependencyScheduler::new(plan(&[("a", &[]), ("b", &["a"])]), 10);
        let mut attempts = 0;
        scheduler
            .resolve(|g: &&str| -> Result<bool, ()> {
                if *g == "a" {
                    attempts += 1;
                }
                Ok(false)
            })
            .unwrap();
        assert_eq!(attempts, 1);
        scheduler.resolve(|_: &&str| -> Result<bool, ()> { Ok(true) }).unwrap();
        assert!(scheduler.is_complete());
    }

    #[test]
    fn test_unreachable_goals_reported_after_bound() {
        let mut scheduler = DependencyScheduler::new(base(), 3);
        scheduler.mark_processed("socket");
        let mut validator_runs = 0;
        let unresolved = scheduler
            .finalize(|g: &&str| -> Result<bool, ()> {
                if *g == "validator" {
                    validator_runs += 1;
                }
                Ok(false)
            })
            .unwrap();
        assert_eq!(validator_runs, 0);
        assert_eq!(unresolved, vec!["dimm", "send", "validator"]);
        assert_eq!(scheduler.total_passes(), 3);
    }

    #[test]
    fn test_terminal_error_stops_pass() {
        let mut scheduler = DependencyScheduler::new(plan(&[("a", &[]), ("b", &[])]), 10);
        let result = scheduler.resolve_pass(|g: &&str| if *g == "a" { Err("fatal") } else { Ok(true) });
        assert_eq!(result, Err("fatal"));
    }
}
