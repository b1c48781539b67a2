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

//! Testplan graph construction

use super::goal::GoalId;
use crate::error::{BsdmError, BsdmResult};
use crate::processors::ProcessorKind;
use petgraph::Directed;
use petgraph::algo::toposort;
use petgraph::graph::{Graph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Goal to prerequisite set
pub type Testplan = BTreeMap<GoalId, BTreeSet<GoalId>>;

type CheckGraph = Graph<GoalId, (), Directed>;

/// Utility for building testplans
#[derive(Default)]
pub struct GoalGraphBuilder {
    graph: CheckGraph,
    indices: HashMap<GoalId, NodeIndex>,
    plan: Testplan,
}

impl GoalGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded with the goals every run carries
    pub fn with_base_goals() -> Self {
        let mut builder = Self::new();
        for kind in [ProcessorKind::ChassisInfo, ProcessorKind::SocketTable, ProcessorKind::DimmTable] {
            builder.add_goal(GoalId::Process(kind), [GoalId::ConsoleData]);
        }
        builder.add_goal(
            GoalId::RamConfValidator,
            [GoalId::Process(ProcessorKind::SocketTable), GoalId::Process(ProcessorKind::DimmTable)],
        );
        builder
    }

    fn add_node(&mut self, goal: GoalId) -> NodeIndex {
        if let Some(&idx) = self.indices.get(&goal) {
            return idx;
        }
        let idx = self.graph.add_node(goal);
        self.indices.insert(goal, idx);
        idx
    }

    /// Declare `goal` with its prerequisites, merging with earlier declarations
    pub fn add_goal(&mut self, goal: GoalId, prerequisites: impl IntoIterator<Item = GoalId>) -> &mut Self {
        let to = self.add_node(goal);
        let deps = self.plan.entry(goal).or_default();
        let prerequisites: Vec<GoalId> = prerequisites.into_iter().collect();
        deps.extend(prerequisites.iter().copied());
        for dep in prerequisites {
            let from = self.add_node(dep);
            self.graph.update_edge(from, to, ());
        }
        self
    }

    /// Merge a whole plan, e.g. one contributed by an engine
    pub fn extend(&mut self, plan: Testplan) -> &mut Self {
        for (goal, deps) in plan {
            self.add_goal(goal, deps);
        }
        self
    }

    /// Finalize, rejecting plans with a dependency cycle
    pub fn build(self) -> BsdmResult<Testplan> {
        toposort(&self.graph, None)
            .map_err(|cycle| BsdmError::Scheduler(format!("dependency cycle through goal '{}'", self.graph[cycle.node_id()])))?;
        Ok(self.plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::goal::{EngineKind, EngineStage};

    #[test]
    fn test_base_goals() {
        let plan = GoalGraphBuilder::with_base_goals().build().unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(
            plan[&GoalId::RamConfValidator],
            BTreeSet::from([GoalId::Process(ProcessorKind::SocketTable), GoalId::Process(ProcessorKind::DimmTable)])
        );
        assert!(!plan.contains_key(&GoalId::ConsoleData));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let a = GoalId::engine(EngineKind::Rmt, EngineStage::Reduce);
        let b = GoalId::engine(EngineKind::Rmt, EngineStage::Qualification);
        let mut builder = GoalGraphBuilder::new();
        builder.add_goal(a, [b]).add_goal(b, [a]);
        let err = builder.build().unwrap_err();
        assert!(matches!(err, BsdmError::Scheduler(_)));
    }

    #[test]
    fn test_declarations_merge() {
        let goal = GoalId::engine(EngineKind::Step, EngineStage::Qualification);
        let mut builder = GoalGraphBuilder::new();
        builder.add_goal(goal, [GoalId::RamConfValidator]);
        builder.add_goal(goal, [GoalId::engine(EngineKind::Step, EngineStage::Reduce)]);
        let plan = builder.build().unwrap();
        assert_eq!(plan[&goal].len(), 2);
    }
}
