//! State graph export.
//!
//! Builds a `petgraph` directed graph over one [`StateMachine`] (nested Map
//! processors and Parallel branches are not expanded) for Graphviz rendering
//! and reachability checks.

use std::collections::HashMap;

use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::machine::StateMachine;
use super::states::EdgeKind;

/// State graph with `Name (Type)` node labels and transition edge labels.
pub struct StateGraph {
    graph: DiGraph<String, String>,
    index: HashMap<String, NodeIndex>,
    start: Option<NodeIndex>,
}

impl StateGraph {
    pub fn build(machine: &StateMachine) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for state in machine.states() {
            let node = graph.add_node(format!("{} ({})", state.name, state.type_name()));
            index.insert(state.name.clone(), node);
        }

        for state in machine.states() {
            let Some(&from) = index.get(&state.name) else {
                continue;
            };
            for edge in state.edges() {
                let Some(&to) = index.get(&edge.target) else {
                    continue;
                };
                let label = match edge.kind {
                    EdgeKind::Next => String::new(),
                    EdgeKind::Default => "Default".to_string(),
                    EdgeKind::Choice => edge.label.unwrap_or_default(),
                    EdgeKind::Catch => format!("Catch [{}]", edge.label.unwrap_or_default()),
                };
                graph.add_edge(from, to, label);
            }
        }

        let start = index.get(machine.start_at()).copied();
        Self { graph, index, start }
    }

    /// Render as Graphviz DOT.
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::new(&self.graph))
    }

    /// States no path from `StartAt` reaches, sorted by name.
    pub fn unreachable(&self) -> Vec<String> {
        let Some(start) = self.start else {
            return Vec::new();
        };
        let mut seen = vec![false; self.graph.node_count()];
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            seen[node.index()] = true;
        }
        let mut names: Vec<String> = self
            .index
            .iter()
            .filter(|(_, node)| !seen[node.index()])
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Render `machine` as Graphviz DOT.
pub fn to_dot(machine: &StateMachine) -> String {
    StateGraph::build(machine).to_dot()
}

/// States that can never run.
pub fn unreachable_states(machine: &StateMachine) -> Vec<String> {
    StateGraph::build(machine).unreachable()
}
