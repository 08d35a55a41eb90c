//! Phase dependency graph for a workflow.
//!
//! The `WorkflowGraph` holds validated phases as nodes of a petgraph
//! `DiGraph`. An edge `a -> b` means phase `b` depends on phase `a`.
//! It is produced once by the loader and is immutable during a run.

use crate::core::task::{AgentId, TaskSpec};
use crate::error::DefinitionError;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// A validated phase: its tasks in declared order plus scheduling flags.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    pub name: String,
    /// Tasks may run concurrently when set; otherwise strictly in order.
    pub parallel: bool,
    pub depends_on: Vec<String>,
    pub tasks: Vec<TaskSpec>,
}

impl PhaseSpec {
    /// Position of an agent within this phase's declared task list.
    pub fn position(&self, agent_id: &AgentId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.agent_id == agent_id)
    }
}

/// The validated phase dependency graph.
pub struct WorkflowGraph {
    name: String,
    graph: DiGraph<PhaseSpec, ()>,
    /// Phase name to node, for fast lookups.
    phase_index: HashMap<String, NodeIndex>,
    /// Agent to owning phase node.
    agent_index: HashMap<AgentId, NodeIndex>,
    /// Nodes in declared order.
    declared: Vec<NodeIndex>,
}

impl WorkflowGraph {
    /// Create an empty graph for the named workflow.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            graph: DiGraph::new(),
            phase_index: HashMap::new(),
            agent_index: HashMap::new(),
            declared: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a phase and register its agents.
    ///
    /// # Errors
    /// Fails if the phase name is taken or one of its agents already
    /// belongs to another phase.
    pub fn add_phase(&mut self, phase: PhaseSpec) -> Result<NodeIndex, DefinitionError> {
        if self.phase_index.contains_key(&phase.name) {
            return Err(DefinitionError::DuplicatePhase(phase.name));
        }

        let mut seen = HashSet::new();
        for task in &phase.tasks {
            if let Some(&other) = self.agent_index.get(&task.agent_id) {
                return Err(DefinitionError::DuplicateAgent {
                    agent: task.agent_id.to_string(),
                    first: self.graph[other].name.clone(),
                    second: phase.name.clone(),
                });
            }
            if !seen.insert(task.agent_id.clone()) {
                return Err(DefinitionError::DuplicateAgent {
                    agent: task.agent_id.to_string(),
                    first: phase.name.clone(),
                    second: phase.name.clone(),
                });
            }
        }

        let name = phase.name.clone();
        let agents: Vec<AgentId> = phase.tasks.iter().map(|t| t.agent_id.clone()).collect();
        let index = self.graph.add_node(phase);
        self.phase_index.insert(name, index);
        for agent in agents {
            self.agent_index.insert(agent, index);
        }
        self.declared.push(index);
        Ok(index)
    }

    /// Record that `phase` depends on `dependency`.
    pub fn add_dependency(&mut self, dependency: &str, phase: &str) -> Result<(), DefinitionError> {
        let to = *self
            .phase_index
            .get(phase)
            .ok_or_else(|| DefinitionError::Malformed(format!("unknown phase {}", phase)))?;
        let from = *self
            .phase_index
            .get(dependency)
            .ok_or_else(|| DefinitionError::UnknownPhase {
                phase: phase.to_string(),
                missing: dependency.to_string(),
            })?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Phase names in an order where every phase follows its dependencies.
    ///
    /// # Errors
    /// Returns `DefinitionError::Cycle` naming a phase on the cycle.
    pub fn topological_order(&self) -> Result<Vec<&str>, DefinitionError> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let phase = self
                .graph
                .node_weight(cycle.node_id())
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "unknown".to_string());
            DefinitionError::Cycle(phase)
        })?;
        Ok(sorted
            .into_iter()
            .map(|index| self.graph[index].name.as_str())
            .collect())
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseSpec> {
        self.phase_index.get(name).map(|&index| &self.graph[index])
    }

    /// All phases in declared order.
    pub fn phases(&self) -> impl Iterator<Item = &PhaseSpec> {
        self.declared.iter().map(move |&index| &self.graph[index])
    }

    /// All tasks in declared phase order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.phases().flat_map(|phase| phase.tasks.iter())
    }

    pub fn task(&self, agent_id: &AgentId) -> Option<&TaskSpec> {
        let phase = self.phase_of(agent_id)?;
        phase.tasks.iter().find(|t| &t.agent_id == agent_id)
    }

    /// The phase that owns `agent_id`.
    pub fn phase_of(&self, agent_id: &AgentId) -> Option<&PhaseSpec> {
        self.agent_index.get(agent_id).map(|&index| &self.graph[index])
    }

    /// Direct dependencies of a phase.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Phases that directly depend on `name`.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        match self.phase_index.get(name) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, direction)
                .map(|n| self.graph[n].name.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every phase reachable downstream of `name`, excluding itself.
    pub fn downstream_of(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.phase_index.get(name) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut out = Vec::new();
        while let Some(node) = bfs.next(&self.graph) {
            if node != start {
                out.push(self.graph[node].name.as_str());
            }
        }
        out
    }

    /// Whether `upstream` must complete before `downstream` can start.
    pub fn precedes(&self, upstream: &str, downstream: &str) -> bool {
        match (self.phase_index.get(upstream), self.phase_index.get(downstream)) {
            (Some(&a), Some(&b)) if a != b => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    /// Phases whose dependencies are all in `completed` and that are not
    /// themselves completed.
    pub fn ready_phases<'a>(&'a self, completed: &HashSet<String>) -> Vec<&'a PhaseSpec> {
        self.phases()
            .filter(|phase| !completed.contains(&phase.name))
            .filter(|phase| {
                self.dependencies(&phase.name)
                    .iter()
                    .all(|dep| completed.contains(*dep))
            })
            .collect()
    }

    pub fn phase_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn task_count(&self) -> usize {
        self.agent_index.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("name", &self.name)
            .field("phases", &self.phase_count())
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
