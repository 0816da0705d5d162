// src/dag/graph.rs

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::descriptor::{CommandDescriptor, DescriptorId};
use crate::errors::{FleetError, Result};

/// Immediate deps and dependents of one descriptor, restricted to the graph.
#[derive(Debug, Clone, Default)]
struct DagNode {
    deps: Vec<DescriptorId>,
    dependents: Vec<DescriptorId>,
}

/// Adjacency of a set of descriptors keyed by identity.
///
/// Dependencies pointing outside the set (descriptors of subsystems deployed
/// earlier) are dropped here and therefore count as satisfied.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: HashMap<DescriptorId, DagNode>,
    /// Insertion order, used wherever iteration order must be stable.
    order: Vec<DescriptorId>,
}

impl DagGraph {
    /// Build and validate the graph.
    ///
    /// Every descriptor needs at least one host, and the in-graph
    /// dependencies must be acyclic.
    pub fn build(descriptors: &[Arc<CommandDescriptor>]) -> Result<Self> {
        let mut nodes: HashMap<DescriptorId, DagNode> = HashMap::new();
        let mut order = Vec::with_capacity(descriptors.len());

        for d in descriptors {
            if d.hosts().is_empty() {
                return Err(FleetError::ConfigError(format!(
                    "command '{}' has no target hosts",
                    d.command()
                )));
            }
            if nodes.insert(d.id(), DagNode::default()).is_none() {
                order.push(d.id());
            }
        }

        for d in descriptors {
            let in_graph: Vec<DescriptorId> = d
                .dependencies()
                .iter()
                .copied()
                .filter(|dep| nodes.contains_key(dep))
                .collect();

            for dep in &in_graph {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(d.id());
                }
            }
            if let Some(node) = nodes.get_mut(&d.id()) {
                node.deps = in_graph;
            }
        }

        let graph = Self { nodes, order };
        graph.check_acyclic(descriptors)?;
        Ok(graph)
    }

    fn check_acyclic(&self, descriptors: &[Arc<CommandDescriptor>]) -> Result<()> {
        // Edge direction: dep -> dependent.
        let mut g: DiGraphMap<DescriptorId, ()> = DiGraphMap::new();
        for id in &self.order {
            g.add_node(*id);
        }
        for id in &self.order {
            for dep in self.dependencies_of(*id) {
                g.add_edge(*dep, *id, ());
            }
        }

        match toposort(&g, None) {
            Ok(_) => Ok(()),
            Err(cycle) => {
                let node = cycle.node_id();
                let command = descriptors
                    .iter()
                    .find(|d| d.id() == node)
                    .map(|d| d.command().to_string())
                    .unwrap_or_else(|| node.to_string());
                Err(FleetError::DependencyCycle(format!(
                    "cycle detected in command graph involving '{command}'"
                )))
            }
        }
    }

    /// All descriptor ids, in insertion order.
    pub fn ids(&self) -> &[DescriptorId] {
        &self.order
    }

    pub fn contains(&self, id: DescriptorId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// In-graph dependencies of a descriptor.
    pub fn dependencies_of(&self, id: DescriptorId) -> &[DescriptorId] {
        self.nodes
            .get(&id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Descriptors that directly depend on this one.
    pub fn dependents_of(&self, id: DescriptorId) -> &[DescriptorId] {
        self.nodes
            .get(&id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Host;

    fn cmd(text: &str) -> CommandDescriptor {
        let mut d = CommandDescriptor::builder().command(text).build().unwrap();
        d.runs_on([Host::new("node1", 22, "deploy")]);
        d
    }

    #[test]
    fn outside_dependencies_are_ignored() {
        let outside = cmd("already deployed");
        let mut a = cmd("a");
        a.depends_on([outside.id()]).unwrap();
        let mut b = cmd("b");
        b.depends_on([a.id()]).unwrap();
        let (a_id, b_id) = (a.id(), b.id());

        let graph = DagGraph::build(&[Arc::new(a), Arc::new(b)]).unwrap();
        assert!(graph.dependencies_of(a_id).is_empty());
        assert_eq!(graph.dependencies_of(b_id), &[a_id]);
        assert_eq!(graph.dependents_of(a_id), &[b_id]);
        assert!(!graph.contains(outside.id()));
        assert_eq!(graph.ids(), &[a_id, b_id]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut a = cmd("a");
        let mut b = cmd("b");
        a.depends_on([b.id()]).unwrap();
        b.depends_on([a.id()]).unwrap();

        let err = DagGraph::build(&[Arc::new(a), Arc::new(b)]).unwrap_err();
        assert!(matches!(err, FleetError::DependencyCycle(_)));
    }

    #[test]
    fn descriptor_without_hosts_is_rejected() {
        let d = CommandDescriptor::builder().command("orphan").build().unwrap();
        let err = DagGraph::build(&[Arc::new(d)]).unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(msg) if msg.contains("orphan")));
    }
}
