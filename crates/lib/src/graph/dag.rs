//! Dependency DAG over the reachable node set.
//!
//! Before materializing anything, the build engine lowers the configuration
//! graph into an explicit dependency DAG: one vertex per reachable node, one
//! edge from each referenced child to its referencing parent. The DAG gives
//! cycle verification (a hard, fail-fast error rather than infinite
//! recursion)
//! and dependency introspection: topological order, direct dependencies and
//! dependents of a node.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::value::Value;

use super::{Graph, NodeId};

/// Errors raised while lowering a configuration graph into a DAG.
#[derive(Debug, Error)]
pub enum DagError {
  /// A node's argument graph eventually references the node itself.
  #[error("dependency cycle detected in configuration graph")]
  CycleDetected,

  /// A referenced handle does not exist in the graph.
  #[error("node not found: {0}")]
  NodeNotFound(NodeId),
}

/// The dependency structure of every node reachable from a build root.
#[derive(Debug)]
pub struct DependencyDag {
  /// The underlying graph; edges run from dependency to dependent.
  graph: DiGraph<NodeId, ()>,

  /// Map from node handle to vertex index.
  indices: HashMap<NodeId, NodeIndex>,
}

impl DependencyDag {
  /// Lower every node reachable from `root` into a dependency DAG.
  ///
  /// # Errors
  ///
  /// - `NodeNotFound` if a reference points outside `config`.
  /// - `CycleDetected` if the reachable subgraph is not acyclic.
  pub fn from_root(config: &Graph, root: &Value) -> Result<Self, DagError> {
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();
    let mut visited = HashSet::new();
    let mut stack = root.referenced_nodes();

    while let Some(id) = stack.pop() {
      if !visited.insert(id) {
        continue;
      }
      let parent = ensure_vertex(&mut graph, &mut indices, id);
      let node = config.node(id).map_err(|_| DagError::NodeNotFound(id))?;

      let mut children = Vec::new();
      for value in node.args().values() {
        value.collect_nodes(&mut children);
      }

      for child in children {
        let child_idx = ensure_vertex(&mut graph, &mut indices, child);
        if graph.find_edge(child_idx, parent).is_none() {
          graph.add_edge(child_idx, parent, ());
        }
        stack.push(child);
      }
    }

    let dag = Self { graph, indices };
    dag.verify_acyclic()?;
    Ok(dag)
  }

  /// Verify that the graph is acyclic.
  fn verify_acyclic(&self) -> Result<(), DagError> {
    toposort(&self.graph, None).map_err(|_| DagError::CycleDetected)?;
    Ok(())
  }

  /// Nodes in dependency order: every node appears after everything it
  /// references, which is the order a bottom-up build materializes them.
  pub fn topological_order(&self) -> Result<Vec<NodeId>, DagError> {
    let sorted = toposort(&self.graph, None).map_err(|_| DagError::CycleDetected)?;
    Ok(sorted.into_iter().map(|idx| self.graph[idx]).collect())
  }

  /// Direct dependencies of `id`: the nodes its arguments reference.
  pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Direct dependents of `id`: the nodes whose arguments reference it.
  pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
    self.neighbors(id, Direction::Outgoing)
  }

  fn neighbors(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
    let Some(&idx) = self.indices.get(&id) else {
      return Vec::new();
    };
    self
      .graph
      .neighbors_directed(idx, direction)
      .map(|neighbor| self.graph[neighbor])
      .collect()
  }

  pub fn contains(&self, id: NodeId) -> bool {
    self.indices.contains_key(&id)
  }

  /// Number of reachable nodes.
  pub fn node_count(&self) -> usize {
    self.graph.node_count()
  }
}

fn ensure_vertex(graph: &mut DiGraph<NodeId, ()>, indices: &mut HashMap<NodeId, NodeIndex>, id: NodeId) -> NodeIndex {
  *indices.entry(id).or_insert_with(|| graph.add_node(id))
}
