//! Serializable snapshots of a configuration graph.
//!
//! A [`GraphSnapshot`] is the serialization boundary: a plain-data view of a
//! graph exposing each node's target name, call kind, arguments, and
//! identity. Node references serialize as identities, so a node referenced
//! from two places occurs once in the snapshot and twice by id, so an
//! external encoder round-trips sharing for free. The encoding format (JSON,
//! binary, whatever serde feeds) stays outside the core.
//!
//! Restoring goes through a [`TargetRegistry`]: target names are mapped back
//! to live targets and every argument is re-validated against the target's
//! signature.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::graph::{CallKind, ConfigError, Graph, NodeId};
use crate::target::TargetRegistry;
use crate::value::Value;

/// Errors raised while restoring a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
  /// The registry has no target under this name.
  #[error("unknown target '{0}'")]
  UnknownTarget(String),

  /// An argument references a node id missing from the snapshot.
  #[error("snapshot references missing node #{0}")]
  DanglingNode(u64),

  /// A restored argument failed signature validation.
  #[error(transparent)]
  Config(#[from] ConfigError),
}

/// One node, as plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
  /// The target's registered name.
  pub target: String,
  pub kind: CallKind,
  /// The argument store; `Value::Node` entries hold snapshot-scoped ids.
  pub args: IndexMap<String, Value>,
}

/// A whole graph, as plain data keyed by node identity.
///
/// Keys are ordered so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
  pub nodes: BTreeMap<u64, NodeSnapshot>,
}

impl Graph {
  /// Export every node as plain data.
  pub fn snapshot(&self) -> GraphSnapshot {
    let mut nodes = BTreeMap::new();
    for id in self.node_ids() {
      // node_ids() only yields live handles, so the lookup cannot fail
      let Ok(node) = self.node(id) else { continue };
      nodes.insert(
        id.as_u64(),
        NodeSnapshot {
          target: node.target().name().to_string(),
          kind: node.kind(),
          args: node.args().clone(),
        },
      );
    }
    GraphSnapshot { nodes }
  }
}

impl GraphSnapshot {
  /// Rebuild a graph from this snapshot.
  ///
  /// Returns the new graph plus the mapping from snapshot ids to restored
  /// handles. Sharing is preserved: every occurrence of a snapshot id maps
  /// to the same restored node.
  ///
  /// # Errors
  ///
  /// - `UnknownTarget` if a node names a target the registry lacks.
  /// - `DanglingNode` if an argument references an id with no snapshot.
  /// - `Config` if a restored argument fails signature validation.
  pub fn restore(&self, registry: &TargetRegistry) -> Result<(Graph, HashMap<u64, NodeId>), SnapshotError> {
    let mut graph = Graph::new();
    let mut ids = HashMap::new();

    // First pass: create every node empty, so references can be remapped
    // regardless of declaration order.
    for (&old_id, snapshot) in &self.nodes {
      let target = registry
        .get(&snapshot.target)
        .ok_or_else(|| SnapshotError::UnknownTarget(snapshot.target.clone()))?;
      let id = graph.make(snapshot.kind, target, Vec::new(), Vec::new())?;
      ids.insert(old_id, id);
    }

    // Second pass: restore arguments with node references remapped, going
    // through `set` so each value re-validates against the signature.
    for (&old_id, snapshot) in &self.nodes {
      let id = ids[&old_id];
      for (name, value) in &snapshot.args {
        let remapped = remap(value, &ids)?;
        graph.set(id, name.clone(), remapped)?;
      }
    }

    debug!(nodes = ids.len(), "restored graph from snapshot");
    Ok((graph, ids))
  }
}

/// Rewrite snapshot-scoped node ids into restored handles.
fn remap(value: &Value, ids: &HashMap<u64, NodeId>) -> Result<Value, SnapshotError> {
  match value {
    Value::Node(old) => ids
      .get(&old.as_u64())
      .copied()
      .map(Value::Node)
      .ok_or(SnapshotError::DanglingNode(old.as_u64())),
    Value::List(items) => {
      let mut out = Vec::with_capacity(items.len());
      for item in items {
        out.push(remap(item, ids)?);
      }
      Ok(Value::List(out))
    }
    Value::Map(map) => {
      let mut out = IndexMap::with_capacity(map.len());
      for (key, item) in map {
        out.insert(key.clone(), remap(item, ids)?);
      }
      Ok(Value::Map(out))
    }
    leaf => Ok(leaf.clone()),
  }
}
