//! Shallow and deep copies of configuration nodes.
//!
//! Shallow copy gives a new top-level node whose argument store is
//! independent, while nested node references stay shared with the original.
//! Deep copy clones the whole reachable subgraph through an identity memo,
//! so internal sharing is preserved but nothing is shared with the source.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::value::Value;

use super::{ConfigError, Graph, Node, NodeId};

impl Graph {
  /// Copy a node, sharing its nested nodes with the original.
  ///
  /// The copy gets its own argument store: setting or unsetting arguments on
  /// the copy does not affect the original. Values are copied by reference,
  /// so node references inside the store still point at the same shared
  /// sub-nodes; mutating one of those is visible through both graphs.
  pub fn shallow_copy(&mut self, id: NodeId) -> Result<NodeId, ConfigError> {
    let node = self.node(id)?.clone();
    let copy = self.insert_node(node);
    debug!(source = %id, copy = %copy, "shallow-copied node");
    Ok(copy)
  }

  /// Clone every node reachable from `id`.
  ///
  /// An identity memo maps each original node to its single clone, so a node
  /// reachable through multiple paths becomes one clone referenced through
  /// the same paths: the sharing topology is preserved, but no node is
  /// shared with the original graph. The memo is seeded before descending
  /// into a node's arguments, so even a cyclic graph copies without
  /// diverging.
  pub fn deep_copy(&mut self, id: NodeId) -> Result<NodeId, ConfigError> {
    let mut memo = HashMap::new();
    let copy = self.deep_copy_node(id, &mut memo)?;
    debug!(source = %id, copy = %copy, cloned = memo.len(), "deep-copied node");
    Ok(copy)
  }

  fn deep_copy_node(&mut self, id: NodeId, memo: &mut HashMap<NodeId, NodeId>) -> Result<NodeId, ConfigError> {
    if let Some(&existing) = memo.get(&id) {
      return Ok(existing);
    }

    let source = self.node(id)?.clone();

    // Insert the clone with an empty store first and memoize it, so that
    // back-references to `id` inside the subtree resolve to this clone.
    let copy = self.insert_node(Node {
      target: source.target.clone(),
      kind: source.kind,
      args: IndexMap::new(),
    });
    memo.insert(id, copy);

    let mut args = IndexMap::with_capacity(source.args.len());
    for (name, value) in source.args {
      args.insert(name, self.deep_copy_value(value, memo)?);
    }
    self.replace_args(copy, args);
    Ok(copy)
  }

  fn deep_copy_value(&mut self, value: Value, memo: &mut HashMap<NodeId, NodeId>) -> Result<Value, ConfigError> {
    match value {
      Value::Node(id) => Ok(Value::Node(self.deep_copy_node(id, memo)?)),
      Value::List(items) => {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
          out.push(self.deep_copy_value(item, memo)?);
        }
        Ok(Value::List(out))
      }
      Value::Map(map) => {
        let mut out = IndexMap::with_capacity(map.len());
        for (key, item) in map {
          out.insert(key, self.deep_copy_value(item, memo)?);
        }
        Ok(Value::Map(out))
      }
      leaf => Ok(leaf),
    }
  }
}
