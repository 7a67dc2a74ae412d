//! The configuration graph: an arena of buildable nodes.
//!
//! A [`Node`] records a deferred call ("invoke this target with these
//! arguments") without performing it. Nodes live in a [`Graph`] arena and
//! are addressed by [`NodeId`] handles, so sharing is explicit: storing the
//! same handle in two argument stores means both sites resolve to the same
//! node, and the build engine materializes it exactly once per build.
//!
//! The argument store of each node is validated against its target's
//! signature: setting a name the target does not accept fails immediately,
//! and binding more positional values than the target declares parameters is
//! rejected at construction (variadic positional arguments are not
//! supported).

mod copy;
pub mod dag;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::target::Target;
use crate::value::Value;

/// Handle identifying one node in a [`Graph`].
///
/// Identity is distinct from contents: two structurally identical nodes have
/// different ids, and mutating a node never changes its id. Nodes themselves
/// are mutable and therefore deliberately unhashable; use the id as a map
/// key where node identity is the right notion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
  pub fn from_u64(id: u64) -> Self {
    Self(id)
  }

  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// How a node materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
  /// Invoke the target with the resolved arguments.
  Full,
  /// Produce a partially-applied callable bound to the resolved arguments,
  /// invocable later with the remaining parameters.
  Deferred,
}

/// Errors raised while constructing or editing nodes.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The name is not a parameter of the node's target.
  #[error("unknown parameter '{name}' (valid: {})", .valid.join(", "))]
  UnknownParameter { name: String, valid: Vec<String> },

  /// More positional values than the target declares parameters.
  #[error("{given} positional arguments given, but the target declares only {declared} parameters (variadic positional arguments are not supported)")]
  UnsupportedPositional { given: usize, declared: usize },

  /// The same parameter bound both positionally and by keyword.
  #[error("parameter '{name}' bound more than once")]
  DuplicateArgument { name: String },

  /// The handle does not refer to a node in this graph.
  #[error("node not found: {0}")]
  NodeNotFound(NodeId),
}

/// A buildable node: a target plus its argument store.
#[derive(Debug, Clone)]
pub struct Node {
  target: Arc<Target>,
  kind: CallKind,
  args: IndexMap<String, Value>,
}

impl Node {
  pub fn target(&self) -> &Arc<Target> {
    &self.target
  }

  pub fn kind(&self) -> CallKind {
    self.kind
  }

  /// The argument store: explicit overrides in insertion order.
  pub fn args(&self) -> &IndexMap<String, Value> {
    &self.args
  }

  /// The explicit value set for `name`, if any. Does not consult defaults.
  pub fn arg(&self, name: &str) -> Option<&Value> {
    self.args.get(name)
  }
}

/// ID allocator for nodes.
#[derive(Debug, Default)]
struct IdAllocator {
  next: u64,
}

impl IdAllocator {
  fn alloc(&mut self) -> NodeId {
    self.next += 1;
    NodeId(self.next)
  }
}

/// An arena of buildable nodes.
///
/// All node handles are scoped to the graph that created them. The build
/// engine reads the graph without mutating it; all edits go through the
/// validated operations here.
#[derive(Debug, Default)]
pub struct Graph {
  nodes: HashMap<NodeId, Node>,
  id_alloc: IdAllocator,
}

impl Graph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a node for a call to `target`.
  ///
  /// Positional values bind to the target's declared parameter names in
  /// order; keyword values bind by name. Keyword names must be accepted by
  /// the target's signature.
  ///
  /// # Errors
  ///
  /// - `UnsupportedPositional` if more positional values are supplied than
  ///   the target declares parameters.
  /// - `UnknownParameter` if a keyword name is not accepted by the target.
  /// - `DuplicateArgument` if a keyword rebinds a positionally bound name.
  pub fn make(
    &mut self,
    kind: CallKind,
    target: Arc<Target>,
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
  ) -> Result<NodeId, ConfigError> {
    let signature = target.signature();

    if positional.len() > signature.params().len() {
      return Err(ConfigError::UnsupportedPositional {
        given: positional.len(),
        declared: signature.params().len(),
      });
    }

    let mut args = IndexMap::new();
    for (value, param) in positional.into_iter().zip(signature.params()) {
      args.insert(param.name.clone(), value);
    }

    for (name, value) in keyword {
      if args.contains_key(&name) {
        return Err(ConfigError::DuplicateArgument { name });
      }
      if !signature.accepts(&name) {
        return Err(ConfigError::UnknownParameter {
          name,
          valid: signature.param_names(),
        });
      }
      args.insert(name, value);
    }

    let id = self.id_alloc.alloc();
    debug!(node = %id, target = target.name(), ?kind, "created node");
    self.nodes.insert(id, Node { target, kind, args });
    Ok(id)
  }

  /// Create a node that materializes by invoking its target.
  pub fn full_call(
    &mut self,
    target: Arc<Target>,
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
  ) -> Result<NodeId, ConfigError> {
    self.make(CallKind::Full, target, positional, keyword)
  }

  /// Create a node that materializes into a partially-applied callable.
  pub fn deferred_call(
    &mut self,
    target: Arc<Target>,
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
  ) -> Result<NodeId, ConfigError> {
    self.make(CallKind::Deferred, target, positional, keyword)
  }

  /// Get a node by handle.
  pub fn node(&self, id: NodeId) -> Result<&Node, ConfigError> {
    self.nodes.get(&id).ok_or(ConfigError::NodeNotFound(id))
  }

  fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, ConfigError> {
    self.nodes.get_mut(&id).ok_or(ConfigError::NodeNotFound(id))
  }

  /// The explicit value of argument `name` on node `id`, or `None` if the
  /// argument is not set.
  ///
  /// # Errors
  ///
  /// `UnknownParameter` if the target does not accept `name`.
  pub fn get(&self, id: NodeId, name: &str) -> Result<Option<&Value>, ConfigError> {
    let node = self.node(id)?;
    if !node.target.signature().accepts(name) {
      return Err(ConfigError::UnknownParameter {
        name: name.to_string(),
        valid: node.target.signature().param_names(),
      });
    }
    Ok(node.args.get(name))
  }

  /// Set argument `name` on node `id`.
  ///
  /// Overwriting an existing argument keeps its position in the store;
  /// setting a new one appends it.
  ///
  /// # Errors
  ///
  /// `UnknownParameter` if the target does not accept `name`.
  pub fn set(&mut self, id: NodeId, name: impl Into<String>, value: impl Into<Value>) -> Result<(), ConfigError> {
    let name = name.into();
    let node = self.node_mut(id)?;
    if !node.target.signature().accepts(&name) {
      return Err(ConfigError::UnknownParameter {
        name,
        valid: node.target.signature().param_names(),
      });
    }
    trace!(node = %id, arg = %name, "set argument");
    node.args.insert(name, value.into());
    Ok(())
  }

  /// Remove the explicit override for `name`, reverting the argument to the
  /// target's declared default if any. Returns the removed value.
  ///
  /// # Errors
  ///
  /// `UnknownParameter` if the target does not accept `name`.
  pub fn unset(&mut self, id: NodeId, name: &str) -> Result<Option<Value>, ConfigError> {
    let node = self.node_mut(id)?;
    if !node.target.signature().accepts(name) {
      return Err(ConfigError::UnknownParameter {
        name: name.to_string(),
        valid: node.target.signature().param_names(),
      });
    }
    trace!(node = %id, arg = name, "unset argument");
    Ok(node.args.shift_remove(name))
  }

  /// The declared default for parameter `name`, visible after `unset`.
  ///
  /// # Errors
  ///
  /// `UnknownParameter` if `name` is not a declared parameter (extra
  /// keyword names have no defaults).
  pub fn default_of(&self, id: NodeId, name: &str) -> Result<Option<&Value>, ConfigError> {
    let node = self.node(id)?;
    match node.target.signature().param(name) {
      Some(param) => Ok(param.default.as_ref()),
      None => Err(ConfigError::UnknownParameter {
        name: name.to_string(),
        valid: node.target.signature().param_names(),
      }),
    }
  }

  pub fn contains(&self, id: NodeId) -> bool {
    self.nodes.contains_key(&id)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// All node handles in the arena (unordered).
  pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
    self.nodes.keys().copied()
  }

  pub(crate) fn insert_node(&mut self, node: Node) -> NodeId {
    let id = self.id_alloc.alloc();
    self.nodes.insert(id, node);
    id
  }

  pub(crate) fn replace_args(&mut self, id: NodeId, args: IndexMap<String, Value>) {
    if let Some(node) = self.nodes.get_mut(&id) {
      node.args = args;
    }
  }

  /// Structural equality of two nodes: same target (by identity), same call
  /// kind, and recursively equal arguments. Key order in argument stores is
  /// not significant.
  ///
  /// This is equality of specifications, not of what they would build. It is
  /// also distinct from node identity: two separately constructed but
  /// identical nodes compare equal while remaining different nodes.
  pub fn nodes_eq(&self, a: NodeId, b: NodeId) -> Result<bool, ConfigError> {
    let mut seen = HashSet::new();
    self.nodes_eq_inner(a, b, &mut seen)
  }

  fn nodes_eq_inner(&self, a: NodeId, b: NodeId, seen: &mut HashSet<(NodeId, NodeId)>) -> Result<bool, ConfigError> {
    if a == b {
      return Ok(true);
    }
    // A revisited pair is already being compared further up the stack;
    // treat it as equal there and let that frame decide.
    if !seen.insert((a, b)) {
      return Ok(true);
    }

    let node_a = self.node(a)?;
    let node_b = self.node(b)?;

    if !Arc::ptr_eq(&node_a.target, &node_b.target)
      || node_a.kind != node_b.kind
      || node_a.args.len() != node_b.args.len()
    {
      return Ok(false);
    }

    for (name, value_a) in &node_a.args {
      let Some(value_b) = node_b.args.get(name) else {
        return Ok(false);
      };
      if !self.values_eq(value_a, value_b, seen)? {
        return Ok(false);
      }
    }
    Ok(true)
  }

  fn values_eq(&self, a: &Value, b: &Value, seen: &mut HashSet<(NodeId, NodeId)>) -> Result<bool, ConfigError> {
    match (a, b) {
      (Value::Node(a), Value::Node(b)) => self.nodes_eq_inner(*a, *b, seen),
      (Value::List(xs), Value::List(ys)) => {
        if xs.len() != ys.len() {
          return Ok(false);
        }
        for (x, y) in xs.iter().zip(ys) {
          if !self.values_eq(x, y, seen)? {
            return Ok(false);
          }
        }
        Ok(true)
      }
      (Value::Map(xs), Value::Map(ys)) => {
        if xs.len() != ys.len() {
          return Ok(false);
        }
        for (key, x) in xs {
          let Some(y) = ys.get(key) else {
            return Ok(false);
          };
          if !self.values_eq(x, y, seen)? {
            return Ok(false);
          }
        }
        Ok(true)
      }
      // Leaf-to-leaf (or mismatched shapes): plain value equality. Node
      // references never reach here because both-node is handled above and
      // a node never equals a non-node.
      _ => Ok(a == b),
    }
  }
}
