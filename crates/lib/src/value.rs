//! Argument values: leaves, containers, and node references.
//!
//! [`Value`] is the domain of the Argument Store. A value is either a leaf
//! (null, bool, number, string), a container (ordered list, insertion-ordered
//! map) whose elements may themselves be values of any kind, or a reference
//! to another node in the owning [`Graph`](crate::graph::Graph).
//!
//! Values are plain data: a `Value::Node` holds a [`NodeId`] handle, never
//! the node itself, so cloning a value copies the reference and both copies
//! keep pointing at the same node. This is what makes sharing work across
//! shallow copies and serialization.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::graph::NodeId;

/// An argument value in a configuration graph.
///
/// Leaves pass through the build engine unchanged; containers are rebuilt
/// element-wise with the same kind, order, and keys; `Node` references are
/// resolved into the referenced node's materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
  /// Absence of a value (distinct from "argument not set").
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  String(String),
  /// Ordered sequence; elements may nest arbitrarily.
  List(Vec<Value>),
  /// Insertion-ordered string-keyed mapping.
  Map(IndexMap<String, Value>),
  /// Reference to a node in the owning graph.
  Node(NodeId),
}

impl Value {
  /// True if this value is a leaf (not a container or node reference).
  pub fn is_leaf(&self) -> bool {
    !matches!(self, Value::List(_) | Value::Map(_) | Value::Node(_))
  }

  pub fn is_node(&self) -> bool {
    matches!(self, Value::Node(_))
  }

  pub fn as_node(&self) -> Option<NodeId> {
    match self {
      Value::Node(id) => Some(*id),
      _ => None,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_float(&self) -> Option<f64> {
    match self {
      Value::Float(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Value]> {
    match self {
      Value::List(items) => Some(items),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
    match self {
      Value::Map(map) => Some(map),
      _ => None,
    }
  }

  /// All node references reachable inside this value, in traversal order.
  ///
  /// A node referenced from several places appears once per reference site.
  pub fn referenced_nodes(&self) -> Vec<NodeId> {
    let mut out = Vec::new();
    self.collect_nodes(&mut out);
    out
  }

  /// Recursively collect node references from nested containers.
  pub(crate) fn collect_nodes(&self, out: &mut Vec<NodeId>) {
    match self {
      Value::Node(id) => out.push(*id),
      Value::List(items) => {
        for item in items {
          item.collect_nodes(out);
        }
      }
      Value::Map(map) => {
        for value in map.values() {
          value.collect_nodes(out);
        }
      }
      Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {}
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => write!(f, "null"),
      Value::Bool(b) => write!(f, "{}", b),
      Value::Int(n) => write!(f, "{}", n),
      Value::Float(n) => write!(f, "{}", n),
      Value::String(s) => write!(f, "{:?}", s),
      Value::List(items) => {
        write!(f, "[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}", item)?;
        }
        write!(f, "]")
      }
      Value::Map(map) => {
        write!(f, "{{")?;
        for (i, (key, value)) in map.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{:?}: {}", key, value)?;
        }
        write!(f, "}}")
      }
      Value::Node(id) => write!(f, "{}", id),
    }
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self {
    Value::Int(n)
  }
}

impl From<i32> for Value {
  fn from(n: i32) -> Self {
    Value::Int(n.into())
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Value::Float(n)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<NodeId> for Value {
  fn from(id: NodeId) -> Self {
    Value::Node(id)
  }
}

impl From<Vec<Value>> for Value {
  fn from(items: Vec<Value>) -> Self {
    Value::List(items)
  }
}

impl From<IndexMap<String, Value>> for Value {
  fn from(map: IndexMap<String, Value>) -> Self {
    Value::Map(map)
  }
}
