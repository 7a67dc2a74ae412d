//! Types for graph materialization.
//!
//! This module defines the result domain of a build ([`Built`],
//! [`BuiltObject`]), the resolved-argument view handed to invoke closures
//! ([`CallArgs`]), the partially-applied callable a deferred node produces
//! ([`Deferred`]), and the build error type.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::graph::NodeId;
use crate::path::Path;
use crate::target::Target;
use crate::value::Value;

/// A materialized value: the output shape of a build.
///
/// Mirrors the input [`Value`] shape (leaves pass through, containers are
/// rebuilt element-wise) with node references replaced by what their
/// targets produced.
#[derive(Debug, Clone)]
pub enum Built {
  /// A leaf value passed through unchanged.
  Value(Value),
  /// A rebuilt sequence, same order as the source.
  List(Vec<Built>),
  /// A rebuilt mapping, same keys and insertion order as the source.
  Map(IndexMap<String, Built>),
  /// An object produced by a target invocation.
  Object(BuiltObject),
  /// The partially-applied callable a deferred node materializes into.
  Deferred(Deferred),
}

impl Built {
  pub fn as_value(&self) -> Option<&Value> {
    match self {
      Built::Value(value) => Some(value),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Built]> {
    match self {
      Built::List(items) => Some(items),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&IndexMap<String, Built>> {
    match self {
      Built::Map(map) => Some(map),
      _ => None,
    }
  }

  pub fn as_object(&self) -> Option<&BuiltObject> {
    match self {
      Built::Object(object) => Some(object),
      _ => None,
    }
  }

  pub fn as_deferred(&self) -> Option<&Deferred> {
    match self {
      Built::Deferred(deferred) => Some(deferred),
      _ => None,
    }
  }

  /// Downcast an object result to its concrete type.
  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.as_object().and_then(|object| object.downcast_ref())
  }
}

impl fmt::Display for Built {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Built::Value(value) => write!(f, "{}", value),
      Built::List(items) => write!(f, "list({})", items.len()),
      Built::Map(map) => write!(f, "map({})", map.len()),
      Built::Object(object) => write!(f, "{}", object),
      Built::Deferred(deferred) => write!(f, "deferred {}", deferred.target_name()),
    }
  }
}

/// An object produced by a target invocation.
///
/// The payload is shared behind an `Arc`, so clones of a `BuiltObject` are
/// the *same* object: the identity memo hands the same `BuiltObject` to
/// every reference site of a shared node, observable via [`ptr_eq`].
///
/// [`ptr_eq`]: BuiltObject::ptr_eq
#[derive(Clone)]
pub struct BuiltObject {
  label: String,
  value: Arc<dyn Any + Send + Sync>,
}

impl BuiltObject {
  /// Wrap a concrete value under a display label (conventionally the
  /// target name).
  pub fn new<T: Any + Send + Sync>(label: impl Into<String>, value: T) -> Self {
    Self {
      label: label.into(),
      value: Arc::new(value),
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    (*self.value).downcast_ref()
  }

  /// Identity equality: do both handles refer to the same object?
  pub fn ptr_eq(&self, other: &BuiltObject) -> bool {
    Arc::ptr_eq(&self.value, &other.value)
  }
}

impl fmt::Debug for BuiltObject {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<{}>", self.label)
  }
}

impl fmt::Display for BuiltObject {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<{}>", self.label)
  }
}

/// An argument required by an invoke closure was not supplied.
///
/// Returned by [`CallArgs::require`]; converts into the boxed error an
/// invoke closure propagates.
#[derive(Debug, Error)]
#[error("missing argument '{0}'")]
pub struct MissingArg(pub String);

/// The fully resolved arguments handed to a target's invoke closure.
///
/// Explicit arguments appear in argument-store order, followed by declared
/// defaults for parameters that were left unset.
#[derive(Debug, Clone)]
pub struct CallArgs {
  values: IndexMap<String, Built>,
}

impl CallArgs {
  pub(crate) fn new(values: IndexMap<String, Built>) -> Self {
    Self { values }
  }

  pub fn get(&self, name: &str) -> Option<&Built> {
    self.values.get(name)
  }

  /// Get an argument, failing with [`MissingArg`] if absent.
  pub fn require(&self, name: &str) -> Result<&Built, MissingArg> {
    self.values.get(name).ok_or_else(|| MissingArg(name.to_string()))
  }

  pub fn contains(&self, name: &str) -> bool {
    self.values.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Built)> {
    self.values.iter().map(|(name, value)| (name.as_str(), value))
  }

  /// One-line rendering of the arguments, used in build error messages.
  pub fn summary(&self) -> String {
    let parts: Vec<String> = self
      .values
      .iter()
      .map(|(name, value)| format!("{}={}", name, value))
      .collect();
    parts.join(", ")
  }
}

/// A partially-applied callable: the product of a deferred node.
///
/// Holds the target and the arguments resolved at build time; [`call`]
/// supplies the remaining parameters and performs the invocation. The bound
/// arguments are shared behind an `Arc`, so every reference site of a shared
/// deferred node sees the same binding.
///
/// [`call`]: Deferred::call
#[derive(Clone)]
pub struct Deferred {
  target: Arc<Target>,
  bound: Arc<IndexMap<String, Built>>,
}

impl Deferred {
  pub(crate) fn new(target: Arc<Target>, bound: IndexMap<String, Built>) -> Self {
    Self {
      target,
      bound: Arc::new(bound),
    }
  }

  pub fn target_name(&self) -> &str {
    self.target.name()
  }

  /// The arguments bound at build time.
  pub fn bound(&self) -> &IndexMap<String, Built> {
    &self.bound
  }

  /// Identity equality: do both handles share one binding?
  pub fn ptr_eq(&self, other: &Deferred) -> bool {
    Arc::ptr_eq(&self.bound, &other.bound)
  }

  /// Invoke the target with the bound arguments plus `extra`.
  ///
  /// Extra arguments override bound ones of the same name; parameters still
  /// unset afterwards fall back to declared defaults.
  ///
  /// # Errors
  ///
  /// - `UnknownArgument` if an extra name is not accepted by the target.
  /// - `MissingArgument` if a required parameter is still unset.
  /// - `Invocation` if the target itself fails.
  pub fn call(&self, extra: Vec<(String, Built)>) -> Result<Built, BuildError> {
    let signature = self.target.signature();
    let mut values = (*self.bound).clone();

    for (name, value) in extra {
      if !signature.accepts(&name) {
        return Err(BuildError::UnknownArgument {
          target: self.target.name().to_string(),
          name,
          valid: signature.param_names(),
        });
      }
      values.insert(name, value);
    }

    complete_and_invoke(&self.target, values, Path::new())
  }
}

impl fmt::Debug for Deferred {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Deferred")
      .field("target", &self.target.name())
      .field("bound", &self.bound.keys().collect::<Vec<_>>())
      .finish()
  }
}

/// Fill declared defaults, check required parameters, and invoke `target`.
///
/// Shared by the build engine (full-call nodes) and [`Deferred::call`];
/// `path` is the build-root-relative location used for error annotation
/// (empty outside a build).
pub(crate) fn complete_and_invoke(
  target: &Arc<Target>,
  mut values: IndexMap<String, Built>,
  path: Path,
) -> Result<Built, BuildError> {
  for param in target.signature().params() {
    if values.contains_key(&param.name) {
      continue;
    }
    match &param.default {
      // Declared defaults pass through as leaf values, unresolved.
      Some(default) => {
        values.insert(param.name.clone(), Built::Value(default.clone()));
      }
      None => {
        return Err(BuildError::MissingArgument {
          path,
          target: target.name().to_string(),
          name: param.name.clone(),
        });
      }
    }
  }

  let args = CallArgs::new(values);
  let summary = args.summary();
  target.invoke(args).map_err(|source| BuildError::Invocation {
    path,
    target: target.name().to_string(),
    args: summary,
    source,
  })
}

/// Errors that can occur while materializing a configuration graph.
#[derive(Debug, Error)]
pub enum BuildError {
  /// `build` was invoked while another build was in progress on this
  /// thread.
  #[error("re-entrant build: a build is already in progress in this execution context")]
  Reentrant,

  /// The graph reachable from the build root contains a cycle.
  #[error("dependency cycle detected in configuration graph")]
  CycleDetected,

  /// The build root references a handle outside the graph.
  #[error("node not found: {0}")]
  NodeNotFound(NodeId),

  /// A required parameter was unset with no declared default.
  #[error("missing argument '{name}' for '{target}' at {path}")]
  MissingArgument { path: Path, target: String, name: String },

  /// A deferred call supplied an argument name the target does not accept.
  #[error("unknown argument '{name}' for '{target}' (valid: {})", .valid.join(", "))]
  UnknownArgument {
    target: String,
    name: String,
    valid: Vec<String>,
  },

  /// A target invocation failed; annotated with the path from the build
  /// root to the failing node and the arguments in flight.
  #[error("building '{target}' at {path} failed (arguments: {args})")]
  Invocation {
    path: Path,
    target: String,
    args: String,
    source: Box<dyn Error + Send + Sync>,
  },
}
