//! Invocation targets and their signatures.
//!
//! A [`Target`] is the callable end of a configuration node: a named
//! constructor or function with a declared parameter set and an invoke
//! closure that produces the real object. Signatures are introspected once,
//! at target construction, so the argument store can validate names with a
//! plain map lookup and the build engine never reflects over the target on
//! the hot path.
//!
//! Targets are shared by `Arc`; two nodes pointing at the same `Arc<Target>`
//! have the same target identity. The [`TargetRegistry`] maps stable names
//! back to targets, which is what snapshot restore uses to reconnect a
//! serialized graph.

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::build::{Built, CallArgs};
use crate::value::Value;

/// Errors raised while declaring targets and signatures.
#[derive(Debug, Error)]
pub enum TargetError {
  /// A parameter name appears twice in one signature.
  #[error("duplicate parameter '{name}' in signature")]
  DuplicateParam { name: String },

  /// A target with this name is already registered.
  #[error("target '{name}' is already registered")]
  DuplicateTarget { name: String },
}

/// A declared parameter: a name plus an optional default value.
///
/// A parameter without a default is required at materialization time; a
/// parameter with a default falls back to it when no explicit argument is
/// set.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
  pub name: String,
  pub default: Option<Value>,
}

impl Param {
  /// A required parameter (no default).
  pub fn required(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      default: None,
    }
  }

  /// An optional parameter with a declared default.
  pub fn with_default(name: impl Into<String>, default: impl Into<Value>) -> Self {
    Self {
      name: name.into(),
      default: Some(default.into()),
    }
  }
}

/// The fixed, validated parameter set of a target.
///
/// Parameter order is declaration order; positional arguments bind to
/// parameters in this order. Variadic positional parameters do not exist in
/// this model. A signature may additionally accept arbitrary extra keyword
/// names (see [`Target::var_keyword`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
  params: Vec<Param>,
  accepts_extra_keywords: bool,
}

impl Signature {
  /// A signature with no parameters.
  pub fn empty() -> Self {
    Self {
      params: Vec::new(),
      accepts_extra_keywords: false,
    }
  }

  /// Build a signature from declared parameters.
  ///
  /// # Errors
  ///
  /// Returns `DuplicateParam` if two parameters share a name.
  pub fn new(params: Vec<Param>) -> Result<Self, TargetError> {
    let mut seen = HashSet::new();
    for param in &params {
      if !seen.insert(param.name.clone()) {
        return Err(TargetError::DuplicateParam {
          name: param.name.clone(),
        });
      }
    }
    Ok(Self {
      params,
      accepts_extra_keywords: false,
    })
  }

  pub fn params(&self) -> &[Param] {
    &self.params
  }

  /// Look up a declared parameter by name.
  pub fn param(&self, name: &str) -> Option<&Param> {
    self.params.iter().find(|p| p.name == name)
  }

  /// True if `name` is a declared parameter.
  pub fn declares(&self, name: &str) -> bool {
    self.param(name).is_some()
  }

  /// True if an argument named `name` may be set on this signature.
  pub fn accepts(&self, name: &str) -> bool {
    self.accepts_extra_keywords || self.declares(name)
  }

  /// Whether arbitrary extra keyword names are accepted.
  pub fn accepts_extra_keywords(&self) -> bool {
    self.accepts_extra_keywords
  }

  /// Declared parameter names, in declaration order.
  pub fn param_names(&self) -> Vec<String> {
    self.params.iter().map(|p| p.name.clone()).collect()
  }
}

/// How a target materializes, resolved once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
  /// An ordinary function.
  Function,
  /// A constructor producing an object.
  Constructor,
  /// A function accepting arbitrary extra keyword arguments.
  VarKeyword,
}

/// The invoke closure: fully resolved arguments in, materialized result out.
pub type InvokeFn = dyn Fn(CallArgs) -> Result<Built, Box<dyn Error + Send + Sync>> + Send + Sync;

/// A callable or constructor a node will eventually invoke.
pub struct Target {
  name: String,
  kind: TargetKind,
  signature: Signature,
  invoke: Box<InvokeFn>,
}

impl Target {
  /// Declare an ordinary function target.
  pub fn function<F>(name: impl Into<String>, signature: Signature, invoke: F) -> Arc<Self>
  where
    F: Fn(CallArgs) -> Result<Built, Box<dyn Error + Send + Sync>> + Send + Sync + 'static,
  {
    Arc::new(Self {
      name: name.into(),
      kind: TargetKind::Function,
      signature,
      invoke: Box::new(invoke),
    })
  }

  /// Declare a constructor target.
  pub fn constructor<F>(name: impl Into<String>, signature: Signature, invoke: F) -> Arc<Self>
  where
    F: Fn(CallArgs) -> Result<Built, Box<dyn Error + Send + Sync>> + Send + Sync + 'static,
  {
    Arc::new(Self {
      name: name.into(),
      kind: TargetKind::Constructor,
      signature,
      invoke: Box::new(invoke),
    })
  }

  /// Declare a function target that accepts arbitrary extra keyword names
  /// on top of its declared parameters.
  pub fn var_keyword<F>(name: impl Into<String>, mut signature: Signature, invoke: F) -> Arc<Self>
  where
    F: Fn(CallArgs) -> Result<Built, Box<dyn Error + Send + Sync>> + Send + Sync + 'static,
  {
    signature.accepts_extra_keywords = true;
    Arc::new(Self {
      name: name.into(),
      kind: TargetKind::VarKeyword,
      signature,
      invoke: Box::new(invoke),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> TargetKind {
    self.kind
  }

  pub fn signature(&self) -> &Signature {
    &self.signature
  }

  /// Invoke the target with fully resolved arguments.
  pub fn invoke(&self, args: CallArgs) -> Result<Built, Box<dyn Error + Send + Sync>> {
    (self.invoke)(args)
  }
}

impl fmt::Debug for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Target")
      .field("name", &self.name)
      .field("kind", &self.kind)
      .field("params", &self.signature.param_names())
      .finish_non_exhaustive()
  }
}

/// Name-keyed lookup of targets for restoring serialized graphs.
#[derive(Default)]
pub struct TargetRegistry {
  targets: HashMap<String, Arc<Target>>,
}

impl TargetRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a target under its declared name.
  ///
  /// # Errors
  ///
  /// Returns `DuplicateTarget` if the name is taken.
  pub fn register(&mut self, target: Arc<Target>) -> Result<(), TargetError> {
    let name = target.name().to_string();
    if self.targets.contains_key(&name) {
      return Err(TargetError::DuplicateTarget { name });
    }
    self.targets.insert(name, target);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<Arc<Target>> {
    self.targets.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.targets.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }
}
