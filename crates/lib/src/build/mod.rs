//! Graph materialization.
//!
//! [`build`] turns a configuration graph into real objects: a single
//! depth-first, memoized walk that resolves every argument, invokes each
//! full-call target exactly once per node, and produces deferred callables
//! for deferred-call nodes.
//!
//! # Characteristics
//!
//! - **Detached**: results never alias the source graph; mutating a node
//!   after a build does not change what that build returned
//! - **Sharing-preserving**: a node referenced from several places
//!   materializes once, and every reference site receives the same object
//! - **Fail-fast**: cycles and re-entrant builds are rejected before any
//!   target runs; the first target failure aborts the walk with the path
//!   from the build root to the failing node

mod types;

pub use types::*;

use std::cell::Cell;
use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, info, trace};

use crate::graph::dag::{DagError, DependencyDag};
use crate::graph::{CallKind, Graph, NodeId};
use crate::path::{Path, PathSegment};
use crate::value::Value;

thread_local! {
  /// Whether a build is in progress on this thread.
  ///
  /// Thread-local rather than process-global so independent builds on
  /// different threads never spuriously conflict, while a genuinely
  /// re-entrant call within one logical build still fails fast.
  static BUILD_IN_PROGRESS: Cell<bool> = const { Cell::new(false) };
}

/// Scoped hold on the per-thread build flag; released on drop, so the flag
/// clears on every exit path, including panics and error returns.
struct ReentrancyGuard(());

impl ReentrancyGuard {
  fn acquire() -> Result<Self, BuildError> {
    BUILD_IN_PROGRESS.with(|flag| {
      if flag.get() {
        return Err(BuildError::Reentrant);
      }
      flag.set(true);
      Ok(Self(()))
    })
  }
}

impl Drop for ReentrancyGuard {
  fn drop(&mut self) {
    BUILD_IN_PROGRESS.with(|flag| flag.set(false));
  }
}

/// Materialize everything reachable from `root`.
///
/// `root` may be a single node reference or an arbitrary container of them;
/// the result has the same shape with every node replaced by what its
/// target produced. The source graph is read-only to the engine and the
/// result is fully detached from it.
///
/// # Errors
///
/// - `Reentrant` if a build is already in progress on this thread.
/// - `CycleDetected` if the reachable subgraph contains a cycle (verified
///   before any target is invoked).
/// - `NodeNotFound` if `root` references a handle outside `graph`.
/// - `MissingArgument` / `Invocation` from materializing individual nodes,
///   annotated with the path from `root` to the failing node.
pub fn build(graph: &Graph, root: &Value) -> Result<Built, BuildError> {
  let _guard = ReentrancyGuard::acquire()?;

  // Pre-flight: lower to a dependency DAG so cycles fail hard before any
  // target runs, and the recursive resolve below cannot diverge.
  DependencyDag::from_root(graph, root).map_err(|err| match err {
    DagError::CycleDetected => BuildError::CycleDetected,
    DagError::NodeNotFound(id) => BuildError::NodeNotFound(id),
  })?;

  let mut resolver = Resolver::new(graph);
  let result = resolver.resolve_value(root)?;
  info!(nodes = resolver.memo.len(), "configuration graph built");
  Ok(result)
}

/// Materialize a single node. Shorthand for [`build`] on a node reference.
pub fn build_node(graph: &Graph, id: NodeId) -> Result<Built, BuildError> {
  build(graph, &Value::Node(id))
}

/// One build pass: the source graph, the identity memo, and the access path
/// from the root to wherever resolution currently is.
///
/// The memo guarantees at most one construction per node identity within
/// this pass; it does not persist across builds.
struct Resolver<'a> {
  graph: &'a Graph,
  memo: HashMap<NodeId, Built>,
  path: Path,
}

impl<'a> Resolver<'a> {
  fn new(graph: &'a Graph) -> Self {
    Self {
      graph,
      memo: HashMap::new(),
      path: Path::new(),
    }
  }

  fn resolve_value(&mut self, value: &Value) -> Result<Built, BuildError> {
    match value {
      Value::Node(id) => self.resolve_node(*id),
      Value::List(items) => {
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
          self.path.push(PathSegment::Index(index));
          let resolved = self.resolve_value(item);
          self.path.pop();
          out.push(resolved?);
        }
        Ok(Built::List(out))
      }
      Value::Map(map) => {
        let mut out = IndexMap::with_capacity(map.len());
        for (key, item) in map {
          self.path.push(PathSegment::Key(key.clone()));
          let resolved = self.resolve_value(item);
          self.path.pop();
          out.insert(key.clone(), resolved?);
        }
        Ok(Built::Map(out))
      }
      leaf => Ok(Built::Value(leaf.clone())),
    }
  }

  fn resolve_node(&mut self, id: NodeId) -> Result<Built, BuildError> {
    if let Some(hit) = self.memo.get(&id) {
      trace!(node = %id, "memo hit");
      return Ok(hit.clone());
    }

    let graph = self.graph;
    let node = graph.node(id).map_err(|_| BuildError::NodeNotFound(id))?;
    debug!(node = %id, target = node.target().name(), at = %self.path, "materializing node");

    let mut resolved = IndexMap::with_capacity(node.args().len());
    for (name, value) in node.args() {
      self.path.push(PathSegment::Arg(name.clone()));
      let result = self.resolve_value(value);
      self.path.pop();
      resolved.insert(name.clone(), result?);
    }

    let built = match node.kind() {
      CallKind::Full => complete_and_invoke(node.target(), resolved, self.path.clone())?,
      // A deferred node binds what is resolved so far; defaults and the
      // required-parameter check wait until the deferred call completes.
      CallKind::Deferred => Built::Deferred(Deferred::new(node.target().clone(), resolved)),
    };

    self.memo.insert(id, built.clone());
    Ok(built)
  }
}

#[cfg(test)]
mod tests {
  use std::error::Error;
  use std::sync::Arc;

  use super::*;
  use crate::target::{Param, Signature, Target};

  #[derive(Debug, PartialEq)]
  struct Point {
    x: i64,
    y: i64,
  }

  fn int_arg(args: &CallArgs, name: &str) -> Result<i64, Box<dyn Error + Send + Sync>> {
    match args.require(name)? {
      Built::Value(Value::Int(n)) => Ok(*n),
      other => Err(format!("expected int for '{name}', got {other}").into()),
    }
  }

  fn point_target() -> Arc<Target> {
    let sig = Signature::new(vec![Param::required("x"), Param::with_default("y", 0)]).unwrap();
    Target::constructor("Point", sig, |args| {
      let point = Point {
        x: int_arg(&args, "x")?,
        y: int_arg(&args, "y")?,
      };
      Ok(Built::Object(BuiltObject::new("Point", point)))
    })
  }

  /// Wraps arbitrary resolved arguments, exposing them for assertions.
  fn bag_target() -> Arc<Target> {
    Target::var_keyword("Bag", Signature::empty(), |args| {
      let values: IndexMap<String, Built> = args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
      Ok(Built::Object(BuiltObject::new("Bag", values)))
    })
  }

  fn failing_target() -> Arc<Target> {
    let sig = Signature::new(vec![Param::required("x")]).unwrap();
    Target::constructor("Broken", sig, |_args| Err("invalid dimensions".into()))
  }

  fn bag_of(result: &Built) -> &IndexMap<String, Built> {
    result.downcast_ref::<IndexMap<String, Built>>().expect("bag object")
  }

  #[test]
  fn leaf_arguments_materialize_into_the_object() {
    let mut graph = Graph::new();
    let id = graph
      .full_call(point_target(), vec![], vec![("x".to_string(), Value::Int(2))])
      .unwrap();

    let result = build_node(&graph, id).unwrap();
    assert_eq!(result.downcast_ref::<Point>(), Some(&Point { x: 2, y: 0 }));
  }

  #[test]
  fn mutation_before_build_is_visible() {
    let mut graph = Graph::new();
    let id = graph
      .full_call(point_target(), vec![], vec![("x".to_string(), Value::Int(2))])
      .unwrap();

    graph.set(id, "x", Value::Int(3)).unwrap();
    let result = build_node(&graph, id).unwrap();
    assert_eq!(result.downcast_ref::<Point>(), Some(&Point { x: 3, y: 0 }));
  }

  #[test]
  fn mutation_after_build_does_not_change_the_result() {
    let mut graph = Graph::new();
    let id = graph
      .full_call(point_target(), vec![], vec![("x".to_string(), Value::Int(2))])
      .unwrap();

    let first = build_node(&graph, id).unwrap();
    graph.set(id, "x", Value::Int(99)).unwrap();

    assert_eq!(first.downcast_ref::<Point>(), Some(&Point { x: 2, y: 0 }));
    let second = build_node(&graph, id).unwrap();
    assert_eq!(second.downcast_ref::<Point>(), Some(&Point { x: 99, y: 0 }));
  }

  #[test]
  fn shared_nodes_materialize_once_with_identical_results() {
    let mut graph = Graph::new();
    let shared = graph
      .full_call(point_target(), vec![], vec![("x".to_string(), Value::Int(1))])
      .unwrap();
    let outer = graph
      .full_call(
        bag_target(),
        vec![],
        vec![
          ("x".to_string(), Value::Node(shared)),
          ("y".to_string(), Value::List(vec![Value::Node(shared)])),
        ],
      )
      .unwrap();

    let result = build_node(&graph, outer).unwrap();
    let bag = bag_of(&result);
    let direct = bag["x"].as_object().unwrap();
    let through_list = bag["y"].as_list().unwrap()[0].as_object().unwrap();

    assert!(direct.ptr_eq(through_list));
  }

  #[test]
  fn structurally_equal_graphs_build_distinct_objects() {
    let mut graph = Graph::new();
    let target = point_target();
    let a = graph
      .full_call(target.clone(), vec![], vec![("x".to_string(), Value::Int(1))])
      .unwrap();
    let b = graph
      .full_call(target, vec![], vec![("x".to_string(), Value::Int(1))])
      .unwrap();
    assert!(graph.nodes_eq(a, b).unwrap());

    let root = Value::List(vec![Value::Node(a), Value::Node(b)]);
    let result = build(&graph, &root).unwrap();
    let items = result.as_list().unwrap();

    assert_eq!(items[0].downcast_ref::<Point>(), items[1].downcast_ref::<Point>());
    assert!(!items[0].as_object().unwrap().ptr_eq(items[1].as_object().unwrap()));
  }

  #[test]
  fn containers_are_rebuilt_with_shape_preserved() {
    let mut graph = Graph::new();
    let point = graph
      .full_call(point_target(), vec![], vec![("x".to_string(), Value::Int(5))])
      .unwrap();

    let mut map = IndexMap::new();
    map.insert("first".to_string(), Value::Node(point));
    map.insert("second".to_string(), Value::Int(7));
    let root = Value::List(vec![Value::Map(map), Value::String("tail".to_string())]);

    let result = build(&graph, &root).unwrap();
    let items = result.as_list().unwrap();
    let rebuilt = items[0].as_map().unwrap();

    let keys: Vec<_> = rebuilt.keys().cloned().collect();
    assert_eq!(keys, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(rebuilt["first"].downcast_ref::<Point>(), Some(&Point { x: 5, y: 0 }));
    assert_eq!(rebuilt["second"].as_value(), Some(&Value::Int(7)));
    assert_eq!(items[1].as_value(), Some(&Value::String("tail".to_string())));
  }

  #[test]
  fn leaf_root_passes_through() {
    let graph = Graph::new();
    let result = build(&graph, &Value::Int(42)).unwrap();
    assert_eq!(result.as_value(), Some(&Value::Int(42)));
  }

  #[test]
  fn memo_does_not_persist_across_builds() {
    let mut graph = Graph::new();
    let id = graph
      .full_call(point_target(), vec![], vec![("x".to_string(), Value::Int(1))])
      .unwrap();

    let first = build_node(&graph, id).unwrap();
    let second = build_node(&graph, id).unwrap();
    assert!(!first.as_object().unwrap().ptr_eq(second.as_object().unwrap()));
  }

  #[test]
  fn missing_required_argument_fails_with_path() {
    let mut graph = Graph::new();
    let incomplete = graph.full_call(point_target(), vec![], vec![]).unwrap();
    let outer = graph
      .full_call(
        bag_target(),
        vec![],
        vec![("inner".to_string(), Value::Node(incomplete))],
      )
      .unwrap();

    let err = build_node(&graph, outer).unwrap_err();
    match err {
      BuildError::MissingArgument { path, target, name } => {
        assert_eq!(path.to_string(), ".inner");
        assert_eq!(target, "Point");
        assert_eq!(name, "x");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn invocation_failure_is_annotated_with_path_and_arguments() {
    let mut graph = Graph::new();
    let broken = graph
      .full_call(failing_target(), vec![], vec![("x".to_string(), Value::Int(3))])
      .unwrap();
    let outer = graph
      .full_call(
        bag_target(),
        vec![],
        vec![("y".to_string(), Value::List(vec![Value::Int(0), Value::Node(broken)]))],
      )
      .unwrap();

    let err = build_node(&graph, outer).unwrap_err();
    match err {
      BuildError::Invocation { path, target, args, source } => {
        assert_eq!(path.to_string(), ".y[1]");
        assert_eq!(target, "Broken");
        assert_eq!(args, "x=3");
        assert_eq!(source.to_string(), "invalid dimensions");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn failure_is_wrapped_exactly_once() {
    let mut graph = Graph::new();
    let broken = graph
      .full_call(failing_target(), vec![], vec![("x".to_string(), Value::Int(1))])
      .unwrap();
    let middle = graph
      .full_call(bag_target(), vec![], vec![("inner".to_string(), Value::Node(broken))])
      .unwrap();
    let outer = graph
      .full_call(bag_target(), vec![], vec![("middle".to_string(), Value::Node(middle))])
      .unwrap();

    let err = build_node(&graph, outer).unwrap_err();
    match err {
      BuildError::Invocation { path, source, .. } => {
        // the innermost frame annotated; outer frames did not re-wrap
        assert_eq!(path.to_string(), ".middle.inner");
        assert!(source.downcast_ref::<BuildError>().is_none());
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn deferred_node_materializes_into_a_callable() {
    let mut graph = Graph::new();
    let id = graph
      .deferred_call(point_target(), vec![], vec![("y".to_string(), Value::Int(4))])
      .unwrap();

    let result = build_node(&graph, id).unwrap();
    let deferred = result.as_deferred().unwrap();
    assert_eq!(deferred.target_name(), "Point");

    let point = deferred.call(vec![("x".to_string(), Built::Value(Value::Int(9)))]).unwrap();
    assert_eq!(point.downcast_ref::<Point>(), Some(&Point { x: 9, y: 4 }));
  }

  #[test]
  fn deferred_nodes_resolve_their_nested_arguments_at_build_time() {
    let mut graph = Graph::new();
    let inner = graph
      .full_call(point_target(), vec![], vec![("x".to_string(), Value::Int(1))])
      .unwrap();
    let deferred_id = graph
      .deferred_call(bag_target(), vec![], vec![("p".to_string(), Value::Node(inner))])
      .unwrap();

    let result = build_node(&graph, deferred_id).unwrap();
    let deferred = result.as_deferred().unwrap();
    assert!(deferred.bound()["p"].as_object().is_some());
  }

  #[test]
  fn shared_deferred_nodes_share_one_binding() {
    let mut graph = Graph::new();
    let shared = graph
      .deferred_call(point_target(), vec![], vec![("y".to_string(), Value::Int(4))])
      .unwrap();

    let root = Value::List(vec![Value::Node(shared), Value::Node(shared)]);
    let result = build(&graph, &root).unwrap();
    let items = result.as_list().unwrap();

    let first = items[0].as_deferred().unwrap();
    let second = items[1].as_deferred().unwrap();
    assert!(first.ptr_eq(second));
  }

  #[test]
  fn reentrant_build_fails_fast() {
    let reentrant = Target::function("reentrant", Signature::empty(), |_args| {
      let mut inner = Graph::new();
      let noop = Target::function("noop", Signature::empty(), |_args| Ok(Built::Value(Value::Null)));
      let id = inner.full_call(noop, vec![], vec![]).unwrap();
      build_node(&inner, id).map_err(|err| Box::new(err) as Box<dyn Error + Send + Sync>)
    });

    let mut graph = Graph::new();
    let id = graph.full_call(reentrant, vec![], vec![]).unwrap();

    let err = build_node(&graph, id).unwrap_err();
    match err {
      BuildError::Invocation { source, .. } => {
        let inner = source.downcast_ref::<BuildError>().expect("inner build error");
        assert!(matches!(inner, BuildError::Reentrant));
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn guard_is_released_after_failure() {
    let mut graph = Graph::new();
    let broken = graph
      .full_call(failing_target(), vec![], vec![("x".to_string(), Value::Int(1))])
      .unwrap();
    assert!(build_node(&graph, broken).is_err());

    // the failed build released the guard; a fresh build succeeds
    let ok = graph
      .full_call(point_target(), vec![], vec![("x".to_string(), Value::Int(1))])
      .unwrap();
    assert!(build_node(&graph, ok).is_ok());
  }

  #[test]
  fn cycle_fails_before_any_target_runs() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static INVOCATIONS: AtomicUsize = AtomicUsize::new(0);
    let counting = Target::var_keyword("counting", Signature::empty(), |_args| {
      INVOCATIONS.fetch_add(1, Ordering::SeqCst);
      Ok(Built::Value(Value::Null))
    });

    let mut graph = Graph::new();
    let a = graph.full_call(counting.clone(), vec![], vec![]).unwrap();
    let b = graph
      .full_call(counting, vec![], vec![("other".to_string(), Value::Node(a))])
      .unwrap();
    graph.set(a, "other", Value::Node(b)).unwrap();

    let err = build_node(&graph, b).unwrap_err();
    assert!(matches!(err, BuildError::CycleDetected));
    assert_eq!(INVOCATIONS.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn builds_on_separate_threads_do_not_conflict() {
    let handles: Vec<_> = (0..4i64)
      .map(|n| {
        std::thread::spawn(move || {
          let mut graph = Graph::new();
          let id = graph
            .full_call(point_target(), vec![], vec![("x".to_string(), Value::Int(n))])
            .unwrap();
          build_node(&graph, id).is_ok()
        })
      })
      .collect();

    for handle in handles {
      assert!(handle.join().unwrap());
    }
  }

  #[test]
  fn dangling_root_reference_fails() {
    let graph = Graph::new();
    let err = build(&graph, &Value::Node(crate::graph::NodeId::from_u64(5))).unwrap_err();
    assert!(matches!(err, BuildError::NodeNotFound(_)));
  }
}
