//! spindle-lib: Deferred-construction configuration graphs
//!
//! This crate provides the fundamental types for describing, editing, and
//! materializing call graphs:
//! - `Graph`/`Node`: mutable specifications of "call this target with these
//!   arguments", addressed by handle, shareable and copyable
//! - `Target`: an invocation target with a validated parameter signature
//! - `build`: the engine that walks a graph once, bottom-up, and produces
//!   real objects with sharing preserved
//! - `GraphSnapshot`: the plain-data view an external serializer consumes

pub mod build;
pub mod graph;
pub mod path;
pub mod snapshot;
pub mod target;
pub mod value;
