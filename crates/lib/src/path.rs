//! Access paths from a build root to a nested value.
//!
//! While the build engine descends through argument stores and containers it
//! tracks where it is, so a failure deep in the graph can report the full
//! route from the root: `.retriever.layers[1]["norm"]`. Paths are plain data
//! and exposed publicly so external tooling (printers, diff) can consume
//! them.

use std::fmt;

/// One step of an access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
  /// Descent into a named argument (`.encoder`).
  Arg(String),
  /// Descent into a sequence element (`[3]`).
  Index(usize),
  /// Descent into a map entry (`["norm"]`).
  Key(String),
}

impl fmt::Display for PathSegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PathSegment::Arg(name) => write!(f, ".{}", name),
      PathSegment::Index(index) => write!(f, "[{}]", index),
      PathSegment::Key(key) => write!(f, "[{:?}]", key),
    }
  }
}

/// The route from a build root to a nested value.
///
/// The empty path denotes the root itself and renders as `<root>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path {
  segments: Vec<PathSegment>,
}

impl Path {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, segment: PathSegment) {
    self.segments.push(segment);
  }

  pub fn pop(&mut self) -> Option<PathSegment> {
    self.segments.pop()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn segments(&self) -> &[PathSegment] {
    &self.segments
  }
}

impl From<Vec<PathSegment>> for Path {
  fn from(segments: Vec<PathSegment>) -> Self {
    Self { segments }
  }
}

impl fmt::Display for Path {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.segments.is_empty() {
      return write!(f, "<root>");
    }
    for segment in &self.segments {
      write!(f, "{}", segment)?;
    }
    Ok(())
  }
}
