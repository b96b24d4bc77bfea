//! Ancestor chain of one traversal branch.
//!
//! The chain is persistent: `push` returns a new stack sharing its tail with the old
//! one, so sibling branches each hold their own view and never see each other's frames.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::version;

/// One ancestor currently being traversed into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub version: String,
    pub dependencies: BTreeMap<String, String>,
}

#[derive(Debug)]
struct Node {
    frame: Frame,
    parent: Option<Arc<Node>>,
}

#[derive(Clone, Debug, Default)]
pub struct Stack {
    top: Option<Arc<Node>>,
    len: usize,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: Frame) -> Stack {
        Stack {
            top: Some(Arc::new(Node {
                frame,
                parent: self.top.clone(),
            })),
            len: self.len + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Immediate parent of the edge being resolved.
    pub fn top(&self) -> Option<&Frame> {
        self.top.as_deref().map(|n| &n.frame)
    }

    /// Frames from the root dependency down to the top.
    pub fn frames(&self) -> Vec<&Frame> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.top.as_deref();
        while let Some(node) = cur {
            out.push(&node.frame);
            cur = node.parent.as_deref();
        }
        out.reverse();
        out
    }

    pub fn names(&self) -> Vec<&str> {
        self.frames().into_iter().map(|f| f.name.as_str()).collect()
    }

    /// True if an ancestor named `dep` already resolved to a version satisfying `range`.
    /// Such an edge would loop back into the chain and is pruned.
    pub fn has_cycle(&self, dep: &str, range: &str) -> bool {
        let mut cur = self.top.as_deref();
        while let Some(node) = cur {
            if node.frame.name == dep && version::satisfies(&node.frame.version, range) {
                return true;
            }
            cur = node.parent.as_deref();
        }
        false
    }

    /// Index (root = 0) of the first ancestor that declares `name` with a range `version`
    /// does not satisfy. Ancestors that don't depend on `name` never conflict.
    pub fn find_conflict(&self, name: &str, version: &str) -> Option<usize> {
        self.frames().iter().position(|frame| {
            frame
                .dependencies
                .get(name)
                .is_some_and(|range| !version::satisfies(version, range))
        })
    }

    /// Nesting path for a conflict found at `index`: ancestor names starting two frames
    /// above it, down to the top, joined as a node_modules path.
    pub fn nest_path(&self, index: usize) -> String {
        let names = self.names();
        let start = index.saturating_sub(2).min(names.len());
        names[start..].join("/node_modules/")
    }
}
