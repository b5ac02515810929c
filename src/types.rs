//! Type-safe identifiers for program points, transitions and threads.
//!
//! Nodes and edges live in the [`Cfg`][crate::cfg::Cfg] arena and are addressed
//! by index. The newtypes keep node and edge indices from being mixed up.
use std::fmt;

use serde::{Deserialize, Serialize};

/// A program point (index into the node arena).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(index: u32) -> Self {
        NodeId(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A transition (index into the edge arena).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct EdgeId(u32);

impl EdgeId {
    pub fn new(index: u32) -> Self {
        EdgeId(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Identifier of an assertion (`Check` edge) in the program.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CheckId(pub u32);

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "check#{}", self.0)
    }
}

/// Abstract thread identity.
///
/// The main thread is `Main`. Every other thread is identified by the thread
/// that created it and the spawn edge, so the set of ids is bounded by the
/// nesting of spawn edges in the program.
///
/// # Invariants
///
/// - A `unique` thread stands for at most one concrete thread.
/// - Only threads created directly by the unique main thread from `main`
///   outside of loops are unique.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ThreadId {
    Main,
    Created {
        parent: Box<ThreadId>,
        site: EdgeId,
        function: String,
        unique: bool,
    },
}

impl ThreadId {
    pub fn is_unique(&self) -> bool {
        match self {
            ThreadId::Main => true,
            ThreadId::Created { unique, .. } => *unique,
        }
    }

    pub fn function(&self) -> Option<&str> {
        match self {
            ThreadId::Main => None,
            ThreadId::Created { function, .. } => Some(function),
        }
    }

    /// Nesting depth: `Main` is 0.
    pub fn depth(&self) -> usize {
        match self {
            ThreadId::Main => 0,
            ThreadId::Created { parent, .. } => 1 + parent.depth(),
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadId::Main => write!(f, "main"),
            ThreadId::Created {
                parent,
                site,
                function,
                unique,
            } => {
                write!(f, "{}/{}@{}", parent, function, site)?;
                if !unique {
                    write!(f, "*")?;
                }
                Ok(())
            }
        }
    }
}
