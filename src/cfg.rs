//! Control-flow graph: an arena of program points connected by transitions.
//!
//! Nodes and edges are stored in flat vectors and referenced by [`NodeId`] and
//! [`EdgeId`]. Adjacency is kept on both sides, so the solver can pull the
//! incoming transitions of a node without owning pointers between nodes.
//!
//! The graph is built once (usually through [`ProgramBuilder`][crate::lower::ProgramBuilder])
//! and is read-only during analysis.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::expr::{Cond, Expr, LValue};
use crate::locks::MutexKind;
use crate::types::{CheckId, EdgeId, NodeId};

/// Source position attached to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Variable types, as far as the engine cares about them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Int,
    Ptr(Box<Ty>),
    Struct(String),
    Array(Box<Ty>, u32),
}

impl Ty {
    pub fn ptr(to: Ty) -> Self {
        Ty::Ptr(Box::new(to))
    }

    pub fn array(of: Ty, len: u32) -> Self {
        Ty::Array(Box::new(of), len)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Ty::Ptr(_))
    }

    /// Name used for opaque objects of this type.
    pub fn type_name(&self) -> String {
        match self {
            Ty::Int => "int".to_string(),
            Ty::Ptr(inner) => format!("{}*", inner.type_name()),
            Ty::Struct(name) => format!("struct {}", name),
            Ty::Array(inner, len) => format!("{}[{}]", inner.type_name(), len),
        }
    }
}

/// A typed variable declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
    pub name: String,
    pub ty: Ty,
}

impl VarDecl {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self { name: name.into(), ty }
    }
}

/// A global variable with its static initializer.
///
/// Cells not mentioned in `init` are zero-initialized, as in C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDecl {
    pub decl: VarDecl,
    /// Field path (empty for scalars) → initial value.
    pub init: Vec<(Vec<String>, i64)>,
}

/// Transition semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Skip,
    Assign(LValue, Expr),
    Guard(Cond),
    Call {
        ret: Option<LValue>,
        callee: String,
        args: Vec<Expr>,
    },
    /// Store the return value; the edge leads to the function exit.
    Return(Option<Expr>),
    Lock(String),
    Unlock(String),
    Spawn {
        function: String,
        arg: Option<Expr>,
    },
    Join(String),
    Check(CheckId, Cond),
    Havoc(LValue),
    Alloc(LValue),
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Skip => write!(f, "skip"),
            EdgeKind::Assign(lv, e) => write!(f, "{} = {}", lv, e),
            EdgeKind::Guard(c) => write!(f, "[{}]", c),
            EdgeKind::Call { ret, callee, args } => {
                if let Some(ret) = ret {
                    write!(f, "{} = ", ret)?;
                }
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", callee, args.join(", "))
            }
            EdgeKind::Return(Some(e)) => write!(f, "return {}", e),
            EdgeKind::Return(None) => write!(f, "return"),
            EdgeKind::Lock(m) => write!(f, "lock({})", m),
            EdgeKind::Unlock(m) => write!(f, "unlock({})", m),
            EdgeKind::Spawn { function, .. } => write!(f, "spawn({})", function),
            EdgeKind::Join(function) => write!(f, "join({})", function),
            EdgeKind::Check(id, c) => write!(f, "{}: check({})", id, c),
            EdgeKind::Havoc(lv) => write!(f, "{} = *", lv),
            EdgeKind::Alloc(lv) => write!(f, "{} = malloc()", lv),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub function: String,
    pub in_edges: Vec<EdgeId>,
    pub out_edges: Vec<EdgeId>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub params: Vec<VarDecl>,
    pub locals: Vec<VarDecl>,
    pub entry: NodeId,
    pub exit: NodeId,
}

impl Function {
    /// Declared type of a parameter or local (undeclared names are `int`).
    pub fn var_type(&self, name: &str) -> Option<&Ty> {
        self.params
            .iter()
            .chain(self.locals.iter())
            .find(|d| d.name == name)
            .map(|d| &d.ty)
    }

    pub fn is_param(&self, name: &str) -> bool {
        self.params.iter().any(|d| d.name == name)
    }
}

/// The program under analysis.
#[derive(Debug, Clone, Default)]
pub struct Cfg {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    pub functions: BTreeMap<String, Function>,
    pub globals: BTreeMap<String, GlobalDecl>,
    pub structs: BTreeMap<String, Vec<VarDecl>>,
    pub mutexes: BTreeMap<String, MutexKind>,
    loop_heads: BTreeSet<NodeId>,
    entries: BTreeSet<NodeId>,
    cyclic: BTreeSet<NodeId>,
    check_count: u32,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, function: &str, location: Option<Location>) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            function: function.to_string(),
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            location,
        });
        id
    }

    pub fn add_edge(&mut self, src: NodeId, dst: NodeId, kind: EdgeKind) -> EdgeId {
        let id = EdgeId::new(self.edges.len() as u32);
        self.edges.push(Edge { id, src, dst, kind });
        self.nodes[src.index()].out_edges.push(id);
        self.nodes[dst.index()].in_edges.push(id);
        id
    }

    pub fn fresh_check(&mut self) -> CheckId {
        let id = CheckId(self.check_count);
        self.check_count += 1;
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn function_of(&self, node: NodeId) -> &str {
        &self.nodes[node.index()].function
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    pub fn mutex_kind(&self, name: &str) -> MutexKind {
        self.mutexes.get(name).copied().unwrap_or_default()
    }

    pub fn in_edges(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.nodes[node.index()].in_edges.iter().map(move |e| &self.edges[e.index()])
    }

    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.nodes[node.index()].out_edges.iter().map(move |e| &self.edges[e.index()])
    }

    pub fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.out_edges(node).map(|e| e.dst)
    }

    /// Widening points: targets of back edges and function entries.
    pub fn is_widening_point(&self, node: NodeId) -> bool {
        self.loop_heads.contains(&node) || self.entries.contains(&node)
    }

    pub fn loop_heads(&self) -> &BTreeSet<NodeId> {
        &self.loop_heads
    }

    /// Whether the node lies on a cycle of its function's graph.
    pub fn in_loop(&self, node: NodeId) -> bool {
        self.cyclic.contains(&node)
    }

    /// Every check in the program with the node it starts from.
    pub fn checks(&self) -> Vec<(CheckId, NodeId, &Cond)> {
        self.edges
            .iter()
            .filter_map(|e| match &e.kind {
                EdgeKind::Check(id, cond) => Some((*id, e.src, cond)),
                _ => None,
            })
            .collect()
    }

    /// Recompute derived information (loop heads, cyclic nodes).
    pub fn finalize(&mut self) {
        self.loop_heads.clear();
        self.cyclic.clear();
        self.entries = self.functions.values().map(|f| f.entry).collect();
        let entries: Vec<NodeId> = self.entries.iter().copied().collect();
        let mut visited = vec![false; self.nodes.len()];
        let mut on_stack = vec![false; self.nodes.len()];
        for entry in entries {
            self.find_back_edges(entry, &mut visited, &mut on_stack);
        }
        for node in 0..self.nodes.len() {
            let id = NodeId::new(node as u32);
            if self.reaches(id, id) {
                self.cyclic.insert(id);
            }
        }
        log::debug!(
            "CFG finalized: {} nodes, {} edges, {} loop heads",
            self.nodes.len(),
            self.edges.len(),
            self.loop_heads.len()
        );
    }

    fn find_back_edges(&mut self, start: NodeId, visited: &mut [bool], on_stack: &mut [bool]) {
        // Iterative DFS; a frame is (node, next out-edge position).
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        if visited[start.index()] {
            return;
        }
        visited[start.index()] = true;
        on_stack[start.index()] = true;
        stack.push((start, 0));
        while let Some(frame) = stack.last_mut() {
            let (node, pos) = *frame;
            let outs = &self.nodes[node.index()].out_edges;
            if pos < outs.len() {
                let dst = self.edges[outs[pos].index()].dst;
                frame.1 += 1;
                if on_stack[dst.index()] {
                    self.loop_heads.insert(dst);
                } else if !visited[dst.index()] {
                    visited[dst.index()] = true;
                    on_stack[dst.index()] = true;
                    stack.push((dst, 0));
                }
            } else {
                on_stack[node.index()] = false;
                stack.pop();
            }
        }
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = BTreeSet::new();
        let mut work: Vec<NodeId> = self.successors(from).collect();
        while let Some(n) = work.pop() {
            if n == to {
                return true;
            }
            if seen.insert(n) {
                work.extend(self.successors(n));
            }
        }
        false
    }

    /// Structural sanity checks, run before analysis.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        for edge in &self.edges {
            if edge.src.index() >= self.nodes.len() || edge.dst.index() >= self.nodes.len() {
                return Err(AnalysisError::MalformedCfg(format!("{} references a missing node", edge.id)));
            }
            match &edge.kind {
                EdgeKind::Call { callee, .. } if !self.functions.contains_key(callee) => {
                    return Err(AnalysisError::MalformedCfg(format!(
                        "{} calls undefined function `{}`",
                        edge.id, callee
                    )));
                }
                EdgeKind::Spawn { function, .. } if !self.functions.contains_key(function) => {
                    return Err(AnalysisError::MalformedCfg(format!(
                        "{} spawns undefined function `{}`",
                        edge.id, function
                    )));
                }
                _ => {}
            }
        }
        for f in self.functions.values() {
            if f.entry.index() >= self.nodes.len() || f.exit.index() >= self.nodes.len() {
                return Err(AnalysisError::MalformedCfg(format!(
                    "function `{}` has dangling entry/exit",
                    f.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn diamond_with_loop() -> (Cfg, NodeId, NodeId) {
        let mut cfg = Cfg::new();
        let entry = cfg.add_node("main", None);
        let head = cfg.add_node("main", None);
        let body = cfg.add_node("main", None);
        let exit = cfg.add_node("main", None);
        cfg.add_edge(entry, head, EdgeKind::Skip);
        let cond = Expr::var("i").lt(Expr::constant(10));
        cfg.add_edge(head, body, EdgeKind::Guard(cond.clone()));
        cfg.add_edge(body, head, EdgeKind::Assign(LValue::var("i"), Expr::var("i").add(Expr::constant(1))));
        cfg.add_edge(head, exit, EdgeKind::Guard(cond.negate()));
        cfg.functions.insert(
            "main".to_string(),
            Function {
                name: "main".to_string(),
                params: vec![],
                locals: vec![],
                entry,
                exit,
            },
        );
        cfg.finalize();
        (cfg, head, body)
    }

    #[test]
    fn test_loop_heads() {
        let (cfg, head, body) = diamond_with_loop();
        assert!(cfg.loop_heads().contains(&head));
        assert_eq!(cfg.loop_heads().len(), 1);
        assert!(cfg.is_widening_point(head));
        assert!(cfg.in_loop(body));
        assert!(!cfg.in_loop(NodeId::new(0)));
    }

    #[test]
    fn test_validate_rejects_unknown_callee() {
        let (mut cfg, head, _) = diamond_with_loop();
        let n = cfg.add_node("main", None);
        cfg.add_edge(head, n, EdgeKind::Call {
            ret: None,
            callee: "missing".to_string(),
            args: vec![],
        });
        assert!(matches!(cfg.validate(), Err(AnalysisError::MalformedCfg(_))));
    }
}
