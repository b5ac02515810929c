//! Lowering of structured statements into a [`Cfg`].
//!
//! A small stand-in for a C front end: each statement becomes one or more
//! edges, conditionals become pairs of guard edges, and loops get a head node
//! that the back edge returns to. Every lowered statement gets its own
//! source line, so that nodes can be reported by location.
//!
//! ```
//! use absint_rs::expr::{Expr, Stmt};
//! use absint_rs::lower::ProgramBuilder;
//!
//! let mut builder = ProgramBuilder::new();
//! builder.global_init("counter", 0);
//! builder.function(
//!     "main",
//!     &[],
//!     vec![
//!         Stmt::set("counter", 1),
//!         Stmt::Check(Expr::var("counter").eq(Expr::constant(1))),
//!     ],
//! );
//! let cfg = builder.build();
//! assert_eq!(cfg.checks().len(), 1);
//! ```

use crate::cfg::{Cfg, EdgeKind, Function, GlobalDecl, Location, Ty, VarDecl};
use crate::expr::Stmt;
use crate::locks::MutexKind;
use crate::types::NodeId;

/// Builds a [`Cfg`] function by function.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    cfg: Cfg,
    line: u32,
}

/// Lowering state of one function.
struct Lowering<'b> {
    cfg: &'b mut Cfg,
    line: &'b mut u32,
    function: String,
    exit: NodeId,
}

impl Lowering<'_> {
    fn node(&mut self) -> NodeId {
        let location = Location {
            line: *self.line,
            column: 1,
        };
        self.cfg.add_node(&self.function, Some(location))
    }

    fn edge(&mut self, src: NodeId, kind: EdgeKind) -> NodeId {
        let dst = self.node();
        self.cfg.add_edge(src, dst, kind);
        dst
    }

    /// Lower `stmt` starting at `at`; returns the node after it.
    fn lower(&mut self, stmt: &Stmt, at: NodeId) -> NodeId {
        if !matches!(stmt, Stmt::Block(_)) {
            *self.line += 1;
        }
        match stmt {
            Stmt::Skip => at,
            Stmt::Block(stmts) => stmts.iter().fold(at, |cur, s| self.lower(s, cur)),
            Stmt::Assign(lv, e) => self.edge(at, EdgeKind::Assign(lv.clone(), e.clone())),
            Stmt::Assume(c) => self.edge(at, EdgeKind::Guard(c.clone())),
            Stmt::Check(c) => {
                let id = self.cfg.fresh_check();
                self.edge(at, EdgeKind::Check(id, c.clone()))
            }
            Stmt::Havoc(lv) => self.edge(at, EdgeKind::Havoc(lv.clone())),
            Stmt::Alloc(lv) => self.edge(at, EdgeKind::Alloc(lv.clone())),
            Stmt::Call { ret, callee, args } => self.edge(
                at,
                EdgeKind::Call {
                    ret: ret.clone(),
                    callee: callee.clone(),
                    args: args.clone(),
                },
            ),
            Stmt::Lock(m) => self.edge(at, EdgeKind::Lock(m.clone())),
            Stmt::Unlock(m) => self.edge(at, EdgeKind::Unlock(m.clone())),
            Stmt::Spawn { function, arg } => self.edge(
                at,
                EdgeKind::Spawn {
                    function: function.clone(),
                    arg: arg.clone(),
                },
            ),
            Stmt::Join(function) => self.edge(at, EdgeKind::Join(function.clone())),
            Stmt::Return(e) => {
                self.cfg.add_edge(at, self.exit, EdgeKind::Return(e.clone()));
                // Code after a return is unreachable.
                self.node()
            }
            Stmt::If(c, then, otherwise) => {
                let then_start = self.edge(at, EdgeKind::Guard(c.clone()));
                let else_start = self.edge(at, EdgeKind::Guard(c.negate()));
                let then_end = self.lower(then, then_start);
                let else_end = self.lower(otherwise, else_start);
                let join = self.node();
                self.cfg.add_edge(then_end, join, EdgeKind::Skip);
                self.cfg.add_edge(else_end, join, EdgeKind::Skip);
                join
            }
            Stmt::While(c, body) => {
                let head = self.edge(at, EdgeKind::Skip);
                let body_start = self.edge(head, EdgeKind::Guard(c.clone()));
                let after = self.edge(head, EdgeKind::Guard(c.negate()));
                let body_end = self.lower(body, body_start);
                self.cfg.add_edge(body_end, head, EdgeKind::Skip);
                after
            }
        }
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-initialized global.
    pub fn global(&mut self, name: &str, ty: Ty) -> &mut Self {
        self.global_decl(GlobalDecl {
            decl: VarDecl::new(name, ty),
            init: Vec::new(),
        })
    }

    /// Integer global with an initializer.
    pub fn global_init(&mut self, name: &str, value: i64) -> &mut Self {
        self.global_decl(GlobalDecl {
            decl: VarDecl::new(name, Ty::Int),
            init: vec![(Vec::new(), value)],
        })
    }

    pub fn global_decl(&mut self, global: GlobalDecl) -> &mut Self {
        self.cfg.globals.insert(global.decl.name.clone(), global);
        self
    }

    pub fn struct_type(&mut self, name: &str, fields: Vec<VarDecl>) -> &mut Self {
        self.cfg.structs.insert(name.to_string(), fields);
        self
    }

    pub fn mutex(&mut self, name: &str, kind: MutexKind) -> &mut Self {
        self.cfg.mutexes.insert(name.to_string(), kind);
        self
    }

    /// Function whose locals are all `int`, declared implicitly by use.
    pub fn function(&mut self, name: &str, params: &[VarDecl], body: Vec<Stmt>) -> &mut Self {
        self.function_with_locals(name, params, Vec::new(), body)
    }

    pub fn function_with_locals(
        &mut self,
        name: &str,
        params: &[VarDecl],
        locals: Vec<VarDecl>,
        body: Vec<Stmt>,
    ) -> &mut Self {
        self.line += 1;
        let location = Some(Location {
            line: self.line,
            column: 1,
        });
        let entry = self.cfg.add_node(name, location);
        let exit = self.cfg.add_node(name, None);
        let mut lowering = Lowering {
            cfg: &mut self.cfg,
            line: &mut self.line,
            function: name.to_string(),
            exit,
        };
        let end = lowering.lower(&Stmt::Block(body), entry);
        self.cfg.add_edge(end, exit, EdgeKind::Skip);
        self.cfg.functions.insert(
            name.to_string(),
            Function {
                name: name.to_string(),
                params: params.to_vec(),
                locals,
                entry,
                exit,
            },
        );
        self
    }

    /// Finish the program: computes loop heads.
    pub fn build(mut self) -> Cfg {
        self.cfg.finalize();
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::expr::Expr;

    #[test]
    fn test_while_has_one_loop_head() {
        let mut builder = ProgramBuilder::new();
        builder.function(
            "main",
            &[],
            vec![
                Stmt::set("i", 0),
                Stmt::while_loop(
                    Expr::var("i").lt(Expr::constant(10)),
                    vec![Stmt::set("i", Expr::var("i").add(Expr::constant(1)))],
                ),
            ],
        );
        let cfg = builder.build();
        assert_eq!(cfg.loop_heads().len(), 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_if_joins_both_branches() {
        let mut builder = ProgramBuilder::new();
        builder.function(
            "main",
            &[],
            vec![Stmt::if_else(
                Expr::var("c").truthy(),
                vec![Stmt::set("x", 1)],
                vec![Stmt::set("x", 2)],
            )],
        );
        let cfg = builder.build();
        let exit = cfg.functions["main"].exit;
        let before_exit: Vec<NodeId> = cfg.in_edges(exit).map(|e| e.src).collect();
        assert_eq!(before_exit.len(), 1);
        assert_eq!(cfg.in_edges(before_exit[0]).count(), 2);
        assert!(cfg.loop_heads().is_empty());
    }

    #[test]
    fn test_return_leads_to_exit() {
        let mut builder = ProgramBuilder::new();
        builder.function("f", &[], vec![Stmt::Return(Some(Expr::constant(3))), Stmt::set("dead", 1)]);
        let cfg = builder.build();
        let exit = cfg.functions["f"].exit;
        let kinds: Vec<String> = cfg.in_edges(exit).map(|e| e.kind.to_string()).collect();
        assert_eq!(kinds, vec!["return 3".to_string(), "skip".to_string()]);
    }
}
