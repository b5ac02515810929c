//! Incremental re-analysis after a program edit.
//!
//! Nodes of the old and the new CFG are matched by id; the front end keeps
//! ids stable for unchanged code. A re-run starts from the previous local
//! store minus the keys whose node is affected by the edit, and from the
//! complete previous global store. Function start states and published
//! globals are therefore joined with their previous values, never replaced:
//! a value that the edited program no longer produces stays visible until
//! the next full run.

use std::collections::{BTreeMap, BTreeSet};

use crate::cfg::{Cfg, EdgeKind};
use crate::config::AnalysisConfig;
use crate::context::Context;
use crate::error::Result;
use crate::solver::{Dep, GKey, GVal, LocalKey, Solution, Solver, Store};
use crate::state::State;
use crate::types::NodeId;

/// Nodes whose incoming transitions changed between two versions of a program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementalDelta {
    pub nodes: BTreeSet<NodeId>,
}

impl IncrementalDelta {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Compare two versions of a program.
    pub fn diff(old: &Cfg, new: &Cfg) -> Self {
        let mut nodes = BTreeSet::new();
        for node in new.nodes() {
            let id = node.id;
            if id.index() >= old.num_nodes() || old.function_of(id) != node.function {
                nodes.insert(id);
                continue;
            }
            let incoming = |cfg: &Cfg| {
                let mut edges: Vec<(NodeId, EdgeKind)> = cfg.in_edges(id).map(|e| (e.src, e.kind.clone())).collect();
                edges.sort_by_key(|(src, kind)| (*src, kind.to_string()));
                edges
            };
            if incoming(old) != incoming(new) {
                nodes.insert(id);
            }
        }
        for (name, f) in &new.functions {
            if old.function(name) != Some(f) {
                nodes.insert(f.entry);
            }
        }
        if old.globals != new.globals || old.structs != new.structs || old.mutexes != new.mutexes {
            log::debug!("declarations changed: restarting the root functions");
            let called: BTreeSet<&str> = new
                .edges()
                .filter_map(|e| match &e.kind {
                    EdgeKind::Call { callee, .. } => Some(callee.as_str()),
                    EdgeKind::Spawn { function, .. } => Some(function.as_str()),
                    _ => None,
                })
                .collect();
            nodes.extend(
                new.functions
                    .values()
                    .filter(|f| !called.contains(f.name.as_str()))
                    .map(|f| f.entry),
            );
        }
        log::info!("{} node(s) changed", nodes.len());
        IncrementalDelta { nodes }
    }

    /// Every node whose value may depend on a changed node.
    pub fn forward_closure(&self, cfg: &Cfg) -> BTreeSet<NodeId> {
        let mut return_sites: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();
        for edge in cfg.edges() {
            if let EdgeKind::Call { callee, .. } = &edge.kind {
                return_sites.entry(callee.as_str()).or_default().push(edge.dst);
            }
        }
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        let mut work: Vec<NodeId> = self.nodes.iter().copied().filter(|n| n.index() < cfg.num_nodes()).collect();
        while let Some(node) = work.pop() {
            if !seen.insert(node) {
                continue;
            }
            for edge in cfg.out_edges(node) {
                work.push(edge.dst);
                let entered = match &edge.kind {
                    EdgeKind::Call { callee, .. } => cfg.function(callee),
                    EdgeKind::Spawn { function, .. } => cfg.function(function),
                    _ => None,
                };
                work.extend(entered.map(|f| f.entry));
            }
            let function = cfg.function_of(node);
            if cfg.function(function).map(|f| f.exit) == Some(node) {
                work.extend(return_sites.get(function).into_iter().flatten().copied());
            }
        }
        seen
    }
}

/// What an analysis run leaves behind for the next one.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub states: BTreeMap<LocalKey, State>,
    pub globals: BTreeMap<GKey, GVal>,
    infl: BTreeMap<Dep, BTreeSet<LocalKey>>,
}

impl From<Solution> for Snapshot {
    fn from(solution: Solution) -> Self {
        Snapshot {
            states: solution.states,
            globals: solution.globals,
            infl: solution.infl,
        }
    }
}

impl From<&Solution> for Snapshot {
    fn from(solution: &Solution) -> Self {
        Snapshot::from(solution.clone())
    }
}

/// Re-solve `cfg` starting from `snapshot`, restarting the nodes reachable from `delta`.
pub fn resolve(cfg: &Cfg, config: &AnalysisConfig, snapshot: Snapshot, delta: &IncrementalDelta) -> Result<Solution> {
    let affected = delta.forward_closure(cfg);
    log::info!("restarting {} of {} node(s)", affected.len(), cfg.num_nodes());

    // Contexts each function was analysed in before the edit.
    let mut contexts: BTreeMap<String, BTreeSet<Context>> = BTreeMap::new();
    for (node, context) in snapshot.states.keys() {
        if node.index() < cfg.num_nodes() {
            contexts
                .entry(cfg.function_of(*node).to_string())
                .or_default()
                .insert(context.clone());
        }
    }

    let mut store = Store::default();
    store.locals = snapshot
        .states
        .into_iter()
        .filter(|((node, _), _)| node.index() < cfg.num_nodes() && !affected.contains(node))
        .collect();
    store.globals = snapshot.globals;
    store.infl = snapshot.infl;

    let mut solver = Solver::with_store(cfg, config, store);
    for node in &affected {
        for context in contexts.get(cfg.function_of(*node)).into_iter().flatten() {
            solver.touch((*node, context.clone()));
        }
    }
    solver.solve()
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::expr::{Expr, Stmt};
    use crate::lower::ProgramBuilder;

    fn program(init: i64) -> Cfg {
        let mut builder = ProgramBuilder::new();
        builder.function("helper", &[], vec![Stmt::set("y", 1)]);
        builder.function(
            "main",
            &[],
            vec![
                Stmt::set("x", init),
                Stmt::call("helper", vec![]),
                Stmt::set("z", Expr::var("x").add(Expr::constant(1))),
            ],
        );
        builder.build()
    }

    #[test]
    fn test_unchanged_program_has_empty_delta() {
        assert!(IncrementalDelta::diff(&program(1), &program(1)).is_empty());
    }

    #[test]
    fn test_changed_assignment() {
        let old = program(1);
        let new = program(2);
        let delta = IncrementalDelta::diff(&old, &new);
        assert_eq!(delta.nodes.len(), 1);
        let closure = delta.forward_closure(&new);
        let main = &new.functions["main"];
        let helper = &new.functions["helper"];
        assert!(closure.contains(&main.exit));
        assert!(closure.contains(&helper.entry));
        assert!(!closure.contains(&main.entry));
    }

    #[test]
    fn test_resolve_unchanged_matches_full_run() {
        let cfg = program(1);
        let config = AnalysisConfig::default();
        let full = Solver::new(&cfg, &config).solve().unwrap();
        let delta = IncrementalDelta::diff(&cfg, &cfg);
        let again = resolve(&cfg, &config, Snapshot::from(&full), &delta).unwrap();
        assert_eq!(again.states, full.states);
        assert_eq!(again.globals, full.globals);
    }
}
