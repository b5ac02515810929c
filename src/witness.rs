//! Invariant export for external witness writers.
//!
//! Loop invariants are taken at loop heads and preconditions at function
//! entries, joined over every context. Each invariant is a conjunction of
//! facts written as C expressions over the variables in scope.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cfg::{Cfg, Location};
use crate::congruence::Congruence;
use crate::domain::Lattice;
use crate::int::IntValue;
use crate::interval::Bound;
use crate::pointer::{AddrSet, Base, Cell};
use crate::relational::RelationalKind;
use crate::solver::Solution;
use crate::state::{State, RET};
use crate::types::NodeId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantKind {
    LoopInvariant,
    Precondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invariant {
    pub kind: InvariantKind,
    pub function: String,
    pub node: NodeId,
    pub location: Option<Location>,
    pub facts: Vec<String>,
    /// Conjunction of `facts`, `1` if there are none
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantExport {
    pub invariants: Vec<Invariant>,
}

impl InvariantExport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn at(&self, node: NodeId) -> Option<&Invariant> {
        self.invariants.iter().find(|i| i.node == node)
    }
}

/// Invariants of every reachable loop head and function entry.
pub fn export(solution: &Solution, cfg: &Cfg) -> InvariantExport {
    let mut points: Vec<(NodeId, InvariantKind)> = cfg
        .loop_heads()
        .iter()
        .map(|n| (*n, InvariantKind::LoopInvariant))
        .collect();
    points.extend(cfg.functions.values().map(|f| (f.entry, InvariantKind::Precondition)));
    points.sort();

    let invariants: Vec<Invariant> = points
        .into_iter()
        .filter_map(|(node, kind)| {
            let state = solution.state_at(node);
            if state.is_bottom() {
                return None;
            }
            let function = cfg.function_of(node);
            let facts = facts(&state, function);
            let expression = if facts.is_empty() {
                "1".to_string()
            } else {
                facts.join(" && ")
            };
            Some(Invariant {
                kind,
                function: function.to_string(),
                node,
                location: cfg.node(node).location,
                facts,
                expression,
            })
        })
        .collect();
    log::info!("exported {} invariant(s)", invariants.len());
    InvariantExport { invariants }
}

/// Facts of `state` over the globals and the locals of `function`.
pub fn facts(state: &State, function: &str) -> Vec<String> {
    let mut out = BTreeSet::new();
    for (cell, value) in &state.cells {
        let visible = match &cell.base {
            Base::Global(_) => true,
            Base::Local { function: f, name } => f == function && name != RET,
            Base::Heap(_) | Base::Opaque { .. } => false,
        };
        if !visible {
            continue;
        }
        match value {
            Value::Int(v) => out.extend(int_facts(cell, v)),
            Value::Addr(a) if *a == AddrSet::null() => {
                out.insert(format!("{} == 0", cell));
            }
            _ => {}
        }
    }
    if matches!(state.rel.kind(), RelationalKind::Octagon | RelationalKind::Polyhedra) {
        out.extend(state.rel.constraints());
    }
    out.into_iter().collect()
}

fn int_facts(cell: &Cell, value: &IntValue) -> Vec<String> {
    let interval = value.interval;
    if let Some(c) = value.as_constant() {
        return vec![format!("{} == {}", cell, c)];
    }
    let mut out = Vec::new();
    if let Bound::Finite(low) = interval.low {
        out.push(format!("{} >= {}", cell, low));
    }
    if let Bound::Finite(high) = interval.high {
        out.push(format!("{} <= {}", cell, high));
    }
    // C remainders of negative numbers are negative.
    let non_negative = matches!(interval.low, Bound::Finite(l) if l >= 0);
    if let Congruence::Val(c, k) = value.congruence {
        if k > 1 && non_negative {
            out.push(format!("{} % {} == {}", cell, k, c.rem_euclid(k)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::config::{AnalysisConfig, DomainSet};
    use crate::expr::{Expr, Stmt};
    use crate::lower::ProgramBuilder;
    use crate::solver::Solver;

    #[test]
    fn test_loop_invariant() {
        let mut builder = ProgramBuilder::new();
        builder.function(
            "main",
            &[],
            vec![
                Stmt::set("i", 0),
                Stmt::while_loop(
                    Expr::var("i").lt(Expr::constant(10)),
                    vec![Stmt::set("i", Expr::var("i").add(Expr::constant(2)))],
                ),
            ],
        );
        let cfg = builder.build();
        let config = AnalysisConfig::default().with_domains(DomainSet::ALL);
        let solution = Solver::new(&cfg, &config).solve().unwrap();
        let export = export(&solution, &cfg);

        let head = *cfg.loop_heads().iter().next().unwrap();
        let invariant = export.at(head).unwrap();
        assert_eq!(invariant.kind, InvariantKind::LoopInvariant);
        assert!(invariant.facts.contains(&"i >= 0".to_string()));
        assert!(invariant.facts.contains(&"i % 2 == 0".to_string()));

        let entry = cfg.functions["main"].entry;
        assert_eq!(export.at(entry).unwrap().expression, "1");

        let json = export.to_json().unwrap();
        assert!(json.contains("\"loop_invariant\""));
        assert_eq!(InvariantExport::from_json(&json).unwrap(), export);
    }

    #[test]
    fn test_int_facts() {
        let cell = Cell::global("g");
        assert_eq!(int_facts(&cell, &IntValue::constant(4)), vec!["g == 4"]);
        assert_eq!(int_facts(&cell, &IntValue::range(1, 5)), vec!["g >= 1", "g <= 5"]);
    }
}
