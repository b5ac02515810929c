//! Modular analysis: functions analysed once, in isolation from their callers.
//!
//! A modular function starts from a state that knows nothing about its
//! callers: integer parameters are top, pointer parameters point to an
//! opaque object owned by the caller, and globals read as top at every read.
//! Its effects are collected in a [`ModularSummary`] that call sites apply
//! instead of analysing the body again.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::cfg::{Cfg, Ty};
use crate::config::AnalysisConfig;
use crate::domain::Lattice;
use crate::pointer::{AddrSet, Cell};
use crate::solver::{GKey, GVal};
use crate::state::{scalar_paths, Env, State};
use crate::value::Value;

/// Effects of a modular function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModularSummary {
    /// Globals and caller-owned cells the function may read
    pub reads: BTreeSet<Cell>,
    /// Cells the function may write, with the joined written values
    pub writes: BTreeMap<Cell, Value>,
    /// Join of the returned values
    pub ret: Value,
    pub returns: bool,
    /// Anything may happen (write through an unknown pointer, recursion bound hit)
    pub top: bool,
}

/// Nothing read or written, and the function never returns.
impl Default for ModularSummary {
    fn default() -> Self {
        ModularSummary {
            reads: BTreeSet::new(),
            writes: BTreeMap::new(),
            ret: Value::Bottom,
            returns: false,
            top: false,
        }
    }
}

impl ModularSummary {
    pub fn top() -> Self {
        ModularSummary {
            ret: Value::Top,
            returns: true,
            top: true,
            ..ModularSummary::default()
        }
    }

    fn read(cell: &Cell) -> Self {
        ModularSummary {
            reads: BTreeSet::from([cell.clone()]),
            ..ModularSummary::default()
        }
    }

    fn write(cell: &Cell, value: &Value) -> Self {
        ModularSummary {
            writes: BTreeMap::from([(cell.clone(), value.clone())]),
            ..ModularSummary::default()
        }
    }

    /// Summary of a function exit reached with `ret`.
    pub fn exit(ret: Value) -> Self {
        ModularSummary {
            ret,
            returns: true,
            ..ModularSummary::default()
        }
    }

    pub fn le(&self, other: &ModularSummary) -> bool {
        if other.top {
            return true;
        }
        !self.top
            && (!self.returns || other.returns)
            && self.ret.le(&other.ret)
            && self.reads.is_subset(&other.reads)
            && self
                .writes
                .iter()
                .all(|(c, v)| other.writes.get(c).map_or(false, |w| v.le(w)))
    }

    fn merge(&self, other: &ModularSummary, f: impl Fn(&Value, &Value) -> Value) -> ModularSummary {
        if self.top || other.top {
            return ModularSummary::top();
        }
        let mut writes = self.writes.clone();
        for (c, w) in &other.writes {
            let v = match writes.get(c) {
                Some(v) => f(v, w),
                None => w.clone(),
            };
            writes.insert(c.clone(), v);
        }
        ModularSummary {
            reads: self.reads.union(&other.reads).cloned().collect(),
            writes,
            ret: f(&self.ret, &other.ret),
            returns: self.returns || other.returns,
            top: false,
        }
    }

    pub fn join(&self, other: &ModularSummary) -> ModularSummary {
        self.merge(other, |a, b| a.join(b))
    }

    pub fn widen(&self, other: &ModularSummary) -> ModularSummary {
        self.merge(other, |a, b| a.widen(b))
    }
}

impl fmt::Display for ModularSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.top {
            return write!(f, "⊤");
        }
        let reads: Vec<String> = self.reads.iter().map(|c| c.to_string()).collect();
        let writes: Vec<String> = self.writes.iter().map(|(c, v)| format!("{} := {}", c, v)).collect();
        write!(f, "reads {{{}}} writes {{{}}}", reads.join(", "), writes.join(", "))?;
        if self.returns {
            write!(f, " returns {}", self.ret)
        } else {
            write!(f, " never returns")
        }
    }
}

/// Entry state of `function` analysed without a caller.
pub fn entry_state(cfg: &Cfg, config: &AnalysisConfig, function: &str) -> State {
    let mut state = State::new(config.relational);
    let Some(f) = cfg.function(function) else {
        return State::unreachable();
    };
    for param in &f.params {
        let base = Cell::local(function, &param.name);
        match &param.ty {
            Ty::Ptr(_) => state.set(base, Value::Addr(AddrSet::opaque(function, &param.name))),
            ty @ Ty::Struct(_) => {
                for path in scalar_paths(cfg, ty) {
                    let cell = path.iter().fold(base.clone(), |c, p| c.field(p));
                    let value = match crate::state::cell_type(cfg, &cell) {
                        Some(Ty::Ptr(_)) => Value::Addr(AddrSet::Top),
                        _ => Value::Top,
                    };
                    state.set(cell, value);
                }
            }
            _ => state.set(base, Value::Top),
        }
    }
    state
}

fn summary_key(env: &Env) -> GKey {
    GKey::Summary(env.function.to_string())
}

pub fn record_read(env: &mut Env, cell: &Cell) {
    let key = summary_key(env);
    env.globals.side(key, GVal::Summary(Box::new(ModularSummary::read(cell))));
}

pub fn record_write(env: &mut Env, cell: &Cell, value: &Value) {
    let key = summary_key(env);
    env.globals
        .side(key, GVal::Summary(Box::new(ModularSummary::write(cell, value))));
}

/// A write through an unknown pointer: the caller can assume nothing.
pub fn record_havoc(env: &mut Env) {
    log::debug!("modular function `{}` writes through an unknown pointer", env.function);
    let key = summary_key(env);
    env.globals.side(key, GVal::Summary(Box::new(ModularSummary::top())));
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::interval::Interval;

    #[test]
    fn test_summary_join() {
        let g = Cell::global("g");
        let a = ModularSummary::write(&g, &Value::int(1)).join(&ModularSummary::read(&g));
        let b = ModularSummary::write(&g, &Value::int(3)).join(&ModularSummary::exit(Value::int(0)));
        let joined = a.join(&b);
        let written = joined.writes.get(&g).map(|v| v.as_int().interval);
        assert_eq!(written, Some(Interval::range(1, 3)));
        assert!(joined.reads.contains(&g));
        assert!(joined.returns);
        assert!(a.le(&joined));
        assert!(b.le(&joined));
        assert!(!joined.le(&a));
        assert!(joined.le(&ModularSummary::top()));
        assert!(ModularSummary::default().le(&a));
    }
}
