//! Verdicts and warnings, collected from a solved program.
//!
//! The report pass replays every edge leaving a reachable (node, context)
//! pair once more against the final states. Checks are decided on the
//! state before the check edge, lock operations against the held locks,
//! and the accesses to globals recorded by the replay feed the race
//! detection.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cfg::{Cfg, EdgeKind, Location};
use crate::config::AnalysisConfig;
use crate::domain::Lattice;
use crate::int::Truth;
use crate::pointer::Cell;
use crate::privatization::Access;
use crate::solver::{transfer, Frozen, Solution};
use crate::state::Env;
use crate::types::{CheckId, EdgeId, NodeId, ThreadId};

/// Outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Holds in every reachable state
    Proven,
    /// Fails in every reachable state
    Refuted,
    Unknown,
}

impl Verdict {
    pub fn from_truth(truth: Truth) -> Self {
        match truth {
            Truth::True => Verdict::Proven,
            Truth::False => Verdict::Refuted,
            Truth::Unknown => Verdict::Unknown,
        }
    }

    /// Verdict over several contexts.
    pub fn combine(self, other: Verdict) -> Verdict {
        if self == other {
            self
        } else {
            Verdict::Unknown
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Proven => write!(f, "proven"),
            Verdict::Refuted => write!(f, "refuted"),
            Verdict::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: CheckId,
    pub node: NodeId,
    pub location: Option<Location>,
    /// The checked condition, as C source
    pub condition: String,
    pub verdict: Verdict,
    /// `false` if no context reaches the check; the verdict is then vacuously `Proven`.
    pub reachable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockOp {
    Lock,
    Unlock,
}

/// Safety of one lock or unlock edge: `Proven` means no misuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCheck {
    pub edge: EdgeId,
    pub mutex: String,
    pub op: LockOp,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Warning {
    /// Lock of a non-recursive mutex that is (or may be) held already
    DoubleLock { mutex: String, edge: EdgeId, definite: bool },
    /// Unlock of a mutex that is (or may be) not held
    UnlockNotHeld { mutex: String, edge: EdgeId, definite: bool },
    /// Two accesses to a global that may happen in parallel without a common lock
    Race { cell: Cell, first: Access, second: Access },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let certainty = |definite: bool| if definite { "" } else { "possible " };
        match self {
            Warning::DoubleLock { mutex, edge, definite } => {
                write!(f, "{}double lock of `{}` at {}", certainty(*definite), mutex, edge)
            }
            Warning::UnlockNotHeld { mutex, edge, definite } => {
                write!(f, "{}unlock of `{}` not held at {}", certainty(*definite), mutex, edge)
            }
            Warning::Race { cell, first, second } => {
                let kind = |a: &Access| if a.write { "write" } else { "read" };
                write!(
                    f,
                    "race on {}: {} by {} at {} and {} by {} at {}",
                    cell,
                    kind(first),
                    first.thread,
                    first.edge,
                    kind(second),
                    second.thread,
                    second.edge
                )
            }
        }
    }
}

/// Everything the report pass produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub checks: Vec<CheckResult>,
    pub locks: Vec<LockCheck>,
    pub warnings: Vec<Warning>,
}

/// Decide every check and lock operation and detect races.
pub fn collect(cfg: &Cfg, config: &AnalysisConfig, solution: &Solution) -> Report {
    let mut frozen = Frozen::new(solution, cfg);
    let mut checks: BTreeMap<CheckId, Verdict> = BTreeMap::new();
    let mut locks: BTreeMap<(EdgeId, LockOp), Verdict> = BTreeMap::new();

    for ((node, context), state) in &solution.states {
        if state.is_bottom() {
            continue;
        }
        let function = cfg.function_of(*node);
        for edge in cfg.out_edges(*node) {
            // Replay for the accesses it records.
            transfer(cfg, config, function, context, edge, state, &mut frozen);
            let mut env = Env {
                cfg,
                config,
                function,
                thread: &context.thread,
                edge: edge.id,
                modular: context.is_modular(),
                globals: &mut frozen,
            };
            let (key, verdict) = match &edge.kind {
                EdgeKind::Check(id, cond) => {
                    let verdict = Verdict::from_truth(state.check(&mut env, cond));
                    log::debug!("{} in {}: {}", id, context, verdict);
                    let entry = checks.entry(*id).or_insert(verdict);
                    *entry = entry.combine(verdict);
                    continue;
                }
                EdgeKind::Lock(m) => (
                    (edge.id, LockOp::Lock),
                    Verdict::from_truth(state.locks.lock_safety(m, cfg.mutex_kind(m))),
                ),
                EdgeKind::Unlock(m) => ((edge.id, LockOp::Unlock), Verdict::from_truth(state.locks.unlock_safety(m))),
                _ => continue,
            };
            let entry = locks.entry(key).or_insert(verdict);
            *entry = entry.combine(verdict);
        }
    }

    let mut report = Report::default();
    for (id, node, cond) in cfg.checks() {
        let reached = checks.get(&id).copied();
        report.checks.push(CheckResult {
            id,
            node,
            location: cfg.node(node).location,
            condition: cond.to_string(),
            verdict: reached.unwrap_or(Verdict::Proven),
            reachable: reached.is_some(),
        });
    }
    for ((edge, op), verdict) in locks {
        let mutex = match &cfg.edge(edge).kind {
            EdgeKind::Lock(m) | EdgeKind::Unlock(m) => m.clone(),
            _ => continue,
        };
        if verdict != Verdict::Proven {
            let definite = verdict == Verdict::Refuted;
            report.warnings.push(match op {
                LockOp::Lock => Warning::DoubleLock {
                    mutex: mutex.clone(),
                    edge,
                    definite,
                },
                LockOp::Unlock => Warning::UnlockNotHeld {
                    mutex: mutex.clone(),
                    edge,
                    definite,
                },
            });
        }
        report.locks.push(LockCheck { edge, mutex, op, verdict });
    }
    report.warnings.extend(races(&frozen.accesses));
    report
}

/// One race warning per global, for the first racing pair in access order.
pub fn races(accesses: &BTreeMap<Cell, BTreeSet<Access>>) -> Vec<Warning> {
    let mut warnings = Vec::new();
    for (cell, set) in accesses {
        let list: Vec<&Access> = set.iter().collect();
        let pair = list
            .iter()
            .enumerate()
            .flat_map(|(i, a)| list[i..].iter().map(move |b| (*a, *b)))
            .find(|(a, b)| may_race(a, b));
        if let Some((first, second)) = pair {
            log::debug!("race on {}", cell);
            warnings.push(Warning::Race {
                cell: cell.clone(),
                first: first.clone(),
                second: second.clone(),
            });
        }
    }
    warnings
}

/// Whether two accesses to the same global form a data race.
pub fn may_race(a: &Access, b: &Access) -> bool {
    if !(a.write || b.write) || !a.locks.is_disjoint(&b.locks) {
        return false;
    }
    if a.thread == b.thread {
        // A unique thread is ordered with itself.
        return !a.thread.is_unique();
    }
    !ordered_before(a, b) && !ordered_before(b, a)
}

/// Whether every access of `b.thread` happens after `a` or has finished before it.
fn ordered_before(a: &Access, b: &Access) -> bool {
    if a.joined.contains(&b.thread) {
        return true;
    }
    if !a.thread.is_unique() {
        return false;
    }
    // `b` runs in a descendant of a thread that `a.thread` had not created yet.
    match child_towards(&a.thread, &b.thread) {
        Some(child) => !a.created.contains(child),
        None => false,
    }
}

/// The thread created by `ancestor` on the creation chain of `thread`.
fn child_towards<'t>(ancestor: &ThreadId, thread: &'t ThreadId) -> Option<&'t ThreadId> {
    match thread {
        ThreadId::Main => None,
        ThreadId::Created { parent, .. } if **parent == *ancestor => Some(thread),
        ThreadId::Created { parent, .. } => child_towards(ancestor, parent),
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn thread(function: &str, site: u32, unique: bool) -> ThreadId {
        ThreadId::Created {
            parent: Box::new(ThreadId::Main),
            site: EdgeId::new(site),
            function: function.to_string(),
            unique,
        }
    }

    fn access(thread: ThreadId, write: bool, locks: &[&str]) -> Access {
        Access {
            thread,
            write,
            locks: locks.iter().map(|m| m.to_string()).collect(),
            joined: BTreeSet::new(),
            created: BTreeSet::new(),
            edge: EdgeId::new(0),
        }
    }

    /// `access` happens after its thread created `child`.
    fn after_spawn(mut access: Access, child: &ThreadId) -> Access {
        access.created.insert(child.clone());
        access
    }

    #[test]
    fn test_verdict_combine() {
        assert_eq!(Verdict::Proven.combine(Verdict::Proven), Verdict::Proven);
        assert_eq!(Verdict::Refuted.combine(Verdict::Refuted), Verdict::Refuted);
        assert_eq!(Verdict::Proven.combine(Verdict::Refuted), Verdict::Unknown);
        assert_eq!(Verdict::Unknown.combine(Verdict::Proven), Verdict::Unknown);
    }

    #[test]
    fn test_race_needs_a_write() {
        let t = thread("t", 1, true);
        let read = after_spawn(access(ThreadId::Main, false, &[]), &t);
        let write = after_spawn(access(ThreadId::Main, true, &[]), &t);
        assert!(!may_race(&read, &access(t.clone(), false, &[])));
        assert!(may_race(&write, &access(t, false, &[])));
    }

    #[test]
    fn test_common_lock_excludes_race() {
        let t = thread("t", 1, true);
        let a = after_spawn(access(ThreadId::Main, true, &["m"]), &t);
        let b = access(t.clone(), true, &["m", "n"]);
        assert!(!may_race(&a, &b));
        let c = access(t, true, &["n"]);
        assert!(may_race(&a, &c));
    }

    #[test]
    fn test_same_thread() {
        let unique = thread("t", 1, true);
        let shared = thread("t", 2, false);
        assert!(!may_race(&access(unique.clone(), true, &[]), &access(unique, true, &[])));
        assert!(may_race(&access(shared.clone(), true, &[]), &access(shared, true, &[])));
    }

    #[test]
    fn test_join_and_creation_order() {
        let t = thread("t", 1, true);
        let mut before = access(ThreadId::Main, true, &[]);
        let worker = access(t.clone(), true, &[]);
        // Main had not created `t` yet.
        assert!(!may_race(&before, &worker));

        before.created.insert(t.clone());
        assert!(may_race(&before, &worker));

        before.joined.insert(t);
        assert!(!may_race(&before, &worker));
    }

    #[test]
    fn test_races_report_one_pair_per_cell() {
        let t = thread("t", 1, false);
        let accesses = BTreeMap::from([
            (Cell::global("g"), BTreeSet::from([access(t.clone(), true, &[])])),
            (Cell::global("h"), BTreeSet::from([access(t, true, &["m"])])),
        ]);
        // A non-unique thread races with itself unless it holds a lock.
        let warnings = races(&accesses);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(&warnings[0], Warning::Race { cell, .. } if *cell == Cell::global("g")));
    }
}
