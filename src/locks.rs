//! Lock sets of the analysed program.
//!
//! Mutexes are abstract names; the analyzer never acquires real locks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Lattice;
use crate::int::Truth;

/// Mutex type, as set by `pthread_mutexattr_settype` or the initializer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MutexKind {
    /// `PTHREAD_MUTEX_DEFAULT`; relocking it is undefined, so it counts as non-recursive.
    #[default]
    Default,
    Recursive,
    ErrorCheck,
    Spin,
}

impl MutexKind {
    pub fn is_recursive(&self) -> bool {
        matches!(self, MutexKind::Recursive)
    }
}

/// Locks held at a program point.
///
/// `must` maps each definitely held mutex to a lower bound on its recursion
/// depth; `may` contains every mutex that is possibly held.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LockSet {
    must: BTreeMap<String, u32>,
    may: BTreeSet<String>,
}

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must_hold(&self, mutex: &str) -> bool {
        self.must.contains_key(mutex)
    }

    pub fn may_hold(&self, mutex: &str) -> bool {
        self.may.contains(mutex)
    }

    pub fn must_held(&self) -> BTreeSet<String> {
        self.must.keys().cloned().collect()
    }

    pub fn may_held(&self) -> &BTreeSet<String> {
        &self.may
    }

    pub fn is_empty(&self) -> bool {
        self.may.is_empty()
    }

    /// Whether `lock(mutex)` is safe: `False` for a definite relock of a
    /// non-recursive mutex, `Unknown` if it may already be held.
    pub fn lock_safety(&self, mutex: &str, kind: MutexKind) -> Truth {
        if kind.is_recursive() {
            Truth::True
        } else if self.must_hold(mutex) {
            Truth::False
        } else if self.may_hold(mutex) {
            Truth::Unknown
        } else {
            Truth::True
        }
    }

    /// Whether `unlock(mutex)` releases a held mutex.
    pub fn unlock_safety(&self, mutex: &str) -> Truth {
        if self.must_hold(mutex) {
            Truth::True
        } else if self.may_hold(mutex) {
            Truth::Unknown
        } else {
            Truth::False
        }
    }

    pub fn lock(&mut self, mutex: &str, kind: MutexKind) {
        let depth = self.must.entry(mutex.to_string()).or_insert(0);
        if kind.is_recursive() || *depth == 0 {
            *depth += 1;
        }
        self.may.insert(mutex.to_string());
    }

    pub fn unlock(&mut self, mutex: &str, kind: MutexKind) {
        match self.must.get(mutex).copied() {
            Some(depth) if kind.is_recursive() && depth > 1 => {
                self.must.insert(mutex.to_string(), depth - 1);
            }
            _ => {
                self.must.remove(mutex);
                // The may-depth of a recursive mutex is unbounded.
                if !kind.is_recursive() {
                    self.may.remove(mutex);
                }
            }
        }
    }

    /// Control-flow merge: intersection of must-locks, union of may-locks.
    pub fn join(&self, other: &LockSet) -> LockSet {
        let must = self
            .must
            .iter()
            .filter_map(|(m, d)| other.must.get(m).map(|e| (m.clone(), (*d).min(*e))))
            .collect();
        let may = self.may.union(&other.may).cloned().collect();
        LockSet { must, may }
    }

    /// `None` if the two sets contradict each other (a must-lock of one is
    /// not even possibly held in the other).
    pub fn meet(&self, other: &LockSet) -> Option<LockSet> {
        let may: BTreeSet<String> = self.may.intersection(&other.may).cloned().collect();
        let mut must = self.must.clone();
        for (m, d) in &other.must {
            let depth = must.entry(m.clone()).or_insert(0);
            *depth = (*depth).max(*d);
        }
        if must.keys().all(|m| may.contains(m)) {
            Some(LockSet { must, may })
        } else {
            None
        }
    }

    pub fn le(&self, other: &LockSet) -> bool {
        other.must.iter().all(|(m, d)| self.must.get(m).map_or(false, |e| e >= d)) && self.may.is_subset(&other.may)
    }
}

impl fmt::Display for LockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let must: Vec<String> = self.must.iter().map(|(m, d)| format!("{}×{}", m, d)).collect();
        let may: Vec<&str> = self.may.iter().map(|m| m.as_str()).collect();
        write!(f, "must{{{}}} may{{{}}}", must.join(", "), may.join(", "))
    }
}

/// Must-held locks common to every write of a global.
///
/// `None` is bottom (no write seen yet); join intersects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Protecting(pub Option<BTreeSet<String>>);

impl Protecting {
    pub fn of(locks: BTreeSet<String>) -> Self {
        Protecting(Some(locks))
    }

    /// Whether every write so far happened while holding `mutex`.
    /// A global that is never written is protected by everything.
    pub fn protected_by(&self, mutex: &str) -> bool {
        match &self.0 {
            None => true,
            Some(set) => set.contains(mutex),
        }
    }
}

impl Lattice for Protecting {
    fn bottom() -> Self {
        Protecting(None)
    }

    fn top() -> Self {
        Protecting(Some(BTreeSet::new()))
    }

    fn is_bottom(&self) -> bool {
        self.0.is_none()
    }

    fn is_top(&self) -> bool {
        matches!(&self.0, Some(s) if s.is_empty())
    }

    fn le(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, _) => true,
            (_, None) => false,
            (Some(a), Some(b)) => b.is_subset(a),
        }
    }

    fn join(&self, other: &Self) -> Self {
        match (&self.0, &other.0) {
            (None, _) => other.clone(),
            (_, None) => self.clone(),
            (Some(a), Some(b)) => Protecting(Some(a.intersection(b).cloned().collect())),
        }
    }

    fn meet(&self, other: &Self) -> Self {
        match (&self.0, &other.0) {
            (None, _) | (_, None) => Protecting(None),
            (Some(a), Some(b)) => Protecting(Some(a.union(b).cloned().collect())),
        }
    }

    fn widen(&self, other: &Self) -> Self {
        self.join(other)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::tests::test_lattice_axioms;

    #[test]
    fn test_double_lock() {
        let mut locks = LockSet::new();
        assert_eq!(locks.lock_safety("m", MutexKind::Default), Truth::True);
        locks.lock("m", MutexKind::Default);
        assert_eq!(locks.lock_safety("m", MutexKind::Default), Truth::False);
        assert_eq!(locks.lock_safety("m", MutexKind::ErrorCheck), Truth::False);
        assert_eq!(locks.lock_safety("m", MutexKind::Recursive), Truth::True);

        let merged = locks.join(&LockSet::new());
        assert_eq!(merged.lock_safety("m", MutexKind::Default), Truth::Unknown);
    }

    #[test]
    fn test_recursive_depth() {
        let mut locks = LockSet::new();
        locks.lock("r", MutexKind::Recursive);
        locks.lock("r", MutexKind::Recursive);
        locks.unlock("r", MutexKind::Recursive);
        assert!(locks.must_hold("r"));
        locks.unlock("r", MutexKind::Recursive);
        assert!(!locks.must_hold("r"));
        assert!(locks.may_hold("r"));
    }

    #[test]
    fn test_unlock_safety() {
        let mut locks = LockSet::new();
        assert_eq!(locks.unlock_safety("m"), Truth::False);
        locks.lock("m", MutexKind::Default);
        assert_eq!(locks.unlock_safety("m"), Truth::True);
        locks.unlock("m", MutexKind::Default);
        assert_eq!(locks.unlock_safety("m"), Truth::False);
    }

    #[test]
    fn test_protecting_lattice_axioms() {
        let samples = vec![
            Protecting::bottom(),
            Protecting::top(),
            Protecting::of(BTreeSet::from(["m".to_string()])),
            Protecting::of(BTreeSet::from(["m".to_string(), "n".to_string()])),
            Protecting::of(BTreeSet::from(["n".to_string()])),
        ];
        test_lattice_axioms(&samples);
    }
}
