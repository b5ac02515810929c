//! Privatization of globals in multi-threaded code.
//!
//! Once a program has spawned its first thread, globals no longer live in the
//! thread-local state: every access goes through the shared store, keyed by
//! [`SharedKey`]. A strategy decides when a thread's writes become visible to
//! other threads and which published values a read may observe.
//!
//! Every strategy publishes each write to the `Unprot` view, so a thread that
//! reads without the right lock always sees everything. The lock-aware
//! strategies additionally keep *private copies* of globals while a lock that
//! protects them is held, and publish those copies only at unlock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::Lattice;
use crate::error::AnalysisError;
use crate::locks::Protecting;
use crate::pointer::Cell;
use crate::solver::{GKey, GVal, Globals};
use crate::state::{global_cells, Env, Private, State};
use crate::types::{EdgeId, ThreadId};
use crate::value::Value;

/// How writes to globals are published to other threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Privatization {
    /// Every read sees the join of all writes of all threads.
    None,
    /// Private copies while a protecting lock is held, published at unlock.
    #[default]
    Protection,
    /// Protection, plus a meet with the values published at the unlocks of
    /// the mutex being acquired.
    MutexMeet,
    /// Mutex-meet with contributions partitioned by thread; a unique thread
    /// replaces its own history by its last published value.
    MutexMeetTid,
    /// Mutex-meet-tid with non-unique threads compressed to their function.
    LockDigest,
}

impl Privatization {
    pub fn is_meet(&self) -> bool {
        matches!(
            self,
            Privatization::MutexMeet | Privatization::MutexMeetTid | Privatization::LockDigest
        )
    }

    fn is_partitioned(&self) -> bool {
        matches!(self, Privatization::MutexMeetTid | Privatization::LockDigest)
    }

    /// Partition a thread contributes to.
    pub fn part(&self, thread: &ThreadId) -> Part {
        match self {
            Privatization::MutexMeetTid => Part::Thread(thread.clone()),
            Privatization::LockDigest if thread.is_unique() => Part::Digest(thread.to_string()),
            Privatization::LockDigest => Part::Digest(format!("{}*", thread.function().unwrap_or("main"))),
            _ => Part::All,
        }
    }
}

impl FromStr for Privatization {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(Privatization::None),
            "protection" | "protection-read" => Ok(Privatization::Protection),
            "mutex-meet" => Ok(Privatization::MutexMeet),
            "mutex-meet-tid" => Ok(Privatization::MutexMeetTid),
            "lock-digest" | "lock" => Ok(Privatization::LockDigest),
            other => Err(AnalysisError::UnknownPrivatization(other.to_string())),
        }
    }
}

impl fmt::Display for Privatization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Privatization::None => "none",
            Privatization::Protection => "protection",
            Privatization::MutexMeet => "mutex-meet",
            Privatization::MutexMeetTid => "mutex-meet-tid",
            Privatization::LockDigest => "lock-digest",
        };
        write!(f, "{}", name)
    }
}

/// Keys of the shared part of the global store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SharedKey {
    /// Every value ever written, including the initial one
    Unprot(Cell),
    /// Values visible to a thread acquiring a lock that protects the cell
    Prot(Cell),
    /// Values published at `unlock(mutex)`, per contributor
    Mutex(String, Cell),
    /// Locks held at every write
    Writes(Cell),
    Accesses(Cell),
}

/// Contributor of a mutex partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Part {
    All,
    Thread(ThreadId),
    Digest(String),
}

/// One access to a global in multi-threaded code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Access {
    pub thread: ThreadId,
    pub write: bool,
    /// Must-held locks
    pub locks: BTreeSet<String>,
    /// Threads the accessing thread must have joined
    pub joined: BTreeSet<ThreadId>,
    /// Threads the accessing thread may have created so far
    pub created: BTreeSet<ThreadId>,
    pub edge: EdgeId,
}

fn shared(key: SharedKey) -> GKey {
    GKey::Shared(key)
}

fn record_access(env: &mut Env, state: &State, cell: &Cell, write: bool) {
    let access = Access {
        thread: env.thread.clone(),
        write,
        locks: state.locks.must_held(),
        joined: state.joined.clone(),
        created: state.created.clone(),
        edge: env.edge,
    };
    env.globals
        .side(shared(SharedKey::Accesses(cell.clone())), GVal::Accesses(BTreeSet::from([access])));
}

/// Published view of `cell` for a thread holding `state.locks`.
fn view(env: &mut Env, state: &State, cell: &Cell) -> Value {
    if env.config.privatization == Privatization::None {
        return env.globals.value(SharedKey::Unprot(cell.clone()));
    }
    let writes = env.globals.protecting(SharedKey::Writes(cell.clone()));
    let protected = state.locks.must_held().iter().any(|m| writes.protected_by(m));
    if protected {
        env.globals.value(SharedKey::Prot(cell.clone()))
    } else {
        env.globals.value(SharedKey::Unprot(cell.clone()))
    }
}

/// Value of `cell` as seen by the current thread, without recording an access.
pub fn current(env: &mut Env, state: &State, cell: &Cell) -> Value {
    match state.private.get(cell) {
        Some(p) if p.exact => p.value.clone(),
        Some(p) => p.value.join(&view(env, state, cell)),
        None => view(env, state, cell),
    }
}

/// Value of a global read by the current thread.
pub fn read(env: &mut Env, state: &State, cell: &Cell) -> Value {
    record_access(env, state, cell, false);
    current(env, state, cell)
}

/// Store into a global from the current thread.
pub fn write(env: &mut Env, state: &mut State, cell: &Cell, value: Value) {
    record_access(env, state, cell, true);
    let held = state.locks.must_held();
    env.globals.side(
        shared(SharedKey::Writes(cell.clone())),
        GVal::Protecting(Protecting::of(held.clone())),
    );
    env.globals
        .side(shared(SharedKey::Unprot(cell.clone())), GVal::Value(value.clone()));
    if held.is_empty() {
        env.globals
            .side(shared(SharedKey::Prot(cell.clone())), GVal::Value(value.clone()));
    }
    let writes = env.globals.protecting(SharedKey::Writes(cell.clone()));
    let private = env.config.privatization != Privatization::None;
    if private && held.iter().any(|m| writes.protected_by(m)) {
        state.private.insert(cell.clone(), Private { value, exact: true });
    } else {
        state.private.remove(cell);
    }
}

/// Refine the private copy of `cell` after a guard; globals without one are
/// left alone.
pub fn refine(state: &mut State, cell: &Cell, value: Value) {
    if let Some(p) = state.private.get_mut(cell) {
        if p.exact {
            p.value = value;
        }
    }
}

/// Values the mutex partitions allow after acquiring `mutex`.
fn mutex_view(env: &mut Env, state: &State, mutex: &str, cell: &Cell) -> Value {
    let strategy = env.config.privatization;
    let parts = env.globals.parts(SharedKey::Mutex(mutex.to_string(), cell.clone()));
    if !strategy.is_partitioned() {
        return parts.values().fold(Value::Bottom, |acc, v| acc.join(v));
    }
    let own = strategy.part(env.thread);
    let others = parts
        .iter()
        .filter(|(part, _)| **part != own)
        .fold(Value::Bottom, |acc, (_, v)| acc.join(v));
    let own_published = parts.get(&own).cloned().unwrap_or(Value::Bottom);
    let mine = if env.thread.is_unique() {
        state
            .kept
            .get(&(mutex.to_string(), cell.clone()))
            .cloned()
            .unwrap_or(own_published)
    } else {
        own_published
    };
    others.join(&mine)
}

/// Called after `mutex` has been added to the lock set.
pub fn lock(env: &mut Env, state: &mut State, mutex: &str) {
    if !env.config.privatization.is_meet() {
        return;
    }
    for cell in global_cells(env.cfg) {
        let writes = env.globals.protecting(SharedKey::Writes(cell.clone()));
        if !writes.protected_by(mutex) {
            continue;
        }
        let value = current(env, state, &cell);
        // A copy carried over from a single-threaded path was never published.
        let pending = state.private.get(&cell).map_or(false, |p| !p.exact);
        let published = if pending {
            Value::Bottom
        } else {
            mutex_view(env, state, mutex, &cell)
        };
        let value = if published.is_bottom() { value } else { value.meet(&published) };
        log::trace!("lock({}) loads {} = {}", mutex, cell, value);
        state.private.insert(cell, Private { value, exact: true });
    }
}

/// Called after `mutex` has been removed from the lock set.
pub fn unlock(env: &mut Env, state: &mut State, mutex: &str) {
    let strategy = env.config.privatization;
    if strategy == Privatization::None {
        return;
    }
    let remaining = state.locks.must_held();
    let cells: Vec<Cell> = state.private.keys().cloned().collect();
    for cell in cells {
        let Some(p) = state.private.get(&cell).cloned() else {
            continue;
        };
        let value = if p.exact {
            p.value.clone()
        } else {
            p.value.join(&view(env, state, &cell))
        };
        env.globals
            .side(shared(SharedKey::Prot(cell.clone())), GVal::Value(value.clone()));
        if !p.exact {
            env.globals
                .side(shared(SharedKey::Unprot(cell.clone())), GVal::Value(value.clone()));
        }
        let writes = env.globals.protecting(SharedKey::Writes(cell.clone()));
        if strategy.is_meet() && writes.protected_by(mutex) {
            let part = strategy.part(env.thread);
            env.globals.side(
                shared(SharedKey::Mutex(mutex.to_string(), cell.clone())),
                GVal::Parts(BTreeMap::from([(part, value.clone())])),
            );
            if strategy.is_partitioned() && env.thread.is_unique() {
                let key = (mutex.to_string(), cell.clone());
                if p.exact {
                    state.kept.insert(key, value);
                } else {
                    state.kept.remove(&key);
                }
            }
        }
        if !remaining.iter().any(|l| writes.protected_by(l)) {
            state.private.remove(&cell);
        }
    }
}

/// Make `value` visible to every thread and every view of `cell`.
fn publish(env: &mut Env, state: &mut State, cell: &Cell, value: &Value) {
    let strategy = env.config.privatization;
    env.globals
        .side(shared(SharedKey::Unprot(cell.clone())), GVal::Value(value.clone()));
    env.globals
        .side(shared(SharedKey::Prot(cell.clone())), GVal::Value(value.clone()));
    if !strategy.is_meet() {
        return;
    }
    let mutexes: Vec<String> = env.cfg.mutexes.keys().cloned().collect();
    for m in mutexes {
        env.globals.side(
            shared(SharedKey::Mutex(m.clone(), cell.clone())),
            GVal::Parts(BTreeMap::from([(strategy.part(env.thread), value.clone())])),
        );
        if strategy.is_partitioned() && env.thread.is_unique() {
            let key = (m, cell.clone());
            let kept = state.kept.get(&key).map_or(value.clone(), |k| k.join(value));
            state.kept.insert(key, kept);
        }
    }
}

/// First spawn: move every global of the single-threaded state into the
/// shared store as its initial value.
pub fn publish_initial(env: &mut Env, state: &mut State) {
    for cell in global_cells(env.cfg) {
        let value = state.get(&cell);
        publish(env, state, &cell, &value);
    }
    state.cells.retain(|c, _| !c.is_global() && !c.is_heap());
    state.multithreaded = true;
}

/// Spawn in multi-threaded code: publish the copies that a merge with a
/// single-threaded path left behind, since the new thread may read them.
pub fn publish_pending(env: &mut Env, state: &mut State) {
    let pending: Vec<(Cell, Value)> = state
        .private
        .iter()
        .filter(|(_, p)| !p.exact)
        .map(|(c, p)| (c.clone(), p.value.clone()))
        .collect();
    for (cell, value) in pending {
        publish(env, state, &cell, &value);
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_parse_and_display() {
        for name in ["none", "protection", "mutex-meet", "mutex-meet-tid", "lock-digest"] {
            let p: Privatization = name.parse().unwrap();
            assert_eq!(p.to_string(), name);
        }
        assert_eq!(
            "write".parse::<Privatization>(),
            Err(AnalysisError::UnknownPrivatization("write".to_string()))
        );
    }

    #[test]
    fn test_parts() {
        let main = ThreadId::Main;
        let worker = ThreadId::Created {
            parent: Box::new(ThreadId::Main),
            site: EdgeId::new(3),
            function: "worker".to_string(),
            unique: false,
        };
        assert_eq!(Privatization::MutexMeet.part(&worker), Part::All);
        assert_eq!(Privatization::MutexMeetTid.part(&main), Part::Thread(ThreadId::Main));
        assert_eq!(Privatization::LockDigest.part(&worker), Part::Digest("worker*".to_string()));
        assert!(!Privatization::Protection.is_meet());
    }
}
