//! Worklist fixpoint solver over (node, context) keys with side effects.
//!
//! The solver computes one [`State`] per program point and context. Besides
//! these *local* keys it maintains a store of *global* keys ([`GKey`]) that
//! transfer functions contribute to by side effect:
//!
//! - function start states, one per (function, context), contributed by
//!   callers, thread creators and the seeding of entry points;
//! - the shared store of the privatization layer (published values of
//!   globals, protecting locks, accesses);
//! - modular summaries.
//!
//! Global contributions are always joined (widened after a delay) into the
//! stored value, never overwritten. Reads of local and global keys are
//! recorded as dependencies; a change re-enqueues every key that read the
//! changed one.
//!
//! # Phases
//!
//! `seeded` → `iterating` → `stable` → `narrowing` → `stable`. Narrowing
//! rounds recompute every key from its predecessors, narrowing at widening
//! points. If a narrowing round changes the global store, the ascending
//! iteration resumes for the influenced keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::cfg::{Cfg, Edge, EdgeKind};
use crate::config::AnalysisConfig;
use crate::context::Context;
use crate::domain::Lattice;
use crate::error::{AnalysisError, Result};
use crate::locks::Protecting;
use crate::modular::{self, ModularSummary};
use crate::pointer::Cell;
use crate::privatization::{Access, Part, SharedKey};
use crate::state::{Env, State, RET};
use crate::types::{NodeId, ThreadId};
use crate::value::Value;

/// A program point in a context.
pub type LocalKey = (NodeId, Context);

/// Keys of the global store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GKey {
    /// Start state of a function in a context
    Entry { function: String, context: Context },
    Shared(SharedKey),
    Summary(String),
}

impl fmt::Display for GKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GKey::Entry { function, context } => write!(f, "entry {} {}", function, context),
            GKey::Shared(key) => write!(f, "{:?}", key),
            GKey::Summary(function) => write!(f, "summary {}", function),
        }
    }
}

/// Values of the global store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GVal {
    Bottom,
    State(Box<State>),
    Value(Value),
    Parts(BTreeMap<Part, Value>),
    Protecting(Protecting),
    Accesses(BTreeSet<Access>),
    Summary(Box<ModularSummary>),
}

impl GVal {
    pub fn is_bottom(&self) -> bool {
        match self {
            GVal::Bottom => true,
            GVal::State(s) => s.is_bottom(),
            GVal::Value(v) => v.is_bottom(),
            GVal::Parts(p) => p.is_empty(),
            GVal::Protecting(p) => p.is_bottom(),
            GVal::Accesses(a) => a.is_empty(),
            GVal::Summary(s) => **s == ModularSummary::default(),
        }
    }

    pub fn le(&self, other: &GVal) -> bool {
        match (self, other) {
            (GVal::Bottom, _) => true,
            (a, GVal::Bottom) => a.is_bottom(),
            (GVal::State(a), GVal::State(b)) => a.le(b),
            (GVal::Value(a), GVal::Value(b)) => a.le(b),
            (GVal::Parts(a), GVal::Parts(b)) => a.iter().all(|(p, v)| b.get(p).map_or(false, |w| v.le(w))),
            (GVal::Protecting(a), GVal::Protecting(b)) => a.le(b),
            (GVal::Accesses(a), GVal::Accesses(b)) => a.is_subset(b),
            (GVal::Summary(a), GVal::Summary(b)) => a.le(b),
            _ => false,
        }
    }

    fn merge(&self, other: &GVal, widen: bool) -> GVal {
        let value = |a: &Value, b: &Value| if widen { a.widen(&a.join(b)) } else { a.join(b) };
        match (self, other) {
            (GVal::Bottom, b) => b.clone(),
            (a, GVal::Bottom) => a.clone(),
            (GVal::State(a), GVal::State(b)) => {
                let joined = a.join(b);
                GVal::State(Box::new(if widen { a.widen(&joined) } else { joined }))
            }
            (GVal::Value(a), GVal::Value(b)) => GVal::Value(value(a, b)),
            (GVal::Parts(a), GVal::Parts(b)) => {
                let mut parts = a.clone();
                for (p, w) in b {
                    let v = match parts.get(p) {
                        Some(v) => value(v, w),
                        None => w.clone(),
                    };
                    parts.insert(p.clone(), v);
                }
                GVal::Parts(parts)
            }
            (GVal::Protecting(a), GVal::Protecting(b)) => GVal::Protecting(a.join(b)),
            (GVal::Accesses(a), GVal::Accesses(b)) => GVal::Accesses(a.union(b).cloned().collect()),
            (GVal::Summary(a), GVal::Summary(b)) => {
                GVal::Summary(Box::new(if widen { a.widen(&a.join(b)) } else { a.join(b) }))
            }
            (a, b) => {
                log::warn!("mismatched global contributions {:?} and {:?}", a, b);
                a.clone()
            }
        }
    }

    pub fn join(&self, other: &GVal) -> GVal {
        self.merge(other, false)
    }

    pub fn widen(&self, other: &GVal) -> GVal {
        self.merge(other, true)
    }
}

/// Access to the global store from transfer functions.
pub trait Globals {
    fn get(&mut self, key: &GKey) -> GVal;

    /// Contribute `value` to `key`; contributions are joined.
    fn side(&mut self, key: GKey, value: GVal);

    /// Exit state of `function` analysed in `context`.
    fn exit_state(&mut self, _function: &str, _context: &Context) -> State {
        State::unreachable()
    }

    fn value(&mut self, key: SharedKey) -> Value {
        match self.get(&GKey::Shared(key)) {
            GVal::Value(v) => v,
            _ => Value::Bottom,
        }
    }

    fn protecting(&mut self, key: SharedKey) -> Protecting {
        match self.get(&GKey::Shared(key)) {
            GVal::Protecting(p) => p,
            _ => Protecting::bottom(),
        }
    }

    fn parts(&mut self, key: SharedKey) -> BTreeMap<Part, Value> {
        match self.get(&GKey::Shared(key)) {
            GVal::Parts(p) => p,
            _ => BTreeMap::new(),
        }
    }
}

/// Plain global store, without dependency tracking.
impl Globals for BTreeMap<GKey, GVal> {
    fn get(&mut self, key: &GKey) -> GVal {
        BTreeMap::get(self, key).cloned().unwrap_or(GVal::Bottom)
    }

    fn side(&mut self, key: GKey, value: GVal) {
        let joined = match BTreeMap::get(self, &key) {
            Some(old) => old.join(&value),
            None => value,
        };
        self.insert(key, joined);
    }
}

/// Read-only view of a solution: contributions are dropped, except accesses,
/// which are collected separately.
pub struct Frozen<'s> {
    solution: &'s Solution,
    cfg: &'s Cfg,
    pub accesses: BTreeMap<Cell, BTreeSet<Access>>,
}

impl<'s> Frozen<'s> {
    pub fn new(solution: &'s Solution, cfg: &'s Cfg) -> Self {
        Frozen {
            solution,
            cfg,
            accesses: BTreeMap::new(),
        }
    }
}

impl Globals for Frozen<'_> {
    fn get(&mut self, key: &GKey) -> GVal {
        self.solution.globals.get(key).cloned().unwrap_or(GVal::Bottom)
    }

    fn side(&mut self, key: GKey, value: GVal) {
        if let (GKey::Shared(SharedKey::Accesses(cell)), GVal::Accesses(set)) = (key, value) {
            self.accesses.entry(cell).or_default().extend(set);
        }
    }

    fn exit_state(&mut self, function: &str, context: &Context) -> State {
        match self.cfg.function(function) {
            Some(f) => self.solution.state(f.exit, context),
            None => State::unreachable(),
        }
    }
}

/// Whether a call from `context` goes through the callee's summary.
pub fn is_modular_call(config: &AnalysisConfig, context: &Context, callee: &str) -> bool {
    context.is_modular() || config.is_modular(callee)
}

/// Transfer of `edge` (in `function`, analysed in `context`) applied to `state`.
pub fn transfer(
    cfg: &Cfg,
    config: &AnalysisConfig,
    function: &str,
    context: &Context,
    edge: &Edge,
    state: &State,
    globals: &mut dyn Globals,
) -> State {
    if !state.reachable {
        return State::unreachable();
    }
    let mut env = Env {
        cfg,
        config,
        function,
        thread: &context.thread,
        edge: edge.id,
        modular: context.is_modular(),
        globals,
    };
    match &edge.kind {
        EdgeKind::Call { ret, callee, args } if is_modular_call(config, context, callee) => {
            let entry = modular::entry_state(cfg, config, callee);
            env.globals.side(
                GKey::Entry {
                    function: callee.clone(),
                    context: Context::modular(),
                },
                GVal::State(Box::new(entry)),
            );
            let summary = match env.globals.get(&GKey::Summary(callee.clone())) {
                GVal::Summary(s) => *s,
                _ => ModularSummary::default(),
            };
            state.apply_summary(&mut env, callee, &summary, args, ret.as_ref())
        }
        EdgeKind::Call { ret, callee, args } => {
            let callee_context = config.context.callee(context, edge.id, function, callee);
            let (entry, reach) = state.enter(&mut env, callee, args);
            if entry.is_bottom() {
                return State::unreachable();
            }
            env.globals.side(
                GKey::Entry {
                    function: callee.clone(),
                    context: callee_context.clone(),
                },
                GVal::State(Box::new(entry)),
            );
            let exit = env.globals.exit_state(callee, &callee_context);
            state.combine(&mut env, callee, &exit, &reach, ret.as_ref())
        }
        EdgeKind::Spawn { function: thread_fn, arg } => {
            let mut next = state.clone();
            let (tid, start) = next.spawn(&mut env, thread_fn, arg.as_ref());
            log::debug!("{} spawns {}", context.thread, tid);
            env.globals.side(
                GKey::Entry {
                    function: thread_fn.clone(),
                    context: config.context.root(tid, thread_fn),
                },
                GVal::State(Box::new(start)),
            );
            next
        }
        kind => state.step(&mut env, kind),
    }
}

/// Dependency of a local key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dep {
    Local(LocalKey),
    Global(GKey),
}

/// Everything the solver persists between runs.
#[derive(Debug, Clone, Default)]
pub struct Store {
    pub locals: BTreeMap<LocalKey, State>,
    pub globals: BTreeMap<GKey, GVal>,
    pub infl: BTreeMap<Dep, BTreeSet<LocalKey>>,
    updates: BTreeMap<Dep, u32>,
    /// Changes of the return behaviour of recursive modular functions
    unrolled: BTreeMap<String, u32>,
}

/// The global store as seen while evaluating `key`.
struct Tracked<'s> {
    cfg: &'s Cfg,
    config: &'s AnalysisConfig,
    store: &'s mut Store,
    worklist: &'s mut BTreeSet<LocalKey>,
    recursive: &'s BTreeSet<String>,
    key: &'s LocalKey,
    changed: bool,
}

impl Tracked<'_> {
    fn depend(&mut self, dep: Dep) {
        self.store.infl.entry(dep).or_default().insert(self.key.clone());
    }
}

impl Globals for Tracked<'_> {
    fn get(&mut self, key: &GKey) -> GVal {
        self.depend(Dep::Global(key.clone()));
        self.store.globals.get(key).cloned().unwrap_or(GVal::Bottom)
    }

    fn side(&mut self, key: GKey, value: GVal) {
        let old = self.store.globals.get(&key).cloned().unwrap_or(GVal::Bottom);
        if value.le(&old) {
            return;
        }
        let dep = Dep::Global(key.clone());
        let count = self.store.updates.entry(dep.clone()).or_insert(0);
        *count += 1;
        let mut new = if *count > self.config.widening_delay {
            log::debug!("widening {}", key);
            old.widen(&value)
        } else {
            old.join(&value)
        };
        if let GKey::Summary(function) = &key {
            let returns_changed = match (&old, &new) {
                (GVal::Summary(before), GVal::Summary(after)) => {
                    before.ret != after.ret || before.returns != after.returns
                }
                (_, GVal::Summary(after)) => after.returns,
                _ => false,
            };
            if returns_changed && self.recursive.contains(function) {
                let unrolled = self.store.unrolled.entry(function.clone()).or_insert(0);
                *unrolled += 1;
                if *unrolled > self.config.modular_unroll_bound {
                    log::debug!("summary of recursive `{}` exceeds the unrolling bound", function);
                    new = GVal::Summary(Box::new(ModularSummary::top()));
                }
            }
        }
        log::trace!("side {} ⊔= {:?}", key, value);
        if let GKey::Entry { function, context } = &key {
            if let Some(f) = self.cfg.function(function) {
                self.worklist.insert((f.entry, context.clone()));
            }
        }
        self.store.globals.insert(key, new);
        if let Some(keys) = self.store.infl.get(&dep) {
            self.worklist.extend(keys.iter().cloned());
        }
        self.changed = true;
    }

    fn exit_state(&mut self, function: &str, context: &Context) -> State {
        let Some(f) = self.cfg.function(function) else {
            return State::unreachable();
        };
        let key = (f.exit, context.clone());
        self.depend(Dep::Local(key.clone()));
        self.store.locals.get(&key).cloned().unwrap_or_else(State::unreachable)
    }
}

/// Functions that may call themselves through a chain of calls.
fn recursive_functions(cfg: &Cfg) -> BTreeSet<String> {
    let mut calls: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for edge in cfg.edges() {
        if let EdgeKind::Call { callee, .. } = &edge.kind {
            calls
                .entry(cfg.function_of(edge.src))
                .or_default()
                .insert(callee.as_str());
        }
    }
    cfg.functions
        .keys()
        .filter(|f| {
            let mut seen = BTreeSet::new();
            let mut work: Vec<&str> = calls.get(f.as_str()).into_iter().flatten().copied().collect();
            while let Some(g) = work.pop() {
                if g == f.as_str() {
                    return true;
                }
                if seen.insert(g) {
                    work.extend(calls.get(g).into_iter().flatten().copied());
                }
            }
            false
        })
        .cloned()
        .collect()
}

/// Result of a solver run.
#[derive(Debug, Clone)]
pub struct Solution {
    pub states: BTreeMap<LocalKey, State>,
    pub globals: BTreeMap<GKey, GVal>,
    pub evaluations: usize,
    pub(crate) infl: BTreeMap<Dep, BTreeSet<LocalKey>>,
}

impl Solution {
    /// State at `node` in `context` (bottom if never reached).
    pub fn state(&self, node: NodeId, context: &Context) -> State {
        self.states
            .get(&(node, context.clone()))
            .cloned()
            .unwrap_or_else(State::unreachable)
    }

    /// Every context `node` was analysed in.
    pub fn contexts(&self, node: NodeId) -> impl Iterator<Item = (&Context, &State)> {
        self.states
            .iter()
            .filter(move |((n, _), _)| *n == node)
            .map(|((_, c), s)| (c, s))
    }

    /// Join over all contexts.
    pub fn state_at(&self, node: NodeId) -> State {
        self.contexts(node)
            .fold(State::unreachable(), |acc, (_, s)| acc.join(s))
    }

    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.contexts(node).any(|(_, s)| !s.is_bottom())
    }

    pub fn summary(&self, function: &str) -> Option<&ModularSummary> {
        match self.globals.get(&GKey::Summary(function.to_string())) {
            Some(GVal::Summary(s)) => Some(s),
            _ => None,
        }
    }

    /// Join of every value any thread may observe for a global cell.
    pub fn published(&self, cell: &Cell) -> Value {
        match self.globals.get(&GKey::Shared(SharedKey::Unprot(cell.clone()))) {
            Some(GVal::Value(v)) => v.clone(),
            _ => Value::Bottom,
        }
    }

    /// Threads that were started.
    pub fn threads(&self) -> BTreeSet<ThreadId> {
        self.globals
            .keys()
            .filter_map(|k| match k {
                GKey::Entry { context, .. } if !context.is_modular() => Some(context.thread.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Worklist solver for one analysis run.
pub struct Solver<'a> {
    cfg: &'a Cfg,
    config: &'a AnalysisConfig,
    store: Store,
    worklist: BTreeSet<LocalKey>,
    recursive: BTreeSet<String>,
    evaluations: usize,
}

impl<'a> Solver<'a> {
    pub fn new(cfg: &'a Cfg, config: &'a AnalysisConfig) -> Self {
        Solver::with_store(cfg, config, Store::default())
    }

    /// Continue from a previous store; keys missing from `store.locals` are recomputed.
    pub fn with_store(cfg: &'a Cfg, config: &'a AnalysisConfig, store: Store) -> Self {
        Solver {
            cfg,
            config,
            store,
            worklist: BTreeSet::new(),
            recursive: recursive_functions(cfg),
            evaluations: 0,
        }
    }

    /// Enqueue a key for re-evaluation.
    pub fn touch(&mut self, key: LocalKey) {
        self.worklist.insert(key);
    }

    /// Start states of the entry points and of modular functions.
    fn seed(&mut self) {
        let mut seeds = Vec::new();
        for entry in &self.config.entry_points {
            let context = self.config.context.root(ThreadId::Main, entry);
            seeds.push((entry.clone(), context, State::initial(self.cfg, self.config)));
        }
        for name in self.cfg.functions.keys() {
            if self.config.is_modular(name) {
                let start = modular::entry_state(self.cfg, self.config, name);
                seeds.push((name.clone(), Context::modular(), start));
            }
        }
        for (function, context, state) in seeds {
            let Some(f) = self.cfg.function(&function) else {
                continue;
            };
            let key = (f.entry, context.clone());
            self.global_scope(&key).side(GKey::Entry { function, context }, GVal::State(Box::new(state)));
            self.worklist.insert(key);
        }
        log::info!("seeded {} root(s)", self.worklist.len());
    }

    fn global_scope<'s>(&'s mut self, key: &'s LocalKey) -> Tracked<'s> {
        Tracked {
            cfg: self.cfg,
            config: self.config,
            store: &mut self.store,
            worklist: &mut self.worklist,
            recursive: &self.recursive,
            key,
            changed: false,
        }
    }

    /// Recompute `key` from its predecessors; returns the new value and
    /// whether the global store changed.
    fn eval(&mut self, key: &LocalKey) -> Result<(State, bool)> {
        self.evaluations += 1;
        if self.evaluations > self.config.max_evaluations {
            log::warn!("giving up after {} evaluations", self.config.max_evaluations);
            return Err(AnalysisError::NonTermination {
                evaluations: self.config.max_evaluations,
            });
        }
        let cfg = self.cfg;
        let config = self.config;
        let (node, context) = key;
        let function = cfg.function_of(*node).to_string();
        let mut scope = self.global_scope(key);
        let mut acc = State::unreachable();
        if cfg.function(&function).map(|f| f.entry) == Some(*node) {
            let entry = GKey::Entry {
                function: function.clone(),
                context: context.clone(),
            };
            if let GVal::State(s) = scope.get(&entry) {
                acc = *s;
            }
        }
        for edge in cfg.in_edges(*node) {
            let src = (edge.src, context.clone());
            scope.depend(Dep::Local(src.clone()));
            let Some(before) = scope.store.locals.get(&src).cloned() else {
                continue;
            };
            if before.is_bottom() {
                continue;
            }
            let after = transfer(cfg, config, &function, context, edge, &before, &mut scope);
            acc = acc.join(&after);
        }
        if context.is_modular() && cfg.function(&function).map(|f| f.exit) == Some(*node) && !acc.is_bottom() {
            let ret = acc.get(&Cell::local(&function, RET));
            scope.side(GKey::Summary(function.clone()), GVal::Summary(Box::new(ModularSummary::exit(ret))));
        }
        let changed = scope.changed;
        Ok((acc, changed))
    }

    fn successors(&self, key: &LocalKey) -> Vec<LocalKey> {
        let (node, context) = key;
        let mut keys: Vec<LocalKey> = self.cfg.successors(*node).map(|n| (n, context.clone())).collect();
        if let Some(infl) = self.store.infl.get(&Dep::Local(key.clone())) {
            keys.extend(infl.iter().cloned());
        }
        keys
    }

    fn ascend(&mut self) -> Result<bool> {
        let mut changed_any = false;
        while let Some(key) = self.worklist.pop_first() {
            let (new, _) = self.eval(&key)?;
            let old = self.store.locals.get(&key).cloned();
            if let Some(old) = &old {
                if new.le(old) {
                    continue;
                }
            } else if new.is_bottom() {
                // Record the key so that dependents can find it.
                self.store.locals.insert(key, new);
                continue;
            }
            let old = old.unwrap_or_else(State::unreachable);
            let dep = Dep::Local(key.clone());
            let count = self.store.updates.entry(dep).or_insert(0);
            *count += 1;
            let value = if self.cfg.is_widening_point(key.0) && *count > self.config.widening_delay {
                log::debug!("widening at {} {}", key.0, key.1);
                old.widen(&old.join(&new))
            } else {
                old.join(&new)
            };
            log::trace!("{} {} := {}", key.0, key.1, value);
            self.store.locals.insert(key.clone(), value);
            changed_any = true;
            let successors = self.successors(&key);
            self.worklist.extend(successors);
        }
        Ok(changed_any)
    }

    fn narrow(&mut self) -> Result<()> {
        for round in 0..self.config.narrowing_iterations {
            log::info!("narrowing round {}", round + 1);
            let keys: Vec<LocalKey> = self.store.locals.keys().cloned().collect();
            for key in keys {
                let (new, _) = self.eval(&key)?;
                let old = self.store.locals.get(&key).cloned().unwrap_or_else(State::unreachable);
                let value = if self.cfg.is_widening_point(key.0) {
                    old.narrow(&new)
                } else {
                    new
                };
                self.store.locals.insert(key, value);
            }
        }
        Ok(())
    }

    /// Run to a fixpoint.
    pub fn solve(mut self) -> Result<Solution> {
        self.seed();
        log::info!("iterating");
        let changed = self.ascend()?;
        log::info!("stable after {} evaluations", self.evaluations);
        if changed && self.config.narrowing_iterations > 0 {
            // Keys enqueued while narrowing come from global contributions only.
            self.worklist.clear();
            self.narrow()?;
            if !self.worklist.is_empty() {
                log::info!("narrowing changed the global store, resuming");
                self.ascend()?;
            }
            log::info!("stable after {} evaluations", self.evaluations);
        }
        Ok(Solution {
            states: self.store.locals,
            globals: self.store.globals,
            evaluations: self.evaluations,
            infl: self.store.infl,
        })
    }
}
