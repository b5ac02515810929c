//! Abstract program state and the transfer functions of intraprocedural edges.
//!
//! A [`State`] maps memory cells to [`Value`]s (a missing cell is top), keeps
//! the relational part over the current function's integer locals, and carries
//! the thread-related components: held locks, the multi-threaded flag, created
//! and joined threads, and private copies of globals.
//!
//! Transfer functions need the program, the configuration and access to the
//! global store; they receive all three through an [`Env`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::array::ArrayValue;
use crate::cfg::{Cfg, EdgeKind, Ty};
use crate::config::{AnalysisConfig, DomainSet};
use crate::congruence::Congruence;
use crate::domain::Lattice;
use crate::expr::{Cond, Expr, LValue};
use crate::int::{IntValue, Truth};
use crate::interval::Interval;
use crate::locks::LockSet;
use crate::modular::{self, ModularSummary};
use crate::pointer::{AddrSet, Base, Cell, Target};
use crate::privatization;
use crate::relational::{linearize, linearize_cond, LinExpr, Relational, RelationalKind};
use crate::solver::Globals;
use crate::types::{EdgeId, ThreadId};
use crate::value::Value;

/// Local variable holding a function's return value.
pub const RET: &str = "#ret";

/// Private copy of a global, held while a protecting lock is held.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Private {
    pub value: Value,
    /// If not set, some path reaching this point has no private copy, and a
    /// read also sees the published view.
    pub exact: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub reachable: bool,
    /// Values of cells; a missing cell is top.
    pub cells: BTreeMap<Cell, Value>,
    /// Relations between integer locals of the current function
    pub rel: Relational,
    pub locks: LockSet,
    pub multithreaded: bool,
    /// Threads this thread may have created so far
    pub created: BTreeSet<ThreadId>,
    /// Unique threads this thread must have joined
    pub joined: BTreeSet<ThreadId>,
    pub private: BTreeMap<Cell, Private>,
    /// Last value this (unique) thread published at `unlock(mutex)`, per (mutex, cell)
    pub kept: BTreeMap<(String, Cell), Value>,
    /// Locals whose address was handed to another thread
    pub escaped: BTreeSet<Cell>,
}

impl State {
    /// Reachable state knowing nothing about memory.
    pub fn new(kind: RelationalKind) -> Self {
        State {
            reachable: true,
            cells: BTreeMap::new(),
            rel: Relational::new(kind),
            locks: LockSet::new(),
            multithreaded: false,
            created: BTreeSet::new(),
            joined: BTreeSet::new(),
            private: BTreeMap::new(),
            kept: BTreeMap::new(),
            escaped: BTreeSet::new(),
        }
    }

    pub fn unreachable() -> Self {
        State {
            reachable: false,
            ..State::new(RelationalKind::None)
        }
    }

    /// Start state of the program: globals hold their static initializers.
    pub fn initial(cfg: &Cfg, config: &AnalysisConfig) -> Self {
        let mut state = State::new(config.relational);
        for (name, global) in &cfg.globals {
            let base = Cell::global(name);
            for path in scalar_paths(cfg, &global.decl.ty) {
                let cell = path.iter().fold(base.clone(), |c, f| c.field(f));
                let ty = cell_type(cfg, &cell).unwrap_or(Ty::Int);
                let value = match global.init.iter().find(|(p, _)| *p == path) {
                    Some((_, v)) if ty.is_pointer() && *v == 0 => Value::Addr(AddrSet::null()),
                    Some((_, v)) => Value::int(*v),
                    None => zero_value(&ty),
                };
                state.set(cell, value);
            }
        }
        state
    }

    pub fn get(&self, cell: &Cell) -> Value {
        self.cells.get(cell).cloned().unwrap_or(Value::Top)
    }

    /// Raw update without any side effect. Top values are dropped, except
    /// for globals: a single-threaded state lists every global cell.
    pub fn set(&mut self, cell: Cell, value: Value) {
        if value.is_top() && !matches!(value, Value::Array(_)) && !cell.is_global() {
            self.cells.remove(&cell);
        } else {
            self.cells.insert(cell, value);
        }
    }

    pub fn is_escaped(&self, cell: &Cell) -> bool {
        self.escaped.iter().any(|e| cell.is_within(e))
    }

    /// Whether local `name` of the current function lives in the relational part.
    pub fn tracked(&self, env: &Env, name: &str) -> bool {
        env.relational()
            && !name.starts_with('#')
            && env.is_local(name)
            && env.var_type(name) == Ty::Int
            && !self.is_escaped(&env.var_cell(name))
    }

    /// Cells reachable from `roots` through stored pointers (`None`: unknown
    /// pointers make everything reachable).
    pub fn reachable_cells(&self, roots: impl IntoIterator<Item = Cell>) -> Option<BTreeSet<Cell>> {
        let mut seen = BTreeSet::new();
        let mut work: Vec<Cell> = roots.into_iter().collect();
        while let Some(cell) = work.pop() {
            if !seen.insert(cell.clone()) {
                continue;
            }
            for (c, v) in self.cells.range(cell.clone()..) {
                if !c.is_within(&cell) {
                    break;
                }
                seen.insert(c.clone());
                work.extend(pointees(v)?);
            }
        }
        Some(seen)
    }

    /// Cells pointed to by globals and heap objects.
    fn shared_roots(&self) -> Option<Vec<Cell>> {
        let mut roots = Vec::new();
        for (c, v) in &self.cells {
            if c.is_global() || c.is_heap() {
                roots.extend(pointees(v)?);
            }
        }
        Some(roots)
    }

    fn escape(&mut self, env: &Env, cells: Option<BTreeSet<Cell>>) {
        let cells: Vec<Cell> = match cells {
            Some(cells) => cells.into_iter().collect(),
            None => self.cells.keys().filter(|c| !c.is_global() && !c.is_heap()).cloned().collect(),
        };
        for cell in cells {
            if let Some((function, name)) = cell.local_var() {
                if function == env.function {
                    self.rel.forget(name);
                }
            }
            if !cell.is_global() && !cell.is_heap() {
                self.escaped.insert(cell);
            }
        }
    }

    // Lvalue resolution, loads and stores

    fn resolve(&self, env: &mut Env, lv: &LValue) -> Option<Vec<Loc>> {
        match lv {
            LValue::Var(v) => Some(vec![Loc::of(env.var_cell(v))]),
            LValue::Field(base, f) => Some(self.resolve(env, base)?.into_iter().map(|l| l.field(f)).collect()),
            LValue::Index(base, idx) => {
                let index = self.eval(env, idx).as_int().interval;
                Some(self.resolve(env, base)?.into_iter().map(|l| l.index(index)).collect())
            }
            LValue::Deref(ptr) => {
                let addr = self.eval(env, ptr).as_addr();
                addr.cells().map(|cells| cells.into_iter().map(|c| Loc::of(c.clone())).collect())
            }
        }
    }

    fn load_cell(&self, env: &mut Env, cell: &Cell) -> Value {
        if env.modular && (cell.is_global() || cell.is_opaque()) {
            modular::record_read(env, cell);
            return Value::Top;
        }
        if self.multithreaded {
            if cell.is_global() {
                return privatization::read(env, self, cell);
            }
            if cell.is_heap() || self.is_escaped(cell) {
                return Value::Top;
            }
        }
        self.get(cell)
    }

    fn load(&self, env: &mut Env, loc: &Loc) -> Value {
        if loc.inner {
            return Value::Top;
        }
        let value = self.load_cell(env, &loc.cell);
        match (&loc.index, value) {
            (None, v) => v,
            (Some(i), Value::Array(a)) => a.read(i),
            (Some(_), Value::Bottom) => Value::Bottom,
            (Some(_), _) => Value::Top,
        }
    }

    pub fn read_lvalue(&self, env: &mut Env, lv: &LValue) -> Value {
        match self.resolve(env, lv) {
            None => Value::Top,
            Some(locs) => locs.iter().fold(Value::Bottom, |acc, l| acc.join(&self.load(env, l))),
        }
    }

    fn set_cell(&mut self, env: &mut Env, cell: &Cell, value: Value, strong: bool) {
        if env.modular && (cell.is_global() || cell.is_opaque()) {
            modular::record_write(env, cell, &value);
            return;
        }
        let shared = cell.is_global() || cell.is_heap() || self.is_escaped(cell);
        if self.multithreaded && shared {
            let targets = pointees(&value).map(|roots| self.reachable_cells(roots));
            self.escape(env, targets.flatten());
        }
        if cell.is_global() {
            if self.multithreaded {
                let value = if strong {
                    value
                } else {
                    value.join(&privatization::current(env, self, cell))
                };
                privatization::write(env, self, cell, value);
            } else {
                let value = if strong { value } else { value.join(&self.get(cell)) };
                self.set(cell.clone(), value);
            }
            return;
        }
        if self.multithreaded && shared {
            return;
        }
        let value = if strong { value } else { value.join(&self.get(cell)) };
        self.set(cell.clone(), value);
        self.sync_relational(env, cell);
    }

    /// A tracked local changed outside of an assignment to it.
    fn sync_relational(&mut self, env: &Env, cell: &Cell) {
        let Some((function, name)) = cell.local_var() else {
            return;
        };
        if function != env.function || !self.tracked(env, name) {
            return;
        }
        let interval = self.get(cell).as_int().interval;
        self.rel.forget(name);
        self.rel.set_bounds(name, &interval);
    }

    fn store(&mut self, env: &mut Env, locs: Vec<Loc>, value: Value) {
        let strong = locs.len() == 1 && locs[0].cell.base.is_unique() && !locs[0].inner;
        for loc in locs {
            match loc.index {
                None if !loc.inner => self.set_cell(env, &loc.cell, value.clone(), strong),
                index => {
                    let index = index.unwrap_or_else(Interval::top);
                    let element = if loc.inner { Value::Top } else { value.clone() };
                    let array = match self.load_cell(env, &loc.cell) {
                        Value::Array(a) => *a,
                        _ => ArrayValue::new(array_len(env.cfg, &loc.cell), Value::Top),
                    };
                    let partition = env.config.array_partitioning && strong;
                    let written = array.write(&index, element, partition);
                    self.set_cell(env, &loc.cell, Value::Array(Box::new(written)), strong);
                }
            }
        }
    }

    fn store_lvalue(&mut self, env: &mut Env, lv: &LValue, value: Value) {
        match self.resolve(env, lv) {
            Some(locs) => self.store(env, locs, value),
            None => self.havoc_all(env),
        }
    }

    /// A write through an unknown pointer may change any cell.
    fn havoc_all(&mut self, env: &mut Env) {
        log::debug!("write through unknown pointer at {}", env.edge);
        let cells: Vec<Cell> = self.cells.keys().cloned().collect();
        for cell in cells {
            let havoc = self.get(&cell).havoc();
            self.set(cell, havoc);
        }
        self.rel = Relational::new(env.config.relational);
        if env.modular {
            modular::record_havoc(env);
        }
        if self.multithreaded {
            for cell in global_cells(env.cfg) {
                privatization::write(env, self, &cell, Value::Top);
            }
        }
    }

    /// `lv = value`, keeping the relational part informed.
    pub fn assign_value(&mut self, env: &mut Env, lv: &LValue, value: Value) {
        if value.is_bottom() {
            self.reachable = false;
            return;
        }
        if let LValue::Var(v) = lv {
            if self.tracked(env, v) {
                let int = value.as_int();
                self.rel.assign(v, None, &int.interval);
                self.set(env.var_cell(v), Value::Int(int));
                return;
            }
        }
        self.store_lvalue(env, lv, value);
    }

    pub fn assign(&mut self, env: &mut Env, lv: &LValue, e: &Expr) {
        if let Some(Ty::Struct(name)) = env.lvalue_type(lv) {
            let fields: Vec<String> = env
                .cfg
                .structs
                .get(&name)
                .map(|fs| fs.iter().map(|d| d.name.clone()).collect())
                .unwrap_or_default();
            for f in fields {
                let rhs = match e {
                    Expr::Read(r) => Expr::read(r.as_ref().clone().field(f.clone())),
                    _ => Expr::Unknown,
                };
                self.assign(env, &lv.clone().field(f), &rhs);
            }
            return;
        }
        let value = self.eval(env, e);
        if value.is_bottom() {
            self.reachable = false;
            return;
        }
        if let LValue::Var(v) = lv {
            if self.tracked(env, v) {
                let lin = {
                    let env = &*env;
                    linearize(e, &|n: &str| self.tracked(env, n))
                };
                let int = value.as_int();
                self.rel.assign(v, lin.as_ref(), &int.interval);
                let bounded = int.meet(&IntValue::from_interval(self.rel.bounds(v)));
                self.set(env.var_cell(v), Value::Int(bounded));
                return;
            }
        }
        self.store_lvalue(env, lv, value);
    }

    // Expressions

    pub fn eval(&self, env: &mut Env, e: &Expr) -> Value {
        match self.eval_raw(env, e) {
            Value::Int(i) => {
                let mut i = i.restrict(&env.domains());
                if self.rel.is_enabled() {
                    let lin = {
                        let env = &*env;
                        linearize(e, &|n: &str| self.tracked(env, n))
                    };
                    if let Some(lin) = lin.filter(|l| !l.is_constant()) {
                        i = i.meet(&IntValue::from_interval(self.rel.eval(&lin)));
                    }
                }
                Value::Int(i)
            }
            v => v,
        }
    }

    fn eval_raw(&self, env: &mut Env, e: &Expr) -> Value {
        match e {
            Expr::Const(c) => Value::int(*c),
            Expr::Null => Value::Addr(AddrSet::null()),
            Expr::Unknown => Value::Int(IntValue::top()),
            Expr::Unsupported(what) => {
                log::debug!("unsupported construct `{}` at {} evaluates to top", what, env.edge);
                Value::Top
            }
            Expr::Read(lv) => self.read_lvalue(env, lv),
            Expr::AddrOf(lv) => match self.resolve(env, lv) {
                Some(locs) if locs.iter().all(|l| l.index.is_none() && !l.inner) => {
                    Value::Addr(AddrSet::Set(locs.into_iter().map(|l| Target::Cell(l.cell)).collect()))
                }
                _ => Value::Addr(AddrSet::Top),
            },
            Expr::Add(a, b) => {
                let (x, y) = (self.eval(env, a), self.eval(env, b));
                if matches!(x, Value::Addr(_)) || matches!(y, Value::Addr(_)) {
                    // Pointer arithmetic is not modelled.
                    return Value::Top;
                }
                Value::Int(x.as_int().add(&y.as_int()))
            }
            Expr::Sub(a, b) => self.arith(env, a, b, IntValue::sub),
            Expr::Mul(a, b) => self.arith(env, a, b, IntValue::mul),
            Expr::Div(a, b) => self.arith(env, a, b, IntValue::div),
            Expr::Mod(a, b) => self.arith(env, a, b, IntValue::rem),
            Expr::Neg(a) => Value::Int(self.eval(env, a).as_int().neg()),
            Expr::Truth(c) => Value::Int(IntValue::from_truth(self.eval_cond(env, c))),
        }
    }

    fn arith(&self, env: &mut Env, a: &Expr, b: &Expr, op: fn(&IntValue, &IntValue) -> IntValue) -> Value {
        let (x, y) = (self.eval(env, a), self.eval(env, b));
        Value::Int(op(&x.as_int(), &y.as_int()))
    }

    /// Non-zero constant value of `e`, if any.
    fn nonzero_constant(&self, env: &mut Env, e: &Expr) -> Option<i64> {
        self.eval(env, e).as_int().as_constant().filter(|c| *c != 0)
    }

    /// Three-valued truth of `c` in this state.
    pub fn eval_cond(&self, env: &mut Env, c: &Cond) -> Truth {
        let truth = match c {
            Cond::True => return Truth::True,
            Cond::False => return Truth::False,
            Cond::Not(inner) => return self.eval_cond(env, inner).not(),
            Cond::And(p, q) => return self.eval_cond(env, p).and(self.eval_cond(env, q)),
            Cond::Or(p, q) => return self.eval_cond(env, p).or(self.eval_cond(env, q)),
            Cond::Eq(a, b) | Cond::Neq(a, b) => {
                let (x, y) = (self.eval(env, a), self.eval(env, b));
                let eq = if matches!(x, Value::Addr(_)) || matches!(y, Value::Addr(_)) {
                    x.as_addr().eq_truth(&y.as_addr())
                } else {
                    x.as_int().eq_truth(&y.as_int())
                };
                if matches!(c, Cond::Eq(..)) {
                    eq
                } else {
                    eq.not()
                }
            }
            Cond::Lt(a, b) => self.eval(env, a).as_int().lt_truth(&self.eval(env, b).as_int()),
            Cond::Le(a, b) => self.eval(env, a).as_int().le_truth(&self.eval(env, b).as_int()),
            Cond::Gt(a, b) => self.eval(env, b).as_int().lt_truth(&self.eval(env, a).as_int()),
            Cond::Ge(a, b) => self.eval(env, b).as_int().le_truth(&self.eval(env, a).as_int()),
        };
        if truth != Truth::Unknown || !self.rel.is_enabled() {
            return truth;
        }
        let (pos, neg) = {
            let env = &*env;
            let tracked = |n: &str| self.tracked(env, n);
            (linearize_cond(c, &tracked), linearize_cond(&c.negate(), &tracked))
        };
        let (Some(pos), Some(neg)) = (pos, neg) else {
            return truth;
        };
        let mut refuted = self.rel.clone();
        refuted.guard(&neg);
        if refuted.is_bottom() {
            return Truth::True;
        }
        let mut proved = self.rel.clone();
        proved.guard(&pos);
        if proved.is_bottom() {
            return Truth::False;
        }
        Truth::Unknown
    }

    // Guards

    pub fn guard(&mut self, env: &mut Env, c: &Cond) {
        if !self.reachable {
            return;
        }
        match c {
            Cond::True => {}
            Cond::False => self.reachable = false,
            Cond::Not(inner) => self.guard(env, &inner.negate()),
            Cond::And(p, q) => {
                self.guard(env, p);
                self.guard(env, q);
            }
            Cond::Or(p, q) => {
                let mut left = self.clone();
                left.guard(env, p);
                let mut right = self.clone();
                right.guard(env, q);
                *self = left.join(&right);
            }
            _ => {
                if self.eval_cond(env, c) == Truth::False {
                    self.reachable = false;
                    return;
                }
                self.refine_cmp(env, c);
                self.guard_relational(env, c);
            }
        }
    }

    fn guard_relational(&mut self, env: &mut Env, c: &Cond) {
        if !self.reachable || !self.rel.is_enabled() {
            return;
        }
        let cons = {
            let env = &*env;
            linearize_cond(c, &|n: &str| self.tracked(env, n))
        };
        let Some(cons) = cons else {
            return;
        };
        self.rel.guard(&cons);
        if self.rel.is_bottom() {
            self.reachable = false;
            return;
        }
        for var in cons.expr.coeffs.keys() {
            let cell = env.var_cell(var);
            let value = self.get(&cell).as_int().meet(&IntValue::from_interval(self.rel.bounds(var)));
            if value.is_bottom() {
                self.reachable = false;
                return;
            }
            self.set(cell, Value::Int(value));
        }
    }

    fn refine_cmp(&mut self, env: &mut Env, c: &Cond) {
        let (a, b, cmp) = match c {
            Cond::Eq(a, b) => (a, b, Cmp::Eq),
            Cond::Neq(a, b) => (a, b, Cmp::Neq),
            Cond::Lt(a, b) => (a, b, Cmp::Lt),
            Cond::Le(a, b) => (a, b, Cmp::Le),
            Cond::Gt(a, b) => (b, a, Cmp::Lt),
            Cond::Ge(a, b) => (b, a, Cmp::Le),
            _ => return,
        };
        let (x, y) = (self.eval(env, a), self.eval(env, b));
        if matches!(x, Value::Addr(_)) || matches!(y, Value::Addr(_)) {
            let (xa, ya) = (x.as_addr(), y.as_addr());
            match cmp {
                Cmp::Eq => {
                    self.refine_addr(env, a, xa.meet(&ya));
                    self.refine_addr(env, b, ya.meet(&xa));
                }
                Cmp::Neq if ya == AddrSet::null() => self.refine_addr(env, a, without_null(&xa)),
                Cmp::Neq if xa == AddrSet::null() => self.refine_addr(env, b, without_null(&ya)),
                _ => {}
            }
            return;
        }
        let (xi, yi) = (x.as_int(), y.as_int());
        let (ta, tb) = match cmp {
            Cmp::Eq => (xi.meet(&yi), yi.meet(&xi)),
            Cmp::Neq => (xi.restrict_neq(&yi), yi.restrict_neq(&xi)),
            Cmp::Lt => (xi.restrict_lt(&yi), yi.restrict_gt(&xi)),
            Cmp::Le => (xi.restrict_le(&yi), yi.restrict_ge(&xi)),
        };
        self.refine_expr(env, a, ta);
        self.refine_expr(env, b, tb);
    }

    fn refine_addr(&mut self, env: &mut Env, e: &Expr, target: AddrSet) {
        if target.is_bottom() {
            self.reachable = false;
            return;
        }
        if let Expr::Read(lv) = e {
            self.refine_lvalue(env, lv, &Value::Addr(target));
        }
    }

    /// Shrink the operands of `e` so that `e` evaluates into `target`.
    fn refine_expr(&mut self, env: &mut Env, e: &Expr, target: IntValue) {
        if !self.reachable {
            return;
        }
        if target.is_bottom() {
            self.reachable = false;
            return;
        }
        match e {
            Expr::Read(lv) => self.refine_lvalue(env, lv, &Value::Int(target)),
            Expr::Add(a, b) => {
                let (x, y) = (self.eval(env, a).as_int(), self.eval(env, b).as_int());
                self.refine_expr(env, a, target.sub(&y));
                self.refine_expr(env, b, target.sub(&x));
            }
            Expr::Sub(a, b) => {
                let (x, y) = (self.eval(env, a).as_int(), self.eval(env, b).as_int());
                self.refine_expr(env, a, target.add(&y));
                self.refine_expr(env, b, x.sub(&target));
            }
            Expr::Neg(a) => self.refine_expr(env, a, target.neg()),
            Expr::Mul(a, b) => {
                if let Some(c) = self.nonzero_constant(env, b) {
                    self.refine_expr(env, a, IntValue::from_interval(target.interval.mul_preimage(c)));
                } else if let Some(c) = self.nonzero_constant(env, a) {
                    self.refine_expr(env, b, IntValue::from_interval(target.interval.mul_preimage(c)));
                }
            }
            Expr::Div(a, b) => {
                if let Some(c) = self.nonzero_constant(env, b) {
                    self.refine_expr(env, a, IntValue::from_interval(target.interval.div_preimage(c)));
                }
            }
            Expr::Mod(a, b) => {
                let (Some(m), Some(r)) = (self.nonzero_constant(env, b), target.as_constant()) else {
                    return;
                };
                if r.unsigned_abs() >= m.unsigned_abs() {
                    self.reachable = false;
                    return;
                }
                // The remainder takes the sign of the dividend.
                let sign = match r {
                    r if r > 0 => Interval::at_least(r),
                    r if r < 0 => Interval::at_most(r),
                    _ => Interval::top(),
                };
                self.refine_expr(env, a, IntValue::new(sign, Congruence::rem_preimage(r, m)));
            }
            Expr::Truth(c) => {
                if target.as_constant() == Some(0) {
                    self.guard(env, &c.negate());
                } else if !target.interval.contains(0) {
                    self.guard(env, c);
                }
            }
            _ => {}
        }
    }

    fn refine_lvalue(&mut self, env: &mut Env, lv: &LValue, target: &Value) {
        let Some(locs) = self.resolve(env, lv) else {
            return;
        };
        let [loc] = locs.as_slice() else {
            return;
        };
        if loc.index.is_some() || loc.inner || !loc.cell.base.is_unique() {
            return;
        }
        let cell = loc.cell.clone();
        let current = self.load_cell(env, &cell);
        let refined = match (&current, target) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.meet(b).restrict(&env.domains())),
            (Value::Top, Value::Int(b)) => Value::Int(b.restrict(&env.domains())),
            (Value::Addr(a), Value::Addr(b)) => Value::Addr(a.meet(b)),
            (Value::Top, Value::Addr(b)) => Value::Addr(b.clone()),
            _ => return,
        };
        if refined.is_bottom() {
            self.reachable = false;
            return;
        }
        if env.modular && (cell.is_global() || cell.is_opaque()) {
            return;
        }
        if self.multithreaded {
            if cell.is_global() {
                privatization::refine(self, &cell, refined);
                return;
            }
            if self.is_escaped(&cell) {
                return;
            }
        }
        let interval = refined.as_int().interval;
        self.set(cell.clone(), refined);
        if let Some((function, name)) = cell.local_var() {
            if function == env.function && self.tracked(env, name) {
                self.rel.set_bounds(name, &interval);
                if self.rel.is_bottom() {
                    self.reachable = false;
                }
            }
        }
    }

    /// Verdict of `check(c)`: `True` if every concrete state satisfies `c`,
    /// `False` if none does.
    pub fn check(&self, env: &mut Env, c: &Cond) -> Truth {
        match self.eval_cond(env, c) {
            Truth::Unknown => {}
            t => return t,
        }
        let mut negated = self.clone();
        negated.guard(env, &c.negate());
        if negated.is_bottom() {
            return Truth::True;
        }
        let mut assumed = self.clone();
        assumed.guard(env, c);
        if assumed.is_bottom() {
            return Truth::False;
        }
        Truth::Unknown
    }

    // Edges

    /// Transfer of every edge kind except calls and spawns.
    pub fn step(&self, env: &mut Env, kind: &EdgeKind) -> State {
        let mut next = self.clone();
        if !self.reachable {
            return next;
        }
        match kind {
            EdgeKind::Skip | EdgeKind::Call { .. } | EdgeKind::Spawn { .. } => {}
            EdgeKind::Assign(lv, e) => next.assign(env, lv, e),
            EdgeKind::Guard(c) => next.guard(env, c),
            EdgeKind::Check(_, c) => {
                // Checks do not assume their condition; evaluate for the reads.
                next.eval_cond(env, c);
            }
            EdgeKind::Return(Some(e)) => {
                let value = next.eval(env, e);
                next.set(Cell::local(env.function, RET), value);
            }
            EdgeKind::Return(None) => {}
            EdgeKind::Lock(m) => {
                next.locks.lock(m, env.cfg.mutex_kind(m));
                if next.multithreaded {
                    privatization::lock(env, &mut next, m);
                }
            }
            EdgeKind::Unlock(m) => {
                next.locks.unlock(m, env.cfg.mutex_kind(m));
                if next.multithreaded {
                    privatization::unlock(env, &mut next, m);
                }
            }
            EdgeKind::Join(function) => {
                let candidates: Vec<&ThreadId> = next
                    .created
                    .iter()
                    .filter(|t| t.function() == Some(function.as_str()) && t.is_unique())
                    .collect();
                if let [thread] = candidates.as_slice() {
                    let thread = (*thread).clone();
                    next.joined.insert(thread);
                }
            }
            EdgeKind::Havoc(lv) => {
                let havoc = match env.lvalue_type(lv) {
                    Some(Ty::Ptr(_)) => Value::Addr(AddrSet::Top),
                    _ => Value::Top,
                };
                next.store_lvalue(env, lv, havoc);
            }
            EdgeKind::Alloc(lv) => {
                let heap = Value::Addr(AddrSet::cell(Cell::heap(env.edge)));
                next.assign_value(env, lv, heap);
            }
        }
        if next.rel.is_bottom() {
            next.reachable = false;
        }
        next
    }

    // Calls

    /// Entry state of `callee` and the caller cells it may access.
    pub fn enter(&self, env: &mut Env, callee: &str, args: &[Expr]) -> (State, Option<BTreeSet<Cell>>) {
        let Some(function) = env.cfg.function(callee) else {
            return (State::unreachable(), None);
        };
        let values: Vec<Value> = args.iter().map(|a| self.eval(env, a)).collect();
        let mut roots = Vec::new();
        let mut unknown = false;
        for v in values.iter() {
            match pointees(v) {
                Some(cells) => roots.extend(cells),
                None => unknown = true,
            }
        }
        match self.shared_roots() {
            Some(cells) => roots.extend(cells),
            None => unknown = true,
        }
        let reach = if unknown { None } else { self.reachable_cells(roots) };

        let mut entry = self.clone();
        entry.cells.retain(|c, _| {
            !matches!(c.base, Base::Local { .. }) || reach.as_ref().map_or(true, |r| r.contains(c))
        });
        let domains = env.config.domains_for(callee);
        for (i, decl) in function.params.iter().enumerate() {
            let base = Cell::local(callee, &decl.name);
            match (&decl.ty, args.get(i)) {
                (Ty::Struct(_), Some(Expr::Read(lv))) => {
                    for path in scalar_paths(env.cfg, &decl.ty) {
                        let field = path.iter().fold(lv.as_ref().clone(), |l, f| l.field(f.clone()));
                        let value = self.read_lvalue(env, &field);
                        entry.set(path.iter().fold(base.clone(), |c, f| c.field(f)), value);
                    }
                }
                (_, Some(_)) => {
                    let value = match &values[i] {
                        Value::Int(v) => Value::Int(v.restrict(&domains)),
                        v => v.clone(),
                    };
                    entry.set(base, value);
                }
                (_, None) => entry.set(base, Value::Top),
            }
        }

        let mut rel = Relational::new(env.config.relational);
        if rel.is_enabled() {
            let mut scratch = self.rel.clone();
            let mut bound = Vec::new();
            for (decl, arg) in function.params.iter().zip(args) {
                if decl.ty != Ty::Int {
                    continue;
                }
                let temp = format!("#{}", decl.name);
                let lin = {
                    let env = &*env;
                    linearize(arg, &|n: &str| self.tracked(env, n))
                };
                let value = self.eval(env, arg).as_int().interval;
                scratch.assign(&temp, lin.as_ref(), &value);
                bound.push((decl.name.clone(), temp));
            }
            scratch.project(|v| v.starts_with('#'));
            for (name, temp) in &bound {
                let bounds = scratch.bounds(temp);
                scratch.assign(name, Some(&LinExpr::var(temp)), &bounds);
            }
            scratch.project(|v| !v.starts_with('#'));
            rel = scratch;
        }
        entry.rel = rel;
        (entry, reach)
    }

    /// State after the call, from the caller's state before it and the
    /// callee's exit state.
    pub fn combine(
        &self,
        env: &mut Env,
        callee: &str,
        exit: &State,
        reach: &Option<BTreeSet<Cell>>,
        ret: Option<&LValue>,
    ) -> State {
        if !self.reachable || !exit.reachable {
            return State::unreachable();
        }
        let mut out = exit.clone();
        out.rel = self.rel.clone();
        out.cells.retain(|c, _| !c.is_local_of(callee));
        for (c, v) in &self.cells {
            let hidden = matches!(c.base, Base::Local { .. }) && reach.as_ref().map_or(false, |r| !r.contains(c));
            if hidden {
                out.cells.insert(c.clone(), v.clone());
            }
        }
        for var in out.rel.vars() {
            let cell = env.var_cell(&var);
            if reach.as_ref().map_or(true, |r| r.contains(&cell)) {
                let interval = out.get(&cell).as_int().interval;
                out.rel.forget(&var);
                out.rel.set_bounds(&var, &interval);
            }
        }
        if let Some(lv) = ret {
            let value = exit.get(&Cell::local(callee, RET));
            out.assign_value(env, lv, value);
        }
        out
    }

    /// Apply a modular summary of `callee` instead of analysing its body.
    pub fn apply_summary(
        &self,
        env: &mut Env,
        callee: &str,
        summary: &ModularSummary,
        args: &[Expr],
        ret: Option<&LValue>,
    ) -> State {
        let mut out = self.clone();
        if !self.reachable || !(summary.returns || summary.top) {
            return State::unreachable();
        }
        let values: Vec<Value> = args.iter().map(|a| self.eval(env, a)).collect();
        let params: Vec<String> = env
            .cfg
            .function(callee)
            .map(|f| f.params.iter().map(|d| d.name.clone()).collect())
            .unwrap_or_default();
        let arg_of = |param: &str| params.iter().position(|p| p == param).and_then(|i| values.get(i));
        if summary.top {
            for cell in global_cells(env.cfg) {
                out.set_cell(env, &cell, Value::Top, false);
            }
            let roots: Option<Vec<Cell>> = values.iter().map(pointees).collect::<Option<Vec<_>>>().map(|v| v.concat());
            match roots.and_then(|roots| out.reachable_cells(roots)) {
                Some(cells) => {
                    for cell in cells {
                        out.set_cell(env, &cell, Value::Top, false);
                    }
                }
                None => out.havoc_all(env),
            }
        } else {
            if env.modular {
                for cell in summary.reads.iter().filter(|c| c.is_global()) {
                    modular::record_read(env, cell);
                }
            }
            for (cell, value) in &summary.writes {
                let value = translate(value, callee, &arg_of);
                match &cell.base {
                    Base::Global(_) => out.set_cell(env, cell, value, false),
                    Base::Opaque { function, param } if function == callee => {
                        match arg_of(param).map(|a| a.as_addr()).and_then(|a| a.cells().map(|cs| cs.into_iter().cloned().collect::<Vec<_>>())) {
                            Some(targets) => {
                                for target in targets {
                                    let target = cell.path.iter().fold(target, |c, f| c.field(f));
                                    out.set_cell(env, &target, value.clone(), false);
                                }
                            }
                            None => out.havoc_all(env),
                        }
                    }
                    _ => {}
                }
            }
        }
        if let Some(lv) = ret {
            let value = if summary.top { Value::Top } else { translate(&summary.ret, callee, &arg_of) };
            out.assign_value(env, lv, value);
        }
        out
    }

    // Threads

    /// Thread created by `spawn(function, arg)` at the current edge.
    pub fn thread_id(env: &Env, function: &str) -> ThreadId {
        let src = env.cfg.edge(env.edge).src;
        let unique = *env.thread == ThreadId::Main
            && env.config.entry_points.iter().any(|e| e == env.function)
            && !env.cfg.in_loop(src);
        ThreadId::Created {
            parent: Box::new(env.thread.clone()),
            site: env.edge,
            function: function.to_string(),
            unique,
        }
    }

    /// Creator side of a spawn; returns the new thread's id and start state.
    pub fn spawn(&mut self, env: &mut Env, function: &str, arg: Option<&Expr>) -> (ThreadId, State) {
        let tid = State::thread_id(env, function);
        let arg_value = arg.map(|a| self.eval(env, a));
        let mut roots = Some(Vec::new());
        if let (Some(v), Some(r)) = (&arg_value, roots.as_mut()) {
            match pointees(v) {
                Some(cells) => r.extend(cells),
                None => roots = None,
            }
        }
        if !self.multithreaded {
            roots = match (roots, self.shared_roots()) {
                (Some(mut r), Some(shared)) => {
                    r.extend(shared);
                    Some(r)
                }
                _ => None,
            };
        }
        let reach = roots.and_then(|r| self.reachable_cells(r));
        self.escape(env, reach);
        if self.multithreaded {
            privatization::publish_pending(env, self);
        } else {
            log::debug!("first spawn at {}: going multi-threaded", env.edge);
            privatization::publish_initial(env, self);
        }
        self.created.insert(tid.clone());

        let mut start = State::new(env.config.relational);
        start.multithreaded = true;
        start.escaped = self.escaped.clone();
        if let (Some(param), Some(value)) = (env.cfg.function(function).and_then(|f| f.params.first()), arg_value) {
            start.set(Cell::local(function, &param.name), value);
        }
        (tid, start)
    }
}

#[derive(Debug, Clone, Copy)]
enum Cmp {
    Eq,
    Neq,
    Lt,
    Le,
}

/// A resolved memory location: a cell, optionally an element of it.
#[derive(Debug, Clone)]
struct Loc {
    cell: Cell,
    index: Option<Interval>,
    /// Part of an array element (not tracked separately)
    inner: bool,
}

impl Loc {
    fn of(cell: Cell) -> Self {
        Loc {
            cell,
            index: None,
            inner: false,
        }
    }

    fn field(self, name: &str) -> Self {
        if self.index.is_some() || self.inner {
            Loc { inner: true, ..self }
        } else {
            Loc::of(self.cell.field(name))
        }
    }

    fn index(self, index: Interval) -> Self {
        if self.index.is_some() || self.inner {
            Loc { inner: true, ..self }
        } else {
            Loc {
                index: Some(index),
                ..self
            }
        }
    }
}

fn without_null(a: &AddrSet) -> AddrSet {
    match a {
        AddrSet::Top => AddrSet::Top,
        AddrSet::Set(set) => AddrSet::Set(set.iter().filter(|t| **t != Target::Null).cloned().collect()),
    }
}

/// Cells a value may point to (`None` for an unknown pointer).
fn pointees(value: &Value) -> Option<Vec<Cell>> {
    match value {
        Value::Addr(a) => a.cells().map(|cells| cells.into_iter().cloned().collect()),
        Value::Array(a) => pointees(&a.read(&Interval::top())),
        _ => Some(Vec::new()),
    }
}

/// Replace the opaque objects of `callee`'s parameters by what the caller passed.
fn translate<'v>(value: &Value, callee: &str, arg_of: &dyn Fn(&str) -> Option<&'v Value>) -> Value {
    let Value::Addr(AddrSet::Set(targets)) = value else {
        return value.clone();
    };
    let mut out = AddrSet::bottom();
    for target in targets {
        match target {
            Target::Cell(Cell {
                base: Base::Opaque { function, param },
                path,
            }) if function == callee => {
                let passed = arg_of(param).map(|v| v.as_addr()).unwrap_or(AddrSet::Top);
                let moved = path.iter().fold(passed, |a, f| a.field(f));
                out = out.join(&moved);
            }
            t => out = out.join(&AddrSet::Set(BTreeSet::from([t.clone()]))),
        }
    }
    Value::Addr(out)
}

/// Field paths of the scalar cells of a value of type `ty`.
pub fn scalar_paths(cfg: &Cfg, ty: &Ty) -> Vec<Vec<String>> {
    match ty {
        Ty::Struct(name) => match cfg.structs.get(name) {
            Some(fields) => fields
                .iter()
                .flat_map(|d| {
                    scalar_paths(cfg, &d.ty).into_iter().map(move |mut p| {
                        p.insert(0, d.name.clone());
                        p
                    })
                })
                .collect(),
            None => vec![Vec::new()],
        },
        _ => vec![Vec::new()],
    }
}

/// Every scalar cell of every global.
pub fn global_cells(cfg: &Cfg) -> Vec<Cell> {
    cfg.globals
        .iter()
        .flat_map(|(name, g)| {
            let base = Cell::global(name);
            scalar_paths(cfg, &g.decl.ty)
                .into_iter()
                .map(move |p| p.iter().fold(base.clone(), |c, f| c.field(f)))
        })
        .collect()
}

/// Declared type of a cell, if known.
pub fn cell_type(cfg: &Cfg, cell: &Cell) -> Option<Ty> {
    let mut ty = match &cell.base {
        Base::Local { function, name } => cfg
            .function(function)
            .map_or(Some(Ty::Int), |f| Some(f.var_type(name).cloned().unwrap_or(Ty::Int)))?,
        Base::Global(name) => cfg.globals.get(name)?.decl.ty.clone(),
        Base::Heap(_) | Base::Opaque { .. } => return None,
    };
    for f in &cell.path {
        ty = match ty {
            Ty::Struct(s) => cfg.structs.get(&s)?.iter().find(|d| d.name == *f)?.ty.clone(),
            _ => return None,
        };
    }
    Some(ty)
}

fn array_len(cfg: &Cfg, cell: &Cell) -> Option<i64> {
    match cell_type(cfg, cell)? {
        Ty::Array(_, n) => Some(n as i64),
        _ => None,
    }
}

/// Static zero initializer.
fn zero_value(ty: &Ty) -> Value {
    match ty {
        Ty::Int => Value::int(0),
        Ty::Ptr(_) => Value::Addr(AddrSet::null()),
        Ty::Array(elem, n) => Value::Array(Box::new(ArrayValue::new(Some(*n as i64), zero_value(elem)))),
        Ty::Struct(_) => Value::Top,
    }
}

/// Everything a transfer function may consult besides the state itself.
pub struct Env<'a> {
    pub cfg: &'a Cfg,
    pub config: &'a AnalysisConfig,
    /// Function the edge belongs to
    pub function: &'a str,
    pub thread: &'a ThreadId,
    pub edge: EdgeId,
    /// Whether the function is analysed in isolation
    pub modular: bool,
    pub globals: &'a mut dyn Globals,
}

impl<'a> Env<'a> {
    pub fn domains(&self) -> DomainSet {
        self.config.domains_for(self.function)
    }

    fn relational(&self) -> bool {
        self.config.relational != RelationalKind::None
    }

    /// Locals shadow globals; undeclared names are locals.
    pub fn is_local(&self, name: &str) -> bool {
        let declared = self
            .cfg
            .function(self.function)
            .map_or(false, |f| f.var_type(name).is_some());
        declared || !self.cfg.is_global(name)
    }

    pub fn var_cell(&self, name: &str) -> Cell {
        if self.is_local(name) {
            Cell::local(self.function, name)
        } else {
            Cell::global(name)
        }
    }

    pub fn var_type(&self, name: &str) -> Ty {
        cell_type(self.cfg, &self.var_cell(name)).unwrap_or(Ty::Int)
    }

    pub fn lvalue_type(&self, lv: &LValue) -> Option<Ty> {
        match lv {
            LValue::Var(v) => Some(self.var_type(v)),
            LValue::Field(base, f) => match self.lvalue_type(base)? {
                Ty::Struct(s) => self.cfg.structs.get(&s)?.iter().find(|d| d.name == *f).map(|d| d.ty.clone()),
                _ => None,
            },
            LValue::Index(base, _) => match self.lvalue_type(base)? {
                Ty::Array(elem, _) => Some(*elem),
                _ => None,
            },
            LValue::Deref(e) => match self.expr_type(e)? {
                Ty::Ptr(to) => Some(*to),
                _ => None,
            },
        }
    }

    fn expr_type(&self, e: &Expr) -> Option<Ty> {
        match e {
            Expr::Read(lv) => self.lvalue_type(lv),
            Expr::AddrOf(lv) => Some(Ty::ptr(self.lvalue_type(lv)?)),
            Expr::Null => None,
            _ => Some(Ty::Int),
        }
    }
}

fn merge_private(
    a: &BTreeMap<Cell, Private>,
    b: &BTreeMap<Cell, Private>,
    f: impl Fn(&Value, &Value) -> Value,
) -> BTreeMap<Cell, Private> {
    let mut out = BTreeMap::new();
    for (cell, p) in a {
        let merged = match b.get(cell) {
            Some(q) => Private {
                value: f(&p.value, &q.value),
                exact: p.exact && q.exact,
            },
            None => Private {
                value: p.value.clone(),
                exact: false,
            },
        };
        out.insert(cell.clone(), merged);
    }
    for (cell, q) in b {
        if !a.contains_key(cell) {
            out.insert(
                cell.clone(),
                Private {
                    value: q.value.clone(),
                    exact: false,
                },
            );
        }
    }
    out
}

fn merge_common<K: Ord + Clone>(
    a: &BTreeMap<K, Value>,
    b: &BTreeMap<K, Value>,
    f: impl Fn(&Value, &Value) -> Value,
    keep_top: impl Fn(&K) -> bool,
) -> BTreeMap<K, Value> {
    a.iter()
        .filter_map(|(k, v)| b.get(k).map(|w| (k.clone(), f(v, w))))
        .filter(|(k, v)| !v.is_top() || matches!(v, Value::Array(_)) || keep_top(k))
        .collect()
}

impl State {
    fn merge(
        &self,
        other: &State,
        values: impl Fn(&Value, &Value) -> Value + Copy,
        rel: impl Fn(&Relational, &Relational) -> Relational,
    ) -> State {
        if !self.reachable {
            return other.clone();
        }
        if !other.reachable {
            return self.clone();
        }
        let mut private = merge_private(&self.private, &other.private, values);
        if self.multithreaded != other.multithreaded {
            // Globals of the single-threaded side become copies that reads
            // join with the published view.
            let single = if self.multithreaded { other } else { self };
            for (cell, v) in single.cells.iter().filter(|(c, _)| c.is_global()) {
                let entry = private.entry(cell.clone()).or_insert(Private {
                    value: Value::Bottom,
                    exact: false,
                });
                entry.value = values(&entry.value, v);
                entry.exact = false;
            }
        }
        State {
            reachable: true,
            cells: merge_common(&self.cells, &other.cells, values, Cell::is_global),
            rel: rel(&self.rel, &other.rel),
            locks: self.locks.join(&other.locks),
            multithreaded: self.multithreaded || other.multithreaded,
            created: self.created.union(&other.created).cloned().collect(),
            joined: self.joined.intersection(&other.joined).cloned().collect(),
            private,
            kept: merge_common(&self.kept, &other.kept, values, |_| false),
            escaped: self.escaped.union(&other.escaped).cloned().collect(),
        }
    }
}

impl Lattice for State {
    fn bottom() -> Self {
        State::unreachable()
    }

    /// No knowledge at all, including whether other threads run.
    fn top() -> Self {
        State {
            multithreaded: true,
            ..State::new(RelationalKind::None)
        }
    }

    fn is_bottom(&self) -> bool {
        !self.reachable || self.rel.is_bottom()
    }

    fn is_top(&self) -> bool {
        self.reachable
            && self.multithreaded
            && self.cells.is_empty()
            && self.private.is_empty()
            && self.locks.is_empty()
            && !self.rel.is_enabled()
    }

    fn le(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        if other.is_bottom() {
            return false;
        }
        let cells = other
            .cells
            .iter()
            .all(|(c, w)| self.cells.get(c).map_or(false, |v| v.le(w)));
        let kept = other
            .kept
            .iter()
            .all(|(k, w)| self.kept.get(k).map_or(false, |v| v.le(w)));
        let private = self
            .private
            .keys()
            .chain(other.private.keys())
            .all(|c| match (self.private.get(c), other.private.get(c)) {
                (Some(a), Some(b)) => a.value.le(&b.value) && (a.exact || !b.exact),
                (None, Some(b)) => !b.exact,
                (Some(_), None) => false,
                (None, None) => true,
            });
        cells
            && kept
            && private
            && self.rel.le(&other.rel)
            && self.locks.le(&other.locks)
            && (!self.multithreaded || other.multithreaded)
            && self.created.is_subset(&other.created)
            && other.joined.is_subset(&self.joined)
            && self.escaped.is_subset(&other.escaped)
    }

    fn join(&self, other: &Self) -> Self {
        self.merge(other, |a, b| a.join(b), |a, b| a.join(b))
    }

    fn meet(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return State::unreachable();
        }
        let Some(locks) = self.locks.meet(&other.locks) else {
            return State::unreachable();
        };
        let mut cells = self.cells.clone();
        for (c, w) in &other.cells {
            let v = self.get(c).meet(w);
            if v.is_bottom() {
                return State::unreachable();
            }
            cells.insert(c.clone(), v);
        }
        let mut private = BTreeMap::new();
        for c in self.private.keys().chain(other.private.keys()) {
            match (self.private.get(c), other.private.get(c)) {
                (Some(a), Some(b)) => {
                    let merged = Private {
                        value: a.value.meet(&b.value),
                        exact: a.exact || b.exact,
                    };
                    private.insert(c.clone(), merged);
                }
                (Some(p), None) | (None, Some(p)) if p.exact => return State::unreachable(),
                _ => {}
            }
        }
        let mut kept = self.kept.clone();
        for (k, w) in &other.kept {
            let v = self.kept.get(k).map_or(w.clone(), |v| v.meet(w));
            kept.insert(k.clone(), v);
        }
        let rel = self.rel.meet(&other.rel);
        if rel.is_bottom() {
            return State::unreachable();
        }
        State {
            reachable: true,
            cells,
            rel,
            locks,
            multithreaded: self.multithreaded && other.multithreaded,
            created: self.created.intersection(&other.created).cloned().collect(),
            joined: self.joined.union(&other.joined).cloned().collect(),
            private,
            kept,
            escaped: self.escaped.intersection(&other.escaped).cloned().collect(),
        }
    }

    fn widen(&self, other: &Self) -> Self {
        self.merge(other, |a, b| a.widen(b), |a, b| a.widen(b))
    }

    fn narrow(&self, other: &Self) -> Self {
        if !self.reachable || !other.reachable {
            return other.clone();
        }
        let mut out = other.clone();
        for (c, v) in &self.cells {
            let narrowed = match other.cells.get(c) {
                Some(w) => v.narrow(w),
                None => v.clone(),
            };
            out.set(c.clone(), narrowed);
        }
        out.rel = self.rel.narrow(&other.rel);
        out
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.reachable {
            return write!(f, "⊥");
        }
        let mut parts: Vec<String> = self.cells.iter().map(|(c, v)| format!("{} = {}", c, v)).collect();
        parts.extend(self.rel.constraints());
        for (c, p) in &self.private {
            parts.push(format!("{} ↦ {}{}", c, p.value, if p.exact { "" } else { " (weak)" }));
        }
        if !self.locks.is_empty() {
            parts.push(self.locks.to_string());
        }
        if self.multithreaded {
            parts.push("multi-threaded".to_string());
        }
        write!(f, "{{{}}}", parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::cfg::{Function, VarDecl};
    use crate::domain::tests::test_lattice_axioms;
    use crate::solver::{GKey, GVal};

    fn program(locals: Vec<VarDecl>) -> Cfg {
        let mut cfg = Cfg::new();
        let entry = cfg.add_node("main", None);
        let exit = cfg.add_node("main", None);
        cfg.add_edge(entry, exit, EdgeKind::Skip);
        cfg.functions.insert(
            "main".to_string(),
            Function {
                name: "main".to_string(),
                params: vec![],
                locals,
                entry,
                exit,
            },
        );
        cfg.structs.insert(
            "pair".to_string(),
            vec![VarDecl::new("a", Ty::Int), VarDecl::new("b", Ty::Int)],
        );
        cfg.finalize();
        cfg
    }

    fn run(cfg: &Cfg, config: &AnalysisConfig, edges: &[EdgeKind]) -> State {
        let mut store: BTreeMap<GKey, GVal> = BTreeMap::new();
        let mut env = Env {
            cfg,
            config,
            function: "main",
            thread: &ThreadId::Main,
            edge: EdgeId::new(0),
            modular: false,
            globals: &mut store,
        };
        edges
            .iter()
            .fold(State::initial(cfg, config), |s, e| s.step(&mut env, e))
    }

    fn verdict(cfg: &Cfg, config: &AnalysisConfig, state: &State, c: Cond) -> Truth {
        let mut store: BTreeMap<GKey, GVal> = BTreeMap::new();
        let mut env = Env {
            cfg,
            config,
            function: "main",
            thread: &ThreadId::Main,
            edge: EdgeId::new(0),
            modular: false,
            globals: &mut store,
        };
        state.check(&mut env, &c)
    }

    fn set(name: &str, e: Expr) -> EdgeKind {
        EdgeKind::Assign(LValue::var(name), e)
    }

    fn x() -> Expr {
        Expr::var("x")
    }

    fn y() -> Expr {
        Expr::var("y")
    }

    #[test]
    fn test_division_guard_refines_dividend() {
        let cfg = program(vec![]);
        let config = AnalysisConfig::default();
        let state = run(&cfg, &config, &[
            EdgeKind::Havoc(LValue::var("y")),
            set("x", Expr::constant(3)),
            EdgeKind::Guard(y().div(x()).eq(Expr::constant(2))),
        ]);
        assert_eq!(state.get(&Cell::local("main", "y")).as_int().interval, Interval::range(6, 8));
        assert_eq!(verdict(&cfg, &config, &state, y().eq(Expr::constant(6))), Truth::Unknown);
        assert_eq!(verdict(&cfg, &config, &state, y().ge(Expr::constant(6))), Truth::True);
    }

    #[test]
    fn test_remainder_guard_uses_congruences() {
        let cfg = program(vec![]);
        let config = AnalysisConfig::default().with_domains(DomainSet::ALL);
        let state = run(&cfg, &config, &[
            EdgeKind::Havoc(LValue::var("x")),
            EdgeKind::Guard(x().gt(Expr::constant(1)).and(x().lt(Expr::constant(5)))),
            EdgeKind::Guard(x().modulo(Expr::constant(2)).eq(Expr::constant(1))),
        ]);
        assert_eq!(state.get(&Cell::local("main", "x")), Value::int(3));
    }

    #[test]
    fn test_contradictory_guard_is_unreachable() {
        let cfg = program(vec![]);
        let config = AnalysisConfig::default();
        let state = run(&cfg, &config, &[
            set("x", Expr::constant(3)),
            EdgeKind::Guard(x().gt(Expr::constant(5))),
        ]);
        assert!(state.is_bottom());

        let state = run(&cfg, &config, &[
            EdgeKind::Havoc(LValue::var("x")),
            EdgeKind::Guard(x().lt(Expr::constant(0))),
            EdgeKind::Guard(x().gt(Expr::constant(0))),
        ]);
        assert!(state.is_bottom());
    }

    #[test]
    fn test_strong_and_weak_pointer_updates() {
        let cfg = program(vec![VarDecl::new("p", Ty::ptr(Ty::Int))]);
        let config = AnalysisConfig::default();
        let deref = LValue::deref(Expr::var("p"));
        let state = run(&cfg, &config, &[
            set("x", Expr::constant(1)),
            set("y", Expr::constant(2)),
            set("p", Expr::addr_of(LValue::var("x"))),
            EdgeKind::Assign(deref.clone(), Expr::constant(5)),
        ]);
        assert_eq!(state.get(&Cell::local("main", "x")), Value::int(5));

        let state = run(&cfg, &config, &[
            set("x", Expr::constant(1)),
            set("y", Expr::constant(2)),
            set("p", Expr::addr_of(LValue::var("x"))),
        ]);
        let mut other = state.clone();
        other.set(
            Cell::local("main", "p"),
            Value::Addr(AddrSet::cell(Cell::local("main", "y"))),
        );
        let mut store: BTreeMap<GKey, GVal> = BTreeMap::new();
        let mut env = Env {
            cfg: &cfg,
            config: &config,
            function: "main",
            thread: &ThreadId::Main,
            edge: EdgeId::new(0),
            modular: false,
            globals: &mut store,
        };
        let joined = state.join(&other).step(&mut env, &EdgeKind::Assign(deref, Expr::constant(5)));
        assert_eq!(
            joined.get(&Cell::local("main", "x")).as_int().interval,
            Interval::range(1, 5)
        );
        assert_eq!(
            joined.get(&Cell::local("main", "y")).as_int().interval,
            Interval::range(2, 5)
        );
    }

    #[test]
    fn test_null_guard_refines_pointer() {
        let cfg = program(vec![VarDecl::new("p", Ty::ptr(Ty::Int))]);
        let config = AnalysisConfig::default();
        let mut state = run(&cfg, &config, &[set("p", Expr::Null)]);
        state.set(
            Cell::local("main", "p"),
            Value::Addr(AddrSet::null().join(&AddrSet::cell(Cell::local("main", "x")))),
        );
        let mut store: BTreeMap<GKey, GVal> = BTreeMap::new();
        let mut env = Env {
            cfg: &cfg,
            config: &config,
            function: "main",
            thread: &ThreadId::Main,
            edge: EdgeId::new(0),
            modular: false,
            globals: &mut store,
        };
        let guarded = state.step(&mut env, &EdgeKind::Guard(Expr::var("p").neq(Expr::Null)));
        assert_eq!(
            guarded.get(&Cell::local("main", "p")),
            Value::Addr(AddrSet::cell(Cell::local("main", "x")))
        );
    }

    #[test]
    fn test_struct_assignment_copies_fields() {
        let cfg = program(vec![
            VarDecl::new("s", Ty::Struct("pair".to_string())),
            VarDecl::new("t", Ty::Struct("pair".to_string())),
        ]);
        let config = AnalysisConfig::default();
        let state = run(&cfg, &config, &[
            EdgeKind::Assign(LValue::var("s").field("a"), Expr::constant(1)),
            EdgeKind::Assign(LValue::var("s").field("b"), Expr::constant(2)),
            EdgeKind::Assign(LValue::var("t"), Expr::var("s")),
        ]);
        assert_eq!(state.get(&Cell::local("main", "t").field("a")), Value::int(1));
        assert_eq!(state.get(&Cell::local("main", "t").field("b")), Value::int(2));
    }

    #[test]
    fn test_octagon_proves_relation() {
        let cfg = program(vec![]);
        let config = AnalysisConfig::default().with_relational(RelationalKind::Octagon);
        let state = run(&cfg, &config, &[
            EdgeKind::Havoc(LValue::var("y")),
            set("x", y().add(Expr::constant(1))),
        ]);
        assert_eq!(verdict(&cfg, &config, &state, x().gt(y())), Truth::True);
        assert_eq!(verdict(&cfg, &config, &state, x().eq(y())), Truth::False);

        let plain = AnalysisConfig::default();
        let state = run(&cfg, &plain, &[
            EdgeKind::Havoc(LValue::var("y")),
            set("x", y().add(Expr::constant(1))),
        ]);
        assert_eq!(verdict(&cfg, &plain, &state, x().gt(y())), Truth::Unknown);
    }

    #[test]
    fn test_array_last_written_index() {
        let cfg = program(vec![VarDecl::new("a", Ty::array(Ty::Int, 10))]);
        let config = AnalysisConfig::default();
        let elem = |i: i64| LValue::var("a").index(Expr::constant(i));
        let state = run(&cfg, &config, &[
            EdgeKind::Assign(elem(3), Expr::constant(7)),
        ]);
        let mut store: BTreeMap<GKey, GVal> = BTreeMap::new();
        let mut env = Env {
            cfg: &cfg,
            config: &config,
            function: "main",
            thread: &ThreadId::Main,
            edge: EdgeId::new(0),
            modular: false,
            globals: &mut store,
        };
        assert_eq!(state.read_lvalue(&mut env, &elem(3)), Value::int(7));
        assert!(state.read_lvalue(&mut env, &elem(4)).is_top());
    }

    #[test]
    fn test_global_initializers() {
        let mut cfg = program(vec![]);
        cfg.globals.insert(
            "g".to_string(),
            crate::cfg::GlobalDecl {
                decl: VarDecl::new("g", Ty::Int),
                init: vec![(vec![], 10)],
            },
        );
        cfg.globals.insert(
            "h".to_string(),
            crate::cfg::GlobalDecl {
                decl: VarDecl::new("h", Ty::Struct("pair".to_string())),
                init: vec![],
            },
        );
        let state = State::initial(&cfg, &AnalysisConfig::default());
        assert_eq!(state.get(&Cell::global("g")), Value::int(10));
        assert_eq!(state.get(&Cell::global("h").field("b")), Value::int(0));
        assert_eq!(global_cells(&cfg).len(), 3);
    }

    #[test]
    fn test_private_copies_order() {
        let exact = |v: i64| Private {
            value: Value::int(v),
            exact: true,
        };
        let g = Cell::global("g");
        let mut a = State::new(RelationalKind::None);
        a.multithreaded = true;
        a.private.insert(g.clone(), exact(1));
        let mut b = a.clone();
        b.private.clear();

        let joined = a.join(&b);
        assert_eq!(joined.private.get(&g).map(|p| p.exact), Some(false));
        assert!(a.le(&joined));
        assert!(b.le(&joined));
        assert!(!joined.le(&a));
    }

    #[test]
    fn test_state_lattice_axioms() {
        let mut s1 = State::new(RelationalKind::None);
        s1.set(Cell::local("main", "x"), Value::int(1));
        let mut s2 = s1.clone();
        s2.set(Cell::local("main", "x"), Value::Int(IntValue::range(0, 4)));
        s2.set(Cell::local("main", "y"), Value::int(2));
        let mut s3 = State::new(RelationalKind::None);
        s3.multithreaded = true;
        s3.set(Cell::local("main", "y"), Value::int(7));
        let samples = vec![State::bottom(), State::top(), s1, s2, s3];
        test_lattice_axioms(&samples);
    }
}
