//! Relational domains over the integer locals of the current function.
//!
//! [`Relational`] is a closed sum over the supported kinds; every transfer
//! function matches on it exhaustively. Variables are plain local names: a
//! state only ever holds the relations of one function instance, parameters
//! are bound by assignment at calls and callee locals are projected away at
//! returns.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::affine::Affine;
use crate::domain::Lattice;
use crate::error::AnalysisError;
use crate::expr::{Cond, Expr, LValue};
use crate::interval::{Bound, Interval};
use crate::octagon::Octagon;

/// Which relational domain is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationalKind {
    #[default]
    None,
    /// Boxes: one interval per variable, kept next to the value domain
    Interval,
    Octagon,
    /// Octagon reduced with affine equalities
    Polyhedra,
}

impl FromStr for RelationalKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(RelationalKind::None),
            "interval" | "apron-interval" | "box" => Ok(RelationalKind::Interval),
            "octagon" => Ok(RelationalKind::Octagon),
            "polyhedra" | "affeq" => Ok(RelationalKind::Polyhedra),
            other => Err(AnalysisError::UnknownDomain(other.to_string())),
        }
    }
}

impl fmt::Display for RelationalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationalKind::None => "none",
            RelationalKind::Interval => "apron-interval",
            RelationalKind::Octagon => "octagon",
            RelationalKind::Polyhedra => "polyhedra",
        };
        write!(f, "{}", name)
    }
}

/// `Σ coeffs[v]·v + constant`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LinExpr {
    pub coeffs: BTreeMap<String, i64>,
    pub constant: i64,
}

impl LinExpr {
    pub fn new(terms: impl IntoIterator<Item = (String, i64)>, constant: i64) -> Self {
        let mut coeffs = BTreeMap::new();
        for (v, a) in terms {
            *coeffs.entry(v).or_insert(0) += a;
        }
        coeffs.retain(|_, a| *a != 0);
        LinExpr { coeffs, constant }
    }

    pub fn constant(c: i64) -> Self {
        LinExpr {
            coeffs: BTreeMap::new(),
            constant: c,
        }
    }

    pub fn var(name: &str) -> Self {
        LinExpr::new([(name.to_string(), 1)], 0)
    }

    pub fn coeff(&self, var: &str) -> i64 {
        self.coeffs.get(var).copied().unwrap_or(0)
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn neg(&self) -> LinExpr {
        LinExpr {
            coeffs: self.coeffs.iter().map(|(v, a)| (v.clone(), -a)).collect(),
            constant: -self.constant,
        }
    }

    fn checked_add(&self, other: &LinExpr) -> Option<LinExpr> {
        let mut coeffs = self.coeffs.clone();
        for (v, a) in &other.coeffs {
            let entry = coeffs.entry(v.clone()).or_insert(0);
            *entry = entry.checked_add(*a)?;
        }
        coeffs.retain(|_, a| *a != 0);
        Some(LinExpr {
            coeffs,
            constant: self.constant.checked_add(other.constant)?,
        })
    }

    fn checked_scale(&self, k: i64) -> Option<LinExpr> {
        let mut coeffs = BTreeMap::new();
        for (v, a) in &self.coeffs {
            let c = a.checked_mul(k)?;
            if c != 0 {
                coeffs.insert(v.clone(), c);
            }
        }
        Some(LinExpr {
            coeffs,
            constant: self.constant.checked_mul(k)?,
        })
    }
}

impl fmt::Display for LinExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.coeffs.iter().map(|(v, a)| format!("{}*{}", a, v)).collect();
        if self.constant != 0 || parts.is_empty() {
            parts.push(self.constant.to_string());
        }
        write!(f, "{}", parts.join(" + "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinKind {
    /// expr == 0
    Eq,
    /// expr <= 0
    Le,
    /// expr != 0
    Neq,
}

/// Linear constraint `expr ⋈ 0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinCons {
    pub expr: LinExpr,
    pub kind: LinKind,
}

impl LinCons {
    pub fn le(expr: LinExpr) -> Self {
        LinCons { expr, kind: LinKind::Le }
    }

    pub fn eq(expr: LinExpr) -> Self {
        LinCons { expr, kind: LinKind::Eq }
    }

    pub fn neq(expr: LinExpr) -> Self {
        LinCons { expr, kind: LinKind::Neq }
    }
}

/// Linear form of `expr` over the variables accepted by `tracked`.
pub fn linearize(expr: &Expr, tracked: &dyn Fn(&str) -> bool) -> Option<LinExpr> {
    match expr {
        Expr::Const(c) => Some(LinExpr::constant(*c)),
        Expr::Read(lv) => match lv.as_ref() {
            LValue::Var(v) if tracked(v) => Some(LinExpr::var(v)),
            _ => None,
        },
        Expr::Add(a, b) => linearize(a, tracked)?.checked_add(&linearize(b, tracked)?),
        Expr::Sub(a, b) => linearize(a, tracked)?.checked_add(&linearize(b, tracked)?.neg()),
        Expr::Neg(e) => Some(linearize(e, tracked)?.neg()),
        Expr::Mul(a, b) => {
            let (a, b) = (linearize(a, tracked)?, linearize(b, tracked)?);
            if a.is_constant() {
                b.checked_scale(a.constant)
            } else if b.is_constant() {
                a.checked_scale(b.constant)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Linear constraint of a comparison, if both sides are linear.
pub fn linearize_cond(cond: &Cond, tracked: &dyn Fn(&str) -> bool) -> Option<LinCons> {
    let diff = |a: &Expr, b: &Expr| linearize(a, tracked)?.checked_add(&linearize(b, tracked)?.neg());
    match cond {
        Cond::Eq(a, b) => Some(LinCons::eq(diff(a, b)?)),
        Cond::Neq(a, b) => Some(LinCons::neq(diff(a, b)?)),
        Cond::Le(a, b) => Some(LinCons::le(diff(a, b)?)),
        Cond::Ge(a, b) => Some(LinCons::le(diff(b, a)?)),
        // a < b  ⇔  a - b + 1 ≤ 0 over integers
        Cond::Lt(a, b) => Some(LinCons::le(diff(a, b)?.checked_add(&LinExpr::constant(1))?)),
        Cond::Gt(a, b) => Some(LinCons::le(diff(b, a)?.checked_add(&LinExpr::constant(1))?)),
        _ => None,
    }
}

/// Non-relational boxes (one interval per variable).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Boxes {
    bounds: BTreeMap<String, Interval>,
    bottom: bool,
}

impl Boxes {
    pub fn bounds(&self, var: &str) -> Interval {
        if self.bottom {
            return Interval::bottom();
        }
        self.bounds.get(var).copied().unwrap_or_else(Interval::top)
    }

    fn set(&mut self, var: &str, value: Interval) {
        if value.is_empty() {
            self.bottom = true;
        } else if value.is_top() {
            self.bounds.remove(var);
        } else {
            self.bounds.insert(var.to_string(), value);
        }
    }

    fn eval(&self, expr: &LinExpr) -> Interval {
        if self.bottom {
            return Interval::bottom();
        }
        expr.coeffs.iter().fold(Interval::constant(expr.constant), |acc, (v, a)| {
            acc.add(&self.bounds(v).mul(&Interval::constant(*a)))
        })
    }

    fn guard_le(&mut self, expr: &LinExpr) {
        if self.eval(expr).low > Bound::Finite(0) {
            self.bottom = true;
            return;
        }
        for (x, a) in &expr.coeffs {
            let mut rest = expr.clone();
            rest.coeffs.remove(x);
            let Bound::Finite(low) = self.eval(&rest).low else {
                continue;
            };
            let refined = Interval::at_most(low.saturating_neg()).mul_preimage(*a);
            let current = self.bounds(x);
            self.set(x, current.meet(&refined));
        }
    }

    fn guard(&mut self, cons: &LinCons) {
        match cons.kind {
            LinKind::Le => self.guard_le(&cons.expr),
            LinKind::Eq => {
                self.guard_le(&cons.expr);
                self.guard_le(&cons.expr.neg());
            }
            LinKind::Neq => {
                if self.eval(&cons.expr).as_constant() == Some(0) {
                    self.bottom = true;
                }
            }
        }
    }

    fn combine(&self, other: &Boxes, f: impl Fn(&Interval, &Interval) -> Interval) -> Boxes {
        let flag = |b: &Boxes| if b.bottom { Interval::bottom() } else { Interval::top() };
        let mut result = Boxes::default();
        if f(&flag(self), &flag(other)).is_empty() {
            result.bottom = true;
            return result;
        }
        let vars: Vec<&String> = self.bounds.keys().chain(other.bounds.keys()).collect();
        for v in vars {
            result.set(v, f(&self.bounds(v), &other.bounds(v)));
        }
        result
    }
}

/// Relational part of an abstract state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Relational {
    None,
    Interval(Boxes),
    Octagon(Octagon),
    Polyhedra(Octagon, Affine),
}

impl Relational {
    pub fn new(kind: RelationalKind) -> Self {
        match kind {
            RelationalKind::None => Relational::None,
            RelationalKind::Interval => Relational::Interval(Boxes::default()),
            RelationalKind::Octagon => Relational::Octagon(Octagon::top()),
            RelationalKind::Polyhedra => Relational::Polyhedra(Octagon::top(), Affine::top()),
        }
    }

    pub fn kind(&self) -> RelationalKind {
        match self {
            Relational::None => RelationalKind::None,
            Relational::Interval(_) => RelationalKind::Interval,
            Relational::Octagon(_) => RelationalKind::Octagon,
            Relational::Polyhedra(..) => RelationalKind::Polyhedra,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Relational::None)
    }

    pub fn is_bottom(&self) -> bool {
        match self {
            Relational::None => false,
            Relational::Interval(b) => b.bottom,
            Relational::Octagon(o) => o.is_bottom(),
            Relational::Polyhedra(o, a) => o.is_bottom() || a.is_bottom(),
        }
    }

    /// Variables with constraints.
    pub fn vars(&self) -> Vec<String> {
        match self {
            Relational::None => Vec::new(),
            Relational::Interval(b) => b.bounds.keys().cloned().collect(),
            Relational::Octagon(o) => o.vars().to_vec(),
            Relational::Polyhedra(o, a) => {
                let mut vars: Vec<String> = o.vars().iter().chain(a.vars().iter()).cloned().collect();
                vars.sort();
                vars.dedup();
                vars
            }
        }
    }

    pub fn forget(&mut self, var: &str) {
        match self {
            Relational::None => {}
            Relational::Interval(b) => b.set(var, Interval::top()),
            Relational::Octagon(o) => o.forget(var),
            Relational::Polyhedra(o, a) => {
                o.forget(var);
                a.forget(var);
            }
        }
    }

    /// Project `var` out.
    pub fn remove_var(&mut self, var: &str) {
        match self {
            Relational::None => {}
            Relational::Interval(b) => b.set(var, Interval::top()),
            Relational::Octagon(o) => o.remove_var(var),
            Relational::Polyhedra(o, a) => {
                o.remove_var(var);
                a.remove_var(var);
            }
        }
    }

    /// Keep only the variables accepted by `keep`.
    pub fn project(&mut self, keep: impl Fn(&str) -> bool) {
        for v in self.vars() {
            if !keep(&v) {
                self.remove_var(&v);
            }
        }
    }

    /// `var := expr`; `value` bounds a non-linear right-hand side.
    pub fn assign(&mut self, var: &str, expr: Option<&LinExpr>, value: &Interval) {
        match (self, expr) {
            (Relational::None, _) => {}
            (Relational::Interval(b), _) => b.set(var, *value),
            (Relational::Octagon(o), Some(e)) => o.assign(var, e),
            (Relational::Octagon(o), None) => {
                o.forget(var);
                o.set_bounds(var, value);
            }
            (Relational::Polyhedra(o, a), Some(e)) => {
                o.assign(var, e);
                a.assign(var, e);
                reduce(o, a);
            }
            (Relational::Polyhedra(o, a), None) => {
                o.forget(var);
                o.set_bounds(var, value);
                a.forget(var);
                if let Some(c) = value.as_constant() {
                    a.assign(var, &LinExpr::constant(c));
                }
            }
        }
    }

    /// Meet `var` with non-relational bounds.
    pub fn set_bounds(&mut self, var: &str, value: &Interval) {
        match self {
            Relational::None => {}
            Relational::Interval(b) => {
                let current = b.bounds(var);
                b.set(var, current.meet(value));
            }
            Relational::Octagon(o) => o.set_bounds(var, value),
            Relational::Polyhedra(o, a) => {
                o.set_bounds(var, value);
                if value.is_empty() {
                    *a = Affine::bottom();
                } else if let Some(c) = value.as_constant() {
                    a.guard(&LinCons::eq(LinExpr::new([(var.to_string(), 1)], -c)));
                }
                reduce(o, a);
            }
        }
    }

    pub fn guard(&mut self, cons: &LinCons) {
        match self {
            Relational::None => {}
            Relational::Interval(b) => b.guard(cons),
            Relational::Octagon(o) => o.guard(cons),
            Relational::Polyhedra(o, a) => {
                a.guard(cons);
                o.guard(cons);
                reduce(o, a);
            }
        }
    }

    pub fn bounds(&self, var: &str) -> Interval {
        self.eval(&LinExpr::var(var))
    }

    pub fn eval(&self, expr: &LinExpr) -> Interval {
        match self {
            Relational::None => Interval::top(),
            Relational::Interval(b) => b.eval(expr),
            Relational::Octagon(o) => o.eval(expr),
            Relational::Polyhedra(o, a) => o.eval(expr).meet(&a.eval(expr)),
        }
    }

    pub fn constraints(&self) -> Vec<String> {
        match self {
            Relational::None => Vec::new(),
            Relational::Interval(b) if b.bottom => vec!["false".to_string()],
            Relational::Interval(b) => b
                .bounds
                .iter()
                .map(|(v, i)| format!("{} ∈ {}", v, i))
                .collect(),
            Relational::Octagon(o) => o.constraints(),
            Relational::Polyhedra(o, a) => {
                let mut out = o.constraints();
                out.extend(a.constraints());
                out
            }
        }
    }

    fn zip(&self, other: &Relational, fb: impl Fn(&Boxes, &Boxes) -> Boxes, fo: impl Fn(&Octagon, &Octagon) -> Octagon, fa: impl Fn(&Affine, &Affine) -> Affine) -> Relational {
        match (self, other) {
            (Relational::Interval(a), Relational::Interval(b)) => Relational::Interval(fb(a, b)),
            (Relational::Octagon(a), Relational::Octagon(b)) => Relational::Octagon(fo(a, b)),
            (Relational::Polyhedra(o1, a1), Relational::Polyhedra(o2, a2)) => {
                Relational::Polyhedra(fo(o1, o2), fa(a1, a2))
            }
            _ => self.clone(),
        }
    }

    pub fn le(&self, other: &Relational) -> bool {
        if self.is_bottom() {
            return true;
        }
        match (self, other) {
            (Relational::Interval(a), Relational::Interval(b)) => {
                !b.bottom && b.bounds.iter().all(|(v, i)| a.bounds(v).le(i))
            }
            (Relational::Octagon(a), Relational::Octagon(b)) => a.le(b),
            (Relational::Polyhedra(o1, a1), Relational::Polyhedra(o2, a2)) => o1.le(o2) && a1.le(a2),
            _ => true,
        }
    }

    pub fn join(&self, other: &Relational) -> Relational {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        self.zip(other, |a, b| a.combine(b, |x, y| x.join(y)), Octagon::join, Affine::join)
    }

    pub fn meet(&self, other: &Relational) -> Relational {
        let mut result = self.zip(other, |a, b| a.combine(b, |x, y| x.meet(y)), Octagon::meet, Affine::meet);
        if let Relational::Polyhedra(o, a) = &mut result {
            reduce(o, a);
        }
        result
    }

    pub fn widen(&self, other: &Relational) -> Relational {
        if self.is_bottom() {
            return other.clone();
        }
        self.zip(other, |a, b| a.combine(b, |x, y| x.widen(y)), Octagon::widen, Affine::widen)
    }

    pub fn narrow(&self, other: &Relational) -> Relational {
        self.zip(other, |a, b| a.combine(b, |x, y| x.narrow(y)), Octagon::narrow, Affine::narrow)
    }
}

/// Propagate equalities that pin a variable to a constant into the octagon,
/// and emptiness both ways.
fn reduce(o: &mut Octagon, a: &mut Affine) {
    if o.is_bottom() || a.is_bottom() {
        *o = Octagon::bottom();
        *a = Affine::bottom();
        return;
    }
    for v in a.vars().to_vec() {
        let value = a.eval(&LinExpr::var(&v));
        if value.as_constant().is_some() {
            let current = o.bounds(&v);
            if !current.le(&value) {
                o.set_bounds(&v, &value);
            }
        }
    }
    if o.is_bottom() {
        *a = Affine::bottom();
    }
}

impl fmt::Display for Relational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.constraints().join(", "))
    }
}
