//! Octagon domain: constraints `±x ± y ≤ c` as a difference-bound matrix.
//!
//! Every variable `x_k` is split into `V₂ₖ = x_k` and `V₂ₖ₊₁ = -x_k`; entry
//! `m[i][j]` bounds `Vⱼ - Vᵢ` (`None` is +∞). Operations keep the matrix
//! strongly closed, except the result of widening, which must stay open for
//! termination.

use std::fmt;

use crate::domain::Lattice;
use crate::interval::{Bound, Interval};
use crate::relational::{LinCons, LinExpr, LinKind};

type Entry = Option<i64>;

fn add(a: Entry, b: Entry) -> Entry {
    match (a, b) {
        (Some(x), Some(y)) => x.checked_add(y),
        _ => None,
    }
}

fn min(a: Entry, b: Entry) -> Entry {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn max(a: Entry, b: Entry) -> Entry {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        _ => None,
    }
}

/// `a ≤ b` with `None` as +∞.
fn entry_le(a: Entry, b: Entry) -> bool {
    match (a, b) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(x), Some(y)) => x <= y,
    }
}

fn bar(i: usize) -> usize {
    i ^ 1
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Octagon {
    /// Tracked variables, sorted.
    vars: Vec<String>,
    m: Vec<Entry>,
    bottom: bool,
}

impl Octagon {
    fn dim(&self) -> usize {
        2 * self.vars.len()
    }

    fn at(&self, i: usize, j: usize) -> Entry {
        self.m[i * self.dim() + j]
    }

    fn set(&mut self, i: usize, j: usize, v: Entry) {
        let dim = self.dim();
        self.m[i * dim + j] = v;
    }

    /// Add `Vⱼ - Vᵢ ≤ c` and its coherent twin.
    fn constrain(&mut self, i: usize, j: usize, c: i64) {
        let v = min(self.at(i, j), Some(c));
        self.set(i, j, v);
        let w = min(self.at(bar(j), bar(i)), Some(c));
        self.set(bar(j), bar(i), w);
    }

    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    fn index(&self, var: &str) -> Option<usize> {
        self.vars.binary_search_by(|v| v.as_str().cmp(var)).ok()
    }

    pub fn has_var(&self, var: &str) -> bool {
        self.index(var).is_some()
    }

    /// Track `var`, unconstrained.
    pub fn add_var(&mut self, var: &str) {
        if self.has_var(var) {
            return;
        }
        let mut vars = self.vars.clone();
        vars.push(var.to_string());
        vars.sort();
        *self = self.extend_to(&vars);
    }

    /// Re-embed into a larger sorted variable list.
    fn extend_to(&self, vars: &[String]) -> Octagon {
        let mut result = Octagon::unconstrained(vars.to_vec());
        result.bottom = self.bottom;
        let map: Vec<usize> = self
            .vars
            .iter()
            .map(|v| vars.binary_search(v).unwrap_or_default())
            .collect();
        let dim = self.dim();
        for i in 0..dim {
            for j in 0..dim {
                let (ni, nj) = (2 * map[i / 2] + i % 2, 2 * map[j / 2] + j % 2);
                result.set(ni, nj, self.at(i, j));
            }
        }
        result
    }

    fn unconstrained(vars: Vec<String>) -> Octagon {
        let dim = 2 * vars.len();
        let mut m = vec![None; dim * dim];
        for i in 0..dim {
            m[i * dim + i] = Some(0);
        }
        Octagon { vars, m, bottom: false }
    }

    /// Bring both operands to the union of their variables.
    fn align(&self, other: &Octagon) -> (Octagon, Octagon) {
        if self.vars == other.vars {
            return (self.clone(), other.clone());
        }
        let mut vars = self.vars.clone();
        vars.extend(other.vars.iter().cloned());
        vars.sort();
        vars.dedup();
        (self.extend_to(&vars), other.extend_to(&vars))
    }

    /// Drop `var` (projection on scope exit).
    pub fn remove_var(&mut self, var: &str) {
        let Some(k) = self.index(var) else {
            return;
        };
        self.close();
        let old_dim = self.dim();
        let mut vars = self.vars.clone();
        vars.remove(k);
        let mut result = Octagon::unconstrained(vars);
        result.bottom = self.bottom;
        let keep: Vec<usize> = (0..old_dim).filter(|i| i / 2 != k).collect();
        for (ni, &i) in keep.iter().enumerate() {
            for (nj, &j) in keep.iter().enumerate() {
                result.set(ni, nj, self.at(i, j));
            }
        }
        *self = result;
    }

    /// Remove all constraints on `var`, keeping it tracked.
    pub fn forget(&mut self, var: &str) {
        let Some(k) = self.index(var) else {
            return;
        };
        self.close();
        let dim = self.dim();
        for i in 0..dim {
            for p in [2 * k, 2 * k + 1] {
                if i != p {
                    self.set(i, p, None);
                    self.set(p, i, None);
                }
            }
        }
    }

    /// Strong closure with integer tightening; detects emptiness.
    pub fn close(&mut self) {
        if self.bottom {
            return;
        }
        let dim = self.dim();
        for k in 0..dim {
            for i in 0..dim {
                let ik = self.at(i, k);
                if ik.is_none() {
                    continue;
                }
                for j in 0..dim {
                    let via = add(ik, self.at(k, j));
                    if !entry_le(self.at(i, j), via) {
                        self.set(i, j, via);
                    }
                }
            }
        }
        // Integer tightening: 2x ≤ c  ⇒  2x ≤ 2⌊c/2⌋
        for i in 0..dim {
            if let Some(c) = self.at(i, bar(i)) {
                self.set(i, bar(i), Some(2 * c.div_euclid(2)));
            }
        }
        for i in 0..dim {
            for j in 0..dim {
                let via = match (self.at(i, bar(i)), self.at(bar(j), j)) {
                    (Some(a), Some(b)) => a.checked_add(b).map(|s| s.div_euclid(2)),
                    _ => None,
                };
                if !entry_le(self.at(i, j), via) {
                    self.set(i, j, via);
                }
            }
        }
        for i in 0..dim {
            match self.at(i, i) {
                Some(c) if c < 0 => {
                    self.bottom = true;
                    return;
                }
                _ => self.set(i, i, Some(0)),
            }
        }
    }

    fn closed(&self) -> Octagon {
        let mut c = self.clone();
        c.close();
        c
    }

    /// Bounds of `var` (top if untracked).
    pub fn bounds(&self, var: &str) -> Interval {
        if self.bottom {
            return Interval::bottom();
        }
        let Some(k) = self.index(var) else {
            return Interval::top();
        };
        let c = self.closed();
        if c.bottom {
            return Interval::bottom();
        }
        let high = c.at(2 * k + 1, 2 * k).map_or(Bound::PosInf, |v| Bound::Finite(v.div_euclid(2)));
        let low = c.at(2 * k, 2 * k + 1).map_or(Bound::NegInf, |v| Bound::Finite(-(v.div_euclid(2))));
        Interval::new(low, high)
    }

    /// Meet with `low ≤ var ≤ high`.
    pub fn set_bounds(&mut self, var: &str, bounds: &Interval) {
        if bounds.is_empty() {
            self.bottom = true;
            return;
        }
        self.add_var(var);
        let Some(k) = self.index(var) else {
            return;
        };
        if let Bound::Finite(h) = bounds.high {
            if let Some(c) = h.checked_mul(2) {
                self.constrain(2 * k + 1, 2 * k, c);
            }
        }
        if let Bound::Finite(l) = bounds.low {
            if let Some(c) = l.checked_mul(-2) {
                self.constrain(2 * k, 2 * k + 1, c);
            }
        }
        self.close();
    }

    /// Interval of a linear expression over the tracked variables.
    pub fn eval(&self, expr: &LinExpr) -> Interval {
        if self.bottom {
            return Interval::bottom();
        }
        if let Some((i, j, c)) = self.as_octagonal(expr) {
            // expr = Vⱼ - Vᵢ + c
            let closed = self.closed();
            let high = closed.at(i, j).and_then(|u| u.checked_add(c));
            let low = closed.at(j, i).and_then(|u| c.checked_sub(u));
            let ho = high.map_or(Bound::PosInf, Bound::Finite);
            let lo = low.map_or(Bound::NegInf, Bound::Finite);
            return Interval::new(lo, ho);
        }
        expr.coeffs.iter().fold(Interval::constant(expr.constant), |acc, (v, a)| {
            acc.add(&self.bounds(v).mul(&Interval::constant(*a)))
        })
    }

    /// `Vⱼ - Vᵢ + c` form of an expression with exactly two unit-coefficient terms.
    fn as_octagonal(&self, expr: &LinExpr) -> Option<(usize, usize, i64)> {
        let terms: Vec<(&String, &i64)> = expr.coeffs.iter().filter(|(_, a)| **a != 0).collect();
        let pos = |v: &str, a: i64| -> Option<usize> {
            let k = self.index(v)?;
            match a {
                1 => Some(2 * k),
                -1 => Some(2 * k + 1),
                _ => None,
            }
        };
        match terms.as_slice() {
            [(x, a), (y, b)] => {
                let j = pos(x, **a)?;
                let i = bar(pos(y, **b)?);
                Some((i, j, expr.constant))
            }
            _ => None,
        }
    }

    /// `var := expr`.
    pub fn assign(&mut self, var: &str, expr: &LinExpr) {
        if self.bottom {
            return;
        }
        self.add_var(var);
        for v in expr.coeffs.keys() {
            self.add_var(v);
        }
        let own = expr.coeff(var);
        let others: Vec<(&String, &i64)> = expr.coeffs.iter().filter(|(v, a)| v.as_str() != var && **a != 0).collect();
        match (own, others.as_slice()) {
            // x := x + c
            (1, []) => {
                self.shift(var, expr.constant);
                return;
            }
            // x := c
            (0, []) => {
                self.forget(var);
                self.set_bounds(var, &Interval::constant(expr.constant));
                return;
            }
            // x := ±y + c
            (0, [(y, a)]) if (**a == 1 || **a == -1) && self.has_var(y) => {
                self.forget(var);
                let (Some(k), Some(l)) = (self.index(var), self.index(y)) else {
                    return;
                };
                let yv = if **a == 1 { 2 * l } else { 2 * l + 1 };
                // x - (±y) ≤ c and (±y) - x ≤ -c
                self.constrain(yv, 2 * k, expr.constant);
                self.constrain(2 * k, yv, -expr.constant);
                self.close();
                return;
            }
            _ => {}
        }
        let value = self.eval(expr);
        self.forget(var);
        self.set_bounds(var, &value);
    }

    /// `var := var + c`
    fn shift(&mut self, var: &str, c: i64) {
        let Some(k) = self.index(var) else {
            return;
        };
        let dim = self.dim();
        let (p, n) = (2 * k, 2 * k + 1);
        for i in 0..dim {
            if i == p || i == n {
                continue;
            }
            // Vₚ grows by c, Vₙ shrinks by c.
            let v = self.at(i, p).and_then(|x| x.checked_add(c));
            self.set(i, p, v);
            let v = self.at(p, i).and_then(|x| x.checked_sub(c));
            self.set(p, i, v);
            let v = self.at(i, n).and_then(|x| x.checked_sub(c));
            self.set(i, n, v);
            let v = self.at(n, i).and_then(|x| x.checked_add(c));
            self.set(n, i, v);
        }
        let v = self.at(n, p).and_then(|x| x.checked_add(2 * c));
        self.set(n, p, v);
        let v = self.at(p, n).and_then(|x| x.checked_sub(2 * c));
        self.set(p, n, v);
    }

    /// Meet with a linear constraint; non-octagonal constraints refine the
    /// bounds of their unit-coefficient variables.
    pub fn guard(&mut self, cons: &LinCons) {
        if self.bottom {
            return;
        }
        match cons.kind {
            LinKind::Neq => {
                // Only a contradiction on constants can be used.
                if self.eval(&cons.expr).as_constant() == Some(0) {
                    self.bottom = true;
                }
            }
            LinKind::Eq => {
                self.guard_le(&cons.expr);
                self.guard_le(&cons.expr.neg());
            }
            LinKind::Le => self.guard_le(&cons.expr),
        }
    }

    /// expr ≤ 0
    fn guard_le(&mut self, expr: &LinExpr) {
        let terms: Vec<(String, i64)> = expr
            .coeffs
            .iter()
            .filter(|(_, a)| **a != 0)
            .map(|(v, a)| (v.clone(), *a))
            .collect();
        for (v, _) in &terms {
            self.add_var(v);
        }
        let unit = |a: i64| a == 1 || a == -1;
        let sign_index = |oct: &Octagon, v: &str, a: i64| -> Option<usize> {
            let k = oct.index(v)?;
            Some(if a > 0 { 2 * k } else { 2 * k + 1 })
        };
        match terms.as_slice() {
            [] => {
                if expr.constant > 0 {
                    self.bottom = true;
                }
            }
            // a·x + c ≤ 0 with a = ±1: V - V̄ ≤ -2c
            [(x, a)] if unit(*a) => {
                if let (Some(p), Some(c)) = (sign_index(self, x, *a), expr.constant.checked_mul(-2)) {
                    self.constrain(bar(p), p, c);
                }
            }
            // a·x + b·y + c ≤ 0: Vx - V̄y ≤ -c
            [(x, a), (y, b)] if unit(*a) && unit(*b) => {
                if let (Some(px), Some(py)) = (sign_index(self, x, *a), sign_index(self, y, *b)) {
                    self.constrain(bar(py), px, -expr.constant);
                }
            }
            _ => {
                // a·x ≤ -(rest) for each term, with the rest bounded by intervals
                for (x, a) in &terms {
                    let mut rest = expr.clone();
                    rest.coeffs.remove(x);
                    let rest_bounds = self.eval(&rest);
                    let Bound::Finite(low) = rest_bounds.low else {
                        continue;
                    };
                    // a·x ≤ -low
                    let bound = Interval::at_most(low.saturating_neg());
                    let refined = bound.mul_preimage(*a);
                    let current = self.bounds(x);
                    self.set_bounds(x, &current.meet(&refined));
                }
            }
        }
        self.close();
    }

    /// Constraints in human-readable form.
    pub fn constraints(&self) -> Vec<String> {
        if self.bottom {
            return vec!["false".to_string()];
        }
        let c = self.closed();
        let mut out = Vec::new();
        for (k, x) in c.vars.iter().enumerate() {
            let b = c.bounds(x);
            if !b.is_top() {
                match (b.low, b.high) {
                    (Bound::Finite(l), Bound::Finite(h)) if l == h => out.push(format!("{} == {}", x, l)),
                    (low, high) => {
                        if let Bound::Finite(l) = low {
                            out.push(format!("{} >= {}", x, l));
                        }
                        if let Bound::Finite(h) = high {
                            out.push(format!("{} <= {}", x, h));
                        }
                    }
                }
            }
            for (l, y) in c.vars.iter().enumerate().skip(k + 1) {
                // x - y ≤ m[2l][2k], y - x ≤ m[2k][2l], x + y ≤ m[2l+1][2k], -x - y ≤ m[2k][2l+1]
                if let Some(v) = c.at(2 * l, 2 * k) {
                    out.push(format!("{} - {} <= {}", x, y, v));
                }
                if let Some(v) = c.at(2 * k, 2 * l) {
                    out.push(format!("{} - {} <= {}", y, x, v));
                }
                if let Some(v) = c.at(2 * l + 1, 2 * k) {
                    out.push(format!("{} + {} <= {}", x, y, v));
                }
                if let Some(v) = c.at(2 * k, 2 * l + 1) {
                    out.push(format!("{} + {} >= {}", x, y, -v));
                }
            }
        }
        out
    }

    fn pointwise(&self, other: &Octagon, f: impl Fn(Entry, Entry) -> Entry) -> Octagon {
        let (mut a, b) = self.align(other);
        for (x, y) in a.m.iter_mut().zip(b.m.iter()) {
            *x = f(*x, *y);
        }
        a
    }
}

impl Lattice for Octagon {
    fn bottom() -> Self {
        Octagon {
            vars: Vec::new(),
            m: Vec::new(),
            bottom: true,
        }
    }

    fn top() -> Self {
        Octagon::unconstrained(Vec::new())
    }

    fn is_bottom(&self) -> bool {
        self.bottom || self.closed().bottom
    }

    fn is_top(&self) -> bool {
        !self.bottom
            && self.m.iter().enumerate().all(|(idx, e)| {
                let dim = self.dim().max(1);
                idx / dim == idx % dim || e.is_none()
            })
    }

    fn le(&self, other: &Self) -> bool {
        let a = self.closed();
        if a.bottom {
            return true;
        }
        if other.bottom {
            return false;
        }
        let (a, b) = a.align(other);
        a.m.iter().zip(b.m.iter()).all(|(x, y)| entry_le(*x, *y))
    }

    fn join(&self, other: &Self) -> Self {
        let (a, b) = (self.closed(), other.closed());
        if a.bottom {
            return b;
        }
        if b.bottom {
            return a;
        }
        // Pointwise max of closed matrices is closed.
        a.pointwise(&b, max)
    }

    fn meet(&self, other: &Self) -> Self {
        if self.bottom || other.bottom {
            return Octagon::bottom();
        }
        let mut result = self.pointwise(other, min);
        result.close();
        result
    }

    /// Unstable constraints are dropped; the result is not closed.
    fn widen(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        if other.bottom {
            return self.clone();
        }
        self.pointwise(other, |x, y| if entry_le(y, x) { x } else { None })
    }

    /// Only infinite bounds are refined.
    fn narrow(&self, other: &Self) -> Self {
        if self.bottom || other.bottom {
            return Octagon::bottom();
        }
        let mut result = self.pointwise(other, |x, y| if x.is_none() { y } else { x });
        result.close();
        result
    }
}

impl fmt::Display for Octagon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.constraints().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::tests::test_lattice_axioms;

    fn lin(terms: &[(&str, i64)], constant: i64) -> LinExpr {
        LinExpr::new(terms.iter().map(|(v, a)| (v.to_string(), *a)), constant)
    }

    #[test]
    fn test_difference_constraints() {
        // y := x + 2; guard x <= 5  ⇒  y <= 7
        let mut o = Octagon::top();
        o.add_var("x");
        o.assign("y", &lin(&[("x", 1)], 2));
        o.guard(&LinCons::le(lin(&[("x", 1)], -5)));
        assert_eq!(o.bounds("y").high, Bound::Finite(7));
        assert_eq!(o.eval(&lin(&[("y", 1), ("x", -1)], 0)), Interval::constant(2));
    }

    #[test]
    fn test_loop_counter_relation() {
        // i := 0; n := 10 ∧ i <= n; i := i + 1 keeps i - n <= 1
        let mut o = Octagon::top();
        o.assign("i", &lin(&[], 0));
        o.assign("n", &lin(&[], 10));
        o.guard(&LinCons::le(lin(&[("i", 1), ("n", -1)], 0)));
        o.assign("i", &lin(&[("i", 1)], 1));
        assert_eq!(o.eval(&lin(&[("i", 1), ("n", -1)], 0)).high, Bound::Finite(-9));
        assert_eq!(o.bounds("i"), Interval::constant(1));
    }

    #[test]
    fn test_contradiction_is_bottom() {
        let mut o = Octagon::top();
        o.guard(&LinCons::le(lin(&[("x", 1), ("y", -1)], 1))); // x - y <= -1
        o.guard(&LinCons::le(lin(&[("y", 1), ("x", -1)], 1))); // y - x <= -1
        assert!(o.is_bottom());
    }

    #[test]
    fn test_projection_keeps_implied_bounds() {
        let mut o = Octagon::top();
        o.assign("a", &lin(&[], 3));
        o.assign("b", &lin(&[("a", 1)], 0));
        o.remove_var("a");
        assert_eq!(o.bounds("b"), Interval::constant(3));
        assert!(!o.has_var("a"));
    }

    #[test]
    fn test_widening_drops_unstable() {
        let mut a = Octagon::top();
        a.assign("i", &lin(&[], 0));
        let mut b = a.clone();
        b.assign("i", &lin(&[], 1));
        let w = a.widen(&a.join(&b));
        assert_eq!(w.bounds("i"), Interval::at_least(0));
    }

    #[test]
    fn test_octagon_lattice_axioms() {
        let mut x0 = Octagon::top();
        x0.assign("x", &lin(&[], 0));
        let mut x5 = Octagon::top();
        x5.assign("x", &lin(&[], 5));
        let mut xy = Octagon::top();
        xy.guard(&LinCons::le(lin(&[("x", 1), ("y", -1)], 0)));
        let samples = vec![Octagon::bottom(), Octagon::top(), x0, x5, xy];
        test_lattice_axioms(&samples);
    }
}
