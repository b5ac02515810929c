//! Affine equalities (Karr's domain).
//!
//! An element is a system `Σ aᵢ·xᵢ = b` kept in reduced row echelon form over
//! exact rationals, so two elements over the same variables are equal iff
//! their matrices are. Join is the affine hull, computed through the generator
//! representation (one point plus direction vectors).

use std::fmt;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::domain::Lattice;
use crate::interval::Interval;
use crate::relational::{LinCons, LinExpr, LinKind};

/// Exact rational with positive denominator, in lowest terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Q {
    num: BigInt,
    den: BigInt,
}

impl Q {
    fn new(num: BigInt, den: BigInt) -> Q {
        let g = num.gcd(&den);
        let (mut num, mut den) = if g.is_zero() { (num, den) } else { (num / &g, den / &g) };
        if den.is_negative() {
            num = -num;
            den = -den;
        }
        Q { num, den }
    }

    fn int(n: i64) -> Q {
        Q {
            num: BigInt::from(n),
            den: BigInt::one(),
        }
    }

    fn zero() -> Q {
        Q::int(0)
    }

    fn is_zero(&self) -> bool {
        self.num.is_zero()
    }

    fn add(&self, o: &Q) -> Q {
        Q::new(&self.num * &o.den + &o.num * &self.den, &self.den * &o.den)
    }

    fn sub(&self, o: &Q) -> Q {
        self.add(&o.neg())
    }

    fn mul(&self, o: &Q) -> Q {
        Q::new(&self.num * &o.num, &self.den * &o.den)
    }

    fn div(&self, o: &Q) -> Q {
        Q::new(&self.num * &o.den, &self.den * &o.num)
    }

    fn neg(&self) -> Q {
        Q {
            num: -&self.num,
            den: self.den.clone(),
        }
    }

    fn to_i64(&self) -> Option<i64> {
        if self.den.is_one() {
            self.num.to_i64()
        } else {
            None
        }
    }
}

impl fmt::Display for Q {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den.is_one() {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// A row `Σ coeffs[i]·vars[i] = rhs`.
type Row = Vec<Q>;

/// Reduced row echelon form; `None` if the system is inconsistent.
fn rref(mut rows: Vec<Row>, n: usize) -> Option<Vec<Row>> {
    let mut pivot_row = 0;
    for col in 0..n {
        let Some(r) = (pivot_row..rows.len()).find(|&r| !rows[r][col].is_zero()) else {
            continue;
        };
        rows.swap(pivot_row, r);
        let p = rows[pivot_row][col].clone();
        rows[pivot_row] = rows[pivot_row].iter().map(|x| x.div(&p)).collect();
        for r in 0..rows.len() {
            if r != pivot_row && !rows[r][col].is_zero() {
                let factor = rows[r][col].clone();
                let pivot = rows[pivot_row].clone();
                for (x, y) in rows[r].iter_mut().zip(pivot.iter()) {
                    *x = x.sub(&y.mul(&factor));
                }
            }
        }
        pivot_row += 1;
    }
    // Rows past the pivots have zero coefficients.
    for row in &rows[pivot_row..] {
        if !row[n].is_zero() {
            return None;
        }
    }
    rows.truncate(pivot_row);
    Some(rows)
}

fn pivot_of(row: &Row, n: usize) -> Option<usize> {
    (0..n).find(|&c| !row[c].is_zero())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Affine {
    /// Tracked variables, sorted.
    vars: Vec<String>,
    rows: Vec<Row>,
    bottom: bool,
}

impl Affine {
    fn n(&self) -> usize {
        self.vars.len()
    }

    fn index(&self, var: &str) -> Option<usize> {
        self.vars.binary_search_by(|v| v.as_str().cmp(var)).ok()
    }

    pub fn has_var(&self, var: &str) -> bool {
        self.index(var).is_some()
    }

    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    fn extend_to(&self, vars: &[String]) -> Affine {
        let map: Vec<usize> = self
            .vars
            .iter()
            .map(|v| vars.binary_search(v).unwrap_or_default())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut new = vec![Q::zero(); vars.len() + 1];
                for (i, &m) in map.iter().enumerate() {
                    new[m] = row[i].clone();
                }
                new[vars.len()] = row[self.n()].clone();
                new
            })
            .collect();
        // Column permutation keeps pivots but may break echelon order.
        let rows = rref(rows, vars.len()).unwrap_or_default();
        Affine {
            vars: vars.to_vec(),
            rows,
            bottom: self.bottom,
        }
    }

    fn align(&self, other: &Affine) -> (Affine, Affine) {
        if self.vars == other.vars {
            return (self.clone(), other.clone());
        }
        let mut vars = self.vars.clone();
        vars.extend(other.vars.iter().cloned());
        vars.sort();
        vars.dedup();
        (self.extend_to(&vars), other.extend_to(&vars))
    }

    pub fn add_var(&mut self, var: &str) {
        if self.has_var(var) {
            return;
        }
        let mut vars = self.vars.clone();
        vars.push(var.to_string());
        vars.sort();
        *self = self.extend_to(&vars);
    }

    /// Row of a linear expression `Σ aᵢxᵢ + c` as `Σ aᵢxᵢ = -c`.
    fn row_of(&mut self, expr: &LinExpr) -> Row {
        for v in expr.coeffs.keys() {
            self.add_var(v);
        }
        let n = self.n();
        let mut row = vec![Q::zero(); n + 1];
        for (v, a) in &expr.coeffs {
            if let Some(i) = self.index(v) {
                row[i] = Q::int(*a);
            }
        }
        row[n] = Q::int(expr.constant).neg();
        row
    }

    fn add_rows(&mut self, new: Vec<Row>) {
        if self.bottom {
            return;
        }
        let mut rows = std::mem::take(&mut self.rows);
        rows.extend(new);
        match rref(rows, self.n()) {
            Some(rows) => self.rows = rows,
            None => *self = Affine::bottom(),
        }
    }

    /// Eliminate every equality mentioning `var`.
    pub fn forget(&mut self, var: &str) {
        let Some(k) = self.index(var) else {
            return;
        };
        // In RREF at most one row has a pivot at `k`; other rows may still
        // mention it when `k` is a free column.
        let Some(r) = self.rows.iter().position(|row| !row[k].is_zero()) else {
            return;
        };
        let pivot = self.rows.remove(r);
        let pk = pivot[k].clone();
        for row in self.rows.iter_mut() {
            if !row[k].is_zero() {
                let factor = row[k].div(&pk);
                for (x, y) in row.iter_mut().zip(pivot.iter()) {
                    *x = x.sub(&y.mul(&factor));
                }
            }
        }
        let rows = std::mem::take(&mut self.rows);
        self.rows = rref(rows, self.n()).unwrap_or_default();
    }

    pub fn remove_var(&mut self, var: &str) {
        let Some(k) = self.index(var) else {
            return;
        };
        self.forget(var);
        for row in self.rows.iter_mut() {
            row.remove(k);
        }
        self.vars.remove(k);
    }

    /// `var := expr`, exact for every linear right-hand side.
    pub fn assign(&mut self, var: &str, expr: &LinExpr) {
        if self.bottom {
            return;
        }
        self.add_var(var);
        for v in expr.coeffs.keys() {
            self.add_var(v);
        }
        let own = expr.coeff(var);
        let n = self.n();
        let Some(k) = self.index(var) else {
            return;
        };
        if own == 0 {
            self.forget(var);
            let mut row = self.row_of(expr);
            // x - Σ aᵢyᵢ = c
            for x in row.iter_mut() {
                *x = x.neg();
            }
            row[k] = Q::int(1);
            self.add_rows(vec![row]);
            return;
        }
        // Invertible: x_old = (x_new - rest - c) / own
        let a = Q::int(own);
        let rest = {
            let mut rest = expr.clone();
            rest.coeffs.remove(var);
            rest
        };
        let rest_row = self.row_of(&rest);
        let rows = std::mem::take(&mut self.rows);
        let substituted = rows
            .into_iter()
            .map(|row| {
                if row[k].is_zero() {
                    return row;
                }
                let f = row[k].div(&a);
                let mut new = row.clone();
                new[k] = f.clone();
                for i in 0..n {
                    if i != k && !rest_row[i].is_zero() {
                        new[i] = new[i].sub(&rest_row[i].mul(&f));
                    }
                }
                // rest_row[n] = -c
                new[n] = new[n].sub(&rest_row[n].mul(&f));
                new
            })
            .collect();
        self.rows = rref(substituted, n).unwrap_or_default();
    }

    /// Value of `expr` if the equalities determine it.
    pub fn eval(&self, expr: &LinExpr) -> Interval {
        if self.bottom {
            return Interval::bottom();
        }
        if expr.coeffs.keys().any(|v| !self.has_var(v)) && expr.coeffs.values().any(|a| *a != 0) {
            return Interval::top();
        }
        let n = self.n();
        let mut acc = vec![Q::zero(); n + 1];
        for (v, a) in &expr.coeffs {
            if let Some(i) = self.index(v) {
                acc[i] = Q::int(*a);
            }
        }
        let mut value = Q::int(expr.constant);
        for row in &self.rows {
            let Some(p) = pivot_of(row, n) else {
                continue;
            };
            if acc[p].is_zero() {
                continue;
            }
            let f = acc[p].clone();
            for i in 0..n {
                acc[i] = acc[i].sub(&row[i].mul(&f));
            }
            value = value.add(&row[n].mul(&f));
        }
        if acc[..n].iter().all(Q::is_zero) {
            match value.to_i64() {
                Some(c) => Interval::constant(c),
                // Non-integral value of an integer expression.
                None if value.den.is_one() => Interval::top(),
                None => Interval::bottom(),
            }
        } else {
            Interval::top()
        }
    }

    pub fn guard(&mut self, cons: &LinCons) {
        if self.bottom {
            return;
        }
        match cons.kind {
            LinKind::Eq => {
                let row = self.row_of(&cons.expr);
                self.add_rows(vec![row]);
            }
            LinKind::Le => {
                let v = self.eval(&cons.expr);
                if v.is_empty() || v.as_constant().map_or(false, |c| c > 0) {
                    *self = Affine::bottom();
                }
            }
            LinKind::Neq => {
                let v = self.eval(&cons.expr);
                if v.is_empty() || v.as_constant() == Some(0) {
                    *self = Affine::bottom();
                }
            }
        }
    }

    /// One point and a basis of directions of the affine space.
    fn generators(&self) -> (Vec<Q>, Vec<Vec<Q>>) {
        let n = self.n();
        let pivots: Vec<usize> = self.rows.iter().filter_map(|r| pivot_of(r, n)).collect();
        let mut point = vec![Q::zero(); n];
        for (row, &p) in self.rows.iter().zip(pivots.iter()) {
            point[p] = row[n].clone();
        }
        let mut directions = Vec::new();
        for free in (0..n).filter(|c| !pivots.contains(c)) {
            let mut d = vec![Q::zero(); n];
            d[free] = Q::int(1);
            for (row, &p) in self.rows.iter().zip(pivots.iter()) {
                d[p] = row[free].neg();
            }
            directions.push(d);
        }
        (point, directions)
    }

    /// Equalities satisfied by `point + span(directions)`.
    fn from_generators(vars: Vec<String>, point: &[Q], directions: Vec<Vec<Q>>) -> Affine {
        let n = vars.len();
        // Normal vectors: nullspace of the direction matrix.
        let dir_rows: Vec<Row> = directions
            .into_iter()
            .map(|mut d| {
                d.push(Q::zero());
                d
            })
            .collect();
        let reduced = rref(dir_rows, n).unwrap_or_default();
        let pivots: Vec<usize> = reduced.iter().filter_map(|r| pivot_of(r, n)).collect();
        let mut rows = Vec::new();
        for free in (0..n).filter(|c| !pivots.contains(c)) {
            let mut a = vec![Q::zero(); n + 1];
            a[free] = Q::int(1);
            for (row, &p) in reduced.iter().zip(pivots.iter()) {
                a[p] = row[free].neg();
            }
            let rhs = (0..n).fold(Q::zero(), |acc, i| acc.add(&a[i].mul(&point[i])));
            a[n] = rhs;
            rows.push(a);
        }
        let rows = rref(rows, n).unwrap_or_default();
        Affine {
            vars,
            rows,
            bottom: false,
        }
    }

    pub fn constraints(&self) -> Vec<String> {
        if self.bottom {
            return vec!["false".to_string()];
        }
        let n = self.n();
        self.rows
            .iter()
            .map(|row| {
                let terms: Vec<String> = (0..n)
                    .filter(|&i| !row[i].is_zero())
                    .map(|i| {
                        if row[i] == Q::int(1) {
                            self.vars[i].clone()
                        } else {
                            format!("{}*{}", row[i], self.vars[i])
                        }
                    })
                    .collect();
                format!("{} == {}", terms.join(" + "), row[n])
            })
            .collect()
    }
}

impl Lattice for Affine {
    fn bottom() -> Self {
        Affine {
            vars: Vec::new(),
            rows: Vec::new(),
            bottom: true,
        }
    }

    fn top() -> Self {
        Affine {
            vars: Vec::new(),
            rows: Vec::new(),
            bottom: false,
        }
    }

    fn is_bottom(&self) -> bool {
        self.bottom
    }

    fn is_top(&self) -> bool {
        !self.bottom && self.rows.is_empty()
    }

    /// Every equality of `other` is implied by `self`.
    fn le(&self, other: &Self) -> bool {
        if self.bottom {
            return true;
        }
        if other.bottom {
            return false;
        }
        let (a, b) = self.align(other);
        let n = a.n();
        b.rows.iter().all(|row| {
            let mut r = row.clone();
            for arow in &a.rows {
                let Some(p) = pivot_of(arow, n) else {
                    continue;
                };
                if r[p].is_zero() {
                    continue;
                }
                let f = r[p].clone();
                for (x, y) in r.iter_mut().zip(arow.iter()) {
                    *x = x.sub(&y.mul(&f));
                }
            }
            r.iter().all(Q::is_zero)
        })
    }

    /// Affine hull.
    fn join(&self, other: &Self) -> Self {
        if self.bottom {
            return other.clone();
        }
        if other.bottom {
            return self.clone();
        }
        let (a, b) = self.align(other);
        let (p1, mut dirs) = a.generators();
        let (p2, dirs2) = b.generators();
        dirs.extend(dirs2);
        dirs.push(p2.iter().zip(p1.iter()).map(|(x, y)| x.sub(y)).collect());
        Affine::from_generators(a.vars.clone(), &p1, dirs)
    }

    fn meet(&self, other: &Self) -> Self {
        if self.bottom || other.bottom {
            return Affine::bottom();
        }
        let (mut a, b) = self.align(other);
        a.add_rows(b.rows);
        a
    }

    /// Ascending chains are bounded by the number of variables.
    fn widen(&self, other: &Self) -> Self {
        self.join(other)
    }
}

impl fmt::Display for Affine {
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
    fn test_doubling_relation() {
        // x := 2n  ⇒  x - 2n == 0 without knowing n
        let mut a = Affine::top();
        a.add_var("n");
        a.assign("x", &lin(&[("n", 2)], 0));
        assert_eq!(a.eval(&lin(&[("x", 1), ("n", -2)], 0)), Interval::constant(0));
        assert!(a.eval(&lin(&[("x", 1)], 0)).is_top());
    }

    #[test]
    fn test_invertible_assignment() {
        // x := 2n; x := x + 1  ⇒  x - 2n == 1
        let mut a = Affine::top();
        a.assign("x", &lin(&[("n", 2)], 0));
        a.assign("x", &lin(&[("x", 1)], 1));
        assert_eq!(a.eval(&lin(&[("x", 1), ("n", -2)], 0)), Interval::constant(1));
    }

    #[test]
    fn test_hull_finds_new_equality() {
        // {i = 0, j = 0} ⊔ {i = 1, j = 2}  ⇒  j == 2i
        let mut a = Affine::top();
        a.assign("i", &lin(&[], 0));
        a.assign("j", &lin(&[], 0));
        let mut b = Affine::top();
        b.assign("i", &lin(&[], 1));
        b.assign("j", &lin(&[], 2));
        let h = a.join(&b);
        assert_eq!(h.eval(&lin(&[("j", 1), ("i", -2)], 0)), Interval::constant(0));
        assert!(h.eval(&lin(&[("i", 1)], 0)).is_top());
        assert!(a.le(&h) && b.le(&h));
    }

    #[test]
    fn test_guards() {
        let mut a = Affine::top();
        a.assign("x", &lin(&[("y", 1)], 0));
        let mut contradiction = a.clone();
        contradiction.guard(&LinCons::neq(lin(&[("x", 1), ("y", -1)], 0)));
        assert!(contradiction.is_bottom());
        a.guard(&LinCons::eq(lin(&[("y", 1)], -4)));
        assert_eq!(a.eval(&lin(&[("x", 1)], 0)), Interval::constant(4));
    }

    #[test]
    fn test_forget_and_remove() {
        let mut a = Affine::top();
        a.assign("x", &lin(&[("y", 1)], 1));
        a.assign("z", &lin(&[("x", 1)], 1));
        a.remove_var("x");
        // z == y + 2 survives the projection
        assert_eq!(a.eval(&lin(&[("z", 1), ("y", -1)], 0)), Interval::constant(2));
    }

    #[test]
    fn test_affine_lattice_axioms() {
        let mut x0 = Affine::top();
        x0.assign("x", &lin(&[], 0));
        let mut x1 = Affine::top();
        x1.assign("x", &lin(&[], 1));
        let mut xy = Affine::top();
        xy.assign("x", &lin(&[("y", 1)], 0));
        let samples = vec![Affine::bottom(), Affine::top(), x0, x1, xy];
        test_lattice_axioms(&samples);
    }
}
