//! Interval abstract domain.
//!
//! Tracks a lower and an upper bound for an integer value. Arithmetic follows
//! C semantics for `/` (truncation towards zero) and `%` (sign of the dividend);
//! signed overflow is assumed not to happen and bounds saturate instead.

use std::cmp::{max, min};
use std::fmt;

use crate::domain::Lattice;

/// Bound of an interval: -∞, finite value, or +∞.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
    NegInf,
    Finite(i64),
    PosInf,
}

impl Bound {
    pub fn as_finite(&self) -> Option<i64> {
        match self {
            Bound::Finite(n) => Some(*n),
            _ => None,
        }
    }

    fn signum(&self) -> i64 {
        match self {
            Bound::NegInf => -1,
            Bound::Finite(n) => n.signum(),
            Bound::PosInf => 1,
        }
    }

    fn infinity(sign: i64) -> Bound {
        if sign < 0 {
            Bound::NegInf
        } else {
            Bound::PosInf
        }
    }

    pub fn add(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a.saturating_add(*b)),
            (Bound::NegInf, Bound::PosInf) | (Bound::PosInf, Bound::NegInf) => {
                // Undefined: callers only add lower to lower and upper to upper.
                Bound::PosInf
            }
            (Bound::NegInf, _) | (_, Bound::NegInf) => Bound::NegInf,
            (Bound::PosInf, _) | (_, Bound::PosInf) => Bound::PosInf,
        }
    }

    pub fn sub(&self, other: &Bound) -> Bound {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a.saturating_mul(*b)),
            (Bound::Finite(0), _) | (_, Bound::Finite(0)) => Bound::Finite(0),
            _ => Bound::infinity(self.signum() * other.signum()),
        }
    }

    /// Truncating division of bounds. `∞ / ∞` has no single value, so it
    /// yields both a zero and an infinite candidate.
    fn div_candidates(&self, other: &Bound) -> Vec<Bound> {
        match (self, other) {
            (_, Bound::Finite(0)) => vec![],
            (Bound::Finite(a), Bound::Finite(b)) => match a.checked_div(*b) {
                Some(q) => vec![Bound::Finite(q)],
                None => vec![Bound::PosInf],
            },
            (Bound::Finite(_), _) => vec![Bound::Finite(0)],
            (_, Bound::Finite(b)) => vec![Bound::infinity(self.signum() * b.signum())],
            _ => vec![Bound::Finite(0), Bound::infinity(self.signum() * other.signum())],
        }
    }

    pub fn neg(&self) -> Bound {
        match self {
            Bound::NegInf => Bound::PosInf,
            Bound::Finite(n) => Bound::Finite(n.saturating_neg()),
            Bound::PosInf => Bound::NegInf,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::NegInf => write!(f, "-∞"),
            Bound::Finite(n) => write!(f, "{}", n),
            Bound::PosInf => write!(f, "+∞"),
        }
    }
}

/// Interval: [low, high].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub low: Bound,
    pub high: Bound,
}

impl Interval {
    pub fn new(low: Bound, high: Bound) -> Self {
        if low > high || low == Bound::PosInf || high == Bound::NegInf {
            Self::bottom()
        } else {
            Self { low, high }
        }
    }

    pub fn range(low: i64, high: i64) -> Self {
        Self::new(Bound::Finite(low), Bound::Finite(high))
    }

    pub fn constant(value: i64) -> Self {
        Self::range(value, value)
    }

    pub fn at_least(low: i64) -> Self {
        Self::new(Bound::Finite(low), Bound::PosInf)
    }

    pub fn at_most(high: i64) -> Self {
        Self::new(Bound::NegInf, Bound::Finite(high))
    }

    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }

    pub fn contains(&self, value: i64) -> bool {
        !self.is_empty() && self.low <= Bound::Finite(value) && Bound::Finite(value) <= self.high
    }

    pub fn as_constant(&self) -> Option<i64> {
        match (self.low, self.high) {
            (Bound::Finite(l), Bound::Finite(h)) if l == h => Some(l),
            _ => None,
        }
    }

    /// Whether every value is strictly positive / negative / non-zero.
    pub fn excludes_zero(&self) -> bool {
        !self.contains(0)
    }

    pub fn add(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::bottom();
        }
        Interval::new(self.low.add(&other.low), self.high.add(&other.high))
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.neg())
    }

    pub fn neg(&self) -> Interval {
        if self.is_empty() {
            return Interval::bottom();
        }
        Interval::new(self.high.neg(), self.low.neg())
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::bottom();
        }
        let corners = [
            self.low.mul(&other.low),
            self.low.mul(&other.high),
            self.high.mul(&other.low),
            self.high.mul(&other.high),
        ];
        let low = corners.iter().min().copied().unwrap_or(Bound::NegInf);
        let high = corners.iter().max().copied().unwrap_or(Bound::PosInf);
        Interval::new(low, high)
    }

    /// Truncating division. Division by zero has no result, so zero is
    /// removed from the divisor first.
    pub fn div(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::bottom();
        }
        let negative = other.meet(&Interval::at_most(-1));
        let positive = other.meet(&Interval::at_least(1));
        let mut result = Interval::bottom();
        for divisor in [negative, positive] {
            if divisor.is_empty() {
                continue;
            }
            let mut corners = Vec::with_capacity(4);
            for a in [self.low, self.high] {
                for b in [divisor.low, divisor.high] {
                    corners.extend(a.div_candidates(&b));
                }
            }
            if let (Some(lo), Some(hi)) = (corners.iter().min(), corners.iter().max()) {
                result = result.join(&Interval::new(*lo, *hi));
            }
        }
        result
    }

    /// Remainder with the sign of the dividend: `|x % y| < |y|`.
    pub fn rem(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::bottom();
        }
        let magnitude = max(other.low.neg(), other.high);
        let limit = match magnitude {
            Bound::Finite(m) if m > 0 => Bound::Finite(m - 1),
            Bound::Finite(_) => return Interval::bottom(),
            _ => Bound::PosInf,
        };
        if let (Some(c), Some(_)) = (other.as_constant(), self.as_constant()) {
            if c != 0 {
                let x = self.as_constant().unwrap_or(0);
                return Interval::constant(x.checked_rem(c).unwrap_or(0));
            }
        }
        let low = if self.low >= Bound::Finite(0) {
            Bound::Finite(0)
        } else {
            max(self.low, limit.neg())
        };
        let high = if self.high <= Bound::Finite(0) {
            Bound::Finite(0)
        } else {
            min(self.high, limit)
        };
        Interval::new(low, high)
    }

    /// Values `x` with `x * c ∈ self` (for a non-zero constant `c`).
    pub fn mul_preimage(&self, c: i64) -> Interval {
        if self.is_empty() || c == 0 {
            return Interval::top();
        }
        // Wide arithmetic: `i64::MIN` has no negation in `i64`.
        let c = i128::from(c);
        let (low, high) = if c > 0 { (self.low, self.high) } else { (self.high, self.low) };
        let low = match low {
            Bound::Finite(l) => wide_bound(-floor_div(-i128::from(l), c)),
            b if c > 0 => b,
            b => b.neg(),
        };
        let high = match high {
            Bound::Finite(h) => wide_bound(floor_div(i128::from(h), c)),
            b if c > 0 => b,
            b => b.neg(),
        };
        Interval::new(low, high)
    }

    /// Values `x` with `x / c ∈ self` under truncating division (`c ≠ 0`).
    pub fn div_preimage(&self, c: i64) -> Interval {
        if self.is_empty() || c == 0 {
            return Interval::top();
        }
        if c < 0 {
            return self.neg().div_preimage(c.saturating_neg());
        }
        let low = match self.low {
            Bound::Finite(l) if l > 0 => Bound::Finite(l.saturating_mul(c)),
            Bound::Finite(l) => Bound::Finite(l.saturating_mul(c).saturating_sub(c - 1)),
            b => b,
        };
        let high = match self.high {
            Bound::Finite(h) if h < 0 => Bound::Finite(h.saturating_mul(c)),
            Bound::Finite(h) => Bound::Finite(h.saturating_mul(c).saturating_add(c - 1)),
            b => b,
        };
        Interval::new(low, high)
    }
}

impl Lattice for Interval {
    fn bottom() -> Self {
        Self {
            low: Bound::PosInf,
            high: Bound::NegInf,
        }
    }

    fn top() -> Self {
        Self {
            low: Bound::NegInf,
            high: Bound::PosInf,
        }
    }

    fn is_bottom(&self) -> bool {
        self.is_empty()
    }

    fn is_top(&self) -> bool {
        self.low == Bound::NegInf && self.high == Bound::PosInf
    }

    fn le(&self, other: &Self) -> bool {
        if self.is_empty() {
            return true;
        }
        if other.is_empty() {
            return false;
        }
        other.low <= self.low && self.high <= other.high
    }

    fn join(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Interval {
            low: min(self.low, other.low),
            high: max(self.high, other.high),
        }
    }

    fn meet(&self, other: &Interval) -> Interval {
        Interval::new(max(self.low, other.low), min(self.high, other.high))
    }

    fn widen(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let low = if other.low < self.low { Bound::NegInf } else { self.low };
        let high = if other.high > self.high { Bound::PosInf } else { self.high };
        Interval { low, high }
    }

    fn narrow(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::bottom();
        }
        let low = if self.low == Bound::NegInf { other.low } else { self.low };
        let high = if self.high == Bound::PosInf { other.high } else { self.high };
        Interval::new(low, high)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "⊥")
        } else {
            write!(f, "[{}, {}]", self.low, self.high)
        }
    }
}

fn floor_div(a: i128, b: i128) -> i128 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Bound for a value computed in `i128`, pushed to infinity when out of range.
fn wide_bound(v: i128) -> Bound {
    match i64::try_from(v) {
        Ok(v) => Bound::Finite(v),
        Err(_) if v > 0 => Bound::PosInf,
        Err(_) => Bound::NegInf,
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::tests::{test_lattice_axioms, test_widening_terminates};

    #[test]
    fn test_interval_operations() {
        let i1 = Interval::range(0, 10);
        let i2 = Interval::range(5, 15);

        assert_eq!(i1.join(&i2), Interval::range(0, 15));
        assert_eq!(i1.meet(&i2), Interval::range(5, 10));
        assert_eq!(i1.widen(&i2), Interval::at_least(0));
        assert_eq!(Interval::at_least(0).narrow(&Interval::range(0, 10)), Interval::range(0, 10));
    }

    #[test]
    fn test_arithmetic() {
        let a = Interval::range(-2, 3);
        let b = Interval::range(4, 5);
        assert_eq!(a.add(&b), Interval::range(2, 8));
        assert_eq!(a.sub(&b), Interval::range(-7, -1));
        assert_eq!(a.mul(&b), Interval::range(-10, 15));
        assert_eq!(Interval::range(-5, 5).div(&Interval::range(1, 2)), Interval::range(-5, 5));
        assert_eq!(Interval::range(7, 7).div(&Interval::range(-2, 2)), Interval::range(-7, 7));
        assert_eq!(Interval::constant(-7).rem(&Interval::constant(2)), Interval::constant(-1));
        assert_eq!(Interval::range(0, 100).rem(&Interval::constant(4)), Interval::range(0, 3));
        assert_eq!(Interval::at_least(1).mul(&Interval::constant(-1)), Interval::at_most(-1));
    }

    #[test]
    fn test_preimages() {
        // y / 3 == 2  ⇒  y ∈ [6, 8]
        assert_eq!(Interval::constant(2).div_preimage(3), Interval::range(6, 8));
        // y / 3 == 0  ⇒  y ∈ [-2, 2]
        assert_eq!(Interval::constant(0).div_preimage(3), Interval::range(-2, 2));
        // 2 * x ∈ [3, 9]  ⇒  x ∈ [2, 4]
        assert_eq!(Interval::range(3, 9).mul_preimage(2), Interval::range(2, 4));
        // -4 * x == 8  ⇒  x == -2
        assert_eq!(Interval::constant(8).mul_preimage(-4), Interval::constant(-2));
    }

    #[test]
    fn test_mul_preimage_extreme_factor() {
        assert_eq!(Interval::constant(0).mul_preimage(i64::MIN), Interval::constant(0));
        assert_eq!(Interval::constant(i64::MIN).mul_preimage(i64::MIN), Interval::constant(1));
        assert_eq!(Interval::at_most(-1).mul_preimage(i64::MIN), Interval::at_least(1));
        // -x == i64::MIN has no solution in i64
        assert!(Interval::constant(i64::MIN).mul_preimage(-1).is_empty());
    }

    #[test]
    fn test_empty_normalization() {
        assert!(Interval::range(5, 3).is_empty());
        assert!(Interval::new(Bound::PosInf, Bound::PosInf).is_empty());
        assert_eq!(Interval::range(5, 3), Interval::bottom());
    }

    #[test]
    fn test_interval_lattice_axioms() {
        let samples = vec![
            Interval::bottom(),
            Interval::top(),
            Interval::constant(0),
            Interval::constant(5),
            Interval::range(0, 10),
            Interval::range(-5, 5),
            Interval::range(10, 20),
            Interval::at_least(3),
            Interval::at_most(-1),
        ];
        test_lattice_axioms(&samples);
    }

    #[test]
    fn test_widening_chain_terminates() {
        let chain: Vec<Interval> = (0..1000).map(|i| Interval::range(-i, i)).collect();
        test_widening_terminates(&chain, 3);
    }
}
