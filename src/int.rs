//! Integer values: reduced product of intervals and congruences.
//!
//! Both components are always present. When a component is disabled for the
//! current function (see [`DomainSet`]) it is kept at top by [`IntValue::restrict`].

use std::fmt;

use crate::config::DomainSet;
use crate::congruence::Congruence;
use crate::domain::Lattice;
use crate::interval::{Bound, Interval};

/// Three-valued truth of a condition in an abstract state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn from_bool(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        self.not().and(other.not()).not()
    }

    pub fn join(self, other: Truth) -> Truth {
        if self == other {
            self
        } else {
            Truth::Unknown
        }
    }
}

/// Integer abstract value (interval × congruence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntValue {
    pub interval: Interval,
    pub congruence: Congruence,
}

impl IntValue {
    pub fn new(interval: Interval, congruence: Congruence) -> Self {
        Self { interval, congruence }.reduce()
    }

    pub fn constant(value: i64) -> Self {
        Self {
            interval: Interval::constant(value),
            congruence: Congruence::constant(value),
        }
    }

    pub fn from_interval(interval: Interval) -> Self {
        Self::new(interval, Congruence::top())
    }

    pub fn range(low: i64, high: i64) -> Self {
        Self::from_interval(Interval::range(low, high))
    }

    /// `0` or `1`, the value of a C comparison.
    pub fn from_truth(truth: Truth) -> Self {
        match truth {
            Truth::True => Self::constant(1),
            Truth::False => Self::constant(0),
            Truth::Unknown => Self::range(0, 1),
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        self.interval.as_constant().or_else(|| self.congruence.as_constant())
    }

    /// Forget the components that are not enabled.
    pub fn restrict(self, domains: &DomainSet) -> Self {
        let constant = self.as_constant();
        let interval = if domains.interval { self.interval } else { Interval::top() };
        let congruence = if domains.congruence { self.congruence } else { Congruence::top() };
        if self.is_bottom() {
            return Self::bottom();
        }
        match constant {
            // Constants survive in every configuration, like a definite-value domain.
            Some(c) if !domains.interval && !domains.congruence => Self::constant(c),
            _ => Self::new(interval, congruence),
        }
    }

    /// Tighten each component with the other.
    fn reduce(self) -> Self {
        if self.interval.is_empty() || self.congruence.is_bottom() {
            return Self::bottom();
        }
        match self.congruence {
            Congruence::Val(c, 0) => {
                if self.interval.contains(c) {
                    Self::constant(c)
                } else {
                    Self::bottom()
                }
            }
            Congruence::Val(c, k) if k > 1 => {
                let low = match self.interval.low {
                    Bound::Finite(l) => Bound::Finite(l.saturating_add((c - l).rem_euclid(k))),
                    b => b,
                };
                let high = match self.interval.high {
                    Bound::Finite(h) => Bound::Finite(h.saturating_sub((h - c).rem_euclid(k))),
                    b => b,
                };
                let interval = Interval::new(low, high);
                if interval.is_empty() {
                    return Self::bottom();
                }
                match interval.as_constant() {
                    Some(v) => Self::constant(v),
                    None => Self {
                        interval,
                        congruence: self.congruence,
                    },
                }
            }
            _ => match self.interval.as_constant() {
                Some(v) => Self::constant(v),
                None => self,
            },
        }
    }

    pub fn add(&self, other: &IntValue) -> IntValue {
        Self::new(self.interval.add(&other.interval), self.congruence.add(&other.congruence))
    }

    pub fn sub(&self, other: &IntValue) -> IntValue {
        Self::new(self.interval.sub(&other.interval), self.congruence.sub(&other.congruence))
    }

    pub fn mul(&self, other: &IntValue) -> IntValue {
        Self::new(self.interval.mul(&other.interval), self.congruence.mul(&other.congruence))
    }

    pub fn div(&self, other: &IntValue) -> IntValue {
        Self::new(self.interval.div(&other.interval), self.congruence.div(&other.congruence))
    }

    pub fn rem(&self, other: &IntValue) -> IntValue {
        Self::new(self.interval.rem(&other.interval), self.congruence.rem(&other.congruence))
    }

    pub fn neg(&self) -> IntValue {
        Self::new(self.interval.neg(), self.congruence.neg())
    }

    pub fn eq_truth(&self, other: &IntValue) -> Truth {
        if self.is_bottom() || other.is_bottom() {
            return Truth::Unknown;
        }
        match (self.as_constant(), other.as_constant()) {
            (Some(a), Some(b)) => Truth::from_bool(a == b),
            _ if self.meet(other).is_bottom() => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn lt_truth(&self, other: &IntValue) -> Truth {
        let (a, b) = (&self.interval, &other.interval);
        if a.is_empty() || b.is_empty() {
            Truth::Unknown
        } else if a.high < b.low {
            Truth::True
        } else if a.low >= b.high {
            Truth::False
        } else {
            Truth::Unknown
        }
    }

    pub fn le_truth(&self, other: &IntValue) -> Truth {
        other.lt_truth(self).not()
    }

    /// Values of `self` that can be strictly less than some value of `other`.
    pub fn restrict_lt(&self, other: &IntValue) -> IntValue {
        let bound = match other.interval.high {
            Bound::Finite(h) => Interval::at_most(h.saturating_sub(1)),
            Bound::PosInf => Interval::top(),
            Bound::NegInf => Interval::bottom(),
        };
        self.meet(&Self::from_interval(bound))
    }

    pub fn restrict_le(&self, other: &IntValue) -> IntValue {
        let bound = Interval::new(Bound::NegInf, other.interval.high);
        self.meet(&Self::from_interval(bound))
    }

    pub fn restrict_gt(&self, other: &IntValue) -> IntValue {
        let bound = match other.interval.low {
            Bound::Finite(l) => Interval::at_least(l.saturating_add(1)),
            Bound::NegInf => Interval::top(),
            Bound::PosInf => Interval::bottom(),
        };
        self.meet(&Self::from_interval(bound))
    }

    pub fn restrict_ge(&self, other: &IntValue) -> IntValue {
        let bound = Interval::new(other.interval.low, Bound::PosInf);
        self.meet(&Self::from_interval(bound))
    }

    /// Values of `self` that can differ from some value of `other`.
    pub fn restrict_neq(&self, other: &IntValue) -> IntValue {
        let Some(c) = other.as_constant() else {
            return *self;
        };
        let mut interval = self.interval;
        if interval.low == Bound::Finite(c) {
            interval = Interval::new(Bound::Finite(c.saturating_add(1)), interval.high);
        }
        if interval.high == Bound::Finite(c) {
            interval = Interval::new(interval.low, Bound::Finite(c.saturating_sub(1)));
        }
        Self::new(interval, self.congruence)
    }
}

impl Lattice for IntValue {
    fn bottom() -> Self {
        Self {
            interval: Interval::bottom(),
            congruence: Congruence::Bottom,
        }
    }

    fn top() -> Self {
        Self {
            interval: Interval::top(),
            congruence: Congruence::top(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.interval.is_bottom() || self.congruence.is_bottom()
    }

    fn is_top(&self) -> bool {
        self.interval.is_top() && self.congruence.is_top()
    }

    fn le(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        self.interval.le(&other.interval) && self.congruence.le(&other.congruence)
    }

    fn join(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return *other;
        }
        if other.is_bottom() {
            return *self;
        }
        Self::new(self.interval.join(&other.interval), self.congruence.join(&other.congruence))
    }

    fn meet(&self, other: &Self) -> Self {
        Self::new(self.interval.meet(&other.interval), self.congruence.meet(&other.congruence))
    }

    fn widen(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return *other;
        }
        if other.is_bottom() {
            return *self;
        }
        // Not reduced: tightening the interval after widening could undo it.
        Self {
            interval: self.interval.widen(&other.interval),
            congruence: self.congruence.widen(&other.congruence),
        }
    }

    fn narrow(&self, other: &Self) -> Self {
        Self::new(self.interval.narrow(&other.interval), self.congruence.narrow(&other.congruence))
    }
}

impl fmt::Display for IntValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bottom() {
            return write!(f, "⊥");
        }
        if let Some(c) = self.as_constant() {
            return write!(f, "{}", c);
        }
        write!(f, "{}", self.interval)?;
        if !self.congruence.is_top() {
            write!(f, " ∧ {}", self.congruence)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::tests::test_lattice_axioms;

    #[test]
    fn test_reduction() {
        // x ∈ [2, 4] ∧ x odd  ⇒  x == 3
        let odd = IntValue::new(Interval::range(2, 4), Congruence::new(1, 2));
        assert_eq!(odd.as_constant(), Some(3));
        let empty = IntValue::new(Interval::range(5, 5), Congruence::new(0, 2));
        assert!(empty.is_bottom());
        let stride = IntValue::new(Interval::range(1, 10), Congruence::new(0, 4));
        assert_eq!(stride.interval, Interval::range(4, 8));
    }

    #[test]
    fn test_comparisons() {
        let a = IntValue::range(0, 3);
        let b = IntValue::range(5, 8);
        assert_eq!(a.lt_truth(&b), Truth::True);
        assert_eq!(b.lt_truth(&a), Truth::False);
        assert_eq!(a.eq_truth(&b), Truth::False);
        assert_eq!(a.eq_truth(&IntValue::range(3, 9)), Truth::Unknown);
        assert_eq!(IntValue::constant(4).eq_truth(&IntValue::constant(4)), Truth::True);
        let even = IntValue::new(Interval::top(), Congruence::new(0, 2));
        assert_eq!(even.eq_truth(&IntValue::constant(7)), Truth::False);
    }

    #[test]
    fn test_restrict_comparisons() {
        let x = IntValue::range(0, 10);
        assert_eq!(x.restrict_lt(&IntValue::constant(5)), IntValue::range(0, 4));
        assert_eq!(x.restrict_ge(&IntValue::constant(5)), IntValue::range(5, 10));
        assert_eq!(x.restrict_neq(&IntValue::constant(0)), IntValue::range(1, 10));
        assert_eq!(x.restrict_neq(&IntValue::constant(5)), x);
    }

    #[test]
    fn test_restrict_domains() {
        let v = IntValue::new(Interval::range(0, 100), Congruence::new(0, 2));
        let only_interval = DomainSet {
            interval: true,
            congruence: false,
        };
        assert_eq!(v.restrict(&only_interval).congruence, Congruence::top());
        assert_eq!(v.restrict(&only_interval).interval, Interval::range(0, 100));
    }

    #[test]
    fn test_int_lattice_axioms() {
        let samples = vec![
            IntValue::bottom(),
            IntValue::top(),
            IntValue::constant(0),
            IntValue::constant(3),
            IntValue::range(0, 10),
            IntValue::range(-4, 4),
            IntValue::new(Interval::range(0, 20), Congruence::new(0, 2)),
            IntValue::new(Interval::top(), Congruence::new(1, 2)),
        ];
        test_lattice_axioms(&samples);
    }

    #[test]
    fn test_truth_logic() {
        assert_eq!(Truth::True.and(Truth::Unknown), Truth::Unknown);
        assert_eq!(Truth::False.and(Truth::Unknown), Truth::False);
        assert_eq!(Truth::True.or(Truth::Unknown), Truth::True);
        assert_eq!(Truth::True.join(Truth::False), Truth::Unknown);
    }
}
