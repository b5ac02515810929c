//! Congruence domain.
//!
//! Tracks modular arithmetic properties: x ≡ c (mod k).
//! Used to prove parity and stride facts that intervals cannot express.

use std::fmt;

use num_integer::Integer;

use crate::domain::Lattice;

/// A congruence relation x ≡ c (mod k).
///
/// Canonical form: `0 <= c < k` when `k > 0`.
/// `k = 0` means x is the constant c; `k = 1` means any integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Congruence {
    Bottom,
    /// (c, k) where x ≡ c (mod k)
    Val(i64, i64),
}

impl Congruence {
    /// x = c (i.e., x ≡ c (mod 0)).
    pub fn constant(c: i64) -> Self {
        Congruence::Val(c, 0)
    }

    /// x ≡ c (mod k), normalized.
    pub fn new(c: i64, k: i64) -> Self {
        Self::from_wide(c as i128, k as i128)
    }

    /// Normalize a wide result; moduli that do not fit in `i64` lose their
    /// information and become top.
    fn from_wide(c: i128, k: i128) -> Self {
        let k = k.abs();
        if k == 0 {
            return match i64::try_from(c) {
                Ok(c) => Congruence::Val(c, 0),
                Err(_) => Congruence::top(),
            };
        }
        if k == 1 {
            return Congruence::top();
        }
        match (i64::try_from(c.rem_euclid(k)), i64::try_from(k)) {
            (Ok(c), Ok(k)) => Congruence::Val(c, k),
            _ => Congruence::top(),
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        match self {
            Congruence::Val(c, 0) => Some(*c),
            _ => None,
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        match *self {
            Congruence::Bottom => false,
            Congruence::Val(c, 0) => c == value,
            Congruence::Val(c, k) => (value as i128 - c as i128).rem_euclid(k as i128) == 0,
        }
    }

    fn wide(&self) -> Option<(i128, i128)> {
        match *self {
            Congruence::Bottom => None,
            Congruence::Val(c, k) => Some((c as i128, k as i128)),
        }
    }

    /// (c1, k1) + (c2, k2) = (c1 + c2, gcd(k1, k2)).
    pub fn add(&self, other: &Congruence) -> Congruence {
        match (self.wide(), other.wide()) {
            (Some((c1, k1)), Some((c2, k2))) => Self::from_wide(c1 + c2, k1.gcd(&k2)),
            _ => Congruence::Bottom,
        }
    }

    pub fn neg(&self) -> Congruence {
        match self.wide() {
            Some((c, k)) => Self::from_wide(-c, k),
            None => Congruence::Bottom,
        }
    }

    pub fn sub(&self, other: &Congruence) -> Congruence {
        self.add(&other.neg())
    }

    /// (c1 + k1ℤ)(c2 + k2ℤ) ⊆ c1c2 + gcd(c1k2, c2k1, k1k2)ℤ.
    pub fn mul(&self, other: &Congruence) -> Congruence {
        match (self.wide(), other.wide()) {
            (Some((c1, k1)), Some((c2, k2))) => {
                let k = (c1 * k2).gcd(&(c2 * k1)).gcd(&(k1 * k2));
                Self::from_wide(c1 * c2, k)
            }
            _ => Congruence::Bottom,
        }
    }

    /// Truncating division; exact only when the divisor divides every member.
    pub fn div(&self, other: &Congruence) -> Congruence {
        match (self.wide(), other.as_constant()) {
            (None, _) => Congruence::Bottom,
            (_, Some(0)) => Congruence::Bottom,
            (Some((c, 0)), Some(d)) => Self::from_wide(c / d as i128, 0),
            (Some((c, k)), Some(d)) => {
                let d = d as i128;
                if c % d == 0 && k % d == 0 {
                    Self::from_wide(c / d, k / d)
                } else {
                    Congruence::top()
                }
            }
            (Some(_), None) => Congruence::top(),
        }
    }

    /// C remainder: the result is congruent to the dividend modulo the divisor.
    pub fn rem(&self, other: &Congruence) -> Congruence {
        match (self.wide(), other.as_constant()) {
            (None, _) => Congruence::Bottom,
            (_, Some(0)) => Congruence::Bottom,
            (Some((c, 0)), Some(m)) => Self::from_wide(c % m as i128, 0),
            (Some((c, k)), Some(m)) => {
                let m = (m as i128).abs();
                if k % m == 0 {
                    if c % m == 0 {
                        // |r| < m and r ≡ 0 (mod m)
                        Congruence::constant(0)
                    } else {
                        Self::from_wide(c, m)
                    }
                } else {
                    Congruence::top()
                }
            }
            (Some(_), None) => Congruence::top(),
        }
    }

    /// Values `x` with `x % m == r` (C remainder).
    pub fn rem_preimage(r: i64, m: i64) -> Congruence {
        if m == 0 {
            return Congruence::Bottom;
        }
        Self::new(r, m)
    }
}

impl Lattice for Congruence {
    fn bottom() -> Self {
        Congruence::Bottom
    }

    fn top() -> Self {
        Congruence::Val(0, 1)
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Congruence::Bottom)
    }

    fn is_top(&self) -> bool {
        matches!(self, Congruence::Val(_, 1))
    }

    fn le(&self, other: &Self) -> bool {
        match (self.wide(), other.wide()) {
            (None, _) => true,
            (_, None) => false,
            (Some((c1, k1)), Some((c2, k2))) => {
                if k2 == 0 {
                    k1 == 0 && c1 == c2
                } else {
                    k1 % k2 == 0 && (c1 - c2) % k2 == 0
                }
            }
        }
    }

    /// gcd(k1, k2, |c1 - c2|)
    fn join(&self, other: &Self) -> Self {
        match (self.wide(), other.wide()) {
            (None, _) => *other,
            (_, None) => *self,
            (Some((c1, k1)), Some((c2, k2))) => Self::from_wide(c1, k1.gcd(&k2).gcd(&(c1 - c2).abs())),
        }
    }

    /// Chinese remainder theorem: solvable iff c1 ≡ c2 (mod gcd(k1, k2)),
    /// and then unique modulo lcm(k1, k2).
    fn meet(&self, other: &Self) -> Self {
        let ((c1, k1), (c2, k2)) = match (self.wide(), other.wide()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Congruence::Bottom,
        };
        if k1 == 0 {
            return if other.contains(c1 as i64) { *self } else { Congruence::Bottom };
        }
        if k2 == 0 {
            return if self.contains(c2 as i64) { *other } else { Congruence::Bottom };
        }
        let egcd = k1.extended_gcd(&k2);
        let g = egcd.gcd;
        if (c2 - c1) % g != 0 {
            return Congruence::Bottom;
        }
        let lcm = k1 / g * k2;
        // x = c1 + k1 * t with k1 * t ≡ c2 - c1 (mod k2)
        let t = ((c2 - c1) / g * egcd.x).rem_euclid(k2 / g);
        Self::from_wide(c1 + k1 * t, lcm)
    }

    /// Ascending chains are finite (each strict step divides the modulus),
    /// so join is a widening.
    fn widen(&self, other: &Self) -> Self {
        self.join(other)
    }

    fn narrow(&self, other: &Self) -> Self {
        if self.is_top() {
            *other
        } else {
            *self
        }
    }
}

impl fmt::Display for Congruence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Congruence::Bottom => write!(f, "⊥"),
            Congruence::Val(_, 1) => write!(f, "ℤ"),
            Congruence::Val(c, 0) => write!(f, "{{{}}}", c),
            Congruence::Val(c, k) => write!(f, "{} + {}ℤ", c, k),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::tests::test_lattice_axioms;

    #[test]
    fn test_congruence_lattice() {
        let even = Congruence::new(0, 2);
        let four = Congruence::new(0, 4);
        let top = Congruence::top();

        assert!(four.le(&even));
        assert!(!even.le(&four));
        assert!(even.le(&top));

        let two_mod_4 = Congruence::new(2, 4);
        assert_eq!(four.join(&two_mod_4), even);
        assert_eq!(Congruence::constant(3).join(&Congruence::constant(7)), Congruence::new(3, 4));
    }

    #[test]
    fn test_crt_meet() {
        // x ≡ 1 (mod 2) ∧ x ≡ 2 (mod 3)  ⇒  x ≡ 5 (mod 6)
        assert_eq!(Congruence::new(1, 2).meet(&Congruence::new(2, 3)), Congruence::new(5, 6));
        // x ≡ 2 (mod 4) ∧ x ≡ 0 (mod 6)  ⇒  x ≡ 6 (mod 12)
        assert_eq!(Congruence::new(2, 4).meet(&Congruence::new(0, 6)), Congruence::new(6, 12));
        // parity conflict
        assert_eq!(Congruence::new(1, 2).meet(&Congruence::new(0, 4)), Congruence::Bottom);
        assert_eq!(Congruence::constant(9).meet(&Congruence::new(1, 4)), Congruence::constant(9));
    }

    #[test]
    fn test_arithmetic() {
        let odd = Congruence::new(1, 2);
        assert_eq!(odd.add(&odd), Congruence::new(0, 2));
        assert_eq!(odd.mul(&Congruence::constant(4)), Congruence::new(4, 8));
        assert_eq!(Congruence::new(0, 6).div(&Congruence::constant(3)), Congruence::new(0, 2));
        assert_eq!(Congruence::new(1, 6).rem(&Congruence::constant(3)), Congruence::new(1, 3));
        assert_eq!(Congruence::new(4, 8).rem(&Congruence::constant(4)), Congruence::constant(0));
        assert!(Congruence::new(1, 6).div(&Congruence::constant(3)).is_top());
        assert_eq!(Congruence::rem_preimage(1, 2), odd);
    }

    #[test]
    fn test_congruence_lattice_axioms() {
        let samples = vec![
            Congruence::Bottom,
            Congruence::top(),
            Congruence::constant(0),
            Congruence::constant(6),
            Congruence::new(0, 2),
            Congruence::new(1, 2),
            Congruence::new(0, 3),
            Congruence::new(2, 4),
        ];
        test_lattice_axioms(&samples);
    }
}
