//! Core lattice trait shared by every abstract domain.

use std::fmt::Debug;

/// Abstract lattice element.
///
/// Every value, relational and state domain in the engine implements this
/// trait on its elements directly; configuration lives in the values
/// themselves (e.g. the tracked variables of an octagon).
///
/// # Lattice Properties
///
/// An implementation must satisfy:
/// - Reflexivity: `∀a. a ⊑ a`
/// - Transitivity: `∀a,b,c. a ⊑ b ∧ b ⊑ c ⇒ a ⊑ c`
/// - Join is the least upper bound: `a ⊑ a ⊔ b`, `b ⊑ a ⊔ b`
/// - Widening bounds ascending chains: `a ⊑ a ∇ b` and every sequence
///   `x₀, x₁ = x₀ ∇ y₀, x₂ = x₁ ∇ y₁, …` stabilizes
pub trait Lattice: Clone + Debug + PartialEq + Sized {
    /// The empty set of states.
    fn bottom() -> Self;

    /// All possible states.
    fn top() -> Self;

    fn is_bottom(&self) -> bool;

    fn is_top(&self) -> bool;

    /// Partial order: `self ⊑ other` (self is more precise than other).
    fn le(&self, other: &Self) -> bool;

    /// Join (`⊔`): least upper bound, over-approximation of the union.
    fn join(&self, other: &Self) -> Self;

    /// Meet (`⊓`): greatest lower bound, refinement.
    fn meet(&self, other: &Self) -> Self;

    /// Widening (`∇`): extrapolates unstable bounds to force termination.
    ///
    /// There is deliberately no default: join does not bound ascending chains
    /// in infinite-height domains.
    fn widen(&self, other: &Self) -> Self;

    /// Narrowing (`∆`): refines after widening without losing convergence.
    ///
    /// Defaults to meet, which is safe since narrowing passes are bounded.
    fn narrow(&self, other: &Self) -> Self {
        self.meet(other)
    }

    /// Equivalence in the lattice order.
    fn equiv(&self, other: &Self) -> bool {
        self.le(other) && other.le(self)
    }

    /// Join multiple elements.
    fn join_many<I>(elems: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        elems.into_iter().fold(Self::bottom(), |acc, e| acc.join(&e))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Test helper: validate basic lattice axioms on a set of samples.
    pub fn test_lattice_axioms<L: Lattice>(samples: &[L]) {
        for a in samples {
            // Reflexivity: a ⊑ a
            assert!(a.le(a), "Reflexivity failed for {:?}", a);

            // Identity: a ⊔ ⊥ = a
            let joined = a.join(&L::bottom());
            assert!(a.equiv(&joined), "Join with bottom failed for {:?}", a);

            // Identity: a ⊓ ⊤ = a
            let met = a.meet(&L::top());
            assert!(a.equiv(&met), "Meet with top failed for {:?}", a);

            // Idempotence: a ⊔ a = a
            assert!(a.equiv(&a.join(a)), "Join idempotence failed for {:?}", a);

            // Widening preserves order: a ⊑ (a ∇ b)
            for b in samples {
                let widened = a.widen(b);
                assert!(a.le(&widened), "Widening does not preserve order: {:?} ∇ {:?}", a, b);
                assert!(b.le(&widened) || !a.le(b), "Widening lost {:?} from {:?} ∇ {:?}", b, a, b);
            }
        }

        for a in samples {
            for b in samples {
                // Commutativity: a ⊔ b = b ⊔ a
                let ab = a.join(b);
                let ba = b.join(a);
                assert!(ab.equiv(&ba), "Join commutativity failed for {:?}, {:?}", a, b);

                // Commutativity: a ⊓ b = b ⊓ a
                let ab = a.meet(b);
                let ba = b.meet(a);
                assert!(ab.equiv(&ba), "Meet commutativity failed for {:?}, {:?}", a, b);

                // Join upper bound
                let joined = a.join(b);
                assert!(a.le(&joined), "Join is not upper bound for {:?}", a);
                assert!(b.le(&joined), "Join is not upper bound for {:?}", b);

                // Meet lower bound
                let met = a.meet(b);
                assert!(met.le(a), "Meet is not lower bound of {:?}", a);
                assert!(met.le(b), "Meet is not lower bound of {:?}", b);

                // Associativity of join
                for c in samples {
                    let l = a.join(b).join(c);
                    let r = a.join(&b.join(c));
                    assert!(l.equiv(&r), "Join associativity failed for {:?}, {:?}, {:?}", a, b, c);
                }
            }
        }
    }

    /// Test helper: a widening sequence over the given chain stabilizes
    /// within `bound` steps.
    pub fn test_widening_terminates<L: Lattice>(chain: &[L], bound: usize) {
        let mut x = L::bottom();
        let mut changes = 0;
        for y in chain {
            let next = x.widen(&x.join(y));
            if !next.le(&x) {
                changes += 1;
            }
            x = next;
        }
        assert!(changes <= bound, "widening changed {} times (bound {})", changes, bound);
    }
}
