// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Smallest value either side of a `Truthness` may take.
///
/// Heuristic values are never exactly zero: a zero would flatten the
/// fitness landscape for the side of the branch that was not taken.
pub const MIN_HEURISTIC: f64 = f64::MIN_POSITIVE;

/// Heuristic values for both outcomes of one executed predicate.
///
/// Both components are in `(0, 1]`; a value of `1.0` means that outcome
/// was actually taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Truthness {
    of_true: f64,
    of_false: f64,
}

impl Truthness {
    /// Builds a truthness pair, panicking when a component is outside
    /// `(0, 1]`.
    pub fn new(of_true: f64, of_false: f64) -> Self {
        assert!(
            of_true > 0.0 && of_true <= 1.0,
            "truthness of_true must be in (0,1]; got {}",
            of_true
        );
        assert!(
            of_false > 0.0 && of_false <= 1.0,
            "truthness of_false must be in (0,1]; got {}",
            of_false
        );
        Truthness { of_true, of_false }
    }

    /// Like `new`, but raises tiny (or non-positive) values to
    /// `MIN_HEURISTIC` first. Values above one are still rejected.
    pub(crate) fn clamped(of_true: f64, of_false: f64) -> Self {
        Truthness::new(clamp_heuristic(of_true), clamp_heuristic(of_false))
    }

    pub fn of_true(&self) -> f64 {
        self.of_true
    }

    pub fn of_false(&self) -> f64 {
        self.of_false
    }

    /// Swaps the two sides, i.e. the truthness of the negated predicate.
    pub fn invert(&self) -> Truthness {
        Truthness {
            of_true: self.of_false,
            of_false: self.of_true,
        }
    }

    pub fn is_true(&self) -> bool {
        self.of_true == 1.0
    }

    pub fn is_false(&self) -> bool {
        self.of_false == 1.0
    }
}

impl fmt::Display for Truthness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(of_true={}, of_false={})", self.of_true, self.of_false)
    }
}

fn clamp_heuristic(h: f64) -> f64 {
    if h.is_nan() || h < MIN_HEURISTIC {
        MIN_HEURISTIC
    } else {
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_swaps_sides() {
        let t = Truthness::new(0.25, 1.0);
        let inv = t.invert();
        assert_eq!(inv.of_true(), 1.0);
        assert_eq!(inv.of_false(), 0.25);
        assert!(inv.is_true());
        assert!(!inv.is_false());
        assert_eq!(inv.invert(), t);
    }

    #[test]
    fn clamped_never_yields_zero() {
        let t = Truthness::clamped(0.0, 1e-320);
        assert_eq!(t.of_true(), MIN_HEURISTIC);
        assert_eq!(t.of_false(), MIN_HEURISTIC);
    }

    #[test]
    #[should_panic(expected = "of_true must be in (0,1]")]
    fn new_rejects_zero() {
        let _ = Truthness::new(0.0, 1.0);
    }

    #[test]
    #[should_panic(expected = "of_false must be in (0,1]")]
    fn new_rejects_above_one() {
        let _ = Truthness::new(1.0, 1.5);
    }
}
