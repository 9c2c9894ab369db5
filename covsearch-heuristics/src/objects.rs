// SPDX-License-Identifier: Apache-2.0

//! Truthness for checks on reference-like values: string equality,
//! presence of a value and emptiness of a collection.

use crate::distance::{
    heuristic_from_scaled_distance_with_base, left_alignment_distance, H_NOT_EMPTY, H_NOT_NULL,
    H_REACHED_BUT_EMPTY, H_REACHED_BUT_NULL,
};
use crate::truthness::Truthness;

/// Truthness of `left == right` for two strings, where `right` may be
/// absent.
///
/// An absent right side can never be equal to a present left side, so the
/// true outcome gets the lowest non-trivial score. Otherwise the distance
/// between the two strings is used, with length differences dominating.
pub fn evaluate_string_equals(left: &str, right: Option<&str>) -> Truthness {
    match right {
        None => Truthness::new(H_REACHED_BUT_NULL, 1.0),
        Some(r) if r == left => Truthness::new(1.0, H_NOT_NULL),
        Some(r) => {
            let d = left_alignment_distance(left, r);
            Truthness::clamped(heuristic_from_scaled_distance_with_base(H_NOT_NULL, d as f64), 1.0)
        }
    }
}

/// Truthness of "the value is absent".
pub fn evaluate_null_check(is_null: bool) -> Truthness {
    if is_null {
        Truthness::new(1.0, H_NOT_NULL)
    } else {
        Truthness::new(H_REACHED_BUT_NULL, 1.0)
    }
}

/// Truthness of "the collection is empty" for a collection of `len`
/// elements; fewer elements score closer to empty.
pub fn evaluate_emptiness(len: usize) -> Truthness {
    if len == 0 {
        Truthness::new(1.0, H_NOT_EMPTY)
    } else {
        let of_true = heuristic_from_scaled_distance_with_base(H_REACHED_BUT_EMPTY, len as f64);
        Truthness::clamped(of_true, 1.0)
    }
}
