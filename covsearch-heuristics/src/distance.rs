// SPDX-License-Identifier: Apache-2.0

//! Distance helpers shared by all comparison heuristics.

/// Heuristic assigned to the "not equal" side of an equality check whose
/// operands are identical.
pub const H_NOT_EQUAL_AT_ZERO: f64 = 0.1;

/// Heuristic of a reference check that was reached with a null (absent)
/// value, on the side that needed a value.
pub const H_REACHED_BUT_NULL: f64 = 0.05;

/// Floor for any check that was reached with a value present.
pub const H_NOT_NULL: f64 = 0.1;

pub const H_REACHED_BUT_EMPTY: f64 = H_REACHED_BUT_NULL;

pub const H_NOT_EMPTY: f64 = H_NOT_NULL;

/// Weight of one missing or extra character in `left_alignment_distance`;
/// larger than any distance between two `char`s.
pub const MAX_CHAR_DISTANCE: u64 = char::MAX as u64 + 1;

/// Offset added to the distance for ordering predicates, so that a
/// boundary miss (distance 0) still scores strictly below 1.
pub const ORDERING_OFFSET: f64 = 1.1;

/// Absolute difference of two integers, computed without overflow.
pub fn distance_to_equality_i64(a: i64, b: i64) -> f64 {
    let d = (a as i128) - (b as i128);
    d.unsigned_abs() as f64
}

/// Absolute difference of two floats. Equal operands (including equal
/// infinities) are at distance 0; any other non-finite result maps to
/// `f64::MAX`.
pub fn distance_to_equality_f64(a: f64, b: f64) -> f64 {
    if a == b {
        return 0.0;
    }
    let d = (a - b).abs();
    if d.is_finite() {
        d
    } else {
        f64::MAX
    }
}

/// Strictly decreasing map from `[0, inf)` onto `(0, 1]` with `f(0) = 1`.
pub fn height_for_equality(distance: f64) -> f64 {
    debug_assert!(distance >= 0.0);
    1.0 / (1.0 + distance)
}

/// Strictly decreasing map used on the violated side of an ordering.
pub fn height_for_ordering(distance: f64) -> f64 {
    debug_assert!(distance >= 0.0);
    1.0 / (ORDERING_OFFSET + distance)
}

pub fn distance_to_char(c: char, target: char) -> u64 {
    (c as i64 - target as i64).unsigned_abs()
}

/// Distance from `c` into `[min, max]`, 0 when inside.
///
/// Panics if `min > max`.
pub fn distance_to_range(c: i64, min: i64, max: i64) -> u64 {
    assert!(min <= max, "invalid range {}..={}", min, max);
    let below = (min as i128 - c as i128).max(0);
    let above = (c as i128 - max as i128).max(0);
    (below + above) as u64
}

/// Character-wise distance between two strings aligned on their first
/// character; every character one string has beyond the other costs
/// `MAX_CHAR_DISTANCE`. Saturates instead of overflowing.
pub fn left_alignment_distance(a: &str, b: &str) -> u64 {
    let mut left = a.chars();
    let mut right = b.chars();
    let mut dist: u64 = 0;
    loop {
        let step = match (left.next(), right.next()) {
            (Some(x), Some(y)) => distance_to_char(x, y),
            (Some(_), None) | (None, Some(_)) => MAX_CHAR_DISTANCE,
            (None, None) => return dist,
        };
        dist = dist.saturating_add(step);
    }
}

/// Maps a distance onto `[base, 1]`: 1 at distance 0, approaching `base`
/// as the distance grows, and exactly `base` for an unbounded distance.
///
/// Panics if `base` is outside `[0, 1)` or `distance` is negative.
pub fn heuristic_from_scaled_distance_with_base(base: f64, distance: f64) -> f64 {
    assert!((0.0..1.0).contains(&base), "invalid base {}", base);
    assert!(distance >= 0.0, "negative distance {}", distance);
    if distance.is_infinite() || distance == f64::MAX {
        return base;
    }
    base + (1.0 - base) / (distance + 1.0)
}
