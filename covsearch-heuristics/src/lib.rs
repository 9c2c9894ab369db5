// SPDX-License-Identifier: Apache-2.0

//! Turns a single executed comparison into a continuous fitness signal.
//!
//! Everything here is a pure function of its inputs; no state is kept
//! between calls.

pub mod comparison;
pub mod distance;
pub mod objects;
pub mod truthness;

pub use comparison::{
    evaluate_against_zero, evaluate_comparison, evaluate_three_way, Operands, Operator,
};
pub use objects::{evaluate_emptiness, evaluate_null_check, evaluate_string_equals};
pub use truthness::{Truthness, MIN_HEURISTIC};
