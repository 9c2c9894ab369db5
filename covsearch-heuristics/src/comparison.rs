// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::distance::{
    distance_to_equality_f64, distance_to_equality_i64, height_for_equality, height_for_ordering,
    H_NOT_EQUAL_AT_ZERO,
};
use crate::truthness::Truthness;

/// Relational operator of an instrumented comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    /// The operator whose outcome is always the opposite of this one.
    pub fn negate(self) -> Operator {
        match self {
            Operator::Eq => Operator::Ne,
            Operator::Ne => Operator::Eq,
            Operator::Lt => Operator::Ge,
            Operator::Ge => Operator::Lt,
            Operator::Le => Operator::Gt,
            Operator::Gt => Operator::Le,
        }
    }

    /// The operator that gives the same outcome when the operands are
    /// swapped.
    pub fn swap_operands(self) -> Operator {
        match self {
            Operator::Eq => Operator::Eq,
            Operator::Ne => Operator::Ne,
            Operator::Lt => Operator::Gt,
            Operator::Gt => Operator::Lt,
            Operator::Le => Operator::Ge,
            Operator::Ge => Operator::Le,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Operands of one comparison. Integers of any width are widened to
/// `i64`; `f32` widens to `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operands {
    Int(i64, i64),
    Float(f64, f64),
}

impl Operands {
    fn swapped(self) -> Operands {
        match self {
            Operands::Int(a, b) => Operands::Int(b, a),
            Operands::Float(a, b) => Operands::Float(b, a),
        }
    }

    fn distance(self) -> f64 {
        match self {
            Operands::Int(a, b) => distance_to_equality_i64(a, b),
            Operands::Float(a, b) => distance_to_equality_f64(a, b),
        }
    }

    fn less_than(self) -> bool {
        match self {
            Operands::Int(a, b) => a < b,
            Operands::Float(a, b) => a < b,
        }
    }

    fn greater_or_equal(self) -> bool {
        match self {
            Operands::Int(a, b) => a >= b,
            Operands::Float(a, b) => a >= b,
        }
    }
}

impl From<(i64, i64)> for Operands {
    fn from(v: (i64, i64)) -> Self {
        Operands::Int(v.0, v.1)
    }
}

impl From<(i32, i32)> for Operands {
    fn from(v: (i32, i32)) -> Self {
        Operands::Int(v.0 as i64, v.1 as i64)
    }
}

impl From<(f64, f64)> for Operands {
    fn from(v: (f64, f64)) -> Self {
        Operands::Float(v.0, v.1)
    }
}

impl From<(f32, f32)> for Operands {
    fn from(v: (f32, f32)) -> Self {
        Operands::Float(v.0 as f64, v.1 as f64)
    }
}

fn equality(operands: Operands) -> Truthness {
    let d = operands.distance();
    let of_true = height_for_equality(d);
    let of_false = if d > 0.0 { 1.0 } else { H_NOT_EQUAL_AT_ZERO };
    Truthness::clamped(of_true, of_false)
}

fn less_than(operands: Operands) -> Truthness {
    let d = operands.distance();
    let of_true = if operands.less_than() {
        1.0
    } else {
        height_for_ordering(d)
    };
    let of_false = if operands.greater_or_equal() {
        1.0
    } else {
        height_for_ordering(d)
    };
    Truthness::clamped(of_true, of_false)
}

/// Heuristic truthness of `lhs <op> rhs`.
///
/// Only `==` and `<` are computed directly; the other four operators are
/// derived from them by inversion and operand swapping, which keeps the
/// complementary pairs exact mirrors of each other.
pub fn evaluate_comparison(op: Operator, operands: impl Into<Operands>) -> Truthness {
    let operands = operands.into();
    match op {
        Operator::Eq => equality(operands),
        Operator::Ne => equality(operands).invert(),
        Operator::Lt => less_than(operands),
        Operator::Ge => less_than(operands).invert(),
        Operator::Gt => less_than(operands.swapped()),
        Operator::Le => less_than(operands.swapped()).invert(),
    }
}

/// Single-operand jump: `value <op> 0`.
pub fn evaluate_against_zero(op: Operator, value: i64) -> Truthness {
    evaluate_comparison(op, Operands::Int(value, 0))
}

/// Heuristics for a three-way numeric comparison (`long`/`double` style
/// compare instructions), as `(lt, eq, gt)` truthness of `a` versus `b`.
pub fn evaluate_three_way(operands: impl Into<Operands>) -> (Truthness, Truthness, Truthness) {
    let operands = operands.into();
    (
        evaluate_comparison(Operator::Lt, operands),
        evaluate_comparison(Operator::Eq, operands),
        evaluate_comparison(Operator::Gt, operands),
    )
}
