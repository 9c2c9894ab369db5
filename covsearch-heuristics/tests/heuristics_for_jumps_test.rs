// SPDX-License-Identifier: Apache-2.0

use covsearch_heuristics::{
    evaluate_against_zero, evaluate_comparison, Operands, Operator, Truthness,
};
use test_case::test_case;

const ALL_OPERATORS: [Operator; 6] = [
    Operator::Eq,
    Operator::Ne,
    Operator::Lt,
    Operator::Le,
    Operator::Gt,
    Operator::Ge,
];

fn sample_pairs() -> Vec<Operands> {
    let ints = [i64::MIN, -1000, -8, -1, 0, 1, 5, 42, 1000, i64::MAX];
    let floats = [-1e300, -2.5, -0.0, 0.0, 1e-9, 3.25, f64::INFINITY];
    let mut out = Vec::new();
    for a in ints {
        for b in ints {
            out.push(Operands::Int(a, b));
        }
    }
    for a in floats {
        for b in floats {
            out.push(Operands::Float(a, b));
        }
    }
    out
}

fn assert_well_formed(t: Truthness) {
    assert!(t.of_true() > 0.0 && t.of_true() <= 1.0, "{}", t);
    assert!(t.of_false() > 0.0 && t.of_false() <= 1.0, "{}", t);
}

#[test]
fn truthness_is_well_formed_for_all_operators() {
    for operands in sample_pairs() {
        for op in ALL_OPERATORS {
            assert_well_formed(evaluate_comparison(op, operands));
        }
    }
}

#[test]
fn negated_operator_mirrors_truthness() {
    for operands in sample_pairs() {
        for op in ALL_OPERATORS {
            let t = evaluate_comparison(op, operands);
            let n = evaluate_comparison(op.negate(), operands);
            assert_eq!(t.of_true(), n.of_false(), "{:?} {} vs {}", operands, op, op.negate());
            assert_eq!(t.of_false(), n.of_true(), "{:?} {} vs {}", operands, op, op.negate());
        }
    }
}

#[test]
fn less_than_equals_greater_than_with_swapped_operands() {
    for v in [-11i64, -3, 0, 5, 7] {
        for w in [-2i64, 0, 9] {
            let lt = evaluate_comparison(Operator::Lt, (v, w));
            let gt = evaluate_comparison(Operator::Gt, (w, v));
            assert_eq!(lt, gt);
        }
    }
}

#[test_case(0)]
#[test_case(5)]
#[test_case(-8)]
fn equality_is_maximal_at_zero_distance(x: i64) {
    let t = evaluate_comparison(Operator::Eq, (x, x));
    assert_eq!(t.of_true(), 1.0);
    assert!(t.of_false() < 1.0);

    let ne = evaluate_comparison(Operator::Ne, (x, x));
    assert_eq!(ne.of_false(), 1.0);
    assert!(ne.of_true() < 1.0);
}

#[test]
fn equality_improves_as_operands_approach() {
    let far = evaluate_comparison(Operator::Eq, (0i64, 100i64));
    let near = evaluate_comparison(Operator::Eq, (0i64, 3i64));
    let closer = evaluate_comparison(Operator::Eq, (0i64, 1i64));
    assert!(far.of_true() < near.of_true());
    assert!(near.of_true() < closer.of_true());
    assert!(far.is_false() && near.is_false() && closer.is_false());
}

#[test]
fn less_than_zero_decreases_on_false_side() {
    let a = evaluate_against_zero(Operator::Lt, 3);
    let b = evaluate_against_zero(Operator::Lt, 5);
    let c = evaluate_against_zero(Operator::Lt, 12);
    assert!(a.is_false() && b.is_false() && c.is_false());
    assert!(a.of_true() > b.of_true());
    assert!(b.of_true() > c.of_true());
}

#[test]
fn less_than_zero_decreases_on_true_side() {
    let a = evaluate_against_zero(Operator::Lt, -3);
    let b = evaluate_against_zero(Operator::Lt, -5);
    let c = evaluate_against_zero(Operator::Lt, -12);
    assert!(a.is_true() && b.is_true() && c.is_true());
    assert!(a.of_false() > b.of_false());
    assert!(b.of_false() > c.of_false());
}

#[test_case(-11)]
#[test_case(-3)]
#[test_case(0)]
#[test_case(5)]
#[test_case(7)]
fn less_than_and_greater_or_equal_are_complementary(v: i64) {
    let lt = evaluate_against_zero(Operator::Lt, v);
    let ge = evaluate_against_zero(Operator::Ge, v);
    assert_eq!(lt.of_true(), ge.of_false());
    assert_eq!(lt.of_false(), ge.of_true());
}

#[test_case(-11)]
#[test_case(-3)]
#[test_case(0)]
#[test_case(5)]
#[test_case(7)]
fn less_or_equal_matches_negated_operand_less_than(v: i64) {
    // x <= 0  is the complement of  -x < 0
    let le = evaluate_against_zero(Operator::Le, v);
    let lt_neg = evaluate_against_zero(Operator::Lt, -v);
    assert_eq!(le, lt_neg.invert());
}

#[test]
fn greater_than_zero_prefers_larger_values() {
    let a = evaluate_against_zero(Operator::Gt, -12);
    let b = evaluate_against_zero(Operator::Gt, -5);
    let c = evaluate_against_zero(Operator::Gt, 0);
    let d = evaluate_against_zero(Operator::Gt, 1);
    assert!(a.of_true() < b.of_true());
    assert!(b.of_true() < c.of_true());
    assert!(d.is_true());
    assert!(!c.is_true());
}

#[test]
fn float_and_integer_heuristics_agree_on_integral_values() {
    for (a, b) in [(3i64, 5i64), (-4, 9), (0, 0)] {
        for op in ALL_OPERATORS {
            let i = evaluate_comparison(op, (a, b));
            let f = evaluate_comparison(op, (a as f64, b as f64));
            assert_eq!(i, f, "{} {} {}", a, op, b);
        }
    }
}
