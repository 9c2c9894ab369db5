// SPDX-License-Identifier: Apache-2.0

//! Descriptive identifiers for coverage objectives.
//!
//! Every objective kind has a fixed prefix, so coverage can be computed
//! per kind with `ObjectiveRegistry::compute_coverage(prefix)`.

pub const LINE: &str = "Line";
pub const BRANCH: &str = "Branch";
pub const SUCCESS_CALL: &str = "Success_Call";
pub const NUMERIC_COMPARISON: &str = "NumericComparison";

pub const TRUE_BRANCH: &str = "_trueBranch";
pub const FALSE_BRANCH: &str = "_falseBranch";

/// Suffixes used for the two sides of a plain `report_comparison` id.
pub const TRUE_SIDE: &str = "-true";
pub const FALSE_SIDE: &str = "-false";

fn pad_number(value: u32) -> String {
    format!("{:05}", value)
}

pub fn line_objective_name(file: &str, line: u32) -> String {
    format!("{}_at_{}_{}", LINE, file, pad_number(line))
}

pub fn branch_objective_name(file: &str, line: u32, branch_id: u32, then_branch: bool) -> String {
    format!(
        "{}_at_{}_at_line_{}_position_{}{}",
        BRANCH,
        file,
        pad_number(line),
        branch_id,
        if then_branch { TRUE_BRANCH } else { FALSE_BRANCH }
    )
}

pub fn success_call_objective_name(file: &str, line: u32, index: u32) -> String {
    format!("{}_at_{}_{}_{}", SUCCESS_CALL, file, pad_number(line), index)
}

/// `ordering` is the sign of the three-way comparison the objective asks
/// for: negative for LT, zero for EQ, positive for GT.
pub fn numeric_comparison_objective_name(id: &str, ordering: i32) -> String {
    let tag = match ordering {
        0 => "EQ",
        o if o < 0 => "LT",
        _ => "GT",
    };
    format!("{}_{}_{}", NUMERIC_COMPARISON, id, tag)
}

pub fn comparison_side_name(id: &str, outcome: bool) -> String {
    format!("{}{}", id, if outcome { TRUE_SIDE } else { FALSE_SIDE })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_carry_prefix_and_padding() {
        assert_eq!(line_objective_name("foo.rs", 7), "Line_at_foo.rs_00007");
        assert_eq!(
            branch_objective_name("foo.rs", 123, 2, true),
            "Branch_at_foo.rs_at_line_00123_position_2_trueBranch"
        );
        assert_eq!(
            branch_objective_name("foo.rs", 123, 2, false),
            "Branch_at_foo.rs_at_line_00123_position_2_falseBranch"
        );
        assert_eq!(
            success_call_objective_name("bar.rs", 40, 1),
            "Success_Call_at_bar.rs_00040_1"
        );
        assert_eq!(
            numeric_comparison_objective_name("x", -3),
            "NumericComparison_x_LT"
        );
        assert_eq!(comparison_side_name("A", false), "A-false");
    }
}
