// SPDX-License-Identifier: Apache-2.0

//! Shared store of coverage objectives.
//!
//! The registry is the only state shared between the search loop and the
//! instrumented SUT, which may report coverage from its own threads. Id
//! assignment goes through an `RwLock`ed table; the best value of each
//! target lives in its own atomic slot, so concurrent updates of distinct
//! (or the same) targets never block each other once the target is known.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use covsearch_heuristics::{
    evaluate_against_zero, evaluate_comparison, evaluate_emptiness, evaluate_null_check,
    evaluate_string_equals, evaluate_three_way, Operands, Operator, Truthness,
};
use serde::{Deserialize, Serialize};

use crate::fitness::{FitnessValue, MAX_VALUE};
use crate::naming;

/// Compact numeric id of a coverage objective, stable for the lifetime of
/// the registry that assigned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub u32);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

struct TargetSlot {
    id: TargetId,
    descriptive: String,
    /// `f64` bits of the best value ever observed; 0.0 until reached.
    best: AtomicU64,
}

impl TargetSlot {
    fn best(&self) -> f64 {
        f64::from_bits(self.best.load(Ordering::SeqCst))
    }

    /// Raises the stored best to `value`; returns the previous best if this
    /// call changed it.
    fn try_raise(&self, value: f64) -> Option<f64> {
        let mut current = self.best.load(Ordering::SeqCst);
        while value > f64::from_bits(current) {
            match self.best.compare_exchange(
                current,
                value.to_bits(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(previous) => return Some(f64::from_bits(previous)),
                Err(v) => current = v,
            }
        }
        None
    }
}

#[derive(Default)]
struct IdTable {
    by_name: HashMap<String, Arc<TargetSlot>>,
    by_id: Vec<Arc<TargetSlot>>,
}

/// Attribution state for the individual currently being executed.
#[derive(Default)]
struct ExecutionTrace {
    action_index: Option<usize>,
    fitness: FitnessValue,
}

/// Explicitly constructed objective store; one per search run.
#[derive(Default)]
pub struct ObjectiveRegistry {
    table: RwLock<IdTable>,
    newly_discovered: Mutex<Vec<TargetId>>,
    trace: Mutex<ExecutionTrace>,
}

impl ObjectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, descriptive: &str) -> Arc<TargetSlot> {
        assert!(
            !descriptive.is_empty(),
            "coverage target id must not be empty"
        );
        if let Some(slot) = self.table.read().unwrap().by_name.get(descriptive) {
            return slot.clone();
        }
        let mut table = self.table.write().unwrap();
        // Another writer may have inserted it between the two locks.
        if let Some(slot) = table.by_name.get(descriptive) {
            return slot.clone();
        }
        let id = TargetId(table.by_id.len() as u32);
        let slot = Arc::new(TargetSlot {
            id,
            descriptive: descriptive.to_string(),
            best: AtomicU64::new(0.0f64.to_bits()),
        });
        table.by_name.insert(descriptive.to_string(), slot.clone());
        table.by_id.push(slot.clone());
        log::trace!("[registry] new target {} => {}", descriptive, id);
        slot
    }

    /// Makes the target known (for coverage percentages) without reaching
    /// it. Idempotent.
    pub fn register_target(&self, descriptive: &str) -> TargetId {
        self.slot(descriptive).id
    }

    /// Records a heuristic observation for `descriptive`.
    ///
    /// The run-wide best only ever goes up. The observation also feeds the
    /// per-test fitness of the individual currently executing, attributed
    /// to the current action index. The first time a target gets a
    /// non-zero value it is queued as newly discovered.
    ///
    /// Panics if `value` is outside `(0, 1]` or the id is empty.
    pub fn update(&self, descriptive: &str, value: f64) -> TargetId {
        assert!(
            value > 0.0 && value <= MAX_VALUE,
            "heuristic value for {} must be in (0,1]; got {}",
            descriptive,
            value
        );
        let slot = self.slot(descriptive);
        if let Some(previous) = slot.try_raise(value) {
            if previous == 0.0 {
                self.newly_discovered.lock().unwrap().push(slot.id);
            }
            if value == MAX_VALUE {
                log::debug!("[registry] covered {} ({})", slot.descriptive, slot.id);
            }
        }
        let mut trace = self.trace.lock().unwrap();
        let action_index = trace.action_index;
        trace.fitness.update_target(slot.id, value, action_index);
        slot.id
    }

    pub fn mapped_id(&self, descriptive: &str) -> Option<TargetId> {
        self.table
            .read()
            .unwrap()
            .by_name
            .get(descriptive)
            .map(|s| s.id)
    }

    pub fn descriptive_id(&self, id: TargetId) -> Option<String> {
        self.table
            .read()
            .unwrap()
            .by_id
            .get(id.0 as usize)
            .map(|s| s.descriptive.clone())
    }

    /// Best value ever recorded for `id`, 0 if never reached.
    pub fn best_value(&self, id: TargetId) -> f64 {
        self.table
            .read()
            .unwrap()
            .by_id
            .get(id.0 as usize)
            .map(|s| s.best())
            .unwrap_or(0.0)
    }

    pub fn number_of_targets(&self) -> usize {
        self.table.read().unwrap().by_id.len()
    }

    pub fn covered_targets(&self) -> Vec<TargetId> {
        self.table
            .read()
            .unwrap()
            .by_id
            .iter()
            .filter(|s| s.best() == MAX_VALUE)
            .map(|s| s.id)
            .collect()
    }

    /// Fraction of known targets starting with `prefix` that have been
    /// covered. Vacuously 1.0 when no target matches.
    pub fn compute_coverage(&self, prefix: &str) -> f64 {
        let table = self.table.read().unwrap();
        let mut total = 0usize;
        let mut covered = 0usize;
        for slot in table.by_id.iter() {
            if !slot.descriptive.starts_with(prefix) {
                continue;
            }
            total += 1;
            if slot.best() == MAX_VALUE {
                covered += 1;
            }
        }
        if total == 0 {
            1.0
        } else {
            covered as f64 / total as f64
        }
    }

    /// Returns and clears the targets first reached since the last call.
    pub fn drain_newly_discovered(&self) -> Vec<TargetId> {
        std::mem::take(&mut *self.newly_discovered.lock().unwrap())
    }

    /// Starts a fresh per-test fitness; called before each individual is
    /// executed.
    pub fn reset_per_test_state(&self) {
        let mut trace = self.trace.lock().unwrap();
        trace.action_index = None;
        trace.fitness = FitnessValue::new();
    }

    /// Sets the main-sequence action subsequent observations are attributed
    /// to; `None` while initialization actions run.
    pub fn set_action_index(&self, action_index: Option<usize>) {
        self.trace.lock().unwrap().action_index = action_index;
    }

    /// Snapshot of the per-test fitness collected since the last reset.
    pub fn take_fitness(&self) -> FitnessValue {
        std::mem::take(&mut self.trace.lock().unwrap().fitness)
    }

    /// Forgets every target and observation.
    pub fn clear(&self) {
        *self.table.write().unwrap() = IdTable::default();
        self.newly_discovered.lock().unwrap().clear();
        self.reset_per_test_state();
    }

    /// Evaluates `lhs <op> rhs` and records both outcomes as the objectives
    /// `<id>-true` and `<id>-false`.
    pub fn report_comparison(
        &self,
        descriptive: &str,
        op: Operator,
        operands: impl Into<Operands>,
    ) -> Truthness {
        let t = evaluate_comparison(op, operands);
        self.update(&naming::comparison_side_name(descriptive, true), t.of_true());
        self.update(&naming::comparison_side_name(descriptive, false), t.of_false());
        t
    }

    /// Single-operand jump (`ifeq`, `iflt`, ...): compares `value` against
    /// zero and records both sides like `report_comparison`.
    pub fn report_jump_against_zero(&self, descriptive: &str, op: Operator, value: i64) -> Truthness {
        let t = evaluate_against_zero(op, value);
        self.update(&naming::comparison_side_name(descriptive, true), t.of_true());
        self.update(&naming::comparison_side_name(descriptive, false), t.of_false());
        t
    }

    /// Records a branch at `file:line`; the then-side objective gets the
    /// heuristic of the condition holding.
    pub fn report_branch(
        &self,
        file: &str,
        line: u32,
        branch_id: u32,
        op: Operator,
        operands: impl Into<Operands>,
    ) -> Truthness {
        let t = evaluate_comparison(op, operands);
        self.update(
            &naming::branch_objective_name(file, line, branch_id, true),
            t.of_true(),
        );
        self.update(
            &naming::branch_objective_name(file, line, branch_id, false),
            t.of_false(),
        );
        t
    }

    /// Records the LT, EQ and GT objectives of a three-way comparison.
    pub fn report_numeric_comparison(&self, id: &str, operands: impl Into<Operands>) {
        let (lt, eq, gt) = evaluate_three_way(operands);
        self.update(&naming::numeric_comparison_objective_name(id, -1), lt.of_true());
        self.update(&naming::numeric_comparison_objective_name(id, 0), eq.of_true());
        self.update(&naming::numeric_comparison_objective_name(id, 1), gt.of_true());
    }

    /// A call site that was reached scores 0.5 until it completes without
    /// failing.
    pub fn report_method_call(&self, file: &str, line: u32, index: u32, completed: bool) {
        let h = if completed { 1.0 } else { 0.5 };
        self.update(&naming::success_call_objective_name(file, line, index), h);
    }

    pub fn report_line(&self, file: &str, line: u32) {
        self.update(&naming::line_objective_name(file, line), 1.0);
    }

    pub fn report_string_equals(&self, descriptive: &str, left: &str, right: Option<&str>) -> Truthness {
        self.report_sides(descriptive, evaluate_string_equals(left, right))
    }

    pub fn report_null_check(&self, descriptive: &str, is_null: bool) -> Truthness {
        self.report_sides(descriptive, evaluate_null_check(is_null))
    }

    pub fn report_is_empty(&self, descriptive: &str, len: usize) -> Truthness {
        self.report_sides(descriptive, evaluate_emptiness(len))
    }

    fn report_sides(&self, descriptive: &str, t: Truthness) -> Truthness {
        self.update(&naming::comparison_side_name(descriptive, true), t.of_true());
        self.update(&naming::comparison_side_name(descriptive, false), t.of_false());
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn registration_is_idempotent() {
        let r = ObjectiveRegistry::new();
        let a = r.register_target("A-true");
        let b = r.register_target("A-false");
        assert_ne!(a, b);
        assert_eq!(r.register_target("A-true"), a);
        assert_eq!(r.number_of_targets(), 2);
        assert_eq!(r.mapped_id("A-false"), Some(b));
        assert_eq!(r.descriptive_id(a).as_deref(), Some("A-true"));
        assert_eq!(r.descriptive_id(TargetId(99)), None);
    }

    #[test]
    fn update_keeps_best_and_queues_first_discovery() {
        let r = ObjectiveRegistry::new();
        r.register_target("x");
        let id = r.update("x", 0.25);
        r.update("x", 0.125);
        assert_eq!(r.best_value(id), 0.25);
        r.update("x", 0.5);
        assert_eq!(r.best_value(id), 0.5);
        assert_eq!(r.drain_newly_discovered(), vec![id]);
        assert!(r.drain_newly_discovered().is_empty());
    }

    #[test]
    #[should_panic(expected = "must be in (0,1]")]
    fn update_rejects_zero() {
        ObjectiveRegistry::new().update("x", 0.0);
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn update_rejects_empty_id() {
        ObjectiveRegistry::new().update("", 0.5);
    }

    #[test]
    fn coverage_is_vacuously_full() {
        let r = ObjectiveRegistry::new();
        assert_eq!(r.compute_coverage("Line"), 1.0);
        r.register_target("Line_a");
        assert_eq!(r.compute_coverage("Line"), 0.0);
        assert_eq!(r.compute_coverage("Branch"), 1.0);
    }

    #[test]
    fn per_test_fitness_is_attributed_to_actions() {
        let r = ObjectiveRegistry::new();
        r.reset_per_test_state();
        r.set_action_index(None);
        let init = r.update("init", 1.0);
        r.set_action_index(Some(0));
        let a = r.update("a", 0.5);
        r.set_action_index(Some(1));
        r.update("a", 0.75);
        r.update("a", 0.5);

        let f = r.take_fitness();
        assert_eq!(f.score(init).unwrap().action_index, None);
        assert_eq!(f.score(a).unwrap().action_index, Some(1));
        assert_eq!(f.heuristic(a), 0.75);

        r.reset_per_test_state();
        assert!(r.take_fitness().is_empty());
        // Run-wide best survives the reset.
        assert_eq!(r.best_value(a), 0.75);
    }

    #[test]
    fn extra_objective_kinds() {
        let r = ObjectiveRegistry::new();
        r.report_method_call("f.rs", 10, 0, false);
        let id = r.mapped_id("Success_Call_at_f.rs_00010_0").unwrap();
        assert_eq!(r.best_value(id), 0.5);
        r.report_method_call("f.rs", 10, 0, true);
        assert_eq!(r.best_value(id), 1.0);

        r.report_numeric_comparison("cmp", (1.5f64, 1.5f64));
        assert_eq!(r.compute_coverage(naming::NUMERIC_COMPARISON), 1.0 / 3.0);

        r.report_line("f.rs", 3);
        assert_eq!(r.compute_coverage(naming::LINE), 1.0);

        let t = r.report_branch("f.rs", 20, 0, Operator::Gt, (5i64, 3i64));
        assert!(t.is_true());
        assert_eq!(r.compute_coverage(naming::BRANCH), 0.5);

        let t = r.report_jump_against_zero("j", Operator::Lt, 4);
        assert!(t.is_false());
        assert_eq!(r.best_value(r.mapped_id("j-false").unwrap()), 1.0);
        assert!(r.best_value(r.mapped_id("j-true").unwrap()) < 1.0);
    }

    #[test]
    fn concurrent_updates_keep_the_maximum() {
        let r = Arc::new(ObjectiveRegistry::new());
        let mut handles = Vec::new();
        for worker in 0..8u32 {
            let r = r.clone();
            handles.push(std::thread::spawn(move || {
                for i in 1..=200u32 {
                    let v = (i as f64) / 200.0 * ((worker + 1) as f64 / 8.0);
                    r.update("shared", v);
                    r.update(&format!("own-{}", worker), v);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let id = r.mapped_id("shared").unwrap();
        assert_eq!(r.best_value(id), 1.0);
        assert_eq!(r.number_of_targets(), 9);
        assert_eq!(r.drain_newly_discovered().len(), 9);
    }

    #[test]
    fn reference_checks_register_both_sides() {
        let r = ObjectiveRegistry::new();
        assert!(r.report_string_equals("owner", "admin", Some("admin")).is_true());
        assert!(r.report_null_check("name", false).is_false());
        assert!(r.report_is_empty("items", 4).is_false());
        for id in ["owner", "name", "items"] {
            for side in [true, false] {
                let descriptive = naming::comparison_side_name(id, side);
                assert!(r.mapped_id(&descriptive).is_some(), "{} missing", descriptive);
            }
        }
        let owner_false = r.mapped_id(&naming::comparison_side_name("owner", false)).unwrap();
        assert_eq!(r.best_value(owner_false), covsearch_heuristics::distance::H_NOT_NULL);
    }
}
