// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::registry::TargetId;

/// Heuristic value of a covered objective.
pub const MAX_VALUE: f64 = 1.0;

/// Best value seen for one target during one evaluation, and the main
/// action that produced it (`None` when it came from an initialization
/// action).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveScore {
    pub value: f64,
    pub action_index: Option<usize>,
}

/// Per-evaluation map from target to the best heuristic observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessValue {
    targets: BTreeMap<TargetId, ObjectiveScore>,
}

/// Targets whose value differs between two fitness values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetChanges {
    /// Targets whose heuristic value changed in either direction.
    pub impacted: BTreeSet<TargetId>,
    /// Targets whose heuristic value went up.
    pub improved: BTreeSet<TargetId>,
}

impl TargetChanges {
    pub fn is_empty(&self) -> bool {
        self.impacted.is_empty()
    }
}

impl FitnessValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` for `target` if it beats what this evaluation has
    /// seen so far. Returns true when the stored value changed.
    pub fn update_target(&mut self, target: TargetId, value: f64, action_index: Option<usize>) -> bool {
        assert!(
            (0.0..=MAX_VALUE).contains(&value),
            "fitness value for {} must be in [0,1]; got {}",
            target,
            value
        );
        match self.targets.get_mut(&target) {
            Some(existing) if existing.value >= value => false,
            Some(existing) => {
                existing.value = value;
                existing.action_index = action_index;
                true
            }
            None => {
                self.targets.insert(
                    target,
                    ObjectiveScore {
                        value,
                        action_index,
                    },
                );
                true
            }
        }
    }

    /// Heuristic value for `target`, 0 when it was never reached.
    pub fn heuristic(&self, target: TargetId) -> f64 {
        self.targets.get(&target).map(|s| s.value).unwrap_or(0.0)
    }

    pub fn score(&self, target: TargetId) -> Option<&ObjectiveScore> {
        self.targets.get(&target)
    }

    pub fn does_cover(&self, target: TargetId) -> bool {
        self.heuristic(target) == MAX_VALUE
    }

    pub fn targets(&self) -> impl Iterator<Item = (TargetId, &ObjectiveScore)> {
        self.targets.iter().map(|(k, v)| (*k, v))
    }

    /// Targets this evaluation reached with a non-zero heuristic.
    pub fn reached_targets(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.targets
            .iter()
            .filter(|(_, s)| s.value > 0.0)
            .map(|(k, _)| *k)
    }

    pub fn covered_targets(&self) -> BTreeSet<TargetId> {
        self.targets
            .iter()
            .filter(|(_, s)| s.value == MAX_VALUE)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn coverage_count(&self) -> usize {
        self.targets.values().filter(|s| s.value == MAX_VALUE).count()
    }

    /// Sum of all heuristic values; used to break ties between
    /// individuals of the same size.
    pub fn compute_fitness_score(&self) -> f64 {
        self.targets.values().map(|s| s.value).sum()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Sets every listed target to 0, keeping them visible as attempted.
    pub fn zero_out<I: IntoIterator<Item = TargetId>>(&mut self, targets: I) {
        for t in targets {
            self.targets.insert(
                t,
                ObjectiveScore {
                    value: 0.0,
                    action_index: None,
                },
            );
        }
    }

    /// True when `self` is at least as good as `other` on every target of
    /// `subset` and strictly better on at least one of them.
    ///
    /// An empty subset means "every target either side has reached".
    pub fn subsumes(&self, other: &FitnessValue, subset: &BTreeSet<TargetId>) -> bool {
        let all: BTreeSet<TargetId>;
        let subset = if subset.is_empty() {
            all = self.targets.keys().chain(other.targets.keys()).copied().collect();
            &all
        } else {
            subset
        };
        let mut strictly_better = false;
        for t in subset.iter() {
            let mine = self.heuristic(*t);
            let theirs = other.heuristic(*t);
            if mine < theirs {
                return false;
            }
            if mine > theirs {
                strictly_better = true;
            }
        }
        strictly_better
    }

    /// Compares `self` (the newer evaluation) against `previous` on the
    /// targets of `subset`, plus every target `self` reached that
    /// `previous` did not.
    pub fn changes_since(&self, previous: &FitnessValue, subset: &BTreeSet<TargetId>) -> TargetChanges {
        let mut changes = TargetChanges::default();
        let considered = subset
            .iter()
            .copied()
            .chain(self.reached_targets().filter(|t| previous.heuristic(*t) == 0.0));
        for t in considered {
            let now = self.heuristic(t);
            let before = previous.heuristic(t);
            if now != before {
                changes.impacted.insert(t);
                if now > before {
                    changes.improved.insert(t);
                }
            }
        }
        changes
    }
}
