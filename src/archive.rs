// SPDX-License-Identifier: Apache-2.0

//! Per-target bounded populations of evaluated individuals.
//!
//! Each population is kept sorted worst-first: lowest heuristic for the
//! target, then the largest individual, then the oldest. Eviction always
//! removes the head. One `Arc<EvaluatedIndividual>` may sit in several
//! populations at once; anything handed out for mutation is a deep copy.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use rand::seq::{IteratorRandom, SliceRandom};
use serde::Serialize;

use crate::config::FeedbackDirectedSampling;
use crate::fitness::MAX_VALUE;
use crate::individual::EvaluatedIndividual;
use crate::registry::TargetId;
use crate::SearchRng;

/// Targets that never improved may be sampled this many times (times two)
/// before focused-quickest sampling moves on.
const DEFAULT_LAST_IMPROVEMENT: u32 = 10;

/// Final export of a search.
#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    pub individuals: Vec<EvaluatedIndividual>,
    pub covered_targets: BTreeSet<TargetId>,
}

/// Outcome of offering an individual to the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Stored under at least one target.
    pub added: bool,
    /// Strictly improved at least one target (new, better heuristic, or
    /// same heuristic with a smaller individual).
    pub improved: bool,
}

pub struct Archive {
    populations: BTreeMap<TargetId, Vec<Arc<EvaluatedIndividual>>>,
    /// Samples drawn for a target since it last improved.
    sampling_counter: HashMap<TargetId, u32>,
    /// Value of `sampling_counter` when the target last improved.
    last_improvement: HashMap<TargetId, u32>,
    last_chosen: Option<TargetId>,
    sampling: FeedbackDirectedSampling,
    target_limit: usize,
}

fn compare_worst_first(
    target: TargetId,
    a: &EvaluatedIndividual,
    b: &EvaluatedIndividual,
) -> std::cmp::Ordering {
    a.fitness
        .heuristic(target)
        .total_cmp(&b.fitness.heuristic(target))
        .then_with(|| b.size().cmp(&a.size()))
        .then_with(|| a.evaluation.cmp(&b.evaluation))
}

impl Archive {
    pub fn new(target_limit: usize, sampling: FeedbackDirectedSampling) -> Self {
        assert!(target_limit > 0, "archive target limit must be positive");
        Archive {
            populations: BTreeMap::new(),
            sampling_counter: HashMap::new(),
            last_improvement: HashMap::new(),
            last_chosen: None,
            sampling,
            target_limit,
        }
    }

    pub fn target_limit(&self) -> usize {
        self.target_limit
    }

    /// Updates the per-target capacity; populations shrink lazily on their
    /// next insertion or sampling.
    pub fn set_target_limit(&mut self, limit: usize) {
        assert!(limit > 0, "archive target limit must be positive");
        self.target_limit = limit;
    }

    pub fn is_empty(&self) -> bool {
        self.populations.is_empty()
    }

    pub fn population(&self, target: TargetId) -> &[Arc<EvaluatedIndividual>] {
        self.populations
            .get(&target)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    /// Number of distinct individuals stored across all targets.
    pub fn size(&self) -> usize {
        let mut seen = HashSet::new();
        for p in self.populations.values() {
            for ei in p.iter() {
                seen.insert(Arc::as_ptr(ei));
            }
        }
        seen.len()
    }

    pub fn number_of_reached_targets(&self) -> usize {
        self.populations.len()
    }

    /// A target is covered when its population is exactly one individual
    /// that covers it.
    pub fn is_covered(&self, target: TargetId) -> bool {
        match self.populations.get(&target) {
            Some(p) if p.len() == 1 => p[0].fitness.does_cover(target),
            _ => false,
        }
    }

    pub fn covered_targets(&self) -> BTreeSet<TargetId> {
        self.populations
            .keys()
            .copied()
            .filter(|t| self.is_covered(*t))
            .collect()
    }

    pub fn number_of_covered_targets(&self) -> usize {
        self.populations
            .keys()
            .filter(|t| self.is_covered(**t))
            .count()
    }

    pub fn not_covered_targets(&self) -> BTreeSet<TargetId> {
        self.populations
            .keys()
            .copied()
            .filter(|t| !self.is_covered(*t))
            .collect()
    }

    /// Targets `ei` reaches for which the archive holds nothing yet.
    pub fn new_targets(&self, ei: &EvaluatedIndividual) -> BTreeSet<TargetId> {
        ei.fitness
            .reached_targets()
            .filter(|t| self.populations.get(t).map_or(true, |p| p.is_empty()))
            .collect()
    }

    pub fn would_reach_new_target(&self, ei: &EvaluatedIndividual) -> bool {
        !self.new_targets(ei).is_empty()
    }

    fn report_improvement(&mut self, target: TargetId) {
        let counter = self.sampling_counter.get(&target).copied().unwrap_or(0);
        self.last_improvement.insert(target, counter);
        self.sampling_counter.insert(target, 0);
    }

    fn sort_and_shrink(population: &mut Vec<Arc<EvaluatedIndividual>>, target: TargetId, limit: usize) {
        population.sort_by(|a, b| compare_worst_first(target, a, b));
        while population.len() > limit {
            population.remove(0);
        }
    }

    /// Offers `ei` for every target it reaches. The same shared copy is
    /// stored under each target that accepts it.
    pub fn add_if_needed(&mut self, ei: &EvaluatedIndividual) -> AddOutcome {
        let shared = Arc::new(ei.clone());
        let targets: Vec<TargetId> = ei.fitness.targets().map(|(t, _)| t).collect();
        let mut outcome = AddOutcome::default();
        for t in targets {
            let o = self.add_shared(t, &shared);
            outcome.added |= o.added;
            outcome.improved |= o.improved;
        }
        outcome
    }

    /// Offers `ei` for a single target.
    pub fn add_if_useful(&mut self, target: TargetId, ei: &EvaluatedIndividual) -> AddOutcome {
        self.add_shared(target, &Arc::new(ei.clone()))
    }

    fn add_shared(&mut self, target: TargetId, ei: &Arc<EvaluatedIndividual>) -> AddOutcome {
        let value = ei.fitness.heuristic(target);
        if value == 0.0 {
            return AddOutcome::default();
        }
        let covered = self.is_covered(target);
        let limit = self.target_limit;
        let population = self.populations.entry(target).or_default();

        if population.is_empty() {
            population.push(ei.clone());
            log::trace!("[archive] first individual for {} (h={})", target, value);
            self.report_improvement(target);
            return AddOutcome {
                added: true,
                improved: true,
            };
        }

        let maxed = value == MAX_VALUE;
        if covered && maxed {
            let current = &population[0];
            let shorter = ei.size() < current.size();
            let same_size_better_score = ei.size() == current.size()
                && ei.fitness.compute_fitness_score() > current.fitness.compute_fitness_score();
            if shorter || same_size_better_score {
                population[0] = ei.clone();
                self.report_improvement(target);
                return AddOutcome {
                    added: true,
                    improved: true,
                };
            }
            return AddOutcome::default();
        }

        if maxed {
            population.clear();
            population.push(ei.clone());
            log::debug!("[archive] target {} covered", target);
            self.report_improvement(target);
            return AddOutcome {
                added: true,
                improved: true,
            };
        }

        if covered {
            // A partial heuristic never displaces a covering individual.
            return AddOutcome::default();
        }

        Self::sort_and_shrink(population, target, limit);
        let worst = &population[0];
        let worst_value = worst.fitness.heuristic(target);
        let better =
            value > worst_value || (value == worst_value && ei.size() < worst.size());
        let equivalent = value == worst_value && ei.size() == worst.size();

        let added = if population.len() < limit && value >= worst_value {
            population.push(ei.clone());
            Self::sort_and_shrink(population, target, limit);
            true
        } else if better || equivalent {
            population[0] = ei.clone();
            Self::sort_and_shrink(population, target, limit);
            true
        } else {
            false
        };

        if better {
            self.report_improvement(target);
        }
        AddOutcome {
            added,
            improved: better,
        }
    }

    fn choose_target(&mut self, candidates: &BTreeSet<TargetId>, rng: &mut SearchRng) -> Option<TargetId> {
        match self.sampling {
            FeedbackDirectedSampling::Uniform => candidates.iter().copied().choose(rng),
            FeedbackDirectedSampling::Last => candidates
                .iter()
                .copied()
                .min_by_key(|t| self.sampling_counter.get(t).copied().unwrap_or(0)),
            FeedbackDirectedSampling::FocusedQuickest => self.focused_quickest(candidates),
        }
    }

    fn focused_quickest(&self, candidates: &BTreeSet<TargetId>) -> Option<TargetId> {
        let counter = |t: &TargetId| self.sampling_counter.get(t).copied().unwrap_or(0);
        if let Some(last) = self.last_chosen {
            let budget = self
                .last_improvement
                .get(&last)
                .copied()
                .unwrap_or(DEFAULT_LAST_IMPROVEMENT)
                * 2;
            if candidates.contains(&last) && counter(&last) < budget {
                return Some(last);
            }
        }
        let quickest = candidates
            .iter()
            .copied()
            .filter(|t| match self.last_improvement.get(t) {
                Some(previous) => counter(t) < previous * 2,
                None => false,
            })
            .min_by_key(|t| self.last_improvement[t]);
        quickest.or_else(|| candidates.iter().copied().min_by_key(counter))
    }

    /// Picks a population (preferring targets not yet covered) and returns
    /// a copy of one of its individuals, chosen uniformly.
    pub fn sample_individual(&mut self, rng: &mut SearchRng) -> Option<EvaluatedIndividual> {
        if self.is_empty() {
            return None;
        }
        let mut candidates = self.not_covered_targets();
        if candidates.is_empty() {
            candidates = self.populations.keys().copied().collect();
        }
        let target = self.choose_target(&candidates, rng)?;
        self.last_chosen = Some(target);
        *self.sampling_counter.entry(target).or_insert(0) += 1;

        let limit = self.target_limit;
        let population = self.populations.get_mut(&target)?;
        Self::sort_and_shrink(population, target, limit);
        let chosen = population.choose(rng)?;
        Some(EvaluatedIndividual::clone(chosen))
    }

    /// One individual per target: the covering one for covered targets,
    /// the best-heuristic one otherwise. Duplicates (same content) are
    /// reported once.
    pub fn extract_solution(&self) -> Solution {
        let mut seen = HashSet::new();
        let mut individuals = Vec::new();
        for (target, population) in self.populations.iter() {
            let best = population
                .iter()
                .max_by(|a, b| compare_worst_first(*target, a, b));
            if let Some(best) = best {
                if seen.insert(best.individual.fingerprint()) {
                    individuals.push(EvaluatedIndividual::clone(best));
                }
            }
        }
        Solution {
            individuals,
            covered_targets: self.covered_targets(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness::FitnessValue;
    use crate::gene::Gene;
    use crate::individual::{Action, Individual};
    use rand::SeedableRng;

    fn ind(size: usize, marker: i64) -> Individual {
        let actions = (0..size)
            .map(|_| {
                let mut g = Gene::int("v", -1000, 1000);
                g.set_int(marker);
                Action::new("call", vec![g])
            })
            .collect();
        Individual::new(vec![], actions)
    }

    fn evaluated(size: usize, values: &[(u32, f64)], evaluation: u64) -> EvaluatedIndividual {
        let mut fitness = FitnessValue::new();
        for (t, v) in values {
            fitness.update_target(TargetId(*t), *v, Some(0));
        }
        EvaluatedIndividual::new(ind(size, evaluation as i64), fitness, evaluation)
    }

    fn min_heuristic(archive: &Archive, t: TargetId) -> f64 {
        archive
            .population(t)
            .iter()
            .map(|e| e.fitness.heuristic(t))
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn zero_scores_are_not_stored() {
        let mut archive = Archive::new(10, FeedbackDirectedSampling::Uniform);
        let out = archive.add_if_needed(&evaluated(1, &[(0, 0.0)], 0));
        assert!(!out.added);
        assert!(archive.is_empty());
    }

    #[test]
    fn covering_collapses_population_to_one() {
        let mut archive = Archive::new(10, FeedbackDirectedSampling::Uniform);
        let t = TargetId(0);
        for i in 0..5 {
            archive.add_if_needed(&evaluated(2, &[(0, 0.1 * (i + 1) as f64)], i));
        }
        assert_eq!(archive.population(t).len(), 5);
        assert!(!archive.is_covered(t));

        archive.add_if_needed(&evaluated(3, &[(0, 1.0)], 10));
        assert!(archive.is_covered(t));
        assert_eq!(archive.population(t).len(), 1);

        // Larger covering individual does not replace.
        assert!(!archive.add_if_needed(&evaluated(4, &[(0, 1.0)], 11)).added);
        // Smaller one does.
        assert!(archive.add_if_needed(&evaluated(1, &[(0, 1.0)], 12)).added);
        assert_eq!(archive.population(t)[0].evaluation, 12);
        // Same size, better overall score.
        assert!(
            archive
                .add_if_needed(&evaluated(1, &[(0, 1.0), (1, 0.5)], 13))
                .added
        );
        assert_eq!(archive.population(t)[0].evaluation, 13);
        // Partial heuristics never displace a covering individual.
        assert!(!archive.add_if_useful(t, &evaluated(1, &[(0, 0.9)], 14)).added);
        assert_eq!(archive.number_of_covered_targets(), 1);
    }

    #[test]
    fn full_population_replaces_worst_only_when_not_worse() {
        let mut archive = Archive::new(2, FeedbackDirectedSampling::Uniform);
        let t = TargetId(7);
        archive.add_if_needed(&evaluated(2, &[(7, 0.25)], 0));
        // Room left, but a worse entry would lower the floor.
        assert!(!archive.add_if_needed(&evaluated(2, &[(7, 0.125)], 1)).added);
        archive.add_if_needed(&evaluated(2, &[(7, 0.5)], 2));
        assert_eq!(archive.population(t).len(), 2);

        // Worse than the worst: rejected.
        assert!(!archive.add_if_needed(&evaluated(2, &[(7, 0.125)], 2)).added);
        // Same heuristic, smaller: replaces the worst.
        let out = archive.add_if_needed(&evaluated(1, &[(7, 0.25)], 3));
        assert!(out.added && out.improved);
        assert!(archive.population(t).iter().all(|e| e.evaluation != 0));
        // Same heuristic and size: equivalent, newer replaces older.
        let out = archive.add_if_needed(&evaluated(1, &[(7, 0.25)], 4));
        assert!(out.added && !out.improved);
        assert!(archive.population(t).iter().all(|e| e.evaluation != 3));
        // Same heuristic, larger: rejected.
        assert!(!archive.add_if_needed(&evaluated(3, &[(7, 0.25)], 5)).added);
    }

    #[test]
    fn capacity_and_non_regression_hold_under_random_insertions() {
        let mut rng = SearchRng::seed_from_u64(11);
        let limit = 4;
        let mut archive = Archive::new(limit, FeedbackDirectedSampling::Uniform);
        let t = TargetId(0);
        let mut last_min = 0.0;
        for i in 0..500u64 {
            let v = (rand::Rng::gen_range(&mut rng, 1..100) as f64) / 100.0;
            let size = rand::Rng::gen_range(&mut rng, 1..5);
            archive.add_if_useful(t, &evaluated(size, &[(0, v)], i));
            let pop = archive.population(t);
            assert!(pop.len() <= limit);
            let m = min_heuristic(&archive, t);
            assert!(m >= last_min, "min regressed from {} to {}", last_min, m);
            last_min = m;
        }
    }

    #[test]
    fn shrinking_limit_evicts_worst_first() {
        let mut archive = Archive::new(5, FeedbackDirectedSampling::Uniform);
        let t = TargetId(0);
        for i in 0..5u64 {
            archive.add_if_needed(&evaluated(1, &[(0, 0.1 + 0.1 * i as f64)], i));
        }
        archive.set_target_limit(2);
        let mut rng = SearchRng::seed_from_u64(0);
        archive.sample_individual(&mut rng).unwrap();
        let kept: Vec<u64> = archive.population(t).iter().map(|e| e.evaluation).collect();
        assert_eq!(kept, vec![3, 4]);
    }

    #[test]
    fn one_individual_can_sit_under_many_targets() {
        let mut archive = Archive::new(3, FeedbackDirectedSampling::Uniform);
        archive.add_if_needed(&evaluated(1, &[(0, 0.5), (1, 1.0), (2, 0.2)], 0));
        assert_eq!(archive.number_of_reached_targets(), 3);
        assert_eq!(archive.size(), 1);
        assert!(Arc::ptr_eq(
            &archive.population(TargetId(0))[0],
            &archive.population(TargetId(1))[0]
        ));
        assert_eq!(
            archive.not_covered_targets(),
            [TargetId(0), TargetId(2)].into_iter().collect()
        );
    }

    #[test]
    fn sampling_prefers_uncovered_targets_and_returns_copies() {
        let mut archive = Archive::new(3, FeedbackDirectedSampling::Uniform);
        archive.add_if_needed(&evaluated(1, &[(0, 1.0)], 0));
        archive.add_if_needed(&evaluated(2, &[(1, 0.5)], 1));
        let mut rng = SearchRng::seed_from_u64(4);
        for _ in 0..20 {
            let mut copy = archive.sample_individual(&mut rng).unwrap();
            assert_eq!(copy.evaluation, 1);
            copy.evaluation = 99;
        }
        assert_eq!(archive.population(TargetId(1))[0].evaluation, 1);
    }

    #[test]
    fn new_target_detection() {
        let mut archive = Archive::new(3, FeedbackDirectedSampling::Uniform);
        archive.add_if_needed(&evaluated(1, &[(0, 0.3)], 0));
        assert!(!archive.would_reach_new_target(&evaluated(1, &[(0, 0.9)], 1)));
        let e = evaluated(1, &[(0, 0.1), (5, 0.1)], 2);
        assert!(archive.would_reach_new_target(&e));
        assert_eq!(archive.new_targets(&e), [TargetId(5)].into_iter().collect());
    }

    #[test]
    fn focused_quickest_sticks_to_last_target_for_a_while() {
        let mut archive = Archive::new(3, FeedbackDirectedSampling::FocusedQuickest);
        archive.add_if_needed(&evaluated(1, &[(0, 0.3)], 0));
        archive.add_if_needed(&evaluated(1, &[(1, 0.3)], 1));
        let mut rng = SearchRng::seed_from_u64(4);
        let first = archive.sample_individual(&mut rng).unwrap();
        let first_target = *first.fitness.reached_targets().collect::<Vec<_>>().first().unwrap();
        // Both targets improved at counter 0, so the last target is reused
        // until its counter reaches 2 * 0 = 0: the next pick moves on.
        let second = archive.sample_individual(&mut rng).unwrap();
        let second_target = *second.fitness.reached_targets().collect::<Vec<_>>().first().unwrap();
        assert_ne!(first_target, second_target);
    }

    #[test]
    fn solution_has_one_entry_per_distinct_best() {
        let mut archive = Archive::new(3, FeedbackDirectedSampling::Uniform);
        archive.add_if_needed(&evaluated(1, &[(0, 1.0), (1, 1.0)], 0));
        archive.add_if_needed(&evaluated(2, &[(2, 0.5)], 1));
        archive.add_if_needed(&evaluated(2, &[(2, 0.75)], 2));
        let solution = archive.extract_solution();
        let evals: Vec<u64> = solution.individuals.iter().map(|e| e.evaluation).collect();
        assert_eq!(evals, vec![0, 2]);
        assert_eq!(
            solution.covered_targets,
            [TargetId(0), TargetId(1)].into_iter().collect()
        );
    }
}
