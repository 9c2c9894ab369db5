// SPDX-License-Identifier: Apache-2.0

//! The MIO search loop.
//!
//! Each step either samples a brand-new individual or takes a copy of an
//! archived one and runs a short chain of mutations on it, keeping every
//! step that is not worse than its parent. Which of the two happens, how
//! long the chains are, and how many individuals the archive keeps per
//! target are all functions of the consumed budget fraction.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::apc::{AdaptiveParameterControl, SearchClock, SearchPhase, SystemTimeSource, TimeSource};
use crate::archive::{AddOutcome, Archive, Solution};
use crate::config::SearchConfig;
use crate::covsearch_error::SearchError;
use crate::fitness::FitnessValue;
use crate::impact::{ImpactTracker, MutationSite};
use crate::individual::{EvaluatedIndividual, Individual, Sampler};
use crate::registry::{ObjectiveRegistry, TargetId};
use crate::sut::{ActionExecutor, ExecutionOutcome, SutDriver, TargetObservation};
use crate::SearchRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BudgetExhausted,
    /// The stop flag was raised from outside (e.g. Ctrl-C).
    ExternalAbort,
    /// Too many consecutive executions failed.
    DriverUnavailable,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::BudgetExhausted => write!(f, "budget exhausted"),
            StopReason::ExternalAbort => write!(f, "external abort"),
            StopReason::DriverUnavailable => write!(f, "driver unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Running,
    Stopped(StopReason),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub evaluations: u64,
    pub random_samples: u64,
    pub mutation_steps: u64,
    pub accepted_mutations: u64,
    pub rejected_mutations: u64,
    pub structure_mutations: u64,
    /// Executions discarded because an action failed, timed out or stalled.
    pub failed_executions: u64,
    pub timed_out_actions: u64,
    /// Actions not sent because the driver was still busy with a
    /// timed-out one.
    pub stalled_actions: u64,
    /// Archive insertions that improved at least one target.
    pub improvements: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchProgress {
    pub evaluations: u64,
    /// Fraction of the budget consumed.
    pub progress: f64,
    pub phase: SearchPhase,
    pub covered_targets: usize,
    pub reached_targets: usize,
    pub total_targets: usize,
    pub archive_size: usize,
    pub consecutive_failures: usize,
    pub last_step_improved: bool,
}

pub trait ProgressSink {
    fn on_progress(&mut self, p: SearchProgress);
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub id: TargetId,
    pub name: String,
    pub best: f64,
}

/// How much the solution's individuals learned about their own genes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImpactSummary {
    /// Genes with impact bookkeeping, summed over the solution.
    pub tracked_genes: usize,
    /// Genes whose mutation changed at least one target.
    pub impactful_genes: usize,
    pub structure_manipulations: u32,
    pub structure_improvements: u32,
}

impl ImpactSummary {
    fn of(solution: &Solution) -> Self {
        let mut summary = ImpactSummary::default();
        for ei in solution.individuals.iter() {
            summary.tracked_genes += ei.impacts.tracked_genes();
            summary.impactful_genes += ei.impacts.impactful_genes().len();
            let structure = ei.impacts.structure_impact();
            summary.structure_manipulations += structure.times_to_manipulate;
            summary.structure_improvements += structure.times_of_improving_manipulation;
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub stop_reason: StopReason,
    pub evaluations: u64,
    pub elapsed_secs: f64,
    pub covered_targets: usize,
    pub reached_targets: usize,
    pub total_targets: usize,
    pub targets: Vec<TargetSummary>,
    pub solution: Solution,
    pub stats: SearchStats,
    pub impacts: ImpactSummary,
}

impl SearchReport {
    /// Fraction of known targets that are covered.
    pub fn coverage(&self) -> f64 {
        if self.total_targets == 0 {
            0.0
        } else {
            self.covered_targets as f64 / self.total_targets as f64
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub struct SearchEngine {
    config: SearchConfig,
    apc: AdaptiveParameterControl,
    registry: Arc<ObjectiveRegistry>,
    archive: Archive,
    sampler: Box<dyn Sampler>,
    executor: ActionExecutor,
    rng: SearchRng,
    clock: SearchClock,
    stop: Arc<AtomicBool>,
    state: SearchState,
    stats: SearchStats,
    consecutive_failures: usize,
}

impl SearchEngine {
    /// Validates `config` and starts the driver thread. The search itself
    /// starts with `run`.
    pub fn new(
        config: SearchConfig,
        sampler: Box<dyn Sampler>,
        driver: Box<dyn SutDriver>,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let executor = ActionExecutor::spawn(driver, config.action_timeout())?
            .with_stall_grace(config.stall_grace());
        let clock = SearchClock::new(
            config.stopping_criterion,
            config.budget,
            Box::new(SystemTimeSource::new()),
        );
        Ok(SearchEngine {
            apc: AdaptiveParameterControl::new(&config),
            registry: Arc::new(ObjectiveRegistry::new()),
            archive: Archive::new(config.archive_target_limit, config.feedback_directed_sampling),
            sampler,
            executor,
            rng: SearchRng::seed_from_u64(config.seed),
            clock,
            stop: Arc::new(AtomicBool::new(false)),
            state: SearchState::Idle,
            stats: SearchStats::default(),
            consecutive_failures: 0,
            config,
        })
    }

    /// Replaces the wall clock, e.g. with a simulated one in tests.
    pub fn with_time_source(mut self, time: Box<dyn TimeSource>) -> Self {
        self.clock = SearchClock::new(self.config.stopping_criterion, self.config.budget, time);
        self
    }

    pub fn set_stop_flag(&mut self, stop: Arc<AtomicBool>) {
        self.stop = stop;
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn registry(&self) -> Arc<ObjectiveRegistry> {
        self.registry.clone()
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Best individuals found so far; callable in any state.
    pub fn get_solution(&self) -> Solution {
        self.archive.extract_solution()
    }

    pub fn run(&mut self) -> Result<SearchReport, SearchError> {
        self.run_with_progress(None)
    }

    /// Runs the search until the budget is used up or the stop flag is
    /// raised. Fails only if the driver is presumed dead; the error then
    /// carries the partial report.
    ///
    /// Panics if called more than once.
    pub fn run_with_progress<'a>(
        &mut self,
        mut progress: Option<&'a mut (dyn ProgressSink + 'a)>,
    ) -> Result<SearchReport, SearchError> {
        assert_eq!(self.state, SearchState::Idle, "a search engine runs once");
        self.state = SearchState::Running;
        self.clock.start();
        log::info!(
            "[mio] starting search; budget={} {:?}, seed={}",
            self.config.budget,
            self.config.stopping_criterion,
            self.config.seed
        );

        let mut last_reported: u64 = 0;
        let mut last_logged: u64 = 0;
        let mut phase = SearchPhase::Exploration;
        let reason = loop {
            if self.stop.load(Ordering::Relaxed) {
                break StopReason::ExternalAbort;
            }
            if !self.clock.should_continue() {
                break StopReason::BudgetExhausted;
            }

            let improved = self.step()?;

            let now = self.apc.phase(self.clock.progress());
            if now != phase {
                log::info!(
                    "[mio] entering {} phase after {} evaluations",
                    now,
                    self.clock.evaluations()
                );
                phase = now;
            }
            let every = self.config.progress_every;
            let evaluations = self.clock.evaluations();
            if every > 0 && evaluations / every > last_logged / every {
                last_logged = evaluations;
                log::info!(
                    "[mio] evaluations={} covered={} reached={}",
                    evaluations,
                    self.archive.number_of_covered_targets(),
                    self.archive.number_of_reached_targets()
                );
            }

            if let Some(sink) = progress.as_mut() {
                let crossed = every > 0 && evaluations / every > last_reported / every;
                if improved || crossed {
                    last_reported = evaluations;
                    sink.on_progress(self.snapshot(improved));
                }
            }
        };

        self.state = SearchState::Stopped(reason);
        let report = self.build_report(reason);
        log::info!(
            "[mio] search stopped ({}); evaluations={} covered={}/{}",
            reason,
            report.evaluations,
            report.covered_targets,
            report.total_targets
        );
        Ok(report)
    }

    /// One iteration of the main loop; returns whether the archive
    /// improved.
    fn step(&mut self) -> Result<bool, SearchError> {
        let progress = self.clock.progress();
        self.archive
            .set_target_limit(self.apc.archive_target_limit(progress));

        let sample_fresh = self.archive.is_empty()
            || self.rng.gen::<f64>() < self.apc.prob_of_random_sampling(progress);
        if sample_fresh {
            self.stats.random_samples += 1;
            let individual = self.sampler.sample(&mut self.rng);
            return Ok(match self.evaluate(individual)? {
                Some(ei) => self.offer(&ei).improved,
                None => false,
            });
        }

        match self.archive.sample_individual(&mut self.rng) {
            Some(current) => {
                let n = self.apc.number_of_mutations(progress);
                self.mutate_and_save(current, n)
            }
            None => Ok(false),
        }
    }

    fn snapshot(&self, improved: bool) -> SearchProgress {
        let progress = self.clock.progress();
        SearchProgress {
            evaluations: self.clock.evaluations(),
            progress,
            phase: self.apc.phase(progress),
            covered_targets: self.archive.number_of_covered_targets(),
            reached_targets: self.archive.number_of_reached_targets(),
            total_targets: self.registry.number_of_targets(),
            archive_size: self.archive.size(),
            consecutive_failures: self.consecutive_failures,
            last_step_improved: improved,
        }
    }

    fn build_report(&self, reason: StopReason) -> SearchReport {
        let total = self.registry.number_of_targets();
        let targets = (0..total)
            .map(|i| {
                let id = TargetId(i as u32);
                TargetSummary {
                    id,
                    name: self.registry.descriptive_id(id).unwrap_or_default(),
                    best: self.registry.best_value(id),
                }
            })
            .collect();
        let solution = self.archive.extract_solution();
        SearchReport {
            stop_reason: reason,
            evaluations: self.clock.evaluations(),
            elapsed_secs: self.clock.elapsed().as_secs_f64(),
            covered_targets: self.archive.number_of_covered_targets(),
            reached_targets: self.archive.number_of_reached_targets(),
            total_targets: total,
            targets,
            impacts: ImpactSummary::of(&solution),
            solution,
            stats: self.stats.clone(),
        }
    }

    /// Executes `individual` from a clean per-test state. Returns `None`
    /// when any action failed, timed out or stalled; such executions are
    /// never offered to the archive and do not raise any target.
    fn evaluate(&mut self, individual: Individual) -> Result<Option<EvaluatedIndividual>, SearchError> {
        self.registry.reset_per_test_state();
        self.executor.reset();

        let steps = individual
            .init_actions()
            .iter()
            .map(|a| (None, a))
            .chain(individual.actions().iter().enumerate().map(|(i, a)| (Some(i), a)));
        // Observations only reach the registry once the whole individual
        // has run successfully.
        let mut observed: Vec<(Option<usize>, Vec<TargetObservation>)> = Vec::new();
        let mut ok = true;
        for (index, action) in steps {
            match self.executor.execute(action) {
                ExecutionOutcome::Completed(result) => {
                    observed.push((index, result.observations));
                    if !result.success {
                        log::debug!("[mio] action {} failed", action.name);
                        ok = false;
                        break;
                    }
                }
                ExecutionOutcome::TimedOut => {
                    log::debug!(
                        "[mio] action {} exceeded {:?}",
                        action.name,
                        self.executor.timeout()
                    );
                    self.stats.timed_out_actions += 1;
                    ok = false;
                    break;
                }
                ExecutionOutcome::Stalled => {
                    self.stats.stalled_actions += 1;
                    ok = false;
                    break;
                }
                ExecutionOutcome::Disconnected => {
                    log::warn!("[mio] driver thread is gone");
                    ok = false;
                    break;
                }
            }
        }
        self.clock.record_evaluation();
        self.stats.evaluations += 1;

        if ok {
            for (index, observations) in observed {
                self.registry.set_action_index(index);
                for o in observations.iter() {
                    self.registry.update(&o.descriptive, o.value);
                }
            }
            let fitness = self.registry.take_fitness();
            self.consecutive_failures = 0;
            return Ok(Some(EvaluatedIndividual::new(
                individual,
                fitness,
                self.clock.evaluations(),
            )));
        }

        // Targets the failed run touched become known, but score 0.
        let mut attempted = FitnessValue::new();
        attempted.zero_out(
            observed
                .iter()
                .flat_map(|(_, obs)| obs.iter())
                .map(|o| self.registry.register_target(&o.descriptive)),
        );
        log::debug!(
            "[mio] discarding failed individual; {} attempted objectives scored 0",
            attempted.len()
        );
        self.stats.failed_executions += 1;
        self.consecutive_failures += 1;
        log::warn!(
            "[mio] execution failed ({} in a row)",
            self.consecutive_failures
        );
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            self.state = SearchState::Stopped(StopReason::DriverUnavailable);
            log::error!(
                "[mio] aborting: driver failed {} consecutive executions",
                self.consecutive_failures
            );
            return Err(SearchError::DriverUnavailable {
                consecutive_failures: self.consecutive_failures,
                partial: Box::new(self.build_report(StopReason::DriverUnavailable)),
            });
        }
        Ok(None)
    }

    fn offer(&mut self, ei: &EvaluatedIndividual) -> AddOutcome {
        for t in self.registry.drain_newly_discovered() {
            log::debug!(
                "[mio] new target {} {}",
                t,
                self.registry.descriptive_id(t).unwrap_or_default()
            );
        }
        let outcome = self.archive.add_if_needed(ei);
        if outcome.improved {
            self.stats.improvements += 1;
            log::debug!(
                "[mio] archive improved at evaluation {}; covered={}",
                ei.evaluation,
                self.archive.number_of_covered_targets()
            );
        }
        outcome
    }

    /// Applies one mutation to `individual`, either structural or to a
    /// single gene chosen by impact weight. Returns `None` when nothing
    /// could be mutated.
    fn mutate(&mut self, individual: &mut Individual, impacts: &ImpactTracker) -> Option<MutationSite> {
        if self.rng.gen_bool(self.config.structure_mutation_probability) {
            let can_grow = individual.size() < self.config.max_actions_per_individual;
            let grow = can_grow && (individual.size() <= 1 || self.rng.gen_bool(0.5));
            if grow {
                if let Some(template) = self.sampler.sample_action(&mut self.rng) {
                    individual.add_action(template, &mut self.rng);
                    self.stats.structure_mutations += 1;
                    return Some(MutationSite::Structure);
                }
            } else if individual.remove_random_action(&mut self.rng).is_some() {
                self.stats.structure_mutations += 1;
                return Some(MutationSite::Structure);
            }
        }

        let genes = individual.mutable_genes();
        if genes.is_empty() {
            return None;
        }
        let index = if self.config.impact_guided_mutation {
            let weights = impacts.selection_weights(&genes);
            match WeightedIndex::new(&weights) {
                Ok(dist) => dist.sample(&mut self.rng),
                Err(_) => self.rng.gen_range(0..genes.len()),
            }
        } else {
            self.rng.gen_range(0..genes.len())
        };
        let gene = genes[index];
        individual.mutate_gene(gene, &mut self.rng);
        Some(MutationSite::Gene(gene))
    }

    /// Runs up to `n` mutation steps starting from `current`. Every step
    /// that is not worse than its parent is offered to the archive and
    /// becomes the parent of the next step.
    fn mutate_and_save(&mut self, mut current: EvaluatedIndividual, n: usize) -> Result<bool, SearchError> {
        let mut improved = false;
        for _ in 0..n {
            if self.stop.load(Ordering::Relaxed) || !self.clock.should_continue() {
                break;
            }
            let watched: BTreeSet<TargetId> = self.archive.not_covered_targets();
            let mut candidate = current.individual.clone();
            let Some(site) = self.mutate(&mut candidate, &current.impacts) else {
                break;
            };
            self.stats.mutation_steps += 1;

            let Some(mut mutated) = self.evaluate(candidate)? else {
                continue;
            };

            let reaches_new = self.archive.would_reach_new_target(&mutated);
            let not_worse = reaches_new || !current.fitness.subsumes(&mutated.fitness, &watched);
            let changes = mutated.fitness.changes_since(&current.fitness, &watched);

            let mut impacts = current.impacts.clone();
            impacts.record_mutation(site, &changes, &watched);

            if not_worse {
                // Structure and array mutations may have dropped genes.
                impacts.sync_with(&mutated.individual.gene_ids());
                mutated.impacts = impacts;
                improved |= self.offer(&mutated).improved;
                self.stats.accepted_mutations += 1;
                current = mutated;
            } else {
                current.impacts = impacts;
                self.stats.rejected_mutations += 1;
            }
        }
        Ok(improved)
    }
}
