// SPDX-License-Identifier: Apache-2.0

//! Search clock and adaptive parameter control.
//!
//! Every adaptive parameter is a pure function of the progress fraction
//! reported by `SearchClock`; nothing here reads a global timer, so a
//! simulated `TimeSource` gives fully deterministic schedules.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{SearchConfig, StoppingCriterion};

/// Elapsed wall time since the search started.
pub trait TimeSource: Send {
    fn elapsed(&self) -> Duration;
}

pub struct SystemTimeSource {
    start: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        SystemTimeSource {
            start: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Manually advanced clock for tests; clones share the same time.
#[derive(Clone, Default)]
pub struct SimulatedTimeSource {
    millis: Arc<AtomicU64>,
}

impl SimulatedTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for SimulatedTimeSource {
    fn elapsed(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Tracks consumption of the search budget.
pub struct SearchClock {
    criterion: StoppingCriterion,
    budget: u64,
    evaluations: u64,
    time: Box<dyn TimeSource>,
    origin: Duration,
}

impl SearchClock {
    pub fn new(criterion: StoppingCriterion, budget: u64, time: Box<dyn TimeSource>) -> Self {
        SearchClock {
            criterion,
            budget,
            evaluations: 0,
            time,
            origin: Duration::ZERO,
        }
    }

    /// Restarts the budget: elapsed time and evaluations count from now.
    pub fn start(&mut self) {
        self.origin = self.time.elapsed();
        self.evaluations = 0;
    }

    pub fn record_evaluation(&mut self) {
        self.evaluations += 1;
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn elapsed(&self) -> Duration {
        self.time.elapsed().saturating_sub(self.origin)
    }

    /// Fraction of the budget used, clamped to `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.budget == 0 {
            return 1.0;
        }
        let used = match self.criterion {
            StoppingCriterion::FitnessEvaluations => self.evaluations as f64 / self.budget as f64,
            StoppingCriterion::Time => {
                self.elapsed().as_secs_f64() / (self.budget as f64)
            }
        };
        used.clamp(0.0, 1.0)
    }

    pub fn should_continue(&self) -> bool {
        match self.criterion {
            StoppingCriterion::FitnessEvaluations => self.evaluations < self.budget,
            StoppingCriterion::Time => self.elapsed() < Duration::from_secs(self.budget),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SearchPhase {
    Exploration,
    Focused,
}

impl std::fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchPhase::Exploration => write!(f, "exploration"),
            SearchPhase::Focused => write!(f, "focused"),
        }
    }
}

/// Linear interpolation from `start` (progress 0) to `end` (progress at
/// or past `focus_at`).
pub fn exploratory_value(progress: f64, focus_at: f64, start: f64, end: f64) -> f64 {
    if progress >= focus_at {
        return end;
    }
    let scale = progress / focus_at;
    start + (end - start) * scale
}

/// Integer flavour of `exploratory_value`; the interpolated delta is
/// truncated towards zero, so the value stays at `start` until a full unit
/// of change has accumulated.
pub fn exploratory_count(progress: f64, focus_at: f64, start: usize, end: usize) -> usize {
    if progress >= focus_at {
        return end;
    }
    let scale = progress / focus_at;
    let delta = (end as f64 - start as f64) * scale;
    (start as i64 + delta as i64).max(0) as usize
}

/// Schedules of the MIO parameters, parameterized by the search config.
#[derive(Debug, Clone)]
pub struct AdaptiveParameterControl {
    focused_search_activation_time: f64,
    prob_of_random_sampling: f64,
    start_number_of_mutations: usize,
    end_number_of_mutations: usize,
    archive_target_limit: usize,
}

impl AdaptiveParameterControl {
    pub fn new(config: &SearchConfig) -> Self {
        AdaptiveParameterControl {
            focused_search_activation_time: config.focused_search_activation_time,
            prob_of_random_sampling: config.prob_of_random_sampling,
            start_number_of_mutations: config.start_number_of_mutations,
            end_number_of_mutations: config.end_number_of_mutations,
            archive_target_limit: config.archive_target_limit,
        }
    }

    pub fn phase(&self, progress: f64) -> SearchPhase {
        if progress >= self.focused_search_activation_time {
            SearchPhase::Focused
        } else {
            SearchPhase::Exploration
        }
    }

    /// Falls to 0 once the search is focused.
    pub fn prob_of_random_sampling(&self, progress: f64) -> f64 {
        exploratory_value(
            progress,
            self.focused_search_activation_time,
            self.prob_of_random_sampling,
            0.0,
        )
    }

    pub fn number_of_mutations(&self, progress: f64) -> usize {
        exploratory_count(
            progress,
            self.focused_search_activation_time,
            self.start_number_of_mutations,
            self.end_number_of_mutations,
        )
    }

    /// Shrinks to a single entry per target once the search is focused.
    pub fn archive_target_limit(&self, progress: f64) -> usize {
        exploratory_count(
            progress,
            self.focused_search_activation_time,
            self.archive_target_limit,
            1,
        )
        .max(1)
    }
}
