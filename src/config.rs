// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::covsearch_error::SearchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingCriterion {
    /// `budget` is a number of seconds.
    Time,
    /// `budget` is a number of individual evaluations.
    FitnessEvaluations,
}

/// How the archive picks the target whose population to sample from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackDirectedSampling {
    Uniform,
    Last,
    FocusedQuickest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub stopping_criterion: StoppingCriterion,
    pub budget: u64,

    /// Upper bound on individuals kept per target early in the search.
    pub archive_target_limit: usize,

    /// Probability of sampling a fresh individual at the start of the
    /// search; decreases to 0 at `focused_search_activation_time`.
    pub prob_of_random_sampling: f64,

    /// Fraction of the budget after which the search only mutates.
    pub focused_search_activation_time: f64,

    pub start_number_of_mutations: usize,
    pub end_number_of_mutations: usize,

    /// Only consulted by population-based algorithms; carried for
    /// interface compatibility.
    pub tournament_size: usize,

    pub seed: u64,

    /// Emit a progress report every N evaluations; 0 disables periodic
    /// reports.
    pub progress_every: u64,

    pub max_actions_per_individual: usize,

    /// Probability that a mutation step adds or removes an action instead
    /// of changing a gene value.
    pub structure_mutation_probability: f64,

    pub action_timeout_ms: u64,

    /// Consecutive failed executions after which the driver is presumed
    /// dead and the run aborts.
    pub max_consecutive_failures: usize,

    pub feedback_directed_sampling: FeedbackDirectedSampling,

    /// Bias gene selection by collected impact statistics; uniform choice
    /// otherwise.
    pub impact_guided_mutation: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            stopping_criterion: StoppingCriterion::FitnessEvaluations,
            budget: 1000,
            archive_target_limit: 10,
            prob_of_random_sampling: 0.5,
            focused_search_activation_time: 0.5,
            start_number_of_mutations: 1,
            end_number_of_mutations: 10,
            tournament_size: 10,
            seed: 0,
            progress_every: 100,
            max_actions_per_individual: 10,
            structure_mutation_probability: 0.5,
            action_timeout_ms: 10_000,
            max_consecutive_failures: 3,
            feedback_directed_sampling: FeedbackDirectedSampling::Uniform,
            impact_guided_mutation: true,
        }
    }
}

fn check_probability(name: &str, value: f64) -> Result<(), SearchError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SearchError::InvalidConfig(format!(
            "{} must be in [0,1]; got {}",
            name, value
        )));
    }
    Ok(())
}

impl SearchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, SearchError> {
        let config: SearchConfig =
            toml::from_str(text).map_err(|e| SearchError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, SearchError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SearchError::ConfigParse(format!("could not read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// How long to wait for a timed-out action before the next one is
    /// declared stalled: one timeout per failure the run may still absorb.
    pub fn stall_grace(&self) -> Duration {
        let n = u32::try_from(self.max_consecutive_failures).unwrap_or(u32::MAX);
        self.action_timeout().saturating_mul(n)
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.archive_target_limit == 0 {
            return Err(SearchError::InvalidConfig(
                "archive_target_limit must be at least 1".to_string(),
            ));
        }
        check_probability("prob_of_random_sampling", self.prob_of_random_sampling)?;
        check_probability(
            "focused_search_activation_time",
            self.focused_search_activation_time,
        )?;
        check_probability(
            "structure_mutation_probability",
            self.structure_mutation_probability,
        )?;
        if self.start_number_of_mutations == 0 || self.end_number_of_mutations == 0 {
            return Err(SearchError::InvalidConfig(
                "number of mutations must be at least 1".to_string(),
            ));
        }
        if self.max_actions_per_individual == 0 {
            return Err(SearchError::InvalidConfig(
                "max_actions_per_individual must be at least 1".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(SearchError::InvalidConfig(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.action_timeout_ms == 0 {
            return Err(SearchError::InvalidConfig(
                "action_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
