// SPDX-License-Identifier: Apache-2.0

//! Coverage-guided, many-objective test generation.
//!
//! An `ObjectiveRegistry` collects heuristic observations for coverage
//! targets, an `Archive` keeps the best individuals per target, and a
//! `SearchEngine` runs the MIO loop against a `SutDriver`.

pub mod apc;
pub mod archive;
pub mod config;
pub mod covsearch_error;
pub mod engine;
pub mod fitness;
pub mod gene;
pub mod impact;
pub mod individual;
pub mod naming;
pub mod registry;
pub mod sut;

/// Random number generator used throughout the search; seeded from
/// `SearchConfig::seed` so runs are reproducible.
pub type SearchRng = rand_pcg::Pcg64Mcg;

pub use apc::{AdaptiveParameterControl, SearchClock, SearchPhase, SimulatedTimeSource, TimeSource};
pub use archive::{Archive, Solution};
pub use config::{FeedbackDirectedSampling, SearchConfig, StoppingCriterion};
pub use covsearch_error::SearchError;
pub use covsearch_heuristics::{Operands, Operator, Truthness};
pub use engine::{
    ImpactSummary, ProgressSink, SearchEngine, SearchProgress, SearchReport, SearchState,
    SearchStats, StopReason,
};
pub use fitness::{FitnessValue, TargetChanges};
pub use gene::{Gene, GeneId};
pub use individual::{Action, ActionCatalog, EvaluatedIndividual, Individual, RandomSampler, Sampler};
pub use registry::{ObjectiveRegistry, TargetId};
pub use sut::{ActionResult, SutDriver, TargetObservation};
