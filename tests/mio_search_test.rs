// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use covsearch::{
    Action, ActionCatalog, ActionResult, EvaluatedIndividual, FeedbackDirectedSampling, Gene,
    Operator, ProgressSink, RandomSampler, SearchConfig, SearchEngine, SearchProgress, StopReason,
    SutDriver, TargetId,
};
use covsearch_test_helpers::{
    init_logging, numbers_catalog, onemax_catalog, onemax_target, NumberBranchesDriver,
    OneMaxDriver,
};
use pretty_assertions::assert_eq;
use test_case::test_case;

fn onemax_engine(bits: usize, config: SearchConfig) -> SearchEngine {
    let sampler = RandomSampler::new(onemax_catalog(bits), config.max_actions_per_individual);
    SearchEngine::new(config, Box::new(sampler), Box::new(OneMaxDriver { bits })).unwrap()
}

#[test_case(FeedbackDirectedSampling::Uniform ; "uniform")]
#[test_case(FeedbackDirectedSampling::Last ; "last")]
#[test_case(FeedbackDirectedSampling::FocusedQuickest ; "focused quickest")]
fn onemax_is_fully_covered(sampling: FeedbackDirectedSampling) {
    init_logging();
    let bits = 16;
    let config = SearchConfig {
        budget: 2000,
        seed: 7,
        feedback_directed_sampling: sampling,
        ..SearchConfig::default()
    };
    let mut engine = onemax_engine(bits, config);
    let report = engine.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(report.total_targets, bits);
    assert_eq!(report.covered_targets, bits);
    assert_eq!(report.coverage(), 1.0);
    let registry = engine.registry();
    for i in 0..bits {
        let id = registry.mapped_id(&onemax_target(i)).unwrap();
        assert_eq!(registry.best_value(id), 1.0);
    }
    // Every covered target is represented in the solution.
    let solution = engine.get_solution();
    assert!(!solution.individuals.is_empty());
    assert_eq!(solution.covered_targets.len(), bits);
    for id in solution.covered_targets.iter() {
        assert!(solution.individuals.iter().any(|e| e.fitness.does_cover(*id)));
    }
}

#[test]
fn same_seed_same_search() {
    let config = SearchConfig {
        budget: 300,
        seed: 1234,
        ..SearchConfig::default()
    };
    let a = onemax_engine(12, config.clone()).run().unwrap();
    let b = onemax_engine(12, config).run().unwrap();
    assert_eq!(a.stats, b.stats);
    let fingerprints = |r: &covsearch::SearchReport| -> Vec<String> {
        r.solution
            .individuals
            .iter()
            .map(|e| e.individual.fingerprint().to_hex().to_string())
            .collect()
    };
    assert_eq!(fingerprints(&a), fingerprints(&b));
}

#[test]
fn branch_distance_guides_search_to_equality() {
    init_logging();
    let config = SearchConfig {
        budget: 5000,
        seed: 42,
        ..SearchConfig::default()
    };
    let sampler = RandomSampler::new(numbers_catalog(), config.max_actions_per_individual);
    let mut engine =
        SearchEngine::new(config, Box::new(sampler), Box::new(NumberBranchesDriver)).unwrap();
    let report = engine.run().unwrap();
    let registry = engine.registry();
    let eq_true = registry.mapped_id("x_eq_42-true").unwrap();
    assert_eq!(registry.best_value(eq_true), 1.0);
    // Reaching the nested line requires the equality to hold.
    let nested = registry.mapped_id("Line_at_Numbers.kt_00011").unwrap();
    assert_eq!(registry.best_value(nested), 1.0);
    assert!(report.stats.accepted_mutations > 0);
    assert!(report.stats.random_samples > 0);
}

struct StopAfter {
    reports: usize,
    stop: Arc<AtomicBool>,
    seen: Vec<SearchProgress>,
}

impl ProgressSink for StopAfter {
    fn on_progress(&mut self, p: SearchProgress) {
        self.seen.push(p);
        if self.seen.len() >= self.reports {
            self.stop.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn external_abort_keeps_partial_results() {
    let config = SearchConfig {
        budget: 100_000,
        progress_every: 10,
        ..SearchConfig::default()
    };
    let mut engine = onemax_engine(8, config);
    let stop = Arc::new(AtomicBool::new(false));
    engine.set_stop_flag(stop.clone());
    let mut sink = StopAfter {
        reports: 3,
        stop,
        seen: Vec::new(),
    };
    let report = engine.run_with_progress(Some(&mut sink)).unwrap();
    assert_eq!(report.stop_reason, StopReason::ExternalAbort);
    assert!(report.evaluations < 100_000);
    assert_eq!(sink.seen.len(), 3);
    assert!(!report.solution.individuals.is_empty());
}

#[test]
fn report_exports_as_json() {
    let config = SearchConfig {
        budget: 50,
        ..SearchConfig::default()
    };
    let report = onemax_engine(4, config).run().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    std::fs::write(&path, report.to_json().unwrap()).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["stop_reason"], "budget_exhausted");
    assert_eq!(value["evaluations"], 50);
    assert_eq!(value["total_targets"], 4);
    assert_eq!(
        value["solution"]["individuals"].as_array().unwrap().len(),
        report.solution.individuals.len()
    );
}

fn archived(engine: &SearchEngine) -> Vec<Arc<EvaluatedIndividual>> {
    let targets = engine.registry().number_of_targets();
    (0..targets)
        .flat_map(|i| engine.archive().population(TargetId(i as u32)).to_vec())
        .collect()
}

/// Adds a target beyond the range of `x`, so the archive always holds a
/// population of individuals still being improved by mutation.
struct OutOfReachDriver;

impl SutDriver for OutOfReachDriver {
    fn execute(&mut self, action: &Action) -> ActionResult {
        let mut r = NumberBranchesDriver.execute(action);
        let x = action.gene("x").and_then(|g| g.as_int()).unwrap_or(0);
        r.observe_comparison("x_eq_5000", Operator::Eq, (x, 5000));
        r
    }
}

#[test]
fn impact_records_follow_the_lineage_of_archived_individuals() {
    init_logging();
    let config = SearchConfig {
        budget: 3000,
        seed: 5,
        max_actions_per_individual: 4,
        structure_mutation_probability: 0.5,
        ..SearchConfig::default()
    };
    let sampler = RandomSampler::new(numbers_catalog(), config.max_actions_per_individual);
    let mut engine =
        SearchEngine::new(config, Box::new(sampler), Box::new(OutOfReachDriver)).unwrap();
    let report = engine.run().unwrap();
    assert!(report.stats.structure_mutations > 0);
    let unreachable = engine.registry().mapped_id("x_eq_5000-true").unwrap();
    assert!(!engine.archive().is_covered(unreachable));

    let all = archived(&engine);
    assert!(!all.is_empty());
    for ei in all.iter() {
        // Records never outlive the genes they describe.
        let live = ei.individual.gene_ids();
        assert!(ei.impacts.tracked_genes() <= live.len());
        for g in ei.impacts.impactful_genes() {
            assert!(live.contains(&g), "{:?} is not in the individual", g);
        }
    }
    // Mutated descendants inherit what their ancestors learned.
    assert!(all.iter().any(|ei| ei.impacts.tracked_genes() > 0
        || ei.impacts.structure_impact().times_to_manipulate > 0));
    // Mutating `y` never moves the out-of-reach target.
    assert!(all.iter().any(|ei| {
        ei.individual.gene_ids().iter().any(|g| {
            ei.impacts
                .impact(*g)
                .is_some_and(|i| !i.times_of_no_impact_with_targets.is_empty())
        })
    }));

    let summary = &report.impacts;
    assert!(summary.impactful_genes <= summary.tracked_genes);
    assert!(summary.structure_improvements <= summary.structure_manipulations);
}

/// Branches on the sign of an unbounded float.
struct SignDriver;

impl SutDriver for SignDriver {
    fn execute(&mut self, action: &Action) -> ActionResult {
        let x = action.gene("x").and_then(|g| g.as_float()).unwrap_or(0.0);
        let mut r = ActionResult::succeeded();
        r.observe_comparison("x_gt_0", Operator::Gt, (x, 0.0));
        r
    }
}

#[test]
fn full_range_float_genes_are_searchable() {
    init_logging();
    let catalog = ActionCatalog {
        actions: vec![Action::new("sign", vec![Gene::float("x", f64::MIN, f64::MAX)])],
        init_actions: vec![],
    };
    let config = SearchConfig {
        budget: 300,
        seed: 9,
        ..SearchConfig::default()
    };
    let sampler = RandomSampler::new(catalog, config.max_actions_per_individual);
    let mut engine = SearchEngine::new(config, Box::new(sampler), Box::new(SignDriver)).unwrap();
    let report = engine.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(report.evaluations, 300);
    assert_eq!(report.covered_targets, 2);
    for ei in archived(&engine) {
        for a in ei.individual.actions() {
            assert!(a.gene("x").unwrap().as_float().unwrap().is_finite());
        }
    }
}
