// SPDX-License-Identifier: Apache-2.0

//! Per-gene mutation statistics used to bias which gene gets mutated.
//!
//! A tracker belongs to one evaluated individual and is copied along with
//! it, so statistics are scoped to a lineage. Records are keyed by
//! `GeneId`; genes that disappear from the individual (an action was
//! removed) have their records dropped by `sync_with`, and genes that
//! appear get a record the first time they are touched.

use std::collections::{BTreeMap, BTreeSet};

use crate::fitness::TargetChanges;
use crate::gene::GeneId;
use crate::registry::TargetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The mutation raised the heuristic of the target.
    Improved,
    /// The heuristic of the target did not move.
    NoImpact,
    /// The heuristic moved, but not upwards.
    ImpactedButNotImproved,
}

/// What was mutated in one mutation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationSite {
    Gene(GeneId),
    /// An action was added or removed.
    Structure,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Impact {
    pub times_to_manipulate: u32,
    /// Manipulations that changed no target at all.
    pub times_of_no_impact: u32,
    /// Manipulations that improved at least one target.
    pub times_of_improving_manipulation: u32,
    pub times_of_impact: BTreeMap<TargetId, u32>,
    pub times_of_improvement: BTreeMap<TargetId, u32>,
    pub times_of_no_impact_with_targets: BTreeMap<TargetId, u32>,
    /// Consecutive manipulations without impact since the last impact.
    pub no_impact_from_impact: BTreeMap<TargetId, u32>,
    /// Consecutive manipulations without improvement.
    pub no_improvement: BTreeMap<TargetId, u32>,
}

fn bump(map: &mut BTreeMap<TargetId, u32>, target: TargetId) {
    *map.entry(target).or_insert(0) += 1;
}

impl Impact {
    pub fn record_outcome(&mut self, target: TargetId, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Improved => {
                bump(&mut self.times_of_impact, target);
                bump(&mut self.times_of_improvement, target);
                self.no_impact_from_impact.insert(target, 0);
                self.no_improvement.insert(target, 0);
            }
            OutcomeKind::ImpactedButNotImproved => {
                bump(&mut self.times_of_impact, target);
                self.no_impact_from_impact.insert(target, 0);
                bump(&mut self.no_improvement, target);
            }
            OutcomeKind::NoImpact => {
                bump(&mut self.times_of_no_impact_with_targets, target);
                bump(&mut self.no_impact_from_impact, target);
                bump(&mut self.no_improvement, target);
            }
        }
    }

    /// Laplace-smoothed fraction of manipulations that improved something.
    pub fn improvement_ratio(&self) -> f64 {
        (self.times_of_improving_manipulation as f64 + 1.0)
            / (self.times_to_manipulate as f64 + 2.0)
    }

    pub fn has_impact(&self) -> bool {
        !self.times_of_impact.is_empty()
    }
}

/// Weight of a gene nobody has mutated yet, when no other gene has been
/// mutated either.
const UNEXPLORED_DEFAULT_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpactTracker {
    genes: BTreeMap<GeneId, Impact>,
    structure: Impact,
}

impl ImpactTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_for(&mut self, site: MutationSite) -> &mut Impact {
        match site {
            MutationSite::Gene(id) => self.genes.entry(id).or_default(),
            MutationSite::Structure => &mut self.structure,
        }
    }

    pub fn record_outcome(&mut self, gene: GeneId, target: TargetId, kind: OutcomeKind) {
        self.record_for(MutationSite::Gene(gene))
            .record_outcome(target, kind);
    }

    /// Folds one evaluated mutation into the record of `site`.
    ///
    /// `watched` are the targets the caller cares about (typically the not
    /// yet covered ones); those the mutation did not move are counted as
    /// no-impact.
    pub fn record_mutation(
        &mut self,
        site: MutationSite,
        changes: &TargetChanges,
        watched: &BTreeSet<TargetId>,
    ) {
        let impact = self.record_for(site);
        impact.times_to_manipulate += 1;
        if changes.impacted.is_empty() {
            impact.times_of_no_impact += 1;
        }
        if !changes.improved.is_empty() {
            impact.times_of_improving_manipulation += 1;
        }
        for t in changes.impacted.iter() {
            let kind = if changes.improved.contains(t) {
                OutcomeKind::Improved
            } else {
                OutcomeKind::ImpactedButNotImproved
            };
            impact.record_outcome(*t, kind);
        }
        for t in watched.difference(&changes.impacted) {
            impact.record_outcome(*t, OutcomeKind::NoImpact);
        }
    }

    pub fn impact(&self, gene: GeneId) -> Option<&Impact> {
        self.genes.get(&gene)
    }

    pub fn structure_impact(&self) -> &Impact {
        &self.structure
    }

    /// Selection weight of one gene. Explored genes score their smoothed
    /// improvement ratio; unexplored genes score as high as the best
    /// explored one, so they keep getting picked until tried.
    pub fn selection_weight(&self, gene: GeneId) -> f64 {
        match self.genes.get(&gene) {
            Some(impact) if impact.times_to_manipulate > 0 => impact.improvement_ratio(),
            _ => self.unexplored_weight(),
        }
    }

    fn unexplored_weight(&self) -> f64 {
        self.genes
            .values()
            .filter(|i| i.times_to_manipulate > 0)
            .map(Impact::improvement_ratio)
            .fold(None, |acc: Option<f64>, w| Some(acc.map_or(w, |a| a.max(w))))
            .unwrap_or(UNEXPLORED_DEFAULT_WEIGHT)
    }

    pub fn selection_weights(&self, genes: &[GeneId]) -> Vec<f64> {
        let unexplored = self.unexplored_weight();
        genes
            .iter()
            .map(|g| match self.genes.get(g) {
                Some(impact) if impact.times_to_manipulate > 0 => impact.improvement_ratio(),
                _ => unexplored,
            })
            .collect()
    }

    /// Drops the records of genes not in `live`.
    pub fn sync_with(&mut self, live: &BTreeSet<GeneId>) {
        self.genes.retain(|id, _| live.contains(id));
    }

    pub fn tracked_genes(&self) -> usize {
        self.genes.len()
    }

    /// Genes whose mutation ever moved a target.
    pub fn impactful_genes(&self) -> Vec<GeneId> {
        self.genes
            .iter()
            .filter(|(_, i)| i.has_impact())
            .map(|(g, _)| *g)
            .collect()
    }
}
