// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use blake3::Hasher;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::fitness::FitnessValue;
use crate::gene::{Gene, GeneId, GeneIdAllocator};
use crate::impact::ImpactTracker;
use crate::SearchRng;

/// One call against the SUT, e.g. an HTTP request, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub genes: Vec<Gene>,
}

impl Action {
    pub fn new(name: &str, genes: Vec<Gene>) -> Self {
        Action {
            name: name.to_string(),
            genes,
        }
    }

    pub fn gene(&self, name: &str) -> Option<&Gene> {
        self.genes.iter().find(|g| g.name == name)
    }

    fn assign_ids(&mut self, ids: &mut GeneIdAllocator) {
        self.genes.iter_mut().for_each(|g| g.assign_ids(ids));
    }

    fn randomize(&mut self, rng: &mut SearchRng, ids: &mut GeneIdAllocator) {
        self.genes.iter_mut().for_each(|g| g.randomize(rng, ids));
    }
}

/// A candidate test: initialization actions (e.g. database setup) followed
/// by the main action sequence. Only main actions count towards `size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    init_actions: Vec<Action>,
    actions: Vec<Action>,
    ids: GeneIdAllocator,
}

/// What a structural mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureChange {
    Added { index: usize },
    Removed { index: usize },
}

impl Individual {
    /// Builds an individual from action templates, giving every gene a
    /// fresh id.
    pub fn new(init_actions: Vec<Action>, actions: Vec<Action>) -> Self {
        let mut ind = Individual {
            init_actions,
            actions,
            ids: GeneIdAllocator::default(),
        };
        let Individual {
            init_actions,
            actions,
            ids,
        } = &mut ind;
        init_actions
            .iter_mut()
            .chain(actions.iter_mut())
            .for_each(|a| a.assign_ids(ids));
        ind
    }

    pub fn init_actions(&self) -> &[Action] {
        &self.init_actions
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of main actions.
    pub fn size(&self) -> usize {
        self.actions.len()
    }

    fn all_actions(&self) -> impl Iterator<Item = &Action> {
        self.init_actions.iter().chain(self.actions.iter())
    }

    /// Randomizes every gene value in place.
    pub fn randomize(&mut self, rng: &mut SearchRng) {
        let Individual {
            init_actions,
            actions,
            ids,
        } = self;
        init_actions
            .iter_mut()
            .chain(actions.iter_mut())
            .for_each(|a| a.randomize(rng, ids));
    }

    /// Ids of every gene a value mutation can target.
    pub fn mutable_genes(&self) -> Vec<GeneId> {
        let mut out = Vec::new();
        for a in self.all_actions() {
            a.genes.iter().for_each(|g| g.collect_mutable(&mut out));
        }
        out
    }

    pub fn gene_ids(&self) -> BTreeSet<GeneId> {
        let mut out = Vec::new();
        for a in self.all_actions() {
            a.genes.iter().for_each(|g| g.collect_ids(&mut out));
        }
        out.into_iter().collect()
    }

    pub fn find_gene(&self, id: GeneId) -> Option<&Gene> {
        self.all_actions()
            .flat_map(|a| a.genes.iter())
            .find_map(|g| g.find(id))
    }

    /// Mutates the gene with the given id. Returns false when the id is
    /// unknown or the mutation left the value unchanged.
    pub fn mutate_gene(&mut self, id: GeneId, rng: &mut SearchRng) -> bool {
        let Individual {
            init_actions,
            actions,
            ids,
        } = self;
        let gene = init_actions
            .iter_mut()
            .chain(actions.iter_mut())
            .flat_map(|a| a.genes.iter_mut())
            .find_map(|g| g.find_mut(id));
        match gene {
            Some(g) => g.mutate(rng, ids),
            None => false,
        }
    }

    /// Inserts `action` (a template) at a random position of the main
    /// sequence, with fresh gene ids and random values.
    pub fn add_action(&mut self, mut action: Action, rng: &mut SearchRng) -> StructureChange {
        action.assign_ids(&mut self.ids);
        action.randomize(rng, &mut self.ids);
        let index = rng.gen_range(0..=self.actions.len());
        self.actions.insert(index, action);
        StructureChange::Added { index }
    }

    /// Removes a random main action; never empties the sequence.
    pub fn remove_random_action(&mut self, rng: &mut SearchRng) -> Option<StructureChange> {
        if self.actions.len() <= 1 {
            return None;
        }
        let index = rng.gen_range(0..self.actions.len());
        self.actions.remove(index);
        Some(StructureChange::Removed { index })
    }

    /// Content hash over the action names and gene values; equal
    /// individuals (ignoring gene ids) hash equally.
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = Hasher::new();
        hasher.update(b"covsearch:individual");
        for (section, list) in [(0u8, &self.init_actions), (1u8, &self.actions)] {
            hasher.update(&[section]);
            for a in list.iter() {
                hasher.update(a.name.as_bytes());
                hasher.update(&[0]);
                for g in a.genes.iter() {
                    hash_gene(&mut hasher, g);
                }
            }
        }
        hasher.finalize()
    }
}

fn hash_gene(hasher: &mut Hasher, gene: &Gene) {
    use crate::gene::{GeneKind, ScalarValue};
    hasher.update(gene.name.as_bytes());
    match &gene.kind {
        GeneKind::Scalar(ScalarValue::Int { value, .. }) => {
            hasher.update(&[1]);
            hasher.update(&value.to_le_bytes());
        }
        GeneKind::Scalar(ScalarValue::Float { value, .. }) => {
            hasher.update(&[2]);
            hasher.update(&value.to_bits().to_le_bytes());
        }
        GeneKind::Scalar(ScalarValue::Bool(b)) => {
            hasher.update(&[3, *b as u8]);
        }
        GeneKind::Scalar(ScalarValue::Str { value, .. }) => {
            hasher.update(&[4]);
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        GeneKind::Object { fields } => {
            hasher.update(&[5]);
            hasher.update(&(fields.len() as u64).to_le_bytes());
            fields.iter().for_each(|g| hash_gene(hasher, g));
        }
        GeneKind::Array { elements, .. } => {
            hasher.update(&[6]);
            hasher.update(&(elements.len() as u64).to_le_bytes());
            elements.iter().for_each(|g| hash_gene(hasher, g));
        }
        GeneKind::Choice { active, options } => {
            hasher.update(&[7]);
            hasher.update(&(*active as u64).to_le_bytes());
            hash_gene(hasher, &options[*active]);
        }
    }
}

/// An individual together with the outcome of executing it.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluatedIndividual {
    pub individual: Individual,
    pub fitness: FitnessValue,
    /// Evaluation counter value when this was produced; lower is older.
    pub evaluation: u64,
    #[serde(skip)]
    pub impacts: ImpactTracker,
}

impl EvaluatedIndividual {
    pub fn new(individual: Individual, fitness: FitnessValue, evaluation: u64) -> Self {
        EvaluatedIndividual {
            individual,
            fitness,
            evaluation,
            impacts: ImpactTracker::default(),
        }
    }

    pub fn size(&self) -> usize {
        self.individual.size()
    }
}

/// Action templates the sampler draws from.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    pub actions: Vec<Action>,
    pub init_actions: Vec<Action>,
}

/// Source of brand-new individuals, and of single actions for structural
/// mutation.
pub trait Sampler {
    fn sample(&mut self, rng: &mut SearchRng) -> Individual;

    /// A fresh action template to insert into an existing individual;
    /// `None` disables structural mutation.
    fn sample_action(&mut self, _rng: &mut SearchRng) -> Option<Action> {
        None
    }
}

/// Builds individuals of `1..=max_actions` random catalog actions, with
/// every initialization template prepended.
pub struct RandomSampler {
    catalog: ActionCatalog,
    max_actions: usize,
}

impl RandomSampler {
    pub fn new(catalog: ActionCatalog, max_actions: usize) -> Self {
        assert!(
            !catalog.actions.is_empty(),
            "action catalog must contain at least one action"
        );
        RandomSampler {
            catalog,
            max_actions: max_actions.max(1),
        }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, rng: &mut SearchRng) -> Individual {
        let n = rng.gen_range(1..=self.max_actions);
        let actions: Vec<Action> = (0..n)
            .filter_map(|_| self.catalog.actions.choose(rng).cloned())
            .collect();
        let mut ind = Individual::new(self.catalog.init_actions.clone(), actions);
        ind.randomize(rng);
        ind
    }

    fn sample_action(&mut self, rng: &mut SearchRng) -> Option<Action> {
        self.catalog.actions.choose(rng).cloned()
    }
}
