// SPDX-License-Identifier: Apache-2.0

//! Typed, mutable parameter values of an action.
//!
//! Genes form a tree. Every node carries a `GeneId` handed out by the
//! owning individual's allocator; ids survive `Clone`, so impact records
//! keyed by id follow a gene from an individual to its mutated copies.

use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeneId(pub u32);

impl GeneId {
    /// Id carried by template genes that do not belong to an individual.
    pub const UNASSIGNED: GeneId = GeneId(u32::MAX);
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Arena-style id source owned by an individual.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneIdAllocator {
    next: u32,
}

impl GeneIdAllocator {
    pub fn fresh(&mut self) -> GeneId {
        let id = GeneId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Int { value: i64, min: i64, max: i64 },
    Float { value: f64, min: f64, max: f64 },
    Bool(bool),
    Str { value: String, max_len: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeneKind {
    Scalar(ScalarValue),
    Object {
        fields: Vec<Gene>,
    },
    Array {
        elements: Vec<Gene>,
        /// Shape of new elements; never part of the live tree.
        template: Box<Gene>,
        max_len: usize,
    },
    Choice {
        active: usize,
        options: Vec<Gene>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub id: GeneId,
    pub name: String,
    pub kind: GeneKind,
}

const STRING_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-";

/// Arrays start with at most this many elements when randomized.
const MAX_INITIAL_ARRAY_LEN: usize = 3;

/// Probability that a numeric mutation resamples instead of stepping.
const RESAMPLE_PROBABILITY: f64 = 0.1;

fn random_char<R: Rng + ?Sized>(rng: &mut R) -> char {
    STRING_ALPHABET[rng.gen_range(0..STRING_ALPHABET.len())] as char
}

/// A finite value in `[min, max]`. Ranges too wide for a uniform draw
/// (their width overflows `f64`) are sampled log-uniformly in magnitude.
fn sample_float<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    let lo = min.max(f64::MIN);
    let hi = max.min(f64::MAX);
    if lo == hi {
        return lo;
    }
    if (hi - lo).is_finite() {
        return rng.gen_range(lo..=hi);
    }
    let magnitude = 10f64.powf(rng.gen_range(-3.0..=308.0));
    let signed = if rng.gen_bool(0.5) { magnitude } else { -magnitude };
    signed.clamp(lo, hi)
}

impl Gene {
    fn template(name: &str, kind: GeneKind) -> Gene {
        Gene {
            id: GeneId::UNASSIGNED,
            name: name.to_string(),
            kind,
        }
    }

    pub fn int(name: &str, min: i64, max: i64) -> Gene {
        assert!(min <= max, "int gene {}: min {} > max {}", name, min, max);
        Gene::template(
            name,
            GeneKind::Scalar(ScalarValue::Int {
                value: min.max(0).min(max),
                min,
                max,
            }),
        )
    }

    pub fn float(name: &str, min: f64, max: f64) -> Gene {
        assert!(min <= max, "float gene {}: min {} > max {}", name, min, max);
        assert!(
            min <= f64::MAX && max >= f64::MIN,
            "float gene {}: no finite value in [{}, {}]",
            name,
            min,
            max
        );
        Gene::template(
            name,
            GeneKind::Scalar(ScalarValue::Float {
                value: min.max(0.0).min(max),
                min,
                max,
            }),
        )
    }

    pub fn boolean(name: &str) -> Gene {
        Gene::template(name, GeneKind::Scalar(ScalarValue::Bool(false)))
    }

    pub fn string(name: &str, max_len: usize) -> Gene {
        Gene::template(
            name,
            GeneKind::Scalar(ScalarValue::Str {
                value: String::new(),
                max_len,
            }),
        )
    }

    pub fn object(name: &str, fields: Vec<Gene>) -> Gene {
        Gene::template(name, GeneKind::Object { fields })
    }

    pub fn array(name: &str, template: Gene, max_len: usize) -> Gene {
        Gene::template(
            name,
            GeneKind::Array {
                elements: Vec::new(),
                template: Box::new(template),
                max_len,
            },
        )
    }

    pub fn choice(name: &str, options: Vec<Gene>) -> Gene {
        assert!(!options.is_empty(), "choice gene {} has no options", name);
        Gene::template(name, GeneKind::Choice { active: 0, options })
    }

    /// Gives this gene and every live descendant a fresh id.
    pub fn assign_ids(&mut self, ids: &mut GeneIdAllocator) {
        self.id = ids.fresh();
        match &mut self.kind {
            GeneKind::Scalar(_) => {}
            GeneKind::Object { fields } => fields.iter_mut().for_each(|g| g.assign_ids(ids)),
            GeneKind::Array { elements, .. } => {
                elements.iter_mut().for_each(|g| g.assign_ids(ids))
            }
            GeneKind::Choice { options, .. } => options.iter_mut().for_each(|g| g.assign_ids(ids)),
        }
    }

    fn new_array_element<R: Rng + ?Sized>(
        template: &Gene,
        rng: &mut R,
        ids: &mut GeneIdAllocator,
    ) -> Gene {
        let mut element = template.clone();
        element.assign_ids(ids);
        element.randomize(rng, ids);
        element
    }

    /// Replaces the value of this gene (and its descendants) with a random
    /// one within its constraints.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R, ids: &mut GeneIdAllocator) {
        match &mut self.kind {
            GeneKind::Scalar(ScalarValue::Int { value, min, max }) => {
                *value = rng.gen_range(*min..=*max);
            }
            GeneKind::Scalar(ScalarValue::Float { value, min, max }) => {
                *value = sample_float(rng, *min, *max);
            }
            GeneKind::Scalar(ScalarValue::Bool(b)) => *b = rng.gen_bool(0.5),
            GeneKind::Scalar(ScalarValue::Str { value, max_len }) => {
                let len = rng.gen_range(0..=*max_len);
                *value = (0..len).map(|_| random_char(rng)).collect();
            }
            GeneKind::Object { fields } => {
                fields.iter_mut().for_each(|g| g.randomize(rng, ids));
            }
            GeneKind::Array {
                elements,
                template,
                max_len,
            } => {
                let len = rng.gen_range(0..=(*max_len).min(MAX_INITIAL_ARRAY_LEN));
                *elements = (0..len)
                    .map(|_| Gene::new_array_element(template, rng, ids))
                    .collect();
            }
            GeneKind::Choice { active, options } => {
                *active = rng.gen_range(0..options.len());
                options.iter_mut().for_each(|g| g.randomize(rng, ids));
            }
        }
    }

    /// Whether `mutate` on this node can change anything.
    pub fn is_mutable(&self) -> bool {
        match &self.kind {
            GeneKind::Scalar(ScalarValue::Int { min, max, .. }) => min < max,
            GeneKind::Scalar(ScalarValue::Float { min, max, .. }) => min < max,
            GeneKind::Scalar(ScalarValue::Bool(_)) => true,
            GeneKind::Scalar(ScalarValue::Str { max_len, .. }) => *max_len > 0,
            GeneKind::Object { .. } => false,
            GeneKind::Array { max_len, .. } => *max_len > 0,
            GeneKind::Choice { options, .. } => options.len() > 1,
        }
    }

    /// Collects the ids of every node a value mutation can target. Only the
    /// active option of a choice is live.
    pub fn collect_mutable(&self, out: &mut Vec<GeneId>) {
        if self.is_mutable() {
            out.push(self.id);
        }
        match &self.kind {
            GeneKind::Scalar(_) => {}
            GeneKind::Object { fields } => fields.iter().for_each(|g| g.collect_mutable(out)),
            GeneKind::Array { elements, .. } => elements.iter().for_each(|g| g.collect_mutable(out)),
            GeneKind::Choice { active, options } => options[*active].collect_mutable(out),
        }
    }

    /// Collects every id in the live tree, mutable or not.
    pub fn collect_ids(&self, out: &mut Vec<GeneId>) {
        out.push(self.id);
        match &self.kind {
            GeneKind::Scalar(_) => {}
            GeneKind::Object { fields } => fields.iter().for_each(|g| g.collect_ids(out)),
            GeneKind::Array { elements, .. } => elements.iter().for_each(|g| g.collect_ids(out)),
            GeneKind::Choice { options, .. } => options.iter().for_each(|g| g.collect_ids(out)),
        }
    }

    pub fn find(&self, id: GeneId) -> Option<&Gene> {
        if self.id == id {
            return Some(self);
        }
        match &self.kind {
            GeneKind::Scalar(_) => None,
            GeneKind::Object { fields } => fields.iter().find_map(|g| g.find(id)),
            GeneKind::Array { elements, .. } => elements.iter().find_map(|g| g.find(id)),
            GeneKind::Choice { options, .. } => options.iter().find_map(|g| g.find(id)),
        }
    }

    pub fn find_mut(&mut self, id: GeneId) -> Option<&mut Gene> {
        if self.id == id {
            return Some(self);
        }
        match &mut self.kind {
            GeneKind::Scalar(_) => None,
            GeneKind::Object { fields } => fields.iter_mut().find_map(|g| g.find_mut(id)),
            GeneKind::Array { elements, .. } => elements.iter_mut().find_map(|g| g.find_mut(id)),
            GeneKind::Choice { options, .. } => options.iter_mut().find_map(|g| g.find_mut(id)),
        }
    }

    /// Applies one value-level mutation to this node. Returns false when
    /// the value did not change.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R, ids: &mut GeneIdAllocator) -> bool {
        match &mut self.kind {
            GeneKind::Scalar(ScalarValue::Int { value, min, max }) => {
                let before = *value;
                if rng.gen_bool(RESAMPLE_PROBABILITY) {
                    *value = rng.gen_range(*min..=*max);
                } else {
                    let magnitude = 1i128 << rng.gen_range(0..16);
                    let delta = if rng.gen_bool(0.5) { magnitude } else { -magnitude };
                    let stepped = (*value as i128 + delta).clamp(*min as i128, *max as i128);
                    *value = stepped as i64;
                }
                *value != before
            }
            GeneKind::Scalar(ScalarValue::Float { value, min, max }) => {
                let before = *value;
                if min == max {
                    return false;
                }
                if rng.gen_bool(RESAMPLE_PROBABILITY) {
                    *value = sample_float(rng, *min, *max);
                } else {
                    let scale = 10f64.powi(rng.gen_range(-2..=3));
                    let delta = rng.gen_range(-1.0..=1.0) * scale;
                    *value = (*value + delta).clamp(*min, *max);
                }
                *value != before
            }
            GeneKind::Scalar(ScalarValue::Bool(b)) => {
                *b = !*b;
                true
            }
            GeneKind::Scalar(ScalarValue::Str { value, max_len }) => {
                let before = value.clone();
                let mut chars: Vec<char> = value.chars().collect();
                let roll = rng.gen_range(0..3);
                if chars.is_empty() || (roll == 0 && chars.len() < *max_len) {
                    if chars.len() < *max_len {
                        let at = rng.gen_range(0..=chars.len());
                        chars.insert(at, random_char(rng));
                    }
                } else if roll == 1 {
                    let at = rng.gen_range(0..chars.len());
                    chars.remove(at);
                } else {
                    let at = rng.gen_range(0..chars.len());
                    chars[at] = random_char(rng);
                }
                *value = chars.into_iter().collect();
                *value != before
            }
            GeneKind::Object { .. } => false,
            GeneKind::Array {
                elements,
                template,
                max_len,
            } => {
                if *max_len == 0 {
                    return false;
                }
                let grow = elements.is_empty()
                    || (elements.len() < *max_len && rng.gen_bool(0.5));
                if grow {
                    let element = Gene::new_array_element(template, rng, ids);
                    let at = rng.gen_range(0..=elements.len());
                    elements.insert(at, element);
                } else {
                    let at = rng.gen_range(0..elements.len());
                    elements.remove(at);
                }
                true
            }
            GeneKind::Choice { active, options } => {
                let others: Vec<usize> = (0..options.len()).filter(|i| *i != *active).collect();
                match others.choose(rng) {
                    Some(next) => {
                        *active = *next;
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Number of live nodes in this tree.
    pub fn node_count(&self) -> usize {
        1 + match &self.kind {
            GeneKind::Scalar(_) => 0,
            GeneKind::Object { fields } => fields.iter().map(Gene::node_count).sum(),
            GeneKind::Array { elements, .. } => elements.iter().map(Gene::node_count).sum(),
            GeneKind::Choice { options, .. } => options.iter().map(Gene::node_count).sum(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.kind {
            GeneKind::Scalar(ScalarValue::Int { value, .. }) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &self.kind {
            GeneKind::Scalar(ScalarValue::Float { value, .. }) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.kind {
            GeneKind::Scalar(ScalarValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            GeneKind::Scalar(ScalarValue::Str { value, .. }) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Direct child with the given name (object fields only).
    pub fn field(&self, name: &str) -> Option<&Gene> {
        match &self.kind {
            GeneKind::Object { fields } => fields.iter().find(|g| g.name == name),
            _ => None,
        }
    }

    pub fn set_int(&mut self, new_value: i64) {
        if let GeneKind::Scalar(ScalarValue::Int { value, min, max }) = &mut self.kind {
            *value = new_value.clamp(*min, *max);
        }
    }

    /// Sets a string gene, truncated to its maximum length.
    pub fn set_str(&mut self, new_value: &str) {
        if let GeneKind::Scalar(ScalarValue::Str { value, max_len }) = &mut self.kind {
            *value = new_value.chars().take(*max_len).collect();
        }
    }
}
