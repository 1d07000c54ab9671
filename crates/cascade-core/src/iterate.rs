//! The feature iteration protocol.
//!
//! [`foreach_feature`] is the single walk every learning algorithm uses to
//! see an example's features: raw single-namespace features first, then every
//! interaction feature generated lazily from the declared namespace tuples.
//! Interaction features are never materialized into a persistent vector; they
//! are produced one at a time inside the walk, so a quadratic term over large
//! namespaces costs no persistent memory.
//!
//! The visit order is fixed and reproducible: active namespaces in ascending
//! index order for singles, then interaction terms in declaration order, each
//! expanded outer-to-inner with strictly-increasing positions for adjacent
//! same-namespace factors. Floating-point accumulation order follows visit
//! order, so order stability across runs is part of this contract.

use crate::example::Example;
use crate::hashing::combine;
use crate::interactions::{InteractionSpec, WILDCARD};
use crate::weights::WeightStore;

/// Per-call parameters of an iteration: the interaction set, the sub-model
/// multiplier claimed by the reduction stack, and the example's additive
/// offset. The logical weight index handed to the visitor is
/// `raw * num_models + ft_offset`; masking is the weight store's job.
#[derive(Debug, Clone, Copy)]
pub struct IterationScope<'a> {
    pub interactions: &'a InteractionSpec,
    pub num_models: u64,
}

impl<'a> IterationScope<'a> {
    pub fn new(interactions: &'a InteractionSpec, num_models: u64) -> Self {
        Self {
            interactions,
            num_models,
        }
    }

    #[inline]
    fn transform(&self, raw: u64, ft_offset: u64) -> u64 {
        raw.wrapping_mul(self.num_models).wrapping_add(ft_offset)
    }
}

/// Invokes `visitor(value, weight_index)` once per expanded feature.
pub fn foreach_feature<F: FnMut(f32, u64)>(scope: IterationScope<'_>, ex: &Example, mut visitor: F) {
    walk(scope, ex, &mut |value, raw| {
        visitor(value, scope.transform(raw, ex.ft_offset))
    });
}

/// Like [`foreach_feature`], additionally returning the number of expanded
/// features visited. Used for diagnostics and feature-budget accounting.
pub fn foreach_feature_counted<F: FnMut(f32, u64)>(
    scope: IterationScope<'_>,
    ex: &Example,
    mut visitor: F,
) -> usize {
    let mut count = 0usize;
    walk(scope, ex, &mut |value, raw| {
        count += 1;
        visitor(value, scope.transform(raw, ex.ft_offset))
    });
    count
}

/// Audit walk: also hands the visitor a human-readable feature name.
///
/// Names come from the per-namespace audit arrays when materialized; cross
/// features get `a^f*b^g`-style synthesized names. Only the audit path pays
/// for the string building.
pub fn foreach_feature_named<F: FnMut(f32, u64, String)>(
    scope: IterationScope<'_>,
    ex: &Example,
    mut visitor: F,
) {
    for &ns in ex.indices() {
        let fs = ex.features(ns);
        for pos in 0..fs.len() {
            let f = fs.get(pos);
            let name = feature_name(ex, ns, pos);
            visitor(f.value, scope.transform(f.index, ex.ft_offset), name);
        }
    }
    for term in scope.interactions.terms() {
        expand_wildcards_named(scope, ex, term, 0, &mut Vec::new(), &mut visitor);
    }
}

/// The base linear prediction: accumulates `value * weight[index, slot 0]`
/// over every expanded feature, plus the label-supplied initial offset.
pub fn inline_predict(
    weights: &mut WeightStore,
    scope: IterationScope<'_>,
    ex: &Example,
) -> f32 {
    let mut acc = ex.label.initial();
    foreach_feature(scope, ex, |value, index| {
        acc += value * weights.get(index, 0);
    });
    acc
}

fn walk<F: FnMut(f32, u64)>(scope: IterationScope<'_>, ex: &Example, visitor: &mut F) {
    for &ns in ex.indices() {
        for f in ex.features(ns).iter() {
            visitor(f.value, f.index);
        }
    }
    for term in scope.interactions.terms() {
        expand_wildcards(ex, term, 0, &mut Vec::new(), visitor);
    }
}

/// Replaces wildcard positions with every active namespace, in active order,
/// then generates the concrete tuple.
fn expand_wildcards<F: FnMut(f32, u64)>(
    ex: &Example,
    term: &[u8],
    depth: usize,
    concrete: &mut Vec<u8>,
    visitor: &mut F,
) {
    if depth == term.len() {
        generate(ex, concrete, 0, 0, 1.0, 0, visitor);
        return;
    }
    if term[depth] == WILDCARD {
        let active: Vec<u8> = ex.indices().to_vec();
        for ns in active {
            concrete.push(ns);
            expand_wildcards(ex, term, depth + 1, concrete, visitor);
            concrete.pop();
        }
    } else {
        concrete.push(term[depth]);
        expand_wildcards(ex, term, depth + 1, concrete, visitor);
        concrete.pop();
    }
}

/// Generates every combination of one feature per tuple factor.
///
/// `start` enforces strictly-increasing positions when a factor repeats the
/// factor immediately above it, which avoids double counting self-crosses.
fn generate<F: FnMut(f32, u64)>(
    ex: &Example,
    tuple: &[u8],
    depth: usize,
    start: usize,
    acc_value: f32,
    acc_index: u64,
    visitor: &mut F,
) {
    if depth == tuple.len() {
        visitor(acc_value, acc_index);
        return;
    }
    let fs = ex.features(tuple[depth]);
    for pos in start..fs.len() {
        let f = fs.get(pos);
        let index = if depth == 0 {
            f.index
        } else {
            combine(acc_index, f.index)
        };
        let next_start = if depth + 1 < tuple.len() && tuple[depth + 1] == tuple[depth] {
            pos + 1
        } else {
            0
        };
        generate(
            ex,
            tuple,
            depth + 1,
            next_start,
            acc_value * f.value,
            index,
            visitor,
        );
    }
}

fn feature_name(ex: &Example, ns: u8, pos: usize) -> String {
    let fs = ex.features(ns);
    match fs.name(pos) {
        Some(name) if !name.is_empty() => {
            format!("{}^{}", ns as char, name)
        }
        _ => format!("{}^{}", ns as char, fs.get(pos).index),
    }
}

fn expand_wildcards_named<F: FnMut(f32, u64, String)>(
    scope: IterationScope<'_>,
    ex: &Example,
    term: &[u8],
    depth: usize,
    concrete: &mut Vec<u8>,
    visitor: &mut F,
) {
    if depth == term.len() {
        generate_named(scope, ex, concrete, 0, 0, 1.0, 0, &mut Vec::new(), visitor);
        return;
    }
    if term[depth] == WILDCARD {
        let active: Vec<u8> = ex.indices().to_vec();
        for ns in active {
            concrete.push(ns);
            expand_wildcards_named(scope, ex, term, depth + 1, concrete, visitor);
            concrete.pop();
        }
    } else {
        concrete.push(term[depth]);
        expand_wildcards_named(scope, ex, term, depth + 1, concrete, visitor);
        concrete.pop();
    }
}

#[allow(clippy::too_many_arguments)]
fn generate_named<F: FnMut(f32, u64, String)>(
    scope: IterationScope<'_>,
    ex: &Example,
    tuple: &[u8],
    depth: usize,
    start: usize,
    acc_value: f32,
    acc_index: u64,
    parts: &mut Vec<String>,
    visitor: &mut F,
) {
    if depth == tuple.len() {
        visitor(
            acc_value,
            scope.transform(acc_index, ex.ft_offset),
            parts.join("*"),
        );
        return;
    }
    let fs = ex.features(tuple[depth]);
    for pos in start..fs.len() {
        let f = fs.get(pos);
        let index = if depth == 0 {
            f.index
        } else {
            combine(acc_index, f.index)
        };
        let next_start = if depth + 1 < tuple.len() && tuple[depth + 1] == tuple[depth] {
            pos + 1
        } else {
            0
        };
        parts.push(feature_name(ex, tuple[depth], pos));
        generate_named(
            scope,
            ex,
            tuple,
            depth + 1,
            next_start,
            acc_value * f.value,
            index,
            parts,
            visitor,
        );
        parts.pop();
    }
}
