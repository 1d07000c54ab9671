//! The example data model: labels, predictions, and the per-example record.
//!
//! An [`Example`] is the unit of work flowing through the learner stack. It
//! owns one sparse [`Features`] vector per active namespace, a [`Label`]
//! variant, and a [`Prediction`] variant written by whichever reduction sits
//! on top of the stack.
//!
//! Ownership: the parser or builder that creates an example owns it until it
//! is handed back to its pool; the learner stack only reads, mutates, and
//! forwards.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::features::Features;
use crate::hashing::{CONSTANT_HASH, CONSTANT_NAMESPACE};

/// One class/cost entry of a cost-sensitive label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wclass {
    /// Cost of predicting this class.
    pub cost: f32,
    /// Class identifier, 1-based.
    pub class: u32,
    /// Scratch slot the cost-sensitive reduction fills with its per-class
    /// regressor output.
    pub partial_prediction: f32,
}

/// One action/cost/probability entry of a contextual-bandit label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CbClass {
    /// Observed cost for the logged action.
    pub cost: f32,
    /// Action identifier, 1-based.
    pub action: u32,
    /// Probability with which the logging policy chose the action.
    pub probability: f32,
}

/// The closed set of label kinds understood by the pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Label {
    /// No ground truth: pure-prediction mode for this example.
    #[default]
    None,
    /// Regression label with importance weight and initial prediction offset.
    Simple {
        label: f32,
        weight: f32,
        initial: f32,
    },
    /// Single class id, 1-based, with importance weight.
    Multiclass { class: u32, weight: f32 },
    /// Cost-sensitive multiclass: one cost per candidate class.
    CostSensitive { costs: Vec<Wclass> },
    /// Set of class ids.
    Multilabel { classes: Vec<u32> },
    /// Contextual bandit: observed action/cost/probability triplets.
    ContextualBandit { costs: Vec<CbClass> },
}

/// Which label kind a configured stack expects from the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LabelType {
    #[default]
    Simple,
    Multiclass,
    CostSensitive,
    Multilabel,
    ContextualBandit,
}

impl LabelType {
    /// The default (unlabeled) label for this kind.
    pub fn default_label(&self) -> Label {
        Label::None
    }

    /// Parses a label from whitespace-split tokens.
    ///
    /// An empty token list yields [`Label::None`] (test example). Malformed
    /// tokens are a recoverable per-example error: the caller is expected to
    /// treat the example as test-only and continue.
    pub fn parse(&self, tokens: &[&str]) -> Result<Label> {
        if tokens.is_empty() {
            return Ok(Label::None);
        }
        match self {
            LabelType::Simple => {
                let label: f32 = parse_num(tokens[0])?;
                let weight = match tokens.get(1) {
                    Some(t) => parse_num(t)?,
                    None => 1.0,
                };
                let initial = match tokens.get(2) {
                    Some(t) => parse_num(t)?,
                    None => 0.0,
                };
                Ok(Label::Simple {
                    label,
                    weight,
                    initial,
                })
            }
            LabelType::Multiclass => {
                let class: u32 = parse_num(tokens[0])?;
                let weight = match tokens.get(1) {
                    Some(t) => parse_num(t)?,
                    None => 1.0,
                };
                if class == 0 {
                    return Err(CoreError::MalformedLabel {
                        message: "multiclass ids are 1-based".to_string(),
                    });
                }
                Ok(Label::Multiclass { class, weight })
            }
            LabelType::CostSensitive => {
                let mut costs = Vec::with_capacity(tokens.len());
                for tok in tokens {
                    let (class, cost) = tok.split_once(':').ok_or_else(|| {
                        CoreError::MalformedLabel {
                            message: format!("expected class:cost, got {tok}"),
                        }
                    })?;
                    costs.push(Wclass {
                        class: parse_num(class)?,
                        cost: parse_num(cost)?,
                        partial_prediction: 0.0,
                    });
                }
                Ok(Label::CostSensitive { costs })
            }
            LabelType::Multilabel => {
                let mut classes = Vec::new();
                for tok in tokens[0].split(',') {
                    classes.push(parse_num(tok)?);
                }
                Ok(Label::Multilabel { classes })
            }
            LabelType::ContextualBandit => {
                let mut costs = Vec::with_capacity(tokens.len());
                for tok in tokens {
                    let mut parts = tok.split(':');
                    let action = parts.next().unwrap_or("");
                    let cost = parts.next().ok_or_else(|| CoreError::MalformedLabel {
                        message: format!("expected action:cost:prob, got {tok}"),
                    })?;
                    let prob = parts.next().ok_or_else(|| CoreError::MalformedLabel {
                        message: format!("expected action:cost:prob, got {tok}"),
                    })?;
                    costs.push(CbClass {
                        action: parse_num(action)?,
                        cost: parse_num(cost)?,
                        probability: parse_num(prob)?,
                    });
                }
                Ok(Label::ContextualBandit { costs })
            }
        }
    }
}

fn parse_num<T: std::str::FromStr>(tok: &str) -> Result<T> {
    tok.parse().map_err(|_| CoreError::MalformedLabel {
        message: format!("cannot parse token: {tok}"),
    })
}

impl Label {
    /// Importance weight used by every learner when scaling a gradient step.
    pub fn weight(&self) -> f32 {
        match self {
            Label::Simple { weight, .. } => *weight,
            Label::Multiclass { weight, .. } => *weight,
            _ => 1.0,
        }
    }

    /// Initial prediction offset supplied with the label, if any.
    pub fn initial(&self) -> f32 {
        match self {
            Label::Simple { initial, .. } => *initial,
            _ => 0.0,
        }
    }

    /// True iff no ground truth is present.
    pub fn is_test(&self) -> bool {
        match self {
            Label::None => true,
            Label::CostSensitive { costs } => costs.is_empty(),
            Label::ContextualBandit { costs } => costs.is_empty(),
            _ => false,
        }
    }
}

/// The closed set of prediction kinds a reduction may write.
///
/// Each reduction's predict operation writes exactly one variant consistent
/// with its declared output type; the next-higher reduction is responsible
/// for knowing which variant its base produces.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Prediction {
    #[default]
    None,
    /// A single scalar (the GD-family base output).
    Scalar(f32),
    /// One scalar per sub-model (multipredict output).
    Scalars(Vec<f32>),
    /// Predicted class id, 1-based.
    Multiclass(u32),
    /// Predicted set of class ids.
    Multilabels(Vec<u32>),
    /// Scored actions, best first.
    ActionScores(Vec<(u32, f32)>),
    /// A probability in [0, 1].
    Prob(f32),
}

impl Prediction {
    /// The scalar value, if this prediction is scalar-kinded.
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Prediction::Scalar(v) | Prediction::Prob(v) => Some(*v),
            _ => None,
        }
    }

    /// Copies a scalar-list prediction into a caller-supplied buffer.
    ///
    /// On success returns the number of elements written. If the buffer is
    /// too small the destination is left untouched and
    /// [`CoreError::InsufficientBuffer`] reports the required size.
    pub fn copy_scalars_into(&self, dst: &mut [f32]) -> Result<usize> {
        let src: &[f32] = match self {
            Prediction::Scalars(v) => v,
            Prediction::Scalar(v) => std::slice::from_ref(v),
            _ => &[],
        };
        if dst.len() < src.len() {
            return Err(CoreError::InsufficientBuffer {
                required: src.len(),
                capacity: dst.len(),
            });
        }
        dst[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }
}

/// The per-example mutable record.
#[derive(Debug, Clone)]
pub struct Example {
    /// Active namespace indices in ascending order after [`Example::finalize`].
    indices: Vec<u8>,
    /// One feature vector per namespace index.
    namespaces: Vec<Features>,
    /// Ground-truth label.
    pub label: Label,
    /// Prediction written by the top of the stack.
    pub pred: Prediction,
    /// Opaque tag carried from the input.
    pub tag: Vec<u8>,
    /// Additive weight-index offset applied by reductions around base calls.
    pub ft_offset: u64,
    /// Marks an empty separator example delimiting multi-example groups.
    pub is_newline: bool,
    /// Set when the label was malformed; the example must not update weights.
    pub test_only: bool,
    /// Cached feature count, valid after [`Example::finalize`].
    pub num_features: usize,
    /// Cached sum of squared values, valid after [`Example::finalize`].
    pub total_sum_sq: f32,
    /// Running example number, assigned by the parser.
    pub example_number: u64,
}

impl Default for Example {
    fn default() -> Self {
        Self::new()
    }
}

impl Example {
    /// Creates an empty example with all 256 namespace slots allocated.
    pub fn new() -> Self {
        Self {
            indices: Vec::new(),
            namespaces: (0..256).map(|_| Features::new()).collect(),
            label: Label::None,
            pred: Prediction::None,
            tag: Vec::new(),
            ft_offset: 0,
            is_newline: false,
            test_only: false,
            num_features: 0,
            total_sum_sq: 0.0,
            example_number: 0,
        }
    }

    /// Active namespace indices.
    #[inline]
    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    /// Read access to one namespace's features.
    #[inline]
    pub fn features(&self, ns: u8) -> &Features {
        &self.namespaces[ns as usize]
    }

    /// Mutable access to one namespace's features, activating the namespace
    /// on first touch. Re-activation of an already-active index is a no-op:
    /// the active set holds each index at most once.
    pub fn namespace_mut(&mut self, ns: u8) -> &mut Features {
        if !self.indices.contains(&ns) {
            self.indices.push(ns);
        }
        &mut self.namespaces[ns as usize]
    }

    /// Importance weight of this example.
    #[inline]
    pub fn weight(&self) -> f32 {
        self.label.weight()
    }

    /// True when this example must not update weights.
    #[inline]
    pub fn is_test(&self) -> bool {
        self.test_only || self.label.is_test()
    }

    /// Computes derived caches and applies global feature setup.
    ///
    /// Adds the constant (bias) feature unless `noconstant`, sorts the active
    /// namespace set ascending so iteration order is reproducible, and fills
    /// the feature-count and sum-of-squares caches.
    pub fn finalize(&mut self, noconstant: bool, audit: bool) {
        if !noconstant && !self.is_newline {
            let constant = self.namespace_mut(CONSTANT_NAMESPACE);
            if audit {
                constant.enable_audit();
                constant.add_named(1.0, CONSTANT_HASH, "Constant");
            } else {
                constant.add(1.0, CONSTANT_HASH);
            }
        }
        self.indices.sort_unstable();
        self.num_features = 0;
        self.total_sum_sq = 0.0;
        for &ns in &self.indices {
            let fs = &self.namespaces[ns as usize];
            self.num_features += fs.len();
            self.total_sum_sq += fs.sum_sq();
        }
    }

    /// Clears the example for pool reuse, keeping namespace allocations.
    pub fn reset(&mut self) {
        for &ns in &self.indices {
            self.namespaces[ns as usize].clear();
        }
        self.indices.clear();
        self.label = Label::None;
        self.pred = Prediction::None;
        self.tag.clear();
        self.ft_offset = 0;
        self.is_newline = false;
        self.test_only = false;
        self.num_features = 0;
        self.total_sum_sq = 0.0;
        self.example_number = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_label_parse() {
        let label = LabelType::Simple.parse(&["1.5", "2.0", "0.5"]).unwrap();
        assert_eq!(
            label,
            Label::Simple {
                label: 1.5,
                weight: 2.0,
                initial: 0.5
            }
        );
        assert_eq!(label.weight(), 2.0);
        assert_eq!(label.initial(), 0.5);
        assert!(!label.is_test());
    }

    #[test]
    fn test_empty_tokens_mean_test() {
        let label = LabelType::Simple.parse(&[]).unwrap();
        assert!(label.is_test());
    }

    #[test]
    fn test_multiclass_label_rejects_zero() {
        assert!(LabelType::Multiclass.parse(&["0"]).is_err());
        let label = LabelType::Multiclass.parse(&["3"]).unwrap();
        assert_eq!(label, Label::Multiclass { class: 3, weight: 1.0 });
    }

    #[test]
    fn test_cost_sensitive_parse() {
        let label = LabelType::CostSensitive.parse(&["1:0.5", "2:1.0"]).unwrap();
        match label {
            Label::CostSensitive { costs } => {
                assert_eq!(costs.len(), 2);
                assert_eq!(costs[0].class, 1);
                assert!((costs[1].cost - 1.0).abs() < 1e-6);
            }
            other => panic!("unexpected label: {other:?}"),
        }
    }

    #[test]
    fn test_cb_label_parse() {
        let label = LabelType::ContextualBandit
            .parse(&["2:0.5:0.25"])
            .unwrap();
        match label {
            Label::ContextualBandit { costs } => {
                assert_eq!(costs[0].action, 2);
                assert!((costs[0].probability - 0.25).abs() < 1e-6);
            }
            other => panic!("unexpected label: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_label_is_error() {
        assert!(LabelType::Simple.parse(&["not-a-number"]).is_err());
        assert!(LabelType::CostSensitive.parse(&["nocolon"]).is_err());
    }

    #[test]
    fn test_namespace_dedup() {
        let mut ex = Example::new();
        ex.namespace_mut(b'a').add(1.0, 1);
        ex.namespace_mut(b'a').add(1.0, 2);
        assert_eq!(ex.indices(), &[b'a']);
        assert_eq!(ex.features(b'a').len(), 2);
    }

    #[test]
    fn test_finalize_adds_constant_and_caches() {
        let mut ex = Example::new();
        ex.namespace_mut(b'x').add(2.0, 7);
        ex.finalize(false, false);
        assert_eq!(ex.num_features, 2);
        assert!((ex.total_sum_sq - 5.0).abs() < 1e-6);
        assert!(ex.indices().contains(&CONSTANT_NAMESPACE));

        let mut bare = Example::new();
        bare.namespace_mut(b'x').add(2.0, 7);
        bare.finalize(true, false);
        assert_eq!(bare.num_features, 1);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut ex = Example::new();
        ex.namespace_mut(b'x').add(1.0, 1);
        ex.label = Label::Simple {
            label: 1.0,
            weight: 1.0,
            initial: 0.0,
        };
        ex.finalize(false, false);
        ex.reset();
        assert!(ex.indices().is_empty());
        assert_eq!(ex.label, Label::None);
        assert_eq!(ex.num_features, 0);
    }

    #[test]
    fn test_copy_scalars_insufficient_buffer() {
        let pred = Prediction::Scalars(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut dst = [9.0f32; 2];
        let err = pred.copy_scalars_into(&mut dst).unwrap_err();
        match err {
            CoreError::InsufficientBuffer { required, capacity } => {
                assert_eq!(required, 5);
                assert_eq!(capacity, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Destination untouched, no partial copy.
        assert_eq!(dst, [9.0, 9.0]);

        let mut big = [0.0f32; 8];
        assert_eq!(pred.copy_scalars_into(&mut big).unwrap(), 5);
        assert_eq!(&big[..5], &[1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}
