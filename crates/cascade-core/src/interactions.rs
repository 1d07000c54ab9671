//! Namespace interaction specifications.
//!
//! An interaction term is an ordered tuple of namespace letters, e.g. `"ab"`
//! crosses every feature of namespace `a` with every feature of namespace
//! `b`, and `"aa"` crosses namespace `a` with itself (restricted to
//! strictly-increasing feature positions to avoid double counting). The
//! wildcard `:` stands for every active namespace of the example it is
//! applied to and is expanded at iteration time.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Wildcard marker inside an interaction term.
pub const WILDCARD: u8 = b':';

/// Maximum arity of an interaction term.
pub const MAX_INTERACTION_ARITY: usize = 4;

/// A parsed, validated set of interaction terms, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionSpec {
    terms: Vec<Vec<u8>>,
}

impl InteractionSpec {
    /// An empty spec: only single-namespace features are iterated.
    pub fn none() -> Self {
        Self::default()
    }

    /// Parses interaction terms as written on the command line.
    ///
    /// Each string is one term; each byte of the string names a namespace by
    /// its leading letter, or is the wildcard `:`.
    pub fn parse(terms: &[String]) -> Result<Self> {
        let mut parsed = Vec::with_capacity(terms.len());
        for term in terms {
            let bytes = term.as_bytes();
            if bytes.len() < 2 || bytes.len() > MAX_INTERACTION_ARITY {
                return Err(CoreError::InvalidInteraction { term: term.clone() });
            }
            parsed.push(bytes.to_vec());
        }
        Ok(Self { terms: parsed })
    }

    /// The declared terms, in declaration order.
    #[inline]
    pub fn terms(&self) -> &[Vec<u8>] {
        &self.terms
    }

    /// True when no interaction terms are declared.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}
