//! The line-oriented text example format.
//!
//! One example per line:
//!
//! ```text
//! [label tokens] ['tag] |namespace feature[:value] ... |namespace2 ...
//! ```
//!
//! Label tokens before the first `|` are handed to the configured label
//! kind's parser. A token starting with `'` is the example tag. Each `|`
//! opens a namespace whose name is the token glued to the bar (`|user`);
//! a bare `|` opens the default namespace. Features are `name` (value 1)
//! or `name:value`.
//!
//! An empty line is the group separator for multi-example tasks.
//!
//! Per-example problems (a malformed label, an unparsable feature value)
//! are recovered locally: a diagnostic is logged, the example is degraded
//! (test-only, or the feature skipped) and parsing continues. Nothing here
//! aborts the run.

use tracing::warn;

use cascade_core::example::LabelType;
use cascade_core::hashing::{hash_feature, hash_namespace, HashFamily};
use cascade_core::Example;

/// Namespace index used when a `|` introduces no name.
pub const DEFAULT_NAMESPACE: u8 = b' ';

/// Parser configuration and running state.
#[derive(Debug, Clone)]
pub struct TextParser {
    family: HashFamily,
    label_type: LabelType,
    noconstant: bool,
    audit: bool,
    examples_parsed: u64,
}

impl TextParser {
    pub fn new(family: HashFamily, label_type: LabelType, noconstant: bool, audit: bool) -> Self {
        Self {
            family,
            label_type,
            noconstant,
            audit,
            examples_parsed: 0,
        }
    }

    /// Number of examples parsed so far.
    pub fn examples_parsed(&self) -> u64 {
        self.examples_parsed
    }

    /// Fills `ex` from one input line.
    ///
    /// The example comes out finalized (constant feature added, caches
    /// computed) and ready for the learner stack.
    pub fn parse_line(&mut self, line: &str, ex: &mut Example) {
        ex.reset();
        self.examples_parsed += 1;
        ex.example_number = self.examples_parsed;

        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.trim().is_empty() {
            ex.is_newline = true;
            return;
        }

        let mut sections = trimmed.split('|');
        let header = sections.next().unwrap_or("");

        let mut label_tokens: Vec<&str> = Vec::new();
        for tok in header.split_whitespace() {
            if let Some(tag) = tok.strip_prefix('\'') {
                ex.tag = tag.as_bytes().to_vec();
            } else {
                label_tokens.push(tok);
            }
        }
        match self.label_type.parse(&label_tokens) {
            Ok(label) => ex.label = label,
            Err(err) => {
                warn!(example = ex.example_number, %err, "malformed label; treating example as test-only");
                ex.test_only = true;
            }
        }

        for section in sections {
            self.parse_namespace(section, ex);
        }
        ex.finalize(self.noconstant, self.audit);
    }

    fn parse_namespace(&self, section: &str, ex: &mut Example) {
        let mut tokens = section.split_whitespace();
        let (ns_index, seed, first_feature) = if section.starts_with(char::is_whitespace)
            || section.is_empty()
        {
            (DEFAULT_NAMESPACE, 0u64, None)
        } else {
            let name = tokens.next().unwrap_or("");
            (name.as_bytes()[0], hash_namespace(name), None::<&str>)
        };
        let features = ex.namespace_mut(ns_index);
        if self.audit {
            features.enable_audit();
        }
        for tok in first_feature.into_iter().chain(tokens) {
            let (name, value) = match tok.split_once(':') {
                Some((name, value_text)) => match value_text.parse::<f32>() {
                    Ok(v) => (name, v),
                    Err(_) => {
                        warn!(token = tok, "unparsable feature value; skipping feature");
                        continue;
                    }
                },
                None => (tok, 1.0),
            };
            let index = hash_feature(self.family, name, seed);
            if self.audit {
                features.add_named(value, index, name);
            } else {
                features.add(value, index);
            }
        }
    }
}
