//! Composite query construction.

use std::collections::HashSet;

use crate::models::AutomationConfig;

/// Builds the executed query from the config's base keywords and any
/// profile-derived terms.
///
/// A pending suggested query is deliberately invisible here: it only becomes
/// the active query through the explicit acceptance operation on the
/// automation repository.
pub struct QueryBuilder {
    base: String,
    terms: Vec<String>,
    max_terms: usize,
}

impl QueryBuilder {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim().to_string(),
            terms: Vec::new(),
            max_terms: 6,
        }
    }

    pub fn from_config(config: &AutomationConfig) -> Self {
        Self::new(&config.query).with_profile_terms(&config.profile_terms)
    }

    pub fn with_profile_terms(mut self, terms: &[String]) -> Self {
        self.terms = terms.to_vec();
        self
    }

    pub fn max_terms(mut self, max: usize) -> Self {
        self.max_terms = max;
        self
    }

    /// Base keywords followed by deduplicated profile terms, skipping terms
    /// the base already mentions.
    pub fn build(&self) -> String {
        let mut query = self.base.clone();
        let base_lower = self.base.to_lowercase();
        let mut seen: HashSet<String> = HashSet::new();

        for term in &self.terms {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let lower = term.to_lowercase();
            if base_lower.contains(&lower) || !seen.insert(lower) {
                continue;
            }
            if seen.len() > self.max_terms {
                break;
            }
            query.push(' ');
            query.push_str(term);
        }

        query.trim().to_string()
    }
}
