//! Raw listing candidates returned by the search provider.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single listing as returned by the external listings provider, before
/// link validation, deduplication, or evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    #[serde(default)]
    pub organization: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub posted_date: Option<NaiveDate>,
}

impl Candidate {
    pub fn new(title: &str, organization: &str, url: &str) -> Self {
        Self {
            title: title.to_string(),
            organization: organization.to_string(),
            url: url.to_string(),
            snippet: String::new(),
            posted_date: None,
        }
    }

    pub fn with_snippet(mut self, snippet: &str) -> Self {
        self.snippet = snippet.to_string();
        self
    }

    /// Text handed to the evaluation model for this candidate.
    pub fn evaluation_text(&self) -> String {
        let mut text = format!("Title: {}\nOrganization: {}", self.title, self.organization);
        if let Some(date) = self.posted_date {
            text.push_str(&format!("\nPosted: {}", date));
        }
        if !self.snippet.is_empty() {
            text.push_str(&format!("\nSummary: {}", self.snippet));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_text_includes_snippet() {
        let candidate = Candidate::new("Platform Engineer", "Acme", "https://a.example/1")
            .with_snippet("Remote, Kubernetes heavy");
        let text = candidate.evaluation_text();
        assert!(text.contains("Platform Engineer"));
        assert!(text.contains("Kubernetes heavy"));
    }
}
