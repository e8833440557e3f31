//! Prompt templates for evaluation and query healing.

use crate::models::Candidate;

/// Prompt asking the model for a structured approve/reject verdict.
pub fn evaluation_prompt(criteria: &str, candidate: &Candidate) -> String {
    format!(
        r#"You are screening sales leads for a CRM user. Decide whether the
listing below satisfies the user's criteria.

User criteria:
{criteria}

Listing:
{listing}

Respond with ONLY a JSON object, no other text:
{{"approve": true or false, "reason": "one short sentence"}}"#,
        criteria = criteria.trim(),
        listing = candidate.evaluation_text(),
    )
}

/// Parsed evaluation verdict.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Verdict {
    pub approve: bool,
    #[serde(default)]
    pub reason: String,
}

/// Parse a verdict, tolerating fenced code blocks and prose around the JSON
/// object.
pub fn parse_verdict(response: &str) -> Option<Verdict> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Ok(verdict) = serde_json::from_str(cleaned) {
        return Some(verdict);
    }

    // Fall back to the first {...} span in the response.
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&cleaned[start..=end]).ok()
}
