//! Run-history analytics.
//!
//! Aggregates recent run logs into the signals the self-healer reasons
//! about. Everything here is pure computation over data the caller loaded;
//! run logs are append-only, so no locking is needed to read them.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{RunLog, RunStatus};

/// Words too generic to correlate with approval either way.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "for", "of", "with", "in", "on", "at", "to", "from", "by",
    "we", "you", "our", "your", "are", "is", "be", "as", "all", "will", "can", "this", "that",
    "job", "jobs", "role", "position", "opening", "hiring", "apply", "now", "new", "team",
    "work", "working", "company", "inc", "llc", "ltd",
];

fn default_window() -> usize {
    20
}

fn default_exhaustion_duplicate_rate() -> f64 {
    0.8
}

fn default_exhaustion_min_runs() -> usize {
    3
}

/// Tunables for history analysis. The exhaustion threshold and window are
/// deliberately configurable rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// How many recent runs to analyze.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Duplicate rate above which a run looks exhausted.
    #[serde(default = "default_exhaustion_duplicate_rate")]
    pub exhaustion_duplicate_rate: f64,
    /// Consecutive exhausted-looking runs required to raise the signal.
    #[serde(default = "default_exhaustion_min_runs")]
    pub exhaustion_min_runs: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            exhaustion_duplicate_rate: default_exhaustion_duplicate_rate(),
            exhaustion_min_runs: default_exhaustion_min_runs(),
        }
    }
}

/// Aggregate performance of one query string.
#[derive(Debug, Clone)]
pub struct QueryPerformance {
    pub query: String,
    pub prospects: i64,
    pub proposals: i64,
    pub conversion: f64,
}

/// Derived view over the last N runs of one config.
#[derive(Debug, Clone, Default)]
pub struct RunAnalytics {
    pub runs_analyzed: usize,
    /// Completed runs since the last one that produced a proposal.
    pub consecutive_zero_runs: usize,
    /// Mean duplicate rate over recent completed runs.
    pub recent_duplicate_rate: f64,
    /// Nearly everything the query returns is already known.
    pub market_exhausted: bool,
    pub best_queries: Vec<QueryPerformance>,
    pub worst_queries: Vec<QueryPerformance>,
    /// Provider-suggested searches never yet executed.
    pub untried_searches: Vec<String>,
    /// Terms overrepresented in approved titles. A coarse correlation
    /// signal, not a claim of causation.
    pub success_keywords: Vec<String>,
    /// Terms overrepresented in rejected titles.
    pub failure_keywords: Vec<String>,
}

impl RunAnalytics {
    /// Compact rendering for embedding in a healing prompt.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Runs analyzed: {}", self.runs_analyzed),
            format!(
                "Consecutive runs with zero proposals: {}",
                self.consecutive_zero_runs
            ),
            format!(
                "Recent duplicate rate: {:.0}%{}",
                self.recent_duplicate_rate * 100.0,
                if self.market_exhausted {
                    " (market looks exhausted: almost everything found is already known)"
                } else {
                    ""
                }
            ),
        ];
        if let Some(best) = self.best_queries.first() {
            lines.push(format!(
                "Best query so far: \"{}\" ({} proposals from {} prospects)",
                best.query, best.proposals, best.prospects
            ));
        }
        if let Some(worst) = self.worst_queries.first() {
            lines.push(format!(
                "Worst query so far: \"{}\" ({} proposals from {} prospects)",
                worst.query, worst.proposals, worst.prospects
            ));
        }
        if !self.success_keywords.is_empty() {
            lines.push(format!(
                "Terms common in approved titles: {}",
                self.success_keywords.join(", ")
            ));
        }
        if !self.failure_keywords.is_empty() {
            lines.push(format!(
                "Terms common in rejected titles: {}",
                self.failure_keywords.join(", ")
            ));
        }
        if !self.untried_searches.is_empty() {
            lines.push(format!(
                "Provider-suggested searches never tried: {}",
                self.untried_searches.join("; ")
            ));
        }
        lines.join("\n")
    }
}

/// Computes [`RunAnalytics`] from run history and reviewed titles.
pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    token_re: Regex,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            token_re: Regex::new(r"[a-z0-9][a-z0-9+#-]+").expect("valid token regex"),
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Analyze runs (newest first) plus approved/rejected candidate titles.
    pub fn compute(
        &self,
        runs: &[RunLog],
        approved_titles: &[String],
        rejected_titles: &[String],
    ) -> RunAnalytics {
        let window: Vec<&RunLog> = runs.iter().take(self.config.window).collect();
        let completed: Vec<&RunLog> = window
            .iter()
            .copied()
            .filter(|r| r.status == RunStatus::Completed)
            .collect();

        let (success_keywords, failure_keywords) =
            self.keyword_split(approved_titles, rejected_titles);
        let (best_queries, worst_queries) = Self::rank_queries(&completed);

        RunAnalytics {
            runs_analyzed: window.len(),
            consecutive_zero_runs: Self::zero_streak(&completed),
            recent_duplicate_rate: Self::mean_duplicate_rate(&completed),
            market_exhausted: self.is_exhausted(&completed),
            best_queries,
            worst_queries,
            untried_searches: Self::untried_searches(&window),
            success_keywords,
            failure_keywords,
        }
    }

    /// Completed runs with zero proposals since the last productive one.
    /// Failed runs say nothing about the query and are skipped upstream.
    fn zero_streak(completed: &[&RunLog]) -> usize {
        completed
            .iter()
            .take_while(|r| r.proposals_created == 0)
            .count()
    }

    fn mean_duplicate_rate(completed: &[&RunLog]) -> f64 {
        if completed.is_empty() {
            return 0.0;
        }
        completed.iter().map(|r| r.duplicate_rate()).sum::<f64>() / completed.len() as f64
    }

    /// Sustained high duplicate rate across the most recent completed runs.
    /// Distinguishes "the market is saturated" from "the query is bad";
    /// a perfect query against an exhausted market correctly finds nothing new.
    fn is_exhausted(&self, completed: &[&RunLog]) -> bool {
        if completed.len() < self.config.exhaustion_min_runs {
            return false;
        }
        completed
            .iter()
            .take(self.config.exhaustion_min_runs)
            .all(|r| r.duplicate_rate() > self.config.exhaustion_duplicate_rate)
    }

    fn rank_queries(completed: &[&RunLog]) -> (Vec<QueryPerformance>, Vec<QueryPerformance>) {
        let mut by_query: HashMap<&str, (i64, i64)> = HashMap::new();
        for run in completed {
            let entry = by_query.entry(run.query.as_str()).or_default();
            entry.0 += run.prospects_found;
            entry.1 += run.proposals_created;
        }

        let mut ranked: Vec<QueryPerformance> = by_query
            .into_iter()
            .filter(|(_, (prospects, _))| *prospects > 0)
            .map(|(query, (prospects, proposals))| QueryPerformance {
                query: query.to_string(),
                prospects,
                proposals,
                conversion: proposals as f64 / prospects as f64,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.conversion
                .partial_cmp(&a.conversion)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let best: Vec<QueryPerformance> = ranked.iter().take(3).cloned().collect();
        let worst: Vec<QueryPerformance> = ranked.iter().rev().take(3).cloned().collect();
        (best, worst)
    }

    /// Related searches the provider suggested that were never executed.
    fn untried_searches(window: &[&RunLog]) -> Vec<String> {
        let executed: HashSet<String> = window
            .iter()
            .map(|r| r.query.trim().to_lowercase())
            .collect();

        let mut seen = HashSet::new();
        let mut untried = Vec::new();
        for run in window {
            for related in &run.related_searches {
                let normalized = related.trim().to_lowercase();
                if normalized.is_empty() || executed.contains(&normalized) {
                    continue;
                }
                if seen.insert(normalized) {
                    untried.push(related.trim().to_string());
                }
            }
        }
        untried.truncate(10);
        untried
    }

    fn tokenize(&self, titles: &[String]) -> HashMap<String, i64> {
        let mut counts = HashMap::new();
        for title in titles {
            let lower = title.to_lowercase();
            for token in self.token_re.find_iter(&lower) {
                let term = token.as_str();
                if term.len() < 3 || STOP_WORDS.contains(&term) {
                    continue;
                }
                *counts.entry(term.to_string()).or_default() += 1;
            }
        }
        counts
    }

    /// Terms overrepresented on each side, by frequency difference.
    fn keyword_split(
        &self,
        approved_titles: &[String],
        rejected_titles: &[String],
    ) -> (Vec<String>, Vec<String>) {
        let approved = self.tokenize(approved_titles);
        let rejected = self.tokenize(rejected_titles);

        let terms: HashSet<&String> = approved.keys().chain(rejected.keys()).collect();
        let mut diffs: Vec<(String, i64)> = terms
            .into_iter()
            .map(|term| {
                let net = approved.get(term).copied().unwrap_or(0)
                    - rejected.get(term).copied().unwrap_or(0);
                (term.clone(), net)
            })
            .collect();
        diffs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let success: Vec<String> = diffs
            .iter()
            .filter(|(_, net)| *net > 0)
            .take(8)
            .map(|(term, _)| term.clone())
            .collect();
        let failure: Vec<String> = diffs
            .iter()
            .rev()
            .filter(|(_, net)| *net < 0)
            .take(8)
            .map(|(term, _)| term.clone())
            .collect();
        (success, failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AutomationConfig, RunLog};

    fn run(query: &str, prospects: i64, proposals: i64, duplicates: i64) -> RunLog {
        let config = AutomationConfig::new("t1", "u1", query, "c");
        let mut log = RunLog::started(&config, query);
        log.status = RunStatus::Completed;
        log.prospects_found = prospects;
        log.proposals_created = proposals;
        log.duplicates = duplicates;
        log
    }

    fn engine() -> AnalyticsEngine {
        AnalyticsEngine::new(AnalyticsConfig::default())
    }

    #[test]
    fn zero_streak_counts_from_newest() {
        // Newest first: two zero runs, then a productive one, then a zero.
        let runs = vec![run("q", 10, 0, 1), run("q", 10, 0, 2), run("q", 10, 3, 0), run("q", 10, 0, 0)];
        let analytics = engine().compute(&runs, &[], &[]);
        assert_eq!(analytics.consecutive_zero_runs, 2);
    }

    #[test]
    fn failed_runs_do_not_break_the_streak() {
        let mut failed = run("q", 0, 0, 0);
        failed.status = RunStatus::Failed;
        let runs = vec![run("q", 10, 0, 1), failed, run("q", 10, 0, 2)];
        let analytics = engine().compute(&runs, &[], &[]);
        assert_eq!(analytics.consecutive_zero_runs, 2);
    }

    #[test]
    fn sustained_high_duplicate_rate_flags_exhaustion() {
        let runs = vec![run("q", 10, 0, 9), run("q", 10, 0, 9), run("q", 10, 0, 10)];
        let analytics = engine().compute(&runs, &[], &[]);
        assert!(analytics.market_exhausted);

        // One fresh run below the threshold clears the signal.
        let runs = vec![run("q", 10, 1, 2), run("q", 10, 0, 9), run("q", 10, 0, 9)];
        let analytics = engine().compute(&runs, &[], &[]);
        assert!(!analytics.market_exhausted);
    }

    #[test]
    fn exhaustion_needs_minimum_run_count() {
        let runs = vec![run("q", 10, 0, 10), run("q", 10, 0, 10)];
        let analytics = engine().compute(&runs, &[], &[]);
        assert!(!analytics.market_exhausted);
    }

    #[test]
    fn queries_ranked_by_conversion() {
        let runs = vec![
            run("good query", 10, 5, 0),
            run("bad query", 20, 1, 0),
            run("good query", 10, 3, 0),
        ];
        let analytics = engine().compute(&runs, &[], &[]);
        assert_eq!(analytics.best_queries[0].query, "good query");
        assert_eq!(analytics.best_queries[0].proposals, 8);
        assert_eq!(analytics.worst_queries[0].query, "bad query");
    }

    #[test]
    fn untried_searches_exclude_executed_queries() {
        let mut first = run("rust engineer", 10, 1, 0);
        first.related_searches = vec![
            "rust engineer".to_string(),      // already executed
            "Systems Engineer Rust".to_string(),
            "embedded rust".to_string(),
        ];
        let mut second = run("embedded rust", 10, 0, 0);
        second.related_searches = vec!["embedded rust".to_string(), "firmware engineer".to_string()];

        let analytics = engine().compute(&[second, first], &[], &[]);
        assert_eq!(
            analytics.untried_searches,
            vec!["firmware engineer", "Systems Engineer Rust"]
        );
    }

    #[test]
    fn keyword_split_contrasts_approved_and_rejected() {
        let approved = vec![
            "Senior Platform Engineer".to_string(),
            "Senior Infrastructure Engineer".to_string(),
        ];
        let rejected = vec![
            "Sales Development Representative".to_string(),
            "Sales Engineer".to_string(),
        ];
        let analytics = engine().compute(&[], &approved, &rejected);
        assert!(analytics.success_keywords.contains(&"senior".to_string()));
        assert!(analytics.failure_keywords.contains(&"sales".to_string()));
        // "engineer" appears on both sides and nets toward approved.
        assert!(!analytics.failure_keywords.contains(&"engineer".to_string()));
    }

    #[test]
    fn window_bounds_runs_analyzed() {
        let engine = AnalyticsEngine::new(AnalyticsConfig {
            window: 5,
            ..Default::default()
        });
        let runs: Vec<RunLog> = (0..12).map(|_| run("q", 10, 1, 0)).collect();
        let analytics = engine.compute(&runs, &[], &[]);
        assert_eq!(analytics.runs_analyzed, 5);
    }
}
