//! Query self-healing.
//!
//! When runs stop producing proposals, drafts a replacement query from run
//! analytics and stores it as the config's pending suggestion. The output is
//! advisory data only; the active query changes solely through the explicit
//! acceptance operation on the automation repository.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::analytics::{AnalyticsEngine, RunAnalytics};
use crate::llm::{LlmError, ModelPromoter};
use crate::models::{AutomationConfig, ProposalStatus, RunLog};
use crate::repository::{DbContext, StoreError};

/// Escalating instruction strength, keyed by the consecutive-zero-run count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureTier {
    /// 1-2 zero runs: refresh the wording.
    Refresh,
    /// 3-5 zero runs: meaningfully different terms.
    Explore,
    /// 6-9 zero runs: drastic pivot, avoid everything recently tried.
    Pivot,
    /// 10+ zero runs: complete pivot, or recommend pausing on exhaustion.
    Critical,
}

impl PressureTier {
    pub fn for_streak(consecutive_zero_runs: usize) -> Self {
        match consecutive_zero_runs {
            0..=2 => PressureTier::Refresh,
            3..=5 => PressureTier::Explore,
            6..=9 => PressureTier::Pivot,
            _ => PressureTier::Critical,
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            PressureTier::Refresh => {
                "Refresh the wording of the query while keeping its intent. \
                 Small adjustments are fine."
            }
            PressureTier::Explore => {
                "The current query has gone stale. Propose meaningfully \
                 different search terms: new synonyms, adjacent titles, or a \
                 different angle on the same intent."
            }
            PressureTier::Pivot => {
                "The current approach is not working. Make a drastic pivot: \
                 change the core terms, not just the modifiers. Avoid every \
                 recently tried query listed below."
            }
            PressureTier::Critical => {
                "CRITICAL: many consecutive runs found nothing usable. Make a \
                 complete pivot to an entirely different framing of the search. \
                 If the duplicate rate indicates the market is exhausted, \
                 respond with exactly PAUSE instead of a query to recommend \
                 pausing this automation."
            }
        }
    }
}

/// Errors from a healing attempt.
#[derive(Debug, Error)]
pub enum HealError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Outcome of a healing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    /// A new suggestion was stored for review.
    Suggested(String),
    /// The model recommended pausing instead of a new query; surfaced to
    /// the caller, never acted on automatically.
    PauseRecommended,
    /// Nothing to do: run produced proposals, or a suggestion is pending,
    /// or a concurrent run stored one first.
    Skipped,
}

/// Drafts replacement queries for degraded configs.
pub struct QueryHealer {
    promoter: Arc<ModelPromoter>,
    engine: AnalyticsEngine,
}

impl QueryHealer {
    pub fn new(promoter: Arc<ModelPromoter>, engine: AnalyticsEngine) -> Self {
        Self { promoter, engine }
    }

    /// Run the healing step after a completed run, if it is warranted.
    /// At most one suggestion is outstanding per config at a time.
    pub async fn maybe_heal(
        &self,
        ctx: &DbContext,
        config: &AutomationConfig,
        run: &RunLog,
        cancel: &CancellationToken,
    ) -> Result<HealOutcome, HealError> {
        if run.proposals_created > 0 {
            return Ok(HealOutcome::Skipped);
        }

        // Re-read the config: another run may have stored a suggestion since
        // this one was dispatched. The store-side compare-and-set below is
        // what actually decides.
        let current = ctx.automations().require(&config.id)?;
        if current.suggested_query.is_some() {
            debug!("Suggestion already pending for config {}, skipping", config.id);
            return Ok(HealOutcome::Skipped);
        }

        let analytics = self.load_analytics(ctx, config)?;
        let tier = PressureTier::for_streak(analytics.consecutive_zero_runs);
        let recent_queries = Self::recent_queries(ctx, config)?;
        let prompt = build_healing_prompt(&current, &analytics, tier, &recent_queries);

        let response = self.promoter.complete(&prompt, cancel).await?;
        let suggestion = sanitize_suggestion(&response);

        if suggestion.eq_ignore_ascii_case("pause") {
            info!("Healer recommends pausing config {}", config.id);
            return Ok(HealOutcome::PauseRecommended);
        }
        if suggestion.is_empty() || suggestion == current.query {
            return Ok(HealOutcome::Skipped);
        }

        if ctx
            .automations()
            .store_suggestion_if_absent(&config.id, &suggestion)?
        {
            info!(
                "Stored suggested query for config {} ({:?} tier): {}",
                config.id, tier, suggestion
            );
            Ok(HealOutcome::Suggested(suggestion))
        } else {
            // Lost the compare-and-set to a concurrent run.
            Ok(HealOutcome::Skipped)
        }
    }

    pub fn analytics_engine(&self) -> &AnalyticsEngine {
        &self.engine
    }

    fn load_analytics(
        &self,
        ctx: &DbContext,
        config: &AutomationConfig,
    ) -> Result<RunAnalytics, StoreError> {
        let runs = ctx
            .run_logs()
            .recent_for_config(&config.id, self.engine.config().window)?;
        let titles = ctx.proposals().titles_with_status(&config.tenant_id)?;
        let mut approved = Vec::new();
        let mut rejected: Vec<String> = ctx.proposals().rejection_titles(&config.tenant_id)?;
        for (title, status) in titles {
            match status {
                ProposalStatus::Rejected => rejected.push(title),
                ProposalStatus::Pending | ProposalStatus::Approved => approved.push(title),
            }
        }
        Ok(self.engine.compute(&runs, &approved, &rejected))
    }

    fn recent_queries(ctx: &DbContext, config: &AutomationConfig) -> Result<Vec<String>, StoreError> {
        let runs = ctx.run_logs().recent_for_config(&config.id, 10)?;
        let mut queries = Vec::new();
        for run in runs {
            let query = run.query.trim().to_string();
            if !query.is_empty() && !queries.contains(&query) {
                queries.push(query);
            }
        }
        Ok(queries)
    }
}

/// Assemble the healing prompt: current query, criteria, analytics summary,
/// and the tier-appropriate pressure instruction.
pub fn build_healing_prompt(
    config: &AutomationConfig,
    analytics: &RunAnalytics,
    tier: PressureTier,
    recent_queries: &[String],
) -> String {
    let mut prompt = format!(
        r#"You maintain the search query of an automated lead-sourcing agent.
The query below has stopped producing approvable results.

Current query: {query}

What the user is looking for:
{criteria}

Recent run history:
{summary}

{instruction}"#,
        query = config.query,
        criteria = config.criteria.trim(),
        summary = analytics.summary(),
        instruction = tier.instruction(),
    );

    if matches!(tier, PressureTier::Pivot | PressureTier::Critical) && !recent_queries.is_empty() {
        prompt.push_str("\n\nRecently tried queries to avoid:\n");
        for query in recent_queries {
            prompt.push_str(&format!("- {query}\n"));
        }
    }

    prompt.push_str("\nRespond with ONLY the replacement search query text, nothing else.");
    prompt
}

/// First line of the response, stripped of fences and quotes, length-capped.
fn sanitize_suggestion(response: &str) -> String {
    let cleaned = response
        .trim()
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let first_line = cleaned.lines().next().unwrap_or("").trim();
    let unquoted = first_line.trim_matches(|c| c == '"' || c == '\'' || c == '`');
    let mut suggestion = unquoted.trim().to_string();
    if suggestion.len() > 200 {
        let mut end = 200;
        while end > 0 && !suggestion.is_char_boundary(end) {
            end -= 1;
        }
        suggestion.truncate(end);
    }
    suggestion
}
