//! The per-run sourcing pipeline.
//!
//! One run is strictly sequential: search → validate links → dedup →
//! evaluate → finalize the log. Each stage narrows the candidate set the
//! next stage processes; link validation is the only parallel sub-stage.
//! The cancellation token threads through every network and model call.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dedup::ExclusionSet;
use crate::evaluate::EvaluationGate;
use crate::heal::{HealOutcome, QueryHealer};
use crate::models::{AutomationConfig, RunLog, RunOutcome, RunStatus};
use crate::repository::{CompletionPolicy, DbContext, StoreError};
use crate::search::{
    search_with_retry, ListingSearchProvider, QueryBuilder, SearchConfig, SearchRequest,
};
use crate::validate::LinkValidator;

/// Errors raised before a run starts. Once a RunLog exists, failures are
/// recorded on it instead of surfacing here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid automation config {id}: {reason}")]
    InvalidConfig { id: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub prospects_found: i64,
    pub duplicates: i64,
    pub proposals_created: i64,
    pub suggestion: Option<String>,
    pub error: Option<String>,
}

/// Executes sourcing runs. Shared by the scheduler and the manual `once`
/// command.
pub struct SourcingService {
    ctx: DbContext,
    provider: Arc<dyn ListingSearchProvider>,
    validator: LinkValidator,
    gate: EvaluationGate,
    healer: QueryHealer,
    search_config: SearchConfig,
}

impl SourcingService {
    pub fn new(
        ctx: DbContext,
        provider: Arc<dyn ListingSearchProvider>,
        validator: LinkValidator,
        gate: EvaluationGate,
        healer: QueryHealer,
        search_config: SearchConfig,
    ) -> Self {
        Self {
            ctx,
            provider,
            validator,
            gate,
            healer,
            search_config,
        }
    }

    pub fn ctx(&self) -> &DbContext {
        &self.ctx
    }

    /// Execute one run for a config.
    ///
    /// Pre-run validation failures return an error without creating a
    /// RunLog. Failures after that point finalize the log as failed and are
    /// reported through the returned [`RunReport`].
    pub async fn execute_run(
        &self,
        config: &AutomationConfig,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        let query = self.validate_config(config)?;

        let log = RunLog::started(config, &query);
        self.ctx.run_logs().insert_started(&log)?;
        let policy = config.disable_on_target.then(|| CompletionPolicy {
            config_id: config.id.clone(),
            tenant_id: config.tenant_id.clone(),
        });

        info!("Run {} started for config {}: {}", log.id, config.id, query);

        // Stage 1: search, with bounded retry.
        let request = SearchRequest {
            query: query.clone(),
            location: config.location.clone(),
            posted_within_days: config.posted_within_days,
            limit: self.search_config.max_results,
        };
        let response = match search_with_retry(
            &self.provider,
            &request,
            cancel,
            self.search_config.retry_attempts,
            self.search_config.retry_backoff(),
        )
        .await
        {
            Ok(response) => response,
            Err(err) => {
                let outcome = RunOutcome::failed(&format!("search failed: {err}"));
                return self.finish(&log, outcome, policy.as_ref(), config, cancel).await;
            }
        };
        let prospects_found = response.candidates.len() as i64;
        let related_searches = response.related_searches;

        let partial = |error: &str| RunOutcome {
            status: RunStatus::Failed,
            prospects_found,
            proposals_created: 0,
            duplicates: 0,
            related_searches: related_searches.clone(),
            error: Some(error.to_string()),
        };

        // Stage 2: drop dead links before spending model calls.
        let reachable = self
            .validator
            .filter_reachable(response.candidates, cancel)
            .await;
        if cancel.is_cancelled() {
            let outcome = partial("run cancelled");
            return self.finish(&log, outcome, policy.as_ref(), config, cancel).await;
        }

        // Stage 3: drop everything the tenant already knows.
        let mut exclusions = ExclusionSet::load(&self.ctx, &config.tenant_id)?;
        let filtered = exclusions.filter(reachable);
        let duplicates = filtered.duplicates;

        // Stage 4: model evaluation.
        let (gate_report, gate_error) = self
            .gate
            .evaluate_batch(&self.ctx, config, &filtered.survivors, cancel)
            .await;
        if let Some(err) = gate_error {
            // Proposals created before the failure are preserved.
            let outcome = RunOutcome {
                status: RunStatus::Failed,
                prospects_found,
                proposals_created: gate_report.created,
                duplicates,
                related_searches,
                error: Some(format!("evaluation failed: {err}")),
            };
            return self.finish(&log, outcome, policy.as_ref(), config, cancel).await;
        }

        info!(
            "Run {} evaluated {} candidates: {} approved, {} rejected ({:.0}% approval)",
            log.id,
            gate_report.evaluated,
            gate_report.approved,
            gate_report.rejected,
            gate_report.approval_ratio() * 100.0
        );

        let outcome = RunOutcome::completed(
            prospects_found,
            gate_report.created,
            duplicates,
            related_searches,
        );
        self.finish(&log, outcome, policy.as_ref(), config, cancel).await
    }

    /// Fail fast on configs a run cannot start from; no RunLog is created
    /// for a run that never began. Returns the composed query.
    fn validate_config(&self, config: &AutomationConfig) -> Result<String, RunError> {
        let query = QueryBuilder::from_config(config).build();
        if query.is_empty() {
            return Err(RunError::InvalidConfig {
                id: config.id.clone(),
                reason: "empty search query".to_string(),
            });
        }
        if let Some(record_id) = &config.target_record_id {
            if !self.ctx.records().exists(record_id)? {
                return Err(RunError::InvalidConfig {
                    id: config.id.clone(),
                    reason: format!("target record {record_id} no longer exists"),
                });
            }
        }
        Ok(query)
    }

    /// Finalize the log (applying the disable-on-target policy in the same
    /// transaction) and run the self-healing step when warranted.
    async fn finish(
        &self,
        log: &RunLog,
        outcome: RunOutcome,
        policy: Option<&CompletionPolicy>,
        config: &AutomationConfig,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        self.ctx.run_logs().finalize(&log.id, &outcome, policy)?;

        let mut suggestion = None;
        if outcome.status == RunStatus::Completed && outcome.proposals_created == 0 {
            let finalized = RunLog {
                status: outcome.status,
                prospects_found: outcome.prospects_found,
                proposals_created: outcome.proposals_created,
                duplicates: outcome.duplicates,
                related_searches: outcome.related_searches.clone(),
                ..log.clone()
            };
            match self.healer.maybe_heal(&self.ctx, config, &finalized, cancel).await {
                Ok(HealOutcome::Suggested(text)) => suggestion = Some(text),
                Ok(HealOutcome::PauseRecommended) => {
                    info!(
                        "Healer recommends pausing config {}; leaving that to the operator",
                        config.id
                    );
                }
                Ok(HealOutcome::Skipped) => {}
                // Healing is best-effort; the run itself already finished.
                Err(err) => warn!("Query healing failed for config {}: {}", config.id, err),
            }
        }

        if let Some(error) = &outcome.error {
            warn!("Run {} failed: {}", log.id, error);
        }

        Ok(RunReport {
            run_id: log.id.clone(),
            status: outcome.status,
            prospects_found: outcome.prospects_found,
            duplicates: outcome.duplicates,
            proposals_created: outcome.proposals_created,
            suggestion,
            error: outcome.error,
        })
    }
}
