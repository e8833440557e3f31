//! Evaluation gate.
//!
//! Sends each surviving candidate through the model promoter for a
//! structured approve/reject decision and persists the outcome: approvals
//! become pending proposals, rejections are recorded so the candidate never
//! comes back.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dedup::dedup_key;
use crate::llm::prompts::{evaluation_prompt, parse_verdict};
use crate::llm::{LlmError, ModelPromoter};
use crate::models::{AutomationConfig, Candidate, Proposal, RecordDraft, Rejection};
use crate::repository::{DbContext, StoreError};

/// Errors that abort the remainder of an evaluation batch.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters for one evaluated batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateReport {
    /// Candidates that received a verdict.
    pub evaluated: i64,
    /// Verdicts that approved the candidate.
    pub approved: i64,
    /// Proposals actually inserted (approvals minus benign key conflicts).
    pub created: i64,
    /// Verdicts that rejected the candidate.
    pub rejected: i64,
    /// Responses that could not be parsed as a verdict.
    pub unparsed: i64,
}

impl GateReport {
    /// Approved over evaluated; one input to judging run quality.
    pub fn approval_ratio(&self) -> f64 {
        if self.evaluated == 0 {
            0.0
        } else {
            self.approved as f64 / self.evaluated as f64
        }
    }
}

/// Gate between filtered candidates and the proposal store.
pub struct EvaluationGate {
    promoter: Arc<ModelPromoter>,
}

impl EvaluationGate {
    pub fn new(promoter: Arc<ModelPromoter>) -> Self {
        Self { promoter }
    }

    /// Evaluate candidates sequentially. Returns the counters accumulated so
    /// far and, when a model or store failure aborted the batch, the error.
    /// Proposals created before the failure stand.
    pub async fn evaluate_batch(
        &self,
        ctx: &DbContext,
        config: &AutomationConfig,
        candidates: &[Candidate],
        cancel: &CancellationToken,
    ) -> (GateReport, Option<GateError>) {
        let mut report = GateReport::default();

        for candidate in candidates {
            if cancel.is_cancelled() {
                return (report, Some(GateError::Llm(LlmError::Cancelled)));
            }
            let Some(key) = dedup_key(&candidate.url) else {
                continue;
            };

            let prompt = evaluation_prompt(&config.criteria, candidate);
            let response = match self.promoter.complete(&prompt, cancel).await {
                Ok(response) => response,
                Err(err) => return (report, Some(err.into())),
            };
            report.evaluated += 1;

            let Some(verdict) = parse_verdict(&response) else {
                warn!(
                    "Unparseable verdict for {}, skipping candidate",
                    candidate.url
                );
                report.unparsed += 1;
                continue;
            };

            if verdict.approve {
                report.approved += 1;
                let draft = RecordDraft {
                    title: candidate.title.clone(),
                    organization: candidate.organization.clone(),
                    source_url: candidate.url.clone(),
                    snippet: candidate.snippet.clone(),
                    posted_date: candidate.posted_date,
                    evaluation_reason: verdict.reason,
                };
                let proposal = Proposal::create_record(&config.tenant_id, &config.id, &key, draft);
                match ctx.proposals().create(&proposal) {
                    Ok(true) => report.created += 1,
                    // A concurrent run proposed the same listing first;
                    // that is success, not an error.
                    Ok(false) => debug!("Already proposed: {}", candidate.url),
                    Err(err) => return (report, Some(err.into())),
                }
            } else {
                report.rejected += 1;
                let rejection = Rejection::new(
                    &config.tenant_id,
                    &key,
                    &candidate.url,
                    &candidate.title,
                    &verdict.reason,
                );
                if let Err(err) = ctx.proposals().record_rejection(&rejection) {
                    return (report, Some(err.into()));
                }
            }
        }

        (report, None)
    }
}
