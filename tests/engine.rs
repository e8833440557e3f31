//! End-to-end tests for the sourcing pipeline and scheduler, using a local
//! stub HTTP server for link probes, a scripted listings provider, and a
//! rule-based model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use leadsource::analytics::{AnalyticsConfig, AnalyticsEngine};
use leadsource::dedup::dedup_key;
use leadsource::evaluate::EvaluationGate;
use leadsource::heal::QueryHealer;
use leadsource::llm::{LlmError, ModelPromoter, ModelTier, StreamingModel, TokenStream};
use leadsource::models::{
    AutomationConfig, Candidate, Proposal, ProposalStatus, RecordDraft, RunStatus,
};
use leadsource::repository::DbContext;
use leadsource::scheduler::{Scheduler, SchedulerConfig};
use leadsource::search::{
    ListingSearchProvider, SearchConfig, SearchError, SearchRequest, SearchResponse,
};
use leadsource::sourcing::SourcingService;
use leadsource::validate::{LinkValidator, ValidationConfig};

/// Minimal HTTP server: 404 for paths containing "dead", 200 otherwise.
async fn spawn_stub_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let request = String::from_utf8_lossy(&buf);
                let status = if request.contains("dead") {
                    "HTTP/1.1 404 Not Found"
                } else {
                    "HTTP/1.1 200 OK"
                };
                let response = format!("{status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    format!("http://{addr}")
}

/// Approves listings whose title mentions "Senior"; answers healing prompts
/// with a fixed replacement query.
struct RuleModel;

#[async_trait]
impl StreamingModel for RuleModel {
    async fn stream(
        &self,
        _model: &str,
        prompt: &str,
        _cancel: &CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        let text = if prompt.contains("replacement search query") {
            "refined angle query".to_string()
        } else {
            let approve = prompt.contains("Senior");
            format!("{{\"approve\": {approve}, \"reason\": \"rule\"}}")
        };
        Ok(TokenStream::new(futures::stream::iter(vec![Ok(text)])))
    }
}

/// Provider that pops scripted responses, or errors when `fail` is set.
struct ScriptedProvider {
    responses: Mutex<VecDeque<SearchResponse>>,
    calls: AtomicUsize,
    fail: bool,
}

impl ScriptedProvider {
    fn with_responses(responses: Vec<SearchResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSearchProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(
        &self,
        _request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, SearchError> {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SearchError::Provider("HTTP 503".to_string()));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

fn response(candidates: Vec<Candidate>, related: Vec<&str>) -> SearchResponse {
    let json = serde_json::json!({
        "results": candidates,
        "related_searches": related,
    });
    serde_json::from_value(json).unwrap()
}

fn test_ctx() -> (tempfile::TempDir, DbContext) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = DbContext::new(&dir.path().join("engine.db"));
    ctx.init_schema().unwrap();
    (dir, ctx)
}

fn build_service(ctx: DbContext, provider: Arc<dyn ListingSearchProvider>) -> SourcingService {
    let model: Arc<dyn StreamingModel> = Arc::new(RuleModel);
    let promoter = Arc::new(ModelPromoter::new(model, vec![ModelTier::new("rule", 5000)]));
    let gate = EvaluationGate::new(promoter.clone());
    let healer = QueryHealer::new(promoter, AnalyticsEngine::new(AnalyticsConfig::default()));
    let validator = LinkValidator::new(&ValidationConfig {
        max_concurrent: 4,
        probe_timeout_secs: 2,
    });
    let search_config = SearchConfig {
        retry_attempts: 2,
        retry_backoff_ms: 1,
        ..Default::default()
    };
    SourcingService::new(ctx, provider, validator, gate, healer, search_config)
}

fn seed_pending_proposal(ctx: &DbContext, tenant: &str, url: &str, title: &str) {
    let draft = RecordDraft {
        title: title.to_string(),
        organization: "Seed".to_string(),
        source_url: url.to_string(),
        snippet: String::new(),
        posted_date: None,
        evaluation_reason: String::new(),
    };
    let proposal = Proposal::create_record(tenant, "seed-config", &dedup_key(url).unwrap(), draft);
    assert!(ctx.proposals().create(&proposal).unwrap());
}

#[tokio::test]
async fn pipeline_filters_duplicates_and_creates_proposals() {
    let base = spawn_stub_server().await;
    let (_dir, ctx) = test_ctx();

    // Two of the five raw candidates are already pending proposals.
    seed_pending_proposal(&ctx, "t1", &format!("{base}/listing/1"), "Old One");
    seed_pending_proposal(&ctx, "t1", &format!("{base}/listing/2"), "Old Two");

    let provider = ScriptedProvider::with_responses(vec![response(
        vec![
            Candidate::new("Engineer One", "A", &format!("{base}/listing/1")),
            Candidate::new("Engineer Two", "B", &format!("{base}/listing/2")),
            Candidate::new("Senior Platform Engineer", "C", &format!("{base}/listing/3")),
            Candidate::new("Junior Developer", "D", &format!("{base}/listing/4")),
            Candidate::new("Support Agent", "E", &format!("{base}/listing/5")),
        ],
        vec!["platform engineer remote"],
    )]);
    let service = build_service(ctx.clone(), provider.clone());

    let config = AutomationConfig::new("t1", "u1", "platform engineer", "match the rules");
    ctx.automations().save(&config).unwrap();

    let report = service
        .execute_run(&config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.prospects_found, 5);
    assert_eq!(report.duplicates, 2);
    assert_eq!(report.proposals_created, 1);
    assert!(report.proposals_created <= report.prospects_found);

    // The two rejected candidates were persisted for future exclusion.
    assert_eq!(ctx.proposals().rejection_keys("t1").unwrap().len(), 2);

    let log = ctx.run_logs().get(&report.run_id).unwrap().unwrap();
    assert_eq!(log.status, RunStatus::Completed);
    assert_eq!(log.prospects_found, 5);
    assert_eq!(log.duplicates, 2);
    assert_eq!(log.proposals_created, 1);
    assert_eq!(log.related_searches, vec!["platform engineer remote"]);

    // Proposals created, no suggestion needed.
    assert!(report.suggestion.is_none());

    // A second identical run finds everything duplicated.
    let provider2 = ScriptedProvider::with_responses(vec![response(
        vec![
            Candidate::new("Senior Platform Engineer", "C", &format!("{base}/listing/3")),
            Candidate::new("Junior Developer", "D", &format!("{base}/listing/4")),
        ],
        vec![],
    )]);
    let service2 = build_service(ctx.clone(), provider2);
    let report2 = service2
        .execute_run(&config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report2.duplicates, 2);
    assert_eq!(report2.proposals_created, 0);

    // No two proposals ever share (tenant, dedup_key).
    let keys = ctx.proposals().keys_with_status("t1").unwrap();
    let unique: std::collections::HashSet<_> = keys.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(unique.len(), keys.len());
}

#[tokio::test]
async fn dead_links_are_dropped_silently() {
    let base = spawn_stub_server().await;
    let (_dir, ctx) = test_ctx();

    let provider = ScriptedProvider::with_responses(vec![response(
        vec![
            Candidate::new("Senior Engineer", "A", &format!("{base}/listing/ok")),
            Candidate::new("Senior Architect", "B", &format!("{base}/dead/listing")),
        ],
        vec![],
    )]);
    let service = build_service(ctx.clone(), provider);

    let config = AutomationConfig::new("t1", "u1", "engineer", "match the rules");
    ctx.automations().save(&config).unwrap();

    let report = service
        .execute_run(&config, &CancellationToken::new())
        .await
        .unwrap();

    // The dead link is not an error; it simply never reaches the gate.
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.prospects_found, 2);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.proposals_created, 1);
}

#[tokio::test]
async fn exhausted_search_retries_mark_run_failed() {
    let (_dir, ctx) = test_ctx();
    let provider = ScriptedProvider::failing();
    let service = build_service(ctx.clone(), provider.clone());

    let config = AutomationConfig::new("t1", "u1", "engineer", "match the rules");
    ctx.automations().save(&config).unwrap();

    let report = service
        .execute_run(&config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.error.unwrap().contains("search failed"));
    assert_eq!(provider.calls(), 2); // bounded retry

    let log = ctx.run_logs().get(&report.run_id).unwrap().unwrap();
    assert_eq!(log.status, RunStatus::Failed);
    assert!(log.finished_at.is_some());
}

#[tokio::test]
async fn invalid_config_fails_fast_without_run_log() {
    let (_dir, ctx) = test_ctx();
    let provider = ScriptedProvider::with_responses(vec![]);
    let service = build_service(ctx.clone(), provider.clone());

    let mut config = AutomationConfig::new("t1", "u1", "engineer", "match the rules");
    config.target_record_id = Some("deleted-record".to_string());
    ctx.automations().save(&config).unwrap();

    let result = service.execute_run(&config, &CancellationToken::new()).await;
    assert!(result.is_err());

    // No search was attempted and no log was created.
    assert_eq!(provider.calls(), 0);
    assert!(ctx
        .run_logs()
        .recent_for_config(&config.id, 10)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn zero_proposal_run_stores_one_suggestion() {
    let base = spawn_stub_server().await;
    let (_dir, ctx) = test_ctx();

    let provider = ScriptedProvider::with_responses(vec![
        response(
            vec![Candidate::new("Junior Dev", "A", &format!("{base}/listing/10"))],
            vec![],
        ),
        response(
            vec![Candidate::new("Intern", "B", &format!("{base}/listing/11"))],
            vec![],
        ),
    ]);
    let service = build_service(ctx.clone(), provider);

    let config = AutomationConfig::new("t1", "u1", "stale query", "match the rules");
    ctx.automations().save(&config).unwrap();

    let report = service
        .execute_run(&config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.proposals_created, 0);
    assert_eq!(report.suggestion.as_deref(), Some("refined angle query"));

    let loaded = ctx.automations().get(&config.id).unwrap().unwrap();
    assert_eq!(loaded.suggested_query.as_deref(), Some("refined angle query"));
    // The active query is never overwritten by the healer.
    assert_eq!(loaded.query, "stale query");

    // A second zero run leaves the pending suggestion alone.
    let report2 = service
        .execute_run(&config, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report2.suggestion.is_none());
    let loaded = ctx.automations().get(&config.id).unwrap().unwrap();
    assert_eq!(loaded.suggested_query.as_deref(), Some("refined angle query"));

    // Only the explicit acceptance action promotes it.
    assert!(ctx.automations().accept_suggestion(&config.id).unwrap());
    let loaded = ctx.automations().get(&config.id).unwrap().unwrap();
    assert_eq!(loaded.query, "refined angle query");
    assert!(loaded.suggested_query.is_none());
}

#[tokio::test]
async fn cancelled_run_finalizes_as_failed() {
    let (_dir, ctx) = test_ctx();
    let provider = ScriptedProvider::with_responses(vec![]);
    let service = build_service(ctx.clone(), provider);

    let config = AutomationConfig::new("t1", "u1", "engineer", "match the rules");
    ctx.automations().save(&config).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = service.execute_run(&config, &cancel).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let log = ctx.run_logs().get(&report.run_id).unwrap().unwrap();
    assert_eq!(log.status, RunStatus::Failed);
    assert!(log.finished_at.is_some());
}

#[tokio::test]
async fn scheduler_dispatches_due_config_exactly_once() {
    let (_dir, ctx) = test_ctx();
    let provider = ScriptedProvider::with_responses(vec![]);
    let service = Arc::new(build_service(ctx.clone(), provider));
    let scheduler = Scheduler::new(ctx.clone(), service, SchedulerConfig::default());

    let now = Utc::now();
    let mut config = AutomationConfig::new("t1", "u1", "engineer", "match the rules")
        .with_interval_minutes(30);
    // Last run 20 minutes ago: due again in 10.
    config.next_run_at = Some(now + Duration::minutes(10));
    ctx.automations().save(&config).unwrap();

    assert_eq!(scheduler.tick(now).await.unwrap(), 0);

    let later = now + Duration::minutes(31);
    assert_eq!(scheduler.tick(later).await.unwrap(), 1);
    // The schedule advanced before the run, so the same instant is no
    // longer due.
    scheduler.drain(std::time::Duration::from_secs(10)).await;
    assert_eq!(scheduler.tick(later).await.unwrap(), 0);

    assert_eq!(ctx.run_logs().recent_for_config(&config.id, 10).unwrap().len(), 1);

    let loaded = ctx.automations().get(&config.id).unwrap().unwrap();
    let next = loaded.next_run_at.unwrap();
    assert!(next > later + Duration::minutes(29));
    assert!(next <= later + Duration::minutes(30));
}

#[tokio::test]
async fn reaching_target_disables_config_with_run_finalization() {
    let base = spawn_stub_server().await;
    let (_dir, ctx) = test_ctx();

    let provider = ScriptedProvider::with_responses(vec![response(
        vec![Candidate::new("Senior Engineer", "A", &format!("{base}/listing/20"))],
        vec![],
    )]);
    let service = build_service(ctx.clone(), provider);

    let mut config = AutomationConfig::new("t1", "u1", "engineer", "match the rules")
        .with_target(1, true);
    config.next_run_at = Some(Utc::now());
    ctx.automations().save(&config).unwrap();

    let report = service
        .execute_run(&config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.proposals_created, 1);

    // Target reached in disable mode: requires manual re-enable.
    let loaded = ctx.automations().get(&config.id).unwrap().unwrap();
    assert!(!loaded.enabled);
}

#[tokio::test]
async fn pause_mode_skips_runs_until_below_target() {
    let (_dir, ctx) = test_ctx();
    let provider = ScriptedProvider::with_responses(vec![]);
    let service = Arc::new(build_service(ctx.clone(), provider.clone()));
    let scheduler = Scheduler::new(ctx.clone(), service, SchedulerConfig::default());

    let now = Utc::now();
    let mut config = AutomationConfig::new("t1", "u1", "engineer", "match the rules")
        .with_target(1, false);
    config.next_run_at = Some(now);
    ctx.automations().save(&config).unwrap();

    seed_pending_proposal(&ctx, "t1", "https://jobs.example/pending", "Pending One");

    // At target in pause mode: still enabled, but no search happens.
    assert_eq!(scheduler.tick(now).await.unwrap(), 0);
    assert_eq!(provider.calls(), 0);
    let loaded = ctx.automations().get(&config.id).unwrap().unwrap();
    assert!(loaded.enabled);

    // Human review drops the live total under the target; the next due
    // tick dispatches again.
    let pending = ctx.proposals().list_pending("t1").unwrap();
    ctx.proposals()
        .set_status(&pending[0].id, ProposalStatus::Rejected)
        .unwrap();

    assert_eq!(scheduler.tick(now).await.unwrap(), 1);
    scheduler.drain(std::time::Duration::from_secs(10)).await;
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn in_flight_config_is_skipped_not_queued() {
    let (_dir, ctx) = test_ctx();

    // A provider that blocks until released, to hold a run in flight.
    struct BlockingProvider {
        release: tokio::sync::Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ListingSearchProvider for BlockingProvider {
        fn name(&self) -> &str {
            "blocking"
        }
        async fn search(
            &self,
            _request: &SearchRequest,
            cancel: &CancellationToken,
        ) -> Result<SearchResponse, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = cancel.cancelled() => return Err(SearchError::Cancelled),
                _ = self.release.notified() => {}
            }
            Ok(SearchResponse::default())
        }
    }

    let provider = Arc::new(BlockingProvider {
        release: tokio::sync::Notify::new(),
        calls: AtomicUsize::new(0),
    });
    let service = Arc::new(build_service(ctx.clone(), provider.clone()));
    let scheduler = Scheduler::new(ctx.clone(), service, SchedulerConfig::default());

    let now = Utc::now();
    let mut config = AutomationConfig::new("t1", "u1", "engineer", "match the rules")
        .with_interval_minutes(30);
    config.next_run_at = Some(now);
    ctx.automations().save(&config).unwrap();

    assert_eq!(scheduler.tick(now).await.unwrap(), 1);
    // Let the spawned run reach the blocking search call.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    // Due again much later, but the first run still holds the lock.
    let later = now + Duration::hours(2);
    assert_eq!(scheduler.tick(later).await.unwrap(), 0);

    provider.release.notify_waiters();
    scheduler.drain(std::time::Duration::from_secs(10)).await;

    // Released: the next due tick dispatches normally.
    assert_eq!(scheduler.tick(later + Duration::hours(1)).await.unwrap(), 1);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    provider.release.notify_waiters();
    scheduler.drain(std::time::Duration::from_secs(10)).await;
}
