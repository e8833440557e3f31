//! Model promotion across a tier chain.
//!
//! Every streaming model call the engine makes goes through here. Each tier
//! gets a fresh cancellable invocation and a first-token timer; a token
//! arriving before the timer commits the call to that tier (no mid-stream
//! promotion, partial output is never discarded), while a timer firing first
//! cancels the in-flight call and promotes to the next tier.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{LlmError, ModelTier, TokenStream};

/// Seam between the promoter and the concrete streaming client.
#[async_trait]
pub trait StreamingModel: Send + Sync {
    async fn stream(
        &self,
        model: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenStream, LlmError>;
}

/// Executes one prompt against an ordered tier chain.
pub struct ModelPromoter {
    client: std::sync::Arc<dyn StreamingModel>,
    tiers: Vec<ModelTier>,
}

impl ModelPromoter {
    pub fn new(client: std::sync::Arc<dyn StreamingModel>, tiers: Vec<ModelTier>) -> Self {
        Self { client, tiers }
    }

    pub fn tiers(&self) -> &[ModelTier] {
        &self.tiers
    }

    /// Run the prompt to completion, promoting on first-token timeout.
    /// Non-timeout errors abort immediately without promoting.
    pub async fn complete(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        if self.tiers.is_empty() {
            return Err(LlmError::Api("no model tiers configured".to_string()));
        }

        for tier in &self.tiers {
            // Fresh cancellable invocation per tier; cancelling it must not
            // affect the run-level token.
            let invocation = cancel.child_token();
            match self.run_tier(tier, prompt, &invocation).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_first_token_timeout() => {
                    warn!(
                        "Model {} produced no token within {}ms, promoting",
                        tier.model, tier.first_token_timeout_ms
                    );
                    invocation.cancel();
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        Err(LlmError::TiersExhausted)
    }

    async fn run_tier(
        &self,
        tier: &ModelTier,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let timer = tokio::time::sleep(tier.first_token_timeout());
        tokio::pin!(timer);

        // The timer covers connection setup as well as the wait for the
        // first token.
        let mut stream = tokio::select! {
            _ = &mut timer => {
                return Err(LlmError::FirstTokenTimeout {
                    model: tier.model.clone(),
                    timeout_ms: tier.first_token_timeout_ms,
                })
            }
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = self.client.stream(&tier.model, prompt, cancel) => result?,
        };

        let first = tokio::select! {
            _ = &mut timer => {
                return Err(LlmError::FirstTokenTimeout {
                    model: tier.model.clone(),
                    timeout_ms: tier.first_token_timeout_ms,
                })
            }
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            token = stream.next_token() => token,
        };

        let mut output = String::new();
        match first {
            Some(Ok(token)) => output.push_str(&token),
            Some(Err(err)) => return Err(err),
            None => {
                return Err(LlmError::Parse(format!(
                    "{} stream ended without output",
                    tier.model
                )))
            }
        }
        debug!("First token from {} arrived, committed to tier", tier.model);

        // Committed: drain to natural completion.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                token = stream.next_token() => match token {
                    Some(Ok(token)) => output.push_str(&token),
                    Some(Err(err)) => return Err(err),
                    None => break,
                },
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Scripted model: per-model first-token delay and token list, with an
    /// invocation log.
    struct ScriptedModel {
        scripts: Vec<(String, Duration, Result<Vec<&'static str>, fn() -> LlmError>)>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(
            scripts: Vec<(String, Duration, Result<Vec<&'static str>, fn() -> LlmError>)>,
        ) -> Arc<Self> {
            Arc::new(Self {
                scripts,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StreamingModel for ScriptedModel {
        async fn stream(
            &self,
            model: &str,
            _prompt: &str,
            _cancel: &CancellationToken,
        ) -> Result<TokenStream, LlmError> {
            self.calls.lock().unwrap().push(model.to_string());
            let (_, delay, script) = self
                .scripts
                .iter()
                .find(|(name, _, _)| name == model)
                .expect("unscripted model")
                .clone();

            match script {
                Err(make_err) => Ok(TokenStream::new(futures::stream::once(async move {
                    tokio::time::sleep(delay).await;
                    Err(make_err())
                }))),
                Ok(tokens) => {
                    let mut items: Vec<Result<String, LlmError>> =
                        tokens.into_iter().map(|t| Ok(t.to_string())).collect();
                    let first = items.remove(0);
                    let head = futures::stream::once(async move {
                        tokio::time::sleep(delay).await;
                        first
                    });
                    Ok(TokenStream::new(head.chain(futures::stream::iter(items))))
                }
            }
        }
    }

    use futures::StreamExt;

    fn tier(model: &str, timeout_ms: u64) -> ModelTier {
        ModelTier::new(model, timeout_ms)
    }

    #[tokio::test]
    async fn fast_first_token_commits_to_first_tier() {
        let model = ScriptedModel::new(vec![
            (
                "primary".to_string(),
                Duration::from_millis(10),
                Ok(vec!["hello", " world"]),
            ),
            (
                "fallback".to_string(),
                Duration::from_millis(1),
                Ok(vec!["unused"]),
            ),
        ]);
        let promoter = ModelPromoter::new(
            model.clone(),
            vec![tier("primary", 500), tier("fallback", 500)],
        );

        let output = promoter
            .complete("prompt", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, "hello world");
        assert_eq!(model.calls(), vec!["primary"]);
    }

    #[tokio::test]
    async fn timeout_promotes_to_next_tier_exactly_once() {
        let model = ScriptedModel::new(vec![
            (
                "slow".to_string(),
                Duration::from_millis(500),
                Ok(vec!["too late"]),
            ),
            (
                "fast".to_string(),
                Duration::from_millis(5),
                Ok(vec!["promoted"]),
            ),
        ]);
        let promoter =
            ModelPromoter::new(model.clone(), vec![tier("slow", 50), tier("fast", 500)]);

        let output = promoter
            .complete("prompt", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, "promoted");
        assert_eq!(model.calls(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn non_timeout_error_aborts_without_promoting() {
        let model = ScriptedModel::new(vec![
            (
                "broken".to_string(),
                Duration::from_millis(5),
                Err((|| LlmError::Api("500".to_string())) as fn() -> LlmError),
            ),
            (
                "fallback".to_string(),
                Duration::from_millis(5),
                Ok(vec!["unused"]),
            ),
        ]);
        let promoter = ModelPromoter::new(
            model.clone(),
            vec![tier("broken", 500), tier("fallback", 500)],
        );

        let result = promoter.complete("prompt", &CancellationToken::new()).await;
        assert!(matches!(result, Err(LlmError::Api(_))));
        assert_eq!(model.calls(), vec!["broken"]);
    }

    #[tokio::test]
    async fn exhausting_all_tiers_surfaces_timeout() {
        let model = ScriptedModel::new(vec![
            (
                "slow-a".to_string(),
                Duration::from_millis(500),
                Ok(vec!["late"]),
            ),
            (
                "slow-b".to_string(),
                Duration::from_millis(500),
                Ok(vec!["late"]),
            ),
        ]);
        let promoter = ModelPromoter::new(
            model.clone(),
            vec![tier("slow-a", 30), tier("slow-b", 30)],
        );

        let result = promoter.complete("prompt", &CancellationToken::new()).await;
        assert!(matches!(result, Err(LlmError::TiersExhausted)));
        assert_eq!(model.calls(), vec!["slow-a", "slow-b"]);
    }

    #[tokio::test]
    async fn run_cancellation_stops_the_chain() {
        let model = ScriptedModel::new(vec![(
            "slow".to_string(),
            Duration::from_millis(500),
            Ok(vec!["late"]),
        )]);
        let promoter = ModelPromoter::new(model.clone(), vec![tier("slow", 5000)]);

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let result = promoter.complete("prompt", &cancel).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}
