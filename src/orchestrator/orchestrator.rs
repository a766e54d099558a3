use crate::core::types::ModelResponse;
use crate::orchestrator::client::ModelClient;
use crate::orchestrator::parse::parse_reply;
use crate::orchestrator::registry::{ModelRegistry, ModelSpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

/// Retry delays after the first attempt. A retry that would overrun the
/// batch deadline is skipped.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Concurrent fan-out over the configured model pool.
///
/// `dispatch_all` never returns an error: every model ends up with a slot
/// in the response map, failed calls carrying their cause in `error`.
/// Whether an all-failed batch is still serviceable is the fusion
/// engine's call, not ours.
pub struct ModelOrchestrator {
    registry: Arc<ModelRegistry>,
    client: Arc<dyn ModelClient>,
    model_timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl ModelOrchestrator {
    pub fn new(
        registry: Arc<ModelRegistry>,
        client: Arc<dyn ModelClient>,
        model_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            client,
            model_timeout,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn registry(&self) -> Arc<ModelRegistry> {
        Arc::clone(&self.registry)
    }

    /// Batch budget: twice one model call, capped by the caller's deadline.
    fn batch_deadline(&self, deadline: Instant) -> Instant {
        let cap = Instant::now() + self.model_timeout * 2;
        cap.min(deadline)
    }

    pub async fn dispatch_all(
        &self,
        prompts: HashMap<String, String>,
        deadline: Instant,
    ) -> HashMap<String, ModelResponse> {
        let mut responses = HashMap::with_capacity(prompts.len());
        if prompts.is_empty() {
            warn!("dispatch_all called with no prompts");
            return responses;
        }

        let batch_deadline = self.batch_deadline(deadline);
        let dispatched: Vec<String> = prompts
            .keys()
            .filter(|id| self.registry.get(id).is_some())
            .cloned()
            .collect();
        let mut tasks: JoinSet<ModelResponse> = JoinSet::new();

        for (model_id, prompt) in prompts {
            let Some(spec) = self.registry.get(&model_id).cloned() else {
                warn!(model = %model_id, "prompt for unregistered model dropped");
                continue;
            };
            let fallback_spec = spec
                .fallback
                .as_ref()
                .and_then(|id| self.registry.get(id).cloned());
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&self.semaphore);
            let model_timeout = self.model_timeout;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        return ModelResponse::failed(model_id, "semaphore closed", Duration::ZERO)
                    }
                };
                let response = call_with_retries(
                    Arc::clone(&client),
                    &spec,
                    &prompt,
                    model_timeout,
                    batch_deadline,
                    RETRY_BACKOFF.len(),
                )
                .await;
                if response.is_valid() {
                    return response;
                }

                // Auto-degradation: one shot at the declared fallback
                // model with whatever budget is left.
                if let Some(fallback) = fallback_spec {
                    if Instant::now() < batch_deadline {
                        warn!(primary = %spec.id, fallback = %fallback.id, "degrading to fallback model");
                        let degraded =
                            call_with_retries(client, &fallback, &prompt, model_timeout, batch_deadline, 0)
                                .await;
                        if degraded.is_valid() {
                            return degraded;
                        }
                    }
                }
                response
            });
        }

        // Collect until the batch deadline; stragglers are aborted and
        // their results discarded.
        loop {
            let joined = tokio::time::timeout_at(batch_deadline, tasks.join_next()).await;
            match joined {
                Ok(Some(Ok(response))) => {
                    metrics::counter!(
                        "polyfuse_model_responses_total",
                        "valid" => if response.is_valid() { "true" } else { "false" }
                    )
                    .increment(1);
                    responses.insert(response.model_id.clone(), response);
                }
                Ok(Some(Err(join_err))) => {
                    warn!(?join_err, "model task panicked or was cancelled");
                }
                Ok(None) => break,
                Err(_) => {
                    let outstanding = tasks.len();
                    warn!(outstanding, "batch deadline expired, cancelling stragglers");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        // Stragglers keep their slot; their eventual results were
        // discarded with the abort.
        for model_id in dispatched {
            let degraded_to_fallback = self
                .registry
                .get(&model_id)
                .and_then(|s| s.fallback.as_ref())
                .is_some_and(|fb| responses.contains_key(fb));
            if !responses.contains_key(&model_id) && !degraded_to_fallback {
                responses.insert(
                    model_id.clone(),
                    ModelResponse::failed(model_id, "batch deadline exceeded", Duration::ZERO),
                );
            }
        }

        let valid = responses.values().filter(|r| r.is_valid()).count();
        info!(total = responses.len(), valid, "model batch complete");
        responses
    }
}

async fn call_with_retries(
    client: Arc<dyn ModelClient>,
    spec: &ModelSpec,
    prompt: &str,
    model_timeout: Duration,
    batch_deadline: Instant,
    max_retries: usize,
) -> ModelResponse {
    let api_key = std::env::var(&spec.api_key_env).unwrap_or_default();
    let started = Instant::now();
    let mut last_error = String::from("no attempts made");

    for attempt in 0..=max_retries {
        let now = Instant::now();
        if now >= batch_deadline {
            last_error = format!("deadline exhausted before attempt {}", attempt + 1);
            break;
        }
        let budget = model_timeout.min(batch_deadline - now);

        let call = client.invoke(&spec.endpoint, &spec.id, &api_key, prompt, budget);
        let outcome = tokio::time::timeout(budget, call).await;

        match outcome {
            Ok(Ok(raw)) => match parse_reply(&raw) {
                Ok(reply) => {
                    return ModelResponse {
                        model_id: spec.id.clone(),
                        probability: Some(reply.probability),
                        confidence: reply.confidence,
                        reasoning: reply.reasoning,
                        latency: started.elapsed(),
                        error: None,
                    };
                }
                Err(e) => {
                    last_error = format!("unparseable reply: {:#}", e);
                    warn!(model = %spec.id, attempt, error = %last_error, "parse failure");
                }
            },
            Ok(Err(e)) => {
                last_error = format!("{:#}", e);
                warn!(model = %spec.id, attempt, error = %last_error, "model call failed");
            }
            Err(_) => {
                last_error = format!("timed out after {:.1}s", budget.as_secs_f64());
                warn!(model = %spec.id, attempt, "model call timed out");
            }
        }

        if attempt < max_retries {
            let backoff = RETRY_BACKOFF[attempt.min(RETRY_BACKOFF.len() - 1)];
            if Instant::now() + backoff >= batch_deadline {
                last_error.push_str("; retry skipped, deadline too close");
                break;
            }
            tokio::time::sleep(backoff).await;
        }
    }

    ModelResponse::failed(spec.id.clone(), last_error, started.elapsed())
}
