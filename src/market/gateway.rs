use crate::config::config::{LimitsCfg, PolymarketCfg, TimeoutsCfg};
use crate::core::error::PredictError;
use crate::core::types::{Category, Event, EventReference, FamilyType, Outcome};
use crate::market::client::{parse_reference, MarketSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Retries per source on transient failure.
const SOURCE_RETRIES: usize = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

const MOCK_RULES: &str = "No matching market was found on Polymarket. \
The forecast below uses AI models only, without market data.";

/// Horizon assumed for mock events; nothing resolves a placeholder.
const MOCK_DAYS_TO_RESOLUTION: f64 = 30.0;

#[derive(Clone, Debug, PartialEq)]
pub struct LowProbabilityInfo {
    pub threshold: f64,
    pub max_probability: f64,
    pub min_probability: f64,
}

/// Live order-book probe, used as the last-resort probability candidate
/// when neither the event nor its outcomes carry a quote.
#[async_trait]
pub trait OrderBookProbe: Send + Sync {
    /// Midpoint as a percentage in [0, 100], if the book has one.
    async fn midpoint(&self, market_id: &str) -> Result<Option<f64>>;
}

pub struct ClobProbe {
    client: Client,
    cfg: PolymarketCfg,
}

impl ClobProbe {
    pub fn new(cfg: PolymarketCfg, client: Client) -> Self {
        Self { client, cfg }
    }
}

#[async_trait]
impl OrderBookProbe for ClobProbe {
    async fn midpoint(&self, market_id: &str) -> Result<Option<f64>> {
        let url = format!("{}/midpoint", self.cfg.clob_url);
        let res = self
            .client
            .get(&url)
            .query(&[("market", market_id)])
            .send()
            .await
            .context("requesting order-book midpoint")?;

        if !res.status().is_success() {
            anyhow::bail!("clob midpoint error: {}", res.status());
        }

        let body: serde_json::Value = res.json().await.context("parsing midpoint")?;
        let mid = body
            .get("mid")
            .and_then(|v| match v {
                serde_json::Value::String(s) => s.parse::<f64>().ok(),
                serde_json::Value::Number(n) => n.as_f64(),
                _ => None,
            })
            .filter(|m| m.is_finite());
        Ok(mid.map(|m| m * 100.0))
    }
}

/// Resolves an event reference through a cascade of market sources,
/// bounded by the market budget. Sources are tried in declared order;
/// transient failures retry with backoff, a clean miss moves straight
/// to the next source.
pub struct MarketGateway {
    sources: Vec<Arc<dyn MarketSource>>,
    probe: Arc<dyn OrderBookProbe>,
    timeouts: TimeoutsCfg,
    limits: LimitsCfg,
}

impl MarketGateway {
    pub fn new(
        sources: Vec<Arc<dyn MarketSource>>,
        probe: Arc<dyn OrderBookProbe>,
        timeouts: TimeoutsCfg,
        limits: LimitsCfg,
    ) -> Self {
        Self {
            sources,
            probe,
            timeouts,
            limits,
        }
    }

    pub async fn resolve(
        &self,
        reference: &EventReference,
        deadline: Instant,
    ) -> Result<Event, PredictError> {
        let query = parse_reference(reference)?;
        let budget_end = (Instant::now() + self.timeouts.market).min(deadline);

        for source in &self.sources {
            let mut delay = RETRY_BASE_DELAY;
            for attempt in 0..=SOURCE_RETRIES {
                let now = Instant::now();
                if now >= budget_end {
                    warn!("market budget exhausted during cascade");
                    if now >= deadline {
                        return Err(PredictError::Timeout);
                    }
                    return Err(PredictError::Resolution(
                        "all market sources failed within budget".into(),
                    ));
                }
                let call_budget = self.timeouts.source.min(budget_end - now);

                match tokio::time::timeout(call_budget, source.resolve(&query)).await {
                    Ok(Ok(Some(event))) => {
                        let event = sanitize(event);
                        if event.outcomes.is_empty() {
                            // Resolved but unusable; treat as a miss.
                            warn!(source = source.name(), "event resolved with no usable outcomes");
                            break;
                        }
                        info!(
                            source = source.name(),
                            outcomes = event.outcomes.len(),
                            question = %event.question,
                            "market resolved"
                        );
                        metrics::counter!("polyfuse_market_resolutions_total", "source" => source.name())
                            .increment(1);
                        check_market_sum(&event);
                        return Ok(event);
                    }
                    Ok(Ok(None)) => break, // not found here, next source
                    Ok(Err(e)) => {
                        warn!(
                            source = source.name(),
                            attempt,
                            error = %format!("{:#}", e),
                            "market source failed"
                        );
                    }
                    Err(_) => {
                        warn!(source = source.name(), attempt, "market source timed out");
                    }
                }

                if attempt < SOURCE_RETRIES {
                    if Instant::now() + delay >= budget_end {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }

        Err(PredictError::Resolution(
            "all market sources failed".into(),
        ))
    }

    /// Placeholder event after total resolution failure; downstream
    /// treats it identically except for the low-probability filter and
    /// signal emission.
    pub fn mock_event(&self, reference: &EventReference) -> Event {
        Event {
            question: reference.raw().trim().to_string(),
            rules: MOCK_RULES.to_string(),
            market_slug: None,
            market_id: None,
            resolution_date: None,
            days_to_resolution: Some(MOCK_DAYS_TO_RESOLUTION),
            outcomes: vec![Outcome::new("Yes", None)],
            family_type: FamilyType::Hybrid,
            category: Category::Other,
            enrichment: None,
            is_mock: true,
        }
    }

    /// Gather probability candidates and flag the event when even the
    /// best of them sits under the threshold. Zero-valued or absent data
    /// never triggers; mock events are exempt.
    pub async fn low_probability_check(&self, event: &Event) -> Option<LowProbabilityInfo> {
        if event.is_mock {
            return None;
        }
        let threshold = self.limits.low_probability_threshold;

        let mut candidates: Vec<f64> = event
            .outcomes
            .iter()
            .filter_map(|o| o.market_probability)
            .filter(|p| *p > 0.0 && *p <= 100.0)
            .collect();

        if candidates.is_empty() {
            if let Some(market_id) = &event.market_id {
                match self.probe.midpoint(market_id).await {
                    Ok(Some(mid)) if mid > 0.0 && mid <= 100.0 => candidates.push(mid),
                    Ok(_) => {}
                    Err(e) => warn!(error = %format!("{:#}", e), "order-book probe failed"),
                }
            }
        }

        if candidates.is_empty() {
            return None;
        }

        let max = candidates.iter().cloned().fold(f64::MIN, f64::max);
        let min = candidates.iter().cloned().fold(f64::MAX, f64::min);
        if max < threshold {
            warn!(max, min, threshold, "low-probability event flagged");
            return Some(LowProbabilityInfo {
                threshold,
                max_probability: max,
                min_probability: min,
            });
        }
        None
    }
}

/// Clamp quoted probabilities and day counts into their documented
/// ranges before the event crosses into the pipeline.
fn sanitize(mut event: Event) -> Event {
    for outcome in &mut event.outcomes {
        if let Some(p) = outcome.market_probability {
            if !p.is_finite() {
                outcome.market_probability = None;
            } else if !(0.0..=100.0).contains(&p) {
                warn!(outcome = %outcome.name, p, "market probability clamped");
                outcome.market_probability = Some(p.clamp(0.0, 100.0));
            }
        }
    }
    if let Some(days) = event.days_to_resolution {
        if !days.is_finite() || days < 0.0 {
            event.days_to_resolution = Some(0.0);
        }
    }
    event
}

/// Observed-market tolerance: active quotes in a competing family should
/// sum near 100. Violations are logged, never fatal.
fn check_market_sum(event: &Event) {
    let probs: Vec<f64> = event
        .outcomes
        .iter()
        .filter(|o| o.active)
        .filter_map(|o| o.market_probability)
        .collect();
    if probs.len() >= 2 {
        let total: f64 = probs.iter().sum();
        if !(80.0..=120.0).contains(&total) {
            warn!(total, "active market quotes sum outside tolerance window");
        }
    }
}
