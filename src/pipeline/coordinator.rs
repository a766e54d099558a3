use crate::classify::classifier::classify;
use crate::classify::dimensions::assign_dimensions;
use crate::config::config::{LimitsCfg, TimeoutsCfg, TradeCfg};
use crate::core::error::PredictError;
use crate::core::types::{
    EnrichmentContext, Event, EventReference, FusedOutcome, Outcome, Prediction,
};
use crate::enrich::ContextProvider;
use crate::fusion::engine::FusionEngine;
use crate::fusion::normalize::normalize_all;
use crate::market::gateway::MarketGateway;
use crate::orchestrator::orchestrator::ModelOrchestrator;
use crate::prompt::composer::compose;
use crate::signal::evaluator::evaluate;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

/// End-to-end forecasting pipeline under one overall deadline.
///
/// Past resolution, nothing here returns an error for partial failure:
/// missing model data degrades to nulls, an expired deadline degrades to
/// a flagged partial result.
pub struct Pipeline {
    gateway: MarketGateway,
    orchestrator: Arc<ModelOrchestrator>,
    fusion: Arc<FusionEngine>,
    providers: Vec<Arc<dyn ContextProvider>>,
    trade: TradeCfg,
    timeouts: TimeoutsCfg,
    limits: LimitsCfg,
    mock_on_resolution_failure: bool,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: MarketGateway,
        orchestrator: Arc<ModelOrchestrator>,
        fusion: Arc<FusionEngine>,
        providers: Vec<Arc<dyn ContextProvider>>,
        trade: TradeCfg,
        timeouts: TimeoutsCfg,
        limits: LimitsCfg,
        mock_on_resolution_failure: bool,
    ) -> Self {
        Self {
            gateway,
            orchestrator,
            fusion,
            providers,
            trade,
            timeouts,
            limits,
            mock_on_resolution_failure,
        }
    }

    pub async fn predict(&self, reference: &EventReference) -> Result<Prediction, PredictError> {
        let deadline = Instant::now() + self.timeouts.total;
        metrics::counter!("polyfuse_predictions_total").increment(1);

        // 1. Resolve the market, optionally degrading to a mock event.
        let mut event = match self.gateway.resolve(reference, deadline).await {
            Ok(event) => event,
            Err(err @ PredictError::Reference(_)) => return Err(err),
            Err(err) if self.mock_on_resolution_failure => {
                warn!(error = %err, "resolution failed, substituting mock event");
                metrics::counter!("polyfuse_mock_events_total").increment(1);
                self.gateway.mock_event(reference)
            }
            Err(err) => return Err(err),
        };

        // 2. Low-probability short circuit (skipped for mocks).
        if let Some(info) = self.gateway.low_probability_check(&event).await {
            return Err(PredictError::LowProbability {
                max_probability: info.max_probability,
                threshold: info.threshold,
            });
        }

        // 3. Classification and enrichment.
        let classification = classify(&event);
        event.category = classification.category;
        event.family_type = classification.family_type;

        let mut ctx = EnrichmentContext::default();
        for provider in &self.providers {
            provider.apply(&mut ctx).await;
        }
        if !ctx.is_empty() {
            event.enrichment = Some(ctx);
        }

        // 4. Fan out per outcome; order preserved via indexed slots.
        let assignments = Arc::new(assign_dimensions(
            event.category,
            &self.orchestrator.registry().model_ids(),
        ));
        let event = Arc::new(event);
        let semaphore = Arc::new(Semaphore::new(self.limits.outcome_concurrency));

        let mut tasks: JoinSet<(usize, FusedOutcome)> = JoinSet::new();
        for (index, outcome) in event.outcomes.iter().cloned().enumerate() {
            let event = Arc::clone(&event);
            let assignments = Arc::clone(&assignments);
            let orchestrator = Arc::clone(&self.orchestrator);
            let fusion = Arc::clone(&self.fusion);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        return (
                            index,
                            fusion.fuse(
                                &outcome.name,
                                &HashMap::new(),
                                outcome.market_probability,
                                event.category,
                            ),
                        )
                    }
                };

                let prompts: HashMap<String, String> = assignments
                    .values()
                    .map(|a| (a.model_id.clone(), compose(&event, &outcome, a)))
                    .collect();

                let responses = orchestrator.dispatch_all(prompts, deadline).await;
                let fused = fusion.fuse(
                    &outcome.name,
                    &responses,
                    outcome.market_probability,
                    event.category,
                );
                (index, fused)
            });
        }

        let mut slots: Vec<Option<FusedOutcome>> = vec![None; event.outcomes.len()];
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, fused)))) => slots[index] = Some(fused),
                Ok(Some(Err(join_err))) => {
                    warn!(?join_err, "outcome task panicked or was cancelled");
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    let abandoned = tasks.len();
                    warn!(abandoned, "overall deadline expired, abandoning outcome tasks");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        // Abandoned outcomes degrade to market-only blends.
        let mut fused_outcomes: Vec<FusedOutcome> = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            let outcome = &event.outcomes[index];
            fused_outcomes.push(slot.unwrap_or_else(|| {
                self.fusion.fuse(
                    &outcome.name,
                    &HashMap::new(),
                    outcome.market_probability,
                    event.category,
                )
            }));
        }

        check_invariants(&fused_outcomes)?;

        // 5. Cross-outcome normalization.
        let normalization = normalize_all(&mut fused_outcomes, event.family_type);

        // 6. Trade signal: the single outcome, or the widest edge in a
        // multi-outcome event. Mock events never emit one.
        let trade_signal = if event.is_mock {
            None
        } else {
            self.pick_signal_target(&event, &fused_outcomes)
                .and_then(|(fused, outcome)| {
                    evaluate(
                        fused,
                        outcome.market_probability,
                        event.days_to_resolution,
                        &self.trade,
                    )
                })
        };

        let event = Arc::try_unwrap(event).unwrap_or_else(|arc| (*arc).clone());
        let prediction = Prediction {
            event,
            outcomes: fused_outcomes,
            normalization,
            trade_signal,
            timed_out,
            classification_source: classification.decision_source.to_string(),
            timestamp: Utc::now(),
        };

        info!(
            outcomes = prediction.outcomes.len(),
            timed_out = prediction.timed_out,
            signal = prediction
                .trade_signal
                .as_ref()
                .map(|s| s.signal.as_str())
                .unwrap_or("none"),
            "prediction complete"
        );
        Ok(prediction)
    }

    fn pick_signal_target<'a>(
        &self,
        event: &'a Event,
        fused: &'a [FusedOutcome],
    ) -> Option<(&'a FusedOutcome, &'a Outcome)> {
        if !event.is_multi_option() {
            return fused.first().zip(event.outcomes.first());
        }
        fused
            .iter()
            .zip(event.outcomes.iter())
            .filter_map(|(f, o)| {
                let ev = (f.model_only_prob? - o.market_probability?).abs();
                Some((ev, f, o))
            })
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, f, o)| (f, o))
    }
}

/// Post-fusion sanity: fused probabilities inside [0, 100]. A violation
/// is a bug in the fusion math, not bad input.
fn check_invariants(outcomes: &[FusedOutcome]) -> Result<(), PredictError> {
    for fused in outcomes {
        for value in [fused.model_only_prob, fused.blended_prob].into_iter().flatten() {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(PredictError::Invariant(format!(
                    "fused probability {} for '{}' outside [0, 100]",
                    value, fused.outcome_name
                )));
            }
        }
        if fused.uncertainty < 0.0 {
            return Err(PredictError::Invariant(format!(
                "negative uncertainty for '{}'",
                fused.outcome_name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::{FusionCfg, ModelCfg};
    use crate::core::types::{Category, FamilyType, Signal};
    use crate::market::client::{MarketQuery, MarketSource};
    use crate::market::gateway::OrderBookProbe;
    use crate::orchestrator::client::ModelClient;
    use crate::orchestrator::registry::ModelRegistry;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedSource(Option<Event>);

    #[async_trait]
    impl MarketSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn resolve(&self, _query: &MarketQuery) -> AnyResult<Option<Event>> {
            match &self.0 {
                Some(e) => Ok(Some(e.clone())),
                None => anyhow::bail!("source down"),
            }
        }
    }

    struct NoProbe;

    #[async_trait]
    impl OrderBookProbe for NoProbe {
        async fn midpoint(&self, _market_id: &str) -> AnyResult<Option<f64>> {
            Ok(None)
        }
    }

    /// Per-model canned probabilities; multi-outcome aware via the
    /// outcome name embedded in the prompt.
    enum FakeModels {
        PerModel(HashMap<String, f64>),
        PerOutcome(Vec<(&'static str, f64)>),
        AlwaysFail,
        Stall,
    }

    #[async_trait]
    impl ModelClient for FakeModels {
        async fn invoke(
            &self,
            _endpoint: &str,
            model_id: &str,
            _api_key: &str,
            prompt: &str,
            _timeout: Duration,
        ) -> AnyResult<String> {
            let prob = match self {
                FakeModels::PerModel(map) => *map
                    .get(model_id)
                    .ok_or_else(|| anyhow::anyhow!("unknown model"))?,
                FakeModels::PerOutcome(pairs) => {
                    let (_, p) = pairs
                        .iter()
                        .find(|(name, _)| prompt.contains(name))
                        .ok_or_else(|| anyhow::anyhow!("no outcome in prompt"))?;
                    *p
                }
                FakeModels::AlwaysFail => anyhow::bail!("upstream gateway down"),
                FakeModels::Stall => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    50.0
                }
            };
            Ok(format!(
                r#"{{"probability": {}, "confidence": "medium", "reasoning": "test rationale for {}"}}"#,
                prob, model_id
            ))
        }
    }

    fn model_cfgs(ids: &[&str]) -> Vec<ModelCfg> {
        ids.iter()
            .map(|id| ModelCfg {
                id: id.to_string(),
                display_name: id.to_string(),
                endpoint: "https://gateway.test".into(),
                api_key_env: String::new(),
                base_weight: 1.0,
                enabled: true,
                fallback: None,
                fallback_display_name: None,
            })
            .collect()
    }

    fn binary_event(market_prob: Option<f64>) -> Event {
        Event {
            question: "Will X happen by June?".into(),
            rules: String::new(),
            market_slug: Some("will-x-happen".into()),
            market_id: Some("m1".into()),
            resolution_date: None,
            days_to_resolution: Some(30.0),
            outcomes: vec![Outcome::new("Yes", market_prob)],
            family_type: FamilyType::Hybrid,
            category: Category::Other,
            enrichment: None,
            is_mock: false,
        }
    }

    fn candidate_event() -> Event {
        Event {
            question: "Outcome of the primary".into(),
            rules: String::new(),
            market_slug: Some("primary".into()),
            market_id: Some("ev1".into()),
            resolution_date: None,
            days_to_resolution: Some(60.0),
            outcomes: vec![
                Outcome::new("Candidate Alpha", Some(40.0)),
                Outcome::new("Candidate Beta", Some(35.0)),
                Outcome::new("Candidate Gamma", Some(27.0)),
            ],
            family_type: FamilyType::Hybrid,
            category: Category::Other,
            enrichment: None,
            is_mock: false,
        }
    }

    fn fast_timeouts(total: Duration) -> TimeoutsCfg {
        TimeoutsCfg {
            model_call: Duration::from_millis(300),
            total,
            market: Duration::from_secs(2),
            source: Duration::from_millis(200),
        }
    }

    fn pipeline(
        source_event: Option<Event>,
        models: FakeModels,
        model_ids: &[&str],
        total: Duration,
        mock_on_failure: bool,
    ) -> Pipeline {
        let registry =
            Arc::new(ModelRegistry::from_cfg(&model_cfgs(model_ids)).unwrap());
        let timeouts = fast_timeouts(total);
        let limits = LimitsCfg::default();
        let gateway = MarketGateway::new(
            vec![Arc::new(FixedSource(source_event))],
            Arc::new(NoProbe),
            timeouts.clone(),
            limits.clone(),
        );
        let orchestrator = Arc::new(ModelOrchestrator::new(
            Arc::clone(&registry),
            Arc::new(models),
            timeouts.model_call,
            limits.model_concurrency,
        ));
        let fusion = Arc::new(FusionEngine::new(registry, FusionCfg::default()));
        Pipeline::new(
            gateway,
            orchestrator,
            fusion,
            Vec::new(),
            TradeCfg::default(),
            timeouts,
            limits,
            mock_on_failure,
        )
    }

    fn slug_ref() -> EventReference {
        EventReference::Slug("any-slug".into())
    }

    #[tokio::test]
    async fn binary_consensus_produces_a_buy_signal() {
        // Three agreeing models vs a 50% market.
        let models = FakeModels::PerModel(HashMap::from([
            ("m1".to_string(), 70.0),
            ("m2".to_string(), 72.0),
            ("m3".to_string(), 68.0),
        ]));
        let p = pipeline(
            Some(binary_event(Some(50.0))),
            models,
            &["m1", "m2", "m3"],
            Duration::from_secs(30),
            false,
        );

        let prediction = p.predict(&slug_ref()).await.unwrap();
        assert!(!prediction.timed_out);
        assert_eq!(prediction.outcomes.len(), 1);

        let fused = &prediction.outcomes[0];
        assert!((fused.model_only_prob.unwrap() - 70.0).abs() < 0.1);
        assert!((fused.blended_prob.unwrap() - 66.0).abs() < 0.1);
        assert_eq!(fused.model_count, 3);

        let signal = prediction.trade_signal.unwrap();
        assert_eq!(signal.signal, Signal::Buy);
        assert!((signal.ev - 20.0).abs() < 0.1);
        assert!((signal.annualized_ev - signal.ev * 365.0 / 30.0).abs() < 0.5);
    }

    #[tokio::test]
    async fn mutually_exclusive_outcomes_are_normalized() {
        // Consensus 50/30/25 sums to 105 and must be rescaled to 100.
        let models = FakeModels::PerOutcome(vec![
            ("Candidate Alpha", 50.0),
            ("Candidate Beta", 30.0),
            ("Candidate Gamma", 25.0),
        ]);
        let p = pipeline(
            Some(candidate_event()),
            models,
            &["m1", "m2"],
            Duration::from_secs(30),
            false,
        );

        let prediction = p.predict(&slug_ref()).await.unwrap();
        assert_eq!(prediction.event.family_type, FamilyType::MutuallyExclusive);
        assert!(prediction.normalization.normalized);
        assert!((prediction.normalization.total_before - 105.0).abs() < 0.1);

        let probs: Vec<f64> = prediction
            .outcomes
            .iter()
            .map(|o| o.model_only_prob.unwrap())
            .collect();
        assert!((probs[0] - 47.62).abs() < 0.05);
        assert!((probs[1] - 28.57).abs() < 0.05);
        assert!((probs[2] - 23.81).abs() < 0.05);
        assert!((probs.iter().sum::<f64>() - 100.0).abs() < 0.01);

        // Outcome order preserved from the source.
        assert_eq!(prediction.outcomes[0].outcome_name, "Candidate Alpha");
        assert_eq!(prediction.outcomes[2].outcome_name, "Candidate Gamma");
    }

    #[tokio::test]
    async fn all_models_failing_degrades_to_market_only() {
        let p = pipeline(
            Some(binary_event(Some(42.0))),
            FakeModels::AlwaysFail,
            &["m1", "m2"],
            Duration::from_secs(30),
            false,
        );

        let prediction = p.predict(&slug_ref()).await.unwrap();
        let fused = &prediction.outcomes[0];
        assert_eq!(fused.model_only_prob, None);
        assert_eq!(fused.blended_prob, Some(42.0));
        assert_eq!(fused.model_count, 0);
        assert_eq!(fused.summary, "no model predictions available");
        assert!(prediction.trade_signal.is_none());
    }

    #[tokio::test]
    async fn resolution_failure_substitutes_a_mock_when_configured() {
        let models = FakeModels::PerModel(HashMap::from([("m1".to_string(), 65.0)]));
        let p = pipeline(None, models, &["m1"], Duration::from_secs(30), true);

        let prediction = p
            .predict(&EventReference::FreeText("Will Y occur this year?".into()))
            .await
            .unwrap();
        assert!(prediction.event.is_mock);
        assert_eq!(prediction.event.question, "Will Y occur this year?");
        // Models still ran; the signal is withheld for mocks.
        assert!(prediction.outcomes[0].model_only_prob.is_some());
        assert!(prediction.trade_signal.is_none());
    }

    #[tokio::test]
    async fn resolution_failure_without_mock_is_an_error() {
        let p = pipeline(
            None,
            FakeModels::AlwaysFail,
            &["m1"],
            Duration::from_secs(30),
            false,
        );
        let err = p.predict(&slug_ref()).await.unwrap_err();
        assert!(matches!(err, PredictError::Resolution(_)));
    }

    #[tokio::test]
    async fn low_probability_event_short_circuits() {
        let models = FakeModels::PerModel(HashMap::from([("m1".to_string(), 65.0)]));
        let p = pipeline(
            Some(binary_event(Some(0.4))),
            models,
            &["m1"],
            Duration::from_secs(30),
            false,
        );
        let err = p.predict(&slug_ref()).await.unwrap_err();
        assert!(matches!(err, PredictError::LowProbability { .. }));
    }

    #[tokio::test]
    async fn expired_deadline_yields_a_flagged_partial_result() {
        // Four outcomes processed one at a time, each burning the full
        // per-model budget on a stalled upstream: the last cannot even
        // start before the overall deadline and must be abandoned.
        let mut event = candidate_event();
        event.outcomes.push(Outcome::new("Candidate Delta", Some(10.0)));
        let registry = Arc::new(ModelRegistry::from_cfg(&model_cfgs(&["m1"])).unwrap());
        let timeouts = TimeoutsCfg {
            model_call: Duration::from_millis(500),
            total: Duration::from_millis(1250),
            market: Duration::from_secs(2),
            source: Duration::from_millis(200),
        };
        let limits = LimitsCfg {
            outcome_concurrency: 1,
            ..Default::default()
        };
        let gateway = MarketGateway::new(
            vec![Arc::new(FixedSource(Some(event)))],
            Arc::new(NoProbe),
            timeouts.clone(),
            limits.clone(),
        );
        let orchestrator = Arc::new(ModelOrchestrator::new(
            Arc::clone(&registry),
            Arc::new(FakeModels::Stall),
            timeouts.model_call,
            limits.model_concurrency,
        ));
        let fusion = Arc::new(FusionEngine::new(registry, FusionCfg::default()));
        let p = Pipeline::new(
            gateway,
            orchestrator,
            fusion,
            Vec::new(),
            TradeCfg::default(),
            timeouts,
            limits,
            false,
        );

        let started = Instant::now();
        let prediction = p.predict(&slug_ref()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(prediction.timed_out);
        // Every outcome slot exists; abandoned ones are market-only.
        assert_eq!(prediction.outcomes.len(), 4);
        assert_eq!(prediction.outcomes[3].model_only_prob, None);
        assert_eq!(
            prediction.outcomes[3].blended_prob,
            prediction.event.outcomes[3].market_probability
        );
    }

    #[tokio::test]
    async fn multi_outcome_signal_targets_the_widest_edge() {
        // Beta has the largest |model - market| gap: |70 - 35| = 35.
        let models = FakeModels::PerOutcome(vec![
            ("Candidate Alpha", 42.0),
            ("Candidate Beta", 70.0),
            ("Candidate Gamma", 20.0),
        ]);
        let p = pipeline(
            Some(candidate_event()),
            models,
            &["m1"],
            Duration::from_secs(30),
            false,
        );

        let prediction = p.predict(&slug_ref()).await.unwrap();
        let signal = prediction.trade_signal.expect("signal expected");
        // After normalization the edge shrinks but Beta still leads.
        assert!(signal.ev.abs() > 1.0);
    }
}
