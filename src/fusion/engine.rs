use crate::config::config::FusionCfg;
use crate::core::types::{Category, Confidence, FusedOutcome, ModelResponse};
use crate::fusion::calibration::CalibratorSet;
use crate::fusion::math::{clamp_probability, jaccard_similarity, weighted_mean, weighted_std};
use crate::orchestrator::registry::ModelRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reasonings closer than this are considered restatements and the
/// secondary one is suppressed from the summary.
const SUMMARY_SIMILARITY_THRESHOLD: f64 = 0.9;

const NO_PREDICTIONS_SUMMARY: &str = "no model predictions available";

/// Weighted aggregation of model responses for a single outcome, plus
/// market blending and optional per-category calibration.
pub struct FusionEngine {
    registry: Arc<ModelRegistry>,
    cfg: FusionCfg,
    calibrators: CalibratorSet,
}

impl FusionEngine {
    pub fn new(registry: Arc<ModelRegistry>, cfg: FusionCfg) -> Self {
        let calibrators = CalibratorSet::from_cfg(&cfg);
        Self {
            registry,
            cfg,
            calibrators,
        }
    }

    #[cfg(test)]
    pub fn with_calibrators(
        registry: Arc<ModelRegistry>,
        cfg: FusionCfg,
        calibrators: CalibratorSet,
    ) -> Self {
        Self {
            registry,
            cfg,
            calibrators,
        }
    }

    fn confidence_factor(&self, confidence: Confidence) -> f64 {
        match confidence {
            Confidence::Low => self.cfg.confidence_low,
            Confidence::Medium => self.cfg.confidence_medium,
            Confidence::High => self.cfg.confidence_high,
        }
    }

    /// Fuse one outcome's model responses with its market quote.
    ///
    /// Order-independent by construction: the weighted sums commute, and
    /// the summary picks responses by (confidence, model id) rather than
    /// map iteration order.
    pub fn fuse(
        &self,
        outcome_name: &str,
        responses: &HashMap<String, ModelResponse>,
        market_prob: Option<f64>,
        category: Category,
    ) -> FusedOutcome {
        let mut valid: Vec<&ModelResponse> =
            responses.values().filter(|r| r.is_valid()).collect();
        // Deterministic processing order regardless of map layout.
        valid.sort_by(|a, b| a.model_id.cmp(&b.model_id));

        if valid.is_empty() {
            debug!(outcome = outcome_name, "no valid model responses, market-only blend");
            return FusedOutcome {
                outcome_name: outcome_name.to_string(),
                model_only_prob: None,
                blended_prob: market_prob.filter(|p| p.is_finite()),
                uncertainty: 0.0,
                model_count: 0,
                disagreement: 0.0,
                summary: NO_PREDICTIONS_SUMMARY.to_string(),
                weight_source: self.cfg.weight_source.clone(),
                calibration_applied: false,
            };
        }

        let mut probabilities = Vec::with_capacity(valid.len());
        let mut weights = Vec::with_capacity(valid.len());
        for response in &valid {
            let base = self.registry.weight_of(&response.model_id);
            let factor = self.confidence_factor(response.confidence);
            let weight = base * factor;
            if weight <= 0.0 {
                // Config validation rules this out; reaching here is a bug.
                warn!(model = %response.model_id, weight, "non-positive effective weight, skipping response");
                continue;
            }
            probabilities.push(response.probability.unwrap_or_default());
            weights.push(weight);
        }

        let mean = weighted_mean(&probabilities, &weights);
        let uncertainty = weighted_std(&probabilities, &weights, mean);
        let disagreement = (uncertainty / 50.0).clamp(0.0, 1.0);

        let calibrator = self.calibrators.for_category(category);
        let calibration_applied = !calibrator.is_identity();
        let model_only = clamp_probability(calibrator.apply(clamp_probability(mean)));

        let blended = match market_prob.filter(|p| p.is_finite()) {
            Some(market) => clamp_probability(
                self.cfg.market_blend_alpha * model_only
                    + (1.0 - self.cfg.market_blend_alpha) * market,
            ),
            None => model_only,
        };

        FusedOutcome {
            outcome_name: outcome_name.to_string(),
            model_only_prob: Some(model_only),
            blended_prob: Some(blended),
            uncertainty,
            model_count: valid.len(),
            disagreement,
            summary: self.summarize(&valid),
            weight_source: self.cfg.weight_source.clone(),
            calibration_applied,
        }
    }

    /// Primary reasoning from the highest-confidence response; a second
    /// insight is appended unless it restates the first.
    fn summarize(&self, valid: &[&ModelResponse]) -> String {
        let mut ranked: Vec<&&ModelResponse> = valid
            .iter()
            .filter(|r| !r.reasoning.trim().is_empty())
            .collect();
        if ranked.is_empty() {
            return "models returned no rationale".to_string();
        }
        ranked.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| a.model_id.cmp(&b.model_id))
        });

        let primary = ranked[0].reasoning.trim();
        for secondary in ranked.iter().skip(1) {
            let text = secondary.reasoning.trim();
            if jaccard_similarity(primary, text) < SUMMARY_SIMILARITY_THRESHOLD {
                return format!("{} {}", primary, text);
            }
            debug!(model = %secondary.model_id, "redundant insight suppressed");
        }
        primary.to_string()
    }
}
