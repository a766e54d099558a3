use crate::config::config::ModelCfg;
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::info;

/// Weight applied to a fallback model relative to its primary.
const FALLBACK_WEIGHT_FACTOR: f64 = 0.9;

#[derive(Clone, Debug)]
pub struct ModelSpec {
    pub id: String,
    pub display_name: String,
    pub endpoint: String,
    pub api_key_env: String,
    pub base_weight: f64,
    pub fallback: Option<String>,
    /// Registered as another model's degradation target; excluded from
    /// the primary dispatch pool.
    pub is_fallback: bool,
}

/// Read-only model pool, built once at startup from configuration.
///
/// The fusion engine receives this by shared reference for weight lookup;
/// it never dispatches through it.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    specs: BTreeMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn from_cfg(models: &[ModelCfg]) -> Result<Self> {
        let mut specs = BTreeMap::new();
        let mut disabled = Vec::new();

        for cfg in models {
            if !cfg.enabled {
                disabled.push(cfg.display_name.clone());
                continue;
            }
            anyhow::ensure!(
                cfg.base_weight > 0.0,
                "model {} has non-positive base weight",
                cfg.id
            );

            specs.insert(
                cfg.id.clone(),
                ModelSpec {
                    id: cfg.id.clone(),
                    display_name: cfg.display_name.clone(),
                    endpoint: cfg.endpoint.clone(),
                    api_key_env: cfg.api_key_env.clone(),
                    base_weight: cfg.base_weight,
                    fallback: cfg.fallback.clone(),
                    is_fallback: false,
                },
            );

            // A declared fallback rides on the primary's endpoint with a
            // slightly reduced weight; only registered while the primary
            // is enabled, and never dispatched directly.
            if let Some(fallback_id) = &cfg.fallback {
                specs.entry(fallback_id.clone()).or_insert(ModelSpec {
                    id: fallback_id.clone(),
                    display_name: cfg
                        .fallback_display_name
                        .clone()
                        .unwrap_or_else(|| fallback_id.clone()),
                    endpoint: cfg.endpoint.clone(),
                    api_key_env: cfg.api_key_env.clone(),
                    base_weight: cfg.base_weight * FALLBACK_WEIGHT_FACTOR,
                    fallback: None,
                    is_fallback: true,
                });
            }
        }

        let active: Vec<&str> = specs.values().map(|s| s.display_name.as_str()).collect();
        info!(active = ?active, disabled = ?disabled, "model registry loaded");

        Ok(Self { specs })
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelSpec> {
        self.specs.get(model_id)
    }

    /// Base fusion weight; unknown models fall back to 1.0 so a stray
    /// response never zeroes out of the ensemble.
    pub fn weight_of(&self, model_id: &str) -> f64 {
        self.specs
            .get(model_id)
            .map(|s| s.base_weight)
            .unwrap_or(1.0)
    }

    /// Dispatchable model ids in lexicographic order, fallbacks excluded.
    /// The classifier depends on this ordering for deterministic
    /// dimension assignment.
    pub fn model_ids(&self) -> Vec<String> {
        self.specs
            .values()
            .filter(|s| !s.is_fallback)
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
