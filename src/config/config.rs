use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub polymarket: PolymarketCfg,
    #[serde(default)]
    pub models: Vec<ModelCfg>,
    #[serde(default)]
    pub fusion: FusionCfg,
    #[serde(default)]
    pub trade: TradeCfg,
    #[serde(default)]
    pub timeouts: TimeoutsCfg,
    #[serde(default)]
    pub limits: LimitsCfg,
    #[serde(default)]
    pub assistant: AssistantCfg,
    #[serde(default)]
    pub enrichment: EnrichmentCfg,
    #[serde(default)]
    pub report: ReportCfg,
    /// Substitute a mock event when every market source fails instead of
    /// surfacing a resolution error.
    #[serde(rename = "mockOnResolutionFailure", default)]
    pub mock_on_resolution_failure: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpCfg {
    #[serde(rename = "userAgent", default = "default_ua")]
    pub user_agent: String,
    #[serde(with = "humantime_serde", default = "default_http_timeout")]
    pub timeout: Duration,
    #[serde(rename = "poolIdleTimeout", with = "humantime_serde", default = "default_pool_idle")]
    pub pool_idle_timeout: Duration,
    #[serde(rename = "tcpKeepAlive", with = "humantime_serde", default = "default_keep_alive")]
    pub tcp_keep_alive: Duration,
    #[serde(rename = "poolMaxIdlePerHost", default = "default_pool")]
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            user_agent: default_ua(),
            timeout: default_http_timeout(),
            pool_idle_timeout: default_pool_idle(),
            tcp_keep_alive: default_keep_alive(),
            pool_max_idle_per_host: default_pool(),
        }
    }
}
fn default_ua() -> String {
    "polyfuse/0.1".into()
}
fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_pool_idle() -> Duration {
    Duration::from_secs(90)
}
fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}
fn default_pool() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolymarketCfg {
    #[serde(rename = "gammaEventsUrl")]
    pub gamma_events_url: String,
    #[serde(rename = "gammaMarketsUrl")]
    pub gamma_markets_url: String,
    #[serde(rename = "clobUrl")]
    pub clob_url: String,
    #[serde(rename = "pageUrl")]
    pub page_url: String,
}

impl Default for PolymarketCfg {
    fn default() -> Self {
        Self {
            gamma_events_url: "https://gamma-api.polymarket.com/events".to_string(),
            gamma_markets_url: "https://gamma-api.polymarket.com/markets".to_string(),
            clob_url: "https://clob.polymarket.com".to_string(),
            page_url: "https://polymarket.com/event".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelCfg {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub endpoint: String,
    #[serde(rename = "apiKeyEnv", default)]
    pub api_key_env: String,
    #[serde(rename = "baseWeight", default = "default_weight")]
    pub base_weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(rename = "fallbackDisplayName", default)]
    pub fallback_display_name: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}
fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct FusionCfg {
    /// Share of the blend taken by the model consensus; the market quote
    /// gets the complement.
    #[serde(rename = "marketBlendAlpha", default = "default_alpha")]
    pub market_blend_alpha: f64,
    #[serde(rename = "confidenceLow", default = "default_conf_low")]
    pub confidence_low: f64,
    #[serde(rename = "confidenceMedium", default = "default_conf_medium")]
    pub confidence_medium: f64,
    #[serde(rename = "confidenceHigh", default = "default_conf_high")]
    pub confidence_high: f64,
    #[serde(rename = "weightSource", default = "default_weight_source")]
    pub weight_source: String,
    /// Per-category linear calibration factors; absent categories use the
    /// identity.
    #[serde(default)]
    pub calibrators: Vec<CalibratorCfg>,
}

impl Default for FusionCfg {
    fn default() -> Self {
        Self {
            market_blend_alpha: default_alpha(),
            confidence_low: default_conf_low(),
            confidence_medium: default_conf_medium(),
            confidence_high: default_conf_high(),
            weight_source: default_weight_source(),
            calibrators: Vec::new(),
        }
    }
}
fn default_alpha() -> f64 {
    0.8
}
fn default_conf_low() -> f64 {
    0.5
}
fn default_conf_medium() -> f64 {
    1.0
}
fn default_conf_high() -> f64 {
    1.5
}
fn default_weight_source() -> String {
    "config".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalibratorCfg {
    pub category: String,
    pub factor: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradeCfg {
    #[serde(rename = "evBuyThreshold", default = "default_ev_threshold")]
    pub ev_buy_threshold: f64,
    #[serde(rename = "evSellThreshold", default = "default_ev_threshold")]
    pub ev_sell_threshold: f64,
    #[serde(rename = "riskThreshold", default = "default_risk_threshold")]
    pub risk_threshold: f64,
    #[serde(rename = "riskCeiling", default = "default_risk_ceiling")]
    pub risk_ceiling: f64,
}

impl Default for TradeCfg {
    fn default() -> Self {
        Self {
            ev_buy_threshold: default_ev_threshold(),
            ev_sell_threshold: default_ev_threshold(),
            risk_threshold: default_risk_threshold(),
            risk_ceiling: default_risk_ceiling(),
        }
    }
}
fn default_ev_threshold() -> f64 {
    2.0
}
fn default_risk_threshold() -> f64 {
    0.6
}
fn default_risk_ceiling() -> f64 {
    0.9
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsCfg {
    #[serde(rename = "modelCall", with = "humantime_serde", default = "default_model_call")]
    pub model_call: Duration,
    #[serde(with = "humantime_serde", default = "default_total")]
    pub total: Duration,
    #[serde(with = "humantime_serde", default = "default_market")]
    pub market: Duration,
    /// Budget for one market source inside the cascade.
    #[serde(with = "humantime_serde", default = "default_source")]
    pub source: Duration,
}

impl Default for TimeoutsCfg {
    fn default() -> Self {
        Self {
            model_call: default_model_call(),
            total: default_total(),
            market: default_market(),
            source: default_source(),
        }
    }
}
fn default_model_call() -> Duration {
    Duration::from_secs(15)
}
fn default_total() -> Duration {
    Duration::from_secs(120)
}
fn default_market() -> Duration {
    Duration::from_secs(25)
}
fn default_source() -> Duration {
    Duration::from_secs(8)
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsCfg {
    #[serde(rename = "modelConcurrency", default = "default_model_concurrency")]
    pub model_concurrency: usize,
    #[serde(rename = "outcomeConcurrency", default = "default_outcome_concurrency")]
    pub outcome_concurrency: usize,
    #[serde(rename = "lowProbabilityThreshold", default = "default_low_prob")]
    pub low_probability_threshold: f64,
}

impl Default for LimitsCfg {
    fn default() -> Self {
        Self {
            model_concurrency: default_model_concurrency(),
            outcome_concurrency: default_outcome_concurrency(),
            low_probability_threshold: default_low_prob(),
        }
    }
}
fn default_model_concurrency() -> usize {
    5
}
fn default_outcome_concurrency() -> usize {
    3
}
fn default_low_prob() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantProviderCfg {
    pub id: String,
    pub endpoint: String,
    pub model: String,
    #[serde(rename = "apiKeyEnv", default)]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantCfg {
    /// Providers tried in declared order; the first success wins.
    #[serde(default)]
    pub providers: Vec<AssistantProviderCfg>,
    #[serde(rename = "providerTimeout", with = "humantime_serde", default = "default_provider_timeout")]
    pub provider_timeout: Duration,
}

impl Default for AssistantCfg {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            provider_timeout: default_provider_timeout(),
        }
    }
}
fn default_provider_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentCfg {
    #[serde(default)]
    pub news: bool,
    #[serde(rename = "worldSentiment", default)]
    pub world_sentiment: bool,
    #[serde(default)]
    pub assistant: bool,
    #[serde(rename = "cacheDir", default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for EnrichmentCfg {
    fn default() -> Self {
        Self {
            news: false,
            world_sentiment: false,
            assistant: false,
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> String {
    "cache".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportCfg {
    #[serde(rename = "logPath", default = "default_log_path")]
    pub log_path: String,
    #[serde(rename = "minWriteInterval", with = "humantime_serde", default = "default_write_interval")]
    pub min_write_interval: Duration,
}

impl Default for ReportCfg {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            min_write_interval: default_write_interval(),
        }
    }
}
fn default_log_path() -> String {
    "predictions.jsonl".into()
}
fn default_write_interval() -> Duration {
    Duration::from_secs(5)
}

impl AppCfg {
    pub fn load(path: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name(path))
            .add_source(config::Environment::default().separator("__"))
            .build()
            .context("building config")?;

        let app: AppCfg = cfg.try_deserialize().context("deserializing config")?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.polymarket.gamma_events_url.is_empty(),
            "polymarket.gammaEventsUrl missing"
        );
        anyhow::ensure!(
            !self.polymarket.gamma_markets_url.is_empty(),
            "polymarket.gammaMarketsUrl missing"
        );
        anyhow::ensure!(!self.models.is_empty(), "models must not be empty");
        for model in &self.models {
            anyhow::ensure!(!model.id.is_empty(), "model id must not be empty");
            anyhow::ensure!(
                model.base_weight > 0.0,
                "model {} baseWeight must be > 0",
                model.id
            );
            anyhow::ensure!(
                !model.endpoint.is_empty(),
                "model {} endpoint missing",
                model.id
            );
        }
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.fusion.market_blend_alpha),
            "fusion.marketBlendAlpha must lie in [0, 1]"
        );
        anyhow::ensure!(
            self.fusion.confidence_low > 0.0
                && self.fusion.confidence_medium > 0.0
                && self.fusion.confidence_high > 0.0,
            "fusion confidence factors must be > 0"
        );
        anyhow::ensure!(
            self.limits.model_concurrency > 0,
            "limits.modelConcurrency must be > 0"
        );
        anyhow::ensure!(
            self.limits.outcome_concurrency > 0,
            "limits.outcomeConcurrency must be > 0"
        );
        anyhow::ensure!(
            self.limits.low_probability_threshold >= 0.0,
            "limits.lowProbabilityThreshold must be >= 0"
        );
        anyhow::ensure!(
            self.trade.risk_ceiling >= self.trade.risk_threshold,
            "trade.riskCeiling must be >= trade.riskThreshold"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_cfg() -> AppCfg {
        AppCfg {
            models: vec![ModelCfg {
                id: "gpt-4o".into(),
                display_name: "GPT-4o".into(),
                endpoint: "https://gateway.test/v1/chat/completions".into(),
                api_key_env: "GATEWAY_KEY".into(),
                base_weight: 3.0,
                enabled: true,
                fallback: None,
                fallback_display_name: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = minimal_cfg();
        assert_eq!(cfg.fusion.market_blend_alpha, 0.8);
        assert_eq!(cfg.trade.ev_buy_threshold, 2.0);
        assert_eq!(cfg.trade.risk_threshold, 0.6);
        assert_eq!(cfg.trade.risk_ceiling, 0.9);
        assert_eq!(cfg.timeouts.model_call, Duration::from_secs(15));
        assert_eq!(cfg.timeouts.total, Duration::from_secs(120));
        assert_eq!(cfg.timeouts.market, Duration::from_secs(25));
        assert_eq!(cfg.limits.model_concurrency, 5);
        assert_eq!(cfg.limits.outcome_concurrency, 3);
        assert_eq!(cfg.limits.low_probability_threshold, 1.0);
        cfg.validate().expect("minimal config must validate");
    }

    #[test]
    fn zero_weight_model_is_rejected() {
        let mut cfg = minimal_cfg();
        cfg.models[0].base_weight = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_model_list_is_rejected() {
        let mut cfg = minimal_cfg();
        cfg.models.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        let mut cfg = minimal_cfg();
        cfg.fusion.market_blend_alpha = 1.2;
        assert!(cfg.validate().is_err());
    }
}
