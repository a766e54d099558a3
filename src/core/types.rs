use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ----------- Inbound reference -----------------

/// Raw user input naming an event. Resolution into an [`Event`] is the
/// market gateway's job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventReference {
    FreeText(String),
    MarketUrl(String),
    Slug(String),
}

impl EventReference {
    pub fn raw(&self) -> &str {
        match self {
            EventReference::FreeText(s) => s,
            EventReference::MarketUrl(s) => s,
            EventReference::Slug(s) => s,
        }
    }
}

// ----------- Resolved event -----------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    /// Market-implied probability as a percentage in [0, 100], if quoted.
    pub market_probability: Option<f64>,
    pub active: bool,
    /// Grouping key for conditional families (date buckets etc).
    #[serde(default)]
    pub group_key: Option<String>,
}

impl Outcome {
    pub fn new(name: impl Into<String>, market_probability: Option<f64>) -> Self {
        Self {
            name: name.into(),
            market_probability,
            active: true,
            group_key: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyType {
    Binary,
    MutuallyExclusive,
    Conditional,
    Hybrid,
}

impl FamilyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyType::Binary => "binary",
            FamilyType::MutuallyExclusive => "mutually_exclusive",
            FamilyType::Conditional => "conditional",
            FamilyType::Hybrid => "hybrid",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Politics,
    Geopolitics,
    Economy,
    Technology,
    Sports,
    Entertainment,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Politics => "politics",
            Category::Geopolitics => "geopolitics",
            Category::Economy => "economy",
            Category::Technology => "technology",
            Category::Sports => "sports",
            Category::Entertainment => "entertainment",
            Category::Other => "other",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnrichmentContext {
    /// Global sentiment temperature in [0, 100]; 50 is neutral.
    pub world_temperature: Option<f64>,
    pub news_summary: Option<String>,
}

impl EnrichmentContext {
    pub fn is_empty(&self) -> bool {
        self.world_temperature.is_none() && self.news_summary.is_none()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub question: String,
    #[serde(default)]
    pub rules: String,
    #[serde(default)]
    pub market_slug: Option<String>,
    #[serde(default)]
    pub market_id: Option<String>,
    #[serde(default)]
    pub resolution_date: Option<DateTime<Utc>>,
    /// Derived from `resolution_date`; never negative.
    #[serde(default)]
    pub days_to_resolution: Option<f64>,
    pub outcomes: Vec<Outcome>,
    /// Filled by the classifier; `Hybrid` until then.
    pub family_type: FamilyType,
    /// Filled by the classifier; `Other` until then.
    pub category: Category,
    #[serde(default)]
    pub enrichment: Option<EnrichmentContext>,
    /// True when the gateway substituted a placeholder after total
    /// resolution failure. Disables the low-probability filter and
    /// trade-signal emission.
    #[serde(default)]
    pub is_mock: bool,
}

impl Event {
    pub fn is_multi_option(&self) -> bool {
        self.outcomes.len() > 1
    }
}

// ----------- Model responses -----------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// One model's answer for one outcome. Failures are carried in `error`
/// rather than surfaced as `Err`; partial pools are the norm.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelResponse {
    pub model_id: String,
    pub probability: Option<f64>,
    pub confidence: Confidence,
    pub reasoning: String,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    pub error: Option<String>,
}

impl ModelResponse {
    pub fn failed(model_id: impl Into<String>, error: impl Into<String>, latency: Duration) -> Self {
        Self {
            model_id: model_id.into(),
            probability: None,
            confidence: Confidence::Low,
            reasoning: String::new(),
            latency,
            error: Some(error.into()),
        }
    }

    /// A response counts for fusion only when it carries no error and a
    /// finite probability inside [0, 100].
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
            && self
                .probability
                .map(|p| p.is_finite() && (0.0..=100.0).contains(&p))
                .unwrap_or(false)
    }
}

// ----------- Fusion output -----------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusedOutcome {
    pub outcome_name: String,
    /// Pure model consensus before market blending; `None` when no model
    /// produced a valid response.
    pub model_only_prob: Option<f64>,
    /// Consensus blended with the market quote.
    pub blended_prob: Option<f64>,
    /// Weighted standard deviation of model probabilities.
    pub uncertainty: f64,
    pub model_count: usize,
    /// Uncertainty normalized into [0, 1].
    pub disagreement: f64,
    pub summary: String,
    pub weight_source: String,
    pub calibration_applied: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationInfo {
    pub family_type: FamilyType,
    pub total_before: f64,
    pub total_after: Option<f64>,
    pub normalized: bool,
    /// Indices of outcomes left untouched (null model consensus).
    pub skipped: Vec<usize>,
}

// ----------- Trade signal -----------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Hold,
    Sell,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Hold => "HOLD",
            Signal::Sell => "SELL",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub signal: Signal,
    /// Signed gap between model consensus and market, in percentage points.
    pub ev: f64,
    pub annualized_ev: f64,
    pub risk_factor: f64,
    pub reason: String,
}

// ----------- Result envelope -----------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prediction {
    pub event: Event,
    pub outcomes: Vec<FusedOutcome>,
    pub normalization: NormalizationInfo,
    pub trade_signal: Option<TradeSignal>,
    /// Set when the overall deadline expired and this is a partial result.
    pub timed_out: bool,
    /// Which classification signal decided the family type; surfaced for
    /// later tuning of the rules table.
    pub classification_source: String,
    pub timestamp: DateTime<Utc>,
}
