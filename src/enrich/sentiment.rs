use crate::core::types::EnrichmentContext;
use crate::enrich::ContextProvider;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

const HEADLINES_FILE: &str = "headlines.txt";

const POSITIVE_MARKERS: &[&str] = &[
    "rally", "surge", "gain", "agreement", "breakthrough", "peace", "growth", "record high",
    "recover", "optimism", "deal", "resolved",
];
const NEGATIVE_MARKERS: &[&str] = &[
    "war", "crash", "collapse", "crisis", "conflict", "recession", "sanction", "default",
    "escalat", "attack", "selloff", "fears", "shutdown",
];

/// Marker-count polarity of one headline: +1, -1, or 0.
pub fn headline_polarity(headline: &str) -> i32 {
    let text = headline.to_lowercase();
    let positive = POSITIVE_MARKERS.iter().filter(|m| text.contains(*m)).count() as i32;
    let negative = NEGATIVE_MARKERS.iter().filter(|m| text.contains(*m)).count() as i32;
    (positive - negative).signum()
}

/// Fold headline polarities into a temperature on [0, 100], 50 neutral.
/// The scale saturates at ±10 net headlines.
pub fn temperature_from_polarities(polarities: &[i32]) -> f64 {
    if polarities.is_empty() {
        return 50.0;
    }
    let net: i32 = polarities.iter().sum();
    50.0 + (net as f64 / 10.0).clamp(-1.0, 1.0) * 50.0
}

/// Derives a global sentiment temperature from whatever headlines an
/// external fetcher cached. Purely local; no API calls.
pub struct WorldSentimentProvider {
    cache_dir: PathBuf,
}

impl WorldSentimentProvider {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn compute(&self) -> Option<f64> {
        let raw = std::fs::read_to_string(self.cache_dir.join(HEADLINES_FILE)).ok()?;
        let polarities: Vec<i32> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(headline_polarity)
            .collect();
        if polarities.is_empty() {
            return None;
        }
        let temperature = temperature_from_polarities(&polarities);
        debug!(temperature, samples = polarities.len(), "world temperature computed");
        Some(temperature)
    }
}

#[async_trait]
impl ContextProvider for WorldSentimentProvider {
    async fn apply(&self, ctx: &mut EnrichmentContext) {
        ctx.world_temperature = self.compute();
    }
}
