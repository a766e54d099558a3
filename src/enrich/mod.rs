use crate::core::types::EnrichmentContext;
use async_trait::async_trait;

pub mod news;
pub mod sentiment;

/// Optional context sidecar. Providers fill in their slice of the
/// enrichment context and swallow their own failures; the forecasting
/// core runs unchanged when none are configured.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn apply(&self, ctx: &mut EnrichmentContext);
}
