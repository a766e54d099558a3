use crate::core::types::EnrichmentContext;
use crate::enrich::ContextProvider;
use crate::orchestrator::assistant::AssistantChain;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// A cached summary younger than this is served without touching any
/// provider.
const SUMMARY_TTL: Duration = Duration::from_secs(6 * 3600);

/// At most this many summary regenerations per hour.
const REFRESH_PER_HOUR: u32 = 4;

const HEADLINES_FILE: &str = "headlines.txt";
const SUMMARY_FILE: &str = "news_summary.txt";

/// Summarizes recently fetched headlines through the assistant fallback
/// chain. Headline acquisition itself lives outside the core; this
/// provider only consumes whatever a fetcher dropped into the cache
/// directory, and owns its summary cache and rate limiter.
pub struct NewsSummaryProvider {
    chain: AssistantChain,
    cache_dir: PathBuf,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl NewsSummaryProvider {
    pub fn new(chain: AssistantChain, cache_dir: impl Into<PathBuf>) -> Self {
        let per_hour = NonZeroU32::new(REFRESH_PER_HOUR).expect("non-zero refresh quota");
        Self {
            chain,
            cache_dir: cache_dir.into(),
            limiter: RateLimiter::direct(Quota::per_hour(per_hour)),
        }
    }

    fn summary_path(&self) -> PathBuf {
        self.cache_dir.join(SUMMARY_FILE)
    }

    fn cached_summary(&self) -> Option<String> {
        let path = self.summary_path();
        let meta = std::fs::metadata(&path).ok()?;
        let age = SystemTime::now()
            .duration_since(meta.modified().ok()?)
            .unwrap_or(Duration::MAX);
        if age > SUMMARY_TTL {
            return None;
        }
        std::fs::read_to_string(&path)
            .ok()
            .filter(|s| !s.trim().is_empty())
    }

    fn headlines(&self) -> Option<Vec<String>> {
        let raw = std::fs::read_to_string(self.cache_dir.join(HEADLINES_FILE)).ok()?;
        let lines: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(10)
            .map(String::from)
            .collect();
        (!lines.is_empty()).then_some(lines)
    }

    fn build_prompt(headlines: &[String]) -> String {
        let mut list = String::new();
        for (i, headline) in headlines.iter().enumerate() {
            list.push_str(&format!("{}. {}\n", i + 1, headline));
        }
        format!(
            "Summarize the dominant themes across these news headlines in 2-3 sentences, \
then add one sentence describing the overall global mood.\n\n{}",
            list
        )
    }

    async fn refresh(&self) -> Option<String> {
        let headlines = self.headlines()?;
        if self.limiter.check().is_err() {
            debug!("news summary refresh rate-limited, using stale cache if any");
            return std::fs::read_to_string(self.summary_path())
                .ok()
                .filter(|s| !s.trim().is_empty());
        }

        let reply = self.chain.run(&Self::build_prompt(&headlines)).await;
        if reply.is_fallback() {
            warn!("news summary unavailable, every assistant provider failed");
            return None;
        }

        // Write-through cache; a failed write only costs the next call a
        // regeneration.
        if let Err(e) = std::fs::create_dir_all(&self.cache_dir)
            .and_then(|_| std::fs::write(self.summary_path(), &reply.text))
        {
            warn!(error = %e, "failed to cache news summary");
        }
        Some(reply.text)
    }
}

#[async_trait]
impl ContextProvider for NewsSummaryProvider {
    async fn apply(&self, ctx: &mut EnrichmentContext) {
        if let Some(summary) = self.cached_summary() {
            ctx.news_summary = Some(summary);
            return;
        }
        if let Some(summary) = self.refresh().await {
            ctx.news_summary = Some(summary);
        }
    }
}
