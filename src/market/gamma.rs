use crate::config::config::PolymarketCfg;
use crate::core::types::{Category, Event, FamilyType, Outcome};
use crate::market::client::{days_until, MarketQuery, MarketSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::warn;

// Gamma API wire shapes. `outcomes` and `outcomePrices` arrive as
// stringified JSON arrays and need a second parse.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaEvent {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub markets: Option<Vec<GammaMarket>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    pub id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub group_item_title: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub outcomes: Option<String>,
    #[serde(default)]
    pub outcome_prices: Option<String>,
}

impl GammaMarket {
    fn parsed_prices(&self) -> Vec<(String, Decimal)> {
        let (Some(outcomes_str), Some(prices_str)) = (&self.outcomes, &self.outcome_prices)
        else {
            return Vec::new();
        };
        let names: Vec<String> = match serde_json::from_str(outcomes_str) {
            Ok(v) => v,
            Err(e) => {
                warn!("failed to parse outcomes '{}': {}", outcomes_str, e);
                return Vec::new();
            }
        };
        let prices: Vec<String> = match serde_json::from_str(prices_str) {
            Ok(v) => v,
            Err(e) => {
                warn!("failed to parse outcomePrices '{}': {}", prices_str, e);
                return Vec::new();
            }
        };

        names
            .into_iter()
            .zip(prices)
            .filter_map(|(name, price)| {
                Decimal::from_str_exact(&price).ok().map(|p| (name, p))
            })
            .collect()
    }

    /// Yes-side price as a fraction in [0, 1], if quoted.
    pub fn yes_price(&self) -> Option<f64> {
        let pairs = self.parsed_prices();
        let decimal = pairs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("yes"))
            .or_else(|| pairs.first())
            .map(|(_, p)| *p)?;
        decimal.to_f64()
    }

    pub fn is_tradeable(&self) -> bool {
        self.active && !self.closed && !self.archived
    }

    /// Display name inside an event group; standalone markets use their
    /// question.
    pub fn outcome_name(&self) -> String {
        self.group_item_title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.question.clone())
            .unwrap_or_else(|| self.id.clone())
    }
}

fn fresh_event(question: String, rules: String) -> Event {
    Event {
        question,
        rules,
        market_slug: None,
        market_id: None,
        resolution_date: None,
        days_to_resolution: None,
        outcomes: Vec::new(),
        family_type: FamilyType::Hybrid,
        category: Category::Other,
        enrichment: None,
        is_mock: false,
    }
}

/// Expand an event group into outcomes. Children must be tradeable,
/// unique by normalized name, and priced strictly inside (0, 1);
/// degenerate 0/1 closures carry no forecasting value. Source order is
/// preserved.
pub fn event_from_group(gamma: &GammaEvent) -> Option<Event> {
    let markets = gamma.markets.as_deref().unwrap_or(&[]);

    let mut seen = HashSet::new();
    let mut outcomes = Vec::new();
    let mut market_ids = Vec::new();
    for market in markets {
        if !market.is_tradeable() {
            continue;
        }
        let name = market.outcome_name();
        let normalized = name.trim().to_lowercase();
        if normalized.is_empty() || !seen.insert(normalized) {
            continue;
        }
        let Some(price) = market.yes_price() else { continue };
        if !price.is_finite() || price <= 0.0 || price >= 1.0 {
            continue;
        }
        outcomes.push(Outcome::new(name, Some(price * 100.0)));
        market_ids.push(market.id.clone());
    }

    if outcomes.is_empty() {
        return None;
    }

    let mut event = fresh_event(
        gamma
            .title
            .clone()
            .unwrap_or_else(|| gamma.id.clone()),
        gamma.description.clone().unwrap_or_default(),
    );
    event.market_slug = gamma.slug.clone();
    event.market_id = Some(gamma.id.clone());
    if outcomes.len() == 1 {
        // A group that collapsed to one live child is effectively the
        // child market itself.
        event.market_id = market_ids.into_iter().next();
    }
    if let Some(end) = gamma
        .end_date
        .as_deref()
        .or_else(|| markets.first().and_then(|m| m.end_date.as_deref()))
    {
        if let Some((date, days)) = days_until(end) {
            event.resolution_date = Some(date);
            event.days_to_resolution = Some(days);
        }
    }
    event.outcomes = outcomes;
    Some(event)
}

/// Single standalone market → single-outcome event (implicit complement).
pub fn event_from_market(market: &GammaMarket) -> Option<Event> {
    if !market.is_tradeable() {
        return None;
    }
    let price = market.yes_price().filter(|p| p.is_finite() && *p > 0.0 && *p < 1.0);

    let mut event = fresh_event(
        market
            .question
            .clone()
            .unwrap_or_else(|| market.id.clone()),
        market.description.clone().unwrap_or_default(),
    );
    event.market_slug = market.slug.clone();
    event.market_id = Some(market.id.clone());
    if let Some(end) = market.end_date.as_deref() {
        if let Some((date, days)) = days_until(end) {
            event.resolution_date = Some(date);
            event.days_to_resolution = Some(days);
        }
    }
    event.outcomes = vec![Outcome::new("Yes", price.map(|p| p * 100.0))];
    Some(event)
}

/// Primary source: structured event-group query. Handles multi-outcome
/// expansion.
pub struct GammaEventSource {
    client: Client,
    cfg: PolymarketCfg,
}

impl GammaEventSource {
    pub fn new(cfg: PolymarketCfg, client: Client) -> Self {
        Self { client, cfg }
    }
}

#[async_trait]
impl MarketSource for GammaEventSource {
    fn name(&self) -> &'static str {
        "gamma_events"
    }

    async fn resolve(&self, query: &MarketQuery) -> Result<Option<Event>> {
        let Some(slug) = &query.slug else {
            return Ok(None);
        };

        let res = self
            .client
            .get(&self.cfg.gamma_events_url)
            .query(&[("slug", slug.as_str())])
            .send()
            .await
            .context("requesting gamma events")?;

        if !res.status().is_success() {
            anyhow::bail!("gamma events API error: {}", res.status());
        }

        let events: Vec<GammaEvent> = res.json().await.context("parsing gamma events")?;
        Ok(events.first().and_then(event_from_group))
    }
}

/// Secondary source: REST markets lookup by slug, or free-text query
/// search when no slug is available.
pub struct GammaMarketSource {
    client: Client,
    cfg: PolymarketCfg,
}

impl GammaMarketSource {
    pub fn new(cfg: PolymarketCfg, client: Client) -> Self {
        Self { client, cfg }
    }
}

#[async_trait]
impl MarketSource for GammaMarketSource {
    fn name(&self) -> &'static str {
        "gamma_markets"
    }

    async fn resolve(&self, query: &MarketQuery) -> Result<Option<Event>> {
        let mut request = self.client.get(&self.cfg.gamma_markets_url);
        request = match &query.slug {
            Some(slug) => request.query(&[("slug", slug.as_str())]),
            None => {
                let truncated: String = query.raw.chars().take(120).collect();
                request.query(&[("query", truncated.as_str()), ("limit", "5")])
            }
        };

        let res = request.send().await.context("requesting gamma markets")?;
        if !res.status().is_success() {
            anyhow::bail!("gamma markets API error: {}", res.status());
        }

        let markets: Vec<GammaMarket> = res.json().await.context("parsing gamma markets")?;
        Ok(markets.first().and_then(event_from_market))
    }
}
