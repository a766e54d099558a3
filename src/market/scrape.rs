use crate::config::config::PolymarketCfg;
use crate::core::types::Event;
use crate::market::client::{MarketQuery, MarketSource};
use crate::market::gamma::{event_from_group, event_from_market, GammaEvent, GammaMarket};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

/// Recursion guard for the embedded-state walk; Next.js payloads nest
/// deeply but market data sits well above this.
const MAX_SCAN_DEPTH: usize = 24;

/// Last-resort source: the market page is a SPA with its data embedded
/// as JSON in the `__NEXT_DATA__` script tag. Scraping it survives Gamma
/// API outages at the cost of fragility.
pub struct PageScrapeSource {
    client: Client,
    cfg: PolymarketCfg,
}

impl PageScrapeSource {
    pub fn new(cfg: PolymarketCfg, client: Client) -> Self {
        Self { client, cfg }
    }
}

#[async_trait]
impl MarketSource for PageScrapeSource {
    fn name(&self) -> &'static str {
        "page_scrape"
    }

    async fn resolve(&self, query: &MarketQuery) -> Result<Option<Event>> {
        let Some(slug) = &query.slug else {
            return Ok(None);
        };
        let url = format!("{}/{}", self.cfg.page_url, slug);

        let res = self
            .client
            .get(&url)
            .send()
            .await
            .context("requesting market page")?;
        if !res.status().is_success() {
            anyhow::bail!("market page error: {}", res.status());
        }

        let body = res.text().await.context("reading market page")?;
        Ok(event_from_page(&body))
    }
}

/// Extract the embedded state and hunt for a market or event group
/// inside it.
pub fn event_from_page(html: &str) -> Option<Event> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script#__NEXT_DATA__").ok()?;

    let script = document.select(&selector).next()?;
    let payload: String = script.text().collect();
    let root: Value = serde_json::from_str(payload.trim()).ok()?;

    if let Some(event) = find_event_group(&root, 0) {
        debug!("scraped event group from page state");
        return Some(event);
    }
    if let Some(event) = find_market(&root, 0) {
        debug!("scraped standalone market from page state");
        return Some(event);
    }
    None
}

fn looks_like_market(value: &Value) -> bool {
    value.get("question").is_some() && value.get("outcomePrices").is_some()
}

fn looks_like_group(value: &Value) -> bool {
    value
        .get("markets")
        .and_then(Value::as_array)
        .map(|markets| markets.len() > 1 && markets.iter().any(looks_like_market))
        .unwrap_or(false)
}

fn find_event_group(value: &Value, depth: usize) -> Option<Event> {
    if depth > MAX_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if looks_like_group(value) {
                if let Ok(gamma) = serde_json::from_value::<GammaEvent>(value.clone()) {
                    if let Some(event) = event_from_group(&gamma) {
                        return Some(event);
                    }
                }
            }
            map.values().find_map(|v| find_event_group(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_event_group(v, depth + 1)),
        _ => None,
    }
}

fn find_market(value: &Value, depth: usize) -> Option<Event> {
    if depth > MAX_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if looks_like_market(value) {
                if let Ok(market) = serde_json::from_value::<GammaMarket>(value.clone()) {
                    if let Some(event) = event_from_market(&market) {
                        return Some(event);
                    }
                }
            }
            map.values().find_map(|v| find_market(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_market(v, depth + 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(state: &str) -> String {
        format!(
            "<html><head><title>market</title></head><body>\
<div id=\"root\">app</div>\
<script id=\"__NEXT_DATA__\" type=\"application/json\">{}</script>\
</body></html>",
            state
        )
    }

    #[test]
    fn standalone_market_is_found_in_embedded_state() {
        let state = r#"{
            "props": {"pageProps": {"market": {
                "id": "m1",
                "question": "Will the launch happen this quarter?",
                "slug": "launch-this-quarter",
                "active": true,
                "closed": false,
                "archived": false,
                "endDate": "2030-03-31T00:00:00Z",
                "outcomes": "[\"Yes\",\"No\"]",
                "outcomePrices": "[\"0.55\",\"0.45\"]"
            }}}
        }"#;
        let event = event_from_page(&page(state)).unwrap();
        assert_eq!(event.question, "Will the launch happen this quarter?");
        assert!((event.outcomes[0].market_probability.unwrap() - 55.0).abs() < 1e-9);
    }

    #[test]
    fn event_group_wins_over_nested_markets() {
        let state = r#"{
            "props": {"pageProps": {"event": {
                "id": "ev1",
                "title": "Who wins the cup?",
                "slug": "who-wins-the-cup",
                "markets": [
                    {"id": "m1", "question": "Alpha?", "groupItemTitle": "Alpha",
                     "active": true, "closed": false, "archived": false,
                     "outcomes": "[\"Yes\",\"No\"]", "outcomePrices": "[\"0.6\",\"0.4\"]"},
                    {"id": "m2", "question": "Beta?", "groupItemTitle": "Beta",
                     "active": true, "closed": false, "archived": false,
                     "outcomes": "[\"Yes\",\"No\"]", "outcomePrices": "[\"0.35\",\"0.65\"]"}
                ]
            }}}
        }"#;
        let event = event_from_page(&page(state)).unwrap();
        assert_eq!(event.question, "Who wins the cup?");
        assert_eq!(event.outcomes.len(), 2);
        assert!(event.is_multi_option());
    }

    #[test]
    fn page_without_embedded_state_yields_nothing() {
        assert!(event_from_page("<html><body>plain page</body></html>").is_none());
        assert!(event_from_page(&page("{\"props\": {}}")).is_none());
        assert!(event_from_page(&page("not json")).is_none());
    }
}
