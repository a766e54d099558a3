use crate::core::error::PredictError;
use crate::core::types::{Event, EventReference};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

/// Normalized lookup derived from the raw reference. Sources try the
/// slug when present and fall back to free-text search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketQuery {
    pub raw: String,
    pub slug: Option<String>,
}

/// One market-data backend. Returns `Ok(None)` when the market simply
/// isn't there; `Err` means a transient failure worth retrying.
#[async_trait]
pub trait MarketSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn resolve(&self, query: &MarketQuery) -> Result<Option<Event>>;
}

lazy_static! {
    static ref EVENT_URL_SLUG: Regex =
        Regex::new(r"/event/([^/?\s#]+)").expect("event url regex");
    static ref NUMBER_DOT: Regex = Regex::new(r"\b(\d+)\.(\d+)\b").expect("number dot regex");
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s-]").expect("non-word regex");
}

/// Turn an opaque reference into a query. URLs must contain an event
/// slug; free text additionally gets a generated slug candidate so the
/// slug-keyed sources have something to try.
pub fn parse_reference(reference: &EventReference) -> Result<MarketQuery, PredictError> {
    let raw = reference.raw().trim().to_string();
    if raw.is_empty() {
        return Err(PredictError::Reference("empty reference".into()));
    }

    match reference {
        EventReference::Slug(slug) => Ok(MarketQuery {
            raw: raw.clone(),
            slug: Some(slug.trim().to_string()),
        }),
        EventReference::MarketUrl(url) => match EVENT_URL_SLUG.captures(url) {
            Some(caps) => Ok(MarketQuery {
                raw,
                slug: Some(caps[1].to_string()),
            }),
            None => Err(PredictError::Reference(format!(
                "no event slug in url: {}",
                url
            ))),
        },
        EventReference::FreeText(text) => {
            // Pasted URLs arrive as free text often enough to special-case.
            if text.contains("polymarket.com") {
                if let Some(caps) = EVENT_URL_SLUG.captures(text) {
                    return Ok(MarketQuery {
                        raw,
                        slug: Some(caps[1].to_string()),
                    });
                }
            }
            Ok(MarketQuery {
                slug: generate_slug(text),
                raw,
            })
        }
    }
}

/// Best-effort slug from question text: "Gemini 3.0 released?" becomes
/// "gemini-3-0-released". Short fragments are too ambiguous to try.
fn generate_slug(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let folded = NUMBER_DOT.replace_all(&lowered, "$1-$2");
    let cleaned = NON_WORD.replace_all(&folded, "");
    let slug = cleaned.split_whitespace().collect::<Vec<_>>().join("-");
    (slug.len() > 10).then_some(slug)
}

/// Days between now and an ISO end date, clamped to zero.
pub fn days_until(end_date: &str) -> Option<(DateTime<Utc>, f64)> {
    let parsed = DateTime::parse_from_rfc3339(&end_date.replace('Z', "+00:00")).ok()?;
    let parsed = parsed.with_timezone(&Utc);
    let days = (parsed - Utc::now()).num_seconds() as f64 / 86_400.0;
    Some((parsed, days.max(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_reference_yields_slug() {
        let query = parse_reference(&EventReference::MarketUrl(
            "https://polymarket.com/event/russia-x-ukraine-ceasefire-in-2026?tid=42".into(),
        ))
        .unwrap();
        assert_eq!(query.slug.as_deref(), Some("russia-x-ukraine-ceasefire-in-2026"));
    }

    #[test]
    fn url_without_event_path_is_a_reference_error() {
        let err = parse_reference(&EventReference::MarketUrl(
            "https://polymarket.com/markets".into(),
        ))
        .unwrap_err();
        assert!(matches!(err, PredictError::Reference(_)));
    }

    #[test]
    fn empty_reference_is_rejected() {
        let err = parse_reference(&EventReference::FreeText("   ".into())).unwrap_err();
        assert!(matches!(err, PredictError::Reference(_)));
    }

    #[test]
    fn free_text_generates_a_slug_candidate() {
        let query = parse_reference(&EventReference::FreeText(
            "Gemini 3.0 released by June?".into(),
        ))
        .unwrap();
        assert_eq!(query.slug.as_deref(), Some("gemini-3-0-released-by-june"));
        assert_eq!(query.raw, "Gemini 3.0 released by June?");
    }

    #[test]
    fn short_free_text_gets_no_slug() {
        let query = parse_reference(&EventReference::FreeText("BTC 100k".into())).unwrap();
        assert_eq!(query.slug, None);
    }

    #[test]
    fn pasted_url_in_free_text_is_recognized() {
        let query = parse_reference(&EventReference::FreeText(
            "check https://polymarket.com/event/fed-decision-march please".into(),
        ))
        .unwrap();
        assert_eq!(query.slug.as_deref(), Some("fed-decision-march"));
    }

    #[test]
    fn days_until_clamps_past_dates_to_zero() {
        let (_, days) = days_until("2000-01-01T00:00:00Z").unwrap();
        assert_eq!(days, 0.0);
        assert!(days_until("not a date").is_none());

        let future = (Utc::now() + chrono::Duration::days(10)).to_rfc3339();
        let (_, days) = days_until(&future).unwrap();
        assert!(days > 9.9 && days < 10.1);
    }
}
