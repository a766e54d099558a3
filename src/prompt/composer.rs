use crate::classify::dimensions::DimensionAssignment;
use crate::core::types::{EnrichmentContext, Event, Outcome};

/// Rules text is truncated to this many characters before it enters a
/// prompt; market rule pages can run to tens of kilobytes.
const RULES_CAP: usize = 1500;

const SCHEMA_INSTRUCTION: &str = "Respond with exactly one JSON object and nothing else, with keys: \
'probability' (number between 0 and 100), \
'confidence' (one of \"low\", \"medium\", \"high\"), \
'reasoning' (one or two brief sentences).";

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let truncated: String = text.chars().take(cap).collect();
    format!("{}...", truncated.trim_end())
}

fn enrichment_sections(enrichment: Option<&EnrichmentContext>) -> String {
    let mut sections = String::new();
    if let Some(ctx) = enrichment {
        if let Some(temp) = ctx.world_temperature {
            sections.push_str(&format!(
                "- Global sentiment temperature: {:.0}/100 (50 is neutral)\n",
                temp
            ));
        }
        if let Some(news) = &ctx.news_summary {
            sections.push_str(&format!(
                "- Recent global news summary:\n  {}\n",
                truncate_chars(news, 500)
            ));
        }
    }
    if sections.is_empty() {
        sections.push_str("- (no global context available)\n");
    }
    sections
}

/// Build the specialized prompt for one (model, outcome) pair. Pure; no
/// network and no model calls happen here.
pub fn compose(
    event: &Event,
    outcome: &Outcome,
    assignment: &DimensionAssignment,
) -> String {
    let market_line = match outcome.market_probability {
        Some(p) => format!("{:.1}%", p),
        None => "not quoted".to_string(),
    };
    let days_line = match event.days_to_resolution {
        Some(d) => format!("{:.0}", d),
        None => "unknown".to_string(),
    };
    let focus = if event.is_multi_option() {
        format!(
            "You are forecasting ONE specific outcome of a multi-outcome event: \"{}\". \
Give the probability that this particular outcome resolves Yes.\n\n",
            outcome.name
        )
    } else {
        String::new()
    };
    let rules = if event.rules.trim().is_empty() {
        "(no rules published)".to_string()
    } else {
        truncate_chars(event.rules.trim(), RULES_CAP)
    };

    format!(
        "You are a forecasting analyst. Your assigned analytic dimension: {dimension}.\n\
{dimension_description}\n\n\
{focus}Event: \"{question}\"\n\n\
Resolution rules:\n{rules}\n\n\
Current market probability: {market}\n\
Days until resolution: {days}\n\n\
Global context:\n{enrichment}\n\
{schema}",
        dimension = assignment.dimension.name(),
        dimension_description = assignment.dimension.description(),
        focus = focus,
        question = event.question,
        rules = rules,
        market = market_line,
        days = days_line,
        enrichment = enrichment_sections(event.enrichment.as_ref()),
        schema = SCHEMA_INSTRUCTION,
    )
}
