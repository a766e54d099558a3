use crate::core::types::{FusedOutcome, Prediction};

fn prob_cell(value: Option<f64>) -> String {
    match value {
        Some(p) => format!("{:.1}%", p),
        None => "—".to_string(),
    }
}

fn outcome_line(fused: &FusedOutcome, market: Option<f64>) -> String {
    format!(
        "  {}: model {} | market {} | blended {} | σ {:.2} ({} models)",
        fused.outcome_name,
        prob_cell(fused.model_only_prob),
        prob_cell(market),
        prob_cell(fused.blended_prob),
        fused.uncertainty,
        fused.model_count,
    )
}

/// Render a prediction as the plain-text report handed to the chat
/// surface.
pub fn format_prediction(prediction: &Prediction) -> String {
    let event = &prediction.event;
    let mut out = String::new();

    out.push_str(&format!("Q: {}\n", event.question));
    out.push_str(&format!(
        "Category: {} | Family: {} (via {})\n",
        event.category.as_str(),
        event.family_type.as_str(),
        prediction.classification_source,
    ));
    if let Some(days) = event.days_to_resolution {
        out.push_str(&format!("Resolves in ~{:.0} days\n", days));
    }
    if event.is_mock {
        out.push_str("⚠ No market found; model-only forecast, no trade signal.\n");
    }
    if prediction.timed_out {
        out.push_str("⚠ Deadline reached; partial result.\n");
    }

    out.push_str("\nOutcomes:\n");
    for fused in &prediction.outcomes {
        let market = event
            .outcomes
            .iter()
            .find(|o| o.name == fused.outcome_name)
            .and_then(|o| o.market_probability);
        out.push_str(&outcome_line(fused, market));
        out.push('\n');
    }

    let norm = &prediction.normalization;
    if norm.normalized {
        out.push_str(&format!(
            "\nNormalized across outcomes: {:.1} → {:.1}",
            norm.total_before,
            norm.total_after.unwrap_or(100.0)
        ));
        if !norm.skipped.is_empty() {
            out.push_str(&format!(" ({} outcome(s) skipped)", norm.skipped.len()));
        }
        out.push('\n');
    } else if event.is_multi_option() {
        out.push_str("\nNormalization skipped (outcomes may resolve independently).\n");
    }

    if let Some(first) = prediction.outcomes.first() {
        if !first.summary.is_empty() {
            out.push_str(&format!("\nConsensus view: {}\n", first.summary));
        }
    }

    match &prediction.trade_signal {
        Some(signal) => out.push_str(&format!(
            "\nSignal: {} | EV {:+.2} | annualized {:+.1} | risk {:.2}\n  {}\n",
            signal.signal.as_str(),
            signal.ev,
            signal.annualized_ev,
            signal.risk_factor,
            signal.reason,
        )),
        None => out.push_str("\nSignal: none (insufficient data)\n"),
    }

    out
}
