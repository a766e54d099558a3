use crate::config::config::TradeCfg;
use crate::core::types::{FusedOutcome, Signal, TradeSignal};
use tracing::debug;

/// Expected value and risk heuristics over one fused outcome.
///
/// Emits nothing when any input is missing; a signal built on absent
/// data is worse than no signal.
pub fn evaluate(
    fused: &FusedOutcome,
    market_prob: Option<f64>,
    days_to_resolution: Option<f64>,
    cfg: &TradeCfg,
) -> Option<TradeSignal> {
    let model_only = fused.model_only_prob?;
    fused.blended_prob?;
    let market = market_prob?;
    let days = days_to_resolution?;

    let ev = model_only - market;
    let annualized_ev = ev * (365.0 / days.max(1.0));
    let risk_factor = (fused.uncertainty / 10.0 + days.min(365.0) / 730.0).clamp(0.0, 1.0);

    let (signal, reason) = if ev < -cfg.ev_sell_threshold {
        (
            Signal::Sell,
            format!("Negative EV ({:+.2}), market overpriced", ev),
        )
    } else if risk_factor >= cfg.risk_ceiling {
        (
            Signal::Sell,
            format!("Risk factor {:.2} at ceiling, avoid position", risk_factor),
        )
    } else if ev > cfg.ev_buy_threshold && risk_factor < cfg.risk_threshold {
        (
            Signal::Buy,
            format!("Positive EV ({:+.2}) with low risk ({:.2})", ev, risk_factor),
        )
    } else {
        (
            Signal::Hold,
            format!("Edge {:+.2} below actionable threshold at risk {:.2}", ev, risk_factor),
        )
    };

    debug!(
        signal = signal.as_str(),
        ev, annualized_ev, risk_factor, "trade signal evaluated"
    );

    Some(TradeSignal {
        signal,
        ev,
        annualized_ev,
        risk_factor,
        reason,
    })
}
