//! Numeric helpers shared by the fusion layer. All reductions route
//! through compensated summation so large weight sums stay stable.

use std::collections::HashSet;

/// Neumaier-compensated sum. `None` entries are treated as absent, not
/// as zero.
pub fn safe_sum<I>(values: I) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut sum = 0.0_f64;
    let mut compensation = 0.0_f64;
    for value in values.into_iter().flatten() {
        if !value.is_finite() {
            continue;
        }
        let t = sum + value;
        if sum.abs() >= value.abs() {
            compensation += (sum - t) + value;
        } else {
            compensation += (value - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}

pub fn compensated_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    safe_sum(values.into_iter().map(Some))
}

/// Weighted mean; falls back to the unweighted mean when the total
/// weight is not positive.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let total_weight = compensated_sum(weights.iter().copied());
    if total_weight <= 0.0 {
        return compensated_sum(values.iter().copied()) / values.len() as f64;
    }
    let weighted = compensated_sum(values.iter().zip(weights).map(|(v, w)| v * w));
    weighted / total_weight
}

/// Weighted population standard deviation around `mean`.
pub fn weighted_std(values: &[f64], weights: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let total_weight = compensated_sum(weights.iter().copied());
    if total_weight <= 0.0 {
        let unweighted_mean = compensated_sum(values.iter().copied()) / values.len() as f64;
        let variance = compensated_sum(values.iter().map(|v| (v - unweighted_mean).powi(2)))
            / values.len() as f64;
        return variance.max(0.0).sqrt();
    }
    let variance = compensated_sum(
        values
            .iter()
            .zip(weights)
            .map(|(v, w)| w * (v - mean).powi(2)),
    ) / total_weight;
    variance.max(0.0).sqrt()
}

pub fn clamp_probability(p: f64) -> f64 {
    p.clamp(0.0, 100.0)
}

/// Jaccard similarity over lowercased word sets; used to suppress
/// near-duplicate model reasonings in summaries.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    intersection as f64 / union as f64
}
