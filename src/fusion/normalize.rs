use crate::core::types::{FamilyType, FusedOutcome, NormalizationInfo};
use crate::fusion::math::safe_sum;
use tracing::{info, warn};

/// Rescale model consensus probabilities across competing outcomes so a
/// mutually-exclusive family sums to 100.
///
/// Conditional, hybrid, and binary families are left untouched: their
/// outcomes can resolve independently, so a shared 100% budget does not
/// apply. Null consensus values are never invented; their indices are
/// reported in `skipped`.
pub fn normalize_all(outcomes: &mut [FusedOutcome], family_type: FamilyType) -> NormalizationInfo {
    let total_before = safe_sum(outcomes.iter().map(|o| o.model_only_prob));
    let skipped: Vec<usize> = outcomes
        .iter()
        .enumerate()
        .filter(|(_, o)| o.model_only_prob.is_none())
        .map(|(i, _)| i)
        .collect();

    if family_type != FamilyType::MutuallyExclusive {
        if matches!(family_type, FamilyType::Conditional | FamilyType::Hybrid) {
            info!(
                family = family_type.as_str(),
                total = total_before,
                "conditional event detected — normalization skipped"
            );
        }
        return NormalizationInfo {
            family_type,
            total_before,
            total_after: None,
            normalized: false,
            skipped,
        };
    }

    let non_null = outcomes.len() - skipped.len();
    if non_null == 0 {
        return NormalizationInfo {
            family_type,
            total_before: 0.0,
            total_after: None,
            normalized: false,
            skipped,
        };
    }

    if total_before == 0.0 {
        // Scaling would divide by zero; leave values alone.
        warn!("mutually-exclusive family with zero consensus total, normalization skipped");
        return NormalizationInfo {
            family_type,
            total_before,
            total_after: None,
            normalized: false,
            skipped,
        };
    }

    let scale = 100.0 / total_before;
    for outcome in outcomes.iter_mut() {
        if let Some(p) = outcome.model_only_prob {
            outcome.model_only_prob = Some(p * scale);
        }
    }

    NormalizationInfo {
        family_type,
        total_before,
        total_after: Some(100.0),
        normalized: true,
        skipped,
    }
}
