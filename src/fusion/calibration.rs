use crate::config::config::FusionCfg;
use crate::core::types::Category;
use std::collections::HashMap;
use std::sync::Arc;

/// Monotone probability correction on [0, 100]. Identity by default;
/// pluggable per category.
pub trait Calibrator: Send + Sync {
    fn apply(&self, probability: f64) -> f64;
    fn is_identity(&self) -> bool {
        false
    }
}

pub struct IdentityCalibrator;

impl Calibrator for IdentityCalibrator {
    fn apply(&self, probability: f64) -> f64 {
        probability
    }
    fn is_identity(&self) -> bool {
        true
    }
}

/// Linear shrink toward zero, capped at 100. Monotone for factor > 0.
pub struct ScaledCalibrator {
    factor: f64,
}

impl ScaledCalibrator {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Calibrator for ScaledCalibrator {
    fn apply(&self, probability: f64) -> f64 {
        (probability * self.factor).clamp(0.0, 100.0)
    }
}

/// Category-keyed calibrator lookup built from config.
pub struct CalibratorSet {
    by_category: HashMap<Category, Arc<dyn Calibrator>>,
    identity: Arc<dyn Calibrator>,
}

impl CalibratorSet {
    pub fn from_cfg(cfg: &FusionCfg) -> Self {
        let mut by_category: HashMap<Category, Arc<dyn Calibrator>> = HashMap::new();
        for entry in &cfg.calibrators {
            if let Some(category) = parse_category(&entry.category) {
                if entry.factor > 0.0 {
                    by_category.insert(category, Arc::new(ScaledCalibrator::new(entry.factor)));
                }
            }
        }
        Self {
            by_category,
            identity: Arc::new(IdentityCalibrator),
        }
    }

    pub fn empty() -> Self {
        Self::from_cfg(&FusionCfg::default())
    }

    pub fn with_override(category: Category, calibrator: Arc<dyn Calibrator>) -> Self {
        let mut set = Self::empty();
        set.by_category.insert(category, calibrator);
        set
    }

    pub fn for_category(&self, category: Category) -> &Arc<dyn Calibrator> {
        self.by_category.get(&category).unwrap_or(&self.identity)
    }
}

fn parse_category(raw: &str) -> Option<Category> {
    match raw.to_lowercase().as_str() {
        "politics" => Some(Category::Politics),
        "geopolitics" => Some(Category::Geopolitics),
        "economy" => Some(Category::Economy),
        "technology" => Some(Category::Technology),
        "sports" => Some(Category::Sports),
        "entertainment" => Some(Category::Entertainment),
        "other" => Some(Category::Other),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::CalibratorCfg;

    #[test]
    fn identity_is_the_default() {
        let set = CalibratorSet::empty();
        let cal = set.for_category(Category::Economy);
        assert!(cal.is_identity());
        assert_eq!(cal.apply(37.5), 37.5);
    }

    #[test]
    fn configured_category_gets_a_scaled_calibrator() {
        let cfg = FusionCfg {
            calibrators: vec![CalibratorCfg {
                category: "politics".into(),
                factor: 0.9,
            }],
            ..Default::default()
        };
        let set = CalibratorSet::from_cfg(&cfg);

        let cal = set.for_category(Category::Politics);
        assert!(!cal.is_identity());
        assert!((cal.apply(80.0) - 72.0).abs() < 1e-9);
        // Other categories remain identity.
        assert!(set.for_category(Category::Sports).is_identity());
    }

    #[test]
    fn scaled_calibrator_is_bounded_and_monotone() {
        let cal = ScaledCalibrator::new(1.5);
        assert_eq!(cal.apply(90.0), 100.0);
        let low = cal.apply(20.0);
        let high = cal.apply(40.0);
        assert!(low < high);
    }

    #[test]
    fn non_positive_factor_is_ignored() {
        let cfg = FusionCfg {
            calibrators: vec![CalibratorCfg {
                category: "economy".into(),
                factor: 0.0,
            }],
            ..Default::default()
        };
        let set = CalibratorSet::from_cfg(&cfg);
        assert!(set.for_category(Category::Economy).is_identity());
    }
}
