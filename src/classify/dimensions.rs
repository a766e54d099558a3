use crate::core::types::Category;
use std::collections::BTreeMap;

/// Fixed registry of analytic viewpoints. Each configured model is
/// assigned one dimension so the pool covers the event from several
/// angles instead of five times from the same one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dimension {
    StatisticalBaseRate,
    QualitativeRisk,
    PatternMatch,
    PolicyDomain,
    NarrativeContext,
}

impl Dimension {
    pub fn name(&self) -> &'static str {
        match self {
            Dimension::StatisticalBaseRate => "Statistical base rates",
            Dimension::QualitativeRisk => "Qualitative risk assessment",
            Dimension::PatternMatch => "Historical pattern matching",
            Dimension::PolicyDomain => "Policy and domain analysis",
            Dimension::NarrativeContext => "Narrative and sentiment context",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Dimension::StatisticalBaseRate => {
                "Anchor on base rates for comparable events, then adjust for what is specific here. Quantify where possible."
            }
            Dimension::QualitativeRisk => {
                "Focus on tail risks, escalation paths, and black-swan scenarios that could flip the outcome."
            }
            Dimension::PatternMatch => {
                "Compare against similar historical events and their resolution patterns; weigh how closely they map."
            }
            Dimension::PolicyDomain => {
                "Analyze the institutional and policy machinery involved: who decides, on what timeline, under which constraints."
            }
            Dimension::NarrativeContext => {
                "Assess public narrative, momentum, and commonly overlooked contrarian factors."
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimensionAssignment {
    pub model_id: String,
    pub dimension: Dimension,
}

// Per-category dimension priority. The most diagnostic viewpoint for the
// category comes first so small pools still cover it.
fn ordering_for(category: Category) -> [Dimension; 5] {
    use Dimension::*;
    match category {
        Category::Politics | Category::Geopolitics => [
            PolicyDomain,
            QualitativeRisk,
            StatisticalBaseRate,
            PatternMatch,
            NarrativeContext,
        ],
        Category::Economy => [
            StatisticalBaseRate,
            PolicyDomain,
            PatternMatch,
            QualitativeRisk,
            NarrativeContext,
        ],
        Category::Technology => [
            PatternMatch,
            StatisticalBaseRate,
            NarrativeContext,
            QualitativeRisk,
            PolicyDomain,
        ],
        Category::Sports | Category::Entertainment => [
            StatisticalBaseRate,
            PatternMatch,
            NarrativeContext,
            QualitativeRisk,
            PolicyDomain,
        ],
        Category::Other => [
            StatisticalBaseRate,
            QualitativeRisk,
            PatternMatch,
            PolicyDomain,
            NarrativeContext,
        ],
    }
}

/// Deterministic assignment: the category's dimension ordering is zipped
/// over the model ids sorted lexicographically, wrapping around when the
/// pool is larger than the registry.
pub fn assign_dimensions(
    category: Category,
    model_ids: &[String],
) -> BTreeMap<String, DimensionAssignment> {
    let ordering = ordering_for(category);
    let mut sorted: Vec<&String> = model_ids.iter().collect();
    sorted.sort();

    sorted
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            (
                id.clone(),
                DimensionAssignment {
                    model_id: id.clone(),
                    dimension: ordering[i % ordering.len()],
                },
            )
        })
        .collect()
}
