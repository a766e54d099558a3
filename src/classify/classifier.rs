use crate::core::types::{Category, Event, FamilyType, Outcome};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

/// Classification result for one event. `decision_source` names the
/// signal that decided the family type so the rules table can be tuned
/// against logged outcomes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub family_type: FamilyType,
    pub decision_source: &'static str,
}

// Category keyword tables. First hit wins, top to bottom.
const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Geopolitics,
        &[
            "war", "conflict", "invasion", "ceasefire", "military", "coup", "regime", "sanction",
            "treaty", "nato", "annex",
        ],
    ),
    (
        Category::Politics,
        &[
            "election", "president", "candidate", "senate", "congress", "parliament", "governor",
            "nominee", "party", "vote", "impeach", "cabinet",
        ],
    ),
    (
        Category::Economy,
        &[
            "gdp", "inflation", "unemployment", "recession", "interest rate", "fed", "federal funds",
            "stocks", "bond", "tariff", "cpi", "rate cut", "rate hike",
        ],
    ),
    (
        Category::Technology,
        &[
            "launch", "release", "ai ", "openai", "gemini", "gpt", "apple", "tesla", "chip",
            "spacex", "software", "model",
        ],
    ),
    (
        Category::Sports,
        &[
            "world cup", "olympics", "championship", "tournament", "super bowl", "league", "finals",
            "match",
        ],
    ),
    (
        Category::Entertainment,
        &[
            "oscar", "grammy", "box office", "album", "movie", "film", "series", "award",
        ],
    ),
];

pub fn detect_category(question: &str) -> Category {
    let text = question.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| text.contains(k)) {
            return *category;
        }
    }
    Category::Other
}

lazy_static! {
    static ref DATE_BUCKET: Regex = Regex::new(
        r"(?i)(\d{1,2}[/-]\d{1,2}([/-]\d{2,4})?|(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\s+\d{1,2}|\d{1,2}\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*)"
    )
    .expect("date bucket regex");
    static ref PRICE_THRESHOLD: Regex =
        Regex::new(r"(?i)(above|below|over|under|at least|at most)\s+\$?\d|\$\d+[\d,.]*([kmb]|\s*(million|billion|trillion))?")
            .expect("price threshold regex");
}

// Rules-text phrasings that pin the family type outright.
const MUTUAL_RULE_PATTERNS: &[&str] = &[
    "exactly one",
    "only one",
    "wins the",
    "which candidate",
    "which party",
    "upper bound of the target federal funds range",
];
const CONDITIONAL_RULE_PATTERNS: &[&str] = &[
    "each option resolves",
    "resolves independently",
    "per contract",
    "per date",
    "for each date",
    "multiple settlement",
];

const CANDIDATE_KEYWORDS: &[&str] = &[
    "candidate", "party", "democrat", "republican", "nominee", "winner",
];
const RATE_KEYWORDS: &[&str] = &[
    "bps", "basis points", "increase", "decrease", "no change", "cut", "hike",
];
const MUTUAL_TITLE_HINTS: &[&str] = &["who will", "which of", "which ", "champion", "federal funds"];
const CONDITIONAL_TITLE_HINTS: &[&str] = &["by ", "before ", "on or before", "until ", "deadline"];

fn keyword_ratio(names: &[String], keywords: &[&str]) -> f64 {
    if names.is_empty() {
        return 0.0;
    }
    let hits = names
        .iter()
        .filter(|n| keywords.iter().any(|k| n.contains(k)))
        .count();
    hits as f64 / names.len() as f64
}

/// Layered family-type heuristic, checked in fixed order. Each layer is
/// one row of the externalized rules table; the first match decides.
pub fn classify_family(event: &Event) -> (FamilyType, &'static str) {
    let outcomes = &event.outcomes;

    // Single-outcome markets carry an implicit complement.
    if outcomes.len() <= 1 {
        return (FamilyType::Binary, "single_outcome");
    }
    if outcomes.len() == 2 && is_complement_pair(&outcomes[0], &outcomes[1]) {
        return (FamilyType::Binary, "complement_pair");
    }

    let rules = event.rules.to_lowercase();
    if MUTUAL_RULE_PATTERNS.iter().any(|p| rules.contains(p)) {
        return (FamilyType::MutuallyExclusive, "rules_text");
    }
    if CONDITIONAL_RULE_PATTERNS.iter().any(|p| rules.contains(p)) {
        return (FamilyType::Conditional, "rules_text");
    }

    let names: Vec<String> = outcomes.iter().map(|o| o.name.to_lowercase()).collect();

    if keyword_ratio(&names, RATE_KEYWORDS) >= 0.7 {
        return (FamilyType::MutuallyExclusive, "option_lexicon_rate");
    }
    if keyword_ratio(&names, CANDIDATE_KEYWORDS) >= 0.6 {
        return (FamilyType::MutuallyExclusive, "option_lexicon_candidate");
    }

    let date_hits = names.iter().filter(|n| DATE_BUCKET.is_match(n)).count();
    if date_hits as f64 / names.len() as f64 >= 0.5 {
        return (FamilyType::Conditional, "date_buckets");
    }

    let price_hits = names.iter().filter(|n| PRICE_THRESHOLD.is_match(n)).count();
    if price_hits as f64 / names.len() as f64 >= 0.5 {
        return (FamilyType::Conditional, "price_thresholds");
    }

    // Explicitly grouped outcomes resolve independently per bucket.
    if outcomes.iter().all(|o| o.group_key.is_some()) {
        return (FamilyType::Conditional, "explicit_groups");
    }

    // Active market quotes summing near 100 indicate one shared slot.
    let active_probs: Vec<f64> = outcomes
        .iter()
        .filter(|o| o.active)
        .filter_map(|o| o.market_probability)
        .collect();
    if active_probs.len() >= 2 {
        let total: f64 = active_probs.iter().sum();
        if (95.0..=105.0).contains(&total) {
            return (FamilyType::MutuallyExclusive, "market_sum_window");
        }
    }

    let title = event.question.to_lowercase();
    if MUTUAL_TITLE_HINTS.iter().any(|h| title.contains(h)) {
        return (FamilyType::MutuallyExclusive, "title_structure");
    }
    if CONDITIONAL_TITLE_HINTS.iter().any(|h| title.contains(h)) {
        return (FamilyType::Conditional, "title_structure");
    }

    // Conservative default: treated like conditional for normalization.
    (FamilyType::Hybrid, "fallback_default")
}

fn is_complement_pair(a: &Outcome, b: &Outcome) -> bool {
    let first = a.name.to_lowercase();
    let second = b.name.to_lowercase();
    matches!(
        (first.as_str(), second.as_str()),
        ("yes", "no") | ("no", "yes")
    )
}

pub fn classify(event: &Event) -> Classification {
    let category = detect_category(&event.question);
    let (family_type, decision_source) = classify_family(event);
    debug!(
        category = category.as_str(),
        family = family_type.as_str(),
        source = decision_source,
        "event classified"
    );
    Classification {
        category,
        family_type,
        decision_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(question: &str, rules: &str, outcomes: Vec<Outcome>) -> Event {
        Event {
            question: question.into(),
            rules: rules.into(),
            market_slug: None,
            market_id: None,
            resolution_date: None,
            days_to_resolution: None,
            outcomes,
            family_type: FamilyType::Hybrid,
            category: Category::Other,
            enrichment: None,
            is_mock: false,
        }
    }

    #[test]
    fn category_keywords_route_to_expected_buckets() {
        assert_eq!(detect_category("Will the ceasefire hold through March?"), Category::Geopolitics);
        assert_eq!(detect_category("Who wins the presidential election?"), Category::Politics);
        assert_eq!(detect_category("Will the Fed cut the interest rate?"), Category::Economy);
        assert_eq!(detect_category("Will OpenAI release GPT-6 this year?"), Category::Technology);
        assert_eq!(detect_category("Who wins the World Cup?"), Category::Sports);
        assert_eq!(detect_category("Which film takes the Oscar?"), Category::Entertainment);
        assert_eq!(detect_category("Will it rain tomorrow?"), Category::Other);
    }

    #[test]
    fn single_outcome_markets_are_binary() {
        let e = event("Will X happen?", "", vec![Outcome::new("Yes", Some(40.0))]);
        assert_eq!(classify_family(&e), (FamilyType::Binary, "single_outcome"));
    }

    #[test]
    fn yes_no_pair_is_binary() {
        let e = event(
            "Will X happen?",
            "",
            vec![Outcome::new("Yes", Some(40.0)), Outcome::new("No", Some(60.0))],
        );
        assert_eq!(classify_family(&e), (FamilyType::Binary, "complement_pair"));
    }

    #[test]
    fn rules_text_overrides_other_signals() {
        let e = event(
            "Outcome of the meeting",
            "Exactly one option will resolve Yes.",
            vec![
                Outcome::new("25 bps cut", Some(30.0)),
                Outcome::new("no change", Some(50.0)),
                Outcome::new("25 bps hike", Some(20.0)),
            ],
        );
        assert_eq!(
            classify_family(&e),
            (FamilyType::MutuallyExclusive, "rules_text")
        );
    }

    #[test]
    fn date_series_is_conditional() {
        let e = event(
            "Ceasefire announced?",
            "",
            vec![
                Outcome::new("by Oct 30", Some(10.0)),
                Outcome::new("by Nov 15", Some(35.0)),
                Outcome::new("by Dec 1", Some(60.0)),
            ],
        );
        assert_eq!(classify_family(&e), (FamilyType::Conditional, "date_buckets"));
    }

    #[test]
    fn candidate_roster_is_mutually_exclusive() {
        let e = event(
            "Outcome of the primary",
            "",
            vec![
                Outcome::new("Candidate Smith", Some(45.0)),
                Outcome::new("Candidate Jones", Some(30.0)),
                Outcome::new("Another candidate", Some(25.0)),
            ],
        );
        assert_eq!(
            classify_family(&e),
            (FamilyType::MutuallyExclusive, "option_lexicon_candidate")
        );
    }

    #[test]
    fn price_threshold_series_is_conditional() {
        let e = event(
            "BTC price milestones",
            "",
            vec![
                Outcome::new("above $100k", Some(40.0)),
                Outcome::new("above $150k", Some(15.0)),
                Outcome::new("above $200k", Some(5.0)),
            ],
        );
        assert_eq!(
            classify_family(&e),
            (FamilyType::Conditional, "price_thresholds")
        );
    }

    #[test]
    fn market_sum_window_marks_shared_slot() {
        let e = event(
            "League winner",
            "",
            vec![
                Outcome::new("Alpha FC", Some(50.0)),
                Outcome::new("Beta United", Some(30.0)),
                Outcome::new("Gamma City", Some(21.0)),
            ],
        );
        assert_eq!(
            classify_family(&e),
            (FamilyType::MutuallyExclusive, "market_sum_window")
        );
    }

    #[test]
    fn unmatched_shape_falls_back_to_hybrid() {
        let e = event(
            "Assorted outcomes",
            "",
            vec![
                Outcome::new("Alpha", Some(10.0)),
                Outcome::new("Beta", Some(20.0)),
                Outcome::new("Gamma", Some(30.0)),
            ],
        );
        assert_eq!(classify_family(&e), (FamilyType::Hybrid, "fallback_default"));
    }

    #[test]
    fn explicit_groups_classify_as_conditional() {
        let mut outcomes = vec![
            Outcome::new("Alpha", Some(10.0)),
            Outcome::new("Beta", Some(20.0)),
        ];
        for o in &mut outcomes {
            o.group_key = Some("bucket".into());
        }
        let e = event("Grouped outcomes", "", outcomes);
        assert_eq!(
            classify_family(&e),
            (FamilyType::Conditional, "explicit_groups")
        );
    }
}
