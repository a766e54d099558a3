use crate::core::types::Confidence;
use anyhow::{Context, Result};
use serde_json::Value;

/// Reasoning text is cut to this many characters on ingestion.
const REASONING_CAP: usize = 200;

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedReply {
    pub probability: f64,
    pub confidence: Confidence,
    pub reasoning: String,
}

/// First balanced-brace object in free-form text. Models wrap their JSON
/// in prose and code fences; string literals and escapes are respected so
/// braces inside them do not confuse the scan.
pub fn extract_json(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn coerce_probability(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_confidence(value: Option<&Value>) -> Confidence {
    let label = value.and_then(Value::as_str).unwrap_or("medium");
    match label.trim().to_lowercase().as_str() {
        "low" => Confidence::Low,
        "high" => Confidence::High,
        // Unknown labels degrade to medium rather than invalidating the reply.
        _ => Confidence::Medium,
    }
}

fn truncate_reasoning(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= REASONING_CAP {
        return trimmed.to_string();
    }
    trimmed.chars().take(REASONING_CAP).collect()
}

/// Parse one model reply. Rejects missing or out-of-range probabilities;
/// everything else degrades gracefully.
pub fn parse_reply(content: &str) -> Result<ParsedReply> {
    let object = extract_json(content).context("no JSON object in model reply")?;
    let value: Value = serde_json::from_str(object).context("malformed JSON in model reply")?;

    let probability = value
        .get("probability")
        .and_then(coerce_probability)
        .context("missing or non-numeric 'probability'")?;
    anyhow::ensure!(
        probability.is_finite() && (0.0..=100.0).contains(&probability),
        "probability {} outside [0, 100]",
        probability
    );

    let confidence = parse_confidence(value.get("confidence"));
    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .map(truncate_reasoning)
        .unwrap_or_default();

    Ok(ParsedReply {
        probability,
        confidence,
        reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object_parses() {
        let reply = parse_reply(
            r#"{"probability": 62.5, "confidence": "high", "reasoning": "drivers intact"}"#,
        )
        .unwrap();
        assert_eq!(reply.probability, 62.5);
        assert_eq!(reply.confidence, Confidence::High);
        assert_eq!(reply.reasoning, "drivers intact");
    }

    #[test]
    fn object_is_extracted_from_surrounding_prose_and_fences() {
        let content = "Sure! Here is my answer:\n```json\n{\"probability\": 30, \"confidence\": \"low\", \"reasoning\": \"thin evidence\"}\n```\nLet me know.";
        let reply = parse_reply(content).unwrap();
        assert_eq!(reply.probability, 30.0);
        assert_eq!(reply.confidence, Confidence::Low);
    }

    #[test]
    fn braces_inside_strings_do_not_break_the_scan() {
        let content = r#"{"probability": 10, "reasoning": "edge case {not a brace pair", "confidence": "medium"}"#;
        let reply = parse_reply(content).unwrap();
        assert_eq!(reply.probability, 10.0);
    }

    #[test]
    fn string_probability_is_coerced() {
        let reply = parse_reply(r#"{"probability": "73", "confidence": "medium"}"#).unwrap();
        assert_eq!(reply.probability, 73.0);

        let reply = parse_reply(r#"{"probability": "73%"}"#).unwrap();
        assert_eq!(reply.probability, 73.0);
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        assert!(parse_reply(r#"{"probability": 140}"#).is_err());
        assert!(parse_reply(r#"{"probability": -3}"#).is_err());
        assert!(parse_reply(r#"{"probability": "NaN"}"#).is_err());
    }

    #[test]
    fn missing_probability_is_rejected() {
        assert!(parse_reply(r#"{"confidence": "high"}"#).is_err());
        assert!(parse_reply("no json here at all").is_err());
        assert!(parse_reply("{ broken json").is_err());
    }

    #[test]
    fn unknown_confidence_defaults_to_medium() {
        let reply = parse_reply(r#"{"probability": 50, "confidence": "certain"}"#).unwrap();
        assert_eq!(reply.confidence, Confidence::Medium);

        let reply = parse_reply(r#"{"probability": 50, "confidence": "HIGH"}"#).unwrap();
        assert_eq!(reply.confidence, Confidence::High);
    }

    #[test]
    fn reasoning_is_truncated_to_cap() {
        let long = "a".repeat(500);
        let content = format!(r#"{{"probability": 50, "reasoning": "{}"}}"#, long);
        let reply = parse_reply(&content).unwrap();
        assert_eq!(reply.reasoning.chars().count(), 200);
    }

    #[test]
    fn first_of_several_objects_wins() {
        let content = r#"{"probability": 20} and also {"probability": 90}"#;
        let reply = parse_reply(content).unwrap();
        assert_eq!(reply.probability, 20.0);
    }
}
