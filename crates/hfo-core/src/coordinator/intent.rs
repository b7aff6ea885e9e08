// Intent routing — operator text → port, by keyword score.
// A deliberately dumb heuristic: keyword hits plus a bonus for exact word
// matches. No match routes to P7 NAVIGATE at low confidence, because
// strategic steering is the safe default for ambiguous asks.

use crate::atoms::constants::port_label;
use serde::Serialize;

const INTENT_KEYWORDS: [(&str, &[&str]); 8] = [
    ("P0", &["watch", "observe", "monitor", "scan", "detect", "sense"]),
    ("P1", &["bridge", "web", "search", "fetch", "external", "api", "url", "research"]),
    ("P2", &["create", "build", "generate", "shape", "code", "implement", "design"]),
    ("P3", &["inject", "enrich", "classify", "tag", "assign", "port", "deliver"]),
    ("P4", &["test", "attack", "adversarial", "red team", "challenge", "disrupt", "audit"]),
    ("P5", &["gate", "guard", "validate", "immunize", "blue team", "governance", "heal"]),
    ("P6", &["learn", "assimilate", "summarize", "knowledge", "memory", "embed"]),
    ("P7", &["navigate", "strategy", "plan", "wish", "coordinate", "steer", "orchestrate"]),
];

#[derive(Debug, Clone, Serialize)]
pub struct IntentAlternative {
    pub port: String,
    pub score: f64,
    pub word: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentRoute {
    pub primary_port: String,
    pub confidence: f64,
    pub reason: String,
    pub alternatives: Vec<IntentAlternative>,
}

/// Route operator intent text to the best-matching port.
pub fn route_intent(intent: &str) -> IntentRoute {
    let lower = intent.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    let mut scores: Vec<(&str, f64)> = Vec::new();
    for (port, keywords) in INTENT_KEYWORDS {
        let mut score = 0.0;
        for kw in keywords {
            if lower.contains(kw) {
                score += 1.0;
            }
            if words.contains(kw) {
                score += 0.5;
            }
        }
        if score > 0.0 {
            scores.push((port, score));
        }
    }

    if scores.is_empty() {
        return IntentRoute {
            primary_port: "P7".into(),
            confidence: 0.3,
            reason: "No keyword match — defaulting to P7 NAVIGATE for strategic routing".into(),
            alternatives: vec![],
        };
    }

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let total: f64 = scores.iter().map(|(_, s)| s).sum();
    let (primary, primary_score) = scores[0];

    IntentRoute {
        primary_port: primary.to_string(),
        confidence: ((primary_score / total.max(1.0) + 0.3).min(1.0) * 100.0).round() / 100.0,
        reason: format!(
            "Port {} ({}) matched with score {:.1}",
            primary,
            port_label(primary),
            primary_score
        ),
        alternatives: scores
            .iter()
            .skip(1)
            .take(3)
            .map(|(p, s)| IntentAlternative {
                port: p.to_string(),
                score: (s * 10.0).round() / 10.0,
                word: port_label(p).to_string(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_intent_routes_to_p6() {
        let route = route_intent("re-embed the knowledge memory after enrichment");
        assert_eq!(route.primary_port, "P6");
        assert!(route.confidence > 0.3);
    }

    #[test]
    fn no_match_defaults_to_p7() {
        let route = route_intent("zzz qqq");
        assert_eq!(route.primary_port, "P7");
        assert!((route.confidence - 0.3).abs() < f64::EPSILON);
        assert!(route.alternatives.is_empty());
    }

    #[test]
    fn red_team_routes_to_p4() {
        let route = route_intent("run an adversarial red team attack on the gate");
        assert_eq!(route.primary_port, "P4");
    }
}
