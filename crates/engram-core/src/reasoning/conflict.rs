//! Conflict Resolution Engine
//!
//! Pairwise comparison of stream outputs: detect contradictions via
//! lexical cues, classify them into one of five kinds, score severity from
//! evidence confidence, and emit a per-kind resolution framework.
//! Malformed input never throws; detection degrades to an empty result.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::{
    Conflict, ConflictEvidence, ConflictKind, ConflictSeverity, ResolutionFramework, StreamResult,
};

/// Lexical opposite pairs treated as direct contradictions.
const ANTONYMS: &[(&str, &str)] = &[
    ("safe", "unsafe"),
    ("secure", "insecure"),
    ("will", "won't"),
    ("can", "cannot"),
    ("should", "shouldn't"),
    ("increase", "decrease"),
    ("improve", "worsen"),
    ("possible", "impossible"),
    ("feasible", "infeasible"),
    ("reliable", "unreliable"),
    ("effective", "ineffective"),
    ("scalable", "unscalable"),
    ("stable", "unstable"),
    ("true", "false"),
    ("succeed", "fail"),
];

// ============================================================================
// PATTERN TRACKING
// ============================================================================

/// Aggregated statistics for one conflict kind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPattern {
    pub kind: ConflictKind,
    pub frequency: u64,
    /// Streams present in every observed instance
    pub common_sources: Vec<String>,
    pub resolution_attempts: u64,
    pub resolution_successes: u64,
}

impl ConflictPattern {
    /// Rolling resolution success rate in [0,1].
    pub fn resolution_success_rate(&self) -> f64 {
        if self.resolution_attempts == 0 {
            0.0
        } else {
            self.resolution_successes as f64 / self.resolution_attempts as f64
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Detects and scores conflicts between reasoning streams.
#[derive(Debug, Default)]
pub struct ConflictResolutionEngine {
    patterns: Mutex<HashMap<ConflictKind, ConflictPattern>>,
}

impl ConflictResolutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairwise conflict detection over stream results.
    ///
    /// Empty or singleton input yields no conflicts.
    pub fn detect_conflicts(&self, results: &[StreamResult]) -> Vec<Conflict> {
        if results.len() < 2 {
            return Vec::new();
        }

        let mut conflicts = Vec::new();
        for i in 0..results.len() {
            for j in (i + 1)..results.len() {
                if let Some(conflict) = self.compare_pair(&results[i], &results[j]) {
                    self.track_conflict_pattern(&conflict, None);
                    conflicts.push(conflict);
                }
            }
        }
        conflicts
    }

    fn compare_pair(&self, a: &StreamResult, b: &StreamResult) -> Option<Conflict> {
        // Conclusion-level disagreement first, then insight-level
        let (claim_a, claim_b, confidence_a, confidence_b, direct) =
            if let Some(direct) = contradiction(&a.conclusion, &b.conclusion) {
                (
                    a.conclusion.clone(),
                    b.conclusion.clone(),
                    a.confidence,
                    b.confidence,
                    direct,
                )
            } else {
                let mut found = None;
                'outer: for insight_a in &a.insights {
                    for insight_b in &b.insights {
                        if let Some(direct) = contradiction(&insight_a.content, &insight_b.content)
                        {
                            found = Some((
                                insight_a.content.clone(),
                                insight_b.content.clone(),
                                insight_a.confidence,
                                insight_b.confidence,
                                direct,
                            ));
                            break 'outer;
                        }
                    }
                }
                found?
            };

        let kind = self.classify_conflict(&claim_a, &claim_b);
        let mean_confidence = (confidence_a + confidence_b) / 2.0;
        let severity = self.assess_severity(kind, mean_confidence, direct);
        let resolution = Some(self.generate_resolution_framework(kind, severity));

        Some(Conflict {
            id: Uuid::new_v4().to_string(),
            kind,
            severity,
            source_streams: vec![
                a.stream_type.as_str().to_string(),
                b.stream_type.as_str().to_string(),
            ],
            description: format!(
                "{} and {} streams disagree: \"{}\" vs \"{}\"",
                a.stream_type, b.stream_type, claim_a, claim_b
            ),
            evidence: vec![
                ConflictEvidence {
                    stream: a.stream_type.as_str().to_string(),
                    claim: claim_a,
                    reasoning: a.reasoning.first().cloned().unwrap_or_default(),
                    confidence: confidence_a,
                },
                ConflictEvidence {
                    stream: b.stream_type.as_str().to_string(),
                    claim: claim_b,
                    reasoning: b.reasoning.first().cloned().unwrap_or_default(),
                    confidence: confidence_b,
                },
            ],
            resolution,
            detected_at: Utc::now(),
        })
    }

    /// Classify a contradictory claim pair per the rubric: factual beats
    /// all when concrete values diverge; otherwise method, prediction,
    /// value, then logic cues decide; the default is factual.
    pub fn classify_conflict(&self, a: &str, b: &str) -> ConflictKind {
        if differing_numbers(a, b) {
            return ConflictKind::Factual;
        }

        let combined = format!("{} {}", a.to_lowercase(), b.to_lowercase());
        let has = |words: &[&str]| words.iter().any(|&w| contains_token(&combined, w));

        if has(&["approach", "method", "methodology", "strategy", "technique", "process"]) {
            ConflictKind::Methodological
        } else if has(&["will", "won't", "forecast", "predict", "prediction", "future", "expect"]) {
            ConflictKind::Predictive
        } else if has(&["should", "shouldn't", "prefer", "better", "worse", "priority", "value"]) {
            ConflictKind::Evaluative
        } else if has(&["therefore", "thus", "implies", "hence", "follows", "consequently"]) {
            ConflictKind::Logical
        } else {
            ConflictKind::Factual
        }
    }

    /// Severity from the kind's baseline and the mean evidence confidence.
    /// A direct (lexical-opposite) contradiction is bumped one level and
    /// never scores below the indirect variant at the same confidence.
    pub fn assess_severity(
        &self,
        kind: ConflictKind,
        mean_confidence: f64,
        direct: bool,
    ) -> ConflictSeverity {
        // Baseline ranking: Factual > Logical >= Predictive > Evaluative >= Methodological
        let baseline = match kind {
            ConflictKind::Factual => 4,
            ConflictKind::Logical | ConflictKind::Predictive => 3,
            ConflictKind::Evaluative | ConflictKind::Methodological => 2,
        };

        let banded = if mean_confidence >= 0.9 {
            if baseline >= 4 {
                ConflictSeverity::Critical
            } else {
                ConflictSeverity::High
            }
        } else if mean_confidence >= 0.8 {
            ConflictSeverity::High
        } else if mean_confidence >= 0.6 {
            ConflictSeverity::Medium
        } else {
            ConflictSeverity::Low
        };

        if direct {
            bump(banded)
        } else {
            banded
        }
    }

    /// Per-kind resolution framework. Critical severity forces urgency
    /// language into the recommended action.
    pub fn generate_resolution_framework(
        &self,
        kind: ConflictKind,
        severity: ConflictSeverity,
    ) -> ResolutionFramework {
        let (approach, steps) = match kind {
            ConflictKind::Logical => (
                "Trace each logical derivation step by step to find the divergence".to_string(),
                vec![
                    "List the premises each stream starts from".to_string(),
                    "Replay each deduction until the chains diverge".to_string(),
                    "Test the diverging step against the shared premises".to_string(),
                ],
            ),
            ConflictKind::Methodological => (
                "Compare each proposed method against the problem constraints".to_string(),
                vec![
                    "State each method's assumptions and costs".to_string(),
                    "Score both against the stated constraints".to_string(),
                    "Pilot the leading method on a bounded slice".to_string(),
                ],
            ),
            ConflictKind::Evaluative => (
                "Surface the underlying value judgements and rank them explicitly".to_string(),
                vec![
                    "Name the value each stream is optimizing for".to_string(),
                    "Rank the values against the problem goals".to_string(),
                    "Re-evaluate both claims under the agreed ranking".to_string(),
                ],
            ),
            ConflictKind::Predictive => (
                "Stress-test each prediction against base rates and leading indicators"
                    .to_string(),
                vec![
                    "Identify the forecast horizon and assumptions".to_string(),
                    "Compare each prediction with historical base rates".to_string(),
                    "Define an early signal that discriminates between them".to_string(),
                ],
            ),
            ConflictKind::Factual => (
                "Systematic analysis and evidence-based resolution".to_string(),
                vec![
                    "Isolate the concrete value or property in dispute".to_string(),
                    "Gather a primary source for the disputed fact".to_string(),
                    "Re-score both claims against the verified fact".to_string(),
                ],
            ),
        };

        let considerations = vec![
            "Both streams reasoned from the same problem statement".to_string(),
            "Evidence confidence may reflect style, not accuracy".to_string(),
        ];
        let recommended_action = match severity {
            ConflictSeverity::Critical => {
                "Immediate reconciliation required before acting on either conclusion".to_string()
            }
            ConflictSeverity::High => {
                "Resolve before finalizing the synthesis".to_string()
            }
            ConflictSeverity::Medium => "Flag for review during synthesis".to_string(),
            ConflictSeverity::Low => "Record the disagreement; no action needed".to_string(),
        };

        ResolutionFramework {
            approach,
            steps,
            considerations,
            recommended_action,
        }
    }

    /// Update per-kind frequency, common sources, and the rolling
    /// resolution success rate.
    pub fn track_conflict_pattern(&self, conflict: &Conflict, resolved: Option<bool>) {
        let mut patterns = self.patterns.lock().expect("pattern lock poisoned");
        let entry = patterns
            .entry(conflict.kind)
            .or_insert_with(|| ConflictPattern {
                kind: conflict.kind,
                frequency: 0,
                common_sources: conflict.source_streams.clone(),
                resolution_attempts: 0,
                resolution_successes: 0,
            });
        entry.frequency += 1;
        entry
            .common_sources
            .retain(|source| conflict.source_streams.contains(source));
        if let Some(success) = resolved {
            entry.resolution_attempts += 1;
            if success {
                entry.resolution_successes += 1;
            }
        }
    }

    /// Snapshot of tracked patterns.
    pub fn patterns(&self) -> Vec<ConflictPattern> {
        self.patterns
            .lock()
            .expect("pattern lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

fn bump(severity: ConflictSeverity) -> ConflictSeverity {
    match severity {
        ConflictSeverity::Low => ConflictSeverity::Medium,
        ConflictSeverity::Medium => ConflictSeverity::High,
        ConflictSeverity::High | ConflictSeverity::Critical => ConflictSeverity::Critical,
    }
}

// ============================================================================
// LEXICAL DETECTION
// ============================================================================

/// Whether two claims contradict. `Some(true)` marks a direct (lexical
/// opposite) contradiction, `Some(false)` an indirect one: a negation
/// overlap, or a numeric disagreement about the same property. Every
/// detection path (pairwise comparison, synthesis consistency) routes
/// through here.
fn contradiction(a: &str, b: &str) -> Option<bool> {
    if a.trim().is_empty() || b.trim().is_empty() {
        return None;
    }
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    for &(x, y) in ANTONYMS {
        if (contains_token(&a, x) && contains_token(&b, y))
            || (contains_token(&a, y) && contains_token(&b, x))
        {
            return Some(true);
        }
    }

    // "X" vs "not X": negation on one side with strong token overlap
    let a_negated = contains_token(&a, "not");
    let b_negated = contains_token(&b, "not");
    if a_negated != b_negated {
        let tokens_a = content_tokens(&a);
        let tokens_b = content_tokens(&b);
        if !tokens_a.is_empty() && !tokens_b.is_empty() {
            let shared = tokens_a.iter().filter(|t| tokens_b.contains(*t)).count();
            let overlap = shared as f64 / tokens_a.len().min(tokens_b.len()) as f64;
            if overlap >= 0.6 {
                return Some(false);
            }
        }
    }

    // "X is 20ms" vs "X is 200ms": same property, different measured value
    if numeric_disagreement(&a, &b) {
        return Some(false);
    }

    None
}

pub(crate) fn claims_contradict(a: &str, b: &str) -> bool {
    contradiction(a, b).is_some()
}

fn contains_token(text: &str, token: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|t| t == token)
}

fn content_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2 && *t != "not")
        .map(str::to_string)
        .collect()
}

/// Content tokens with number-bearing tokens removed.
fn content_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2 && *t != "not" && !t.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

/// The claims state different numbers while their surrounding words
/// substantially overlap: a disagreement on a measured value rather than
/// two unrelated counts.
fn numeric_disagreement(a: &str, b: &str) -> bool {
    if !differing_numbers(a, b) {
        return false;
    }
    let words_a = content_words(a);
    let words_b = content_words(b);
    if words_a.is_empty() || words_b.is_empty() {
        return false;
    }
    let shared = words_a.iter().filter(|w| words_b.contains(*w)).count();
    shared as f64 / words_a.len().min(words_b.len()) as f64 >= 0.5
}

/// Both claims carry numbers and the number sets differ.
fn differing_numbers(a: &str, b: &str) -> bool {
    let numbers = |text: &str| -> Vec<String> {
        text.split(|c: char| !c.is_ascii_digit() && c != '.')
            .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
            .map(str::to_string)
            .collect()
    };
    let numbers_a = numbers(a);
    let numbers_b = numbers(b);
    !numbers_a.is_empty() && !numbers_b.is_empty() && numbers_a != numbers_b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{StreamStatus, StreamType};

    fn result(stream_type: StreamType, conclusion: &str, confidence: f64) -> StreamResult {
        StreamResult {
            stream_id: format!("{}-1", stream_type.as_str()),
            stream_type,
            conclusion: conclusion.to_string(),
            reasoning: vec!["step one".to_string()],
            insights: Vec::new(),
            confidence,
            processing_time_ms: 10,
            status: StreamStatus::Completed,
        }
    }

    #[test]
    fn test_empty_and_singleton_input() {
        let engine = ConflictResolutionEngine::new();
        assert!(engine.detect_conflicts(&[]).is_empty());
        assert!(engine
            .detect_conflicts(&[result(StreamType::Analytical, "fine", 0.8)])
            .is_empty());
    }

    #[test]
    fn test_malformed_input_does_not_throw() {
        let engine = ConflictResolutionEngine::new();
        let results = vec![
            result(StreamType::Analytical, "", 0.0),
            result(StreamType::Critical, "", 0.0),
        ];
        assert!(engine.detect_conflicts(&results).is_empty());
    }

    #[test]
    fn test_direct_factual_contradiction_critical() {
        // S10: "safe" vs "unsafe" at 0.95 confidence
        let engine = ConflictResolutionEngine::new();
        let results = vec![
            result(StreamType::Analytical, "The system is safe", 0.95),
            result(StreamType::Critical, "The system is unsafe", 0.95),
        ];

        let conflicts = engine.detect_conflicts(&results);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::Factual);
        assert_eq!(conflict.severity, ConflictSeverity::Critical);

        let framework = conflict.resolution.as_ref().unwrap();
        assert!(!framework.approach.to_lowercase().contains("method"));
        let action = framework.recommended_action.to_lowercase();
        assert!(
            action.contains("immediate")
                || action.contains("urgent")
                || action.contains("critical")
                || action.contains("priority")
        );
    }

    #[test]
    fn test_no_conflict_between_agreeing_streams() {
        let engine = ConflictResolutionEngine::new();
        let results = vec![
            result(StreamType::Analytical, "Caching reduces latency", 0.8),
            result(StreamType::Creative, "Caching also simplifies reads", 0.7),
        ];
        assert!(engine.detect_conflicts(&results).is_empty());
    }

    #[test]
    fn test_insight_level_detection() {
        let engine = ConflictResolutionEngine::new();
        let mut a = result(StreamType::Analytical, "Overall plan holds", 0.8);
        a.insights.push(crate::reasoning::Insight {
            content: "The rollout will succeed".to_string(),
            confidence: 0.7,
            importance: 0.6,
            source: "analytical".to_string(),
        });
        let mut b = result(StreamType::Critical, "Several risks remain", 0.8);
        b.insights.push(crate::reasoning::Insight {
            content: "The rollout will fail under load".to_string(),
            confidence: 0.7,
            importance: 0.6,
            source: "critical".to_string(),
        });

        let conflicts = engine.detect_conflicts(&[a, b]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].evidence.len(), 2);
    }

    #[test]
    fn test_classification_rubric() {
        let engine = ConflictResolutionEngine::new();
        assert_eq!(
            engine.classify_conflict("latency is 20ms", "latency is 200ms"),
            ConflictKind::Factual
        );
        assert_eq!(
            engine.classify_conflict(
                "the right approach is batching",
                "the streaming method is right"
            ),
            ConflictKind::Methodological
        );
        assert_eq!(
            engine.classify_conflict("demand will grow", "demand won't grow"),
            ConflictKind::Predictive
        );
        assert_eq!(
            engine.classify_conflict("we should value speed", "correctness is better"),
            ConflictKind::Evaluative
        );
        assert_eq!(
            engine.classify_conflict(
                "therefore the invariant holds",
                "hence the invariant is broken"
            ),
            ConflictKind::Logical
        );
    }

    #[test]
    fn test_severity_monotonic_in_confidence() {
        let engine = ConflictResolutionEngine::new();
        let mut previous = ConflictSeverity::Low;
        for confidence in [0.1, 0.5, 0.65, 0.85, 0.95] {
            let severity = engine.assess_severity(ConflictKind::Factual, confidence, false);
            assert!(severity >= previous);
            previous = severity;
        }
    }

    #[test]
    fn test_direct_never_below_indirect() {
        let engine = ConflictResolutionEngine::new();
        for kind in [
            ConflictKind::Factual,
            ConflictKind::Logical,
            ConflictKind::Methodological,
            ConflictKind::Evaluative,
            ConflictKind::Predictive,
        ] {
            for confidence in [0.3, 0.65, 0.85, 0.95] {
                let direct = engine.assess_severity(kind, confidence, true);
                let indirect = engine.assess_severity(kind, confidence, false);
                assert!(direct >= indirect);
            }
        }
    }

    #[test]
    fn test_framework_keywords_by_kind() {
        let engine = ConflictResolutionEngine::new();
        let cases = [
            (ConflictKind::Logical, "logical"),
            (ConflictKind::Methodological, "method"),
            (ConflictKind::Evaluative, "value"),
            (ConflictKind::Predictive, "predict"),
        ];
        for (kind, keyword) in cases {
            let framework =
                engine.generate_resolution_framework(kind, ConflictSeverity::Medium);
            assert!(
                framework.approach.to_lowercase().contains(keyword),
                "{kind:?} approach missing '{keyword}'"
            );
        }
        let factual = engine
            .generate_resolution_framework(ConflictKind::Factual, ConflictSeverity::Medium);
        assert_eq!(
            factual.approach,
            "Systematic analysis and evidence-based resolution"
        );
    }

    #[test]
    fn test_pattern_tracking() {
        let engine = ConflictResolutionEngine::new();
        let results = vec![
            result(StreamType::Analytical, "The system is safe", 0.9),
            result(StreamType::Critical, "The system is unsafe", 0.9),
        ];
        let conflicts = engine.detect_conflicts(&results);
        engine.track_conflict_pattern(&conflicts[0], Some(true));
        engine.track_conflict_pattern(&conflicts[0], Some(false));

        let patterns = engine.patterns();
        let factual = patterns.iter().find(|p| p.kind == ConflictKind::Factual).unwrap();
        // One from detection, two manual
        assert_eq!(factual.frequency, 3);
        assert_eq!(factual.resolution_attempts, 2);
        assert!((factual.resolution_success_rate() - 0.5).abs() < 1e-9);
        assert!(factual.common_sources.contains(&"analytical".to_string()));
    }

    #[test]
    fn test_numeric_divergence_detected_end_to_end() {
        // Conclusions that disagree only on a measured value, no antonym
        // or negation cue anywhere
        let engine = ConflictResolutionEngine::new();
        let results = vec![
            result(StreamType::Analytical, "p99 latency is 20ms", 0.85),
            result(StreamType::Critical, "p99 latency is 200ms", 0.85),
        ];

        let conflicts = engine.detect_conflicts(&results);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::Factual);
        assert_eq!(conflict.evidence.len(), 2);
        // Indirect contradiction: banded severity, no direct bump
        assert_eq!(conflict.severity, ConflictSeverity::High);
    }

    #[test]
    fn test_numeric_divergence_at_insight_level() {
        let engine = ConflictResolutionEngine::new();
        let mut a = result(StreamType::Analytical, "Throughput looks healthy", 0.8);
        a.insights.push(crate::reasoning::Insight {
            content: "error rate holds at 2 percent".to_string(),
            confidence: 0.7,
            importance: 0.6,
            source: "analytical".to_string(),
        });
        let mut b = result(StreamType::Critical, "Reliability needs work", 0.8);
        b.insights.push(crate::reasoning::Insight {
            content: "error rate holds at 9 percent".to_string(),
            confidence: 0.7,
            importance: 0.6,
            source: "critical".to_string(),
        });

        let conflicts = engine.detect_conflicts(&[a, b]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Factual);
    }

    #[test]
    fn test_unrelated_counts_do_not_conflate() {
        // Different numbers about different things are not a disagreement
        let engine = ConflictResolutionEngine::new();
        let results = vec![
            result(StreamType::Analytical, "Decomposed the plan into 3 workstreams", 0.8),
            result(StreamType::Critical, "Raised 5 open risks against the plan", 0.8),
        ];
        assert!(engine.detect_conflicts(&results).is_empty());
    }

    #[test]
    fn test_numeric_disagreement_requires_shared_subject() {
        assert!(numeric_disagreement("latency is 20ms", "latency is 200ms"));
        assert!(!numeric_disagreement(
            "found 3 components",
            "raised 5 challenges"
        ));
        // Same numbers are no disagreement
        assert!(!numeric_disagreement("latency is 20ms", "latency is 20ms"));
        // Numberless claims never trigger the numeric path
        assert!(!numeric_disagreement("latency is low", "latency is high"));
    }

    #[test]
    fn test_negation_overlap_is_indirect() {
        assert_eq!(
            contradiction(
                "the migration is reversible in production",
                "the migration is not reversible in production"
            ),
            Some(false)
        );
    }

    #[test]
    fn test_unrelated_claims_no_contradiction() {
        assert_eq!(contradiction("apples are red", "the sky is blue"), None);
    }
}
