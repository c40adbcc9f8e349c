//! Reasoning journeys: coordinated multi-stream runs, failure isolation,
//! synthesis quality, and conflict severity calibration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use engram_core::{
    streams_for_types, ConflictKind, ConflictResolutionEngine, ConflictSeverity, Insight,
    ReasoningError, ReasoningProblem, ReasoningStream, StreamContext, StreamCoordinator,
    StreamOutput, StreamResult, StreamStatus, StreamType, Synthesizer,
};

fn problem() -> ReasoningProblem {
    let mut p = ReasoningProblem::new(
        "Decide whether to migrate the billing service to the new queue. \
         The cutover must not drop events. Rollback has to stay possible.",
    );
    p.constraints = vec!["no dropped events".to_string()];
    p.goals = vec!["safe cutover".to_string(), "possible rollback".to_string()];
    p
}

#[tokio::test]
async fn four_streams_happy_path() {
    // All four streams complete under a generous budget
    let coordinator = StreamCoordinator::new(Arc::new(ConflictResolutionEngine::new()));
    let streams = streams_for_types(&StreamType::ALL, None);

    let outcome = coordinator
        .execute_streams(&problem(), streams, Duration::from_secs(30), None)
        .await;

    assert_eq!(outcome.result.stream_results.len(), 4);
    for result in &outcome.result.stream_results {
        assert_eq!(result.status, StreamStatus::Completed);
        assert!(!result.conclusion.is_empty());
        assert!(!result.reasoning.is_empty());
    }
    assert!(outcome.result.confidence > 0.0 && outcome.result.confidence <= 1.0);
    assert!(outcome.metrics.overhead_percentage >= 0.0);
    assert!(!outcome.result.insights.is_empty());
    assert!(!outcome.result.recommendations.is_empty());
    for recommendation in &outcome.result.recommendations {
        assert!((1..=10).contains(&recommendation.priority));
    }
    let quality = outcome.result.quality;
    for score in [
        quality.overall,
        quality.coherence,
        quality.completeness,
        quality.consistency,
    ] {
        assert!((0.0..=1.0).contains(&score));
    }
}

struct FailingStream(StreamType);

#[async_trait]
impl ReasoningStream for FailingStream {
    fn stream_type(&self) -> StreamType {
        self.0
    }

    async fn execute(
        &self,
        _problem: &ReasoningProblem,
        _ctx: &StreamContext,
    ) -> Result<StreamOutput, ReasoningError> {
        Err(ReasoningError::Failed("simulated breakage".to_string()))
    }
}

#[tokio::test]
async fn two_failures_do_not_poison_synthesis() {
    // Two streams succeed, two throw; synthesis uses only the survivors
    let coordinator = StreamCoordinator::new(Arc::new(ConflictResolutionEngine::new()));
    let mut streams = streams_for_types(&[StreamType::Analytical, StreamType::Creative], None);
    streams.push(Arc::new(FailingStream(StreamType::Critical)));
    streams.push(Arc::new(FailingStream(StreamType::Synthetic)));

    let outcome = coordinator
        .execute_streams(&problem(), streams, Duration::from_secs(30), None)
        .await;

    let by_status = |status: StreamStatus| {
        outcome
            .result
            .stream_results
            .iter()
            .filter(|r| r.status == status)
            .count()
    };
    assert_eq!(by_status(StreamStatus::Completed), 2);
    assert_eq!(by_status(StreamStatus::Failed), 2);
    assert!(!outcome.result.needs_fallback());
    // Failed streams contribute no insights
    for insight in &outcome.result.insights {
        assert!(
            insight.sources.iter().all(|s| s == "analytical" || s == "creative"),
            "unexpected insight source: {:?}",
            insight.sources
        );
    }
}

fn opinionated(stream_type: StreamType, conclusion: &str, confidence: f64) -> StreamResult {
    let mut result = StreamResult::empty(stream_type, StreamStatus::Completed, 25);
    result.conclusion = conclusion.to_string();
    result.reasoning = vec!["examined the evidence".to_string()];
    result.insights = vec![Insight {
        content: conclusion.to_string(),
        confidence,
        importance: 0.8,
        source: stream_type.as_str().to_string(),
    }];
    result.confidence = confidence;
    result
}

#[test]
fn direct_contradiction_scores_critical() {
    // "safe" vs "unsafe" at confidence 0.95
    let engine = ConflictResolutionEngine::new();
    let results = vec![
        opinionated(StreamType::Analytical, "The migration is safe", 0.95),
        opinionated(StreamType::Critical, "The migration is unsafe", 0.95),
    ];

    let conflicts = engine.detect_conflicts(&results);
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.kind, ConflictKind::Factual);
    assert_eq!(conflict.severity, ConflictSeverity::Critical);
    assert_eq!(conflict.source_streams.len(), 2);
    assert_eq!(conflict.evidence.len(), 2);

    let framework = conflict.resolution.as_ref().expect("framework missing");
    assert!(!framework.approach.to_lowercase().contains("method"));
    let action = framework.recommended_action.to_lowercase();
    assert!(
        ["immediate", "urgent", "critical", "priority"]
            .iter()
            .any(|word| action.contains(word)),
        "action lacks urgency language: {action}"
    );
}

#[test]
fn severity_rises_with_evidence_confidence() {
    let engine = ConflictResolutionEngine::new();
    let severity_at = |confidence: f64| {
        let results = vec![
            opinionated(StreamType::Analytical, "The migration is safe", confidence),
            opinionated(StreamType::Critical, "The migration is unsafe", confidence),
        ];
        engine.detect_conflicts(&results)[0].severity
    };

    let mut previous = severity_at(0.2);
    for confidence in [0.5, 0.7, 0.85, 0.95] {
        let severity = severity_at(confidence);
        assert!(severity >= previous);
        previous = severity;
    }
}

#[test]
fn synthesis_confidence_tempered_by_conflicts() {
    let synthesizer = Synthesizer::new();
    let engine = ConflictResolutionEngine::new();
    let problem = problem();

    let agreeing = vec![
        opinionated(StreamType::Analytical, "Cut over in stages", 0.9),
        opinionated(StreamType::Creative, "Stage the cutover behind a flag", 0.8),
    ];
    let conflicts = engine.detect_conflicts(&agreeing);
    let calm = synthesizer.synthesize(&problem, agreeing, conflicts);

    let fighting = vec![
        opinionated(StreamType::Analytical, "The migration is safe", 0.9),
        opinionated(StreamType::Critical, "The migration is unsafe", 0.9),
    ];
    let conflicts = engine.detect_conflicts(&fighting);
    assert!(!conflicts.is_empty());
    let tense = synthesizer.synthesize(&problem, fighting, conflicts);

    assert!(tense.confidence < calm.confidence);
    assert!(tense.conclusion.contains("conflict"));
    assert!(tense.quality.coherence < calm.quality.coherence);
}

#[tokio::test]
async fn synthetic_stream_sees_peer_insights() {
    // Analytical publishes early; synthetic integrates across streams
    let coordinator = StreamCoordinator::new(Arc::new(ConflictResolutionEngine::new()));
    let streams = streams_for_types(&[StreamType::Analytical, StreamType::Synthetic], None);

    let outcome = coordinator
        .execute_streams(&problem(), streams, Duration::from_secs(30), None)
        .await;

    let synthetic = outcome
        .result
        .stream_results
        .iter()
        .find(|r| r.stream_type == StreamType::Synthetic)
        .unwrap();
    assert_eq!(synthetic.status, StreamStatus::Completed);
    assert!(!synthetic.insights.is_empty());
}
