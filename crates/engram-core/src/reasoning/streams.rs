//! Reasoning Streams
//!
//! Four rule-based reasoning modes behind one narrow capability trait.
//! Streams publish checkpoint progress for coordinator synchronization and
//! intermediate insights for SSE consumers. When an LLM is wired up it
//! enriches the conclusion; rule-based output is the floor, so a failed
//! LLM call degrades rather than fails.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::providers::LlmProvider;

use super::{EventSink, Insight, ReasoningError, ReasoningEvent, ReasoningProblem, StreamType};

// ============================================================================
// STREAM CONTEXT
// ============================================================================

/// Insights published so far across all streams of one run.
pub(crate) type SharedInsights = Arc<Mutex<Vec<(StreamType, Insight)>>>;

/// Per-stream handle for progress, insight publication, and peer access.
pub struct StreamContext {
    stream_type: StreamType,
    progress: watch::Sender<f64>,
    shared: SharedInsights,
    events: Option<EventSink>,
}

impl StreamContext {
    pub(crate) fn new(
        stream_type: StreamType,
        progress: watch::Sender<f64>,
        shared: SharedInsights,
        events: Option<EventSink>,
    ) -> Self {
        Self {
            stream_type,
            progress,
            shared,
            events,
        }
    }

    /// Report progress past `fraction` of the stream's work.
    pub fn publish_checkpoint(&self, fraction: f64) {
        let _ = self.progress.send(fraction.clamp(0.0, 1.0));
        if let Some(events) = &self.events {
            let _ = events.send(ReasoningEvent::StreamProgress {
                stream: self.stream_type,
                fraction,
            });
        }
    }

    /// Publish an intermediate insight, visible to peer streams.
    pub fn publish_insight(&self, insight: Insight) {
        if let Some(events) = &self.events {
            let _ = events.send(ReasoningEvent::StreamInsight {
                stream: self.stream_type,
                insight: insight.clone(),
            });
        }
        self.shared
            .lock()
            .expect("insight lock poisoned")
            .push((self.stream_type, insight));
    }

    /// Insights published by other streams so far.
    pub fn peer_insights(&self) -> Vec<Insight> {
        self.shared
            .lock()
            .expect("insight lock poisoned")
            .iter()
            .filter(|(source, _)| *source != self.stream_type)
            .map(|(_, insight)| insight.clone())
            .collect()
    }
}

/// Raw output of one stream; the coordinator stamps timing and status.
#[derive(Debug, Clone)]
pub struct StreamOutput {
    pub conclusion: String,
    pub reasoning: Vec<String>,
    pub insights: Vec<Insight>,
    pub confidence: f64,
}

/// A single reasoning mode. Implementations are free (rule-based,
/// LLM-backed, mixed); the coordinator never assumes determinism.
#[async_trait]
pub trait ReasoningStream: Send + Sync {
    fn stream_type(&self) -> StreamType;

    async fn execute(
        &self,
        problem: &ReasoningProblem,
        ctx: &StreamContext,
    ) -> Result<StreamOutput, ReasoningError>;
}

/// Build the stream set for the requested types.
pub fn streams_for_types(
    types: &[StreamType],
    llm: Option<Arc<dyn LlmProvider>>,
) -> Vec<Arc<dyn ReasoningStream>> {
    types
        .iter()
        .map(|stream_type| match stream_type {
            StreamType::Analytical => {
                Arc::new(AnalyticalStream::new(llm.clone())) as Arc<dyn ReasoningStream>
            }
            StreamType::Creative => Arc::new(CreativeStream::new(llm.clone())),
            StreamType::Critical => Arc::new(CriticalStream::new(llm.clone())),
            StreamType::Synthetic => Arc::new(SyntheticStream::new(llm.clone())),
        })
        .collect()
}

// ============================================================================
// TEXT HELPERS
// ============================================================================

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "of", "to", "in", "on", "for", "with", "is", "are",
    "was", "were", "be", "this", "that", "it", "as", "at", "by", "we", "our", "how", "what",
    "should", "can", "could", "would", "will", "do", "does", "from", "into", "about",
];

fn sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn key_terms(text: &str, limit: usize) -> Vec<String> {
    let mut seen = Vec::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2 && !STOPWORDS.contains(t))
    {
        if !seen.iter().any(|s: &String| s == token) {
            seen.push(token.to_string());
            if seen.len() == limit {
                break;
            }
        }
    }
    seen
}

/// Best-effort LLM enrichment of a rule-based conclusion. A hung provider
/// is bounded by the coordinator's stream deadline; an erroring provider
/// falls back to the rule-based text.
async fn enrich_conclusion(
    llm: &Option<Arc<dyn LlmProvider>>,
    stream_type: StreamType,
    problem: &ReasoningProblem,
    fallback: String,
) -> String {
    let Some(llm) = llm else {
        return fallback;
    };
    let prompt = format!(
        "Problem: {}\n\nDraft {} conclusion: {}\n\nRefine this conclusion in two sentences.",
        problem.description,
        stream_type.as_str(),
        fallback
    );
    match llm
        .generate(&prompt, "You are one reasoning stream in a parallel deliberation.")
        .await
    {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => fallback,
    }
}

// ============================================================================
// ANALYTICAL
// ============================================================================

/// Decomposes the problem into components, weighs evidence, and produces a
/// structured conclusion. Confidence rises with evidence count.
pub struct AnalyticalStream {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl AnalyticalStream {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ReasoningStream for AnalyticalStream {
    fn stream_type(&self) -> StreamType {
        StreamType::Analytical
    }

    async fn execute(
        &self,
        problem: &ReasoningProblem,
        ctx: &StreamContext,
    ) -> Result<StreamOutput, ReasoningError> {
        let components = sentences(&problem.description);
        let mut reasoning = vec![format!(
            "Decomposed the problem into {} component(s)",
            components.len().max(1)
        )];
        ctx.publish_checkpoint(0.25);

        let mut insights = Vec::new();
        let evidence: Vec<&String> = components.iter().chain(&problem.constraints).collect();
        for (i, piece) in evidence.iter().take(4).enumerate() {
            let insight = Insight {
                content: format!("Analysis indicates: {piece}"),
                confidence: (0.6 + 0.05 * i as f64).min(0.85),
                importance: (0.5 + 0.1 * (evidence.len() - i) as f64 / evidence.len() as f64)
                    .min(0.9),
                source: StreamType::Analytical.as_str().to_string(),
            };
            ctx.publish_insight(insight.clone());
            insights.push(insight);
        }
        reasoning.push(format!("Evaluated {} piece(s) of evidence", evidence.len()));
        ctx.publish_checkpoint(0.5);

        for goal in problem.goals.iter().take(3) {
            reasoning.push(format!("Mapped evidence against goal: {goal}"));
        }
        ctx.publish_checkpoint(0.75);

        let coherence_bonus = if components.len() > 1 { 0.05 } else { 0.0 };
        let confidence = (0.5 + 0.06 * evidence.len() as f64 + coherence_bonus).min(0.9);
        let fallback = format!(
            "Structured analysis of \"{}\" across {} component(s) supports a staged, \
             evidence-first approach.",
            first_terms(problem),
            components.len().max(1)
        );
        let conclusion =
            enrich_conclusion(&self.llm, StreamType::Analytical, problem, fallback).await;
        ctx.publish_checkpoint(1.0);

        Ok(StreamOutput {
            conclusion,
            reasoning,
            insights,
            confidence,
        })
    }
}

// ============================================================================
// CREATIVE
// ============================================================================

/// Generates alternative framings and analogies. Confidence derives from
/// novelty times feasibility.
pub struct CreativeStream {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl CreativeStream {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ReasoningStream for CreativeStream {
    fn stream_type(&self) -> StreamType {
        StreamType::Creative
    }

    async fn execute(
        &self,
        problem: &ReasoningProblem,
        ctx: &StreamContext,
    ) -> Result<StreamOutput, ReasoningError> {
        let terms = key_terms(&problem.description, 4);
        let mut reasoning = vec!["Explored alternative framings of the problem".to_string()];
        ctx.publish_checkpoint(0.25);

        let framings = [
            format!("Inverting the problem: what would guarantee failure with {}?", join_terms(&terms)),
            format!("Reframing {} as a flow problem rather than a state problem", join_terms(&terms)),
            format!("Borrowing from an adjacent domain that already solved {}", join_terms(&terms)),
        ];
        let mut insights = Vec::new();
        for (i, framing) in framings.iter().enumerate() {
            let insight = Insight {
                content: framing.clone(),
                confidence: 0.55 + 0.05 * i as f64,
                importance: 0.6,
                source: StreamType::Creative.as_str().to_string(),
            };
            ctx.publish_insight(insight.clone());
            insights.push(insight);
        }
        reasoning.push(format!("Generated {} alternative framing(s)", framings.len()));
        ctx.publish_checkpoint(0.5);

        reasoning.push("Tested each framing for feasibility against stated goals".to_string());
        ctx.publish_checkpoint(0.75);

        let novelty = (0.4 + 0.1 * framings.len() as f64).min(1.0);
        let feasibility = if problem.goals.is_empty() { 0.6 } else { 0.8 };
        let confidence = novelty * feasibility;
        let fallback = format!(
            "Reframing \"{}\" opens {} alternative route(s); the inversion framing is the most \
             actionable starting point.",
            first_terms(problem),
            framings.len()
        );
        let conclusion =
            enrich_conclusion(&self.llm, StreamType::Creative, problem, fallback).await;
        ctx.publish_checkpoint(1.0);

        Ok(StreamOutput {
            conclusion,
            reasoning,
            insights,
            confidence,
        })
    }
}

// ============================================================================
// CRITICAL
// ============================================================================

/// Surfaces assumptions, counter-arguments, and risks. Confidence rises
/// with the breadth of challenges considered.
pub struct CriticalStream {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl CriticalStream {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ReasoningStream for CriticalStream {
    fn stream_type(&self) -> StreamType {
        StreamType::Critical
    }

    async fn execute(
        &self,
        problem: &ReasoningProblem,
        ctx: &StreamContext,
    ) -> Result<StreamOutput, ReasoningError> {
        let mut reasoning = vec!["Enumerated implicit assumptions".to_string()];
        ctx.publish_checkpoint(0.25);

        let mut challenges = vec![format!(
            "Assumption at risk: the problem statement \"{}\" presumes current conditions hold",
            first_terms(problem)
        )];
        for constraint in problem.constraints.iter().take(3) {
            challenges.push(format!("Constraint \"{constraint}\" may be tighter than stated"));
        }
        for goal in problem.goals.iter().take(2) {
            challenges.push(format!("Goal \"{goal}\" may conflict with other goals under load"));
        }

        let mut insights = Vec::new();
        for (i, challenge) in challenges.iter().enumerate() {
            let insight = Insight {
                content: challenge.clone(),
                confidence: (0.55 + 0.04 * i as f64).min(0.8),
                importance: 0.7,
                source: StreamType::Critical.as_str().to_string(),
            };
            ctx.publish_insight(insight.clone());
            insights.push(insight);
        }
        reasoning.push(format!("Raised {} challenge(s)", challenges.len()));
        ctx.publish_checkpoint(0.5);

        reasoning.push("Ranked risks by blast radius".to_string());
        ctx.publish_checkpoint(0.75);

        let confidence = (0.4 + 0.08 * challenges.len() as f64).min(0.85);
        let fallback = format!(
            "The plan for \"{}\" survives scrutiny only if {} identified risk(s) are mitigated \
             up front.",
            first_terms(problem),
            challenges.len()
        );
        let conclusion =
            enrich_conclusion(&self.llm, StreamType::Critical, problem, fallback).await;
        ctx.publish_checkpoint(1.0);

        Ok(StreamOutput {
            conclusion,
            reasoning,
            insights,
            confidence,
        })
    }
}

// ============================================================================
// SYNTHETIC
// ============================================================================

/// Integrates across other streams' public insights when available;
/// otherwise proposes a unifying frame.
pub struct SyntheticStream {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl SyntheticStream {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ReasoningStream for SyntheticStream {
    fn stream_type(&self) -> StreamType {
        StreamType::Synthetic
    }

    async fn execute(
        &self,
        problem: &ReasoningProblem,
        ctx: &StreamContext,
    ) -> Result<StreamOutput, ReasoningError> {
        let mut reasoning = vec!["Scanning for cross-cutting structure".to_string()];
        ctx.publish_checkpoint(0.25);

        // Let concurrently running peers publish before integrating
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        let peers = ctx.peer_insights();
        ctx.publish_checkpoint(0.5);

        let mut insights = Vec::new();
        let (conclusion_seed, confidence) = if peers.is_empty() {
            let terms = key_terms(&problem.description, 3);
            let insight = Insight {
                content: format!(
                    "A unifying frame: treat {} as one system with shared constraints",
                    join_terms(&terms)
                ),
                confidence: 0.55,
                importance: 0.65,
                source: StreamType::Synthetic.as_str().to_string(),
            };
            ctx.publish_insight(insight.clone());
            insights.push(insight);
            reasoning.push("No peer insights available; proposed a unifying frame".to_string());
            (
                format!(
                    "Treat \"{}\" as a single system and optimize its shared constraints together.",
                    first_terms(problem)
                ),
                0.55,
            )
        } else {
            let mut top: Vec<&Insight> = peers.iter().collect();
            top.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            for peer in top.iter().take(2) {
                let insight = Insight {
                    content: format!("Integrated across streams: {}", peer.content),
                    confidence: (peer.confidence + 0.05).min(0.9),
                    importance: peer.importance,
                    source: StreamType::Synthetic.as_str().to_string(),
                };
                ctx.publish_insight(insight.clone());
                insights.push(insight);
            }
            reasoning.push(format!("Integrated {} peer insight(s)", peers.len()));
            let mean_conf =
                peers.iter().map(|i| i.confidence).sum::<f64>() / peers.len() as f64;
            (
                format!(
                    "Integrating {} insight(s) across streams points to one coherent course of \
                     action for \"{}\".",
                    peers.len(),
                    first_terms(problem)
                ),
                (mean_conf * 0.9 + 0.05).min(0.9),
            )
        };
        ctx.publish_checkpoint(0.75);

        let conclusion =
            enrich_conclusion(&self.llm, StreamType::Synthetic, problem, conclusion_seed).await;
        ctx.publish_checkpoint(1.0);

        Ok(StreamOutput {
            conclusion,
            reasoning,
            insights,
            confidence,
        })
    }
}

fn first_terms(problem: &ReasoningProblem) -> String {
    let terms = key_terms(&problem.description, 3);
    if terms.is_empty() {
        problem.description.chars().take(40).collect()
    } else {
        terms.join(" ")
    }
}

fn join_terms(terms: &[String]) -> String {
    if terms.is_empty() {
        "the problem".to_string()
    } else {
        terms.join(", ")
    }
}
