//! Synthesis
//!
//! Merges per-stream outputs into a single conclusion, deduplicated
//! insight list, and prioritized recommendations, with overall quality
//! scoring (coherence, completeness, consistency).

use std::collections::HashMap;

use super::conflict::claims_contradict;
use super::{
    Conflict, ConflictSeverity, QualityScores, ReasoningProblem, Recommendation, StreamResult,
    StreamStatus, SynthesizedInsight, SynthesizedResult,
};

/// Confidence penalty per unresolved conflict of severity High or above.
const HIGH_CONFLICT_PENALTY: f64 = 0.1;

/// Merges stream results. Stateless; all context comes in as arguments.
#[derive(Debug, Default)]
pub struct Synthesizer;

impl Synthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Merge stream results into one synthesized result.
    ///
    /// Streams that completed contribute content; cancelled or failed
    /// streams are retained for traceability only. If nothing completed,
    /// the sentinel result is returned and the facade drives its fallback.
    pub fn synthesize(
        &self,
        problem: &ReasoningProblem,
        stream_results: Vec<StreamResult>,
        conflicts: Vec<Conflict>,
    ) -> SynthesizedResult {
        let completed: Vec<&StreamResult> = stream_results
            .iter()
            .filter(|r| r.status == StreamStatus::Completed && !r.conclusion.is_empty())
            .collect();
        if completed.is_empty() {
            return SynthesizedResult::sentinel(stream_results);
        }

        let conclusion = self.merge_conclusions(&completed, &conflicts);
        let insights = self.merge_insights(&completed);
        let recommendations = self.derive_recommendations(&insights);
        let confidence = self.overall_confidence(&completed, &conflicts);
        let quality = self.quality(problem, &completed, &insights, &conflicts);

        SynthesizedResult {
            conclusion,
            insights,
            recommendations,
            confidence,
            quality,
            conflicts,
            stream_results,
        }
    }

    /// Confidence-weighted conclusion; contradictions are deferred to the
    /// conflict engine but flagged here.
    fn merge_conclusions(&self, completed: &[&StreamResult], conflicts: &[Conflict]) -> String {
        let top = completed
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .expect("non-empty completed set");

        let mut conclusion = if completed.len() == 1 {
            top.conclusion.clone()
        } else {
            format!(
                "Across {} reasoning streams (weighted by confidence): {}",
                completed.len(),
                top.conclusion
            )
        };
        if !conflicts.is_empty() {
            conclusion.push_str(&format!(
                " Note: {} conflict(s) between streams remain unresolved and temper this \
                 conclusion.",
                conflicts.len()
            ));
        }
        conclusion
    }

    /// Union of per-stream insights; duplicates by normalized content
    /// collapse, taking the max confidence and merging sources.
    fn merge_insights(&self, completed: &[&StreamResult]) -> Vec<SynthesizedInsight> {
        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, SynthesizedInsight> = HashMap::new();

        for result in completed {
            for insight in &result.insights {
                let key = normalize(&insight.content);
                let source = result.stream_type.as_str().to_string();
                match merged.get_mut(&key) {
                    Some(existing) => {
                        existing.confidence = existing.confidence.max(insight.confidence);
                        existing.importance = existing.importance.max(insight.importance);
                        if !existing.sources.contains(&source) {
                            existing.sources.push(source);
                        }
                    }
                    None => {
                        order.push(key.clone());
                        merged.insert(
                            key,
                            SynthesizedInsight {
                                content: insight.content.clone(),
                                confidence: insight.confidence,
                                importance: insight.importance,
                                sources: vec![source],
                            },
                        );
                    }
                }
            }
        }

        let mut insights: Vec<SynthesizedInsight> = order
            .into_iter()
            .filter_map(|key| merged.remove(&key))
            .collect();
        insights.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then(b.confidence.total_cmp(&a.confidence))
        });
        insights
    }

    /// One recommendation per insight; priority is `round(10 * importance)`
    /// clamped to [1,10], sorted by priority then confidence, descending.
    fn derive_recommendations(&self, insights: &[SynthesizedInsight]) -> Vec<Recommendation> {
        let mut recommendations: Vec<Recommendation> = insights
            .iter()
            .map(|insight| Recommendation {
                action: insight.content.clone(),
                priority: ((insight.importance * 10.0).round() as i64).clamp(1, 10) as u8,
                confidence: insight.confidence,
            })
            .collect();
        recommendations.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.confidence.total_cmp(&a.confidence))
        });
        recommendations
    }

    /// Confidence-weighted average, reduced for each unresolved conflict of
    /// severity High or above.
    fn overall_confidence(&self, completed: &[&StreamResult], conflicts: &[Conflict]) -> f64 {
        let weight_sum: f64 = completed.iter().map(|r| r.confidence).sum();
        let weighted = if weight_sum > 0.0 {
            completed.iter().map(|r| r.confidence * r.confidence).sum::<f64>() / weight_sum
        } else {
            0.0
        };

        let high_conflicts = conflicts
            .iter()
            .filter(|c| c.severity >= ConflictSeverity::High)
            .count() as f64;
        (weighted * (1.0 - HIGH_CONFLICT_PENALTY * high_conflicts)).clamp(0.0, 1.0)
    }

    fn quality(
        &self,
        problem: &ReasoningProblem,
        completed: &[&StreamResult],
        insights: &[SynthesizedInsight],
        conflicts: &[Conflict],
    ) -> QualityScores {
        // Coherence: inverse of the contradiction rate over stream pairs
        let pairs = completed.len() * completed.len().saturating_sub(1) / 2;
        let coherence = if pairs == 0 {
            1.0
        } else {
            (1.0 - conflicts.len() as f64 / pairs as f64).clamp(0.0, 1.0)
        };

        // Completeness: fraction of goals addressed by at least one insight
        // or conclusion
        let completeness = if problem.goals.is_empty() {
            1.0
        } else {
            let addressed = problem
                .goals
                .iter()
                .filter(|goal| {
                    let goal_terms: Vec<String> = goal
                        .to_lowercase()
                        .split_whitespace()
                        .filter(|t| t.len() > 3)
                        .map(str::to_string)
                        .collect();
                    goal_terms.iter().any(|term| {
                        insights
                            .iter()
                            .any(|i| i.content.to_lowercase().contains(term))
                            || completed
                                .iter()
                                .any(|r| r.conclusion.to_lowercase().contains(term))
                    })
                })
                .count();
            addressed as f64 / problem.goals.len() as f64
        };

        // Consistency: fraction of insight pairs without a factual
        // contradiction
        let insight_pairs = insights.len() * insights.len().saturating_sub(1) / 2;
        let consistency = if insight_pairs == 0 {
            1.0
        } else {
            let contradictory = insights
                .iter()
                .enumerate()
                .flat_map(|(i, a)| insights[i + 1..].iter().map(move |b| (a, b)))
                .filter(|(a, b)| claims_contradict(&a.content, &b.content))
                .count();
            (1.0 - contradictory as f64 / insight_pairs as f64).clamp(0.0, 1.0)
        };

        QualityScores {
            overall: (coherence + completeness + consistency) / 3.0,
            coherence,
            completeness,
            consistency,
        }
    }
}

fn normalize(content: &str) -> String {
    content.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}
