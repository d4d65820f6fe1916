//! Report quality scoring.
//!
//! Weighted components: context 30% (content quality + diversity),
//! insights 40% (count, confidence, evidence density), relationships 20%,
//! reasoning 10% (quadrant presence).

use marketlens_common::{ContextItem, DeepReasoning, Insight, Relationship};

pub fn compute_quality(
    contexts: &[ContextItem],
    diversity: f32,
    insights: &[Insight],
    relationships: &[Relationship],
    reasoning: Option<&DeepReasoning>,
) -> f32 {
    let avg_content_quality = if contexts.is_empty() {
        0.0
    } else {
        contexts
            .iter()
            .map(|c| c.quality_score.unwrap_or(0.5))
            .sum::<f32>()
            / contexts.len() as f32
    };
    let context_score = avg_content_quality * 0.6 + diversity * 0.4;

    let insight_score = if insights.is_empty() {
        0.0
    } else {
        let count_norm = (insights.len() as f32 / 5.0).min(1.0);
        let mean_confidence =
            insights.iter().map(|i| i.confidence).sum::<f32>() / insights.len() as f32;
        let total_evidence: usize = insights.iter().map(|i| i.evidence.len()).sum();
        let evidence_density =
            (total_evidence as f32 / (2.0 * insights.len() as f32)).min(1.0);
        count_norm * 0.4 + mean_confidence * 0.3 + evidence_density * 0.3
    };

    let relationship_score = (relationships.len() as f32 / 3.0).min(1.0);

    let reasoning_score = reasoning
        .map(|r| {
            let mut present = 0.0f32;
            if !r.why.causes.is_empty() {
                present += 0.25;
            }
            if !r.how.mechanisms.is_empty() {
                present += 0.25;
            }
            if !r.what_if.scenarios.is_empty() {
                present += 0.25;
            }
            if !r.so_what.investor_implications.is_empty() {
                present += 0.25;
            }
            present
        })
        .unwrap_or(0.0);

    (context_score * 0.30
        + insight_score * 0.40
        + relationship_score * 0.20
        + reasoning_score * 0.10)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketlens_common::{ContextSource, ContextType, Scenario, SoWhatSection, WhySection};

    fn ctx(quality: f32) -> ContextItem {
        let mut item = ContextItem::new(
            ContextSource::Search,
            ContextType::News,
            serde_json::Map::new(),
        );
        item.quality_score = Some(quality);
        item
    }

    fn insight(confidence: f32, evidence: usize) -> Insight {
        Insight {
            title: "t".into(),
            finding: "f".into(),
            evidence: (0..evidence).map(|i| format!("e{i}")).collect(),
            confidence,
            ..Insight::default()
        }
    }

    #[test]
    fn empty_state_scores_zero() {
        assert_eq!(compute_quality(&[], 0.0, &[], &[], None), 0.0);
    }

    #[test]
    fn full_state_scores_high() {
        let contexts: Vec<ContextItem> = (0..10).map(|_| ctx(0.9)).collect();
        let insights: Vec<Insight> = (0..5).map(|_| insight(0.9, 2)).collect();
        let relationships: Vec<Relationship> =
            (0..3).map(|_| Relationship::default()).collect();
        let reasoning = DeepReasoning {
            why: WhySection {
                causes: vec!["원인".into()],
                analysis: String::new(),
            },
            so_what: SoWhatSection {
                investor_implications: "의미".into(),
                actionable: vec![],
            },
            what_if: marketlens_common::WhatIfSection {
                scenarios: vec![Scenario::default()],
            },
            ..DeepReasoning::default()
        };

        let score = compute_quality(&contexts, 0.8, &insights, &relationships, Some(&reasoning));
        assert!(score > 0.7);
        assert!(score <= 1.0);
    }

    #[test]
    fn monotonic_in_insight_confidence() {
        let contexts = vec![ctx(0.5)];
        let low = compute_quality(&contexts, 0.5, &[insight(0.2, 1)], &[], None);
        let high = compute_quality(&contexts, 0.5, &[insight(0.9, 1)], &[], None);
        assert!(high > low);
    }

    #[test]
    fn monotonic_in_relationship_count_up_to_cap() {
        let one = compute_quality(&[], 0.0, &[], &[Relationship::default()], None);
        let three =
            compute_quality(&[], 0.0, &[], &vec![Relationship::default(); 3], None);
        let five =
            compute_quality(&[], 0.0, &[], &vec![Relationship::default(); 5], None);
        assert!(three > one);
        assert_eq!(three, five);
    }

    #[test]
    fn reasoning_quadrants_add_quarter_each() {
        let none = compute_quality(&[], 0.0, &[], &[], Some(&DeepReasoning::default()));
        let why_only = DeepReasoning {
            why: WhySection {
                causes: vec!["c".into()],
                analysis: String::new(),
            },
            ..DeepReasoning::default()
        };
        let partial = compute_quality(&[], 0.0, &[], &[], Some(&why_only));
        assert!((partial - none - 0.025).abs() < 1e-5);
    }
}
