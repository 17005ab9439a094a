use serde::{Deserialize, Serialize};

use crate::adaptive::config::BanditConfig;
use crate::adaptive::types::TopicId;

/// Inputs for scoring one topic arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmStats {
    pub topic_id: TopicId,
    pub interest: f64,
    pub skill: f64,
    pub selections: u32,
    pub hierarchical_bonus: f64,
    pub is_recent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmScore {
    pub topic_id: TopicId,
    pub interest: f64,
    pub skill: f64,
    pub selections: u32,
    pub exploration_bonus: f64,
    pub hierarchical_bonus: f64,
    pub recency_bonus: f64,
    pub base_reward: f64,
    pub confidence: f64,
    pub score: f64,
}

pub fn exploration_bonus(selections: u32, decay: f64) -> f64 {
    1.0 / (1.0 + selections as f64 * decay)
}

/// `c * sqrt(ln(1 + total) / (1 + n))`. Strictly decreasing in `n` for any
/// positive total, including the unsampled case.
pub fn confidence_bonus(multiplier: f64, total_selections: u64, selections: u32) -> f64 {
    let numerator = (1.0 + total_selections as f64).ln();
    let denominator = 1.0 + selections as f64;
    multiplier * (numerator / denominator).sqrt()
}

/// Scores every arm and returns them best first. Equal scores keep
/// ascending topic id order.
pub fn score_arms(config: &BanditConfig, arms: &[ArmStats]) -> Vec<ArmScore> {
    let total: u64 = arms.iter().map(|a| a.selections as u64).sum();

    let mut scored: Vec<ArmScore> = arms
        .iter()
        .map(|arm| {
            let exploration = exploration_bonus(arm.selections, config.exploration_decay);
            let recency = if arm.is_recent { config.recency_bonus } else { 0.0 };
            let base_reward = config.interest_weight * arm.interest
                + config.proficiency_weight * arm.skill
                + config.discovery_weight * exploration
                + config.hierarchy_weight * arm.hierarchical_bonus
                + config.recency_weight * recency;
            let confidence =
                confidence_bonus(config.confidence_multiplier, total, arm.selections);
            ArmScore {
                topic_id: arm.topic_id,
                interest: arm.interest,
                skill: arm.skill,
                selections: arm.selections,
                exploration_bonus: exploration,
                hierarchical_bonus: arm.hierarchical_bonus,
                recency_bonus: recency,
                base_reward,
                confidence,
                score: base_reward + confidence,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.topic_id.cmp(&b.topic_id))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm(topic_id: TopicId, selections: u32) -> ArmStats {
        ArmStats {
            topic_id,
            interest: 0.5,
            skill: 0.2,
            selections,
            hierarchical_bonus: 0.0,
            is_recent: false,
        }
    }

    #[test]
    fn test_less_sampled_has_higher_confidence() {
        for total in [1_u64, 2, 10, 1_000] {
            for n in 0..20_u32 {
                assert!(confidence_bonus(2.0, total, n) > confidence_bonus(2.0, total, n + 1));
            }
        }
    }

    #[test]
    fn test_exploration_bonus_shape() {
        assert_eq!(exploration_bonus(0, 0.1), 1.0);
        assert!((exploration_bonus(10, 0.1) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_identical_arms_prefer_less_sampled() {
        let scored = score_arms(&BanditConfig::default(), &[arm(1, 9), arm(2, 1)]);
        assert_eq!(scored[0].topic_id, 2);
        assert!(scored[0].confidence > scored[1].confidence);
    }

    #[test]
    fn test_ties_break_by_topic_id() {
        let scored = score_arms(&BanditConfig::default(), &[arm(7, 3), arm(3, 3), arm(5, 3)]);
        let ids: Vec<TopicId> = scored.iter().map(|s| s.topic_id).collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn test_recency_adds_weighted_bonus() {
        let config = BanditConfig::default();
        let recent = ArmStats { is_recent: true, ..arm(1, 4) };
        let scored = score_arms(&config, &[recent, arm(2, 4)]);
        assert_eq!(scored[0].topic_id, 1);
        let gap = scored[0].score - scored[1].score;
        assert!((gap - config.recency_weight * config.recency_bonus).abs() < 1e-9);
    }

    #[test]
    fn test_score_components_sum() {
        let config = BanditConfig::default();
        let scored = score_arms(&config, &[arm(1, 0)]);
        let s = scored[0];
        let expected = 0.4 * 0.5 + 0.3 * 0.2 + 0.3 * 1.0;
        assert!((s.base_reward - expected).abs() < 1e-9);
        assert_eq!(s.confidence, 0.0);
    }
}
