use serde::{Deserialize, Serialize};

use crate::adaptive::config::BanditConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentStats {
    pub accuracy: f64,
    pub answered: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyContext {
    /// Edges from the root; roots have depth 0.
    pub depth: usize,
    pub answered: u32,
    pub accuracy: f64,
    pub parent: Option<ParentStats>,
    /// Whether the user has other unlocked topics to move on to.
    pub has_alternatives: bool,
}

/// Accuracy discounted by how far the sample is from the target size.
pub fn parent_mastery(parent: &ParentStats, sample_target: u32) -> f64 {
    let coverage = if sample_target == 0 {
        1.0
    } else {
        (parent.answered as f64 / sample_target as f64).min(1.0)
    };
    parent.accuracy.clamp(0.0, 1.0) * coverage
}

/// Parent mastery needed before a topic at `depth` earns a bonus.
pub fn required_parent_mastery(depth: usize) -> f64 {
    let extra = depth.saturating_sub(1) as f64 * 0.1;
    (0.5 + extra).min(0.9)
}

pub fn hierarchical_bonus(config: &BanditConfig, ctx: &HierarchyContext) -> f64 {
    if ctx.depth == 0 {
        if ctx.answered < config.root_min_samples {
            return 0.1;
        }
        if ctx.has_alternatives && ctx.accuracy >= 0.6 {
            return -0.2;
        }
        return 0.0;
    }

    let Some(parent) = ctx.parent else {
        return 0.0;
    };
    if parent_mastery(&parent, config.parent_sample_target) < required_parent_mastery(ctx.depth) {
        return 0.0;
    }

    if ctx.answered <= 3 {
        0.3
    } else if ctx.accuracy < 0.6 {
        -0.1
    } else {
        0.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(depth: usize, answered: u32, accuracy: f64, parent: Option<ParentStats>) -> HierarchyContext {
        HierarchyContext {
            depth,
            answered,
            accuracy,
            parent,
            has_alternatives: true,
        }
    }

    #[test]
    fn test_root_bonus_until_minimum_sample() {
        let config = BanditConfig::default();
        assert_eq!(hierarchical_bonus(&config, &ctx(0, 2, 0.0, None)), 0.1);
        assert_eq!(hierarchical_bonus(&config, &ctx(0, 6, 0.8, None)), -0.2);
        assert_eq!(hierarchical_bonus(&config, &ctx(0, 6, 0.4, None)), 0.0);

        let alone = HierarchyContext { has_alternatives: false, ..ctx(0, 6, 0.8, None) };
        assert_eq!(hierarchical_bonus(&config, &alone), 0.0);
    }

    #[test]
    fn test_mid_tree_requires_parent_mastery() {
        let config = BanditConfig::default();
        let weak_parent = ParentStats { accuracy: 0.9, answered: 3 };
        assert_eq!(hierarchical_bonus(&config, &ctx(1, 0, 0.0, Some(weak_parent))), 0.0);

        let strong_parent = ParentStats { accuracy: 0.8, answered: 10 };
        assert_eq!(hierarchical_bonus(&config, &ctx(1, 0, 0.0, Some(strong_parent))), 0.3);
        assert_eq!(hierarchical_bonus(&config, &ctx(1, 10, 0.5, Some(strong_parent))), -0.1);
        assert_eq!(hierarchical_bonus(&config, &ctx(1, 10, 0.7, Some(strong_parent))), 0.2);
    }

    #[test]
    fn test_deeper_topics_need_stricter_parent_mastery() {
        let config = BanditConfig::default();
        let parent = ParentStats { accuracy: 0.65, answered: 20 };
        assert_eq!(hierarchical_bonus(&config, &ctx(1, 0, 0.0, Some(parent))), 0.3);
        assert_eq!(hierarchical_bonus(&config, &ctx(2, 0, 0.0, Some(parent))), 0.3);
        assert_eq!(hierarchical_bonus(&config, &ctx(3, 0, 0.0, Some(parent))), 0.0);
        assert!(required_parent_mastery(10) <= 0.9);
    }
}
