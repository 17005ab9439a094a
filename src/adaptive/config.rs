use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adaptive::types::MasteryLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryConfig {
    /// Correct answers required at novice, competent, proficient and expert.
    /// Master is terminal and has no entry.
    pub required_correct: [u32; 4],
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            required_correct: [8, 12, 15, 20],
        }
    }
}

impl MasteryConfig {
    pub fn required_for(&self, level: MasteryLevel) -> Option<u32> {
        self.required_correct.get(level.index()).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestConfig {
    pub initial_score: f64,
    pub learning_rate: f64,
    pub explicit_threshold: f64,
    pub propagation_factor: f64,
    pub hop_decay: f64,
    pub parent_weight: f64,
    pub sibling_weight: f64,
    pub child_weight: f64,
    pub semantic_weight: f64,
    pub semantic_similarity_threshold: f64,
    pub min_base_signal: f64,
    pub min_propagated_signal: f64,
    pub decay_rate: f64,
    pub discovery_threshold: f64,
    pub emerging_max_answers: u32,
    pub advanced_topic_boost: f64,
    pub adjacent_topic_boost: f64,
    pub sustained_accuracy: f64,
    pub pattern_window: usize,
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            initial_score: 0.5,
            learning_rate: 0.2,
            explicit_threshold: 0.2,
            propagation_factor: 0.3,
            hop_decay: 0.5,
            parent_weight: 0.3,
            sibling_weight: 0.4,
            child_weight: 0.6,
            semantic_weight: 0.2,
            semantic_similarity_threshold: 0.3,
            min_base_signal: 0.05,
            min_propagated_signal: 0.01,
            decay_rate: 0.95,
            discovery_threshold: 0.7,
            emerging_max_answers: 3,
            advanced_topic_boost: 0.08,
            adjacent_topic_boost: 0.06,
            sustained_accuracy: 0.8,
            pattern_window: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    pub exploration_rate: f64,
    pub confidence_multiplier: f64,
    pub interest_weight: f64,
    pub proficiency_weight: f64,
    pub discovery_weight: f64,
    pub hierarchy_weight: f64,
    pub recency_weight: f64,
    pub exploration_decay: f64,
    pub recency_bonus: f64,
    pub root_min_samples: u32,
    pub parent_sample_target: u32,
    pub max_fallback_attempts: usize,
    pub difficulty_window: i32,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            exploration_rate: 0.2,
            confidence_multiplier: 2.0,
            interest_weight: 0.4,
            proficiency_weight: 0.3,
            discovery_weight: 0.3,
            hierarchy_weight: 0.3,
            recency_weight: 0.4,
            exploration_decay: 0.1,
            recency_bonus: 0.5,
            root_min_samples: 5,
            parent_sample_target: 10,
            max_fallback_attempts: 5,
            difficulty_window: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeceConfig {
    pub overlap_ratio: f64,
    pub abstraction_deviation: f64,
    pub min_siblings: usize,
    pub max_siblings: usize,
    pub generic_max_words: usize,
    pub specific_min_words: usize,
}

impl Default for MeceConfig {
    fn default() -> Self {
        Self {
            overlap_ratio: 0.6,
            abstraction_deviation: 0.7,
            min_siblings: 2,
            max_siblings: 8,
            generic_max_words: 2,
            specific_min_words: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    pub beginner_threshold: f64,
    pub intermediate_threshold: f64,
    pub advanced_threshold: f64,
    pub expert_threshold: f64,
    pub min_questions: u32,
    pub progressive_accuracy: f64,
    pub max_children: usize,
    pub max_depth: usize,
    pub subtopic_count: usize,
    pub generator_timeout_ms: u64,
    pub background: bool,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            beginner_threshold: 0.6,
            intermediate_threshold: 0.7,
            advanced_threshold: 0.8,
            expert_threshold: 0.9,
            min_questions: 5,
            progressive_accuracy: 0.7,
            max_children: 12,
            max_depth: 6,
            subtopic_count: 5,
            generator_timeout_ms: 10_000,
            background: true,
        }
    }
}

impl ExpansionConfig {
    pub fn generator_timeout(&self) -> Duration {
        Duration::from_millis(self.generator_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub ttl_secs: u64,
    pub min_pool_size: usize,
    pub max_background_tasks: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            min_pool_size: 3,
            max_background_tasks: 16,
        }
    }
}

impl PoolConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub mastery: MasteryConfig,
    pub interest: InterestConfig,
    pub bandit: BanditConfig,
    pub mece: MeceConfig,
    pub expansion: ExpansionConfig,
    pub pool: PoolConfig,
}

impl AdaptiveConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_f64("ADAPTIVE_EXPLORATION_RATE") {
            config.bandit.exploration_rate = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_f64("ADAPTIVE_UCB_CONFIDENCE") {
            config.bandit.confidence_multiplier = val.max(0.0);
        }
        if let Some(val) = env_f64("ADAPTIVE_INTEREST_LEARNING_RATE") {
            config.interest.learning_rate = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_f64("ADAPTIVE_INTEREST_DECAY_RATE") {
            config.interest.decay_rate = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_f64("ADAPTIVE_DISCOVERY_THRESHOLD") {
            config.interest.discovery_threshold = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_f64("ADAPTIVE_MECE_OVERLAP_RATIO") {
            config.mece.overlap_ratio = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_f64("ADAPTIVE_MECE_ABSTRACTION_DEVIATION") {
            config.mece.abstraction_deviation = val.max(0.0);
        }
        if let Some(val) = env_u64("ADAPTIVE_MECE_MAX_SIBLINGS") {
            config.mece.max_siblings = val as usize;
        }
        if let Some(val) = env_f64("ADAPTIVE_EXPANSION_THRESHOLD") {
            config.expansion.beginner_threshold = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_u64("ADAPTIVE_EXPANSION_MIN_QUESTIONS") {
            config.expansion.min_questions = val as u32;
        }
        if let Some(val) = env_u64("ADAPTIVE_MAX_DEPTH") {
            config.expansion.max_depth = val as usize;
        }
        if let Some(val) = env_u64("ADAPTIVE_MAX_CHILDREN") {
            config.expansion.max_children = val as usize;
        }
        if let Some(val) = env_u64("ADAPTIVE_GENERATOR_TIMEOUT_MS") {
            config.expansion.generator_timeout_ms = val;
        }
        if let Ok(val) = std::env::var("ADAPTIVE_BACKGROUND_EXPANSION") {
            config.expansion.background = val == "true" || val == "1";
        }
        if let Some(val) = env_u64("ADAPTIVE_POOL_TTL_SECS") {
            config.pool.ttl_secs = val;
        }
        if let Some(val) = env_u64("ADAPTIVE_MAX_BACKGROUND_TASKS") {
            config.pool.max_background_tasks = (val as usize).max(1);
        }

        config
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}
