//! Interest tracking: engagement signals, propagation across the topic
//! tree, cross-topic inference, decay and insight queries.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adaptive::config::InterestConfig;
use crate::adaptive::tree::TopicTree;
use crate::adaptive::types::{
    EngagementAction, InterestRecord, Interaction, PreferenceType, Topic, TopicId,
};
use crate::adaptive::EngineError;
use crate::db::{Store, StoreError};

/// Performance context accompanying an engagement action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceContext {
    pub is_correct: Option<bool>,
    /// Sustained accuracy on the topic so far.
    pub accuracy: Option<f64>,
    pub difficulty: Option<i32>,
    pub time_spent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationStep {
    pub topic_id: TopicId,
    pub signal: f64,
    pub hop: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreChange {
    pub topic_id: TopicId,
    pub signal: f64,
    pub score_after: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergingInterest {
    pub topic_id: TopicId,
    pub topic_name: String,
    pub interest_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestUpdate {
    pub topic_id: TopicId,
    pub base_signal: f64,
    pub score_before: f64,
    pub score_after: f64,
    pub propagated: Vec<ScoreChange>,
    pub inferred: Vec<ScoreChange>,
    pub emerging: Vec<EmergingInterest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStyle {
    Explorer,
    DeepLearner,
    EfficiencyFocused,
    QuickLearner,
    Balanced,
}

impl LearningStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explorer => "explorer",
            Self::DeepLearner => "deep_learner",
            Self::EfficiencyFocused => "efficiency_focused",
            Self::QuickLearner => "quick_learner",
            Self::Balanced => "balanced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPatterns {
    pub curiosity_level: f64,
    pub focus_level: f64,
    pub engagement_time: f64,
    pub accuracy_trend: f64,
    pub difficulty_preference: f64,
    pub learning_style: LearningStyle,
    pub sample_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestEntry {
    pub topic_id: TopicId,
    pub topic_name: String,
    pub interest_score: f64,
    pub preference_type: PreferenceType,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestInsights {
    pub high_interest: Vec<InterestEntry>,
    pub growing_interest: Vec<InterestEntry>,
    pub declining_interest: Vec<InterestEntry>,
    pub learning_patterns: Option<LearningPatterns>,
    pub total_topics_explored: usize,
    pub interest_diversity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct InterestTracker {
    config: InterestConfig,
}

impl InterestTracker {
    pub fn new(config: InterestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InterestConfig {
        &self.config
    }

    /// Bounded signal in [-1, 1] for one engagement action.
    pub fn base_signal(&self, action: EngagementAction, ctx: &PerformanceContext) -> f64 {
        let mut signal: f64 = match action {
            EngagementAction::Answer => match ctx.is_correct {
                Some(true) => 0.3,
                Some(false) => 0.1,
                None => 0.05,
            },
            EngagementAction::TeachMe => 0.15,
            EngagementAction::Skip => -0.4,
            EngagementAction::RepeatTopic => 0.1,
            EngagementAction::DifficultyIncrease => 0.2,
            EngagementAction::DifficultyDecrease => -0.1,
        };

        let correct = ctx.is_correct == Some(true);
        if correct {
            signal += 0.1;
        }

        let accuracy = ctx.accuracy.filter(|a| a.is_finite()).unwrap_or(0.5);
        if accuracy > 0.8 {
            signal += 0.1;
        } else if accuracy > 0.6 {
            signal += 0.05;
        }

        if correct && ctx.difficulty.unwrap_or(5) > 7 {
            signal += 0.1;
        }

        signal.clamp(-1.0, 1.0)
    }

    /// Applies a signal the user produced on this topic directly.
    pub fn apply_direct(&self, record: &mut InterestRecord, signal: f64, time_spent: f64) {
        self.shift_score(record, signal);
        record.interaction_count += 1;
        if time_spent.is_finite() && time_spent > 0.0 {
            record.time_spent += time_spent;
        }
        let observed = if signal.abs() > self.config.explicit_threshold {
            PreferenceType::Explicit
        } else {
            PreferenceType::Implicit
        };
        record.preference_type = record.preference_type.upgrade(observed);
    }

    /// Applies a propagated or inferred signal. Never changes the preference
    /// type or the interaction count.
    pub fn apply_inferred(&self, record: &mut InterestRecord, signal: f64) {
        self.shift_score(record, signal);
    }

    fn shift_score(&self, record: &mut InterestRecord, signal: f64) {
        let delta = signal * self.config.learning_rate;
        let delta = if delta.is_finite() { delta } else { 0.0 };
        let current = if record.interest_score.is_finite() {
            record.interest_score
        } else {
            self.config.initial_score
        };
        record.interest_score = (current + delta).clamp(0.0, 1.0);
        record.updated_at = Utc::now();
    }

    /// Structural neighbours (parent, siblings, children) followed by
    /// semantic neighbours not already related structurally.
    pub fn related_topics(
        &self,
        tree: &TopicTree,
        topic_id: TopicId,
        include_semantic: bool,
    ) -> Vec<(TopicId, f64)> {
        let cfg = &self.config;
        let mut related: Vec<(TopicId, f64)> = Vec::new();
        let mut seen: HashSet<TopicId> = HashSet::from([topic_id]);

        if let Some(parent) = tree.parent(topic_id) {
            if seen.insert(parent.id) {
                related.push((parent.id, cfg.parent_weight));
            }
        }
        for sibling in tree.siblings(topic_id) {
            if seen.insert(sibling.id) {
                related.push((sibling.id, cfg.sibling_weight));
            }
        }
        for child in tree.children(topic_id) {
            if seen.insert(child.id) {
                related.push((child.id, cfg.child_weight));
            }
        }

        if include_semantic {
            for (id, similarity) in self.semantic_neighbours(tree, topic_id) {
                if seen.insert(id) {
                    related.push((id, similarity * cfg.semantic_weight));
                }
            }
        }

        related
    }

    /// Topics whose keyword sets overlap with this one above the threshold,
    /// sorted by id.
    pub fn semantic_neighbours(&self, tree: &TopicTree, topic_id: TopicId) -> Vec<(TopicId, f64)> {
        let Some(source) = tree.get(topic_id) else {
            return Vec::new();
        };
        let source_keywords = extract_keywords(&source.name, &source.description);
        if source_keywords.is_empty() {
            return Vec::new();
        }

        let mut out: Vec<(TopicId, f64)> = tree
            .topics()
            .filter(|t| t.id != topic_id)
            .filter_map(|t| {
                let similarity =
                    keyword_similarity(&source_keywords, &extract_keywords(&t.name, &t.description));
                (similarity > self.config.semantic_similarity_threshold).then_some((t.id, similarity))
            })
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Breadth-first propagation plan. The first hop scales by the
    /// propagation factor and may follow semantic edges; every later hop
    /// halves and follows tree edges only. Each topic receives at most one
    /// signal and propagation stops below the minimum magnitude.
    pub fn plan_propagation(
        &self,
        tree: &TopicTree,
        origin: TopicId,
        base_signal: f64,
    ) -> Vec<PropagationStep> {
        let cfg = &self.config;
        if base_signal.abs() < cfg.min_base_signal || tree.get(origin).is_none() {
            return Vec::new();
        }

        let mut visited: HashSet<TopicId> = HashSet::from([origin]);
        let mut steps = Vec::new();
        let mut frontier = vec![(origin, base_signal)];
        let mut hop = 1;

        while !frontier.is_empty() {
            let factor = if hop == 1 { cfg.propagation_factor } else { cfg.hop_decay };
            let mut next = Vec::new();
            for (source, signal) in frontier {
                for (target, weight) in self.related_topics(tree, source, hop == 1) {
                    if visited.contains(&target) {
                        continue;
                    }
                    let propagated = signal * factor * weight;
                    if propagated.abs() <= cfg.min_propagated_signal {
                        continue;
                    }
                    visited.insert(target);
                    steps.push(PropagationStep {
                        topic_id: target,
                        signal: propagated,
                        hop,
                    });
                    next.push((target, propagated));
                }
            }
            frontier = next;
            hop += 1;
        }

        steps
    }

    /// Processes one engagement action for (user, topic) end to end.
    pub async fn track(
        &self,
        store: &dyn Store,
        tree: &TopicTree,
        user_id: &str,
        topic_id: TopicId,
        action: EngagementAction,
        ctx: &PerformanceContext,
    ) -> Result<InterestUpdate, EngineError> {
        let topic = tree.get(topic_id).ok_or(EngineError::UnknownTopic(topic_id))?;
        tree.depth(topic_id)?;

        let base_signal = self.base_signal(action, ctx);

        let mut direct = self.load(store, user_id, topic_id).await?;
        let score_before = direct.interest_score;
        self.apply_direct(&mut direct, base_signal, ctx.time_spent);
        store.save_interest(&direct).await?;

        let mut propagated = Vec::new();
        for step in self.plan_propagation(tree, topic_id, base_signal) {
            let change = self.nudge(store, user_id, step.topic_id, step.signal).await?;
            propagated.push(change);
        }

        let inferred = self
            .infer_cross_topic(store, tree, user_id, topic, action, ctx)
            .await?;
        let emerging = self.emerging_interests(store, tree, user_id).await?;

        tracing::debug!(
            user_id,
            topic_id,
            action = action.as_str(),
            base_signal,
            score = direct.interest_score,
            propagated = propagated.len(),
            inferred = inferred.len(),
            "interest updated"
        );

        Ok(InterestUpdate {
            topic_id,
            base_signal,
            score_before,
            score_after: direct.interest_score,
            propagated,
            inferred,
            emerging,
        })
    }

    async fn infer_cross_topic(
        &self,
        store: &dyn Store,
        tree: &TopicTree,
        user_id: &str,
        topic: &Topic,
        action: EngagementAction,
        ctx: &PerformanceContext,
    ) -> Result<Vec<ScoreChange>, StoreError> {
        let mut boosts: Vec<(TopicId, f64)> = Vec::new();

        let sustained = ctx.accuracy.unwrap_or(0.0) > self.config.sustained_accuracy;
        if action == EngagementAction::Answer && ctx.is_correct == Some(true) && sustained {
            let advanced = tree
                .siblings(topic.id)
                .into_iter()
                .chain(tree.children(topic.id))
                .filter(|t| t.difficulty_min > topic.difficulty_max);
            boosts.extend(advanced.map(|t| (t.id, self.config.advanced_topic_boost)));
        }

        if action == EngagementAction::TeachMe {
            boosts.extend(
                self.semantic_neighbours(tree, topic.id)
                    .into_iter()
                    .map(|(id, similarity)| (id, self.config.adjacent_topic_boost * similarity)),
            );
        }

        let mut changes = Vec::with_capacity(boosts.len());
        for (target, signal) in boosts {
            changes.push(self.nudge(store, user_id, target, signal).await?);
        }
        Ok(changes)
    }

    async fn nudge(
        &self,
        store: &dyn Store,
        user_id: &str,
        topic_id: TopicId,
        signal: f64,
    ) -> Result<ScoreChange, StoreError> {
        let mut record = self.load(store, user_id, topic_id).await?;
        self.apply_inferred(&mut record, signal);
        store.save_interest(&record).await?;
        Ok(ScoreChange {
            topic_id,
            signal,
            score_after: record.interest_score,
        })
    }

    async fn load(
        &self,
        store: &dyn Store,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<InterestRecord, StoreError> {
        Ok(store
            .get_interest(user_id, topic_id)
            .await?
            .unwrap_or_else(|| InterestRecord::new(user_id, topic_id, self.config.initial_score)))
    }

    /// High interest with little practice so far.
    pub async fn emerging_interests(
        &self,
        store: &dyn Store,
        tree: &TopicTree,
        user_id: &str,
    ) -> Result<Vec<EmergingInterest>, StoreError> {
        let answered: HashMap<TopicId, u32> = store
            .list_mastery(user_id)
            .await?
            .into_iter()
            .map(|m| (m.topic_id, m.questions_answered))
            .collect();

        let mut out: Vec<EmergingInterest> = store
            .list_interests(user_id)
            .await?
            .into_iter()
            .filter(|i| i.interest_score > self.config.discovery_threshold)
            .filter(|i| {
                answered.get(&i.topic_id).copied().unwrap_or(0) < self.config.emerging_max_answers
            })
            .filter_map(|i| {
                tree.get(i.topic_id).map(|t| EmergingInterest {
                    topic_id: t.id,
                    topic_name: t.name.clone(),
                    interest_score: i.interest_score,
                })
            })
            .collect();
        out.sort_by_key(|e| e.topic_id);
        Ok(out)
    }

    pub async fn insights(
        &self,
        store: &dyn Store,
        tree: &TopicTree,
        user_id: &str,
    ) -> Result<InterestInsights, StoreError> {
        let mut interests = store.list_interests(user_id).await?;
        interests.sort_by(|a, b| {
            b.interest_score
                .total_cmp(&a.interest_score)
                .then(a.topic_id.cmp(&b.topic_id))
        });

        let scores: Vec<f64> = interests.iter().map(|i| i.interest_score).collect();
        let mut high = Vec::new();
        let mut growing = Vec::new();
        let mut declining = Vec::new();

        for interest in &interests {
            let entry = InterestEntry {
                topic_id: interest.topic_id,
                topic_name: tree
                    .get(interest.topic_id)
                    .map(|t| t.name.clone())
                    .unwrap_or_default(),
                interest_score: interest.interest_score,
                preference_type: interest.preference_type,
                updated_at: interest.updated_at,
            };
            if interest.interest_score > 0.7 {
                high.push(entry);
            } else if interest.interest_score > 0.5 {
                growing.push(entry);
            } else {
                declining.push(entry);
            }
        }
        high.truncate(5);
        growing.truncate(5);
        // lowest scores first
        declining.reverse();
        declining.truncate(3);

        let recent = store
            .recent_interactions(user_id, self.config.pattern_window)
            .await?;

        Ok(InterestInsights {
            high_interest: high,
            growing_interest: growing,
            declining_interest: declining,
            learning_patterns: learning_patterns(&recent),
            total_topics_explored: interests.len(),
            interest_diversity: interest_diversity(&scores),
        })
    }

    pub async fn decay(&self, store: &dyn Store, user_id: Option<&str>) -> Result<u64, StoreError> {
        let affected = store.scale_interests(user_id, self.config.decay_rate).await?;
        tracing::info!(
            user_id = user_id.unwrap_or("*"),
            affected,
            decay_rate = self.config.decay_rate,
            "interest decay applied"
        );
        Ok(affected)
    }
}

/// Lowercased alphabetic words longer than four characters.
pub fn extract_keywords(name: &str, description: &str) -> HashSet<String> {
    format!("{name} {description}")
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphabetic()))
        .filter(|w| w.chars().count() > 4 && w.chars().all(char::is_alphabetic))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two keyword sets.
pub fn keyword_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

pub fn learning_style(teach_me_ratio: f64, skip_ratio: f64, avg_time: f64) -> LearningStyle {
    if teach_me_ratio > 0.3 {
        LearningStyle::Explorer
    } else if skip_ratio < 0.1 && avg_time > 20.0 {
        LearningStyle::DeepLearner
    } else if skip_ratio > 0.3 {
        LearningStyle::EfficiencyFocused
    } else if avg_time < 10.0 {
        LearningStyle::QuickLearner
    } else {
        LearningStyle::Balanced
    }
}

pub fn learning_patterns(recent: &[Interaction]) -> Option<LearningPatterns> {
    if recent.is_empty() {
        return None;
    }
    let n = recent.len() as f64;
    let count = |action| recent.iter().filter(|i| i.action == action).count() as f64;
    let teach_me_ratio = count(EngagementAction::TeachMe) / n;
    let skip_ratio = count(EngagementAction::Skip) / n;
    let avg_time = recent.iter().map(|i| i.time_spent.max(0.0)).sum::<f64>() / n;

    let answers: Vec<&Interaction> = recent.iter().filter(|i| i.is_correct.is_some()).collect();
    let accuracy = if answers.is_empty() {
        0.0
    } else {
        answers.iter().filter(|i| i.is_correct == Some(true)).count() as f64 / answers.len() as f64
    };

    let difficulties: Vec<f64> = recent.iter().filter_map(|i| i.difficulty).map(f64::from).collect();
    let difficulty_preference = if difficulties.is_empty() {
        5.0
    } else {
        difficulties.iter().sum::<f64>() / difficulties.len() as f64
    };

    Some(LearningPatterns {
        curiosity_level: teach_me_ratio,
        focus_level: 1.0 - skip_ratio,
        engagement_time: avg_time,
        accuracy_trend: accuracy,
        difficulty_preference,
        learning_style: learning_style(teach_me_ratio, skip_ratio, avg_time),
        sample_size: recent.len(),
    })
}

/// Normalized Shannon entropy of the interest distribution.
pub fn interest_diversity(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let total: f64 = scores.iter().filter(|s| **s > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let entropy: f64 = scores
        .iter()
        .filter(|s| **s > 0.0)
        .map(|s| {
            let p = s / total;
            -p * p.log2()
        })
        .sum();
    let max_entropy = (scores.len() as f64).log2();
    if max_entropy > 0.0 {
        entropy / max_entropy
    } else {
        0.0
    }
}
