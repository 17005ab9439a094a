//! Topic and question selection over the unlocked frontier.
//!
//! Topics are scored with the UCB blend from [`crate::adaptive::decision`].
//! With probability ε an exploratory topic is sampled by exploration bonus,
//! otherwise the best score wins. Content for the chosen topic comes from
//! the session pool, then stored unused questions, then the generator.
//! When all of that fails across the next-best candidates the template
//! held from the first failed generation is persisted and served, so
//! selection only comes back empty when nothing is unlocked.

use std::collections::HashMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adaptive::config::BanditConfig;
use crate::adaptive::decision::{
    hierarchical_bonus, score_arms, ArmScore, ArmStats, HierarchyContext, ParentStats,
};
use crate::adaptive::mastery::MasteryMachine;
use crate::adaptive::tree::TopicTree;
use crate::adaptive::types::{MasteryRecord, Question, QuestionDraft, Topic, TopicId};
use crate::adaptive::EngineError;
use crate::db::Store;
use crate::services::content_generator::{
    question_with_fallback, template_question, ContentGenerator, QuestionRequest,
};
use crate::services::question_pool::QuestionPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    Exploration,
    Exploitation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSource {
    Pool,
    Prefetch,
    Stored,
    Generated,
    Template,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub question: Question,
    pub topic: Topic,
    pub strategy: SelectionStrategy,
    pub source: QuestionSource,
    pub score: ArmScore,
    pub target_difficulty: i32,
    /// Candidate topics tried before content was found.
    pub attempts: usize,
    pub fallback_used: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BanditSelector {
    config: BanditConfig,
    mastery: MasteryMachine,
    initial_interest: f64,
    generator_timeout: Duration,
}

impl BanditSelector {
    pub fn new(
        config: BanditConfig,
        mastery: MasteryMachine,
        initial_interest: f64,
        generator_timeout: Duration,
    ) -> Self {
        Self {
            config,
            mastery,
            initial_interest,
            generator_timeout,
        }
    }

    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    /// Returns the index into `scored` and the strategy used.
    pub fn choose(&self, scored: &[ArmScore], rng: &mut impl Rng) -> Option<(usize, SelectionStrategy)> {
        if scored.is_empty() {
            return None;
        }
        if scored.len() > 1 && rng.random::<f64>() < self.config.exploration_rate {
            let total: f64 = scored.iter().map(|s| s.exploration_bonus).sum();
            if total > 0.0 {
                let mut roll = rng.random::<f64>() * total;
                for (idx, arm) in scored.iter().enumerate() {
                    if roll < arm.exploration_bonus {
                        return Some((idx, SelectionStrategy::Exploration));
                    }
                    roll -= arm.exploration_bonus;
                }
                return Some((scored.len() - 1, SelectionStrategy::Exploration));
            }
        }
        Some((0, SelectionStrategy::Exploitation))
    }

    /// The chosen arm first, then the rest in score order, capped by the
    /// fallback budget.
    pub fn candidate_order(&self, scored_len: usize, chosen: usize) -> Vec<usize> {
        std::iter::once(chosen)
            .chain((0..scored_len).filter(|&i| i != chosen))
            .take(1 + self.config.max_fallback_attempts)
            .collect()
    }

    /// Builds scoring inputs for every unlocked topic.
    pub fn build_arms(
        &self,
        tree: &TopicTree,
        unlocked: &[Topic],
        mastery: &HashMap<TopicId, MasteryRecord>,
        interests: &HashMap<TopicId, f64>,
        last_answered: Option<TopicId>,
    ) -> Result<Vec<ArmStats>, EngineError> {
        let has_alternatives = unlocked.len() > 1;
        let mut arms = Vec::with_capacity(unlocked.len());

        for topic in unlocked {
            let depth = tree.depth(topic.id).inspect_err(|err| {
                tracing::error!(topic_id = topic.id, error = %err, "topic tree invariant violated");
            })?;
            let record = mastery.get(&topic.id);
            let (answered, accuracy, skill) = record
                .map(|r| (r.questions_answered, r.accuracy(), self.mastery.skill(r)))
                .unwrap_or((0, 0.0, 0.0));
            let parent = topic.parent_id.map(|pid| {
                mastery
                    .get(&pid)
                    .map(|p| ParentStats { accuracy: p.accuracy(), answered: p.questions_answered })
                    .unwrap_or(ParentStats { accuracy: 0.0, answered: 0 })
            });

            let ctx = HierarchyContext {
                depth,
                answered,
                accuracy,
                parent,
                has_alternatives,
            };

            arms.push(ArmStats {
                topic_id: topic.id,
                interest: interests.get(&topic.id).copied().unwrap_or(self.initial_interest),
                skill,
                selections: answered,
                hierarchical_bonus: hierarchical_bonus(&self.config, &ctx),
                is_recent: last_answered == Some(topic.id),
            });
        }

        Ok(arms)
    }

    pub async fn select(
        &self,
        store: &dyn Store,
        generator: &dyn ContentGenerator,
        pool: &QuestionPool,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Option<Selection>, EngineError> {
        let mut rng = StdRng::seed_from_u64(rand::rng().random());
        self.select_with_rng(store, generator, pool, user_id, session_id, &mut rng)
            .await
    }

    pub async fn select_with_rng(
        &self,
        store: &dyn Store,
        generator: &dyn ContentGenerator,
        pool: &QuestionPool,
        user_id: &str,
        session_id: Option<&str>,
        rng: &mut StdRng,
    ) -> Result<Option<Selection>, EngineError> {
        let unlocked = store.unlocked_topics(user_id).await?;
        if unlocked.is_empty() {
            debug!(user_id, "no unlocked topics");
            return Ok(None);
        }

        let tree = TopicTree::new(store.all_topics().await?);
        let mastery: HashMap<TopicId, MasteryRecord> = store
            .list_mastery(user_id)
            .await?
            .into_iter()
            .map(|m| (m.topic_id, m))
            .collect();
        let interests: HashMap<TopicId, f64> = store
            .list_interests(user_id)
            .await?
            .into_iter()
            .map(|i| (i.topic_id, i.interest_score))
            .collect();
        let last_answered = store.last_answered_topic(user_id).await?;

        let arms = self.build_arms(&tree, &unlocked, &mastery, &interests, last_answered)?;
        let scored = score_arms(&self.config, &arms);
        let Some((chosen, strategy)) = self.choose(&scored, rng) else {
            return Ok(None);
        };
        let topics: HashMap<TopicId, &Topic> = unlocked.iter().map(|t| (t.id, t)).collect();

        let mut reason: Option<String> = None;
        // Template from the first failed generation. Later candidates only
        // look for existing content.
        let mut held: Option<(ArmScore, &Topic, i32, QuestionDraft)> = None;
        let order = self.candidate_order(scored.len(), chosen);

        for (attempt, &idx) in order.iter().enumerate() {
            let score = scored[idx];
            let Some(topic) = topics.get(&score.topic_id).copied() else {
                continue;
            };
            let depth = tree.depth(topic.id)?;
            let target = target_difficulty(score.skill, depth, rng.random_range(-1..=2));
            let attempts = attempt + 1;
            let unused = store.unused_questions(user_id, topic.id).await?;

            if let Some(session_id) = session_id {
                while let Some(question) = pool.pop_question(session_id, topic.id) {
                    if unused.iter().any(|q| q.id == question.id) {
                        return Ok(Some(self.selection(question, topic, strategy, QuestionSource::Pool, score, target, attempts, reason)));
                    }
                }
            }

            if let Some(question) = pick_question(&unused, target, self.config.difficulty_window, rng) {
                let question = question.clone();
                return Ok(Some(self.selection(question, topic, strategy, QuestionSource::Stored, score, target, attempts, reason)));
            }

            if held.is_none() {
                let request = QuestionRequest { topic: topic.clone(), difficulty: target };
                let report = question_with_fallback(generator, &request, self.generator_timeout).await;
                if report.ok {
                    let question = store.insert_question(topic.id, &report.value, true).await?;
                    return Ok(Some(self.selection(question, topic, strategy, QuestionSource::Generated, score, target, attempts, reason)));
                }
                debug!(user_id, topic_id = topic.id, "holding template, trying next candidates");
                reason = report.reason;
                held = Some((score, topic, target, report.value));
            }
        }

        // Last resort: the held template, or one for the chosen topic when no
        // candidate reached generation.
        let (score, topic, target, draft) = match held {
            Some(held) => held,
            None => {
                let score = scored[chosen];
                let topic = topics
                    .get(&score.topic_id)
                    .copied()
                    .ok_or(EngineError::UnknownTopic(score.topic_id))?;
                let target = target_difficulty(score.skill, tree.depth(topic.id)?, 0);
                (score, topic, target, template_question(topic, target))
            }
        };
        let question = store.insert_question(topic.id, &draft, false).await?;
        let reason = reason.unwrap_or_else(|| "no content available for candidate topics".to_string());
        warn!(user_id, topic_id = topic.id, reason = %reason, "serving template question");

        let mut selection = self.selection(
            question,
            topic,
            strategy,
            QuestionSource::Template,
            score,
            target,
            order.len(),
            Some(reason),
        );
        selection.fallback_used = true;
        Ok(Some(selection))
    }

    #[allow(clippy::too_many_arguments)]
    fn selection(
        &self,
        question: Question,
        topic: &Topic,
        strategy: SelectionStrategy,
        source: QuestionSource,
        score: ArmScore,
        target_difficulty: i32,
        attempts: usize,
        reason: Option<String>,
    ) -> Selection {
        debug!(
            topic_id = topic.id,
            question_id = question.id,
            strategy = ?strategy,
            source = ?source,
            score = score.score,
            attempts,
            "question selected"
        );
        Selection {
            question,
            topic: topic.clone(),
            strategy,
            source,
            score,
            target_difficulty,
            attempts,
            fallback_used: attempts > 1,
            reason,
        }
    }
}

/// Difficulty on the 1..=10 scale from skill, depth (capped at 3) and a
/// small random jitter.
pub fn target_difficulty(skill: f64, depth: usize, jitter: i32) -> i32 {
    let base = (skill.clamp(0.0, 1.0) * 10.0).round() as i32;
    (base + depth.min(3) as i32 + jitter).clamp(1, 10)
}

/// A random question within `window` of the target, else the closest one.
pub fn pick_question<'a>(
    questions: &'a [Question],
    target: i32,
    window: i32,
    rng: &mut impl Rng,
) -> Option<&'a Question> {
    let near: Vec<&Question> = questions
        .iter()
        .filter(|q| (q.difficulty - target).abs() <= window)
        .collect();
    if !near.is_empty() {
        return Some(near[rng.random_range(0..near.len())]);
    }
    questions
        .iter()
        .min_by_key(|q| ((q.difficulty - target).abs(), q.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::config::AdaptiveConfig;
    use crate::adaptive::types::{CandidateSubtopic, NewTopic, QuestionDraft, UnlockEvent, UnlockTrigger};
    use crate::db::MemoryStore;
    use crate::services::content_generator::{GeneratorError, SubtopicRequest, TemplateGenerator};
    use async_trait::async_trait;
    use chrono::Utc;

    struct Broken;

    #[async_trait]
    impl ContentGenerator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn generate_subtopics(
            &self,
            _request: &SubtopicRequest,
        ) -> Result<Vec<CandidateSubtopic>, GeneratorError> {
            Err(GeneratorError::Unavailable("offline".into()))
        }

        async fn generate_question(
            &self,
            _request: &QuestionRequest,
        ) -> Result<QuestionDraft, GeneratorError> {
            Err(GeneratorError::Unavailable("offline".into()))
        }
    }

    fn selector() -> BanditSelector {
        let config = AdaptiveConfig::default();
        BanditSelector::new(
            config.bandit,
            MasteryMachine::new(config.mastery),
            config.interest.initial_score,
            Duration::from_secs(1),
        )
    }

    fn question(id: i64, difficulty: i32) -> Question {
        Question {
            id,
            topic_id: 1,
            prompt: format!("q{id}"),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer: "a".into(),
            explanation: String::new(),
            difficulty,
            generated: false,
            created_at: Utc::now(),
        }
    }

    fn arm_score(topic_id: TopicId, score: f64, exploration_bonus: f64) -> ArmScore {
        ArmScore {
            topic_id,
            score,
            exploration_bonus,
            ..ArmScore::default()
        }
    }

    async fn store_with_root() -> (MemoryStore, Topic) {
        let store = MemoryStore::new();
        let (root, _) = store
            .create_topic(NewTopic::root("Artificial Intelligence", "The study of intelligent agents"))
            .await
            .unwrap();
        store
            .unlock_topic(&UnlockEvent::new("u1", None, root.id, UnlockTrigger::Root))
            .await
            .unwrap();
        (store, root)
    }

    #[test]
    fn test_target_difficulty_bounds() {
        assert_eq!(target_difficulty(0.0, 0, -1), 1);
        assert_eq!(target_difficulty(0.5, 2, 1), 8);
        assert_eq!(target_difficulty(1.0, 6, 2), 10);
        assert_eq!(target_difficulty(0.3, 10, 0), 6);
    }

    #[test]
    fn test_pick_question_prefers_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let questions = vec![question(1, 1), question(2, 6), question(3, 7)];
        for _ in 0..20 {
            let picked = pick_question(&questions, 6, 1, &mut rng).unwrap();
            assert!(picked.id == 2 || picked.id == 3);
        }
        let far = pick_question(&questions, 10, 1, &mut rng).unwrap();
        assert_eq!(far.id, 3);
        assert!(pick_question(&[], 5, 2, &mut rng).is_none());
    }

    #[test]
    fn test_exploitation_without_exploration_rate() {
        let mut s = selector();
        s.config.exploration_rate = 0.0;
        let scored = vec![arm_score(1, 2.0, 0.1), arm_score(2, 1.0, 1.0)];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(s.choose(&scored, &mut rng), Some((0, SelectionStrategy::Exploitation)));
    }

    #[test]
    fn test_exploration_samples_by_bonus() {
        let mut s = selector();
        s.config.exploration_rate = 1.0;
        let scored = vec![arm_score(1, 2.0, 0.0), arm_score(2, 1.0, 1.0)];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(s.choose(&scored, &mut rng), Some((1, SelectionStrategy::Exploration)));
        }
        assert_eq!(s.choose(&[], &mut rng), None);
    }

    #[test]
    fn test_candidate_order_caps_fallbacks() {
        let s = selector();
        assert_eq!(s.candidate_order(10, 3), vec![3, 0, 1, 2, 4, 5]);
        assert_eq!(s.candidate_order(2, 0), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_nothing_unlocked_returns_none() {
        let store = MemoryStore::new();
        let pool = QuestionPool::new(Duration::from_secs(60));
        let out = selector()
            .select(&store, &TemplateGenerator, &pool, "nobody", None)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_stored_question_preferred_over_generation() {
        let (store, root) = store_with_root().await;
        let stored = store
            .insert_question(root.id, &template_question(&root, 1), false)
            .await
            .unwrap();
        let pool = QuestionPool::new(Duration::from_secs(60));
        let selection = selector()
            .select(&store, &Broken, &pool, "u1", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selection.source, QuestionSource::Stored);
        assert_eq!(selection.question.id, stored.id);
        assert!(!selection.fallback_used);
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back_to_template() {
        let (store, root) = store_with_root().await;
        let pool = QuestionPool::new(Duration::from_secs(60));
        let selection = selector()
            .select(&store, &Broken, &pool, "u1", Some("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selection.source, QuestionSource::Template);
        assert!(selection.fallback_used);
        assert!(selection.reason.unwrap().contains("offline"));
        assert_eq!(selection.topic.id, root.id);
        // the template is persisted so answers can be checked later
        assert!(store.get_question(selection.question.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stored_content_on_next_candidate_beats_template() {
        let (store, root) = store_with_root().await;
        let (child, _) = store
            .create_topic(NewTopic {
                name: "Robotics".into(),
                description: String::new(),
                parent_id: Some(root.id),
                difficulty_min: 1,
                difficulty_max: 10,
            })
            .await
            .unwrap();
        store
            .unlock_topic(&UnlockEvent::new("u1", Some(root.id), child.id, UnlockTrigger::UserRequest))
            .await
            .unwrap();
        let stored = store
            .insert_question(child.id, &template_question(&child, 3), true)
            .await
            .unwrap();

        let pool = QuestionPool::new(Duration::from_secs(60));
        let selection = selector()
            .select(&store, &Broken, &pool, "u1", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selection.source, QuestionSource::Stored);
        assert_eq!(selection.question.id, stored.id);
        // the held template was never persisted
        assert!(store.unused_questions("u1", root.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pool_is_consumed_first() {
        let (store, root) = store_with_root().await;
        let q = store
            .insert_question(root.id, &template_question(&root, 5), true)
            .await
            .unwrap();
        let pool = QuestionPool::new(Duration::from_secs(60));
        pool.push_questions("s1", root.id, vec![q.clone()]);

        let selection = selector()
            .select(&store, &Broken, &pool, "u1", Some("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selection.source, QuestionSource::Pool);
        assert_eq!(selection.question.id, q.id);
        assert_eq!(pool.pooled_len("s1", root.id), 0);
    }
}
