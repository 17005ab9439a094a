use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adaptive::config::AdaptiveConfig;
use crate::adaptive::expansion::{ExpansionController, ExpansionOutcome};
use crate::adaptive::interest::{
    interest_diversity, EmergingInterest, InterestInsights, InterestTracker, InterestUpdate,
    PerformanceContext,
};
use crate::adaptive::mastery::{MasteryMachine, MasteryStatus, MasteryTransition};
use crate::adaptive::mece::{MeceValidator, Violation};
use crate::adaptive::selector::{BanditSelector, QuestionSource, Selection};
use crate::adaptive::tree::TopicTree;
use crate::adaptive::types::{
    EngagementAction, Interaction, MasteryRecord, NewTopic, QuestionId, Topic, TopicId,
    UnlockTrigger,
};
use crate::adaptive::EngineError;
use crate::db::Store;
use crate::services::content_generator::{checked_question, ContentGenerator, QuestionRequest};
use crate::services::question_pool::QuestionPool;
use crate::workers::supervisor::TaskSupervisor;

type LockMap = parking_lot::Mutex<HashMap<(String, TopicId), Arc<tokio::sync::Mutex<()>>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    /// Roots unlocked by this call; empty for returning users.
    pub unlocked: Vec<Topic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    pub user_id: String,
    pub session_id: Option<String>,
    pub question_id: QuestionId,
    pub answer: String,
    /// Seconds spent on the question.
    pub time_spent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode", content = "outcome")]
pub enum ExpansionDispatch {
    Inline(ExpansionOutcome),
    Scheduled,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub topic_id: TopicId,
    pub is_correct: bool,
    pub correct_answer: String,
    pub explanation: String,
    pub transition: MasteryTransition,
    pub status: MasteryStatus,
    pub interest: InterestUpdate,
    /// Topics unlocked by emerging interest during this answer.
    pub unlocked: Vec<Topic>,
    pub expansion: ExpansionDispatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementOutcome {
    pub interest: InterestUpdate,
    pub unlocked: Vec<Topic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationStats {
    pub topics_unlocked: usize,
    pub total_topics: usize,
    pub coverage: f64,
    pub discoveries_last_week: usize,
    pub engagement_entropy: f64,
}

/// Entry point tying mastery, interest, selection and expansion together.
///
/// Answers for the same (user, topic) are applied one at a time. Work that
/// the caller should not wait for (expansion, prefetch, pool warm-up) is
/// handed to the [`TaskSupervisor`] with its own store handle.
#[derive(Clone)]
pub struct AdaptiveEngine {
    store: Arc<dyn Store>,
    generator: Arc<dyn ContentGenerator>,
    config: AdaptiveConfig,
    mastery: MasteryMachine,
    interest: InterestTracker,
    selector: BanditSelector,
    expansion: ExpansionController,
    mece: MeceValidator,
    pool: Arc<QuestionPool>,
    supervisor: TaskSupervisor,
    locks: Arc<LockMap>,
}

impl AdaptiveEngine {
    pub fn new(
        store: Arc<dyn Store>,
        generator: Arc<dyn ContentGenerator>,
        config: AdaptiveConfig,
    ) -> Self {
        let mastery = MasteryMachine::new(config.mastery.clone());
        let mece = MeceValidator::new(config.mece.clone());
        let selector = BanditSelector::new(
            config.bandit.clone(),
            mastery.clone(),
            config.interest.initial_score,
            config.expansion.generator_timeout(),
        );

        Self {
            store,
            generator,
            interest: InterestTracker::new(config.interest.clone()),
            expansion: ExpansionController::new(config.expansion.clone(), mece.clone()),
            pool: Arc::new(QuestionPool::new(config.pool.ttl())),
            supervisor: TaskSupervisor::new(config.pool.max_background_tasks),
            locks: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            config,
            mastery,
            selector,
            mece,
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    pub fn pool(&self) -> Arc<QuestionPool> {
        Arc::clone(&self.pool)
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    /// Waits for all background units submitted so far.
    pub async fn drain_background(&self) {
        self.supervisor.drain().await;
    }

    /// Creates the root topic unless a root with that name exists.
    pub async fn bootstrap_root(&self, root: NewTopic) -> Result<Topic, EngineError> {
        let (topic, created) = self.store.create_topic(NewTopic { parent_id: None, ..root }).await?;
        if created {
            info!(topic_id = topic.id, name = %topic.name, "root topic created");
        }
        Ok(topic)
    }

    pub async fn start_session(&self, user_id: &str) -> Result<SessionHandle, EngineError> {
        let unlocked = self.expansion.bootstrap_user(self.store.as_ref(), user_id).await?;
        let session_id = Uuid::new_v4().to_string();
        info!(user_id, session_id = %session_id, new_roots = unlocked.len(), "session started");
        Ok(SessionHandle {
            session_id,
            user_id: user_id.to_string(),
            unlocked,
        })
    }

    /// Purges the session's pooled and prefetched questions.
    pub fn end_session(&self, session_id: &str) -> usize {
        let purged = self.pool.purge_session(session_id);
        info!(session_id, purged, "session ended");
        purged
    }

    /// Next question for the user. `None` only when nothing is unlocked.
    pub async fn next_question(
        &self,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Option<Selection>, EngineError> {
        let prefetched = match session_id.and_then(|s| self.pool.take_prefetch(s)) {
            Some(selection) => self.revalidate_prefetch(user_id, selection).await?,
            None => None,
        };

        let selection = match prefetched {
            Some(selection) => Some(selection),
            None => {
                self.selector
                    .select(
                        self.store.as_ref(),
                        self.generator.as_ref(),
                        &self.pool,
                        user_id,
                        session_id,
                    )
                    .await?
            }
        };
        let Some(selection) = selection else {
            return Ok(None);
        };

        self.store.mark_served(user_id, selection.question.id).await?;
        if let Some(session_id) = session_id {
            self.warm_pool(user_id, session_id, &selection.topic);
        }
        Ok(Some(selection))
    }

    async fn revalidate_prefetch(
        &self,
        user_id: &str,
        mut selection: Selection,
    ) -> Result<Option<Selection>, EngineError> {
        let unused = self
            .store
            .unused_questions(user_id, selection.topic.id)
            .await?;
        if !unused.iter().any(|q| q.id == selection.question.id) {
            debug!(user_id, question_id = selection.question.id, "prefetched question already served");
            return Ok(None);
        }
        let unlocked = self.store.unlocked_topics(user_id).await?;
        if !unlocked.iter().any(|t| t.id == selection.topic.id) {
            return Ok(None);
        }
        selection.source = QuestionSource::Prefetch;
        Ok(Some(selection))
    }

    fn warm_pool(&self, user_id: &str, session_id: &str, topic: &Topic) {
        if self.pool.is_ended(session_id) {
            return;
        }
        let wanted = self
            .config
            .pool
            .min_pool_size
            .saturating_sub(self.pool.pooled_len(session_id, topic.id));
        if wanted == 0 {
            return;
        }

        let store = Arc::clone(&self.store);
        let generator = Arc::clone(&self.generator);
        let pool = Arc::clone(&self.pool);
        let timeout = self.config.expansion.generator_timeout();
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        let topic = topic.clone();

        self.supervisor.submit("pool_warm", async move {
            let mut questions = store.unused_questions(&user_id, topic.id).await?;
            questions.truncate(wanted);
            while questions.len() < wanted {
                let difficulty = questions
                    .last()
                    .map_or(topic.difficulty_min, |q| q.difficulty);
                let request = QuestionRequest { topic: topic.clone(), difficulty };
                match checked_question(generator.as_ref(), &request, timeout).await {
                    Ok(draft) => questions.push(store.insert_question(topic.id, &draft, true).await?),
                    Err(err) => {
                        warn!(topic_id = topic.id, error = %err, "pool warm-up stopped");
                        break;
                    }
                }
            }
            debug!(session_id = %session_id, topic_id = topic.id, pooled = questions.len(), "pool warmed");
            pool.push_questions(&session_id, topic.id, questions);
            Ok::<(), EngineError>(())
        });
    }

    fn topic_lock(&self, user_id: &str, topic_id: TopicId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry((user_id.to_string(), topic_id))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    pub async fn submit_answer(&self, submission: AnswerSubmission) -> Result<AnswerOutcome, EngineError> {
        let AnswerSubmission {
            user_id,
            session_id,
            question_id,
            answer,
            time_spent,
        } = submission;
        let user_id = user_id.as_str();
        let store = self.store.as_ref();

        let question = store
            .get_question(question_id)
            .await?
            .ok_or(EngineError::UnknownQuestion(question_id))?;
        let topic_id = question.topic_id;

        let lock = self.topic_lock(user_id, topic_id);
        let guard = lock.lock().await;

        let is_correct = question.is_correct(&answer);
        let mut record = store.get_or_create_mastery(user_id, topic_id).await?;
        let transition = self.mastery.record_answer(&mut record, is_correct);
        store.update_mastery_progress(&record).await?;

        store
            .record_interaction(&Interaction {
                user_id: user_id.to_string(),
                topic_id,
                question_id: Some(question_id),
                action: EngagementAction::Answer,
                is_correct: Some(is_correct),
                time_spent,
                difficulty: Some(question.difficulty),
                created_at: Utc::now(),
            })
            .await?;

        let tree = TopicTree::new(store.all_topics().await?);
        let ctx = PerformanceContext {
            is_correct: Some(is_correct),
            accuracy: Some(record.accuracy()),
            difficulty: Some(question.difficulty),
            time_spent,
        };
        let interest = self
            .interest
            .track(store, &tree, user_id, topic_id, EngagementAction::Answer, &ctx)
            .await?;
        let unlocked = self
            .expansion
            .unlock_by_interest(store, user_id, &interest.emerging)
            .await?;

        let expansion = self.dispatch_expansion(user_id, &record).await?;
        drop(guard);

        if transition.advanced {
            info!(
                user_id,
                topic_id,
                from = transition.previous.as_str(),
                to = transition.current.as_str(),
                "mastery level advanced"
            );
        }
        if let Some(session_id) = session_id.as_deref() {
            self.schedule_prefetch(user_id, session_id);
        }

        Ok(AnswerOutcome {
            topic_id,
            is_correct,
            correct_answer: question.correct_answer,
            explanation: question.explanation,
            transition,
            status: self.mastery.status(&record),
            interest,
            unlocked,
            expansion,
        })
    }

    async fn dispatch_expansion(
        &self,
        user_id: &str,
        record: &MasteryRecord,
    ) -> Result<ExpansionDispatch, EngineError> {
        let children = self.store.children(record.topic_id).await?.len();
        if self.expansion.evaluate(record, children).is_none() {
            return Ok(ExpansionDispatch::Skipped);
        }

        if !self.config.expansion.background {
            let outcome = self
                .expansion
                .check_and_expand(self.store.as_ref(), self.generator.as_ref(), user_id, record.topic_id)
                .await?;
            return Ok(ExpansionDispatch::Inline(outcome));
        }

        let store = Arc::clone(&self.store);
        let generator = Arc::clone(&self.generator);
        let expansion = self.expansion.clone();
        let user_id = user_id.to_string();
        let topic_id = record.topic_id;
        self.supervisor.submit("expansion", async move {
            expansion
                .check_and_expand(store.as_ref(), generator.as_ref(), &user_id, topic_id)
                .await
                .map(|_| ())
        });
        Ok(ExpansionDispatch::Scheduled)
    }

    fn schedule_prefetch(&self, user_id: &str, session_id: &str) {
        if self.pool.is_ended(session_id) {
            return;
        }
        let store = Arc::clone(&self.store);
        let generator = Arc::clone(&self.generator);
        let pool = Arc::clone(&self.pool);
        let selector = self.selector.clone();
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();

        self.supervisor.submit("prefetch", async move {
            let next = selector
                .select(store.as_ref(), generator.as_ref(), &pool, &user_id, Some(&session_id))
                .await?;
            if let Some(selection) = next {
                debug!(session_id = %session_id, topic_id = selection.topic.id, "next question prefetched");
                pool.store_prefetch(&session_id, selection);
            }
            Ok::<(), EngineError>(())
        });
    }

    /// Interest-only engagement such as `teach_me` or `skip`.
    pub async fn record_engagement(
        &self,
        user_id: &str,
        topic_id: TopicId,
        action: EngagementAction,
        time_spent: f64,
    ) -> Result<EngagementOutcome, EngineError> {
        let store = self.store.as_ref();
        let tree = TopicTree::new(store.all_topics().await?);
        if tree.get(topic_id).is_none() {
            return Err(EngineError::UnknownTopic(topic_id));
        }

        store
            .record_interaction(&Interaction {
                user_id: user_id.to_string(),
                topic_id,
                question_id: None,
                action,
                is_correct: None,
                time_spent,
                difficulty: None,
                created_at: Utc::now(),
            })
            .await?;

        let accuracy = store
            .get_mastery(user_id, topic_id)
            .await?
            .filter(|m| m.questions_answered > 0)
            .map(|m| m.accuracy());
        let ctx = PerformanceContext {
            is_correct: None,
            accuracy,
            difficulty: None,
            time_spent,
        };
        let interest = self
            .interest
            .track(store, &tree, user_id, topic_id, action, &ctx)
            .await?;
        let unlocked = self
            .expansion
            .unlock_by_interest(store, user_id, &interest.emerging)
            .await?;
        Ok(EngagementOutcome { interest, unlocked })
    }

    /// Runs the expansion check inline.
    pub async fn check_expansion(&self, user_id: &str, topic_id: TopicId) -> Result<ExpansionOutcome, EngineError> {
        self.expansion
            .check_and_expand(self.store.as_ref(), self.generator.as_ref(), user_id, topic_id)
            .await
    }

    pub async fn mastery_status(&self, user_id: &str, topic_id: TopicId) -> Result<MasteryStatus, EngineError> {
        let record = self
            .store
            .get_mastery(user_id, topic_id)
            .await?
            .unwrap_or_else(|| MasteryRecord::new(user_id, topic_id));
        Ok(self.mastery.status(&record))
    }

    pub async fn interest_insights(&self, user_id: &str) -> Result<InterestInsights, EngineError> {
        let tree = TopicTree::new(self.store.all_topics().await?);
        Ok(self.interest.insights(self.store.as_ref(), &tree, user_id).await?)
    }

    pub async fn emerging_interests(&self, user_id: &str) -> Result<Vec<EmergingInterest>, EngineError> {
        let tree = TopicTree::new(self.store.all_topics().await?);
        Ok(self
            .interest
            .emerging_interests(self.store.as_ref(), &tree, user_id)
            .await?)
    }

    pub async fn exploration_stats(&self, user_id: &str) -> Result<ExplorationStats, EngineError> {
        let total_topics = self.store.all_topics().await?.len();
        let topics_unlocked = self.store.unlocked_topics(user_id).await?.len();
        let week_ago = Utc::now() - ChronoDuration::days(7);
        let discoveries_last_week = self
            .store
            .unlock_events(user_id)
            .await?
            .into_iter()
            .filter(|e| e.trigger != UnlockTrigger::Root && e.created_at >= week_ago)
            .map(|e| e.unlocked_topic_id)
            .collect::<HashSet<_>>()
            .len();
        let engagement: Vec<f64> = self
            .store
            .list_interests(user_id)
            .await?
            .into_iter()
            .map(|i| i.interaction_count as f64)
            .collect();

        Ok(ExplorationStats {
            topics_unlocked,
            total_topics,
            coverage: if total_topics == 0 {
                0.0
            } else {
                topics_unlocked as f64 / total_topics as f64
            },
            discoveries_last_week,
            engagement_entropy: interest_diversity(&engagement),
        })
    }

    /// Report-only MECE audit, keyed by parent topic name.
    pub async fn audit_tree(
        &self,
        root: Option<TopicId>,
    ) -> Result<BTreeMap<String, Vec<Violation>>, EngineError> {
        let tree = TopicTree::new(self.store.all_topics().await?);
        if let Some(root) = root {
            if tree.get(root).is_none() {
                return Err(EngineError::UnknownTopic(root));
            }
        }
        Ok(self.mece.audit_tree(&tree, root))
    }

    pub async fn unlock_on_request(&self, user_id: &str, topic_id: TopicId) -> Result<bool, EngineError> {
        self.expansion
            .unlock_on_request(self.store.as_ref(), user_id, topic_id)
            .await
    }

    pub async fn decay_interests(&self, user_id: Option<&str>) -> Result<u64, EngineError> {
        Ok(self.interest.decay(self.store.as_ref(), user_id).await?)
    }
}
