use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::adaptive::types::{
    EngagementAction, ExpansionClaim, InterestRecord, Interaction, MasteryRecord, NewTopic,
    Question, QuestionDraft, QuestionId, Topic, TopicId, UnlockEvent,
};
use crate::db::{Store, StoreError};

type UserTopic = (String, TopicId);

#[derive(Default)]
struct State {
    next_topic_id: TopicId,
    next_question_id: QuestionId,
    topics: BTreeMap<TopicId, Topic>,
    mastery: HashMap<UserTopic, MasteryRecord>,
    interests: HashMap<UserTopic, InterestRecord>,
    unlocks: Vec<UnlockEvent>,
    questions: BTreeMap<QuestionId, Question>,
    served: HashSet<(String, QuestionId)>,
    interactions: Vec<Interaction>,
}

/// Process-local store with the same semantics as `SqliteStore`. Used when
/// no database is configured and throughout the tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(user_id: &str, topic_id: TopicId) -> UserTopic {
    (user_id.to_string(), topic_id)
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_topic(&self, topic: NewTopic) -> Result<(Topic, bool), StoreError> {
        let mut state = self.state.lock();
        let lowered = topic.name.to_lowercase();
        if let Some(existing) = state
            .topics
            .values()
            .find(|t| t.parent_id == topic.parent_id && t.name.to_lowercase() == lowered)
        {
            return Ok((existing.clone(), false));
        }
        if let Some(parent_id) = topic.parent_id {
            if !state.topics.contains_key(&parent_id) {
                return Err(StoreError::TopicNotFound(parent_id));
            }
        }

        state.next_topic_id += 1;
        let stored = Topic {
            id: state.next_topic_id,
            name: topic.name,
            description: topic.description,
            parent_id: topic.parent_id,
            difficulty_min: topic.difficulty_min,
            difficulty_max: topic.difficulty_max,
            created_at: Utc::now(),
        };
        state.topics.insert(stored.id, stored.clone());
        Ok((stored, true))
    }

    async fn get_topic(&self, id: TopicId) -> Result<Option<Topic>, StoreError> {
        Ok(self.state.lock().topics.get(&id).cloned())
    }

    async fn children(&self, parent_id: TopicId) -> Result<Vec<Topic>, StoreError> {
        Ok(self
            .state
            .lock()
            .topics
            .values()
            .filter(|t| t.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn roots(&self) -> Result<Vec<Topic>, StoreError> {
        Ok(self
            .state
            .lock()
            .topics
            .values()
            .filter(|t| t.parent_id.is_none())
            .cloned()
            .collect())
    }

    async fn all_topics(&self) -> Result<Vec<Topic>, StoreError> {
        Ok(self.state.lock().topics.values().cloned().collect())
    }

    async fn get_mastery(
        &self,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<Option<MasteryRecord>, StoreError> {
        Ok(self.state.lock().mastery.get(&key(user_id, topic_id)).cloned())
    }

    async fn get_or_create_mastery(
        &self,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<MasteryRecord, StoreError> {
        let mut state = self.state.lock();
        Ok(state
            .mastery
            .entry(key(user_id, topic_id))
            .or_insert_with(|| MasteryRecord::new(user_id, topic_id))
            .clone())
    }

    async fn list_mastery(&self, user_id: &str) -> Result<Vec<MasteryRecord>, StoreError> {
        let state = self.state.lock();
        let mut records: Vec<MasteryRecord> = state
            .mastery
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|m| m.topic_id);
        Ok(records)
    }

    async fn update_mastery_progress(&self, record: &MasteryRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let stored = state
            .mastery
            .entry(key(&record.user_id, record.topic_id))
            .or_insert_with(|| MasteryRecord::new(&record.user_id, record.topic_id));
        stored.current_level = record.current_level;
        stored.levels = record.levels;
        stored.questions_answered = record.questions_answered;
        stored.correct_answers = record.correct_answers;
        stored.updated_at = record.updated_at;
        Ok(())
    }

    async fn claim_expansion(
        &self,
        user_id: &str,
        topic_id: TopicId,
        claim: ExpansionClaim,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let Some(record) = state.mastery.get_mut(&key(user_id, topic_id)) else {
            return Ok(false);
        };
        let claimed = match claim {
            ExpansionClaim::First if !record.proficiency_threshold_met => {
                record.proficiency_threshold_met = true;
                true
            }
            ExpansionClaim::Progressive { level, previous } if record.last_expanded_level == previous => {
                record.last_expanded_level = Some(level);
                true
            }
            _ => false,
        };
        if claimed {
            record.updated_at = Utc::now();
        }
        Ok(claimed)
    }

    async fn release_expansion(
        &self,
        user_id: &str,
        topic_id: TopicId,
        claim: ExpansionClaim,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(record) = state.mastery.get_mut(&key(user_id, topic_id)) {
            match claim {
                ExpansionClaim::First => record.proficiency_threshold_met = false,
                ExpansionClaim::Progressive { level, previous } => {
                    if record.last_expanded_level == Some(level) {
                        record.last_expanded_level = previous;
                    }
                }
            }
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn unlock_topic(&self, event: &UnlockEvent) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        if state
            .unlocks
            .iter()
            .any(|u| u.user_id == event.user_id && u.unlocked_topic_id == event.unlocked_topic_id)
        {
            return Ok(false);
        }
        state.unlocks.push(event.clone());

        let record = state
            .mastery
            .entry(key(&event.user_id, event.unlocked_topic_id))
            .or_insert_with(|| MasteryRecord::new(&event.user_id, event.unlocked_topic_id));
        record.is_unlocked = true;
        record.unlocked_at.get_or_insert(event.created_at);
        Ok(true)
    }

    async fn unlocked_topics(&self, user_id: &str) -> Result<Vec<Topic>, StoreError> {
        let state = self.state.lock();
        let ids: HashSet<TopicId> = state
            .unlocks
            .iter()
            .filter(|u| u.user_id == user_id)
            .map(|u| u.unlocked_topic_id)
            .collect();
        Ok(state
            .topics
            .values()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect())
    }

    async fn unlock_events(&self, user_id: &str) -> Result<Vec<UnlockEvent>, StoreError> {
        Ok(self
            .state
            .lock()
            .unlocks
            .iter()
            .filter(|u| u.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_interest(
        &self,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<Option<InterestRecord>, StoreError> {
        Ok(self.state.lock().interests.get(&key(user_id, topic_id)).cloned())
    }

    async fn save_interest(&self, record: &InterestRecord) -> Result<(), StoreError> {
        self.state
            .lock()
            .interests
            .insert(key(&record.user_id, record.topic_id), record.clone());
        Ok(())
    }

    async fn list_interests(&self, user_id: &str) -> Result<Vec<InterestRecord>, StoreError> {
        let state = self.state.lock();
        let mut records: Vec<InterestRecord> = state
            .interests
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.topic_id);
        Ok(records)
    }

    async fn scale_interests(&self, user_id: Option<&str>, factor: f64) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut touched = 0;
        for record in state.interests.values_mut() {
            if user_id.is_some_and(|u| u != record.user_id) {
                continue;
            }
            record.interest_score = (record.interest_score * factor).clamp(0.0, 1.0);
            record.updated_at = now;
            touched += 1;
        }
        Ok(touched)
    }

    async fn insert_question(
        &self,
        topic_id: TopicId,
        draft: &QuestionDraft,
        generated: bool,
    ) -> Result<Question, StoreError> {
        let mut state = self.state.lock();
        if !state.topics.contains_key(&topic_id) {
            return Err(StoreError::TopicNotFound(topic_id));
        }
        state.next_question_id += 1;
        let question = Question {
            id: state.next_question_id,
            topic_id,
            prompt: draft.prompt.clone(),
            options: draft.options.clone(),
            correct_answer: draft.correct_answer.clone(),
            explanation: draft.explanation.clone(),
            difficulty: draft.difficulty,
            generated,
            created_at: Utc::now(),
        };
        state.questions.insert(question.id, question.clone());
        Ok(question)
    }

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>, StoreError> {
        Ok(self.state.lock().questions.get(&id).cloned())
    }

    async fn unused_questions(
        &self,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<Vec<Question>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .questions
            .values()
            .filter(|q| q.topic_id == topic_id)
            .filter(|q| !state.served.contains(&(user_id.to_string(), q.id)))
            .cloned()
            .collect())
    }

    async fn mark_served(&self, user_id: &str, question_id: QuestionId) -> Result<(), StoreError> {
        self.state
            .lock()
            .served
            .insert((user_id.to_string(), question_id));
        Ok(())
    }

    async fn record_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        self.state.lock().interactions.push(interaction.clone());
        Ok(())
    }

    async fn recent_interactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, StoreError> {
        Ok(self
            .state
            .lock()
            .interactions
            .iter()
            .rev()
            .filter(|i| i.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn last_answered_topic(&self, user_id: &str) -> Result<Option<TopicId>, StoreError> {
        Ok(self
            .state
            .lock()
            .interactions
            .iter()
            .rev()
            .find(|i| i.user_id == user_id && i.action == EngagementAction::Answer)
            .map(|i| i.topic_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::types::{MasteryLevel, UnlockTrigger};

    async fn seeded() -> (MemoryStore, Topic) {
        let store = MemoryStore::new();
        let (root, created) = store
            .create_topic(NewTopic::root("Artificial Intelligence", "root"))
            .await
            .unwrap();
        assert!(created);
        (store, root)
    }

    #[tokio::test]
    async fn test_sibling_names_are_unique_ignoring_case() {
        let (store, root) = seeded().await;
        let child = NewTopic {
            name: "Machine Learning".into(),
            description: String::new(),
            parent_id: Some(root.id),
            difficulty_min: 1,
            difficulty_max: 5,
        };
        let (first, created) = store.create_topic(child.clone()).await.unwrap();
        assert!(created);

        let shouted = NewTopic { name: "MACHINE LEARNING".into(), ..child };
        let (second, created) = store.create_topic(shouted).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.children(root.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_is_idempotent_and_marks_mastery() {
        let (store, root) = seeded().await;
        let event = UnlockEvent::new("u1", None, root.id, UnlockTrigger::Root);
        assert!(store.unlock_topic(&event).await.unwrap());
        assert!(!store.unlock_topic(&event).await.unwrap());

        let record = store.get_mastery("u1", root.id).await.unwrap().unwrap();
        assert!(record.is_unlocked);
        assert!(record.unlocked_at.is_some());
        assert_eq!(store.unlock_events("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expansion_claim_is_exclusive() {
        let (store, root) = seeded().await;
        store.get_or_create_mastery("u1", root.id).await.unwrap();

        assert!(store.claim_expansion("u1", root.id, ExpansionClaim::First).await.unwrap());
        assert!(!store.claim_expansion("u1", root.id, ExpansionClaim::First).await.unwrap());

        store.release_expansion("u1", root.id, ExpansionClaim::First).await.unwrap();
        assert!(store.claim_expansion("u1", root.id, ExpansionClaim::First).await.unwrap());

        let progressive = ExpansionClaim::Progressive { level: MasteryLevel::Competent, previous: None };
        assert!(store.claim_expansion("u1", root.id, progressive).await.unwrap());
        assert!(!store.claim_expansion("u1", root.id, progressive).await.unwrap());
    }

    #[tokio::test]
    async fn test_progress_update_keeps_unlock_columns() {
        let (store, root) = seeded().await;
        store
            .unlock_topic(&UnlockEvent::new("u1", None, root.id, UnlockTrigger::Root))
            .await
            .unwrap();

        let mut record = MasteryRecord::new("u1", root.id);
        record.questions_answered = 3;
        record.correct_answers = 2;
        store.update_mastery_progress(&record).await.unwrap();

        let stored = store.get_mastery("u1", root.id).await.unwrap().unwrap();
        assert_eq!(stored.questions_answered, 3);
        assert!(stored.is_unlocked);
    }

    #[tokio::test]
    async fn test_served_questions_are_excluded() {
        let (store, root) = seeded().await;
        let draft = QuestionDraft {
            prompt: "Which?".into(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer: "a".into(),
            explanation: String::new(),
            difficulty: 2,
        };
        let q1 = store.insert_question(root.id, &draft, false).await.unwrap();
        let q2 = store.insert_question(root.id, &draft, true).await.unwrap();
        store.mark_served("u1", q1.id).await.unwrap();

        let unused = store.unused_questions("u1", root.id).await.unwrap();
        assert_eq!(unused.iter().map(|q| q.id).collect::<Vec<_>>(), vec![q2.id]);
        assert_eq!(store.unused_questions("u2", root.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scale_interests_clamps_scores() {
        let (store, root) = seeded().await;
        let mut record = InterestRecord::new("u1", root.id, 0.8);
        store.save_interest(&record).await.unwrap();
        record.user_id = "u2".into();
        store.save_interest(&record).await.unwrap();

        assert_eq!(store.scale_interests(Some("u1"), 0.5).await.unwrap(), 1);
        let u1 = store.get_interest("u1", root.id).await.unwrap().unwrap();
        assert!((u1.interest_score - 0.4).abs() < 1e-9);

        assert_eq!(store.scale_interests(None, 2.0).await.unwrap(), 2);
        let u2 = store.get_interest("u2", root.id).await.unwrap().unwrap();
        assert_eq!(u2.interest_score, 1.0);
    }
}
