//! Ontology growth driven by mastery and interest.
//!
//! The expansion flag on the mastery record is claimed before any
//! generator call. A second trigger for the same (user, topic) then loses
//! the claim and does nothing, which is what keeps expansion idempotent.
//! Failed generation or a rejected MECE batch releases the claim so the
//! next qualifying answer retries.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adaptive::config::ExpansionConfig;
use crate::adaptive::interest::EmergingInterest;
use crate::adaptive::mece::{MeceReport, MeceValidator};
use crate::adaptive::tree::TopicTree;
use crate::adaptive::types::{
    ExpansionClaim, MasteryLevel, MasteryRecord, NewTopic, Topic, TopicId, UnlockEvent,
    UnlockTrigger,
};
use crate::adaptive::EngineError;
use crate::db::Store;
use crate::services::content_generator::{subtopics_with_timeout, ContentGenerator, SubtopicRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProficiencyBand {
    Novice,
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl ProficiencyBand {
    pub fn from_performance(accuracy: f64, answered: u32) -> Self {
        match (accuracy, answered) {
            (_, n) if n < 5 => Self::Novice,
            (a, n) if a >= 0.95 && n >= 15 => Self::Expert,
            (a, n) if a >= 0.85 && n >= 10 => Self::Advanced,
            (a, n) if a >= 0.75 && n >= 8 => Self::Intermediate,
            (a, _) if a >= 0.6 => Self::Beginner,
            _ => Self::Novice,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Novice => "novice",
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Expert => "expert",
        }
    }

    /// Whether a child starting at `difficulty_min` suits this band.
    pub fn admits(&self, difficulty_min: i32) -> bool {
        match self {
            Self::Novice => false,
            Self::Beginner => difficulty_min <= 4,
            Self::Intermediate => difficulty_min <= 6,
            Self::Advanced => difficulty_min <= 8,
            Self::Expert => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "level")]
pub enum ExpansionTrigger {
    First,
    Progressive(MasteryLevel),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionOutcome {
    pub topic_id: TopicId,
    pub trigger: Option<ExpansionTrigger>,
    /// False when another caller already held the claim.
    pub claimed: bool,
    pub band: Option<ProficiencyBand>,
    pub unlocked: Vec<Topic>,
    /// Number of topics created by this call.
    pub generated: usize,
    pub report: Option<MeceReport>,
    pub released: bool,
    pub reason: Option<String>,
}

impl ExpansionOutcome {
    fn idle(topic_id: TopicId) -> Self {
        Self {
            topic_id,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExpansionController {
    config: ExpansionConfig,
    mece: MeceValidator,
}

impl ExpansionController {
    pub fn new(config: ExpansionConfig, mece: MeceValidator) -> Self {
        Self { config, mece }
    }

    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    /// First expansion at the beginner threshold; afterwards once per
    /// mastery level from competent upward while the child cap allows.
    pub fn evaluate(&self, record: &MasteryRecord, children: usize) -> Option<ExpansionTrigger> {
        if record.questions_answered < self.config.min_questions {
            return None;
        }
        let accuracy = record.accuracy();

        if !record.proficiency_threshold_met {
            return (accuracy >= self.config.beginner_threshold).then_some(ExpansionTrigger::First);
        }

        let level = record.current_level;
        let fresh_level = !matches!(record.last_expanded_level, Some(done) if done >= level);
        (accuracy >= self.config.progressive_accuracy
            && level >= MasteryLevel::Competent
            && children < self.config.max_children
            && fresh_level)
            .then_some(ExpansionTrigger::Progressive(level))
    }

    pub async fn check_and_expand(
        &self,
        store: &dyn Store,
        generator: &dyn ContentGenerator,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<ExpansionOutcome, EngineError> {
        let parent = store
            .get_topic(topic_id)
            .await?
            .ok_or(EngineError::UnknownTopic(topic_id))?;
        let Some(record) = store.get_mastery(user_id, topic_id).await? else {
            return Ok(ExpansionOutcome::idle(topic_id));
        };
        let children = store.children(topic_id).await?;

        let Some(trigger) = self.evaluate(&record, children.len()) else {
            return Ok(ExpansionOutcome::idle(topic_id));
        };
        let claim = match trigger {
            ExpansionTrigger::First => ExpansionClaim::First,
            ExpansionTrigger::Progressive(level) => ExpansionClaim::Progressive {
                level,
                previous: record.last_expanded_level,
            },
        };
        if !store.claim_expansion(user_id, topic_id, claim).await? {
            debug!(user_id, topic_id, ?trigger, "expansion already claimed");
            return Ok(ExpansionOutcome {
                trigger: Some(trigger),
                ..ExpansionOutcome::idle(topic_id)
            });
        }

        let band = ProficiencyBand::from_performance(record.accuracy(), record.questions_answered);
        let mut outcome = ExpansionOutcome {
            topic_id,
            trigger: Some(trigger),
            claimed: true,
            band: Some(band),
            ..ExpansionOutcome::default()
        };

        for child in children.iter().filter(|c| band.admits(c.difficulty_min)) {
            let event = UnlockEvent::new(user_id, Some(topic_id), child.id, UnlockTrigger::Proficiency);
            if store.unlock_topic(&event).await? {
                outcome.unlocked.push(child.clone());
            }
        }
        if !outcome.unlocked.is_empty() {
            info!(
                user_id,
                topic_id,
                band = band.as_str(),
                unlocked = outcome.unlocked.len(),
                "unlocked existing subtopics"
            );
            return Ok(outcome);
        }

        let tree = TopicTree::new(store.all_topics().await?);
        let depth = tree.depth(topic_id)?;
        if depth + 1 >= self.config.max_depth {
            info!(user_id, topic_id, depth, "depth cap reached, not generating");
            outcome.reason = Some(format!("depth cap {} reached", self.config.max_depth));
            return Ok(outcome);
        }
        let room = self.config.max_children.saturating_sub(children.len());
        if room == 0 {
            outcome.reason = Some("child cap reached".to_string());
            return Ok(outcome);
        }

        let request = SubtopicRequest {
            parent: parent.clone(),
            depth,
            count: self.config.subtopic_count.min(room),
            existing_children: children.iter().map(|c| c.name.clone()).collect(),
        };
        let generation =
            subtopics_with_timeout(generator, &request, self.config.generator_timeout()).await;
        if !generation.ok {
            self.release(store, user_id, topic_id, claim, &mut outcome).await?;
            outcome.reason = generation.reason;
            return Ok(outcome);
        }

        let report = self.mece.validate(&parent, &children, generation.value, true);
        if !report.violations.is_empty() {
            warn!(
                user_id,
                topic_id,
                violations = ?report.messages(),
                rejected = report.rejected,
                "MECE violations in generated subtopics"
            );
        }
        if report.rejected {
            outcome.reason = Some("candidate batch rejected".to_string());
            outcome.report = Some(report);
            self.release(store, user_id, topic_id, claim, &mut outcome).await?;
            return Ok(outcome);
        }

        let mut seen: HashSet<TopicId> = HashSet::new();
        for candidate in report.accepted.iter().take(room) {
            let (topic, created) = store.create_topic(NewTopic::child_of(&parent, candidate)).await?;
            if created {
                outcome.generated += 1;
            }
            if !seen.insert(topic.id) {
                continue;
            }
            let event =
                UnlockEvent::new(user_id, Some(topic_id), topic.id, UnlockTrigger::ProficiencyGenerated);
            if store.unlock_topic(&event).await? {
                outcome.unlocked.push(topic);
            }
        }
        outcome.report = Some(report);

        info!(
            user_id,
            topic_id,
            generator = generator.name(),
            generated = outcome.generated,
            unlocked = outcome.unlocked.len(),
            "ontology expanded"
        );
        Ok(outcome)
    }

    async fn release(
        &self,
        store: &dyn Store,
        user_id: &str,
        topic_id: TopicId,
        claim: ExpansionClaim,
        outcome: &mut ExpansionOutcome,
    ) -> Result<(), EngineError> {
        store.release_expansion(user_id, topic_id, claim).await?;
        outcome.released = true;
        warn!(user_id, topic_id, "expansion claim released for retry");
        Ok(())
    }

    /// Unlocks emerging interests whose parent is already unlocked.
    pub async fn unlock_by_interest(
        &self,
        store: &dyn Store,
        user_id: &str,
        emerging: &[EmergingInterest],
    ) -> Result<Vec<Topic>, EngineError> {
        if emerging.is_empty() {
            return Ok(Vec::new());
        }
        let unlocked: HashSet<TopicId> = store
            .unlocked_topics(user_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let mut out = Vec::new();
        for interest in emerging {
            if unlocked.contains(&interest.topic_id) {
                continue;
            }
            let Some(topic) = store.get_topic(interest.topic_id).await? else {
                continue;
            };
            let Some(parent_id) = topic.parent_id else {
                continue;
            };
            if !unlocked.contains(&parent_id) {
                continue;
            }
            let event = UnlockEvent::new(user_id, Some(parent_id), topic.id, UnlockTrigger::Interest);
            if store.unlock_topic(&event).await? {
                info!(user_id, topic_id = topic.id, score = interest.interest_score, "unlocked by interest");
                out.push(topic);
            }
        }
        Ok(out)
    }

    /// `Ok(false)` when the topic was already unlocked.
    pub async fn unlock_on_request(
        &self,
        store: &dyn Store,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<bool, EngineError> {
        let topic = store
            .get_topic(topic_id)
            .await?
            .ok_or(EngineError::UnknownTopic(topic_id))?;
        let event = UnlockEvent::new(user_id, topic.parent_id, topic.id, UnlockTrigger::UserRequest);
        Ok(store.unlock_topic(&event).await?)
    }

    /// Unlocks every root for a user. Idempotent.
    pub async fn bootstrap_user(&self, store: &dyn Store, user_id: &str) -> Result<Vec<Topic>, EngineError> {
        let mut unlocked = Vec::new();
        for root in store.roots().await? {
            if store
                .unlock_topic(&UnlockEvent::new(user_id, None, root.id, UnlockTrigger::Root))
                .await?
            {
                unlocked.push(root);
            }
        }
        Ok(unlocked)
    }
}
