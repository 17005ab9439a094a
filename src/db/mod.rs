pub mod config;
pub mod memory;
pub mod sqlite;
pub mod sqlite_schema;

use async_trait::async_trait;
use thiserror::Error;

use crate::adaptive::types::{
    ExpansionClaim, InterestRecord, Interaction, MasteryRecord, NewTopic, Question, QuestionDraft,
    QuestionId, Topic, TopicId, UnknownMasteryLevel, UnlockEvent,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Persistence contract required by the adaptive engine.
///
/// Every call is independent: implementations must not rely on a
/// transaction spanning two calls, so background units can hold their own
/// handle while the foreground request has already returned.
#[async_trait]
pub trait Store: Send + Sync {
    // topics

    /// Inserts a topic unless a sibling with the same name (case-insensitive)
    /// already exists. Returns the stored topic and whether it was created.
    async fn create_topic(&self, topic: NewTopic) -> Result<(Topic, bool), StoreError>;
    async fn get_topic(&self, id: TopicId) -> Result<Option<Topic>, StoreError>;
    async fn children(&self, parent_id: TopicId) -> Result<Vec<Topic>, StoreError>;
    async fn roots(&self) -> Result<Vec<Topic>, StoreError>;
    async fn all_topics(&self) -> Result<Vec<Topic>, StoreError>;

    // mastery

    async fn get_mastery(&self, user_id: &str, topic_id: TopicId)
        -> Result<Option<MasteryRecord>, StoreError>;
    async fn get_or_create_mastery(&self, user_id: &str, topic_id: TopicId)
        -> Result<MasteryRecord, StoreError>;
    async fn list_mastery(&self, user_id: &str) -> Result<Vec<MasteryRecord>, StoreError>;
    /// Writes level and counters only. Unlock and expansion columns are owned
    /// by `unlock_topic` and the expansion claim calls.
    async fn update_mastery_progress(&self, record: &MasteryRecord) -> Result<(), StoreError>;
    /// Compare-and-set on the expansion state. `false` means another caller
    /// already holds the claim.
    async fn claim_expansion(
        &self,
        user_id: &str,
        topic_id: TopicId,
        claim: ExpansionClaim,
    ) -> Result<bool, StoreError>;
    async fn release_expansion(
        &self,
        user_id: &str,
        topic_id: TopicId,
        claim: ExpansionClaim,
    ) -> Result<(), StoreError>;

    // unlocks

    /// Insert-if-absent keyed by (user, unlocked topic). A new event also
    /// marks the mastery record unlocked. `false` when the topic was already
    /// unlocked for the user.
    async fn unlock_topic(&self, event: &UnlockEvent) -> Result<bool, StoreError>;
    async fn unlocked_topics(&self, user_id: &str) -> Result<Vec<Topic>, StoreError>;
    async fn unlock_events(&self, user_id: &str) -> Result<Vec<UnlockEvent>, StoreError>;

    // interest

    async fn get_interest(&self, user_id: &str, topic_id: TopicId)
        -> Result<Option<InterestRecord>, StoreError>;
    async fn save_interest(&self, record: &InterestRecord) -> Result<(), StoreError>;
    async fn list_interests(&self, user_id: &str) -> Result<Vec<InterestRecord>, StoreError>;
    /// Multiplies interest scores by `factor`, for one user or everyone.
    async fn scale_interests(&self, user_id: Option<&str>, factor: f64) -> Result<u64, StoreError>;

    // questions

    async fn insert_question(
        &self,
        topic_id: TopicId,
        draft: &QuestionDraft,
        generated: bool,
    ) -> Result<Question, StoreError>;
    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>, StoreError>;
    /// Questions of the topic the user has not been served yet.
    async fn unused_questions(&self, user_id: &str, topic_id: TopicId)
        -> Result<Vec<Question>, StoreError>;
    async fn mark_served(&self, user_id: &str, question_id: QuestionId) -> Result<(), StoreError>;

    // interactions

    async fn record_interaction(&self, interaction: &Interaction) -> Result<(), StoreError>;
    /// Most recent first.
    async fn recent_interactions(&self, user_id: &str, limit: usize)
        -> Result<Vec<Interaction>, StoreError>;
    async fn last_answered_topic(&self, user_id: &str) -> Result<Option<TopicId>, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("topic not found: {0}")]
    TopicNotFound(TopicId),
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error(transparent)]
    UnknownMasteryLevel(#[from] UnknownMasteryLevel),
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
