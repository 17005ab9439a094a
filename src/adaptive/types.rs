use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type TopicId = i64;
pub type QuestionId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    pub description: String,
    pub parent_id: Option<TopicId>,
    pub difficulty_min: i32,
    pub difficulty_max: i32,
    pub created_at: DateTime<Utc>,
}

impl Topic {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewTopic {
    pub name: String,
    pub description: String,
    pub parent_id: Option<TopicId>,
    pub difficulty_min: i32,
    pub difficulty_max: i32,
}

impl NewTopic {
    pub fn root(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parent_id: None,
            difficulty_min: 1,
            difficulty_max: 10,
        }
    }

    pub fn child_of(parent: &Topic, candidate: &CandidateSubtopic) -> Self {
        Self {
            name: candidate.name.clone(),
            description: candidate.description.clone(),
            parent_id: Some(parent.id),
            difficulty_min: candidate.difficulty_min,
            difficulty_max: candidate.difficulty_max,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown mastery level: {0}")]
pub struct UnknownMasteryLevel(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryLevel {
    Novice,
    Competent,
    Proficient,
    Expert,
    Master,
}

impl MasteryLevel {
    pub const ALL: [MasteryLevel; 5] = [
        Self::Novice,
        Self::Competent,
        Self::Proficient,
        Self::Expert,
        Self::Master,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Novice => "novice",
            Self::Competent => "competent",
            Self::Proficient => "proficient",
            Self::Expert => "expert",
            Self::Master => "master",
        }
    }

    /// Strict parse. Unknown values are an error; callers decide the fallback.
    pub fn parse(s: &str) -> Result<Self, UnknownMasteryLevel> {
        match s.trim().to_lowercase().as_str() {
            "novice" => Ok(Self::Novice),
            "competent" => Ok(Self::Competent),
            "proficient" => Ok(Self::Proficient),
            "expert" => Ok(Self::Expert),
            "master" => Ok(Self::Master),
            _ => Err(UnknownMasteryLevel(s.to_string())),
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Novice => 0,
            Self::Competent => 1,
            Self::Proficient => 2,
            Self::Expert => 3,
            Self::Master => 4,
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Novice => Some(Self::Competent),
            Self::Competent => Some(Self::Proficient),
            Self::Proficient => Some(Self::Expert),
            Self::Expert => Some(Self::Master),
            Self::Master => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Master)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCounters {
    pub questions_seen: u32,
    pub questions_correct: u32,
}

impl LevelCounters {
    pub fn record(&mut self, correct: bool) {
        self.questions_seen += 1;
        if correct {
            self.questions_correct += 1;
        }
    }
}

/// Per-level answer counters, one named slot per mastery level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub novice: LevelCounters,
    pub competent: LevelCounters,
    pub proficient: LevelCounters,
    pub expert: LevelCounters,
    pub master: LevelCounters,
}

impl LevelProgress {
    pub fn get(&self, level: MasteryLevel) -> &LevelCounters {
        match level {
            MasteryLevel::Novice => &self.novice,
            MasteryLevel::Competent => &self.competent,
            MasteryLevel::Proficient => &self.proficient,
            MasteryLevel::Expert => &self.expert,
            MasteryLevel::Master => &self.master,
        }
    }

    pub fn get_mut(&mut self, level: MasteryLevel) -> &mut LevelCounters {
        match level {
            MasteryLevel::Novice => &mut self.novice,
            MasteryLevel::Competent => &mut self.competent,
            MasteryLevel::Proficient => &mut self.proficient,
            MasteryLevel::Expert => &mut self.expert,
            MasteryLevel::Master => &mut self.master,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    pub user_id: String,
    pub topic_id: TopicId,
    pub current_level: MasteryLevel,
    pub levels: LevelProgress,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub proficiency_threshold_met: bool,
    pub last_expanded_level: Option<MasteryLevel>,
    pub updated_at: DateTime<Utc>,
}

impl MasteryRecord {
    pub fn new(user_id: &str, topic_id: TopicId) -> Self {
        Self {
            user_id: user_id.to_string(),
            topic_id,
            current_level: MasteryLevel::Novice,
            levels: LevelProgress::default(),
            questions_answered: 0,
            correct_answers: 0,
            is_unlocked: false,
            unlocked_at: None,
            proficiency_threshold_met: false,
            last_expanded_level: None,
            updated_at: Utc::now(),
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.questions_answered == 0 {
            0.0
        } else {
            self.correct_answers as f64 / self.questions_answered as f64
        }
    }
}

/// How an interest was learned. Ordered so that upgrades are `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceType {
    #[default]
    Inferred,
    Implicit,
    Explicit,
}

impl PreferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inferred => "inferred",
            Self::Implicit => "implicit",
            Self::Explicit => "explicit",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "explicit" => Self::Explicit,
            "implicit" => Self::Implicit,
            _ => Self::Inferred,
        }
    }

    pub fn upgrade(self, to: Self) -> Self {
        self.max(to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestRecord {
    pub user_id: String,
    pub topic_id: TopicId,
    pub interest_score: f64,
    pub interaction_count: u32,
    pub time_spent: f64,
    pub preference_type: PreferenceType,
    pub updated_at: DateTime<Utc>,
}

impl InterestRecord {
    pub fn new(user_id: &str, topic_id: TopicId, initial_score: f64) -> Self {
        Self {
            user_id: user_id.to_string(),
            topic_id,
            interest_score: initial_score.clamp(0.0, 1.0),
            interaction_count: 0,
            time_spent: 0.0,
            preference_type: PreferenceType::Inferred,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockTrigger {
    Root,
    Proficiency,
    ProficiencyGenerated,
    Interest,
    UserRequest,
}

impl UnlockTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Proficiency => "proficiency",
            Self::ProficiencyGenerated => "proficiency_generated",
            Self::Interest => "interest",
            Self::UserRequest => "user_request",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "root" => Some(Self::Root),
            "proficiency" => Some(Self::Proficiency),
            "proficiency_generated" => Some(Self::ProficiencyGenerated),
            "interest" => Some(Self::Interest),
            "user_request" => Some(Self::UserRequest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockEvent {
    pub user_id: String,
    pub parent_topic_id: Option<TopicId>,
    pub unlocked_topic_id: TopicId,
    pub trigger: UnlockTrigger,
    pub created_at: DateTime<Utc>,
}

impl UnlockEvent {
    pub fn new(
        user_id: &str,
        parent_topic_id: Option<TopicId>,
        unlocked_topic_id: TopicId,
        trigger: UnlockTrigger,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            parent_topic_id,
            unlocked_topic_id,
            trigger,
            created_at: Utc::now(),
        }
    }
}

/// Which expansion a caller is claiming for a (user, topic) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ExpansionClaim {
    First,
    Progressive {
        level: MasteryLevel,
        previous: Option<MasteryLevel>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSubtopic {
    pub name: String,
    pub description: String,
    pub difficulty_min: i32,
    pub difficulty_max: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: String,
    pub difficulty: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    pub topic_id: TopicId,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: String,
    pub difficulty: i32,
    pub generated: bool,
    pub created_at: DateTime<Utc>,
}

impl Question {
    /// Accepts the option text (case and surrounding whitespace ignored) or
    /// the zero-based index of the correct option.
    pub fn is_correct(&self, answer: &str) -> bool {
        let answer = answer.trim();
        if answer.eq_ignore_ascii_case(self.correct_answer.trim()) {
            return true;
        }
        match answer.parse::<usize>() {
            Ok(idx) => self
                .options
                .get(idx)
                .is_some_and(|opt| opt.trim().eq_ignore_ascii_case(self.correct_answer.trim())),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementAction {
    Answer,
    TeachMe,
    Skip,
    RepeatTopic,
    DifficultyIncrease,
    DifficultyDecrease,
}

impl EngagementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::TeachMe => "teach_me",
            Self::Skip => "skip",
            Self::RepeatTopic => "repeat_topic",
            Self::DifficultyIncrease => "difficulty_increase",
            Self::DifficultyDecrease => "difficulty_decrease",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "answer" => Some(Self::Answer),
            "teach_me" => Some(Self::TeachMe),
            "skip" => Some(Self::Skip),
            "repeat_topic" => Some(Self::RepeatTopic),
            "difficulty_increase" => Some(Self::DifficultyIncrease),
            "difficulty_decrease" => Some(Self::DifficultyDecrease),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub user_id: String,
    pub topic_id: TopicId,
    pub question_id: Option<QuestionId>,
    pub action: EngagementAction,
    pub is_correct: Option<bool>,
    pub time_spent: f64,
    pub difficulty: Option<i32>,
    pub created_at: DateTime<Utc>,
}
