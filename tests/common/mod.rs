#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use relevia_backend_rust::adaptive::types::{
    CandidateSubtopic, MasteryRecord, NewTopic, QuestionDraft, Topic,
};
use relevia_backend_rust::adaptive::{AdaptiveConfig, AdaptiveEngine};
use relevia_backend_rust::db::{MemoryStore, Store};
use relevia_backend_rust::services::{
    ContentGenerator, GeneratorError, QuestionRequest, SubtopicRequest,
};

pub const ROOT_NAME: &str = "Artificial Intelligence";
pub const CORRECT: &str = "The right one";

/// Generator with queued subtopic batches and a fixed question shape.
#[derive(Default)]
pub struct ScriptedGenerator {
    batches: Mutex<VecDeque<Vec<String>>>,
    fail_questions: bool,
    pub subtopic_calls: AtomicUsize,
    pub question_calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn with_batches(batches: &[&[&str]]) -> Self {
        Self {
            batches: Mutex::new(
                batches
                    .iter()
                    .map(|b| b.iter().map(|s| s.to_string()).collect())
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// Every call fails.
    pub fn offline() -> Self {
        Self {
            fail_questions: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_subtopics(
        &self,
        request: &SubtopicRequest,
    ) -> Result<Vec<CandidateSubtopic>, GeneratorError> {
        self.subtopic_calls.fetch_add(1, Ordering::SeqCst);
        let batch = self
            .batches
            .lock()
            .pop_front()
            .ok_or_else(|| GeneratorError::Unavailable("no scripted batch left".into()))?;
        Ok(batch
            .into_iter()
            .map(|name| CandidateSubtopic {
                description: format!("{name} within {}", request.parent.name),
                name,
                difficulty_min: request.parent.difficulty_min,
                difficulty_max: (request.parent.difficulty_max + 1).min(10),
            })
            .collect())
    }

    async fn generate_question(
        &self,
        request: &QuestionRequest,
    ) -> Result<QuestionDraft, GeneratorError> {
        let n = self.question_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_questions {
            return Err(GeneratorError::Unavailable("offline".into()));
        }
        Ok(QuestionDraft {
            prompt: format!("Question {n} about {}?", request.topic.name),
            options: vec![
                CORRECT.to_string(),
                "A wrong one".to_string(),
                "Another wrong one".to_string(),
                "Not this one".to_string(),
            ],
            correct_answer: "A".to_string(),
            explanation: "Scripted.".to_string(),
            difficulty: request.difficulty,
        })
    }
}

pub const AI_CHILDREN: &[&str] = &["Machine Learning", "Computer Vision", "Robotics"];

pub fn inline_config() -> AdaptiveConfig {
    let mut config = AdaptiveConfig::default();
    config.expansion.background = false;
    config
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub engine: AdaptiveEngine,
    pub root: Topic,
}

pub async fn harness(generator: ScriptedGenerator) -> Harness {
    harness_with(generator, inline_config()).await
}

pub async fn harness_with(generator: ScriptedGenerator, config: AdaptiveConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(generator);
    let engine = AdaptiveEngine::new(store.clone(), generator.clone(), config);
    let root = engine
        .bootstrap_root(NewTopic::root(ROOT_NAME, "Root of the tree"))
        .await
        .expect("bootstrap root");
    Harness {
        store,
        generator,
        engine,
        root,
    }
}

pub fn draft(difficulty: i32) -> QuestionDraft {
    QuestionDraft {
        prompt: "Which option is right?".to_string(),
        options: vec![
            CORRECT.to_string(),
            "A wrong one".to_string(),
            "Another wrong one".to_string(),
            "Not this one".to_string(),
        ],
        correct_answer: CORRECT.to_string(),
        explanation: String::new(),
        difficulty,
    }
}

/// Mastery record with the given totals, all counted at novice.
pub async fn seed_mastery(store: &dyn Store, user_id: &str, topic: &Topic, answered: u32, correct: u32) {
    let mut record = MasteryRecord::new(user_id, topic.id);
    record.questions_answered = answered;
    record.correct_answers = correct;
    record.levels.novice.questions_seen = answered;
    record.levels.novice.questions_correct = correct;
    store
        .update_mastery_progress(&record)
        .await
        .expect("seed mastery");
}
