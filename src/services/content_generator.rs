//! Content generation seam: candidate subtopics and single questions.
//!
//! Every generator call is bounded by a timeout and every payload is
//! shape-checked before the engine trusts it. Failures never escape as
//! errors from the wrapper functions; they become a [`GenerationReport`]
//! whose `ok`/`fallback_used`/`reason` fields make the fallback observable.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::adaptive::types::{CandidateSubtopic, QuestionDraft, Topic};
use crate::services::llm_provider::{LLMError, LLMProvider};

const MAX_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 500;
const OPTION_COUNT: usize = 4;

const FALLBACK_PATTERNS: [&str; 8] = [
    "Fundamentals of {}",
    "Advanced {}",
    "Applications of {}",
    "{} Algorithms",
    "{} Best Practices",
    "{} Case Studies",
    "Modern {}",
    "{} Tools and Techniques",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtopicRequest {
    pub parent: Topic,
    /// Depth of the parent; roots are 0.
    pub depth: usize,
    pub count: usize,
    pub existing_children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    pub topic: Topic,
    pub difficulty: i32,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("LLM error: {0}")]
    Llm(#[from] LLMError),
    #[error("malformed output: {0}")]
    Malformed(String),
    #[error("generator timed out after {0:?}")]
    Timeout(Duration),
    #[error("generator unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_subtopics(
        &self,
        request: &SubtopicRequest,
    ) -> Result<Vec<CandidateSubtopic>, GeneratorError>;

    async fn generate_question(
        &self,
        request: &QuestionRequest,
    ) -> Result<QuestionDraft, GeneratorError>;
}

/// Outcome of a guarded generator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport<T> {
    pub value: T,
    pub ok: bool,
    pub fallback_used: bool,
    pub reason: Option<String>,
}

impl<T> GenerationReport<T> {
    fn success(value: T) -> Self {
        Self { value, ok: true, fallback_used: false, reason: None }
    }

    fn failure(value: T, fallback_used: bool, reason: String) -> Self {
        Self { value, ok: false, fallback_used, reason: Some(reason) }
    }
}

/// Requests subtopics and sanitizes them. On failure the value is empty
/// and no topics are invented.
pub async fn subtopics_with_timeout(
    generator: &dyn ContentGenerator,
    request: &SubtopicRequest,
    timeout: Duration,
) -> GenerationReport<Vec<CandidateSubtopic>> {
    let raw = match tokio::time::timeout(timeout, generator.generate_subtopics(request)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(err)) => {
            warn!(generator = generator.name(), parent = %request.parent.name, error = %err, "subtopic generation failed");
            return GenerationReport::failure(Vec::new(), false, err.to_string());
        }
        Err(_) => {
            let err = GeneratorError::Timeout(timeout);
            warn!(generator = generator.name(), parent = %request.parent.name, error = %err, "subtopic generation timed out");
            return GenerationReport::failure(Vec::new(), false, err.to_string());
        }
    };

    let sanitized = sanitize_subtopics(&request.parent, raw);
    if sanitized.is_empty() {
        warn!(generator = generator.name(), parent = %request.parent.name, "generator returned no usable subtopics");
        return GenerationReport::failure(sanitized, false, "no usable subtopics".to_string());
    }
    GenerationReport::success(sanitized)
}

/// Generates and shape-checks a single question without any fallback.
pub async fn checked_question(
    generator: &dyn ContentGenerator,
    request: &QuestionRequest,
    timeout: Duration,
) -> Result<QuestionDraft, GeneratorError> {
    let draft = tokio::time::timeout(timeout, generator.generate_question(request))
        .await
        .map_err(|_| GeneratorError::Timeout(timeout))??;
    validate_question(draft, request.difficulty)
}

/// Generates a question, substituting the deterministic template when the
/// generator fails, times out, or returns an invalid shape.
pub async fn question_with_fallback(
    generator: &dyn ContentGenerator,
    request: &QuestionRequest,
    timeout: Duration,
) -> GenerationReport<QuestionDraft> {
    match checked_question(generator, request, timeout).await {
        Ok(draft) => GenerationReport::success(draft),
        Err(err) => {
            warn!(
                generator = generator.name(),
                topic = %request.topic.name,
                difficulty = request.difficulty,
                error = %err,
                "question generation failed, using template"
            );
            GenerationReport::failure(
                template_question(&request.topic, request.difficulty),
                true,
                err.to_string(),
            )
        }
    }
}

/// Trims, truncates and clamps generated subtopics against the parent's
/// difficulty range. Nameless entries are dropped.
pub fn sanitize_subtopics(parent: &Topic, raw: Vec<CandidateSubtopic>) -> Vec<CandidateSubtopic> {
    raw.into_iter()
        .filter_map(|c| {
            let name = c.name.trim();
            if name.is_empty() {
                return None;
            }
            let difficulty_min = c.difficulty_min.clamp(1, 10).max(parent.difficulty_min).min(10);
            let difficulty_max = c
                .difficulty_max
                .clamp(1, 10)
                .min(parent.difficulty_max + 2)
                .max(difficulty_min);
            Some(CandidateSubtopic {
                name: truncate_chars(name, MAX_NAME_CHARS),
                description: truncate_chars(c.description.trim(), MAX_DESCRIPTION_CHARS),
                difficulty_min,
                difficulty_max,
            })
        })
        .collect()
}

/// Requires a prompt and exactly four options containing the correct
/// answer. Letter answers `A`..`D` resolve to the option text.
pub fn validate_question(draft: QuestionDraft, difficulty: i32) -> Result<QuestionDraft, GeneratorError> {
    let prompt = draft.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(GeneratorError::Malformed("empty question prompt".into()));
    }

    let mut options: Vec<String> = draft
        .options
        .iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    options.truncate(OPTION_COUNT);
    if options.len() < OPTION_COUNT {
        return Err(GeneratorError::Malformed(format!(
            "expected {OPTION_COUNT} options, got {}",
            options.len()
        )));
    }

    let answer = draft.correct_answer.trim();
    let correct_answer = resolve_letter(answer, &options)
        .or_else(|| options.iter().find(|o| o.eq_ignore_ascii_case(answer)).cloned())
        .ok_or_else(|| {
            GeneratorError::Malformed(format!("correct answer {answer:?} is not one of the options"))
        })?;

    Ok(QuestionDraft {
        prompt,
        options,
        correct_answer,
        explanation: draft.explanation.trim().to_string(),
        difficulty: difficulty.clamp(1, 10),
    })
}

fn resolve_letter(answer: &str, options: &[String]) -> Option<String> {
    let mut chars = answer.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let rest = chars.as_str().trim_start_matches([')', '.', ':']).trim();
    if !rest.is_empty() || !('A'..='D').contains(&letter) {
        return None;
    }
    options.get((letter as u8 - b'A') as usize).cloned()
}

/// Slice from the first `{` or `[` to the last `}` or `]`.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    (end > start).then(|| &text[start..=end])
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

/// Deterministic question for `topic`, tiered by difficulty.
pub fn template_question(topic: &Topic, difficulty: i32) -> QuestionDraft {
    let name = topic.name.as_str();
    let difficulty = difficulty.clamp(1, 10);
    let (prompt, options, explanation) = if difficulty <= 3 {
        (
            format!("Which statement best describes {name}?"),
            [
                format!("{name} is a field of study with its own core concepts"),
                format!("{name} is a single software product"),
                format!("{name} is a hardware standard"),
                format!("{name} is a programming language keyword"),
            ],
            "This is a basic definition question to test fundamental understanding.",
        )
    } else if difficulty <= 7 {
        (
            format!("What is usually the first step when applying {name} to a new problem?"),
            [
                "Understand the problem and its constraints".to_string(),
                "Pick the most complex technique available".to_string(),
                "Skip evaluation entirely".to_string(),
                "Ignore the available data".to_string(),
            ],
            "Practical application starts from a clear understanding of the problem.",
        )
    } else {
        (
            format!("Which consideration matters most when scaling {name} techniques?"),
            [
                "The trade-off between cost and quality".to_string(),
                "The colour scheme of the tooling".to_string(),
                "The number of characters in the topic name".to_string(),
                "None, scaling never changes behaviour".to_string(),
            ],
            "Advanced understanding includes reasoning about trade-offs at scale.",
        )
    };

    let correct_answer = options[0].clone();
    QuestionDraft {
        prompt,
        options: options.into_iter().collect(),
        correct_answer,
        explanation: explanation.to_string(),
        difficulty,
    }
}

/// Pattern-based subtopics for `parent`.
pub fn template_subtopics(parent: &Topic, count: usize) -> Vec<CandidateSubtopic> {
    FALLBACK_PATTERNS
        .iter()
        .take(count)
        .map(|pattern| {
            let name = pattern.replace("{}", &parent.name);
            CandidateSubtopic {
                description: format!("Explore key concepts and techniques in {}", name.to_lowercase()),
                name,
                difficulty_min: parent.difficulty_min,
                difficulty_max: (parent.difficulty_max + 1).min(10),
            }
        })
        .collect()
}

/// Offline generator built from fixed patterns and templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate_subtopics(
        &self,
        request: &SubtopicRequest,
    ) -> Result<Vec<CandidateSubtopic>, GeneratorError> {
        Ok(template_subtopics(&request.parent, request.count))
    }

    async fn generate_question(
        &self,
        request: &QuestionRequest,
    ) -> Result<QuestionDraft, GeneratorError> {
        Ok(template_question(&request.topic, request.difficulty))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSubtopics {
    List(Vec<RawSubtopic>),
    Wrapped { subtopics: Vec<RawSubtopic> },
}

#[derive(Debug, Deserialize)]
struct RawSubtopic {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_min", alias = "difficultyMin")]
    difficulty_min: i32,
    #[serde(default = "default_max", alias = "difficultyMax")]
    difficulty_max: i32,
}

fn default_min() -> i32 {
    1
}

fn default_max() -> i32 {
    10
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(alias = "prompt")]
    question: String,
    options: Vec<String>,
    #[serde(alias = "correctAnswer")]
    correct_answer: String,
    #[serde(default)]
    explanation: String,
}

/// Generator backed by an OpenAI-compatible chat model.
#[derive(Clone)]
pub struct LlmContentGenerator {
    provider: LLMProvider,
}

impl LlmContentGenerator {
    pub fn new(provider: LLMProvider) -> Self {
        Self { provider }
    }

    fn ensure_available(&self) -> Result<(), GeneratorError> {
        if self.provider.is_available() {
            Ok(())
        } else {
            Err(GeneratorError::Unavailable("LLM provider is not configured".into()))
        }
    }
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    fn name(&self) -> &str {
        self.provider.model()
    }

    async fn generate_subtopics(
        &self,
        request: &SubtopicRequest,
    ) -> Result<Vec<CandidateSubtopic>, GeneratorError> {
        self.ensure_available()?;
        let parent = &request.parent;
        let existing = if request.existing_children.is_empty() {
            "none".to_string()
        } else {
            request.existing_children.join(", ")
        };
        let system = "You design learning curricula. Subtopics must be mutually exclusive, \
                      collectively exhaustive, and at a similar level of abstraction. \
                      Respond with a JSON array only.";
        let user = format!(
            "Parent topic: {name}\nDescription: {description}\nDifficulty range: {min}-{max}\n\
             Tree depth: {depth}\nExisting subtopics: {existing}\n\n\
             Propose {count} new subtopics as a JSON array of objects with fields \
             \"name\", \"description\", \"difficulty_min\", \"difficulty_max\" (1-10).",
            name = parent.name,
            description = parent.description,
            min = parent.difficulty_min,
            max = parent.difficulty_max,
            depth = request.depth,
            count = request.count,
        );

        let text = self.provider.complete(system, &user).await?;
        let json = extract_json(&text)
            .ok_or_else(|| GeneratorError::Malformed("no JSON in subtopic response".into()))?;
        let raw: RawSubtopics = serde_json::from_str(json)
            .map_err(|e| GeneratorError::Malformed(format!("subtopic JSON: {e}")))?;
        let list = match raw {
            RawSubtopics::List(list) | RawSubtopics::Wrapped { subtopics: list } => list,
        };

        Ok(list
            .into_iter()
            .take(request.count.max(1))
            .map(|r| CandidateSubtopic {
                name: r.name,
                description: r.description,
                difficulty_min: r.difficulty_min,
                difficulty_max: r.difficulty_max,
            })
            .collect())
    }

    async fn generate_question(
        &self,
        request: &QuestionRequest,
    ) -> Result<QuestionDraft, GeneratorError> {
        self.ensure_available()?;
        let system = "You write multiple-choice quiz questions. Respond with a single JSON object only.";
        let user = format!(
            "Topic: {name}\nDescription: {description}\nDifficulty: {difficulty}/10\n\n\
             Write one question as a JSON object with fields \"question\", \"options\" \
             (exactly 4 strings), \"correct_answer\" (the exact text of one option) and \
             \"explanation\".",
            name = request.topic.name,
            description = request.topic.description,
            difficulty = request.difficulty,
        );

        let text = self.provider.complete(system, &user).await?;
        let json = extract_json(&text)
            .ok_or_else(|| GeneratorError::Malformed("no JSON in question response".into()))?;
        let raw: RawQuestion = serde_json::from_str(json)
            .map_err(|e| GeneratorError::Malformed(format!("question JSON: {e}")))?;

        Ok(QuestionDraft {
            prompt: raw.question,
            options: raw.options,
            correct_answer: raw.correct_answer,
            explanation: raw.explanation,
            difficulty: request.difficulty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn parent() -> Topic {
        Topic {
            id: 1,
            name: "Machine Learning".into(),
            description: "Learning from data".into(),
            parent_id: None,
            difficulty_min: 3,
            difficulty_max: 6,
            created_at: Utc::now(),
        }
    }

    fn draft(options: &[&str], answer: &str) -> QuestionDraft {
        QuestionDraft {
            prompt: "What?".into(),
            options: options.iter().map(|s| s.to_string()).collect(),
            correct_answer: answer.into(),
            explanation: String::new(),
            difficulty: 5,
        }
    }

    struct Failing;

    #[async_trait]
    impl ContentGenerator for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate_subtopics(
            &self,
            _request: &SubtopicRequest,
        ) -> Result<Vec<CandidateSubtopic>, GeneratorError> {
            Err(GeneratorError::Unavailable("down".into()))
        }

        async fn generate_question(
            &self,
            _request: &QuestionRequest,
        ) -> Result<QuestionDraft, GeneratorError> {
            Err(GeneratorError::Malformed("garbage".into()))
        }
    }

    struct Slow;

    #[async_trait]
    impl ContentGenerator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate_subtopics(
            &self,
            _request: &SubtopicRequest,
        ) -> Result<Vec<CandidateSubtopic>, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn generate_question(
            &self,
            request: &QuestionRequest,
        ) -> Result<QuestionDraft, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(template_question(&request.topic, request.difficulty))
        }
    }

    #[test]
    fn test_sanitize_clamps_to_parent_range() {
        let raw = vec![
            CandidateSubtopic {
                name: "  Regression ".into(),
                description: "d".into(),
                difficulty_min: 1,
                difficulty_max: 10,
            },
            CandidateSubtopic {
                name: "   ".into(),
                description: "d".into(),
                difficulty_min: 1,
                difficulty_max: 2,
            },
            CandidateSubtopic {
                name: "x".repeat(150),
                description: "y".repeat(600),
                difficulty_min: 9,
                difficulty_max: 4,
            },
        ];
        let out = sanitize_subtopics(&parent(), raw);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "Regression");
        assert_eq!((out[0].difficulty_min, out[0].difficulty_max), (3, 8));
        assert_eq!(out[1].name.chars().count(), 100);
        assert!(out[1].name.ends_with("..."));
        assert_eq!(out[1].description.chars().count(), 500);
        assert_eq!((out[1].difficulty_min, out[1].difficulty_max), (9, 9));
    }

    #[test]
    fn test_validate_question_resolves_letters() {
        let q = validate_question(draft(&["a", "b", "c", "d", "e"], "C"), 12).unwrap();
        assert_eq!(q.options.len(), 4);
        assert_eq!(q.correct_answer, "c");
        assert_eq!(q.difficulty, 10);

        let q = validate_question(draft(&["Alpha", "Beta", "Gamma", "Delta"], "beta"), 3).unwrap();
        assert_eq!(q.correct_answer, "Beta");

        let q = validate_question(draft(&["Alpha", "Beta", "Gamma", "Delta"], "b)"), 3).unwrap();
        assert_eq!(q.correct_answer, "Beta");
    }

    #[test]
    fn test_validate_question_rejects_bad_shapes() {
        assert!(validate_question(draft(&["a", "b", "c"], "a"), 5).is_err());
        assert!(validate_question(draft(&["a", "b", "c", "d"], "z"), 5).is_err());
        let mut empty = draft(&["a", "b", "c", "d"], "a");
        empty.prompt = "  ".into();
        assert!(validate_question(empty, 5).is_err());
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("Sure! {\"a\": 1} done"), Some("{\"a\": 1}"));
        assert_eq!(extract_json("```json\n[1, 2]\n```"), Some("[1, 2]"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_template_question_tiers() {
        let topic = parent();
        let easy = template_question(&topic, 2);
        let medium = template_question(&topic, 5);
        let hard = template_question(&topic, 9);
        assert_ne!(easy.prompt, medium.prompt);
        assert_ne!(medium.prompt, hard.prompt);
        for q in [easy, medium, hard] {
            assert_eq!(q.options.len(), 4);
            assert!(q.options.contains(&q.correct_answer));
            assert!(validate_question(q.clone(), q.difficulty).is_ok());
        }
    }

    #[test]
    fn test_template_subtopics() {
        let subs = template_subtopics(&parent(), 3);
        let names: Vec<&str> = subs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Fundamentals of Machine Learning", "Advanced Machine Learning", "Applications of Machine Learning"]
        );
        assert_eq!(subs[0].difficulty_max, 7);
    }

    #[tokio::test]
    async fn test_question_fallback_reports_reason() {
        let request = QuestionRequest { topic: parent(), difficulty: 5 };
        let report = question_with_fallback(&Failing, &request, Duration::from_secs(1)).await;
        assert!(!report.ok);
        assert!(report.fallback_used);
        assert!(report.reason.unwrap().contains("garbage"));
        assert_eq!(report.value.options.len(), 4);
    }

    #[tokio::test]
    async fn test_timeouts_become_reports() {
        let request = QuestionRequest { topic: parent(), difficulty: 5 };
        let report = question_with_fallback(&Slow, &request, Duration::from_millis(20)).await;
        assert!(report.fallback_used);
        assert!(report.reason.unwrap().contains("timed out"));

        let sub_request = SubtopicRequest {
            parent: parent(),
            depth: 0,
            count: 5,
            existing_children: Vec::new(),
        };
        let report = subtopics_with_timeout(&Slow, &sub_request, Duration::from_millis(20)).await;
        assert!(!report.ok);
        assert!(!report.fallback_used);
        assert!(report.value.is_empty());
    }

    #[tokio::test]
    async fn test_template_generator_succeeds() {
        let request = SubtopicRequest {
            parent: parent(),
            depth: 1,
            count: 4,
            existing_children: Vec::new(),
        };
        let report = subtopics_with_timeout(&TemplateGenerator, &request, Duration::from_secs(1)).await;
        assert!(report.ok);
        assert_eq!(report.value.len(), 4);
    }
}
