pub mod content_generator;
pub mod llm_provider;
pub mod question_pool;

pub use content_generator::{
    ContentGenerator, GenerationReport, GeneratorError, LlmContentGenerator, QuestionRequest,
    SubtopicRequest, TemplateGenerator,
};
pub use llm_provider::{LLMConfig, LLMError, LLMProvider};
pub use question_pool::QuestionPool;
