pub mod config;
pub mod decision;
pub mod engine;
pub mod expansion;
pub mod interest;
pub mod mastery;
pub mod mece;
pub mod selector;
pub mod tree;
pub mod types;

use thiserror::Error;

use crate::db::StoreError;
use types::{QuestionId, TopicId};

pub use config::AdaptiveConfig;
pub use engine::AdaptiveEngine;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown topic: {0}")]
    UnknownTopic(TopicId),
    #[error("unknown question: {0}")]
    UnknownQuestion(QuestionId),
    #[error("cyclic parent reference at topic {0}")]
    CyclicTopic(TopicId),
    #[error(transparent)]
    Store(#[from] StoreError),
}
