//! Per (user, topic) mastery progression.
//!
//! Levels advance strictly in order once the correct-answer quota of the
//! current level is reached. The answer that completes a level is also
//! counted toward the level it unlocks. `master` is terminal.

use serde::{Deserialize, Serialize};

use crate::adaptive::config::MasteryConfig;
use crate::adaptive::types::{MasteryLevel, MasteryRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryTransition {
    pub previous: MasteryLevel,
    pub current: MasteryLevel,
    pub advanced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryStatus {
    pub level: MasteryLevel,
    pub next_level: Option<MasteryLevel>,
    pub progress_percent: f64,
    pub remaining_correct: u32,
    pub correct_at_level: u32,
    pub seen_at_level: u32,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub accuracy: f64,
    pub can_navigate_tree: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MasteryMachine {
    config: MasteryConfig,
}

impl MasteryMachine {
    pub fn new(config: MasteryConfig) -> Self {
        Self { config }
    }

    pub fn required_correct(&self, level: MasteryLevel) -> Option<u32> {
        if level.is_terminal() {
            return None;
        }
        self.config.required_for(level)
    }

    /// Applies one answer outcome. Advances at most one level per call.
    pub fn record_answer(&self, record: &mut MasteryRecord, correct: bool) -> MasteryTransition {
        let previous = record.current_level;

        record.questions_answered += 1;
        if correct {
            record.correct_answers += 1;
        }
        record.levels.get_mut(previous).record(correct);
        record.updated_at = chrono::Utc::now();

        let advanced = match (self.required_correct(previous), previous.next()) {
            (Some(required), Some(next))
                if record.levels.get(previous).questions_correct >= required =>
            {
                record.current_level = next;
                record.levels.get_mut(next).record(correct);
                tracing::debug!(
                    user_id = %record.user_id,
                    topic_id = record.topic_id,
                    from = previous.as_str(),
                    to = next.as_str(),
                    "mastery level advanced"
                );
                true
            }
            _ => false,
        };

        MasteryTransition {
            previous,
            current: record.current_level,
            advanced,
        }
    }

    pub fn status(&self, record: &MasteryRecord) -> MasteryStatus {
        let level = record.current_level;
        let counters = record.levels.get(level);
        let (progress_percent, remaining_correct) = match self.required_correct(level) {
            Some(required) if required > 0 => {
                let done = counters.questions_correct.min(required);
                (
                    done as f64 / required as f64 * 100.0,
                    required - done,
                )
            }
            _ => (100.0, 0),
        };

        MasteryStatus {
            level,
            next_level: level.next(),
            progress_percent,
            remaining_correct,
            correct_at_level: counters.questions_correct,
            seen_at_level: counters.questions_seen,
            questions_answered: record.questions_answered,
            correct_answers: record.correct_answers,
            accuracy: record.accuracy(),
            can_navigate_tree: can_navigate_tree(level),
        }
    }

    /// Skill in [0, 1]: completed levels plus the fraction of the current one.
    pub fn skill(&self, record: &MasteryRecord) -> f64 {
        let level = record.current_level;
        let fraction = match self.required_correct(level) {
            Some(required) if required > 0 => {
                (record.levels.get(level).questions_correct as f64 / required as f64).min(1.0)
            }
            _ => 0.0,
        };
        let top = MasteryLevel::Master.index() as f64;
        ((level.index() as f64 + fraction) / top).clamp(0.0, 1.0)
    }
}

/// The tree-navigation gate opens at the second level.
pub fn can_navigate_tree(level: MasteryLevel) -> bool {
    level >= MasteryLevel::Competent
}

/// Resolves a raw stored level. Unknown input maps to `novice` here, at the
/// boundary, never inside the machine.
pub fn resolve_level(raw: &str) -> MasteryLevel {
    match MasteryLevel::parse(raw) {
        Ok(level) => level,
        Err(err) => {
            tracing::warn!(error = %err, "resolving unknown mastery level to novice");
            MasteryLevel::Novice
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> MasteryMachine {
        MasteryMachine::new(MasteryConfig::default())
    }

    #[test]
    fn test_eighth_correct_answer_advances_and_carries_over() {
        let machine = machine();
        let mut record = MasteryRecord::new("u1", 1);
        for _ in 0..7 {
            let t = machine.record_answer(&mut record, true);
            assert!(!t.advanced);
        }
        assert_eq!(record.current_level, MasteryLevel::Novice);

        let t = machine.record_answer(&mut record, true);
        assert!(t.advanced);
        assert_eq!(t.previous, MasteryLevel::Novice);
        assert_eq!(record.current_level, MasteryLevel::Competent);
        assert_eq!(record.levels.novice.questions_correct, 8);
        assert_eq!(record.levels.competent.questions_seen, 1);
        assert_eq!(record.levels.competent.questions_correct, 1);
        assert_eq!(record.questions_answered, 8);
    }

    #[test]
    fn test_incorrect_answers_never_advance() {
        let machine = machine();
        let mut record = MasteryRecord::new("u1", 1);
        for _ in 0..50 {
            machine.record_answer(&mut record, false);
        }
        assert_eq!(record.current_level, MasteryLevel::Novice);
        assert_eq!(record.levels.novice.questions_seen, 50);
        assert_eq!(record.levels.novice.questions_correct, 0);
        assert_eq!(record.levels.competent, Default::default());
    }

    #[test]
    fn test_master_is_terminal() {
        let machine = machine();
        let mut record = MasteryRecord::new("u1", 1);
        record.current_level = MasteryLevel::Master;
        for _ in 0..100 {
            let t = machine.record_answer(&mut record, true);
            assert!(!t.advanced);
        }
        assert_eq!(record.current_level, MasteryLevel::Master);
        assert_eq!(record.levels.master.questions_correct, 100);
        let status = machine.status(&record);
        assert_eq!(status.remaining_correct, 0);
        assert_eq!(status.next_level, None);
    }

    #[test]
    fn test_one_level_per_answer_even_with_tiny_quota() {
        let machine = MasteryMachine::new(MasteryConfig {
            required_correct: [1, 1, 1, 1],
        });
        let mut record = MasteryRecord::new("u1", 1);
        let t = machine.record_answer(&mut record, true);
        assert_eq!(t.current, MasteryLevel::Competent);
        let t = machine.record_answer(&mut record, true);
        assert_eq!(t.current, MasteryLevel::Proficient);
    }

    #[test]
    fn test_status_progress() {
        let machine = machine();
        let mut record = MasteryRecord::new("u1", 1);
        for _ in 0..4 {
            machine.record_answer(&mut record, true);
        }
        machine.record_answer(&mut record, false);
        let status = machine.status(&record);
        assert_eq!(status.remaining_correct, 4);
        assert!((status.progress_percent - 50.0).abs() < 1e-9);
        assert!((status.accuracy - 0.8).abs() < 1e-9);
        assert!(!status.can_navigate_tree);
    }

    #[test]
    fn test_navigation_gate() {
        assert!(!can_navigate_tree(MasteryLevel::Novice));
        assert!(can_navigate_tree(MasteryLevel::Competent));
        assert!(can_navigate_tree(MasteryLevel::Master));
    }

    #[test]
    fn test_skill_is_monotonic_across_levels() {
        let machine = machine();
        let mut record = MasteryRecord::new("u1", 1);
        let mut last = machine.skill(&record);
        for _ in 0..60 {
            machine.record_answer(&mut record, true);
            let skill = machine.skill(&record);
            assert!(skill >= last);
            assert!((0.0..=1.0).contains(&skill));
            last = skill;
        }
    }

    #[test]
    fn test_resolve_level_fallback() {
        assert_eq!(resolve_level("expert"), MasteryLevel::Expert);
        assert_eq!(resolve_level("wizard"), MasteryLevel::Novice);
    }
}
