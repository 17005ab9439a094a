use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::adaptive::selector::Selection;
use crate::adaptive::types::{Question, TopicId};

struct Pooled {
    questions: VecDeque<Question>,
    touched_at: Instant,
}

struct Prefetched {
    selection: Selection,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub pools: usize,
    pub pooled_questions: usize,
    pub prefetched: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionStats {
    pub pools: usize,
    pub prefetched: usize,
}

/// Session-scoped question cache.
///
/// Pools are keyed by (session, topic) and the prefetched next selection by
/// session, so concurrent sessions never see each other's entries. Reads
/// remove what they return. Ended sessions are remembered for one TTL so
/// background units that finish late cannot repopulate them.
pub struct QuestionPool {
    ttl: Duration,
    pools: Mutex<HashMap<(String, TopicId), Pooled>>,
    prefetch: Mutex<HashMap<String, Prefetched>>,
    ended: Mutex<HashMap<String, Instant>>,
}

impl QuestionPool {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pools: Mutex::new(HashMap::new()),
            prefetch: Mutex::new(HashMap::new()),
            ended: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_ended(&self, session_id: &str) -> bool {
        self.ended.lock().contains_key(session_id)
    }

    pub fn push_questions(&self, session_id: &str, topic_id: TopicId, questions: Vec<Question>) {
        if questions.is_empty() {
            return;
        }
        if self.is_ended(session_id) {
            debug!(session_id, dropped = questions.len(), "session ended, pool write dropped");
            return;
        }
        let mut pools = self.pools.lock();
        let entry = pools
            .entry((session_id.to_string(), topic_id))
            .or_insert_with(|| Pooled {
                questions: VecDeque::new(),
                touched_at: Instant::now(),
            });
        for q in questions {
            if !entry.questions.iter().any(|existing| existing.id == q.id) {
                entry.questions.push_back(q);
            }
        }
        entry.touched_at = Instant::now();
    }

    pub fn pop_question(&self, session_id: &str, topic_id: TopicId) -> Option<Question> {
        let key = (session_id.to_string(), topic_id);
        let mut pools = self.pools.lock();
        let entry = pools.get_mut(&key)?;
        if entry.touched_at.elapsed() >= self.ttl {
            pools.remove(&key);
            return None;
        }
        let question = entry.questions.pop_front();
        if entry.questions.is_empty() {
            pools.remove(&key);
        }
        question
    }

    pub fn pooled_len(&self, session_id: &str, topic_id: TopicId) -> usize {
        self.pools
            .lock()
            .get(&(session_id.to_string(), topic_id))
            .map_or(0, |p| p.questions.len())
    }

    /// Replaces any earlier prefetch for the session.
    pub fn store_prefetch(&self, session_id: &str, selection: Selection) {
        if self.is_ended(session_id) {
            debug!(session_id, "session ended, prefetch dropped");
            return;
        }
        self.prefetch.lock().insert(
            session_id.to_string(),
            Prefetched {
                selection,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn take_prefetch(&self, session_id: &str) -> Option<Selection> {
        let entry = self.prefetch.lock().remove(session_id)?;
        (entry.stored_at.elapsed() < self.ttl).then_some(entry.selection)
    }

    /// Drops everything that belongs to an ended session and refuses
    /// later writes for it.
    pub fn purge_session(&self, session_id: &str) -> usize {
        self.ended.lock().insert(session_id.to_string(), Instant::now());
        let mut removed = 0;
        {
            let mut pools = self.pools.lock();
            let before = pools.len();
            pools.retain(|(session, _), _| session != session_id);
            removed += before - pools.len();
        }
        if self.prefetch.lock().remove(session_id).is_some() {
            removed += 1;
        }
        removed
    }

    pub fn evict_expired(&self) -> EvictionStats {
        let ttl = self.ttl;
        let pools = {
            let mut pools = self.pools.lock();
            let before = pools.len();
            pools.retain(|_, p| p.touched_at.elapsed() < ttl);
            before - pools.len()
        };
        let prefetched = {
            let mut prefetch = self.prefetch.lock();
            let before = prefetch.len();
            prefetch.retain(|_, p| p.stored_at.elapsed() < ttl);
            before - prefetch.len()
        };
        self.ended.lock().retain(|_, at| at.elapsed() < ttl);
        EvictionStats { pools, prefetched }
    }

    pub fn stats(&self) -> PoolStats {
        let pools = self.pools.lock();
        PoolStats {
            pools: pools.len(),
            pooled_questions: pools.values().map(|p| p.questions.len()).sum(),
            prefetched: self.prefetch.lock().len(),
        }
    }
}
