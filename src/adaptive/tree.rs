use std::collections::{BTreeMap, HashMap, HashSet};

use crate::adaptive::types::{Topic, TopicId};
use crate::adaptive::EngineError;

/// Read-only snapshot of the topic forest with parent/child indexes.
#[derive(Debug, Clone, Default)]
pub struct TopicTree {
    topics: HashMap<TopicId, Topic>,
    children: BTreeMap<Option<TopicId>, Vec<TopicId>>,
}

impl TopicTree {
    pub fn new(topics: Vec<Topic>) -> Self {
        let mut children: BTreeMap<Option<TopicId>, Vec<TopicId>> = BTreeMap::new();
        for topic in &topics {
            children.entry(topic.parent_id).or_default().push(topic.id);
        }
        for ids in children.values_mut() {
            ids.sort_unstable();
        }
        let topics = topics.into_iter().map(|t| (t.id, t)).collect();
        Self { topics, children }
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn get(&self, id: TopicId) -> Option<&Topic> {
        self.topics.get(&id)
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.values()
    }

    /// Topics sorted by id.
    pub fn sorted(&self) -> Vec<&Topic> {
        let mut all: Vec<&Topic> = self.topics.values().collect();
        all.sort_by_key(|t| t.id);
        all
    }

    pub fn roots(&self) -> Vec<&Topic> {
        self.ids_under(None)
    }

    pub fn children(&self, id: TopicId) -> Vec<&Topic> {
        self.ids_under(Some(id))
    }

    pub fn parent(&self, id: TopicId) -> Option<&Topic> {
        self.topics.get(&id)?.parent_id.and_then(|p| self.topics.get(&p))
    }

    pub fn siblings(&self, id: TopicId) -> Vec<&Topic> {
        let Some(topic) = self.topics.get(&id) else {
            return Vec::new();
        };
        self.ids_under(topic.parent_id)
            .into_iter()
            .filter(|t| t.id != id)
            .collect()
    }

    /// Number of edges between the topic and its root. Fails on a parent cycle.
    pub fn depth(&self, id: TopicId) -> Result<usize, EngineError> {
        Ok(self.ancestors(id)?.len())
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self, id: TopicId) -> Result<Vec<TopicId>, EngineError> {
        let mut topic = self.topics.get(&id).ok_or(EngineError::UnknownTopic(id))?;
        let mut seen = HashSet::from([id]);
        let mut chain = Vec::new();
        while let Some(parent_id) = topic.parent_id {
            if !seen.insert(parent_id) {
                return Err(EngineError::CyclicTopic(id));
            }
            chain.push(parent_id);
            match self.topics.get(&parent_id) {
                Some(parent) => topic = parent,
                None => break,
            }
        }
        Ok(chain)
    }

    /// All descendants of `id` (excluding itself), breadth first.
    pub fn descendants(&self, id: TopicId) -> Vec<TopicId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for child in self.children(current) {
                if seen.insert(child.id) {
                    out.push(child.id);
                    frontier.push(child.id);
                }
            }
        }
        out.sort_unstable();
        out
    }

    fn ids_under(&self, parent: Option<TopicId>) -> Vec<&Topic> {
        self.children
            .get(&parent)
            .map(|ids| ids.iter().filter_map(|id| self.topics.get(id)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;

    pub(crate) fn topic(id: TopicId, name: &str, parent: Option<TopicId>) -> Topic {
        Topic {
            id,
            name: name.to_string(),
            description: String::new(),
            parent_id: parent,
            difficulty_min: 1,
            difficulty_max: 10,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_depth_and_relations() {
        let tree = TopicTree::new(vec![
            topic(1, "Root", None),
            topic(2, "A", Some(1)),
            topic(3, "B", Some(1)),
            topic(4, "A1", Some(2)),
        ]);
        assert_eq!(tree.depth(1).unwrap(), 0);
        assert_eq!(tree.depth(4).unwrap(), 2);
        assert_eq!(tree.parent(4).map(|t| t.id), Some(2));
        assert_eq!(tree.siblings(2).iter().map(|t| t.id).collect::<Vec<_>>(), vec![3]);
        assert_eq!(tree.children(1).len(), 2);
        assert_eq!(tree.descendants(1), vec![2, 3, 4]);
    }

    #[test]
    fn test_cycle_is_detected() {
        let tree = TopicTree::new(vec![topic(1, "A", Some(2)), topic(2, "B", Some(1))]);
        assert!(matches!(tree.depth(1), Err(EngineError::CyclicTopic(1))));
    }

    #[test]
    fn test_unknown_topic() {
        let tree = TopicTree::new(vec![topic(1, "Root", None)]);
        assert!(matches!(tree.depth(9), Err(EngineError::UnknownTopic(9))));
    }
}
