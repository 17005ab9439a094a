//! Structural checks for sibling topic sets: mutually exclusive and
//! collectively exhaustive.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::adaptive::config::MeceConfig;
use crate::adaptive::tree::TopicTree;
use crate::adaptive::types::{CandidateSubtopic, Topic, TopicId};

const STOP_WORDS: &[&str] = &[
    "of", "and", "the", "in", "for", "with", "to", "a", "an", "on", "at", "by",
];

const GENERIC_PATTERNS: &[&str] = &[
    "applications",
    "techniques",
    "methods",
    "approaches",
    "systems",
    "models",
    "algorithms",
    "concepts",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Violation {
    Duplicate {
        name: String,
    },
    ExistingSibling {
        name: String,
    },
    Subset {
        general: String,
        specific: String,
        fixed: bool,
    },
    HighOverlap {
        first: String,
        second: String,
        shared: usize,
        smaller: usize,
    },
    GenericSpecific {
        pattern: String,
        names: Vec<String>,
    },
    InconsistentAbstraction {
        name: String,
        too_specific: bool,
    },
    InsufficientCoverage {
        count: usize,
    },
    TooManySiblings {
        count: usize,
        max: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { name } => write!(f, "Duplicate removed: '{name}'"),
            Self::ExistingSibling { name } => {
                write!(f, "Already exists under this parent, removed: '{name}'")
            }
            Self::Subset {
                general,
                specific,
                fixed: true,
            } => write!(
                f,
                "Subset relationship fixed: kept '{general}', removed '{specific}'"
            ),
            Self::Subset {
                general,
                specific,
                fixed: false,
            } => write!(f, "Subset relationship: '{general}' and '{specific}'"),
            Self::HighOverlap {
                first,
                second,
                shared,
                smaller,
            } => write!(
                f,
                "High overlap ({shared}/{smaller} words): '{first}' and '{second}'"
            ),
            Self::GenericSpecific { pattern, names } => {
                write!(f, "Generic + specific pattern for '{pattern}': {names:?}")
            }
            Self::InconsistentAbstraction { name, too_specific } => {
                let level = if *too_specific { "too specific" } else { "too general" };
                write!(f, "Inconsistent abstraction: '{name}' is {level}")
            }
            Self::InsufficientCoverage { count } => write!(
                f,
                "Insufficient subtopics for comprehensive coverage ({count} left)"
            ),
            Self::TooManySiblings { count, max } => {
                write!(f, "Too many siblings: {count} exceeds maximum of {max}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeceReport {
    pub accepted: Vec<CandidateSubtopic>,
    pub violations: Vec<Violation>,
    pub rejected: bool,
}

impl MeceReport {
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeceValidator {
    config: MeceConfig,
}

impl MeceValidator {
    pub fn new(config: MeceConfig) -> Self {
        Self { config }
    }

    /// Validates a candidate batch proposed under `parent`. Candidates that
    /// repeat an existing child are dropped first. Violations are always
    /// reported, repaired or not.
    pub fn validate(
        &self,
        parent: &Topic,
        existing_children: &[Topic],
        candidates: Vec<CandidateSubtopic>,
        auto_fix: bool,
    ) -> MeceReport {
        let mut violations = Vec::new();

        let existing: HashSet<String> = existing_children
            .iter()
            .map(|t| normalize(&t.name))
            .collect();
        let candidates: Vec<CandidateSubtopic> = candidates
            .into_iter()
            .filter(|c| {
                let key = normalize(&c.name);
                if existing.contains(&key) || key == normalize(&parent.name) {
                    violations.push(Violation::ExistingSibling { name: c.name.clone() });
                    false
                } else {
                    true
                }
            })
            .collect();

        let mut cleaned = remove_duplicates(candidates, &mut violations);
        cleaned = self.check_subsets(cleaned, auto_fix, &mut violations);

        let names: Vec<&str> = cleaned.iter().map(|c| c.name.as_str()).collect();
        violations.extend(self.detect_high_overlap(&names));
        violations.extend(self.detect_generic_specific(&names));

        let mut rejected = false;
        if cleaned.len() < self.config.min_siblings {
            violations.push(Violation::InsufficientCoverage { count: cleaned.len() });
            rejected = true;
        }
        if cleaned.len() > self.config.max_siblings {
            violations.push(Violation::TooManySiblings {
                count: cleaned.len(),
                max: self.config.max_siblings,
            });
            rejected = true;
        }

        violations.extend(self.check_abstraction(&names));

        if !violations.is_empty() {
            tracing::debug!(
                parent = %parent.name,
                accepted = cleaned.len(),
                violations = violations.len(),
                rejected,
                "MECE validation reported violations"
            );
        }

        MeceReport {
            accepted: if rejected { Vec::new() } else { cleaned },
            violations,
            rejected,
        }
    }

    /// Report-only audit of every parent with at least two children.
    /// Keys are parent names.
    pub fn audit_tree(&self, tree: &TopicTree, root: Option<TopicId>) -> BTreeMap<String, Vec<Violation>> {
        let scope: Option<HashSet<TopicId>> = root.map(|r| {
            let mut ids: HashSet<TopicId> = tree.descendants(r).into_iter().collect();
            ids.insert(r);
            ids
        });

        let mut out = BTreeMap::new();
        for parent in tree.sorted() {
            if scope.as_ref().is_some_and(|s| !s.contains(&parent.id)) {
                continue;
            }
            let children = tree.children(parent.id);
            if children.len() < 2 {
                continue;
            }
            let candidates = children
                .iter()
                .map(|t| CandidateSubtopic {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    difficulty_min: t.difficulty_min,
                    difficulty_max: t.difficulty_max,
                })
                .collect();
            let report = self.validate(parent, &[], candidates, false);
            let violations: Vec<Violation> = report
                .violations
                .into_iter()
                .filter(|v| !matches!(v, Violation::TooManySiblings { .. }))
                .collect();
            if !violations.is_empty() {
                out.insert(parent.name.clone(), violations);
            }
        }
        out
    }

    fn check_subsets(
        &self,
        candidates: Vec<CandidateSubtopic>,
        auto_fix: bool,
        violations: &mut Vec<Violation>,
    ) -> Vec<CandidateSubtopic> {
        let tokens: Vec<HashSet<String>> = candidates.iter().map(|c| content_tokens(&c.name)).collect();
        let contains = |outer: usize, inner: usize| {
            !tokens[inner].is_empty() && tokens[inner].is_subset(&tokens[outer])
        };
        let mut removed = vec![false; candidates.len()];

        for i in 0..candidates.len() {
            if auto_fix && removed[i] {
                continue;
            }
            for j in (i + 1)..candidates.len() {
                if auto_fix && removed[j] {
                    continue;
                }
                let (general, specific) = if contains(j, i) {
                    (i, j)
                } else if contains(i, j) {
                    (j, i)
                } else {
                    continue;
                };
                violations.push(Violation::Subset {
                    general: candidates[general].name.clone(),
                    specific: candidates[specific].name.clone(),
                    fixed: auto_fix,
                });
                if auto_fix {
                    removed[specific] = true;
                    if specific == i {
                        break;
                    }
                }
            }
        }

        if !auto_fix {
            return candidates;
        }
        candidates
            .into_iter()
            .zip(removed)
            .filter_map(|(c, gone)| (!gone).then_some(c))
            .collect()
    }

    fn detect_high_overlap(&self, names: &[&str]) -> Vec<Violation> {
        let token_sets: Vec<HashSet<String>> = names.iter().map(|n| content_tokens(n)).collect();
        let mut out = Vec::new();
        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                let (a, b) = (&token_sets[i], &token_sets[j]);
                if a.is_empty() || b.is_empty() {
                    continue;
                }
                let shared = a.intersection(b).count();
                let smaller = a.len().min(b.len());
                if shared as f64 / smaller as f64 > self.config.overlap_ratio {
                    out.push(Violation::HighOverlap {
                        first: names[i].to_string(),
                        second: names[j].to_string(),
                        shared,
                        smaller,
                    });
                }
            }
        }
        out
    }

    fn detect_generic_specific(&self, names: &[&str]) -> Vec<Violation> {
        let mut out = Vec::new();
        for pattern in GENERIC_PATTERNS {
            let matching: Vec<&str> = names
                .iter()
                .copied()
                .filter(|n| n.to_lowercase().contains(pattern))
                .collect();
            if matching.len() < 2 {
                continue;
            }
            let word_count = |n: &str| n.split_whitespace().count();
            let generic = matching
                .iter()
                .any(|n| word_count(n) <= self.config.generic_max_words);
            let specific = matching
                .iter()
                .any(|n| word_count(n) > self.config.specific_min_words);
            if generic && specific {
                out.push(Violation::GenericSpecific {
                    pattern: pattern.to_string(),
                    names: matching.iter().map(|n| n.to_string()).collect(),
                });
            }
        }
        out
    }

    fn check_abstraction(&self, names: &[&str]) -> Vec<Violation> {
        if names.is_empty() {
            return Vec::new();
        }
        let scores: Vec<f64> = names.iter().map(|n| specificity_score(n)).collect();
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let limit = mean * self.config.abstraction_deviation;

        names
            .iter()
            .zip(&scores)
            .filter(|(_, score)| (**score - mean).abs() > limit)
            .map(|(name, score)| Violation::InconsistentAbstraction {
                name: name.to_string(),
                too_specific: *score > mean,
            })
            .collect()
    }
}

/// Higher means more concrete: longer names, gerunds, nominalizations and
/// numbers all push the score up.
pub fn specificity_score(name: &str) -> f64 {
    let words: Vec<String> = name.to_lowercase().split_whitespace().map(str::to_string).collect();
    let gerunds = words.iter().filter(|w| w.ends_with("ing")).count();
    let nominalizations = words.iter().filter(|w| w.ends_with("tion")).count();
    let numbered = words
        .iter()
        .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
        .count();
    words.len() as f64 * 0.3 + gerunds as f64 * 0.5 + nominalizations as f64 * 0.3 + numbered as f64
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Lowercased words minus stop words, with a plural `s` dropped so that
/// "network" and "networks" compare equal.
fn content_tokens(name: &str) -> HashSet<String> {
    name.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(|w| {
            if w.len() > 3 && w.ends_with('s') && !w.ends_with("ss") {
                w[..w.len() - 1].to_string()
            } else {
                w.to_string()
            }
        })
        .collect()
}

fn remove_duplicates(
    candidates: Vec<CandidateSubtopic>,
    violations: &mut Vec<Violation>,
) -> Vec<CandidateSubtopic> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| {
            if seen.insert(normalize(&c.name)) {
                true
            } else {
                violations.push(Violation::Duplicate { name: c.name.clone() });
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::tree::tests::topic;

    fn candidate(name: &str) -> CandidateSubtopic {
        CandidateSubtopic {
            name: name.to_string(),
            description: format!("{name} overview"),
            difficulty_min: 2,
            difficulty_max: 6,
        }
    }

    fn batch(names: &[&str]) -> Vec<CandidateSubtopic> {
        names.iter().map(|n| candidate(n)).collect()
    }

    fn validator() -> MeceValidator {
        MeceValidator::new(MeceConfig::default())
    }

    #[test]
    fn test_duplicates_are_removed() {
        let parent = topic(1, "Machine Learning", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["Supervised Learning", "supervised learning", "Unsupervised Learning"]),
            true,
        );
        assert_eq!(report.accepted.len(), 2);
        assert!(report
            .violations
            .contains(&Violation::Duplicate { name: "supervised learning".into() }));
        assert!(report.messages().iter().any(|m| m.starts_with("Duplicate removed")));
    }

    #[test]
    fn test_subset_is_merged_into_general_name() {
        let parent = topic(1, "Artificial Intelligence", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["Neural Networks", "Neural Network Architectures", "Robotics"]),
            true,
        );
        let names: Vec<&str> = report.accepted.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Neural Networks", "Robotics"]);
        assert!(report.violations.contains(&Violation::Subset {
            general: "Neural Networks".into(),
            specific: "Neural Network Architectures".into(),
            fixed: true,
        }));
    }

    #[test]
    fn test_prefix_words_are_not_subsets() {
        let parent = topic(1, "Machine Learning", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["Supervised Learning", "Unsupervised Learning"]),
            true,
        );
        assert_eq!(report.accepted.len(), 2);
    }

    #[test]
    fn test_neural_pair_is_flagged_or_merged() {
        let parent = topic(1, "Artificial Intelligence", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["Neural Networks", "Neural Network Architectures"]),
            true,
        );
        assert!(!report.violations.is_empty());
    }

    #[test]
    fn test_subset_report_only_keeps_both() {
        let parent = topic(1, "Physics", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["Optics", "Quantum Optics", "Mechanics"]),
            false,
        );
        assert_eq!(report.accepted.len(), 3);
        assert!(report.violations.contains(&Violation::Subset {
            general: "Optics".into(),
            specific: "Quantum Optics".into(),
            fixed: false,
        }));
    }

    #[test]
    fn test_specific_first_is_dropped_in_favor_of_general() {
        let parent = topic(1, "Physics", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["Quantum Optics", "Optics", "Mechanics"]),
            true,
        );
        let names: Vec<&str> = report.accepted.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Optics", "Mechanics"]);
    }

    #[test]
    fn test_clean_set_has_no_violations() {
        let parent = topic(1, "Biology", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["Molecular Biology", "Ecology Studies", "Evolutionary Genetics", "Human Physiology"]),
            true,
        );
        assert!(report.violations.is_empty(), "{:?}", report.messages());
        assert_eq!(report.accepted.len(), 4);
        assert!(!report.rejected);
    }

    #[test]
    fn test_high_overlap_is_flagged() {
        let parent = topic(1, "Computing", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["Distributed Data Systems", "Data Systems Design"]),
            true,
        );
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::HighOverlap { shared: 2, smaller: 3, .. })));
    }

    #[test]
    fn test_generic_specific_pattern() {
        let parent = topic(1, "Machine Learning", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["ML Applications", "Applications in Medical Imaging Diagnostics", "Theory"]),
            true,
        );
        assert!(report.violations.iter().any(|v| matches!(
            v,
            Violation::GenericSpecific { pattern, .. } if pattern == "applications"
        )));
    }

    #[test]
    fn test_abstraction_outlier() {
        let parent = topic(1, "Mathematics", None);
        let report = validator().validate(
            &parent,
            &[],
            batch(&["Algebra", "Geometry", "Solving 2nd Order Differential Equations Using Laplace Transformation"]),
            true,
        );
        assert!(report.violations.iter().any(|v| matches!(
            v,
            Violation::InconsistentAbstraction { too_specific: true, .. }
        )));
    }

    #[test]
    fn test_small_or_oversized_batches_are_rejected() {
        let parent = topic(1, "Art", None);
        let report = validator().validate(&parent, &[], batch(&["Painting", "painting"]), true);
        assert!(report.rejected);
        assert!(report.accepted.is_empty());

        let many: Vec<String> = (0..9).map(|i| format!("Area{i}")).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let report = validator().validate(&parent, &[], batch(&refs), true);
        assert!(report.rejected);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::TooManySiblings { count: 9, max: 8 })));
    }

    #[test]
    fn test_existing_children_are_not_regenerated() {
        let parent = topic(1, "Physics", None);
        let existing = vec![topic(2, "Optics", Some(1))];
        let report = validator().validate(
            &parent,
            &existing,
            batch(&["optics", "Mechanics", "Thermodynamics"]),
            true,
        );
        let names: Vec<&str> = report.accepted.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Mechanics", "Thermodynamics"]);
    }

    #[test]
    fn test_audit_tree_reports_per_parent() {
        let tree = TopicTree::new(vec![
            topic(1, "Root", None),
            topic(2, "Optics", Some(1)),
            topic(3, "Quantum Optics", Some(1)),
            topic(4, "Lonely", Some(2)),
        ]);
        let audit = validator().audit_tree(&tree, None);
        assert_eq!(audit.len(), 1);
        assert!(audit["Root"]
            .iter()
            .any(|v| matches!(v, Violation::Subset { fixed: false, .. })));
    }
}
