use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::Course;
use crate::ids::{LearnerCourse, ModuleId};

/// Identity of one completion fact. Positional, because the backend
/// normalizes content identifiers to indices within their module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletionKey {
    pub module_id: ModuleId,
    pub content_index: u32,
}

impl CompletionKey {
    pub fn new(module_id: impl Into<ModuleId>, content_index: u32) -> Self {
        Self {
            module_id: module_id.into(),
            content_index,
        }
    }
}

impl fmt::Display for CompletionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.module_id, self.content_index)
    }
}

/// The set of completed items for exactly one learner and course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSet {
    scope: LearnerCourse,
    keys: BTreeSet<CompletionKey>,
}

impl CompletionSet {
    pub fn empty(scope: LearnerCourse) -> Self {
        Self {
            scope,
            keys: BTreeSet::new(),
        }
    }

    pub fn from_keys(scope: LearnerCourse, keys: impl IntoIterator<Item = CompletionKey>) -> Self {
        Self {
            scope,
            keys: keys.into_iter().collect(),
        }
    }

    pub fn scope(&self) -> &LearnerCourse {
        &self.scope
    }

    pub fn contains(&self, key: &CompletionKey) -> bool {
        self.keys.contains(key)
    }

    /// Set membership of `key`. Returns whether membership changed.
    pub fn set(&mut self, key: CompletionKey, complete: bool) -> bool {
        if complete {
            self.keys.insert(key)
        } else {
            self.keys.remove(&key)
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompletionKey> {
        self.keys.iter()
    }

    pub fn is_subset(&self, other: &CompletionSet) -> bool {
        self.keys.is_subset(&other.keys)
    }

    /// Drop keys that do not address a countable item of `course`, e.g. stale
    /// entries from a cache written against an older catalog.
    pub fn retain_countable(&mut self, course: &Course) {
        self.keys.retain(|key| course.is_countable(key));
    }
}

/// Derived progress numbers for display and gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseProgressSnapshot {
    pub completed_count: usize,
    pub total_count: usize,
    pub percentage: u8,
}

impl CourseProgressSnapshot {
    pub fn from_counts(completed_count: usize, total_count: usize) -> Self {
        let completed_count = completed_count.min(total_count);
        Self {
            completed_count,
            total_count,
            percentage: percentage(completed_count, total_count),
        }
    }

    /// Counts only keys that address countable items of `course`.
    pub fn for_set(set: &CompletionSet, course: &Course) -> Self {
        let completed = set.iter().filter(|key| course.is_countable(key)).count();
        Self::from_counts(completed, course.total_countable())
    }

    /// Judged on the rounded percentage, so a course of 200 or more items
    /// counts as complete with one item left (199/200 reads as 100).
    pub fn is_complete(&self) -> bool {
        self.percentage == 100
    }
}

/// `round(completed / total * 100)`, `0` for an empty course. Rounds half
/// up: 199 of 200 is 100.
pub fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = completed.min(total) as f64 / total as f64;
    (ratio * 100.0).round() as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub module_id: ModuleId,
    pub completed: usize,
    pub total: usize,
}

impl ModuleProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

pub fn module_progress(course: &Course, set: &CompletionSet) -> Vec<ModuleProgress> {
    course
        .modules
        .iter()
        .map(|module| {
            let keys: Vec<CompletionKey> = module.countable_keys().collect();
            ModuleProgress {
                module_id: module.id.clone(),
                completed: keys.iter().filter(|k| set.contains(k)).count(),
                total: keys.len(),
            }
        })
        .collect()
}

/// First countable item in catalog order that is not yet complete.
pub fn next_incomplete(course: &Course, set: &CompletionSet) -> Option<CompletionKey> {
    course.countable_keys().find(|key| !set.contains(key))
}
