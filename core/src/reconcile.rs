//! Discrepancy resolution between the three sources of completion truth.
//!
//! Priority is fixed: a live, item-level verification beats the local cache,
//! which beats a per-module rebuild, which beats showing backend totals only.
//! The decision is a pure function of counts so every branch is testable
//! without a network.
//!
//! The cache never overrides a successful read: when it is adopted it only
//! supplies the items whose verification failed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::Course;
use crate::completion::{CompletionKey, CompletionSet, CourseProgressSnapshot};
use crate::ids::ModuleId;

/// Course-level progress counters as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateProgress {
    pub completed_count: usize,
    pub total_count: usize,
    /// Hint: number of completed items per module.
    #[serde(default)]
    pub per_module_completed: BTreeMap<ModuleId, usize>,
}

/// Where the authoritative completion set of a session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    Verified,
    Cached,
    Rebuilt,
    /// Item-level state unknown; the snapshot shows backend totals and
    /// individual items cannot be marked.
    AggregateOnly,
}

impl ProgressSource {
    pub fn is_degraded(self) -> bool {
        matches!(self, ProgressSource::AggregateOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileInputs {
    /// Items verified complete by the per-item calls.
    pub verified: usize,
    /// Per-item calls that failed or timed out.
    pub failed: usize,
    /// Backend aggregate `completed_count`, `None` when the aggregate read failed.
    pub aggregate: Option<usize>,
    /// Size of the cached set after dropping keys the catalog no longer has.
    pub cached: usize,
    /// Whether every verified key is also in the cached set.
    pub cache_covers_verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    AcceptVerified,
    AdoptCache,
    RebuildFromModules,
}

pub fn resolve(inputs: ReconcileInputs) -> Resolution {
    let cache_usable = inputs.cached > 0 && inputs.cache_covers_verified;

    let Some(aggregate) = inputs.aggregate else {
        // Without the aggregate only a partially failed verification can be
        // second-guessed, and only by a cache that agrees with it.
        if inputs.failed > 0 && cache_usable && inputs.cached > inputs.verified {
            return Resolution::AdoptCache;
        }
        return Resolution::AcceptVerified;
    };

    if inputs.verified == aggregate {
        return Resolution::AcceptVerified;
    }

    if inputs.verified == 0 {
        // Every call answered "not complete": the backend has spoken.
        if inputs.failed == 0 {
            return Resolution::AcceptVerified;
        }
        return if inputs.cached > 0 {
            Resolution::AdoptCache
        } else {
            Resolution::RebuildFromModules
        };
    }

    // Partial verification failures: a cache that matches the aggregate
    // exactly is a better picture than the degraded verified set.
    if inputs.failed > 0 && cache_usable && inputs.cached == aggregate {
        return Resolution::AdoptCache;
    }

    Resolution::AcceptVerified
}

/// The set to use when the cache is adopted: everything verified complete,
/// plus cached keys whose verification failed. Keys the backend reported as
/// not complete stay out even if the cache holds them.
pub fn fill_from_cache(
    verified: &CompletionSet,
    cached: &CompletionSet,
    failed: &[CompletionKey],
) -> CompletionSet {
    let mut merged = verified.clone();
    for key in failed {
        if cached.contains(key) {
            merged.set(key.clone(), true);
        }
    }
    merged
}

/// Outcome of the per-module rebuild fallback.
pub fn resolve_rebuild(rebuilt: usize) -> ProgressSource {
    if rebuilt > 0 {
        ProgressSource::Rebuilt
    } else {
        ProgressSource::AggregateOnly
    }
}

/// Modules the aggregate claims contain completions, in catalog order.
pub fn modules_with_completions(aggregate: &AggregateProgress, course: &Course) -> Vec<ModuleId> {
    course
        .modules
        .iter()
        .filter(|m| {
            aggregate
                .per_module_completed
                .get(&m.id)
                .is_some_and(|count| *count > 0)
        })
        .map(|m| m.id.clone())
        .collect()
}

/// Display snapshot for the aggregate-only state. The total comes from the
/// catalog so supplementary items are never counted.
pub fn aggregate_snapshot(aggregate: &AggregateProgress, course: &Course) -> CourseProgressSnapshot {
    CourseProgressSnapshot::from_counts(aggregate.completed_count, course.total_countable())
}
