//! Progress reconciliation and the optimistic completion toggle.

use std::collections::HashSet;
use std::sync::Mutex;

use futures::future::join_all;
use tracing::{debug, info, warn};

use coursegate_core::catalog::Course;
use coursegate_core::completion::{CompletionKey, CompletionSet, CourseProgressSnapshot};
use coursegate_core::reconcile::{
    AggregateProgress, ProgressSource, ReconcileInputs, Resolution, aggregate_snapshot,
    fill_from_cache, modules_with_completions, resolve, resolve_rebuild,
};
use coursegate_core::toggle::PendingToggle;
use coursegate_core::{CourseError, InvalidOperation};

use crate::cache::LocalCache;
use crate::error::BackendError;
use crate::ports::LearningBackend;
use crate::session::{CourseSession, LoadReport, ProgressState};

#[derive(Debug, Default)]
struct Verification {
    completed: Vec<CompletionKey>,
    failed: Vec<CompletionKey>,
    unauthorized: Option<String>,
}

/// Marks a key as having a mutation in flight; released on drop.
struct InFlightGuard<'a> {
    keys: &'a Mutex<HashSet<CompletionKey>>,
    key: CompletionKey,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(keys: &'a Mutex<HashSet<CompletionKey>>, key: &CompletionKey) -> Result<Self, CourseError> {
        let mut held = keys.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.clone()) {
            return Err(InvalidOperation::ToggleInFlight(key.clone()).into());
        }
        Ok(Self {
            keys,
            key: key.clone(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
    }
}

impl<B: LearningBackend, C: LocalCache> CourseSession<B, C> {
    /// Build the authoritative completion set from catalog, aggregate,
    /// per-item verification and cache, then persist it.
    pub async fn load_progress(&self) -> Result<LoadReport, CourseError> {
        self.ensure_open()?;
        let epoch = self.state().begin_load();
        let course_id = &self.scope.course_id;
        let (catalog, aggregate) = futures::join!(
            self.backend.get_catalog(course_id),
            self.backend.get_aggregate_progress(course_id),
        );
        let course = catalog?.normalized();
        let aggregate = match aggregate {
            Ok(aggregate) => Some(aggregate),
            Err(BackendError::Unauthorized(msg)) => return Err(CourseError::Unauthorized(msg)),
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "aggregate progress unavailable");
                None
            }
        };

        let keys: Vec<CompletionKey> = course.countable_keys().collect();
        let verification = self.verify(&keys).await;
        self.ensure_open()?;
        if let Some(msg) = verification.unauthorized {
            return Err(CourseError::Unauthorized(msg));
        }

        let verified = CompletionSet::from_keys(self.scope.clone(), verification.completed);
        let mut cached = self
            .cache
            .load(&self.scope)
            .map(|entry| entry.completed)
            .unwrap_or_else(|| CompletionSet::empty(self.scope.clone()));
        cached.retain_countable(&course);

        let resolution = resolve(ReconcileInputs {
            verified: verified.len(),
            failed: verification.failed.len(),
            aggregate: aggregate.as_ref().map(|a| a.completed_count),
            cached: cached.len(),
            cache_covers_verified: verified.is_subset(&cached),
        });
        let verified_count = verified.len();

        let (completed, source) = match resolution {
            Resolution::AcceptVerified => (verified, ProgressSource::Verified),
            Resolution::AdoptCache => (
                fill_from_cache(&verified, &cached, &verification.failed),
                ProgressSource::Cached,
            ),
            Resolution::RebuildFromModules => {
                let rebuilt = self.rebuild(&course, aggregate.as_ref()).await?;
                self.ensure_open()?;
                let source = resolve_rebuild(rebuilt.len());
                (rebuilt, source)
            }
        };

        let snapshot = match (&aggregate, source) {
            (Some(aggregate), ProgressSource::AggregateOnly) => aggregate_snapshot(aggregate, &course),
            _ => CourseProgressSnapshot::for_set(&completed, &course),
        };
        if let Some(aggregate) = &aggregate {
            if aggregate.completed_count != snapshot.completed_count {
                info!(
                    scope = %self.scope,
                    aggregate = aggregate.completed_count,
                    resolved = snapshot.completed_count,
                    ?source,
                    "completion set disagrees with backend aggregate"
                );
            }
        }
        if source != ProgressSource::Verified {
            warn!(scope = %self.scope, ?source, failed = verification.failed.len(), "progress loaded from fallback source");
        }

        let mut progress = ProgressState {
            course,
            completed,
            source,
            aggregate,
            snapshot,
        };
        let snapshot = {
            let mut state = self.state();
            // Toggles racing this reload were not visible to its reads.
            state.overlay_edits(&mut progress, epoch);
            self.persist(&progress);
            let snapshot = progress.snapshot;
            state.progress = Some(progress);
            snapshot
        };
        self.reevaluate();

        Ok(LoadReport {
            source,
            verified: verified_count,
            failed: verification.failed.len(),
            snapshot,
        })
    }

    /// Issue one verification call per key, concurrently. Individual failures
    /// count as "not completed".
    async fn verify(&self, keys: &[CompletionKey]) -> Verification {
        let calls = keys.iter().map(|key| async move {
            let result = self
                .backend
                .get_item_completion(&self.scope.course_id, key)
                .await;
            (key, result)
        });

        let mut verification = Verification::default();
        for (key, result) in join_all(calls).await {
            match result {
                Ok(true) => verification.completed.push(key.clone()),
                Ok(false) => {}
                Err(BackendError::Unauthorized(msg)) => {
                    verification.failed.push(key.clone());
                    verification.unauthorized.get_or_insert(msg);
                }
                Err(err) => {
                    verification.failed.push(key.clone());
                    debug!(%key, error = %err, "item verification failed");
                }
            }
        }
        debug!(
            scope = %self.scope,
            requested = keys.len(),
            completed = verification.completed.len(),
            failed = verification.failed.len(),
            "verification batch settled"
        );
        verification
    }

    /// Re-query only modules the aggregate says contain completions.
    async fn rebuild(
        &self,
        course: &Course,
        aggregate: Option<&AggregateProgress>,
    ) -> Result<CompletionSet, CourseError> {
        let Some(aggregate) = aggregate else {
            return Ok(CompletionSet::empty(self.scope.clone()));
        };
        let keys: Vec<CompletionKey> = modules_with_completions(aggregate, course)
            .iter()
            .filter_map(|module_id| course.module(module_id))
            .flat_map(|module| module.countable_keys())
            .collect();
        let verification = self.verify(&keys).await;
        if let Some(msg) = verification.unauthorized {
            return Err(CourseError::Unauthorized(msg));
        }
        Ok(CompletionSet::from_keys(self.scope.clone(), verification.completed))
    }

    /// Flip completion of one item: apply locally and persist, then confirm
    /// with the backend, reverting on failure. At most one toggle per key may
    /// be in flight.
    pub async fn toggle_completion(
        &self,
        key: CompletionKey,
    ) -> Result<CourseProgressSnapshot, CourseError> {
        self.ensure_open()?;
        let _guard = InFlightGuard::acquire(&self.in_flight, &key)?;

        let pending = {
            let mut state = self.state();
            let progress = state.progress_mut()?;
            if progress.source.is_degraded() {
                return Err(InvalidOperation::DegradedProgress.into());
            }
            let pending = PendingToggle::apply(&mut progress.completed, &progress.course, key)?;
            progress.refresh_snapshot();
            self.persist(progress);
            state.record_edit(pending.key().clone(), pending.target());
            pending
        };
        self.reevaluate();

        let result = self
            .backend
            .set_item_completion(&self.scope.course_id, pending.key(), pending.target())
            .await;
        self.ensure_open()?;

        match result {
            Ok(echo) => {
                let snapshot = {
                    let mut state = self.state();
                    let target = pending.target();
                    let key = pending.commit();
                    state.settle_edit(&key);
                    let progress = state.progress_mut()?;
                    if !progress.source.is_degraded() && progress.completed.set(key.clone(), target) {
                        // A reload replaced the set while the write was in flight.
                        progress.refresh_snapshot();
                        self.persist(progress);
                    }
                    if let Some(aggregate) = echo.aggregate {
                        if aggregate.completed_count != progress.snapshot.completed_count {
                            debug!(%key, echoed = aggregate.completed_count, local = progress.snapshot.completed_count, "aggregate echo differs from local set");
                        }
                        progress.aggregate = Some(aggregate);
                    }
                    progress.snapshot
                };
                self.reevaluate();
                Ok(snapshot)
            }
            Err(err) => {
                {
                    let mut state = self.state();
                    state.drop_edit(pending.key());
                    let progress = state.progress_mut()?;
                    let key = pending.revert(&mut progress.completed);
                    progress.refresh_snapshot();
                    self.persist(progress);
                    warn!(%key, error = %err, "completion toggle rolled back");
                }
                self.reevaluate();
                Err(err.into())
            }
        }
    }
}
