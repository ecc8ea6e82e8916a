//! `CourseSession`: one learner, one course, one view lifetime.
//!
//! All mutable state sits behind a single mutex that is never held across an
//! await. Network results that arrive after `teardown` are dropped.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{info, warn};

use coursegate_core::assessment::{AssessmentDefinition, Attempt};
use coursegate_core::catalog::Course;
use coursegate_core::completion::{
    CompletionKey, CompletionSet, CourseProgressSnapshot, ModuleProgress, module_progress,
    next_incomplete,
};
use coursegate_core::gate::{self, GateInputs, GateState, GateTracker, ReviewStatus};
use coursegate_core::reconcile::{AggregateProgress, ProgressSource};
use coursegate_core::{CertificateId, CourseError, InvalidOperation, LearnerCourse};

use crate::cache::{CachedProgress, LocalCache};
use crate::ports::{LearningBackend, ReviewPrompt, ReviewSubmission};

pub(crate) struct ProgressState {
    pub(crate) course: Course,
    pub(crate) completed: CompletionSet,
    pub(crate) source: ProgressSource,
    pub(crate) aggregate: Option<AggregateProgress>,
    pub(crate) snapshot: CourseProgressSnapshot,
}

impl ProgressState {
    /// Recompute the snapshot from the set. The aggregate-only state keeps
    /// the backend-derived snapshot it was created with.
    pub(crate) fn refresh_snapshot(&mut self) {
        if !self.source.is_degraded() {
            self.snapshot = CourseProgressSnapshot::for_set(&self.completed, &self.course);
        }
    }
}

pub(crate) struct GateContext {
    pub(crate) review: ReviewStatus,
    /// Definitions without questions are stored as `None`.
    pub(crate) assessment: Option<AssessmentDefinition>,
    pub(crate) latest_attempt: Option<Attempt>,
    pub(crate) passed_elsewhere: bool,
    /// Sealed attempt whose submission has not been answered yet.
    pub(crate) pending_submission: Option<Attempt>,
}

/// A local toggle that a reload must not lose: either still awaiting the
/// backend, or confirmed after some reload had already read the backend.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalEdit {
    pub(crate) target: bool,
    /// Load epoch current when the backend confirmed the write.
    pub(crate) settled_at: Option<u64>,
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) progress: Option<ProgressState>,
    pub(crate) context: Option<GateContext>,
    pub(crate) certificate: Option<CertificateId>,
    pub(crate) edits: BTreeMap<CompletionKey, LocalEdit>,
    load_epoch: u64,
    tracker: GateTracker,
}

impl SessionState {
    pub(crate) fn progress(&self) -> Result<&ProgressState, CourseError> {
        self.progress
            .as_ref()
            .ok_or(CourseError::InvalidOperation(InvalidOperation::NotLoaded))
    }

    pub(crate) fn progress_mut(&mut self) -> Result<&mut ProgressState, CourseError> {
        self.progress
            .as_mut()
            .ok_or(CourseError::InvalidOperation(InvalidOperation::NotLoaded))
    }

    pub(crate) fn context_mut(&mut self) -> Result<&mut GateContext, CourseError> {
        self.context
            .as_mut()
            .ok_or(CourseError::InvalidOperation(InvalidOperation::NotLoaded))
    }

    /// Start a reload and return its epoch.
    pub(crate) fn begin_load(&mut self) -> u64 {
        self.load_epoch += 1;
        self.load_epoch
    }

    pub(crate) fn record_edit(&mut self, key: CompletionKey, target: bool) {
        self.edits.insert(
            key,
            LocalEdit {
                target,
                settled_at: None,
            },
        );
    }

    pub(crate) fn settle_edit(&mut self, key: &CompletionKey) {
        let epoch = self.load_epoch;
        if let Some(edit) = self.edits.get_mut(key) {
            edit.settled_at = Some(epoch);
        }
    }

    pub(crate) fn drop_edit(&mut self, key: &CompletionKey) {
        self.edits.remove(key);
    }

    /// Re-apply local edits the reload started at `epoch` could not have
    /// observed, then forget edits every later reload will read back.
    pub(crate) fn overlay_edits(&mut self, progress: &mut ProgressState, epoch: u64) {
        self.edits
            .retain(|_, edit| edit.settled_at.is_none_or(|at| at >= epoch));
        if progress.source.is_degraded() {
            return;
        }
        for (key, edit) in &self.edits {
            if progress.course.is_countable(key) {
                progress.completed.set(key.clone(), edit.target);
            }
        }
        progress.refresh_snapshot();
    }

    pub(crate) fn gate_state(&self) -> Result<GateState, CourseError> {
        let progress = self.progress()?;
        let context = self
            .context
            .as_ref()
            .ok_or(CourseError::InvalidOperation(InvalidOperation::NotLoaded))?;
        Ok(gate::evaluate(GateInputs {
            snapshot: &progress.snapshot,
            review: context.review,
            has_assessment: context.assessment.is_some(),
            latest_attempt: context.latest_attempt.as_ref(),
            passed_elsewhere: context.passed_elsewhere,
            certificate: self.certificate.as_ref(),
        }))
    }
}

/// Outcome of the initial load, for diagnostics and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub source: ProgressSource,
    pub verified: usize,
    pub failed: usize,
    pub snapshot: CourseProgressSnapshot,
}

pub struct CourseSession<B, C> {
    pub(crate) scope: LearnerCourse,
    pub(crate) backend: B,
    pub(crate) cache: C,
    review_prompt: Option<Arc<dyn ReviewPrompt>>,
    state: Mutex<SessionState>,
    pub(crate) in_flight: Mutex<HashSet<CompletionKey>>,
    closed: AtomicBool,
}

impl<B: LearningBackend, C: LocalCache> CourseSession<B, C> {
    pub fn new(scope: LearnerCourse, backend: B, cache: C) -> Self {
        Self {
            scope,
            backend,
            cache,
            review_prompt: None,
            state: Mutex::new(SessionState::default()),
            in_flight: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_review_prompt(mut self, prompt: Arc<dyn ReviewPrompt>) -> Self {
        self.review_prompt = Some(prompt);
        self
    }

    pub fn scope(&self) -> &LearnerCourse {
        &self.scope
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reconcile progress and fetch review/assessment state.
    ///
    /// Progress is applied even when the gate context fetch fails afterwards;
    /// `refresh_gate_context` can be retried on its own.
    pub async fn load(&self) -> Result<LoadReport, CourseError> {
        let report = self.load_progress().await?;
        self.refresh_gate_context().await?;
        self.reevaluate();
        Ok(report)
    }

    pub async fn refresh_gate_context(&self) -> Result<(), CourseError> {
        self.ensure_open()?;
        let (review, assessment, latest) = futures::join!(
            self.backend.review_status(&self.scope),
            self.backend.get_assessment_definition(&self.scope.course_id),
            self.backend.get_latest_attempt(&self.scope),
        );
        self.ensure_open()?;

        let (review, assessment, latest_attempt) = (review?, assessment?, latest?);
        let mut state = self.state();
        let pending_submission = state
            .context
            .take()
            .and_then(|context| context.pending_submission);
        state.context = Some(GateContext {
            review,
            assessment: assessment.filter(|def| !def.is_empty()),
            latest_attempt,
            passed_elsewhere: false,
            pending_submission,
        });
        Ok(())
    }

    pub fn snapshot(&self) -> Result<CourseProgressSnapshot, CourseError> {
        Ok(self.state().progress()?.snapshot)
    }

    pub fn completion_set(&self) -> Result<CompletionSet, CourseError> {
        Ok(self.state().progress()?.completed.clone())
    }

    pub fn progress_source(&self) -> Result<ProgressSource, CourseError> {
        Ok(self.state().progress()?.source)
    }

    /// The backend's own count, as last read on load or echoed by a
    /// completion write. `None` when the aggregate could not be read.
    pub fn backend_aggregate(&self) -> Result<Option<AggregateProgress>, CourseError> {
        Ok(self.state().progress()?.aggregate.clone())
    }

    pub fn module_progress(&self) -> Result<Vec<ModuleProgress>, CourseError> {
        let state = self.state();
        let progress = state.progress()?;
        Ok(module_progress(&progress.course, &progress.completed))
    }

    /// Where "continue learning" should take the learner.
    pub fn next_item(&self) -> Result<Option<CompletionKey>, CourseError> {
        let state = self.state();
        let progress = state.progress()?;
        Ok(next_incomplete(&progress.course, &progress.completed))
    }

    pub fn gate_state(&self) -> Result<GateState, CourseError> {
        self.state().gate_state()
    }

    pub async fn submit_review(&self, review: ReviewSubmission) -> Result<GateState, CourseError> {
        if !(1..=5).contains(&review.rating) {
            return Err(InvalidOperation::InvalidRating(review.rating).into());
        }
        self.ensure_open()?;
        self.backend.submit_review(&self.scope, &review).await?;
        self.resolve_review(ReviewStatus::Submitted)
    }

    pub async fn skip_review(&self) -> Result<GateState, CourseError> {
        self.ensure_open()?;
        self.backend.skip_review(&self.scope).await?;
        self.resolve_review(ReviewStatus::Skipped)
    }

    fn resolve_review(&self, status: ReviewStatus) -> Result<GateState, CourseError> {
        self.ensure_open()?;
        self.state().context_mut()?.review = status;
        self.reevaluate();
        self.gate_state()
    }

    /// Derive the gate state, report transitions and open the review flow the
    /// first time the learner reaches it. Call after every progress mutation
    /// and attempt submission.
    pub(crate) fn reevaluate(&self) -> Option<GateState> {
        let (next, step) = {
            let mut state = self.state();
            let next = state.gate_state().ok()?;
            (next, state.tracker.observe(next))
        };

        if let Some(transition) = step.transition {
            info!(scope = %self.scope, from = ?transition.from, to = ?transition.to, "gate transition");
        }
        if step.prompt_review {
            if let Some(prompt) = &self.review_prompt {
                prompt.open(&self.scope);
            }
        }
        Some(next)
    }

    pub(crate) fn persist(&self, progress: &ProgressState) {
        let cached = CachedProgress::new(progress.completed.clone(), progress.snapshot.percentage);
        if let Err(err) = self.cache.save(&cached) {
            warn!(scope = %self.scope, error = %err, "failed to persist progress cache");
        }
    }

    /// Stop applying results. In-flight calls complete but their results are
    /// discarded.
    pub fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), CourseError> {
        if self.is_closed() {
            Err(CourseError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// End the learner's session: tear down and drop their cached progress so
    /// the next user of this device starts clean.
    pub fn logout(&self) {
        self.teardown();
        if let Err(err) = self.cache.clear(&self.scope) {
            warn!(scope = %self.scope, error = %err, "failed to clear progress cache");
        }
        *self.state() = SessionState::default();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::fakes::{FakeBackend, RecordingPrompt, completed_course_backend};

    #[tokio::test]
    async fn gate_state_requires_load() {
        let session = CourseSession::new(
            LearnerCourse::new("u1", "c1"),
            FakeBackend::new(),
            MemoryCache::new(),
        );
        assert_eq!(
            session.gate_state(),
            Err(CourseError::InvalidOperation(InvalidOperation::NotLoaded))
        );
    }

    #[tokio::test]
    async fn review_prompt_opens_once_on_reaching_review() {
        let prompt = Arc::new(RecordingPrompt::default());
        let session = CourseSession::new(
            LearnerCourse::new("u1", "c1"),
            completed_course_backend(),
            MemoryCache::new(),
        )
        .with_review_prompt(prompt.clone());

        session.load().await.unwrap();
        assert_eq!(session.gate_state().unwrap(), GateState::PendingReview);
        assert_eq!(prompt.count(), 1);

        session.refresh_gate_context().await.unwrap();
        session.reevaluate();
        assert_eq!(prompt.count(), 1);
    }

    #[tokio::test]
    async fn skipping_review_unlocks_the_exam() {
        let session = CourseSession::new(
            LearnerCourse::new("u1", "c1"),
            completed_course_backend(),
            MemoryCache::new(),
        );
        session.load().await.unwrap();

        assert_eq!(session.skip_review().await.unwrap(), GateState::PendingAssessment);
    }

    #[tokio::test]
    async fn review_rating_is_validated_before_sending() {
        let backend = completed_course_backend();
        let session = CourseSession::new(LearnerCourse::new("u1", "c1"), backend, MemoryCache::new());
        session.load().await.unwrap();

        let err = session
            .submit_review(ReviewSubmission {
                rating: 9,
                comment: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, CourseError::InvalidOperation(InvalidOperation::InvalidRating(9)));
        assert_eq!(session.backend().review_submissions(), 0);

        let state = session
            .submit_review(ReviewSubmission {
                rating: 4,
                comment: Some("clear and well paced".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(state, GateState::PendingAssessment);
        assert_eq!(session.backend().review_submissions(), 1);
    }

    #[tokio::test]
    async fn logout_clears_cache_and_state() {
        let cache = MemoryCache::new();
        let scope = LearnerCourse::new("u1", "c1");
        let session = CourseSession::new(scope.clone(), completed_course_backend(), cache);
        session.load().await.unwrap();
        assert!(session.cache.load(&scope).is_some());

        session.logout();
        assert!(session.cache.load(&scope).is_none());
        assert!(session.snapshot().is_err());
        assert_eq!(session.load().await.unwrap_err(), CourseError::SessionClosed);
    }
}
