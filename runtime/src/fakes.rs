//! In-memory backend for session tests, with failure injection and call
//! counters.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use coursegate_core::assessment::{Answer, AnswerSheet, AssessmentDefinition, Attempt, Question};
use coursegate_core::catalog::{ContentItem, ContentKind, Course, Module};
use coursegate_core::completion::CompletionKey;
use coursegate_core::gate::ReviewStatus;
use coursegate_core::reconcile::AggregateProgress;
use coursegate_core::{
    AnswerId, CertificateId, ContentId, CourseId, LearnerCourse, ModuleId, QuestionId,
};

use crate::error::BackendError;
use crate::ports::{
    AssessmentStore, CatalogSource, CertificateIssuer, CompletionStore, ReviewPrompt,
    ReviewStore, ReviewSubmission, SetCompletionEcho, SubmitAttemptResponse,
};

/// `m1`: items 0..7, index 3 is an extra. `m2`: items 0..5, index 4 is an
/// extra. 10 countable items.
pub fn course_with_extras() -> Course {
    let module = |id: &str, len: u32, extra: u32, kind: ContentKind| Module {
        id: ModuleId::new(id),
        title: id.to_uppercase(),
        items: (0..len)
            .map(|i| ContentItem {
                id: ContentId::new(format!("{id}-{i}")),
                kind: if i == extra { ContentKind::Extra } else { kind },
                ordinal: i,
                title: String::new(),
            })
            .collect(),
    };
    Course {
        id: CourseId::new("c1"),
        title: "Course".to_string(),
        modules: vec![
            module("m1", 7, 3, ContentKind::Video),
            module("m2", 5, 4, ContentKind::Reading),
        ],
    }
}

/// The first `n` countable keys in catalog order.
pub fn first_keys(n: usize) -> Vec<CompletionKey> {
    course_with_extras().countable_keys().take(n).collect()
}

/// Two single-select questions; `A` is correct in each.
pub fn two_question_assessment() -> AssessmentDefinition {
    let question = |id: &str| Question {
        id: QuestionId::new(id),
        text: format!("question {id}"),
        answers: ["A", "B", "C"]
            .into_iter()
            .map(|a| Answer {
                id: AnswerId::new(a),
                text: format!("answer {a}"),
                is_correct: a == "A",
            })
            .collect(),
    };
    AssessmentDefinition {
        questions: vec![question("q1"), question("q2")],
    }
}

pub fn passed_attempt(attempt_number: u32) -> Attempt {
    Attempt {
        id: Uuid::now_v7(),
        attempt_number,
        answers: AnswerSheet::new(),
        score: 100.0,
        passed: true,
        submitted_at: Utc::now(),
    }
}

/// Every countable item complete, review pending, assessment present.
pub fn completed_course_backend() -> FakeBackend {
    FakeBackend::new()
        .with_completed(first_keys(10))
        .with_aggregate(10)
        .with_assessment()
}

#[derive(Debug, Default)]
struct FakeState {
    completed: BTreeSet<CompletionKey>,
    aggregate: Option<AggregateProgress>,
    failing_items: BTreeSet<CompletionKey>,
    assessment: Option<AssessmentDefinition>,
    latest_attempt: Option<Attempt>,
    passed_elsewhere: bool,
    review: ReviewStatus,
    submitted_ids: Vec<Uuid>,
}

#[derive(Debug)]
pub struct FakeBackend {
    course: Course,
    state: Mutex<FakeState>,
    fail_first_verifications: usize,
    verification_unauthorized: bool,
    verification_hold: Option<Semaphore>,
    write_hold: Option<Semaphore>,
    fail_writes: AtomicBool,
    fail_submissions: AtomicBool,
    verification_calls: AtomicUsize,
    write_calls: AtomicUsize,
    review_submissions: AtomicUsize,
    attempt_submissions: AtomicUsize,
    issue_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            course: course_with_extras(),
            state: Mutex::new(FakeState::default()),
            fail_first_verifications: 0,
            verification_unauthorized: false,
            verification_hold: None,
            write_hold: None,
            fail_writes: AtomicBool::new(false),
            fail_submissions: AtomicBool::new(false),
            verification_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
            review_submissions: AtomicUsize::new(0),
            attempt_submissions: AtomicUsize::new(0),
            issue_calls: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_completed(self, keys: Vec<CompletionKey>) -> Self {
        self.lock().completed = keys.into_iter().collect();
        self
    }

    /// Report `completed_count` regardless of the item-level state.
    pub fn with_aggregate(self, completed_count: usize) -> Self {
        self.lock().aggregate = Some(AggregateProgress {
            completed_count,
            total_count: self.course.total_countable(),
            per_module_completed: BTreeMap::new(),
        });
        self
    }

    pub fn with_aggregate_per_module(self, completed_count: usize, modules: &[(&str, usize)]) -> Self {
        self.lock().aggregate = Some(AggregateProgress {
            completed_count,
            total_count: self.course.total_countable(),
            per_module_completed: modules
                .iter()
                .map(|(id, count)| (ModuleId::new(*id), *count))
                .collect(),
        });
        self
    }

    pub fn failing_items(self, keys: Vec<CompletionKey>) -> Self {
        self.lock().failing_items = keys.into_iter().collect();
        self
    }

    /// Fail the first `n` item verification calls with a network error.
    pub fn failing_first_calls(mut self, n: usize) -> Self {
        self.fail_first_verifications = n;
        self
    }

    /// Item verification answers 401.
    pub fn unauthorized(mut self) -> Self {
        self.verification_unauthorized = true;
        self
    }

    /// Park item verification calls until `release_verification`.
    pub fn hold_verification(mut self) -> Self {
        self.verification_hold = Some(Semaphore::new(0));
        self
    }

    /// Park completion writes until `release_writes`.
    pub fn hold_writes(mut self) -> Self {
        self.write_hold = Some(Semaphore::new(0));
        self
    }

    pub fn with_assessment(self) -> Self {
        self.lock().assessment = Some(two_question_assessment());
        self
    }

    pub fn with_review(self, review: ReviewStatus) -> Self {
        self.lock().review = review;
        self
    }

    pub fn with_latest_attempt(self, attempt: Attempt) -> Self {
        self.lock().latest_attempt = Some(attempt);
        self
    }

    pub fn release_verification(&self) {
        if let Some(hold) = &self.verification_hold {
            hold.close();
        }
    }

    pub fn release_writes(&self) {
        if let Some(hold) = &self.write_hold {
            hold.close();
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Attempt submissions reach the fake but fail with a network error.
    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Ids of every attempt sent, including failed sends.
    pub fn submitted_ids(&self) -> Vec<Uuid> {
        self.lock().submitted_ids.clone()
    }

    /// Simulate another session recording a pass.
    pub fn record_pass_elsewhere(&self, attempt: Attempt) {
        let mut state = self.lock();
        state.latest_attempt = Some(attempt);
        state.passed_elsewhere = true;
    }

    pub fn is_complete(&self, key: &CompletionKey) -> bool {
        self.lock().completed.contains(key)
    }

    pub fn verification_calls(&self) -> usize {
        self.verification_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn review_submissions(&self) -> usize {
        self.review_submissions.load(Ordering::SeqCst)
    }

    pub fn attempt_submissions(&self) -> usize {
        self.attempt_submissions.load(Ordering::SeqCst)
    }

    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    fn derived_aggregate(&self, state: &FakeState) -> AggregateProgress {
        let mut per_module_completed = BTreeMap::new();
        for key in &state.completed {
            *per_module_completed.entry(key.module_id.clone()).or_insert(0) += 1;
        }
        AggregateProgress {
            completed_count: state.completed.len(),
            total_count: self.course.total_countable(),
            per_module_completed,
        }
    }
}

async fn wait_for(hold: &Option<Semaphore>) {
    if let Some(hold) = hold {
        // Closing the semaphore releases every waiter.
        let _ = hold.acquire().await;
    }
}

#[async_trait]
impl CatalogSource for FakeBackend {
    async fn get_catalog(&self, course_id: &CourseId) -> Result<Course, BackendError> {
        let mut course = self.course.clone();
        course.id = course_id.clone();
        Ok(course)
    }
}

#[async_trait]
impl CompletionStore for FakeBackend {
    async fn get_aggregate_progress(
        &self,
        _course_id: &CourseId,
    ) -> Result<AggregateProgress, BackendError> {
        let state = self.lock();
        Ok(state
            .aggregate
            .clone()
            .unwrap_or_else(|| self.derived_aggregate(&state)))
    }

    async fn get_item_completion(
        &self,
        _course_id: &CourseId,
        key: &CompletionKey,
    ) -> Result<bool, BackendError> {
        let call = self.verification_calls.fetch_add(1, Ordering::SeqCst);
        wait_for(&self.verification_hold).await;
        if self.verification_unauthorized {
            return Err(BackendError::Unauthorized("token expired".to_string()));
        }
        if call < self.fail_first_verifications {
            return Err(BackendError::Timeout);
        }
        let state = self.lock();
        if state.failing_items.contains(key) {
            return Err(BackendError::Network("connection reset".to_string()));
        }
        Ok(state.completed.contains(key))
    }

    async fn set_item_completion(
        &self,
        _course_id: &CourseId,
        key: &CompletionKey,
        complete: bool,
    ) -> Result<SetCompletionEcho, BackendError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        wait_for(&self.write_hold).await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection reset".to_string()));
        }
        let mut state = self.lock();
        if complete {
            state.completed.insert(key.clone());
        } else {
            state.completed.remove(key);
        }
        state.aggregate = None;
        Ok(SetCompletionEcho {
            aggregate: Some(self.derived_aggregate(&state)),
        })
    }
}

#[async_trait]
impl AssessmentStore for FakeBackend {
    async fn get_assessment_definition(
        &self,
        _course_id: &CourseId,
    ) -> Result<Option<AssessmentDefinition>, BackendError> {
        Ok(self.lock().assessment.clone())
    }

    async fn get_latest_attempt(&self, _scope: &LearnerCourse) -> Result<Option<Attempt>, BackendError> {
        Ok(self.lock().latest_attempt.clone())
    }

    async fn submit_attempt(
        &self,
        _scope: &LearnerCourse,
        attempt: &Attempt,
    ) -> Result<SubmitAttemptResponse, BackendError> {
        self.attempt_submissions.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        state.submitted_ids.push(attempt.id);
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(BackendError::Timeout);
        }
        if state.passed_elsewhere {
            return Ok(SubmitAttemptResponse {
                accepted: false,
                already_passed: true,
            });
        }
        state.latest_attempt = Some(attempt.clone());
        Ok(SubmitAttemptResponse {
            accepted: true,
            already_passed: false,
        })
    }
}

#[async_trait]
impl ReviewStore for FakeBackend {
    async fn review_status(&self, _scope: &LearnerCourse) -> Result<ReviewStatus, BackendError> {
        Ok(self.lock().review)
    }

    async fn submit_review(
        &self,
        _scope: &LearnerCourse,
        _review: &ReviewSubmission,
    ) -> Result<(), BackendError> {
        self.review_submissions.fetch_add(1, Ordering::SeqCst);
        self.lock().review = ReviewStatus::Submitted;
        Ok(())
    }

    async fn skip_review(&self, _scope: &LearnerCourse) -> Result<(), BackendError> {
        self.lock().review = ReviewStatus::Skipped;
        Ok(())
    }
}

#[async_trait]
impl CertificateIssuer for FakeBackend {
    async fn issue_certificate(&self, scope: &LearnerCourse) -> Result<CertificateId, BackendError> {
        self.issue_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CertificateId::new(format!("cert-{}-{}", scope.user_id, scope.course_id)))
    }
}

#[derive(Debug, Default)]
pub struct RecordingPrompt {
    opened: AtomicUsize,
}

impl RecordingPrompt {
    pub fn count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl ReviewPrompt for RecordingPrompt {
    fn open(&self, _scope: &LearnerCourse) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }
}
