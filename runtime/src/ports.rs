//! Collaborator interfaces consumed by a `CourseSession`.
//!
//! Each remote call may fail independently; implementations bound every call
//! with their own timeout and report it as `BackendError::Timeout`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use coursegate_core::assessment::{AssessmentDefinition, Attempt};
use coursegate_core::catalog::Course;
use coursegate_core::completion::CompletionKey;
use coursegate_core::gate::ReviewStatus;
use coursegate_core::reconcile::AggregateProgress;
use coursegate_core::{CertificateId, CourseId, LearnerCourse};

use crate::error::BackendError;

/// Response to a completion mark/unmark.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetCompletionEcho {
    /// Updated course counters, when the backend returns them.
    #[serde(default)]
    pub aggregate: Option<AggregateProgress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAttemptResponse {
    pub accepted: bool,
    /// A passed attempt already exists for this learner and course.
    #[serde(default)]
    pub already_passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSubmission {
    /// 1 to 5 stars
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn get_catalog(&self, course_id: &CourseId) -> Result<Course, BackendError>;
}

#[async_trait]
pub trait CompletionStore: Send + Sync {
    async fn get_aggregate_progress(
        &self,
        course_id: &CourseId,
    ) -> Result<AggregateProgress, BackendError>;

    async fn get_item_completion(
        &self,
        course_id: &CourseId,
        key: &CompletionKey,
    ) -> Result<bool, BackendError>;

    async fn set_item_completion(
        &self,
        course_id: &CourseId,
        key: &CompletionKey,
        complete: bool,
    ) -> Result<SetCompletionEcho, BackendError>;
}

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// `None` when the course has no final assessment.
    async fn get_assessment_definition(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<AssessmentDefinition>, BackendError>;

    async fn get_latest_attempt(
        &self,
        scope: &LearnerCourse,
    ) -> Result<Option<Attempt>, BackendError>;

    async fn submit_attempt(
        &self,
        scope: &LearnerCourse,
        attempt: &Attempt,
    ) -> Result<SubmitAttemptResponse, BackendError>;
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn review_status(&self, scope: &LearnerCourse) -> Result<ReviewStatus, BackendError>;

    async fn submit_review(
        &self,
        scope: &LearnerCourse,
        review: &ReviewSubmission,
    ) -> Result<(), BackendError>;

    async fn skip_review(&self, scope: &LearnerCourse) -> Result<(), BackendError>;
}

#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Idempotent: repeated calls return the same certificate.
    async fn issue_certificate(&self, scope: &LearnerCourse) -> Result<CertificateId, BackendError>;
}

/// Everything a session needs from the backend.
pub trait LearningBackend:
    CatalogSource + CompletionStore + AssessmentStore + ReviewStore + CertificateIssuer
{
}

impl<T> LearningBackend for T where
    T: CatalogSource + CompletionStore + AssessmentStore + ReviewStore + CertificateIssuer
{
}

/// Hook into the external review-collection flow. Opened automatically, once
/// per session, when the learner first reaches the review step.
pub trait ReviewPrompt: Send + Sync {
    fn open(&self, scope: &LearnerCourse);
}
