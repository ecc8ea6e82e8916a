//! Unlock state machine: content, then review, then exam, then certificate.
//!
//! The state is always derived from current inputs; nothing here caches a
//! decision. `GateTracker` only remembers the last observed state so that
//! transitions can be reported and the review prompt fired once.

use serde::{Deserialize, Serialize};

use crate::assessment::Attempt;
use crate::completion::CourseProgressSnapshot;
use crate::error::CourseError;
use crate::ids::CertificateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Submitted,
    Skipped,
}

impl ReviewStatus {
    pub fn is_resolved(self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    InProgress,
    PendingReview,
    PendingAssessment,
    PendingCertificate,
    Issued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedAction {
    ContinueLearning,
    WriteReview,
    SkipReview,
    TakeExam,
    DownloadCertificate,
}

impl GateState {
    pub fn allowed_actions(self) -> &'static [AllowedAction] {
        match self {
            GateState::InProgress => &[AllowedAction::ContinueLearning],
            GateState::PendingReview => &[AllowedAction::WriteReview, AllowedAction::SkipReview],
            GateState::PendingAssessment => &[AllowedAction::TakeExam],
            GateState::PendingCertificate | GateState::Issued => {
                &[AllowedAction::DownloadCertificate]
            }
        }
    }

    pub fn allows(self, action: AllowedAction) -> bool {
        self.allowed_actions().contains(&action)
    }

    /// Guard for certificate issuance, reporting why it is out of order.
    pub fn certificate_guard(self, snapshot: &CourseProgressSnapshot) -> Result<(), CourseError> {
        match self {
            GateState::InProgress => Err(CourseError::NotComplete(format!(
                "{} of {} items complete",
                snapshot.completed_count, snapshot.total_count
            ))),
            GateState::PendingReview => Err(CourseError::NotComplete(
                "course review has not been submitted or skipped".to_string(),
            )),
            GateState::PendingAssessment => Err(CourseError::AssessmentNotPassed),
            GateState::PendingCertificate | GateState::Issued => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GateInputs<'a> {
    pub snapshot: &'a CourseProgressSnapshot,
    pub review: ReviewStatus,
    /// An assessment with at least one question exists for the course.
    pub has_assessment: bool,
    pub latest_attempt: Option<&'a Attempt>,
    /// The backend reported a passed attempt recorded by another session.
    pub passed_elsewhere: bool,
    /// Certificate issued during this session, if any.
    pub certificate: Option<&'a CertificateId>,
}

pub fn evaluate(inputs: GateInputs<'_>) -> GateState {
    if inputs.certificate.is_some() {
        return GateState::Issued;
    }
    if !inputs.snapshot.is_complete() {
        return GateState::InProgress;
    }
    if !inputs.review.is_resolved() {
        return GateState::PendingReview;
    }
    let passed = inputs.passed_elsewhere || inputs.latest_attempt.is_some_and(|a| a.passed);
    if inputs.has_assessment && !passed {
        return GateState::PendingAssessment;
    }
    GateState::PendingCertificate
}

pub fn is_certificate_eligible(inputs: GateInputs<'_>) -> bool {
    matches!(
        evaluate(inputs),
        GateState::PendingCertificate | GateState::Issued
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateTransition {
    pub from: Option<GateState>,
    pub to: GateState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateStep {
    pub transition: Option<GateTransition>,
    /// Entering `PendingReview` for the first time this session.
    pub prompt_review: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GateTracker {
    current: Option<GateState>,
    review_prompted: bool,
}

impl GateTracker {
    pub fn current(&self) -> Option<GateState> {
        self.current
    }

    pub fn observe(&mut self, next: GateState) -> GateStep {
        let transition = (self.current != Some(next)).then_some(GateTransition {
            from: self.current,
            to: next,
        });
        self.current = Some(next);

        let prompt_review = next == GateState::PendingReview && !self.review_prompted;
        if prompt_review {
            self.review_prompted = true;
        }
        GateStep {
            transition,
            prompt_review,
        }
    }
}
