//! Starting and submitting final assessment attempts.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use coursegate_core::assessment::{Attempt, AttemptDraft, next_attempt_number};
use coursegate_core::gate::GateState;
use coursegate_core::{CourseError, InvalidOperation};

use crate::cache::LocalCache;
use crate::error::BackendError;
use crate::ports::LearningBackend;
use crate::session::CourseSession;

/// Result of a submission as shown to the learner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// The attempt was graded and recorded.
    Graded { attempt: Attempt },
    /// Another session already recorded a pass. This attempt's own result is
    /// discarded and the gate moves on.
    AlreadyPassed { prior: Option<Attempt> },
}

impl<B: LearningBackend, C: LocalCache> CourseSession<B, C> {
    /// Open a fresh, shuffled attempt. Only allowed while the gate is in
    /// `PendingAssessment`.
    pub async fn start_attempt(&self) -> Result<AttemptDraft, CourseError> {
        self.ensure_open()?;
        self.require_assessment_step()?;

        let latest = match self.backend.get_latest_attempt(&self.scope).await {
            Ok(latest) => Some(latest),
            Err(BackendError::Unauthorized(msg)) => return Err(CourseError::Unauthorized(msg)),
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "latest attempt unavailable, using session copy");
                None
            }
        };
        self.ensure_open()?;

        let draft = {
            let mut state = self.state();
            let context = state.context_mut()?;
            if let Some(latest) = latest {
                context.latest_attempt = latest;
            }
            let definition = context
                .assessment
                .as_ref()
                .ok_or(InvalidOperation::NoAssessment)?;
            AttemptDraft::build(definition, context.latest_attempt.as_ref())
        };

        match draft {
            Ok(draft) => {
                info!(scope = %self.scope, attempt = draft.attempt_number(), "attempt started");
                Ok(draft)
            }
            Err(err) => {
                // A pass recorded elsewhere may have just surfaced.
                self.reevaluate();
                Err(err)
            }
        }
    }

    /// Grade `draft` locally, then record it with the backend. The sealed
    /// attempt is kept until the backend answers, so a failed send can be
    /// repeated with `retry_submission`.
    pub async fn submit_attempt(&self, draft: AttemptDraft) -> Result<SubmissionOutcome, CourseError> {
        self.ensure_open()?;
        let attempt = {
            let mut state = self.state();
            let context = state.context_mut()?;
            if let Some(pending) = &context.pending_submission {
                return Err(InvalidOperation::SubmissionPending(pending.attempt_number).into());
            }
            if context.passed_elsewhere || context.latest_attempt.as_ref().is_some_and(|a| a.passed) {
                return Err(CourseError::AlreadyPassed);
            }
            let expected = next_attempt_number(context.latest_attempt.as_ref());
            if draft.attempt_number() != expected {
                return Err(InvalidOperation::StaleAttempt(draft.attempt_number()).into());
            }
            let definition = context
                .assessment
                .as_ref()
                .ok_or(InvalidOperation::NoAssessment)?;
            let attempt = draft.finish(definition, Utc::now())?;
            context.pending_submission = Some(attempt.clone());
            attempt
        };

        self.send_attempt(attempt).await
    }

    /// Resend the attempt whose submission failed. It keeps its id, which
    /// doubles as the idempotency key, so the backend records it once.
    pub async fn retry_submission(&self) -> Result<SubmissionOutcome, CourseError> {
        self.ensure_open()?;
        let attempt = self
            .state()
            .context_mut()?
            .pending_submission
            .clone()
            .ok_or(InvalidOperation::NothingToRetry)?;
        info!(scope = %self.scope, attempt = attempt.attempt_number, id = %attempt.id, "retrying attempt submission");
        self.send_attempt(attempt).await
    }

    async fn send_attempt(&self, attempt: Attempt) -> Result<SubmissionOutcome, CourseError> {
        let response = match self.backend.submit_attempt(&self.scope, &attempt).await {
            Ok(response) => response,
            Err(err) => {
                warn!(scope = %self.scope, attempt = attempt.attempt_number, error = %err, "attempt submission failed, kept for retry");
                return Err(err.into());
            }
        };
        self.ensure_open()?;
        self.state().context_mut()?.pending_submission = None;

        if response.already_passed {
            let prior = match self.backend.get_latest_attempt(&self.scope).await {
                Ok(prior) => prior.filter(|a| a.passed),
                Err(err) => {
                    warn!(scope = %self.scope, error = %err, "could not fetch the attempt that passed elsewhere");
                    None
                }
            };
            self.ensure_open()?;
            {
                let mut state = self.state();
                let context = state.context_mut()?;
                context.passed_elsewhere = true;
                if prior.is_some() {
                    context.latest_attempt = prior.clone();
                }
            }
            info!(scope = %self.scope, "attempt superseded by a pass from another session");
            self.reevaluate();
            return Ok(SubmissionOutcome::AlreadyPassed { prior });
        }

        if !response.accepted {
            return Err(InvalidOperation::Rejected(format!(
                "attempt {} was not accepted",
                attempt.attempt_number
            ))
            .into());
        }

        self.state().context_mut()?.latest_attempt = Some(attempt.clone());
        info!(
            scope = %self.scope,
            attempt = attempt.attempt_number,
            score = attempt.score,
            passed = attempt.passed,
            "attempt graded"
        );
        self.reevaluate();
        Ok(SubmissionOutcome::Graded { attempt })
    }

    fn require_assessment_step(&self) -> Result<(), CourseError> {
        let state = self.state();
        let gate = state.gate_state()?;
        match gate {
            GateState::PendingAssessment => Ok(()),
            GateState::InProgress | GateState::PendingReview => {
                Err(match gate.certificate_guard(&state.progress()?.snapshot) {
                    Err(err) => err,
                    Ok(()) => CourseError::NotComplete("assessment is locked".to_string()),
                })
            }
            GateState::PendingCertificate | GateState::Issued => {
                let has_assessment = state.context.as_ref().is_some_and(|c| c.assessment.is_some());
                if has_assessment {
                    Err(CourseError::AlreadyPassed)
                } else {
                    Err(InvalidOperation::NoAssessment.into())
                }
            }
        }
    }
}
