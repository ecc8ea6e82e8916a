use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CourseError, InvalidOperation};
use crate::ids::{AnswerId, QuestionId};

/// Minimum score (inclusive) for an attempt to pass.
pub const PASS_THRESHOLD: f64 = 70.0;

/// Selected answer ids per question.
pub type AnswerSheet = BTreeMap<QuestionId, BTreeSet<AnswerId>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Single,
    Multiple,
}

impl Question {
    /// More than one correct answer makes a question multi-select.
    pub fn selection_mode(&self) -> SelectionMode {
        if self.answers.iter().filter(|a| a.is_correct).count() > 1 {
            SelectionMode::Multiple
        } else {
            SelectionMode::Single
        }
    }

    pub fn correct_ids(&self) -> BTreeSet<AnswerId> {
        self.answers
            .iter()
            .filter(|a| a.is_correct)
            .map(|a| a.id.clone())
            .collect()
    }

    /// Exact set equality: same members, order irrelevant.
    pub fn is_correct_response(&self, selected: &BTreeSet<AnswerId>) -> bool {
        *selected == self.correct_ids()
    }
}

/// Canonical assessment. Never mutated by attempts; presentation order is
/// shuffled on a copy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssessmentDefinition {
    pub questions: Vec<Question>,
}

impl AssessmentDefinition {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn question(&self, id: &QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| &q.id == id)
    }
}

/// A submitted attempt. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Client-generated id (UUIDv7), used by the backend to deduplicate retries.
    pub id: Uuid,
    pub attempt_number: u32,
    pub answers: AnswerSheet,
    pub score: f64,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
}

pub fn next_attempt_number(latest: Option<&Attempt>) -> u32 {
    latest.map_or(1, |a| a.attempt_number + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub correct: usize,
    pub total: usize,
    pub score: f64,
    pub passed: bool,
}

/// Percentage of correct questions, rounded to two decimal places.
pub fn score(correct: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = correct as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

pub fn grade(definition: &AssessmentDefinition, answers: &AnswerSheet) -> Grade {
    let empty = BTreeSet::new();
    let correct = definition
        .questions
        .iter()
        .filter(|q| q.is_correct_response(answers.get(&q.id).unwrap_or(&empty)))
        .count();
    let total = definition.questions.len();
    let score = score(correct, total);
    Grade {
        correct,
        total,
        score,
        passed: score >= PASS_THRESHOLD,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentedAnswer {
    pub id: AnswerId,
    pub text: String,
}

/// A question as shown to the learner: shuffled answers, no correctness flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentedQuestion {
    pub id: QuestionId,
    pub text: String,
    pub mode: SelectionMode,
    pub answers: Vec<PresentedAnswer>,
}

/// An attempt being answered. Holds its own shuffled presentation and the
/// learner's selections until submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptDraft {
    id: Uuid,
    attempt_number: u32,
    questions: Vec<PresentedQuestion>,
    responses: AnswerSheet,
}

impl AttemptDraft {
    pub fn build(
        definition: &AssessmentDefinition,
        latest: Option<&Attempt>,
    ) -> Result<Self, CourseError> {
        Self::build_with_rng(definition, latest, &mut rand::thread_rng())
    }

    pub fn build_with_rng<R: Rng + ?Sized>(
        definition: &AssessmentDefinition,
        latest: Option<&Attempt>,
        rng: &mut R,
    ) -> Result<Self, CourseError> {
        if latest.is_some_and(|a| a.passed) {
            return Err(CourseError::AlreadyPassed);
        }
        if definition.is_empty() {
            return Err(InvalidOperation::NoAssessment.into());
        }

        let mut questions: Vec<PresentedQuestion> = definition
            .questions
            .iter()
            .map(|q| {
                let mut answers: Vec<PresentedAnswer> = q
                    .answers
                    .iter()
                    .map(|a| PresentedAnswer {
                        id: a.id.clone(),
                        text: a.text.clone(),
                    })
                    .collect();
                answers.shuffle(rng);
                PresentedQuestion {
                    id: q.id.clone(),
                    text: q.text.clone(),
                    mode: q.selection_mode(),
                    answers,
                }
            })
            .collect();
        questions.shuffle(rng);

        Ok(Self {
            id: Uuid::now_v7(),
            attempt_number: next_attempt_number(latest),
            questions,
            responses: AnswerSheet::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn questions(&self) -> &[PresentedQuestion] {
        &self.questions
    }

    pub fn responses(&self) -> &AnswerSheet {
        &self.responses
    }

    /// Single-select: replaces the prior selection. Multi-select: toggles
    /// membership of `answer`.
    pub fn select(&mut self, question: &QuestionId, answer: &AnswerId) -> Result<(), CourseError> {
        let presented = self
            .questions
            .iter()
            .find(|q| &q.id == question)
            .ok_or_else(|| InvalidOperation::UnknownQuestion(question.clone()))?;
        if !presented.answers.iter().any(|a| &a.id == answer) {
            return Err(InvalidOperation::UnknownAnswer {
                question: question.clone(),
                answer: answer.to_string(),
            }
            .into());
        }

        let selected = self.responses.entry(question.clone()).or_default();
        match presented.mode {
            SelectionMode::Single => {
                selected.clear();
                selected.insert(answer.clone());
            }
            SelectionMode::Multiple => {
                if !selected.remove(answer) {
                    selected.insert(answer.clone());
                }
            }
        }
        if selected.is_empty() {
            self.responses.remove(question);
        }
        Ok(())
    }

    /// Replace the whole selection for `question`, applying the same capture
    /// rules as successive `select` calls.
    pub fn respond<'a>(
        &mut self,
        question: &QuestionId,
        answers: impl IntoIterator<Item = &'a AnswerId>,
    ) -> Result<(), CourseError> {
        if !self.questions.iter().any(|q| &q.id == question) {
            return Err(InvalidOperation::UnknownQuestion(question.clone()).into());
        }
        self.responses.remove(question);
        for answer in answers {
            self.select(question, answer)?;
        }
        Ok(())
    }

    /// Questions without any selection, in presentation order.
    pub fn unanswered(&self) -> Vec<QuestionId> {
        self.questions
            .iter()
            .filter(|q| self.responses.get(&q.id).is_none_or(BTreeSet::is_empty))
            .map(|q| q.id.clone())
            .collect()
    }

    pub fn validate(&self) -> Result<(), CourseError> {
        let question_ids = self.unanswered();
        if question_ids.is_empty() {
            Ok(())
        } else {
            Err(InvalidOperation::Unanswered { question_ids }.into())
        }
    }

    /// Validate, grade against the canonical definition and seal the attempt.
    pub fn finish(
        self,
        definition: &AssessmentDefinition,
        submitted_at: DateTime<Utc>,
    ) -> Result<Attempt, CourseError> {
        let drifted = self.questions.len() != definition.questions.len()
            || self
                .questions
                .iter()
                .any(|q| definition.question(&q.id).is_none());
        if drifted {
            return Err(InvalidOperation::StaleAttempt(self.attempt_number).into());
        }
        self.validate()?;

        let grade = grade(definition, &self.responses);
        Ok(Attempt {
            id: self.id,
            attempt_number: self.attempt_number,
            answers: self.responses,
            score: grade.score,
            passed: grade.passed,
            submitted_at,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn answer(id: &str, is_correct: bool) -> Answer {
        Answer {
            id: AnswerId::new(id),
            text: format!("answer {id}"),
            is_correct,
        }
    }

    pub fn question(id: &str, answers: Vec<Answer>) -> Question {
        Question {
            id: QuestionId::new(id),
            text: format!("question {id}"),
            answers,
        }
    }

    pub fn single_question_assessment() -> AssessmentDefinition {
        AssessmentDefinition {
            questions: vec![question(
                "q1",
                vec![answer("A", true), answer("B", false), answer("C", false)],
            )],
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
}
