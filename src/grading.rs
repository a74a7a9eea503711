//! Quiz grading: scores one submission against a question set.
//!
//! Grading is a pure function of (question set, submitted answers); it
//! touches no storage and is safe to call repeatedly. Essay questions are
//! never auto-graded: they are marked pending review and excluded from the
//! automatic denominator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct QuestionSet {
    pub questions: Vec<Question>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
    /// Any positive point value is accepted (0.5 by convention is the
    /// smallest used in practice).
    pub points: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice {
        options: Vec<String>,
        correct: String,
    },
    TrueFalse {
        correct: bool,
    },
    MultipleChoice {
        options: Vec<String>,
        correct: BTreeSet<String>,
    },
    FillInBlank {
        accepted: Vec<String>,
    },
    Essay,
}

/// Map from question id to the learner's answer payload. Questions absent
/// from the map count as unanswered (0 points), never as an error.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SubmittedAnswers {
    pub answers: HashMap<Uuid, AnswerPayload>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerPayload {
    /// Single selected option (single-choice).
    Choice(String),
    /// True/false selection.
    Flag(bool),
    /// Set of selected option ids (multiple-choice).
    Choices(BTreeSet<String>),
    /// Free-text answer (fill-in-blank).
    Text(String),
    /// Essay body, held for manual review.
    Essay(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionVerdict {
    Correct,
    Incorrect,
    Unanswered,
    PendingReview,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuestionOutcome {
    pub question_id: Uuid,
    pub verdict: QuestionVerdict,
    pub points_possible: f64,
    pub points_earned: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GradedSubmission {
    pub outcomes: Vec<QuestionOutcome>,
    /// 100 x earned / possible over auto-gradable questions. `None` when
    /// every question is pending manual review.
    pub score: Option<f64>,
    /// Against the quiz passing threshold; `None` while the score is
    /// undefined.
    pub passed: Option<bool>,
    pub pending_review: bool,
}

/// Validate a quiz definition before it is accepted into the catalog.
pub fn validate_question_set(set: &QuestionSet) -> EngineResult<()> {
    for q in &set.questions {
        if !(q.points > 0.0) {
            return Err(EngineError::validation(format!(
                "question {} has non-positive point value {}",
                q.id, q.points
            )));
        }
        match &q.kind {
            QuestionKind::SingleChoice { options, correct } => {
                if !options.contains(correct) {
                    return Err(EngineError::validation(format!(
                        "question {}: correct option is not among the options",
                        q.id
                    )));
                }
            }
            QuestionKind::MultipleChoice { options, correct } => {
                if correct.is_empty() || !correct.iter().all(|c| options.contains(c)) {
                    return Err(EngineError::validation(format!(
                        "question {}: correct set must be a non-empty subset of the options",
                        q.id
                    )));
                }
            }
            QuestionKind::FillInBlank { accepted } => {
                if accepted.is_empty() {
                    return Err(EngineError::validation(format!(
                        "question {}: at least one accepted answer is required",
                        q.id
                    )));
                }
            }
            QuestionKind::TrueFalse { .. } | QuestionKind::Essay => {}
        }
    }
    Ok(())
}

/// Grade one submission. `passing_score` is the quiz threshold (1..=100).
///
/// Fails with `Validation` when a submitted question id does not belong to
/// the quiz, or an answer payload shape does not match its question kind;
/// nothing is coerced silently.
pub fn grade(
    set: &QuestionSet,
    submission: &SubmittedAnswers,
    passing_score: i32,
) -> EngineResult<GradedSubmission> {
    let known: HashSet<Uuid> = set.questions.iter().map(|q| q.id).collect();
    for qid in submission.answers.keys() {
        if !known.contains(qid) {
            return Err(EngineError::validation(format!(
                "submitted answer for unknown question {qid}"
            )));
        }
    }

    let mut outcomes = Vec::with_capacity(set.questions.len());
    let mut possible = 0.0_f64;
    let mut earned = 0.0_f64;
    let mut pending_review = false;

    for q in &set.questions {
        let answer = submission.answers.get(&q.id);

        if matches!(q.kind, QuestionKind::Essay) {
            // Shape still checked: a non-essay payload on an essay question
            // is a malformed submission.
            if let Some(a) = answer {
                if !matches!(a, AnswerPayload::Essay(_)) {
                    return Err(shape_mismatch(q, a));
                }
            }
            pending_review = true;
            outcomes.push(QuestionOutcome {
                question_id: q.id,
                verdict: QuestionVerdict::PendingReview,
                points_possible: q.points,
                points_earned: 0.0,
            });
            continue;
        }

        possible += q.points;
        let (verdict, pts) = match answer {
            None => (QuestionVerdict::Unanswered, 0.0),
            Some(a) => {
                if judge(q, a)? {
                    (QuestionVerdict::Correct, q.points)
                } else {
                    (QuestionVerdict::Incorrect, 0.0)
                }
            }
        };
        earned += pts;
        outcomes.push(QuestionOutcome {
            question_id: q.id,
            verdict,
            points_possible: q.points,
            points_earned: pts,
        });
    }

    let score = if possible > 0.0 {
        Some(100.0 * earned / possible)
    } else {
        None
    };
    let passed = score.map(|s| s >= passing_score as f64);

    Ok(GradedSubmission {
        outcomes,
        score,
        passed,
        pending_review,
    })
}

fn judge(q: &Question, answer: &AnswerPayload) -> EngineResult<bool> {
    match (&q.kind, answer) {
        (QuestionKind::SingleChoice { correct, .. }, AnswerPayload::Choice(sel)) => {
            Ok(sel == correct)
        }
        (QuestionKind::TrueFalse { correct }, AnswerPayload::Flag(v)) => Ok(v == correct),
        // Exact set equality: no partial credit for multiple-choice.
        (QuestionKind::MultipleChoice { correct, .. }, AnswerPayload::Choices(sel)) => {
            Ok(sel == correct)
        }
        (QuestionKind::FillInBlank { accepted }, AnswerPayload::Text(t)) => {
            let norm = t.trim().to_lowercase();
            Ok(accepted.iter().any(|a| a.trim().to_lowercase() == norm))
        }
        _ => Err(shape_mismatch(q, answer)),
    }
}

fn shape_mismatch(q: &Question, answer: &AnswerPayload) -> EngineError {
    EngineError::validation(format!(
        "answer payload {:?} does not match question {} of kind {}",
        answer,
        q.id,
        kind_name(&q.kind)
    ))
}

fn kind_name(kind: &QuestionKind) -> &'static str {
    match kind {
        QuestionKind::SingleChoice { .. } => "single_choice",
        QuestionKind::TrueFalse { .. } => "true_false",
        QuestionKind::MultipleChoice { .. } => "multiple_choice",
        QuestionKind::FillInBlank { .. } => "fill_in_blank",
        QuestionKind::Essay => "essay",
    }
}
