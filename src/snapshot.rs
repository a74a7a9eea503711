//! Progress aggregation, eligibility, and grading.
//!
//! `compute_snapshot` is side-effect-free and recomputed from stored
//! records on every call; nothing here takes locks or caches.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::CourseProgressSnapshot;
use crate::progress;
use crate::store::{CourseCatalog, ProgressStore};

/// Per-quiz best standing feeding the aggregate; one entry per quiz that
/// has at least one attempt.
#[derive(Debug, Clone, Copy)]
pub struct BestAttempt {
    pub score: f64,
    pub passed: bool,
}

/// Pure assembly of a snapshot from counted signals.
///
/// Edge cases: a course with zero lessons is vacuously lesson-complete and
/// zero quizzes are vacuously all passed; the average score over zero
/// attempted quizzes is undefined, not zero.
pub fn assemble_snapshot(
    user_id: Uuid,
    course_id: Uuid,
    total_lessons: i64,
    completed_lessons: i64,
    total_quizzes: i64,
    best_attempts: &[BestAttempt],
) -> CourseProgressSnapshot {
    let lesson_completion_rate = if total_lessons == 0 {
        1.0
    } else {
        completed_lessons as f64 / total_lessons as f64
    };

    let passed_quizzes = best_attempts.iter().filter(|b| b.passed).count() as i64;
    let quiz_pass_rate = if total_quizzes == 0 {
        1.0
    } else {
        passed_quizzes as f64 / total_quizzes as f64
    };

    let average_quiz_score = if best_attempts.is_empty() {
        None
    } else {
        Some(best_attempts.iter().map(|b| b.score).sum::<f64>() / best_attempts.len() as f64)
    };

    // Both gates must close fully; compared on counts so float rounding
    // can never fake completion.
    let is_course_completed =
        completed_lessons >= total_lessons && passed_quizzes >= total_quizzes;

    CourseProgressSnapshot {
        user_id,
        course_id,
        lesson_completion_rate,
        quiz_pass_rate,
        average_quiz_score,
        is_course_completed,
    }
}

/// Recompute the snapshot for (user, course) from current records.
pub async fn compute_snapshot<S>(
    store: &S,
    user_id: Uuid,
    course_id: Uuid,
) -> EngineResult<CourseProgressSnapshot>
where
    S: CourseCatalog + ProgressStore,
{
    store
        .get_course(course_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("course {course_id}")))?;

    let total_lessons = store.lesson_count(course_id).await?;
    let completed_lessons = store.completed_lesson_count(user_id, course_id).await?;

    let quiz_ids = store.quiz_ids(course_id).await?;
    let total_quizzes = quiz_ids.len() as i64;
    let mut best_attempts = Vec::with_capacity(quiz_ids.len());
    for quiz_id in quiz_ids {
        let attempts = store.quiz_attempts(user_id, quiz_id).await?;
        if let Some(best) = progress::standing(&attempts).best {
            best_attempts.push(BestAttempt {
                score: best.score,
                passed: best.passed,
            });
        }
    }

    Ok(assemble_snapshot(
        user_id,
        course_id,
        total_lessons,
        completed_lessons,
        total_quizzes,
        &best_attempts,
    ))
}

/// Ordinal grade tiers, least to most generous.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grade {
    Pass,
    Fair,
    Good,
    Excellent,
}

impl Grade {
    /// Top-down threshold mapping; total over [0, 100].
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Excellent
        } else if score >= 80.0 {
            Self::Good
        } else if score >= 70.0 {
            Self::Fair
        } else {
            Self::Pass
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Fair => "FAIR",
            Self::Pass => "PASS",
        }
    }
}

impl FromStr for Grade {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXCELLENT" => Ok(Self::Excellent),
            "GOOD" => Ok(Self::Good),
            "FAIR" => Ok(Self::Fair),
            "PASS" => Ok(Self::Pass),
            other => Err(EngineError::storage(format!("unknown grade '{other}'"))),
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure eligibility decision. Deliberately ignores whether a certificate
/// already exists; that check belongs to the issuance coordinator.
#[derive(Debug, Clone)]
pub struct Eligibility {
    pub eligible: bool,
    pub unmet: Vec<String>,
}

impl Eligibility {
    pub fn evaluate(snapshot: &CourseProgressSnapshot) -> Self {
        let mut unmet = Vec::new();
        if snapshot.lesson_completion_rate < 1.0 {
            unmet.push("not all lessons completed".to_string());
        }
        if snapshot.quiz_pass_rate < 1.0 {
            unmet.push("not all quizzes passed".to_string());
        }
        Self {
            eligible: snapshot.is_course_completed,
            unmet,
        }
    }
}
