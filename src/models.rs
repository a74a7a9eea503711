use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::EngineError;
use crate::grading::QuestionSet;

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Lesson {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub position: i32,
}

/// Quiz definition. `questions` holds the serialized [`QuestionSet`];
/// callers parse it on demand via [`Quiz::question_set`].
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Quiz {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    /// Percentage in 1..=100 a submission must reach to pass.
    pub passing_score: i32,
    pub questions: serde_json::Value,
}

impl Quiz {
    pub fn question_set(&self) -> Result<QuestionSet, EngineError> {
        serde_json::from_value(self.questions.clone()).map_err(|e| {
            EngineError::storage(format!("quiz {} has malformed questions: {e}", self.id))
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for LessonStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(EngineError::storage(format!(
                "unknown lesson status '{other}'"
            ))),
        }
    }
}

/// One row per (user, lesson); upserted on every progress event.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LessonProgressRecord {
    pub user_id: Uuid,
    pub lesson_id: Uuid,
    pub course_id: Uuid,
    pub status: LessonStatus,
    pub progress_fraction: f64,
    pub time_spent_secs: i64,
    pub updated_at: DateTime<Utc>,
}

/// One quiz attempt. Append-only; rows are never updated or deleted.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QuizResult {
    pub id: Uuid,
    pub user_id: Uuid,
    pub quiz_id: Uuid,
    pub course_id: Uuid,
    pub score: f64,
    pub passed: bool,
    pub completed_at: DateTime<Utc>,
}

/// Derived per-(user, course) progress view. Never persisted; recomputed
/// from lesson and quiz records on every read.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CourseProgressSnapshot {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub lesson_completion_rate: f64,
    pub quiz_pass_rate: f64,
    /// Mean of per-quiz best scores. `None` when no quiz has an attempt
    /// (including the zero-quiz course).
    pub average_quiz_score: Option<f64>,
    pub is_course_completed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Certificate {
    pub id: Uuid,
    /// Globally unique, human-shareable verification code.
    pub certificate_code: String,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub grade: crate::snapshot::Grade,
    pub average_score: f64,
    pub issued_at: DateTime<Utc>,
}

// ---- request / response shapes ----

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateCourseReq {
    pub title: String,
    #[serde(default)]
    pub lessons: Vec<CreateLessonReq>,
    #[serde(default)]
    pub quizzes: Vec<CreateQuizReq>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateLessonReq {
    pub title: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateQuizReq {
    pub title: String,
    pub passing_score: i32,
    pub questions: QuestionSet,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CourseDetail {
    pub course: Course,
    pub lessons: Vec<Lesson>,
    pub quiz_ids: Vec<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnrollReq {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LessonProgressReq {
    pub user_id: Uuid,
    pub lesson_id: Uuid,
    pub status: LessonStatus,
    pub progress_fraction: f64,
    #[serde(default)]
    pub time_spent_secs: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QuizSubmissionReq {
    pub user_id: Uuid,
    pub answers: crate::grading::SubmittedAnswers,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClaimReq {
    pub user_id: Uuid,
    pub course_id: Uuid,
}

/// Snapshot plus the derived eligibility/grade preview returned by the
/// progress endpoint. Safe for unlimited polling; takes no locks.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProgressReport {
    pub snapshot: CourseProgressSnapshot,
    pub eligible: bool,
    pub unmet: Vec<String>,
    pub grade_preview: Option<crate::snapshot::Grade>,
}

/// Current standing for one (user, quiz): best attempt drives eligibility,
/// latest attempt is for display only.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct QuizStanding {
    pub best: Option<QuizResult>,
    pub latest: Option<QuizResult>,
}

/// Public verification payload. Deliberately excludes user/course ids and
/// any contact info.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CertificateVerification {
    pub valid: bool,
    pub learner_name: Option<String>,
    pub course_title: Option<String>,
    pub grade: Option<crate::snapshot::Grade>,
    pub issued_at: Option<DateTime<Utc>>,
    pub message: String,
}
