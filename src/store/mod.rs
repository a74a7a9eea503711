//! Storage ports for the engine.
//!
//! The engine talks to persistence through these narrow traits; the
//! Postgres backend serves the HTTP surface and the in-memory backend
//! serves tests and local development.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{
    Certificate, Course, Lesson, LessonProgressRecord, LessonStatus, Quiz, QuizResult,
};

/// Read-only course catalog, plus the seeding write the authoring endpoint
/// needs.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn insert_course(
        &self,
        course: &Course,
        lessons: &[Lesson],
        quizzes: &[Quiz],
    ) -> EngineResult<()>;

    async fn get_course(&self, course_id: Uuid) -> EngineResult<Option<Course>>;

    async fn get_lesson(&self, lesson_id: Uuid) -> EngineResult<Option<Lesson>>;

    async fn get_quiz(&self, quiz_id: Uuid) -> EngineResult<Option<Quiz>>;

    async fn list_lessons(&self, course_id: Uuid) -> EngineResult<Vec<Lesson>>;

    async fn lesson_count(&self, course_id: Uuid) -> EngineResult<i64>;

    async fn quiz_ids(&self, course_id: Uuid) -> EngineResult<Vec<Uuid>>;
}

/// Fields a lesson-progress event carries; merging against the stored row
/// is the backend's job (see [`crate::progress::merge_lesson_progress`]).
#[derive(Debug, Clone)]
pub struct LessonProgressUpdate {
    pub user_id: Uuid,
    pub lesson_id: Uuid,
    pub course_id: Uuid,
    pub status: LessonStatus,
    pub progress_fraction: f64,
    pub time_spent_secs: i64,
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Upsert one (user, lesson) record. Completed status is sticky: a
    /// later non-completed update must not regress status or fraction,
    /// while time spent still accumulates.
    async fn upsert_lesson_progress(
        &self,
        update: &LessonProgressUpdate,
    ) -> EngineResult<LessonProgressRecord>;

    async fn get_lesson_progress(
        &self,
        user_id: Uuid,
        lesson_id: Uuid,
    ) -> EngineResult<Option<LessonProgressRecord>>;

    async fn completed_lesson_count(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<i64>;

    /// Append-only; every attempt is a new row.
    async fn append_quiz_result(&self, result: &QuizResult) -> EngineResult<()>;

    async fn quiz_attempts(&self, user_id: Uuid, quiz_id: Uuid) -> EngineResult<Vec<QuizResult>>;
}

/// Outcome of a conditional certificate insert. Losing the storage race is
/// a named result, not an error.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Certificate),
    AlreadyExists(Certificate),
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Insert if no certificate exists for (user, course); otherwise return
    /// the existing row. The storage-level uniqueness constraint is the
    /// source of truth under multi-process deployment.
    async fn insert_certificate_if_absent(
        &self,
        certificate: &Certificate,
    ) -> EngineResult<InsertOutcome>;

    async fn get_certificate(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> EngineResult<Option<Certificate>>;

    async fn get_certificate_by_code(&self, code: &str) -> EngineResult<Option<Certificate>>;

    async fn list_certificates(&self, user_id: Uuid) -> EngineResult<Vec<Certificate>>;
}

/// Enrollment and learner identity. Consulted by the HTTP layer only; the
/// engine assumes access was already gated.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn upsert_learner(&self, user_id: Uuid, display_name: &str) -> EngineResult<()>;

    async fn get_learner_name(&self, user_id: Uuid) -> EngineResult<Option<String>>;

    async fn set_enrollment(&self, user_id: Uuid, course_id: Uuid, active: bool)
        -> EngineResult<()>;

    async fn is_actively_enrolled(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<bool>;
}

/// Convenience bound for code that needs the full storage surface.
pub trait Store: CourseCatalog + ProgressStore + CertificateStore + EnrollmentStore {}

impl<T: CourseCatalog + ProgressStore + CertificateStore + EnrollmentStore> Store for T {}
