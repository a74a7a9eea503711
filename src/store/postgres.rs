//! Postgres storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Certificate, Course, Lesson, LessonProgressRecord, LessonStatus, Quiz, QuizResult,
};
use crate::snapshot::Grade;
use crate::store::{
    CertificateStore, CourseCatalog, EnrollmentStore, InsertOutcome, LessonProgressUpdate,
    ProgressStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }
}

// Status and grade columns are TEXT; these row types carry them as strings
// and convert at the boundary.

#[derive(sqlx::FromRow)]
struct LessonProgressRow {
    user_id: Uuid,
    lesson_id: Uuid,
    course_id: Uuid,
    status: String,
    progress_fraction: f64,
    time_spent_secs: i64,
    updated_at: DateTime<Utc>,
}

impl LessonProgressRow {
    fn into_record(self) -> EngineResult<LessonProgressRecord> {
        Ok(LessonProgressRecord {
            user_id: self.user_id,
            lesson_id: self.lesson_id,
            course_id: self.course_id,
            status: LessonStatus::from_str(&self.status)?,
            progress_fraction: self.progress_fraction,
            time_spent_secs: self.time_spent_secs,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QuizResultRow {
    id: Uuid,
    user_id: Uuid,
    quiz_id: Uuid,
    course_id: Uuid,
    score: f64,
    passed: bool,
    completed_at: DateTime<Utc>,
}

impl From<QuizResultRow> for QuizResult {
    fn from(r: QuizResultRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            quiz_id: r.quiz_id,
            course_id: r.course_id,
            score: r.score,
            passed: r.passed,
            completed_at: r.completed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CertificateRow {
    id: Uuid,
    certificate_code: String,
    user_id: Uuid,
    course_id: Uuid,
    grade: String,
    average_score: f64,
    issued_at: DateTime<Utc>,
}

impl CertificateRow {
    fn into_certificate(self) -> EngineResult<Certificate> {
        Ok(Certificate {
            id: self.id,
            certificate_code: self.certificate_code,
            user_id: self.user_id,
            course_id: self.course_id,
            grade: Grade::from_str(&self.grade)?,
            average_score: self.average_score,
            issued_at: self.issued_at,
        })
    }
}

#[async_trait]
impl CourseCatalog for PgStore {
    async fn insert_course(
        &self,
        course: &Course,
        lessons: &[Lesson],
        quizzes: &[Quiz],
    ) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO courses (id, title, created_at) VALUES ($1, $2, $3)")
            .bind(course.id)
            .bind(&course.title)
            .bind(course.created_at)
            .execute(&mut *tx)
            .await?;

        for lesson in lessons {
            sqlx::query(
                "INSERT INTO lessons (id, course_id, title, position) VALUES ($1, $2, $3, $4)",
            )
            .bind(lesson.id)
            .bind(lesson.course_id)
            .bind(&lesson.title)
            .bind(lesson.position)
            .execute(&mut *tx)
            .await?;
        }

        for quiz in quizzes {
            sqlx::query(
                r#"
                INSERT INTO quizzes (id, course_id, title, passing_score, questions)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(quiz.id)
            .bind(quiz.course_id)
            .bind(&quiz.title)
            .bind(quiz.passing_score)
            .bind(&quiz.questions)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_course(&self, course_id: Uuid) -> EngineResult<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(
            "SELECT id, title, created_at FROM courses WHERE id = $1",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(course)
    }

    async fn get_lesson(&self, lesson_id: Uuid) -> EngineResult<Option<Lesson>> {
        let lesson = sqlx::query_as::<_, Lesson>(
            "SELECT id, course_id, title, position FROM lessons WHERE id = $1",
        )
        .bind(lesson_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lesson)
    }

    async fn get_quiz(&self, quiz_id: Uuid) -> EngineResult<Option<Quiz>> {
        let quiz = sqlx::query_as::<_, Quiz>(
            r#"
            SELECT id, course_id, title, passing_score, questions
            FROM quizzes WHERE id = $1
            "#,
        )
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(quiz)
    }

    async fn list_lessons(&self, course_id: Uuid) -> EngineResult<Vec<Lesson>> {
        let lessons = sqlx::query_as::<_, Lesson>(
            r#"
            SELECT id, course_id, title, position
            FROM lessons WHERE course_id = $1
            ORDER BY position
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lessons)
    }

    async fn lesson_count(&self, course_id: Uuid) -> EngineResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM lessons WHERE course_id = $1")
                .bind(course_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn quiz_ids(&self, course_id: Uuid) -> EngineResult<Vec<Uuid>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM quizzes WHERE course_id = $1 ORDER BY id")
                .bind(course_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

#[async_trait]
impl ProgressStore for PgStore {
    async fn upsert_lesson_progress(
        &self,
        update: &LessonProgressUpdate,
    ) -> EngineResult<LessonProgressRecord> {
        // Same sticky policy as progress::merge_lesson_progress, expressed
        // in the upsert itself so concurrent events cannot interleave a
        // regression.
        let row = sqlx::query_as::<_, LessonProgressRow>(
            r#"
            INSERT INTO lesson_progress
                (user_id, lesson_id, course_id, status, progress_fraction, time_spent_secs, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (user_id, lesson_id) DO UPDATE SET
                status = CASE
                    WHEN lesson_progress.status = 'completed' THEN lesson_progress.status
                    ELSE EXCLUDED.status
                END,
                progress_fraction = CASE
                    WHEN lesson_progress.status = 'completed' THEN lesson_progress.progress_fraction
                    ELSE EXCLUDED.progress_fraction
                END,
                time_spent_secs = lesson_progress.time_spent_secs + EXCLUDED.time_spent_secs,
                updated_at = now()
            RETURNING user_id, lesson_id, course_id, status, progress_fraction,
                      time_spent_secs, updated_at
            "#,
        )
        .bind(update.user_id)
        .bind(update.lesson_id)
        .bind(update.course_id)
        .bind(update.status.as_str())
        .bind(update.progress_fraction)
        .bind(update.time_spent_secs)
        .fetch_one(&self.pool)
        .await?;
        row.into_record()
    }

    async fn get_lesson_progress(
        &self,
        user_id: Uuid,
        lesson_id: Uuid,
    ) -> EngineResult<Option<LessonProgressRecord>> {
        let row = sqlx::query_as::<_, LessonProgressRow>(
            r#"
            SELECT user_id, lesson_id, course_id, status, progress_fraction,
                   time_spent_secs, updated_at
            FROM lesson_progress
            WHERE user_id = $1 AND lesson_id = $2
            "#,
        )
        .bind(user_id)
        .bind(lesson_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(LessonProgressRow::into_record).transpose()
    }

    async fn completed_lesson_count(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM lesson_progress
            WHERE user_id = $1 AND course_id = $2 AND status = 'completed'
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn append_quiz_result(&self, result: &QuizResult) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO quiz_results
                (id, user_id, quiz_id, course_id, score, passed, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(result.id)
        .bind(result.user_id)
        .bind(result.quiz_id)
        .bind(result.course_id)
        .bind(result.score)
        .bind(result.passed)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn quiz_attempts(&self, user_id: Uuid, quiz_id: Uuid) -> EngineResult<Vec<QuizResult>> {
        let rows = sqlx::query_as::<_, QuizResultRow>(
            r#"
            SELECT id, user_id, quiz_id, course_id, score, passed, completed_at
            FROM quiz_results
            WHERE user_id = $1 AND quiz_id = $2
            ORDER BY completed_at
            "#,
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(QuizResult::from).collect())
    }
}

#[async_trait]
impl CertificateStore for PgStore {
    async fn insert_certificate_if_absent(
        &self,
        certificate: &Certificate,
    ) -> EngineResult<InsertOutcome> {
        let inserted = sqlx::query_as::<_, CertificateRow>(
            r#"
            INSERT INTO certificates
                (id, certificate_code, user_id, course_id, grade, average_score, issued_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, course_id) DO NOTHING
            RETURNING id, certificate_code, user_id, course_id, grade, average_score, issued_at
            "#,
        )
        .bind(certificate.id)
        .bind(&certificate.certificate_code)
        .bind(certificate.user_id)
        .bind(certificate.course_id)
        .bind(certificate.grade.as_str())
        .bind(certificate.average_score)
        .bind(certificate.issued_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(InsertOutcome::Inserted(row.into_certificate()?)),
            None => {
                // Conditional insert lost the race; the winning row must
                // exist now.
                let winner = self
                    .get_certificate(certificate.user_id, certificate.course_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::storage(
                            "certificate insert conflicted but no existing row was found",
                        )
                    })?;
                Ok(InsertOutcome::AlreadyExists(winner))
            }
        }
    }

    async fn get_certificate(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> EngineResult<Option<Certificate>> {
        let row = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT id, certificate_code, user_id, course_id, grade, average_score, issued_at
            FROM certificates
            WHERE user_id = $1 AND course_id = $2
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CertificateRow::into_certificate).transpose()
    }

    async fn get_certificate_by_code(&self, code: &str) -> EngineResult<Option<Certificate>> {
        let row = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT id, certificate_code, user_id, course_id, grade, average_score, issued_at
            FROM certificates
            WHERE certificate_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CertificateRow::into_certificate).transpose()
    }

    async fn list_certificates(&self, user_id: Uuid) -> EngineResult<Vec<Certificate>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT id, certificate_code, user_id, course_id, grade, average_score, issued_at
            FROM certificates
            WHERE user_id = $1
            ORDER BY issued_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(CertificateRow::into_certificate)
            .collect()
    }
}

#[async_trait]
impl EnrollmentStore for PgStore {
    async fn upsert_learner(&self, user_id: Uuid, display_name: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO learners (id, display_name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET display_name = EXCLUDED.display_name
            "#,
        )
        .bind(user_id)
        .bind(display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_learner_name(&self, user_id: Uuid) -> EngineResult<Option<String>> {
        let name: Option<String> =
            sqlx::query_scalar("SELECT display_name FROM learners WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(name)
    }

    async fn set_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        active: bool,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO enrollments (user_id, course_id, active)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, course_id) DO UPDATE SET active = EXCLUDED.active
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_actively_enrolled(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<bool> {
        let active: Option<bool> = sqlx::query_scalar(
            "SELECT active FROM enrollments WHERE user_id = $1 AND course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(active.unwrap_or(false))
    }
}
