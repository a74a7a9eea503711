//! In-memory storage backend.
//!
//! Backs the test suite and local experiments; mirrors the Postgres
//! backend's semantics, including the conditional certificate insert and
//! the sticky lesson-progress upsert.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{
    Certificate, Course, Lesson, LessonProgressRecord, LessonStatus, Quiz, QuizResult,
};
use crate::progress::merge_lesson_progress;
use crate::store::{
    CertificateStore, CourseCatalog, EnrollmentStore, InsertOutcome, LessonProgressUpdate,
    ProgressStore,
};

#[derive(Default)]
pub struct MemoryStore {
    courses: Mutex<HashMap<Uuid, Course>>,
    lessons: Mutex<HashMap<Uuid, Lesson>>,
    quizzes: Mutex<HashMap<Uuid, Quiz>>,
    lesson_progress: Mutex<HashMap<(Uuid, Uuid), LessonProgressRecord>>,
    quiz_results: Mutex<Vec<QuizResult>>,
    certificates: Mutex<HashMap<(Uuid, Uuid), Certificate>>,
    learners: Mutex<HashMap<Uuid, String>>,
    enrollments: Mutex<HashMap<(Uuid, Uuid), bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CourseCatalog for MemoryStore {
    async fn insert_course(
        &self,
        course: &Course,
        lessons: &[Lesson],
        quizzes: &[Quiz],
    ) -> EngineResult<()> {
        self.courses
            .lock()
            .unwrap()
            .insert(course.id, course.clone());
        let mut lesson_map = self.lessons.lock().unwrap();
        for lesson in lessons {
            lesson_map.insert(lesson.id, lesson.clone());
        }
        let mut quiz_map = self.quizzes.lock().unwrap();
        for quiz in quizzes {
            quiz_map.insert(quiz.id, quiz.clone());
        }
        Ok(())
    }

    async fn get_course(&self, course_id: Uuid) -> EngineResult<Option<Course>> {
        Ok(self.courses.lock().unwrap().get(&course_id).cloned())
    }

    async fn get_lesson(&self, lesson_id: Uuid) -> EngineResult<Option<Lesson>> {
        Ok(self.lessons.lock().unwrap().get(&lesson_id).cloned())
    }

    async fn get_quiz(&self, quiz_id: Uuid) -> EngineResult<Option<Quiz>> {
        Ok(self.quizzes.lock().unwrap().get(&quiz_id).cloned())
    }

    async fn list_lessons(&self, course_id: Uuid) -> EngineResult<Vec<Lesson>> {
        let mut lessons: Vec<Lesson> = self
            .lessons
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.course_id == course_id)
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.position);
        Ok(lessons)
    }

    async fn lesson_count(&self, course_id: Uuid) -> EngineResult<i64> {
        Ok(self
            .lessons
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.course_id == course_id)
            .count() as i64)
    }

    async fn quiz_ids(&self, course_id: Uuid) -> EngineResult<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self
            .quizzes
            .lock()
            .unwrap()
            .values()
            .filter(|q| q.course_id == course_id)
            .map(|q| q.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn upsert_lesson_progress(
        &self,
        update: &LessonProgressUpdate,
    ) -> EngineResult<LessonProgressRecord> {
        let mut map = self.lesson_progress.lock().unwrap();
        let key = (update.user_id, update.lesson_id);
        let merged = merge_lesson_progress(map.get(&key), update);
        map.insert(key, merged.clone());
        Ok(merged)
    }

    async fn get_lesson_progress(
        &self,
        user_id: Uuid,
        lesson_id: Uuid,
    ) -> EngineResult<Option<LessonProgressRecord>> {
        Ok(self
            .lesson_progress
            .lock()
            .unwrap()
            .get(&(user_id, lesson_id))
            .cloned())
    }

    async fn completed_lesson_count(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<i64> {
        Ok(self
            .lesson_progress
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.user_id == user_id
                    && r.course_id == course_id
                    && r.status == LessonStatus::Completed
            })
            .count() as i64)
    }

    async fn append_quiz_result(&self, result: &QuizResult) -> EngineResult<()> {
        self.quiz_results.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn quiz_attempts(&self, user_id: Uuid, quiz_id: Uuid) -> EngineResult<Vec<QuizResult>> {
        Ok(self
            .quiz_results
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id && r.quiz_id == quiz_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn insert_certificate_if_absent(
        &self,
        certificate: &Certificate,
    ) -> EngineResult<InsertOutcome> {
        let mut map = self.certificates.lock().unwrap();
        let key = (certificate.user_id, certificate.course_id);
        match map.get(&key) {
            Some(existing) => Ok(InsertOutcome::AlreadyExists(existing.clone())),
            None => {
                map.insert(key, certificate.clone());
                Ok(InsertOutcome::Inserted(certificate.clone()))
            }
        }
    }

    async fn get_certificate(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> EngineResult<Option<Certificate>> {
        Ok(self
            .certificates
            .lock()
            .unwrap()
            .get(&(user_id, course_id))
            .cloned())
    }

    async fn get_certificate_by_code(&self, code: &str) -> EngineResult<Option<Certificate>> {
        Ok(self
            .certificates
            .lock()
            .unwrap()
            .values()
            .find(|c| c.certificate_code == code)
            .cloned())
    }

    async fn list_certificates(&self, user_id: Uuid) -> EngineResult<Vec<Certificate>> {
        let mut certs: Vec<Certificate> = self
            .certificates
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        certs.sort_by_key(|c| c.issued_at);
        certs.reverse();
        Ok(certs)
    }
}

#[async_trait]
impl EnrollmentStore for MemoryStore {
    async fn upsert_learner(&self, user_id: Uuid, display_name: &str) -> EngineResult<()> {
        self.learners
            .lock()
            .unwrap()
            .insert(user_id, display_name.to_string());
        Ok(())
    }

    async fn get_learner_name(&self, user_id: Uuid) -> EngineResult<Option<String>> {
        Ok(self.learners.lock().unwrap().get(&user_id).cloned())
    }

    async fn set_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        active: bool,
    ) -> EngineResult<()> {
        self.enrollments
            .lock()
            .unwrap()
            .insert((user_id, course_id), active);
        Ok(())
    }

    async fn is_actively_enrolled(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<bool> {
        Ok(self
            .enrollments
            .lock()
            .unwrap()
            .get(&(user_id, course_id))
            .copied()
            .unwrap_or(false))
    }
}
