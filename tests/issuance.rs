//! Concurrency and idempotence tests for certificate issuance.

mod common;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use learnhub_backend::error::{EngineError, EngineResult};
use learnhub_backend::issuance::CertificateIssuer;
use learnhub_backend::models::{Certificate, Course, Lesson, Quiz, QuizResult};
use learnhub_backend::snapshot::Grade;
use learnhub_backend::store::{
    CertificateStore, CourseCatalog, InsertOutcome, LessonProgressUpdate, MemoryStore,
    ProgressStore,
};

use common::{make_eligible, seed_course};

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_claims_issue_exactly_once() {
    let fixture = seed_course(2, &[60]).await;
    let user = Uuid::new_v4();
    make_eligible(&fixture, user, 85.0).await;

    let issuer = Arc::new(CertificateIssuer::new(fixture.store.clone()));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let issuer = issuer.clone();
        let course_id = fixture.course_id;
        handles.push(tokio::spawn(
            async move { issuer.claim(user, course_id).await },
        ));
    }

    let mut ids = HashSet::new();
    let mut codes = HashSet::new();
    for handle in handles {
        let cert = handle.await.unwrap().expect("every claim must succeed");
        ids.insert(cert.id);
        codes.insert(cert.certificate_code);
    }

    // All callers saw the same certificate and only one row exists.
    assert_eq!(ids.len(), 1);
    assert_eq!(codes.len(), 1);
    let stored = fixture.store.list_certificates(user).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn sequential_double_claim_is_idempotent() {
    let fixture = seed_course(2, &[60]).await;
    let user = Uuid::new_v4();
    make_eligible(&fixture, user, 85.0).await;

    let issuer = CertificateIssuer::new(fixture.store.clone());
    let first = issuer.claim(user, fixture.course_id).await.unwrap();
    let second = issuer.claim(user, fixture.course_id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.certificate_code, second.certificate_code);
    assert_eq!(first.grade, second.grade);
    assert_eq!(
        fixture.store.list_certificates(user).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn ineligible_claim_fails_and_persists_nothing() {
    let fixture = seed_course(2, &[60]).await;
    let user = Uuid::new_v4();
    for lesson_id in fixture.lesson_ids.clone() {
        common::complete_lesson(&fixture, user, lesson_id).await;
    }
    // Best attempt below the passing threshold.
    common::record_attempt(&fixture, user, fixture.quiz_ids[0], 55.0, false).await;

    let issuer = CertificateIssuer::new(fixture.store.clone());
    let err = issuer.claim(user, fixture.course_id).await.unwrap_err();
    match err {
        EngineError::NotEligible { unmet } => {
            assert_eq!(unmet, vec!["not all quizzes passed".to_string()]);
        }
        other => panic!("expected NotEligible, got {other:?}"),
    }
    assert!(fixture
        .store
        .get_certificate(user, fixture.course_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn grade_reflects_average_of_best_scores() {
    let fixture = seed_course(1, &[60, 60]).await;
    let user = Uuid::new_v4();
    common::complete_lesson(&fixture, user, fixture.lesson_ids[0]).await;
    common::record_attempt(&fixture, user, fixture.quiz_ids[0], 90.0, true).await;
    common::record_attempt(&fixture, user, fixture.quiz_ids[1], 70.0, true).await;

    let issuer = CertificateIssuer::new(fixture.store.clone());
    let cert = issuer.claim(user, fixture.course_id).await.unwrap();
    assert_eq!(cert.average_score, 80.0);
    assert_eq!(cert.grade, Grade::Good);
}

#[tokio::test]
async fn lesson_only_course_grades_at_full_marks() {
    let fixture = seed_course(2, &[]).await;
    let user = Uuid::new_v4();
    make_eligible(&fixture, user, 0.0).await;

    let issuer = CertificateIssuer::new(fixture.store.clone());
    let cert = issuer.claim(user, fixture.course_id).await.unwrap();
    assert_eq!(cert.average_score, 100.0);
    assert_eq!(cert.grade, Grade::Excellent);
}

// Store wrapper that stalls certificate inserts for one designated pair,
// used to observe lock-wait timeouts and cross-pair isolation.
struct StallingStore {
    inner: Arc<MemoryStore>,
    stalled_pair: (Uuid, Uuid),
    stall: Duration,
}

#[async_trait]
impl CourseCatalog for StallingStore {
    async fn insert_course(
        &self,
        course: &Course,
        lessons: &[Lesson],
        quizzes: &[Quiz],
    ) -> EngineResult<()> {
        self.inner.insert_course(course, lessons, quizzes).await
    }

    async fn get_course(&self, course_id: Uuid) -> EngineResult<Option<Course>> {
        self.inner.get_course(course_id).await
    }

    async fn get_lesson(&self, lesson_id: Uuid) -> EngineResult<Option<Lesson>> {
        self.inner.get_lesson(lesson_id).await
    }

    async fn get_quiz(&self, quiz_id: Uuid) -> EngineResult<Option<Quiz>> {
        self.inner.get_quiz(quiz_id).await
    }

    async fn list_lessons(&self, course_id: Uuid) -> EngineResult<Vec<Lesson>> {
        self.inner.list_lessons(course_id).await
    }

    async fn lesson_count(&self, course_id: Uuid) -> EngineResult<i64> {
        self.inner.lesson_count(course_id).await
    }

    async fn quiz_ids(&self, course_id: Uuid) -> EngineResult<Vec<Uuid>> {
        self.inner.quiz_ids(course_id).await
    }
}

#[async_trait]
impl ProgressStore for StallingStore {
    async fn upsert_lesson_progress(
        &self,
        update: &LessonProgressUpdate,
    ) -> EngineResult<learnhub_backend::models::LessonProgressRecord> {
        self.inner.upsert_lesson_progress(update).await
    }

    async fn get_lesson_progress(
        &self,
        user_id: Uuid,
        lesson_id: Uuid,
    ) -> EngineResult<Option<learnhub_backend::models::LessonProgressRecord>> {
        self.inner.get_lesson_progress(user_id, lesson_id).await
    }

    async fn completed_lesson_count(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<i64> {
        self.inner.completed_lesson_count(user_id, course_id).await
    }

    async fn append_quiz_result(&self, result: &QuizResult) -> EngineResult<()> {
        self.inner.append_quiz_result(result).await
    }

    async fn quiz_attempts(&self, user_id: Uuid, quiz_id: Uuid) -> EngineResult<Vec<QuizResult>> {
        self.inner.quiz_attempts(user_id, quiz_id).await
    }
}

#[async_trait]
impl CertificateStore for StallingStore {
    async fn insert_certificate_if_absent(
        &self,
        certificate: &Certificate,
    ) -> EngineResult<InsertOutcome> {
        if (certificate.user_id, certificate.course_id) == self.stalled_pair {
            tokio::time::sleep(self.stall).await;
        }
        self.inner.insert_certificate_if_absent(certificate).await
    }

    async fn get_certificate(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> EngineResult<Option<Certificate>> {
        self.inner.get_certificate(user_id, course_id).await
    }

    async fn get_certificate_by_code(&self, code: &str) -> EngineResult<Option<Certificate>> {
        self.inner.get_certificate_by_code(code).await
    }

    async fn list_certificates(&self, user_id: Uuid) -> EngineResult<Vec<Certificate>> {
        self.inner.list_certificates(user_id).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn contended_pair_times_out_while_distinct_pair_proceeds() {
    let fixture = seed_course(1, &[60]).await;
    let slow_user = Uuid::new_v4();
    let fast_user = Uuid::new_v4();
    make_eligible(&fixture, slow_user, 85.0).await;
    make_eligible(&fixture, fast_user, 85.0).await;

    let store = Arc::new(StallingStore {
        inner: fixture.store.clone(),
        stalled_pair: (slow_user, fixture.course_id),
        stall: Duration::from_millis(400),
    });
    let issuer = Arc::new(CertificateIssuer::with_lock_timeout(
        store,
        Duration::from_millis(100),
    ));

    let slow = {
        let issuer = issuer.clone();
        let course_id = fixture.course_id;
        tokio::spawn(async move { issuer.claim(slow_user, course_id).await })
    };
    // Give the slow claim time to take its lock.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Same pair: bounded wait, then a retryable busy signal.
    let contended = issuer.claim(slow_user, fixture.course_id).await;
    assert!(matches!(contended, Err(EngineError::Busy)));

    // Distinct pair: unaffected by the stalled key.
    let started = Instant::now();
    let other = issuer.claim(fast_user, fixture.course_id).await.unwrap();
    assert_eq!(other.user_id, fast_user);
    assert!(started.elapsed() < Duration::from_millis(300));

    let slow_cert = slow.await.unwrap().unwrap();
    assert_eq!(slow_cert.user_id, slow_user);
}

// Wrapper that plants a competing row right before delegating the insert,
// simulating another process winning the storage race between the
// existence check and the write.
struct RacingStore {
    inner: Arc<MemoryStore>,
    winner_code: String,
}

#[async_trait]
impl CourseCatalog for RacingStore {
    async fn insert_course(
        &self,
        course: &Course,
        lessons: &[Lesson],
        quizzes: &[Quiz],
    ) -> EngineResult<()> {
        self.inner.insert_course(course, lessons, quizzes).await
    }

    async fn get_course(&self, course_id: Uuid) -> EngineResult<Option<Course>> {
        self.inner.get_course(course_id).await
    }

    async fn get_lesson(&self, lesson_id: Uuid) -> EngineResult<Option<Lesson>> {
        self.inner.get_lesson(lesson_id).await
    }

    async fn get_quiz(&self, quiz_id: Uuid) -> EngineResult<Option<Quiz>> {
        self.inner.get_quiz(quiz_id).await
    }

    async fn list_lessons(&self, course_id: Uuid) -> EngineResult<Vec<Lesson>> {
        self.inner.list_lessons(course_id).await
    }

    async fn lesson_count(&self, course_id: Uuid) -> EngineResult<i64> {
        self.inner.lesson_count(course_id).await
    }

    async fn quiz_ids(&self, course_id: Uuid) -> EngineResult<Vec<Uuid>> {
        self.inner.quiz_ids(course_id).await
    }
}

#[async_trait]
impl ProgressStore for RacingStore {
    async fn upsert_lesson_progress(
        &self,
        update: &LessonProgressUpdate,
    ) -> EngineResult<learnhub_backend::models::LessonProgressRecord> {
        self.inner.upsert_lesson_progress(update).await
    }

    async fn get_lesson_progress(
        &self,
        user_id: Uuid,
        lesson_id: Uuid,
    ) -> EngineResult<Option<learnhub_backend::models::LessonProgressRecord>> {
        self.inner.get_lesson_progress(user_id, lesson_id).await
    }

    async fn completed_lesson_count(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<i64> {
        self.inner.completed_lesson_count(user_id, course_id).await
    }

    async fn append_quiz_result(&self, result: &QuizResult) -> EngineResult<()> {
        self.inner.append_quiz_result(result).await
    }

    async fn quiz_attempts(&self, user_id: Uuid, quiz_id: Uuid) -> EngineResult<Vec<QuizResult>> {
        self.inner.quiz_attempts(user_id, quiz_id).await
    }
}

#[async_trait]
impl CertificateStore for RacingStore {
    async fn insert_certificate_if_absent(
        &self,
        certificate: &Certificate,
    ) -> EngineResult<InsertOutcome> {
        let winner = Certificate {
            id: Uuid::new_v4(),
            certificate_code: self.winner_code.clone(),
            ..certificate.clone()
        };
        self.inner.insert_certificate_if_absent(&winner).await?;
        self.inner.insert_certificate_if_absent(certificate).await
    }

    async fn get_certificate(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> EngineResult<Option<Certificate>> {
        self.inner.get_certificate(user_id, course_id).await
    }

    async fn get_certificate_by_code(&self, code: &str) -> EngineResult<Option<Certificate>> {
        self.inner.get_certificate_by_code(code).await
    }

    async fn list_certificates(&self, user_id: Uuid) -> EngineResult<Vec<Certificate>> {
        self.inner.list_certificates(user_id).await
    }
}

#[tokio::test]
async fn losing_the_storage_race_returns_the_winning_row() {
    let fixture = seed_course(1, &[60]).await;
    let user = Uuid::new_v4();
    make_eligible(&fixture, user, 95.0).await;

    let winner_code = format!("LH-{}-RACEWINS", Utc::now().format("%Y%m%d"));
    let store = Arc::new(RacingStore {
        inner: fixture.store.clone(),
        winner_code: winner_code.clone(),
    });
    let issuer = CertificateIssuer::new(store);

    // The claim must succeed and hand back the row the "other process"
    // persisted, not an error and not a second row.
    let cert = issuer.claim(user, fixture.course_id).await.unwrap();
    assert_eq!(cert.certificate_code, winner_code);
    assert_eq!(
        fixture.store.list_certificates(user).await.unwrap().len(),
        1
    );
}
