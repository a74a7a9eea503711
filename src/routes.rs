use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::Db;
use crate::error::EngineError;
use crate::issuance::CertificateIssuer;
use crate::models::*;
use crate::progress;
use crate::snapshot::{self, Eligibility, Grade};
use crate::store::{CertificateStore, CourseCatalog, EnrollmentStore, PgStore};
use crate::{grading, grading::GradedSubmission};

#[derive(Clone)]
pub struct AppState {
    store: Arc<PgStore>,
    issuer: Arc<CertificateIssuer<PgStore>>,
}

pub fn router(db: Db) -> Router {
    let lock_timeout = std::env::var("CLAIM_LOCK_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5));

    let store = Arc::new(PgStore::new(db));
    let issuer = Arc::new(CertificateIssuer::with_lock_timeout(
        store.clone(),
        lock_timeout,
    ));
    let state = AppState { store, issuer };

    Router::new()
        // catalog + enrollment
        .route("/api/courses", post(create_course))
        .route("/api/courses/:course_id", get(get_course))
        .route("/api/enrollments", post(enroll))
        // progress events
        .route("/api/progress/lessons", post(record_lesson_progress))
        .route("/api/quizzes/:quiz_id/submissions", post(submit_quiz))
        // derived, lock-free reads
        .route("/api/progress/:user_id/:course_id", get(get_progress))
        .route("/api/quizzes/:quiz_id/results/:user_id", get(quiz_standing))
        // certificates
        .route("/api/certificates/claim", post(claim_certificate))
        .route("/api/certificates/:user_id", get(list_certificates))
        .route("/api/verify/:code", get(verify_certificate))
        .with_state(state)
}

async fn create_course(
    State(st): State<AppState>,
    Json(req): Json<CreateCourseReq>,
) -> Result<Json<CourseDetail>, (StatusCode, String)> {
    if req.title.trim().is_empty() {
        return Err(e400("title is required"));
    }

    let course = Course {
        id: Uuid::new_v4(),
        title: req.title,
        created_at: Utc::now(),
    };

    let lessons: Vec<Lesson> = req
        .lessons
        .iter()
        .enumerate()
        .map(|(i, l)| Lesson {
            id: Uuid::new_v4(),
            course_id: course.id,
            title: l.title.clone(),
            position: i as i32,
        })
        .collect();

    let mut quizzes = Vec::with_capacity(req.quizzes.len());
    for q in &req.quizzes {
        if !(1..=100).contains(&q.passing_score) {
            return Err(e400("passing_score must be in 1..=100"));
        }
        grading::validate_question_set(&q.questions).map_err(http_err)?;
        quizzes.push(Quiz {
            id: Uuid::new_v4(),
            course_id: course.id,
            title: q.title.clone(),
            passing_score: q.passing_score,
            questions: serde_json::to_value(&q.questions).map_err(e500)?,
        });
    }

    st.store
        .insert_course(&course, &lessons, &quizzes)
        .await
        .map_err(http_err)?;

    let quiz_ids = quizzes.iter().map(|q| q.id).collect();
    Ok(Json(CourseDetail {
        course,
        lessons,
        quiz_ids,
    }))
}

async fn get_course(
    State(st): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseDetail>, (StatusCode, String)> {
    let course = st
        .store
        .get_course(course_id)
        .await
        .map_err(http_err)?
        .ok_or_else(|| http_err(EngineError::not_found(format!("course {course_id}"))))?;
    let lessons = st.store.list_lessons(course_id).await.map_err(http_err)?;
    let quiz_ids = st.store.quiz_ids(course_id).await.map_err(http_err)?;
    Ok(Json(CourseDetail {
        course,
        lessons,
        quiz_ids,
    }))
}

async fn enroll(
    State(st): State<AppState>,
    Json(req): Json<EnrollReq>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if st
        .store
        .get_course(req.course_id)
        .await
        .map_err(http_err)?
        .is_none()
    {
        return Err(http_err(EngineError::not_found(format!(
            "course {}",
            req.course_id
        ))));
    }
    if req.display_name.trim().is_empty() {
        return Err(e400("display_name is required"));
    }

    st.store
        .upsert_learner(req.user_id, req.display_name.trim())
        .await
        .map_err(http_err)?;
    st.store
        .set_enrollment(req.user_id, req.course_id, req.active)
        .await
        .map_err(http_err)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn record_lesson_progress(
    State(st): State<AppState>,
    Json(req): Json<LessonProgressReq>,
) -> Result<Json<LessonProgressRecord>, (StatusCode, String)> {
    let lesson = st
        .store
        .get_lesson(req.lesson_id)
        .await
        .map_err(http_err)?
        .ok_or_else(|| http_err(EngineError::not_found(format!("lesson {}", req.lesson_id))))?;
    require_enrollment(&st, req.user_id, lesson.course_id).await?;

    let record = progress::record_lesson_progress(st.store.as_ref(), &req)
        .await
        .map_err(http_err)?;
    Ok(Json(record))
}

async fn submit_quiz(
    State(st): State<AppState>,
    Path(quiz_id): Path<Uuid>,
    Json(req): Json<QuizSubmissionReq>,
) -> Result<Json<GradedSubmission>, (StatusCode, String)> {
    let quiz = st
        .store
        .get_quiz(quiz_id)
        .await
        .map_err(http_err)?
        .ok_or_else(|| http_err(EngineError::not_found(format!("quiz {quiz_id}"))))?;
    require_enrollment(&st, req.user_id, quiz.course_id).await?;

    let question_set = quiz.question_set().map_err(http_err)?;
    let graded =
        grading::grade(&question_set, &req.answers, quiz.passing_score).map_err(http_err)?;

    // A fully-pending (all-essay) submission is held for manual review and
    // records no attempt.
    if let (Some(score), Some(passed)) = (graded.score, graded.passed) {
        let result = QuizResult {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            quiz_id,
            course_id: quiz.course_id,
            score,
            passed,
            completed_at: Utc::now(),
        };
        progress::record_quiz_result(st.store.as_ref(), &result)
            .await
            .map_err(http_err)?;
    }

    Ok(Json(graded))
}

async fn get_progress(
    State(st): State<AppState>,
    Path((user_id, course_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ProgressReport>, (StatusCode, String)> {
    let snap = snapshot::compute_snapshot(st.store.as_ref(), user_id, course_id)
        .await
        .map_err(http_err)?;
    let eligibility = Eligibility::evaluate(&snap);
    let grade_preview = snap.average_quiz_score.map(Grade::from_score);
    Ok(Json(ProgressReport {
        snapshot: snap,
        eligible: eligibility.eligible,
        unmet: eligibility.unmet,
        grade_preview,
    }))
}

async fn quiz_standing(
    State(st): State<AppState>,
    Path((quiz_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<QuizStanding>, (StatusCode, String)> {
    if st
        .store
        .get_quiz(quiz_id)
        .await
        .map_err(http_err)?
        .is_none()
    {
        return Err(http_err(EngineError::not_found(format!("quiz {quiz_id}"))));
    }
    let standing = progress::quiz_standing(st.store.as_ref(), user_id, quiz_id)
        .await
        .map_err(http_err)?;
    Ok(Json(standing))
}

async fn claim_certificate(
    State(st): State<AppState>,
    Json(req): Json<ClaimReq>,
) -> Result<Json<Certificate>, (StatusCode, String)> {
    require_enrollment(&st, req.user_id, req.course_id).await?;
    let certificate = st
        .issuer
        .claim(req.user_id, req.course_id)
        .await
        .map_err(http_err)?;
    Ok(Json(certificate))
}

async fn list_certificates(
    State(st): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Certificate>>, (StatusCode, String)> {
    let certs = st
        .store
        .list_certificates(user_id)
        .await
        .map_err(http_err)?;
    Ok(Json(certs))
}

/// Public lookup by code. Returns display fields only; internal ids and
/// contact info never leave this endpoint.
async fn verify_certificate(
    State(st): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<CertificateVerification>, (StatusCode, String)> {
    let cert = st
        .store
        .get_certificate_by_code(&code)
        .await
        .map_err(http_err)?;

    let Some(cert) = cert else {
        return Ok(Json(CertificateVerification {
            valid: false,
            learner_name: None,
            course_title: None,
            grade: None,
            issued_at: None,
            message: "certificate not found".into(),
        }));
    };

    let learner_name = st
        .store
        .get_learner_name(cert.user_id)
        .await
        .map_err(http_err)?;
    let course_title = st
        .store
        .get_course(cert.course_id)
        .await
        .map_err(http_err)?
        .map(|c| c.title);

    Ok(Json(CertificateVerification {
        valid: true,
        learner_name,
        course_title,
        grade: Some(cert.grade),
        issued_at: Some(cert.issued_at),
        message: "certificate is valid".into(),
    }))
}

// --- helpers ---

async fn require_enrollment(
    st: &AppState,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<(), (StatusCode, String)> {
    let enrolled = st
        .store
        .is_actively_enrolled(user_id, course_id)
        .await
        .map_err(http_err)?;
    if !enrolled {
        return Err((
            StatusCode::FORBIDDEN,
            "no active enrollment for this course".into(),
        ));
    }
    Ok(())
}

fn http_err(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::NotEligible { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Busy => StatusCode::TOO_MANY_REQUESTS,
        EngineError::Storage { .. } => {
            tracing::error!(error = %e, "storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

fn e400<T: Into<String>>(msg: T) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn e500<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    tracing::error!(error = %e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
