//! Shared fixtures for the engine test suites.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use learnhub_backend::grading::{Question, QuestionKind, QuestionSet};
use learnhub_backend::models::{Course, Lesson, LessonStatus, Quiz, QuizResult};
use learnhub_backend::store::{CourseCatalog, LessonProgressUpdate, MemoryStore, ProgressStore};

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub course_id: Uuid,
    pub lesson_ids: Vec<Uuid>,
    pub quiz_ids: Vec<Uuid>,
}

pub fn single_choice_set() -> QuestionSet {
    QuestionSet {
        questions: vec![Question {
            id: Uuid::new_v4(),
            text: "pick a".into(),
            kind: QuestionKind::SingleChoice {
                options: vec!["a".into(), "b".into()],
                correct: "a".into(),
            },
            points: 1.0,
        }],
    }
}

/// Seed one course with `lesson_count` lessons and one quiz per entry of
/// `passing_scores`.
pub async fn seed_course(lesson_count: usize, passing_scores: &[i32]) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let course = Course {
        id: Uuid::new_v4(),
        title: "Applied Rust".into(),
        created_at: Utc::now(),
    };

    let lessons: Vec<Lesson> = (0..lesson_count)
        .map(|i| Lesson {
            id: Uuid::new_v4(),
            course_id: course.id,
            title: format!("lesson {i}"),
            position: i as i32,
        })
        .collect();

    let quizzes: Vec<Quiz> = passing_scores
        .iter()
        .map(|&passing_score| Quiz {
            id: Uuid::new_v4(),
            course_id: course.id,
            title: "checkpoint quiz".into(),
            passing_score,
            questions: serde_json::to_value(single_choice_set()).unwrap(),
        })
        .collect();

    store
        .insert_course(&course, &lessons, &quizzes)
        .await
        .unwrap();

    Fixture {
        store,
        course_id: course.id,
        lesson_ids: lessons.iter().map(|l| l.id).collect(),
        quiz_ids: quizzes.iter().map(|q| q.id).collect(),
    }
}

pub async fn complete_lesson(fixture: &Fixture, user_id: Uuid, lesson_id: Uuid) {
    fixture
        .store
        .upsert_lesson_progress(&LessonProgressUpdate {
            user_id,
            lesson_id,
            course_id: fixture.course_id,
            status: LessonStatus::Completed,
            progress_fraction: 1.0,
            time_spent_secs: 60,
        })
        .await
        .unwrap();
}

pub async fn record_attempt(
    fixture: &Fixture,
    user_id: Uuid,
    quiz_id: Uuid,
    score: f64,
    passed: bool,
) {
    fixture
        .store
        .append_quiz_result(&QuizResult {
            id: Uuid::new_v4(),
            user_id,
            quiz_id,
            course_id: fixture.course_id,
            score,
            passed,
            completed_at: Utc::now(),
        })
        .await
        .unwrap();
}

/// Make (user, course) fully eligible: every lesson completed, every quiz
/// passed with `score`.
pub async fn make_eligible(fixture: &Fixture, user_id: Uuid, score: f64) {
    for lesson_id in fixture.lesson_ids.clone() {
        complete_lesson(fixture, user_id, lesson_id).await;
    }
    for quiz_id in fixture.quiz_ids.clone() {
        record_attempt(fixture, user_id, quiz_id, score, true).await;
    }
}
