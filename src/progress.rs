//! Lesson and quiz progress trackers.
//!
//! Lesson progress is an upsert with a sticky completion policy; quiz
//! results are append-only. "Current standing" for a quiz is the best
//! attempt for eligibility and the latest attempt for display.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    LessonProgressRecord, LessonProgressReq, LessonStatus, QuizResult, QuizStanding,
};
use crate::store::{CourseCatalog, LessonProgressUpdate, ProgressStore};

/// Merge a progress event into an existing record (if any).
///
/// Policy: once a lesson is completed, status and fraction never regress;
/// time spent accumulates across all events. Recording `Completed` forces
/// the fraction to 1.0. The Postgres backend mirrors this in its upsert
/// statement; the in-memory backend calls this directly.
pub fn merge_lesson_progress(
    existing: Option<&LessonProgressRecord>,
    update: &LessonProgressUpdate,
) -> LessonProgressRecord {
    let (status, fraction) = match existing {
        Some(prev) if prev.status == LessonStatus::Completed => {
            (LessonStatus::Completed, prev.progress_fraction)
        }
        _ if update.status == LessonStatus::Completed => (LessonStatus::Completed, 1.0),
        _ => (update.status, update.progress_fraction),
    };
    let time_spent = existing.map(|p| p.time_spent_secs).unwrap_or(0) + update.time_spent_secs;

    LessonProgressRecord {
        user_id: update.user_id,
        lesson_id: update.lesson_id,
        course_id: update.course_id,
        status,
        progress_fraction: fraction,
        time_spent_secs: time_spent,
        updated_at: Utc::now(),
    }
}

/// Record one lesson-progress event. Validates the fraction range and that
/// the lesson exists, then upserts through the store.
pub async fn record_lesson_progress<S>(
    store: &S,
    req: &LessonProgressReq,
) -> EngineResult<LessonProgressRecord>
where
    S: CourseCatalog + ProgressStore,
{
    if !(0.0..=1.0).contains(&req.progress_fraction) {
        return Err(EngineError::validation(format!(
            "progress_fraction {} is outside [0, 1]",
            req.progress_fraction
        )));
    }
    if req.time_spent_secs < 0 {
        return Err(EngineError::validation("time_spent_secs must be >= 0"));
    }

    let lesson = store
        .get_lesson(req.lesson_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("lesson {}", req.lesson_id)))?;

    let fraction = if req.status == LessonStatus::Completed {
        1.0
    } else {
        req.progress_fraction
    };

    store
        .upsert_lesson_progress(&LessonProgressUpdate {
            user_id: req.user_id,
            lesson_id: req.lesson_id,
            course_id: lesson.course_id,
            status: req.status,
            progress_fraction: fraction,
            time_spent_secs: req.time_spent_secs,
        })
        .await
}

/// Append one graded attempt for a quiz.
pub async fn record_quiz_result<S: ProgressStore>(
    store: &S,
    result: &QuizResult,
) -> EngineResult<()> {
    store.append_quiz_result(result).await
}

/// Derive the standing from a set of attempts. Best = highest score, ties
/// broken by the earlier attempt so the standing is stable; latest = most
/// recent `completed_at`.
pub fn standing(attempts: &[QuizResult]) -> QuizStanding {
    let mut best: Option<&QuizResult> = None;
    let mut latest: Option<&QuizResult> = None;

    for attempt in attempts {
        best = match best {
            Some(b)
                if attempt.score > b.score
                    || (attempt.score == b.score && attempt.completed_at < b.completed_at) =>
            {
                Some(attempt)
            }
            None => Some(attempt),
            other => other,
        };
        latest = match latest {
            Some(l) if attempt.completed_at > l.completed_at => Some(attempt),
            None => Some(attempt),
            other => other,
        };
    }

    QuizStanding {
        best: best.cloned(),
        latest: latest.cloned(),
    }
}

/// Fetch the standing for one (user, quiz).
pub async fn quiz_standing<S: ProgressStore>(
    store: &S,
    user_id: Uuid,
    quiz_id: Uuid,
) -> EngineResult<QuizStanding> {
    let attempts = store.quiz_attempts(user_id, quiz_id).await?;
    Ok(standing(&attempts))
}
