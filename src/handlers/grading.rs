// src/handlers/grading.rs
//
// Teacher review of submissions and manual grading of essay answers.
// Recording a manual grade re-runs the aggregator; the submission flips to
// 'graded' only once nothing is left pending.

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;
use sqlx::prelude::FromRow;
use validator::Validate;

use crate::{
    engine::score::{self, ScoreItem, ScoreState},
    error::AppError,
    models::{
        question::{Question, QuestionPayload},
        submission::{ManualGradeRequest, Submission, SubmissionAnswer},
    },
    utils::jwt::Claims,
};

use super::{exam::require_owner, session::fetch_exam};

/// One row of the aggregation query: a question joined against the
/// submission's answer for it, if any.
#[derive(FromRow)]
struct GradeRow {
    question_id: i64,
    points: i32,
    awarded: Option<i32>,
    needs_review: Option<bool>,
    has_answer: Option<bool>,
}

/// Rebuild the submission-level score state from stored awards.
///
/// Unanswered questions score zero; answers flagged for review stay
/// pending; a row that is neither graded nor flagged (its key was
/// malformed at finalize time) is excluded from the aggregate.
pub(crate) async fn recompute_score(
    pool: &PgPool,
    exam_id: i64,
    submission_id: i64,
) -> Result<ScoreState, AppError> {
    let rows = sqlx::query_as::<_, GradeRow>(
        "SELECT q.id AS question_id, q.points, a.awarded, a.needs_review,
                (a.id IS NOT NULL) AS has_answer
         FROM questions q
         LEFT JOIN submission_answers a
                ON a.question_id = q.id AND a.submission_id = $1
         WHERE q.exam_id = $2",
    )
    .bind(submission_id)
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let has_answer = row.has_answer.unwrap_or(false);
        let needs_review = row.needs_review.unwrap_or(false);

        let awarded = if !has_answer {
            Some(0)
        } else if needs_review {
            None
        } else {
            match row.awarded {
                Some(points) => Some(points),
                // Ungraded, unflagged: excluded at finalize time.
                None => continue,
            }
        };

        items.push(ScoreItem {
            question_id: row.question_id,
            points: row.points,
            awarded,
        });
    }

    Ok(score::aggregate(&items))
}

/// Lists a teacher's view of all submissions for one exam.
pub async fn list_submissions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    let submissions = sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions WHERE exam_id = $1 ORDER BY submitted_at DESC NULLS LAST, id ASC",
    )
    .bind(exam_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(submissions))
}

/// One submission with its answers, keyed for review: question prompt,
/// type, points, the student's answer, and the grading state.
pub async fn get_submission(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, submission_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    let submission = fetch_submission_for_exam(&pool, exam_id, submission_id).await?;

    let questions = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions WHERE exam_id = $1 ORDER BY ordinal ASC, id ASC",
    )
    .bind(exam_id)
    .fetch_all(&pool)
    .await?;

    let answers = sqlx::query_as::<_, SubmissionAnswer>(
        "SELECT * FROM submission_answers WHERE submission_id = $1",
    )
    .bind(submission.id)
    .fetch_all(&pool)
    .await?;

    let detail: Vec<serde_json::Value> = questions
        .iter()
        .map(|q| {
            let answer = answers.iter().find(|a| a.question_id == q.id);
            serde_json::json!({
                "question_id": q.id,
                "ordinal": q.ordinal,
                "type": q.payload.0.type_tag(),
                "content": q.content,
                "points": q.points,
                "answer": answer.map(|a| &a.answer.0),
                "awarded": answer.and_then(|a| a.awarded),
                "needs_review": answer.map(|a| a.needs_review).unwrap_or(false),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "submission": submission,
        "answers": detail,
    })))
}

/// Records a teacher's point award for one essay answer, then re-runs the
/// aggregator. Award must lie within [0, question points].
pub async fn grade_essay(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, submission_id, question_id)): Path<(i64, i64, i64)>,
    Json(payload): Json<ManualGradeRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    let submission = fetch_submission_for_exam(&pool, exam_id, submission_id).await?;
    if !submission.finalized {
        return Err(AppError::BadRequest(
            "Submission is not finalized yet".to_string(),
        ));
    }

    let question = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions WHERE id = $1 AND exam_id = $2",
    )
    .bind(question_id)
    .bind(exam_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Question not found in this exam".to_string()))?;

    if !matches!(question.payload.0, QuestionPayload::Essay { .. }) {
        return Err(AppError::BadRequest(
            "Only essay questions are graded manually".to_string(),
        ));
    }
    if payload.awarded > question.points {
        return Err(AppError::BadRequest(format!(
            "Award exceeds the question's {} points",
            question.points
        )));
    }

    let result = sqlx::query(
        "UPDATE submission_answers
         SET awarded = $1, needs_review = FALSE, graded_at = $2
         WHERE submission_id = $3 AND question_id = $4",
    )
    .bind(payload.awarded)
    .bind(Utc::now())
    .bind(submission.id)
    .bind(question.id)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(
            "The student did not answer this question".to_string(),
        ));
    }

    let score_state = recompute_score(&pool, exam_id, submission.id).await?;
    sqlx::query("UPDATE submissions SET grading_status = $1, score = $2 WHERE id = $3")
        .bind(score_state.status_label())
        .bind(score_state.final_score())
        .bind(submission.id)
        .execute(&pool)
        .await?;

    tracing::info!(
        exam_id,
        submission_id = submission.id,
        question_id,
        awarded = payload.awarded,
        "essay answer graded"
    );

    Ok(Json(serde_json::json!({
        "graded": true,
        "question_id": question.id,
        "awarded": payload.awarded,
        "grading_status": score_state.status_label(),
        "score": score_state.final_score(),
    })))
}

async fn fetch_submission_for_exam(
    pool: &PgPool,
    exam_id: i64,
    submission_id: i64,
) -> Result<Submission, AppError> {
    sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions WHERE id = $1 AND exam_id = $2",
    )
    .bind(submission_id)
    .bind(exam_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Submission not found".to_string()))
}
