// src/handlers/session.rs
//
// Student-facing exam session: enter/resume, idempotent answer saves, and
// finalize. Every operation re-runs the access gate; a lapsed window or
// grant forces a finalize instead of silently accepting more answers.

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    engine::{
        gate::{self, AccessDecision},
        grading::{self, GradeOutcome},
        score::{self, ScoreItem, ScoreState},
    },
    error::AppError,
    models::{
        exam::Exam,
        question::{AnswerValue, PublicQuestion, Question},
        submission::{SaveAnswerRequest, SavedAnswer, Submission, SubmissionAnswer},
        susulan::MakeupGrant,
    },
    utils::{html::clean_html, jwt::Claims, shuffle::shuffle_for_student},
};

pub(crate) async fn fetch_exam(pool: &PgPool, exam_id: i64) -> Result<Exam, AppError> {
    sqlx::query_as::<_, Exam>("SELECT * FROM exams WHERE id = $1")
        .bind(exam_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))
}

async fn fetch_submission(
    pool: &PgPool,
    exam_id: i64,
    student_id: i64,
) -> Result<Option<Submission>, AppError> {
    let submission = sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions WHERE exam_id = $1 AND student_id = $2",
    )
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await?;
    Ok(submission)
}

/// The most recent active, unexpired grant governs when several exist.
async fn fetch_latest_grant(
    pool: &PgPool,
    exam_id: i64,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<MakeupGrant>, AppError> {
    let grant = sqlx::query_as::<_, MakeupGrant>(
        "SELECT * FROM makeup_grants
         WHERE exam_id = $1 AND student_id = $2 AND is_active = TRUE AND expires_at > $3
         ORDER BY created_at DESC, id DESC
         LIMIT 1",
    )
    .bind(exam_id)
    .bind(student_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(grant)
}

async fn fetch_questions(pool: &PgPool, exam_id: i64) -> Result<Vec<Question>, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions WHERE exam_id = $1 ORDER BY ordinal ASC, id ASC",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;
    Ok(questions)
}

async fn fetch_answers(
    pool: &PgPool,
    submission_id: i64,
) -> Result<Vec<SubmissionAnswer>, AppError> {
    let answers = sqlx::query_as::<_, SubmissionAnswer>(
        "SELECT * FROM submission_answers WHERE submission_id = $1",
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await?;
    Ok(answers)
}

/// Evaluate the gate for this (student, exam) at `now`, and record the
/// first makeup access on the governing grant when that is what admits.
async fn evaluate_access(
    pool: &PgPool,
    exam: &Exam,
    submission: Option<&Submission>,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<AccessDecision, AppError> {
    let has_finalized = submission.map(|s| s.finalized).unwrap_or(false);
    let grant = fetch_latest_grant(pool, exam.id, student_id, now).await?;
    let decision = gate::evaluate(exam, has_finalized, grant.as_ref(), now);

    if let AccessDecision::AdmittedMakeup { .. } = decision {
        if let Some(grant) = &grant {
            if grant.first_access_at.is_none() {
                // Set-if-null keeps the duration anchor stable under
                // concurrent first accesses.
                sqlx::query(
                    "UPDATE makeup_grants SET first_access_at = $1
                     WHERE id = $2 AND first_access_at IS NULL",
                )
                .bind(now)
                .bind(grant.id)
                .execute(pool)
                .await?;
            }
        }
    }

    Ok(decision)
}

fn deny(decision: &AccessDecision) -> AppError {
    match decision {
        AccessDecision::Denied(reason) => AppError::Forbidden(reason.code().to_string()),
        _ => AppError::InternalServerError("denied access decision expected".to_string()),
    }
}

fn access_label(decision: &AccessDecision) -> &'static str {
    match decision {
        AccessDecision::AdmittedNormal { .. } => "admitted_normal",
        AccessDecision::AdmittedMakeup { .. } => "admitted_makeup",
        AccessDecision::Denied(_) => "denied",
    }
}

fn require_student(claims: &Claims) -> Result<i64, AppError> {
    if claims.role != crate::utils::jwt::ROLE_STUDENT {
        return Err(AppError::Forbidden("students only".to_string()));
    }
    claims.actor_id()
}

/// Enter or resume an exam session.
///
/// Returns the access decision, the remaining seconds, the questions with
/// their answer keys stripped (stable per-student order when shuffling is
/// on), and any previously saved answers so a reconnecting client can
/// restore its state.
pub async fn enter_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = require_student(&claims)?;
    let now = Utc::now();

    let exam = fetch_exam(&pool, exam_id).await?;
    let submission = fetch_submission(&pool, exam_id, student_id).await?;
    let decision = evaluate_access(&pool, &exam, submission.as_ref(), student_id, now).await?;

    if !decision.is_admitted() {
        return Err(deny(&decision));
    }

    let mut questions = fetch_questions(&pool, exam_id).await?;
    if exam.shuffle_questions {
        shuffle_for_student(&mut questions, student_id, exam_id);
    }
    let questions: Vec<PublicQuestion> =
        questions.iter().map(PublicQuestion::from_question).collect();

    let mut saved_answers = Vec::new();
    if let Some(submission) = &submission {
        for row in fetch_answers(&pool, submission.id).await? {
            saved_answers.push(SavedAnswer {
                question_id: row.question_id,
                answer: row.answer.0,
            });
        }
    }

    Ok(Json(serde_json::json!({
        "access": access_label(&decision),
        "remaining_seconds": decision.remaining_seconds(),
        "exam": {
            "id": exam.id,
            "title": exam.title,
            "description": exam.description,
            "shuffle_questions": exam.shuffle_questions,
        },
        "questions": questions,
        "answers": saved_answers,
    })))
}

/// Find-or-create the submission row for (exam, student). The unique
/// constraint makes the create race-safe.
async fn ensure_submission(
    pool: &PgPool,
    exam_id: i64,
    student_id: i64,
) -> Result<Submission, AppError> {
    sqlx::query(
        "INSERT INTO submissions (exam_id, student_id) VALUES ($1, $2)
         ON CONFLICT (exam_id, student_id) DO NOTHING",
    )
    .bind(exam_id)
    .bind(student_id)
    .execute(pool)
    .await?;

    fetch_submission(pool, exam_id, student_id)
        .await?
        .ok_or_else(|| AppError::InternalServerError("submission row vanished".to_string()))
}

/// Idempotent answer save.
///
/// Upserts by (submission, question): client retries converge to a single
/// row holding the last written value. Never returns a score.
pub async fn save_answer(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let student_id = require_student(&claims)?;
    let now = Utc::now();

    let exam = fetch_exam(&pool, exam_id).await?;
    let submission = fetch_submission(&pool, exam_id, student_id).await?;
    let decision = evaluate_access(&pool, &exam, submission.as_ref(), student_id, now).await?;

    if !decision.is_admitted() {
        // The window or grant lapsed mid-session: finalize what was
        // persisted instead of silently accepting or dropping the write.
        if let Some(submission) = &submission {
            if !submission.finalized {
                let summary = run_finalize(&pool, &exam, submission, now).await?;
                tracing::info!(
                    exam_id,
                    student_id,
                    submission_id = submission.id,
                    grading_status = summary.score_state.status_label(),
                    "session lapsed; submission force-finalized"
                );
            }
        }
        return Err(deny(&decision));
    }

    // The question must belong to this exam.
    let question = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions WHERE id = $1 AND exam_id = $2",
    )
    .bind(payload.question_id)
    .bind(exam_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Question not found in this exam".to_string()))?;

    // Essay answers may carry rich text; sanitize before storing.
    let answer = match payload.answer {
        AnswerValue::Essay { text } => AnswerValue::Essay {
            text: clean_html(&text),
        },
        other => other,
    };

    let submission = ensure_submission(&pool, exam_id, student_id).await?;

    // A makeup retake writes into the existing submission; reopen it.
    if submission.finalized {
        sqlx::query(
            "UPDATE submissions
             SET finalized = FALSE, submitted_at = NULL, score = NULL,
                 grading_status = 'in_progress'
             WHERE id = $1",
        )
        .bind(submission.id)
        .execute(&pool)
        .await?;
        tracing::info!(
            exam_id,
            student_id,
            submission_id = submission.id,
            "finalized submission reopened under makeup grant"
        );
    }

    sqlx::query(
        "INSERT INTO submission_answers (submission_id, question_id, answer, updated_at)
         VALUES ($1, $2, $3, now())
         ON CONFLICT (submission_id, question_id)
         DO UPDATE SET answer = EXCLUDED.answer, awarded = NULL,
                       needs_review = FALSE, graded_at = NULL, updated_at = now()",
    )
    .bind(submission.id)
    .bind(question.id)
    .bind(sqlx::types::Json(&answer))
    .execute(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "saved": true,
        "question_id": question.id,
    })))
}

pub(crate) struct FinalizeSummary {
    pub score_state: ScoreState,
    pub grading_errors: Vec<i64>,
}

/// Grade every auto-gradable answer, mark essays for review, aggregate,
/// and stamp the submission finalized. Questions with malformed keys are
/// excluded from the aggregate and reported, not fatal.
pub(crate) async fn run_finalize(
    pool: &PgPool,
    exam: &Exam,
    submission: &Submission,
    now: DateTime<Utc>,
) -> Result<FinalizeSummary, AppError> {
    let questions = fetch_questions(pool, exam.id).await?;
    let answers: HashMap<i64, SubmissionAnswer> = fetch_answers(pool, submission.id)
        .await?
        .into_iter()
        .map(|a| (a.question_id, a))
        .collect();

    let mut tx = pool.begin().await?;
    let mut items: Vec<ScoreItem> = Vec::with_capacity(questions.len());
    let mut grading_errors = Vec::new();

    for question in &questions {
        let answer_row = answers.get(&question.id);
        let answer_value = answer_row.map(|a| &a.answer.0);

        match grading::grade(&question.payload.0, question.points, answer_value) {
            Ok(GradeOutcome::Auto(points)) => {
                if let Some(row) = answer_row {
                    sqlx::query(
                        "UPDATE submission_answers
                         SET awarded = $1, needs_review = FALSE, graded_at = $2
                         WHERE id = $3",
                    )
                    .bind(points)
                    .bind(now)
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
                }
                items.push(ScoreItem {
                    question_id: question.id,
                    points: question.points,
                    awarded: Some(points),
                });
            }
            Ok(GradeOutcome::PendingManual) => {
                if let Some(row) = answer_row {
                    sqlx::query(
                        "UPDATE submission_answers
                         SET awarded = NULL, needs_review = TRUE, graded_at = NULL
                         WHERE id = $1",
                    )
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
                }
                items.push(ScoreItem {
                    question_id: question.id,
                    points: question.points,
                    awarded: None,
                });
            }
            Err(err) => {
                tracing::error!(
                    question_id = question.id,
                    exam_id = exam.id,
                    error = %err,
                    "question excluded from grading"
                );
                grading_errors.push(question.id);
            }
        }
    }

    let score_state = score::aggregate(&items);
    sqlx::query(
        "UPDATE submissions
         SET finalized = TRUE, submitted_at = $1, grading_status = $2, score = $3
         WHERE id = $4",
    )
    .bind(now)
    .bind(score_state.status_label())
    .bind(score_state.final_score())
    .bind(submission.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(FinalizeSummary {
        score_state,
        grading_errors,
    })
}

/// Explicit submit. Idempotent: finalizing an already-finalized submission
/// reports its current state instead of re-grading.
pub async fn finalize(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = require_student(&claims)?;
    let now = Utc::now();

    let exam = fetch_exam(&pool, exam_id).await?;
    let submission = fetch_submission(&pool, exam_id, student_id).await?;

    if let Some(submission) = &submission {
        if submission.finalized {
            return Ok(Json(serde_json::json!({
                "finalized": true,
                "grading_status": submission.grading_status,
                "score": score_for_student(&exam, &submission.grading_status, submission.score),
                "score_visible": exam.show_score,
            })));
        }
    }

    // A submission that exists may always be closed out, even after the
    // window lapsed; starting a brand-new one still requires admission.
    let submission = match submission {
        Some(submission) => submission,
        None => {
            let decision =
                evaluate_access(&pool, &exam, None, student_id, now).await?;
            if !decision.is_admitted() {
                return Err(deny(&decision));
            }
            ensure_submission(&pool, exam_id, student_id).await?
        }
    };

    let summary = run_finalize(&pool, &exam, &submission, now).await?;
    tracing::info!(
        exam_id,
        student_id,
        submission_id = submission.id,
        grading_status = summary.score_state.status_label(),
        "submission finalized"
    );

    let grading_status = summary.score_state.status_label();
    Ok(Json(serde_json::json!({
        "finalized": true,
        "grading_status": grading_status,
        "score": score_for_student(&exam, grading_status, summary.score_state.final_score()),
        "score_visible": exam.show_score,
        "grading_errors": summary.grading_errors,
    })))
}

/// A score is exposed to the student only when the exam shows scores AND
/// grading is complete; a pending or hidden score is never leaked through
/// any read path.
fn score_for_student(exam: &Exam, grading_status: &str, score: Option<f64>) -> Option<f64> {
    if exam.show_score && grading_status == crate::models::submission::grading_status::GRADED {
        score
    } else {
        None
    }
}

/// Student's view of their own result.
pub async fn result(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = require_student(&claims)?;

    let exam = fetch_exam(&pool, exam_id).await?;
    let submission = fetch_submission(&pool, exam_id, student_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No submission for this exam".to_string()))?;

    if !submission.finalized {
        return Err(AppError::BadRequest(
            "Submission is not finalized yet".to_string(),
        ));
    }

    Ok(Json(serde_json::json!({
        "finalized": true,
        "grading_status": submission.grading_status,
        "submitted_at": submission.submitted_at,
        "score_visible": exam.show_score,
        "score": score_for_student(&exam, &submission.grading_status, submission.score),
    })))
}
