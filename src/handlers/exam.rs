// src/handlers/exam.rs
//
// Teacher-facing exam lifecycle. Status moves draft -> active -> finished,
// never backwards; publishing is explicit, so a draft never auto-activates
// just because its window opened.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::exam::{CreateExamRequest, Exam, ExamStatus, UpdateExamRequest},
    utils::{html::clean_html, jwt::Claims},
};

use super::session::fetch_exam;

/// Only the owning teacher or an admin may mutate an exam.
pub(crate) fn require_owner(exam: &Exam, claims: &Claims) -> Result<(), AppError> {
    let actor_id = claims.actor_id()?;
    if exam.teacher_id != actor_id && !claims.is_admin() {
        return Err(AppError::Forbidden(
            "You can only manage your own exams".to_string(),
        ));
    }
    Ok(())
}

/// Creates a new exam in draft status.
pub async fn create_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    if payload.end_at <= payload.start_at {
        return Err(AppError::BadRequest(
            "end_at must be after start_at".to_string(),
        ));
    }

    let teacher_id = claims.actor_id()?;
    let description = payload.description.map(|d| clean_html(&d));

    let exam = sqlx::query_as::<_, Exam>(
        "INSERT INTO exams
            (title, description, teacher_id, subject_id, class_ids,
             start_at, end_at, shuffle_questions, show_score, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'draft')
         RETURNING *",
    )
    .bind(&payload.title)
    .bind(description)
    .bind(teacher_id)
    .bind(payload.subject_id)
    .bind(sqlx::types::Json(&payload.class_ids))
    .bind(payload.start_at)
    .bind(payload.end_at)
    .bind(payload.shuffle_questions)
    .bind(payload.show_score)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create exam: {:?}", e);
        AppError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(exam)))
}

/// Updates a draft exam. Once published, the question set and window are
/// the grading basis of submitted work and stay fixed.
pub async fn update_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<UpdateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    if exam.lifecycle() != ExamStatus::Draft {
        return Err(AppError::BadRequest(
            "Only draft exams can be updated".to_string(),
        ));
    }

    let effective_start = payload.start_at.unwrap_or(exam.start_at);
    let effective_end = payload.end_at.unwrap_or(exam.end_at);
    if effective_end <= effective_start {
        return Err(AppError::BadRequest(
            "end_at must be after start_at".to_string(),
        ));
    }
    if let Some(class_ids) = &payload.class_ids {
        if class_ids.is_empty() {
            return Err(AppError::BadRequest(
                "at least one target class is required".to_string(),
            ));
        }
    }

    let description = payload.description.map(|d| clean_html(&d));

    let updated = sqlx::query_as::<_, Exam>(
        "UPDATE exams SET
            title = COALESCE($1, title),
            description = COALESCE($2, description),
            class_ids = COALESCE($3, class_ids),
            start_at = COALESCE($4, start_at),
            end_at = COALESCE($5, end_at),
            shuffle_questions = COALESCE($6, shuffle_questions),
            show_score = COALESCE($7, show_score)
         WHERE id = $8
         RETURNING *",
    )
    .bind(payload.title)
    .bind(description)
    .bind(payload.class_ids.map(sqlx::types::Json))
    .bind(payload.start_at)
    .bind(payload.end_at)
    .bind(payload.shuffle_questions)
    .bind(payload.show_score)
    .bind(exam_id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(updated))
}

/// Publishes a draft: draft -> active. Requires at least one question so
/// that grading means something.
pub async fn publish_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    if exam.lifecycle() != ExamStatus::Draft {
        return Err(AppError::BadRequest(
            "Exam is not in draft status".to_string(),
        ));
    }

    let question_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE exam_id = $1")
            .bind(exam_id)
            .fetch_one(&pool)
            .await?;
    if question_count == 0 {
        return Err(AppError::BadRequest(
            "Exam must have at least one question".to_string(),
        ));
    }

    let updated = sqlx::query_as::<_, Exam>(
        "UPDATE exams SET status = 'active' WHERE id = $1 RETURNING *",
    )
    .bind(exam_id)
    .fetch_one(&pool)
    .await?;

    tracing::info!(
        teacher_id = exam.teacher_id,
        exam_id,
        action = "exam_publish",
        "Exam published"
    );

    Ok(Json(updated))
}

/// Closes out an active exam: active -> finished.
pub async fn finish_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    if exam.lifecycle() != ExamStatus::Active {
        return Err(AppError::BadRequest(
            "Only an active exam can be finished".to_string(),
        ));
    }

    let updated = sqlx::query_as::<_, Exam>(
        "UPDATE exams SET status = 'finished' WHERE id = $1 RETURNING *",
    )
    .bind(exam_id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(updated))
}

/// Teacher view of one exam, questions included (with answer keys).
pub async fn get_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    let questions = sqlx::query_as::<_, crate::models::question::Question>(
        "SELECT * FROM questions WHERE exam_id = $1 ORDER BY ordinal ASC, id ASC",
    )
    .bind(exam_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "exam": exam,
        "questions": questions,
    })))
}

/// Lists the calling teacher's exams, newest window first.
pub async fn list_exams(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = claims.actor_id()?;
    let exams = sqlx::query_as::<_, Exam>(
        "SELECT * FROM exams WHERE teacher_id = $1 ORDER BY start_at DESC",
    )
    .bind(teacher_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(exams))
}
