// src/handlers/question.rs
//
// Question bank writes for one exam. Edits are limited to draft exams:
// once students can submit, the stored keys are the grading basis and
// changing them would silently re-score finished work.

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
    models::{
        exam::ExamStatus,
        question::{CreateQuestionRequest, Question},
    },
    utils::{html::clean_html, jwt::Claims},
};

use super::{exam::require_owner, session::fetch_exam};

/// Adds a question to a draft exam. The payload's answer key is checked
/// structurally here so grading never meets a key the teacher could have
/// been warned about.
pub async fn create_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    if let Err(reason) = payload.payload.check_key() {
        return Err(AppError::BadRequest(reason));
    }

    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    if exam.lifecycle() != ExamStatus::Draft {
        return Err(AppError::BadRequest(
            "Questions can only be added to a draft exam".to_string(),
        ));
    }

    let content = clean_html(&payload.content);

    let question = sqlx::query_as::<_, Question>(
        "INSERT INTO questions (exam_id, ordinal, points, content, payload)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(exam_id)
    .bind(payload.ordinal)
    .bind(payload.points)
    .bind(content)
    .bind(sqlx::types::Json(&payload.payload))
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create question: {:?}", e);
        AppError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(question)))
}

/// Removes a question from a draft exam.
pub async fn delete_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, question_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    if exam.lifecycle() != ExamStatus::Draft {
        return Err(AppError::BadRequest(
            "Questions can only be removed from a draft exam".to_string(),
        ));
    }

    let result = sqlx::query("DELETE FROM questions WHERE id = $1 AND exam_id = $2")
        .bind(question_id)
        .bind(exam_id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
