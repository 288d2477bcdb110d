// src/handlers/susulan.rs
//
// Makeup exam (ujian susulan) grants. A grant never admits by itself; it
// is consumed lazily by the access gate. Creating a grant deactivates any
// predecessor for the same (student, exam) in the same transaction, so at
// most one grant is ever live per pair.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        exam::ExamStatus,
        susulan::{CreateGrantRequest, MakeupGrant},
    },
    utils::jwt::Claims,
};

use super::{exam::require_owner, session::fetch_exam};

/// Issues a makeup grant for one student on one exam.
pub async fn create_grant(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<CreateGrantRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let now = Utc::now();
    if payload.expires_at <= now {
        return Err(AppError::BadRequest(
            "expires_at must be in the future".to_string(),
        ));
    }

    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    if exam.lifecycle() == ExamStatus::Draft {
        return Err(AppError::BadRequest(
            "Cannot grant access to an unpublished exam".to_string(),
        ));
    }

    let granted_by = claims.actor_id()?;

    // Deactivate-then-insert in one transaction: concurrent issuance can
    // never leave two live grants for the same pair.
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE makeup_grants SET is_active = FALSE
         WHERE exam_id = $1 AND student_id = $2 AND is_active = TRUE",
    )
    .bind(exam_id)
    .bind(payload.student_id)
    .execute(&mut *tx)
    .await?;

    let grant = sqlx::query_as::<_, MakeupGrant>(
        "INSERT INTO makeup_grants
            (exam_id, student_id, duration_minutes, expires_at, granted_by)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(exam_id)
    .bind(payload.student_id)
    .bind(payload.duration_minutes)
    .bind(payload.expires_at)
    .bind(granted_by)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        exam_id,
        student_id = payload.student_id,
        grant_id = grant.id,
        granted_by,
        duration_minutes = grant.duration_minutes,
        "makeup grant issued"
    );

    Ok((StatusCode::CREATED, Json(grant)))
}

/// Soft-deactivates one grant.
pub async fn revoke_grant(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, grant_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    let result = sqlx::query(
        "UPDATE makeup_grants SET is_active = FALSE WHERE id = $1 AND exam_id = $2",
    )
    .bind(grant_id)
    .bind(exam_id)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Grant not found".to_string()));
    }

    tracing::info!(exam_id, grant_id, "makeup grant revoked");

    Ok(Json(serde_json::json!({ "revoked": true })))
}

/// Lists all grants for one exam, newest first.
pub async fn list_grants(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, exam_id).await?;
    require_owner(&exam, &claims)?;

    let grants = sqlx::query_as::<_, MakeupGrant>(
        "SELECT * FROM makeup_grants WHERE exam_id = $1 ORDER BY created_at DESC, id DESC",
    )
    .bind(exam_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(grants))
}
