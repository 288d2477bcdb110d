// src/models/submission.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

use crate::models::question::AnswerValue;

/// Observable grading states of a submission.
///
/// 'pending_review' is the explicit partially-graded state: at least one
/// essay answer is waiting for a manual grade, so no final score exists yet.
pub mod grading_status {
    pub const IN_PROGRESS: &str = "in_progress";
    pub const PENDING_REVIEW: &str = "pending_review";
    pub const GRADED: &str = "graded";
}

/// Represents the 'submissions' table: one per (student, exam).
///
/// Created lazily on the first answer write; `score` stays NULL until every
/// question (including manually graded essays) has an award.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub exam_id: i64,
    pub student_id: i64,
    pub finalized: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub grading_status: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Represents the 'submission_answers' table; unique per
/// (submission, question) so retried saves converge to one row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubmissionAnswer {
    pub id: i64,
    pub submission_id: i64,
    pub question_id: i64,
    pub answer: Json<AnswerValue>,

    /// Points awarded once graded; NULL until then.
    pub awarded: Option<i32>,

    /// True while an essay answer waits for a manual grade.
    pub needs_review: bool,

    pub graded_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// DTO for the idempotent save-answer operation.
#[derive(Debug, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    pub question_id: i64,
    pub answer: AnswerValue,
}

/// DTO for a teacher recording the manual grade of one essay answer.
#[derive(Debug, Deserialize, Validate)]
pub struct ManualGradeRequest {
    #[validate(range(min = 0))]
    pub awarded: i32,
}

/// Per-question answer state returned when a session is resumed.
#[derive(Debug, Serialize)]
pub struct SavedAnswer {
    pub question_id: i64,
    pub answer: AnswerValue,
}
