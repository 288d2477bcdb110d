// src/models/exam.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

/// Lifecycle of an exam. Transitions are monotonic:
/// draft -> active -> finished, never backwards.
///
/// A draft is never visible to students, even inside its window; "active"
/// only admits students while the wall clock is inside [start_at, end_at].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExamStatus {
    Draft,
    Active,
    Finished,
}

impl ExamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamStatus::Draft => "draft",
            ExamStatus::Active => "active",
            ExamStatus::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(ExamStatus::Draft),
            "active" => Some(ExamStatus::Active),
            "finished" => Some(ExamStatus::Finished),
            _ => None,
        }
    }
}

/// Represents the 'exams' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,

    /// Owning teacher; only the owner or an admin may mutate the exam.
    pub teacher_id: i64,
    pub subject_id: i64,

    /// Target class identifiers, stored as a JSON array.
    pub class_ids: Json<Vec<i64>>,

    /// Access window; `start_at < end_at` is enforced on create and update.
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,

    pub shuffle_questions: bool,
    pub show_score: bool,

    /// 'draft', 'active' or 'finished'.
    pub status: String,

    pub created_at: Option<DateTime<Utc>>,
}

impl Exam {
    /// Typed view of the status column. Unknown values (which the schema
    /// CHECK constraint should prevent) read as draft, the most restrictive
    /// state.
    pub fn lifecycle(&self) -> ExamStatus {
        ExamStatus::parse(&self.status).unwrap_or(ExamStatus::Draft)
    }
}

/// DTO for creating a new exam.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub subject_id: i64,
    #[validate(length(min = 1, message = "at least one target class is required"))]
    pub class_ids: Vec<i64>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub show_score: bool,
}

/// DTO for updating a draft exam. All fields optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateExamRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub class_ids: Option<Vec<i64>>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub shuffle_questions: Option<bool>,
    pub show_score: Option<bool>,
}
