// src/models/susulan.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'makeup_grants' table (ujian susulan).
///
/// A grant is a time-bounded exception letting one student into one exam
/// outside the normal window. It never admits by itself; admission happens
/// lazily through the access gate. At most one grant per (student, exam)
/// is live at a time: issuing a new one deactivates its predecessors in the
/// same transaction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MakeupGrant {
    pub id: i64,
    pub exam_id: i64,
    pub student_id: i64,

    /// Exam-taking time budget, counted from the first admitted access.
    pub duration_minutes: i32,

    /// Absolute deadline; the grant is inert past this instant no matter
    /// how much of the duration is unused.
    pub expires_at: DateTime<Utc>,

    pub is_active: bool,
    pub granted_by: i64,

    /// Set once, on the student's first admitted access under this grant.
    pub first_access_at: Option<DateTime<Utc>>,

    pub created_at: Option<DateTime<Utc>>,
}

/// DTO for a teacher/admin issuing a makeup grant.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateGrantRequest {
    pub student_id: i64,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,
    pub expires_at: DateTime<Utc>,
}
