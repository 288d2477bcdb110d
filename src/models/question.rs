// src/models/question.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

/// One selectable option of a multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    /// Stable label the answer key refers to, e.g. "A".
    pub label: String,
    pub text: String,
}

/// One item on either side of a matching question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchItem {
    pub id: String,
    pub text: String,
}

/// Type-specific question payload: presentation data plus the answer key.
///
/// This is a closed set. The grading engine matches it exhaustively, so a
/// new question type is a compile-time change, not a runtime fallthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionPayload {
    MultipleChoice {
        options: Vec<ChoiceOption>,
        /// Label of the single correct option.
        correct: String,
    },
    Essay {
        /// Reference answer shown to the grading teacher.
        reference: String,
        rubric: Option<String>,
    },
    ShortAnswer {
        accepted: Vec<String>,
        case_sensitive: bool,
    },
    TrueFalse {
        correct: bool,
    },
    Matching {
        left: Vec<MatchItem>,
        right: Vec<MatchItem>,
        /// Correct mapping left id -> right id.
        key: BTreeMap<String, String>,
    },
}

impl QuestionPayload {
    pub fn type_tag(&self) -> &'static str {
        match self {
            QuestionPayload::MultipleChoice { .. } => "multiple_choice",
            QuestionPayload::Essay { .. } => "essay",
            QuestionPayload::ShortAnswer { .. } => "short_answer",
            QuestionPayload::TrueFalse { .. } => "true_false",
            QuestionPayload::Matching { .. } => "matching",
        }
    }

    /// Structural checks on the answer key, run when a teacher stores the
    /// question. The grading engine re-checks these at grading time and
    /// fails the single question if a malformed key slipped through.
    pub fn check_key(&self) -> Result<(), String> {
        match self {
            QuestionPayload::MultipleChoice { options, correct } => {
                if options.len() < 2 {
                    return Err("multiple-choice needs at least two options".to_string());
                }
                if !options.iter().any(|o| o.label == *correct) {
                    return Err(format!("correct label '{}' is not among the options", correct));
                }
                Ok(())
            }
            QuestionPayload::Essay { reference, .. } => {
                if reference.trim().is_empty() {
                    return Err("essay reference answer must not be empty".to_string());
                }
                Ok(())
            }
            QuestionPayload::ShortAnswer { accepted, .. } => {
                if accepted.is_empty() {
                    return Err("short-answer needs at least one accepted answer".to_string());
                }
                Ok(())
            }
            QuestionPayload::TrueFalse { .. } => Ok(()),
            QuestionPayload::Matching { left, right, key } => {
                if key.is_empty() {
                    return Err("matching key must not be empty".to_string());
                }
                for (l, r) in key {
                    if !left.iter().any(|item| item.id == *l) {
                        return Err(format!("key references unknown left item '{}'", l));
                    }
                    if !right.iter().any(|item| item.id == *r) {
                        return Err(format!("key references unknown right item '{}'", r));
                    }
                }
                Ok(())
            }
        }
    }

    /// Presentation-only view of the payload, with every answer-key field
    /// stripped. This is the only shape that may reach a student.
    pub fn public_view(&self) -> serde_json::Value {
        match self {
            QuestionPayload::MultipleChoice { options, .. } => {
                serde_json::json!({ "options": options })
            }
            QuestionPayload::Essay { .. } => serde_json::json!({}),
            QuestionPayload::ShortAnswer { case_sensitive, .. } => {
                serde_json::json!({ "case_sensitive": case_sensitive })
            }
            QuestionPayload::TrueFalse { .. } => serde_json::json!({}),
            QuestionPayload::Matching { left, right, .. } => {
                serde_json::json!({ "left": left, "right": right })
            }
        }
    }
}

/// A student's submitted answer. Mirrors the payload variants; the tag also
/// travels with queued items on the client side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerValue {
    MultipleChoice { selected: String },
    Essay { text: String },
    ShortAnswer { text: String },
    TrueFalse { value: bool },
    Matching { pairs: BTreeMap<String, String> },
}

impl AnswerValue {
    pub fn type_tag(&self) -> &'static str {
        match self {
            AnswerValue::MultipleChoice { .. } => "multiple_choice",
            AnswerValue::Essay { .. } => "essay",
            AnswerValue::ShortAnswer { .. } => "short_answer",
            AnswerValue::TrueFalse { .. } => "true_false",
            AnswerValue::Matching { .. } => "matching",
        }
    }
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub exam_id: i64,

    /// Ordinal position inside the exam.
    pub ordinal: i32,

    /// Maximum points awardable for this question.
    pub points: i32,

    /// The prompt shown to the student.
    pub content: String,

    pub payload: Json<QuestionPayload>,

    pub created_at: Option<DateTime<Utc>>,
}

/// DTO for sending a question to a student (answer key stripped).
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub ordinal: i32,
    pub points: i32,
    #[serde(rename = "type")]
    pub question_type: String,
    pub content: String,
    pub payload: serde_json::Value,
}

impl PublicQuestion {
    pub fn from_question(q: &Question) -> Self {
        Self {
            id: q.id,
            ordinal: q.ordinal,
            points: q.points,
            question_type: q.payload.0.type_tag().to_string(),
            content: q.content.clone(),
            payload: q.payload.0.public_view(),
        }
    }
}

/// DTO for creating a new question on a draft exam.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(range(min = 0))]
    pub ordinal: i32,
    #[validate(range(min = 1, max = 1000))]
    pub points: i32,
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
    pub payload: QuestionPayload,
}
