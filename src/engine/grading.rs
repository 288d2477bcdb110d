// src/engine/grading.rs
//
// Per-question-type auto grading. Pure: answer key + submitted answer in,
// point award (or a pending-manual marker) out. The payload union is
// matched exhaustively; adding a question type will not compile until it
// is handled here.

use regex::Regex;
use thiserror::Error;

use crate::models::question::{AnswerValue, QuestionPayload};

/// A malformed answer key is a data-integrity fault. It blocks grading of
/// that single question with a diagnosable error; the rest of the
/// submission still grades.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GradingError {
    #[error("answer key is malformed: {0}")]
    MalformedKey(String),
}

/// Result of grading one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeOutcome {
    /// Definite award, always within [0, points].
    Auto(i32),
    /// Essay with submitted text: a teacher supplies the points later.
    PendingManual,
}

/// Round half up, applied uniformly to proportional awards.
fn round_half_up(value: f64) -> i32 {
    (value + 0.5).floor() as i32
}

/// Trim and collapse incidental whitespace before comparing short answers.
fn normalize(text: &str) -> String {
    // The pattern is a literal; construction cannot fail.
    match Regex::new(r"\s+") {
        Ok(re) => re.replace_all(text.trim(), " ").into_owned(),
        Err(_) => text.trim().to_string(),
    }
}

/// Grade one question.
///
/// A missing answer, or an answer whose variant does not match the
/// question's type, scores zero for auto-graded types rather than erroring
/// the submission. An essay with no submitted text also scores zero: there
/// is nothing for a human to review.
pub fn grade(
    payload: &QuestionPayload,
    points: i32,
    answer: Option<&AnswerValue>,
) -> Result<GradeOutcome, GradingError> {
    match payload {
        QuestionPayload::MultipleChoice { options, correct } => {
            if !options.iter().any(|o| o.label == *correct) {
                return Err(GradingError::MalformedKey(format!(
                    "correct label '{}' is not among the options",
                    correct
                )));
            }
            let awarded = match answer {
                Some(AnswerValue::MultipleChoice { selected }) if selected == correct => points,
                _ => 0,
            };
            Ok(GradeOutcome::Auto(awarded))
        }

        QuestionPayload::Essay { .. } => match answer {
            Some(AnswerValue::Essay { text }) if !text.trim().is_empty() => {
                Ok(GradeOutcome::PendingManual)
            }
            _ => Ok(GradeOutcome::Auto(0)),
        },

        QuestionPayload::ShortAnswer {
            accepted,
            case_sensitive,
        } => {
            if accepted.is_empty() {
                return Err(GradingError::MalformedKey(
                    "accepted answer list is empty".to_string(),
                ));
            }
            let awarded = match answer {
                Some(AnswerValue::ShortAnswer { text }) => {
                    let submitted = normalize(text);
                    let matches = accepted.iter().any(|candidate| {
                        let candidate = normalize(candidate);
                        if *case_sensitive {
                            candidate == submitted
                        } else {
                            candidate.to_lowercase() == submitted.to_lowercase()
                        }
                    });
                    if matches { points } else { 0 }
                }
                _ => 0,
            };
            Ok(GradeOutcome::Auto(awarded))
        }

        QuestionPayload::TrueFalse { correct } => {
            let awarded = match answer {
                Some(AnswerValue::TrueFalse { value }) if value == correct => points,
                _ => 0,
            };
            Ok(GradeOutcome::Auto(awarded))
        }

        QuestionPayload::Matching { left, right, key } => {
            if key.is_empty() {
                return Err(GradingError::MalformedKey(
                    "matching key is empty".to_string(),
                ));
            }
            for (l, r) in key {
                if !left.iter().any(|item| item.id == *l) {
                    return Err(GradingError::MalformedKey(format!(
                        "key references unknown left item '{}'",
                        l
                    )));
                }
                if !right.iter().any(|item| item.id == *r) {
                    return Err(GradingError::MalformedKey(format!(
                        "key references unknown right item '{}'",
                        r
                    )));
                }
            }

            let awarded = match answer {
                Some(AnswerValue::Matching { pairs }) => {
                    let total = key.len();
                    let correct_pairs = key
                        .iter()
                        .filter(|(l, r)| pairs.get(*l) == Some(r))
                        .count();
                    // Proportional partial credit, round half up.
                    round_half_up(correct_pairs as f64 / total as f64 * f64::from(points))
                }
                _ => 0,
            };
            Ok(GradeOutcome::Auto(awarded))
        }
    }
}
