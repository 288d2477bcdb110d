// src/engine/score.rs
//
// Score aggregation: per-question awards in, one submission-level result
// out. A pending essay never silently counts as zero; it forces the
// explicit pending-review state instead.

use serde::Serialize;

/// Aggregation input for one question of a submission.
#[derive(Debug, Clone, Copy)]
pub struct ScoreItem {
    pub question_id: i64,
    pub points: i32,
    /// None while an essay answer waits for a manual grade.
    pub awarded: Option<i32>,
}

/// Submission-level grading state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScoreState {
    /// Every question has an award; `score` is on a 0-100 scale.
    Complete { score: f64, awarded: i32, max: i32 },
    /// At least one answer still needs a manual grade. No numeric score
    /// exists yet, and none may be shown anywhere.
    PendingReview {
        pending: usize,
        awarded: i32,
        max: i32,
    },
}

impl ScoreState {
    pub fn final_score(&self) -> Option<f64> {
        match self {
            ScoreState::Complete { score, .. } => Some(*score),
            ScoreState::PendingReview { .. } => None,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            ScoreState::Complete { .. } => crate::models::submission::grading_status::GRADED,
            ScoreState::PendingReview { .. } => {
                crate::models::submission::grading_status::PENDING_REVIEW
            }
        }
    }
}

/// Sum awards into a final score proportional to 100.
pub fn aggregate(items: &[ScoreItem]) -> ScoreState {
    let max: i32 = items.iter().map(|i| i.points).sum();
    let awarded: i32 = items.iter().filter_map(|i| i.awarded).sum();
    let pending = items.iter().filter(|i| i.awarded.is_none()).count();

    if pending > 0 {
        return ScoreState::PendingReview {
            pending,
            awarded,
            max,
        };
    }

    let score = if max > 0 {
        f64::from(awarded) / f64::from(max) * 100.0
    } else {
        0.0
    };
    ScoreState::Complete {
        score,
        awarded,
        max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(question_id: i64, points: i32, awarded: Option<i32>) -> ScoreItem {
        ScoreItem {
            question_id,
            points,
            awarded,
        }
    }

    #[test]
    fn complete_submission_scores_proportionally() {
        let state = aggregate(&[item(1, 10, Some(10)), item(2, 10, Some(5))]);
        assert_eq!(
            state,
            ScoreState::Complete {
                score: 75.0,
                awarded: 15,
                max: 20
            }
        );
        assert_eq!(state.final_score(), Some(75.0));
    }

    #[test]
    fn pending_essay_never_reports_a_numeric_score() {
        let state = aggregate(&[item(1, 10, Some(10)), item(2, 25, None)]);
        assert_eq!(
            state,
            ScoreState::PendingReview {
                pending: 1,
                awarded: 10,
                max: 35
            }
        );
        assert_eq!(state.final_score(), None);
    }

    #[test]
    fn empty_question_set_scores_zero() {
        assert_eq!(
            aggregate(&[]),
            ScoreState::Complete {
                score: 0.0,
                awarded: 0,
                max: 0
            }
        );
    }
}
