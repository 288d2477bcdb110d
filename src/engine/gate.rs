// src/engine/gate.rs
//
// Exam access gate: pure decision over (exam, submission state, makeup
// grant, now). Callers re-run it on every boundary operation, not just at
// session start, because a window or grant can lapse mid-session.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::exam::{Exam, ExamStatus};
use crate::models::susulan::MakeupGrant;

/// Why a student is not allowed into the exam right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NotPublished,
    NotStarted,
    Ended,
    AlreadySubmitted,
}

impl DenyReason {
    /// Machine-readable code surfaced in 403 bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::NotPublished => "denied_not_published",
            DenyReason::NotStarted => "denied_not_started",
            DenyReason::Ended => "denied_ended",
            DenyReason::AlreadySubmitted => "denied_already_submitted",
        }
    }
}

/// Outcome of an access evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Denied(DenyReason),
    AdmittedNormal { remaining: Duration },
    AdmittedMakeup { remaining: Duration },
}

impl AccessDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(
            self,
            AccessDecision::AdmittedNormal { .. } | AccessDecision::AdmittedMakeup { .. }
        )
    }

    pub fn remaining_seconds(&self) -> Option<i64> {
        match self {
            AccessDecision::AdmittedNormal { remaining }
            | AccessDecision::AdmittedMakeup { remaining } => Some(remaining.num_seconds()),
            AccessDecision::Denied(_) => None,
        }
    }
}

/// Remaining makeup time for a grant at `now`, if the grant is live.
///
/// The configured duration counts from the student's first admitted access
/// under the grant, not from issuance; an untouched grant therefore counts
/// from `now`. The absolute expiry caps the result either way.
fn makeup_remaining(grant: &MakeupGrant, now: DateTime<Utc>) -> Option<Duration> {
    if !grant.is_active || now > grant.expires_at {
        return None;
    }
    let anchor = grant.first_access_at.unwrap_or(now);
    let budget_end = anchor + Duration::minutes(i64::from(grant.duration_minutes));
    let end = budget_end.min(grant.expires_at);
    let remaining = end - now;
    if remaining > Duration::zero() {
        Some(remaining)
    } else {
        None
    }
}

/// Decide whether the student may start, continue or resume the exam.
///
/// `has_finalized` tells whether a finalized submission already exists for
/// this (student, exam). A finalized submission is a hard denial inside the
/// normal window; only an explicit makeup grant re-admits for a retake.
pub fn evaluate(
    exam: &Exam,
    has_finalized: bool,
    grant: Option<&MakeupGrant>,
    now: DateTime<Utc>,
) -> AccessDecision {
    // A draft is never accessible to students, regardless of window.
    if exam.lifecycle() == ExamStatus::Draft {
        return AccessDecision::Denied(DenyReason::NotPublished);
    }

    let in_window = now >= exam.start_at && now <= exam.end_at;
    if in_window && !has_finalized {
        return AccessDecision::AdmittedNormal {
            remaining: exam.end_at - now,
        };
    }

    // Outside the window (or already finalized): the most recent active,
    // unexpired grant governs.
    if let Some(grant) = grant {
        if let Some(remaining) = makeup_remaining(grant, now) {
            return AccessDecision::AdmittedMakeup { remaining };
        }
    }

    if has_finalized {
        AccessDecision::Denied(DenyReason::AlreadySubmitted)
    } else if now < exam.start_at {
        AccessDecision::Denied(DenyReason::NotStarted)
    } else {
        AccessDecision::Denied(DenyReason::Ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::types::Json;

    fn exam(status: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Exam {
        Exam {
            id: 1,
            title: "Ujian Matematika".to_string(),
            description: None,
            teacher_id: 7,
            subject_id: 3,
            class_ids: Json(vec![10]),
            start_at: start,
            end_at: end,
            shuffle_questions: false,
            show_score: true,
            status: status.to_string(),
            created_at: None,
        }
    }

    fn grant(
        duration_minutes: i32,
        expires_at: DateTime<Utc>,
        first_access_at: Option<DateTime<Utc>>,
    ) -> MakeupGrant {
        MakeupGrant {
            id: 1,
            exam_id: 1,
            student_id: 42,
            duration_minutes,
            expires_at,
            is_active: true,
            granted_by: 7,
            first_access_at,
            created_at: None,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn draft_is_denied_even_inside_window() {
        let e = exam("draft", at(0), at(3600));
        let decision = evaluate(&e, false, None, at(100));
        assert_eq!(decision, AccessDecision::Denied(DenyReason::NotPublished));
    }

    #[test]
    fn window_boundaries() {
        let e = exam("active", at(0), at(3600));

        // One second early: not started.
        assert_eq!(
            evaluate(&e, false, None, at(-1)),
            AccessDecision::Denied(DenyReason::NotStarted)
        );

        // Exactly at start: admitted with the full window.
        assert_eq!(
            evaluate(&e, false, None, at(0)),
            AccessDecision::AdmittedNormal {
                remaining: Duration::seconds(3600)
            }
        );

        // One second past the end, no grant: ended.
        assert_eq!(
            evaluate(&e, false, None, at(3601)),
            AccessDecision::Denied(DenyReason::Ended)
        );
    }

    #[test]
    fn finalized_submission_is_a_hard_denial_inside_the_window() {
        let e = exam("active", at(0), at(3600));
        assert_eq!(
            evaluate(&e, true, None, at(100)),
            AccessDecision::Denied(DenyReason::AlreadySubmitted)
        );
    }

    #[test]
    fn grant_admits_after_window_bounded_by_duration() {
        let e = exam("active", at(0), at(3600));
        // 30 minute budget, expiry far away, not yet accessed.
        let g = grant(30, at(100_000), None);
        let decision = evaluate(&e, false, Some(&g), at(5000));
        assert_eq!(
            decision,
            AccessDecision::AdmittedMakeup {
                remaining: Duration::minutes(30)
            }
        );
    }

    #[test]
    fn grant_remaining_is_bounded_by_absolute_expiry() {
        let e = exam("active", at(0), at(3600));
        // 60 minute budget but the grant expires in 10 minutes.
        let g = grant(60, at(5000 + 600), None);
        let decision = evaluate(&e, false, Some(&g), at(5000));
        assert_eq!(
            decision,
            AccessDecision::AdmittedMakeup {
                remaining: Duration::seconds(600)
            }
        );
    }

    #[test]
    fn grant_duration_counts_from_first_access() {
        let e = exam("active", at(0), at(3600));
        // First accessed at t=5000 with a 30 minute budget; at t=5900 only
        // 900 seconds remain.
        let g = grant(30, at(100_000), Some(at(5000)));
        let decision = evaluate(&e, false, Some(&g), at(5900));
        assert_eq!(
            decision,
            AccessDecision::AdmittedMakeup {
                remaining: Duration::seconds(1800 - 900)
            }
        );
    }

    #[test]
    fn exhausted_grant_no_longer_admits() {
        let e = exam("active", at(0), at(3600));
        let g = grant(30, at(100_000), Some(at(5000)));
        // Budget ran out at t=6800.
        assert_eq!(
            evaluate(&e, false, Some(&g), at(6801)),
            AccessDecision::Denied(DenyReason::Ended)
        );
    }

    #[test]
    fn inactive_or_expired_grant_is_ignored() {
        let e = exam("active", at(0), at(3600));

        let mut revoked = grant(30, at(100_000), None);
        revoked.is_active = false;
        assert_eq!(
            evaluate(&e, false, Some(&revoked), at(5000)),
            AccessDecision::Denied(DenyReason::Ended)
        );

        let expired = grant(30, at(4000), None);
        assert_eq!(
            evaluate(&e, false, Some(&expired), at(5000)),
            AccessDecision::Denied(DenyReason::Ended)
        );
    }

    #[test]
    fn grant_readmits_a_finalized_submission() {
        // Explicit retake: the grant overrides the already-submitted denial.
        let e = exam("active", at(0), at(3600));
        let g = grant(30, at(100_000), None);
        assert!(evaluate(&e, true, Some(&g), at(5000)).is_admitted());
        assert_eq!(
            evaluate(&e, true, None, at(5000)),
            AccessDecision::Denied(DenyReason::AlreadySubmitted)
        );
    }
}
