//! Grade/judgment routing of certification attempts.
//!
//! An attempt moves through a small state machine whose shape depends on the
//! grade's judgment mode:
//!
//! ```text
//! auto-final:       draft ─▶ auto_pass | auto_fail
//! review-required:  draft ─▶ submitted ─▶ under_review ─▶ certified_pass
//!                                                       │ certified_fail
//!                                                       └ needs_resubmission
//! ```
//!
//! `needs_resubmission` and `auto_fail` may restart to `draft`. Only
//! `auto_pass` and `certified_pass` allow a certificate application.
//!
//! # Architecture
//! - Pure decisions: the router computes the next status, callers persist it
//! - Fail-loud: an action that is not legal from the current status is an
//!   `IllegalTransition` error, never a silent no-op

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AnalysisError, Result};
use crate::scoring::ScoringResult;

/// Grades at or below this number (the most advanced ones) require review.
pub const REVIEW_REQUIRED_MAX_GRADE: u8 = 2;

/// Whether a grade's outcome is final when computed or needs a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentMode {
    /// The computed pass/fail is the outcome.
    AutoFinal,
    /// A human certifies the outcome.
    ReviewRequired,
}

impl JudgmentMode {
    pub fn for_grade(grade: u8) -> Self {
        if grade <= REVIEW_REQUIRED_MAX_GRADE {
            JudgmentMode::ReviewRequired
        } else {
            JudgmentMode::AutoFinal
        }
    }

    pub fn requires_review(&self) -> bool {
        matches!(self, JudgmentMode::ReviewRequired)
    }
}

/// Lifecycle status of a certification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Draft,
    Submitted,
    UnderReview,
    CertifiedPass,
    CertifiedFail,
    NeedsResubmission,
    AutoPass,
    AutoFail,
}

impl AttemptStatus {
    pub const ALL: [AttemptStatus; 8] = [
        AttemptStatus::Draft,
        AttemptStatus::Submitted,
        AttemptStatus::UnderReview,
        AttemptStatus::CertifiedPass,
        AttemptStatus::CertifiedFail,
        AttemptStatus::NeedsResubmission,
        AttemptStatus::AutoPass,
        AttemptStatus::AutoFail,
    ];

    /// Returns true if a certificate may be applied for.
    pub fn can_apply_certificate(&self) -> bool {
        matches!(self, AttemptStatus::AutoPass | AttemptStatus::CertifiedPass)
    }

    /// Returns true if the attempt may go back to `Draft`.
    pub fn can_restart(&self) -> bool {
        matches!(self, AttemptStatus::NeedsResubmission | AttemptStatus::AutoFail)
    }

    /// Returns true for statuses that carry a pass/fail outcome.
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            AttemptStatus::AutoPass
                | AttemptStatus::AutoFail
                | AttemptStatus::CertifiedPass
                | AttemptStatus::CertifiedFail
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Draft => "draft",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::UnderReview => "under_review",
            AttemptStatus::CertifiedPass => "certified_pass",
            AttemptStatus::CertifiedFail => "certified_fail",
            AttemptStatus::NeedsResubmission => "needs_resubmission",
            AttemptStatus::AutoPass => "auto_pass",
            AttemptStatus::AutoFail => "auto_fail",
        }
    }
}

/// An event that moves an attempt between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptAction {
    /// Record the computed outcome of an auto-final grade.
    AutoJudge { passed: bool },
    /// Hand a review-required attempt to reviewers.
    Submit,
    StartReview,
    CertifyPass,
    CertifyFail,
    RequestResubmission,
    /// Return a failed or bounced attempt to `Draft`.
    Restart,
}

impl AttemptAction {
    pub const ALL: [AttemptAction; 8] = [
        AttemptAction::AutoJudge { passed: true },
        AttemptAction::AutoJudge { passed: false },
        AttemptAction::Submit,
        AttemptAction::StartReview,
        AttemptAction::CertifyPass,
        AttemptAction::CertifyFail,
        AttemptAction::RequestResubmission,
        AttemptAction::Restart,
    ];
}

/// A status change, as handed to persistence and the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub mode: JudgmentMode,
    pub from: AttemptStatus,
    pub action: AttemptAction,
    pub to: AttemptStatus,
    pub at: DateTime<Utc>,
}

/// Next status after `action`, or `IllegalTransition`.
pub fn transition(mode: JudgmentMode, from: AttemptStatus, action: AttemptAction) -> Result<AttemptStatus> {
    use AttemptAction as A;
    use AttemptStatus as S;
    use JudgmentMode as M;

    let to = match (mode, from, action) {
        (M::AutoFinal, S::Draft, A::AutoJudge { passed: true }) => Some(S::AutoPass),
        (M::AutoFinal, S::Draft, A::AutoJudge { passed: false }) => Some(S::AutoFail),
        (M::ReviewRequired, S::Draft, A::Submit) => Some(S::Submitted),
        (M::ReviewRequired, S::Submitted, A::StartReview) => Some(S::UnderReview),
        (M::ReviewRequired, S::UnderReview, A::CertifyPass) => Some(S::CertifiedPass),
        (M::ReviewRequired, S::UnderReview, A::CertifyFail) => Some(S::CertifiedFail),
        (M::ReviewRequired, S::UnderReview, A::RequestResubmission) => Some(S::NeedsResubmission),
        (_, status, A::Restart) if status.can_restart() => Some(S::Draft),
        _ => None,
    };
    match to {
        Some(to) => {
            debug!(from = from.as_str(), to = to.as_str(), "attempt status transition");
            Ok(to)
        }
        None => Err(AnalysisError::IllegalTransition { from, action }),
    }
}

/// Route a computed score out of `Draft`.
///
/// Auto-final grades settle immediately (`score >= threshold` passes);
/// review-required grades are submitted regardless of the score.
pub fn route(
    mode: JudgmentMode,
    status: AttemptStatus,
    score: f64,
    threshold: f64,
    at: DateTime<Utc>,
) -> Result<StatusTransition> {
    let action = match mode {
        JudgmentMode::AutoFinal => AttemptAction::AutoJudge {
            passed: score >= threshold,
        },
        JudgmentMode::ReviewRequired => AttemptAction::Submit,
    };
    let to = transition(mode, status, action)?;
    info!(mode = ?mode, score, threshold, to = to.as_str(), "attempt routed");
    Ok(StatusTransition {
        mode,
        from: status,
        action,
        to,
        at,
    })
}

/// Route a scoring result. Unlike `route`, the auto-final outcome follows
/// `result.passed`, so reference-only data fails even above the threshold.
pub fn route_result(result: &ScoringResult, status: AttemptStatus) -> Result<StatusTransition> {
    let mode = result.judgment_mode;
    let action = match mode {
        JudgmentMode::AutoFinal => AttemptAction::AutoJudge {
            passed: result.passed,
        },
        JudgmentMode::ReviewRequired => AttemptAction::Submit,
    };
    let to = transition(mode, status, action)?;
    Ok(StatusTransition {
        mode,
        from: status,
        action,
        to,
        at: result.calculated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_mode_for_grade() {
        assert_eq!(JudgmentMode::for_grade(1), JudgmentMode::ReviewRequired);
        assert_eq!(JudgmentMode::for_grade(2), JudgmentMode::ReviewRequired);
        assert_eq!(JudgmentMode::for_grade(3), JudgmentMode::AutoFinal);
        assert_eq!(JudgmentMode::for_grade(10), JudgmentMode::AutoFinal);
    }

    #[test]
    fn test_auto_final_routing() {
        let pass = route(JudgmentMode::AutoFinal, AttemptStatus::Draft, 72.0, 70.0, now()).unwrap();
        assert_eq!(pass.to, AttemptStatus::AutoPass);
        let fail = route(JudgmentMode::AutoFinal, AttemptStatus::Draft, 69.9, 70.0, now()).unwrap();
        assert_eq!(fail.to, AttemptStatus::AutoFail);
        let exact = route(JudgmentMode::AutoFinal, AttemptStatus::Draft, 70.0, 70.0, now()).unwrap();
        assert_eq!(exact.to, AttemptStatus::AutoPass);
    }

    #[test]
    fn test_review_required_path() {
        let mode = JudgmentMode::ReviewRequired;
        let routed = route(mode, AttemptStatus::Draft, 95.0, 80.0, now()).unwrap();
        assert_eq!(routed.to, AttemptStatus::Submitted);
        let s = transition(mode, routed.to, AttemptAction::StartReview).unwrap();
        assert_eq!(s, AttemptStatus::UnderReview);
        let bounced = transition(mode, s, AttemptAction::RequestResubmission).unwrap();
        assert_eq!(bounced, AttemptStatus::NeedsResubmission);
        assert_eq!(
            transition(mode, bounced, AttemptAction::Restart).unwrap(),
            AttemptStatus::Draft
        );
    }

    #[test]
    fn test_illegal_transitions_are_errors() {
        let err = transition(
            JudgmentMode::ReviewRequired,
            AttemptStatus::CertifiedPass,
            AttemptAction::Restart,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::IllegalTransition {
                from: AttemptStatus::CertifiedPass,
                action: AttemptAction::Restart
            }
        ));
        // Auto-final grades never enter review.
        assert!(transition(JudgmentMode::AutoFinal, AttemptStatus::Draft, AttemptAction::Submit).is_err());
        // Routing is only legal from draft.
        assert!(route(JudgmentMode::AutoFinal, AttemptStatus::AutoPass, 90.0, 70.0, now()).is_err());
    }

    #[test]
    fn test_certificate_only_after_pass() {
        for status in AttemptStatus::ALL {
            let expected = matches!(status, AttemptStatus::AutoPass | AttemptStatus::CertifiedPass);
            assert_eq!(status.can_apply_certificate(), expected, "{status:?}");
        }
    }

    #[test]
    fn test_draft_reachable_only_from_restartable_states() {
        for mode in [JudgmentMode::AutoFinal, JudgmentMode::ReviewRequired] {
            for status in AttemptStatus::ALL {
                for action in AttemptAction::ALL {
                    if let Ok(AttemptStatus::Draft) = transition(mode, status, action) {
                        assert!(
                            matches!(status, AttemptStatus::NeedsResubmission | AttemptStatus::AutoFail),
                            "{mode:?} {status:?} {action:?}"
                        );
                    }
                }
                if status.can_restart() {
                    assert_eq!(transition(mode, status, AttemptAction::Restart).unwrap(), AttemptStatus::Draft);
                }
            }
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&AttemptStatus::NeedsResubmission).unwrap();
        assert_eq!(json, "\"needs_resubmission\"");
    }
}
