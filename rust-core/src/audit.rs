//! Append-only audit trail.
//!
//! Every score computation, manual correction and status transition yields
//! an `AuditEntry` (event type, JSON payload, actor, timestamp). Persisting
//! and displaying the trail is left to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::judgment::StatusTransition;
use crate::scoring::{ManualCorrection, ScoringResult};

/// Actor recorded for entries produced by the engine itself.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AnalysisCompleted,
    ManualCorrection,
    ScoreComputed,
    StatusTransition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the trail, assigned on append.
    pub sequence: u64,
    pub event_type: AuditEventType,
    pub payload: Value,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType, payload: Value, actor: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sequence: 0,
            event_type,
            payload,
            actor: actor.into(),
            timestamp,
        }
    }

    pub fn manual_correction(correction: &ManualCorrection) -> Self {
        Self::new(
            AuditEventType::ManualCorrection,
            json!({
                "item": correction.item,
                "old_value": correction.original_value,
                "new_value": correction.corrected_value,
                "reason": correction.reason,
            }),
            correction.corrected_by.clone(),
            correction.corrected_at,
        )
    }

    pub fn score_computed(result: &ScoringResult) -> Self {
        Self::new(
            AuditEventType::ScoreComputed,
            json!({
                "grade": result.grade,
                "rule_version": result.rule_version,
                "total_score": result.total_score,
                "pass_threshold": result.pass_threshold,
                "passed": result.passed,
                "quality": result.quality,
                "requires_review": result.requires_review,
                "has_manual_corrections": result.has_manual_corrections,
            }),
            SYSTEM_ACTOR,
            result.calculated_at,
        )
    }

    pub fn status_transition(transition: &StatusTransition, actor: impl Into<String>) -> Self {
        Self::new(
            AuditEventType::StatusTransition,
            json!({
                "mode": transition.mode,
                "from": transition.from,
                "action": transition.action,
                "to": transition.to,
            }),
            actor,
            transition.at,
        )
    }
}

/// Ordered audit entries. There is no way to remove or edit an entry once
/// it has been recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, assigning the next sequence number.
    pub fn record(&mut self, mut entry: AuditEntry) -> u64 {
        let sequence = self.entries.len() as u64 + 1;
        entry.sequence = sequence;
        debug!(sequence, event = ?entry.event_type, actor = %entry.actor, "audit entry recorded");
        self.entries.push(entry);
        sequence
    }

    /// Append all entries of another trail, renumbering them.
    pub fn extend(&mut self, other: AuditTrail) {
        for entry in other.entries {
            self.record(entry);
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn of_type(&self, event_type: AuditEventType) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(move |e| e.event_type == event_type)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AnalysisError::json("serializing audit trail", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judgment::{AttemptAction, AttemptStatus, JudgmentMode};
    use crate::rules::ScoringItem;

    fn correction() -> ManualCorrection {
        ManualCorrection {
            item: ScoringItem::KneeFlexion,
            original_value: 88.0,
            corrected_value: 96.5,
            reason: "occluded knee".to_string(),
            corrected_by: "coach-12".to_string(),
            corrected_at: Utc::now(),
        }
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut trail = AuditTrail::new();
        assert_eq!(trail.record(AuditEntry::manual_correction(&correction())), 1);
        assert_eq!(trail.record(AuditEntry::manual_correction(&correction())), 2);
        assert_eq!(trail.len(), 2);
        assert_eq!(trail.entries()[1].sequence, 2);
    }

    #[test]
    fn test_correction_payload() {
        let entry = AuditEntry::manual_correction(&correction());
        assert_eq!(entry.actor, "coach-12");
        assert_eq!(entry.payload["item"], "knee_flexion");
        assert_eq!(entry.payload["old_value"], 88.0);
        assert_eq!(entry.payload["new_value"], 96.5);
    }

    #[test]
    fn test_transition_entry_and_filter() {
        let mut trail = AuditTrail::new();
        trail.record(AuditEntry::manual_correction(&correction()));
        let transition = StatusTransition {
            mode: JudgmentMode::ReviewRequired,
            from: AttemptStatus::Submitted,
            action: AttemptAction::StartReview,
            to: AttemptStatus::UnderReview,
            at: Utc::now(),
        };
        trail.record(AuditEntry::status_transition(&transition, "reviewer-3"));
        let transitions: Vec<_> = trail.of_type(AuditEventType::StatusTransition).collect();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].payload["to"], "under_review");

        let json = trail.to_json_string().unwrap();
        assert!(json.starts_with('['));
        assert!(json.contains("\"status_transition\""));
    }
}
