//! JSON export for the presentation layer.
//!
//! Flattens analysis reports and certification outcomes into stable,
//! self-contained documents:
//! - **AnalysisExport**: steps, kinematic aggregates, profile summary, quality
//! - **CertificationExport**: per-item scores, status, certificate eligibility
//!   and the audit entries of the attempt
//!
//! Unmeasured values (NaN) serialize as `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::error::{AnalysisError, Result};
use crate::hfvp::HfvpResult;
use crate::judgment::{AttemptStatus, JudgmentMode};
use crate::kinematics::KinematicSummary;
use crate::pipeline::{AnalysisReport, CertificationOutcome};
use crate::rules::ScoringItem;
use crate::scoring::CategoryScore;
use crate::types::{QualityGrade, StepMetric};

/// Analysis of one video for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisExport {
    pub analyzed_at: DateTime<Utc>,
    pub fps: f64,
    pub frame_count: usize,
    pub duration_s: f64,
    pub step_count: usize,
    pub detection_rate: f64,
    pub steps: Vec<StepMetric>,
    pub kinematics: KinematicSummary,
    pub profile: Option<ProfileExport>,
    pub quality: QualityGrade,
    pub warnings: Vec<String>,
}

/// Headline force-velocity values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileExport {
    pub f0_n: f64,
    pub f0_rel: f64,
    pub v0_mps: f64,
    pub pmax_w: f64,
    pub pmax_rel: f64,
    pub tau_s: f64,
    pub rf_max: f64,
    pub drf: f64,
    pub r_squared: f64,
    pub used_sections: usize,
    pub is_physically_valid: bool,
    pub quality: QualityGrade,
}

impl From<&HfvpResult> for ProfileExport {
    fn from(r: &HfvpResult) -> Self {
        Self {
            f0_n: r.f0_n,
            f0_rel: r.f0_rel,
            v0_mps: r.v0_mps,
            pmax_w: r.pmax_w,
            pmax_rel: r.pmax_rel,
            tau_s: r.tau_s,
            rf_max: r.rf_max,
            drf: r.drf,
            r_squared: r.r_squared,
            used_sections: r.used_points(),
            is_physically_valid: r.is_physically_valid,
            quality: r.quality,
        }
    }
}

impl AnalysisExport {
    pub fn from_report(report: &AnalysisReport) -> Self {
        let duration_s = if report.fps > 0.0 {
            report.frame_count as f64 / report.fps
        } else {
            0.0
        };
        Self {
            analyzed_at: report.analyzed_at,
            fps: report.fps,
            frame_count: report.frame_count,
            duration_s,
            step_count: report.steps.len(),
            detection_rate: report.detection_rate,
            steps: report.steps.clone(),
            kinematics: report.kinematics.clone(),
            profile: report.hfvp.as_ref().map(ProfileExport::from),
            quality: report.quality_assessment.overall,
            warnings: report.warnings.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| AnalysisError::json("exporting analysis", e))
    }

    pub fn to_compact_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AnalysisError::json("exporting analysis", e))
    }
}

/// One scored item, flattened for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemExport {
    pub item: ScoringItem,
    pub raw_value: f64,
    pub ideal: f64,
    pub score: f64,
    pub max_score: f64,
    pub within_range: bool,
    pub near_threshold: bool,
}

/// A certification attempt for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationExport {
    pub grade: u8,
    pub rule_version: u32,
    pub total_score: f64,
    pub pass_threshold: f64,
    pub passed: bool,
    pub quality: QualityGrade,
    pub judgment_mode: JudgmentMode,
    pub status: AttemptStatus,
    pub can_apply_certificate: bool,
    pub requires_review: bool,
    pub has_manual_corrections: bool,
    pub items: Vec<ItemExport>,
    pub categories: Vec<CategoryScore>,
    pub warnings: Vec<String>,
    pub audit: Vec<AuditEntry>,
    pub calculated_at: DateTime<Utc>,
}

impl CertificationExport {
    pub fn from_outcome(outcome: &CertificationOutcome) -> Self {
        let r = &outcome.result;
        let status = outcome.status();
        Self {
            grade: r.grade,
            rule_version: r.rule_version,
            total_score: r.total_score,
            pass_threshold: r.pass_threshold,
            passed: r.passed,
            quality: r.quality,
            judgment_mode: r.judgment_mode,
            status,
            can_apply_certificate: status.can_apply_certificate(),
            requires_review: r.requires_review,
            has_manual_corrections: r.has_manual_corrections,
            items: r
                .items
                .iter()
                .map(|d| ItemExport {
                    item: d.item,
                    raw_value: d.raw_value,
                    ideal: d.criteria_ideal,
                    score: d.score,
                    max_score: d.max_score,
                    within_range: d.is_within_range,
                    near_threshold: d.is_near_threshold,
                })
                .collect(),
            categories: r.categories.clone(),
            warnings: r.warnings.clone(),
            audit: outcome.audit.entries().to_vec(),
            calculated_at: r.calculated_at,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| AnalysisError::json("exporting certification", e))
    }

    /// Only the per-item breakdown, for score-card widgets.
    pub fn items_only_json(&self) -> Result<String> {
        serde_json::to_string(&self.items).map_err(|e| AnalysisError::json("exporting score items", e))
    }
}
