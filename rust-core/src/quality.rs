//! Data-quality metrics and grading.
//!
//! Quality never blocks computation. It only downgrades the grade attached to
//! a result, which in turn discounts scores and can make a result
//! reference-only.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hfvp::{HfvpQualityThresholds, HfvpResult};
use crate::landmarks::{Joint, LandmarkSequence};
use crate::signal::RunningStats;
use crate::types::QualityGrade;

/// Reliability indicators of the measurements behind a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean lower-body landmark visibility over non-dropped frames.
    pub pose_confidence_avg: f64,
    /// Lowest per-frame lower-body visibility over non-dropped frames.
    pub pose_confidence_min: f64,
    /// Fraction of frames without a pose.
    pub frame_drop_rate: f64,
    /// Force-velocity regression R², when a profile was estimated.
    pub regression_r_squared: Option<f64>,
    /// Position-fit R² of the profile.
    pub position_r_squared: Option<f64>,
    /// Number of split points behind the profile fit.
    pub measurement_points: Option<usize>,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            pose_confidence_avg: 1.0,
            pose_confidence_min: 1.0,
            frame_drop_rate: 0.0,
            regression_r_squared: None,
            position_r_squared: None,
            measurement_points: None,
        }
    }
}

impl QualityMetrics {
    /// Extract pose quality from a landmark sequence.
    pub fn from_sequence(seq: &LandmarkSequence) -> Self {
        let mut stats = RunningStats::new();
        for frame in seq.frames().iter().filter(|f| !f.is_dropped()) {
            stats.update(frame.mean_visibility(&Joint::LOWER_BODY) as f64);
        }
        let total = seq.len();
        let frame_drop_rate = if total == 0 {
            1.0
        } else {
            seq.dropped_count() as f64 / total as f64
        };
        let (avg, min) = if stats.count() == 0 {
            (0.0, 0.0)
        } else {
            (stats.mean(), stats.min())
        };
        Self {
            pose_confidence_avg: avg,
            pose_confidence_min: min,
            frame_drop_rate,
            ..Self::default()
        }
    }

    /// Attach the fit statistics of a force-velocity profile.
    pub fn with_hfvp(mut self, result: &HfvpResult) -> Self {
        self.regression_r_squared = Some(result.r_squared);
        self.position_r_squared = Some(result.position_r_squared);
        self.measurement_points = Some(result.used_points());
        self
    }
}

/// Grading bands for `QualityMetrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub good_pose_avg: f64,
    pub good_pose_min: f64,
    pub good_max_drop_rate: f64,
    pub acceptable_pose_avg: f64,
    pub acceptable_pose_min: f64,
    pub acceptable_max_drop_rate: f64,
    /// Profile fit bands; fewer points than `acceptable_min_points` is
    /// reference-only.
    pub profile: HfvpQualityThresholds,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            good_pose_avg: 0.8,
            good_pose_min: 0.5,
            good_max_drop_rate: 0.05,
            acceptable_pose_avg: 0.6,
            acceptable_pose_min: 0.3,
            acceptable_max_drop_rate: 0.15,
            profile: HfvpQualityThresholds::default(),
        }
    }
}

/// Graded quality with the reasons for any downgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub pose: QualityGrade,
    /// `None` when no profile was measured.
    pub hfvp: Option<QualityGrade>,
    pub overall: QualityGrade,
    pub warnings: Vec<String>,
}

impl QualityThresholds {
    pub fn assess(&self, metrics: &QualityMetrics) -> QualityAssessment {
        let mut warnings = Vec::new();
        let pose = self.grade_pose(metrics, &mut warnings);
        let hfvp = self.grade_hfvp(metrics, &mut warnings);
        let overall = hfvp.map_or(pose, |h| pose.worst(h));
        debug!(pose = pose.as_str(), overall = overall.as_str(), "quality assessed");
        QualityAssessment {
            pose,
            hfvp,
            overall,
            warnings,
        }
    }

    fn grade_pose(&self, m: &QualityMetrics, warnings: &mut Vec<String>) -> QualityGrade {
        let (avg, min, drop) = (m.pose_confidence_avg, m.pose_confidence_min, m.frame_drop_rate);
        if avg >= self.good_pose_avg && min >= self.good_pose_min && drop <= self.good_max_drop_rate {
            return QualityGrade::Good;
        }
        if avg >= self.acceptable_pose_avg
            && min >= self.acceptable_pose_min
            && drop <= self.acceptable_max_drop_rate
        {
            warnings.push(format!(
                "pose quality acceptable (avg {avg:.2}, min {min:.2}, dropped {:.0}%)",
                drop * 100.0
            ));
            return QualityGrade::Acceptable;
        }
        warnings.push(format!(
            "pose quality too low to certify (avg {avg:.2}, min {min:.2}, dropped {:.0}%)",
            drop * 100.0
        ));
        QualityGrade::ReferenceOnly
    }

    fn grade_hfvp(&self, m: &QualityMetrics, warnings: &mut Vec<String>) -> Option<QualityGrade> {
        if m.regression_r_squared.is_none() && m.position_r_squared.is_none() && m.measurement_points.is_none() {
            return None;
        }
        let points = m.measurement_points.unwrap_or(0);
        let r2 = m.regression_r_squared.unwrap_or(f64::NAN);
        let position = m.position_r_squared.unwrap_or(f64::NAN);
        let p = &self.profile;
        if points < p.acceptable_min_points {
            warnings.push(format!(
                "only {points} measurement point(s); profile is reference-only"
            ));
            return Some(QualityGrade::ReferenceOnly);
        }
        if r2 >= p.good_r_squared && position >= p.good_position_r_squared && points >= p.good_min_points {
            return Some(QualityGrade::Good);
        }
        if r2 >= p.acceptable_r_squared && position >= p.acceptable_position_r_squared {
            warnings.push(format!("profile fit acceptable (R² {r2:.3}, position R² {position:.3})"));
            return Some(QualityGrade::Acceptable);
        }
        warnings.push(format!("profile fit too weak to certify (R² {r2:.3}, position R² {position:.3})"));
        Some(QualityGrade::ReferenceOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{LandmarkFrame, LANDMARK_COUNT};

    fn metrics(avg: f64, min: f64, drop: f64) -> QualityMetrics {
        QualityMetrics {
            pose_confidence_avg: avg,
            pose_confidence_min: min,
            frame_drop_rate: drop,
            ..QualityMetrics::default()
        }
    }

    #[test]
    fn test_pose_grades() {
        let t = QualityThresholds::default();
        assert_eq!(t.assess(&metrics(0.9, 0.6, 0.0)).overall, QualityGrade::Good);
        assert_eq!(t.assess(&metrics(0.7, 0.4, 0.1)).overall, QualityGrade::Acceptable);
        assert_eq!(t.assess(&metrics(0.9, 0.6, 0.3)).overall, QualityGrade::ReferenceOnly);
        assert!(t.assess(&metrics(0.9, 0.6, 0.0)).warnings.is_empty());
    }

    #[test]
    fn test_few_measurement_points_are_reference_only() {
        let t = QualityThresholds::default();
        let m = QualityMetrics {
            regression_r_squared: Some(0.99),
            position_r_squared: Some(0.99),
            measurement_points: Some(2),
            ..QualityMetrics::default()
        };
        let assessment = t.assess(&m);
        assert_eq!(assessment.pose, QualityGrade::Good);
        assert_eq!(assessment.hfvp, Some(QualityGrade::ReferenceOnly));
        assert_eq!(assessment.overall, QualityGrade::ReferenceOnly);
    }

    #[test]
    fn test_hfvp_grade_is_worst_of_bands() {
        let t = QualityThresholds::default();
        let m = QualityMetrics {
            regression_r_squared: Some(0.72),
            position_r_squared: Some(0.96),
            measurement_points: Some(4),
            ..QualityMetrics::default()
        };
        assert_eq!(t.assess(&m).overall, QualityGrade::Acceptable);
    }

    #[test]
    fn test_from_sequence() {
        let mut seq = LandmarkSequence::new();
        seq.push(LandmarkFrame::from_raw(&vec![[0.5, 0.5, 0.0, 0.9]; LANDMARK_COUNT]).unwrap());
        seq.push(LandmarkFrame::from_raw(&vec![[0.5, 0.5, 0.0, 0.7]; LANDMARK_COUNT]).unwrap());
        seq.push_dropped();
        seq.push_dropped();
        let m = QualityMetrics::from_sequence(&seq);
        assert!((m.pose_confidence_avg - 0.8).abs() < 1e-6);
        assert!((m.pose_confidence_min - 0.7).abs() < 1e-6);
        assert!((m.frame_drop_rate - 0.5).abs() < 1e-12);
    }
}
