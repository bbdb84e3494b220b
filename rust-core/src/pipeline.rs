//! End-to-end analysis and certification pipelines.
//!
//! `AnalysisPipeline` runs the measurement stages of one video:
//! 1. **Gait events**: fused detector vote plus early-contact recovery
//! 2. **Steps**: pairing, timing, and track distances when a mapping is given
//! 3. **Kinematics**: posture and stride aggregates
//! 4. **Profile**: H-FVP from explicit splits or from located steps
//! 5. **Quality**: pose and fit reliability
//!
//! `CertificationPipeline` scores an analysis against the grade rule in
//! effect, routes the attempt and collects the audit entries.
//!
//! Both stages hold no state between calls; a host may run independent
//! videos in parallel with separate inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditEventType, AuditTrail, SYSTEM_ACTOR};
use crate::config::EngineConfig;
use crate::error::{AnalysisError, Result};
use crate::hfvp::{HfvpEstimator, HfvpInput, HfvpResult};
use crate::judgment::{route_result, AttemptStatus, StatusTransition};
use crate::kinematics::KinematicSummary;
use crate::landmarks::LandmarkSequence;
use crate::quality::{QualityAssessment, QualityMetrics};
use crate::rules::GradeRuleSet;
use crate::scoring::{
    AngleAggregate, HfvpAggregate, ManualCorrection, ScoringEngine, ScoringInput, ScoringResult,
    StrideAggregate,
};
use crate::step_detection::GaitEventDetector;
use crate::step_metrics::{LinearTrackMapping, StepMetricsCalculator};
use crate::types::{GaitEvent, StepMetric};

// ============================================================================
// ANALYSIS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteProfile {
    pub mass_kg: f64,
    /// Standing height; enables the metric stride-length ratio.
    #[serde(default)]
    pub height_m: Option<f64>,
}

impl AthleteProfile {
    pub fn validate(&self) -> Result<()> {
        if !(self.mass_kg.is_finite() && self.mass_kg > 0.0) {
            return Err(AnalysisError::InvalidMass(self.mass_kg));
        }
        if let Some(h) = self.height_m {
            if !(h.is_finite() && h > 0.0) {
                return Err(AnalysisError::invalid_input(format!(
                    "athlete height must be positive, got {h}"
                )));
            }
        }
        Ok(())
    }
}

/// Timed split markers measured outside the video (gates, radar marks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitTimes {
    pub distances_m: Vec<f64>,
    pub times_s: Vec<f64>,
}

/// What to analyze alongside the landmark sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub fps: f64,
    pub athlete: AthleteProfile,
    /// Takes precedence over step-derived splits.
    #[serde(default)]
    pub splits: Option<SplitTimes>,
    /// Image-to-track calibration, when the camera was calibrated.
    #[serde(default)]
    pub track_mapping: Option<LinearTrackMapping>,
}

impl AnalysisRequest {
    pub fn new(fps: f64, athlete: AthleteProfile) -> Self {
        Self {
            fps,
            athlete,
            splits: None,
            track_mapping: None,
        }
    }

    pub fn with_splits(mut self, distances_m: Vec<f64>, times_s: Vec<f64>) -> Self {
        self.splits = Some(SplitTimes { distances_m, times_s });
        self
    }

    pub fn with_track_mapping(mut self, mapping: LinearTrackMapping) -> Self {
        self.track_mapping = Some(mapping);
        self
    }
}

/// Everything measured from one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub fps: f64,
    pub frame_count: usize,
    pub athlete: AthleteProfile,
    pub events: Vec<GaitEvent>,
    pub steps: Vec<StepMetric>,
    pub detection_rate: f64,
    pub recovered_events: usize,
    pub kinematics: KinematicSummary,
    pub hfvp: Option<HfvpResult>,
    pub quality: QualityMetrics,
    pub quality_assessment: QualityAssessment,
    pub warnings: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisReport {
    /// Scoring input for `grade` built from the measured aggregates.
    pub fn to_scoring_input(&self, grade: u8) -> ScoringInput {
        let mut input = ScoringInput::new(
            grade,
            AngleAggregate::from(&self.kinematics),
            StrideAggregate::from(&self.kinematics),
        )
        .with_quality(self.quality.clone());
        if let Some(hfvp) = &self.hfvp {
            input = input.with_hfvp(HfvpAggregate::from_result(hfvp));
        }
        input
    }
}

#[derive(Default)]
pub struct AnalysisPipeline {
    config: EngineConfig,
    detector: GaitEventDetector,
    estimator: HfvpEstimator,
}

impl AnalysisPipeline {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            detector: GaitEventDetector::new(config.gait.clone()),
            estimator: HfvpEstimator::new(config.hfvp.clone()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn analyze(&self, seq: &LandmarkSequence, request: &AnalysisRequest) -> Result<AnalysisReport> {
        self.analyze_at(seq, request, Utc::now())
    }

    pub fn analyze_at(
        &self,
        seq: &LandmarkSequence,
        request: &AnalysisRequest,
        analyzed_at: DateTime<Utc>,
    ) -> Result<AnalysisReport> {
        request.athlete.validate()?;
        let fps = request.fps;

        // Stage 1-2: events and steps
        let detection = self.detector.detect(seq, fps)?;
        let mut warnings = detection.warnings.clone();
        let steps = match request.track_mapping {
            Some(mapping) => StepMetricsCalculator::new(fps)
                .with_track_mapping(mapping)
                .compute_with_sequence(&detection.events, seq),
            None => detection.steps.clone(),
        };

        // Stage 3: kinematics
        let kinematics = KinematicSummary::compute(
            seq,
            &steps,
            request.athlete.height_m,
            &self.config.gait.detectors.series,
        );

        // Stage 4: profile
        let input = match &request.splits {
            Some(splits) => Some(HfvpInput::new(
                splits.distances_m.clone(),
                splits.times_s.clone(),
                request.athlete.mass_kg,
            )?),
            None if request.track_mapping.is_some() => {
                match HfvpInput::from_step_metrics(&steps, fps, request.athlete.mass_kg) {
                    Ok(input) => Some(input),
                    Err(e) => {
                        warn!(error = %e, "no usable splits from located steps");
                        warnings.push(format!("force-velocity profile skipped: {e}"));
                        None
                    }
                }
            }
            None => None,
        };
        let hfvp = input.map(|input| self.estimator.compute(&input));
        if let Some(result) = &hfvp {
            warnings.extend(result.warnings.iter().cloned());
        }

        // Stage 5: quality
        let mut quality = QualityMetrics::from_sequence(seq);
        if let Some(result) = &hfvp {
            quality = quality.with_hfvp(result);
        }
        let quality_assessment = self.config.scoring.quality.assess(&quality);
        warnings.extend(quality_assessment.warnings.iter().cloned());

        info!(
            frames = seq.len(),
            steps = steps.len(),
            hfvp = hfvp.is_some(),
            quality = quality_assessment.overall.as_str(),
            "analysis complete"
        );

        Ok(AnalysisReport {
            fps,
            frame_count: seq.len(),
            athlete: request.athlete.clone(),
            events: detection.events,
            steps,
            detection_rate: detection.detection_rate,
            recovered_events: detection.recovered_events,
            kinematics,
            hfvp,
            quality,
            quality_assessment,
            warnings,
            analyzed_at,
        })
    }
}

// ============================================================================
// CERTIFICATION
// ============================================================================

/// Score, routed status and audit entries of one certification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationOutcome {
    pub result: ScoringResult,
    pub transition: StatusTransition,
    pub audit: AuditTrail,
}

impl CertificationOutcome {
    pub fn status(&self) -> AttemptStatus {
        self.transition.to
    }
}

#[derive(Debug, Clone)]
pub struct CertificationPipeline {
    engine: ScoringEngine,
    rules: GradeRuleSet,
}

impl Default for CertificationPipeline {
    fn default() -> Self {
        Self::new(EngineConfig::default(), GradeRuleSet::standard())
    }
}

impl CertificationPipeline {
    pub fn new(config: EngineConfig, rules: GradeRuleSet) -> Self {
        Self {
            engine: ScoringEngine::new(config.scoring),
            rules,
        }
    }

    pub fn rules(&self) -> &GradeRuleSet {
        &self.rules
    }

    /// Score an analysis for `grade` with reviewer corrections applied.
    pub fn certify(
        &self,
        report: &AnalysisReport,
        grade: u8,
        corrections: Vec<ManualCorrection>,
        status: AttemptStatus,
        at: DateTime<Utc>,
    ) -> Result<CertificationOutcome> {
        let mut input = report.to_scoring_input(grade);
        for correction in corrections {
            input = input.with_correction(correction);
        }
        let mut outcome = self.certify_input(&input, status, at)?;

        let mut audit = AuditTrail::new();
        audit.record(AuditEntry::new(
            AuditEventType::AnalysisCompleted,
            serde_json::json!({
                "frames": report.frame_count,
                "steps": report.steps.len(),
                "detection_rate": report.detection_rate,
                "hfvp": report.hfvp.is_some(),
            }),
            SYSTEM_ACTOR,
            report.analyzed_at,
        ));
        audit.extend(outcome.audit);
        outcome.audit = audit;
        Ok(outcome)
    }

    /// Score prepared aggregates under the rule in effect at `at` and route
    /// the attempt out of `status`.
    pub fn certify_input(
        &self,
        input: &ScoringInput,
        status: AttemptStatus,
        at: DateTime<Utc>,
    ) -> Result<CertificationOutcome> {
        let rule = self.rules.rule_for(input.grade, at)?;
        let result = self.engine.score_at(input, rule, at)?;
        let transition = route_result(&result, status)?;

        let mut audit = AuditTrail::new();
        for correction in &input.corrections {
            audit.record(AuditEntry::manual_correction(correction));
        }
        audit.record(AuditEntry::score_computed(&result));
        audit.record(AuditEntry::status_transition(&transition, SYSTEM_ACTOR));

        info!(
            grade = result.grade,
            total = result.total_score,
            status = transition.to.as_str(),
            "certification attempt routed"
        );
        Ok(CertificationOutcome {
            result,
            transition,
            audit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judgment::JudgmentMode;
    use crate::rules::ScoringItem;
    use crate::test_support::{synthetic_run, SyntheticRun};
    use crate::types::QualityGrade;

    fn athlete() -> AthleteProfile {
        AthleteProfile {
            mass_kg: 70.0,
            height_m: Some(1.78),
        }
    }

    #[test]
    fn test_invalid_athlete_is_rejected() {
        let run = synthetic_run(&SyntheticRun::with_steps(3));
        let request = AnalysisRequest::new(
            60.0,
            AthleteProfile {
                mass_kg: 0.0,
                height_m: None,
            },
        );
        let err = AnalysisPipeline::default().analyze(&run.sequence, &request).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidMass(_)));
    }

    #[test]
    fn test_analysis_with_splits() {
        let run = synthetic_run(&SyntheticRun::with_steps(5));
        let request = AnalysisRequest::new(60.0, athlete())
            .with_splits(vec![0.0, 5.0, 10.0, 15.0, 20.0], vec![0.0, 1.2, 2.1, 2.9, 3.6]);
        let report = AnalysisPipeline::default().analyze(&run.sequence, &request).unwrap();
        assert_eq!(report.steps.len(), 5);
        assert_eq!(report.frame_count, run.sequence.len());
        let hfvp = report.hfvp.as_ref().unwrap();
        assert!(hfvp.is_physically_valid);
        assert_eq!(report.quality.measurement_points, Some(4));
        assert_eq!(report.quality_assessment.pose, QualityGrade::Good);
    }

    #[test]
    fn test_bad_splits_are_an_error() {
        let run = synthetic_run(&SyntheticRun::with_steps(2));
        let request = AnalysisRequest::new(60.0, athlete())
            .with_splits(vec![0.0, 10.0, 5.0], vec![0.0, 1.0, 2.0]);
        let err = AnalysisPipeline::default().analyze(&run.sequence, &request).unwrap_err();
        assert!(matches!(err, AnalysisError::NonMonotonic { what: "distances", index: 2 }));
    }

    #[test]
    fn test_stationary_mapping_skips_profile_with_warning() {
        // The synthetic athlete runs in place, so located contacts never advance.
        let run = synthetic_run(&SyntheticRun::with_steps(4));
        let request = AnalysisRequest::new(60.0, athlete()).with_track_mapping(LinearTrackMapping::new(0.0, 10.0));
        let report = AnalysisPipeline::default().analyze(&run.sequence, &request).unwrap();
        assert!(report.hfvp.is_none());
        assert!(report.warnings.iter().any(|w| w.contains("force-velocity profile skipped")));
        assert!(report.steps.iter().all(|s| s.contact_distance_m.is_some()));
    }

    #[test]
    fn test_certify_collects_audit_entries() {
        let run = synthetic_run(&SyntheticRun::with_steps(5));
        let report = AnalysisPipeline::default()
            .analyze(&run.sequence, &AnalysisRequest::new(60.0, athlete()))
            .unwrap();
        let correction = ManualCorrection {
            item: ScoringItem::TrunkLean,
            original_value: report.kinematics.trunk_lean_deg,
            corrected_value: 10.0,
            reason: "shoulders occluded by lane marker".to_string(),
            corrected_by: "reviewer-1".to_string(),
            corrected_at: Utc::now(),
        };
        let outcome = CertificationPipeline::default()
            .certify(&report, 6, vec![correction], AttemptStatus::Draft, Utc::now())
            .unwrap();
        assert!(outcome.result.has_manual_corrections);
        assert_eq!(outcome.transition.mode, JudgmentMode::AutoFinal);
        assert!(outcome.status().is_decided());

        let kinds: Vec<AuditEventType> = outcome.audit.entries().iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                AuditEventType::AnalysisCompleted,
                AuditEventType::ManualCorrection,
                AuditEventType::ScoreComputed,
                AuditEventType::StatusTransition,
            ]
        );
        assert_eq!(outcome.audit.entries()[3].sequence, 4);
    }

    #[test]
    fn test_top_grade_without_profile_cannot_be_certified() {
        let run = synthetic_run(&SyntheticRun::with_steps(3));
        let report = AnalysisPipeline::default()
            .analyze(&run.sequence, &AnalysisRequest::new(60.0, athlete()))
            .unwrap();
        let err = CertificationPipeline::default()
            .certify(&report, 1, Vec::new(), AttemptStatus::Draft, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MissingAggregate { .. }));
    }
}
