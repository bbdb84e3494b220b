//! Certification scoring engine.
//!
//! Converts measured aggregates into a graded score under one grade rule:
//! 1. Apply manual corrections (in order) to a copy of the input
//! 2. Score each item: zero outside [min, max], otherwise linear decay from
//!    full points at the ideal to half points at the range edge
//! 3. Discount by data quality (good / acceptable / reference-only)
//! 4. Roll up into categories and a total clipped to the rule's scale
//! 5. Pass when the total reaches the threshold and quality is certifiable
//!
//! Scoring is a pure function of (input, rule, timestamp): identical calls
//! produce identical results, and re-scoring builds a new result.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AnalysisError, Result};
use crate::hfvp::HfvpResult;
use crate::judgment::JudgmentMode;
use crate::kinematics::KinematicSummary;
use crate::quality::{QualityMetrics, QualityThresholds};
use crate::rules::{GradeRule, ItemRule, ScoreCategory, ScoringItem};
use crate::types::{round_to, QualityGrade};

// ============================================================================
// INPUT
// ============================================================================

/// Posture aggregates (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleAggregate {
    pub knee_flexion_deg: f64,
    pub hip_extension_deg: f64,
    pub trunk_lean_deg: f64,
}

/// Stride and ground-contact aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrideAggregate {
    pub stride_length_ratio: f64,
    pub stride_frequency_hz: f64,
    pub contact_time_s: f64,
}

impl From<&KinematicSummary> for AngleAggregate {
    fn from(summary: &KinematicSummary) -> Self {
        Self {
            knee_flexion_deg: summary.knee_flexion_deg,
            hip_extension_deg: summary.hip_extension_deg,
            trunk_lean_deg: summary.trunk_lean_deg,
        }
    }
}

impl From<&KinematicSummary> for StrideAggregate {
    fn from(summary: &KinematicSummary) -> Self {
        Self {
            stride_length_ratio: summary.stride_length_ratio,
            stride_frequency_hz: summary.stride_frequency_hz,
            contact_time_s: summary.contact_time_s,
        }
    }
}

/// Force-velocity aggregates, mass-normalized where applicable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HfvpAggregate {
    /// N/kg
    pub f0_rel: f64,
    pub v0_mps: f64,
    /// W/kg
    pub pmax_rel: f64,
    pub drf: f64,
    pub is_physically_valid: bool,
    pub quality: QualityGrade,
}

impl HfvpAggregate {
    pub fn from_result(result: &HfvpResult) -> Self {
        Self {
            f0_rel: result.f0_rel,
            v0_mps: result.v0_mps,
            pmax_rel: result.pmax_rel,
            drf: result.drf,
            is_physically_valid: result.is_physically_valid,
            quality: result.quality,
        }
    }
}

/// A reviewer's override of one measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualCorrection {
    pub item: ScoringItem,
    pub original_value: f64,
    pub corrected_value: f64,
    pub reason: String,
    pub corrected_by: String,
    pub corrected_at: DateTime<Utc>,
}

/// Everything the engine scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringInput {
    pub grade: u8,
    pub angles: AngleAggregate,
    pub stride: StrideAggregate,
    /// Required only by rules with force-velocity items.
    pub hfvp: Option<HfvpAggregate>,
    pub quality: QualityMetrics,
    /// Applied in order before scoring.
    #[serde(default)]
    pub corrections: Vec<ManualCorrection>,
}

impl ScoringInput {
    pub fn new(grade: u8, angles: AngleAggregate, stride: StrideAggregate) -> Self {
        Self {
            grade,
            angles,
            stride,
            hfvp: None,
            quality: QualityMetrics::default(),
            corrections: Vec::new(),
        }
    }

    pub fn with_hfvp(mut self, hfvp: HfvpAggregate) -> Self {
        self.hfvp = Some(hfvp);
        self
    }

    pub fn with_quality(mut self, quality: QualityMetrics) -> Self {
        self.quality = quality;
        self
    }

    /// Append a correction. Corrections are never removed.
    pub fn with_correction(mut self, correction: ManualCorrection) -> Self {
        self.corrections.push(correction);
        self
    }

    /// Measured value of an item; `None` when its aggregate is missing.
    pub fn raw_value(&self, item: ScoringItem) -> Option<f64> {
        match item {
            ScoringItem::KneeFlexion => Some(self.angles.knee_flexion_deg),
            ScoringItem::HipExtension => Some(self.angles.hip_extension_deg),
            ScoringItem::TrunkLean => Some(self.angles.trunk_lean_deg),
            ScoringItem::StrideLengthRatio => Some(self.stride.stride_length_ratio),
            ScoringItem::StrideFrequency => Some(self.stride.stride_frequency_hz),
            ScoringItem::ContactTime => Some(self.stride.contact_time_s),
            ScoringItem::F0 => self.hfvp.map(|h| h.f0_rel),
            ScoringItem::V0 => self.hfvp.map(|h| h.v0_mps),
            ScoringItem::Pmax => self.hfvp.map(|h| h.pmax_rel),
            ScoringItem::Drf => self.hfvp.map(|h| h.drf),
        }
    }

    /// Overwrite one value. Returns false when the item's aggregate is missing.
    fn set_value(&mut self, item: ScoringItem, value: f64) -> bool {
        let slot = match item {
            ScoringItem::KneeFlexion => &mut self.angles.knee_flexion_deg,
            ScoringItem::HipExtension => &mut self.angles.hip_extension_deg,
            ScoringItem::TrunkLean => &mut self.angles.trunk_lean_deg,
            ScoringItem::StrideLengthRatio => &mut self.stride.stride_length_ratio,
            ScoringItem::StrideFrequency => &mut self.stride.stride_frequency_hz,
            ScoringItem::ContactTime => &mut self.stride.contact_time_s,
            ScoringItem::F0 | ScoringItem::V0 | ScoringItem::Pmax | ScoringItem::Drf => {
                let Some(hfvp) = self.hfvp.as_mut() else {
                    return false;
                };
                match item {
                    ScoringItem::F0 => &mut hfvp.f0_rel,
                    ScoringItem::V0 => &mut hfvp.v0_mps,
                    ScoringItem::Pmax => &mut hfvp.pmax_rel,
                    _ => &mut hfvp.drf,
                }
            }
        };
        *slot = value;
        true
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Score breakdown of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemScoreDetail {
    pub item: ScoringItem,
    pub category: ScoreCategory,
    pub raw_value: f64,
    pub criteria_min: f64,
    pub criteria_ideal: f64,
    pub criteria_max: f64,
    /// `raw_value - criteria_ideal`.
    pub deviation: f64,
    pub score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub is_within_range: bool,
    pub is_near_threshold: bool,
    /// True when a quality discount reduced the score.
    pub is_quality_adjusted: bool,
    pub quality: QualityGrade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: ScoreCategory,
    pub score: f64,
    pub max_score: f64,
    pub percentage: f64,
}

/// Outcome of scoring one input under one rule. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub grade: u8,
    pub rule_version: u32,
    pub items: Vec<ItemScoreDetail>,
    pub categories: Vec<CategoryScore>,
    pub total_score: f64,
    pub max_score: f64,
    pub pass_threshold: f64,
    pub passed: bool,
    pub quality: QualityGrade,
    pub judgment_mode: JudgmentMode,
    /// Some raw value sits close to a criteria boundary.
    pub requires_review: bool,
    pub has_manual_corrections: bool,
    pub corrections: Vec<ManualCorrection>,
    pub warnings: Vec<String>,
    pub calculated_at: DateTime<Utc>,
}

impl ScoringResult {
    pub fn item(&self, item: ScoringItem) -> Option<&ItemScoreDetail> {
        self.items.iter().find(|d| d.item == item)
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Scoring engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub good_multiplier: f64,
    pub acceptable_multiplier: f64,
    pub reference_only_multiplier: f64,
    /// Near-threshold band as a fraction of the boundary magnitude.
    pub near_threshold_band: f64,
    pub quality: QualityThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            good_multiplier: 1.0,
            acceptable_multiplier: 0.8,
            reference_only_multiplier: 0.0,
            near_threshold_band: 0.05,
            quality: QualityThresholds::default(),
        }
    }
}

impl ScoringConfig {
    pub fn multiplier(&self, grade: QualityGrade) -> f64 {
        match grade {
            QualityGrade::Good => self.good_multiplier,
            QualityGrade::Acceptable => self.acceptable_multiplier,
            QualityGrade::ReferenceOnly => self.reference_only_multiplier,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score `input` under `rule`, stamped with the current time.
    pub fn score(&self, input: &ScoringInput, rule: &GradeRule) -> Result<ScoringResult> {
        self.score_at(input, rule, Utc::now())
    }

    /// Score `input` under `rule` with an explicit timestamp.
    pub fn score_at(
        &self,
        input: &ScoringInput,
        rule: &GradeRule,
        calculated_at: DateTime<Utc>,
    ) -> Result<ScoringResult> {
        if input.grade != rule.grade {
            return Err(AnalysisError::invalid_input(format!(
                "input is for grade {} but rule is for grade {}",
                input.grade, rule.grade
            )));
        }
        rule.validate()?;
        if input.hfvp.is_none() {
            if let Some(missing) = rule.items.iter().find(|r| r.item.is_hfvp()) {
                return Err(AnalysisError::MissingAggregate { item: missing.item });
            }
        }

        let mut warnings = Vec::new();
        let corrected = self.apply_corrections(input, &mut warnings);

        let assessment = self.config.quality.assess(&corrected.quality);
        warnings.extend(assessment.warnings.iter().cloned());
        let pose_quality = assessment.pose;
        let hfvp_quality = corrected.hfvp.map(|h| {
            let own = if h.is_physically_valid {
                h.quality
            } else {
                QualityGrade::ReferenceOnly
            };
            assessment.hfvp.map_or(own, |a| a.worst(own))
        });
        if let Some(h) = corrected.hfvp.filter(|h| !h.is_physically_valid && rule.requires_hfvp()) {
            debug!(f0 = h.f0_rel, "physically invalid profile scored as reference-only");
            warnings.push("force-velocity profile is not physically valid".to_string());
        }

        let mut items = Vec::with_capacity(rule.items.len());
        for item_rule in &rule.items {
            let item_quality = if item_rule.item.is_hfvp() {
                hfvp_quality.unwrap_or(QualityGrade::ReferenceOnly)
            } else {
                pose_quality
            };
            let raw = corrected.raw_value(item_rule.item).unwrap_or(f64::NAN);
            let detail = self.score_item(item_rule, raw, item_quality, &mut warnings);
            items.push(detail);
        }

        let overall_quality = if rule.requires_hfvp() {
            hfvp_quality.map_or(pose_quality, |h| pose_quality.worst(h))
        } else {
            pose_quality
        };

        let mut by_category: BTreeMap<ScoreCategory, (f64, f64)> = BTreeMap::new();
        for detail in &items {
            let entry = by_category.entry(detail.category).or_insert((0.0, 0.0));
            entry.0 += detail.score;
            entry.1 += detail.max_score;
        }
        let categories = by_category
            .into_iter()
            .map(|(category, (score, max_score))| CategoryScore {
                category,
                score: round_to(score, 2),
                max_score,
                percentage: percentage(score, max_score),
            })
            .collect();

        let raw_total: f64 = items.iter().map(|d| d.score).sum();
        let total_score = round_to(raw_total.clamp(0.0, rule.total_points), 2);
        let passed = total_score >= rule.pass_threshold && overall_quality.is_certifiable();
        if total_score >= rule.pass_threshold && !passed {
            warnings.push("score reaches the threshold but data quality is reference-only".to_string());
        }
        let requires_review = items.iter().any(|d| d.is_near_threshold);

        let result = ScoringResult {
            grade: rule.grade,
            rule_version: rule.version,
            items,
            categories,
            total_score,
            max_score: rule.total_points,
            pass_threshold: rule.pass_threshold,
            passed,
            quality: overall_quality,
            judgment_mode: JudgmentMode::for_grade(rule.grade),
            requires_review,
            has_manual_corrections: !input.corrections.is_empty(),
            corrections: input.corrections.clone(),
            warnings,
            calculated_at,
        };
        info!(
            grade = result.grade,
            total = result.total_score,
            passed = result.passed,
            quality = result.quality.as_str(),
            requires_review = result.requires_review,
            "scoring complete"
        );
        Ok(result)
    }

    fn apply_corrections(&self, input: &ScoringInput, warnings: &mut Vec<String>) -> ScoringInput {
        let mut corrected = input.clone();
        for correction in &input.corrections {
            let current = corrected.raw_value(correction.item);
            if let Some(current) = current {
                if (current - correction.original_value).abs() > 1e-9 {
                    warnings.push(format!(
                        "correction of {} expected original {} but found {}",
                        correction.item, correction.original_value, current
                    ));
                }
            }
            if corrected.set_value(correction.item, correction.corrected_value) {
                debug!(item = %correction.item, by = %correction.corrected_by, "manual correction applied");
            } else {
                warnings.push(format!(
                    "correction of {} ignored: no measured value to correct",
                    correction.item
                ));
            }
        }
        corrected
    }

    fn score_item(
        &self,
        rule: &ItemRule,
        raw: f64,
        quality: QualityGrade,
        warnings: &mut Vec<String>,
    ) -> ItemScoreDetail {
        let c = rule.criteria;
        let mut detail = ItemScoreDetail {
            item: rule.item,
            category: rule.item.category(),
            raw_value: raw,
            criteria_min: c.min,
            criteria_ideal: c.ideal,
            criteria_max: c.max,
            deviation: raw - c.ideal,
            score: 0.0,
            max_score: rule.max_points,
            percentage: 0.0,
            is_within_range: false,
            is_near_threshold: false,
            is_quality_adjusted: false,
            quality,
        };
        if !raw.is_finite() {
            warnings.push(format!("{} was not measured; scored 0", rule.item));
            return detail;
        }

        detail.is_within_range = c.contains(raw);
        let band = self.config.near_threshold_band;
        detail.is_near_threshold = [c.min, c.max]
            .iter()
            .any(|boundary| (raw - boundary).abs() <= band * boundary.abs());

        let base = if detail.is_within_range {
            rule.max_points * (1.0 - 0.5 * detail.deviation.abs() / (c.range() / 2.0))
        } else {
            0.0
        };
        let multiplier = self.config.multiplier(quality);
        detail.is_quality_adjusted = multiplier < 1.0;
        let score = (base * multiplier).clamp(0.0, rule.max_points);
        detail.score = round_to(score, 2);
        detail.percentage = percentage(score, rule.max_points);
        detail
    }
}

fn percentage(score: f64, max: f64) -> f64 {
    if max > 0.0 {
        round_to(score / max * 100.0, 2)
    } else {
        0.0
    }
}
