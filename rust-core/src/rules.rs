//! Grade rule sets for certification scoring.
//!
//! A grade rule lists, for one certification grade (1 = most advanced,
//! 10 = entry level), the items that are scored, their {min, ideal, max}
//! criteria and point allocations, and the pass threshold. Rules are
//! versioned and time bounded; the owning store decides which versions
//! exist, this module only selects the one in effect.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalysisError, Result};

/// Highest (least advanced) grade number.
pub const MAX_GRADE: u8 = 10;

// ============================================================================
// ITEMS
// ============================================================================

/// A scored measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringItem {
    /// Knee angle at mid-stance (deg).
    KneeFlexion,
    /// Thigh angle behind vertical at toe-off (deg).
    HipExtension,
    /// Forward trunk lean (deg).
    TrunkLean,
    /// Step length over standing height.
    StrideLengthRatio,
    /// Steps per second.
    StrideFrequency,
    /// Ground contact time (s).
    ContactTime,
    /// Relative maximal horizontal force (N/kg).
    F0,
    /// Theoretical maximal velocity (m/s).
    V0,
    /// Relative maximal power (W/kg).
    Pmax,
    /// Decrease in ratio of force (%·s/m).
    Drf,
}

impl ScoringItem {
    pub const ALL: [ScoringItem; 10] = [
        ScoringItem::KneeFlexion,
        ScoringItem::HipExtension,
        ScoringItem::TrunkLean,
        ScoringItem::StrideLengthRatio,
        ScoringItem::StrideFrequency,
        ScoringItem::ContactTime,
        ScoringItem::F0,
        ScoringItem::V0,
        ScoringItem::Pmax,
        ScoringItem::Drf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScoringItem::KneeFlexion => "knee_flexion",
            ScoringItem::HipExtension => "hip_extension",
            ScoringItem::TrunkLean => "trunk_lean",
            ScoringItem::StrideLengthRatio => "stride_length_ratio",
            ScoringItem::StrideFrequency => "stride_frequency",
            ScoringItem::ContactTime => "contact_time",
            ScoringItem::F0 => "f0",
            ScoringItem::V0 => "v0",
            ScoringItem::Pmax => "pmax",
            ScoringItem::Drf => "drf",
        }
    }

    pub fn category(self) -> ScoreCategory {
        match self {
            ScoringItem::KneeFlexion | ScoringItem::HipExtension | ScoringItem::TrunkLean => {
                ScoreCategory::Posture
            }
            ScoringItem::StrideLengthRatio | ScoringItem::StrideFrequency => ScoreCategory::Stride,
            ScoringItem::ContactTime => ScoreCategory::GroundContact,
            ScoringItem::F0 | ScoringItem::V0 | ScoringItem::Pmax | ScoringItem::Drf => {
                ScoreCategory::ForceVelocity
            }
        }
    }

    /// Whether the item is measured by the force-velocity profile.
    pub fn is_hfvp(self) -> bool {
        self.category() == ScoreCategory::ForceVelocity
    }
}

impl fmt::Display for ScoringItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roll-up category of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCategory {
    Posture,
    Stride,
    GroundContact,
    ForceVelocity,
}

// ============================================================================
// RULES
// ============================================================================

/// Acceptable range and ideal value of one item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemCriteria {
    pub min: f64,
    pub ideal: f64,
    pub max: f64,
}

impl ItemCriteria {
    pub fn new(min: f64, ideal: f64, max: f64) -> Self {
        Self { min, ideal, max }
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Shrink both half-ranges around the ideal by `factor`.
    pub fn narrowed(&self, factor: f64) -> Self {
        Self {
            min: self.ideal - (self.ideal - self.min) * factor,
            ideal: self.ideal,
            max: self.ideal + (self.max - self.ideal) * factor,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !(self.min.is_finite() && self.ideal.is_finite() && self.max.is_finite()) {
            return Err("criteria must be finite".to_string());
        }
        if !(self.min < self.max && self.min <= self.ideal && self.ideal <= self.max) {
            return Err(format!(
                "criteria must satisfy min <= ideal <= max with min < max, got {}/{}/{}",
                self.min, self.ideal, self.max
            ));
        }
        Ok(())
    }
}

/// Criteria and point allocation of one item within a grade rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemRule {
    pub item: ScoringItem,
    pub criteria: ItemCriteria,
    pub max_points: f64,
}

/// Scoring rule of one grade, valid over `[effective_from, effective_until)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRule {
    pub grade: u8,
    pub version: u32,
    pub effective_from: DateTime<Utc>,
    #[serde(default)]
    pub effective_until: Option<DateTime<Utc>>,
    pub pass_threshold: f64,
    #[serde(default = "default_total_points")]
    pub total_points: f64,
    pub items: Vec<ItemRule>,
}

fn default_total_points() -> f64 {
    100.0
}

impl GradeRule {
    pub fn validate(&self) -> Result<()> {
        let grade = self.grade;
        if !(1..=MAX_GRADE).contains(&grade) {
            return Err(AnalysisError::invalid_rule(grade, format!("grade must be 1..={MAX_GRADE}")));
        }
        if self.items.is_empty() {
            return Err(AnalysisError::invalid_rule(grade, "rule has no items"));
        }
        if !(self.total_points.is_finite() && self.total_points > 0.0) {
            return Err(AnalysisError::invalid_rule(grade, "total points must be positive"));
        }
        if !(0.0..=self.total_points).contains(&self.pass_threshold) {
            return Err(AnalysisError::invalid_rule(
                grade,
                format!("pass threshold {} outside [0, {}]", self.pass_threshold, self.total_points),
            ));
        }
        if let Some(until) = self.effective_until {
            if until <= self.effective_from {
                return Err(AnalysisError::invalid_rule(grade, "effective period is empty"));
            }
        }
        for (i, rule) in self.items.iter().enumerate() {
            if self.items[..i].iter().any(|r| r.item == rule.item) {
                return Err(AnalysisError::invalid_rule(grade, format!("item {} listed twice", rule.item)));
            }
            if !(rule.max_points.is_finite() && rule.max_points >= 0.0) {
                return Err(AnalysisError::invalid_rule(
                    grade,
                    format!("item {} has invalid points", rule.item),
                ));
            }
            rule.criteria
                .validate()
                .map_err(|msg| AnalysisError::invalid_rule(grade, format!("item {}: {msg}", rule.item)))?;
        }
        Ok(())
    }

    pub fn item(&self, item: ScoringItem) -> Option<&ItemRule> {
        self.items.iter().find(|r| r.item == item)
    }

    /// Whether any item comes from the force-velocity profile.
    pub fn requires_hfvp(&self) -> bool {
        self.items.iter().any(|r| r.item.is_hfvp())
    }

    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.effective_from && self.effective_until.map_or(true, |until| at < until)
    }

    /// Built-in rule of a grade. Criteria narrow toward the ideal as grades
    /// get more advanced; grades 1 and 2 add force-velocity items.
    pub fn standard(grade: u8) -> Result<Self> {
        if !(1..=MAX_GRADE).contains(&grade) {
            return Err(AnalysisError::invalid_rule(grade, format!("grade must be 1..={MAX_GRADE}")));
        }
        let factor = 1.0 - 0.05 * f64::from(MAX_GRADE - grade);
        let advanced = grade <= 2;
        let points = |item: ScoringItem| -> f64 {
            match (item, advanced) {
                (ScoringItem::KneeFlexion, false) => 20.0,
                (ScoringItem::HipExtension, false) => 15.0,
                (ScoringItem::TrunkLean, false) => 15.0,
                (ScoringItem::StrideLengthRatio, false) => 15.0,
                (ScoringItem::StrideFrequency, false) => 15.0,
                (ScoringItem::ContactTime, false) => 20.0,
                (ScoringItem::KneeFlexion, true) => 12.0,
                (ScoringItem::HipExtension, true) => 10.0,
                (ScoringItem::TrunkLean, true) => 8.0,
                (ScoringItem::StrideLengthRatio, true) => 12.0,
                (ScoringItem::StrideFrequency, true) => 10.0,
                (ScoringItem::ContactTime, true) => 12.0,
                (ScoringItem::F0 | ScoringItem::V0 | ScoringItem::Pmax, _) => 10.0,
                (ScoringItem::Drf, _) => 6.0,
            }
        };
        let items = ScoringItem::ALL
            .iter()
            .filter(|item| advanced || !item.is_hfvp())
            .map(|&item| ItemRule {
                item,
                criteria: base_criteria(item).narrowed(factor),
                max_points: points(item),
            })
            .collect();

        Ok(Self {
            grade,
            version: 1,
            effective_from: standard_effective_from(),
            effective_until: None,
            pass_threshold: if grade <= 3 { 80.0 } else { 70.0 },
            total_points: 100.0,
            items,
        })
    }
}

/// Entry-level criteria of every item.
fn base_criteria(item: ScoringItem) -> ItemCriteria {
    match item {
        ScoringItem::KneeFlexion => ItemCriteria::new(90.0, 130.0, 160.0),
        ScoringItem::HipExtension => ItemCriteria::new(0.0, 20.0, 40.0),
        ScoringItem::TrunkLean => ItemCriteria::new(-5.0, 10.0, 30.0),
        ScoringItem::StrideLengthRatio => ItemCriteria::new(0.6, 1.1, 1.5),
        ScoringItem::StrideFrequency => ItemCriteria::new(2.8, 4.2, 5.4),
        ScoringItem::ContactTime => ItemCriteria::new(0.07, 0.11, 0.20),
        ScoringItem::F0 => ItemCriteria::new(4.0, 8.0, 12.0),
        ScoringItem::V0 => ItemCriteria::new(6.0, 9.5, 13.0),
        ScoringItem::Pmax => ItemCriteria::new(10.0, 19.0, 30.0),
        ScoringItem::Drf => ItemCriteria::new(-14.0, -7.0, -2.0),
    }
}

fn standard_effective_from() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ============================================================================
// RULE SET
// ============================================================================

/// All known rule versions, keyed by grade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradeRuleSet {
    rules: Vec<GradeRule>,
}

impl GradeRuleSet {
    /// Validate and collect rules.
    pub fn new(rules: Vec<GradeRule>) -> Result<Self> {
        let mut set = Self::default();
        for rule in rules {
            set.insert(rule)?;
        }
        Ok(set)
    }

    /// Built-in version 1 rules for grades 1 through 10.
    pub fn standard() -> Self {
        let rules = (1..=MAX_GRADE).filter_map(|g| GradeRule::standard(g).ok()).collect();
        Self { rules }
    }

    /// Parse a JSON export of a rule store (`{"rules": [...]}`).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let parsed: GradeRuleSet =
            serde_json::from_str(json).map_err(|e| AnalysisError::json("parsing grade rules", e))?;
        Self::new(parsed.rules)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AnalysisError::io("reading grade rules", e))?;
        Self::from_json_str(&text)
    }

    /// Add a rule version. The same (grade, version) may not appear twice.
    pub fn insert(&mut self, rule: GradeRule) -> Result<()> {
        rule.validate()?;
        if self
            .rules
            .iter()
            .any(|r| r.grade == rule.grade && r.version == rule.version)
        {
            return Err(AnalysisError::invalid_rule(
                rule.grade,
                format!("version {} already present", rule.version),
            ));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[GradeRule] {
        &self.rules
    }

    /// The rule of `grade` in effect at `at`; the highest version wins when
    /// effective periods overlap.
    pub fn rule_for(&self, grade: u8, at: DateTime<Utc>) -> Result<&GradeRule> {
        let rule = self
            .rules
            .iter()
            .filter(|r| r.grade == grade && r.is_effective_at(at))
            .max_by_key(|r| r.version)
            .ok_or(AnalysisError::NoEffectiveRule { grade })?;
        debug!(grade, version = rule.version, "grade rule selected");
        Ok(rule)
    }
}
