//! Sprint Analysis Engine Library
//!
//! Turns per-frame pose landmarks from a side-view sprint video into gait
//! events, step metrics, a horizontal force-velocity profile and a graded
//! certification score with an auditable judgment status.
//!
//! # Design Philosophy
//!
//! - **Evidence first, judgment later**: detectors, metrics and the profile
//!   describe what was measured; scoring and routing decide what it means.
//! - **Fail-loud on bad input, degrade on weak evidence**: broken invariants
//!   (non-monotonic splits, non-positive mass) are errors; missing events
//!   and degenerate fits become quality downgrades and warnings.
//! - **Pure components**: no global state and no I/O in the core; a host can
//!   analyze independent videos in parallel.
//!
//! # Example
//!
//! ```ignore
//! use sprint_analysis::{AnalysisPipeline, AnalysisRequest, AthleteProfile};
//!
//! let request = AnalysisRequest::new(60.0, AthleteProfile { mass_kg: 70.0, height_m: Some(1.78) })
//!     .with_splits(vec![0.0, 5.0, 10.0, 15.0, 20.0], vec![0.0, 1.2, 2.1, 2.9, 3.6]);
//! let report = AnalysisPipeline::default().analyze(&sequence, &request)?;
//! println!("{} steps, F0 {:?}", report.steps.len(), report.hfvp.map(|h| h.f0_n));
//! ```

pub mod audit;
pub mod config;
pub mod detectors;
pub mod error;
pub mod export;
pub mod hfvp;
pub mod judgment;
pub mod kinematics;
pub mod landmarks;
pub mod pipeline;
pub mod quality;
pub mod regression;
pub mod rules;
pub mod scoring;
pub mod signal;
pub mod step_detection;
pub mod step_metrics;
pub mod types;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditEventType, AuditTrail};
pub use config::EngineConfig;
pub use error::{AnalysisError, Result};
pub use hfvp::{HfvpEstimator, HfvpInput, HfvpOptions, HfvpResult};
pub use judgment::{AttemptAction, AttemptStatus, JudgmentMode};
pub use landmarks::{Joint, Landmark, LandmarkFrame, LandmarkSequence};
pub use pipeline::{
    AnalysisPipeline, AnalysisReport, AnalysisRequest, AthleteProfile, CertificationOutcome,
    CertificationPipeline,
};
pub use rules::{GradeRule, GradeRuleSet, ItemCriteria, ScoringItem};
pub use scoring::{ManualCorrection, ScoringEngine, ScoringInput, ScoringResult};
pub use step_detection::{GaitDetection, GaitEventDetector};
pub use step_metrics::{LinearTrackMapping, StepMetricsCalculator, TrackMapping};
pub use types::{GaitEvent, GaitEventKind, QualityGrade, Side, StepMetric};
