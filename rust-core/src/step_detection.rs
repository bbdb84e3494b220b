//! Gait event detection by weighted-vote fusion.
//!
//! Implements contact/toe-off detection over a whole landmark sequence:
//! - Four weak detectors (toe trajectory, joint angles, body velocity,
//!   body height) each propose candidate frames
//! - Candidates are merged by weighted voting with distance decay
//! - Votes are accepted greedily, best first, with a minimum spacing between
//!   events of the same kind
//! - A recovery pass looks for touchdowns missed at the start of the clip
//!
//! Short or poorly tracked sequences degrade to empty results with warnings.
//! Only a meaningless frame rate is an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::detectors::{
    recover_early_contacts, BodyHeightDetector, BodyVelocityDetector, DetectorConfig,
    DetectorKind, EventCandidate, EventDetector, JointAngleDetector, RecoveryConfig,
    ToeTrajectoryDetector,
};
use crate::error::{AnalysisError, Result};
use crate::landmarks::LandmarkSequence;
use crate::step_metrics::StepMetricsCalculator;
use crate::types::{GaitEvent, GaitEventKind, Side, StepMetric};

/// Configuration for gait event detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitDetectorConfig {
    /// Sequences shorter than this return empty results.
    pub min_frames: usize,
    /// Fused votes below this score are discarded.
    pub min_confidence: f64,
    /// Candidates within this many frames of a key vote for it.
    pub fusion_radius: usize,
    /// Minimum spacing between events of the same kind, seconds.
    pub min_event_interval_s: f64,
    /// Floor for the spacing in frames (matters at low frame rates).
    pub min_event_interval_frames: usize,
    pub detectors: DetectorConfig,
    pub recovery: RecoveryConfig,
}

impl Default for GaitDetectorConfig {
    fn default() -> Self {
        Self {
            min_frames: 10,
            min_confidence: 0.30,
            fusion_radius: 2,
            min_event_interval_s: 0.1, // 6 frames at 60 fps
            min_event_interval_frames: 3,
            detectors: DetectorConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl GaitDetectorConfig {
    /// Minimum same-kind event spacing in frames at `fps`.
    pub fn min_gap_frames(&self, fps: f64) -> usize {
        ((self.min_event_interval_s * fps).round() as usize).max(self.min_event_interval_frames)
    }
}

/// Output of one detection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GaitDetection {
    /// Fused events plus recovered early contacts, ascending by frame.
    pub events: Vec<GaitEvent>,
    /// Steps paired from `events`, timing metrics only.
    pub steps: Vec<StepMetric>,
    /// Fraction of non-dropped frames with a fully visible lower body.
    pub detection_rate: f64,
    /// Number of events added by the recovery pass.
    pub recovered_events: usize,
    pub warnings: Vec<String>,
}

/// Multi-detector gait event detector.
pub struct GaitEventDetector {
    config: GaitDetectorConfig,
    detectors: Vec<Box<dyn EventDetector>>,
}

impl GaitEventDetector {
    /// Create a detector running all four weak detectors.
    pub fn new(config: GaitDetectorConfig) -> Self {
        let d = &config.detectors;
        let detectors: Vec<Box<dyn EventDetector>> = vec![
            Box::new(ToeTrajectoryDetector::new(d.clone())),
            Box::new(JointAngleDetector::new(d.clone())),
            Box::new(BodyVelocityDetector::new(d.clone())),
            Box::new(BodyHeightDetector::new(d.clone())),
        ];
        Self { config, detectors }
    }

    pub fn config(&self) -> &GaitDetectorConfig {
        &self.config
    }

    /// Detect events and pair them into steps.
    pub fn detect(&self, seq: &LandmarkSequence, fps: f64) -> Result<GaitDetection> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(AnalysisError::invalid_input(format!(
                "frame rate must be positive, got {fps}"
            )));
        }

        let detection_rate = seq.detection_rate(self.config.detectors.series.visibility_threshold as f32);
        let mut result = GaitDetection {
            detection_rate,
            ..GaitDetection::default()
        };

        if seq.len() < self.config.min_frames {
            warn!(frames = seq.len(), "sequence too short for gait detection");
            result.warnings.push(format!(
                "sequence has {} frames, at least {} required for gait detection",
                seq.len(),
                self.config.min_frames
            ));
            return Ok(result);
        }

        let mut candidates = Vec::new();
        for detector in &self.detectors {
            let found = detector.detect(seq, fps);
            debug!(detector = ?detector.kind(), candidates = found.len(), "detector finished");
            candidates.extend(found);
        }

        let min_gap = self.config.min_gap_frames(fps);
        let accepted = fuse(&candidates, &self.config, min_gap);
        let recovered = recover_early_contacts(
            seq,
            fps,
            &accepted,
            min_gap,
            &self.config.detectors.series,
            &self.config.recovery,
        );

        result.recovered_events = recovered.len();
        let mut events = recovered;
        events.extend(accepted);
        events.sort_by(|a, b| a.frame.cmp(&b.frame).then(a.kind.cmp(&b.kind)));

        result.steps = StepMetricsCalculator::new(fps).compute(&events);
        result.events = events;

        if result.events.is_empty() {
            result.warnings.push("no gait events detected".to_string());
        } else if result.steps.is_empty() {
            result
                .warnings
                .push("gait events found but no complete contact/toe-off pair".to_string());
        }
        if result.recovered_events > 0 {
            result.warnings.push(format!(
                "{} early contact(s) recovered with low confidence",
                result.recovered_events
            ));
        }
        if detection_rate < 0.5 {
            result.warnings.push(format!(
                "lower body fully visible in only {:.0}% of frames",
                detection_rate * 100.0
            ));
        }

        info!(
            events = result.events.len(),
            steps = result.steps.len(),
            recovered = result.recovered_events,
            detection_rate,
            "gait detection complete"
        );
        Ok(result)
    }
}

impl Default for GaitEventDetector {
    fn default() -> Self {
        Self::new(GaitDetectorConfig::default())
    }
}

/// A scored (frame, kind) key during fusion.
#[derive(Debug, Clone, Copy)]
struct Vote {
    frame: usize,
    kind: GaitEventKind,
    score: f64,
    side: Side,
}

/// Merge detector candidates into accepted events.
///
/// Every distinct candidate (frame, kind) is a key. Each detector votes for a
/// key with its best same-kind candidate within the fusion radius, decayed
/// linearly with frame distance, times the detector weight. Keys are accepted
/// best first; a key closer than `min_gap` frames to an accepted event of the
/// same kind is rejected. The result is sorted by frame.
pub fn fuse(candidates: &[EventCandidate], config: &GaitDetectorConfig, min_gap: usize) -> Vec<GaitEvent> {
    let radius = config.fusion_radius;
    let keys: BTreeSet<(usize, GaitEventKind)> =
        candidates.iter().map(|c| (c.frame, c.kind)).collect();

    let mut votes: Vec<Vote> = keys
        .iter()
        .map(|&(frame, kind)| {
            let mut score = 0.0;
            let mut side = Side::Both;
            let mut best_side_vote = 0.0;
            for detector in DetectorKind::ALL {
                let mut best = 0.0;
                let mut best_side = Side::Both;
                for c in candidates.iter().filter(|c| c.detector == detector && c.kind == kind) {
                    let distance = c.frame.abs_diff(frame);
                    if distance > radius {
                        continue;
                    }
                    let v = c.confidence * (1.0 - distance as f64 / (radius + 1) as f64);
                    if v > best {
                        best = v;
                        best_side = c.side;
                    }
                }
                let weighted = detector.weight() * best;
                score += weighted;
                if best_side != Side::Both && weighted > best_side_vote {
                    best_side_vote = weighted;
                    side = best_side;
                }
            }
            Vote {
                frame,
                kind,
                score,
                side,
            }
        })
        .collect();

    votes.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.frame.cmp(&b.frame)));

    let mut accepted: Vec<Vote> = Vec::new();
    for vote in votes {
        if vote.score < config.min_confidence {
            continue;
        }
        let too_close = accepted
            .iter()
            .any(|a| a.kind == vote.kind && a.frame.abs_diff(vote.frame) < min_gap);
        if too_close {
            continue;
        }
        accepted.push(vote);
    }

    let mut events: Vec<GaitEvent> = accepted
        .into_iter()
        .map(|v| GaitEvent::new(v.frame, v.kind, v.score, v.side))
        .collect();
    events.sort_by(|a, b| a.frame.cmp(&b.frame).then(a.kind.cmp(&b.kind)));
    debug!(
        candidates = candidates.len(),
        keys = keys.len(),
        accepted = events.len(),
        "fusion complete"
    );
    events
}
