//! Weak gait-event detectors.
//!
//! Each detector scans the whole landmark sequence on its own and proposes
//! candidate contact/toe-off frames with a confidence:
//! - Toe trajectory: per-foot toe height entering/leaving a ground band
//! - Joint angle velocity: knee extension settling (contact) and the onset of
//!   knee flexion or ankle plantarflexion after a quiet stance (toe-off)
//! - Body velocity: zero crossings of hip-midpoint vertical acceleration
//! - Body height: hip-midpoint height crossing its mid level
//!
//! A detector that cannot work on the data (poorly tracked joints, flat
//! signal) emits nothing; fusion then simply receives no vote from it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kinematics::joint_angle_deg;
use crate::landmarks::{Joint, LandmarkSequence, LegJoints};
use crate::signal::{central_difference, interpolate_gaps, moving_average, percentile, SeriesConfig};
use crate::types::{GaitEvent, GaitEventKind, Side};

/// Identity of a weak detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    ToeTrajectory,
    JointAngle,
    BodyVelocity,
    BodyHeight,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 4] = [
        DetectorKind::ToeTrajectory,
        DetectorKind::JointAngle,
        DetectorKind::BodyVelocity,
        DetectorKind::BodyHeight,
    ];

    /// Fixed vote weight. The four weights sum to 1.0.
    pub const fn weight(self) -> f64 {
        match self {
            DetectorKind::ToeTrajectory => 0.35,
            DetectorKind::JointAngle => 0.30,
            DetectorKind::BodyVelocity => 0.20,
            DetectorKind::BodyHeight => 0.15,
        }
    }
}

/// A single detector's proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventCandidate {
    pub frame: usize,
    pub kind: GaitEventKind,
    pub confidence: f64,
    pub side: Side,
    pub detector: DetectorKind,
}

/// Tuning of the weak detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Gap filling and smoothing of landmark series.
    pub series: SeriesConfig,

    /// Ground band as a fraction of the toe height range above its floor.
    pub toe_ground_band: f64,
    /// Minimum toe height range (p90 - p10, image units) for a usable foot.
    pub toe_min_range: f64,
    /// Confidence scale for toe candidates (times local toe visibility).
    pub toe_confidence: f64,
    /// Half width of the visibility window around a toe candidate, frames.
    pub toe_visibility_window: usize,

    /// Rapid-motion threshold as a fraction of the p90 angular speed.
    pub joint_rapid_fraction: f64,
    /// Floor for the rapid-motion threshold, deg/s.
    pub joint_min_rapid_deg_s: f64,
    /// Quiet threshold as a fraction of the p90 angular speed.
    pub joint_quiet_fraction: f64,
    pub joint_confidence: f64,

    /// Minimum p90 hip vertical acceleration (image units/s²).
    pub velocity_min_accel: f64,
    pub velocity_confidence: f64,

    /// Minimum hip height amplitude (p90 - p10, image units).
    pub height_min_amplitude: f64,
    /// Hysteresis band as a fraction of the amplitude.
    pub height_hysteresis: f64,
    pub height_confidence: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            series: SeriesConfig::default(),
            toe_ground_band: 0.15,
            toe_min_range: 0.01,
            toe_confidence: 0.95,
            toe_visibility_window: 2,
            joint_rapid_fraction: 0.5,
            joint_min_rapid_deg_s: 20.0,
            joint_quiet_fraction: 0.15,
            joint_confidence: 0.85,
            velocity_min_accel: 0.5,
            velocity_confidence: 0.8,
            height_min_amplitude: 0.004,
            height_hysteresis: 0.1,
            height_confidence: 0.7,
        }
    }
}

/// A weak detector over a whole landmark sequence.
pub trait EventDetector {
    fn kind(&self) -> DetectorKind;

    /// Propose candidates. Never fails; unusable data yields no candidates.
    fn detect(&self, seq: &LandmarkSequence, fps: f64) -> Vec<EventCandidate>;
}

/// Gap-filled coordinate series of one joint.
fn prepared(seq: &LandmarkSequence, joint: Joint, cfg: &SeriesConfig, y_axis: bool) -> Option<Vec<f64>> {
    let track = seq.joint_track(joint);
    let values = if y_axis { &track.y } else { &track.x };
    interpolate_gaps(
        values,
        &track.visibility,
        cfg.visibility_threshold,
        cfg.min_valid_fraction,
    )
}

/// Smoothed image height (`1 - y`) of one joint.
fn smoothed_height(seq: &LandmarkSequence, joint: Joint, cfg: &SeriesConfig) -> Option<Vec<f64>> {
    let y = prepared(seq, joint, cfg, true)?;
    let h: Vec<f64> = y.iter().map(|v| 1.0 - v).collect();
    Some(moving_average(&h, cfg.smoothing_window))
}

/// Smoothed image height of the hip midpoint.
fn hip_height(seq: &LandmarkSequence, cfg: &SeriesConfig) -> Option<Vec<f64>> {
    let left = prepared(seq, Joint::LeftHip, cfg, true)?;
    let right = prepared(seq, Joint::RightHip, cfg, true)?;
    let h: Vec<f64> = left
        .iter()
        .zip(&right)
        .map(|(l, r)| 1.0 - (l + r) / 2.0)
        .collect();
    Some(moving_average(&h, cfg.smoothing_window))
}

fn legs() -> [(Side, LegJoints); 2] {
    [(Side::Left, LegJoints::LEFT), (Side::Right, LegJoints::RIGHT)]
}

// ============================================================================
// TOE TRAJECTORY
// ============================================================================

/// Toe height entering (contact) and leaving (toe-off) the ground band.
#[derive(Debug, Clone, Default)]
pub struct ToeTrajectoryDetector {
    config: DetectorConfig,
}

impl ToeTrajectoryDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl EventDetector for ToeTrajectoryDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ToeTrajectory
    }

    fn detect(&self, seq: &LandmarkSequence, _fps: f64) -> Vec<EventCandidate> {
        let cfg = &self.config;
        let mut out = Vec::new();
        for (side, leg) in legs() {
            let Some(h) = smoothed_height(seq, leg.toe, &cfg.series) else {
                continue;
            };
            let ground = percentile(&h, 0.1);
            let range = percentile(&h, 0.9) - ground;
            if range < cfg.toe_min_range {
                continue;
            }
            let band = ground + cfg.toe_ground_band * range;
            let on_ground: Vec<bool> = h.iter().map(|v| *v <= band).collect();
            let visibility = seq.joint_track(leg.toe).visibility;
            let n = h.len();

            let confidence = |f: usize| {
                let lo = f.saturating_sub(cfg.toe_visibility_window);
                let hi = (f + cfg.toe_visibility_window + 1).min(n);
                let window = &visibility[lo..hi];
                cfg.toe_confidence * window.iter().sum::<f64>() / window.len() as f64
            };

            for f in 0..n {
                if f >= 1 && on_ground[f] && !on_ground[f - 1] {
                    out.push(EventCandidate {
                        frame: f,
                        kind: GaitEventKind::Contact,
                        confidence: confidence(f),
                        side,
                        detector: self.kind(),
                    });
                }
                if f + 1 < n && on_ground[f] && !on_ground[f + 1] {
                    out.push(EventCandidate {
                        frame: f,
                        kind: GaitEventKind::ToeOff,
                        confidence: confidence(f),
                        side,
                        detector: self.kind(),
                    });
                }
            }
        }
        out
    }
}

// ============================================================================
// JOINT ANGLE VELOCITY
// ============================================================================

/// Knee/ankle angular velocity patterns around ground contact.
///
/// Contact: the knee extends rapidly during late swing and then settles;
/// the first quiet frame after a rapid extension is the touchdown.
/// Toe-off: stance is quiet at both joints; the frame after the last quiet
/// frame preceding rapid knee flexion or ankle plantarflexion is the lift.
#[derive(Debug, Clone, Default)]
pub struct JointAngleDetector {
    config: DetectorConfig,
}

impl JointAngleDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    fn thresholds(&self, omega: &[f64]) -> (f64, f64) {
        let speeds: Vec<f64> = omega.iter().map(|w| w.abs()).collect();
        let p90 = percentile(&speeds, 0.9);
        let rapid = (self.config.joint_rapid_fraction * p90).max(self.config.joint_min_rapid_deg_s);
        let quiet = self.config.joint_quiet_fraction * p90;
        (rapid, quiet)
    }
}

impl EventDetector for JointAngleDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::JointAngle
    }

    fn detect(&self, seq: &LandmarkSequence, fps: f64) -> Vec<EventCandidate> {
        let cfg = &self.config;
        let mut out = Vec::new();
        for (side, leg) in legs() {
            let mut points = Vec::with_capacity(4);
            for joint in [leg.hip, leg.knee, leg.ankle, leg.toe] {
                let (Some(x), Some(y)) = (
                    prepared(seq, joint, &cfg.series, false),
                    prepared(seq, joint, &cfg.series, true),
                ) else {
                    break;
                };
                points.push(x.into_iter().zip(y).collect::<Vec<_>>());
            }
            if points.len() < 4 {
                continue;
            }
            let (hip, knee, ankle, toe) = (&points[0], &points[1], &points[2], &points[3]);
            let n = hip.len();
            let knee_deg: Vec<f64> = (0..n).map(|f| joint_angle_deg(hip[f], knee[f], ankle[f])).collect();
            let ankle_deg: Vec<f64> = (0..n).map(|f| joint_angle_deg(knee[f], ankle[f], toe[f])).collect();
            if knee_deg.iter().chain(&ankle_deg).any(|v| !v.is_finite()) {
                continue;
            }

            let wk = central_difference(&knee_deg, fps);
            let wa = central_difference(&ankle_deg, fps);
            let (rapid_k, quiet_k) = self.thresholds(&wk);
            let (rapid_a, quiet_a) = self.thresholds(&wa);
            let quiet_a = quiet_a.max(1e-9);

            let mut armed = false;
            let mut last_quiet: Option<usize> = None;
            for f in 0..n {
                if wk[f] >= rapid_k {
                    armed = true;
                } else if wk[f] <= -rapid_k {
                    armed = false;
                } else if armed && wk[f].abs() <= quiet_k {
                    out.push(EventCandidate {
                        frame: f,
                        kind: GaitEventKind::Contact,
                        confidence: cfg.joint_confidence,
                        side,
                        detector: self.kind(),
                    });
                    armed = false;
                }

                let quiet = wk[f].abs() <= quiet_k && wa[f].abs() <= quiet_a;
                if quiet {
                    last_quiet = Some(f);
                } else if -wk[f] >= rapid_k || wa[f] >= rapid_a {
                    if let Some(q) = last_quiet.take() {
                        out.push(EventCandidate {
                            frame: q + 1,
                            kind: GaitEventKind::ToeOff,
                            confidence: cfg.joint_confidence,
                            side,
                            detector: self.kind(),
                        });
                    }
                }
            }
        }
        out
    }
}

// ============================================================================
// BODY CENTER
// ============================================================================

/// Hip-midpoint vertical acceleration zero crossings.
///
/// The body decelerates its fall at touchdown (acceleration turns upward) and
/// starts to fall again around toe-off (acceleration turns downward).
#[derive(Debug, Clone, Default)]
pub struct BodyVelocityDetector {
    config: DetectorConfig,
}

impl BodyVelocityDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl EventDetector for BodyVelocityDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::BodyVelocity
    }

    fn detect(&self, seq: &LandmarkSequence, fps: f64) -> Vec<EventCandidate> {
        let cfg = &self.config;
        let Some(h) = hip_height(seq, &cfg.series) else {
            return Vec::new();
        };
        let v = central_difference(&h, fps);
        let a = central_difference(&v, fps);
        let magnitudes: Vec<f64> = a.iter().map(|x| x.abs()).collect();
        if a.is_empty() || percentile(&magnitudes, 0.9) < cfg.velocity_min_accel {
            return Vec::new();
        }

        let mut out = Vec::new();
        for f in 1..a.len() {
            let kind = if a[f - 1] < 0.0 && a[f] >= 0.0 {
                GaitEventKind::Contact
            } else if a[f - 1] > 0.0 && a[f] <= 0.0 {
                GaitEventKind::ToeOff
            } else {
                continue;
            };
            out.push(EventCandidate {
                frame: f,
                kind,
                confidence: cfg.velocity_confidence,
                side: Side::Both,
                detector: self.kind(),
            });
        }
        out
    }
}

/// Hip-midpoint height stepping down through (contact) or up through
/// (toe-off) its mid level, with hysteresis against jitter.
#[derive(Debug, Clone, Default)]
pub struct BodyHeightDetector {
    config: DetectorConfig,
}

impl BodyHeightDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl EventDetector for BodyHeightDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::BodyHeight
    }

    fn detect(&self, seq: &LandmarkSequence, _fps: f64) -> Vec<EventCandidate> {
        let cfg = &self.config;
        let Some(h) = hip_height(seq, &cfg.series) else {
            return Vec::new();
        };
        let lo = percentile(&h, 0.1);
        let hi = percentile(&h, 0.9);
        let amplitude = hi - lo;
        if !(amplitude >= cfg.height_min_amplitude) {
            return Vec::new();
        }
        let mid = (lo + hi) / 2.0;
        let band = cfg.height_hysteresis * amplitude;

        let mut above = h[0] > mid;
        let mut pending_down: Option<usize> = None;
        let mut pending_up: Option<usize> = None;
        let mut out = Vec::new();
        for f in 1..h.len() {
            if h[f - 1] > mid && h[f] <= mid {
                pending_down = Some(f);
            } else if h[f - 1] <= mid && h[f] > mid {
                pending_up = Some(f);
            }

            // Emit the raw crossing once the height clears the band.
            if above && h[f] < mid - band {
                above = false;
                if let Some(frame) = pending_down.take() {
                    out.push(EventCandidate {
                        frame,
                        kind: GaitEventKind::Contact,
                        confidence: cfg.height_confidence,
                        side: Side::Both,
                        detector: self.kind(),
                    });
                }
                pending_up = None;
            } else if !above && h[f] > mid + band {
                above = true;
                if let Some(frame) = pending_up.take() {
                    out.push(EventCandidate {
                        frame,
                        kind: GaitEventKind::ToeOff,
                        confidence: cfg.height_confidence,
                        side: Side::Both,
                        detector: self.kind(),
                    });
                }
                pending_down = None;
            }
        }
        out
    }
}

// ============================================================================
// EARLY-CLIP RECOVERY
// ============================================================================

/// Settings of the early-clip recovery pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// How far before the first accepted event to search, seconds.
    pub window_s: f64,
    /// Raw toe samples below this visibility are ignored.
    pub visibility_threshold: f64,
    /// Minimum smoothed toe height range for a foot to be searched.
    pub min_toe_range: f64,
    /// Minimum drop over the preceding frames, as a fraction of the toe range.
    pub min_drop_fraction: f64,
    /// Frames looked back for the drop.
    pub lookback_frames: usize,
    /// Maximum height above the ground floor, as a fraction of the toe range.
    pub max_height_fraction: f64,
    /// Confidence of recovered contacts.
    pub confidence: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_s: 0.5,
            visibility_threshold: 0.3,
            min_toe_range: 0.01,
            min_drop_fraction: 0.3,
            lookback_frames: 4,
            max_height_fraction: 0.3,
            confidence: 0.2,
        }
    }
}

/// Search the frames before the first accepted event for touchdowns the main
/// detectors missed (typically because the foot was barely visible).
///
/// A touchdown is a raw toe height local minimum that follows a clear drop
/// and lies near the ground floor. Candidates within `min_gap` frames of an
/// accepted or already recovered contact are skipped. Accepted events are
/// never modified.
pub fn recover_early_contacts(
    seq: &LandmarkSequence,
    fps: f64,
    accepted: &[GaitEvent],
    min_gap: usize,
    series: &SeriesConfig,
    cfg: &RecoveryConfig,
) -> Vec<GaitEvent> {
    let Some(first) = accepted.iter().map(|e| e.frame).min() else {
        return Vec::new();
    };
    if !cfg.enabled {
        return Vec::new();
    }
    let window = (cfg.window_s * fps).round() as usize;
    let start = first.saturating_sub(window).max(1);

    let mut recovered: Vec<GaitEvent> = Vec::new();
    for (side, leg) in legs() {
        let Some(h) = smoothed_height(seq, leg.toe, series) else {
            continue;
        };
        let ground = percentile(&h, 0.1);
        let range = percentile(&h, 0.9) - ground;
        if range < cfg.min_toe_range {
            continue;
        }
        let track = seq.joint_track(leg.toe);
        let raw: Vec<Option<f64>> = track
            .y
            .iter()
            .zip(&track.visibility)
            .map(|(y, v)| (*v >= cfg.visibility_threshold).then_some(1.0 - y))
            .collect();

        for f in start..first.min(raw.len()) {
            let (Some(cur), Some(prev)) = (raw[f], raw[f - 1]) else {
                continue;
            };
            if cur >= prev {
                continue;
            }
            if let Some(Some(next)) = raw.get(f + 1) {
                if *next < cur {
                    continue;
                }
            }
            let lookback = f.saturating_sub(cfg.lookback_frames);
            let peak = raw[lookback..f]
                .iter()
                .flatten()
                .fold(f64::NEG_INFINITY, |m, v| m.max(*v));
            if peak - cur < cfg.min_drop_fraction * range {
                continue;
            }
            if cur > ground + cfg.max_height_fraction * range {
                continue;
            }
            let near_existing = accepted
                .iter()
                .chain(&recovered)
                .any(|e| e.is_contact() && e.frame.abs_diff(f) < min_gap);
            if near_existing {
                continue;
            }
            recovered.push(GaitEvent::new(f, GaitEventKind::Contact, cfg.confidence, side));
        }
    }
    recovered.sort_by_key(|e| e.frame);
    if !recovered.is_empty() {
        debug!(count = recovered.len(), first_accepted = first, "recovered early contacts");
    }
    recovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{synthetic_run, SyntheticRun};

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = DetectorKind::ALL.iter().map(|d| d.weight()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_toe_detector_finds_injected_contacts() {
        let run = synthetic_run(&SyntheticRun::with_steps(3));
        let candidates = ToeTrajectoryDetector::default().detect(&run.sequence, 60.0);
        for contact in &run.contacts {
            assert!(candidates
                .iter()
                .any(|c| c.kind == GaitEventKind::Contact && c.frame.abs_diff(*contact) <= 1));
        }
        assert!(candidates.iter().all(|c| c.confidence <= 0.95));
    }

    #[test]
    fn test_toe_detector_silent_on_flat_signal() {
        let run = synthetic_run(&SyntheticRun {
            swing_height: 0.0,
            ..SyntheticRun::with_steps(3)
        });
        assert!(ToeTrajectoryDetector::default()
            .detect(&run.sequence, 60.0)
            .is_empty());
    }

    #[test]
    fn test_joint_detector_reports_per_leg() {
        let run = synthetic_run(&SyntheticRun::with_steps(4));
        let candidates = JointAngleDetector::default().detect(&run.sequence, 60.0);
        assert!(candidates.iter().any(|c| c.side == Side::Left));
        assert!(candidates.iter().any(|c| c.side == Side::Right));
        assert!(candidates.iter().all(|c| c.detector == DetectorKind::JointAngle));
    }

    #[test]
    fn test_body_detectors_need_hip_motion() {
        let still = synthetic_run(&SyntheticRun::with_steps(4));
        assert!(BodyVelocityDetector::default().detect(&still.sequence, 60.0).is_empty());
        assert!(BodyHeightDetector::default().detect(&still.sequence, 60.0).is_empty());

        let bouncing = synthetic_run(&SyntheticRun {
            hip_bounce: 0.01,
            ..SyntheticRun::with_steps(4)
        });
        let height = BodyHeightDetector::default().detect(&bouncing.sequence, 60.0);
        assert!(height.iter().any(|c| c.kind == GaitEventKind::Contact));
        assert!(height.iter().all(|c| c.side == Side::Both));
    }

    #[test]
    fn test_recovery_needs_accepted_events() {
        let run = synthetic_run(&SyntheticRun::with_steps(2));
        let recovered = recover_early_contacts(
            &run.sequence,
            60.0,
            &[],
            6,
            &SeriesConfig::default(),
            &RecoveryConfig::default(),
        );
        assert!(recovered.is_empty());
    }
}
