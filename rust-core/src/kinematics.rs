//! Joint angles and per-run kinematic aggregates.
//!
//! Angles are measured in the image plane:
//! - Interior joint angles via the law of cosines (180° = straight limb)
//! - Segment angles relative to image vertical, signed so that positive
//!   means "ahead of the joint" in the running direction
//!
//! The running direction is inferred from the feet: toes point forward, so
//! the sign of `toe.x - ankle.x` tells which way the athlete runs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::landmarks::{Joint, LandmarkSequence, LegJoints};
use crate::signal::{interpolate_gaps, mean, median, SeriesConfig};
use crate::types::{Side, StepMetric};

/// Leg length (hip to floor) as a fraction of standing height.
const LEG_TO_HEIGHT_RATIO: f64 = 0.53;

/// Interior angle at `b` formed by `a-b-c`, in degrees.
///
/// NaN when either limb segment has zero length.
pub fn joint_angle_deg(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    let v1 = (a.0 - b.0, a.1 - b.1);
    let v2 = (c.0 - b.0, c.1 - b.1);
    let n1 = v1.0.hypot(v1.1);
    let n2 = v2.0.hypot(v2.1);
    if n1 < 1e-12 || n2 < 1e-12 {
        return f64::NAN;
    }
    let cos = ((v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Angle of the segment `from → to` relative to image vertical, in degrees.
///
/// `to` is expected above `from` (smaller y). Positive when `to` lies ahead
/// of `from` in the running direction `direction` (+1 or -1).
pub fn segment_lean_deg(from: (f64, f64), to: (f64, f64), direction: f64) -> f64 {
    let dx = (to.0 - from.0) * direction;
    let dy = from.1 - to.1;
    dx.atan2(dy).to_degrees()
}

/// +1 when the athlete runs toward increasing x, -1 otherwise.
pub fn running_direction(seq: &LandmarkSequence, visibility_threshold: f32) -> f64 {
    let mut sum = 0.0;
    for frame in seq.frames() {
        for (ankle, toe) in [
            (Joint::LeftAnkle, Joint::LeftToe),
            (Joint::RightAnkle, Joint::RightToe),
        ] {
            let (a, t) = (frame.get(ankle), frame.get(toe));
            if a.is_visible(visibility_threshold) && t.is_visible(visibility_threshold) {
                sum += (t.x - a.x) as f64;
            }
        }
    }
    if sum < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Gap-filled 2-D positions of one joint.
fn joint_points(seq: &LandmarkSequence, joint: Joint, cfg: &SeriesConfig) -> Option<Vec<(f64, f64)>> {
    let track = seq.joint_track(joint);
    let x = interpolate_gaps(
        &track.x,
        &track.visibility,
        cfg.visibility_threshold,
        cfg.min_valid_fraction,
    )?;
    let y = interpolate_gaps(
        &track.y,
        &track.visibility,
        cfg.visibility_threshold,
        cfg.min_valid_fraction,
    )?;
    Some(x.into_iter().zip(y).collect())
}

/// Per-frame angle series of one leg.
#[derive(Debug, Clone)]
pub struct LegAngles {
    /// Interior knee angle (hip-knee-ankle), degrees.
    pub knee_deg: Vec<f64>,
    /// Interior ankle angle (knee-ankle-toe), degrees.
    pub ankle_deg: Vec<f64>,
    /// Thigh angle behind vertical (hip extension), degrees.
    pub hip_extension_deg: Vec<f64>,
}

impl LegAngles {
    /// Compute the leg's angle series, or `None` when any of its joints is
    /// too poorly tracked to interpolate.
    pub fn compute(
        seq: &LandmarkSequence,
        leg: LegJoints,
        direction: f64,
        cfg: &SeriesConfig,
    ) -> Option<Self> {
        let hip = joint_points(seq, leg.hip, cfg)?;
        let knee = joint_points(seq, leg.knee, cfg)?;
        let ankle = joint_points(seq, leg.ankle, cfg)?;
        let toe = joint_points(seq, leg.toe, cfg)?;

        let n = hip.len();
        let mut angles = Self {
            knee_deg: Vec::with_capacity(n),
            ankle_deg: Vec::with_capacity(n),
            hip_extension_deg: Vec::with_capacity(n),
        };
        for f in 0..n {
            angles.knee_deg.push(joint_angle_deg(hip[f], knee[f], ankle[f]));
            angles.ankle_deg.push(joint_angle_deg(knee[f], ankle[f], toe[f]));
            // Knee behind the hip means the thigh is extended.
            let behind = (hip[f].0 - knee[f].0) * direction;
            let down = knee[f].1 - hip[f].1;
            angles
                .hip_extension_deg
                .push(behind.atan2(down).to_degrees());
        }
        Some(angles)
    }
}

/// Trunk lean per frame: hip midpoint to shoulder midpoint against vertical,
/// positive when leaning forward.
pub fn trunk_lean_series(
    seq: &LandmarkSequence,
    direction: f64,
    cfg: &SeriesConfig,
) -> Option<Vec<f64>> {
    let lh = joint_points(seq, Joint::LeftHip, cfg)?;
    let rh = joint_points(seq, Joint::RightHip, cfg)?;
    let ls = joint_points(seq, Joint::LeftShoulder, cfg)?;
    let rs = joint_points(seq, Joint::RightShoulder, cfg)?;
    Some(
        (0..lh.len())
            .map(|f| {
                let hip = midpoint(lh[f], rh[f]);
                let shoulder = midpoint(ls[f], rs[f]);
                segment_lean_deg(hip, shoulder, direction)
            })
            .collect(),
    )
}

fn midpoint(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0)
}

/// Aggregated kinematics of one run, as fed into certification scoring.
///
/// Every field is NaN when it could not be measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KinematicSummary {
    /// Mean knee angle of the stance leg at mid-stance, degrees.
    pub knee_flexion_deg: f64,
    /// Mean hip extension of the stance leg at toe-off, degrees.
    pub hip_extension_deg: f64,
    /// Mean forward trunk lean over all stance phases, degrees.
    pub trunk_lean_deg: f64,
    /// Mean step length divided by standing height.
    pub stride_length_ratio: f64,
    /// Mean step frequency, Hz.
    pub stride_frequency_hz: f64,
    /// Mean ground contact time, seconds.
    pub contact_time_s: f64,
    /// Number of steps the aggregates were computed from.
    pub step_count: usize,
}

impl KinematicSummary {
    /// Summarize a run from its landmark sequence and paired steps.
    ///
    /// `athlete_height_m` turns metric step lengths into a ratio. Without
    /// metric distances the ratio falls back to image-space step length over
    /// an anthropometric height estimate from the hip-to-ankle leg length.
    pub fn compute(
        seq: &LandmarkSequence,
        steps: &[StepMetric],
        athlete_height_m: Option<f64>,
        cfg: &SeriesConfig,
    ) -> Self {
        let direction = running_direction(seq, cfg.visibility_threshold as f32);
        let left = LegAngles::compute(seq, LegJoints::LEFT, direction, cfg);
        let right = LegAngles::compute(seq, LegJoints::RIGHT, direction, cfg);
        let trunk = trunk_lean_series(seq, direction, cfg);

        let leg_for = |side: Side| match side {
            Side::Left => left.as_ref(),
            Side::Right => right.as_ref(),
            Side::Both => left.as_ref().or(right.as_ref()),
        };

        let mut knee = Vec::new();
        let mut hip = Vec::new();
        let mut lean = Vec::new();
        for step in steps {
            if let Some(angles) = leg_for(step.side) {
                let mid = (step.contact_frame + step.toe_off_frame) / 2;
                if let Some(v) = angles.knee_deg.get(mid).filter(|v| v.is_finite()) {
                    knee.push(*v);
                }
                if let Some(v) = angles
                    .hip_extension_deg
                    .get(step.toe_off_frame)
                    .filter(|v| v.is_finite())
                {
                    hip.push(*v);
                }
            }
            if let Some(trunk) = &trunk {
                let end = step.toe_off_frame.min(trunk.len().saturating_sub(1));
                if step.contact_frame <= end {
                    lean.extend(trunk[step.contact_frame..=end].iter().filter(|v| v.is_finite()));
                }
            }
        }

        let contact: Vec<f64> = steps.iter().map(|s| s.contact_time_s).collect();
        let cadence: Vec<f64> = steps.iter().filter_map(|s| s.cadence_hz).collect();

        let summary = Self {
            knee_flexion_deg: mean(&knee),
            hip_extension_deg: mean(&hip),
            trunk_lean_deg: mean(&lean),
            stride_length_ratio: stride_length_ratio(seq, steps, athlete_height_m, cfg),
            stride_frequency_hz: mean(&cadence),
            contact_time_s: mean(&contact),
            step_count: steps.len(),
        };
        debug!(
            steps = summary.step_count,
            knee = summary.knee_flexion_deg,
            trunk = summary.trunk_lean_deg,
            "kinematic summary computed"
        );
        summary
    }
}

fn stride_length_ratio(
    seq: &LandmarkSequence,
    steps: &[StepMetric],
    athlete_height_m: Option<f64>,
    cfg: &SeriesConfig,
) -> f64 {
    let metric: Vec<f64> = steps.iter().filter_map(|s| s.stride_length_m).collect();
    if let Some(height) = athlete_height_m.filter(|h| h.is_finite() && *h > 0.0) {
        if !metric.is_empty() {
            return mean(&metric) / height;
        }
    }
    image_stride_ratio(seq, steps, cfg).unwrap_or(f64::NAN)
}

/// Step length in image units over estimated standing height in image units.
fn image_stride_ratio(seq: &LandmarkSequence, steps: &[StepMetric], cfg: &SeriesConfig) -> Option<f64> {
    let toes = [
        joint_points(seq, Joint::LeftToe, cfg)?,
        joint_points(seq, Joint::RightToe, cfg)?,
    ];
    let toe_at = |side: Side, frame: usize| match side {
        Side::Right => toes[1].get(frame).copied(),
        _ => toes[0].get(frame).copied(),
    };

    let mut lengths = Vec::new();
    for pair in steps.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if let (Some(pa), Some(pb)) = (toe_at(a.side, a.contact_frame), toe_at(b.side, b.contact_frame)) {
            lengths.push((pb.0 - pa.0).abs());
        }
    }
    if lengths.is_empty() {
        return None;
    }

    let mut legs = Vec::new();
    for leg in [LegJoints::LEFT, LegJoints::RIGHT] {
        let hip = joint_points(seq, leg.hip, cfg)?;
        let knee = joint_points(seq, leg.knee, cfg)?;
        let ankle = joint_points(seq, leg.ankle, cfg)?;
        for f in 0..hip.len() {
            let thigh = (hip[f].0 - knee[f].0).hypot(hip[f].1 - knee[f].1);
            let shank = (knee[f].0 - ankle[f].0).hypot(knee[f].1 - ankle[f].1);
            legs.push(thigh + shank);
        }
    }
    let leg_length = median(&legs);
    if !(leg_length.is_finite() && leg_length > 1e-9) {
        return None;
    }
    Some(mean(&lengths) / (leg_length / LEG_TO_HEIGHT_RATIO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_angle_law_of_cosines() {
        let straight = joint_angle_deg((0.0, 0.0), (0.0, 1.0), (0.0, 2.0));
        assert!((straight - 180.0).abs() < 1e-9);

        let right = joint_angle_deg((0.0, 0.0), (0.0, 1.0), (1.0, 1.0));
        assert!((right - 90.0).abs() < 1e-9);

        assert!(joint_angle_deg((0.0, 0.0), (0.0, 0.0), (1.0, 1.0)).is_nan());
    }

    #[test]
    fn test_segment_lean_sign_follows_direction() {
        // Shoulder ahead of hip in +x
        let forward = segment_lean_deg((0.5, 0.5), (0.6, 0.4), 1.0);
        assert!((forward - 45.0).abs() < 1e-9);
        let backward = segment_lean_deg((0.5, 0.5), (0.6, 0.4), -1.0);
        assert!((backward + 45.0).abs() < 1e-9);
    }
}
