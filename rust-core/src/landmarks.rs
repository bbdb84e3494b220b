//! Landmark buffer: typed per-frame pose landmarks for one video.
//!
//! The pose provider delivers, per frame, 33 landmarks in normalized image
//! coordinates `{x, y, z, visibility}`. This module turns that loosely typed
//! stream into a validated, compact value type:
//! - `LandmarkFrame`: exactly 33 joints, finite coordinates, visibility in [0, 1]
//! - `LandmarkSequence`: frame-indexed frames of one analysis run
//! - `JointTrack`: one joint's coordinate series, ready for signal processing
//!
//! Frames where the provider found no pose are stored explicitly as dropped
//! frames (all visibilities zero) so that frame indices keep matching video
//! frame numbers.

use crate::error::{AnalysisError, Result};

/// Number of landmarks per frame in the pose model.
pub const LANDMARK_COUNT: usize = 33;

/// Body joints used by the engine, with their pose-model indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    Nose,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    LeftHeel,
    RightHeel,
    LeftToe,
    RightToe,
}

impl Joint {
    /// Joints whose visibility decides whether gait analysis is possible.
    pub const LOWER_BODY: [Joint; 8] = [
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
        Joint::LeftToe,
        Joint::RightToe,
    ];

    /// Index of this joint in a pose-model frame.
    pub const fn index(self) -> usize {
        match self {
            Joint::Nose => 0,
            Joint::LeftShoulder => 11,
            Joint::RightShoulder => 12,
            Joint::LeftElbow => 13,
            Joint::RightElbow => 14,
            Joint::LeftWrist => 15,
            Joint::RightWrist => 16,
            Joint::LeftHip => 23,
            Joint::RightHip => 24,
            Joint::LeftKnee => 25,
            Joint::RightKnee => 26,
            Joint::LeftAnkle => 27,
            Joint::RightAnkle => 28,
            Joint::LeftHeel => 29,
            Joint::RightHeel => 30,
            Joint::LeftToe => 31,
            Joint::RightToe => 32,
        }
    }
}

/// Joints of one leg, in proximal-to-distal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegJoints {
    pub hip: Joint,
    pub knee: Joint,
    pub ankle: Joint,
    pub toe: Joint,
}

impl LegJoints {
    pub const LEFT: LegJoints = LegJoints {
        hip: Joint::LeftHip,
        knee: Joint::LeftKnee,
        ankle: Joint::LeftAnkle,
        toe: Joint::LeftToe,
    };

    pub const RIGHT: LegJoints = LegJoints {
        hip: Joint::RightHip,
        knee: Joint::RightKnee,
        ankle: Joint::RightAnkle,
        toe: Joint::RightToe,
    };
}

/// One landmark in normalized image coordinates (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    /// Relative depth reported by the pose model. Not used for 2-D analysis.
    pub z: f32,
    /// Provider confidence that the joint is visible, in [0.0, 1.0].
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility >= threshold
    }
}

/// Validated pose for one video frame. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    landmarks: [Landmark; LANDMARK_COUNT],
}

impl LandmarkFrame {
    /// Build a frame from typed landmarks, validating every value.
    pub fn new(landmarks: [Landmark; LANDMARK_COUNT]) -> Result<Self> {
        for (i, lm) in landmarks.iter().enumerate() {
            validate_landmark(i, lm)?;
        }
        Ok(Self { landmarks })
    }

    /// Build a frame from raw provider rows `[x, y, z, visibility]`.
    pub fn from_raw(rows: &[[f32; 4]]) -> Result<Self> {
        if rows.len() != LANDMARK_COUNT {
            return Err(AnalysisError::invalid_frame(format!(
                "expected {} landmarks, got {}",
                LANDMARK_COUNT,
                rows.len()
            )));
        }
        let mut landmarks = [Landmark::default(); LANDMARK_COUNT];
        for (slot, row) in landmarks.iter_mut().zip(rows) {
            *slot = Landmark::new(row[0], row[1], row[2], row[3]);
        }
        Self::new(landmarks)
    }

    /// A frame where the pose provider found no person.
    pub fn dropped() -> Self {
        Self {
            landmarks: [Landmark::default(); LANDMARK_COUNT],
        }
    }

    /// True when no landmark carries any visibility.
    pub fn is_dropped(&self) -> bool {
        self.landmarks.iter().all(|lm| lm.visibility <= 0.0)
    }

    pub fn get(&self, joint: Joint) -> &Landmark {
        &self.landmarks[joint.index()]
    }

    pub fn landmarks(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.landmarks
    }

    /// Mean visibility over the given joints.
    pub fn mean_visibility(&self, joints: &[Joint]) -> f32 {
        if joints.is_empty() {
            return 0.0;
        }
        joints.iter().map(|j| self.get(*j).visibility).sum::<f32>() / joints.len() as f32
    }
}

fn validate_landmark(index: usize, lm: &Landmark) -> Result<()> {
    if !(lm.x.is_finite() && lm.y.is_finite() && lm.z.is_finite()) {
        return Err(AnalysisError::invalid_frame(format!(
            "landmark {index} has non-finite coordinates"
        )));
    }
    if !(0.0..=1.0).contains(&lm.visibility) {
        return Err(AnalysisError::invalid_frame(format!(
            "landmark {index} visibility {} outside [0, 1]",
            lm.visibility
        )));
    }
    Ok(())
}

/// One joint's coordinates and visibility across a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct JointTrack {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub visibility: Vec<f64>,
}

impl JointTrack {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Image height series (`1 - y`), larger is higher in the frame.
    pub fn height(&self) -> Vec<f64> {
        self.y.iter().map(|y| 1.0 - y).collect()
    }
}

/// Frame-indexed pose landmarks of one video.
#[derive(Debug, Clone)]
pub struct LandmarkSequence {
    frames: Vec<LandmarkFrame>,
    /// Frame width over height, used when measuring angles in image space.
    aspect_ratio: f64,
}

impl Default for LandmarkSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkSequence {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            aspect_ratio: 1.0,
        }
    }

    pub fn from_frames(frames: Vec<LandmarkFrame>) -> Self {
        Self {
            frames,
            aspect_ratio: 1.0,
        }
    }

    /// Set the width/height ratio of the source video. Non-positive values are ignored.
    pub fn with_aspect_ratio(mut self, aspect_ratio: f64) -> Self {
        if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
            self.aspect_ratio = aspect_ratio;
        }
        self
    }

    pub fn push(&mut self, frame: LandmarkFrame) {
        self.frames.push(frame);
    }

    pub fn push_dropped(&mut self) {
        self.frames.push(LandmarkFrame::dropped());
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[LandmarkFrame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&LandmarkFrame> {
        self.frames.get(index)
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    pub fn dropped_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_dropped()).count()
    }

    /// Extract one joint's series. X is scaled by the aspect ratio so that
    /// both axes share the same unit.
    pub fn joint_track(&self, joint: Joint) -> JointTrack {
        let n = self.frames.len();
        let mut track = JointTrack {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            visibility: Vec::with_capacity(n),
        };
        for frame in &self.frames {
            let lm = frame.get(joint);
            track.x.push(lm.x as f64 * self.aspect_ratio);
            track.y.push(lm.y as f64);
            track.visibility.push(lm.visibility as f64);
        }
        track
    }

    /// Fraction of non-dropped frames whose lower-body joints all reach the
    /// visibility threshold. Zero for an empty sequence.
    pub fn detection_rate(&self, visibility_threshold: f32) -> f64 {
        let present: Vec<&LandmarkFrame> = self.frames.iter().filter(|f| !f.is_dropped()).collect();
        if present.is_empty() {
            return 0.0;
        }
        let detected = present
            .iter()
            .filter(|f| {
                Joint::LOWER_BODY
                    .iter()
                    .all(|j| f.get(*j).is_visible(visibility_threshold))
            })
            .count();
        detected as f64 / present.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_rows(visibility: f32) -> Vec<[f32; 4]> {
        vec![[0.5, 0.5, 0.0, visibility]; LANDMARK_COUNT]
    }

    #[test]
    fn test_from_raw_rejects_wrong_joint_count() {
        let rows = vec![[0.5, 0.5, 0.0, 1.0]; 17];
        let err = LandmarkFrame::from_raw(&rows).unwrap_err();
        assert!(err.to_string().contains("expected 33 landmarks"));
    }

    #[test]
    fn test_from_raw_rejects_bad_values() {
        let mut rows = raw_rows(1.0);
        rows[25][3] = 1.2;
        assert!(LandmarkFrame::from_raw(&rows).is_err());

        let mut rows = raw_rows(1.0);
        rows[3][0] = f32::NAN;
        assert!(LandmarkFrame::from_raw(&rows).is_err());
    }

    #[test]
    fn test_joint_lookup_uses_pose_indices() {
        let mut rows = raw_rows(0.9);
        rows[31] = [0.1, 0.8, 0.0, 0.7];
        let frame = LandmarkFrame::from_raw(&rows).unwrap();
        let toe = frame.get(Joint::LeftToe);
        assert_eq!(toe.x, 0.1);
        assert_eq!(toe.visibility, 0.7);
        assert_eq!(Joint::RightHip.index(), 24);
    }

    #[test]
    fn test_dropped_frames() {
        let mut seq = LandmarkSequence::new();
        seq.push(LandmarkFrame::from_raw(&raw_rows(0.9)).unwrap());
        seq.push_dropped();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.dropped_count(), 1);
        assert!(seq.frame(1).unwrap().is_dropped());
    }

    #[test]
    fn test_detection_rate_ignores_dropped_frames() {
        let mut seq = LandmarkSequence::new();
        seq.push(LandmarkFrame::from_raw(&raw_rows(0.9)).unwrap());
        seq.push(LandmarkFrame::from_raw(&raw_rows(0.2)).unwrap());
        seq.push_dropped();
        assert!((seq.detection_rate(0.5) - 0.5).abs() < 1e-12);
        assert_eq!(LandmarkSequence::new().detection_rate(0.5), 0.0);
    }

    #[test]
    fn test_joint_track_scales_x_by_aspect_ratio() {
        let mut rows = raw_rows(1.0);
        rows[23] = [0.5, 0.25, 0.0, 1.0];
        let seq = LandmarkSequence::from_frames(vec![LandmarkFrame::from_raw(&rows).unwrap()])
            .with_aspect_ratio(2.0);
        let track = seq.joint_track(Joint::LeftHip);
        assert!((track.x[0] - 1.0).abs() < 1e-9);
        assert!((track.height()[0] - 0.75).abs() < 1e-9);
    }
}
