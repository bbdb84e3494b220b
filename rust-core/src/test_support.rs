//! Synthetic inputs shared by the unit and scenario tests.

use std::f64::consts::PI;
use std::ops::Range;

use crate::landmarks::{Joint, LandmarkFrame, LandmarkSequence, LegJoints, LANDMARK_COUNT};

/// A side-view sprint with `steps` alternating ground contacts.
///
/// Step `i` lands foot `i % 2` (left first) at frame
/// `lead_frames + i·(contact_frames + flight_frames)` and leaves the ground
/// `contact_frames` later. Swing feet follow a half-sine arc.
#[derive(Debug, Clone)]
pub struct SyntheticRun {
    pub steps: usize,
    pub contact_frames: usize,
    pub flight_frames: usize,
    /// Peak foot lift during swing (normalized image units).
    pub swing_height: f64,
    pub lead_frames: usize,
    pub fps: f64,
    /// Vertical hip/shoulder oscillation amplitude, lowest at mid-stance.
    pub hip_bounce: f64,
    pub occlusions: Vec<Occlusion>,
}

/// Lowered visibility of some joints over a frame range.
#[derive(Debug, Clone)]
pub struct Occlusion {
    pub joints: Vec<Joint>,
    pub frames: Range<usize>,
    pub visibility: f32,
}

impl SyntheticRun {
    pub fn with_steps(steps: usize) -> Self {
        Self {
            steps: steps.max(1),
            contact_frames: 6,
            flight_frames: 6,
            swing_height: 0.06,
            lead_frames: 12,
            fps: 60.0,
            hip_bounce: 0.0,
            occlusions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedRun {
    pub sequence: LandmarkSequence,
    pub contacts: Vec<usize>,
    pub toe_offs: Vec<usize>,
    pub fps: f64,
}

pub fn synthetic_run(run: &SyntheticRun) -> GeneratedRun {
    let c = run.contact_frames as i64;
    let fl = run.flight_frames as i64;
    let swing = c + 2 * fl;
    let contacts: Vec<i64> = (0..run.steps as i64)
        .map(|i| run.lead_frames as i64 + i * (c + fl))
        .collect();
    let toe_offs: Vec<i64> = contacts.iter().map(|ci| ci + c).collect();
    let frame_count = toe_offs.last().copied().unwrap_or(0) + fl;

    let foot_height = |foot: usize, f: i64| -> f64 {
        let own: Vec<usize> = (0..run.steps).filter(|i| i % 2 == foot).collect();
        if own.iter().any(|&i| contacts[i] <= f && f <= toe_offs[i]) {
            return 0.0;
        }
        // The lead foot swings in from outside the clip; the trail foot
        // leaves the ground one flight phase before the first contact.
        let previous_toe_off = if foot == 0 { contacts[0] - swing } else { contacts[0] - fl };
        let mut starts = vec![previous_toe_off];
        starts.extend(own.iter().map(|&i| toe_offs[i]));
        for (k, &a) in starts.iter().enumerate() {
            let b = own.get(k).map_or(a + swing, |&i| contacts[i]);
            if a < f && f < b {
                return run.swing_height * (PI * (f - a) as f64 / (b - a) as f64).sin();
            }
        }
        0.0
    };

    let mut sequence = LandmarkSequence::new();
    for f in 0..frame_count {
        let mut rows = vec![[0.5f32, 0.5, 0.0, 0.0]; LANDMARK_COUNT];
        let bounce = run.hip_bounce * (2.0 * PI * (f - (contacts[0] + 3)) as f64 / 12.0).cos();
        for (foot, leg) in [LegJoints::LEFT, LegJoints::RIGHT].iter().enumerate() {
            let hx = if foot == 0 { 0.48 } else { 0.52 };
            let h = foot_height(foot, f);
            rows[leg.hip.index()] = [hx as f32, (0.5 + bounce) as f32, 0.0, 1.0];
            rows[leg.knee.index()] = [(hx + 0.02) as f32, (0.65 - h) as f32, 0.0, 1.0];
            rows[leg.ankle.index()] = [hx as f32, (0.80 - h) as f32, 0.0, 1.0];
            rows[leg.toe.index()] = [(hx + 0.03) as f32, (0.82 - h) as f32, 0.0, 1.0];
        }
        rows[Joint::LeftShoulder.index()] = [0.49, (0.3 + bounce) as f32, 0.0, 1.0];
        rows[Joint::RightShoulder.index()] = [0.53, (0.3 + bounce) as f32, 0.0, 1.0];
        for occlusion in &run.occlusions {
            if occlusion.frames.contains(&(f as usize)) {
                for joint in &occlusion.joints {
                    rows[joint.index()][3] = occlusion.visibility;
                }
            }
        }
        let frame = LandmarkFrame::from_raw(&rows).expect("synthetic landmarks are valid");
        sequence.push(frame);
    }

    GeneratedRun {
        sequence,
        contacts: contacts.iter().map(|&v| v as usize).collect(),
        toe_offs: toe_offs.iter().map(|&v| v as usize).collect(),
        fps: run.fps,
    }
}

/// Split times at `distances` for a mono-exponential sprint
/// `d(t) = V0·(t + τ·(e^{-t/τ} - 1))`, solved by bisection.
pub fn split_times(v0: f64, tau: f64, distances: &[f64]) -> Vec<f64> {
    let position = |t: f64| v0 * (t + tau * ((-t / tau).exp() - 1.0));
    distances
        .iter()
        .map(|&d| {
            let (mut lo, mut hi) = (0.0, 60.0);
            for _ in 0..200 {
                let mid = (lo + hi) / 2.0;
                if position(mid) < d {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            (lo + hi) / 2.0
        })
        .collect()
}
