//! Core data types shared across the analysis engine.
//!
//! This module defines the value types that flow between the gait event
//! detector, the step metrics calculator, the force-velocity estimator and the
//! certification scoring engine.
//!
//! Design principle: types make intent obvious. A gait event is a
//! `GaitEvent`, never a `(usize, u8, f32)` tuple. Derived values that cannot
//! be computed are `None` (or NaN for floating-point model parameters), never
//! silently replaced by zero.

use serde::{Deserialize, Serialize};

// ============================================================================
// BODY SIDE
// ============================================================================

/// Which foot (or both) an observation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
    /// Evidence from whole-body signals that cannot be attributed to one foot.
    Both,
}

impl Side {
    /// The two feet, in a fixed order.
    pub const FEET: [Side; 2] = [Side::Left, Side::Right];

    /// The opposite foot. `Both` maps to itself.
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
            Side::Both => Side::Both,
        }
    }
}

// ============================================================================
// GAIT EVENTS
// ============================================================================

/// Kind of gait event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaitEventKind {
    /// Foot touches down.
    Contact,
    /// Foot leaves the ground.
    ToeOff,
}

/// A fused foot-contact or toe-off event.
///
/// Produced by the gait event detector and consumed read-only by the step
/// metrics calculator. Event lists are sorted ascending by frame and never
/// hold two events of the same kind on the same frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaitEvent {
    /// Frame index within the analyzed sequence.
    pub frame: usize,
    pub kind: GaitEventKind,
    /// Fused confidence in [0.0, 1.0].
    pub confidence: f64,
    pub side: Side,
}

impl GaitEvent {
    pub fn new(frame: usize, kind: GaitEventKind, confidence: f64, side: Side) -> Self {
        Self {
            frame,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            side,
        }
    }

    /// Time of the event in seconds for the given frame rate.
    pub fn time_s(&self, fps: f64) -> f64 {
        self.frame as f64 / fps
    }

    pub fn is_contact(&self) -> bool {
        self.kind == GaitEventKind::Contact
    }

    pub fn is_toe_off(&self) -> bool {
        self.kind == GaitEventKind::ToeOff
    }
}

// ============================================================================
// STEP METRICS
// ============================================================================

/// Timing (and, when a track mapping is known, distance) metrics of one step.
///
/// A step runs from a contact, through its toe-off, to the next contact.
/// The last step of a sequence has no next contact, so its flight time, step
/// time and cadence are `None`. Distance-derived fields stay `None` unless
/// absolute distances were supplied; they are never invented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetric {
    /// Position of this step in the step sequence (0-based).
    pub index: usize,
    pub contact_frame: usize,
    pub toe_off_frame: usize,
    pub next_contact_frame: Option<usize>,
    /// Foot that made the contact.
    pub side: Side,
    /// Ground contact time in seconds.
    pub contact_time_s: f64,
    /// Flight time in seconds.
    pub flight_time_s: Option<f64>,
    /// Contact time plus flight time in seconds.
    pub step_time_s: Option<f64>,
    /// Steps per second.
    pub cadence_hz: Option<f64>,
    /// Track position of the contacting foot at touchdown, in meters.
    pub contact_distance_m: Option<f64>,
    /// Distance to the next contact in meters.
    pub stride_length_m: Option<f64>,
    /// Stride length over step time, in m/s.
    pub speed_mps: Option<f64>,
    /// Change in speed from the previous step over this step's time, in m/s².
    pub acceleration_mps2: Option<f64>,
}

impl StepMetric {
    /// Whether this step is the final one of its sequence.
    pub fn is_last(&self) -> bool {
        self.next_contact_frame.is_none()
    }
}

// ============================================================================
// QUALITY
// ============================================================================

/// Confidence label attached to a measurement or score.
///
/// Ordered from best to worst, so `max` of two grades is the worse one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    #[default]
    Good,
    Acceptable,
    /// Data is too unreliable to certify; results are informative only.
    ReferenceOnly,
}

impl QualityGrade {
    /// The worse of two grades.
    pub fn worst(self, other: QualityGrade) -> QualityGrade {
        self.max(other)
    }

    /// Whether a result carrying this grade may back a certification.
    pub fn is_certifiable(self) -> bool {
        self != QualityGrade::ReferenceOnly
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityGrade::Good => "good",
            QualityGrade::Acceptable => "acceptable",
            QualityGrade::ReferenceOnly => "reference_only",
        }
    }
}

// ============================================================================
// NUMERIC HELPERS
// ============================================================================

/// Round to a fixed number of decimal places. NaN and infinities pass through.
pub fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Round an optional value, keeping `None` as `None`.
pub fn round_opt(value: Option<f64>, places: i32) -> Option<f64> {
    value.map(|v| round_to(v, places))
}
