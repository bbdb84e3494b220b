//! Step pairing and timing metrics.
//!
//! A step is a contact followed by its toe-off and, unless it is the last one,
//! by the next contact. Contacts without a toe-off before the next contact are
//! dropped rather than padded.
//!
//! Timing needs only the frame rate. Distances need a `TrackMapping` from
//! image x to track meters; without one, stride, speed and acceleration stay
//! `None`.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::landmarks::{Joint, LandmarkSequence};
use crate::types::{GaitEvent, Side, StepMetric};

/// Maps a normalized image x coordinate to a track position in meters.
///
/// Supplied by the caller from an external camera calibration.
pub trait TrackMapping: Debug {
    fn to_track_m(&self, image_x: f64) -> f64;
}

/// `meters = offset_m + meters_per_unit × x`, for a static camera filming
/// perpendicular to the lane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTrackMapping {
    pub offset_m: f64,
    pub meters_per_unit: f64,
}

impl LinearTrackMapping {
    pub fn new(offset_m: f64, meters_per_unit: f64) -> Self {
        Self {
            offset_m,
            meters_per_unit,
        }
    }
}

impl TrackMapping for LinearTrackMapping {
    fn to_track_m(&self, image_x: f64) -> f64 {
        self.offset_m + self.meters_per_unit * image_x
    }
}

/// A contact paired with its toe-off and the following contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairedStep {
    pub contact: GaitEvent,
    pub toe_off_frame: usize,
    pub next_contact: Option<GaitEvent>,
}

/// Pair sorted events into steps.
///
/// For each contact, the first toe-off strictly after it and strictly before
/// the next contact completes the step. The last contact may take any later
/// toe-off.
pub fn pair_steps(events: &[GaitEvent]) -> Vec<PairedStep> {
    let contacts: Vec<&GaitEvent> = events.iter().filter(|e| e.is_contact()).collect();
    let mut steps = Vec::new();
    for (i, contact) in contacts.iter().enumerate() {
        let next = contacts.get(i + 1).copied();
        let toe_off = events.iter().find(|e| {
            e.is_toe_off()
                && e.frame > contact.frame
                && next.map_or(true, |n| e.frame < n.frame)
        });
        if let Some(toe_off) = toe_off {
            steps.push(PairedStep {
                contact: **contact,
                toe_off_frame: toe_off.frame,
                next_contact: next.copied(),
            });
        }
    }
    steps
}

/// Computes `StepMetric`s from gait events.
#[derive(Debug)]
pub struct StepMetricsCalculator {
    fps: f64,
    mapping: Option<Box<dyn TrackMapping>>,
    /// Minimum visibility for a foot landmark to be located on the track.
    visibility_threshold: f32,
}

impl StepMetricsCalculator {
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            mapping: None,
            visibility_threshold: 0.5,
        }
    }

    pub fn with_track_mapping(mut self, mapping: impl TrackMapping + 'static) -> Self {
        self.mapping = Some(Box::new(mapping));
        self
    }

    pub fn has_track_mapping(&self) -> bool {
        self.mapping.is_some()
    }

    /// Timing metrics only.
    pub fn compute(&self, events: &[GaitEvent]) -> Vec<StepMetric> {
        pair_steps(events)
            .iter()
            .enumerate()
            .map(|(index, step)| self.timing(index, step))
            .collect()
    }

    /// Timing metrics plus, when a track mapping is set, distances located
    /// from the contacting foot in `seq`.
    pub fn compute_with_sequence(&self, events: &[GaitEvent], seq: &LandmarkSequence) -> Vec<StepMetric> {
        let paired = pair_steps(events);
        let mut steps: Vec<StepMetric> = paired
            .iter()
            .enumerate()
            .map(|(index, step)| self.timing(index, step))
            .collect();

        let Some(mapping) = self.mapping.as_deref() else {
            return steps;
        };

        let mut previous_speed: Option<f64> = None;
        for (metric, pair) in steps.iter_mut().zip(&paired) {
            let here = self.foot_position_m(seq, mapping, &pair.contact);
            let there = pair
                .next_contact
                .and_then(|next| self.foot_position_m(seq, mapping, &next));
            metric.contact_distance_m = here;
            metric.stride_length_m = match (here, there) {
                (Some(a), Some(b)) => Some((b - a).abs()),
                _ => None,
            };
            metric.speed_mps = match (metric.stride_length_m, metric.step_time_s) {
                (Some(length), Some(time)) if time > 0.0 => Some(length / time),
                _ => None,
            };
            metric.acceleration_mps2 = match (previous_speed, metric.speed_mps, metric.step_time_s) {
                (Some(before), Some(now), Some(time)) if time > 0.0 => Some((now - before) / time),
                _ => None,
            };
            previous_speed = metric.speed_mps;
        }
        steps
    }

    fn timing(&self, index: usize, step: &PairedStep) -> StepMetric {
        let contact_frame = step.contact.frame;
        let toe_off_frame = step.toe_off_frame;
        let next_contact_frame = step.next_contact.map(|e| e.frame);

        let contact_time_s = (toe_off_frame - contact_frame) as f64 / self.fps;
        let flight_time_s = next_contact_frame.map(|n| (n - toe_off_frame) as f64 / self.fps);
        let step_time_s = flight_time_s.map(|flight| contact_time_s + flight);
        let cadence_hz = step_time_s.filter(|t| *t > 0.0).map(|t| 1.0 / t);

        StepMetric {
            index,
            contact_frame,
            toe_off_frame,
            next_contact_frame,
            side: step.contact.side,
            contact_time_s,
            flight_time_s,
            step_time_s,
            cadence_hz,
            contact_distance_m: None,
            stride_length_m: None,
            speed_mps: None,
            acceleration_mps2: None,
        }
    }

    /// Track position of the contacting foot: toe if visible, else ankle.
    /// Events attributed to both feet use the lower (grounded) toe.
    fn foot_position_m(
        &self,
        seq: &LandmarkSequence,
        mapping: &dyn TrackMapping,
        event: &GaitEvent,
    ) -> Option<f64> {
        let frame = seq.frame(event.frame)?;
        let feet: &[(Joint, Joint)] = match event.side {
            Side::Left => &[(Joint::LeftToe, Joint::LeftAnkle)],
            Side::Right => &[(Joint::RightToe, Joint::RightAnkle)],
            Side::Both => &[
                (Joint::LeftToe, Joint::LeftAnkle),
                (Joint::RightToe, Joint::RightAnkle),
            ],
        };
        feet.iter()
            .filter_map(|(toe, ankle)| {
                [*toe, *ankle]
                    .into_iter()
                    .map(|j| frame.get(j))
                    .find(|lm| lm.is_visible(self.visibility_threshold))
            })
            .max_by(|a, b| a.y.total_cmp(&b.y))
            .map(|lm| mapping.to_track_m(lm.x as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GaitEventKind;

    fn contact(frame: usize, side: Side) -> GaitEvent {
        GaitEvent::new(frame, GaitEventKind::Contact, 0.9, side)
    }

    fn toe_off(frame: usize, side: Side) -> GaitEvent {
        GaitEvent::new(frame, GaitEventKind::ToeOff, 0.9, side)
    }

    #[test]
    fn test_timing_metrics() {
        let events = vec![
            contact(10, Side::Left),
            toe_off(16, Side::Left),
            contact(22, Side::Right),
            toe_off(28, Side::Right),
        ];
        let steps = StepMetricsCalculator::new(60.0).compute(&events);
        assert_eq!(steps.len(), 2);

        let first = &steps[0];
        assert!((first.contact_time_s - 0.1).abs() < 1e-12);
        assert!((first.flight_time_s.unwrap() - 0.1).abs() < 1e-12);
        assert!((first.step_time_s.unwrap() - 0.2).abs() < 1e-12);
        assert!((first.cadence_hz.unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(first.stride_length_m, None);

        let last = &steps[1];
        assert!(last.is_last());
        assert_eq!(last.flight_time_s, None);
        assert_eq!(last.cadence_hz, None);
        assert_eq!(last.side, Side::Right);
    }

    #[test]
    fn test_contact_without_toe_off_is_dropped() {
        let events = vec![
            contact(10, Side::Left),
            contact(22, Side::Right),
            toe_off(28, Side::Right),
            contact(34, Side::Left),
        ];
        let paired = pair_steps(&events);
        assert_eq!(paired.len(), 1);
        assert_eq!(paired[0].contact.frame, 22);
        assert_eq!(paired[0].next_contact.map(|e| e.frame), Some(34));
    }

    #[test]
    fn test_toe_off_must_be_strictly_between_contacts() {
        let events = vec![
            toe_off(4, Side::Left),
            contact(10, Side::Left),
            toe_off(22, Side::Left),
            contact(22, Side::Right),
        ];
        assert!(pair_steps(&events).is_empty());
    }

    #[test]
    fn test_linear_track_mapping() {
        let mapping = LinearTrackMapping::new(10.0, 20.0);
        assert!((mapping.to_track_m(0.25) - 15.0).abs() < 1e-12);
        let calc = StepMetricsCalculator::new(60.0).with_track_mapping(mapping);
        assert!(calc.has_track_mapping());
    }
}
