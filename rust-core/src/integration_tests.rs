/// Integration tests for the complete sprint analysis and certification flow.
/// Runs synthetic sprints and split traces with known ground truth through
/// the detectors, the profile estimator, scoring and routing.

#[cfg(test)]
mod integration_tests {
    use chrono::{TimeZone, Utc};

    use crate::hfvp::{HfvpEstimator, HfvpInput, HfvpOptions};
    use crate::judgment::{transition, AttemptAction, AttemptStatus, JudgmentMode};
    use crate::landmarks::Joint;
    use crate::pipeline::*;
    use crate::quality::QualityMetrics;
    use crate::rules::{GradeRule, GradeRuleSet, ScoringItem, MAX_GRADE};
    use crate::scoring::*;
    use crate::step_detection::GaitEventDetector;
    use crate::test_support::{split_times, synthetic_run, Occlusion, SyntheticRun};
    use crate::types::{QualityGrade, Side};

    /// Helper: every detected step matches the injected one within `tolerance` frames
    fn assert_steps_match(k: usize, run: &SyntheticRun, tolerance: usize) {
        let generated = synthetic_run(run);
        let detection = GaitEventDetector::default()
            .detect(&generated.sequence, generated.fps)
            .unwrap();
        assert_eq!(detection.steps.len(), k, "k = {k}: {:?}", detection.steps);
        for (step, (contact, toe_off)) in detection
            .steps
            .iter()
            .zip(generated.contacts.iter().zip(&generated.toe_offs))
        {
            assert!(step.contact_frame.abs_diff(*contact) <= tolerance, "contact {contact}");
            assert!(step.toe_off_frame.abs_diff(*toe_off) <= tolerance, "toe-off {toe_off}");
        }
    }

    /// Helper: scoring input with every value at the entry-level ideal
    fn ideal_input(grade: u8) -> ScoringInput {
        let input = ScoringInput::new(
            grade,
            AngleAggregate {
                knee_flexion_deg: 130.0,
                hip_extension_deg: 20.0,
                trunk_lean_deg: 10.0,
            },
            StrideAggregate {
                stride_length_ratio: 1.1,
                stride_frequency_hz: 4.2,
                contact_time_s: 0.11,
            },
        );
        if grade > 2 {
            return input;
        }
        input
            .with_hfvp(HfvpAggregate {
                f0_rel: 8.0,
                v0_mps: 9.5,
                pmax_rel: 19.0,
                drf: -7.0,
                is_physically_valid: true,
                quality: QualityGrade::Good,
            })
            .with_quality(QualityMetrics {
                regression_r_squared: Some(0.97),
                position_r_squared: Some(0.99),
                measurement_points: Some(6),
                ..QualityMetrics::default()
            })
    }

    /// Helper: overwrite one measured value
    fn with_value(mut input: ScoringInput, item: ScoringItem, value: f64) -> ScoringInput {
        match item {
            ScoringItem::KneeFlexion => input.angles.knee_flexion_deg = value,
            ScoringItem::HipExtension => input.angles.hip_extension_deg = value,
            ScoringItem::TrunkLean => input.angles.trunk_lean_deg = value,
            ScoringItem::StrideLengthRatio => input.stride.stride_length_ratio = value,
            ScoringItem::StrideFrequency => input.stride.stride_frequency_hz = value,
            ScoringItem::ContactTime => input.stride.contact_time_s = value,
            ScoringItem::F0 => input.hfvp.as_mut().unwrap().f0_rel = value,
            ScoringItem::V0 => input.hfvp.as_mut().unwrap().v0_mps = value,
            ScoringItem::Pmax => input.hfvp.as_mut().unwrap().pmax_rel = value,
            ScoringItem::Drf => input.hfvp.as_mut().unwrap().drf = value,
        }
        input
    }

    // ============================================================================
    // GAIT EVENTS
    // ============================================================================

    #[test]
    fn test_detects_injected_steps() {
        for k in [1, 5, 20] {
            assert_steps_match(k, &SyntheticRun::with_steps(k), 2);
        }
    }

    #[test]
    fn test_detects_injected_steps_with_body_motion() {
        for k in [1, 5, 20] {
            let run = SyntheticRun {
                hip_bounce: 0.01,
                ..SyntheticRun::with_steps(k)
            };
            assert_steps_match(k, &run, 2);
        }
    }

    #[test]
    fn test_steps_alternate_feet() {
        let generated = synthetic_run(&SyntheticRun::with_steps(6));
        let detection = GaitEventDetector::default()
            .detect(&generated.sequence, generated.fps)
            .unwrap();
        let sides: Vec<Side> = detection.steps.iter().map(|s| s.side).collect();
        assert_eq!(sides[0], Side::Left);
        for pair in sides.windows(2) {
            assert_eq!(pair[1], pair[0].opposite());
        }
        let last = detection.steps.last().unwrap();
        assert!(last.is_last());
        assert!(detection.steps[0].step_time_s.is_some());
    }

    #[test]
    fn test_recovers_contact_hidden_at_clip_start() {
        // First contact lands 3 frames into the clip with a half-visible leg.
        let run = SyntheticRun {
            lead_frames: 3,
            occlusions: vec![Occlusion {
                joints: vec![Joint::LeftToe, Joint::LeftAnkle, Joint::LeftKnee],
                frames: 0..6,
                visibility: 0.4,
            }],
            ..SyntheticRun::with_steps(3)
        };
        let generated = synthetic_run(&run);
        let detection = GaitEventDetector::default()
            .detect(&generated.sequence, generated.fps)
            .unwrap();

        assert_eq!(detection.recovered_events, 1);
        assert_eq!(detection.steps.len(), 3);
        assert!(detection.steps[0].contact_frame.abs_diff(generated.contacts[0]) <= 1);
        let recovered = detection.events.first().unwrap();
        assert!(recovered.is_contact());
        assert!(recovered.confidence <= 0.2 + 1e-12);
        assert!(detection.warnings.iter().any(|w| w.contains("recovered")));
    }

    // ============================================================================
    // FORCE-VELOCITY PROFILE
    // ============================================================================

    #[test]
    fn test_profile_recovers_generating_parameters() {
        let (v0, tau, mass) = (9.0, 1.2, 75.0);
        let distances: Vec<f64> = (0..=30).map(f64::from).collect();
        let times = split_times(v0, tau, &distances);
        let input = HfvpInput::new(distances, times, mass).unwrap();
        let result = HfvpEstimator::default().compute(&input);

        let true_f0 = mass * v0 / tau;
        assert!(result.is_physically_valid, "{:?}", result.warnings);
        assert!((result.f0_n / true_f0 - 1.0).abs() < 0.05, "F0 {}", result.f0_n);
        assert!((result.v0_mps / v0 - 1.0).abs() < 0.02, "V0 {}", result.v0_mps);
        assert!(result.slope < 0.0);
    }

    #[test]
    fn test_concrete_split_scenario() {
        let input = HfvpInput::new(
            vec![0.0, 5.0, 10.0, 15.0, 20.0],
            vec![0.0, 1.2, 2.1, 2.9, 3.6],
            70.0,
        )
        .unwrap();
        let result = HfvpEstimator::new(HfvpOptions::default()).compute(&input);
        assert!(result.slope < 0.0);
        for value in [result.f0_n, result.v0_mps, result.pmax_w] {
            assert!(value.is_finite() && value > 0.0);
        }
        assert_ne!(result.quality, QualityGrade::ReferenceOnly);
    }

    #[test]
    fn test_profile_ignores_clock_and_marker_offsets() {
        let base = HfvpInput::new(
            vec![0.0, 5.0, 10.0, 15.0, 20.0],
            vec![0.0, 1.2, 2.1, 2.9, 3.6],
            70.0,
        )
        .unwrap();
        let shifted = HfvpInput::new(
            vec![2.0, 7.0, 12.0, 17.0, 22.0],
            vec![0.5, 1.7, 2.6, 3.4, 4.1],
            70.0,
        )
        .unwrap();
        let estimator = HfvpEstimator::default();
        let (a, b) = (estimator.compute(&base), estimator.compute(&shifted));
        assert!((a.f0_n - b.f0_n).abs() < 0.2);
        assert!((a.v0_mps - b.v0_mps).abs() < 0.002);
        assert_eq!(a.quality, b.quality);
    }

    // ============================================================================
    // SCORING
    // ============================================================================

    #[test]
    fn test_ideal_values_score_100_for_every_grade() {
        let engine = ScoringEngine::default();
        for grade in 1..=MAX_GRADE {
            let rule = GradeRule::standard(grade).unwrap();
            let result = engine.score(&ideal_input(grade), &rule).unwrap();
            assert_eq!(result.total_score, 100.0, "grade {grade}");
            assert!(result.passed);
            assert_eq!(result.quality, QualityGrade::Good);
            assert_eq!(result.judgment_mode, JudgmentMode::for_grade(grade));
        }
    }

    #[test]
    fn test_boundary_values_are_in_range_and_near_threshold() {
        let engine = ScoringEngine::default();
        for grade in [1, 5, 10] {
            let rule = GradeRule::standard(grade).unwrap();
            for item_rule in &rule.items {
                for boundary in [item_rule.criteria.min, item_rule.criteria.max] {
                    let input = with_value(ideal_input(grade), item_rule.item, boundary);
                    let result = engine.score(&input, &rule).unwrap();
                    let detail = result.item(item_rule.item).unwrap();
                    assert!(detail.is_within_range, "{} at {boundary}", item_rule.item);
                    assert!(detail.is_near_threshold, "{} at {boundary}", item_rule.item);
                    assert!(result.requires_review);
                }
            }
        }
    }

    #[test]
    fn test_knee_94_against_entry_criteria() {
        let rule = GradeRule::standard(10).unwrap();
        let input = with_value(ideal_input(10), ScoringItem::KneeFlexion, 94.0);
        let result = ScoringEngine::default().score(&input, &rule).unwrap();
        let knee = result.item(ScoringItem::KneeFlexion).unwrap();
        assert_eq!(knee.criteria_min, 90.0);
        assert!(knee.is_within_range);
        assert!(knee.is_near_threshold);
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let rule = GradeRule::standard(2).unwrap();
        let input = with_value(ideal_input(2), ScoringItem::ContactTime, 0.13);
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        let engine = ScoringEngine::default();
        let first = engine.score_at(&input, &rule, at).unwrap();
        let second = engine.score_at(&input, &rule, at).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    // ============================================================================
    // END TO END
    // ============================================================================

    #[test]
    fn test_review_required_grade_goes_to_reviewers() {
        let certifier = CertificationPipeline::new(Default::default(), GradeRuleSet::standard());
        let outcome = certifier
            .certify_input(&ideal_input(2), AttemptStatus::Draft, Utc::now())
            .unwrap();
        assert_eq!(outcome.status(), AttemptStatus::Submitted);
        assert!(!outcome.status().can_apply_certificate());

        let mode = outcome.transition.mode;
        let reviewing = transition(mode, outcome.status(), AttemptAction::StartReview).unwrap();
        let certified = transition(mode, reviewing, AttemptAction::CertifyPass).unwrap();
        assert!(certified.can_apply_certificate());
    }

    #[test]
    fn test_full_flow_from_landmarks_to_status() {
        let generated = synthetic_run(&SyntheticRun::with_steps(8));
        let request = AnalysisRequest::new(
            60.0,
            AthleteProfile {
                mass_kg: 70.0,
                height_m: Some(1.80),
            },
        )
        .with_splits(vec![0.0, 5.0, 10.0, 15.0, 20.0], vec![0.0, 1.2, 2.1, 2.9, 3.6]);
        let report = AnalysisPipeline::default().analyze(&generated.sequence, &request).unwrap();
        assert_eq!(report.steps.len(), 8);
        assert!((report.kinematics.contact_time_s - 0.1).abs() < 0.04);

        let outcome = CertificationPipeline::default()
            .certify(&report, 7, Vec::new(), AttemptStatus::Draft, Utc::now())
            .unwrap();
        let expected = if outcome.result.passed {
            AttemptStatus::AutoPass
        } else {
            AttemptStatus::AutoFail
        };
        assert_eq!(outcome.status(), expected);
        assert_eq!(outcome.audit.len(), 3);
    }
}
