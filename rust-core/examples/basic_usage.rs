/// Basic usage example: feed pose landmarks and split times, get a scored attempt
use std::f64::consts::PI;

use chrono::Utc;
use sprint_analysis::export::{AnalysisExport, CertificationExport};
use sprint_analysis::landmarks::{LegJoints, LANDMARK_COUNT};
use sprint_analysis::{
    AnalysisPipeline, AnalysisRequest, AthleteProfile, AttemptStatus, CertificationPipeline, Joint,
    LandmarkFrame, LandmarkSequence,
};

const STEPS: usize = 8;
const CONTACT_FRAMES: usize = 6;
const FLIGHT_FRAMES: usize = 6;
const LEAD_FRAMES: usize = 12;

fn main() -> sprint_analysis::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== Sprint Analysis Engine: Basic Example ===\n");

    let sequence = side_view_clip()?;
    println!("Built a {} frame clip at 60 fps", sequence.len());

    let request = AnalysisRequest::new(
        60.0,
        AthleteProfile {
            mass_kg: 70.0,
            height_m: Some(1.78),
        },
    )
    .with_splits(vec![0.0, 5.0, 10.0, 15.0, 20.0], vec![0.0, 1.2, 2.1, 2.9, 3.6]);

    let report = AnalysisPipeline::default().analyze(&sequence, &request)?;

    println!("\n--- Gait ---");
    println!("Steps detected: {}", report.steps.len());
    println!("Detection rate: {:.2}", report.detection_rate);
    for step in &report.steps {
        println!(
            "  #{:<2} {:?} contact {:.3}s flight {}",
            step.index,
            step.side,
            step.contact_time_s,
            step.flight_time_s.map_or("-".to_string(), |t| format!("{t:.3}s"))
        );
    }

    if let Some(profile) = &report.hfvp {
        println!("\n--- Force-velocity profile ---");
        println!("F0:   {:.1} N ({:.2} N/kg)", profile.f0_n, profile.f0_rel);
        println!("V0:   {:.2} m/s", profile.v0_mps);
        println!("Pmax: {:.0} W", profile.pmax_w);
        println!("Quality: {:?}", profile.quality);
    }

    let certification = CertificationPipeline::default();
    for grade in [8, 2] {
        let outcome = certification.certify(&report, grade, Vec::new(), AttemptStatus::Draft, Utc::now())?;
        println!("\n--- Grade {} ---", grade);
        println!(
            "Score {:.2}/{:.0} (pass at {:.0}) -> {}",
            outcome.result.total_score,
            outcome.result.max_score,
            outcome.result.pass_threshold,
            outcome.status().as_str()
        );
        println!("Audit entries: {}", outcome.audit.len());
        if grade == 8 {
            println!("\n{}", CertificationExport::from_outcome(&outcome).items_only_json()?);
        }
    }

    println!("\n=== Analysis export ===");
    println!("{}", AnalysisExport::from_report(&report).to_json()?);
    Ok(())
}

/// Alternating left/right contacts with half-sine swing arcs.
fn side_view_clip() -> sprint_analysis::Result<LandmarkSequence> {
    let period = CONTACT_FRAMES + FLIGHT_FRAMES;
    let frame_count = LEAD_FRAMES + STEPS * period;

    let mut sequence = LandmarkSequence::new();
    for f in 0..frame_count {
        let mut rows = vec![[0.5f32, 0.5, 0.0, 0.0]; LANDMARK_COUNT];
        for (foot, leg) in [LegJoints::LEFT, LegJoints::RIGHT].iter().enumerate() {
            let hx = if foot == 0 { 0.48 } else { 0.52 };
            let h = foot_lift(foot, f, period);
            rows[leg.hip.index()] = [hx as f32, 0.5, 0.0, 1.0];
            rows[leg.knee.index()] = [(hx + 0.02) as f32, (0.65 - h) as f32, 0.0, 1.0];
            rows[leg.ankle.index()] = [hx as f32, (0.80 - h) as f32, 0.0, 1.0];
            rows[leg.toe.index()] = [(hx + 0.03) as f32, (0.82 - h) as f32, 0.0, 1.0];
        }
        rows[Joint::LeftShoulder.index()] = [0.49, 0.3, 0.0, 1.0];
        rows[Joint::RightShoulder.index()] = [0.53, 0.3, 0.0, 1.0];
        sequence.push(LandmarkFrame::from_raw(&rows)?);
    }
    Ok(sequence)
}

fn foot_lift(foot: usize, f: usize, period: usize) -> f64 {
    if f < LEAD_FRAMES {
        return 0.0;
    }
    // Each foot lands every second period and swings for the rest.
    let phase = (f - LEAD_FRAMES + (foot * period)) % (2 * period);
    if phase <= CONTACT_FRAMES {
        return 0.0;
    }
    let swing = (2 * period - CONTACT_FRAMES) as f64;
    0.06 * (PI * (phase - CONTACT_FRAMES) as f64 / swing).sin()
}
