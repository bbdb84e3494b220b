//! Horizontal force-velocity profile (H-FVP) estimation.
//!
//! Turns split times at known distances into the sprint mechanical profile:
//! - Per-section speed, acceleration, horizontal force and power
//! - A linear force-velocity fit (optionally Huber-robust) over the
//!   accelerating sections only
//! - F0, V0, Pmax, τ, relative values and mechanical effectiveness (RF, DRF)
//! - Physical validity and a quality grade for certification
//!
//! Input invariants (monotonic splits, positive mass, at least three points)
//! are enforced when building `HfvpInput`. Everything after that degrades to
//! flags and warnings instead of errors.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, Result};
use crate::regression::{
    coefficient_of_determination, huber_fit, least_squares, outlier_indices, r_squared, HuberConfig,
    LinearFit,
};
use crate::types::{round_to, QualityGrade, StepMetric};

// ============================================================================
// INPUT
// ============================================================================

/// Validated split data: cumulative distances and times plus athlete mass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HfvpInput {
    distances_m: Vec<f64>,
    times_s: Vec<f64>,
    mass_kg: f64,
}

impl HfvpInput {
    pub const MIN_POINTS: usize = 3;

    /// Validate split data. Distances and times must be finite and strictly
    /// increasing, with at least three points, and mass must be positive.
    pub fn new(distances_m: Vec<f64>, times_s: Vec<f64>, mass_kg: f64) -> Result<Self> {
        if !(mass_kg.is_finite() && mass_kg > 0.0) {
            return Err(AnalysisError::InvalidMass(mass_kg));
        }
        if distances_m.len() != times_s.len() {
            return Err(AnalysisError::invalid_input(format!(
                "{} distances but {} times",
                distances_m.len(),
                times_s.len()
            )));
        }
        if distances_m.len() < Self::MIN_POINTS {
            return Err(AnalysisError::InsufficientPoints {
                needed: Self::MIN_POINTS,
                got: distances_m.len(),
            });
        }
        check_increasing("distances", &distances_m)?;
        check_increasing("times", &times_s)?;
        Ok(Self {
            distances_m,
            times_s,
            mass_kg,
        })
    }

    /// Build split data from steps located on the track: each contact gives
    /// one (time, distance) point, and the last step's next contact one more.
    pub fn from_step_metrics(steps: &[StepMetric], fps: f64, mass_kg: f64) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(AnalysisError::invalid_input(format!(
                "frame rate must be positive, got {fps}"
            )));
        }
        let located: Vec<(f64, f64)> = steps
            .iter()
            .filter_map(|s| s.contact_distance_m.map(|d| (s.contact_frame as f64 / fps, d)))
            .collect();
        if located.is_empty() {
            return Err(AnalysisError::invalid_input(
                "step metrics carry no track distances",
            ));
        }

        let first = located[0].1;
        let direction = match located.last() {
            Some((_, last)) if *last < first => -1.0,
            _ => 1.0,
        };
        let mut times = Vec::with_capacity(located.len() + 1);
        let mut distances = Vec::with_capacity(located.len() + 1);
        for (t, d) in &located {
            times.push(*t);
            distances.push((d - first) * direction);
        }
        if let Some(last) = steps.last() {
            if let (Some(next), Some(d), Some(stride)) = (
                last.next_contact_frame,
                last.contact_distance_m,
                last.stride_length_m,
            ) {
                times.push(next as f64 / fps);
                distances.push((d - first) * direction + stride);
            }
        }
        Self::new(distances, times, mass_kg)
    }

    pub fn distances_m(&self) -> &[f64] {
        &self.distances_m
    }

    pub fn times_s(&self) -> &[f64] {
        &self.times_s
    }

    pub fn mass_kg(&self) -> f64 {
        self.mass_kg
    }

    pub fn len(&self) -> usize {
        self.distances_m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances_m.is_empty()
    }
}

fn check_increasing(what: &'static str, values: &[f64]) -> Result<()> {
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(AnalysisError::invalid_input(format!(
            "{what} contain a non-finite value at index {index}"
        )));
    }
    match values.windows(2).position(|w| w[1] <= w[0]) {
        Some(i) => Err(AnalysisError::NonMonotonic { what, index: i + 1 }),
        None => Ok(()),
    }
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Line fitting method for the force-velocity relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionMethod {
    LeastSquares,
    #[default]
    Huber,
}

/// Quality grading bands for a fitted profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HfvpQualityThresholds {
    pub good_r_squared: f64,
    pub good_position_r_squared: f64,
    pub good_min_points: usize,
    pub acceptable_r_squared: f64,
    pub acceptable_position_r_squared: f64,
    pub acceptable_min_points: usize,
}

impl Default for HfvpQualityThresholds {
    fn default() -> Self {
        Self {
            good_r_squared: 0.90,
            good_position_r_squared: 0.92,
            good_min_points: 4,
            acceptable_r_squared: 0.60,
            acceptable_position_r_squared: 0.80,
            acceptable_min_points: 3,
        }
    }
}

/// Estimator options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HfvpOptions {
    pub method: RegressionMethod,
    pub huber: HuberConfig,
    /// Refit once without residuals beyond `outlier_sigma` robust scales.
    pub remove_outliers: bool,
    pub outlier_sigma: f64,
    /// Sections must accelerate by more than this to enter the fit (m/s²).
    pub accel_epsilon: f64,
    /// Allowed speed drop between consecutive fitted sections (m/s).
    pub speed_tolerance: f64,
    /// Slopes flatter than this are numerically meaningless.
    pub slope_epsilon: f64,
    pub gravity: f64,
    /// First model time sampled for mechanical effectiveness (s).
    pub rf_start_s: f64,
    pub rf_step_s: f64,
    /// Position-fit R² below this adds a warning.
    pub position_r_squared_warning: f64,
    pub quality: HfvpQualityThresholds,
}

impl Default for HfvpOptions {
    fn default() -> Self {
        Self {
            method: RegressionMethod::Huber,
            huber: HuberConfig::default(),
            remove_outliers: true,
            outlier_sigma: 2.5,
            accel_epsilon: 0.05,
            speed_tolerance: 0.05,
            slope_epsilon: 1e-6,
            gravity: 9.81,
            rf_start_s: 0.3,
            rf_step_s: 0.1,
            position_r_squared_warning: 0.85,
            quality: HfvpQualityThresholds::default(),
        }
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Kinematics and kinetics of one split section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HfvpSection {
    /// e.g. "10-15m".
    pub label: String,
    pub start_m: f64,
    pub end_m: f64,
    pub split_time_s: f64,
    /// Midpoint time of the section since the first marker.
    pub mid_time_s: f64,
    pub speed_mps: f64,
    pub acceleration_mps2: f64,
    pub force_n: f64,
    pub power_w: f64,
    /// Whether the section entered the final force-velocity fit.
    pub used: bool,
    /// Final regression weight, when used.
    pub weight: Option<f64>,
}

/// Estimated force-velocity-power profile.
///
/// When `is_physically_valid` is false, V0, Pmax and τ are not meaningful;
/// they are still reported (possibly NaN) and `warnings` says why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HfvpResult {
    /// Theoretical maximal horizontal force (N).
    pub f0_n: f64,
    /// Theoretical maximal velocity (m/s).
    pub v0_mps: f64,
    /// Maximal horizontal power, F0·V0/4 (W).
    pub pmax_w: f64,
    pub f0_rel: f64,
    pub pmax_rel: f64,
    /// Slope of the relative force-velocity line, F0_rel / -V0.
    pub sfv_rel: f64,
    /// Slope of the force-velocity line (N·s/m).
    pub slope: f64,
    /// Acceleration time constant (s).
    pub tau_s: f64,
    /// Maximal ratio of force, percent.
    pub rf_max: f64,
    /// Decrease in ratio of force, percent per m/s.
    pub drf: f64,
    pub r_squared: f64,
    pub position_r_squared: f64,
    pub used_sections: Vec<String>,
    pub excluded_sections: Vec<String>,
    pub sections: Vec<HfvpSection>,
    pub is_physically_valid: bool,
    pub quality: QualityGrade,
    pub method: RegressionMethod,
    pub mass_kg: f64,
    pub warnings: Vec<String>,
}

impl HfvpResult {
    /// Number of sections in the final fit.
    pub fn used_points(&self) -> usize {
        self.used_sections.len()
    }

    pub fn is_certifiable(&self) -> bool {
        self.is_physically_valid && self.quality.is_certifiable()
    }
}

// ============================================================================
// ESTIMATOR
// ============================================================================

/// H-FVP estimator.
#[derive(Debug, Clone, Default)]
pub struct HfvpEstimator {
    options: HfvpOptions,
}

/// Estimate a profile with the given options.
pub fn compute(input: &HfvpInput, options: &HfvpOptions) -> HfvpResult {
    HfvpEstimator::new(options.clone()).compute(input)
}

struct Sections {
    labels: Vec<String>,
    starts: Vec<f64>,
    ends: Vec<f64>,
    split: Vec<f64>,
    mid_time: Vec<f64>,
    speed: Vec<f64>,
    accel: Vec<f64>,
}

impl HfvpEstimator {
    pub fn new(options: HfvpOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &HfvpOptions {
        &self.options
    }

    pub fn compute(&self, input: &HfvpInput) -> HfvpResult {
        let opts = &self.options;
        let mass = input.mass_kg();
        let d0 = input.distances_m()[0];
        let t0 = input.times_s()[0];
        let d: Vec<f64> = input.distances_m().iter().map(|v| v - d0).collect();
        let t: Vec<f64> = input.times_s().iter().map(|v| v - t0).collect();
        let mut warnings = Vec::new();

        let sections = section_kinematics(input.distances_m(), &d, &t);
        let n = sections.speed.len();
        let force: Vec<f64> = sections.accel.iter().map(|a| mass * a).collect();

        // Accelerating phase only
        let peak = (0..n).fold(0, |best, i| if sections.speed[i] > sections.speed[best] { i } else { best });
        let mut used: Vec<usize> = (0..n)
            .filter(|&i| {
                sections.accel[i] > opts.accel_epsilon
                    && (i == 0 || sections.speed[i] >= sections.speed[i - 1] - opts.speed_tolerance)
                    && i <= peak
            })
            .collect();
        if used.len() < 3 {
            warnings.push(format!(
                "only {} accelerating section(s); fit uses all {} sections (low confidence)",
                used.len(),
                n
            ));
            used = (0..n).collect();
        }

        let mut fit = self.fit(&used, &sections.speed, &force);
        if opts.remove_outliers {
            if let Some(current) = &fit {
                let (x, y) = select(&used, &sections.speed, &force);
                let outliers = outlier_indices(current, &x, &y, opts.outlier_sigma);
                if !outliers.is_empty() && used.len() - outliers.len() >= 3 {
                    let kept: Vec<usize> = used
                        .iter()
                        .enumerate()
                        .filter(|(k, _)| !outliers.contains(k))
                        .map(|(_, i)| *i)
                        .collect();
                    if let Some(refit) = self.fit(&kept, &sections.speed, &force) {
                        warnings.push(format!("removed {} outlier section(s)", outliers.len()));
                        used = kept;
                        fit = Some(refit);
                    }
                }
            }
        }

        let (f0, slope, r2, weights) = match &fit {
            Some(fit) => {
                let (x, y) = select(&used, &sections.speed, &force);
                (fit.intercept, fit.slope, r_squared(fit, &x, &y), fit.weights.clone())
            }
            None => {
                warnings.push("force-velocity regression is degenerate (no speed spread)".to_string());
                (f64::NAN, f64::NAN, f64::NAN, vec![f64::NAN; used.len()])
            }
        };

        let slope_usable = slope < 0.0 && slope.abs() > opts.slope_epsilon;
        let v0 = if slope_usable { -f0 / slope } else { f64::NAN };
        let pmax = f0 * v0 / 4.0;
        let tau = v0 / (f0 / mass);

        let mut is_valid = true;
        if !slope_usable {
            is_valid = false;
            warnings.push(format!(
                "force-velocity slope {slope:.3} is not negative; profile is not physically valid"
            ));
        }
        for (name, value) in [("F0", f0), ("V0", v0), ("Pmax", pmax)] {
            if !(value.is_finite() && value > 0.0) {
                if is_valid {
                    warnings.push(format!("{name} is not a finite positive value; profile is not physically valid"));
                }
                is_valid = false;
            }
        }

        let position_r2 = position_r_squared(&d, &t, v0, tau);
        if !(position_r2 >= opts.position_r_squared_warning) {
            warnings.push(format!(
                "position fit R² {position_r2:.3} below {:.2}",
                opts.position_r_squared_warning
            ));
        }

        let (rf_max, drf) = if is_valid {
            mechanical_effectiveness(f0, v0, tau, mass, t[t.len() - 1], opts)
        } else {
            (f64::NAN, f64::NAN)
        };
        if is_valid && drf.is_nan() {
            warnings.push("run too short to estimate the ratio of force".to_string());
        }

        let quality = self.grade(is_valid, r2, position_r2, used.len());
        if quality == QualityGrade::ReferenceOnly {
            warn!(r2, position_r2, used = used.len(), valid = is_valid, "H-FVP is reference-only");
        }

        let mut out_sections = Vec::with_capacity(n);
        for i in 0..n {
            let slot = used.iter().position(|u| *u == i);
            out_sections.push(HfvpSection {
                label: sections.labels[i].clone(),
                start_m: sections.starts[i],
                end_m: sections.ends[i],
                split_time_s: round_to(sections.split[i], 3),
                mid_time_s: round_to(sections.mid_time[i], 3),
                speed_mps: round_to(sections.speed[i], 3),
                acceleration_mps2: round_to(sections.accel[i], 3),
                force_n: round_to(force[i], 1),
                power_w: round_to(force[i] * sections.speed[i], 1),
                used: slot.is_some(),
                weight: slot.and_then(|k| weights.get(k)).map(|w| round_to(*w, 3)),
            });
        }

        let result = HfvpResult {
            f0_n: round_to(f0, 1),
            v0_mps: round_to(v0, 3),
            pmax_w: round_to(pmax, 1),
            f0_rel: round_to(f0 / mass, 2),
            pmax_rel: round_to(pmax / mass, 2),
            sfv_rel: round_to(-(f0 / mass) / v0, 2),
            slope: round_to(slope, 2),
            tau_s: round_to(tau, 3),
            rf_max: round_to(rf_max, 2),
            drf: round_to(drf, 3),
            r_squared: round_to(r2, 3),
            position_r_squared: round_to(position_r2, 3),
            used_sections: used.iter().map(|i| sections.labels[*i].clone()).collect(),
            excluded_sections: (0..n)
                .filter(|i| !used.contains(i))
                .map(|i| sections.labels[i].clone())
                .collect(),
            sections: out_sections,
            is_physically_valid: is_valid,
            quality,
            method: opts.method,
            mass_kg: mass,
            warnings,
        };
        info!(
            f0 = result.f0_n,
            v0 = result.v0_mps,
            pmax = result.pmax_w,
            quality = result.quality.as_str(),
            "H-FVP computed"
        );
        result
    }

    fn fit(&self, used: &[usize], speed: &[f64], force: &[f64]) -> Option<LinearFit> {
        let (x, y) = select(used, speed, force);
        match self.options.method {
            RegressionMethod::LeastSquares => least_squares(&x, &y),
            RegressionMethod::Huber => huber_fit(&x, &y, &self.options.huber),
        }
    }

    fn grade(&self, valid: bool, r2: f64, position_r2: f64, used: usize) -> QualityGrade {
        let q = &self.options.quality;
        if valid && r2 >= q.good_r_squared && position_r2 >= q.good_position_r_squared && used >= q.good_min_points {
            QualityGrade::Good
        } else if valid
            && r2 >= q.acceptable_r_squared
            && position_r2 >= q.acceptable_position_r_squared
            && used >= q.acceptable_min_points
        {
            QualityGrade::Acceptable
        } else {
            QualityGrade::ReferenceOnly
        }
    }
}

fn select(indices: &[usize], x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    indices.iter().map(|&i| (x[i], y[i])).unzip()
}

/// Split time, mean speed and acceleration per section.
///
/// The first section assumes a start from rest (`a = 2d/t²`); interior
/// sections use centered differences of neighbouring section speeds; the last
/// section a backward difference.
fn section_kinematics(raw_distances: &[f64], d: &[f64], t: &[f64]) -> Sections {
    let n = d.len() - 1;
    let mut s = Sections {
        labels: Vec::with_capacity(n),
        starts: Vec::with_capacity(n),
        ends: Vec::with_capacity(n),
        split: Vec::with_capacity(n),
        mid_time: Vec::with_capacity(n),
        speed: Vec::with_capacity(n),
        accel: Vec::with_capacity(n),
    };
    for i in 1..=n {
        let dt = t[i] - t[i - 1];
        s.labels.push(format!("{}-{}m", raw_distances[i - 1], raw_distances[i]));
        s.starts.push(raw_distances[i - 1]);
        s.ends.push(raw_distances[i]);
        s.split.push(dt);
        s.speed.push((d[i] - d[i - 1]) / dt);
        s.mid_time.push((t[i] + t[i - 1]) / 2.0);
    }
    for i in 0..n {
        let a = if i == 0 {
            2.0 * d[1] / (t[1] * t[1])
        } else if i < n - 1 {
            (s.speed[i + 1] - s.speed[i - 1]) / (s.mid_time[i + 1] - s.mid_time[i - 1])
        } else {
            (s.speed[i] - s.speed[i - 1]) / (s.mid_time[i] - s.mid_time[i - 1])
        };
        s.accel.push(a);
    }
    s
}

/// R² of measured distances against `d(t) = V0·(t + τ·(e^(-t/τ) - 1))`.
fn position_r_squared(d: &[f64], t: &[f64], v0: f64, tau: f64) -> f64 {
    if !(v0.is_finite() && tau.is_finite() && tau > 0.0) {
        return f64::NAN;
    }
    let predicted: Vec<f64> = t
        .iter()
        .map(|ti| v0 * (ti + tau * ((-ti / tau).exp() - 1.0)))
        .collect();
    coefficient_of_determination(d, &predicted)
}

/// Maximal ratio of force (%) and its decrease with speed (DRF, %·s/m),
/// sampled from the fitted model between `rf_start_s` and `final_time_s`.
fn mechanical_effectiveness(
    f0: f64,
    v0: f64,
    tau: f64,
    mass: f64,
    final_time_s: f64,
    opts: &HfvpOptions,
) -> (f64, f64) {
    let weight = mass * opts.gravity;
    let mut speeds = Vec::new();
    let mut ratios = Vec::new();
    let mut k = 0;
    loop {
        let t = opts.rf_start_s + k as f64 * opts.rf_step_s;
        if t > final_time_s + 1e-9 || k > 10_000 {
            break;
        }
        let horizontal = f0 * (-t / tau).exp();
        let rf = horizontal / (horizontal * horizontal + weight * weight).sqrt();
        speeds.push(v0 * (1.0 - (-t / tau).exp()));
        ratios.push(rf * 100.0);
        k += 1;
    }
    let rf_max = ratios.iter().copied().fold(f64::NAN, f64::max);
    let drf = least_squares(&speeds, &ratios).map_or(f64::NAN, |fit| fit.slope);
    debug!(samples = ratios.len(), rf_max, drf, "mechanical effectiveness");
    (rf_max, drf)
}
