//! Series utilities for landmark signals.
//!
//! This module provides the low-level processing every detector shares:
//! - Gap filling of low-visibility samples by linear interpolation
//! - Centered moving-average smoothing
//! - Finite-difference derivatives at a known frame rate
//! - Order statistics (percentile, median, MAD scale) and running statistics
//!
//! All functions are pure and operate on whole series. Pose signals are
//! short (hundreds of frames), so batch processing keeps the detectors simple.

use serde::{Deserialize, Serialize};

/// Parameters for preparing a raw landmark series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    /// Samples below this visibility are treated as missing.
    /// Range: [0.0, 1.0]. Typical: 0.5.
    pub visibility_threshold: f64,

    /// Minimum fraction of valid samples for the series to be usable.
    /// Below this, interpolation would invent most of the signal.
    pub min_valid_fraction: f64,

    /// Moving-average window in frames (odd, centered). 1 disables smoothing.
    pub smoothing_window: usize,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: 0.5,
            min_valid_fraction: 0.5,
            smoothing_window: 3,
        }
    }
}

/// Replace low-visibility samples by linear interpolation between the nearest
/// valid neighbours. Leading and trailing gaps hold the nearest valid value.
///
/// Returns `None` when fewer than `min_valid_fraction` of the samples (and
/// fewer than two) are valid.
pub fn interpolate_gaps(
    values: &[f64],
    visibility: &[f64],
    threshold: f64,
    min_valid_fraction: f64,
) -> Option<Vec<f64>> {
    let n = values.len().min(visibility.len());
    let valid: Vec<usize> = (0..n)
        .filter(|&i| visibility[i] >= threshold && values[i].is_finite())
        .collect();
    let required = ((n as f64 * min_valid_fraction).floor() as usize).max(2);
    if valid.len() < required {
        return None;
    }

    let mut out = values[..n].to_vec();
    // Leading gap
    for slot in out.iter_mut().take(valid[0]) {
        *slot = values[valid[0]];
    }
    // Interior gaps
    for pair in valid.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (va, vb) = (values[a], values[b]);
        for (i, slot) in out.iter_mut().enumerate().take(b).skip(a + 1) {
            let t = (i - a) as f64 / (b - a) as f64;
            *slot = va + (vb - va) * t;
        }
    }
    // Trailing gap
    let last = valid[valid.len() - 1];
    for slot in out.iter_mut().skip(last + 1) {
        *slot = values[last];
    }
    Some(out)
}

/// Centered moving average. The window is truncated at the series edges.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if window <= 1 || n == 0 {
        return values.to_vec();
    }
    let half = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            values[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

/// Time derivative at `fps` samples per second: central differences inside,
/// one-sided differences at the ends.
pub fn central_difference(values: &[f64], fps: f64) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| {
            if i == 0 {
                (values[1] - values[0]) * fps
            } else if i == n - 1 {
                (values[n - 1] - values[n - 2]) * fps
            } else {
                (values[i + 1] - values[i - 1]) / 2.0 * fps
            }
        })
        .collect()
}

/// Nearest-rank percentile, `p` in [0, 1]. NaN for an empty series.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = (p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx]
}

/// Median. NaN for an empty series.
pub fn median(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Robust scale estimate: 1.4826 × median absolute deviation.
pub fn mad_scale(values: &[f64]) -> f64 {
    let m = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    1.4826 * median(&deviations)
}

/// Arithmetic mean. NaN for an empty series.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Incremental mean/variance/min/max tracker.
///
/// Uses Welford's incremental variance algorithm for numerical stability.
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the samples seen, NaN before the first sample.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.m2 / (self.count as f64 - 1.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.max
        }
    }
}
