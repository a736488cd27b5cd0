//! RT signal pipeline
//!
//! Reduces a game's reaction-time stream to spectral features:
//! outlier handling → robust imputation → linear detrend → Hann window →
//! radix-2 FFT → band-power fractions.
//!
//! Nothing in this module fails. Degenerate inputs (no valid RTs, empty or
//! constant series, zero spectral power) produce zero-valued output.

use crate::types::SpectralFeatures;
use std::f64::consts::PI;

/// RTs below this are anticipatory non-responses
pub const DEFAULT_MIN_RT_MS: f64 = 150.0;

/// RTs above this are winsorized down to it
pub const DEFAULT_MAX_RT_MS: f64 = 3000.0;

/// Consistency constant making MAD comparable to a standard deviation
const MAD_SCALE: f64 = 1.4826;

/// Misses are imputed this many scaled MADs above the median
const IMPUTE_MADS: f64 = 2.0;

/// Spectral bands as (exclusive lower, inclusive upper) bounds in Hz
const LOW_BAND: (f64, f64) = (0.01, 0.05);
const MID_BAND: (f64, f64) = (0.05, 0.10);
const HIGH_BAND: (f64, f64) = (0.10, 0.25);

/// Clean, impute, detrend and window a raw RT list
///
/// `None` entries are misses. Output has the same length as the input.
pub fn preprocess_rt(raw: &[Option<f64>], min_rt: f64, max_rt: f64) -> Vec<f64> {
    let cleaned = clean_rt(raw, min_rt, max_rt);
    let valid: Vec<f64> = cleaned.iter().flatten().copied().collect();

    if valid.is_empty() {
        tracing::debug!(len = raw.len(), "no valid RTs; returning zero series");
        return vec![0.0; raw.len()];
    }

    let imputed = impute_misses(&cleaned, &valid);
    let mut series = linear_detrend(&imputed);
    apply_hann_window(&mut series);
    series
}

/// Step 1: drop anticipations, winsorize slow responses, keep misses as `None`
pub fn clean_rt(raw: &[Option<f64>], min_rt: f64, max_rt: f64) -> Vec<Option<f64>> {
    raw.iter()
        .map(|entry| match *entry {
            Some(v) if v.is_nan() => None,
            Some(v) if v < min_rt => None,
            Some(v) if v > max_rt => Some(max_rt),
            other => other,
        })
        .collect()
}

/// Replace every miss with `median + 2 * 1.4826 * MAD` of the valid values
fn impute_misses(cleaned: &[Option<f64>], valid: &[f64]) -> Vec<f64> {
    let center = median(valid);
    let spread = mad(valid, center);
    let imputed = center + IMPUTE_MADS * MAD_SCALE * spread;
    cleaned.iter().map(|v| v.unwrap_or(imputed)).collect()
}

/// Median of a slice (0 for an empty slice)
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation around `center`
pub fn mad(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Subtract the ordinary-least-squares line `y = slope * i + intercept`
pub fn linear_detrend(series: &[f64]) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }

    let mean_y = series.iter().sum::<f64>() / n as f64;
    if n == 1 {
        return vec![series[0] - mean_y];
    }

    let mean_i = (n - 1) as f64 / 2.0;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in series.iter().enumerate() {
        let di = i as f64 - mean_i;
        num += di * (y - mean_y);
        den += di * di;
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };
    let intercept = mean_y - slope * mean_i;

    series
        .iter()
        .enumerate()
        .map(|(i, y)| y - (slope * i as f64 + intercept))
        .collect()
}

/// Multiply in place by `0.5 * (1 - cos(2πi / (n - 1)))`
pub fn apply_hann_window(series: &mut [f64]) {
    let n = series.len();
    if n < 2 {
        return;
    }
    let denom = (n - 1) as f64;
    for (i, x) in series.iter_mut().enumerate() {
        *x *= 0.5 * (1.0 - (2.0 * PI * i as f64 / denom).cos());
    }
}

/// Iterative radix-2 Cooley–Tukey FFT, in place
///
/// Both slices must share a power-of-two length; other lengths are left untouched.
pub fn fft_in_place(re: &mut [f64], im: &mut [f64]) {
    let n = re.len();
    if n <= 1 || im.len() != n || !n.is_power_of_two() {
        return;
    }

    // Bit-reversal permutation
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let step = -2.0 * PI / size as f64;
        for start in (0..n).step_by(size) {
            for k in 0..half {
                let (wi, wr) = (step * k as f64).sin_cos();
                let a = start + k;
                let b = a + half;
                let tr = wr * re[b] - wi * im[b];
                let ti = wr * im[b] + wi * re[b];
                re[b] = re[a] - tr;
                im[b] = im[a] - ti;
                re[a] += tr;
                im[a] += ti;
            }
        }
        size <<= 1;
    }
}

/// Band-power features of a preprocessed series sampled once per `cycle_ms`
pub fn extract_features(series: &[f64], cycle_ms: f64) -> SpectralFeatures {
    if series.is_empty() || !cycle_ms.is_finite() || cycle_ms <= 0.0 {
        return SpectralFeatures::zero();
    }

    let n = series.len().next_power_of_two();
    let mut re = vec![0.0; n];
    let mut im = vec![0.0; n];
    re[..series.len()].copy_from_slice(series);
    fft_in_place(&mut re, &mut im);

    let fs = 1000.0 / cycle_ms;
    let df = fs / n as f64;

    let mut total_power = 0.0;
    let mut low = 0.0;
    let mut mid = 0.0;
    let mut high = 0.0;
    let mut peak_power = 0.0;
    let mut fpeak = 0.0;
    let mut powers = Vec::with_capacity(n / 2);

    for i in 1..(n / 2) {
        let freq = i as f64 * df;
        let power = (re[i] * re[i] + im[i] * im[i]) / n as f64;
        powers.push(power);
        total_power += power;

        if power > peak_power {
            peak_power = power;
            fpeak = freq;
        }

        if in_band(freq, LOW_BAND) {
            low += power;
        } else if in_band(freq, MID_BAND) {
            mid += power;
        } else if in_band(freq, HIGH_BAND) {
            high += power;
        }
    }

    if total_power == 0.0 || !total_power.is_finite() {
        return SpectralFeatures::zero();
    }

    // Kept as the first detrended power value for compatibility with stored results;
    // it is not a fitted spectral slope.
    let slope = linear_detrend(&powers).first().copied().unwrap_or(0.0);

    SpectralFeatures {
        r_l: low / total_power,
        r_m: mid / total_power,
        r_h: high / total_power,
        fpeak,
        slope,
    }
}

/// Full pipeline with default RT bounds
pub fn analyze_rt(raw: &[Option<f64>], cycle_ms: f64) -> SpectralFeatures {
    let series = preprocess_rt(raw, DEFAULT_MIN_RT_MS, DEFAULT_MAX_RT_MS);
    extract_features(&series, cycle_ms)
}

fn in_band(freq: f64, (lo, hi): (f64, f64)) -> bool {
    freq > lo && freq <= hi
}
