//! # Peak Extraction
//!
//! Constrained local-maximum search over a [`Spectrum`]. A peak survives only
//! when it satisfies the distance, prominence and width constraints together;
//! the strongest `max_peaks` survivors are returned in ascending frequency.

use crate::{config::AnalysisConfig, fft::Spectrum};

/// A spectral peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Index of the spectrum bin the peak was drawn from.
    pub bin: usize,
    /// Frequency in Hz.
    pub frequency: f64,
    pub amplitude: f64,
    /// Gaussian width (σ) in Hz, known only after refinement.
    pub width: Option<f64>,
}

/// Strict local maxima; the midpoint of a flat top counts as its position.
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Drops peaks closer than `distance` bins to a higher one, highest first.
fn select_by_distance(x: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    let mut keep = vec![true; peaks.len()];
    let mut by_priority: Vec<usize> = (0..peaks.len()).collect();
    by_priority.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    for &j in by_priority.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, kept)| kept.then_some(p))
        .collect()
}

/// Prominence of a peak together with its left and right bases.
fn prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let height = x[peak];

    let mut left_min = height;
    let mut left_base = peak;
    let mut i = peak as isize;
    while i >= 0 && x[i as usize] <= height {
        if x[i as usize] < left_min {
            left_min = x[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let mut right_min = height;
    let mut right_base = peak;
    let mut i = peak;
    while i < x.len() && x[i] <= height {
        if x[i] < right_min {
            right_min = x[i];
            right_base = i;
        }
        i += 1;
    }

    (height - left_min.max(right_min), left_base, right_base)
}

/// Width in bins at half the prominence, linearly interpolated.
fn half_prominence_width(x: &[f64], peak: usize, prom: f64, left_base: usize, right_base: usize) -> f64 {
    let height = x[peak] - 0.5 * prom;

    let mut i = peak;
    while left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left = i as f64;
    if x[i] < height {
        left += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && height < x[i] {
        i += 1;
    }
    let mut right = i as f64;
    if x[i] < height {
        right -= (height - x[i]) / (x[i - 1] - x[i]);
    }

    right - left
}

/// Extracts at most `config.max_peaks` peaks, ascending in frequency.
///
/// The prominence threshold is `noise_level` times the mean amplitude of the
/// whole spectrum. An empty result is a normal outcome.
pub fn extract_peaks(spectrum: &Spectrum, config: &AnalysisConfig) -> Vec<Peak> {
    let x = spectrum.amplitudes();
    let threshold = config.noise_level * spectrum.mean_amplitude();
    let (min_width, max_width) = config.peak_width;

    let candidates = local_maxima(x);
    let candidates = select_by_distance(x, &candidates, config.peak_distance);

    let mut peaks: Vec<Peak> = candidates
        .into_iter()
        .filter_map(|bin| {
            let (prom, left_base, right_base) = prominence(x, bin);
            if prom <= 0.0 || prom < threshold {
                return None;
            }
            let width = half_prominence_width(x, bin, prom, left_base, right_base);
            (min_width..=max_width).contains(&width).then(|| Peak {
                bin,
                frequency: spectrum.frequencies()[bin],
                amplitude: x[bin],
                width: None,
            })
        })
        .collect();

    if peaks.len() > config.max_peaks {
        peaks.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));
        peaks.truncate(config.max_peaks);
    }
    peaks.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
    peaks
}

/// The peak with the highest amplitude.
pub fn strongest(peaks: &[Peak]) -> Option<&Peak> {
    peaks.iter().max_by(|a, b| a.amplitude.total_cmp(&b.amplitude))
}
