//! # Spectral Preprocessing
//!
//! Turns one window of raw samples into the smoothed, high-pass shaped
//! magnitude spectrum that every later stage reads.
//!
//! ## Stages
//! 1. DC offset removal
//! 2. Hann windowing against spectral leakage, over the real samples only;
//!    a short buffer is zero padded after windowing
//! 3. Magnitude of the real-input FFT (bins `0..=N/2`)
//! 4. Convolution with a 31-tap Gaussian kernel
//! 5. Multiplication by the magnitude response of an analog Butterworth high-pass
//!
//! The smoothing broadens every line by roughly [`SMOOTHING_BROADENING`] bins'
//! worth of resolution at the default σ of 2 bins; [`smoothing_broadening`]
//! scales that for other σ. Peak widths downstream must be read with that in
//! mind.

use rustfft::{FftPlanner, num_complex::Complex};
use tracing::debug;

use crate::config::AnalysisConfig;

/// Length of the Gaussian smoothing kernel.
pub const SMOOTHING_KERNEL_LEN: usize = 31;

/// Resolution degradation caused by the Gaussian smoothing at σ = 2 bins.
pub const SMOOTHING_BROADENING: f64 = 2.62;

const REFERENCE_SIGMA: f64 = 2.0;

/// FWHM of the Hann main lobe, in bins.
const HANN_FWHM_BINS: f64 = 1.44;

const FWHM_PER_SIGMA: f64 = 2.354_820_045;

/// Broadening factor for a smoothing kernel of `sigma` bins.
///
/// Line widths add in quadrature (Hann lobe and Gaussian kernel), scaled so
/// that σ = 2 gives exactly [`SMOOTHING_BROADENING`].
pub fn smoothing_broadening(sigma: f64) -> f64 {
    let width = |s: f64| (HANN_FWHM_BINS.powi(2) + (FWHM_PER_SIGMA * s).powi(2)).sqrt();
    SMOOTHING_BROADENING * width(sigma) / width(REFERENCE_SIGMA)
}

/// A magnitude spectrum with its frequency axis.
///
/// `frequencies` is strictly increasing and has the same length as
/// `amplitudes`; both are fixed once the spectrum is built. Only the empty
/// spectrum of a degenerate round may have a zero bin width.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    frequencies: Vec<f64>,
    amplitudes: Vec<f64>,
    bin_width: f64,
    broadening: f64,
}

impl Spectrum {
    /// Builds a spectrum from amplitudes sampled every `bin_width` Hz from 0 Hz,
    /// assuming the default smoothing.
    ///
    /// `bin_width` must be positive unless `amplitudes` is empty.
    pub fn from_amplitudes(amplitudes: Vec<f64>, bin_width: f64) -> Self {
        debug_assert!(
            amplitudes.is_empty() || bin_width > 0.0,
            "non-empty spectrum needs a positive bin width, got {bin_width}"
        );
        let frequencies = (0..amplitudes.len())
            .map(|k| k as f64 * bin_width)
            .collect();
        Self {
            frequencies,
            amplitudes,
            bin_width,
            broadening: SMOOTHING_BROADENING,
        }
    }

    /// Records the σ (in bins) the amplitudes were smoothed with.
    pub fn with_smoothing_sigma(mut self, sigma: f64) -> Self {
        self.broadening = smoothing_broadening(sigma);
        self
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitudes.is_empty()
    }

    /// Frequency spacing between neighbouring bins, in Hz.
    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// Bin width corrected for the smoothing broadening.
    pub fn effective_resolution(&self) -> f64 {
        self.bin_width * self.broadening
    }

    pub fn max_amplitude(&self) -> f64 {
        self.amplitudes.iter().cloned().fold(0.0, f64::max)
    }

    pub fn mean_amplitude(&self) -> f64 {
        if self.amplitudes.is_empty() {
            return 0.0;
        }
        self.amplitudes.iter().sum::<f64>() / self.amplitudes.len() as f64
    }
}

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f64]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f64>() / len as f64;
    if avg.abs() > 1e-9 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window to the input buffer to reduce spectral leakage.
fn apply_hann_window(buffer: &mut [f64]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f64;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Magnitudes of the non-negative frequency half of the real-input FFT.
fn real_fft_magnitudes(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);

    let mut buffer: Vec<Complex<f64>> = signal
        .iter()
        .map(|&sample| Complex { re: sample, im: 0.0 })
        .collect();
    fft.process(&mut buffer);

    buffer.iter().take(n / 2 + 1).map(|c| c.norm()).collect()
}

/// Unnormalised Gaussian window with peak value 1 at the centre tap.
pub fn gaussian_kernel(len: usize, sigma: f64) -> Vec<f64> {
    let centre = (len as f64 - 1.0) / 2.0;
    (0..len)
        .map(|i| {
            let z = (i as f64 - centre) / sigma;
            (-0.5 * z * z).exp()
        })
        .collect()
}

/// Convolution returning an output the same length as `signal`, centred on it.
fn convolve_same(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = signal.len();
    let half = kernel.len() / 2;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(j, &k)| {
                    let idx = (i + half).checked_sub(j)?;
                    signal.get(idx).map(|&s| s * k)
                })
                .sum()
        })
        .collect()
}

/// Magnitude response of an analog Butterworth high-pass filter.
pub fn butterworth_highpass_gain(frequency: f64, cutoff: f64, order: u32) -> f64 {
    if cutoff <= 0.0 {
        return 1.0;
    }
    if frequency <= 0.0 {
        return 0.0;
    }
    let ratio = (cutoff / frequency).powi(2 * order as i32);
    1.0 / (1.0 + ratio).sqrt()
}

/// Builds the windowed FFT input: the most recent `window_size` samples,
/// DC-free and Hann windowed over their own length, then zero padded.
fn prepare_window(samples: &[i16], window_size: usize) -> Vec<f64> {
    let start = samples.len().saturating_sub(window_size);
    let mut signal: Vec<f64> = samples[start..].iter().map(|&s| s as f64).collect();
    remove_dc_offset(&mut signal);
    apply_hann_window(&mut signal);
    signal.resize(window_size, 0.0);
    signal
}

/// Runs the full preprocessing chain on one window of samples.
///
/// Deterministic and free of side effects; a silent buffer yields an
/// all-zero spectrum of the usual length.
pub fn preprocess(samples: &[i16], sample_rate: u32, config: &AnalysisConfig) -> Spectrum {
    let signal = prepare_window(samples, config.window_size);
    let raw = real_fft_magnitudes(&signal);
    let kernel = gaussian_kernel(SMOOTHING_KERNEL_LEN, config.smoothing_sigma);
    let smoothed = convolve_same(&raw, &kernel);

    let bin_width = sample_rate as f64 / config.window_size as f64;
    let shaped = smoothed
        .into_iter()
        .enumerate()
        .map(|(k, amp)| {
            amp * butterworth_highpass_gain(
                k as f64 * bin_width,
                config.highpass_cutoff,
                config.highpass_order,
            )
        })
        .collect();

    debug!(
        bins = config.window_size / 2 + 1,
        bin_width,
        effective_resolution = bin_width * smoothing_broadening(config.smoothing_sigma),
        "spectrum ready"
    );
    Spectrum::from_amplitudes(shaped, bin_width).with_smoothing_sigma(config.smoothing_sigma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f64, sample_rate: u32, len: usize, amplitude: f64) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn silent_buffer_gives_flat_zero_spectrum() {
        let config = AnalysisConfig::default();
        let spectrum = preprocess(&vec![0i16; 4096], 44100, &config);
        assert_eq!(spectrum.len(), config.window_size / 2 + 1);
        assert_eq!(spectrum.max_amplitude(), 0.0);
    }

    #[test]
    fn frequency_axis_is_strictly_increasing() {
        let config = AnalysisConfig {
            window_size: 1024,
            ..Default::default()
        };
        let spectrum = preprocess(&sine(1000.0, 8000, 1024, 1000.0), 8000, &config);
        assert!(
            spectrum
                .frequencies()
                .windows(2)
                .all(|w| w[1] > w[0])
        );
        assert_abs_diff_eq!(spectrum.bin_width(), 8000.0 / 1024.0);
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let config = AnalysisConfig {
            window_size: 4096,
            ..Default::default()
        };
        let sample_rate = 44100;
        let spectrum = preprocess(&sine(1000.0, sample_rate, 4096, 8000.0), sample_rate, &config);
        let (peak_bin, _) = spectrum
            .amplitudes()
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        let expected = (1000.0 / spectrum.bin_width()).round() as usize;
        assert!(peak_bin.abs_diff(expected) <= 1, "peak at bin {peak_bin}, expected {expected}");
    }

    #[test]
    fn highpass_gain_matches_butterworth_shape() {
        assert_eq!(butterworth_highpass_gain(0.0, 100.0, 2), 0.0);
        assert_abs_diff_eq!(
            butterworth_highpass_gain(100.0, 100.0, 2),
            std::f64::consts::FRAC_1_SQRT_2,
            epsilon = 1e-12
        );
        assert!(butterworth_highpass_gain(10_000.0, 100.0, 2) > 0.999);
        assert!(butterworth_highpass_gain(50.0, 100.0, 4) < butterworth_highpass_gain(50.0, 100.0, 2));
    }

    #[test]
    fn convolution_preserves_length_and_centre() {
        let mut impulse = vec![0.0; 41];
        impulse[20] = 1.0;
        let kernel = gaussian_kernel(SMOOTHING_KERNEL_LEN, 2.0);
        let out = convolve_same(&impulse, &kernel);
        assert_eq!(out.len(), impulse.len());
        assert_abs_diff_eq!(out[20], 1.0);
        assert_abs_diff_eq!(out[18], out[22]);
    }

    #[test]
    fn long_buffer_uses_most_recent_samples() {
        let samples: Vec<i16> = vec![0, 0, 0, 0, 5, 7, 7, 5];
        let window = prepare_window(&samples, 4);
        assert_eq!(window.len(), 4);
        // Hann endpoints are zero; the DC of the kept samples is removed first.
        assert_abs_diff_eq!(window[0], 0.0);
        assert_abs_diff_eq!(window[1], 0.75 * 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(window[2], 0.75 * 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(window[3], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn short_buffer_is_windowed_before_padding() {
        let window = prepare_window(&[3, 5, 7, 5, 3], 8);
        assert_eq!(window.len(), 8);
        assert_eq!(&window[5..], &[0.0, 0.0, 0.0]);
        // Hann over the 5 real samples: zero at both of their ends, peak in the middle.
        assert_abs_diff_eq!(window[0], 0.0);
        assert_abs_diff_eq!(window[4], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(window[2], 7.0 - 4.6, epsilon = 1e-12);
    }

    /// Magnitude `offset` Hz above the strongest bin, relative to that bin.
    fn relative_leakage(magnitudes: &[f64], bin_width: f64, offset: f64) -> f64 {
        let (peak_bin, peak) = magnitudes
            .iter()
            .cloned()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap();
        let far = peak_bin + (offset / bin_width).round() as usize;
        magnitudes[far] / peak
    }

    #[test]
    fn zero_padding_does_not_bring_back_leakage() {
        let sample_rate = 44100;
        let samples = sine(1000.3, sample_rate, 16384, 8000.0);

        let padded = real_fft_magnitudes(&prepare_window(&samples, 32768));
        let own_length = real_fft_magnitudes(&prepare_window(&samples, 16384));
        let padded_leak = relative_leakage(&padded, sample_rate as f64 / 32768.0, 300.0);
        let own_leak = relative_leakage(&own_length, sample_rate as f64 / 16384.0, 300.0);

        assert!(own_leak < 1e-4, "own length leakage {own_leak:e}");
        assert!(padded_leak < 1e-4, "padded leakage {padded_leak:e}");
    }

    #[test]
    fn broadening_follows_smoothing_sigma() {
        assert_abs_diff_eq!(smoothing_broadening(2.0), SMOOTHING_BROADENING, epsilon = 1e-12);
        assert!(smoothing_broadening(1.0) < SMOOTHING_BROADENING);
        assert!(smoothing_broadening(4.0) > SMOOTHING_BROADENING);

        let samples = sine(1000.0, 44100, 4096, 8000.0);
        let narrow = preprocess(&samples, 44100, &AnalysisConfig { window_size: 4096, ..Default::default() });
        let wide = preprocess(
            &samples,
            44100,
            &AnalysisConfig {
                window_size: 4096,
                smoothing_sigma: 4.0,
                ..Default::default()
            },
        );
        assert_abs_diff_eq!(narrow.effective_resolution(), narrow.bin_width() * SMOOTHING_BROADENING);
        assert!(wide.effective_resolution() > narrow.effective_resolution());
    }

    #[test]
    fn empty_spectrum_may_have_zero_bin_width() {
        let spectrum = Spectrum::from_amplitudes(Vec::new(), 0.0);
        assert!(spectrum.is_empty());
        assert_eq!(spectrum.effective_resolution(), 0.0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "positive bin width")]
    fn non_empty_spectrum_rejects_zero_bin_width() {
        Spectrum::from_amplitudes(vec![1.0, 2.0], 0.0);
    }
}
