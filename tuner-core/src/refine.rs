//! # Sub-bin Peak Refinement
//!
//! Every raw peak gets its own worker fitting a single Gaussian to the
//! spectrum samples in a symmetric window around the peak bin. Fits that run
//! off the spectrum, fail to converge or miss the deadline are dropped; the
//! rest come back in arbitrary order and are re-sorted by frequency.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    config::AnalysisConfig,
    error::FitError,
    fft::Spectrum,
    optimize::{Bounds, Linearization, levenberg_marquardt},
    peaks::Peak,
    workers::run_group,
};

/// FWHM of a Gaussian relative to its σ.
pub const FWHM_PER_SIGMA: f64 = 2.354;

const FIT_MAX_ITERATIONS: usize = 200;

/// Refined peaks plus one diagnostic line per dropped peak.
#[derive(Debug, Clone, Default)]
pub struct Refinement {
    pub peaks: Vec<Peak>,
    pub diagnostics: Vec<String>,
}

fn gaussian(x: f64, centre: f64, amplitude: f64, sigma: f64) -> f64 {
    amplitude * (-0.5 * ((x - centre) / sigma).powi(2)).exp()
}

/// Fits one Gaussian around `peak`.
///
/// The centre is confined to the fit window, the amplitude to
/// `[0.25, 2] × peak.amplitude` and σ to half a bin up to twice the
/// smoothing-broadened resolution.
pub fn fit_peak(spectrum: &Spectrum, peak: &Peak, half_window: usize) -> Result<Peak, FitError> {
    fit_gaussian(spectrum, peak, half_window, FIT_MAX_ITERATIONS)
}

fn fit_gaussian(spectrum: &Spectrum, peak: &Peak, half_window: usize, max_iterations: usize) -> Result<Peak, FitError> {
    let len = spectrum.len();
    if peak.bin < half_window || peak.bin + half_window > len.saturating_sub(1) {
        return Err(FitError::WindowOutOfRange { bin: peak.bin, len });
    }
    if !(peak.amplitude > 0.0) {
        return Err(FitError::Degenerate("peak has no height"));
    }

    let range = peak.bin - half_window..=peak.bin + half_window;
    let xs = &spectrum.frequencies()[range.clone()];
    let ys = &spectrum.amplitudes()[range];

    let resolution = spectrum.effective_resolution();
    let bounds = Bounds::new(
        [xs[0], 0.25 * peak.amplitude, 0.5 * spectrum.bin_width()],
        [xs[xs.len() - 1], 2.0 * peak.amplitude, 2.0 * resolution],
    );
    let guess = [peak.frequency, peak.amplitude, 0.8 * resolution];

    let fit = levenberg_marquardt(
        |p: &[f64; 3]| {
            let [centre, amplitude, sigma] = *p;
            let mut residuals = Vec::with_capacity(xs.len());
            let mut jacobian = Vec::with_capacity(xs.len());
            for (&x, &y) in xs.iter().zip(ys) {
                let e = gaussian(x, centre, 1.0, sigma);
                let d = x - centre;
                residuals.push(amplitude * e - y);
                jacobian.push([
                    amplitude * e * d / (sigma * sigma),
                    e,
                    amplitude * e * d * d / (sigma * sigma * sigma),
                ]);
            }
            Linearization { residuals, jacobian }
        },
        guess,
        &bounds,
        max_iterations,
    )?;

    let [frequency, amplitude, sigma] = fit.x;
    debug!(
        "Position (Hz): {frequency:e}, Height (arb. Units): {amplitude:e}, FWHM (Hz): {:e}",
        FWHM_PER_SIGMA * sigma
    );
    Ok(Peak {
        bin: peak.bin,
        frequency,
        amplitude,
        width: Some(sigma),
    })
}

/// Refines all peaks in parallel, one worker per peak.
///
/// The result may be shorter than the input; it is sorted by frequency.
pub fn refine_peaks(spectrum: &Arc<Spectrum>, peaks: &[Peak], config: &AnalysisConfig) -> Refinement {
    let half_window = config.fit_window;
    let shared = Arc::clone(spectrum);
    let outcome = run_group("refine", peaks.to_vec(), config.refine_timeout(), move |peak: Peak| {
        fit_peak(&shared, &peak, half_window).map_err(|e| {
            warn!("peak at {:.2} Hz disregarded: {e}", peak.frequency);
            format!("peak at {:.2} Hz disregarded: {e}", peak.frequency)
        })
    });

    let mut diagnostics = outcome.failures;
    diagnostics.extend(outcome.timed_out.iter().map(|&i| {
        format!(
            "refinement of peak at {:.2} Hz timed out, peak disregarded",
            peaks[i].frequency
        )
    }));

    let mut refined = outcome.results;
    refined.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
    Refinement {
        peaks: refined,
        diagnostics,
    }
}
