//! # Analysis Configuration
//!
//! One immutable block of settings threaded through every pipeline stage.
//! The outer loop may build a new block between analysis rounds, but a round
//! always sees the block it was started with.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TunerError};

/// Upper bound on the number of peaks (and therefore refinement workers).
pub const MAX_PEAKS_LIMIT: usize = 64;

/// Upper bound on the sub-harmonic divisor (and therefore search workers).
pub const MAX_DIVISOR_LIMIT: u32 = 16;

/// Settings for one analysis round.
///
/// Deserializes from JSON; missing fields take their defaults, so a file
/// holding only `{"reference_pitch": 415.0}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Samples per analysis window.
    pub window_size: usize,
    /// Standard deviation of the smoothing kernel, in bins.
    pub smoothing_sigma: f64,
    /// High-pass -3 dB frequency in Hz.
    pub highpass_cutoff: f64,
    pub highpass_order: u32,
    /// Minimum distance between neighbouring peaks, in bins.
    pub peak_distance: usize,
    /// Prominence threshold as a multiple of the mean spectrum amplitude.
    pub noise_level: f64,
    /// (min, max) peak width at half prominence, in bins.
    pub peak_width: (f64, f64),
    /// NMAX: number of highest peaks kept.
    pub max_peaks: usize,
    pub refine_peaks: bool,
    /// Half-width of the Gaussian fit window, in bins.
    pub fit_window: usize,
    pub refine_timeout_ms: u64,
    pub search_timeout_ms: u64,
    /// Candidates are f0/d for d in this inclusive range.
    pub subharmonic_divisors: (u32, u32),
    /// INHARM_MAX: upper bound of the inharmonicity coefficient B.
    pub max_inharmonicity: f64,
    /// NPARTIAL: length of the reported partial series.
    pub partial_count: usize,
    /// a1 in Hz.
    pub reference_pitch: f64,
    /// Octave shifts tried when matching a key.
    pub octave_range: (i32, i32),
    /// Name of the selected tuning table.
    pub temperament: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: 32768,
            smoothing_sigma: 2.0,
            highpass_cutoff: 100.0,
            highpass_order: 2,
            peak_distance: 16,
            noise_level: 50.0,
            peak_width: (1.0, 8.0),
            max_peaks: 16,
            refine_peaks: true,
            fit_window: 5,
            refine_timeout_ms: 250,
            search_timeout_ms: 2000,
            subharmonic_divisors: (1, 8),
            max_inharmonicity: 0.001,
            partial_count: 11,
            reference_pitch: 440.0,
            octave_range: (-4, 4),
            temperament: "Equal".to_string(),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> TunerError {
    TunerError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

impl AnalysisConfig {
    /// Loads a configuration from a JSON file and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn refine_timeout(&self) -> Duration {
        Duration::from_millis(self.refine_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    /// Rejects internally inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.window_size < 64 {
            return Err(invalid("window_size", "must be at least 64 samples"));
        }
        if !(self.smoothing_sigma.is_finite() && self.smoothing_sigma > 0.0) {
            return Err(invalid("smoothing_sigma", "must be positive"));
        }
        if !(self.highpass_cutoff.is_finite() && self.highpass_cutoff >= 0.0) {
            return Err(invalid("highpass_cutoff", "must be non-negative"));
        }
        if self.highpass_order == 0 {
            return Err(invalid("highpass_order", "must be at least 1"));
        }
        if self.peak_distance == 0 {
            return Err(invalid("peak_distance", "must be at least 1 bin"));
        }
        if !(self.noise_level.is_finite() && self.noise_level >= 0.0) {
            return Err(invalid("noise_level", "must be non-negative"));
        }
        let (wmin, wmax) = self.peak_width;
        if !(wmin >= 0.0 && wmax > 0.0 && wmin <= wmax) {
            return Err(invalid(
                "peak_width",
                format!("({wmin}, {wmax}) is not an ordered positive range"),
            ));
        }
        if self.max_peaks == 0 || self.max_peaks > MAX_PEAKS_LIMIT {
            return Err(invalid(
                "max_peaks",
                format!("must lie in 1..={MAX_PEAKS_LIMIT}"),
            ));
        }
        if self.fit_window == 0 {
            return Err(invalid("fit_window", "must be at least 1 bin"));
        }
        if self.refine_timeout_ms == 0 {
            return Err(invalid("refine_timeout_ms", "must be positive"));
        }
        if self.search_timeout_ms == 0 {
            return Err(invalid("search_timeout_ms", "must be positive"));
        }
        let (dlo, dhi) = self.subharmonic_divisors;
        if dlo == 0 || dlo > dhi || dhi > MAX_DIVISOR_LIMIT {
            return Err(invalid(
                "subharmonic_divisors",
                format!("({dlo}, {dhi}) must satisfy 1 <= low <= high <= {MAX_DIVISOR_LIMIT}"),
            ));
        }
        if !(self.max_inharmonicity.is_finite() && self.max_inharmonicity >= 0.0) {
            return Err(invalid("max_inharmonicity", "must be non-negative"));
        }
        if self.partial_count == 0 {
            return Err(invalid("partial_count", "must be at least 1"));
        }
        if !(self.reference_pitch.is_finite() && self.reference_pitch > 0.0) {
            return Err(invalid("reference_pitch", "must be positive"));
        }
        if self.octave_range.0 > self.octave_range.1 {
            return Err(invalid("octave_range", "low must not exceed high"));
        }
        Ok(())
    }
}
