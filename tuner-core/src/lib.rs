// tuner-core/src/lib.rs

//! The core logic for the string tuner.
//! This crate estimates the fundamental frequency and inharmonicity of a
//! plucked or struck string from one window of samples and matches it to a
//! temperament. It is completely headless and owns no audio device.

pub mod config;
pub mod error;
pub mod fft;
pub mod inharmonicity;
pub mod optimize;
pub mod peaks;
pub mod pipeline;
pub mod refine;
pub mod search;
pub mod tuning;
pub mod workers;

use std::sync::Arc;

pub use config::AnalysisConfig;
pub use error::{Result, TunerError};
pub use fft::Spectrum;
pub use inharmonicity::{FitResult, RegressionEstimate};
pub use peaks::Peak;
pub use pipeline::Tuner;
pub use tuning::{KeyMatch, TuningTable};

/// Represents the result of a single analysis window.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Smoothed, high-pass shaped magnitude spectrum.
    pub spectrum: Arc<Spectrum>,
    /// Peaks the search ran on (refined when refinement succeeded).
    pub peaks: Vec<Peak>,
    /// Winning (f1, B), absent when there were no peaks.
    pub fit: Option<FitResult>,
    /// Partial series generated from `fit`.
    pub partials: Vec<f64>,
    /// Matched key and offset; either fully present or absent.
    pub key_match: Option<KeyMatch>,
    /// Independent (f1, B) estimate from the measured partials.
    pub regression: Option<RegressionEstimate>,
    /// Dropped peaks, failed candidates and timeouts, one line each.
    pub diagnostics: Vec<String>,
}
