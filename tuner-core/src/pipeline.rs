//! # Analysis Pipeline
//!
//! ```text
//! samples ─► preprocess ─► extract_peaks ─► refine_peaks ─► search ─► match_frequency
//!             Spectrum      Vec<Peak>        Vec<Peak>       FitResult   KeyMatch
//! ```
//!
//! A [`Tuner`] is built once from a validated configuration and a tuning
//! table; each call to [`Tuner::analyze`] runs one window to completion and
//! carries no state into the next.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    Analysis,
    config::AnalysisConfig,
    error::Result,
    fft::{self, Spectrum},
    inharmonicity::{number_partials, partial_series, regress_inharmonicity},
    peaks::extract_peaks,
    refine::refine_peaks,
    search::search,
    tuning::TuningTable,
};

/// The estimation pipeline bound to one configuration and temperament.
#[derive(Debug, Clone)]
pub struct Tuner {
    config: AnalysisConfig,
    table: TuningTable,
}

impl Tuner {
    /// Validates the configuration up front; nothing is analysed with a bad one.
    pub fn new(config: AnalysisConfig, table: TuningTable) -> Result<Self> {
        config.validate()?;
        info!(
            temperament = table.name(),
            a1 = config.reference_pitch,
            window = config.window_size,
            "tuner ready"
        );
        Ok(Self { config, table })
    }

    /// Uses the built-in temperament named in the configuration.
    pub fn from_config(config: AnalysisConfig) -> Result<Self> {
        let table = TuningTable::builtin(&config.temperament)?;
        Self::new(config, table)
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn table(&self) -> &TuningTable {
        &self.table
    }

    /// Runs one analysis window.
    ///
    /// Degenerate input (silence, no peaks, no fit) never fails: it simply
    /// ends in an absent key match.
    pub fn analyze(&self, samples: &[i16], sample_rate: u32) -> Analysis {
        let config = &self.config;
        let mut diagnostics = Vec::new();

        if sample_rate == 0 {
            warn!("sample rate of zero, skipping analysis");
            diagnostics.push("sample rate of zero, analysis skipped".to_string());
            return Analysis {
                spectrum: Arc::new(Spectrum::from_amplitudes(Vec::new(), 0.0)),
                peaks: Vec::new(),
                fit: None,
                partials: Vec::new(),
                key_match: None,
                regression: None,
                diagnostics,
            };
        }

        let started = Instant::now();
        let spectrum = Arc::new(fft::preprocess(samples, sample_rate, config));
        debug!("time utilized for FFT: {:?}", started.elapsed());

        let started = Instant::now();
        let raw_peaks = extract_peaks(&spectrum, config);
        debug!(count = raw_peaks.len(), "time utilized for peak finding: {:?}", started.elapsed());

        let peaks = if config.refine_peaks && !raw_peaks.is_empty() {
            let started = Instant::now();
            let refinement = refine_peaks(&spectrum, &raw_peaks, config);
            debug!(
                refined = refinement.peaks.len(),
                "time utilized for peak refinement: {:?}",
                started.elapsed()
            );
            diagnostics.extend(refinement.diagnostics);
            if refinement.peaks.is_empty() {
                warn!("no peak survived refinement, searching on raw peaks");
                diagnostics.push("no peak survived refinement, raw peaks used".to_string());
                raw_peaks
            } else {
                refinement.peaks
            }
        } else {
            raw_peaks
        };

        let started = Instant::now();
        let outcome = search(&peaks, &spectrum, config);
        debug!("time utilized for minimizer: {:?}", started.elapsed());
        diagnostics.extend(outcome.diagnostics);

        let fit = outcome.best;
        let partials = fit
            .as_ref()
            .map(|f| partial_series(f, config.partial_count))
            .unwrap_or_default();

        let key_match = fit.as_ref().and_then(|f| {
            self.table
                .match_frequency(f.fundamental, config.reference_pitch, config.octave_range)
        });

        let regression = fit.as_ref().and_then(|_| {
            let peak_frequencies: Vec<f64> = peaks.iter().map(|p| p.frequency).collect();
            let numbered = number_partials(&peak_frequencies, &partials, 0.5 * spectrum.effective_resolution());
            regress_inharmonicity(&numbered)
        });

        match (&fit, &key_match) {
            (Some(f), Some(m)) => info!(
                key = %m.key,
                cents = m.cents,
                f1 = f.fundamental,
                b = f.inharmonicity,
                "{} ({}, a1={:.0} Hz) offset={:.0} cent",
                m.key,
                self.table.name(),
                config.reference_pitch,
                m.cents
            ),
            (Some(f), None) => debug!(f1 = f.fundamental, "fundamental outside the tuning table range"),
            _ => debug!("no fundamental found"),
        }

        Analysis {
            spectrum,
            peaks,
            fit,
            partials,
            key_match,
            regression,
            diagnostics,
        }
    }
}
