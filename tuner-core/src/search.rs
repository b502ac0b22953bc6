//! # Fundamental Search
//!
//! Decides which fundamental `f1` and inharmonicity `B` best explain the
//! observed spectrum.
//!
//! ## Candidates
//! The strongest peak `f0` and its sub-harmonics `f0/d`, `d` from the
//! configured divisor range. The strongest line of a stiff bass string is
//! often a low partial rather than the fundamental itself.
//!
//! ## Per-candidate minimisation
//! Each candidate `c` runs in its own worker over `f1 ∈ [0.95c, 1.05c]`,
//! `B ∈ [0, max_inharmonicity]`: a coarse grid picks the starting point, a
//! bounded Nelder–Mead polishes it. The objective is the negated spectral mass
//! found next to the first [`SCORE_PARTIALS`] predicted partials.
//!
//! ## Reduction
//! Lowest score wins; among equal scores the first one received is kept.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    config::AnalysisConfig,
    error::FitError,
    fft::Spectrum,
    inharmonicity::{FitResult, partial_frequency},
    optimize::{Bounds, NelderMeadOptions, nelder_mead},
    peaks::{Peak, strongest},
    workers::run_group,
};

/// Partials scored by the objective.
pub const SCORE_PARTIALS: u32 = 9;

/// Bins summed on either side of each predicted partial.
pub const SCORE_HALF_WINDOW: usize = 2;

/// Relative half-width of the f1 search interval around a candidate.
pub const CANDIDATE_SPAN: f64 = 0.05;

const GRID_F1_STEPS: usize = 41;
const GRID_B_STEPS: usize = 11;

/// Outcome of one search round.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub best: Option<FitResult>,
    pub diagnostics: Vec<String>,
}

/// Trial fundamentals: the strongest peak divided by every configured divisor.
pub fn candidates(peaks: &[Peak], config: &AnalysisConfig) -> Vec<f64> {
    let Some(f0) = strongest(peaks).map(|p| p.frequency) else {
        return Vec::new();
    };
    let (low, high) = config.subharmonic_divisors;
    (low..=high).map(|d| f0 / d as f64).collect()
}

/// Cross-correlation score of `(f1, b)` against the spectrum; lower is better.
///
/// A single pointer walks up the frequency axis and is never rewound: for
/// each partial it stops at the first bin above the predicted frequency and
/// the amplitudes of the bins within [`SCORE_HALF_WINDOW`] of that bin are
/// accumulated. Partials beyond the last bin contribute nothing.
pub fn score(f1: f64, b: f64, spectrum: &Spectrum) -> f64 {
    let freqs = spectrum.frequencies();
    let amps = spectrum.amplitudes();
    let len = freqs.len();

    let mut pointer = 0;
    let mut total = 0.0;
    for n in 1..=SCORE_PARTIALS {
        let target = partial_frequency(f1, b, n);
        while pointer < len && freqs[pointer] <= target {
            pointer += 1;
        }
        if pointer == len {
            break;
        }
        let lo = pointer.saturating_sub(SCORE_HALF_WINDOW);
        let hi = (pointer + SCORE_HALF_WINDOW).min(len - 1);
        total += amps[lo..=hi].iter().sum::<f64>();
    }
    -total
}

/// Bounded minimisation of [`score`] around one candidate.
pub fn fit_candidate(candidate: f64, spectrum: &Spectrum, max_inharmonicity: f64) -> Result<FitResult, FitError> {
    if !(candidate.is_finite() && candidate > 0.0) {
        return Err(FitError::Degenerate("candidate frequency must be positive"));
    }
    let bounds = Bounds::new(
        [(1.0 - CANDIDATE_SPAN) * candidate, 0.0],
        [(1.0 + CANDIDATE_SPAN) * candidate, max_inharmonicity],
    );
    let objective = |x: &[f64; 2]| score(x[0], x[1], spectrum);

    // Coarse grid for the starting point; the objective is a step function
    // and a lone simplex easily stalls on a plateau.
    let mut start = [candidate, 0.0];
    let mut start_value = objective(&start);
    for i in 0..GRID_F1_STEPS {
        for j in 0..GRID_B_STEPS {
            let u = [
                i as f64 / (GRID_F1_STEPS - 1) as f64,
                j as f64 / (GRID_B_STEPS - 1) as f64,
            ];
            let x = bounds.denormalize(&u);
            let value = objective(&x);
            if value < start_value {
                start = x;
                start_value = value;
            }
        }
    }

    let options = NelderMeadOptions {
        initial_step: 0.5 / (GRID_F1_STEPS - 1) as f64,
        ..Default::default()
    };
    let minimum = nelder_mead(objective, start, &bounds, &options);
    let (x, value) = if minimum.value <= start_value {
        (minimum.x, minimum.value)
    } else {
        (start, start_value)
    };

    if !value.is_finite() {
        return Err(FitError::Degenerate("non-finite score"));
    }
    debug!(
        candidate,
        f1 = x[0],
        b = x[1],
        score = value,
        iterations = minimum.iterations,
        "candidate minimised"
    );
    Ok(FitResult {
        fundamental: x[0],
        inharmonicity: x[1],
        score: value,
    })
}

/// Min-reduction over fit results in the order they were received.
///
/// A later result replaces the current best only when strictly better, so
/// ties go to the earlier arrival.
pub fn select_best<I>(results: I) -> Option<FitResult>
where
    I: IntoIterator<Item = FitResult>,
{
    results.into_iter().fold(None, |best, candidate| match best {
        Some(current) if current.score <= candidate.score => Some(current),
        _ => Some(candidate),
    })
}

/// Runs one search round: a worker per candidate, then a min-reduction.
///
/// An empty peak list produces no result and spawns nothing.
pub fn search(peaks: &[Peak], spectrum: &Arc<Spectrum>, config: &AnalysisConfig) -> SearchOutcome {
    let candidates = candidates(peaks, config);
    if candidates.is_empty() {
        return SearchOutcome::default();
    }
    debug!(?candidates, "searching fundamentals");

    let shared = Arc::clone(spectrum);
    let max_inharmonicity = config.max_inharmonicity;
    let outcome = run_group("search", candidates.clone(), config.search_timeout(), move |c: f64| {
        fit_candidate(c, &shared, max_inharmonicity).map_err(|e| {
            warn!("candidate {c:.2} Hz failed: {e}");
            format!("candidate {c:.2} Hz failed: {e}")
        })
    });

    let mut diagnostics = outcome.failures;
    diagnostics.extend(
        outcome
            .timed_out
            .iter()
            .map(|&i| format!("search for candidate {:.2} Hz timed out", candidates[i])),
    );

    SearchOutcome {
        best: select_best(outcome.results),
        diagnostics,
    }
}
