//! # Stiff-string Inharmonicity Model
//!
//! Partials of a stiff string sit at `f_n = f1 · n · √(1 + B·n²)`.
//! This module generates partial series from a fit and, as an independent
//! cross-check, regresses `B` from measured partials.

use linreg::linear_regression;
use serde::{Deserialize, Serialize};

/// Best (f1, B) pair found by the fundamental search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// f1 in Hz.
    pub fundamental: f64,
    /// Inharmonicity coefficient B.
    pub inharmonicity: f64,
    /// Comparison-only score, lower is better.
    pub score: f64,
}

/// Frequency of partial `n` for fundamental `f1` and coefficient `b`.
///
/// The radicand is clamped at zero so a negative `b` never yields NaN.
pub fn partial_frequency(f1: f64, b: f64, n: u32) -> f64 {
    let n = n as f64;
    f1 * n * (1.0 + b * n * n).max(0.0).sqrt()
}

/// Partials `1..=count` of a fit, in ascending order.
pub fn partial_series(fit: &FitResult, count: usize) -> Vec<f64> {
    (1..=count as u32)
        .map(|n| partial_frequency(fit.fundamental, fit.inharmonicity, n))
        .collect()
}

/// A single measured partial of a note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    pub number: u32,    // The partial number (n=1, 2, 3...)
    pub frequency: f64, // The measured frequency in Hz
}

/// (f1, B) recovered by linear regression over measured partials.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionEstimate {
    pub fundamental: f64,
    pub inharmonicity: f64,
    pub partials_used: usize,
}

/// Numbers measured peak frequencies by the nearest predicted partial.
///
/// A predicted partial claims the closest peak no further than `tolerance` Hz
/// away; partials without such a peak are skipped.
pub fn number_partials(peak_frequencies: &[f64], predicted: &[f64], tolerance: f64) -> Vec<Partial> {
    predicted
        .iter()
        .enumerate()
        .filter_map(|(i, &target)| {
            peak_frequencies
                .iter()
                .map(|&f| (f, (f - target).abs()))
                .filter(|&(_, distance)| distance <= tolerance)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(frequency, _)| Partial {
                    number: i as u32 + 1,
                    frequency,
                })
        })
        .collect()
}

/// Regresses `(f_n / n)²` against `n²`: the intercept is `f1²` and
/// slope / intercept is `B`.
pub fn regress_inharmonicity(partials: &[Partial]) -> Option<RegressionEstimate> {
    // x = n^2, y = (f_n / n)^2
    let (xs, ys): (Vec<f64>, Vec<f64>) = partials
        .iter()
        .filter(|p| p.number > 0 && p.frequency > 0.0)
        .map(|p| {
            let n = p.number as f64;
            let f_n = p.frequency;
            (n * n, (f_n / n) * (f_n / n))
        })
        .unzip();

    if xs.len() < 3 {
        return None; // Need at least 3 points for a meaningful regression
    }

    let (slope, intercept) = linear_regression::<_, _, f64>(&xs, &ys).ok()?;
    if intercept <= 1e-6 {
        return None;
    }
    Some(RegressionEstimate {
        fundamental: intercept.sqrt(),
        inharmonicity: slope / intercept,
        partials_used: xs.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn series_reproduces_the_model_exactly() {
        let fit = FitResult {
            fundamental: 65.4,
            inharmonicity: 4.0e-4,
            score: -1.0,
        };
        let series = partial_series(&fit, 11);
        assert_eq!(series.len(), 11);
        for (i, &f) in series.iter().enumerate() {
            let n = (i + 1) as f64;
            assert_eq!(f, 65.4 * n * (1.0 + 4.0e-4 * n * n).sqrt());
        }
    }

    #[test]
    fn harmonic_series_for_zero_b() {
        let fit = FitResult {
            fundamental: 100.0,
            inharmonicity: 0.0,
            score: 0.0,
        };
        assert_eq!(partial_series(&fit, 4), vec![100.0, 200.0, 300.0, 400.0]);
    }

    #[test]
    fn negative_radicand_is_clamped() {
        assert_eq!(partial_frequency(100.0, -1.0, 3), 0.0);
    }

    #[test]
    fn regression_recovers_b() {
        let partials: Vec<Partial> = (1..=8)
            .map(|n| Partial {
                number: n,
                frequency: partial_frequency(110.0, 2.5e-4, n),
            })
            .collect();
        let estimate = regress_inharmonicity(&partials).unwrap();
        assert_relative_eq!(estimate.fundamental, 110.0, max_relative = 1e-9);
        assert_relative_eq!(estimate.inharmonicity, 2.5e-4, max_relative = 1e-6);
        assert_eq!(estimate.partials_used, 8);
    }

    #[test]
    fn regression_needs_three_partials() {
        let partials = [
            Partial { number: 1, frequency: 100.0 },
            Partial { number: 2, frequency: 200.0 },
        ];
        assert!(regress_inharmonicity(&partials).is_none());
    }

    #[test]
    fn numbering_skips_missing_partials() {
        let predicted = [100.0, 200.0, 300.0, 400.0];
        let measured = [100.4, 299.0, 401.5, 650.0];
        let numbered = number_partials(&measured, &predicted, 1.6);
        let numbers: Vec<u32> = numbered.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 3, 4]);
        assert_eq!(numbered[1].frequency, 299.0);
    }
}
