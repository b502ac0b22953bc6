//! # Text Report
//!
//! Terminal rendering of one [`Analysis`]: the matched key with its cent
//! offset, the fitted string parameters, the partial series up to the
//! display ceiling, and whatever the pipeline dropped along the way.

use std::fmt::Write;
use tuner_core::{Analysis, KeyMatch};

/// Offsets smaller than this (in cents) are reported as in tune.
const IN_TUNE_CENTS: f64 = 2.0;

/// Short description of a cent offset, e.g. `+3.4 cent (sharp)`.
pub fn describe_offset(cents: f64) -> String {
    if cents.abs() < IN_TUNE_CENTS {
        format!("{cents:+.1} cent (in tune)")
    } else if cents > 0.0 {
        format!("{cents:+.1} cent (sharp)")
    } else {
        format!("{cents:+.1} cent (flat)")
    }
}

fn describe_key(m: &KeyMatch) -> String {
    match m.octave_shift {
        0 => m.key.clone(),
        shift => format!("{} (octave {shift:+})", m.key),
    }
}

/// Renders the analysis as a multi-line block.
///
/// `display_max` bounds which partials are listed; the fit itself is
/// unaffected by it.
pub fn render(analysis: &Analysis, temperament: &str, reference_pitch: f64, display_max: f64) -> String {
    let mut out = String::new();

    match (&analysis.fit, &analysis.key_match) {
        (Some(_), Some(m)) => {
            let _ = writeln!(
                out,
                "{}  {}  [{temperament}, a1={reference_pitch:.1} Hz]",
                describe_key(m),
                describe_offset(m.cents)
            );
        }
        (Some(fit), None) => {
            let _ = writeln!(out, "{:.2} Hz is outside the {temperament} table", fit.fundamental);
        }
        _ => {
            let _ = writeln!(out, "no fundamental found");
        }
    }

    if let Some(fit) = &analysis.fit {
        let _ = writeln!(out, "  f1 = {:.3} Hz   B = {:.3e}", fit.fundamental, fit.inharmonicity);
    }
    if let Some(r) = &analysis.regression {
        let _ = writeln!(
            out,
            "  regression: f1 = {:.3} Hz   B = {:.3e}   ({} partials)",
            r.fundamental, r.inharmonicity, r.partials_used
        );
    }

    let shown: Vec<String> = analysis
        .partials
        .iter()
        .enumerate()
        .take_while(|&(_, &f)| f <= display_max)
        .map(|(i, f)| format!("{}:{f:.1}", i + 1))
        .collect();
    if !shown.is_empty() {
        let _ = writeln!(out, "  partials: {}", shown.join("  "));
    }

    let spectrum = &analysis.spectrum;
    if !spectrum.is_empty() {
        let _ = writeln!(
            out,
            "  resolution: {:.2} Hz/bin, {:.2} Hz effective, {} peaks",
            spectrum.bin_width(),
            spectrum.effective_resolution(),
            analysis.peaks.len()
        );
    }

    for line in &analysis.diagnostics {
        let _ = writeln!(out, "  ! {line}");
    }

    out
}
