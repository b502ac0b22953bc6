// tests/pipeline.rs

// Drives the whole estimation pipeline through the public API with
// synthesised sample buffers.
use tuner_core::{
    AnalysisConfig, Tuner, TunerError, TuningTable,
    fft, inharmonicity::partial_frequency, peaks::extract_peaks,
};

const SAMPLE_RATE: u32 = 44100;

/// Renders a sum of sines `(frequency, amplitude)` to i16 samples.
fn render(len: usize, components: &[(f64, f64)]) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            let sample: f64 = components
                .iter()
                .map(|&(f, a)| a * (2.0 * std::f64::consts::PI * f * t).sin())
                .sum();
            sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}

/// Default settings with timeouts loose enough for unoptimised test builds.
fn relaxed_config() -> AnalysisConfig {
    AnalysisConfig {
        refine_timeout_ms: 5_000,
        search_timeout_ms: 30_000,
        ..Default::default()
    }
}

#[test]
fn concert_a_with_harmonics_matches_a() {
    let config = relaxed_config();
    let amplitudes = [8000.0, 6000.0, 4500.0, 3500.0, 2500.0, 2000.0, 1500.0];
    let components: Vec<(f64, f64)> = amplitudes
        .iter()
        .enumerate()
        .map(|(i, &a)| (partial_frequency(440.0, 0.0, i as u32 + 1), a))
        .collect();
    let samples = render(config.window_size, &components);

    let tuner = Tuner::from_config(config).unwrap();
    let analysis = tuner.analyze(&samples, SAMPLE_RATE);

    let bin_width = analysis.spectrum.bin_width();
    let fit = analysis.fit.expect("a fundamental should be found");
    assert!(
        (fit.fundamental - 440.0).abs() <= bin_width,
        "f1 = {} Hz, bin width {} Hz",
        fit.fundamental,
        bin_width
    );

    let key = analysis.key_match.expect("440 Hz should match a key");
    assert_eq!(key.key, "A");
    assert!(key.cents.abs() < 5.0, "cents = {}", key.cents);
    assert_eq!(key.octave_shift, 0);

    assert_eq!(analysis.partials.len(), tuner.config().partial_count);
    assert!(analysis.peaks.len() >= 7);
}

#[test]
fn silence_yields_no_peaks_and_no_match() {
    let tuner = Tuner::from_config(relaxed_config()).unwrap();
    let analysis = tuner.analyze(&vec![0; 32768], SAMPLE_RATE);
    assert!(analysis.peaks.is_empty());
    assert!(analysis.fit.is_none());
    assert!(analysis.partials.is_empty());
    assert!(analysis.key_match.is_none());
    assert_eq!(analysis.spectrum.len(), 32768 / 2 + 1);
}

#[test]
fn empty_buffer_is_degenerate_not_fatal() {
    let tuner = Tuner::from_config(relaxed_config()).unwrap();
    let analysis = tuner.analyze(&[], SAMPLE_RATE);
    assert!(analysis.key_match.is_none());
}

#[test]
fn stiff_string_with_weak_fundamental() {
    let (f1, b) = (110.0, 4.0e-4);
    let amplitudes = [300.0, 6000.0, 5000.0, 4000.0, 3000.0, 2500.0, 2000.0, 1500.0, 1200.0, 1000.0];
    let components: Vec<(f64, f64)> = amplitudes
        .iter()
        .enumerate()
        .map(|(i, &a)| (partial_frequency(f1, b, i as u32 + 1), a))
        .collect();
    let config = relaxed_config();
    let samples = render(config.window_size, &components);

    let tuner = Tuner::from_config(config).unwrap();
    let analysis = tuner.analyze(&samples, SAMPLE_RATE);

    let fit = analysis.fit.expect("a fundamental should be found");
    assert!((fit.fundamental - f1).abs() < 1.0, "{fit:?}");
    assert!(fit.inharmonicity > 1.0e-4 && fit.inharmonicity < 7.0e-4, "{fit:?}");

    let key = analysis.key_match.expect("110 Hz should match a key");
    assert_eq!(key.key, "A");
    assert_eq!(key.octave_shift, -2);
    assert!(key.cents.abs() < 10.0, "cents = {}", key.cents);

    for (i, &f) in analysis.partials.iter().enumerate() {
        assert_eq!(f, partial_frequency(fit.fundamental, fit.inharmonicity, i as u32 + 1));
    }
}

#[test]
fn peak_count_is_capped_and_ordered() {
    let config = AnalysisConfig {
        max_peaks: 16,
        ..relaxed_config()
    };
    let components: Vec<(f64, f64)> = (1..=30).map(|n| (100.0 * n as f64, 1000.0)).collect();
    let samples = render(config.window_size, &components);
    let spectrum = fft::preprocess(&samples, SAMPLE_RATE, &config);
    let peaks = extract_peaks(&spectrum, &config);
    assert_eq!(peaks.len(), 16);
    assert!(peaks.windows(2).all(|w| w[0].frequency < w[1].frequency));
}

#[test]
fn table_without_pivot_fails_before_analysis() {
    let err = TuningTable::from_json_str("no-a", r#"{"C": 0, "E": 386.3, "G": 702.0}"#).unwrap_err();
    assert!(matches!(err, TunerError::MissingPivot(_)));
}

#[test]
fn inconsistent_config_fails_at_startup() {
    let config = AnalysisConfig {
        peak_width: (6.0, 2.0),
        ..Default::default()
    };
    let table = TuningTable::builtin("Equal").unwrap();
    assert!(matches!(
        Tuner::new(config, table),
        Err(TunerError::InvalidConfig { field: "peak_width", .. })
    ));
}

#[test]
fn unknown_temperament_fails_at_startup() {
    let config = AnalysisConfig {
        temperament: "Bogus".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        Tuner::from_config(config),
        Err(TunerError::UnknownTemperament(_))
    ));
}
