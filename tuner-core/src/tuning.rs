//! # Temperaments and Key Matching
//!
//! A tuning table maps the twelve chromatic key names to reference offsets in
//! cents. The entry for "A" is the pivot that ties the table to the reference
//! pitch a1. Declaration order matters: the matcher returns the first key that
//! fits, so tables keep their entries in the order they were written.

use once_cell::sync::Lazy;
use serde::Serialize;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use std::fmt;
use std::path::Path;

use crate::error::{Result, TunerError};

/// Name of the pivot key every table must contain.
pub const PIVOT_KEY: &str = "A";

/// Half-width of the acceptance band around a key, in cents.
pub const MATCH_TOLERANCE_CENTS: f64 = 60.0;

/// A named temperament with its entries in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningTable {
    name: String,
    entries: Vec<(String, f64)>,
}

/// The key a frequency was matched to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyMatch {
    pub key: String,
    /// Offset from the key's reference pitch; positive is sharp.
    pub cents: f64,
    /// Octave shift relative to the reference pitch at which the key matched.
    pub octave_shift: i32,
}

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Built-in temperaments, cents above C.
static BUILTIN: Lazy<Vec<TuningTable>> = Lazy::new(|| {
    let table = |name: &str, cents: [f64; 12]| TuningTable {
        name: name.to_string(),
        entries: NOTE_NAMES
            .iter()
            .zip(cents)
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    };
    vec![
        table(
            "Equal",
            [0.0, 100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0, 800.0, 900.0, 1000.0, 1100.0],
        ),
        table(
            "Werckmeister III",
            [
                0.0, 90.225, 192.18, 294.135, 390.225, 498.045, 588.27, 696.09, 792.18, 888.27,
                996.09, 1092.18,
            ],
        ),
        table(
            "Kirnberger III",
            [
                0.0, 90.225, 193.157, 294.135, 386.314, 498.045, 590.224, 696.578, 792.18, 889.735,
                996.09, 1088.269,
            ],
        ),
        table(
            "Vallotti",
            [
                0.0, 94.135, 196.09, 298.045, 392.18, 501.955, 592.18, 698.045, 796.09, 894.135,
                1000.0, 1090.225,
            ],
        ),
        table(
            "Meantone 1/4",
            [
                0.0, 76.049, 193.157, 310.265, 386.314, 503.422, 579.471, 696.578, 772.627, 889.735,
                1006.843, 1082.892,
            ],
        ),
    ]
});

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values indicate sharpness, negative values flatness.
pub fn calculate_cents_deviation(freq: f64, target_freq: f64) -> f64 {
    1200.0 * (freq / target_freq).log2()
}

impl TuningTable {
    /// Builds a table, rejecting empty ones and ones without the pivot.
    pub fn new(name: impl Into<String>, entries: Vec<(String, f64)>) -> Result<Self> {
        let name = name.into();
        if entries.is_empty() {
            return Err(TunerError::EmptyTable(name));
        }
        if !entries.iter().any(|(key, _)| key == PIVOT_KEY) {
            return Err(TunerError::MissingPivot(name));
        }
        Ok(Self { name, entries })
    }

    /// Looks up a built-in temperament by name.
    pub fn builtin(name: &str) -> Result<Self> {
        BUILTIN
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| TunerError::UnknownTemperament(name.to_string()))
    }

    pub fn builtin_names() -> Vec<&'static str> {
        BUILTIN.iter().map(|t| t.name.as_str()).collect()
    }

    /// Parses a JSON object such as `{"C": 0.0, "C#": 90.2, ...}`.
    pub fn from_json_str(name: impl Into<String>, json: &str) -> Result<Self> {
        let OrderedEntries(entries) = serde_json::from_str(json)?;
        Self::new(name, entries)
    }

    /// Loads a table from a JSON file; the file stem becomes its name.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "custom".to_string());
        Self::from_json_str(name, &text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    fn pivot(&self) -> f64 {
        // Construction guarantees the pivot exists.
        self.get(PIVOT_KEY).unwrap_or(0.0)
    }

    /// Matches a measured fundamental to a key of this table.
    ///
    /// Octave shifts are tried from low to high and, within a shift, keys in
    /// declaration order; the first key closer than
    /// [`MATCH_TOLERANCE_CENTS`] wins. Returns `None` when nothing fits.
    pub fn match_frequency(&self, frequency: f64, reference_pitch: f64, octave_range: (i32, i32)) -> Option<KeyMatch> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return None;
        }
        let pivot = self.pivot();
        let base = calculate_cents_deviation(frequency, reference_pitch);
        for shift in octave_range.0..=octave_range.1 {
            let offset = base - 1200.0 * shift as f64;
            for (key, value) in &self.entries {
                let displaced = offset + pivot - value;
                if -MATCH_TOLERANCE_CENTS < displaced && displaced < MATCH_TOLERANCE_CENTS {
                    return Some(KeyMatch {
                        key: key.clone(),
                        cents: displaced,
                        octave_shift: shift,
                    });
                }
            }
        }
        None
    }
}

/// JSON object entries in document order.
struct OrderedEntries(Vec<(String, f64)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of key names to cents")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> std::result::Result<Self::Value, M::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(12));
                while let Some((key, value)) = map.next_entry::<String, f64>()? {
                    entries.push((key, value));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn reference_pitch_matches_a() {
        let table = TuningTable::builtin("Equal").unwrap();
        let m = table.match_frequency(440.0, 440.0, (-4, 4)).unwrap();
        assert_eq!(m.key, "A");
        assert_abs_diff_eq!(m.cents, 0.0, epsilon = 1e-9);
        assert_eq!(m.octave_shift, 0);
    }

    #[test]
    fn every_key_round_trips_through_every_octave() {
        let a1 = 440.0;
        for name in TuningTable::builtin_names() {
            let table = TuningTable::builtin(name).unwrap();
            let pivot = table.get("A").unwrap();
            for (key, value) in table.entries() {
                for shift in -4..=4 {
                    let f = a1 * 2f64.powf((value - pivot + shift as f64 * 1200.0) / 1200.0);
                    let m = table.match_frequency(f, a1, (-4, 4)).unwrap();
                    assert_eq!(&m.key, key, "{name}: {f} Hz");
                    assert!(m.cents.abs() < 1.0, "{name}: {key} off by {}", m.cents);
                }
            }
        }
    }

    #[test]
    fn sharp_and_flat_offsets_are_signed() {
        let table = TuningTable::builtin("Equal").unwrap();
        let sharp = table.match_frequency(440.0 * 2f64.powf(10.0 / 1200.0), 440.0, (-4, 4)).unwrap();
        assert_abs_diff_eq!(sharp.cents, 10.0, epsilon = 1e-9);
        let flat = table.match_frequency(261.6255653 * 2f64.powf(-7.0 / 1200.0), 440.0, (-4, 4)).unwrap();
        assert_eq!(flat.key, "C");
        assert_abs_diff_eq!(flat.cents, -7.0, epsilon = 1e-4);
    }

    #[test]
    fn out_of_range_frequency_has_no_match() {
        let table = TuningTable::builtin("Equal").unwrap();
        assert!(table.match_frequency(440.0 * 64.0, 440.0, (-4, 4)).is_none());
        assert!(table.match_frequency(0.0, 440.0, (-4, 4)).is_none());
    }

    #[test]
    fn first_key_in_declaration_order_wins() {
        let table = TuningTable::new(
            "overlap",
            vec![("X".to_string(), 880.0), ("A".to_string(), 900.0)],
        )
        .unwrap();
        let m = table.match_frequency(440.0, 440.0, (0, 0)).unwrap();
        assert_eq!(m.key, "X");
        assert_abs_diff_eq!(m.cents, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn json_table_keeps_declaration_order() {
        let table = TuningTable::from_json_str("custom", r#"{"B": 1100, "A": 900, "C": 0}"#).unwrap();
        let keys: Vec<&str> = table.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["B", "A", "C"]);
    }

    #[test]
    fn table_without_pivot_is_rejected() {
        let err = TuningTable::from_json_str("broken", r#"{"C": 0, "D": 200}"#).unwrap_err();
        assert!(matches!(err, TunerError::MissingPivot(name) if name == "broken"));
        assert!(matches!(
            TuningTable::builtin("Pythagorean"),
            Err(TunerError::UnknownTemperament(_))
        ));
    }
}
