//! Offline input: the first channel of a WAV file as i16 samples.

use anyhow::{Context, Result, bail};
use std::path::Path;

/// Reads `path` and returns `(samples, sample_rate)`.
///
/// Integer formats are shifted to 16 bits, float formats are scaled by
/// `i16::MAX` and clamped.
pub fn read_mono_i16(path: &Path) -> Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                bail!("unsupported bit depth {}", spec.bits_per_sample);
            }
            let bits = u32::from(spec.bits_per_sample);
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|v| {
                        if bits > 16 {
                            (v >> (bits - 16)) as i16
                        } else {
                            (v << (16 - bits)) as i16
                        }
                    })
                })
                .collect::<Result<_, _>>()?
        }
    };

    let samples = interleaved.into_iter().step_by(channels).collect();
    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("string-tuner-{}-{name}", std::process::id()))
    }

    #[test]
    fn keeps_first_channel_of_stereo_pcm() {
        let path = temp_path("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for (left, right) in [(100i16, -1), (200, -2), (300, -3)] {
            writer.write_sample(left).unwrap();
            writer.write_sample(right).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, rate) = read_mono_i16(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(rate, 8000);
        assert_eq!(samples, vec![100, 200, 300]);
    }

    #[test]
    fn scales_float_samples() {
        let path = temp_path("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for v in [0.0f32, 0.5, -1.0, 2.0] {
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, _) = read_mono_i16(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(samples, vec![0, 16383, -32767, i16::MAX]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_mono_i16(Path::new("/nonexistent/string-tuner.wav")).is_err());
    }
}
