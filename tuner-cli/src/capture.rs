//! # Audio Capture
//!
//! Live capture with CPAL (Cross-Platform Audio Library) from the default
//! input device. The stream runs only while a window is being recorded and
//! is paused during analysis.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;
use tracing::{error, info};

/// Preferred capture rate in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 44100;

/// An input stream plus the channel its callback feeds.
pub struct Capture {
    stream: cpal::Stream,
    receiver: Receiver<Vec<i16>>,
    sample_rate: u32,
}

impl Capture {
    /// Opens the default input device, leaving the stream paused.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;
        info!("Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported = find_supported_config(configs, TARGET_SAMPLE_RATE)
            .ok_or_else(|| anyhow!("No suitable i16/f32 input format found"))?;

        let rate = TARGET_SAMPLE_RATE.clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
        let config = supported.with_sample_rate(cpal::SampleRate(rate));
        let sample_format = config.sample_format();
        let channels = config.channels() as usize;
        let config: cpal::StreamConfig = config.into();
        info!("Selected sample rate: {rate} Hz, {channels} channel(s), {sample_format:?}");

        let (sender, receiver) = crossbeam_channel::unbounded();
        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, sender, |s| s)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, sender, |s| {
                (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
            })?,
            other => return Err(anyhow!("Unsupported sample format {other:?}")),
        };
        stream.pause().context("pausing fresh input stream")?;

        Ok(Self {
            stream,
            receiver,
            sample_rate: rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Records for `duration` and returns the mono samples.
    ///
    /// Blocks the caller; the stream is paused again before returning.
    pub fn record(&self, duration: Duration) -> Result<Vec<i16>> {
        // Drop anything that trickled in after the last pause.
        self.receiver.try_iter().for_each(drop);

        self.stream.play().context("starting input stream")?;
        std::thread::sleep(duration);
        self.stream.pause().context("pausing input stream")?;

        Ok(self.receiver.try_iter().flatten().collect())
    }
}

/// Builds an input stream that forwards the first channel as i16 frames.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sender: Sender<Vec<i16>>,
    convert: fn(T) -> i16,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + 'static,
{
    let err_fn = |err| error!("An error occurred on the audio stream: {}", err);
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let frame: Vec<i16> = data.iter().step_by(channels.max(1)).map(|&s| convert(s)).collect();
            // The receiver only disappears on shutdown.
            let _ = sender.send(frame);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Picks the configuration closest to what the analysis wants:
/// an i16 or f32 format, as few channels as possible, and a rate range near
/// `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
            let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
            let in_range = c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0;
            (c.channels(), if in_range { 0 } else { min_diff.min(max_diff) })
        })
}
