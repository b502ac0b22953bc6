//! # String Tuner
//!
//! Command-line front end for the tuner core. It records or loads a window
//! of samples, runs the estimation pipeline on it and prints the matched key
//! with its cent offset.
//!
//! ## Architecture
//! - **Main thread**: capture, analysis and output, one round at a time
//! - **Command thread**: reads control commands from stdin
//! - **Communication**: a crossbeam channel drained between rounds

mod capture;
mod report;
mod session;
mod wav;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use tracing::info;
use tuner_core::{Analysis, AnalysisConfig, Tuner, TuningTable};

use capture::Capture;
use session::{Command, Control, DEFAULT_DISPLAY_MAX, SessionSettings};

#[derive(Parser, Debug)]
#[command(name = "string-tuner", version, about = "Inharmonicity-aware string tuner")]
struct Cli {
    /// Built-in temperament to match against.
    #[arg(long, global = true)]
    temperament: Option<String>,

    /// Reference pitch of A in Hz.
    #[arg(long, global = true)]
    a1: Option<f64>,

    /// JSON file with analysis settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON tuning table (`{"C": 0.0, ...}`), overrides --temperament.
    #[arg(long, global = true)]
    table: Option<PathBuf>,

    /// Print each analysis as a JSON line instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Analyse the default input device continuously.
    Listen {
        /// Length of each recorded window in seconds.
        #[arg(long, default_value_t = 1.0)]
        seconds: f64,
    },
    /// Analyse one window of a WAV file.
    Analyze {
        file: PathBuf,
        /// Start of the window in seconds.
        #[arg(long, default_value_t = 0.0)]
        offset: f64,
    },
    /// List the built-in temperaments.
    Temperaments,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("string_tuner=info,tuner_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Mode::Temperaments => {
            list_temperaments();
            Ok(())
        }
        Mode::Analyze { ref file, offset } => {
            let table = load_table(&cli, &config)?;
            analyze_file(file, offset, config, table, cli.json)
        }
        Mode::Listen { seconds } => {
            let table = load_table(&cli, &config)?;
            listen(seconds, config, table, cli.json)
        }
    }
}

fn load_config(cli: &Cli) -> Result<AnalysisConfig> {
    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if let Some(name) = &cli.temperament {
        config.temperament = name.clone();
    }
    if let Some(a1) = cli.a1 {
        config.reference_pitch = a1;
    }
    Ok(config)
}

fn load_table(cli: &Cli, config: &AnalysisConfig) -> Result<TuningTable> {
    match &cli.table {
        Some(path) => {
            TuningTable::from_json_file(path).with_context(|| format!("loading tuning table {}", path.display()))
        }
        None => TuningTable::builtin(&config.temperament).context("selecting temperament"),
    }
}

fn list_temperaments() {
    for name in TuningTable::builtin_names() {
        let Ok(table) = TuningTable::builtin(name) else { continue };
        let row: Vec<String> = table
            .entries()
            .iter()
            .map(|(key, cents)| format!("{key}={cents:.1}"))
            .collect();
        println!("{name:<16} {}", row.join(" "));
    }
}

fn print_analysis(analysis: &Analysis, tuner: &Tuner, display_max: f64, json: bool) {
    if json {
        let line = serde_json::json!({
            "temperament": tuner.table().name(),
            "a1": tuner.config().reference_pitch,
            "fit": analysis.fit,
            "key": analysis.key_match,
            "partials": analysis.partials,
            "regression": analysis.regression,
            "diagnostics": analysis.diagnostics,
        });
        println!("{line}");
    } else {
        print!(
            "{}",
            report::render(analysis, tuner.table().name(), tuner.config().reference_pitch, display_max)
        );
    }
}

fn analyze_file(file: &Path, offset: f64, config: AnalysisConfig, table: TuningTable, json: bool) -> Result<()> {
    let (samples, rate) = wav::read_mono_i16(file)?;
    if rate == 0 {
        bail!("{} declares a sample rate of 0", file.display());
    }
    let start = (offset.max(0.0) * rate as f64) as usize;
    if start >= samples.len() {
        bail!("offset {offset}s is past the end of {}", file.display());
    }
    let end = (start + config.window_size).min(samples.len());
    info!(
        "analysing {} samples from {} at {rate} Hz",
        end - start,
        file.display()
    );

    let tuner = Tuner::new(config, table)?;
    let analysis = tuner.analyze(&samples[start..end], rate);
    print_analysis(&analysis, &tuner, DEFAULT_DISPLAY_MAX, json);
    Ok(())
}

fn listen(seconds: f64, mut config: AnalysisConfig, table: TuningTable, json: bool) -> Result<()> {
    let capture = Capture::open()?;
    let rate = capture.sample_rate();
    let mut settings = SessionSettings::new(seconds);

    config.window_size = settings.window_size(rate);
    let mut tuner = Tuner::new(config.clone(), table.clone())?;

    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    session::spawn_command_reader(command_tx).context("starting command reader")?;
    info!("commands: longer shorter wider narrower reset pause resume quit");

    let mut paused = false;
    loop {
        let (rebuild, quit) = drain_commands(&command_rx, &mut settings, &mut paused);
        if quit {
            break;
        }
        if rebuild {
            config.window_size = settings.window_size(rate);
            tuner = Tuner::new(config.clone(), table.clone())?;
        }

        let samples = capture.record(settings.record_duration())?;
        let analysis = tuner.analyze(&samples, rate);
        print_analysis(&analysis, &tuner, settings.display_max, json);
    }
    Ok(())
}

/// Applies every queued command, blocking while paused.
///
/// Returns `(rebuild, quit)`.
fn drain_commands(commands: &Receiver<Command>, settings: &mut SessionSettings, paused: &mut bool) -> (bool, bool) {
    let mut rebuild = false;
    loop {
        let command = if *paused {
            match commands.recv() {
                Ok(command) => command,
                // stdin closed, nothing could ever resume us
                Err(_) => {
                    *paused = false;
                    break;
                }
            }
        } else {
            match commands.try_recv() {
                Ok(command) => command,
                Err(_) => break,
            }
        };
        match settings.apply(command) {
            Control::Unchanged => {}
            Control::Reconfigured => rebuild = true,
            Control::Pause => *paused = true,
            Control::Resume => *paused = false,
            Control::Quit => return (rebuild, true),
        }
    }
    (rebuild, false)
}
