//! Runtime controls for the live loop.
//!
//! Commands arrive on a channel fed by a stdin reader thread and are applied
//! only between analysis rounds, so a running round never sees a change.

use crossbeam_channel::Sender;
use std::io::BufRead;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

const RECORD_STEP: f64 = 0.1;
const RECORD_MIN: f64 = 0.1;
const DISPLAY_STEP: f64 = 100.0;
const DISPLAY_MIN: f64 = 500.0;
const DISPLAY_MAX: f64 = 10_000.0;
pub const DEFAULT_DISPLAY_MAX: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Longer,
    Shorter,
    Wider,
    Narrower,
    Reset,
    Pause,
    Resume,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "longer" | "k" => Ok(Command::Longer),
            "shorter" | "j" => Ok(Command::Shorter),
            "wider" | "m" => Ok(Command::Wider),
            "narrower" | "n" => Ok(Command::Narrower),
            "reset" | "r" => Ok(Command::Reset),
            "pause" | "x" => Ok(Command::Pause),
            "resume" | "" => Ok(Command::Resume),
            "quit" | "q" | "y" => Ok(Command::Quit),
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

/// What the loop should do after a command was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Unchanged,
    /// Record length changed; the analysis window must be rebuilt.
    Reconfigured,
    Pause,
    Resume,
    Quit,
}

/// Settings owned by the outer loop rather than the core.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub record_seconds: f64,
    /// Highest partial frequency shown in the report.
    pub display_max: f64,
}

impl SessionSettings {
    pub fn new(record_seconds: f64) -> Self {
        Self {
            record_seconds: record_seconds.max(RECORD_MIN),
            display_max: DEFAULT_DISPLAY_MAX,
        }
    }

    pub fn record_duration(&self) -> Duration {
        Duration::from_secs_f64(self.record_seconds)
    }

    /// Samples per analysis window at the given rate.
    pub fn window_size(&self, sample_rate: u32) -> usize {
        (self.record_seconds * sample_rate as f64).round() as usize
    }

    pub fn apply(&mut self, command: Command) -> Control {
        match command {
            Command::Longer => {
                self.record_seconds += RECORD_STEP;
                info!("Recording Time: {:.1}s", self.record_seconds);
                Control::Reconfigured
            }
            Command::Shorter => {
                self.record_seconds = (self.record_seconds - RECORD_STEP).max(RECORD_MIN);
                info!("Recording Time: {:.1}s", self.record_seconds);
                Control::Reconfigured
            }
            Command::Wider => {
                self.display_max = (self.display_max + DISPLAY_STEP).min(DISPLAY_MAX);
                Control::Unchanged
            }
            Command::Narrower => {
                self.display_max = (self.display_max - DISPLAY_STEP).max(DISPLAY_MIN);
                Control::Unchanged
            }
            Command::Reset => {
                self.display_max = DEFAULT_DISPLAY_MAX;
                Control::Unchanged
            }
            Command::Pause => {
                info!("paused, send 'resume' (or an empty line) to continue");
                Control::Pause
            }
            Command::Resume => Control::Resume,
            Command::Quit => {
                info!("quitting...");
                Control::Quit
            }
        }
    }
}

/// Reads commands from stdin, one per line, until stdin closes.
pub fn spawn_command_reader(sender: Sender<Command>) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match line.parse::<Command>() {
                    Ok(command) => {
                        if sender.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_length_never_drops_below_floor() {
        let mut settings = SessionSettings::new(0.2);
        assert_eq!(settings.apply(Command::Shorter), Control::Reconfigured);
        assert_eq!(settings.apply(Command::Shorter), Control::Reconfigured);
        assert!((settings.record_seconds - RECORD_MIN).abs() < 1e-9);
    }

    #[test]
    fn display_ceiling_is_clamped_and_resettable() {
        let mut settings = SessionSettings::new(1.0);
        for _ in 0..200 {
            settings.apply(Command::Wider);
        }
        assert_eq!(settings.display_max, DISPLAY_MAX);
        for _ in 0..200 {
            settings.apply(Command::Narrower);
        }
        assert_eq!(settings.display_max, DISPLAY_MIN);
        assert_eq!(settings.apply(Command::Reset), Control::Unchanged);
        assert_eq!(settings.display_max, DEFAULT_DISPLAY_MAX);
    }

    #[test]
    fn commands_parse_from_words_and_hotkey_letters() {
        assert_eq!("longer".parse::<Command>(), Ok(Command::Longer));
        assert_eq!(" K ".parse::<Command>(), Ok(Command::Longer));
        assert_eq!("".parse::<Command>(), Ok(Command::Resume));
        assert_eq!("q".parse::<Command>(), Ok(Command::Quit));
        assert!("louder".parse::<Command>().is_err());
    }

    #[test]
    fn window_size_follows_record_length() {
        let settings = SessionSettings::new(0.5);
        assert_eq!(settings.window_size(44100), 22050);
    }
}
