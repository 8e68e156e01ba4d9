use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use testdef::{Feed, TestDefinition};

#[derive(Parser, Debug)]
#[command(
    name = "pacebench",
    author,
    version,
    about = "Paces raw video through the frame scheduler and reports what reached the display"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a test definition through the pacing engine and write a report.
    Run(RunArgs),
    /// Print a test definition with defaults applied, plus its codec parameters.
    Describe(DescribeArgs),
    /// Print resolved directories.
    Where,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Test definition (TOML).
    #[arg(value_name = "TEST")]
    pub test: PathBuf,

    /// Stop after this many frames (overrides `input.playout_frames`).
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u64>,

    /// Draw every frame, however late (overrides `render.drop_frames`).
    #[arg(long)]
    pub no_drop: bool,

    /// How far a frame may run ahead of the display before pacing waits (e.g. `2s`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub late_tolerance: Option<Duration>,

    /// Rate of the synthetic vsync in Hz.
    #[arg(long, value_name = "HZ")]
    pub refresh_rate: Option<f64>,

    /// Producer path: `frames`, `signal`, or `stills`.
    #[arg(long, value_name = "FEED", value_parser = parse_feed)]
    pub feed: Option<Feed>,

    /// Wait for each frame's presentation before feeding the next.
    #[arg(long)]
    pub sync: bool,

    /// Feed frames at the input framerate instead of as fast as possible.
    #[arg(long)]
    pub realtime: bool,

    /// Report destination; defaults to a timestamped file in the report directory.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Prefer a high-performance GPU adapter.
    #[arg(long)]
    pub high_performance: bool,
}

impl RunArgs {
    /// Folds command-line overrides into the loaded test.
    pub fn apply(&self, test: &mut TestDefinition) {
        if let Some(frames) = self.frames {
            test.input.playout_frames = Some(frames);
        }
        if self.no_drop {
            test.render.drop_frames = false;
        }
        if let Some(tolerance) = self.late_tolerance {
            test.render.late_tolerance = Some(tolerance);
        }
        if let Some(rate) = self.refresh_rate {
            test.render.refresh_rate = rate;
        }
        if let Some(feed) = self.feed {
            test.render.feed = feed;
        }
        test.render.sync |= self.sync;
        test.input.realtime |= self.realtime;
    }
}

#[derive(Parser, Debug)]
pub struct DescribeArgs {
    /// Test definition (TOML).
    #[arg(value_name = "TEST")]
    pub test: PathBuf,

    /// Print single-line JSON.
    #[arg(long)]
    pub compact: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("duration must not be empty".to_string());
    }
    if let Ok(seconds) = trimmed.parse::<f64>() {
        if seconds.is_nan() || seconds < 0.0 {
            return Err(format!("invalid duration '{trimmed}'; must be non-negative"));
        }
        return Duration::try_from_secs_f64(seconds)
            .map_err(|_| format!("invalid duration '{trimmed}'; out of range"));
    }
    humantime::parse_duration(trimmed).map_err(|err| format!("invalid duration '{trimmed}': {err}"))
}

pub fn parse_feed(value: &str) -> Result<Feed, String> {
    value.parse().map_err(|err: testdef::ConfigError| err.to_string())
}
