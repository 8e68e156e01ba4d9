use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pacer::EngineStats;
use serde::Serialize;
use testdef::{CodecParams, Feed};

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub enqueued: u64,
    pub drawn: u64,
    pub dropped: u64,
    pub released: u64,
    pub stale_releases: u64,
    pub stills_drawn: u64,
    pub immediate_draws: u64,
    pub presents: u64,
    pub target_errors: u64,
    pub cycles: u64,
}

impl From<EngineStats> for StatsReport {
    fn from(stats: EngineStats) -> Self {
        Self {
            enqueued: stats.enqueued,
            drawn: stats.drawn,
            dropped: stats.dropped,
            released: stats.released,
            stale_releases: stats.stale_releases,
            stills_drawn: stats.stills_drawn,
            immediate_draws: stats.immediate_draws,
            presents: stats.presents,
            target_errors: stats.target_errors,
            cycles: stats.cycles,
        }
    }
}

/// Attach window of one extra render target, in fed-frame indices.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TargetRecord {
    pub name: String,
    pub resolution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detached_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub test: PathBuf,
    pub date: String,
    pub feed: Feed,
    pub frames_fed: u64,
    pub loops: u64,
    pub awaited: u64,
    pub await_timeouts: u64,
    pub elapsed_ms: f64,
    pub effective_fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_presented_ns: Option<i64>,
    pub stats: StatsReport,
    pub targets: Vec<TargetRecord>,
    pub codec: CodecParams,
}

impl RunReport {
    /// Presents per second of wall time on the master target.
    pub fn fps(drawn: u64, elapsed_ms: f64) -> f64 {
        if elapsed_ms <= 0.0 {
            0.0
        } else {
            drawn as f64 * 1000.0 / elapsed_ms
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create report directory {}", dir.display()))?;
        }
        let serialized =
            serde_json::to_string_pretty(self).context("failed to serialize run report")?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write report to {}", path.display()))
    }
}

/// `<report_dir>/<test-stem>-<YYYYmmdd-HHMMSS>.json`
pub fn default_report_path(report_dir: &Path, test: &Path, stamp: &str) -> PathBuf {
    let stem = test
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("test");
    report_dir.join(format!("{stem}-{stamp}.json"))
}
