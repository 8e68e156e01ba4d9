use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use pacer::{
    Engine, Frame, IntervalVsync, PacerConfig, StillImage, TargetId, VsyncFeed,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_LATE_TOLERANCE,
};
use renderer::{
    GpuOptions, GpuPowerPreference, InputImage, InputSurface, SurfaceSpec, TextureSpec,
    WgpuBackend,
};
use testdef::{Feed, TargetConfig, TestDefinition};
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::paths::AppPaths;
use crate::report::{default_report_path, RunReport, StatsReport, TargetRecord};
use crate::source::RawFileReader;

/// Codec output buffers in flight at once, as a decoder would allocate.
const BUFFER_POOL_SIZE: usize = 4;
const RENDER_THREAD: &str = "pacebench-render";

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run(args: RunArgs) -> Result<()> {
    let mut test = TestDefinition::load(&args.test)?;
    args.apply(&mut test);
    test.validate()?;
    test.apply_basic_defaults();

    let codec = test.codec_params()?;
    for (key, value) in codec.iter() {
        tracing::debug!(key, ?value, "codec parameter");
    }
    tracing::info!(
        test = %args.test.display(),
        codec = %test.configure.codec,
        params = codec.len(),
        "translated codec configuration"
    );

    let report_path = match &args.report {
        Some(path) => path.clone(),
        None => {
            let paths = AppPaths::discover()?;
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
            default_report_path(paths.report_dir(), &args.test, &stamp)
        }
    };

    let resolution = test.input_resolution();
    let mut reader = RawFileReader::open(&test.input.filepath)?;
    tracing::info!(
        input = %reader.path().display(),
        %resolution,
        frame_size = test.frame_size(),
        feed = ?test.render.feed,
        "opened raw input"
    );
    let input = InputSurface::new();
    let options = GpuOptions {
        power: if args.high_performance {
            GpuPowerPreference::High
        } else {
            GpuPowerPreference::Low
        },
        ..GpuOptions::default()
    };
    let config = PacerConfig {
        drop_late_frames: test.render.drop_frames,
        late_tolerance: test.render.late_tolerance.unwrap_or(DEFAULT_LATE_TOLERANCE),
        idle_timeout: test.render.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT),
        thread_name: RENDER_THREAD.into(),
    };
    let vsync = VsyncFeed::Thread(Box::new(IntervalVsync::from_hz(test.render.refresh_rate)));
    let master = SurfaceSpec::texture("master", resolution.width, resolution.height);

    let mut engine = Engine::start(
        WgpuBackend::new(options, input.clone()),
        master,
        config.clone(),
        vsync,
    )
    .context("failed to start pacing engine")?;
    engine
        .confirm_target_size(resolution.width, resolution.height)
        .context("failed to confirm input size")?;

    let started = Instant::now();
    let mut playout = Playout::new(&test, input);
    let outcome = playout.play(&engine, &mut reader, &config);
    reader.close();

    let drain_deadline = Instant::now()
        .checked_add(config.late_tolerance.saturating_add(config.idle_timeout));
    while engine.pending() > 0
        && drain_deadline.map_or(true, |deadline| Instant::now() < deadline)
    {
        engine.await_latest_presented_timestamp(config.idle_timeout);
    }
    if engine.pending() > 0 {
        tracing::warn!(pending = engine.pending(), "shutting down with frames still queued");
    }
    engine.shutdown();
    outcome?;

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    let stats = engine.stats();
    let report = RunReport {
        test: args.test.clone(),
        date: chrono::Local::now().to_rfc3339(),
        feed: test.render.feed,
        frames_fed: playout.fed,
        loops: playout.loops,
        awaited: playout.awaited,
        await_timeouts: playout.await_timeouts,
        elapsed_ms,
        effective_fps: RunReport::fps(
            stats.drawn + stats.stills_drawn + stats.immediate_draws,
            elapsed_ms,
        ),
        last_presented_ns: playout.last_presented_ns,
        stats: StatsReport::from(stats),
        targets: playout.records(),
        codec,
    };
    report.write(&report_path)?;
    tracing::info!(
        report = %report_path.display(),
        fed = report.frames_fed,
        drawn = report.stats.drawn,
        dropped = report.stats.dropped,
        fps = report.effective_fps,
        "benchmark finished"
    );
    Ok(())
}

/// Recyclable codec output buffers. A frame holds a permit from enqueue
/// until the scheduler releases it.
struct BufferPool {
    returns: Sender<()>,
    available: Receiver<()>,
}

impl BufferPool {
    fn new(size: usize) -> Self {
        let (returns, available) = bounded(size);
        for _ in 0..size {
            let _ = returns.try_send(());
        }
        Self { returns, available }
    }

    fn acquire(&self, timeout: Duration) -> Result<Permit> {
        match self.available.recv_timeout(timeout) {
            Ok(()) => Ok(Permit {
                returns: self.returns.clone(),
            }),
            Err(RecvTimeoutError::Timeout) => bail!(
                "no codec buffer came back within {}; the scheduler is holding every frame",
                humantime::format_duration(timeout)
            ),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("codec buffer pool closed")),
        }
    }
}

struct Permit {
    returns: Sender<()>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.returns.try_send(());
    }
}

struct AttachedTarget {
    config: TargetConfig,
    id: Option<TargetId>,
    record: TargetRecord,
}

struct Playout {
    feed: Feed,
    sync: bool,
    realtime: bool,
    looping: bool,
    limit: Option<u64>,
    width: u32,
    height: u32,
    frame_interval_us: f64,
    frame_size: usize,
    input: InputSurface,
    targets: Vec<AttachedTarget>,
    fed: u64,
    loops: u64,
    awaited: u64,
    await_timeouts: u64,
    last_presented_ns: Option<i64>,
}

impl Playout {
    fn new(test: &TestDefinition, input: InputSurface) -> Self {
        let resolution = test.input_resolution();
        let targets = test
            .render
            .targets
            .iter()
            .map(|config| AttachedTarget {
                config: config.clone(),
                id: None,
                record: TargetRecord {
                    name: config.name.clone(),
                    resolution: config.resolution.to_string(),
                    capture: config.capture.clone(),
                    ..TargetRecord::default()
                },
            })
            .collect();
        Self {
            feed: test.render.feed,
            sync: test.render.sync,
            realtime: test.input.realtime,
            looping: test.input.looping,
            limit: test.input.playout_frames,
            width: resolution.width,
            height: resolution.height,
            frame_interval_us: 1_000_000.0 / f64::from(test.input_framerate()),
            frame_size: test.frame_size() as usize,
            input,
            targets,
            fed: 0,
            loops: 0,
            awaited: 0,
            await_timeouts: 0,
            last_presented_ns: None,
        }
    }

    fn play(
        &mut self,
        engine: &Engine<SurfaceSpec>,
        reader: &mut RawFileReader,
        config: &PacerConfig,
    ) -> Result<()> {
        let pool = BufferPool::new(BUFFER_POOL_SIZE);
        let starve_timeout = config
            .late_tolerance
            .saturating_add(config.idle_timeout.saturating_mul(2));
        let mut pixels = vec![0u8; self.frame_size];
        let started = Instant::now();
        let mut read_since_rewind = 0u64;

        loop {
            if self.limit.is_some_and(|limit| self.fed >= limit) {
                break;
            }
            self.update_targets(engine)?;

            if !reader.read_frame(&mut pixels)? {
                if self.looping && read_since_rewind > 0 {
                    reader.rewind()?;
                    self.loops += 1;
                    read_since_rewind = 0;
                    tracing::debug!(loops = self.loops, "rewound raw input");
                    continue;
                }
                break;
            }
            read_since_rewind += 1;

            let pts_us = (self.fed as f64 * self.frame_interval_us) as i64;
            if self.realtime {
                let due = started + Duration::from_micros(pts_us.max(0) as u64);
                if let Some(wait) = due.checked_duration_since(Instant::now()) {
                    thread::sleep(wait);
                }
            }

            match self.feed {
                Feed::Frames => {
                    let permit = pool.acquire(starve_timeout)?;
                    let input = self.input.clone();
                    let image =
                        InputImage::new(self.width, self.height, pixels.clone(), pts_us * 1000);
                    engine.signal_new_frame(Frame::with_release(pts_us, move |render| {
                        if render {
                            input.queue(image);
                        }
                        drop(permit);
                        Ok(())
                    }));
                }
                Feed::Signal => {
                    self.input.queue(InputImage::new(
                        self.width,
                        self.height,
                        pixels.clone(),
                        pts_us * 1000,
                    ));
                    engine.signal_frame_ready();
                }
                Feed::Stills => {
                    engine.signal_new_image(StillImage::new(
                        self.width,
                        self.height,
                        pixels.clone(),
                        pts_us,
                    ));
                }
            }
            self.fed += 1;

            if self.sync {
                match engine.await_latest_presented_timestamp(config.idle_timeout) {
                    Some(timestamp_ns) => {
                        self.awaited += 1;
                        self.last_presented_ns = Some(timestamp_ns);
                    }
                    None => self.await_timeouts += 1,
                }
            }
        }

        tracing::debug!(fed = self.fed, loops = self.loops, "playout finished");
        Ok(())
    }

    /// Attaches and detaches extra targets whose window starts or ends at the
    /// next frame index.
    fn update_targets(&mut self, engine: &Engine<SurfaceSpec>) -> Result<()> {
        let index = self.fed;
        for target in &mut self.targets {
            if target.id.is_none()
                && target.record.attached_at.is_none()
                && target.record.error.is_none()
                && target.config.attach_frame() <= index
            {
                let spec = SurfaceSpec::Texture(TextureSpec {
                    label: target.config.name.clone(),
                    width: target.config.resolution.width,
                    height: target.config.resolution.height,
                    capture: target.config.capture.clone(),
                });
                match engine.add_target(spec) {
                    Ok(id) => {
                        tracing::info!(
                            target = %target.config.name,
                            %id,
                            frame = index,
                            "attached render target"
                        );
                        target.id = Some(id);
                        target.record.attached_at = Some(index);
                    }
                    Err(err) => {
                        tracing::warn!(
                            target = %target.config.name,
                            %err,
                            "failed to attach render target"
                        );
                        target.record.error = Some(err.to_string());
                    }
                }
            }

            if let (Some(id), Some(detach)) = (target.id, target.config.detach_at) {
                if detach <= index {
                    let removed = engine
                        .remove_target(id)
                        .with_context(|| format!("failed to detach {}", target.config.name))?;
                    tracing::info!(
                        target = %target.config.name,
                        %id,
                        frame = index,
                        removed,
                        "detached render target"
                    );
                    target.id = None;
                    target.record.detached_at = Some(index);
                }
            }
        }
        Ok(())
    }

    fn records(&self) -> Vec<TargetRecord> {
        self.targets
            .iter()
            .map(|target| target.record.clone())
            .collect()
    }
}
