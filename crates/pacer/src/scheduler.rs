//! The render scheduler thread.
//!
//! ```text
//!   producers ──▶ Command queue ──▶ Scheduler::run ──▶ decide(frame)
//!                                        │                 │ drift vs vsync
//!                                        │                 ▼
//!                                        │         release ─▶ drop | present_all
//!                                        ▼                              │
//!                                  registry mutations        snapshot ─▶ blit per target
//! ```
//!
//! Everything in this module runs on the one thread that owns the GPU
//! context. Commands are handled strictly in the order they were sent, so a
//! target added between two frames only ever sees the second.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::config::{drift_ns, PacerConfig};
use crate::error::{EngineError, GpuError, SetupError};
use crate::frame::{Frame, SourceFrame, TextureId, Transform, IDENTITY_TRANSFORM};
use crate::queue::Command;
use crate::registry::{Removal, TargetId, TargetRegistry};
use crate::state::{Counters, Phase, Shared};
use crate::target::{Backend, Device, RenderTarget};
use crate::vsync::VsyncClock;

type Spec<B> = <B as Backend>::Spec;

/// Mutable pacing state private to the scheduler thread.
#[derive(Debug)]
struct SchedulerState {
    current_texture: Option<TextureId>,
    transform: Transform,
    latest_presented_ns: Option<i64>,
    epoch_us: Option<i64>,
    /// The last bound texture is a still image rather than the input surface.
    holding_still: bool,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            current_texture: None,
            transform: IDENTITY_TRANSFORM,
            latest_presented_ns: None,
            epoch_us: None,
            holding_still: false,
        }
    }
}

/// Outcome of one pass over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PassReport {
    presented: usize,
    skipped: usize,
    failed: usize,
}

pub(crate) struct Scheduler<B: Backend> {
    device: B::Device,
    registry: TargetRegistry<<B::Device as Device>::Target>,
    commands: Receiver<Command<Spec<B>>>,
    shared: Arc<Shared>,
    vsync: Arc<VsyncClock>,
    config: PacerConfig,
    state: SchedulerState,
}

/// Thread entry point: opens the device, reports readiness, then runs.
pub(crate) fn run_scheduler<B: Backend>(
    backend: B,
    master: Spec<B>,
    config: PacerConfig,
    commands: Receiver<Command<Spec<B>>>,
    shared: Arc<Shared>,
    vsync: Arc<VsyncClock>,
    ready: Sender<Result<TargetId, SetupError>>,
) {
    let (device, master) = match backend.open(master) {
        Ok(opened) => opened,
        Err(err) => {
            tracing::error!(error = %err, "render scheduler setup failed");
            shared.set_phase(Phase::Terminated);
            let _ = ready.send(Err(err));
            return;
        }
    };
    let registry = TargetRegistry::with_master(master);
    let master_id = registry.master_id();
    let mut scheduler: Scheduler<B> = Scheduler {
        device,
        registry,
        commands,
        shared,
        vsync,
        config,
        state: SchedulerState::default(),
    };
    scheduler.shared.set_phase(Phase::AwaitingSize);
    if ready.send(Ok(master_id)).is_err() {
        tracing::debug!("engine handle vanished before start-up finished");
    }
    scheduler.run();
}

impl<B: Backend> Scheduler<B> {
    fn run(mut self) {
        let deferred = self.await_size();
        let mut alive = deferred.is_some();
        if let Some(deferred) = deferred {
            self.shared.set_phase(Phase::Ready);
            for command in deferred {
                if !self.handle(command) {
                    alive = false;
                    break;
                }
            }
        }

        while alive && !self.shared.is_done() {
            match self.commands.recv_timeout(self.config.wait_slice()) {
                Ok(command) => alive = self.handle(command),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::trace!("no frames available; idle");
                    self.shared.set_phase(Phase::Idle);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.teardown();
    }

    /// Blocks until the target size is confirmed.
    ///
    /// Target mutations are served while waiting; work items are held back
    /// and returned in order. `None` means shutdown arrived first.
    fn await_size(&mut self) -> Option<VecDeque<Command<Spec<B>>>> {
        let mut deferred = VecDeque::new();
        loop {
            let command = match self.commands.recv() {
                Ok(command) => command,
                Err(_) => {
                    self.drain_deferred(deferred);
                    return None;
                }
            };
            match command {
                Command::ConfirmSize { width, height } => {
                    if let Err(err) = self.device.set_source_size(width, height) {
                        tracing::warn!(error = %err, width, height, "failed to size input surface");
                    }
                    tracing::info!(width, height, "target size confirmed");
                    return Some(deferred);
                }
                Command::Shutdown => {
                    deferred.push_back(Command::Shutdown);
                    self.drain_deferred(deferred);
                    return None;
                }
                work if work.is_work() => deferred.push_back(work),
                control => {
                    self.handle(control);
                }
            }
        }
    }

    /// Handles one command; `false` ends the loop.
    fn handle(&mut self, command: Command<Spec<B>>) -> bool {
        match command {
            Command::Frame(frame) => {
                self.shared.set_phase(Phase::Processing);
                self.decide(frame);
                self.finish_cycle();
            }
            Command::StillStaged => {
                self.shared.set_phase(Phase::Processing);
                self.draw_staged_still();
                self.finish_cycle();
            }
            Command::FrameReady => {
                self.shared.set_phase(Phase::Processing);
                if !self.draw_staged_still() {
                    self.draw_immediate();
                }
                self.finish_cycle();
            }
            Command::AddTarget { spec, reply } => {
                let result = self.add_target(spec);
                let _ = reply.send(result);
            }
            Command::RemoveTarget { id, reply } => {
                let result = self.remove_target(id);
                let _ = reply.send(result);
            }
            Command::ConfirmSize { width, height } => {
                tracing::warn!(width, height, "ignoring repeated target size confirmation");
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn add_target(&mut self, spec: Spec<B>) -> Result<TargetId, EngineError> {
        let target = self
            .device
            .create_target(spec)
            .map_err(EngineError::Target)?;
        let (width, height) = target.size();
        let kind = target.kind();
        let id = self.registry.insert(target);
        tracing::info!(
            target_id = %id,
            ?kind,
            width,
            height,
            targets = self.registry.len(),
            "render target added"
        );
        Ok(id)
    }

    fn remove_target(&mut self, id: TargetId) -> Result<bool, EngineError> {
        match self.registry.remove(id) {
            (Removal::Removed, Some(target)) => {
                self.device.destroy_target(target);
                tracing::info!(target_id = %id, "render target removed");
                Ok(true)
            }
            (Removal::Master, _) => Err(EngineError::MasterTarget),
            _ => {
                tracing::debug!(target_id = %id, "target already removed");
                Ok(false)
            }
        }
    }

    /// The per-frame draw-or-drop decision.
    fn decide(&mut self, frame: Frame) {
        let pts_us = frame.pts_us();
        let epoch_us = *self.state.epoch_us.get_or_insert(pts_us);
        let tolerance_ns = self.config.late_tolerance_ns();

        let mut sample = self.vsync.latest();
        let mut drift = drift_ns(pts_us, epoch_us, sample.offset_ns);
        while drift > tolerance_ns {
            if self.shared.is_done() {
                tracing::debug!(pts_us, "shutdown while pacing; releasing frame unrendered");
                self.shared.record_release(frame.release(false));
                return;
            }
            tracing::trace!(pts_us, drift_ns = drift, "running ahead of vsync; waiting");
            match self.vsync.wait_past(sample.sequence, self.config.wait_slice()) {
                Some(next) => sample = next,
                None => {
                    tracing::trace!(pts_us, "no vsync within wait slice");
                    sample = self.vsync.latest();
                }
            }
            drift = drift_ns(pts_us, epoch_us, sample.offset_ns);
        }

        let late = self.config.drop_late_frames && drift < 0;
        self.shared.record_release(frame.release(!late));
        if late {
            Counters::bump(&self.shared.counters.dropped);
            tracing::debug!(pts_us, drift_ns = drift, "dropping late frame");
            return;
        }

        if let Some(source) = self.latch(Some(pts_us.saturating_mul(1000))) {
            Counters::bump(&self.shared.counters.drawn);
            self.present_all(&source);
        }
    }

    /// Draws the staged still image, if any; returns whether one was drawn.
    fn draw_staged_still(&mut self) -> bool {
        let Some(image) = self.shared.still.lock().take() else {
            return false;
        };
        if let Err(err) = self.bind_master() {
            tracing::warn!(error = %err, "failed to bind master target for still image");
            return true;
        }
        match self.device.load_still(&image) {
            Ok(mut source) => {
                source.timestamp_ns = Some(image.pts_us.saturating_mul(1000));
                self.remember(&source);
                self.state.holding_still = true;
                Counters::bump(&self.shared.counters.stills_drawn);
                self.present_all(&source);
            }
            Err(err) => {
                Counters::bump(&self.shared.counters.target_errors);
                tracing::warn!(error = %err, "failed to upload still image");
            }
        }
        true
    }

    /// Redraws the last bound texture. The input surface is re-latched so a
    /// producer that wrote into it directly is picked up; a still image is
    /// drawn again as it is.
    fn draw_immediate(&mut self) {
        let source = if self.state.holding_still {
            self.rebind_current()
        } else {
            self.latch(None)
        };
        if let Some(source) = source {
            Counters::bump(&self.shared.counters.immediate_draws);
            self.present_all(&source);
        }
    }

    fn rebind_current(&mut self) -> Option<SourceFrame> {
        let texture = self.state.current_texture?;
        if let Err(err) = self.bind_master() {
            Counters::bump(&self.shared.counters.target_errors);
            tracing::warn!(error = %err, "failed to bind master target; skipping redraw");
            return None;
        }
        Some(SourceFrame {
            texture,
            transform: self.state.transform,
            timestamp_ns: self.state.latest_presented_ns,
        })
    }

    /// Binds the master target and pulls the newest input image.
    ///
    /// A frame's own timestamp wins over whatever the device reports.
    fn latch(&mut self, frame_ns: Option<i64>) -> Option<SourceFrame> {
        if let Err(err) = self.bind_master() {
            Counters::bump(&self.shared.counters.target_errors);
            tracing::warn!(error = %err, "failed to bind master target; skipping pass");
            return None;
        }
        match self.device.latch_source() {
            Ok(mut source) => {
                source.timestamp_ns = frame_ns
                    .or(source.timestamp_ns)
                    .or(self.state.latest_presented_ns);
                self.remember(&source);
                self.state.holding_still = false;
                Some(source)
            }
            Err(err) => {
                Counters::bump(&self.shared.counters.target_errors);
                tracing::warn!(error = %err, "failed to latch input surface; skipping pass");
                None
            }
        }
    }

    fn bind_master(&mut self) -> Result<(), GpuError> {
        match self.registry.master_mut() {
            Some(master) => master.make_current(),
            None => Err(GpuError::Backend("master target missing".into())),
        }
    }

    fn remember(&mut self, source: &SourceFrame) {
        self.state.current_texture = Some(source.texture);
        self.state.transform = source.transform;
        if source.timestamp_ns.is_some() {
            self.state.latest_presented_ns = source.timestamp_ns;
        }
    }

    /// Blits `source` to every target in one registry snapshot.
    fn present_all(&mut self, source: &SourceFrame) {
        let timestamp_ns = source.timestamp_ns.unwrap_or(0);
        let mut report = PassReport::default();
        let mut snapshot = self.registry.snapshot();
        let generation = snapshot.generation();
        let targets = snapshot.len();
        for (id, target) in snapshot.iter_mut() {
            if !target.should_present() {
                report.skipped += 1;
                continue;
            }
            match present_one(&mut self.device, target, source, timestamp_ns) {
                Ok(()) => {
                    report.presented += 1;
                    Counters::bump(&self.shared.counters.presents);
                }
                Err(err) => {
                    report.failed += 1;
                    Counters::bump(&self.shared.counters.target_errors);
                    tracing::warn!(target_id = %id, error = %err, "draw failed; skipping target for this frame");
                }
            }
        }
        tracing::trace!(
            timestamp_ns,
            generation,
            targets,
            presented = report.presented,
            skipped = report.skipped,
            failed = report.failed,
            "pass complete"
        );
    }

    fn finish_cycle(&mut self) {
        self.shared.take_pending();
        self.shared
            .presented
            .complete_cycle(self.state.latest_presented_ns);
        if self.shared.pending() == 0 {
            self.shared.set_phase(Phase::Idle);
        }
    }

    /// Releases whatever is still queued without drawing it.
    fn drain_deferred(&mut self, deferred: VecDeque<Command<Spec<B>>>) {
        for command in deferred {
            self.discard(command);
        }
    }

    fn discard(&mut self, command: Command<Spec<B>>) {
        match command {
            Command::Frame(frame) => {
                self.shared.record_release(frame.release(false));
                self.shared.take_pending();
            }
            Command::StillStaged | Command::FrameReady => self.shared.take_pending(),
            Command::AddTarget { reply, .. } => {
                let _ = reply.send(Err(EngineError::ShutDown));
            }
            Command::RemoveTarget { reply, .. } => {
                let _ = reply.send(Ok(false));
            }
            Command::ConfirmSize { .. } | Command::Shutdown => {}
        }
    }

    fn teardown(mut self) {
        self.shared.set_phase(Phase::ShuttingDown);
        while let Ok(command) = self.commands.try_recv() {
            self.discard(command);
        }
        self.shared.still.lock().take();

        let targets = self.registry.drain();
        let count = targets.len();
        for (id, target) in targets {
            tracing::debug!(target_id = %id, "destroying render target");
            self.device.destroy_target(target);
        }
        self.device.release();
        tracing::info!(
            targets = count,
            last_texture = ?self.state.current_texture,
            last_transform = ?self.state.transform,
            latest_presented_ns = ?self.state.latest_presented_ns,
            "render scheduler released GPU resources"
        );

        self.shared.set_phase(Phase::Terminated);
        self.shared.presented.wake_all();
    }
}

fn present_one<D: Device>(
    device: &mut D,
    target: &mut D::Target,
    source: &SourceFrame,
    timestamp_ns: i64,
) -> Result<(), GpuError> {
    target.make_current()?;
    device.blit(target, source)?;
    target.set_presentation_time(timestamp_ns);
    target.swap_buffers()
}
