use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Sender};

use crate::config::PacerConfig;
use crate::error::EngineError;
use crate::frame::{Frame, StillImage};
use crate::queue::{Command, FrameSink};
use crate::registry::TargetId;
use crate::scheduler::run_scheduler;
use crate::state::{EngineStats, Phase, Shared};
use crate::target::Backend;
use crate::vsync::{VsyncClock, VsyncFeed, VsyncThread};

/// Handle to a running render scheduler.
///
/// `S` is the backend's surface specification type. Every method may be
/// called from any thread; none of them issue GPU calls.
pub struct Engine<S: Send + 'static> {
    tx: Sender<Command<S>>,
    sink: FrameSink<S>,
    shared: Arc<Shared>,
    vsync: Arc<VsyncClock>,
    vsync_thread: Option<VsyncThread>,
    master: TargetId,
    worker: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> Engine<S> {
    /// Spawns the scheduler thread and blocks until the master target is up.
    pub fn start<B>(
        backend: B,
        master: S,
        config: PacerConfig,
        vsync_feed: VsyncFeed,
    ) -> Result<Self, EngineError>
    where
        B: Backend<Spec = S>,
    {
        let (tx, rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let shared = Arc::new(Shared::new());
        let vsync = Arc::new(VsyncClock::new());

        let thread_name = config.thread_name.clone();
        let worker_shared = shared.clone();
        let worker_vsync = vsync.clone();
        let worker = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                run_scheduler(
                    backend,
                    master,
                    config,
                    rx,
                    worker_shared,
                    worker_vsync,
                    ready_tx,
                )
            })
            .map_err(|source| EngineError::Spawn {
                role: "render scheduler",
                source,
            })?;

        let master = match ready_rx.recv() {
            Ok(Ok(master)) => master,
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(EngineError::Setup(err));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(EngineError::Disconnected);
            }
        };

        let vsync_thread = match vsync_feed {
            VsyncFeed::Thread(source) => Some(VsyncThread::spawn(source, vsync.clone())?),
            VsyncFeed::Manual => None,
        };

        tracing::info!(master = %master, "render scheduler started");
        Ok(Self {
            sink: FrameSink::new(tx.clone(), shared.clone()),
            tx,
            shared,
            vsync,
            vsync_thread,
            master,
            worker: Some(worker),
        })
    }

    pub fn master(&self) -> TargetId {
        self.master
    }

    /// A producer handle that can be moved to another thread.
    pub fn sink(&self) -> FrameSink<S> {
        self.sink.clone()
    }

    pub fn signal_new_frame(&self, frame: Frame) {
        self.sink.signal_new_frame(frame);
    }

    pub fn signal_new_image(&self, image: StillImage) {
        self.sink.signal_new_image(image);
    }

    pub fn signal_frame_ready(&self) {
        self.sink.signal_frame_ready();
    }

    /// Blocks until the next draw-or-drop cycle completes.
    ///
    /// Returns the latest presented timestamp in nanoseconds, or `None` when
    /// the timeout elapses first or nothing has ever been presented.
    pub fn await_latest_presented_timestamp(&self, timeout: Duration) -> Option<i64> {
        self.shared.presented.await_next(timeout, &self.shared.done)
    }

    /// Unblocks the scheduler's start-up barrier. Valid exactly once.
    pub fn confirm_target_size(&self, width: u32, height: u32) -> Result<(), EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidSize { width, height });
        }
        {
            let mut size = self.shared.size.lock();
            if let Some((width, height)) = *size {
                return Err(EngineError::SizeAlreadyConfirmed { width, height });
            }
            *size = Some((width, height));
        }
        self.tx
            .send(Command::ConfirmSize { width, height })
            .map_err(|_| EngineError::ShutDown)
    }

    /// Registers another surface; returns once the scheduler has built it.
    ///
    /// The target only receives frames enqueued after this call.
    pub fn add_target(&self, spec: S) -> Result<TargetId, EngineError> {
        let (reply, response) = bounded(1);
        self.tx
            .send(Command::AddTarget { spec, reply })
            .map_err(|_| EngineError::ShutDown)?;
        response.recv().map_err(|_| EngineError::ShutDown)?
    }

    /// Removes a target; `Ok(false)` if it was already gone.
    ///
    /// Once this returns the target receives no further draws.
    pub fn remove_target(&self, id: TargetId) -> Result<bool, EngineError> {
        if id == self.master {
            return Err(EngineError::MasterTarget);
        }
        let (reply, response) = bounded(1);
        if self.tx.send(Command::RemoveTarget { id, reply }).is_err() {
            return Ok(false);
        }
        response.recv().map_err(|_| EngineError::ShutDown)?
    }

    pub fn vsync_clock(&self) -> Arc<VsyncClock> {
        self.vsync.clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    pub fn pending(&self) -> u64 {
        self.shared.pending()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats()
    }

    /// Stops the scheduler and waits for it to release the GPU.
    ///
    /// Safe to call repeatedly; later calls return immediately.
    pub fn shutdown(&mut self) {
        let first = !self.shared.done.swap(true, Ordering::AcqRel);
        if first {
            tracing::info!("shutting down render scheduler");
            let _ = self.tx.send(Command::Shutdown);
        }
        self.vsync.interrupt();
        self.shared.presented.wake_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("render scheduler thread panicked");
            }
        }
        if let Some(mut vsync_thread) = self.vsync_thread.take() {
            vsync_thread.stop();
        }
    }
}

impl<S: Send + 'static> Drop for Engine<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
