use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::error::EngineError;
use crate::frame::{Frame, StillImage};
use crate::registry::TargetId;
use crate::state::{Counters, Shared};

/// Messages consumed by the scheduler thread, strictly in send order.
pub(crate) enum Command<S> {
    Frame(Frame),
    /// A still image was staged while the slot was empty.
    StillStaged,
    /// The input surface was updated behind the engine's back.
    FrameReady,
    AddTarget {
        spec: S,
        reply: Sender<Result<TargetId, EngineError>>,
    },
    RemoveTarget {
        id: TargetId,
        reply: Sender<Result<bool, EngineError>>,
    },
    ConfirmSize {
        width: u32,
        height: u32,
    },
    Shutdown,
}

impl<S> Command<S> {
    pub fn is_work(&self) -> bool {
        matches!(
            self,
            Command::Frame(_) | Command::StillStaged | Command::FrameReady
        )
    }
}

/// Producer-side handle onto the pending frame queue.
///
/// Cloneable and cheap; every producer thread can own one. None of its
/// methods touch the GPU.
pub struct FrameSink<S> {
    tx: Sender<Command<S>>,
    shared: Arc<Shared>,
}

impl<S> Clone for FrameSink<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<S> FrameSink<S> {
    pub(crate) fn new(tx: Sender<Command<S>>, shared: Arc<Shared>) -> Self {
        Self { tx, shared }
    }

    /// Queues a decoded frame for a draw-or-drop decision.
    ///
    /// After shutdown the frame is released immediately without rendering.
    pub fn signal_new_frame(&self, frame: Frame) {
        Counters::bump(&self.shared.counters.enqueued);
        if self.shared.is_done() {
            self.release_unqueued(frame);
            return;
        }
        self.shared.add_pending();
        if let Err(err) = self.tx.send(Command::Frame(frame)) {
            self.shared.take_pending();
            if let Command::Frame(frame) = err.into_inner() {
                self.release_unqueued(frame);
            }
        }
    }

    /// Stages a still image; a newer image replaces one not yet drawn.
    pub fn signal_new_image(&self, image: StillImage) {
        if self.shared.is_done() {
            return;
        }
        let superseded = self.shared.still.lock().replace(image).is_some();
        if superseded {
            tracing::trace!("replaced staged still image");
            return;
        }
        self.send_work(Command::StillStaged);
    }

    /// Asks for a redraw of whatever the input surface currently holds.
    pub fn signal_frame_ready(&self) {
        if self.shared.is_done() {
            return;
        }
        self.send_work(Command::FrameReady);
    }

    /// Number of queued work items not yet decided.
    pub fn pending(&self) -> u64 {
        self.shared.pending()
    }

    fn send_work(&self, command: Command<S>) {
        self.shared.add_pending();
        if self.tx.send(command).is_err() {
            self.shared.take_pending();
        }
    }

    fn release_unqueued(&self, frame: Frame) {
        let outcome = frame.release(false);
        self.shared.record_release(outcome);
    }
}
