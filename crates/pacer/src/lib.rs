//! Frame pacing and multiplexing engine.
//!
//! One stream of decoded frames goes in; every frame is paced against the
//! display's vsync and then drawn to each registered render target, or
//! dropped if the display has already moved past it.
//!
//! ```text
//!   decoder / still source
//!          │ Frame, StillImage, frame-ready signal
//!          ▼
//!     FrameSink ──▶ command queue ──▶ render scheduler thread (owns the GPU)
//!                                           │        ▲
//!                                           │        └── VsyncClock ◀── vsync thread
//!                                           ▼
//!                               TargetRegistry snapshot ──▶ Device::blit per target
//! ```
//!
//! The GPU side is abstracted by [`Backend`], [`Device`] and
//! [`RenderTarget`], so the scheduler itself never names a graphics API.
//! [`Engine`] is the handle callers hold: it starts the scheduler, exposes
//! the producer entry points and target management, and shuts the thread
//! down again.

mod config;
mod engine;
mod error;
mod frame;
mod queue;
mod registry;
mod scheduler;
mod state;
mod target;
mod vsync;

pub use config::{drift_ns, PacerConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_LATE_TOLERANCE};
pub use engine::Engine;
pub use error::{EngineError, GpuError, ReleaseError, SetupError};
pub use frame::{
    Frame, ReleaseBuffer, SourceFrame, StillImage, TextureId, Transform, IDENTITY_TRANSFORM,
};
pub use queue::FrameSink;
pub use registry::TargetId;
pub use state::{EngineStats, Phase};
pub use target::{Backend, Device, RenderTarget, SurfaceKind};
pub use vsync::{
    IntervalVsync, VsyncClock, VsyncFeed, VsyncSample, VsyncSource, VsyncThread, MAX_VSYNC_PERIOD,
    MIN_VSYNC_PERIOD,
};
