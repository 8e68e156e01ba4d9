use std::io;

/// Failure to bring up the GPU context on its master surface.
///
/// Only setup errors propagate to the caller of [`crate::Engine::start`];
/// everything that happens after the master target is ready stays inside the
/// scheduler loop.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("no usable master surface: {0}")]
    NoMasterSurface(String),
    #[error("failed to create GPU context: {0}")]
    Context(String),
}

/// Transient GPU failure scoped to one target or one latch.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("surface lost or outdated")]
    SurfaceLost,
    #[error("timed out acquiring surface texture")]
    Timeout,
    #[error("{0}")]
    Backend(String),
}

/// Returned by a frame's release callback.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// The buffer was already handed back to its owner.
    #[error("buffer was already released")]
    Stale,
    #[error("failed to release buffer: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("render scheduler thread exited unexpectedly")]
    Disconnected,
    #[error("target size already confirmed as {width}x{height}")]
    SizeAlreadyConfirmed { width: u32, height: u32 },
    #[error("target size must be non-zero, got {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("the master target cannot be removed")]
    MasterTarget,
    #[error("failed to create render target: {0}")]
    Target(#[source] GpuError),
    #[error("render scheduler is shut down")]
    ShutDown,
}
