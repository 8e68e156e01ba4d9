use std::fmt;

use crate::error::ReleaseError;

/// Column-major 4x4 matrix applied to source texture coordinates.
pub type Transform = [f32; 16];

pub const IDENTITY_TRANSFORM: Transform = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Hands a producer's buffer back once the scheduler has decided its fate.
///
/// `render` is `true` when the buffer contents should reach the input surface
/// before it is recycled, mirroring a codec's release-and-render call.
pub trait ReleaseBuffer: Send {
    fn release(self: Box<Self>, render: bool) -> Result<(), ReleaseError>;
}

impl<F> ReleaseBuffer for F
where
    F: FnOnce(bool) -> Result<(), ReleaseError> + Send,
{
    fn release(self: Box<Self>, render: bool) -> Result<(), ReleaseError> {
        (*self)(render)
    }
}

/// Outcome of releasing a frame's source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    Ok,
    Stale,
    Failed,
}

/// A decoded frame waiting to be drawn or dropped.
///
/// The source buffer is released exactly once: either explicitly by the
/// scheduler or, if the frame is dropped on the floor, by `Drop` with
/// `render = false`.
pub struct Frame {
    buffer: Option<Box<dyn ReleaseBuffer>>,
    pts_us: i64,
}

impl Frame {
    pub fn new(buffer: impl ReleaseBuffer + 'static, pts_us: i64) -> Self {
        Self {
            buffer: Some(Box::new(buffer)),
            pts_us,
        }
    }

    /// Builds a frame whose release is a plain callback.
    pub fn with_release<F>(pts_us: i64, release: F) -> Self
    where
        F: FnOnce(bool) -> Result<(), ReleaseError> + Send + 'static,
    {
        Self::new(release, pts_us)
    }

    pub fn pts_us(&self) -> i64 {
        self.pts_us
    }

    pub(crate) fn release(mut self, render: bool) -> Released {
        match self.buffer.take() {
            Some(buffer) => classify(self.pts_us, buffer.release(render)),
            None => Released::Stale,
        }
    }
}

fn classify(pts_us: i64, result: Result<(), ReleaseError>) -> Released {
    match result {
        Ok(()) => Released::Ok,
        Err(ReleaseError::Stale) => {
            tracing::debug!(pts_us, "source buffer already released");
            Released::Stale
        }
        Err(err) => {
            tracing::warn!(pts_us, error = %err, "failed to release source buffer");
            Released::Failed
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            classify(self.pts_us, buffer.release(false));
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("pts_us", &self.pts_us)
            .field("pending_release", &self.buffer.is_some())
            .finish()
    }
}

/// Tightly packed RGBA8 pixels plus the time they should be shown.
#[derive(Clone, PartialEq, Eq)]
pub struct StillImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub pts_us: i64,
}

impl StillImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, pts_us: i64) -> Self {
        Self {
            width,
            height,
            pixels,
            pts_us,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.pixels.len() as u64 == u64::from(self.width) * u64::from(self.height) * 4
    }
}

impl fmt::Debug for StillImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StillImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .field("pts_us", &self.pts_us)
            .finish()
    }
}

/// Identifier of a texture owned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Source texture state captured by a latch, ready to be blitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceFrame {
    pub texture: TextureId,
    pub transform: Transform,
    /// Timestamp carried by the latched image, when the device knows it.
    pub timestamp_ns: Option<i64>,
}
