use crate::error::{GpuError, SetupError};
use crate::frame::{SourceFrame, StillImage};

/// The two kinds of presentable surface a target can wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Window,
    Texture,
}

/// A presentable surface sharing the scheduler's GPU context.
///
/// Every method is called on the scheduler thread only.
pub trait RenderTarget {
    fn kind(&self) -> SurfaceKind;

    fn size(&self) -> (u32, u32);

    /// Binds the target for drawing. Must be idempotent within a pass.
    fn make_current(&mut self) -> Result<(), GpuError>;

    fn set_presentation_time(&mut self, timestamp_ns: i64);

    fn swap_buffers(&mut self) -> Result<(), GpuError>;

    /// Lets a target opt out of a pass, e.g. while its surface is hidden.
    fn should_present(&self) -> bool {
        true
    }
}

/// The GPU context, owned by the scheduler thread for its whole life.
pub trait Device {
    type Spec;
    type Target: RenderTarget;

    /// Creates an additional target sharing this context.
    fn create_target(&mut self, spec: Self::Spec) -> Result<Self::Target, GpuError>;

    /// Sizes the input surface once the producer has confirmed its dimensions.
    fn set_source_size(&mut self, width: u32, height: u32) -> Result<(), GpuError>;

    /// Updates the source texture from the newest image on the input surface.
    fn latch_source(&mut self) -> Result<SourceFrame, GpuError>;

    /// Uploads a still image into the source texture.
    fn load_still(&mut self, image: &StillImage) -> Result<SourceFrame, GpuError>;

    /// Draws `source` over the whole of the bound `target`.
    fn blit(&mut self, target: &mut Self::Target, source: &SourceFrame) -> Result<(), GpuError>;

    fn destroy_target(&mut self, target: Self::Target) {
        drop(target);
    }

    /// Tears down the context after every target has been destroyed.
    fn release(self)
    where
        Self: Sized,
    {
    }
}

/// Opens a [`Device`] on the scheduler thread.
///
/// Implementations are moved onto the scheduler thread before `open` runs, so
/// all GPU objects are created, used and dropped there.
pub trait Backend: Send + 'static {
    type Spec: Send + 'static;
    type Device: Device<Spec = Self::Spec>;

    /// Creates the GPU context on the master surface and returns both.
    fn open(
        self,
        master: Self::Spec,
    ) -> Result<(Self::Device, <Self::Device as Device>::Target), SetupError>;
}
