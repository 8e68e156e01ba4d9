//! wgpu backend for the pacing engine.
//!
//! [`WgpuBackend`] opens a single wgpu device on the render thread, either
//! headless for an off-screen master or compatible with a master window.
//! Every [`WgpuTarget`] then shares that device:
//!
//! - producers write RGBA frames into an [`InputSurface`]; the render thread
//!   latches the newest one into the source texture;
//! - still images get a texture of their own;
//! - a GLSL blit copies whichever source is current into each target through
//!   its transform, one pipeline per attachment format;
//! - off-screen targets can be captured to PNG when they are destroyed.

mod backend;
mod blit;
mod capture;
mod compile;
mod context;
mod input;
mod target;

pub use backend::{SurfaceSpec, TextureSpec, WgpuBackend, WgpuDevice};
pub use context::{GpuOptions, GpuPowerPreference, SurfaceWindow};
pub use input::{InputImage, InputSurface};
pub use target::{TextureTarget, WgpuTarget, WindowTarget};
