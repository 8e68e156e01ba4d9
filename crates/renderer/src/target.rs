use std::path::PathBuf;

use pacer::{GpuError, RenderTarget, SurfaceKind};

/// A window surface; one swapchain image is acquired per pass.
pub struct WindowTarget {
    pub(crate) label: String,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    config: wgpu::SurfaceConfiguration,
    frame: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
    presentation_ns: Option<i64>,
    presented: u64,
}

impl WindowTarget {
    pub(crate) fn new(
        label: String,
        surface: wgpu::Surface<'static>,
        device: wgpu::Device,
        config: wgpu::SurfaceConfiguration,
    ) -> Self {
        Self {
            label,
            surface,
            device,
            config,
            frame: None,
            presentation_ns: None,
            presented: 0,
        }
    }

    fn acquire(&mut self) -> Result<wgpu::SurfaceTexture, GpuError> {
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!(target = %self.label, "surface lost; reconfiguring");
                self.surface.configure(&self.device, &self.config);
                self.surface
                    .get_current_texture()
                    .map_err(|err| surface_error(&self.label, err))
            }
            Err(err) => Err(surface_error(&self.label, err)),
        }
    }
}

fn surface_error(label: &str, err: wgpu::SurfaceError) -> GpuError {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => GpuError::SurfaceLost,
        wgpu::SurfaceError::Timeout => GpuError::Timeout,
        other => GpuError::Backend(format!("{label}: {other}")),
    }
}

/// An off-screen texture, optionally written to a PNG when destroyed.
pub struct TextureTarget {
    pub(crate) label: String,
    pub(crate) texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    pub(crate) capture: Option<PathBuf>,
    pending_ns: Option<i64>,
    last_presented_ns: Option<i64>,
    presented: u64,
}

pub(crate) const TEXTURE_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

impl TextureTarget {
    pub(crate) fn new(
        device: &wgpu::Device,
        label: String,
        width: u32,
        height: u32,
        capture: Option<PathBuf>,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            label,
            texture,
            view,
            width,
            height,
            capture,
            pending_ns: None,
            last_presented_ns: None,
            presented: 0,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn last_presented_ns(&self) -> Option<i64> {
        self.last_presented_ns
    }
}

/// Either kind of target the wgpu backend can draw into.
pub enum WgpuTarget {
    Window(WindowTarget),
    Texture(TextureTarget),
}

impl WgpuTarget {
    pub fn label(&self) -> &str {
        match self {
            WgpuTarget::Window(target) => &target.label,
            WgpuTarget::Texture(target) => &target.label,
        }
    }

    pub fn presented(&self) -> u64 {
        match self {
            WgpuTarget::Window(target) => target.presented,
            WgpuTarget::Texture(target) => target.presented,
        }
    }

    pub(crate) fn format(&self) -> wgpu::TextureFormat {
        match self {
            WgpuTarget::Window(target) => target.config.format,
            WgpuTarget::Texture(_) => TEXTURE_TARGET_FORMAT,
        }
    }

    /// The color attachment bound by the last `make_current`.
    pub(crate) fn view(&self) -> Option<&wgpu::TextureView> {
        match self {
            WgpuTarget::Window(target) => target.frame.as_ref().map(|(_, view)| view),
            WgpuTarget::Texture(target) => Some(&target.view),
        }
    }
}

impl RenderTarget for WgpuTarget {
    fn kind(&self) -> SurfaceKind {
        match self {
            WgpuTarget::Window(_) => SurfaceKind::Window,
            WgpuTarget::Texture(_) => SurfaceKind::Texture,
        }
    }

    fn size(&self) -> (u32, u32) {
        match self {
            WgpuTarget::Window(target) => (target.config.width, target.config.height),
            WgpuTarget::Texture(target) => (target.width, target.height),
        }
    }

    fn make_current(&mut self) -> Result<(), GpuError> {
        match self {
            WgpuTarget::Window(target) => {
                if target.frame.is_none() {
                    let frame = target.acquire()?;
                    let view = frame
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default());
                    target.frame = Some((frame, view));
                }
                Ok(())
            }
            WgpuTarget::Texture(_) => Ok(()),
        }
    }

    fn set_presentation_time(&mut self, timestamp_ns: i64) {
        match self {
            WgpuTarget::Window(target) => target.presentation_ns = Some(timestamp_ns),
            WgpuTarget::Texture(target) => target.pending_ns = Some(timestamp_ns),
        }
    }

    fn swap_buffers(&mut self) -> Result<(), GpuError> {
        match self {
            WgpuTarget::Window(target) => {
                let (frame, view) = target.frame.take().ok_or_else(|| {
                    GpuError::Backend(format!("{}: swap without an acquired frame", target.label))
                })?;
                drop(view);
                frame.present();
                target.presented += 1;
                tracing::trace!(
                    target = %target.label,
                    timestamp_ns = ?target.presentation_ns.take(),
                    "presented window frame"
                );
                Ok(())
            }
            WgpuTarget::Texture(target) => {
                target.presented += 1;
                target.last_presented_ns = target.pending_ns.take().or(target.last_presented_ns);
                Ok(())
            }
        }
    }
}
