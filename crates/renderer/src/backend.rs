use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use pacer::{
    Backend, Device, GpuError, RenderTarget, SetupError, SourceFrame, StillImage, TextureId,
    IDENTITY_TRANSFORM,
};

use crate::blit::{BlitPipeline, SourceTexture};
use crate::capture;
use crate::context::{self, GpuContext, GpuOptions, SurfaceWindow};
use crate::input::InputSurface;
use crate::target::{TextureTarget, WgpuTarget, WindowTarget};

const INPUT_TEXTURE: TextureId = TextureId(1);
const STILL_TEXTURE: TextureId = TextureId(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSpec {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Where to write the last presented contents when the target goes away.
    pub capture: Option<PathBuf>,
}

/// What a new render target should draw into.
#[derive(Clone)]
pub enum SurfaceSpec {
    Window {
        label: String,
        window: Arc<dyn SurfaceWindow>,
        width: u32,
        height: u32,
    },
    Texture(TextureSpec),
}

impl SurfaceSpec {
    pub fn texture(label: impl Into<String>, width: u32, height: u32) -> Self {
        SurfaceSpec::Texture(TextureSpec {
            label: label.into(),
            width,
            height,
            capture: None,
        })
    }

    pub fn label(&self) -> &str {
        match self {
            SurfaceSpec::Window { label, .. } => label,
            SurfaceSpec::Texture(spec) => &spec.label,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        match self {
            SurfaceSpec::Window { width, height, .. } => (*width, *height),
            SurfaceSpec::Texture(spec) => (spec.width, spec.height),
        }
    }
}

impl fmt::Debug for SurfaceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceSpec::Window {
                label,
                width,
                height,
                ..
            } => f
                .debug_struct("Window")
                .field("label", label)
                .field("width", width)
                .field("height", height)
                .finish_non_exhaustive(),
            SurfaceSpec::Texture(spec) => f.debug_tuple("Texture").field(spec).finish(),
        }
    }
}

/// Opens a wgpu device on the scheduler thread.
pub struct WgpuBackend {
    options: GpuOptions,
    input: InputSurface,
}

impl WgpuBackend {
    pub fn new(options: GpuOptions, input: InputSurface) -> Self {
        Self { options, input }
    }
}

impl Backend for WgpuBackend {
    type Spec = SurfaceSpec;
    type Device = WgpuDevice;

    fn open(self, master: SurfaceSpec) -> Result<(WgpuDevice, WgpuTarget), SetupError> {
        let (width, height) = master.size();
        if width == 0 || height == 0 {
            return Err(SetupError::NoMasterSurface(format!(
                "{} has no usable size ({width}x{height})",
                master.label()
            )));
        }

        let instance = context::create_instance();
        let surface = match &master {
            SurfaceSpec::Window { window, .. } => Some(
                context::create_surface(&instance, window)
                    .map_err(|err| SetupError::NoMasterSurface(format!("{err:#}")))?,
            ),
            SurfaceSpec::Texture(_) => None,
        };
        let ctx = GpuContext::new(instance, &self.options, surface.as_ref())
            .map_err(|err| SetupError::Context(format!("{err:#}")))?;
        ctx.device.on_uncaptured_error(Box::new(|err| {
            tracing::error!(%err, "uncaptured GPU error");
        }));

        let blit = BlitPipeline::new(&ctx.device);
        let input_texture = SourceTexture::new(&ctx.device, &blit, INPUT_TEXTURE, 1, 1);
        input_texture.upload(&ctx.queue, &[0, 0, 0, 255]);

        let mut device = WgpuDevice {
            ctx,
            blit,
            input: self.input,
            input_texture,
            still_texture: None,
        };
        let master = device
            .build_target(master, surface)
            .map_err(|err| SetupError::Context(format!("{err:#}")))?;
        tracing::info!(target = %master.label(), "opened GPU context on master target");
        Ok((device, master))
    }
}

pub struct WgpuDevice {
    ctx: GpuContext,
    blit: BlitPipeline,
    input: InputSurface,
    input_texture: SourceTexture,
    still_texture: Option<SourceTexture>,
}

impl WgpuDevice {
    fn build_target(
        &mut self,
        spec: SurfaceSpec,
        surface: Option<wgpu::Surface<'static>>,
    ) -> Result<WgpuTarget> {
        match spec {
            SurfaceSpec::Window {
                label,
                window,
                width,
                height,
            } => {
                let surface = match surface {
                    Some(surface) => surface,
                    None => context::create_surface(&self.ctx.instance, &window)?,
                };
                let config = self.ctx.configure_surface(&surface, width, height)?;
                Ok(WgpuTarget::Window(WindowTarget::new(
                    label,
                    surface,
                    self.ctx.device.clone(),
                    config,
                )))
            }
            SurfaceSpec::Texture(spec) => {
                self.ctx.check_size(spec.width, spec.height)?;
                Ok(WgpuTarget::Texture(TextureTarget::new(
                    &self.ctx.device,
                    spec.label,
                    spec.width,
                    spec.height,
                    spec.capture,
                )))
            }
        }
    }

    fn resize_input(&mut self, width: u32, height: u32) {
        self.input_texture =
            SourceTexture::new(&self.ctx.device, &self.blit, INPUT_TEXTURE, width, height);
    }

    fn capture(&self, target: &TextureTarget, path: &std::path::Path) -> Result<()> {
        let (width, height) = (target.texture.width(), target.texture.height());
        let pixels = capture::read_rgba(
            &self.ctx.device,
            &self.ctx.queue,
            &target.texture,
            width,
            height,
        )?;
        capture::save_png(path, width, height, pixels)
    }
}

fn gpu_error(err: anyhow::Error) -> GpuError {
    GpuError::Backend(format!("{err:#}"))
}

impl Device for WgpuDevice {
    type Spec = SurfaceSpec;
    type Target = WgpuTarget;

    fn create_target(&mut self, spec: SurfaceSpec) -> Result<WgpuTarget, GpuError> {
        let label = spec.label().to_string();
        let target = self.build_target(spec, None).map_err(gpu_error)?;
        tracing::debug!(target = %label, size = ?target.size(), "created render target");
        Ok(target)
    }

    fn set_source_size(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        self.ctx.check_size(width, height).map_err(gpu_error)?;
        self.resize_input(width, height);
        tracing::debug!(width, height, "sized input texture");
        Ok(())
    }

    fn latch_source(&mut self) -> Result<SourceFrame, GpuError> {
        let mut timestamp_ns = None;
        if let Some(image) = self.input.take() {
            if !image.is_well_formed() {
                return Err(GpuError::Backend(format!(
                    "input image of {}x{} carries {} bytes",
                    image.width,
                    image.height,
                    image.pixels.len()
                )));
            }
            if !self.input_texture.matches(image.width, image.height) {
                tracing::warn!(
                    expected = ?(self.input_texture.width, self.input_texture.height),
                    actual = ?(image.width, image.height),
                    "input image size changed; resizing source texture"
                );
                self.ctx
                    .check_size(image.width, image.height)
                    .map_err(gpu_error)?;
                self.resize_input(image.width, image.height);
            }
            self.input_texture.upload(&self.ctx.queue, &image.pixels);
            timestamp_ns = Some(image.timestamp_ns);
        }
        Ok(SourceFrame {
            texture: INPUT_TEXTURE,
            transform: IDENTITY_TRANSFORM,
            timestamp_ns,
        })
    }

    fn load_still(&mut self, image: &StillImage) -> Result<SourceFrame, GpuError> {
        if !image.is_well_formed() {
            return Err(GpuError::Backend(format!(
                "still image of {}x{} carries {} bytes",
                image.width,
                image.height,
                image.pixels.len()
            )));
        }
        self.ctx
            .check_size(image.width, image.height)
            .map_err(gpu_error)?;
        let reuse = self
            .still_texture
            .as_ref()
            .is_some_and(|still| still.matches(image.width, image.height));
        if !reuse {
            self.still_texture = Some(SourceTexture::new(
                &self.ctx.device,
                &self.blit,
                STILL_TEXTURE,
                image.width,
                image.height,
            ));
        }
        let still = self
            .still_texture
            .as_ref()
            .ok_or_else(|| GpuError::Backend("still texture missing".into()))?;
        still.upload(&self.ctx.queue, &image.pixels);
        Ok(SourceFrame {
            texture: STILL_TEXTURE,
            transform: IDENTITY_TRANSFORM,
            timestamp_ns: None,
        })
    }

    fn blit(&mut self, target: &mut WgpuTarget, source: &SourceFrame) -> Result<(), GpuError> {
        let texture = match source.texture {
            INPUT_TEXTURE => &mut self.input_texture,
            STILL_TEXTURE => self
                .still_texture
                .as_mut()
                .ok_or_else(|| GpuError::Backend("no still image has been loaded".into()))?,
            other => return Err(GpuError::Backend(format!("unknown texture {other:?}"))),
        };
        texture.set_transform(&self.ctx.queue, &source.transform);

        let view = target.view().ok_or_else(|| {
            GpuError::Backend(format!("{} is not bound for drawing", target.label()))
        })?;
        self.ctx
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        self.blit.draw(
            &self.ctx.device,
            &self.ctx.queue,
            texture,
            view,
            target.format(),
            target.size(),
        );
        match pollster::block_on(self.ctx.device.pop_error_scope()) {
            Some(err) => Err(GpuError::Backend(format!("{}: {err}", target.label()))),
            None => Ok(()),
        }
    }

    fn destroy_target(&mut self, target: WgpuTarget) {
        tracing::debug!(
            target = %target.label(),
            presented = target.presented(),
            "destroying render target"
        );
        if let WgpuTarget::Texture(texture) = &target {
            if let Some(path) = texture.capture.as_deref() {
                match self.capture(texture, path) {
                    Ok(()) => tracing::info!(
                        target = %texture.label,
                        path = %path.display(),
                        last_presented_ns = ?texture.last_presented_ns(),
                        "captured render target"
                    ),
                    Err(err) => tracing::warn!(
                        target = %texture.label,
                        path = %path.display(),
                        error = %format!("{err:#}"),
                        "failed to capture render target"
                    ),
                }
            }
        }
    }

    fn release(self) {
        if let Err(err) = self.ctx.device.poll(wgpu::PollType::Wait) {
            tracing::warn!(%err, "GPU did not go idle before release");
        }
        tracing::debug!(
            queued = self.input.queued(),
            latched = self.input.latched(),
            overwritten = self.input.overwritten(),
            "released GPU context"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send + 'static>() {}

    #[test]
    fn specs_can_cross_to_the_scheduler_thread() {
        assert_send::<SurfaceSpec>();
        assert_send::<WgpuBackend>();
    }

    #[test]
    fn texture_spec_reports_label_and_size() {
        let spec = SurfaceSpec::texture("preview", 640, 360);
        assert_eq!(spec.label(), "preview");
        assert_eq!(spec.size(), (640, 360));
        assert!(format!("{spec:?}").contains("preview"));
    }

    #[test]
    fn zero_sized_master_is_rejected_before_touching_the_gpu() {
        let backend = WgpuBackend::new(GpuOptions::default(), InputSurface::new());
        let err = backend
            .open(SurfaceSpec::texture("master", 0, 720))
            .err()
            .expect("zero-sized master should fail");
        assert!(matches!(err, SetupError::NoMasterSurface(_)));
    }
}
