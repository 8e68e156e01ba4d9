use std::sync::Arc;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// A native window that a render target can present into.
pub trait SurfaceWindow: HasWindowHandle + HasDisplayHandle + Send + Sync {}

impl<T> SurfaceWindow for T where T: HasWindowHandle + HasDisplayHandle + Send + Sync {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

#[derive(Debug, Clone)]
pub struct GpuOptions {
    pub power: GpuPowerPreference,
    /// Frames the presentation engine may queue on window surfaces (1-3).
    pub frame_latency: u32,
}

impl Default for GpuOptions {
    fn default() -> Self {
        Self {
            power: GpuPowerPreference::Low,
            frame_latency: 2,
        }
    }
}

pub(crate) fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

pub(crate) fn create_surface(
    instance: &wgpu::Instance,
    window: &Arc<dyn SurfaceWindow>,
) -> Result<wgpu::Surface<'static>> {
    instance
        .create_surface(window.clone())
        .context("failed to create rendering surface")
}

/// The one wgpu device every target renders with.
pub(crate) struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub max_dimension: u32,
    frame_latency: u32,
}

impl GpuContext {
    /// Picks an adapter able to present to `compatible_surface` when the
    /// master target is a window, or any adapter for an off-screen master.
    pub(crate) fn new(
        instance: wgpu::Instance,
        options: &GpuOptions,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self> {
        let power_preference = match options.power {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        let limits = adapter.limits();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("pacer device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let frame_latency = options.frame_latency.clamp(1, 3);
        if frame_latency != options.frame_latency {
            tracing::warn!(
                requested = options.frame_latency,
                clamped = frame_latency,
                "GPU frame latency clamped to valid range (1-3)"
            );
        }

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            max_dimension: limits.max_texture_dimension_2d,
            frame_latency,
        })
    }

    pub(crate) fn check_size(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            anyhow::bail!("surface size {width}x{height} must be non-zero");
        }
        if width > self.max_dimension || height > self.max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max}, requested surface is {width}x{height}",
                max = self.max_dimension
            );
        }
        Ok(())
    }

    /// Configures a window surface for plain vsynced presentation.
    pub(crate) fn configure_surface(
        &self,
        surface: &wgpu::Surface<'_>,
        width: u32,
        height: u32,
    ) -> Result<wgpu::SurfaceConfiguration> {
        self.check_size(width, height)?;
        let caps = surface.get_capabilities(&self.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface is not compatible with the selected adapter"))?;
        let present_mode = caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo)
            .or_else(|| caps.present_modes.first().copied())
            .unwrap_or(wgpu::PresentMode::Fifo);
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        tracing::debug!(?format, ?present_mode, width, height, "configuring window surface");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: self.frame_latency,
        };
        surface.configure(&self.device, &config);
        Ok(config)
    }
}
