#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pacer::{
    Backend, Device, Frame, GpuError, PacerConfig, RenderTarget, SetupError, SourceFrame,
    StillImage, SurfaceKind, TextureId, IDENTITY_TRANSFORM,
};
use parking_lot::Mutex;

pub const THREAD_NAME: &str = "pacer-render-test";

/// Everything the mock GPU saw, in call order.
#[derive(Debug, Default)]
pub struct GpuLog {
    pub draws: Vec<(String, i64)>,
    /// `(target, texture id)` per successful blit.
    pub blits: Vec<(String, u32)>,
    pub latches: usize,
    pub stills: Vec<i64>,
    pub source_size: Option<(u32, u32)>,
    pub created: Vec<String>,
    pub destroyed: Vec<String>,
    pub released: usize,
    pub threads: Vec<String>,
}

impl GpuLog {
    pub fn draws_for(&self, name: &str) -> Vec<i64> {
        self.draws
            .iter()
            .filter(|(target, _)| target == name)
            .map(|(_, ts)| *ts)
            .collect()
    }

    pub fn textures_for(&self, name: &str) -> Vec<u32> {
        self.blits
            .iter()
            .filter(|(target, _)| target == name)
            .map(|(_, texture)| *texture)
            .collect()
    }

    fn touch(&mut self) {
        let name = thread::current().name().unwrap_or("<unnamed>").to_string();
        self.threads.push(name);
    }
}

pub type SharedLog = Arc<Mutex<GpuLog>>;

#[derive(Debug, Clone)]
pub struct MockSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub kind: SurfaceKind,
    pub fail_draws: bool,
    pub visible: bool,
    pub fail_open: bool,
}

impl MockSpec {
    pub fn texture(name: &str) -> Self {
        Self {
            name: name.to_string(),
            width: 64,
            height: 36,
            kind: SurfaceKind::Texture,
            fail_draws: false,
            visible: true,
            fail_open: false,
        }
    }

    pub fn window(name: &str) -> Self {
        Self {
            kind: SurfaceKind::Window,
            ..Self::texture(name)
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_draws = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

pub struct MockBackend {
    log: SharedLog,
}

impl MockBackend {
    pub fn new(log: SharedLog) -> Self {
        Self { log }
    }
}

pub struct MockDevice {
    log: SharedLog,
    latched: u32,
}

pub struct MockTarget {
    spec: MockSpec,
    bound: bool,
    presentation_ns: Option<i64>,
    log: SharedLog,
}

impl RenderTarget for MockTarget {
    fn kind(&self) -> SurfaceKind {
        self.spec.kind
    }

    fn size(&self) -> (u32, u32) {
        (self.spec.width, self.spec.height)
    }

    fn make_current(&mut self) -> Result<(), GpuError> {
        self.log.lock().touch();
        self.bound = true;
        Ok(())
    }

    fn set_presentation_time(&mut self, timestamp_ns: i64) {
        self.presentation_ns = Some(timestamp_ns);
    }

    fn swap_buffers(&mut self) -> Result<(), GpuError> {
        let mut log = self.log.lock();
        log.touch();
        if !self.bound {
            return Err(GpuError::Backend("swap on unbound target".into()));
        }
        let ts = self
            .presentation_ns
            .take()
            .ok_or_else(|| GpuError::Backend("no presentation time".into()))?;
        log.draws.push((self.spec.name.clone(), ts));
        Ok(())
    }

    fn should_present(&self) -> bool {
        self.spec.visible
    }
}

impl Backend for MockBackend {
    type Spec = MockSpec;
    type Device = MockDevice;

    fn open(self, master: MockSpec) -> Result<(MockDevice, MockTarget), SetupError> {
        if master.fail_open {
            return Err(SetupError::NoMasterSurface(format!(
                "{} cannot be opened",
                master.name
            )));
        }
        let mut device = MockDevice {
            log: self.log,
            latched: 0,
        };
        let master = device
            .create_target(master)
            .map_err(|err| SetupError::Context(err.to_string()))?;
        Ok((device, master))
    }
}

impl Device for MockDevice {
    type Spec = MockSpec;
    type Target = MockTarget;

    fn create_target(&mut self, spec: MockSpec) -> Result<MockTarget, GpuError> {
        let mut log = self.log.lock();
        log.touch();
        log.created.push(spec.name.clone());
        Ok(MockTarget {
            spec,
            bound: false,
            presentation_ns: None,
            log: self.log.clone(),
        })
    }

    fn set_source_size(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        let mut log = self.log.lock();
        log.touch();
        log.source_size = Some((width, height));
        Ok(())
    }

    fn latch_source(&mut self) -> Result<SourceFrame, GpuError> {
        let mut log = self.log.lock();
        log.touch();
        log.latches += 1;
        self.latched += 1;
        Ok(SourceFrame {
            texture: TextureId(1),
            transform: IDENTITY_TRANSFORM,
            timestamp_ns: None,
        })
    }

    fn load_still(&mut self, image: &StillImage) -> Result<SourceFrame, GpuError> {
        let mut log = self.log.lock();
        log.touch();
        log.stills.push(image.pts_us);
        Ok(SourceFrame {
            texture: TextureId(2),
            transform: IDENTITY_TRANSFORM,
            timestamp_ns: None,
        })
    }

    fn blit(&mut self, target: &mut MockTarget, source: &SourceFrame) -> Result<(), GpuError> {
        let mut log = self.log.lock();
        log.touch();
        if target.spec.fail_draws {
            target.bound = false;
            return Err(GpuError::Backend(format!("{} lost its surface", target.spec.name)));
        }
        log.blits.push((target.spec.name.clone(), source.texture.0));
        Ok(())
    }

    fn destroy_target(&mut self, target: MockTarget) {
        let mut log = self.log.lock();
        log.touch();
        log.destroyed.push(target.spec.name);
    }

    fn release(self) {
        let mut log = self.log.lock();
        log.touch();
        log.released += 1;
    }
}

pub type Releases = Arc<Mutex<Vec<(i64, bool)>>>;

/// A frame whose release is recorded as `(pts_us, render)`.
pub fn tracked_frame(pts_us: i64, releases: &Releases) -> Frame {
    let releases = releases.clone();
    Frame::with_release(pts_us, move |render| {
        releases.lock().push((pts_us, render));
        Ok(())
    })
}

pub fn config(drop_late_frames: bool) -> PacerConfig {
    PacerConfig {
        drop_late_frames,
        thread_name: THREAD_NAME.into(),
        ..PacerConfig::default()
    }
}

pub fn image(pts_us: i64) -> StillImage {
    StillImage::new(2, 2, vec![0x7f; 16], pts_us)
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub const PATIENCE: Duration = Duration::from_secs(10);
