use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// One RGBA image written by a producer, waiting to be latched.
#[derive(Debug, Clone, PartialEq)]
pub struct InputImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub timestamp_ns: i64,
}

impl InputImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, timestamp_ns: i64) -> Self {
        Self {
            width,
            height,
            pixels,
            timestamp_ns,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() as u64 == u64::from(self.width) * u64::from(self.height) * 4
    }
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    overwritten: AtomicU64,
    latched: AtomicU64,
}

/// The producer side of the source texture.
///
/// Producers queue images from any thread; the render thread latches the
/// newest one into the GPU texture. An image that is replaced before it was
/// latched is never shown.
#[derive(Debug, Clone, Default)]
pub struct InputSurface {
    slot: Arc<Mutex<Option<InputImage>>>,
    counters: Arc<Counters>,
}

impl InputSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `image` as the newest content. Returns `true` when an image
    /// that was never latched got overwritten.
    pub fn queue(&self, image: InputImage) -> bool {
        let replaced = self.slot.lock().replace(image).is_some();
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.counters.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub(crate) fn take(&self) -> Option<InputImage> {
        let image = self.slot.lock().take();
        if image.is_some() {
            self.counters.latched.fetch_add(1, Ordering::Relaxed);
        }
        image
    }

    pub fn queued(&self) -> u64 {
        self.counters.queued.load(Ordering::Relaxed)
    }

    pub fn overwritten(&self) -> u64 {
        self.counters.overwritten.load(Ordering::Relaxed)
    }

    pub fn latched(&self) -> u64 {
        self.counters.latched.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(ts: i64) -> InputImage {
        InputImage::new(1, 1, vec![ts as u8; 4], ts)
    }

    #[test]
    fn newest_image_wins() {
        let surface = InputSurface::new();
        assert!(!surface.queue(image(1)));
        assert!(surface.queue(image(2)));
        assert_eq!(surface.take().map(|img| img.timestamp_ns), Some(2));
        assert_eq!(surface.take(), None);
        assert_eq!(surface.queued(), 2);
        assert_eq!(surface.overwritten(), 1);
        assert_eq!(surface.latched(), 1);
    }

    #[test]
    fn clones_share_the_slot() {
        let producer = InputSurface::new();
        let renderer = producer.clone();
        producer.queue(image(7));
        assert!(renderer.has_pending());
        assert_eq!(renderer.take().map(|img| img.timestamp_ns), Some(7));
        assert!(!producer.has_pending());
    }

    #[test]
    fn well_formed_needs_matching_pixel_count() {
        assert!(InputImage::new(2, 2, vec![0; 16], 0).is_well_formed());
        assert!(!InputImage::new(2, 2, vec![0; 15], 0).is_well_formed());
        assert!(!InputImage::new(0, 2, vec![], 0).is_well_formed());
    }
}
