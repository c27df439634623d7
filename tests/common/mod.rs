#![allow(dead_code)]

use anyhow::Result;
use facegate::frame::Frame;
use facegate::feed::FrameFeed;
use facegate::storage::{Gallery, IdentityStore, MemoryStore};
use facegate::{CaptureDevice, Embedding, FaceBox, FaceDetector, FaceEmbedder};
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const FRAME_SIZE: u32 = 128;

pub fn init_logger() {
    env_logger::builder().is_test(true).try_init().ok();
}

pub fn unit_embedding() -> Embedding {
    Embedding::normalized(vec![0.5, 0.5, 0.5, 0.5])
}

/// Cycles through scripted detections, counting calls.
pub struct CyclingDetector {
    boxes: Vec<Option<FaceBox>>,
    pub calls: Arc<AtomicUsize>,
}

impl CyclingDetector {
    pub fn new(boxes: Vec<Option<FaceBox>>) -> Self {
        Self {
            boxes,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fixed(face: FaceBox) -> Self {
        Self::new(vec![Some(face)])
    }
}

impl FaceDetector for CyclingDetector {
    fn detect_largest(&mut self, _image: &RgbImage) -> Result<Option<FaceBox>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.boxes.is_empty() {
            return Ok(None);
        }
        Ok(self.boxes[n % self.boxes.len()])
    }
}

/// Returns the same unit embedding for every crop.
pub struct ConstEmbedder {
    pub calls: Arc<AtomicUsize>,
}

impl ConstEmbedder {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FaceEmbedder for ConstEmbedder {
    fn embed(&mut self, _face: &RgbImage) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(unit_embedding())
    }
}

/// Blank frames at a steady rate.
pub struct FakeCamera {
    pub reads: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            reads: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CaptureDevice for FakeCamera {
    fn capture(&mut self) -> Result<RgbImage> {
        std::thread::sleep(Duration::from_millis(2));
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(RgbImage::new(FRAME_SIZE, FRAME_SIZE))
    }

    fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fresh blank frames without a camera, counting pulls.
pub struct CountingFeed {
    pub pulled: usize,
}

impl CountingFeed {
    pub fn new() -> Self {
        Self { pulled: 0 }
    }
}

impl FrameFeed for CountingFeed {
    fn next_frame(&mut self) -> Option<Frame> {
        self.pulled += 1;
        Some(Frame::new(
            self.pulled as u64,
            RgbImage::new(FRAME_SIZE, FRAME_SIZE),
        ))
    }
}

/// Memory store the test keeps a handle on after boxing it into a service.
#[derive(Clone, Default)]
pub struct SharedStore(pub Arc<MemoryStore>);

impl SharedStore {
    pub fn with(gallery: Gallery) -> Self {
        Self(Arc::new(MemoryStore::new(gallery)))
    }

    pub fn snapshot(&self) -> Gallery {
        self.0.snapshot()
    }
}

impl IdentityStore for SharedStore {
    fn load(&self) -> Result<Gallery> {
        self.0.load()
    }

    fn save(&self, gallery: &Gallery) -> Result<()> {
        self.0.save(gallery)
    }
}

pub fn gallery_with_bob() -> Gallery {
    let mut gallery = Gallery::new();
    gallery.push("bob", unit_embedding());
    gallery
}
