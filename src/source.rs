use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{deadline_after, MAX_WAIT};
use crate::frame::Frame;
use crate::{lock, CaptureDevice};

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);
const STARTUP_POLL: Duration = Duration::from_millis(5);

type Device = Box<dyn CaptureDevice>;

/// Continuously captures from one device on a background thread, keeping
/// only the newest frame.
///
/// The slot mutex is held only while a frame is swapped in or copied out,
/// never across the blocking device read.
pub struct FrameSource {
    slot: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    device: Mutex<Option<Device>>,
    worker: Mutex<Option<JoinHandle<Device>>>,
    retry_backoff: Duration,
}

impl FrameSource {
    pub fn new(device: Device) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            device: Mutex::new(Some(device)),
            worker: Mutex::new(None),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Pause between a failed read and the next attempt.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Launch acquisition and wait up to `grace` for a first frame.
    ///
    /// Not having a frame by then is not an error; reads report not-ready
    /// until one arrives. Starting twice, or after `stop`, does nothing.
    pub fn start(&self, grace: Duration) -> Result<()> {
        {
            let mut worker = lock(&self.worker);
            if worker.is_some() {
                log::debug!("frame source already running");
                return Ok(());
            }
            let Some(device) = lock(&self.device).take() else {
                log::warn!("frame source was stopped; not restarting");
                return Ok(());
            };

            self.running.store(true, Ordering::Release);
            let slot = Arc::clone(&self.slot);
            let running = Arc::clone(&self.running);
            let backoff = self.retry_backoff;
            let handle = thread::Builder::new()
                .name("facegate-capture".into())
                .spawn(move || capture_loop(device, slot, running, backoff))
                .map_err(|e| {
                    self.running.store(false, Ordering::Release);
                    e
                })
                .context("spawning capture thread")?;
            *worker = Some(handle);
        }
        log::info!("frame source started");

        let deadline = deadline_after(grace.min(MAX_WAIT)).unwrap_or_else(Instant::now);
        loop {
            if self.is_ready() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(STARTUP_POLL.min(deadline - now));
        }
        log::info!("no frame after {:?}; reads report not-ready until one arrives", grace);
        Ok(())
    }

    /// Independent copy of the newest frame, or `None` if nothing was captured yet.
    pub fn read(&self) -> Option<Frame> {
        lock(&self.slot).clone()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.slot).is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Halt acquisition and release the device. Safe to call repeatedly.
    ///
    /// The capture thread finishes its in-flight read before exiting.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let device = match lock(&self.worker).take() {
            Some(handle) => match handle.join() {
                Ok(device) => Some(device),
                Err(_) => {
                    log::error!("capture thread panicked; device dropped without release");
                    None
                }
            },
            None => lock(&self.device).take(),
        };

        if let Some(mut device) = device {
            if let Err(e) = device.release() {
                log::warn!("releasing camera: {:#}", e);
            }
            log::info!("frame source stopped");
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut device: Device,
    slot: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    backoff: Duration,
) -> Device {
    let mut seq = 0u64;
    let mut failures = 0u32;

    while running.load(Ordering::Acquire) {
        match device.capture() {
            Ok(image) => {
                seq += 1;
                let frame = Frame::new(seq, image);
                // Stale frame is dropped after the lock is released
                let _stale = lock(&slot).replace(frame);
                failures = 0;
            }
            Err(e) => {
                failures += 1;
                if failures == 1 || failures % 100 == 0 {
                    log::warn!("camera read failed ({} in a row): {:#}", failures, e);
                } else {
                    log::debug!("camera read failed: {:#}", e);
                }
                thread::sleep(backoff);
            }
        }
    }

    log::debug!("capture loop exiting after {} frames", seq);
    device
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::atomic::AtomicUsize;

    /// Emits 8x8 frames every `interval`, failing the first `fail_first` reads.
    struct FakeDevice {
        interval: Duration,
        fail_first: usize,
        reads: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
        release_fails: bool,
    }

    impl FakeDevice {
        fn new(interval: Duration) -> Self {
            Self {
                interval,
                fail_first: 0,
                reads: Arc::new(AtomicUsize::new(0)),
                releases: Arc::new(AtomicUsize::new(0)),
                release_fails: false,
            }
        }
    }

    impl CaptureDevice for FakeDevice {
        fn capture(&mut self) -> Result<RgbImage> {
            thread::sleep(self.interval);
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("device busy");
            }
            Ok(RgbImage::from_pixel(8, 8, image::Rgb([n as u8, 0, 0])))
        }

        fn release(&mut self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.release_fails {
                anyhow::bail!("release failed");
            }
            Ok(())
        }
    }

    #[test]
    fn test_not_ready_before_start() {
        let source = FrameSource::new(Box::new(FakeDevice::new(Duration::from_millis(1))));
        assert!(source.read().is_none());
        assert!(!source.is_running());
    }

    #[test]
    fn test_first_frame_within_grace() {
        let source = FrameSource::new(Box::new(FakeDevice::new(Duration::from_millis(2))));
        source.start(Duration::from_millis(500)).unwrap();
        let frame = source.read().expect("frame after start");
        assert!(frame.seq >= 1);
        assert_eq!(frame.image.dimensions(), (8, 8));
        source.stop();
    }

    #[test]
    fn test_start_does_not_fail_without_frame() {
        let source = FrameSource::new(Box::new(FakeDevice::new(Duration::from_millis(300))));
        source.start(Duration::from_millis(10)).unwrap();
        assert!(source.read().is_none());

        let deadline = Instant::now() + Duration::from_secs(2);
        while source.read().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(source.read().is_some());
        source.stop();
    }

    #[test]
    fn test_sequence_advances() {
        let source = FrameSource::new(Box::new(FakeDevice::new(Duration::from_millis(2))));
        source.start(Duration::from_millis(500)).unwrap();
        let first = source.read().unwrap().seq;
        thread::sleep(Duration::from_millis(50));
        let later = source.read().unwrap().seq;
        assert!(later > first);
        source.stop();
    }

    #[test]
    fn test_read_failures_are_retried() {
        let mut device = FakeDevice::new(Duration::from_millis(1));
        device.fail_first = 5;
        let reads = Arc::clone(&device.reads);
        let source = FrameSource::new(Box::new(device)).with_retry_backoff(Duration::from_millis(1));
        source.start(Duration::from_millis(500)).unwrap();

        assert!(source.read().is_some());
        assert!(reads.load(Ordering::SeqCst) > 5);
        source.stop();
    }

    #[test]
    fn test_stop_is_idempotent_and_releases_once() {
        let device = FakeDevice::new(Duration::from_millis(1));
        let releases = Arc::clone(&device.releases);
        let source = FrameSource::new(Box::new(device));
        source.start(Duration::from_millis(200)).unwrap();

        source.stop();
        source.stop();
        assert!(!source.is_running());
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        // Stopped sources do not restart
        source.start(Duration::from_millis(10)).unwrap();
        assert!(!source.is_running());
        drop(source);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_without_start_releases_device() {
        let device = FakeDevice::new(Duration::from_millis(1));
        let releases = Arc::clone(&device.releases);
        let source = FrameSource::new(Box::new(device));
        source.stop();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_error_is_swallowed() {
        let mut device = FakeDevice::new(Duration::from_millis(1));
        device.release_fails = true;
        let releases = Arc::clone(&device.releases);
        let source = FrameSource::new(Box::new(device));
        source.start(Duration::from_millis(100)).unwrap();
        source.stop();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reads_are_independent_copies() {
        let source = FrameSource::new(Box::new(FakeDevice::new(Duration::from_millis(1))));
        source.start(Duration::from_millis(200)).unwrap();
        let mut a = source.read().unwrap();
        a.image.put_pixel(0, 0, image::Rgb([9, 9, 9]));
        source.stop();
        let b = source.read().unwrap();
        if a.seq == b.seq {
            assert_ne!(a.image.get_pixel(0, 0), b.image.get_pixel(0, 0));
        }
    }
}
