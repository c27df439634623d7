use image::RgbImage;
use std::time::Duration;

use crate::frame::Frame;
use crate::source::FrameSource;

/// Supplies frames to a pipeline.
///
/// `None` means nothing new is available yet. Implementations that wait
/// for a frame should do so briefly so callers can check their deadline.
pub trait FrameFeed {
    fn next_frame(&mut self) -> Option<Frame>;

    /// No further frames will ever arrive.
    fn exhausted(&self) -> bool {
        false
    }
}

/// Polls a running [`FrameSource`], yielding each captured frame at most once.
pub struct LiveFeed<'a> {
    source: &'a FrameSource,
    last_seq: u64,
    poll_interval: Duration,
}

impl<'a> LiveFeed<'a> {
    pub fn new(source: &'a FrameSource, poll_interval: Duration) -> Self {
        Self {
            source,
            last_seq: 0,
            poll_interval,
        }
    }
}

impl FrameFeed for LiveFeed<'_> {
    fn next_frame(&mut self) -> Option<Frame> {
        match self.source.read() {
            Some(frame) if frame.seq > self.last_seq => {
                self.last_seq = frame.seq;
                Some(frame)
            }
            _ => {
                std::thread::sleep(self.poll_interval);
                None
            }
        }
    }
}

/// A single decoded image, yielded once.
pub struct StillFeed {
    image: Option<RgbImage>,
}

impl StillFeed {
    pub fn new(image: RgbImage) -> Self {
        Self { image: Some(image) }
    }
}

impl FrameFeed for StillFeed {
    fn next_frame(&mut self) -> Option<Frame> {
        self.image.take().map(|image| Frame::new(1, image))
    }

    fn exhausted(&self) -> bool {
        self.image.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CaptureDevice;
    use anyhow::Result;
    use std::time::Instant;

    struct Counter(u8);

    impl CaptureDevice for Counter {
        fn capture(&mut self) -> Result<RgbImage> {
            std::thread::sleep(Duration::from_millis(3));
            self.0 = self.0.wrapping_add(1);
            Ok(RgbImage::from_pixel(4, 4, image::Rgb([self.0, 0, 0])))
        }
    }

    #[test]
    fn test_still_feed_yields_once() {
        let mut feed = StillFeed::new(RgbImage::new(2, 2));
        assert!(!feed.exhausted());
        assert!(feed.next_frame().is_some());
        assert!(feed.exhausted());
        assert!(feed.next_frame().is_none());
    }

    #[test]
    fn test_live_feed_never_repeats_a_frame() {
        let source = FrameSource::new(Box::new(Counter(0)));
        source.start(Duration::from_millis(200)).unwrap();
        let mut feed = LiveFeed::new(&source, Duration::from_millis(1));

        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_millis(300);
        while seen.len() < 5 && Instant::now() < deadline {
            if let Some(frame) = feed.next_frame() {
                seen.push(frame.seq);
            }
        }
        source.stop();

        assert_eq!(seen.len(), 5);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_live_feed_not_ready() {
        let source = FrameSource::new(Box::new(Counter(0)));
        let mut feed = LiveFeed::new(&source, Duration::from_millis(1));
        assert!(feed.next_frame().is_none());
    }
}
