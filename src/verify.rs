use image::RgbImage;
use std::time::{Duration, Instant};

use crate::config::{deadline_after, secs, VerifyConfig};
use crate::feed::FrameFeed;
use crate::frame::crop_face;
use crate::liveness::{LivenessMonitor, LivenessUpdate};
use crate::matcher::{best_match, MatchResult, NO_MATCH_SCORE, UNKNOWN};
use crate::storage::Gallery;
use crate::{FaceBox, FaceDetector, FaceEmbedder};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyParams {
    pub threshold: f32,
    /// Sample every Nth frame. 0 and 1 both mean every frame.
    pub every: u32,
    pub timeout: Duration,
    pub live_window: Duration,
    pub move_px: f32,
}

impl From<&VerifyConfig> for VerifyParams {
    fn from(cfg: &VerifyConfig) -> Self {
        Self {
            threshold: cfg.threshold,
            every: cfg.every,
            timeout: secs(cfg.timeout_s),
            live_window: secs(cfg.live_window_s),
            move_px: cfg.move_px,
        }
    }
}

impl Default for VerifyParams {
    fn default() -> Self {
        Self::from(&VerifyConfig::default())
    }
}

/// What one frame contributed to a verification attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    NoFace {
        update: LivenessUpdate,
    },
    BadCrop {
        face: FaceBox,
        update: LivenessUpdate,
    },
    EmbedFailed {
        face: FaceBox,
        update: LivenessUpdate,
    },
    Scored {
        face: FaceBox,
        result: MatchResult,
        update: LivenessUpdate,
    },
}

impl Observation {
    pub fn update(&self) -> LivenessUpdate {
        match self {
            Observation::NoFace { update }
            | Observation::BadCrop { update, .. }
            | Observation::EmbedFailed { update, .. }
            | Observation::Scored { update, .. } => *update,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Verified {
        name: String,
        score: f32,
        live: bool,
        moved: f32,
    },
    EmptyStore,
    /// Deadline passed. `best_name` is `"unknown"` unless the best score met
    /// the threshold.
    TimedOut { best_name: String, best_score: f32 },
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyOutcome::Verified { .. })
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            VerifyOutcome::Verified { .. } => None,
            VerifyOutcome::EmptyStore => Some("empty_db"),
            VerifyOutcome::TimedOut { .. } => Some("timeout"),
        }
    }
}

/// Detect, check liveness, embed and match, frame by frame, until a live
/// subject matches or the deadline passes.
pub struct VerificationPipeline<'a> {
    detector: &'a mut dyn FaceDetector,
    embedder: &'a mut dyn FaceEmbedder,
    gallery: &'a Gallery,
}

impl<'a> VerificationPipeline<'a> {
    pub fn new(
        detector: &'a mut dyn FaceDetector,
        embedder: &'a mut dyn FaceEmbedder,
        gallery: &'a Gallery,
    ) -> Self {
        Self {
            detector,
            embedder,
            gallery,
        }
    }

    /// Run one frame through detection, liveness and matching.
    ///
    /// A liveness timeout without movement resets `monitor` so a new
    /// challenge starts with the next face. Resetting after a success is
    /// left to the caller.
    pub fn observe(
        &mut self,
        image: &RgbImage,
        monitor: &mut LivenessMonitor,
        threshold: f32,
    ) -> Observation {
        let face = match self.detector.detect_largest(image) {
            Ok(face) => face,
            Err(e) => {
                log::warn!("face detection failed: {:#}", e);
                None
            }
        };

        let update = monitor.update(face.as_ref());
        if update.timeout && !update.live {
            log::debug!("liveness window elapsed without movement; new challenge");
            monitor.reset();
        }

        let Some(face) = face else {
            return Observation::NoFace { update };
        };
        let Some(crop) = crop_face(image, &face) else {
            log::debug!("degenerate crop for {:?}", face);
            return Observation::BadCrop { face, update };
        };
        let probe = match self.embedder.embed(&crop) {
            Ok(probe) => probe,
            Err(e) => {
                log::warn!("embedding failed: {:#}", e);
                return Observation::EmbedFailed { face, update };
            }
        };

        let result = best_match(self.gallery, &probe, threshold);
        log::debug!(
            "best {} score={:.3} moved={:.1}px live={}",
            result.best_name,
            result.best_score,
            update.moved,
            update.live
        );
        Observation::Scored {
            face,
            result,
            update,
        }
    }

    pub fn run(&mut self, feed: &mut dyn FrameFeed, params: &VerifyParams) -> VerifyOutcome {
        if !self.gallery.has_samples() {
            log::info!("no enrolled samples; refusing to verify");
            return VerifyOutcome::EmptyStore;
        }

        let mut monitor = LivenessMonitor::new(params.live_window, params.move_px);
        let every = u64::from(params.every.max(1));
        // Unrepresentable deadlines mean no deadline
        let deadline = deadline_after(params.timeout);

        let mut frame_id = 0u64;
        let mut best_name = UNKNOWN.to_string();
        let mut best_score = NO_MATCH_SCORE;

        while deadline.map_or(true, |d| Instant::now() < d) {
            let Some(frame) = feed.next_frame() else {
                if feed.exhausted() {
                    break;
                }
                continue;
            };

            frame_id += 1;
            if frame_id % every != 0 {
                continue;
            }

            let Observation::Scored { result, update, .. } =
                self.observe(&frame.image, &mut monitor, params.threshold)
            else {
                continue;
            };

            if result.best_score > best_score {
                best_score = result.best_score;
                best_name = result.best_name;
            }

            if best_score >= params.threshold && update.live {
                monitor.reset();
                log::info!(
                    "verified {} (score {:.3}, moved {:.1}px)",
                    best_name,
                    best_score,
                    update.moved
                );
                return VerifyOutcome::Verified {
                    name: best_name,
                    score: best_score,
                    live: true,
                    moved: update.moved,
                };
            }
        }

        log::info!("verification timed out after {} frames", frame_id);
        VerifyOutcome::TimedOut {
            best_name: if best_score >= params.threshold {
                best_name
            } else {
                UNKNOWN.to_string()
            },
            best_score,
        }
    }
}
