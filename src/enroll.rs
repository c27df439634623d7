use image::RgbImage;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::{deadline_after, secs, EnrollConfig};
use crate::error::GateError;
use crate::feed::FrameFeed;
use crate::frame::crop_face;
use crate::storage::IdentityStore;
use crate::{Embedding, FaceDetector, FaceEmbedder};

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollRequest {
    pub name: String,
    /// Samples the identity should hold when done, existing ones included.
    pub quota: usize,
    /// Pause after each accepted sample so the subject can change pose.
    pub delay: Duration,
    /// Give up after this long. `None` waits for the quota indefinitely.
    pub deadline: Option<Duration>,
}

impl EnrollRequest {
    pub fn new(name: impl Into<String>, cfg: &EnrollConfig) -> Self {
        Self {
            name: name.into(),
            quota: cfg.samples,
            delay: secs(cfg.sleep_s),
            deadline: cfg.timeout_s.map(secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollReport {
    pub name: String,
    pub total_samples: usize,
    pub added: usize,
}

enum Sample {
    Accepted(Embedding),
    Rejected(GateError),
}

/// Collects face embeddings for one identity and persists them.
///
/// There is no liveness challenge here; enrollment runs in a trusted setting.
pub struct EnrollmentPipeline<'a> {
    detector: &'a mut dyn FaceDetector,
    embedder: &'a mut dyn FaceEmbedder,
}

impl<'a> EnrollmentPipeline<'a> {
    pub fn new(detector: &'a mut dyn FaceDetector, embedder: &'a mut dyn FaceEmbedder) -> Self {
        Self { detector, embedder }
    }

    /// Accumulate samples from `feed` until `name` holds `quota` of them,
    /// then save once. Nothing is saved if the deadline passes first.
    pub fn run(
        &mut self,
        store: &dyn IdentityStore,
        feed: &mut dyn FrameFeed,
        req: &EnrollRequest,
    ) -> Result<EnrollReport, GateError> {
        if req.name.trim().is_empty() {
            return Err(GateError::BadInput("name required".into()));
        }
        if req.quota == 0 {
            return Err(GateError::BadInput("samples must be at least 1".into()));
        }

        let mut gallery = store.load()?;
        gallery.ensure(&req.name);
        let existing = gallery.sample_count(&req.name);
        log::info!(
            "enrolling {}: {} existing samples, quota {}",
            req.name,
            existing,
            req.quota
        );

        let deadline = req.deadline.and_then(deadline_after);
        let mut added = 0usize;

        while gallery.sample_count(&req.name) < req.quota {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::warn!(
                    "enrollment of {} timed out with {} new samples; nothing saved",
                    req.name,
                    added
                );
                return Err(GateError::Timeout);
            }

            let Some(frame) = feed.next_frame() else {
                if feed.exhausted() {
                    return Err(GateError::DeviceUnavailable("frame feed ended".into()));
                }
                continue;
            };

            match self.sample(&frame.image) {
                Sample::Accepted(embedding) => {
                    gallery.push(&req.name, embedding);
                    added += 1;
                    log::info!(
                        "sample {}/{} for {}",
                        gallery.sample_count(&req.name),
                        req.quota,
                        req.name
                    );
                    if !req.delay.is_zero() {
                        std::thread::sleep(req.delay);
                    }
                }
                Sample::Rejected(reason) => log::debug!("frame {} skipped: {}", frame.seq, reason),
            }
        }

        store.save(&gallery)?;
        let total_samples = gallery.sample_count(&req.name);
        log::info!("enrolled {} ({} samples, {} new)", req.name, total_samples, added);
        Ok(EnrollReport {
            name: req.name.clone(),
            total_samples,
            added,
        })
    }

    /// Enroll one sample from a single image and persist it.
    pub fn enroll_still(
        &mut self,
        store: &dyn IdentityStore,
        name: &str,
        image: &RgbImage,
    ) -> Result<EnrollReport, GateError> {
        if name.trim().is_empty() {
            return Err(GateError::BadInput("name required".into()));
        }

        let mut gallery = store.load()?;
        let embedding = match self.sample(image) {
            Sample::Accepted(embedding) => embedding,
            Sample::Rejected(reason) => return Err(reason),
        };
        gallery.push(name, embedding);
        store.save(&gallery)?;

        Ok(EnrollReport {
            name: name.to_string(),
            total_samples: gallery.sample_count(name),
            added: 1,
        })
    }

    fn sample(&mut self, image: &RgbImage) -> Sample {
        let face = match self.detector.detect_largest(image) {
            Ok(Some(face)) => face,
            Ok(None) => return Sample::Rejected(GateError::NoFaceDetected),
            Err(e) => {
                log::warn!("face detection failed: {:#}", e);
                return Sample::Rejected(GateError::NoFaceDetected);
            }
        };
        let Some(crop) = crop_face(image, &face) else {
            return Sample::Rejected(GateError::DegenerateCrop);
        };
        match self.embedder.embed(&crop) {
            Ok(embedding) => Sample::Accepted(embedding),
            Err(e) => {
                log::warn!("embedding failed: {:#}", e);
                Sample::Rejected(GateError::DegenerateCrop)
            }
        }
    }
}
