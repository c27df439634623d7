//! Transport-agnostic entry points for the face gate.
//!
//! Every method returns the JSON body a caller receives, or a [`GateError`]
//! the transport turns into an error response with [`error_body`]. Expected
//! negative outcomes ("no face", "timeout", ...) are successful calls with
//! `"success": false`.
//!
//! Locks are taken in a fixed order: camera lease, models, sessions.

use anyhow::Context;
use image::RgbImage;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;

use crate::arbiter::CameraArbiter;
use crate::config::{secs, Config, EnrollConfig, VerifyConfig};
use crate::enroll::{EnrollRequest, EnrollmentPipeline};
use crate::error::GateError;
use crate::feed::LiveFeed;
use crate::matcher::UNKNOWN;
use crate::session::{LivenessSessions, DEFAULT_SESSION};
use crate::source::FrameSource;
use crate::storage::{IdentityStore, JsonFileStore};
use crate::verify::{Observation, VerificationPipeline, VerifyOutcome, VerifyParams};
use crate::{lock, Camera, FaceDetector, FaceEmbedder};
use facegate_vision::{OnnxFaceDetector, OnnxFaceEmbedder};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VerifyRequest {
    pub thr: f32,
    pub every: u32,
    pub timeout_s: f32,
    pub live_window: f32,
    pub move_px: f32,
}

impl From<&VerifyConfig> for VerifyRequest {
    fn from(cfg: &VerifyConfig) -> Self {
        Self {
            thr: cfg.threshold,
            every: cfg.every,
            timeout_s: cfg.timeout_s,
            live_window: cfg.live_window_s,
            move_px: cfg.move_px,
        }
    }
}

impl Default for VerifyRequest {
    fn default() -> Self {
        Self::from(&VerifyConfig::default())
    }
}

impl From<&VerifyRequest> for VerifyParams {
    fn from(req: &VerifyRequest) -> Self {
        Self {
            threshold: req.thr,
            every: req.every,
            timeout: secs(req.timeout_s),
            live_window: secs(req.live_window),
            move_px: req.move_px,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnrollCameraRequest {
    pub name: String,
    pub samples: usize,
    pub sleep: f32,
}

impl Default for EnrollCameraRequest {
    fn default() -> Self {
        let cfg = EnrollConfig::default();
        Self {
            name: String::new(),
            samples: cfg.samples,
            sleep: cfg.sleep_s,
        }
    }
}

/// Inference backends, used by one request at a time.
pub struct Models {
    pub detector: Box<dyn FaceDetector>,
    pub embedder: Box<dyn FaceEmbedder>,
}

pub struct FaceService {
    config: Config,
    camera: CameraArbiter<FrameSource>,
    models: Mutex<Models>,
    store: Box<dyn IdentityStore>,
    sessions: Mutex<LivenessSessions>,
}

impl FaceService {
    pub fn new(
        config: Config,
        source: FrameSource,
        models: Models,
        store: Box<dyn IdentityStore>,
    ) -> Self {
        let sessions = LivenessSessions::from_config(
            &config.sessions,
            secs(config.verify.live_window_s),
            config.verify.move_px,
        );
        Self {
            config,
            camera: CameraArbiter::new(source),
            models: Mutex::new(models),
            store,
            sessions: Mutex::new(sessions),
        }
    }

    /// Wire up the V4L2 camera, the ONNX models and the JSON store named in `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let cam = &config.camera;
        let source = FrameSource::new(Box::new(Camera::new(&cam.device, cam.width, cam.height)))
            .with_retry_backoff(cam.retry_backoff());

        let m = &config.models;
        let detector = OnnxFaceDetector::load(&m.detector, m.confidence)
            .context("Failed to load face detector")?;
        let embedder = OnnxFaceEmbedder::load(&m.embedder, m.embed_width, m.embed_height)
            .context("Failed to load face embedder")?;
        let store = JsonFileStore::new(&config.store.path);

        Ok(Self::new(
            config,
            source,
            Models {
                detector: Box::new(detector),
                embedder: Box::new(embedder),
            },
            Box::new(store),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn health(&self) -> Result<Value, GateError> {
        let gallery = self.store.load()?;
        Ok(json!({ "ok": true, "users": gallery.len() }))
    }

    pub fn enroll_camera(
        &self,
        req: &EnrollCameraRequest,
        key: Option<&str>,
    ) -> Result<Value, GateError> {
        self.authorize(key)?;
        let request = EnrollRequest {
            name: req.name.clone(),
            quota: req.samples,
            delay: secs(req.sleep),
            deadline: self.config.enroll.timeout_s.map(secs),
        };
        if request.name.trim().is_empty() {
            return Err(GateError::BadInput("name required".into()));
        }
        if request.quota == 0 {
            return Err(GateError::BadInput("samples must be at least 1".into()));
        }

        let source = self.camera.acquire();
        self.ensure_started(&source)?;
        let mut models = lock(&self.models);
        let Models { detector, embedder } = &mut *models;

        let mut feed = LiveFeed::new(&source, self.config.camera.poll_interval());
        let report = EnrollmentPipeline::new(detector.as_mut(), embedder.as_mut()).run(
            self.store.as_ref(),
            &mut feed,
            &request,
        )?;

        Ok(json!({
            "success": true,
            "name": report.name,
            "samples": report.total_samples,
            "added": report.added,
        }))
    }

    pub fn verify_camera(&self, req: &VerifyRequest, key: Option<&str>) -> Result<Value, GateError> {
        self.authorize(key)?;
        let gallery = self.store.load()?;
        if !gallery.has_samples() {
            return Ok(empty_db());
        }

        let source = self.camera.acquire();
        self.ensure_started(&source)?;
        let mut models = lock(&self.models);
        let Models { detector, embedder } = &mut *models;

        let mut feed = LiveFeed::new(&source, self.config.camera.poll_interval());
        let outcome = VerificationPipeline::new(detector.as_mut(), embedder.as_mut(), &gallery)
            .run(&mut feed, &VerifyParams::from(req));

        Ok(match outcome {
            VerifyOutcome::Verified {
                name,
                score,
                live,
                moved,
            } => json!({
                "success": true,
                "name": name,
                "score": score,
                "live": live,
                "moved": moved,
            }),
            VerifyOutcome::EmptyStore => empty_db(),
            VerifyOutcome::TimedOut {
                best_name,
                best_score,
            } => json!({
                "success": false,
                "reason": "timeout",
                "best_name": best_name,
                "best_score": best_score,
            }),
        })
    }

    /// Add one sample for `name` from a single image.
    pub fn enroll_image(
        &self,
        name: &str,
        image: &RgbImage,
        key: Option<&str>,
    ) -> Result<Value, GateError> {
        self.authorize(key)?;
        let mut models = lock(&self.models);
        let Models { detector, embedder } = &mut *models;

        match EnrollmentPipeline::new(detector.as_mut(), embedder.as_mut()).enroll_still(
            self.store.as_ref(),
            name,
            image,
        ) {
            Ok(report) => Ok(json!({
                "success": true,
                "name": report.name,
                "samples": report.total_samples,
            })),
            Err(e @ (GateError::NoFaceDetected | GateError::DegenerateCrop)) => Ok(failure(&e)),
            Err(e) => Err(e),
        }
    }

    /// Match one image, advancing the liveness challenge of `session_id`.
    ///
    /// Callers submit successive snapshots under the same session id; the
    /// subject has to move between them to pass.
    pub fn recognize_image(
        &self,
        image: &RgbImage,
        session_id: Option<&str>,
        thr: f32,
        key: Option<&str>,
    ) -> Result<Value, GateError> {
        self.authorize(key)?;
        let gallery = self.store.load()?;
        if !gallery.has_samples() {
            return Ok(empty_db());
        }

        let mut models = lock(&self.models);
        let Models { detector, embedder } = &mut *models;
        let mut sessions = lock(&self.sessions);
        let session = session_id.filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SESSION);
        let monitor = sessions.monitor(session);

        let observation = VerificationPipeline::new(detector.as_mut(), embedder.as_mut(), &gallery)
            .observe(image, monitor, thr);

        Ok(match observation {
            Observation::NoFace { .. } => failure(&GateError::NoFaceDetected),
            Observation::BadCrop { .. } | Observation::EmbedFailed { .. } => {
                failure(&GateError::DegenerateCrop)
            }
            Observation::Scored { result, update, .. } => {
                if result.matched && update.live {
                    monitor.reset();
                    json!({
                        "success": true,
                        "name": result.best_name,
                        "score": result.best_score,
                        "live": true,
                        "moved": update.moved,
                    })
                } else {
                    let (name, reason) = if result.matched {
                        (result.best_name.as_str(), "not_live")
                    } else {
                        (UNKNOWN, "no_match")
                    };
                    json!({
                        "success": false,
                        "name": name,
                        "score": result.best_score,
                        "live": update.live,
                        "moved": update.moved,
                        "reason": reason,
                    })
                }
            }
        })
    }

    /// Stop the capture thread and release the camera.
    pub fn shutdown(&self) {
        self.camera.peek().stop();
    }

    fn authorize(&self, key: Option<&str>) -> Result<(), GateError> {
        if self.config.service.authorize(key) {
            Ok(())
        } else {
            log::warn!("rejected request with bad face service key");
            Err(GateError::Unauthorized)
        }
    }

    fn ensure_started(&self, source: &FrameSource) -> Result<(), GateError> {
        source
            .start(self.config.camera.startup_grace())
            .map_err(|e| GateError::DeviceUnavailable(format!("{:#}", e)))
    }
}

/// Decode JPEG/PNG/... bytes into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, GateError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| GateError::BadInput(format!("undecodable image: {}", e)))?;
    Ok(image.to_rgb8())
}

/// Body for a request that failed with `err`.
pub fn error_body(err: &GateError) -> Value {
    json!({
        "success": false,
        "reason": err.reason(),
        "detail": err.to_string(),
    })
}

fn failure(err: &GateError) -> Value {
    json!({ "success": false, "reason": err.reason() })
}

fn empty_db() -> Value {
    failure(&GateError::EmptyStore)
}
