//! Movement-based liveness challenge.
//!
//! A printed photo or a still screen held in front of the camera keeps its
//! face box in place. A live subject asked to move their head shifts the
//! box centroid. The challenge passes once the centroid has travelled at
//! least `move_px` from where it was first seen, and it expires when
//! `window` elapses first.
//!
//! The monitor does no I/O. Every transition is a function of the stored
//! state, the observed box and the clock passed to [`LivenessMonitor::update_at`].

use std::time::{Duration, Instant};

use crate::FaceBox;

/// Where a challenge currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// No face observed since the last reset.
    Fresh,
    /// Origin centroid captured, waiting for movement.
    Armed,
    /// Movement threshold reached. Sticky until reset.
    Live,
}

/// Outcome of one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessUpdate {
    pub live: bool,
    /// Distance in pixels from the origin centroid, 0 when no face was given.
    pub moved: f32,
    /// The window elapsed without reaching `Live`.
    pub timeout: bool,
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    window: Duration,
    move_px: f32,
    started_at: Instant,
    origin: Option<(f32, f32)>,
    live: bool,
}

impl LivenessMonitor {
    pub fn new(window: Duration, move_px: f32) -> Self {
        Self::starting_at(window, move_px, Instant::now())
    }

    pub fn starting_at(window: Duration, move_px: f32, now: Instant) -> Self {
        Self {
            window,
            move_px,
            started_at: now,
            origin: None,
            live: false,
        }
    }

    pub fn state(&self) -> LivenessState {
        match (self.origin, self.live) {
            (_, true) => LivenessState::Live,
            (Some(_), false) => LivenessState::Armed,
            (None, false) => LivenessState::Fresh,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn move_px(&self) -> f32 {
        self.move_px
    }

    pub fn update(&mut self, face: Option<&FaceBox>) -> LivenessUpdate {
        self.update_at(face, Instant::now())
    }

    pub fn update_at(&mut self, face: Option<&FaceBox>, now: Instant) -> LivenessUpdate {
        let expired = now.saturating_duration_since(self.started_at) > self.window;

        let moved = match face {
            None => 0.0,
            Some(face) => {
                let (cx, cy) = face.centroid();
                match self.origin {
                    None => {
                        self.origin = Some((cx, cy));
                        0.0
                    }
                    Some((ox, oy)) => {
                        let moved = (cx - ox).hypot(cy - oy);
                        if moved >= self.move_px {
                            self.live = true;
                        }
                        moved
                    }
                }
            }
        };

        LivenessUpdate {
            live: self.live,
            moved,
            timeout: expired && !self.live,
        }
    }

    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.started_at = now;
        self.origin = None;
        self.live = false;
    }
}
