pub mod arbiter;
pub mod config;
pub mod enroll;
pub mod error;
pub mod feed;
pub mod frame;
pub mod liveness;
pub mod matcher;
pub mod service;
pub mod session;
pub mod source;
pub mod storage;
pub mod verify;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export vision types for convenience
pub use facegate_vision::{Camera, CaptureDevice, Embedding, FaceBox, FaceDetector, FaceEmbedder};

pub use arbiter::{CameraArbiter, CameraLease};
pub use error::GateError;
pub use service::FaceService;
pub use source::FrameSource;

/// Lock a mutex, taking over the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
