use thiserror::Error;

/// Classified failures of an enrollment or verification request.
///
/// Only `BadInput`, `Unauthorized` and `EmptyStore` are raised before the
/// camera is touched; the per-frame kinds are absorbed by the polling loops
/// and only surface from single-image requests.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face crop is empty after clamping")]
    DegenerateCrop,
    #[error("no identities enrolled")]
    EmptyStore,
    #[error("deadline elapsed before the request completed")]
    Timeout,
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("bad face service key")]
    Unauthorized,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl GateError {
    /// Stable machine-readable code reported to callers.
    pub fn reason(&self) -> &'static str {
        match self {
            GateError::DeviceUnavailable(_) => "device_unavailable",
            GateError::NoFaceDetected => "no_face",
            GateError::DegenerateCrop => "bad_crop",
            GateError::EmptyStore => "empty_db",
            GateError::Timeout => "timeout",
            GateError::BadInput(_) => "bad_input",
            GateError::Unauthorized => "unauthorized",
            GateError::Store(_) => "store_error",
        }
    }
}
