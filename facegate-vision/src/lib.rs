pub mod detector;
pub mod embedder;
pub mod face;
pub mod model;
pub mod video;

// Re-export commonly used types
pub use detector::OnnxFaceDetector;
pub use embedder::OnnxFaceEmbedder;
pub use face::{Embedding, FaceBox, FaceDetector, FaceEmbedder};
pub use video::{Camera, CaptureDevice};
