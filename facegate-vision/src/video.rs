use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Platform capture handle yielding decoded RGB frames.
pub trait CaptureDevice: Send {
    /// Block until the next frame is decoded.
    fn capture(&mut self) -> Result<RgbImage>;

    /// Give the device back to the OS. Capturing again may reopen it.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// V4L2 camera that opens its stream on first capture and reopens it after
/// a failed read.
pub struct Camera {
    device: String,
    width: u32,
    height: u32,
    stream: Option<CameraStream>,
}

struct CameraStream {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    /// Describe a camera without touching the device yet.
    pub fn new(device: &str, width: u32, height: u32) -> Self {
        Self {
            device: device.to_string(),
            width,
            height,
            stream: None,
        }
    }

    /// Open the device immediately, failing if it is unavailable.
    pub fn open(device: &str, width: u32, height: u32) -> Result<Self> {
        let mut camera = Self::new(device, width, height);
        camera.stream = Some(CameraStream::open(device, width, height)?);
        Ok(camera)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl CaptureDevice for Camera {
    fn capture(&mut self) -> Result<RgbImage> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => CameraStream::open(&self.device, self.width, self.height)?,
        };
        // A failed read drops the stream so the next call reopens the device
        let frame = stream.frame()?;
        self.stream = Some(stream);
        Ok(frame)
    }

    fn release(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            log::info!("released camera {}", self.device);
        }
        Ok(())
    }
}

impl CameraStream {
    fn open(device: &str, width: u32, height: u32) -> Result<Self> {
        let dev =
            Device::with_path(device).with_context(|| format!("open camera {}", device))?;
        let fmt = dev.format().context("get format")?;
        // Prefer RGB at the requested size, fallback to YUYV, else accept existing format
        let desired = Format::new(width, height, FourCC::new(b"RGB3"));
        let mut fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        log::info!(
            "opened camera {}: {}x{} fourcc={:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!(
            "captured frame: width={} height={} fourcc={:?} seq={:?} len={}",
            self.width,
            self.height,
            self.fourcc,
            meta.sequence,
            data.len()
        );
        let buf = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => data.to_vec(),
            f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == FourCC::new(b"GREY") => grey_to_rgb(self.width, self.height, data)?,
            other => anyhow::bail!("unsupported pixel format {:?}", other),
        };
        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
            anyhow::bail!(
                "buffer too small: got {}, expected {} (fourcc {:?})",
                buf.len(),
                expected,
                self.fourcc
            );
        }
        let mut buf = buf;
        buf.truncate(expected);
        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }
}

pub fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(anyhow::anyhow!("short YUYV buffer"));
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            out.push((y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8);
            out.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }
    Ok(out)
}

pub fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        return Err(anyhow::anyhow!("short GREY buffer"));
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        // Two pixels with u = v = 128 decode to their luma on every channel
        let data = [50u8, 128, 200, 128];
        let rgb = yuyv_to_rgb(2, 1, &data).unwrap();
        assert_eq!(rgb, vec![50, 50, 50, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_rejects_short_buffer() {
        assert!(yuyv_to_rgb(4, 4, &[0u8; 8]).is_err());
    }

    #[test]
    fn test_grey_expands_channels() {
        let rgb = grey_to_rgb(2, 1, &[7, 9, 255]).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn test_camera_is_lazy() {
        let camera = Camera::new("/dev/video-does-not-exist", 640, 480);
        assert!(!camera.is_open());
        assert_eq!(camera.device(), "/dev/video-does-not-exist");
    }

    #[test]
    fn test_missing_device_is_capture_error() {
        let mut camera = Camera::new("/dev/video-does-not-exist", 640, 480);
        assert!(camera.capture().is_err());
        assert!(!camera.is_open());
        assert!(camera.release().is_ok());
    }
}
