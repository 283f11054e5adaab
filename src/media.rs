//! Camera and still-image boundary.
//!
//! The controller only ever talks to these traits; the platform supplies the
//! real camera. `MockCamera` backs the simulator binary and the tests.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::MediaError;

/// Raw RGB8 video frame
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Optical zoom range advertised by the device
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoomRange {
    pub min: f64,
    pub max: f64,
}

impl ZoomRange {
    /// Usable form of a device-reported range: bounds ordered, `None` when
    /// either bound is not a finite positive number.
    pub fn validated(self) -> Option<ZoomRange> {
        let usable = |v: f64| v.is_finite() && v > 0.0;
        if !usable(self.min) || !usable(self.max) {
            return None;
        }
        Some(ZoomRange {
            min: self.min.min(self.max),
            max: self.max.max(self.min),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZoomMode {
    /// Widest the lens allows
    Wide,
    /// 1x, clamped into the device range
    #[default]
    Standard,
    /// Longest the lens allows
    Telephoto,
}

impl ZoomMode {
    /// Zoom factor for this mode; 1.0 when the device has no usable zoom control
    pub fn factor(self, range: Option<ZoomRange>) -> f64 {
        match range.and_then(ZoomRange::validated) {
            None => 1.0,
            Some(range) => match self {
                ZoomMode::Wide => range.min,
                ZoomMode::Standard => 1.0_f64.clamp(range.min, range.max),
                ZoomMode::Telephoto => range.max,
            },
        }
    }
}

/// Opens the camera for a session
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn CaptureDevice>, MediaError>;
}

/// An open camera, exclusively owned by the controller until released
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Free-form device description sent with session creation
    fn descriptor(&self) -> String;

    fn zoom_range(&self) -> Option<ZoomRange>;

    async fn set_zoom(&self, factor: f64) -> Result<(), MediaError>;

    async fn grab_frame(&self) -> Result<Frame, MediaError>;

    /// Stop the stream. Synchronous and immediate.
    fn release(&self);
}

/// Turns a raw frame into an uploadable image blob
#[async_trait]
pub trait FrameEncoder: Send + Sync {
    async fn encode(&self, frame: Frame) -> Result<Vec<u8>, MediaError>;
}

/// JPEG encoding via the `image` crate, off the async executor
pub struct JpegFrameEncoder {
    pub quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

#[async_trait]
impl FrameEncoder for JpegFrameEncoder {
    async fn encode(&self, frame: Frame) -> Result<Vec<u8>, MediaError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.pixels.len() != expected {
            return Err(MediaError::Encoding(format!(
                "expected {} bytes for {}x{} RGB, got {}",
                expected,
                frame.width,
                frame.height,
                frame.pixels.len()
            )));
        }

        let quality = self.quality;
        tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            JpegEncoder::new_with_quality(&mut buf, quality)
                .encode(&frame.pixels, frame.width, frame.height, ExtendedColorType::Rgb8)
                .map_err(|e| MediaError::Encoding(e.to_string()))?;
            debug!(
                "[media] encoded {}x{} frame to {} bytes",
                frame.width,
                frame.height,
                buf.len()
            );
            Ok(buf)
        })
        .await
        .map_err(|e| MediaError::Encoding(format!("encoder task failed: {}", e)))?
    }
}

/// Synthetic camera producing gradient frames
pub struct MockCamera {
    pub width: u32,
    pub height: u32,
    pub zoom_range: Option<ZoomRange>,
    pub fail_acquire: Option<MediaError>,
    acquisitions: AtomicU64,
    releases: Arc<AtomicU64>,
    last_zoom: Arc<Mutex<Option<f64>>>,
}

impl MockCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            zoom_range: Some(ZoomRange { min: 0.5, max: 3.0 }),
            fail_acquire: None,
            acquisitions: AtomicU64::new(0),
            releases: Arc::new(AtomicU64::new(0)),
            last_zoom: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(error: MediaError) -> Self {
        Self {
            fail_acquire: Some(error),
            ..Self::new(64, 48)
        }
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn last_zoom(&self) -> Option<f64> {
        self.last_zoom.lock().ok().and_then(|z| *z)
    }
}

#[async_trait]
impl MediaCapture for MockCamera {
    async fn acquire(&self) -> Result<Arc<dyn CaptureDevice>, MediaError> {
        if let Some(error) = self.fail_acquire.clone() {
            return Err(error);
        }
        let n = self.acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
        info!("[media] mock camera acquired ({} total)", n);
        Ok(Arc::new(MockDevice {
            width: self.width,
            height: self.height,
            zoom_range: self.zoom_range,
            frames: AtomicU64::new(0),
            released: AtomicBool::new(false),
            releases: self.releases.clone(),
            last_zoom: self.last_zoom.clone(),
        }))
    }
}

struct MockDevice {
    width: u32,
    height: u32,
    zoom_range: Option<ZoomRange>,
    frames: AtomicU64,
    released: AtomicBool,
    releases: Arc<AtomicU64>,
    last_zoom: Arc<Mutex<Option<f64>>>,
}

#[async_trait]
impl CaptureDevice for MockDevice {
    fn descriptor(&self) -> String {
        format!("mock-camera {}x{}", self.width, self.height)
    }

    fn zoom_range(&self) -> Option<ZoomRange> {
        self.zoom_range
    }

    async fn set_zoom(&self, factor: f64) -> Result<(), MediaError> {
        let range = self
            .zoom_range
            .and_then(ZoomRange::validated)
            .ok_or(MediaError::ZoomUnsupported)?;
        let factor = factor.clamp(range.min, range.max);
        if let Ok(mut zoom) = self.last_zoom.lock() {
            *zoom = Some(factor);
        }
        Ok(())
    }

    async fn grab_frame(&self) -> Result<Frame, MediaError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(MediaError::FrameGrab("device released".to_string()));
        }
        let n = self.frames.fetch_add(1, Ordering::SeqCst);
        let shade = (n % 256) as u8;
        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push((x * 255 / self.width.max(1)) as u8);
                pixels.push((y * 255 / self.height.max(1)) as u8);
                pixels.push(shade);
            }
        }
        Ok(Frame {
            width: self.width,
            height: self.height,
            pixels,
        })
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            info!("[media] mock camera released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_mode_factors() {
        let range = Some(ZoomRange { min: 0.5, max: 3.0 });
        assert_eq!(ZoomMode::Wide.factor(range), 0.5);
        assert_eq!(ZoomMode::Standard.factor(range), 1.0);
        assert_eq!(ZoomMode::Telephoto.factor(range), 3.0);

        let tele_only = Some(ZoomRange { min: 2.0, max: 5.0 });
        assert_eq!(ZoomMode::Standard.factor(tele_only), 2.0);

        assert_eq!(ZoomMode::Telephoto.factor(None), 1.0);
    }

    #[test]
    fn test_malformed_zoom_range() {
        let inverted = Some(ZoomRange { min: 3.0, max: 0.5 });
        assert_eq!(ZoomMode::Standard.factor(inverted), 1.0);
        assert_eq!(ZoomMode::Wide.factor(inverted), 0.5);
        assert_eq!(ZoomMode::Telephoto.factor(inverted), 3.0);

        let nan = Some(ZoomRange {
            min: f64::NAN,
            max: 2.0,
        });
        assert_eq!(nan.and_then(ZoomRange::validated), None);
        assert_eq!(ZoomMode::Standard.factor(nan), 1.0);
        assert_eq!(ZoomMode::Telephoto.factor(nan), 1.0);
    }

    #[tokio::test]
    async fn test_set_zoom_on_unusable_range() {
        let mut camera = MockCamera::new(8, 8);
        camera.zoom_range = Some(ZoomRange {
            min: 0.5,
            max: f64::INFINITY,
        });
        let device = camera.acquire().await.unwrap();
        assert_eq!(device.set_zoom(2.0).await, Err(MediaError::ZoomUnsupported));
    }

    #[tokio::test]
    async fn test_jpeg_encoder_produces_jpeg() {
        let camera = MockCamera::new(32, 24);
        let device = camera.acquire().await.unwrap();
        let frame = device.grab_frame().await.unwrap();
        let bytes = JpegFrameEncoder::new(90).encode(frame).await.unwrap();
        // SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_encoder_rejects_short_buffer() {
        let frame = Frame {
            width: 4,
            height: 4,
            pixels: vec![0; 10],
        };
        let err = JpegFrameEncoder::new(90).encode(frame).await.unwrap_err();
        assert!(matches!(err, MediaError::Encoding(_)));
    }

    #[tokio::test]
    async fn test_release_is_counted_once() {
        let camera = MockCamera::new(8, 8);
        let device = camera.acquire().await.unwrap();
        device.release();
        device.release();
        assert_eq!(camera.acquisitions(), 1);
        assert_eq!(camera.releases(), 1);
        assert!(device.grab_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_failing_camera() {
        let camera = MockCamera::failing(MediaError::PermissionDenied);
        assert_eq!(camera.acquire().await.err(), Some(MediaError::PermissionDenied));
        assert_eq!(camera.acquisitions(), 0);
    }

    #[tokio::test]
    async fn test_set_zoom_clamps() {
        let camera = MockCamera::new(8, 8);
        let device = camera.acquire().await.unwrap();
        device.set_zoom(10.0).await.unwrap();
        assert_eq!(camera.last_zoom(), Some(3.0));
    }
}
