//! Live camera stream lifecycle and still-frame capture.
//!
//! [`MediaCaptureSource`] owns at most one active stream. The platform side
//! sits behind [`VideoBackend`] / [`VideoStream`]; the V4L2 implementation is
//! in [`crate::camera`].

use crate::frame::{Frame, FrameError};
use faceverify_core::{DeviceAccessError, EncodedImage};
use thiserror::Error;

/// JPEG quality for captured stills (0.8 on a 0–1 scale).
pub const JPEG_QUALITY: u8 = 80;

pub const DEFAULT_IDEAL_WIDTH: u32 = 1280;
pub const DEFAULT_IDEAL_HEIGHT: u32 = 720;
pub const DEFAULT_WARMUP_FRAMES: usize = 4;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no active camera stream")]
    NoActiveStream,
    #[error("capture failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("camera thread exited")]
    WorkerExited,
}

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Towards the user (webcam).
    User,
    /// Away from the user.
    Environment,
}

/// What to ask of the device when opening a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Device path (e.g. "/dev/video0").
    pub device: String,
    /// Preferred resolution; the driver picks the closest it supports.
    /// `None` keeps whatever format the device is already configured for.
    pub ideal_resolution: Option<(u32, u32)>,
    pub facing: FacingMode,
    /// Frames discarded after opening while auto-exposure settles.
    pub warmup_frames: usize,
}

impl CaptureConstraints {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ideal_resolution: Some((DEFAULT_IDEAL_WIDTH, DEFAULT_IDEAL_HEIGHT)),
            facing: FacingMode::User,
            warmup_frames: DEFAULT_WARMUP_FRAMES,
        }
    }

    /// Accept the device's current format; a fallback for picky drivers.
    pub fn basic(device: impl Into<String>) -> Self {
        Self {
            ideal_resolution: None,
            ..Self::new(device)
        }
    }

    pub fn with_ideal_resolution(mut self, width: u32, height: u32) -> Self {
        self.ideal_resolution = Some((width, height));
        self
    }

    pub fn with_warmup_frames(mut self, count: usize) -> Self {
        self.warmup_frames = count;
        self
    }
}

/// Negotiated pixel format of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed.
    Yuyv,
    /// Motion-JPEG, one JPEG per frame.
    Mjpg,
    /// 8-bit grayscale.
    Grey,
}

/// Native geometry of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Opens platform video streams.
pub trait VideoBackend {
    fn open(&self, constraints: &CaptureConstraints)
        -> Result<Box<dyn VideoStream>, DeviceAccessError>;
}

/// An open platform video stream.
pub trait VideoStream {
    fn info(&self) -> StreamInfo;
    fn grab(&mut self) -> Result<Frame, CaptureError>;
    /// Release the device. Called exactly once per stream.
    fn stop(&mut self);
}

/// The single active capture source of a session.
///
/// Dropping the source releases the stream.
pub struct MediaCaptureSource<B: VideoBackend> {
    backend: B,
    active: Option<Box<dyn VideoStream>>,
}

impl<B: VideoBackend> MediaCaptureSource<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            active: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.active.as_ref().map(|s| s.info())
    }

    /// Open a stream, closing any stream that is already active.
    pub fn open(&mut self, constraints: &CaptureConstraints) -> Result<StreamInfo, DeviceAccessError> {
        self.close();

        let mut stream = self.backend.open(constraints)?;
        let info = stream.info();

        if constraints.warmup_frames > 0 {
            tracing::debug!(count = constraints.warmup_frames, "discarding warmup frames");
            for _ in 0..constraints.warmup_frames {
                let _ = stream.grab();
            }
        }

        tracing::info!(
            device = %constraints.device,
            width = info.width,
            height = info.height,
            format = ?info.format,
            "camera stream active"
        );
        self.active = Some(stream);
        Ok(info)
    }

    /// Stop the active stream. Returns whether a stream was active.
    pub fn close(&mut self) -> bool {
        match self.active.take() {
            Some(mut stream) => {
                stream.stop();
                tracing::info!("camera stream stopped");
                true
            }
            None => false,
        }
    }

    /// Capture the current frame as a JPEG still.
    pub fn capture_frame(&mut self) -> Result<EncodedImage, CaptureError> {
        let stream = self.active.as_mut().ok_or(CaptureError::NoActiveStream)?;
        let frame = stream.grab()?;
        if frame.is_dark() {
            tracing::warn!(
                seq = frame.sequence,
                brightness = frame.avg_brightness(),
                "captured frame is very dark"
            );
        }
        let jpeg = frame.to_jpeg(JPEG_QUALITY)?;
        tracing::debug!(
            seq = frame.sequence,
            width = frame.width,
            height = frame.height,
            bytes = jpeg.len(),
            "frame captured"
        );
        Ok(EncodedImage::jpeg(jpeg))
    }
}

impl<B: VideoBackend> Drop for MediaCaptureSource<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-memory backend for tests here and in dependent crates
/// (`test-util` feature).
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use faceverify_core::DeviceErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Backend producing solid-gray frames, counting opens, grabs and stops.
    ///
    /// Every open attempt is recorded in `requested`, including failed ones.
    #[derive(Clone, Default)]
    pub struct FakeBackend {
        /// Fail every open with this kind.
        pub fail_with: Option<DeviceErrorKind>,
        /// Fail only opens that ask for an ideal resolution.
        pub fail_ideal_with: Option<DeviceErrorKind>,
        pub requested: Arc<Mutex<Vec<CaptureConstraints>>>,
        pub opens: Arc<AtomicUsize>,
        pub grabs: Arc<AtomicUsize>,
        pub stops: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        pub fn failing(kind: DeviceErrorKind) -> Self {
            Self {
                fail_with: Some(kind),
                ..Self::default()
            }
        }

        pub fn failing_ideal(kind: DeviceErrorKind) -> Self {
            Self {
                fail_ideal_with: Some(kind),
                ..Self::default()
            }
        }

        /// Constraints of every open attempt so far.
        pub fn requested(&self) -> Vec<CaptureConstraints> {
            self.requested
                .lock()
                .map(|r| r.clone())
                .unwrap_or_default()
        }

        pub fn count(counter: &Arc<AtomicUsize>) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    struct FakeStream {
        info: StreamInfo,
        grabs: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl VideoBackend for FakeBackend {
        fn open(
            &self,
            constraints: &CaptureConstraints,
        ) -> Result<Box<dyn VideoStream>, DeviceAccessError> {
            if let Ok(mut requested) = self.requested.lock() {
                requested.push(constraints.clone());
            }
            let failure = match constraints.ideal_resolution {
                Some(_) => self.fail_with.or(self.fail_ideal_with),
                None => self.fail_with,
            };
            if let Some(kind) = failure {
                return Err(DeviceAccessError::new(kind, constraints.device.clone()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (width, height) = constraints.ideal_resolution.unwrap_or((16, 8));
            Ok(Box::new(FakeStream {
                info: StreamInfo {
                    width,
                    height,
                    format: PixelFormat::Yuyv,
                },
                grabs: self.grabs.clone(),
                stops: self.stops.clone(),
            }))
        }
    }

    impl VideoStream for FakeStream {
        fn info(&self) -> StreamInfo {
            self.info
        }

        fn grab(&mut self) -> Result<Frame, CaptureError> {
            let seq = self.grabs.fetch_add(1, Ordering::SeqCst) as u32;
            let StreamInfo { width, height, .. } = self.info;
            Ok(Frame {
                data: vec![128; (width * height * 3) as usize],
                width,
                height,
                timestamp: std::time::Instant::now(),
                sequence: seq,
            })
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeBackend;
    use super::*;
    use faceverify_core::DeviceErrorKind;

    fn constraints() -> CaptureConstraints {
        CaptureConstraints::new("/dev/video9")
            .with_ideal_resolution(32, 24)
            .with_warmup_frames(0)
    }

    #[test]
    fn test_capture_before_open() {
        let mut source = MediaCaptureSource::new(FakeBackend::default());
        assert!(matches!(
            source.capture_frame(),
            Err(CaptureError::NoActiveStream)
        ));
    }

    #[test]
    fn test_capture_is_jpeg_at_native_size() {
        let mut source = MediaCaptureSource::new(FakeBackend::default());
        let info = source.open(&constraints()).unwrap();
        assert_eq!((info.width, info.height), (32, 24));

        let still = source.capture_frame().unwrap();
        assert_eq!(still.media_type(), "image/jpeg");
        let decoded = image::load_from_memory(still.as_bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = FakeBackend::default();
        let mut source = MediaCaptureSource::new(backend.clone());
        source.open(&constraints()).unwrap();
        assert!(source.close());
        assert!(!source.close());
        assert_eq!(FakeBackend::count(&backend.stops), 1);
        assert!(matches!(
            source.capture_frame(),
            Err(CaptureError::NoActiveStream)
        ));
    }

    #[test]
    fn test_close_without_open() {
        let mut source = MediaCaptureSource::new(FakeBackend::default());
        assert!(!source.close());
        assert!(!source.close());
    }

    #[test]
    fn test_reopen_closes_previous_stream() {
        let backend = FakeBackend::default();
        let mut source = MediaCaptureSource::new(backend.clone());
        source.open(&constraints()).unwrap();
        source.open(&constraints()).unwrap();
        assert_eq!(FakeBackend::count(&backend.opens), 2);
        assert_eq!(FakeBackend::count(&backend.stops), 1);
        assert!(source.is_open());
    }

    #[test]
    fn test_warmup_frames_are_discarded() {
        let backend = FakeBackend::default();
        let mut source = MediaCaptureSource::new(backend.clone());
        source.open(&constraints().with_warmup_frames(3)).unwrap();
        assert_eq!(FakeBackend::count(&backend.grabs), 3);
    }

    #[test]
    fn test_open_failure_leaves_no_stream() {
        let mut source = MediaCaptureSource::new(FakeBackend::failing(DeviceErrorKind::DeviceBusy));
        let err = source.open(&constraints()).unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::DeviceBusy);
        assert!(!source.is_open());
        assert!(source.stream_info().is_none());
    }

    #[test]
    fn test_drop_releases_stream() {
        let backend = FakeBackend::default();
        {
            let mut source = MediaCaptureSource::new(backend.clone());
            source.open(&constraints()).unwrap();
        }
        assert_eq!(FakeBackend::count(&backend.stops), 1);
    }

    #[test]
    fn test_basic_constraints_drop_resolution() {
        let basic = CaptureConstraints::basic("/dev/video0");
        assert_eq!(basic.ideal_resolution, None);
        assert_eq!(basic.facing, FacingMode::User);
        assert_eq!(
            CaptureConstraints::new("/dev/video0").ideal_resolution,
            Some((1280, 720))
        );
    }
}
