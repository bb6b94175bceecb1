//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::media::{CaptureConstraints, CaptureError, PixelFormat, StreamInfo, VideoBackend, VideoStream};
use faceverify_core::{DeviceAccessError, DeviceErrorKind};
use std::io;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Map an OS error from opening or configuring a device to an access error kind.
pub fn classify_io_error(err: &io::Error) -> DeviceErrorKind {
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) => DeviceErrorKind::PermissionDenied,
        Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => {
            DeviceErrorKind::DeviceNotFound
        }
        Some(libc::EBUSY) => DeviceErrorKind::DeviceBusy,
        // Not a V4L2 node, or the driver rejected the request outright.
        Some(libc::ENOTTY) | Some(libc::EINVAL) => DeviceErrorKind::DeviceUnsupported,
        _ => match err.kind() {
            io::ErrorKind::PermissionDenied => DeviceErrorKind::PermissionDenied,
            io::ErrorKind::NotFound => DeviceErrorKind::DeviceNotFound,
            _ => DeviceErrorKind::Unknown,
        },
    }
}

fn access_error(device_path: &str, context: &str, err: &io::Error) -> DeviceAccessError {
    DeviceAccessError::new(classify_io_error(err), format!("{device_path}: {context}: {err}"))
}

fn pixel_format_of(fourcc: FourCC) -> Option<PixelFormat> {
    if fourcc == FourCC::new(b"YUYV") {
        Some(PixelFormat::Yuyv)
    } else if fourcc == FourCC::new(b"MJPG") {
        Some(PixelFormat::Mjpg)
    } else if fourcc == FourCC::new(b"GREY") {
        Some(PixelFormat::Grey)
    } else {
        None
    }
}

/// Opens streams on V4L2 devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4lBackend;

impl VideoBackend for V4lBackend {
    fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn VideoStream>, DeviceAccessError> {
        Ok(Box::new(V4lStream::open(constraints)?))
    }
}

/// An open V4L2 device with a negotiated capture format.
pub struct V4lStream {
    device: Option<Device>,
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl V4lStream {
    pub fn open(constraints: &CaptureConstraints) -> Result<Self, DeviceAccessError> {
        let device_path = constraints.device.as_str();
        if !Path::new(device_path).exists() {
            return Err(DeviceAccessError::new(
                DeviceErrorKind::DeviceNotFound,
                format!("{device_path}: no such device"),
            ));
        }

        let device = Device::with_path(device_path)
            .map_err(|e| access_error(device_path, "open failed", &e))?;

        let caps = device
            .query_caps()
            .map_err(|e| access_error(device_path, "failed to query capabilities", &e))?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            facing = ?constraints.facing,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(DeviceAccessError::new(
                DeviceErrorKind::DeviceUnsupported,
                format!("{device_path}: not a video capture device"),
            ));
        }

        let mut fmt = device
            .format()
            .map_err(|e| access_error(device_path, "failed to get format", &e))?;

        // Ask for YUYV at the ideal size; in basic mode only switch formats
        // when the current one is something we cannot convert.
        let wants_change = match constraints.ideal_resolution {
            Some((width, height)) => {
                fmt.width = width;
                fmt.height = height;
                true
            }
            None => pixel_format_of(fmt.fourcc).is_none(),
        };
        if wants_change {
            fmt.fourcc = FourCC::new(b"YUYV");
            fmt = device
                .set_format(&fmt)
                .map_err(|e| access_error(device_path, "failed to set format", &e))?;
        }

        let pixel_format = pixel_format_of(fmt.fourcc).ok_or_else(|| {
            DeviceAccessError::new(
                DeviceErrorKind::DeviceUnsupported,
                format!(
                    "{device_path}: unsupported pixel format {:?} (need YUYV, MJPG or GREY)",
                    fmt.fourcc
                ),
            )
        })?;

        tracing::info!(
            width = fmt.width,
            height = fmt.height,
            fourcc = ?fmt.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device: Some(device),
            device_path: device_path.to_string(),
            width: fmt.width,
            height: fmt.height,
            pixel_format,
        })
    }

    /// Convert a raw buffer to RGB based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<(Vec<u8>, u32, u32), CaptureError> {
        match self.pixel_format {
            PixelFormat::Yuyv => {
                let rgb = frame::yuyv_to_rgb(buf, self.width, self.height)?;
                Ok((rgb, self.width, self.height))
            }
            PixelFormat::Grey => {
                let rgb = frame::grey_to_rgb(buf, self.width, self.height)?;
                Ok((rgb, self.width, self.height))
            }
            PixelFormat::Mjpg => Ok(frame::mjpeg_to_rgb(buf)?),
        }
    }
}

impl VideoStream for V4lStream {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            width: self.width,
            height: self.height,
            format: self.pixel_format,
        }
    }

    fn grab(&mut self) -> Result<Frame, CaptureError> {
        let device = self.device.as_ref().ok_or(CaptureError::NoActiveStream)?;
        let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, 4)
            .map_err(|e| CaptureError::Failed(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::Failed(format!("failed to dequeue buffer: {e}")))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        let sequence = meta.sequence;
        let (data, width, height) = self.buf_to_rgb(&buf[..used])?;

        Ok(Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::debug!(device = %self.device_path, "released camera device");
        }
    }
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}
