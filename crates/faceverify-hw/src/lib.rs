//! faceverify-hw: Image sources for a verification session.
//!
//! Provides V4L2-based camera capture producing JPEG stills, and file
//! upload of existing images.

pub mod camera;
pub mod file;
pub mod frame;
pub mod media;
pub mod worker;

pub use camera::{list_devices, DeviceInfo, V4lBackend};
pub use file::{FileImageSource, FileReadError};
pub use frame::Frame;
pub use media::{CaptureConstraints, CaptureError, FacingMode, MediaCaptureSource, StreamInfo};
pub use worker::{spawn_camera, CameraHandle};
