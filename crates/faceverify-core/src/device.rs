//! Platform-neutral classification of camera access failures.

use std::fmt;
use thiserror::Error;

/// Why a camera could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// The user or system refused access to the device.
    PermissionDenied,
    /// No such device is attached.
    DeviceNotFound,
    /// The device exists but cannot stream in any format we handle.
    DeviceUnsupported,
    /// Another process holds the device.
    DeviceBusy,
    Unknown,
}

impl fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeviceErrorKind::PermissionDenied => "permission denied",
            DeviceErrorKind::DeviceNotFound => "device not found",
            DeviceErrorKind::DeviceUnsupported => "device not supported",
            DeviceErrorKind::DeviceBusy => "device busy",
            DeviceErrorKind::Unknown => "unknown device error",
        };
        f.write_str(text)
    }
}

/// A classified device access failure with the platform's own detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct DeviceAccessError {
    pub kind: DeviceErrorKind,
    pub detail: String,
}

impl DeviceAccessError {
    pub fn new(kind: DeviceErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}
