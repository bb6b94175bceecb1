//! Structured notifications emitted by the workflow for the presentation layer.

use crate::device::DeviceErrorKind;
use crate::session::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A camera still filled a slot.
    Captured,
    /// A file upload filled a slot.
    Uploaded,
    /// The service compared both faces and reported a match.
    VerificationSucceeded,
    /// The service reported no match, or the request failed.
    VerificationFailed,
    /// The camera could not be opened or the origin forbids it.
    CameraError,
    /// An action was refused or an acquisition failed; the session is unchanged.
    Rejected,
}

impl EventKind {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            EventKind::VerificationFailed | EventKind::CameraError | EventKind::Rejected
        )
    }
}

/// Follow-up the presentation layer should offer alongside an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Explain how to grant camera access.
    PermissionHelp,
    /// Suggest uploading image files instead of using the camera.
    UseUpload,
    /// Suggest closing other applications holding the camera.
    CloseOtherApps,
    /// Suggest retrying with the device's default format.
    RetryBasic,
}

impl Remediation {
    pub fn for_device_error(kind: DeviceErrorKind) -> Self {
        match kind {
            DeviceErrorKind::PermissionDenied => Remediation::PermissionHelp,
            DeviceErrorKind::DeviceNotFound | DeviceErrorKind::DeviceUnsupported => {
                Remediation::UseUpload
            }
            DeviceErrorKind::DeviceBusy => Remediation::CloseOtherApps,
            DeviceErrorKind::Unknown => Remediation::RetryBasic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: EventKind,
    pub detail: String,
    pub remediation: Option<Remediation>,
    /// Session step after the event was applied.
    pub step: Step,
}

impl SessionEvent {
    pub fn new(kind: EventKind, detail: impl Into<String>, step: Step) -> Self {
        Self {
            kind,
            detail: detail.into(),
            remediation: None,
            step,
        }
    }

    pub fn with_remediation(mut self, remediation: Remediation) -> Self {
        self.remediation = Some(remediation);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_per_device_error() {
        assert_eq!(
            Remediation::for_device_error(DeviceErrorKind::PermissionDenied),
            Remediation::PermissionHelp
        );
        assert_eq!(
            Remediation::for_device_error(DeviceErrorKind::DeviceNotFound),
            Remediation::UseUpload
        );
        assert_eq!(
            Remediation::for_device_error(DeviceErrorKind::DeviceBusy),
            Remediation::CloseOtherApps
        );
        assert_eq!(
            Remediation::for_device_error(DeviceErrorKind::Unknown),
            Remediation::RetryBasic
        );
    }
}
