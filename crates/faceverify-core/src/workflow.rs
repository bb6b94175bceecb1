//! Session controller: records acquisitions, gates verification and turns
//! every outcome into exactly one [`SessionEvent`].
//!
//! The workflow never performs I/O. Callers acquire images, run the
//! verification request and hand results back with the [`Ticket`] they were
//! issued, which lets a result that outlived a reset be discarded.

use crate::device::DeviceAccessError;
use crate::events::{EventKind, Remediation, SessionEvent};
use crate::origin::AccessOrigin;
use crate::session::{SequenceError, SessionState, Step};
use crate::types::{Acquisition, EncodedImage, Slot, VerificationRequest, VerificationResult};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    #[error("both images are required before verifying")]
    NotReady,
    #[error("a verification request is already in flight")]
    InFlight,
}

/// Identifies the session generation a verification request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
}

/// A request released by the gate, to be submitted by the caller.
#[derive(Debug, Clone)]
pub struct PendingVerification {
    pub ticket: Ticket,
    pub request: VerificationRequest,
}

pub struct Workflow {
    state: SessionState,
    generation: u64,
    in_flight: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Workflow {
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            state: SessionState::new(),
            generation: 0,
            in_flight: false,
            events,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn step(&self) -> Step {
        self.state.step()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Whether a verify action would currently be accepted.
    pub fn verify_enabled(&self) -> bool {
        self.state.can_verify() && !self.in_flight
    }

    /// Record an acquired image in `slot`.
    pub fn accept(
        &mut self,
        slot: Slot,
        via: Acquisition,
        image: EncodedImage,
    ) -> Result<Step, SequenceError> {
        let bytes = image.len();
        match self.state.set(slot, image) {
            Ok(step) => {
                tracing::info!(%slot, ?via, bytes, step = step.number(), "slot filled");
                let (kind, verb) = match via {
                    Acquisition::Camera => (EventKind::Captured, "captured"),
                    Acquisition::Upload => (EventKind::Uploaded, "uploaded"),
                };
                self.emit(SessionEvent::new(
                    kind,
                    format!("{} {verb} successfully!", capitalize(slot)),
                    step,
                ));
                Ok(step)
            }
            Err(err) => {
                tracing::debug!(error = %err, "out-of-order acquisition");
                let detail = match slot {
                    Slot::Known => "Please complete the current step first",
                    Slot::New if self.state.step() == Step::AwaitingKnown => {
                        "Please capture the known face first"
                    }
                    Slot::New => "Please complete the current step first",
                };
                self.emit(SessionEvent::new(EventKind::Rejected, detail, self.step()));
                Err(err)
            }
        }
    }

    /// Release the session's request for submission.
    pub fn begin_verification(&mut self) -> Result<PendingVerification, GateError> {
        if self.in_flight {
            self.emit(SessionEvent::new(
                EventKind::Rejected,
                "Verification already in progress",
                self.step(),
            ));
            return Err(GateError::InFlight);
        }
        let Some(request) = self.state.request() else {
            self.emit(SessionEvent::new(
                EventKind::Rejected,
                "Please capture both images first",
                self.step(),
            ));
            return Err(GateError::NotReady);
        };
        self.in_flight = true;
        tracing::info!(generation = self.generation, "verification started");
        Ok(PendingVerification {
            ticket: Ticket {
                generation: self.generation,
            },
            request,
        })
    }

    /// Apply the result of a request released by [`begin_verification`].
    ///
    /// Returns `None` when the session was reset after the request was
    /// issued; the stale result is dropped without an event.
    ///
    /// [`begin_verification`]: Self::begin_verification
    pub fn finish_verification(
        &mut self,
        ticket: Ticket,
        result: VerificationResult,
    ) -> Option<VerificationResult> {
        self.in_flight = false;
        if ticket.generation != self.generation {
            tracing::debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale verification result"
            );
            return None;
        }

        let event = match &result {
            VerificationResult::Completed {
                verified: true,
                message,
                embedding_saved,
                ..
            } => {
                let mut detail = message.clone();
                if *embedding_saved {
                    detail.push_str(" Face embedding has been saved.");
                }
                SessionEvent::new(EventKind::VerificationSucceeded, detail, self.step())
            }
            VerificationResult::Completed { message, .. } => {
                SessionEvent::new(EventKind::VerificationFailed, message.clone(), self.step())
            }
            VerificationResult::Failed { error } => {
                SessionEvent::new(EventKind::VerificationFailed, error.clone(), self.step())
            }
        };
        tracing::info!(success = result.success(), matched = result.is_match(), "verification finished");
        self.emit(event);
        Some(result)
    }

    /// Start over with both slots empty.
    pub fn reset(&mut self) {
        self.state.reset();
        self.generation += 1;
        tracing::debug!(generation = self.generation, "session reset");
    }

    pub fn report_camera_error(&self, err: &DeviceAccessError) {
        tracing::warn!(kind = ?err.kind, detail = %err.detail, "camera error");
        self.emit(
            SessionEvent::new(EventKind::CameraError, camera_error_text(err), self.step())
                .with_remediation(Remediation::for_device_error(err.kind)),
        );
    }

    /// Announce that camera capture is not offered on a remote origin.
    pub fn report_remote_origin(&self, origin: &AccessOrigin) {
        self.emit(
            SessionEvent::new(
                EventKind::CameraError,
                format!("Camera unavailable on {origin}; upload images instead"),
                self.step(),
            )
            .with_remediation(Remediation::UseUpload),
        );
    }

    /// Report a failed still capture (e.g. no active stream).
    pub fn report_capture_error(&self, err: &dyn std::error::Error) {
        tracing::warn!(error = %err, "capture failed");
        self.emit(SessionEvent::new(
            EventKind::Rejected,
            format!("Capture failed: {err}"),
            self.step(),
        ));
    }

    pub fn report_file_error(&self, err: &dyn std::error::Error) {
        tracing::warn!(error = %err, "file read failed");
        self.emit(SessionEvent::new(
            EventKind::Rejected,
            format!("Could not read image: {err}"),
            self.step(),
        ));
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

fn capitalize(slot: Slot) -> &'static str {
    match slot {
        Slot::Known => "Known face",
        Slot::New => "New face",
    }
}

fn camera_error_text(err: &DeviceAccessError) -> String {
    use crate::device::DeviceErrorKind::*;
    let hint = match err.kind {
        PermissionDenied => "Camera permission denied. Allow access to the video device and try again.",
        DeviceNotFound => "No camera found. Connect a camera or use upload mode.",
        DeviceUnsupported => "Camera format not supported. Use upload mode instead.",
        DeviceBusy => "Camera is in use by another application. Close it and try again.",
        Unknown => "Please check camera permissions and try again.",
    };
    format!("Error starting camera. {hint}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceErrorKind;

    fn workflow() -> (Workflow, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Workflow::new(tx), rx)
    }

    fn image(tag: &str) -> EncodedImage {
        EncodedImage::jpeg(tag.as_bytes().to_vec())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn ready(wf: &mut Workflow) {
        wf.accept(Slot::Known, Acquisition::Camera, image("A")).unwrap();
        wf.accept(Slot::New, Acquisition::Upload, image("B")).unwrap();
    }

    fn matched() -> VerificationResult {
        VerificationResult::Completed {
            verified: true,
            message: "Verification successful!".into(),
            embedding_saved: true,
            verification_id: Some(1),
        }
    }

    #[test]
    fn test_accept_emits_one_event_per_slot() {
        let (mut wf, mut rx) = workflow();
        ready(&mut wf);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Captured);
        assert_eq!(events[0].detail, "Known face captured successfully!");
        assert_eq!(events[0].step, Step::AwaitingNew);
        assert_eq!(events[1].kind, EventKind::Uploaded);
        assert_eq!(events[1].step, Step::ReadyToVerify);
        assert!(wf.verify_enabled());
    }

    #[test]
    fn test_out_of_order_is_rejected_once() {
        let (mut wf, mut rx) = workflow();
        let err = wf.accept(Slot::New, Acquisition::Camera, image("B"));
        assert!(err.is_err());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Rejected);
        assert_eq!(events[0].detail, "Please capture the known face first");
        assert_eq!(wf.step(), Step::AwaitingKnown);
    }

    #[test]
    fn test_gate_refuses_incomplete_session() {
        let (mut wf, mut rx) = workflow();
        wf.accept(Slot::Known, Acquisition::Upload, image("A")).unwrap();
        drain(&mut rx);
        assert_eq!(wf.begin_verification().unwrap_err(), GateError::NotReady);
        assert_eq!(drain(&mut rx)[0].detail, "Please capture both images first");
        assert!(!wf.in_flight());
    }

    #[test]
    fn test_gate_refuses_duplicate_submission() {
        let (mut wf, mut rx) = workflow();
        ready(&mut wf);
        let pending = wf.begin_verification().unwrap();
        assert!(!wf.verify_enabled());
        assert_eq!(wf.begin_verification().unwrap_err(), GateError::InFlight);

        wf.finish_verification(pending.ticket, matched());
        assert!(wf.verify_enabled());
        let kinds: Vec<_> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Captured,
                EventKind::Uploaded,
                EventKind::Rejected,
                EventKind::VerificationSucceeded
            ]
        );
    }

    #[test]
    fn test_success_detail_mentions_saved_embedding() {
        let (mut wf, mut rx) = workflow();
        ready(&mut wf);
        drain(&mut rx);
        let pending = wf.begin_verification().unwrap();
        assert_eq!(pending.request.known, image("A"));
        let applied = wf.finish_verification(pending.ticket, matched());
        assert_eq!(applied, Some(matched()));
        let events = drain(&mut rx);
        assert_eq!(
            events[0].detail,
            "Verification successful! Face embedding has been saved."
        );
    }

    #[test]
    fn test_failures_surface_server_text() {
        let (mut wf, mut rx) = workflow();
        ready(&mut wf);
        drain(&mut rx);
        let pending = wf.begin_verification().unwrap();
        wf.finish_verification(pending.ticket, VerificationResult::failed("no face detected"));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::VerificationFailed);
        assert_eq!(events[0].detail, "no face detected");
        // The session stays usable for a retry.
        assert!(wf.verify_enabled());
    }

    #[test]
    fn test_stale_result_after_reset_is_discarded() {
        let (mut wf, mut rx) = workflow();
        ready(&mut wf);
        let pending = wf.begin_verification().unwrap();
        wf.reset();
        drain(&mut rx);

        // Still in flight: the outstanding request has not come back.
        assert!(wf.in_flight());
        assert_eq!(wf.finish_verification(pending.ticket, matched()), None);
        assert!(drain(&mut rx).is_empty());
        assert!(!wf.in_flight());
        assert_eq!(wf.step(), Step::AwaitingKnown);
    }

    #[test]
    fn test_no_second_request_while_stale_one_in_flight() {
        let (mut wf, mut rx) = workflow();
        ready(&mut wf);
        let stale = wf.begin_verification().unwrap();
        wf.reset();
        ready(&mut wf);
        assert_eq!(wf.begin_verification().unwrap_err(), GateError::InFlight);

        wf.finish_verification(stale.ticket, matched());
        let fresh = wf.begin_verification().unwrap();
        assert_ne!(fresh.ticket, stale.ticket);
        drain(&mut rx);
    }

    #[test]
    fn test_camera_error_carries_remediation() {
        let (wf, mut rx) = workflow();
        wf.report_camera_error(&DeviceAccessError::new(
            DeviceErrorKind::PermissionDenied,
            "/dev/video0: Permission denied",
        ));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::CameraError);
        assert_eq!(events[0].remediation, Some(Remediation::PermissionHelp));
        assert!(events[0].detail.starts_with("Error starting camera."));
    }

    #[test]
    fn test_remote_origin_suggests_upload() {
        let (wf, mut rx) = workflow();
        wf.report_remote_origin(&AccessOrigin::classify("10.1.2.3"));
        let events = drain(&mut rx);
        assert_eq!(events[0].remediation, Some(Remediation::UseUpload));
        assert!(events[0].detail.contains("10.1.2.3"));
    }

    #[test]
    fn test_dropped_receiver_is_not_fatal() {
        let (mut wf, rx) = workflow();
        drop(rx);
        ready(&mut wf);
        assert!(wf.verify_enabled());
    }
}
