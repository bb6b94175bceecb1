//! faceverify-core: Acquisition state machine and verification client.
//!
//! Holds the two-slot session, the event-emitting workflow that gates
//! verification, and the HTTP client for the remote verification service.
//! Image sources live in `faceverify-hw`.

pub mod client;
pub mod device;
pub mod events;
pub mod origin;
pub mod session;
pub mod types;
pub mod workflow;

pub use client::{
    ClientError, FaceEmbedding, FacialArea, HttpTransport, VerificationClient, VerificationRecord,
};
pub use device::{DeviceAccessError, DeviceErrorKind};
pub use events::{EventKind, Remediation, SessionEvent};
pub use origin::AccessOrigin;
pub use session::{SequenceError, SessionState, Step};
pub use types::{Acquisition, EncodedImage, Slot, VerificationRequest, VerificationResult};
pub use workflow::{GateError, PendingVerification, Ticket, Workflow};
