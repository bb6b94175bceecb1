//! Acquisition state machine for one verification session.
//!
//! The session holds two slots, filled strictly in order (known, then new).
//! The current [`Step`] is always derived from which slots are occupied.

use crate::types::{EncodedImage, Slot, VerificationRequest};
use std::fmt;
use thiserror::Error;

/// Acquisition progress, derived from slot occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AwaitingKnown,
    AwaitingNew,
    ReadyToVerify,
}

impl Step {
    /// 1-based position for step indicators.
    pub fn number(self) -> u8 {
        match self {
            Step::AwaitingKnown => 1,
            Step::AwaitingNew => 2,
            Step::ReadyToVerify => 3,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::AwaitingKnown => f.write_str("awaiting known face"),
            Step::AwaitingNew => f.write_str("awaiting new face"),
            Step::ReadyToVerify => f.write_str("ready to verify"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("cannot set the {slot} while {step}")]
    OutOfOrderCapture { slot: Slot, step: Step },
}

/// The two image slots of a session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    known: Option<EncodedImage>,
    new: Option<EncodedImage>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> Step {
        match (&self.known, &self.new) {
            (Some(_), Some(_)) => Step::ReadyToVerify,
            (Some(_), None) => Step::AwaitingNew,
            // The mutators never fill `new` without `known`.
            (None, _) => Step::AwaitingKnown,
        }
    }

    pub fn known(&self) -> Option<&EncodedImage> {
        self.known.as_ref()
    }

    pub fn new_image(&self) -> Option<&EncodedImage> {
        self.new.as_ref()
    }

    /// Fill the known slot. Only valid while awaiting the known face.
    pub fn set_known(&mut self, image: EncodedImage) -> Result<Step, SequenceError> {
        self.expect_step(Slot::Known, Step::AwaitingKnown)?;
        self.known = Some(image);
        Ok(self.step())
    }

    /// Fill the new slot. Only valid while awaiting the new face.
    pub fn set_new(&mut self, image: EncodedImage) -> Result<Step, SequenceError> {
        self.expect_step(Slot::New, Step::AwaitingNew)?;
        self.new = Some(image);
        Ok(self.step())
    }

    /// Fill whichever slot is named.
    pub fn set(&mut self, slot: Slot, image: EncodedImage) -> Result<Step, SequenceError> {
        match slot {
            Slot::Known => self.set_known(image),
            Slot::New => self.set_new(image),
        }
    }

    /// Clear both slots.
    pub fn reset(&mut self) {
        self.known = None;
        self.new = None;
    }

    pub fn can_verify(&self) -> bool {
        self.step() == Step::ReadyToVerify
    }

    /// Build the request for a ready session.
    pub fn request(&self) -> Option<VerificationRequest> {
        match (&self.known, &self.new) {
            (Some(known), Some(new)) => Some(VerificationRequest {
                known: known.clone(),
                new: new.clone(),
            }),
            _ => None,
        }
    }

    fn expect_step(&self, slot: Slot, expected: Step) -> Result<(), SequenceError> {
        let step = self.step();
        if step == expected {
            Ok(())
        } else {
            Err(SequenceError::OutOfOrderCapture { slot, step })
        }
    }
}
