//! Terminal presentation of session events.

use faceverify_core::{EventKind, Remediation, SessionEvent, Step, VerificationResult};

const STEP_LABELS: [&str; 3] = ["Known face", "New face", "Verify"];

/// `[x] 1 Known face  [ ] 2 New face  [ ] 3 Verify` with steps up to `step` marked.
pub fn step_indicator(step: Step) -> String {
    STEP_LABELS
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let mark = if i as u8 + 1 <= step.number() { 'x' } else { ' ' };
            format!("[{mark}] {} {label}", i + 1)
        })
        .collect::<Vec<_>>()
        .join("  ")
}

/// One-line notification for an event.
pub fn notification(event: &SessionEvent) -> String {
    let tag = match event.kind {
        EventKind::Captured | EventKind::Uploaded => "ok",
        EventKind::VerificationSucceeded => "match",
        EventKind::VerificationFailed => "failed",
        EventKind::CameraError => "camera",
        EventKind::Rejected => "error",
    };
    format!("[{tag}] {}", event.detail)
}

pub fn render(event: &SessionEvent) {
    if event.kind.is_error() {
        eprintln!("{}", notification(event));
    } else {
        println!("{}", notification(event));
    }
    if matches!(event.kind, EventKind::Captured | EventKind::Uploaded) {
        println!("      {}", step_indicator(event.step));
    }
    if let Some(remediation) = event.remediation {
        eprintln!("{}", help_text(remediation));
    }
}

/// Headline and details for a finished verification.
pub fn result_summary(result: &VerificationResult) -> String {
    match result {
        VerificationResult::Completed {
            verified: true,
            message,
            embedding_saved,
            verification_id,
        } => {
            let mut out = format!("Verification Successful!\n  {message}");
            if *embedding_saved {
                out.push_str(" Face embedding has been saved.");
            }
            if let Some(id) = verification_id {
                out.push_str(&format!("\n  record #{id}"));
            }
            out
        }
        VerificationResult::Completed {
            message,
            verification_id,
            ..
        } => {
            let mut out = format!("Verification Failed\n  {message}");
            if let Some(id) = verification_id {
                out.push_str(&format!("\n  record #{id}"));
            }
            out
        }
        VerificationResult::Failed { error } => format!("Verification could not complete\n  {error}"),
    }
}

pub fn help_text(remediation: Remediation) -> &'static str {
    match remediation {
        Remediation::PermissionHelp => {
            "Camera permission required:\n  \
             - add your user to the `video` group (sudo usermod -aG video $USER) and log in again\n  \
             - or check the device node permissions (ls -l /dev/video*)\n  \
             If the camera still refuses, retry with --basic, or upload image files instead."
        }
        Remediation::UseUpload => {
            "Upload mode: pass image files instead of the camera.\n  \
             1. known face: --known <file>  (session: upload known <file>)\n  \
             2. new face:   --new <file>    (session: upload new <file>)\n  \
             3. verify\n  \
             Tips: clear, well-lit photos with similar angles; JPG, PNG or GIF."
        }
        Remediation::CloseOtherApps => {
            "Close other applications using the camera and try again, or upload image files instead."
        }
        Remediation::RetryBasic => {
            "Retry with the device's default settings (--basic, or `start basic` in a session), \
             or upload image files instead."
        }
    }
}
