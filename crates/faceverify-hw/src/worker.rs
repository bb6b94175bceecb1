//! Camera thread: owns the capture source and serves async callers over channels.

use crate::media::{CaptureConstraints, CaptureError, MediaCaptureSource, StreamInfo, VideoBackend};
use faceverify_core::{DeviceAccessError, DeviceErrorKind, EncodedImage};
use tokio::sync::{mpsc, oneshot};

/// Messages sent from async callers to the camera thread.
enum CameraRequest {
    Open {
        constraints: CaptureConstraints,
        reply: oneshot::Sender<Result<StreamInfo, DeviceAccessError>>,
    },
    Capture {
        reply: oneshot::Sender<Result<EncodedImage, CaptureError>>,
    },
    Close {
        reply: oneshot::Sender<bool>,
    },
}

/// Clone-safe handle to the camera thread.
///
/// The thread owns the [`MediaCaptureSource`]; when the last handle is
/// dropped it closes any open stream and exits.
#[derive(Clone)]
pub struct CameraHandle {
    tx: mpsc::Sender<CameraRequest>,
}

impl CameraHandle {
    /// Open a stream, replacing any active one.
    pub async fn open(&self, constraints: CaptureConstraints) -> Result<StreamInfo, DeviceAccessError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exited = || DeviceAccessError::new(DeviceErrorKind::Unknown, "camera thread exited");
        self.tx
            .send(CameraRequest::Open {
                constraints,
                reply: reply_tx,
            })
            .await
            .map_err(|_| exited())?;
        reply_rx.await.map_err(|_| exited())?
    }

    /// Capture a JPEG still from the active stream.
    pub async fn capture_frame(&self) -> Result<EncodedImage, CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CameraRequest::Capture { reply: reply_tx })
            .await
            .map_err(|_| CaptureError::WorkerExited)?;
        reply_rx.await.map_err(|_| CaptureError::WorkerExited)?
    }

    /// Stop the active stream. Returns whether one was active.
    pub async fn close(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(CameraRequest::Close { reply: reply_tx })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }
}

/// Spawn the camera on a dedicated OS thread.
///
/// Device calls block, so they run off the async runtime; callers suspend on
/// a oneshot reply instead.
pub fn spawn_camera<B>(backend: B) -> std::io::Result<CameraHandle>
where
    B: VideoBackend + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<CameraRequest>(4);

    std::thread::Builder::new()
        .name("faceverify-camera".into())
        .spawn(move || {
            tracing::debug!("camera thread started");
            let mut source = MediaCaptureSource::new(backend);
            while let Some(req) = rx.blocking_recv() {
                match req {
                    CameraRequest::Open { constraints, reply } => {
                        let _ = reply.send(source.open(&constraints));
                    }
                    CameraRequest::Capture { reply } => {
                        let _ = reply.send(source.capture_frame());
                    }
                    CameraRequest::Close { reply } => {
                        let _ = reply.send(source.close());
                    }
                }
            }
            source.close();
            tracing::debug!("camera thread exiting");
        })?;

    Ok(CameraHandle { tx })
}
