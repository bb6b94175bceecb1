use crate::config::Config;
use crate::render;
use faceverify_core::{
    AccessOrigin, Acquisition, DeviceErrorKind, SessionEvent, Slot, Step, Ticket,
    VerificationClient, VerificationResult, Workflow,
};
use faceverify_hw::{
    spawn_camera, CameraHandle, CaptureError, FileImageSource, StreamInfo, V4lBackend,
};
use std::io;
use std::path::Path;
use tokio::sync::mpsc;

/// Starts the camera thread on first use.
pub type CameraSpawner = Box<dyn Fn() -> io::Result<CameraHandle>>;

/// Receives every workflow event in order.
pub type EventSink = Box<dyn FnMut(&SessionEvent)>;

/// Camera-related command line options.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CameraArgs {
    /// Camera device (overrides the configured device)
    #[arg(long)]
    pub device: Option<String>,
    /// Open the camera with its default format instead of the ideal resolution
    #[arg(long)]
    pub basic: bool,
    /// Use the camera even from a remote (SSH) session
    #[arg(long)]
    pub try_anyway: bool,
}

/// Wires image sources, the workflow and the verification client together
/// and renders every workflow event.
pub struct Controller {
    config: Config,
    camera_args: CameraArgs,
    origin: AccessOrigin,
    workflow: Workflow,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    client: VerificationClient,
    files: FileImageSource,
    camera_spawner: CameraSpawner,
    camera: Option<CameraHandle>,
    stream: Option<StreamInfo>,
    on_event: EventSink,
    completions_tx: mpsc::UnboundedSender<(Ticket, VerificationResult)>,
    completions_rx: mpsc::UnboundedReceiver<(Ticket, VerificationResult)>,
}

impl Controller {
    /// Controller for this terminal: V4L2 camera, detected origin, events
    /// rendered to the terminal.
    pub fn new(config: Config, camera_args: CameraArgs) -> Self {
        Self::with_parts(
            config,
            camera_args,
            AccessOrigin::detect(),
            Box::new(|| spawn_camera(V4lBackend)),
            Box::new(render::render),
        )
    }

    pub fn with_parts(
        config: Config,
        camera_args: CameraArgs,
        origin: AccessOrigin,
        camera_spawner: CameraSpawner,
        on_event: EventSink,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let client = VerificationClient::over_http(config.server_url.clone(), config.timeout());
        Self {
            config,
            camera_args,
            origin,
            workflow: Workflow::new(events_tx),
            events,
            client,
            files: FileImageSource,
            camera_spawner,
            camera: None,
            stream: None,
            on_event,
            completions_tx,
            completions_rx,
        }
    }

    pub fn origin(&self) -> &AccessOrigin {
        &self.origin
    }

    pub fn step(&self) -> Step {
        self.workflow.step()
    }

    pub fn stream(&self) -> Option<StreamInfo> {
        self.stream
    }

    pub fn verify_enabled(&self) -> bool {
        self.workflow.verify_enabled()
    }

    pub fn verification_pending(&self) -> bool {
        self.workflow.in_flight()
    }

    /// Open the camera, honouring the origin policy.
    ///
    /// When the ideal constraints fail for a reason other than permission,
    /// absence or contention, the device's default format is tried once
    /// before reporting.
    pub async fn start_camera(&mut self, basic: bool, try_anyway: bool) -> bool {
        if !self.origin.is_local() && !(try_anyway || self.camera_args.try_anyway) {
            self.workflow.report_remote_origin(&self.origin);
            self.flush_events();
            return false;
        }

        if self.camera.is_none() {
            match (self.camera_spawner)() {
                Ok(camera) => self.camera = Some(camera),
                Err(e) => {
                    tracing::error!(error = %e, "failed to spawn camera thread");
                    self.workflow.report_capture_error(&e);
                    self.flush_events();
                    return false;
                }
            }
        }
        let Some(camera) = self.camera.clone() else {
            return false;
        };

        let basic = basic || self.camera_args.basic;
        let device = self.camera_args.device.as_deref();
        let mut result = camera.open(self.config.constraints(device, basic)).await;
        if let Err(err) = &result {
            let retryable = matches!(
                err.kind,
                DeviceErrorKind::DeviceUnsupported | DeviceErrorKind::Unknown
            );
            if retryable && !basic {
                tracing::info!(error = %err, "retrying camera with basic constraints");
                result = camera.open(self.config.constraints(device, true)).await;
            }
        }

        let ok = match result {
            Ok(info) => {
                println!(
                    "Camera: active ({}x{} {:?})",
                    info.width, info.height, info.format
                );
                self.stream = Some(info);
                true
            }
            Err(err) => {
                self.stream = None;
                self.workflow.report_camera_error(&err);
                false
            }
        };
        self.flush_events();
        ok
    }

    pub async fn stop_camera(&mut self) {
        if let Some(camera) = &self.camera {
            if camera.close().await {
                println!("Camera: stopped");
            }
        }
        self.stream = None;
    }

    /// Capture a still into `slot`.
    pub async fn capture(&mut self, slot: Slot) -> bool {
        let result = match &self.camera {
            Some(camera) => camera.capture_frame().await,
            None => Err(CaptureError::NoActiveStream),
        };
        let ok = match result {
            Ok(image) => self.workflow.accept(slot, Acquisition::Camera, image).is_ok(),
            Err(err) => {
                self.workflow.report_capture_error(&err);
                false
            }
        };
        self.flush_events();
        ok
    }

    /// Read `path` into `slot`.
    pub async fn upload(&mut self, slot: Slot, path: &Path) -> bool {
        let ok = match self.files.read_file(path).await {
            Ok(image) => self.workflow.accept(slot, Acquisition::Upload, image).is_ok(),
            Err(err) => {
                self.workflow.report_file_error(&err);
                false
            }
        };
        self.flush_events();
        ok
    }

    /// Release the session's request and submit it in the background.
    /// The result arrives through [`next_completion`](Self::next_completion).
    pub fn start_verification(&mut self) -> bool {
        let pending = match self.workflow.begin_verification() {
            Ok(pending) => pending,
            Err(_) => {
                self.flush_events();
                return false;
            }
        };
        println!("Verifying faces...");
        let client = self.client.clone();
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = client.verify(pending.request).await;
            let _ = done.send((pending.ticket, result));
        });
        true
    }

    /// Wait for the next finished verification request.
    pub async fn next_completion(&mut self) -> Option<(Ticket, VerificationResult)> {
        self.completions_rx.recv().await
    }

    /// Apply a finished request; returns the result unless it was stale.
    pub fn complete(&mut self, ticket: Ticket, result: VerificationResult) -> Option<VerificationResult> {
        let applied = self.workflow.finish_verification(ticket, result);
        self.flush_events();
        if let Some(result) = &applied {
            println!("{}", render::result_summary(result));
        }
        applied
    }

    /// Submit and wait for the result.
    pub async fn verify(&mut self) -> Option<VerificationResult> {
        if !self.start_verification() {
            return None;
        }
        let (ticket, result) = self.next_completion().await?;
        self.complete(ticket, result)
    }

    pub fn reset(&mut self) {
        self.workflow.reset();
        println!("Session reset.");
        println!("      {}", render::step_indicator(self.workflow.step()));
    }

    pub fn flush_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            (self.on_event)(&event);
        }
    }

    /// Release the camera before exit.
    pub async fn shutdown(&mut self) {
        self.stop_camera().await;
        self.camera = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceverify_core::{EventKind, Remediation};
    use faceverify_hw::media::fake::FakeBackend;
    use std::sync::{Arc, Mutex};

    fn small_config() -> Config {
        Config {
            capture_width: 32,
            capture_height: 24,
            warmup_frames: 0,
            ..Config::default()
        }
    }

    fn remote() -> AccessOrigin {
        AccessOrigin::Remote {
            host: "203.0.113.7".to_string(),
        }
    }

    /// Controller over `backend`, collecting emitted events.
    fn controller(
        backend: &FakeBackend,
        origin: AccessOrigin,
        camera_args: CameraArgs,
    ) -> (Controller, Arc<Mutex<Vec<SessionEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let backend = backend.clone();
        let controller = Controller::with_parts(
            small_config(),
            camera_args,
            origin,
            Box::new(move || spawn_camera(backend.clone())),
            Box::new(move |event: &SessionEvent| sink.lock().unwrap().push(event.clone())),
        );
        (controller, events)
    }

    #[tokio::test]
    async fn test_remote_origin_refuses_camera() {
        let backend = FakeBackend::default();
        let (mut controller, events) = controller(&backend, remote(), CameraArgs::default());

        assert!(!controller.start_camera(false, false).await);
        assert!(backend.requested().is_empty());
        assert!(controller.stream().is_none());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::CameraError);
        assert_eq!(events[0].remediation, Some(Remediation::UseUpload));
    }

    #[tokio::test]
    async fn test_remote_origin_try_anyway_opens() {
        let backend = FakeBackend::default();
        let (mut controller, events) = controller(&backend, remote(), CameraArgs::default());

        assert!(controller.start_camera(false, true).await);
        assert_eq!(backend.requested().len(), 1);
        assert_eq!(
            controller.stream().map(|s| (s.width, s.height)),
            Some((32, 24))
        );
        assert!(events.lock().unwrap().is_empty());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_try_anyway_flag_from_command_line() {
        let backend = FakeBackend::default();
        let args = CameraArgs {
            try_anyway: true,
            ..CameraArgs::default()
        };
        let (mut controller, _events) = controller(&backend, remote(), args);

        assert!(controller.start_camera(false, false).await);
        assert_eq!(backend.requested().len(), 1);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_retries_once_with_basic_constraints() {
        let backend = FakeBackend::failing_ideal(DeviceErrorKind::DeviceUnsupported);
        let (mut controller, events) =
            controller(&backend, AccessOrigin::Local, CameraArgs::default());

        assert!(controller.start_camera(false, false).await);
        let requested = backend.requested();
        assert_eq!(requested.len(), 2);
        assert_eq!(requested[0].ideal_resolution, Some((32, 24)));
        assert_eq!(requested[1].ideal_resolution, None);
        assert!(events.lock().unwrap().is_empty());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_failure_reported_after_single_retry() {
        let backend = FakeBackend::failing(DeviceErrorKind::Unknown);
        let (mut controller, events) =
            controller(&backend, AccessOrigin::Local, CameraArgs::default());

        assert!(!controller.start_camera(false, false).await);
        assert_eq!(backend.requested().len(), 2);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::CameraError);
        assert_eq!(events[0].remediation, Some(Remediation::RetryBasic));
    }

    #[tokio::test]
    async fn test_permission_denied_is_not_retried() {
        let backend = FakeBackend::failing(DeviceErrorKind::PermissionDenied);
        let (mut controller, events) =
            controller(&backend, AccessOrigin::Local, CameraArgs::default());

        assert!(!controller.start_camera(false, false).await);
        assert_eq!(backend.requested().len(), 1);
        assert!(controller.stream().is_none());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::CameraError);
        assert_eq!(events[0].remediation, Some(Remediation::PermissionHelp));
    }

    #[tokio::test]
    async fn test_basic_request_is_not_retried() {
        let backend = FakeBackend::failing(DeviceErrorKind::DeviceUnsupported);
        let (mut controller, events) =
            controller(&backend, AccessOrigin::Local, CameraArgs::default());

        assert!(!controller.start_camera(true, false).await);
        let requested = backend.requested();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].ideal_resolution, None);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_capture_fills_known_slot() {
        let backend = FakeBackend::default();
        let (mut controller, events) =
            controller(&backend, AccessOrigin::Local, CameraArgs::default());

        assert!(controller.start_camera(false, false).await);
        assert!(controller.capture(Slot::Known).await);
        assert_eq!(controller.step(), Step::AwaitingNew);
        assert_eq!(events.lock().unwrap()[0].kind, EventKind::Captured);
        controller.shutdown().await;
        assert_eq!(FakeBackend::count(&backend.stops), 1);
    }
}
