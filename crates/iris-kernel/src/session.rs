//! [`CaptureSession`] – the capture session controller.
//!
//! Owns the device lifecycle:
//!
//! 1. **Authorize** – [`CaptureSession::request_authorization`] asks the
//!    platform (prompting only when undetermined).  The first grant triggers
//!    the one-time configuration and, with [`SessionConfig::auto_start`],
//!    starts streaming.
//! 2. **Configure** – [`CaptureSession::configure`] selects the camera and
//!    wires input, video output and photo output inside one begin/commit
//!    transaction.  Any rejected step rolls the whole transaction back and the
//!    failure is terminal for the session.
//! 3. **Run** – [`CaptureSession::start`] and [`CaptureSession::stop`] are
//!    idempotent.  The state change is applied on the caller's thread and the
//!    [`FrameSink`] is told immediately.  The hardware call is queued on a
//!    dedicated session thread, so callers never block on the camera and
//!    overlapping start/stop calls reach the hardware in the order their
//!    state changes were made.
//!
//! Torch changes take the [`DeviceLock`] without waiting and fail with
//! [`DeviceError::ConfigurationLocked`] while the device is being
//! reconfigured or a still capture is outstanding.  Torch changes do not
//! touch the frame path, so frame delivery continues while the torch toggles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use iris_hal::{CaptureDevice, DeviceInfo, FrameSink, PixelFormat};
use iris_types::{AuthorizationState, CameraPosition, ConfigError, DeviceError, SessionState};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::authorization::AuthorizationGate;
use crate::device_lock::DeviceLock;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Static choices applied during the one-time configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub camera_position: CameraPosition,
    /// Pixel format requested for the live stream.
    pub pixel_format: PixelFormat,
    /// Start streaming as soon as the first grant has configured the session.
    pub auto_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_position: CameraPosition::Back,
            pixel_format: PixelFormat::Bgra8,
            auto_start: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

enum Configuration {
    Unconfigured,
    Configured(DeviceInfo),
    Failed(ConfigError),
}

struct SessionInner {
    state: SessionState,
    authorization: AuthorizationGate,
    configuration: Configuration,
    /// `start()` arrived while configuring.
    pending_start: bool,
    /// Bumped on every Running/Stopped transition.
    transitions: u64,
}

fn lock_inner(inner: &Mutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// Session queue
// ─────────────────────────────────────────────────────────────────────────────

enum QueueCommand {
    /// Start streaming; `transition` identifies the state change that asked.
    Start { transition: u64 },
    Stop,
    Flush(mpsc::SyncSender<()>),
}

/// Serial worker that performs the blocking hardware start/stop calls.
struct SessionQueue {
    tx: Option<mpsc::Sender<QueueCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl SessionQueue {
    fn spawn(
        device: Arc<dyn CaptureDevice>,
        sink: Arc<dyn FrameSink>,
        inner: Arc<Mutex<SessionInner>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("iris-session".to_string())
            .spawn(move || run_queue(rx, device, sink, inner));
        match worker {
            Ok(handle) => Self {
                tx: Some(tx),
                worker: Some(handle),
            },
            Err(e) => {
                error!(error = %e, "failed to spawn session queue; hardware start/stop disabled");
                Self {
                    tx: None,
                    worker: None,
                }
            }
        }
    }

    fn send(&self, command: QueueCommand) {
        let sent = self.tx.as_ref().is_some_and(|tx| tx.send(command).is_ok());
        if !sent {
            warn!("session queue unavailable; hardware command dropped");
        }
    }
}

impl Drop for SessionQueue {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn run_queue(
    rx: mpsc::Receiver<QueueCommand>,
    device: Arc<dyn CaptureDevice>,
    sink: Arc<dyn FrameSink>,
    inner: Arc<Mutex<SessionInner>>,
) {
    for command in rx {
        match command {
            QueueCommand::Start { transition } => {
                match device.start_streaming(Arc::clone(&sink)) {
                    Ok(()) => info!("frame delivery started"),
                    Err(e) => {
                        error!(error = %e, "failed to start frame delivery");
                        // Roll back only if nothing changed the state since.
                        let mut inner = lock_inner(&inner);
                        if inner.state == SessionState::Running && inner.transitions == transition {
                            inner.state = SessionState::Stopped;
                            inner.transitions += 1;
                            sink.stream_stopped();
                        }
                    }
                }
            }
            QueueCommand::Stop => {
                device.stop_streaming();
                info!("frame delivery stopped");
            }
            QueueCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("session queue exiting");
}

// ─────────────────────────────────────────────────────────────────────────────
// CaptureSession
// ─────────────────────────────────────────────────────────────────────────────

/// Capture session controller.
///
/// Frames flow from the device straight into the [`FrameSink`] supplied at
/// construction.  The controller only gates when that flow exists.
pub struct CaptureSession {
    device: Arc<dyn CaptureDevice>,
    sink: Arc<dyn FrameSink>,
    config: SessionConfig,
    inner: Arc<Mutex<SessionInner>>,
    lock: DeviceLock,
    torch_on: AtomicBool,
    queue: SessionQueue,
}

impl CaptureSession {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        sink: Arc<dyn FrameSink>,
        config: SessionConfig,
    ) -> Self {
        let inner = Arc::new(Mutex::new(SessionInner {
            state: SessionState::Idle,
            authorization: AuthorizationGate::new(),
            configuration: Configuration::Unconfigured,
            pending_start: false,
            transitions: 0,
        }));
        let queue = SessionQueue::spawn(Arc::clone(&device), Arc::clone(&sink), Arc::clone(&inner));
        Self {
            device,
            sink,
            config,
            inner,
            lock: DeviceLock::new(),
            torch_on: AtomicBool::new(false),
            queue,
        }
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        lock_inner(&self.inner)
    }

    // ── Observation ──────────────────────────────────────────────────────────

    pub fn session_state(&self) -> SessionState {
        self.inner().state
    }

    pub fn authorization_state(&self) -> AuthorizationState {
        self.inner().authorization.state()
    }

    /// The failure that ended configuration, if it failed.
    pub fn configuration_error(&self) -> Option<ConfigError> {
        match &self.inner().configuration {
            Configuration::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// `true` once the session can never run: access was refused or the
    /// one-time configuration failed.
    pub fn is_unavailable(&self) -> bool {
        let inner = self.inner();
        let refused = matches!(
            inner.authorization.state(),
            AuthorizationState::Denied | AuthorizationState::Restricted
        );
        refused || matches!(inner.configuration, Configuration::Failed(_))
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        match &self.inner().configuration {
            Configuration::Configured(info) => Some(info.clone()),
            _ => None,
        }
    }

    pub fn device(&self) -> &Arc<dyn CaptureDevice> {
        &self.device
    }

    pub fn device_lock(&self) -> &DeviceLock {
        &self.lock
    }

    pub fn torch_on(&self) -> bool {
        self.torch_on.load(Ordering::Acquire)
    }

    // ── Authorization & configuration ────────────────────────────────────────

    /// Resolve camera permission, prompting only when undetermined.
    ///
    /// On the first grant the session is configured (and started when
    /// [`SessionConfig::auto_start`] is set).  Configuration failures are
    /// recorded and available from [`CaptureSession::configuration_error`].
    pub async fn request_authorization(&self) -> AuthorizationState {
        let reported = match self.device.authorization_status() {
            AuthorizationState::Undetermined => {
                info!("requesting camera access");
                let granted = self.device.request_access().await.unwrap_or(false);
                if granted {
                    AuthorizationState::Authorized
                } else {
                    AuthorizationState::Denied
                }
            }
            settled => settled,
        };

        let (state, first_grant) = {
            let mut inner = self.inner();
            let state = inner.authorization.resolve(reported);
            let first_grant = state == AuthorizationState::Authorized
                && inner.state == SessionState::Idle
                && matches!(inner.configuration, Configuration::Unconfigured);
            (state, first_grant)
        };

        match state {
            AuthorizationState::Denied | AuthorizationState::Restricted => {
                warn!(?state, "camera access unavailable; capture pipeline disabled");
            }
            _ if first_grant => {
                let _ = self.configure_then(self.config.auto_start);
            }
            _ => {}
        }
        state
    }

    /// Wire the camera into the session.  Runs at most once per session.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotAuthorized`] without a grant.
    /// - [`ConfigError::AlreadyConfigured`] on every call after the first
    ///   attempt, successful or not.
    /// - Any wiring failure reported by the device.  The transaction is
    ///   rolled back, the session stays `Idle`, and the error is kept.
    pub fn configure(&self) -> Result<(), ConfigError> {
        self.configure_then(false)
    }

    /// Configure, then run if `start` is set or a start arrived meanwhile.
    /// A `stop()` during configuration cancels either.
    fn configure_then(&self, start: bool) -> Result<(), ConfigError> {
        let device_lock = {
            let mut inner = self.inner();
            inner.authorization.check()?;
            if inner.state != SessionState::Idle
                || !matches!(inner.configuration, Configuration::Unconfigured)
            {
                return Err(ConfigError::AlreadyConfigured);
            }
            inner.state = SessionState::Configuring;
            inner.pending_start = start;
            self.lock.try_acquire("configure")
        };
        info!(position = ?self.config.camera_position, "configuring capture session");

        let outcome = match &device_lock {
            Ok(_) => self.wire(),
            Err(e) => Err(ConfigError::DeviceBusy(e.to_string())),
        };

        // The device stays locked until the outcome is recorded.
        let mut inner = self.inner();
        match outcome {
            Ok(info) => {
                info!(device = %info.id, torch = info.has_torch, "capture session configured");
                inner.configuration = Configuration::Configured(info);
                inner.state = SessionState::Stopped;
                if std::mem::take(&mut inner.pending_start) {
                    self.begin_running(&mut inner);
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "capture session configuration failed");
                inner.configuration = Configuration::Failed(e.clone());
                inner.state = SessionState::Idle;
                inner.pending_start = false;
                Err(e)
            }
        }
    }

    /// One begin/commit transaction; rolled back on any failure.
    fn wire(&self) -> Result<DeviceInfo, ConfigError> {
        self.device.begin_configuration();
        let wired = self.wire_steps();
        if wired.is_err() {
            self.device.rollback_configuration();
        }
        wired
    }

    fn wire_steps(&self) -> Result<DeviceInfo, ConfigError> {
        let format = self.config.pixel_format;
        let info = self.device.select_device(self.config.camera_position)?;
        if !info.supports(format) {
            return Err(ConfigError::UnsupportedFormat(format!(
                "{format:?} is not offered by {}",
                info.id
            )));
        }
        self.device.add_input(&info)?;
        self.device.add_video_output(format)?;
        self.device.add_photo_output()?;
        self.device.commit_configuration()?;
        Ok(info)
    }

    // ── Start / stop ─────────────────────────────────────────────────────────

    /// Begin frame delivery.  No-op when already running or when the session
    /// has no pipeline.  Never blocks on the hardware.
    pub fn start(&self) {
        let mut inner = self.inner();
        match inner.state {
            SessionState::Stopped => self.begin_running(&mut inner),
            SessionState::Configuring => {
                debug!("start deferred until configuration completes");
                inner.pending_start = true;
            }
            SessionState::Running => debug!("start ignored: already running"),
            SessionState::Idle => debug!("start ignored: session is not configured"),
        }
    }

    fn begin_running(&self, inner: &mut SessionInner) {
        inner.state = SessionState::Running;
        inner.transitions += 1;
        self.sink.stream_started();
        self.queue.send(QueueCommand::Start {
            transition: inner.transitions,
        });
        info!("capture session running");
    }

    /// Halt frame delivery.  No-op unless running.  Results of an inference
    /// still in flight are discarded by the sink.
    pub fn stop(&self) {
        let mut inner = self.inner();
        match inner.state {
            SessionState::Running => {
                inner.state = SessionState::Stopped;
                inner.transitions += 1;
                self.sink.stream_stopped();
                self.queue.send(QueueCommand::Stop);
                info!("capture session stopped");
            }
            SessionState::Configuring => inner.pending_start = false,
            SessionState::Idle | SessionState::Stopped => debug!("stop ignored: not running"),
        }
    }

    /// Block until every start/stop queued so far has reached the hardware.
    pub fn flush(&self) {
        let (tx, rx) = mpsc::sync_channel(1);
        self.queue.send(QueueCommand::Flush(tx));
        let _ = rx.recv();
    }

    // ── Torch ────────────────────────────────────────────────────────────────

    /// Switch the torch.  Success is reflected by [`CaptureSession::torch_on`]
    /// immediately.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::ConfigurationLocked`] while the device is held by
    ///   configuration or a still capture.
    /// - [`DeviceError::NotConfigured`] before configuration.
    /// - [`DeviceError::NoTorch`] when the camera has no torch.
    /// - Any failure reported by the device.
    pub fn set_torch(&self, on: bool) -> Result<(), DeviceError> {
        let result = self.apply_torch(on);
        match &result {
            Ok(()) => info!(on, "torch updated"),
            Err(e) => warn!(on, error = %e, "torch change failed"),
        }
        result
    }

    /// Flip the torch and return its new state.
    pub fn toggle_torch(&self) -> Result<bool, DeviceError> {
        let next = !self.torch_on();
        self.set_torch(next)?;
        Ok(next)
    }

    fn apply_torch(&self, on: bool) -> Result<(), DeviceError> {
        let _guard = self.lock.try_acquire("torch")?;
        match &self.inner().configuration {
            Configuration::Configured(info) => info.torch()?,
            _ => return Err(DeviceError::NotConfigured),
        }
        self.device.set_torch(on)?;
        self.torch_on.store(on, Ordering::Release);
        Ok(())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
