//! In-process simulated drivers for CI and demos without camera hardware.
//!
//! [`SimCaptureDevice`] implements [`CaptureDevice`] with scriptable
//! authorization, torch support and wiring faults, and synthesises BGRA
//! frames either on demand ([`SimCaptureDevice::emit_frame`]) or at a fixed
//! rate on its own capture thread.  [`SimClassifier`] replays a scripted list
//! of ranked outputs.
//!
//! # Example
//!
//! ```rust
//! use iris_hal::sim::SimCaptureDevice;
//! use iris_hal::CaptureDevice;
//! use iris_types::AuthorizationState;
//!
//! let device = SimCaptureDevice::builder()
//!     .authorization(AuthorizationState::Authorized)
//!     .without_torch()
//!     .build();
//!
//! assert_eq!(device.authorization_status(), AuthorizationState::Authorized);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use iris_types::{
    AuthorizationState, CameraPosition, ClassifierError, ConfigError, DeviceError, Prediction,
    WiringStage,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::classifier::Classifier;
use crate::device::{CaptureDevice, DeviceInfo, FrameSink, StillCompletion, StillSettings};
use crate::frame::{FrameBuffer, ImageInput, PixelFormat};

// ────────────────────────────────────────────────────────────────────────────
// Call log
// ────────────────────────────────────────────────────────────────────────────

/// Every hardware-facing call the simulated device received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    RequestAccess,
    SelectDevice(CameraPosition),
    BeginConfiguration,
    AddInput,
    AddVideoOutput(PixelFormat),
    AddPhotoOutput,
    Commit,
    Rollback,
    StartStreaming,
    StopStreaming,
    SetTorch(bool),
    CaptureStill(StillSettings),
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated capture device
// ────────────────────────────────────────────────────────────────────────────

struct SimState {
    authorization: Mutex<AuthorizationState>,
    grant_on_request: bool,
    has_device: bool,
    has_torch: bool,
    fail_stage: Option<WiringStage>,
    hold_stage: Option<WiringStage>,
    hold: Mutex<HoldPhase>,
    hold_changed: Condvar,
    frame_rate: Option<u32>,
    width: u32,
    height: u32,
    auto_complete_stills: bool,
    configured: AtomicBool,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    stream_generation: AtomicU64,
    frames_emitted: AtomicU64,
    torch_on: AtomicBool,
    pending_still: Mutex<Option<StillCompletion>>,
    calls: Mutex<Vec<SimCall>>,
}

impl SimState {
    fn record(&self, call: SimCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn reject_at(&self, stage: WiringStage) -> Result<(), ConfigError> {
        if self.hold_stage == Some(stage) {
            self.pause_wiring();
        }
        if self.fail_stage == Some(stage) {
            return Err(ConfigError::WiringRejected {
                stage,
                details: "simulated rejection".to_string(),
            });
        }
        Ok(())
    }

    /// Park the configuring thread until the test calls
    /// [`SimCaptureDevice::release_hold`].
    fn pause_wiring(&self) {
        let mut phase = self.hold.lock().unwrap_or_else(PoisonError::into_inner);
        phase.reached = true;
        self.hold_changed.notify_all();
        while !phase.released {
            phase = self
                .hold_changed
                .wait(phase)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Push one synthetic frame into the current sink.
    fn emit_frame(&self) -> bool {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sink) = sink else {
            return false;
        };

        let n = self.frames_emitted.fetch_add(1, Ordering::Relaxed);
        let data = synthesize_bgra(self.width, self.height, n);
        let stride = self.width as usize * PixelFormat::Bgra8.bytes_per_pixel();
        match FrameBuffer::new(self.width, self.height, stride, PixelFormat::Bgra8, &data) {
            Ok(frame) => {
                sink.on_frame(&frame);
                true
            }
            Err(e) => {
                warn!(error = %e, "sim device produced an invalid frame");
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct HoldPhase {
    reached: bool,
    released: bool,
}

/// Diagonal gradient that shifts by one step per frame.
fn synthesize_bgra(width: u32, height: u32, n: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let v = ((x + y) as u64 + n) as u8;
            data.extend_from_slice(&[v, v.wrapping_mul(3), v.wrapping_mul(7), 0xFF]);
        }
    }
    data
}

/// Minimal JPEG-framed payload standing in for an encoded still.
fn synthesize_still(settings: StillSettings) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8];
    bytes.extend(std::iter::repeat_n(if settings.flash { 0xF0 } else { 0x10 }, 60));
    bytes.extend_from_slice(&[0xFF, 0xD9]);
    bytes
}

/// Scriptable stand-in for a real camera.  Clones share the same device.
#[derive(Clone)]
pub struct SimCaptureDevice {
    state: Arc<SimState>,
}

impl SimCaptureDevice {
    pub fn builder() -> SimCaptureDeviceBuilder {
        SimCaptureDeviceBuilder::default()
    }

    /// Deliver one synthetic frame on the caller's thread.  Returns `false`
    /// when the device is not streaming.
    pub fn emit_frame(&self) -> bool {
        self.state.emit_frame()
    }

    /// Deliver `count` frames back to back; returns how many were delivered.
    pub fn emit_frames(&self, count: usize) -> usize {
        (0..count).filter(|_| self.emit_frame()).count()
    }

    /// Complete the outstanding still request, if any.
    pub fn complete_pending_still(&self, outcome: Result<Vec<u8>, DeviceError>) -> bool {
        let pending = self
            .state
            .pending_still
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(completion) => {
                completion.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Wait until configuration reaches the stage set with
    /// [`SimCaptureDeviceBuilder::hold_at`].  Returns `false` on timeout.
    pub fn wait_for_hold(&self, timeout: Duration) -> bool {
        let phase = self.state.hold.lock().unwrap_or_else(PoisonError::into_inner);
        let (phase, _) = self
            .state
            .hold_changed
            .wait_timeout_while(phase, timeout, |p| !p.reached)
            .unwrap_or_else(PoisonError::into_inner);
        phase.reached
    }

    /// Let a held configuration continue.  Later wiring passes straight
    /// through.
    pub fn release_hold(&self) {
        let mut phase = self.state.hold.lock().unwrap_or_else(PoisonError::into_inner);
        phase.released = true;
        self.state.hold_changed.notify_all();
    }

    pub fn has_pending_still(&self) -> bool {
        self.state
            .pending_still
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.state
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn is_configured(&self) -> bool {
        self.state.configured.load(Ordering::Acquire)
    }

    pub fn torch_on(&self) -> bool {
        self.state.torch_on.load(Ordering::Acquire)
    }

    pub fn frames_emitted(&self) -> u64 {
        self.state.frames_emitted.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CaptureDevice for SimCaptureDevice {
    fn authorization_status(&self) -> AuthorizationState {
        *self
            .state
            .authorization
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn request_access(&self) -> oneshot::Receiver<bool> {
        self.state.record(SimCall::RequestAccess);
        let mut auth = self
            .state
            .authorization
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *auth == AuthorizationState::Undetermined {
            *auth = if self.state.grant_on_request {
                AuthorizationState::Authorized
            } else {
                AuthorizationState::Denied
            };
        }
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(*auth == AuthorizationState::Authorized);
        rx
    }

    fn select_device(&self, position: CameraPosition) -> Result<DeviceInfo, ConfigError> {
        self.state.record(SimCall::SelectDevice(position));
        if !self.state.has_device {
            return Err(ConfigError::NoDevice(position));
        }
        let id = match position {
            CameraPosition::Back => "sim_back_wide",
            CameraPosition::Front => "sim_front",
        };
        Ok(DeviceInfo {
            id: id.to_string(),
            position,
            has_torch: self.state.has_torch,
            formats: vec![PixelFormat::Bgra8],
        })
    }

    fn begin_configuration(&self) {
        self.state.record(SimCall::BeginConfiguration);
    }

    fn add_input(&self, _device: &DeviceInfo) -> Result<(), ConfigError> {
        self.state.record(SimCall::AddInput);
        self.state.reject_at(WiringStage::Input)
    }

    fn add_video_output(&self, format: PixelFormat) -> Result<(), ConfigError> {
        self.state.record(SimCall::AddVideoOutput(format));
        self.state.reject_at(WiringStage::VideoOutput)
    }

    fn add_photo_output(&self) -> Result<(), ConfigError> {
        self.state.record(SimCall::AddPhotoOutput);
        self.state.reject_at(WiringStage::PhotoOutput)
    }

    fn commit_configuration(&self) -> Result<(), ConfigError> {
        self.state.record(SimCall::Commit);
        self.state.reject_at(WiringStage::Commit)?;
        self.state.configured.store(true, Ordering::Release);
        Ok(())
    }

    fn rollback_configuration(&self) {
        self.state.record(SimCall::Rollback);
        self.state.configured.store(false, Ordering::Release);
    }

    fn start_streaming(&self, sink: Arc<dyn FrameSink>) -> Result<(), DeviceError> {
        self.state.record(SimCall::StartStreaming);
        if !self.is_configured() {
            return Err(DeviceError::NotConfigured);
        }
        *self
            .state
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);
        let generation = self.state.stream_generation.fetch_add(1, Ordering::AcqRel) + 1;

        let Some(fps) = self.state.frame_rate.filter(|&fps| fps > 0) else {
            return Ok(());
        };
        let state = Arc::clone(&self.state);
        let interval = Duration::from_secs_f64(1.0 / f64::from(fps));
        thread::Builder::new()
            .name("iris-sim-capture".to_string())
            .spawn(move || {
                debug!(fps, "sim capture thread started");
                while state.stream_generation.load(Ordering::Acquire) == generation {
                    thread::sleep(interval);
                    if state.stream_generation.load(Ordering::Acquire) != generation {
                        break;
                    }
                    state.emit_frame();
                }
                debug!("sim capture thread exiting");
            })
            .map_err(|e| DeviceError::HardwareFault {
                component: "sim_capture".to_string(),
                details: format!("failed to spawn capture thread: {e}"),
            })?;
        Ok(())
    }

    fn stop_streaming(&self) {
        self.state.record(SimCall::StopStreaming);
        self.state.stream_generation.fetch_add(1, Ordering::AcqRel);
        self.state
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn set_torch(&self, on: bool) -> Result<(), DeviceError> {
        self.state.record(SimCall::SetTorch(on));
        if !self.state.has_torch {
            return Err(DeviceError::NoTorch);
        }
        self.state.torch_on.store(on, Ordering::Release);
        Ok(())
    }

    fn capture_still(&self, settings: StillSettings, completion: StillCompletion) {
        self.state.record(SimCall::CaptureStill(settings));
        if self.state.auto_complete_stills {
            let spawned = thread::Builder::new()
                .name("iris-sim-still".to_string())
                .spawn(move || completion.complete(Ok(synthesize_still(settings))));
            if let Err(e) = spawned {
                // The completion was dropped with the closure and already
                // reported a failure.
                warn!(error = %e, "failed to spawn sim still thread");
            }
            return;
        }
        let previous = self
            .state
            .pending_still
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(completion);
        if previous.is_some() {
            warn!("sim device replaced an outstanding still request");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for [`SimCaptureDevice`].
///
/// Defaults: authorization undetermined and granted on request, a back camera
/// with a torch, 64×48 BGRA frames emitted only on demand, and still
/// requests held until completed by the test.
pub struct SimCaptureDeviceBuilder {
    authorization: AuthorizationState,
    grant_on_request: bool,
    has_device: bool,
    has_torch: bool,
    fail_stage: Option<WiringStage>,
    hold_stage: Option<WiringStage>,
    frame_rate: Option<u32>,
    width: u32,
    height: u32,
    auto_complete_stills: bool,
}

impl Default for SimCaptureDeviceBuilder {
    fn default() -> Self {
        Self {
            authorization: AuthorizationState::Undetermined,
            grant_on_request: true,
            has_device: true,
            has_torch: true,
            fail_stage: None,
            hold_stage: None,
            frame_rate: None,
            width: 64,
            height: 48,
            auto_complete_stills: false,
        }
    }
}

impl SimCaptureDeviceBuilder {
    /// Platform permission reported before any prompt.
    pub fn authorization(mut self, state: AuthorizationState) -> Self {
        self.authorization = state;
        self
    }

    /// The user declines the permission prompt.
    pub fn deny_on_request(mut self) -> Self {
        self.grant_on_request = false;
        self
    }

    pub fn without_device(mut self) -> Self {
        self.has_device = false;
        self
    }

    pub fn without_torch(mut self) -> Self {
        self.has_torch = false;
        self
    }

    /// Reject the configuration at `stage`.
    pub fn fail_at(mut self, stage: WiringStage) -> Self {
        self.fail_stage = Some(stage);
        self
    }

    /// Block configuration when it reaches `stage` until
    /// [`SimCaptureDevice::release_hold`] is called.
    pub fn hold_at(mut self, stage: WiringStage) -> Self {
        self.hold_stage = Some(stage);
        self
    }

    /// Stream frames on a background thread at `fps` while running.
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    /// Complete still requests immediately on a background thread.
    pub fn auto_complete_stills(mut self) -> Self {
        self.auto_complete_stills = true;
        self
    }

    pub fn build(self) -> SimCaptureDevice {
        SimCaptureDevice {
            state: Arc::new(SimState {
                authorization: Mutex::new(self.authorization),
                grant_on_request: self.grant_on_request,
                has_device: self.has_device,
                has_torch: self.has_torch,
                fail_stage: self.fail_stage,
                hold_stage: self.hold_stage,
                hold: Mutex::new(HoldPhase::default()),
                hold_changed: Condvar::new(),
                frame_rate: self.frame_rate,
                width: self.width,
                height: self.height,
                auto_complete_stills: self.auto_complete_stills,
                configured: AtomicBool::new(false),
                sink: Mutex::new(None),
                stream_generation: AtomicU64::new(0),
                frames_emitted: AtomicU64::new(0),
                torch_on: AtomicBool::new(false),
                pending_still: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated classifier
// ────────────────────────────────────────────────────────────────────────────

/// Replays a script of ranked outputs, advancing one entry every
/// `repeat_each` invocations and wrapping around at the end.
pub struct SimClassifier {
    script: Vec<Vec<Prediction>>,
    repeat_each: u64,
    latency: Option<Duration>,
    invocations: AtomicU64,
}

impl SimClassifier {
    pub fn new(script: Vec<Vec<Prediction>>) -> Self {
        Self {
            script,
            repeat_each: 1,
            latency: None,
            invocations: AtomicU64::new(0),
        }
    }

    /// A short everyday-objects script used by the CLI demo.
    pub fn demo() -> Self {
        let ranked = |entries: &[(&str, f32)]| {
            entries
                .iter()
                .map(|&(label, confidence)| Prediction::new(label, confidence))
                .collect::<Vec<_>>()
        };
        Self::new(vec![
            ranked(&[
                ("coffee mug", 0.91),
                ("cup", 0.05),
                ("espresso", 0.02),
                ("teapot", 0.01),
                ("pitcher", 0.005),
                ("soup bowl", 0.003),
            ]),
            ranked(&[("laptop", 0.62), ("notebook", 0.3), ("desktop computer", 0.05)]),
            ranked(&[
                ("golden retriever", 0.88),
                ("labrador retriever", 0.07),
                ("tennis ball", 0.02),
            ]),
            ranked(&[("banana", 0.97), ("lemon", 0.01)]),
        ])
        .repeat_each(45)
    }

    pub fn repeat_each(mut self, n: u64) -> Self {
        self.repeat_each = n.max(1);
        self
    }

    /// Sleep for `latency` inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl Classifier for SimClassifier {
    fn classify(&self, image: &ImageInput) -> Result<Vec<Prediction>, ClassifierError> {
        let n = self.invocations.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        if image.pixels().is_empty() {
            return Err(ClassifierError::InvalidInput("empty image".to_string()));
        }
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let index = (n / self.repeat_each) as usize % self.script.len();
        Ok(self.script[index].clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
