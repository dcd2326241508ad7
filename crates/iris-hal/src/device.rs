//! [`CaptureDevice`] – capability interface over the platform camera stack.
//!
//! The controller in `iris-kernel` drives a device through this trait and
//! never assumes a capability it has not queried: torch support and pixel
//! formats come back as data on [`DeviceInfo`].

use std::fmt;
use std::sync::Arc;

use iris_types::{AuthorizationState, CameraPosition, ConfigError, DeviceError};
use tokio::sync::oneshot;

use crate::frame::{FrameBuffer, PixelFormat};

/// Capabilities of the physical camera chosen by
/// [`CaptureDevice::select_device`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub position: CameraPosition,
    pub has_torch: bool,
    pub formats: Vec<PixelFormat>,
}

impl DeviceInfo {
    pub fn supports(&self, format: PixelFormat) -> bool {
        self.formats.contains(&format)
    }

    /// `Ok(())` when the device has a torch, [`DeviceError::NoTorch`]
    /// otherwise.
    pub fn torch(&self) -> Result<(), DeviceError> {
        if self.has_torch {
            Ok(())
        } else {
            Err(DeviceError::NoTorch)
        }
    }
}

/// Per-request options for a still capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StillSettings {
    /// Fire the flash for this single exposure.
    pub flash: bool,
}

/// Receiver of the live frame stream.
///
/// The device calls [`FrameSink::on_frame`] on its own capture context, one
/// frame at a time and never concurrently.  The frame is only valid for the
/// duration of the call.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &FrameBuffer<'_>);

    /// Called by the session controller right before frame delivery is
    /// requested from the hardware.
    fn stream_started(&self) {}

    /// Called by the session controller as soon as the session leaves
    /// `Running`, before the hardware has actually stopped.
    fn stream_stopped(&self) {}
}

type StillCallback = Box<dyn FnOnce(Result<Vec<u8>, DeviceError>) + Send>;

/// Single-fire completion handle for one still capture.
///
/// [`StillCompletion::complete`] consumes the handle, so a device cannot
/// report twice.  Dropping an uncompleted handle reports a
/// [`DeviceError::HardwareFault`], so the requester always hears back exactly
/// once.
pub struct StillCompletion {
    callback: Option<StillCallback>,
}

impl StillCompletion {
    pub fn new(callback: impl FnOnce(Result<Vec<u8>, DeviceError>) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Deliver the encoded image (or the failure) to the requester.
    pub fn complete(mut self, outcome: Result<Vec<u8>, DeviceError>) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

impl Drop for StillCompletion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(DeviceError::HardwareFault {
                component: "still_capture".to_string(),
                details: "device dropped the request without completing it".to_string(),
            }));
        }
    }
}

impl fmt::Debug for StillCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StillCompletion")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// A camera plus the platform session that owns it.
///
/// Configuration calls mirror a begin/commit transaction: the controller
/// calls [`begin_configuration`](CaptureDevice::begin_configuration), the
/// wiring steps, and then either
/// [`commit_configuration`](CaptureDevice::commit_configuration) or
/// [`rollback_configuration`](CaptureDevice::rollback_configuration).
pub trait CaptureDevice: Send + Sync {
    /// Current platform permission, without prompting.
    fn authorization_status(&self) -> AuthorizationState;

    /// Prompt the user for camera access.  Resolves to `true` when granted.
    /// A dropped sender counts as a denial.
    fn request_access(&self) -> oneshot::Receiver<bool>;

    /// Pick the camera at `position` and report its capabilities.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoDevice`] or [`ConfigError::DeviceBusy`].
    fn select_device(&self, position: CameraPosition) -> Result<DeviceInfo, ConfigError>;

    fn begin_configuration(&self);

    fn add_input(&self, device: &DeviceInfo) -> Result<(), ConfigError>;

    fn add_video_output(&self, format: PixelFormat) -> Result<(), ConfigError>;

    fn add_photo_output(&self) -> Result<(), ConfigError>;

    fn commit_configuration(&self) -> Result<(), ConfigError>;

    /// Undo every wiring step since `begin_configuration`.
    fn rollback_configuration(&self);

    /// Begin delivering frames to `sink` on the device's capture context.
    /// May block while the hardware spins up.
    fn start_streaming(&self, sink: Arc<dyn FrameSink>) -> Result<(), DeviceError>;

    /// Halt frame delivery and release the sink.
    fn stop_streaming(&self);

    /// Switch the continuous torch.  The caller holds exclusive device
    /// configuration while this runs.
    fn set_torch(&self, on: bool) -> Result<(), DeviceError>;

    /// Issue a one-shot high-resolution capture.  Returns immediately; the
    /// result is reported through `completion`, possibly from another thread.
    fn capture_still(&self, settings: StillSettings, completion: StillCompletion);
}
