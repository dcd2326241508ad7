use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Camera permission as reported by the platform.
///
/// The platform sets it once per process run.  The only transition is out of
/// [`AuthorizationState::Undetermined`]; every other state is terminal for the
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthorizationState {
    #[default]
    Undetermined,
    Authorized,
    Denied,
    Restricted,
}

impl AuthorizationState {
    /// `true` when no further transition is possible.
    pub fn is_terminal(self) -> bool {
        !matches!(self, AuthorizationState::Undetermined)
    }

    /// Return whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: AuthorizationState) -> bool {
        self == AuthorizationState::Undetermined && next != AuthorizationState::Undetermined
    }
}

/// Lifecycle of the capture session.
///
/// `Idle → Configuring` happens at most once; afterwards the session toggles
/// between `Running` and `Stopped` and never re-enters `Configuring`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Configuring,
    Running,
    Stopped,
}

/// Which physical camera to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    #[default]
    Back,
    Front,
}

/// One `(label, confidence)` entry of a classifier's ranked output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Outcome of one completed inference, reduced from the engine's ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Sequence number of the frame that produced this result.  Strictly
    /// increasing in publish order.
    pub sequence: u64,
    /// Top-ranked label.
    pub label: String,
    /// Confidence of the top-ranked label, in `[0, 1]`.
    pub confidence: f32,
    /// Up to `top_k` entries in the engine's native order (the top entry
    /// included).
    pub ranked_alternatives: Vec<Prediction>,
    /// Wall time spent inside the classifier, in milliseconds.
    pub inference_latency_ms: f64,
    pub produced_at: DateTime<Utc>,
}

/// Throughput and latency snapshot, recomputed once per sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Frames that arrived from the camera during the last window, per second.
    pub frames_per_second: f64,
    /// Latency of the most recent inference at sampling time.
    pub last_inference_latency_ms: f64,
    /// Frames discarded by backpressure during the last window.
    pub frames_dropped: u64,
}

/// A still photo together with the classification current when it was
/// requested.  Only ever constructed fully populated.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedPhoto {
    pub id: Uuid,
    /// Encoded image as returned by the capture device.
    pub image_bytes: Vec<u8>,
    /// Empty when nothing had been classified yet.
    pub associated_label: String,
    pub associated_confidence: f32,
    pub captured_at: DateTime<Utc>,
}

impl fmt::Debug for CapturedPhoto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedPhoto")
            .field("id", &self.id)
            .field("image_bytes", &format_args!("<{} bytes>", self.image_bytes.len()))
            .field("associated_label", &self.associated_label)
            .field("associated_confidence", &self.associated_confidence)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Step of the one-time session wiring that rejected the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WiringStage {
    Input,
    VideoOutput,
    PhotoOutput,
    Commit,
}

impl fmt::Display for WiringStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WiringStage::Input => "input",
            WiringStage::VideoOutput => "video output",
            WiringStage::PhotoOutput => "photo output",
            WiringStage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Fatal-to-session failures.  A session that hits one of these never reaches
/// [`SessionState::Running`] and is not retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("Camera access not authorized: {0:?}")]
    NotAuthorized(AuthorizationState),

    #[error("Capture session has already been configured")]
    AlreadyConfigured,

    #[error("No capture device available at the {0:?} position")]
    NoDevice(CameraPosition),

    #[error("Capture device busy: {0}")]
    DeviceBusy(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Session rejected {stage} wiring: {details}")]
    WiringRejected { stage: WiringStage, details: String },
}

/// Recoverable device-level failures (torch, still capture, streaming).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceError {
    #[error("Capture device has no torch")]
    NoTorch,

    #[error("Exclusive device configuration is held by {holder}")]
    ConfigurationLocked { holder: String },

    #[error("Capture session is not configured")]
    NotConfigured,

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },
}

/// Failures reported by the classifier engine for a single frame.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierError {
    #[error("Classifier rejected the input buffer: {0}")]
    InvalidInput(String),

    #[error("Classifier engine failure: {0}")]
    Engine(String),
}

/// Reasons a still-capture request is rejected up front.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhotoError {
    #[error("Photo capture requires a running session (state: {0:?})")]
    SessionNotRunning(SessionState),

    #[error("A photo capture is already in progress")]
    CaptureInProgress,

    #[error(transparent)]
    Device(#[from] DeviceError),
}
