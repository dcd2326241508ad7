//! [`VisionEngine`] – the composition root.
//!
//! Wires one capture session, one inference pipeline, the photo
//! sub-pipeline and the result publisher together from injected
//! collaborators (capture device, classifier, clock, feedback sink).  The
//! presentation layer holds a `VisionEngine` and reads everything else
//! through [`VisionEngine::subscribe`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use iris_hal::{SimCaptureDevice, SimClassifier};
//! use iris_runtime::VisionEngine;
//!
//! # async fn run() {
//! let device = SimCaptureDevice::builder().frame_rate(30).build();
//! let engine = VisionEngine::builder(Arc::new(device), Arc::new(SimClassifier::demo())).build();
//!
//! engine.request_authorization().await;
//! let mut results = engine.subscribe();
//! while let Some(observation) = results.changed_classification().await {
//!     println!("{} ({:.0}%)", observation.label(), observation.confidence() * 100.0);
//! }
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use iris_hal::{CaptureDevice, Classifier, Clock, SystemClock};
use iris_kernel::{CaptureSession, SessionConfig};
use iris_middleware::{ResultPublisher, ResultSubscriber};
use iris_types::{
    AuthorizationState, ConfigError, DeviceError, PhotoError, SessionState,
};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::PipelineConfig;
use crate::feedback::{FeedbackKind, FeedbackSink, NoopFeedback};
use crate::instrumentation::{Instrumentation, spawn_metrics_ticker};
use crate::photo::{PhotoCapture, PhotoState, PhotoTicket};
use crate::pipeline::InferencePipeline;

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct VisionEngineBuilder {
    device: Arc<dyn CaptureDevice>,
    classifier: Arc<dyn Classifier>,
    clock: Arc<dyn Clock>,
    feedback: Arc<dyn FeedbackSink>,
    pipeline_config: PipelineConfig,
    session_config: SessionConfig,
}

impl VisionEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn feedback(mut self, feedback: Arc<dyn FeedbackSink>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn build(self) -> VisionEngine {
        let publisher = ResultPublisher::new();
        let instrumentation = Arc::new(Instrumentation::new());
        let pipeline = Arc::new(InferencePipeline::new(
            self.classifier,
            publisher.clone(),
            Arc::clone(&self.feedback),
            Arc::clone(&self.clock),
            Arc::clone(&instrumentation),
            self.pipeline_config.clone(),
        ));
        let session = Arc::new(CaptureSession::new(
            self.device,
            pipeline.clone(),
            self.session_config,
        ));
        let photos = PhotoCapture::new(
            Arc::clone(&session),
            publisher.clone(),
            Arc::clone(&self.feedback),
            self.clock,
        );
        VisionEngine {
            session,
            pipeline,
            photos,
            publisher,
            instrumentation,
            feedback: self.feedback,
            config: self.pipeline_config,
            metrics_task: Mutex::new(None),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VisionEngine
// ─────────────────────────────────────────────────────────────────────────────

pub struct VisionEngine {
    session: Arc<CaptureSession>,
    pipeline: Arc<InferencePipeline>,
    photos: PhotoCapture,
    publisher: ResultPublisher,
    instrumentation: Arc<Instrumentation>,
    feedback: Arc<dyn FeedbackSink>,
    config: PipelineConfig,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
}

impl VisionEngine {
    /// Start building an engine around `device` and `classifier`.  Defaults:
    /// system clock, no feedback, default pipeline and session configuration.
    pub fn builder(
        device: Arc<dyn CaptureDevice>,
        classifier: Arc<dyn Classifier>,
    ) -> VisionEngineBuilder {
        VisionEngineBuilder {
            device,
            classifier,
            clock: Arc::new(SystemClock),
            feedback: Arc::new(NoopFeedback),
            pipeline_config: PipelineConfig::default(),
            session_config: SessionConfig::default(),
        }
    }

    // ── Session ──────────────────────────────────────────────────────────────

    /// See [`CaptureSession::request_authorization`].  Once the session is
    /// configured the metrics ticker runs as well.
    pub async fn request_authorization(&self) -> AuthorizationState {
        let state = self.session.request_authorization().await;
        if self.session.device_info().is_some() {
            self.start_metrics();
        }
        state
    }

    pub fn start(&self) {
        self.session.start();
    }

    pub fn stop(&self) {
        self.session.stop();
    }

    pub fn session_state(&self) -> SessionState {
        self.session.session_state()
    }

    pub fn authorization_state(&self) -> AuthorizationState {
        self.session.authorization_state()
    }

    pub fn configuration_error(&self) -> Option<ConfigError> {
        self.session.configuration_error()
    }

    /// `true` when the presentation layer should show the permission/setup
    /// screen for good.
    pub fn is_unavailable(&self) -> bool {
        self.session.is_unavailable()
    }

    pub fn session(&self) -> &Arc<CaptureSession> {
        &self.session
    }

    pub fn pipeline(&self) -> &Arc<InferencePipeline> {
        &self.pipeline
    }

    // ── Torch ────────────────────────────────────────────────────────────────

    /// See [`CaptureSession::set_torch`].  A successful change fires
    /// [`FeedbackKind::TorchToggled`].
    pub fn set_torch(&self, on: bool) -> Result<(), DeviceError> {
        self.session.set_torch(on)?;
        self.feedback.emit(FeedbackKind::TorchToggled { on });
        Ok(())
    }

    pub fn toggle_torch(&self) -> Result<bool, DeviceError> {
        let on = self.session.toggle_torch()?;
        self.feedback.emit(FeedbackKind::TorchToggled { on });
        Ok(on)
    }

    pub fn torch_on(&self) -> bool {
        self.session.torch_on()
    }

    // ── Photos ───────────────────────────────────────────────────────────────

    /// See [`PhotoCapture::capture_photo`].
    pub fn capture_photo(&self) -> Result<PhotoTicket, PhotoError> {
        self.photos.capture_photo()
    }

    pub fn photo_state(&self) -> PhotoState {
        self.photos.state()
    }

    // ── Results & metrics ────────────────────────────────────────────────────

    pub fn subscribe(&self) -> ResultSubscriber {
        self.publisher.subscribe()
    }

    pub fn publisher(&self) -> &ResultPublisher {
        &self.publisher
    }

    /// Start the periodic metrics ticker.  Idempotent, and already done by
    /// [`VisionEngine::request_authorization`] after a successful
    /// configuration.  Must be called from within a Tokio runtime.
    pub fn start_metrics(&self) {
        let mut task = self
            .metrics_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let window = self.config.metrics_interval();
        info!(window_ms = window.as_millis() as u64, "metrics ticker started");
        *task = Some(spawn_metrics_ticker(
            Arc::clone(&self.instrumentation),
            self.publisher.clone(),
            window,
        ));
    }

    /// Close the current metrics window now and publish it, as if a tick had
    /// fired.
    #[cfg(test)]
    fn sample_metrics_now(&self) -> iris_types::PerformanceSample {
        let sample = self.instrumentation.sample(self.config.metrics_interval());
        self.publisher.publish_metrics(sample);
        sample
    }
}

impl Drop for VisionEngine {
    fn drop(&mut self) {
        if let Some(task) = self
            .metrics_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.session.stop();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
