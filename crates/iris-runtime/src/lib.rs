//! `iris-runtime` – the live classification pipeline.
//!
//! Turns the camera's frame stream into published classifications, metrics
//! and photos.
//!
//! # Modules
//!
//! - [`engine`] – [`VisionEngine`][engine::VisionEngine]: the composition
//!   root.  Builds the session, pipeline, photo sub-pipeline and publisher
//!   from injected collaborators.
//! - [`pipeline`] – [`InferencePipeline`][pipeline::InferencePipeline]:
//!   drop-if-busy inference on a dedicated worker thread, sequence-ordered
//!   publishing, and cancellation on stop.
//! - [`instrumentation`] – [`Instrumentation`][instrumentation::Instrumentation]:
//!   arrival, drop and latency counters plus the periodic metrics ticker.
//! - [`feedback`] – [`FeedbackSink`][feedback::FeedbackSink] cues and the
//!   once-per-label-change [`ObservationFeedbackGate`][feedback::ObservationFeedbackGate].
//! - [`photo`] – [`PhotoCapture`][photo::PhotoCapture]: single-flight still
//!   capture tagged with the label current at request time.
//! - [`config`] – [`PipelineConfig`][config::PipelineConfig].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console and
//!   optional OTLP span export.

pub mod config;
pub mod engine;
pub mod feedback;
pub mod instrumentation;
pub mod photo;
pub mod pipeline;
pub mod telemetry;

pub use config::PipelineConfig;
pub use engine::{VisionEngine, VisionEngineBuilder};
pub use feedback::{FeedbackKind, FeedbackSink, NoopFeedback, ObservationFeedbackGate};
pub use instrumentation::{Instrumentation, spawn_metrics_ticker};
pub use photo::{PhotoCapture, PhotoState, PhotoTicket};
pub use pipeline::InferencePipeline;
pub use telemetry::{TracerProviderGuard, init_tracing};

// Session types callers need to configure the engine.
pub use iris_kernel::SessionConfig;
