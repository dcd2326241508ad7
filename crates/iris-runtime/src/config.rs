//! [`PipelineConfig`] – tuning knobs for the inference pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration bundle for [`InferencePipeline`](crate::pipeline::InferencePipeline)
/// and the metrics ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ranked alternatives kept per result, the top entry included.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Confidence a new label must exceed to fire the observation cue.
    #[serde(default = "default_feedback_threshold")]
    pub feedback_threshold: f32,
    /// Length of one metrics sampling window.
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    /// Crop frames to a centred square before classification.
    #[serde(default = "default_center_crop")]
    pub center_crop: bool,
    /// Inferences slower than this are logged at `warn`.  Never cancelled.
    #[serde(default = "default_slow_inference_warn_ms")]
    pub slow_inference_warn_ms: u64,
}

fn default_top_k() -> usize {
    5
}

fn default_feedback_threshold() -> f32 {
    0.85
}

fn default_metrics_interval_ms() -> u64 {
    1000
}

fn default_center_crop() -> bool {
    true
}

fn default_slow_inference_warn_ms() -> u64 {
    500
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            feedback_threshold: default_feedback_threshold(),
            metrics_interval_ms: default_metrics_interval_ms(),
            center_crop: default_center_crop(),
            slow_inference_warn_ms: default_slow_inference_warn_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }

    /// `top_k`, but never less than one.
    pub fn kept_alternatives(&self) -> usize {
        self.top_k.max(1)
    }
}
