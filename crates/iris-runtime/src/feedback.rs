//! User-facing feedback cues and the confident-observation gate.
//!
//! Cues (a haptic tap, a chime) are fire-and-forget side effects routed
//! through an injected [`FeedbackSink`].  The pipeline decides *when* to cue;
//! the sink decides *how*.
//!
//! # Algorithm
//!
//! [`ObservationFeedbackGate`] remembers the label of the last published
//! result.  [`ObservationFeedbackGate::observe`] fires when the new
//! confidence exceeds the threshold **and** the label differs from the
//! remembered one.  The remembered label is updated on every observation, so
//! a stream of frames showing the same object cues once, not once per frame.
//!
//! # Example
//!
//! ```rust
//! use iris_runtime::feedback::ObservationFeedbackGate;
//!
//! let mut gate = ObservationFeedbackGate::new(0.85);
//!
//! assert!(gate.observe("mug", 0.90));
//! assert!(!gate.observe("mug", 0.92)); // same label
//! assert!(gate.observe("laptop", 0.90)); // label changed
//! ```

use serde::{Deserialize, Serialize};

/// A single feedback cue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedbackKind {
    /// A new label was recognised with high confidence.
    ConfidentObservation { label: String },
    /// The torch was switched successfully.
    TorchToggled { on: bool },
    /// A still capture request was accepted.
    PhotoRequested,
}

/// Receiver of feedback cues.  Called on whichever thread produced the cue
/// and must not block.
pub trait FeedbackSink: Send + Sync {
    fn emit(&self, kind: FeedbackKind);
}

/// Discards every cue.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFeedback;

impl FeedbackSink for NoopFeedback {
    fn emit(&self, _kind: FeedbackKind) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// ObservationFeedbackGate
// ─────────────────────────────────────────────────────────────────────────────

/// Rate-limits the confident-observation cue to one per label change.
#[derive(Debug, Clone)]
pub struct ObservationFeedbackGate {
    threshold: f32,
    last_label: Option<String>,
}

impl ObservationFeedbackGate {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last_label: None,
        }
    }

    /// Record a published `(label, confidence)`; returns `true` when the cue
    /// should fire.
    pub fn observe(&mut self, label: &str, confidence: f32) -> bool {
        let changed = self.last_label.as_deref() != Some(label);
        let fire = changed && confidence > self.threshold;
        if changed {
            self.last_label = Some(label.to_string());
        }
        fire
    }

    pub fn last_label(&self) -> Option<&str> {
        self.last_label.as_deref()
    }
}
