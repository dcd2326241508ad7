//! [`Instrumentation`] – frame throughput and inference latency counters.
//!
//! The capture context bumps lock-free counters on every frame.  A periodic
//! ticker ([`spawn_metrics_ticker`]) swaps them back to zero once per
//! window and publishes the resulting [`PerformanceSample`], so each window
//! reports exactly the frames that arrived inside it.
//!
//! Arrivals are counted before the drop/accept decision: `frames_per_second`
//! measures the camera, not the classifier.  A slow engine shows up as higher
//! `last_inference_latency_ms` and `frames_dropped` instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use iris_middleware::ResultPublisher;
use iris_types::PerformanceSample;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Instrumentation {
    arrivals: AtomicU64,
    dropped: AtomicU64,
    /// `f64` bits of the most recent latency.
    last_latency_ms: AtomicU64,
}

impl Instrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_arrival(&self) {
        self.arrivals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_ms: f64) {
        self.last_latency_ms
            .store(latency_ms.to_bits(), Ordering::Relaxed);
    }

    pub fn last_latency_ms(&self) -> f64 {
        f64::from_bits(self.last_latency_ms.load(Ordering::Relaxed))
    }

    /// Arrivals counted in the current window so far.
    pub fn pending_arrivals(&self) -> u64 {
        self.arrivals.load(Ordering::Relaxed)
    }

    pub fn pending_drops(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Start a fresh window without reporting the old one.
    pub fn reset(&self) {
        self.arrivals.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }

    /// Close the current window of length `window` and return its sample.
    /// The window counters restart at zero; the latency is sampled as is.
    pub fn sample(&self, window: Duration) -> PerformanceSample {
        let arrivals = self.arrivals.swap(0, Ordering::Relaxed);
        let frames_dropped = self.dropped.swap(0, Ordering::Relaxed);
        let secs = window.as_secs_f64();
        let frames_per_second = if secs > 0.0 {
            arrivals as f64 / secs
        } else {
            0.0
        };
        PerformanceSample {
            frames_per_second,
            last_inference_latency_ms: self.last_latency_ms(),
            frames_dropped,
        }
    }
}

/// Publish a [`PerformanceSample`] every `window` until the task is aborted.
///
/// The counters are reset before this returns, so the first window starts
/// now.  Must be called from within a Tokio runtime.
pub fn spawn_metrics_ticker(
    instrumentation: Arc<Instrumentation>,
    publisher: ResultPublisher,
    window: Duration,
) -> JoinHandle<()> {
    instrumentation.reset();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let sample = instrumentation.sample(window);
            debug!(
                fps = sample.frames_per_second,
                latency_ms = sample.last_inference_latency_ms,
                dropped = sample.frames_dropped,
                "metrics sampled"
            );
            publisher.publish_metrics(sample);
        }
    })
}
