//! Latest-value publication of pipeline output.
//!
//! Observers only ever care about the newest value, so every slot is a
//! [`tokio::sync::watch`] channel: a slow observer sees the latest value and
//! never a backlog, and publishing never waits on anyone.
//!
//! | Slot | Written by | Initial value |
//! |---|---|---|
//! | classification | inference worker | [`Observation::NoObservation`] |
//! | metrics | metrics ticker | all-zero [`PerformanceSample`] |
//! | photo | still-capture completion | `None` |
//!
//! The classification slot is ordered by frame sequence number.  A result
//! whose sequence is not newer than the one already published is rejected,
//! so the slot can never move backwards.
//!
//! # Example
//!
//! ```rust
//! use iris_middleware::{Observation, ResultPublisher};
//!
//! let publisher = ResultPublisher::new();
//! let subscriber = publisher.subscribe();
//! assert_eq!(subscriber.classification(), Observation::NoObservation);
//! ```

use std::sync::Arc;

use iris_types::{CapturedPhoto, ClassificationResult, PerformanceSample};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Content of the classification slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Observation {
    /// Nothing has been classified yet.
    #[default]
    NoObservation,
    Classified(Arc<ClassificationResult>),
}

impl Observation {
    pub fn result(&self) -> Option<&ClassificationResult> {
        match self {
            Observation::NoObservation => None,
            Observation::Classified(result) => Some(result),
        }
    }

    /// Top label, or an empty string before the first classification.
    pub fn label(&self) -> &str {
        self.result().map_or("", |r| r.label.as_str())
    }

    /// Top confidence, or `0.0` before the first classification.
    pub fn confidence(&self) -> f32 {
        self.result().map_or(0.0, |r| r.confidence)
    }

    pub fn sequence(&self) -> Option<u64> {
        self.result().map(|r| r.sequence)
    }
}

struct Slots {
    classification: watch::Sender<Observation>,
    metrics: watch::Sender<PerformanceSample>,
    photo: watch::Sender<Option<Arc<CapturedPhoto>>>,
}

/// Write side of the result slots.  Clones share the same slots.
#[derive(Clone)]
pub struct ResultPublisher {
    slots: Arc<Slots>,
}

impl ResultPublisher {
    pub fn new() -> Self {
        let (classification, _) = watch::channel(Observation::NoObservation);
        let (metrics, _) = watch::channel(PerformanceSample::default());
        let (photo, _) = watch::channel(None);
        Self {
            slots: Arc::new(Slots {
                classification,
                metrics,
                photo,
            }),
        }
    }

    /// Replace the current classification with `result`.
    ///
    /// Returns `false`, leaving the slot untouched, when a result with the
    /// same or a newer sequence number is already published.
    pub fn publish_classification(&self, result: ClassificationResult) -> bool {
        let sequence = result.sequence;
        let published = self.slots.classification.send_if_modified(|current| {
            if current.sequence().is_some_and(|latest| latest >= sequence) {
                return false;
            }
            *current = Observation::Classified(Arc::new(result));
            true
        });
        if published {
            trace!(sequence, "classification published");
        } else {
            debug!(sequence, "stale classification rejected");
        }
        published
    }

    pub fn publish_metrics(&self, sample: PerformanceSample) {
        self.slots.metrics.send_replace(sample);
    }

    /// Store `photo` as the most recent capture and hand back the shared copy.
    pub fn publish_photo(&self, photo: CapturedPhoto) -> Arc<CapturedPhoto> {
        let photo = Arc::new(photo);
        self.slots.photo.send_replace(Some(Arc::clone(&photo)));
        photo
    }

    pub fn current_classification(&self) -> Observation {
        self.slots.classification.borrow().clone()
    }

    pub fn current_metrics(&self) -> PerformanceSample {
        *self.slots.metrics.borrow()
    }

    pub fn last_photo(&self) -> Option<Arc<CapturedPhoto>> {
        self.slots.photo.borrow().clone()
    }

    pub fn subscribe(&self) -> ResultSubscriber {
        ResultSubscriber {
            classification: self.slots.classification.subscribe(),
            metrics: self.slots.metrics.subscribe(),
            photo: self.slots.photo.subscribe(),
        }
    }
}

impl Default for ResultPublisher {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Read side of the result slots.
///
/// Each clone tracks independently which values it has already seen.  The
/// `changed_*` methods resolve to `None` once every publisher is gone.
#[derive(Clone)]
pub struct ResultSubscriber {
    classification: watch::Receiver<Observation>,
    metrics: watch::Receiver<PerformanceSample>,
    photo: watch::Receiver<Option<Arc<CapturedPhoto>>>,
}

impl ResultSubscriber {
    pub fn classification(&self) -> Observation {
        self.classification.borrow().clone()
    }

    pub fn metrics(&self) -> PerformanceSample {
        *self.metrics.borrow()
    }

    pub fn last_photo(&self) -> Option<Arc<CapturedPhoto>> {
        self.photo.borrow().clone()
    }

    /// Wait for the next classification this subscriber has not seen.
    pub async fn changed_classification(&mut self) -> Option<Observation> {
        self.classification.changed().await.ok()?;
        Some(self.classification.borrow_and_update().clone())
    }

    pub async fn changed_metrics(&mut self) -> Option<PerformanceSample> {
        self.metrics.changed().await.ok()?;
        Some(*self.metrics.borrow_and_update())
    }

    pub async fn changed_photo(&mut self) -> Option<Arc<CapturedPhoto>> {
        loop {
            self.photo.changed().await.ok()?;
            if let Some(photo) = self.photo.borrow_and_update().clone() {
                return Some(photo);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use iris_types::Prediction;
    use std::time::Duration;
    use uuid::Uuid;

    fn result(sequence: u64, label: &str, confidence: f32) -> ClassificationResult {
        ClassificationResult {
            sequence,
            label: label.to_string(),
            confidence,
            ranked_alternatives: vec![Prediction::new(label, confidence)],
            inference_latency_ms: 12.5,
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn starts_without_observation() {
        let publisher = ResultPublisher::new();
        let current = publisher.current_classification();
        assert_eq!(current, Observation::NoObservation);
        assert_eq!(current.label(), "");
        assert_eq!(current.confidence(), 0.0);
        assert_eq!(publisher.current_metrics(), PerformanceSample::default());
        assert!(publisher.last_photo().is_none());
    }

    #[test]
    fn stale_and_duplicate_sequences_are_rejected() {
        let publisher = ResultPublisher::new();
        assert!(publisher.publish_classification(result(3, "cat", 0.8)));
        assert!(!publisher.publish_classification(result(2, "dog", 0.9)));
        assert!(!publisher.publish_classification(result(3, "dog", 0.9)));
        assert_eq!(publisher.current_classification().label(), "cat");

        assert!(publisher.publish_classification(result(7, "dog", 0.9)));
        assert_eq!(publisher.current_classification().sequence(), Some(7));
    }

    #[test]
    fn publishing_without_subscribers_still_updates() {
        let publisher = ResultPublisher::new();
        publisher.publish_metrics(PerformanceSample {
            frames_per_second: 30.0,
            last_inference_latency_ms: 8.0,
            frames_dropped: 2,
        });
        assert_eq!(publisher.current_metrics().frames_per_second, 30.0);
        assert_eq!(publisher.current_metrics().frames_dropped, 2);
    }

    #[tokio::test]
    async fn subscriber_wakes_on_new_classification_only() {
        let publisher = ResultPublisher::new();
        let mut subscriber = publisher.subscribe();

        let waiter = tokio::spawn(async move { subscriber.changed_classification().await });
        tokio::task::yield_now().await;
        publisher.publish_classification(result(1, "laptop", 0.7));

        let seen = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.map(|o| o.label().to_string()), Some("laptop".to_string()));
    }

    #[tokio::test]
    async fn rejected_result_does_not_notify() {
        let publisher = ResultPublisher::new();
        publisher.publish_classification(result(5, "mug", 0.9));
        let mut subscriber = publisher.subscribe();

        publisher.publish_classification(result(4, "cup", 0.9));
        let waited =
            tokio::time::timeout(Duration::from_millis(50), subscriber.changed_classification())
                .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn photo_slot_keeps_latest_capture() {
        let publisher = ResultPublisher::new();
        let mut subscriber = publisher.subscribe();

        let shared = publisher.publish_photo(CapturedPhoto {
            id: Uuid::new_v4(),
            image_bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
            associated_label: "banana".to_string(),
            associated_confidence: 0.97,
            captured_at: Utc::now(),
        });

        let seen = subscriber.changed_photo().await.unwrap();
        assert!(Arc::ptr_eq(&seen, &shared));
        assert_eq!(subscriber.last_photo().unwrap().associated_label, "banana");
    }

    #[tokio::test]
    async fn changed_returns_none_after_publisher_drops() {
        let publisher = ResultPublisher::new();
        let mut subscriber = publisher.subscribe();
        drop(publisher);
        assert!(subscriber.changed_metrics().await.is_none());
    }
}
