//! [`PhotoCapture`] – one-shot still capture tagged with the live label.
//!
//! ```text
//! Idle ──capture_photo()──▶ Requested ──device completes──▶ Completed ─┐
//!   ▲                            │                                     │
//!   │                            └──device fails──▶ Failed ────────────┤
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A request is accepted only while the session is running and no other
//! capture is outstanding.  It holds the device configuration lock until the
//! device reports back, so torch changes fail fast in between.  The label and
//! confidence current *at request time* travel with the request.
//!
//! Completion is best effort: a device failure is logged and nothing is
//! published.  The returned [`PhotoTicket`] resolves exactly once, with the
//! published photo or `None`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use iris_hal::{Clock, StillCompletion, StillSettings};
use iris_kernel::CaptureSession;
use iris_middleware::ResultPublisher;
use iris_types::{CapturedPhoto, PhotoError, SessionState};
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::feedback::{FeedbackKind, FeedbackSink};

/// Externally visible state of the capture sub-pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoState {
    Idle,
    Requested,
}

/// Resolves once the device has answered a still request.
#[derive(Debug)]
pub struct PhotoTicket {
    outcome: oneshot::Receiver<Option<Arc<CapturedPhoto>>>,
}

impl PhotoTicket {
    /// The published photo, or `None` when the capture failed.
    pub async fn outcome(self) -> Option<Arc<CapturedPhoto>> {
        self.outcome.await.ok().flatten()
    }
}

pub struct PhotoCapture {
    session: Arc<CaptureSession>,
    publisher: ResultPublisher,
    feedback: Arc<dyn FeedbackSink>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<AtomicBool>,
}

impl PhotoCapture {
    pub fn new(
        session: Arc<CaptureSession>,
        publisher: ResultPublisher,
        feedback: Arc<dyn FeedbackSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            publisher,
            feedback,
            clock,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> PhotoState {
        if self.in_flight.load(Ordering::Acquire) {
            PhotoState::Requested
        } else {
            PhotoState::Idle
        }
    }

    /// Issue a still capture.  Returns as soon as the request is on its way.
    ///
    /// The flash fires when the torch is on at request time.
    ///
    /// # Errors
    ///
    /// - [`PhotoError::SessionNotRunning`] unless the session is running.
    /// - [`PhotoError::CaptureInProgress`] while another capture is
    ///   outstanding.
    /// - [`PhotoError::Device`] when the device configuration lock is held.
    pub fn capture_photo(&self) -> Result<PhotoTicket, PhotoError> {
        let state = self.session.session_state();
        if state != SessionState::Running {
            return Err(PhotoError::SessionNotRunning(state));
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PhotoError::CaptureInProgress);
        }
        let guard = match self.session.device_lock().try_acquire("still_capture") {
            Ok(guard) => guard,
            Err(e) => {
                self.in_flight.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        let current = self.publisher.current_classification();
        let label = current.label().to_string();
        let confidence = current.confidence();
        let settings = StillSettings {
            flash: self.session.torch_on(),
        };

        let (tx, rx) = oneshot::channel();
        let publisher = self.publisher.clone();
        let clock = Arc::clone(&self.clock);
        let in_flight = Arc::clone(&self.in_flight);
        let completion = StillCompletion::new(move |outcome| {
            let photo = match outcome {
                Ok(image_bytes) if !image_bytes.is_empty() => {
                    let photo = publisher.publish_photo(CapturedPhoto {
                        id: Uuid::new_v4(),
                        image_bytes,
                        associated_label: label,
                        associated_confidence: confidence,
                        captured_at: clock.wall_now(),
                    });
                    info!(
                        id = %photo.id,
                        label = %photo.associated_label,
                        bytes = photo.image_bytes.len(),
                        "photo captured"
                    );
                    Some(photo)
                }
                Ok(_) => {
                    warn!("still capture returned no image data; nothing published");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "still capture failed; nothing published");
                    None
                }
            };
            drop(guard);
            in_flight.store(false, Ordering::Release);
            let _ = tx.send(photo);
        });

        info!(flash = settings.flash, "still capture requested");
        self.feedback.emit(FeedbackKind::PhotoRequested);
        self.session.device().capture_still(settings, completion);
        Ok(PhotoTicket { outcome: rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use iris_hal::{FrameBuffer, FrameSink, SimCall, SimCaptureDevice, SystemClock};
    use iris_kernel::SessionConfig;
    use iris_types::{AuthorizationState, ClassificationResult, DeviceError, Prediction};
    use std::sync::Mutex;

    struct NullSink;

    impl FrameSink for NullSink {
        fn on_frame(&self, _frame: &FrameBuffer<'_>) {}
    }

    #[derive(Default)]
    struct RecordingFeedback {
        cues: Mutex<Vec<FeedbackKind>>,
    }

    impl FeedbackSink for RecordingFeedback {
        fn emit(&self, kind: FeedbackKind) {
            self.cues.lock().unwrap().push(kind);
        }
    }

    struct Fixture {
        device: SimCaptureDevice,
        session: Arc<CaptureSession>,
        publisher: ResultPublisher,
        feedback: Arc<RecordingFeedback>,
        photos: PhotoCapture,
    }

    async fn running(device: SimCaptureDevice) -> Fixture {
        let session = Arc::new(CaptureSession::new(
            Arc::new(device.clone()),
            Arc::new(NullSink),
            SessionConfig::default(),
        ));
        session.request_authorization().await;
        let publisher = ResultPublisher::new();
        let feedback = Arc::new(RecordingFeedback::default());
        let photos = PhotoCapture::new(
            Arc::clone(&session),
            publisher.clone(),
            feedback.clone(),
            Arc::new(SystemClock),
        );
        Fixture {
            device,
            session,
            publisher,
            feedback,
            photos,
        }
    }

    fn authorized() -> SimCaptureDevice {
        SimCaptureDevice::builder()
            .authorization(AuthorizationState::Authorized)
            .build()
    }

    #[tokio::test]
    async fn second_request_is_rejected_and_one_photo_published() {
        let f = running(authorized()).await;
        let mut subscriber = f.publisher.subscribe();

        let ticket = f.photos.capture_photo().unwrap();
        assert_eq!(f.photos.state(), PhotoState::Requested);
        assert_eq!(
            f.photos.capture_photo().unwrap_err(),
            PhotoError::CaptureInProgress
        );
        assert_eq!(
            f.device
                .calls()
                .iter()
                .filter(|c| matches!(c, SimCall::CaptureStill(_)))
                .count(),
            1
        );

        assert!(f.device.complete_pending_still(Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])));
        let photo = ticket.outcome().await.unwrap();
        assert_eq!(photo.image_bytes.len(), 4);
        assert_eq!(f.photos.state(), PhotoState::Idle);

        let published = subscriber.changed_photo().await.unwrap();
        assert_eq!(published.id, photo.id);
        assert_eq!(f.feedback.cues.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn photo_carries_label_current_at_request_time() {
        let f = running(authorized()).await;
        let at_request = ClassificationResult {
            sequence: 1,
            label: "golden retriever".to_string(),
            confidence: 0.88,
            ranked_alternatives: vec![Prediction::new("golden retriever", 0.88)],
            inference_latency_ms: 30.0,
            produced_at: Utc::now(),
        };
        f.publisher.publish_classification(at_request.clone());

        let ticket = f.photos.capture_photo().unwrap();
        f.publisher.publish_classification(ClassificationResult {
            sequence: 2,
            label: "banana".to_string(),
            ..at_request
        });
        f.device.complete_pending_still(Ok(vec![1, 2, 3]));

        let photo = ticket.outcome().await.unwrap();
        assert_eq!(photo.associated_label, "golden retriever");
        assert_eq!(photo.associated_confidence, 0.88);
    }

    #[tokio::test]
    async fn without_observation_label_is_empty() {
        let f = running(
            SimCaptureDevice::builder()
                .authorization(AuthorizationState::Authorized)
                .auto_complete_stills()
                .build(),
        )
        .await;
        let photo = f.photos.capture_photo().unwrap().outcome().await.unwrap();
        assert_eq!(photo.associated_label, "");
        assert_eq!(photo.associated_confidence, 0.0);
    }

    #[tokio::test]
    async fn device_failure_publishes_nothing_and_returns_to_idle() {
        let f = running(authorized()).await;
        let ticket = f.photos.capture_photo().unwrap();
        f.device.complete_pending_still(Err(DeviceError::HardwareFault {
            component: "still".to_string(),
            details: "sensor timeout".to_string(),
        }));

        assert!(ticket.outcome().await.is_none());
        assert!(f.publisher.last_photo().is_none());
        assert_eq!(f.photos.state(), PhotoState::Idle);
        assert!(f.session.device_lock().holder().is_none());
        // The next request is accepted.
        assert!(f.photos.capture_photo().is_ok());
    }

    #[tokio::test]
    async fn requires_running_session() {
        let f = running(authorized()).await;
        f.session.stop();
        assert_eq!(
            f.photos.capture_photo().unwrap_err(),
            PhotoError::SessionNotRunning(SessionState::Stopped)
        );
        assert!(f.feedback.cues.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn torch_is_locked_while_capture_outstanding() {
        let f = running(authorized()).await;
        let ticket = f.photos.capture_photo().unwrap();
        assert_eq!(
            f.session.set_torch(true),
            Err(DeviceError::ConfigurationLocked {
                holder: "still_capture".to_string()
            })
        );
        f.device.complete_pending_still(Ok(vec![7]));
        ticket.outcome().await;
        assert!(f.session.set_torch(true).is_ok());
    }

    #[tokio::test]
    async fn flash_follows_torch() {
        let f = running(authorized()).await;
        f.session.set_torch(true).unwrap();
        let ticket = f.photos.capture_photo().unwrap();
        assert_eq!(
            f.device.calls().last(),
            Some(&SimCall::CaptureStill(StillSettings { flash: true }))
        );
        f.device.complete_pending_still(Ok(vec![7]));
        ticket.outcome().await;
    }
}
