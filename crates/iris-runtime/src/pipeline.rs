//! [`InferencePipeline`] – frame stream → classification results.
//!
//! Turns an unbounded camera stream into a bounded stream of results:
//!
//! 1. Frames arrive one at a time on the device's capture context through
//!    [`FrameSink::on_frame`].  Each arrival is counted.
//! 2. A single busy flag is claimed with a compare-and-swap.  When an
//!    inference is already in flight the frame is dropped on the spot, never
//!    queued.
//! 3. An accepted frame takes the next sequence number, is copied into an
//!    owned [`ImageInput`] and handed to the inference worker through a
//!    capacity-1 channel.  The borrowed frame is released when `on_frame`
//!    returns.
//! 4. The worker times the classifier on the injected [`Clock`], reduces the
//!    ranked output to a [`ClassificationResult`] and publishes it.
//! 5. A confident new label fires one [`FeedbackKind::ConfidentObservation`]
//!    cue.
//!
//! # Cancellation
//!
//! The pipeline keeps a stream gate: an `open` flag and an epoch bumped on
//! every start and stop.  An inference that was started under an older epoch
//! runs to completion but its result is dropped.  The epoch check and the
//! publish happen under the same lock that
//! [`stream_stopped`](FrameSink::stream_stopped) takes, so nothing is
//! published once a stop has returned.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use iris_hal::{Classifier, Clock, FrameBuffer, FrameSink, ImageInput};
use iris_middleware::ResultPublisher;
use iris_types::{ClassificationResult, Prediction};
use tracing::{debug, error, info, trace, warn};

use crate::config::PipelineConfig;
use crate::feedback::{FeedbackKind, FeedbackSink, ObservationFeedbackGate};
use crate::instrumentation::Instrumentation;

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

struct StreamGate {
    open: bool,
    epoch: u64,
    feedback: ObservationFeedbackGate,
}

struct Job {
    sequence: u64,
    epoch: u64,
    image: ImageInput,
}

struct Shared {
    classifier: Arc<dyn Classifier>,
    publisher: ResultPublisher,
    feedback: Arc<dyn FeedbackSink>,
    clock: Arc<dyn Clock>,
    instrumentation: Arc<Instrumentation>,
    config: PipelineConfig,
    busy: AtomicBool,
    sequence: AtomicU64,
    gate: Mutex<StreamGate>,
}

impl Shared {
    fn gate(&self) -> MutexGuard<'_, StreamGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one inference.  Every failure stays inside this frame.
    fn process(&self, job: Job) {
        let frame = job.sequence;
        let started = self.clock.now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.classifier.classify(&job.image)));
        let latency_ms = self
            .clock
            .now()
            .saturating_duration_since(started)
            .as_secs_f64()
            * 1000.0;

        let ranked = match outcome {
            Ok(Ok(ranked)) => ranked,
            Ok(Err(e)) => {
                self.instrumentation.record_latency(latency_ms);
                warn!(frame, error = %e, "classifier failed; frame skipped");
                return;
            }
            Err(_) => {
                warn!(frame, "classifier panicked; frame skipped");
                return;
            }
        };
        self.instrumentation.record_latency(latency_ms);
        if latency_ms > self.config.slow_inference_warn_ms as f64 {
            warn!(frame, latency_ms, "slow inference");
        }

        let Some(result) = self.reduce(frame, ranked, latency_ms) else {
            return;
        };
        let label = result.label.clone();
        let confidence = result.confidence;

        let cue = {
            let mut gate = self.gate();
            if !gate.open || gate.epoch != job.epoch {
                debug!(frame, "stream stopped during inference; result discarded");
                return;
            }
            if !self.publisher.publish_classification(result) {
                return;
            }
            gate.feedback.observe(&label, confidence)
        };
        trace!(frame, %label, confidence, latency_ms, "result published");

        if cue {
            info!(%label, confidence, "confident observation");
            let cue = FeedbackKind::ConfidentObservation { label };
            if panic::catch_unwind(AssertUnwindSafe(|| self.feedback.emit(cue))).is_err() {
                warn!(frame, "feedback sink panicked; cue dropped");
            }
        }
    }

    /// Reduce the engine's ranked list.  `None` skips the frame.
    fn reduce(
        &self,
        sequence: u64,
        mut ranked: Vec<Prediction>,
        latency_ms: f64,
    ) -> Option<ClassificationResult> {
        if ranked.is_empty() {
            debug!(frame = sequence, "no observation");
            return None;
        }
        ranked.truncate(self.config.kept_alternatives());
        if let Some(bad) = ranked.iter().find(|p| !is_well_formed(p)) {
            warn!(
                frame = sequence,
                label = %bad.label,
                confidence = bad.confidence,
                "malformed classifier output; frame skipped"
            );
            return None;
        }
        let top = &ranked[0];
        Some(ClassificationResult {
            sequence,
            label: top.label.clone(),
            confidence: top.confidence,
            inference_latency_ms: latency_ms,
            produced_at: self.clock.wall_now(),
            ranked_alternatives: ranked,
        })
    }
}

fn is_well_formed(prediction: &Prediction) -> bool {
    !prediction.label.trim().is_empty()
        && prediction.confidence.is_finite()
        && (0.0..=1.0).contains(&prediction.confidence)
}

fn run_worker(shared: Arc<Shared>, jobs: Receiver<Job>) {
    for job in jobs {
        shared.process(job);
        shared.busy.store(false, Ordering::Release);
    }
    debug!("inference worker exiting");
}

// ─────────────────────────────────────────────────────────────────────────────
// InferencePipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Frame sink that classifies at most one frame at a time.
///
/// Owns a dedicated worker thread (`iris-inference`) that is joined on drop.
pub struct InferencePipeline {
    shared: Arc<Shared>,
    jobs: Option<SyncSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl InferencePipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        publisher: ResultPublisher,
        feedback: Arc<dyn FeedbackSink>,
        clock: Arc<dyn Clock>,
        instrumentation: Arc<Instrumentation>,
        config: PipelineConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            gate: Mutex::new(StreamGate {
                open: false,
                epoch: 0,
                feedback: ObservationFeedbackGate::new(config.feedback_threshold),
            }),
            classifier,
            publisher,
            feedback,
            clock,
            instrumentation,
            config,
            busy: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        });

        let (tx, rx) = mpsc::sync_channel(1);
        let worker_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("iris-inference".to_string())
            .spawn(move || run_worker(worker_shared, rx));
        let (jobs, worker) = match spawned {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                error!(error = %e, "failed to spawn inference worker; frames will be skipped");
                (None, None)
            }
        };
        Self {
            shared,
            jobs,
            worker,
        }
    }

    /// `true` while an inference is in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// `true` between [`FrameSink::stream_started`] and
    /// [`FrameSink::stream_stopped`].
    pub fn is_open(&self) -> bool {
        self.shared.gate().open
    }

    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.shared.instrumentation
    }

    /// Sequence number of the most recently accepted frame.
    pub fn last_sequence(&self) -> u64 {
        self.shared.sequence.load(Ordering::Relaxed)
    }
}

impl FrameSink for InferencePipeline {
    fn on_frame(&self, frame: &FrameBuffer<'_>) {
        let epoch = {
            let gate = self.shared.gate();
            if !gate.open {
                trace!("frame ignored: stream closed");
                return;
            }
            gate.epoch
        };
        self.shared.instrumentation.record_arrival();

        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.shared.instrumentation.record_drop();
            trace!("frame dropped: inference in flight");
            return;
        }

        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let job = Job {
            sequence,
            epoch,
            image: ImageInput::from_frame(frame, self.shared.config.center_crop),
        };
        let handed_off = self
            .jobs
            .as_ref()
            .is_some_and(|jobs| jobs.try_send(job).is_ok());
        if !handed_off {
            self.shared.busy.store(false, Ordering::Release);
            warn!(frame = sequence, "inference worker unavailable; frame skipped");
        }
    }

    fn stream_started(&self) {
        let mut gate = self.shared.gate();
        gate.open = true;
        gate.epoch += 1;
        debug!(epoch = gate.epoch, "frame stream opened");
    }

    fn stream_stopped(&self) {
        let mut gate = self.shared.gate();
        gate.open = false;
        gate.epoch += 1;
        debug!(epoch = gate.epoch, "frame stream closed");
    }
}

impl Drop for InferencePipeline {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use iris_hal::{ManualClock, PixelFormat, SystemClock};
    use iris_middleware::Observation;
    use iris_types::ClassifierError;
    use std::sync::mpsc::{Sender, channel};
    use std::time::{Duration, Instant};

    // ── Test doubles ─────────────────────────────────────────────────────────

    /// Returns scripted outputs in order, repeating the last one.
    struct ScriptedClassifier {
        script: Vec<Result<Vec<Prediction>, ClassifierError>>,
        calls: AtomicU64,
    }

    impl ScriptedClassifier {
        fn new(script: Vec<Result<Vec<Prediction>, ClassifierError>>) -> Self {
            Self {
                script,
                calls: AtomicU64::new(0),
            }
        }
    }

    impl Classifier for ScriptedClassifier {
        fn classify(&self, _image: &ImageInput) -> Result<Vec<Prediction>, ClassifierError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.script[n.min(self.script.len() - 1)].clone()
        }
    }

    /// Blocks inside `classify` until the test releases it.
    struct BlockingClassifier {
        entered: Mutex<Sender<()>>,
        release: Mutex<Receiver<()>>,
        calls: AtomicU64,
        output: Vec<Prediction>,
    }

    impl Classifier for BlockingClassifier {
        fn classify(&self, _image: &ImageInput) -> Result<Vec<Prediction>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            Ok(self.output.clone())
        }
    }

    /// Advances a manual clock by a fixed step inside every call.
    struct SteppingClassifier {
        clock: Arc<ManualClock>,
        step: Duration,
    }

    impl Classifier for SteppingClassifier {
        fn classify(&self, _image: &ImageInput) -> Result<Vec<Prediction>, ClassifierError> {
            self.clock.advance(self.step);
            Ok(vec![Prediction::new("mug", 0.5)])
        }
    }

    struct PanickingClassifier;

    impl Classifier for PanickingClassifier {
        fn classify(&self, _image: &ImageInput) -> Result<Vec<Prediction>, ClassifierError> {
            panic!("engine crashed")
        }
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

    // ── Helpers ──────────────────────────────────────────────────────────────

    struct Harness {
        pipeline: InferencePipeline,
        publisher: ResultPublisher,
        feedback: Arc<RecordingFeedback>,
    }

    fn harness(classifier: Arc<dyn Classifier>, clock: Arc<dyn Clock>) -> Harness {
        let publisher = ResultPublisher::new();
        let feedback = Arc::new(RecordingFeedback::default());
        let pipeline = InferencePipeline::new(
            classifier,
            publisher.clone(),
            feedback.clone(),
            clock,
            Arc::new(Instrumentation::new()),
            PipelineConfig::default(),
        );
        pipeline.stream_started();
        Harness {
            pipeline,
            publisher,
            feedback,
        }
    }

    fn push_frame(pipeline: &InferencePipeline) {
        let data = vec![0x80u8; 8 * 6 * 4];
        let frame = FrameBuffer::new(8, 6, 8 * 4, PixelFormat::Bgra8, &data).unwrap();
        pipeline.on_frame(&frame);
    }

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Push one frame and wait for its inference to finish.
    fn classify_one(pipeline: &InferencePipeline) {
        push_frame(pipeline);
        wait_until("idle worker", || !pipeline.is_busy());
    }

    fn blocking(output: Vec<Prediction>) -> (Arc<BlockingClassifier>, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        let classifier = Arc::new(BlockingClassifier {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            calls: AtomicU64::new(0),
            output,
        });
        (classifier, entered_rx, release_tx)
    }

    // ── Backpressure ─────────────────────────────────────────────────────────

    #[test]
    fn frames_arriving_while_busy_are_dropped() {
        let (classifier, entered, release) = blocking(vec![Prediction::new("mug", 0.6)]);
        let h = harness(classifier.clone(), Arc::new(SystemClock));

        push_frame(&h.pipeline);
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        for _ in 0..9 {
            push_frame(&h.pipeline);
        }

        let instrumentation = h.pipeline.instrumentation();
        assert_eq!(instrumentation.pending_arrivals(), 10);
        assert_eq!(instrumentation.pending_drops(), 9);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

        release.send(()).unwrap();
        wait_until("idle worker", || !h.pipeline.is_busy());
        assert_eq!(h.publisher.current_classification().sequence(), Some(1));

        // Worker is free again: the next frame is accepted.
        release.send(()).unwrap();
        classify_one(&h.pipeline);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.publisher.current_classification().sequence(), Some(2));
    }

    #[test]
    fn slow_engine_invocations_stay_below_arrivals() {
        let classifier = Arc::new(iris_hal::SimClassifier::new(vec![vec![Prediction::new(
            "mug", 0.6,
        )]])
        .with_latency(Duration::from_millis(20)));
        let h = harness(classifier.clone(), Arc::new(SystemClock));

        // Frame interval (2 ms) well below engine latency (20 ms).
        for _ in 0..50 {
            push_frame(&h.pipeline);
            thread::sleep(Duration::from_millis(2));
        }
        wait_until("idle worker", || !h.pipeline.is_busy());

        let invocations = classifier.invocations();
        assert!(invocations >= 1);
        assert!(invocations < 50, "expected drops, got {invocations} invocations");
        assert_eq!(
            h.pipeline.instrumentation().pending_drops(),
            50 - invocations
        );
    }

    // ── Ordering ─────────────────────────────────────────────────────────────

    #[test]
    fn published_sequences_increase() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![Ok(vec![Prediction::new(
            "mug", 0.6,
        )])]));
        let h = harness(classifier, Arc::new(SystemClock));
        let mut seen = Vec::new();
        for _ in 0..20 {
            classify_one(&h.pipeline);
            seen.push(h.publisher.current_classification().sequence().unwrap());
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "{seen:?}");
        assert_eq!(h.pipeline.last_sequence(), 20);
    }

    // ── Reduction ────────────────────────────────────────────────────────────

    #[test]
    fn keeps_top_k_in_engine_order() {
        let ranked: Vec<Prediction> = [
            ("coffee mug", 0.5),
            ("cup", 0.2),
            ("teapot", 0.2),
            ("bowl", 0.05),
            ("pitcher", 0.03),
            ("spoon", 0.02),
        ]
        .iter()
        .map(|&(l, c)| Prediction::new(l, c))
        .collect();
        let classifier = Arc::new(ScriptedClassifier::new(vec![Ok(ranked)]));
        let h = harness(classifier, Arc::new(SystemClock));

        classify_one(&h.pipeline);
        let current = h.publisher.current_classification();
        let result = current.result().unwrap();
        assert_eq!(result.label, "coffee mug");
        assert_eq!(result.confidence, 0.5);
        let labels: Vec<&str> = result
            .ranked_alternatives
            .iter()
            .map(|p| p.label.as_str())
            .collect();
        assert_eq!(labels, ["coffee mug", "cup", "teapot", "bowl", "pitcher"]);
    }

    #[test]
    fn empty_malformed_and_failed_outputs_are_skipped() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![
            Ok(vec![]),
            Ok(vec![Prediction::new("", 0.9)]),
            Ok(vec![Prediction::new("mug", f32::NAN)]),
            Ok(vec![Prediction::new("mug", 1.5)]),
            Err(ClassifierError::InvalidInput("bad stride".to_string())),
            Ok(vec![Prediction::new("mug", 0.7)]),
        ]));
        let h = harness(classifier, Arc::new(SystemClock));

        for _ in 0..5 {
            classify_one(&h.pipeline);
            assert_eq!(h.publisher.current_classification(), Observation::NoObservation);
        }
        // The stream survives every failure.
        classify_one(&h.pipeline);
        assert_eq!(h.publisher.current_classification().label(), "mug");
        assert_eq!(h.publisher.current_classification().sequence(), Some(6));
    }

    #[test]
    fn classifier_panic_is_isolated() {
        let h = harness(Arc::new(PanickingClassifier), Arc::new(SystemClock));
        classify_one(&h.pipeline);
        classify_one(&h.pipeline);
        assert_eq!(h.publisher.current_classification(), Observation::NoObservation);
        assert_eq!(h.pipeline.last_sequence(), 2);
    }

    #[test]
    fn latency_is_measured_on_injected_clock() {
        let clock = Arc::new(ManualClock::new());
        let classifier = Arc::new(SteppingClassifier {
            clock: Arc::clone(&clock),
            step: Duration::from_millis(40),
        });
        let h = harness(classifier, clock.clone());

        classify_one(&h.pipeline);
        let current = h.publisher.current_classification();
        assert_eq!(current.result().unwrap().inference_latency_ms, 40.0);
        assert_eq!(h.pipeline.instrumentation().last_latency_ms(), 40.0);
    }

    // ── Feedback ─────────────────────────────────────────────────────────────

    #[test]
    fn confident_cue_fires_once_per_label_change() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![
            Ok(vec![Prediction::new("A", 0.90)]),
            Ok(vec![Prediction::new("A", 0.92)]),
            Ok(vec![Prediction::new("B", 0.90)]),
        ]));
        let h = harness(classifier, Arc::new(SystemClock));
        for _ in 0..3 {
            classify_one(&h.pipeline);
        }
        assert_eq!(
            *h.feedback.cues.lock().unwrap(),
            vec![
                FeedbackKind::ConfidentObservation {
                    label: "A".to_string()
                },
                FeedbackKind::ConfidentObservation {
                    label: "B".to_string()
                },
            ]
        );
    }

    struct PanickingFeedback;

    impl FeedbackSink for PanickingFeedback {
        fn emit(&self, _kind: FeedbackKind) {
            panic!("haptics unavailable")
        }
    }

    #[test]
    fn panicking_feedback_sink_does_not_stall_worker() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![
            Ok(vec![Prediction::new("A", 0.95)]),
            Ok(vec![Prediction::new("B", 0.95)]),
        ]));
        let publisher = ResultPublisher::new();
        let pipeline = InferencePipeline::new(
            classifier.clone(),
            publisher.clone(),
            Arc::new(PanickingFeedback),
            Arc::new(SystemClock),
            Arc::new(Instrumentation::new()),
            PipelineConfig::default(),
        );
        pipeline.stream_started();

        classify_one(&pipeline);
        assert_eq!(publisher.current_classification().label(), "A");
        classify_one(&pipeline);
        assert_eq!(publisher.current_classification().label(), "B");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.instrumentation().pending_drops(), 0);
    }

    // ── Stream gate ──────────────────────────────────────────────────────────

    #[test]
    fn stop_mid_inference_discards_result() {
        let (classifier, entered, release) = blocking(vec![Prediction::new("mug", 0.95)]);
        let h = harness(classifier.clone(), Arc::new(SystemClock));

        push_frame(&h.pipeline);
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        h.pipeline.stream_stopped();
        release.send(()).unwrap();
        wait_until("idle worker", || !h.pipeline.is_busy());

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.publisher.current_classification(), Observation::NoObservation);
        assert!(h.feedback.cues.lock().unwrap().is_empty());
    }

    #[test]
    fn result_from_previous_run_is_discarded_after_restart() {
        let (classifier, entered, release) = blocking(vec![Prediction::new("mug", 0.6)]);
        let h = harness(classifier, Arc::new(SystemClock));

        push_frame(&h.pipeline);
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        h.pipeline.stream_stopped();
        h.pipeline.stream_started();
        release.send(()).unwrap();
        wait_until("idle worker", || !h.pipeline.is_busy());
        assert_eq!(h.publisher.current_classification(), Observation::NoObservation);
    }

    #[test]
    fn frames_are_ignored_while_closed() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![Ok(vec![Prediction::new(
            "mug", 0.6,
        )])]));
        let h = harness(classifier.clone(), Arc::new(SystemClock));
        h.pipeline.stream_stopped();
        assert!(!h.pipeline.is_open());

        push_frame(&h.pipeline);
        assert_eq!(h.pipeline.instrumentation().pending_arrivals(), 0);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }
}
