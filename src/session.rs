//! Capture-side session plumbing.
//!
//! `CapturePipeline` is the producer path: the audio device invokes
//! `ingest_block` for every delivered block, on the device's own thread. It
//! must stay cheap and must never block. `RecordingSession` is the
//! worker-side view of one listening episode: it raises the listening flag,
//! waits out a timeout, and takes the captured frames.
//!
//! Shared flags and the live level metric are single-writer/multi-reader
//! atomics; no heavier locking protocol is needed because no field is
//! compound-mutated from two contexts.

use crate::audio::frames::{mean_abs_level, AudioFrame, FrameAccumulator};
use crate::audio::vad::VoiceActivityClassifier;
use crate::defaults;
use crate::interrupt::InterruptSender;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag, observable by the recording wait loop and
/// the conversation loop. Cancellation is checked between turns; in-flight
/// collaborator calls are never forcibly interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Observability surface shared between the producer and worker contexts.
///
/// All fields are atomics: the producer writes the level, the worker flips
/// the flags, observers read snapshots.
#[derive(Debug, Default)]
pub struct SharedStatus {
    listening: AtomicBool,
    speaking: AtomicBool,
    level_bits: AtomicU32,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    /// Live audio level in [0.0, 1.0]: mean absolute amplitude of the most
    /// recently delivered block.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Relaxed);
    }

    pub(crate) fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::Relaxed);
    }

    pub(crate) fn set_level(&self, level: f32) {
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
    }
}

/// Producer-side front end invoked on every capture block.
///
/// Routes each block by the current flags: to the session buffer while
/// listening, and through frame accumulation + voice activity classification
/// while synthesized speech is playing (interrupt detection).
pub struct CapturePipeline {
    status: Arc<SharedStatus>,
    captured: Mutex<Vec<AudioFrame>>,
    accumulator: Mutex<FrameAccumulator>,
    classifier: Mutex<VoiceActivityClassifier>,
    interrupts: InterruptSender,
    was_speaking: AtomicBool,
}

impl CapturePipeline {
    pub fn new(
        classifier: VoiceActivityClassifier,
        interrupts: InterruptSender,
        frame_len: usize,
    ) -> Self {
        Self {
            status: Arc::new(SharedStatus::new()),
            captured: Mutex::new(Vec::new()),
            accumulator: Mutex::new(FrameAccumulator::new(frame_len)),
            classifier: Mutex::new(classifier),
            interrupts,
            was_speaking: AtomicBool::new(false),
        }
    }

    /// Shared status handle for observers and the playback controller.
    pub fn status(&self) -> Arc<SharedStatus> {
        Arc::clone(&self.status)
    }

    /// Whether the voice activity classifier is still available.
    pub fn classifier_available(&self) -> bool {
        self.classifier
            .lock()
            .map(|c| c.is_available())
            .unwrap_or(false)
    }

    /// Probe the classifier with one silence frame, disabling it on failure.
    pub fn probe_classifier(&self) -> bool {
        self.classifier.lock().map(|mut c| c.probe()).unwrap_or(false)
    }

    /// Called by the capture device for every delivered block.
    pub fn ingest_block(&self, block: &[f32]) {
        self.status.set_level(mean_abs_level(block));
        if block.is_empty() {
            return;
        }

        if self.status.is_listening() {
            if let Ok(mut captured) = self.captured.lock() {
                captured.push(AudioFrame::from_block(block));
            }
        }

        if self.status.is_speaking() {
            let fresh_playback = !self.was_speaking.swap(true, Ordering::Relaxed);
            if let (Ok(mut accumulator), Ok(mut classifier)) =
                (self.accumulator.lock(), self.classifier.lock())
            {
                if !classifier.is_available() {
                    return;
                }
                if fresh_playback {
                    // Drop partial frames left over from the last playback.
                    accumulator.clear();
                }
                accumulator.push(block);
                while let Some(frame) = accumulator.next_frame() {
                    if classifier.classify(&frame) {
                        self.interrupts.notify();
                        break;
                    }
                }
            }
        } else {
            self.was_speaking.store(false, Ordering::Relaxed);
        }
    }

    fn begin_session(&self) {
        if let Ok(mut captured) = self.captured.lock() {
            captured.clear();
        }
    }

    fn take_captured(&self) -> Vec<AudioFrame> {
        self.captured
            .lock()
            .map(|mut captured| std::mem::take(&mut *captured))
            .unwrap_or_default()
    }
}

/// One listening episode: frames accumulate from `start` until `stop` or
/// until the timeout elapses.
pub struct RecordingSession {
    pipeline: Arc<CapturePipeline>,
    timeout: Duration,
    started: Instant,
}

impl RecordingSession {
    /// Begin accumulating frames from the capture callback.
    pub fn start(pipeline: Arc<CapturePipeline>, timeout: Duration) -> Self {
        pipeline.begin_session();
        pipeline.status.set_listening(true);
        Self {
            pipeline,
            timeout,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn timed_out(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// Sleep-poll until the timeout elapses or cancellation is requested.
    pub fn wait(&self, cancel: &CancelToken) {
        let interval = Duration::from_millis(defaults::POLL_INTERVAL_MS);
        while !self.timed_out() && !cancel.is_cancelled() {
            thread::sleep(interval);
        }
    }

    /// End the session and return the captured frames, oldest first.
    ///
    /// An empty result means no input was delivered; callers must treat
    /// that as "no input detected", not as an error.
    pub fn stop(self) -> Vec<AudioFrame> {
        self.pipeline.status.set_listening(false);
        self.pipeline.take_captured()
    }

    /// Convenience: start, wait out the timeout (or cancellation), stop.
    pub fn record(
        pipeline: Arc<CapturePipeline>,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Vec<AudioFrame> {
        let session = Self::start(pipeline, timeout);
        session.wait(cancel);
        session.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::{MockSpeechDetector, VoiceActivityClassifier};
    use crate::interrupt::{interrupt_channel, InterruptReceiver};

    fn pipeline_with(classifier: VoiceActivityClassifier) -> (Arc<CapturePipeline>, InterruptReceiver) {
        let (tx, rx) = interrupt_channel();
        (Arc::new(CapturePipeline::new(classifier, tx, 480)), rx)
    }

    fn speech_classifier() -> VoiceActivityClassifier {
        VoiceActivityClassifier::new(Box::new(MockSpeechDetector::always_speech()), 16000)
    }

    fn silence_classifier() -> VoiceActivityClassifier {
        VoiceActivityClassifier::new(
            Box::new(MockSpeechDetector::scripted(vec![Ok(false); 64])),
            16000,
        )
    }

    #[test]
    fn ingest_updates_level_metric() {
        let (pipeline, _rx) = pipeline_with(VoiceActivityClassifier::disabled());
        pipeline.ingest_block(&[0.5, -0.5, 0.5, -0.5]);
        assert!((pipeline.status().level() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn level_clamped_for_out_of_range_blocks() {
        let (pipeline, _rx) = pipeline_with(VoiceActivityClassifier::disabled());
        pipeline.ingest_block(&[100.0, -100.0]);
        assert_eq!(pipeline.status().level(), 1.0);
        pipeline.ingest_block(&[0.0; 16]);
        assert_eq!(pipeline.status().level(), 0.0);
    }

    #[test]
    fn blocks_are_only_captured_while_listening() {
        let (pipeline, _rx) = pipeline_with(VoiceActivityClassifier::disabled());
        pipeline.ingest_block(&[0.1; 100]); // before session: dropped

        let session = RecordingSession::start(Arc::clone(&pipeline), Duration::from_secs(5));
        pipeline.ingest_block(&[0.2; 100]);
        pipeline.ingest_block(&[0.3; 50]);
        let frames = session.stop();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 100);
        assert_eq!(frames[1].len(), 50);
        assert_eq!(frames[0].samples()[0], 0.2);

        pipeline.ingest_block(&[0.4; 100]); // after stop: dropped
        let session = RecordingSession::start(pipeline, Duration::from_secs(5));
        let frames = session.stop();
        assert!(frames.is_empty());
    }

    #[test]
    fn empty_session_returns_empty_frames_not_error() {
        let (pipeline, _rx) = pipeline_with(VoiceActivityClassifier::disabled());
        let frames =
            RecordingSession::record(pipeline, Duration::from_millis(20), &CancelToken::new());
        assert!(frames.is_empty());
    }

    #[test]
    fn record_honors_cancellation() {
        let (pipeline, _rx) = pipeline_with(VoiceActivityClassifier::disabled());
        let cancel = CancelToken::new();
        cancel.cancel();
        let start = Instant::now();
        let frames = RecordingSession::record(pipeline, Duration::from_secs(30), &cancel);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(frames.is_empty());
    }

    #[test]
    fn listening_flag_tracks_session_lifetime() {
        let (pipeline, _rx) = pipeline_with(VoiceActivityClassifier::disabled());
        let status = pipeline.status();
        assert!(!status.is_listening());
        let session = RecordingSession::start(Arc::clone(&pipeline), Duration::from_secs(5));
        assert!(status.is_listening());
        session.stop();
        assert!(!status.is_listening());
    }

    // Interrupt truth table: a signal is posted iff
    // speaking ∧ classifier available ∧ frame classified as speech.

    #[test]
    fn interrupt_posted_when_speaking_available_and_speech() {
        let (pipeline, rx) = pipeline_with(speech_classifier());
        pipeline.status().set_speaking(true);
        pipeline.ingest_block(&[0.5; 480]);
        assert!(rx.take());
    }

    #[test]
    fn no_interrupt_when_not_speaking() {
        let (pipeline, rx) = pipeline_with(speech_classifier());
        pipeline.ingest_block(&[0.5; 480]);
        assert!(!rx.take());
    }

    #[test]
    fn no_interrupt_when_classifier_unavailable() {
        let (pipeline, rx) = pipeline_with(VoiceActivityClassifier::disabled());
        pipeline.status().set_speaking(true);
        pipeline.ingest_block(&[0.5; 480]);
        assert!(!rx.take());
    }

    #[test]
    fn no_interrupt_when_frame_is_silence() {
        let (pipeline, rx) = pipeline_with(silence_classifier());
        pipeline.status().set_speaking(true);
        pipeline.ingest_block(&[0.0; 480]);
        assert!(!rx.take());
    }

    #[test]
    fn no_interrupt_before_a_full_frame_accumulates() {
        let (pipeline, rx) = pipeline_with(speech_classifier());
        pipeline.status().set_speaking(true);
        pipeline.ingest_block(&[0.5; 479]);
        assert!(!rx.take());
        pipeline.ingest_block(&[0.5; 1]); // completes the 480-sample frame
        assert!(rx.take());
    }

    #[test]
    fn at_most_one_interrupt_per_block() {
        let (pipeline, rx) = pipeline_with(speech_classifier());
        pipeline.status().set_speaking(true);
        // Four frames worth of audio in one block; producer stops at the
        // first speech frame.
        pipeline.ingest_block(&[0.5; 480 * 4]);
        assert!(rx.take());
        assert!(!rx.take());
    }

    #[test]
    fn stale_partial_frames_cleared_between_playbacks() {
        let (pipeline, rx) = pipeline_with(speech_classifier());
        let status = pipeline.status();

        status.set_speaking(true);
        pipeline.ingest_block(&[0.5; 300]); // partial frame
        status.set_speaking(false);
        pipeline.ingest_block(&[0.5; 100]); // not speaking: ignored

        status.set_speaking(true);
        // If the stale 300 samples survived, 180 more would complete a
        // frame here; a fresh playback must need a full 480.
        pipeline.ingest_block(&[0.5; 180]);
        assert!(!rx.take());
        pipeline.ingest_block(&[0.5; 300]);
        assert!(rx.take());
    }

    #[test]
    fn classifier_failures_during_playback_degrade_to_no_interrupts() {
        let file_err = crate::audio::vad::DetectorError::new("frame file unreadable");
        let detector = MockSpeechDetector::scripted(vec![
            Err(file_err.clone()),
            Err(file_err.clone()),
            Err(file_err),
        ]);
        let calls = detector.call_counter();
        let (pipeline, rx) =
            pipeline_with(VoiceActivityClassifier::new(Box::new(detector), 16000));
        pipeline.status().set_speaking(true);

        for _ in 0..3 {
            pipeline.ingest_block(&[0.5; 480]);
        }
        assert!(!rx.take());
        assert!(!pipeline.classifier_available());

        // Further playback audio is not even accumulated for a disabled
        // classifier.
        pipeline.ingest_block(&[0.5; 480]);
        assert!(!rx.take());
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 3);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
