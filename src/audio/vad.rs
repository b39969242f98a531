//! Voice activity classification over fixed-duration frames.
//!
//! Wraps the WebRTC voice activity detector behind a trait seam so tests can
//! swap implementations. The classifier degrades rather than crashes: after
//! repeated format-related detector errors it permanently disables itself
//! and reports every frame as non-speech. Losing interrupt detection is
//! preferable to taking down the capture path.

use crate::audio::frames::{quantize_i16, AudioFrame};
use crate::defaults;
use tracing::warn;
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Error raised by a speech detector backend.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DetectorError {
    message: String,
}

impl DetectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Whether the error points at malformed input rather than a transient
    /// fault. These are the errors that justify disabling classification.
    pub fn is_format_related(&self) -> bool {
        let lower = self.message.to_lowercase();
        lower.contains("file") || lower.contains("format") || lower.contains("frame")
    }
}

/// Trait for binary speech/silence detection on one PCM frame.
///
/// This trait allows swapping implementations (real WebRTC VAD vs mock).
pub trait SpeechDetector: Send {
    /// Classify one frame of 16-bit PCM as speech or non-speech.
    fn is_speech(
        &mut self,
        pcm: &[i16],
        sample_rate: u32,
    ) -> std::result::Result<bool, DetectorError>;
}

/// WebRTC voice activity detector at the most aggressive filtering level.
pub struct WebRtcDetector {
    vad: Vad,
}

/// SAFETY: the detector wraps plain C state with no thread affinity. It is
/// only ever accessed with exclusive ownership (behind the classifier, which
/// the capture pipeline guards with a Mutex), so moving it across threads is
/// sound.
unsafe impl Send for WebRtcDetector {}

impl WebRtcDetector {
    pub fn new() -> Self {
        let mut vad = Vad::new();
        vad.set_mode(VadMode::VeryAggressive);
        vad.set_sample_rate(SampleRate::Rate16kHz);
        Self { vad }
    }
}

impl Default for WebRtcDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechDetector for WebRtcDetector {
    fn is_speech(
        &mut self,
        pcm: &[i16],
        _sample_rate: u32,
    ) -> std::result::Result<bool, DetectorError> {
        self.vad.is_voice_segment(pcm).map_err(|_| {
            DetectorError::new(format!(
                "voice segment check rejected frame of {} samples",
                pcm.len()
            ))
        })
    }
}

/// Voice activity classifier with an explicit availability capability.
///
/// `None` means classification is off (either never configured or disabled
/// after repeated errors); every call then short-circuits to "not speech"
/// without touching a detector.
pub struct VoiceActivityClassifier {
    detector: Option<Box<dyn SpeechDetector>>,
    sample_rate: u32,
    strikes: u32,
}

impl VoiceActivityClassifier {
    pub fn new(detector: Box<dyn SpeechDetector>, sample_rate: u32) -> Self {
        Self {
            detector: Some(detector),
            sample_rate,
            strikes: 0,
        }
    }

    /// Classifier backed by the WebRTC detector at 16kHz.
    pub fn webrtc() -> Self {
        Self::new(Box::new(WebRtcDetector::new()), defaults::SAMPLE_RATE)
    }

    /// A classifier with no backend; every frame is non-speech.
    pub fn disabled() -> Self {
        Self {
            detector: None,
            sample_rate: defaults::SAMPLE_RATE,
            strikes: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.detector.is_some()
    }

    /// Classify one frame. Quantizes to 16-bit PCM before detection.
    ///
    /// Format-related detector errors accumulate; after
    /// `MAX_CLASSIFIER_STRIKES` consecutive ones the classifier disables
    /// itself for the rest of the process. A successful classification
    /// resets the strike count.
    pub fn classify(&mut self, frame: &AudioFrame) -> bool {
        let Some(detector) = self.detector.as_mut() else {
            return false;
        };

        let pcm = quantize_i16(frame.samples());
        match detector.is_speech(&pcm, self.sample_rate) {
            Ok(speech) => {
                self.strikes = 0;
                speech
            }
            Err(e) => {
                warn!(error = %e, "voice activity check failed");
                if e.is_format_related() {
                    self.strikes += 1;
                    if self.strikes >= defaults::MAX_CLASSIFIER_STRIKES {
                        warn!("disabling voice activity detection after repeated format errors");
                        self.detector = None;
                    }
                }
                false
            }
        }
    }

    /// Probe the detector with one frame of silence, disabling it if the
    /// probe fails. Used by the preflight check before a conversation run.
    pub fn probe(&mut self) -> bool {
        if self.detector.is_none() {
            return false;
        }
        let frame_len = defaults::frame_samples(self.sample_rate, defaults::FRAME_DURATION_MS);
        let silence = AudioFrame::from_block(&vec![0.0f32; frame_len]);
        let Some(detector) = self.detector.as_mut() else {
            return false;
        };
        let pcm = quantize_i16(silence.samples());
        match detector.is_speech(&pcm, self.sample_rate) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "voice activity probe failed, disabling detection");
                self.detector = None;
                false
            }
        }
    }
}

/// Mock speech detector for testing.
pub struct MockSpeechDetector {
    results: Vec<std::result::Result<bool, DetectorError>>,
    position: usize,
    calls: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

impl MockSpeechDetector {
    /// Detector that always reports speech.
    pub fn always_speech() -> Self {
        Self::scripted(Vec::new())
    }

    /// Detector returning the scripted results in order, then speech.
    pub fn scripted(results: Vec<std::result::Result<bool, DetectorError>>) -> Self {
        Self {
            results,
            position: 0,
            calls: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0)),
        }
    }

    /// Shared invocation counter, usable after the detector is boxed.
    pub fn call_counter(&self) -> std::sync::Arc<std::sync::atomic::AtomicU32> {
        std::sync::Arc::clone(&self.calls)
    }
}

impl SpeechDetector for MockSpeechDetector {
    fn is_speech(
        &mut self,
        _pcm: &[i16],
        _sample_rate: u32,
    ) -> std::result::Result<bool, DetectorError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if self.position < self.results.len() {
            let result = self.results[self.position].clone();
            self.position += 1;
            result
        } else {
            Ok(true)
        }
    }
}
