//! talkback - real-time duplex voice turn-taking engine.
//!
//! One microphone stream serves two consumers at once: while the engine is
//! listening, captured audio accumulates for transcription; while it is
//! speaking, the same stream is scanned for the user's voice so a barge-in
//! can cut the reply short. The conversation loop wires transcription,
//! text generation, and speech synthesis backends behind trait seams, so
//! the whole turn cycle runs headless in tests.
//!
//! Enable the `device` feature for real hardware capture (cpal) and
//! playback (rodio); the default build is hardware-free.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod interrupt;
pub mod persist;
pub mod playback;
pub mod session;

pub use audio::capture::{CaptureDevice, MockCaptureDevice};
pub use audio::frames::{concat_frames, mean_abs_level, quantize_i16, AudioFrame, FrameAccumulator};
pub use audio::vad::{
    DetectorError, MockSpeechDetector, SpeechDetector, VoiceActivityClassifier, WebRtcDetector,
};
pub use config::Config;
pub use engine::{
    build_prompt, Collaborators, ConversationEngine, ConversationEvent, ConversationState,
    Generator, MockGenerator, MockTranscriber, Transcriber,
};
pub use error::{Result, TalkbackError};
pub use interrupt::{interrupt_channel, InterruptReceiver, InterruptSender, InterruptSignal};
pub use persist::{PersistedAudio, PersistencePipeline};
pub use playback::{
    MockPlaybackDevice, MockSynthesizer, PlaybackController, PlaybackDevice, PlaybackOutcome,
    SpokenAudio, Synthesizer,
};
pub use session::{CancelToken, CapturePipeline, RecordingSession, SharedStatus};

#[cfg(feature = "device")]
pub use audio::capture::CpalCapture;
#[cfg(feature = "device")]
pub use playback::RodioPlayback;
