//! Synthesized speech playback with a barge-in kill switch.
//!
//! `PlaybackController` owns the consumer half of the interrupt channel.
//! While audio plays it polls for interrupt tokens and for device
//! completion; a token stops the device immediately and the playback
//! resolves to `Aborted`. Both outcomes are ordinary control flow, not
//! errors.
//!
//! The shared speaking flag is raised for the whole synthesize-and-play
//! span and cleared on every exit path by an RAII guard, so the capture
//! side can never be left classifying frames against a playback that
//! already ended.

use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::interrupt::InterruptReceiver;
use crate::session::SharedStatus;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How a playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The audio played to its natural end.
    Completed,
    /// The user barged in and playback was cut short.
    Aborted,
}

/// Output of a speech synthesizer.
pub enum SpokenAudio {
    /// Mono samples to play through the playback device.
    Waveform(Vec<f32>),
    /// The synthesizer performed the audio itself (e.g. a system TTS
    /// utility); there is nothing for the device to play.
    Performed,
}

/// Text-to-speech backend.
pub trait Synthesizer: Send {
    fn synthesize(&mut self, text: &str) -> Result<SpokenAudio>;
}

/// Audio output device abstraction.
///
/// `start` must return promptly and play in the background; `stop` must cut
/// the audio immediately.
pub trait PlaybackDevice: Send {
    fn start(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<()>;
    fn is_finished(&self) -> bool;
    fn stop(&mut self);
}

/// Raises the speaking flag for a scope, clearing it on drop.
struct SpeakingGuard {
    status: Arc<SharedStatus>,
}

impl SpeakingGuard {
    fn raise(status: Arc<SharedStatus>) -> Self {
        status.set_speaking(true);
        Self { status }
    }
}

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        self.status.set_speaking(false);
    }
}

/// Plays synthesized speech, watching for barge-in interrupts.
pub struct PlaybackController {
    device: Box<dyn PlaybackDevice>,
    interrupts: InterruptReceiver,
    status: Arc<SharedStatus>,
    sample_rate: u32,
    poll_interval: Duration,
}

impl PlaybackController {
    pub fn new(
        device: Box<dyn PlaybackDevice>,
        interrupts: InterruptReceiver,
        status: Arc<SharedStatus>,
        sample_rate: u32,
    ) -> Self {
        Self {
            device,
            interrupts,
            status,
            sample_rate,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Synthesize `text` and play it, watching for interrupts throughout.
    ///
    /// Interrupt tokens left over from a previous playback are discarded
    /// before the speaking flag goes up; only barge-ins against *this*
    /// playback can abort it.
    pub fn speak(
        &mut self,
        synthesizer: &mut dyn Synthesizer,
        text: &str,
    ) -> Result<PlaybackOutcome> {
        self.interrupts.drain();
        let _guard = SpeakingGuard::raise(Arc::clone(&self.status));

        match synthesizer.synthesize(text)? {
            SpokenAudio::Waveform(samples) => self.play(samples),
            SpokenAudio::Performed => Ok(PlaybackOutcome::Completed),
        }
    }

    fn play(&mut self, samples: Vec<f32>) -> Result<PlaybackOutcome> {
        self.device.start(samples, self.sample_rate)?;
        loop {
            if self.interrupts.take() {
                self.device.stop();
                return Ok(PlaybackOutcome::Aborted);
            }
            if self.device.is_finished() {
                return Ok(PlaybackOutcome::Completed);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(feature = "device")]
mod rodio_backend {
    use super::*;
    use rodio::buffer::SamplesBuffer;
    use rodio::{OutputStream, Sink};

    struct SendableStream(OutputStream);

    /// SAFETY: the stream handle is only kept alive to hold the output
    /// device open. It is never accessed after construction, so moving it
    /// across threads is sound.
    unsafe impl Send for SendableStream {}

    /// Playback through the default system output device.
    pub struct RodioPlayback {
        _stream: SendableStream,
        sink: Sink,
    }

    impl RodioPlayback {
        pub fn new() -> Result<Self> {
            let (stream, handle) =
                OutputStream::try_default().map_err(|e| TalkbackError::Playback {
                    message: e.to_string(),
                })?;
            let sink = Sink::try_new(&handle).map_err(|e| TalkbackError::Playback {
                message: e.to_string(),
            })?;
            Ok(Self {
                _stream: SendableStream(stream),
                sink,
            })
        }
    }

    impl PlaybackDevice for RodioPlayback {
        fn start(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
            self.sink.append(SamplesBuffer::new(1, sample_rate, samples));
            self.sink.play();
            Ok(())
        }

        fn is_finished(&self) -> bool {
            self.sink.empty()
        }

        fn stop(&mut self) {
            self.sink.stop();
        }
    }
}

#[cfg(feature = "device")]
pub use rodio_backend::RodioPlayback;

/// Mock playback device for testing.
///
/// Reports finished after a configured number of `is_finished` polls and
/// records starts and stops through shared handles.
pub struct MockPlaybackDevice {
    remaining_polls: std::sync::atomic::AtomicU32,
    started: Arc<std::sync::atomic::AtomicU32>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
    fail_start: bool,
}

impl MockPlaybackDevice {
    pub fn new(polls_until_done: u32) -> Self {
        Self {
            remaining_polls: std::sync::atomic::AtomicU32::new(polls_until_done),
            started: Arc::new(std::sync::atomic::AtomicU32::new(0)),
            stopped: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            fail_start: false,
        }
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn start_counter(&self) -> Arc<std::sync::atomic::AtomicU32> {
        Arc::clone(&self.started)
    }

    pub fn stop_flag(&self) -> Arc<std::sync::atomic::AtomicBool> {
        Arc::clone(&self.stopped)
    }
}

impl PlaybackDevice for MockPlaybackDevice {
    fn start(&mut self, _samples: Vec<f32>, _sample_rate: u32) -> Result<()> {
        if self.fail_start {
            return Err(TalkbackError::Playback {
                message: "mock device refused to start".to_string(),
            });
        }
        self.started
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        let remaining = self
            .remaining_polls
            .load(std::sync::atomic::Ordering::Relaxed);
        if remaining == 0 {
            return true;
        }
        self.remaining_polls
            .store(remaining - 1, std::sync::atomic::Ordering::Relaxed);
        false
    }

    fn stop(&mut self) {
        self.stopped
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

/// Mock synthesizer for testing.
pub struct MockSynthesizer {
    results: Vec<Result<SpokenAudio>>,
    spoken: Arc<std::sync::Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    /// Synthesizer producing a short waveform for every request.
    pub fn waveform() -> Self {
        Self {
            results: Vec::new(),
            spoken: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Synthesizer returning the scripted results in order, then waveforms.
    pub fn scripted(results: Vec<Result<SpokenAudio>>) -> Self {
        Self {
            results,
            spoken: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Texts passed to `synthesize`, in call order.
    pub fn spoken_texts(&self) -> Arc<std::sync::Mutex<Vec<String>>> {
        Arc::clone(&self.spoken)
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<SpokenAudio> {
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(text.to_string());
        }
        if self.results.is_empty() {
            Ok(SpokenAudio::Waveform(vec![0.1; 160]))
        } else {
            self.results.remove(0)
        }
    }
}
