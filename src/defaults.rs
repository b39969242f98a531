//! Default configuration constants for talkback.
//!
//! Shared across configuration types and component constructors to keep the
//! audio format assumptions in one place.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and is one of the rates the
/// WebRTC voice activity detector accepts.
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of one voice-activity frame in milliseconds.
///
/// The WebRTC detector requires 10ms, 20ms or 30ms frames; 30ms gives the
/// most context per decision.
pub const FRAME_DURATION_MS: u32 = 30;

/// Number of samples in one voice-activity frame.
///
/// 480 samples for the default 16kHz / 30ms configuration.
pub const fn frame_samples(sample_rate: u32, frame_duration_ms: u32) -> usize {
    (sample_rate as usize * frame_duration_ms as usize) / 1000
}

/// Default listening timeout in milliseconds for one recording session.
pub const LISTEN_TIMEOUT_MS: u64 = 10_000;

/// Maximum consecutive turn failures before the conversation loop stops.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Pause between retries after a failed turn, in milliseconds.
pub const ERROR_BACKOFF_MS: u64 = 1000;

/// Sleep interval for worker-side polling loops (recording wait, playback).
pub const POLL_INTERVAL_MS: u64 = 10;

/// Consecutive format-related detector errors before voice activity
/// detection disables itself for the rest of the process.
pub const MAX_CLASSIFIER_STRIKES: u32 = 3;

/// Maximum number of document characters embedded into a generation prompt.
pub const DOCUMENT_CONTEXT_LIMIT: usize = 500;

/// Directory name under the user's documents for the secondary
/// persistence tier.
pub const FALLBACK_DIR_NAME: &str = "talkback";

/// Fixed file name used by the secondary persistence tier.
pub const FALLBACK_FILE_NAME: &str = "recording.wav";

/// Greeting spoken before the first conversation turn.
pub const GREETING: &str = "Hello! I'm your study buddy. How can I help you today?";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_samples_matches_16khz_30ms() {
        assert_eq!(frame_samples(SAMPLE_RATE, FRAME_DURATION_MS), 480);
    }

    #[test]
    fn frame_samples_other_rates() {
        assert_eq!(frame_samples(8000, 30), 240);
        assert_eq!(frame_samples(16000, 10), 160);
        assert_eq!(frame_samples(48000, 20), 960);
    }
}
