//! Error types for talkback.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TalkbackError {
    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    // Voice activity classification errors
    #[error("Voice activity classification failed: {message}")]
    Classifier { message: String },

    // Persistence tier errors (recovered internally by tier fallthrough)
    #[error("Failed to persist recording: {message}")]
    Persistence { message: String },

    // Collaborator errors (abort the current turn, count against the budget)
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Text generation failed: {message}")]
    Generation { message: String },

    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    // Terminal: the error budget is exhausted and the loop has stopped
    #[error(
        "Stopping after {failures} consecutive turn failures; \
         run the audio environment diagnostics to troubleshoot"
    )]
    BudgetExhausted { failures: u32 },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TalkbackError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_audio_device_not_found_display() {
        let error = TalkbackError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_audio_capture_display() {
        let error = TalkbackError::AudioCapture {
            message: "stream died".to_string(),
        };
        assert_eq!(error.to_string(), "Audio capture failed: stream died");
    }

    #[test]
    fn test_persistence_display() {
        let error = TalkbackError::Persistence {
            message: "temp dir unwritable".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to persist recording: temp dir unwritable"
        );
    }

    #[test]
    fn test_budget_exhausted_display_mentions_diagnostics() {
        let error = TalkbackError::BudgetExhausted { failures: 3 };
        let message = error.to_string();
        assert!(message.contains("3 consecutive turn failures"));
        assert!(message.contains("diagnostics"));
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: TalkbackError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: TalkbackError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<TalkbackError>();
        assert_sync::<TalkbackError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
