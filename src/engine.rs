//! The conversation loop: listen, transcribe, generate, speak.
//!
//! `ConversationEngine` drives one duplex conversation. Each turn walks the
//! state machine Listening -> Transcribing -> Generating -> Speaking -> Idle;
//! observers follow along through the event channel. Turn failures are
//! contained by an error budget: the loop retries after a backoff until too
//! many consecutive turns fail, then stops with a diagnostic.

use crate::audio::capture::CaptureDevice;
use crate::audio::frames::concat_frames;
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::persist::PersistencePipeline;
use crate::playback::{PlaybackController, Synthesizer};
use crate::session::{CancelToken, CapturePipeline, RecordingSession};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Speech-to-text backend.
pub trait Transcriber: Send {
    /// Transcribe a WAV file on disk.
    fn transcribe_file(&mut self, path: &Path) -> Result<String>;

    /// Transcribe raw mono samples when no disk artifact exists.
    fn transcribe_samples(&mut self, samples: &[f32]) -> Result<String>;
}

/// Text generation backend.
pub trait Generator: Send {
    fn generate(&mut self, prompt: &str) -> Result<String>;
}

/// Where the conversation currently is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Listening,
    Transcribing,
    Generating,
    Speaking,
    /// The error budget is exhausted; the loop has stopped.
    Faulted,
}

/// Events emitted to observers as the conversation progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    StateChanged(ConversationState),
    /// Transcribed user input for one turn.
    UserTurn(String),
    /// Generated reply about to be spoken.
    AgentTurn(String),
    /// A listening window elapsed without usable input.
    NoInput,
    /// A recoverable or terminal problem, as display text.
    Diagnostic(String),
}

/// Consecutive-failure counter for the conversation loop.
struct ErrorBudget {
    consecutive: u32,
    max: u32,
}

impl ErrorBudget {
    fn new(max: u32) -> Self {
        Self {
            consecutive: 0,
            max,
        }
    }

    /// Record one failed turn; true when the budget is now exhausted.
    fn record(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.max
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }

    fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Build the generation prompt for one user turn.
///
/// When a document is attached, at most `DOCUMENT_CONTEXT_LIMIT` characters
/// of it are embedded, always followed by an ellipsis.
pub fn build_prompt(user_input: &str, document: Option<&str>) -> String {
    match document {
        Some(doc) => {
            let excerpt: String = doc.chars().take(defaults::DOCUMENT_CONTEXT_LIMIT).collect();
            format!("Document: {excerpt}...\n\nUser: {user_input}\nAssistant:")
        }
        None => format!("User: {user_input}\nAssistant:"),
    }
}

/// The pluggable backends one conversation needs.
pub struct Collaborators {
    pub transcriber: Box<dyn Transcriber>,
    pub generator: Box<dyn Generator>,
    pub synthesizer: Box<dyn Synthesizer>,
}

enum TurnOutcome {
    /// A full turn happened: input was heard and a reply was spoken
    /// (possibly cut short by a barge-in).
    Spoke,
    /// Nothing usable was heard this turn.
    NoInput,
}

/// Drives the conversation loop over a capture pipeline, a playback
/// controller, and the collaborator backends.
pub struct ConversationEngine {
    config: Config,
    pipeline: Arc<CapturePipeline>,
    capture: Box<dyn CaptureDevice>,
    playback: PlaybackController,
    persistence: PersistencePipeline,
    collaborators: Collaborators,
    document_context: Option<String>,
    cancel: CancelToken,
    state: ConversationState,
    events: Sender<ConversationEvent>,
}

impl ConversationEngine {
    /// Wire up an engine. The returned receiver observes state changes,
    /// turns, and diagnostics; dropping it is harmless.
    pub fn new(
        config: Config,
        pipeline: Arc<CapturePipeline>,
        capture: Box<dyn CaptureDevice>,
        playback: PlaybackController,
        persistence: PersistencePipeline,
        collaborators: Collaborators,
    ) -> (Self, Receiver<ConversationEvent>) {
        let (events, receiver) = unbounded();
        let engine = Self {
            config,
            pipeline,
            capture,
            playback,
            persistence,
            collaborators,
            document_context: None,
            cancel: CancelToken::new(),
            state: ConversationState::Idle,
            events,
        };
        (engine, receiver)
    }

    /// Attach a document whose opening excerpt is embedded in every prompt.
    pub fn with_document_context(mut self, document: impl Into<String>) -> Self {
        self.document_context = Some(document.into());
        self
    }

    /// Token that stops the loop at the next turn boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Check the audio environment before a run: temp-dir writability for
    /// the persistence primary tier, and a probe of the voice activity
    /// classifier (disabling it if the probe fails). Returns warnings
    /// instead of failing; a degraded run is still a run.
    pub fn preflight(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(problem) = self.persistence.check_temp_writable() {
            warnings.push(problem);
        }
        if !self.pipeline.probe_classifier() {
            warnings
                .push("voice activity detection unavailable; barge-in is disabled".to_string());
        }
        for warning in &warnings {
            warn!("{warning}");
            self.emit(ConversationEvent::Diagnostic(warning.clone()));
        }
        warnings
    }

    /// Run the conversation until cancelled or the error budget runs out.
    ///
    /// Capture is started first and stopped on every exit path. A failed
    /// greeting is reported but does not count against the budget.
    pub fn run(&mut self) -> Result<()> {
        self.capture.start()?;
        self.greet();
        let result = self.conversation_loop();
        if let Err(e) = self.capture.stop() {
            warn!(error = %e, "failed to stop audio capture");
        }
        result
    }

    fn greet(&mut self) {
        let greeting = self.config.conversation.greeting.clone();
        if greeting.is_empty() || self.cancel.is_cancelled() {
            return;
        }
        self.set_state(ConversationState::Speaking);
        let spoken = self
            .playback
            .speak(self.collaborators.synthesizer.as_mut(), &greeting);
        if let Err(e) = spoken {
            warn!(error = %e, "greeting failed");
            self.emit(ConversationEvent::Diagnostic(e.to_string()));
        }
        self.set_state(ConversationState::Idle);
    }

    fn conversation_loop(&mut self) -> Result<()> {
        let mut budget = ErrorBudget::new(self.config.conversation.max_consecutive_errors);
        let backoff = Duration::from_millis(self.config.conversation.error_backoff_ms);

        while !self.cancel.is_cancelled() {
            match self.run_turn() {
                Ok(TurnOutcome::Spoke) => budget.reset(),
                Ok(TurnOutcome::NoInput) => {}
                Err(e) => {
                    warn!(error = %e, "turn failed");
                    self.emit(ConversationEvent::Diagnostic(e.to_string()));
                    if budget.record() {
                        self.set_state(ConversationState::Faulted);
                        let terminal = TalkbackError::BudgetExhausted {
                            failures: budget.consecutive(),
                        };
                        self.emit(ConversationEvent::Diagnostic(terminal.to_string()));
                        return Err(terminal);
                    }
                    self.set_state(ConversationState::Idle);
                    if !self.cancel.is_cancelled() {
                        thread::sleep(backoff);
                    }
                }
            }
        }
        info!("conversation cancelled");
        self.set_state(ConversationState::Idle);
        Ok(())
    }

    fn run_turn(&mut self) -> Result<TurnOutcome> {
        self.set_state(ConversationState::Listening);
        let frames = RecordingSession::record(
            Arc::clone(&self.pipeline),
            Duration::from_millis(self.config.conversation.listen_timeout_ms),
            &self.cancel,
        );
        if frames.is_empty() {
            self.set_state(ConversationState::Idle);
            self.emit(ConversationEvent::NoInput);
            return Ok(TurnOutcome::NoInput);
        }

        self.set_state(ConversationState::Transcribing);
        let samples = concat_frames(&frames);
        let persisted = self.persistence.persist(samples);
        let text = match persisted.path() {
            Some(path) => self.collaborators.transcriber.transcribe_file(path)?,
            None => self
                .collaborators
                .transcriber
                .transcribe_samples(persisted.samples().unwrap_or(&[]))?,
        };
        // Delete the audio artifact as soon as transcription is done.
        drop(persisted);

        let text = text.trim().to_string();
        if text.is_empty() {
            self.set_state(ConversationState::Idle);
            self.emit(ConversationEvent::NoInput);
            return Ok(TurnOutcome::NoInput);
        }
        self.emit(ConversationEvent::UserTurn(text.clone()));

        self.set_state(ConversationState::Generating);
        let prompt = build_prompt(&text, self.document_context.as_deref());
        let reply = self.collaborators.generator.generate(&prompt)?;
        self.emit(ConversationEvent::AgentTurn(reply.clone()));

        self.set_state(ConversationState::Speaking);
        // A barge-in abort is still a completed turn.
        self.playback
            .speak(self.collaborators.synthesizer.as_mut(), &reply)?;

        self.set_state(ConversationState::Idle);
        Ok(TurnOutcome::Spoke)
    }

    fn set_state(&mut self, state: ConversationState) {
        if self.state != state {
            self.state = state;
            self.emit(ConversationEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ConversationEvent) {
        // The receiver may be gone; events are best-effort.
        let _ = self.events.send(event);
    }
}

/// Mock transcriber for testing.
///
/// Cycles through configured responses and records how each recording was
/// handed over (file path and whether it existed, or in-memory samples).
pub struct MockTranscriber {
    responses: Vec<String>,
    position: usize,
    failure: Option<String>,
    seen_files: Arc<std::sync::Mutex<Vec<(std::path::PathBuf, bool)>>>,
    memory_calls: Arc<std::sync::atomic::AtomicU32>,
}

impl MockTranscriber {
    /// Transcriber that returns `text` for every recording.
    pub fn with_response(text: impl Into<String>) -> Self {
        Self::with_responses(vec![text.into()])
    }

    /// Transcriber returning the responses in order, repeating the last.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses,
            position: 0,
            failure: None,
            seen_files: Arc::new(std::sync::Mutex::new(Vec::new())),
            memory_calls: Arc::new(std::sync::atomic::AtomicU32::new(0)),
        }
    }

    /// Transcriber that fails every call with the given message.
    pub fn failing(message: impl Into<String>) -> Self {
        let mut mock = Self::with_responses(Vec::new());
        mock.failure = Some(message.into());
        mock
    }

    /// Files received by `transcribe_file`, with their existence at call
    /// time.
    pub fn seen_files(&self) -> Arc<std::sync::Mutex<Vec<(std::path::PathBuf, bool)>>> {
        Arc::clone(&self.seen_files)
    }

    /// Number of `transcribe_samples` calls.
    pub fn memory_call_counter(&self) -> Arc<std::sync::atomic::AtomicU32> {
        Arc::clone(&self.memory_calls)
    }

    fn next_response(&mut self) -> Result<String> {
        if let Some(message) = &self.failure {
            return Err(TalkbackError::Transcription {
                message: message.clone(),
            });
        }
        if self.responses.is_empty() {
            return Ok(String::new());
        }
        let index = self.position.min(self.responses.len() - 1);
        self.position += 1;
        Ok(self.responses[index].clone())
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe_file(&mut self, path: &Path) -> Result<String> {
        if let Ok(mut seen) = self.seen_files.lock() {
            seen.push((path.to_path_buf(), path.exists()));
        }
        self.next_response()
    }

    fn transcribe_samples(&mut self, _samples: &[f32]) -> Result<String> {
        self.memory_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.next_response()
    }
}

/// Mock generator for testing.
pub struct MockGenerator {
    response: String,
    failure: Option<String>,
    prompts: Arc<std::sync::Mutex<Vec<String>>>,
}

impl MockGenerator {
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            failure: None,
            prompts: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: String::new(),
            failure: Some(message.into()),
            prompts: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Arc<std::sync::Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

impl Generator for MockGenerator {
    fn generate(&mut self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        match &self.failure {
            Some(message) => Err(TalkbackError::Generation {
                message: message.clone(),
            }),
            None => Ok(self.response.clone()),
        }
    }
}
