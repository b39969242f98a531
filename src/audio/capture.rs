//! Microphone capture feeding the capture pipeline.
//!
//! The device abstraction is deliberately thin: a capture device starts
//! pushing sample blocks into a `CapturePipeline` and stops on request.
//! All routing decisions live in the pipeline, so the hardware backend and
//! the test backend share the exact same downstream behavior.

use crate::error::{Result, TalkbackError};
use crate::session::CapturePipeline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A source of mono float sample blocks.
pub trait CaptureDevice: Send {
    /// Begin delivering blocks to the pipeline. Returns once capture is
    /// running in the background.
    fn start(&mut self) -> Result<()>;

    /// Stop delivering blocks. Idempotent.
    fn stop(&mut self) -> Result<()>;
}

#[cfg(feature = "device")]
mod cpal_backend {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::warn;

    struct SendableStream(cpal::Stream);

    /// SAFETY: the stream is only played on construction and dropped on
    /// stop; it is never accessed concurrently from two threads.
    unsafe impl Send for SendableStream {}

    /// Capture from a system input device through cpal.
    pub struct CpalCapture {
        pipeline: Arc<CapturePipeline>,
        device_name: Option<String>,
        sample_rate: u32,
        stream: Option<SendableStream>,
    }

    impl CpalCapture {
        /// Capture from the named input device, or the system default when
        /// `device_name` is `None`.
        pub fn new(
            pipeline: Arc<CapturePipeline>,
            device_name: Option<String>,
            sample_rate: u32,
        ) -> Self {
            Self {
                pipeline,
                device_name,
                sample_rate,
                stream: None,
            }
        }

        fn find_device(&self) -> Result<cpal::Device> {
            let host = cpal::default_host();
            match &self.device_name {
                None => host
                    .default_input_device()
                    .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
                        device: "default".to_string(),
                    }),
                Some(name) => {
                    let mut devices =
                        host.input_devices()
                            .map_err(|e| TalkbackError::AudioCapture {
                                message: e.to_string(),
                            })?;
                    devices
                        .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                        .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
                            device: name.clone(),
                        })
                }
            }
        }
    }

    impl CaptureDevice for CpalCapture {
        fn start(&mut self) -> Result<()> {
            if self.stream.is_some() {
                return Ok(());
            }
            let device = self.find_device()?;
            let config = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(self.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let pipeline = Arc::clone(&self.pipeline);
            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        pipeline.ingest_block(data);
                    },
                    // Stream errors are reported, not fatal; the
                    // conversation loop keeps running on whatever blocks
                    // still arrive.
                    |err| warn!(error = %err, "audio capture stream error"),
                    None,
                )
                .map_err(|e| TalkbackError::AudioCapture {
                    message: e.to_string(),
                })?;
            stream.play().map_err(|e| TalkbackError::AudioCapture {
                message: e.to_string(),
            })?;
            self.stream = Some(SendableStream(stream));
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            // Dropping the stream stops capture.
            self.stream = None;
            Ok(())
        }
    }
}

#[cfg(feature = "device")]
pub use cpal_backend::CpalCapture;

/// Mock capture device for testing.
///
/// Plays scripted blocks into the pipeline from a background thread,
/// mimicking a real device callback cadence.
pub struct MockCaptureDevice {
    pipeline: Arc<CapturePipeline>,
    blocks: Vec<Vec<f32>>,
    interval: std::time::Duration,
    repeat: bool,
    fail_start: bool,
    stop_flag: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl MockCaptureDevice {
    pub fn new(pipeline: Arc<CapturePipeline>, blocks: Vec<Vec<f32>>) -> Self {
        Self {
            pipeline,
            blocks,
            interval: std::time::Duration::from_millis(1),
            repeat: false,
            fail_start: false,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Delay between delivered blocks.
    pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Cycle through the scripted blocks until stopped instead of
    /// delivering them once.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(TalkbackError::AudioCapture {
                message: "mock device refused to start".to_string(),
            });
        }
        if self.worker.is_some() {
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::Relaxed);
        let pipeline = Arc::clone(&self.pipeline);
        let blocks = self.blocks.clone();
        let interval = self.interval;
        let repeat = self.repeat;
        let stop_flag = Arc::clone(&self.stop_flag);
        self.worker = Some(std::thread::spawn(move || loop {
            if stop_flag.load(Ordering::Relaxed) {
                return;
            }
            for block in &blocks {
                if stop_flag.load(Ordering::Relaxed) {
                    return;
                }
                pipeline.ingest_block(block);
                std::thread::sleep(interval);
            }
            if blocks.is_empty() {
                // A silent microphone still idles until stopped.
                std::thread::sleep(interval);
            }
            if !repeat {
                return;
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }
}

impl Drop for MockCaptureDevice {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
