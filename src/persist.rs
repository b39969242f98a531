//! Tiered persistence for captured audio.
//!
//! A finished recording is handed to collaborators either as a WAV file on
//! disk or as raw samples in memory. Three tiers are tried in order:
//!
//! 1. a unique temporary file (preferred, self-cleaning),
//! 2. a fixed path under the user's documents directory,
//! 3. in-memory samples (always succeeds).
//!
//! A tier failure is logged and falls through to the next tier; `persist`
//! itself is infallible. Disk artifacts are deleted when the returned
//! `PersistedAudio` is dropped, so audio never outlives the turn that
//! produced it.

use crate::audio::frames::quantize_i16;
use crate::defaults;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// A persisted recording, in whichever tier accepted it.
pub enum PersistedAudio {
    /// Primary tier: unique temp file, deleted on drop by `NamedTempFile`.
    TempFile(NamedTempFile),
    /// Secondary tier: fixed fallback path, deleted on drop.
    Fallback(FallbackArtifact),
    /// Tertiary tier: raw samples, nothing on disk.
    Memory(Vec<f32>),
}

impl PersistedAudio {
    /// On-disk path of the artifact, if any tier wrote one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::TempFile(file) => Some(file.path()),
            Self::Fallback(artifact) => Some(&artifact.path),
            Self::Memory(_) => None,
        }
    }

    /// Raw samples, if the recording stayed in memory.
    pub fn samples(&self) -> Option<&[f32]> {
        match self {
            Self::Memory(samples) => Some(samples),
            _ => None,
        }
    }
}

/// WAV file at the fixed fallback path, removed when dropped.
pub struct FallbackArtifact {
    path: PathBuf,
}

impl Drop for FallbackArtifact {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove fallback recording");
        }
    }
}

/// Writes finished recordings through the persistence tiers.
pub struct PersistencePipeline {
    temp_dir: Option<PathBuf>,
    fallback_dir: PathBuf,
    sample_rate: u32,
}

impl PersistencePipeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            temp_dir: None,
            fallback_dir: default_fallback_dir(),
            sample_rate,
        }
    }

    /// Override the directory for the primary (temp file) tier. The system
    /// temp directory is used when unset.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Override the directory for the secondary (fixed path) tier.
    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = dir.into();
        self
    }

    /// Persist a recording, falling through tiers until one accepts it.
    /// The in-memory tier cannot fail, so this always produces a result.
    pub fn persist(&self, samples: Vec<f32>) -> PersistedAudio {
        let pcm = quantize_i16(&samples);

        match self.persist_temp(&pcm) {
            Ok(file) => {
                debug!(path = %file.path().display(), "recording persisted to temp file");
                return PersistedAudio::TempFile(file);
            }
            Err(e) => {
                warn!(error = %e, "temp file tier failed, trying fallback path");
            }
        }

        match self.persist_fallback(&pcm) {
            Ok(artifact) => {
                debug!(path = %artifact.path.display(), "recording persisted to fallback path");
                return PersistedAudio::Fallback(artifact);
            }
            Err(e) => {
                warn!(error = %e, "fallback tier failed, keeping recording in memory");
            }
        }

        PersistedAudio::Memory(samples)
    }

    /// Check that the primary tier is writable; a description of the
    /// problem when it is not.
    pub fn check_temp_writable(&self) -> Option<String> {
        let result = match &self.temp_dir {
            Some(dir) => tempfile::Builder::new().prefix("talkback-").tempfile_in(dir),
            None => tempfile::Builder::new().prefix("talkback-").tempfile(),
        };
        result
            .err()
            .map(|e| format!("temp directory not writable: {e}"))
    }

    fn persist_temp(&self, pcm: &[i16]) -> Result<NamedTempFile, hound::Error> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("talkback-").suffix(".wav");
            b
        };
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        write_wav(file.as_file_mut(), pcm, self.sample_rate)?;
        Ok(file)
    }

    fn persist_fallback(&self, pcm: &[i16]) -> Result<FallbackArtifact, hound::Error> {
        std::fs::create_dir_all(&self.fallback_dir)?;
        let path = self.fallback_dir.join(defaults::FALLBACK_FILE_NAME);
        let mut writer = WavWriter::create(&path, wav_spec(self.sample_rate))?;
        for &sample in pcm {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(FallbackArtifact { path })
    }
}

fn default_fallback_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Documents")))
        .unwrap_or_else(std::env::temp_dir)
        .join(defaults::FALLBACK_DIR_NAME)
}

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn write_wav<W: Write + Seek>(
    writer: W,
    pcm: &[i16],
    sample_rate: u32,
) -> Result<(), hound::Error> {
    let mut wav = WavWriter::new(writer, wav_spec(sample_rate))?;
    for &sample in pcm {
        wav.write_sample(sample)?;
    }
    wav.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;

    fn pipeline_in(dir: &Path) -> PersistencePipeline {
        PersistencePipeline::new(16000)
            .with_temp_dir(dir)
            .with_fallback_dir(dir.join("fallback"))
    }

    #[test]
    fn primary_tier_writes_a_readable_wav() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let persisted = pipeline.persist(vec![0.0, 0.5, -0.5, 1.0]);

        let path = persisted.path().expect("primary tier writes to disk");
        assert!(path.starts_with(dir.path()));
        assert!(persisted.samples().is_none());

        let mut reader = WavReader::open(path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, -16383, 32767]);
    }

    #[test]
    fn primary_artifact_is_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let persisted = pipeline.persist(vec![0.1; 480]);
        let path = persisted.path().unwrap().to_path_buf();
        assert!(path.exists());
        drop(persisted);
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_recordings_get_distinct_temp_paths() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let first = pipeline.persist(vec![0.1; 16]);
        let second = pipeline.persist(vec![0.2; 16]);
        assert_ne!(first.path().unwrap(), second.path().unwrap());
    }

    #[test]
    fn unwritable_temp_dir_falls_through_to_fallback_tier() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PersistencePipeline::new(16000)
            .with_temp_dir(dir.path().join("does-not-exist"))
            .with_fallback_dir(dir.path().join("fallback"));
        let persisted = pipeline.persist(vec![0.25; 480]);

        let path = persisted.path().expect("fallback tier writes to disk");
        assert_eq!(
            path,
            dir.path().join("fallback").join(defaults::FALLBACK_FILE_NAME)
        );
        assert!(path.exists());
        assert!(persisted.samples().is_none());
    }

    #[test]
    fn fallback_artifact_is_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PersistencePipeline::new(16000)
            .with_temp_dir(dir.path().join("does-not-exist"))
            .with_fallback_dir(dir.path().join("fallback"));
        let persisted = pipeline.persist(vec![0.25; 480]);
        let path = persisted.path().unwrap().to_path_buf();
        drop(persisted);
        assert!(!path.exists());
    }

    #[test]
    fn both_disk_tiers_failing_keeps_samples_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the fallback directory should be makes
        // create_dir_all fail.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let pipeline = PersistencePipeline::new(16000)
            .with_temp_dir(dir.path().join("does-not-exist"))
            .with_fallback_dir(blocker.join("fallback"));
        let samples = vec![0.5f32; 480];
        let persisted = pipeline.persist(samples.clone());

        assert!(persisted.path().is_none());
        assert_eq!(persisted.samples(), Some(samples.as_slice()));
    }

    #[test]
    fn temp_writability_check_reflects_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let good = PersistencePipeline::new(16000).with_temp_dir(dir.path());
        assert!(good.check_temp_writable().is_none());

        let bad = PersistencePipeline::new(16000).with_temp_dir(dir.path().join("missing"));
        assert!(bad.check_temp_writable().is_some());
    }

    #[test]
    fn empty_recording_still_persists() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let persisted = pipeline.persist(Vec::new());
        let mut reader = WavReader::open(persisted.path().unwrap()).unwrap();
        assert_eq!(reader.samples::<i16>().count(), 0);
    }
}
