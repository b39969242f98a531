//! Audio capture, frame assembly, and voice activity classification.

pub mod capture;
pub mod frames;
pub mod vad;
