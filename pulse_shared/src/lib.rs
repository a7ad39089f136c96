use thiserror::Error;

pub mod session;

/// Smallest pattern length the sequencer supports.
pub const MIN_STEP_COUNT: u32 = 4;
/// Largest pattern length the sequencer supports.
pub const MAX_STEP_COUNT: u32 = 64;

pub const MIN_TEMPO: f32 = 60.0;
pub const MAX_TEMPO: f32 = 200.0;

/// Track fader range, decibels.
pub const MIN_VOLUME_DB: f32 = -60.0;
pub const MAX_VOLUME_DB: f32 = 6.0;

pub const MIN_FILTER_CUTOFF_HZ: f32 = 20.0;
pub const MAX_FILTER_CUTOFF_HZ: f32 = 20_000.0;

pub const MIN_PITCH_OFFSET: i8 = -24;
pub const MAX_PITCH_OFFSET: i8 = 24;

/// Recoverable engine failures. Anything not listed here is handled by
/// degrading (clamping, stealing, dropping) rather than erroring.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("step count {0} outside supported range 4..=64")]
    InvalidStepCount(u32),
    #[error("audio graph is not ready yet")]
    GraphNotReady,
    #[error("unknown track {0}")]
    UnknownTrack(uuid::Uuid),
}
