use crossbeam_channel::Sender;
use uuid::Uuid;

use pulse_shared::session::{Session, Track, Waveform};

use crate::nodes::GraphParam;
use crate::store::SynthParamId;

/// Mutation surface of the engine. Commands are sent from the UI /
/// collaborator side and drained by the audio callback at the top of each
/// render block, which serializes editing against tick processing.
pub enum EngineCommand {
    Play,
    Stop,
    SetTempo(f32),
    SetStepCount(u32),
    ToggleStep { track_id: Uuid, index: usize },
    AddTrack(Track),
    RemoveTrack { track_id: Uuid },
    ToggleMute { track_id: Uuid },
    ToggleSolo { track_id: Uuid },
    SetTrackVolume { track_id: Uuid, volume_db: f32 },
    SetTrackPan { track_id: Uuid, pan: f32 },
    SetSynthParam { track_id: Uuid, param: SynthParamId, value: f32 },
    SetWaveform { track_id: Uuid, waveform: Waveform },
    ReorderTracks { from: usize, to: usize },
    /// Wholesale session replace; ignored (with a warning) while playing.
    LoadSession(Session),
    SetGraphParam { param: GraphParam, value: f32 },
    GetSession(Sender<Session>),
}

/// Position/status event for the rendering layer, emitted on the same
/// tick that sounded — audio and UI position never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionEvent {
    pub step: u32,
    pub is_playing: bool,
}
