//! Session document model shared between the engine and its collaborators
//! (persistence gateway, chat proxy, rendering layer).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    MAX_FILTER_CUTOFF_HZ, MAX_PITCH_OFFSET, MAX_STEP_COUNT, MAX_TEMPO, MAX_VOLUME_DB,
    MIN_FILTER_CUTOFF_HZ, MIN_PITCH_OFFSET, MIN_STEP_COUNT, MIN_TEMPO, MIN_VOLUME_DB,
};

/// How a track produces sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Triggers the shared polyphonic voice pool.
    #[default]
    Pitched,
    /// Owns an exclusive per-track processing chain, created on add and
    /// disposed on removal.
    Legacy,
}

/// Oscillator shape for a track's voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    #[default]
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixerState {
    pub muted: bool,
    pub soloed: bool,
    /// Fader level in decibels, [-60, +6].
    pub volume_db: f32,
    /// Stereo position, [-1, 1].
    pub pan: f32,
}

impl Default for MixerState {
    fn default() -> Self {
        Self {
            muted: false,
            soloed: false,
            volume_db: 0.0,
            pan: 0.0,
        }
    }
}

impl MixerState {
    pub fn clamped(mut self) -> Self {
        self.volume_db = self.volume_db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB);
        self.pan = self.pan.clamp(-1.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynthParams {
    /// Semitone offset from the engine's base note (middle C), [-24, 24].
    pub pitch_offset_semitones: i8,
    /// Attack time, seconds.
    pub attack: f32,
    /// Decay time, seconds.
    pub decay: f32,
    /// Sustain level, [0, 1].
    pub sustain: f32,
    /// Release time, seconds.
    pub release: f32,
    /// Waveshaper amount, [0, 1].
    pub distortion: f32,
    /// Lowpass cutoff, [20, 20000] Hz.
    pub filter_cutoff_hz: f32,
    pub filter_resonance_q: f32,
    #[serde(default)]
    pub waveform: Waveform,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            pitch_offset_semitones: 0,
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.3,
            distortion: 0.0,
            filter_cutoff_hz: 8_000.0,
            filter_resonance_q: 0.707,
            waveform: Waveform::Triangle,
        }
    }
}

impl SynthParams {
    pub fn clamped(mut self) -> Self {
        self.pitch_offset_semitones = self
            .pitch_offset_semitones
            .clamp(MIN_PITCH_OFFSET, MAX_PITCH_OFFSET);
        self.attack = self.attack.clamp(0.0, 10.0);
        self.decay = self.decay.clamp(0.0, 10.0);
        self.sustain = self.sustain.clamp(0.0, 1.0);
        self.release = self.release.clamp(0.0, 10.0);
        self.distortion = self.distortion.clamp(0.0, 1.0);
        self.filter_cutoff_hz = self
            .filter_cutoff_hz
            .clamp(MIN_FILTER_CUTOFF_HZ, MAX_FILTER_CUTOFF_HZ);
        self.filter_resonance_q = self.filter_resonance_q.clamp(0.1, 30.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub kind: TrackKind,
    /// One flag per step; length always equals the session step count.
    pub pattern: Vec<bool>,
    #[serde(default)]
    pub mixer: MixerState,
    #[serde(default)]
    pub synth: SynthParams,
    /// UI visibility only; playback ignores it.
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl Track {
    pub fn new(name: impl Into<String>, step_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: TrackKind::Pitched,
            pattern: vec![false; step_count as usize],
            mixer: MixerState::default(),
            synth: SynthParams::default(),
            visible: true,
        }
    }

    /// Clamp fields into range and resize the pattern to `step_count`,
    /// truncating or zero-extending as needed.
    pub fn reconciled(mut self, step_count: u32) -> Self {
        self.pattern.resize(step_count as usize, false);
        self.mixer = self.mixer.clamped();
        self.synth = self.synth.clamped();
        self
    }
}

/// The declarative session payload the engine consumes and produces:
/// tempo, step count, and the track list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub tempo: f32,
    pub step_count: u32,
    pub tracks: Vec<Track>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            step_count: 16,
            tracks: Vec::new(),
        }
    }
}

impl Session {
    /// Recover a playable session from an arbitrary payload: clamp tempo
    /// and step count, then reconcile every track against the step count.
    /// Malformed input degrades, it never fails.
    pub fn reconciled(mut self) -> Self {
        if !self.tempo.is_finite() {
            self.tempo = 120.0;
        }
        self.tempo = self.tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        self.step_count = self.step_count.clamp(MIN_STEP_COUNT, MAX_STEP_COUNT);
        let step_count = self.step_count;
        self.tracks = self
            .tracks
            .into_iter()
            .map(|t| t.reconciled(step_count))
            .collect();
        self
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A persisted preset: a session plus whatever metadata the persistence
/// collaborator attaches (name, description, id, timestamps). The engine
/// round-trips the metadata without interpreting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(flatten)]
    pub session: Session,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_reconcile_resizes_pattern() {
        let mut t = Track::new("kick", 16);
        t.pattern[0] = true;
        t.pattern[15] = true;

        let grown = t.clone().reconciled(32);
        assert_eq!(grown.pattern.len(), 32);
        assert!(grown.pattern[0] && grown.pattern[15]);
        assert!(grown.pattern[16..].iter().all(|&b| !b));

        let shrunk = t.reconciled(8);
        assert_eq!(shrunk.pattern.len(), 8);
        assert!(shrunk.pattern[0]);
    }

    #[test]
    fn session_reconcile_clamps_ranges() {
        let mut t = Track::new("lead", 16);
        t.mixer.volume_db = -200.0;
        t.mixer.pan = 3.0;
        t.synth.pitch_offset_semitones = 120;
        t.synth.filter_cutoff_hz = 1.0;

        let s = Session {
            tempo: 900.0,
            step_count: 1000,
            tracks: vec![t],
        }
        .reconciled();

        assert_eq!(s.tempo, MAX_TEMPO);
        assert_eq!(s.step_count, MAX_STEP_COUNT);
        let t = &s.tracks[0];
        assert_eq!(t.pattern.len(), MAX_STEP_COUNT as usize);
        assert_eq!(t.mixer.volume_db, MIN_VOLUME_DB);
        assert_eq!(t.mixer.pan, 1.0);
        assert_eq!(t.synth.pitch_offset_semitones, MAX_PITCH_OFFSET);
        assert_eq!(t.synth.filter_cutoff_hz, MIN_FILTER_CUTOFF_HZ);
    }

    #[test]
    fn session_json_round_trip() {
        let mut session = Session::default();
        session.tracks.push(Track::new("bass", session.step_count));
        session.tracks[0].pattern[0] = true;
        session.tracks[0].kind = TrackKind::Legacy;

        let json = session.to_json().unwrap();
        let back = Session::from_json(&json).unwrap();
        assert_eq!(session, back);
    }

    #[test]
    fn payload_without_waveform_defaults_to_triangle() {
        let json = r#"{
            "tempo": 100.0,
            "step_count": 8,
            "tracks": [{
                "id": "4a3f7b6e-1f7c-4f7e-9a75-2f2b9a2f3c4d",
                "name": "pad",
                "pattern": [true, false, false, false, true, false, false, false]
            }]
        }"#;
        let session = Session::from_json(json).unwrap();
        assert_eq!(session.tracks[0].synth.waveform, Waveform::Triangle);
        assert_eq!(session.tracks[0].kind, TrackKind::Pitched);
        assert!(session.tracks[0].visible);
    }

    #[test]
    fn preset_metadata_passes_through() {
        let json = r#"{
            "tempo": 120.0,
            "step_count": 16,
            "tracks": [],
            "name": "my beat",
            "description": "LLM generated",
            "preset_id": 42
        }"#;
        let preset: Preset = serde_json::from_str(json).unwrap();
        assert_eq!(preset.metadata["name"], "my beat");
        assert_eq!(preset.metadata["preset_id"], 42);

        let back = serde_json::to_value(&preset).unwrap();
        assert_eq!(back["description"], "LLM generated");
        assert_eq!(back["tempo"], 120.0);
    }
}
