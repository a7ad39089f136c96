//! Step scheduler — resolves each clock tick against the pattern and
//! dispatches voice triggers.

use pulse_shared::session::{Track, TrackKind, Waveform};
use uuid::Uuid;

use crate::transport::Tick;

/// Hard ceiling on voice-trigger dispatches in a single tick. Excess
/// triggers are dropped for that tick, never queued.
pub const MAX_TRIGGERS_PER_TICK: usize = 64;

/// MIDI note of a track with zero pitch offset (middle C).
pub const BASE_MIDI_NOTE: i32 = 60;

/// Everything a voice needs to sound one note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteSpec {
    pub frequency: f32,
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
    /// Seconds the gate stays open (attack + decay + sustain hold)
    /// before the release stage begins.
    pub gate: f32,
    pub waveform: Waveform,
}

/// Receiver side of a trigger dispatch. The scheduler stays agnostic of
/// where a trigger lands (shared pool vs. per-track chain).
pub trait TriggerSink {
    fn trigger(&mut self, track_id: Uuid, kind: TrackKind, spec: NoteSpec, velocity: f32, at: u64);
}

/// Map a fader level in dB to a trigger velocity in [0, 1].
pub fn db_to_velocity(volume_db: f32) -> f32 {
    10.0_f32.powf(volume_db / 20.0).clamp(0.0, 1.0)
}

/// Equal-tempered MIDI-to-frequency conversion, A4 = 440 Hz.
pub fn midi_to_frequency(midi: i32) -> f32 {
    440.0 * 2.0_f32.powf((midi as f32 - 69.0) / 12.0)
}

fn note_spec_for(track: &Track, step_seconds: f32) -> NoteSpec {
    let synth = &track.synth;
    let midi = BASE_MIDI_NOTE + synth.pitch_offset_semitones as i32;
    NoteSpec {
        frequency: midi_to_frequency(midi),
        attack: synth.attack,
        decay: synth.decay,
        sustain: synth.sustain,
        release: synth.release,
        gate: step_seconds,
        waveform: synth.waveform,
    }
}

/// Resolves ticks into triggers. Owns the monotonically increasing step
/// counter; the current step is `counter % step_count`, never derived
/// from elapsed time, so long sessions cannot drift.
pub struct StepScheduler {
    step_counter: u64,
}

impl StepScheduler {
    pub fn new() -> Self {
        Self { step_counter: 0 }
    }

    /// Rewind to step 0. Called on transport stop.
    pub fn reset(&mut self) {
        self.step_counter = 0;
    }

    pub fn ticks_elapsed(&self) -> u64 {
        self.step_counter
    }

    /// Process one clock tick: arbitrate audibility, map velocities,
    /// dispatch triggers (capped), and return the step that sounded.
    /// The caller publishes the returned step as the UI position for this
    /// same tick.
    pub fn on_tick<S: TriggerSink>(
        &mut self,
        tracks: &[Track],
        step_count: u32,
        step_seconds: f32,
        tick: Tick,
        sink: &mut S,
    ) -> u32 {
        let step = (self.step_counter % step_count.max(1) as u64) as u32;
        let any_solo = tracks.iter().any(|t| t.mixer.soloed);

        let mut dispatched = 0usize;
        for track in tracks {
            let audible = if any_solo {
                track.mixer.soloed
            } else {
                !track.mixer.muted
            };
            if !audible {
                continue;
            }
            if !track.pattern.get(step as usize).copied().unwrap_or(false) {
                continue;
            }
            if dispatched >= MAX_TRIGGERS_PER_TICK {
                log::debug!("trigger cap reached at step {step}, dropping remaining tracks");
                break;
            }
            let velocity = db_to_velocity(track.mixer.volume_db);
            sink.trigger(
                track.id,
                track.kind,
                note_spec_for(track, step_seconds),
                velocity,
                tick.timestamp,
            );
            dispatched += 1;
        }

        self.step_counter += 1;
        step
    }
}

impl Default for StepScheduler {
    fn default() -> Self {
        Self::new()
    }
}
