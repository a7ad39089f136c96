//! Voice pool — fixed-size polyphonic allocator shared by all pitched
//! tracks.
//!
//! Allocation is round-robin over free voices; when every voice is busy
//! the oldest one is stolen so new triggers are never silently dropped.

use crate::scheduler::NoteSpec;
use crate::voice::Voice;

/// Default polyphony shared across all pitched tracks.
pub const DEFAULT_VOICE_CAPACITY: usize = 64;

pub struct VoicePool {
    voices: Vec<Voice>,
    next_index: usize,
    /// Monotonic trigger counter; the smallest serial among active voices
    /// marks the oldest.
    serial: u64,
}

impl VoicePool {
    pub fn new(capacity: usize, sample_rate: f32) -> Self {
        let capacity = capacity.max(1);
        Self {
            voices: (0..capacity).map(|_| Voice::new(sample_rate)).collect(),
            next_index: 0,
            serial: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Claim a voice for a note starting at absolute sample time `at`.
    pub fn trigger(&mut self, spec: NoteSpec, velocity: f32, at: u64) {
        self.serial += 1;
        let count = self.voices.len();

        for i in 0..count {
            let idx = (self.next_index + i) % count;
            if !self.voices[idx].is_active() {
                self.voices[idx].trigger(spec, velocity, at, self.serial);
                self.next_index = (idx + 1) % count;
                return;
            }
        }

        // Pool exhausted: steal the oldest active voice. Its release is
        // cut short by the retrigger.
        let mut oldest_idx = 0;
        let mut oldest_serial = u64::MAX;
        for (idx, voice) in self.voices.iter().enumerate() {
            if voice.serial() < oldest_serial {
                oldest_serial = voice.serial();
                oldest_idx = idx;
            }
        }
        self.voices[oldest_idx].trigger(spec, velocity, at, self.serial);
        self.next_index = (oldest_idx + 1) % count;
    }

    /// Gate off every sounding voice; each decays through its release
    /// tail and frees itself. Called on transport stop so no note hangs.
    pub fn release_all(&mut self, at: u64) {
        for voice in &mut self.voices {
            voice.release(at);
        }
    }

    /// Render all active voices additively into the interleaved stereo
    /// bus for the block starting at `block_start`.
    pub fn render(&mut self, bus: &mut [f32], block_start: u64) {
        for voice in &mut self.voices {
            voice.render(bus, block_start);
        }
    }
}
