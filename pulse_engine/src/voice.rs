//! Voice — one oscillator shaped by an ADSR envelope, with sample-domain
//! start/release timestamps.

use crate::envelope::Envelope;
use crate::oscillator::Oscillator;
use crate::scheduler::NoteSpec;

use pulse_shared::session::Waveform;

/// A single polyphonic voice. Owned exclusively by the pool; returns to
/// the free list on its own once the release stage completes.
#[derive(Debug, Clone)]
pub struct Voice {
    oscillator: Oscillator,
    envelope: Envelope,
    velocity: f32,
    /// Absolute sample time the gate opens. May lie inside the current
    /// block (look-ahead) or in the past (fires on the first frame).
    start_at: u64,
    /// Absolute sample time the gate closes and the release begins.
    release_at: u64,
    /// Trigger order, used by the pool to find the oldest voice.
    serial: u64,
    active: bool,
    gated: bool,
    released: bool,
    sample_rate: f32,
}

impl Voice {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            oscillator: Oscillator::new(Waveform::Triangle, sample_rate),
            envelope: Envelope::new(sample_rate),
            velocity: 1.0,
            start_at: 0,
            release_at: 0,
            serial: 0,
            active: false,
            gated: false,
            released: false,
            sample_rate,
        }
    }

    /// Arm the voice for a note. Retriggering a sounding voice (a steal)
    /// cuts its release short; the envelope restarts from its current
    /// level so the cut is click-free.
    pub fn trigger(&mut self, spec: NoteSpec, velocity: f32, at: u64, serial: u64) {
        self.oscillator.waveform = spec.waveform;
        self.oscillator.frequency = spec.frequency;
        self.envelope.attack = spec.attack;
        self.envelope.decay = spec.decay;
        self.envelope.sustain = spec.sustain;
        self.envelope.release = spec.release;
        self.velocity = velocity;
        self.start_at = at;
        self.release_at = at + (spec.gate.max(0.0) * self.sample_rate) as u64;
        self.serial = serial;
        self.active = true;
        self.gated = false;
        self.released = false;
    }

    /// Close the gate now; the voice decays through its release tail.
    pub fn release(&mut self, at: u64) {
        if self.active {
            self.release_at = self.release_at.min(at);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Render additively into an interleaved stereo bus starting at
    /// absolute sample time `block_start`.
    pub fn render(&mut self, bus: &mut [f32], block_start: u64) {
        if !self.active {
            return;
        }
        let frames = bus.len() / 2;
        for i in 0..frames {
            let t = block_start + i as u64;
            if t < self.start_at {
                continue;
            }
            if !self.gated {
                self.oscillator.reset();
                self.envelope.gate_on();
                self.gated = true;
            }
            if !self.released && t >= self.release_at {
                self.envelope.gate_off();
                self.released = true;
            }

            let sample = self.oscillator.next_sample() * self.envelope.next_sample() * self.velocity;
            bus[i * 2] += sample;
            bus[i * 2 + 1] += sample;

            if self.released && self.envelope.is_finished() {
                self.active = false;
                return;
            }
        }
    }
}
