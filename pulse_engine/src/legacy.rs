//! Exclusively-owned processing chain for legacy tracks.
//!
//! Pitched tracks share the voice pool and the bus-level tone stages;
//! a legacy track instead owns its whole path — voice, lowpass, shaper,
//! pan — created when the track is added and disposed (off the audio
//! thread) when it is removed. This is the one place per-track
//! filter/distortion/pan are actually independent.

use pulse_shared::session::SynthParams;

use crate::filter::LowpassFilter;
use crate::scheduler::NoteSpec;
use crate::voice::Voice;

/// Scratch sized for the largest block the stream requests.
const SCRATCH_FRAMES: usize = 4096;

pub struct LegacyChain {
    voice: Voice,
    filter_l: LowpassFilter,
    filter_r: LowpassFilter,
    distortion: f32,
    pan: f32,
    scratch: Vec<f32>,
}

impl LegacyChain {
    pub fn new(sample_rate: f32, synth: &SynthParams, pan: f32) -> Self {
        Self {
            voice: Voice::new(sample_rate),
            filter_l: LowpassFilter::new(sample_rate, synth.filter_cutoff_hz, synth.filter_resonance_q),
            filter_r: LowpassFilter::new(sample_rate, synth.filter_cutoff_hz, synth.filter_resonance_q),
            distortion: synth.distortion,
            pan: pan.clamp(-1.0, 1.0),
            scratch: vec![0.0; SCRATCH_FRAMES * 2],
        }
    }

    /// Monophonic retrigger; a legacy track plays one note at a time.
    pub fn trigger(&mut self, spec: NoteSpec, velocity: f32, at: u64) {
        self.voice.trigger(spec, velocity, at, 0);
    }

    pub fn release(&mut self, at: u64) {
        self.voice.release(at);
    }

    pub fn update_params(&mut self, synth: &SynthParams) {
        self.filter_l
            .set_params(synth.filter_cutoff_hz, synth.filter_resonance_q);
        self.filter_r
            .set_params(synth.filter_cutoff_hz, synth.filter_resonance_q);
        self.distortion = synth.distortion.clamp(0.0, 1.0);
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    /// Render the chain additively into the shared bus.
    pub fn render(&mut self, bus: &mut [f32], block_start: u64) {
        if !self.voice.is_active() {
            return;
        }
        if self.scratch.len() < bus.len() {
            self.scratch.resize(bus.len(), 0.0);
        }
        let scratch = &mut self.scratch[..bus.len()];
        scratch.fill(0.0);
        self.voice.render(scratch, block_start);

        let mut l_gain = 1.0;
        let mut r_gain = 1.0;
        if self.pan > 0.0 {
            l_gain = 1.0 - self.pan;
        } else if self.pan < 0.0 {
            r_gain = 1.0 + self.pan;
        }

        let amount = self.distortion;
        let drive = 1.0 + amount * 20.0;
        for (frame, out) in scratch.chunks_exact_mut(2).zip(bus.chunks_exact_mut(2)) {
            let mut l = self.filter_l.process(frame[0]);
            let mut r = self.filter_r.process(frame[1]);
            if amount > 0.0 {
                l += amount * ((l * drive).tanh() - l);
                r += amount * ((r * drive).tanh() - r);
            }
            out[0] += l * l_gain;
            out[1] += r * r_gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_shared::session::Waveform;

    fn spec() -> NoteSpec {
        NoteSpec {
            frequency: 110.0,
            attack: 0.001,
            decay: 0.01,
            sustain: 0.8,
            release: 0.02,
            gate: 0.05,
            waveform: Waveform::Sawtooth,
        }
    }

    #[test]
    fn chain_renders_into_bus() {
        let mut chain = LegacyChain::new(44_100.0, &SynthParams::default(), 0.0);
        chain.trigger(spec(), 1.0, 0);
        let mut bus = vec![0.0; 1024 * 2];
        chain.render(&mut bus, 0);
        assert!(bus.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn pan_is_independent_per_chain() {
        let mut chain = LegacyChain::new(44_100.0, &SynthParams::default(), 1.0);
        chain.trigger(spec(), 1.0, 0);
        let mut bus = vec![0.0; 1024 * 2];
        chain.render(&mut bus, 0);
        let left: f32 = bus.iter().step_by(2).map(|s| s.abs()).sum();
        let right: f32 = bus.iter().skip(1).step_by(2).map(|s| s.abs()).sum();
        assert!(left < 1e-6, "hard-right chain should leave no left signal");
        assert!(right > 0.0);
    }

    #[test]
    fn retrigger_is_monophonic() {
        let mut chain = LegacyChain::new(44_100.0, &SynthParams::default(), 0.0);
        chain.trigger(spec(), 1.0, 0);
        chain.trigger(spec(), 0.5, 100);
        // One voice only: rendering past both gates finishes the chain.
        let mut bus = vec![0.0; 8192 * 2];
        chain.render(&mut bus, 0);
        chain.render(&mut bus, 8192);
        assert!(!chain_is_active(&chain));
    }

    fn chain_is_active(chain: &LegacyChain) -> bool {
        chain.voice.is_active()
    }
}
