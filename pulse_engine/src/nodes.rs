//! Processing stages of the shared signal graph.
//!
//! Every node consumes and produces interleaved stereo f32. Live
//! parameters move through ~100 ms linear ramps instead of jumping, so a
//! UI tweak never clicks.

use crate::delay::Delay;
use crate::filter::LowpassFilter;
use crate::reverb::Reverb;

/// Ramp length for live parameter changes.
pub const PARAM_RAMP_SECONDS: f32 = 0.1;

/// Hard output ceiling of the limiter stage.
pub const LIMITER_CEILING: f32 = 0.98;

/// Live-updatable parameters of the shared graph, addressed by variant
/// rather than by node reference so callers never hold graph internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphParam {
    ChannelGain,
    ChannelPan,
    DistortionAmount,
    FilterCutoffHz,
    FilterResonanceQ,
    ReverbDecay,
    ReverbWet,
    DelayTimeSeconds,
    DelayFeedback,
    DelayWet,
    MasterGainDb,
}

/// A processing stage. Each node answers only the parameters it owns and
/// ignores the rest.
pub trait AudioNode: Send {
    /// Process a block of interleaved stereo audio in place.
    fn process(&mut self, buffer: &mut [f32]);

    fn set_param(&mut self, param: GraphParam, value: f32) {
        let _ = (param, value);
    }
}

/// Linear ramp toward a target over a fixed sample count.
#[derive(Debug, Clone, Copy)]
pub struct Smoothed {
    current: f32,
    target: f32,
    step: f32,
    ramp_samples: f32,
}

impl Smoothed {
    pub fn new(value: f32, sample_rate: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            ramp_samples: (PARAM_RAMP_SECONDS * sample_rate).max(1.0),
        }
    }

    pub fn set(&mut self, target: f32) {
        self.target = target;
        self.step = (target - self.current) / self.ramp_samples;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    /// Advance one sample.
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.current != self.target {
            self.current += self.step;
            let overshot = (self.step > 0.0 && self.current >= self.target)
                || (self.step < 0.0 && self.current <= self.target)
                || self.step == 0.0;
            if overshot {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Advance `n` samples at once, for block-rate parameters.
    pub fn advance(&mut self, n: usize) -> f32 {
        if self.current != self.target {
            self.current += self.step * n as f32;
            let overshot = (self.step > 0.0 && self.current >= self.target)
                || (self.step < 0.0 && self.current <= self.target)
                || self.step == 0.0;
            if overshot {
                self.current = self.target;
            }
        }
        self.current
    }
}

/// Shared channel strip: gain and pan for the summed voice bus.
pub struct ChannelNode {
    gain: Smoothed,
    pan: Smoothed,
}

impl ChannelNode {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            gain: Smoothed::new(1.0, sample_rate),
            pan: Smoothed::new(0.0, sample_rate),
        }
    }
}

impl AudioNode for ChannelNode {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let gain = self.gain.next();
            let pan = self.pan.next();
            let mut l_gain = gain;
            let mut r_gain = gain;
            if pan > 0.0 {
                l_gain *= 1.0 - pan;
            } else if pan < 0.0 {
                r_gain *= 1.0 + pan;
            }
            frame[0] *= l_gain;
            frame[1] *= r_gain;
        }
    }

    fn set_param(&mut self, param: GraphParam, value: f32) {
        match param {
            GraphParam::ChannelGain => self.gain.set(value.clamp(0.0, 2.0)),
            GraphParam::ChannelPan => self.pan.set(value.clamp(-1.0, 1.0)),
            _ => {}
        }
    }
}

/// Waveshaper distortion; amount 0 is a clean passthrough.
pub struct DistortionNode {
    amount: Smoothed,
}

impl DistortionNode {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            amount: Smoothed::new(0.0, sample_rate),
        }
    }
}

impl AudioNode for DistortionNode {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let amount = self.amount.next();
            if amount <= 0.0 {
                continue;
            }
            let drive = 1.0 + amount * 20.0;
            for sample in frame.iter_mut() {
                let shaped = (*sample * drive).tanh();
                *sample += amount * (shaped - *sample);
            }
        }
    }

    fn set_param(&mut self, param: GraphParam, value: f32) {
        if param == GraphParam::DistortionAmount {
            self.amount.set(value.clamp(0.0, 1.0));
        }
    }
}

/// Shared-bus lowpass. Cutoff and resonance ramp at block rate; the
/// biquad coefficients are recomputed once per block.
pub struct FilterNode {
    left: LowpassFilter,
    right: LowpassFilter,
    cutoff: Smoothed,
    q: Smoothed,
}

impl FilterNode {
    pub fn new(sample_rate: f32, cutoff_hz: f32, q: f32) -> Self {
        Self {
            left: LowpassFilter::new(sample_rate, cutoff_hz, q),
            right: LowpassFilter::new(sample_rate, cutoff_hz, q),
            cutoff: Smoothed::new(cutoff_hz, sample_rate),
            q: Smoothed::new(q, sample_rate),
        }
    }
}

impl AudioNode for FilterNode {
    fn process(&mut self, buffer: &mut [f32]) {
        let frames = buffer.len() / 2;
        let cutoff = self.cutoff.advance(frames);
        let q = self.q.advance(frames);
        self.left.set_params(cutoff, q);
        self.right.set_params(cutoff, q);

        for frame in buffer.chunks_exact_mut(2) {
            frame[0] = self.left.process(frame[0]);
            frame[1] = self.right.process(frame[1]);
        }
    }

    fn set_param(&mut self, param: GraphParam, value: f32) {
        match param {
            GraphParam::FilterCutoffHz => self.cutoff.set(value.clamp(20.0, 20_000.0)),
            GraphParam::FilterResonanceQ => self.q.set(value.clamp(0.1, 30.0)),
            _ => {}
        }
    }
}

/// Master reverb with a smoothed wet control.
pub struct ReverbNode {
    reverb: Reverb,
    wet: Smoothed,
}

impl ReverbNode {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            reverb: Reverb::new(sample_rate),
            wet: Smoothed::new(0.2, sample_rate),
        }
    }
}

impl AudioNode for ReverbNode {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let wet = self.wet.next();
            let (wet_l, wet_r) = self.reverb.process_wet(frame[0], frame[1]);
            frame[0] = frame[0] * (1.0 - wet) + wet_l * wet;
            frame[1] = frame[1] * (1.0 - wet) + wet_r * wet;
        }
    }

    fn set_param(&mut self, param: GraphParam, value: f32) {
        match param {
            GraphParam::ReverbWet => self.wet.set(value.clamp(0.0, 1.0)),
            GraphParam::ReverbDecay => self.reverb.set_decay(value),
            _ => {}
        }
    }
}

/// Master delay with a smoothed wet control.
pub struct DelayNode {
    delay: Delay,
    wet: Smoothed,
}

impl DelayNode {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            delay: Delay::new(sample_rate, 2.0),
            wet: Smoothed::new(0.2, sample_rate),
        }
    }
}

impl AudioNode for DelayNode {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let wet = self.wet.next();
            let (wet_l, wet_r) = self.delay.process_wet(frame[0], frame[1]);
            frame[0] = frame[0] * (1.0 - wet) + wet_l * wet;
            frame[1] = frame[1] * (1.0 - wet) + wet_r * wet;
        }
    }

    fn set_param(&mut self, param: GraphParam, value: f32) {
        match param {
            GraphParam::DelayWet => self.wet.set(value.clamp(0.0, 1.0)),
            GraphParam::DelayTimeSeconds => self.delay.set_time(value),
            GraphParam::DelayFeedback => self.delay.set_feedback(value),
            _ => {}
        }
    }
}

/// Fixed-ceiling soft limiter. Keeps the summed bus from clipping no
/// matter how many voices land on one step.
pub struct LimiterNode {
    ceiling: f32,
}

impl LimiterNode {
    pub fn new() -> Self {
        Self {
            ceiling: LIMITER_CEILING,
        }
    }
}

impl AudioNode for LimiterNode {
    fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.ceiling * (*sample / self.ceiling).tanh();
        }
    }
}

/// Master output gain, set in dB.
pub struct MasterGainNode {
    gain: Smoothed,
}

impl MasterGainNode {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            gain: Smoothed::new(1.0, sample_rate),
        }
    }
}

impl AudioNode for MasterGainNode {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let gain = self.gain.next();
            frame[0] *= gain;
            frame[1] *= gain;
        }
    }

    fn set_param(&mut self, param: GraphParam, value: f32) {
        if param == GraphParam::MasterGainDb {
            let db = value.clamp(-60.0, 6.0);
            self.gain.set(10.0_f32.powf(db / 20.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothed_ramps_not_jumps() {
        let mut s = Smoothed::new(0.0, 44_100.0);
        s.set(1.0);
        let first = s.next();
        assert!(first > 0.0 && first < 0.001, "first step should be tiny");

        // After the full ramp (100 ms = 4410 samples) the target holds.
        for _ in 0..4410 {
            s.next();
        }
        assert_eq!(s.next(), 1.0);
    }

    #[test]
    fn smoothed_block_advance_matches_target() {
        let mut s = Smoothed::new(1.0, 44_100.0);
        s.set(0.25);
        let mid = s.advance(2205);
        assert!(mid < 1.0 && mid > 0.25);
        let done = s.advance(4410);
        assert_eq!(done, 0.25);
    }

    #[test]
    fn channel_pan_attenuates_opposite_side() {
        let sr = 44_100.0;
        let mut node = ChannelNode::new(sr);
        node.set_param(GraphParam::ChannelPan, 1.0);
        // Run the ramp out first.
        let mut warmup = vec![0.0; 2 * 4500];
        node.process(&mut warmup);

        let mut buf = vec![1.0, 1.0];
        node.process(&mut buf);
        assert!(buf[0].abs() < 1e-3, "hard-right pan should silence left");
        assert!((buf[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn distortion_at_zero_is_passthrough() {
        let mut node = DistortionNode::new(44_100.0);
        let mut buf = vec![0.5, -0.5, 0.25, -0.25];
        node.process(&mut buf);
        assert_eq!(buf, vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn limiter_bounds_output() {
        let mut node = LimiterNode::new();
        let mut buf = vec![10.0, -10.0, 0.5, -0.5];
        node.process(&mut buf);
        for &s in &buf {
            assert!(s.abs() <= LIMITER_CEILING);
        }
        // Small signals pass nearly untouched.
        assert!((buf[2] - 0.5).abs() < 0.05);
    }

    #[test]
    fn master_gain_converts_db() {
        let sr = 44_100.0;
        let mut node = MasterGainNode::new(sr);
        node.set_param(GraphParam::MasterGainDb, -6.0);
        let mut warmup = vec![0.0; 2 * 4500];
        node.process(&mut warmup);

        let mut buf = vec![1.0, 1.0];
        node.process(&mut buf);
        assert!((buf[0] - 0.501).abs() < 0.01, "-6 dB is ~0.501, got {}", buf[0]);
    }

    #[test]
    fn reverb_wet_ramps_not_jumps() {
        let mut node = ReverbNode::new(44_100.0);
        node.set_param(GraphParam::ReverbWet, 1.0);
        // Right after the change the mix is still near the old wet level:
        // an impulse passes mostly dry while the ramp runs.
        let mut buf = vec![0.0; 64 * 2];
        buf[0] = 1.0;
        buf[1] = 1.0;
        node.process(&mut buf);
        assert!(
            buf[0] > 0.5,
            "impulse should still be mostly dry at ramp start, got {}",
            buf[0]
        );
    }

    #[test]
    fn filter_node_follows_cutoff_ramp() {
        let mut node = FilterNode::new(44_100.0, 8_000.0, 0.707);
        node.set_param(GraphParam::FilterCutoffHz, 200.0);
        // Run several blocks; the output must stay finite while the
        // cutoff ramps down.
        for _ in 0..40 {
            let mut buf: Vec<f32> = (0..512).flat_map(|i| {
                let s = if i % 4 < 2 { 0.8 } else { -0.8 };
                [s, s]
            }).collect();
            node.process(&mut buf);
            assert!(buf.iter().all(|s| s.is_finite()));
        }
    }
}
