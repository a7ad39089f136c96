//! ADSR envelope generator.

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// ADSR envelope with linear attack/decay/release segments.
///
/// `gate_on` retriggers from the current level rather than zero, so a
/// stolen voice restarts without a click.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    /// Sustain level [0, 1].
    pub sustain: f32,
    pub release: f32,

    stage: Stage,
    level: f32,
    sample_rate: f32,
    stage_samples: usize,
    stage_counter: usize,
    start_level: f32,
}

impl Envelope {
    pub fn new(sample_rate: f32) -> Self {
        Envelope {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.3,
            stage: Stage::Idle,
            level: 0.0,
            sample_rate,
            stage_samples: 0,
            stage_counter: 0,
            start_level: 0.0,
        }
    }

    /// Open the gate (note on).
    pub fn gate_on(&mut self) {
        self.stage = Stage::Attack;
        self.stage_samples = (self.attack * self.sample_rate) as usize;
        self.stage_counter = 0;
        self.start_level = self.level;
    }

    /// Close the gate (note off).
    pub fn gate_off(&mut self) {
        if self.stage == Stage::Idle {
            return;
        }
        self.stage = Stage::Release;
        self.stage_samples = (self.release * self.sample_rate) as usize;
        self.stage_counter = 0;
        self.start_level = self.level;
    }

    /// Generate the next envelope sample [0, 1].
    pub fn next_sample(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => {
                self.level = 0.0;
            }
            Stage::Attack => {
                if self.stage_samples == 0 {
                    self.level = 1.0;
                    self.enter_decay();
                } else {
                    let t = self.stage_counter as f32 / self.stage_samples as f32;
                    self.level = self.start_level + (1.0 - self.start_level) * t;
                    self.stage_counter += 1;
                    if self.stage_counter >= self.stage_samples {
                        self.level = 1.0;
                        self.enter_decay();
                    }
                }
            }
            Stage::Decay => {
                if self.stage_samples == 0 {
                    self.level = self.sustain;
                    self.stage = Stage::Sustain;
                } else {
                    let t = self.stage_counter as f32 / self.stage_samples as f32;
                    self.level = 1.0 - (1.0 - self.sustain) * t;
                    self.stage_counter += 1;
                    if self.stage_counter >= self.stage_samples {
                        self.level = self.sustain;
                        self.stage = Stage::Sustain;
                    }
                }
            }
            Stage::Sustain => {
                self.level = self.sustain;
            }
            Stage::Release => {
                if self.stage_samples == 0 {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                } else {
                    let t = self.stage_counter as f32 / self.stage_samples as f32;
                    self.level = self.start_level * (1.0 - t);
                    self.stage_counter += 1;
                    if self.stage_counter >= self.stage_samples {
                        self.level = 0.0;
                        self.stage = Stage::Idle;
                    }
                }
            }
        }
        self.level
    }

    /// True once the release stage has run out.
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Idle
    }

    fn enter_decay(&mut self) {
        self.stage = Stage::Decay;
        self.stage_samples = (self.decay * self.sample_rate) as usize;
        self.stage_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let env = Envelope::new(44_100.0);
        assert!(env.is_finished());
    }

    #[test]
    fn attack_reaches_one() {
        let mut env = Envelope::new(44_100.0);
        env.attack = 0.01; // 441 samples
        env.gate_on();

        let mut max_level = 0.0_f32;
        for _ in 0..500 {
            max_level = max_level.max(env.next_sample());
        }
        assert!(
            (max_level - 1.0).abs() < 0.01,
            "attack should reach ~1.0, got {max_level}"
        );
    }

    #[test]
    fn sustain_holds() {
        let mut env = Envelope::new(44_100.0);
        env.attack = 0.001;
        env.decay = 0.001;
        env.sustain = 0.6;
        env.gate_on();

        for _ in 0..500 {
            env.next_sample();
        }
        let s = env.next_sample();
        assert!((s - 0.6).abs() < 0.01, "should sustain at 0.6, got {s}");
    }

    #[test]
    fn release_runs_to_idle() {
        let mut env = Envelope::new(44_100.0);
        env.attack = 0.001;
        env.decay = 0.001;
        env.release = 0.01;
        env.gate_on();
        for _ in 0..500 {
            env.next_sample();
        }

        env.gate_off();
        for _ in 0..1000 {
            env.next_sample();
        }
        assert!(env.is_finished());
    }

    #[test]
    fn retrigger_starts_from_current_level() {
        let mut env = Envelope::new(44_100.0);
        env.attack = 0.01;
        env.decay = 0.1;
        env.sustain = 0.8;
        env.gate_on();
        for _ in 0..600 {
            env.next_sample();
        }
        let before = env.next_sample();
        assert!(before > 0.5);

        // Steal: retrigger without releasing first. The first samples
        // continue from the running level, not from zero.
        env.gate_on();
        let after = env.next_sample();
        assert!(
            (after - before).abs() < 0.05,
            "retrigger jumped from {before} to {after}"
        );
    }
}
