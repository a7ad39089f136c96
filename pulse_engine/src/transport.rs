//! Sample-domain transport clock.
//!
//! The output stream's sample counter is the monotonic timebase. Once per
//! render block the clock emits every sixteenth-note boundary that falls
//! inside the block, each carrying its exact frame offset and absolute
//! sample timestamp — events are computed ahead of their playback instant,
//! so callback-delivery jitter cannot move them.

use pulse_shared::{MAX_TEMPO, MIN_TEMPO};

/// Sixteenth notes per beat.
pub const STEPS_PER_BEAT: f64 = 4.0;

/// One sixteenth-note boundary inside a render block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Frame offset from the start of the current block.
    pub offset: u32,
    /// Absolute output time, samples since stream start.
    pub timestamp: u64,
}

pub struct TransportClock {
    sample_rate: f64,
    bpm: f64,
    /// Tempo changes wait for the next tick boundary while playing.
    pending_bpm: Option<f64>,
    playing: bool,
    /// Absolute sample position of the output stream.
    now: u64,
    /// Samples from the current block start to the next tick boundary.
    samples_to_next: f64,
}

impl TransportClock {
    pub fn new(sample_rate: f64, bpm: f32) -> Self {
        Self {
            sample_rate,
            bpm: (bpm as f64).clamp(MIN_TEMPO as f64, MAX_TEMPO as f64),
            pending_bpm: None,
            playing: false,
            now: 0,
            samples_to_next: 0.0,
        }
    }

    /// Samples per sixteenth note at the current tempo.
    fn interval(&self) -> f64 {
        self.sample_rate * 60.0 / self.bpm / STEPS_PER_BEAT
    }

    pub fn tempo(&self) -> f32 {
        self.bpm as f32
    }

    /// Clamped to [60, 200]. Takes effect at the next tick boundary while
    /// playing, immediately while stopped — never retroactively.
    pub fn set_tempo(&mut self, bpm: f32) {
        let bpm = (bpm as f64).clamp(MIN_TEMPO as f64, MAX_TEMPO as f64);
        if self.playing {
            self.pending_bpm = Some(bpm);
        } else {
            self.bpm = bpm;
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Begin ticking. The first tick lands on the first frame of the next
    /// block, so playback always starts at step 0.
    pub fn start(&mut self) {
        if self.playing {
            return;
        }
        self.playing = true;
        self.samples_to_next = 0.0;
    }

    /// Stop ticking immediately. Any deferred tempo change applies now.
    pub fn stop(&mut self) {
        self.playing = false;
        if let Some(bpm) = self.pending_bpm.take() {
            self.bpm = bpm;
        }
        self.samples_to_next = 0.0;
    }

    /// Absolute sample position (start of the next block).
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Advance by one render block, collecting every tick boundary inside
    /// it. `ticks` is reused across blocks to keep the hot path free of
    /// allocation.
    pub fn advance(&mut self, frames: usize, ticks: &mut Vec<Tick>) {
        ticks.clear();
        let block_start = self.now;
        self.now += frames as u64;
        if !self.playing {
            return;
        }

        while self.samples_to_next < frames as f64 {
            let offset = self.samples_to_next.max(0.0) as u32;
            ticks.push(Tick {
                offset,
                timestamp: block_start + offset as u64,
            });
            if let Some(bpm) = self.pending_bpm.take() {
                self.bpm = bpm;
            }
            self.samples_to_next += self.interval();
        }
        self.samples_to_next -= frames as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_ticks(clock: &mut TransportClock, blocks: usize, frames: usize) -> Vec<Tick> {
        let mut out = Vec::new();
        let mut scratch = Vec::new();
        for _ in 0..blocks {
            clock.advance(frames, &mut scratch);
            out.extend_from_slice(&scratch);
        }
        out
    }

    #[test]
    fn ticks_are_evenly_spaced() {
        let mut clock = TransportClock::new(48_000.0, 120.0);
        clock.start();
        // 120 BPM -> 6000 samples per sixteenth.
        let ticks = collect_ticks(&mut clock, 100, 512);
        assert!(!ticks.is_empty());
        assert_eq!(ticks[0].timestamp, 0);
        for pair in ticks.windows(2) {
            let gap = pair[1].timestamp - pair[0].timestamp;
            assert!((5999..=6001).contains(&gap), "uneven gap {gap}");
        }
    }

    #[test]
    fn tick_count_matches_elapsed_time() {
        let mut clock = TransportClock::new(44_100.0, 150.0);
        clock.start();
        let frames = 256;
        let blocks = 2000;
        let ticks = collect_ticks(&mut clock, blocks, frames);
        let interval = 44_100.0 * 60.0 / 150.0 / 4.0;
        let expected = ((blocks * frames) as f64 / interval).ceil() as usize;
        assert_eq!(ticks.len(), expected);
    }

    #[test]
    fn tempo_change_waits_for_boundary() {
        let mut clock = TransportClock::new(48_000.0, 120.0);
        clock.start();
        let mut scratch = Vec::new();
        // First block fires the tick at offset 0 and schedules the next
        // at 6000 samples.
        clock.advance(512, &mut scratch);
        assert_eq!(scratch.len(), 1);

        clock.set_tempo(60.0);
        assert_eq!(clock.tempo(), 120.0, "tempo must not change mid-interval");

        let ticks = collect_ticks(&mut clock, 100, 512);
        // The gap into the boundary tick is still at the old tempo.
        assert_eq!(ticks[0].timestamp, 6000);
        assert_eq!(clock.tempo(), 60.0);
        // Spacing after the boundary uses the new tempo (12000 samples).
        let gap = ticks[1].timestamp - ticks[0].timestamp;
        assert_eq!(gap, 12_000);
    }

    #[test]
    fn set_tempo_clamps_range() {
        let mut clock = TransportClock::new(48_000.0, 120.0);
        clock.set_tempo(10.0);
        assert_eq!(clock.tempo(), 60.0);
        clock.set_tempo(999.0);
        assert_eq!(clock.tempo(), 200.0);
    }

    #[test]
    fn stop_then_start_ticks_immediately() {
        let mut clock = TransportClock::new(48_000.0, 120.0);
        clock.start();
        let mut scratch = Vec::new();
        for _ in 0..5 {
            clock.advance(512, &mut scratch);
        }
        clock.stop();
        clock.advance(512, &mut scratch);
        assert!(scratch.is_empty(), "no ticks while stopped");

        clock.start();
        let before = clock.now();
        clock.advance(512, &mut scratch);
        assert_eq!(scratch.len(), 1);
        assert_eq!(scratch[0].offset, 0);
        assert_eq!(scratch[0].timestamp, before);
    }

    #[test]
    fn stopped_clock_still_tracks_time() {
        let mut clock = TransportClock::new(48_000.0, 120.0);
        let mut scratch = Vec::new();
        clock.advance(512, &mut scratch);
        clock.advance(512, &mut scratch);
        assert_eq!(clock.now(), 1024);
    }
}
