//! Pattern store — exclusive owner of the track list and the sequencer
//! settings. The scheduler only ever reads it; every mutation comes
//! through the methods here, applied between ticks.

use pulse_shared::session::{Session, SynthParams, Track, Waveform};
use pulse_shared::{
    EngineError, MAX_STEP_COUNT, MAX_TEMPO, MAX_VOLUME_DB, MIN_STEP_COUNT, MIN_TEMPO,
    MIN_VOLUME_DB,
};
use uuid::Uuid;

/// How many steps a toggle-driven grow adds at once.
const GROW_CHUNK: u32 = 16;
/// Toggling inside this many trailing steps grows the pattern.
const GROW_MARGIN: u32 = 2;

/// Field selector for synthesis-parameter updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthParamId {
    PitchOffsetSemitones,
    Attack,
    Decay,
    Sustain,
    Release,
    Distortion,
    FilterCutoffHz,
    FilterResonanceQ,
}

pub struct PatternStore {
    tracks: Vec<Track>,
    step_count: u32,
    tempo: f32,
    // Master sends, persisted with the engine but not part of the
    // session payload.
    pub reverb_wet: f32,
    pub delay_wet: f32,
    pub master_gain_db: f32,
}

impl PatternStore {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            step_count: 16,
            tempo: 120.0,
            reverb_wet: 0.2,
            delay_wet: 0.2,
            master_gain_db: 0.0,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    pub fn set_tempo(&mut self, bpm: f32) {
        self.tempo = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
    }

    fn track_mut(&mut self, track_id: Uuid) -> Result<&mut Track, EngineError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or(EngineError::UnknownTrack(track_id))
    }

    /// Flip one step. Toggling within the last two positions grows the
    /// pattern first (up to 64 steps, in chunks of 16); growth and toggle
    /// are one atomic mutation.
    pub fn toggle_step(&mut self, track_id: Uuid, index: usize) -> Result<(), EngineError> {
        if !self.tracks.iter().any(|t| t.id == track_id) {
            return Err(EngineError::UnknownTrack(track_id));
        }
        if index >= self.step_count as usize {
            return Ok(()); // stale UI index, nothing to do
        }
        if index as u32 + GROW_MARGIN >= self.step_count && self.step_count < MAX_STEP_COUNT {
            let grown = self.step_count + GROW_CHUNK.min(MAX_STEP_COUNT - self.step_count);
            self.resize_patterns(grown);
        }
        let track = self.track_mut(track_id)?;
        track.pattern[index] = !track.pattern[index];
        Ok(())
    }

    /// Explicit resize; rejects counts outside [4, 64] with no state
    /// change. Shrinking truncates, growing zero-extends.
    pub fn set_step_count(&mut self, n: u32) -> Result<(), EngineError> {
        if !(MIN_STEP_COUNT..=MAX_STEP_COUNT).contains(&n) {
            return Err(EngineError::InvalidStepCount(n));
        }
        self.resize_patterns(n);
        Ok(())
    }

    fn resize_patterns(&mut self, n: u32) {
        self.step_count = n;
        for track in &mut self.tracks {
            track.pattern.resize(n as usize, false);
        }
    }

    /// Add a track, reconciling its pattern length with the current step
    /// count.
    pub fn add_track(&mut self, track: Track) {
        self.tracks.push(track.reconciled(self.step_count));
    }

    pub fn remove_track(&mut self, track_id: Uuid) -> Option<Track> {
        let pos = self.tracks.iter().position(|t| t.id == track_id)?;
        Some(self.tracks.remove(pos))
    }

    pub fn toggle_mute(&mut self, track_id: Uuid) -> Result<(), EngineError> {
        let track = self.track_mut(track_id)?;
        track.mixer.muted = !track.mixer.muted;
        Ok(())
    }

    pub fn toggle_solo(&mut self, track_id: Uuid) -> Result<(), EngineError> {
        let track = self.track_mut(track_id)?;
        track.mixer.soloed = !track.mixer.soloed;
        Ok(())
    }

    pub fn set_volume(&mut self, track_id: Uuid, volume_db: f32) -> Result<(), EngineError> {
        let track = self.track_mut(track_id)?;
        track.mixer.volume_db = volume_db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB);
        Ok(())
    }

    pub fn set_pan(&mut self, track_id: Uuid, pan: f32) -> Result<(), EngineError> {
        let track = self.track_mut(track_id)?;
        track.mixer.pan = pan.clamp(-1.0, 1.0);
        Ok(())
    }

    pub fn set_synth_param(
        &mut self,
        track_id: Uuid,
        param: SynthParamId,
        value: f32,
    ) -> Result<SynthParams, EngineError> {
        let track = self.track_mut(track_id)?;
        let mut synth = track.synth;
        match param {
            SynthParamId::PitchOffsetSemitones => {
                synth.pitch_offset_semitones = value.round() as i8;
            }
            SynthParamId::Attack => synth.attack = value,
            SynthParamId::Decay => synth.decay = value,
            SynthParamId::Sustain => synth.sustain = value,
            SynthParamId::Release => synth.release = value,
            SynthParamId::Distortion => synth.distortion = value,
            SynthParamId::FilterCutoffHz => synth.filter_cutoff_hz = value,
            SynthParamId::FilterResonanceQ => synth.filter_resonance_q = value,
        }
        track.synth = synth.clamped();
        Ok(track.synth)
    }

    pub fn set_waveform(&mut self, track_id: Uuid, waveform: Waveform) -> Result<(), EngineError> {
        let track = self.track_mut(track_id)?;
        track.synth.waveform = waveform;
        Ok(())
    }

    /// Stable list move; display order only, no audio effect.
    pub fn reorder_tracks(&mut self, from: usize, to: usize) {
        if from >= self.tracks.len() || from == to {
            return;
        }
        let track = self.tracks.remove(from);
        let to = to.min(self.tracks.len());
        self.tracks.insert(to, track);
    }

    /// Wholesale replace from a session payload, clamping and
    /// reconciling out-of-range input rather than rejecting it.
    pub fn load_session(&mut self, session: Session) {
        let session = session.reconciled();
        self.tempo = session.tempo;
        self.step_count = session.step_count;
        self.tracks = session.tracks;
    }

    /// Snapshot for persistence and for the published session cell.
    pub fn session(&self) -> Session {
        Session {
            tempo: self.tempo,
            step_count: self.step_count,
            tracks: self.tracks.clone(),
        }
    }

    #[cfg(test)]
    fn invariant_holds(&self) -> bool {
        self.tracks
            .iter()
            .all(|t| t.pattern.len() == self.step_count as usize)
    }
}

impl Default for PatternStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_tracks(n: usize) -> (PatternStore, Vec<Uuid>) {
        let mut store = PatternStore::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let track = Track::new(format!("t{i}"), store.step_count());
            ids.push(track.id);
            store.add_track(track);
        }
        (store, ids)
    }

    #[test]
    fn pattern_length_tracks_step_count_through_mutations() {
        let (mut store, ids) = store_with_tracks(3);
        assert!(store.invariant_holds());

        store.set_step_count(24).unwrap();
        assert!(store.invariant_holds());

        store.toggle_step(ids[0], 23).unwrap(); // grows to 40
        assert!(store.invariant_holds());

        store.add_track(Track::new("late", 4));
        assert!(store.invariant_holds());

        store.set_step_count(8).unwrap();
        assert!(store.invariant_holds());
    }

    #[test]
    fn toggle_twice_restores_prior_value_and_never_shrinks() {
        let (mut store, ids) = store_with_tracks(1);
        store.toggle_step(ids[0], 3).unwrap();
        assert!(store.tracks()[0].pattern[3]);
        store.toggle_step(ids[0], 3).unwrap();
        assert!(!store.tracks()[0].pattern[3]);
        assert_eq!(store.step_count(), 16);

        // Paired toggles at a growth index leave the bit restored and the
        // count grown — growth is one-way.
        store.toggle_step(ids[0], 15).unwrap();
        store.toggle_step(ids[0], 15).unwrap();
        assert!(!store.tracks()[0].pattern[15]);
        assert_eq!(store.step_count(), 32);
    }

    #[test]
    fn toggling_near_tail_grows_by_sixteen() {
        let (mut store, ids) = store_with_tracks(2);
        store.toggle_step(ids[0], 2).unwrap();

        store.toggle_step(ids[1], 15).unwrap();
        assert_eq!(store.step_count(), 32);
        // Pre-existing bits preserved, toggled index set, tail zeroed.
        assert!(store.tracks()[0].pattern[2]);
        assert!(store.tracks()[1].pattern[15]);
        assert!(store.tracks()[1].pattern[16..].iter().all(|&b| !b));
        assert!(store.invariant_holds());
    }

    #[test]
    fn growth_saturates_at_sixty_four() {
        let (mut store, ids) = store_with_tracks(1);
        store.set_step_count(56).unwrap();
        store.toggle_step(ids[0], 55).unwrap();
        assert_eq!(store.step_count(), 64);

        // At the ceiling a tail toggle just toggles.
        store.toggle_step(ids[0], 63).unwrap();
        assert_eq!(store.step_count(), 64);
        assert!(store.tracks()[0].pattern[63]);
    }

    #[test]
    fn set_step_count_rejects_out_of_range() {
        let (mut store, _) = store_with_tracks(1);
        assert_eq!(
            store.set_step_count(3),
            Err(EngineError::InvalidStepCount(3))
        );
        assert_eq!(
            store.set_step_count(65),
            Err(EngineError::InvalidStepCount(65))
        );
        assert_eq!(store.step_count(), 16, "rejection must not change state");
    }

    #[test]
    fn unknown_track_is_an_error_not_a_panic() {
        let (mut store, _) = store_with_tracks(1);
        let ghost = Uuid::new_v4();
        assert_eq!(
            store.toggle_step(ghost, 0),
            Err(EngineError::UnknownTrack(ghost))
        );
        assert_eq!(store.toggle_mute(ghost), Err(EngineError::UnknownTrack(ghost)));
    }

    #[test]
    fn synth_param_updates_are_clamped() {
        let (mut store, ids) = store_with_tracks(1);
        let synth = store
            .set_synth_param(ids[0], SynthParamId::FilterCutoffHz, 1_000_000.0)
            .unwrap();
        assert_eq!(synth.filter_cutoff_hz, 20_000.0);

        let synth = store
            .set_synth_param(ids[0], SynthParamId::PitchOffsetSemitones, 99.0)
            .unwrap();
        assert_eq!(synth.pitch_offset_semitones, 24);
    }

    #[test]
    fn reorder_is_stable_and_bounds_checked() {
        let (mut store, ids) = store_with_tracks(3);
        store.reorder_tracks(0, 2);
        let order: Vec<Uuid> = store.tracks().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);

        // Out-of-range source is a no-op.
        store.reorder_tracks(10, 0);
        let order2: Vec<Uuid> = store.tracks().iter().map(|t| t.id).collect();
        assert_eq!(order, order2);
    }

    #[test]
    fn load_session_reconciles_mismatched_patterns() {
        let (mut store, _) = store_with_tracks(1);
        let mut short = Track::new("short", 4);
        short.pattern[0] = true;
        let long = Track::new("long", 64);
        let session = Session {
            tempo: 500.0,
            step_count: 20,
            tracks: vec![short, long],
        };
        store.load_session(session);

        assert_eq!(store.tempo(), MAX_TEMPO);
        assert_eq!(store.step_count(), 20);
        assert!(store.invariant_holds());
        assert!(store.tracks()[0].pattern[0]);
    }

    #[test]
    fn remove_track_returns_the_record() {
        let (mut store, ids) = store_with_tracks(2);
        let removed = store.remove_track(ids[0]).unwrap();
        assert_eq!(removed.id, ids[0]);
        assert_eq!(store.tracks().len(), 1);
        assert!(store.remove_track(ids[0]).is_none());
    }
}
