//! End-to-end tests against the headless core: commands in, audio and
//! position events out, no audio device required.

use crossbeam_channel::{Receiver, Sender, unbounded};

use pulse_shared::session::{Session, Track, TrackKind};

use crate::commands::{EngineCommand, PositionEvent};
use crate::engine::{EngineConfig, EngineCore, EngineMonitor};
use crate::graph::SignalGraph;
use crate::legacy::LegacyChain;
use crate::nodes::GraphParam;

const SAMPLE_RATE: f32 = 48_000.0;
const BLOCK_FRAMES: usize = 500;

struct Rig {
    core: EngineCore,
    monitor: EngineMonitor,
    cmd_tx: Sender<EngineCommand>,
    drop_rx: Receiver<LegacyChain>,
}

impl Rig {
    /// Core with the graph already built and installed; readiness is
    /// deterministic because the graph is constructed synchronously.
    fn ready() -> Self {
        let mut rig = Self::deferred();
        rig.process_block();
        assert!(rig.core.is_ready());
        rig
    }

    /// Core whose graph channel the test controls by pre-loading it (or
    /// not) before the first block.
    fn deferred_with(graph: Option<SignalGraph>) -> Self {
        let (cmd_tx, cmd_rx) = unbounded();
        let (drop_tx, drop_rx) = unbounded();
        let (graph_tx, graph_rx) = crossbeam_channel::bounded(1);
        if let Some(graph) = graph {
            graph_tx.send(graph).unwrap();
        }
        let config = EngineConfig {
            sample_rate: SAMPLE_RATE,
            ..EngineConfig::default()
        };
        let (core, monitor) = EngineCore::with_graph_channel(config, cmd_rx, drop_tx, graph_rx);
        Self {
            core,
            monitor,
            cmd_tx,
            drop_rx,
        }
    }

    fn deferred() -> Self {
        Self::deferred_with(Some(SignalGraph::build(SAMPLE_RATE)))
    }

    fn process_block(&mut self) -> Vec<f32> {
        let mut out = vec![0.0_f32; BLOCK_FRAMES * 2];
        self.core.process(&mut out, 2);
        out
    }

    fn drain_events(&mut self) -> Vec<PositionEvent> {
        let mut events = Vec::new();
        while let Some(ev) = self.monitor.poll_position() {
            events.push(ev);
        }
        events
    }

    fn send(&self, cmd: EngineCommand) {
        self.cmd_tx.send(cmd).unwrap();
    }
}

fn every_step_session() -> Session {
    let mut session = Session::default(); // 120 BPM, 16 steps
    let mut track = Track::new("lead", 16);
    track.pattern.fill(true);
    session.tracks.push(track);
    session
}

#[test]
fn sixteen_step_sequence_is_exact() {
    let mut rig = Rig::ready();
    let session = every_step_session();
    rig.send(EngineCommand::LoadSession(session));
    rig.send(EngineCommand::Play);

    // 120 BPM at 48 kHz = 6000 samples per step = 12 blocks of 500.
    let mut steps = Vec::new();
    let mut peak = 0.0_f32;
    for _ in 0..(12 * 40) {
        let out = rig.process_block();
        peak = out.iter().fold(peak, |m, s| m.max(s.abs()));
        for ev in rig.drain_events() {
            assert!(ev.is_playing);
            steps.push(ev.step);
        }
        if steps.len() >= 40 {
            break;
        }
    }

    let expected: Vec<u32> = (0..40).map(|i| i % 16).collect();
    assert_eq!(steps[..40], expected[..], "no repeats, no skips");
    assert!(peak > 0.01, "pattern should make sound, peak {peak}");
    assert!(peak <= 1.0, "limiter must hold the ceiling");
}

#[test]
fn stop_resets_to_step_zero() {
    let mut rig = Rig::ready();
    let session = every_step_session();
    rig.send(EngineCommand::LoadSession(session));
    rig.send(EngineCommand::Play);

    // Run until a few steps have sounded.
    let mut last_step = 0;
    for _ in 0..60 {
        rig.process_block();
        for ev in rig.drain_events() {
            last_step = ev.step;
        }
        if last_step >= 3 {
            break;
        }
    }
    assert!(last_step >= 3);

    rig.send(EngineCommand::Stop);
    rig.process_block();
    let events = rig.drain_events();
    let stop_ev = events.last().unwrap();
    assert_eq!(
        *stop_ev,
        PositionEvent {
            step: 0,
            is_playing: false
        }
    );
    assert!(!rig.monitor.is_playing());
    assert_eq!(rig.monitor.current_step(), 0);

    // Restart always begins at step 0, regardless of where stop landed.
    rig.send(EngineCommand::Play);
    rig.process_block();
    let first = rig.drain_events().into_iter().next().unwrap();
    assert_eq!(first.step, 0);
    assert!(first.is_playing);
}

#[test]
fn stop_silences_without_hung_notes() {
    let mut rig = Rig::ready();
    // Kill the time-based effects so the only tail is the voice release.
    rig.send(EngineCommand::SetGraphParam {
        param: GraphParam::ReverbWet,
        value: 0.0,
    });
    rig.send(EngineCommand::SetGraphParam {
        param: GraphParam::DelayWet,
        value: 0.0,
    });
    // Let the wet ramps run out before playing.
    for _ in 0..12 {
        rig.process_block();
    }

    let session = every_step_session();
    rig.send(EngineCommand::LoadSession(session));
    rig.send(EngineCommand::Play);
    for _ in 0..24 {
        rig.process_block();
    }
    rig.drain_events();
    rig.send(EngineCommand::Stop);

    // Release is 0.3 s; render two seconds and require the end silent.
    let mut last = Vec::new();
    for _ in 0..192 {
        last = rig.process_block();
    }
    let tail_peak = last.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
    assert!(tail_peak < 1e-3, "note hung after stop, tail peak {tail_peak}");

    // The only event after the stop is the stop event itself.
    let events = rig.drain_events();
    assert_eq!(
        events,
        vec![PositionEvent {
            step: 0,
            is_playing: false
        }]
    );
}

#[test]
fn play_is_dropped_until_graph_ready() {
    let mut rig = Rig::deferred_with(None);
    rig.process_block();
    assert!(!rig.core.is_ready());

    rig.send(EngineCommand::Play);
    rig.process_block();
    assert!(!rig.monitor.is_playing(), "play before readiness must drop");

    // Editing is fine before readiness — only sound is gated.
    rig.send(EngineCommand::AddTrack(Track::new("early", 16)));
    rig.process_block();
    assert_eq!(rig.monitor.session().tracks.len(), 1);
}

#[test]
fn session_snapshot_and_reply_channel_agree() {
    let mut rig = Rig::ready();
    let mut track = Track::new("bass", 16);
    track.pattern[0] = true;
    let track_id = track.id;
    rig.send(EngineCommand::AddTrack(track));
    rig.send(EngineCommand::SetTempo(140.0));

    let (reply_tx, reply_rx) = unbounded();
    rig.send(EngineCommand::GetSession(reply_tx));
    rig.process_block();

    let replied = reply_rx.recv().unwrap();
    assert_eq!(replied.tempo, 140.0);
    assert_eq!(replied.tracks.len(), 1);
    assert_eq!(replied.tracks[0].id, track_id);

    let snapshot = rig.monitor.session();
    assert_eq!(*snapshot, replied);
}

#[test]
fn legacy_chain_created_and_reaped() {
    let mut rig = Rig::ready();
    let mut track = Track::new("perc", 16);
    track.kind = TrackKind::Legacy;
    track.pattern[0] = true;
    let track_id = track.id;
    rig.send(EngineCommand::AddTrack(track));
    rig.send(EngineCommand::Play);

    let mut peak = 0.0_f32;
    for _ in 0..13 {
        let out = rig.process_block();
        peak = out.iter().fold(peak, |m, s| m.max(s.abs()));
    }
    assert!(peak > 0.001, "legacy chain should sound, peak {peak}");

    rig.send(EngineCommand::RemoveTrack { track_id });
    rig.process_block();
    assert!(
        rig.drop_rx.try_recv().is_ok(),
        "removed chain must go to the reaper, not drop on the audio thread"
    );
    assert!(rig.monitor.session().tracks.is_empty());
}

#[test]
fn load_session_ignored_while_playing() {
    let mut rig = Rig::ready();
    let session = every_step_session();
    rig.send(EngineCommand::LoadSession(session));
    rig.send(EngineCommand::Play);
    rig.process_block();

    rig.send(EngineCommand::LoadSession(Session {
        tempo: 80.0,
        step_count: 8,
        tracks: Vec::new(),
    }));
    rig.process_block();

    let snapshot = rig.monitor.session();
    assert_eq!(snapshot.step_count, 16, "load must not land mid-playback");
    assert_eq!(snapshot.tracks.len(), 1);

    rig.send(EngineCommand::Stop);
    rig.send(EngineCommand::LoadSession(Session {
        tempo: 80.0,
        step_count: 8,
        tracks: Vec::new(),
    }));
    rig.process_block();
    assert_eq!(rig.monitor.session().step_count, 8);
}

#[test]
fn invalid_step_count_rejected_end_to_end() {
    let mut rig = Rig::ready();
    rig.send(EngineCommand::SetStepCount(2));
    rig.send(EngineCommand::SetStepCount(100));
    rig.process_block();
    assert_eq!(rig.monitor.session().step_count, 16);

    rig.send(EngineCommand::SetStepCount(32));
    rig.process_block();
    assert_eq!(rig.monitor.session().step_count, 32);
}

#[test]
fn toggle_growth_visible_in_snapshot() {
    let mut rig = Rig::ready();
    let track = Track::new("grow", 16);
    let track_id = track.id;
    rig.send(EngineCommand::AddTrack(track));
    rig.send(EngineCommand::ToggleStep { track_id, index: 15 });
    rig.process_block();

    let snapshot = rig.monitor.session();
    assert_eq!(snapshot.step_count, 32);
    assert!(snapshot.tracks[0].pattern[15]);
    assert_eq!(snapshot.tracks[0].pattern.len(), 32);
}
