//! Headless runner: drives the engine core without an audio device,
//! printing position events for a demo session.

use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use pulse_engine::engine::{EngineConfig, EngineCore};
use pulse_engine::{EngineCommand, GraphParam};
use pulse_shared::session::{Session, Track, Waveform};

fn demo_session() -> Session {
    let mut session = Session::default();

    let mut kick = Track::new("Kick", 16);
    kick.synth.pitch_offset_semitones = -24;
    kick.synth.waveform = Waveform::Sine;
    kick.synth.decay = 0.2;
    kick.synth.sustain = 0.0;
    for i in (0..16).step_by(4) {
        kick.pattern[i] = true;
    }

    let mut hat = Track::new("Hat", 16);
    hat.synth.pitch_offset_semitones = 24;
    hat.synth.waveform = Waveform::Square;
    hat.synth.decay = 0.05;
    hat.synth.sustain = 0.0;
    hat.mixer.volume_db = -12.0;
    for i in (2..16).step_by(4) {
        hat.pattern[i] = true;
    }

    let mut bass = Track::new("Bass", 16);
    bass.synth.pitch_offset_semitones = -12;
    bass.synth.waveform = Waveform::Sawtooth;
    bass.pattern[0] = true;
    bass.pattern[7] = true;
    bass.pattern[10] = true;

    session.tracks = vec![kick, hat, bass];
    session
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    println!("[Headless] Starting engine core...");

    let (cmd_tx, cmd_rx) = unbounded();
    let (drop_tx, drop_rx) = unbounded();
    thread::spawn(move || for _chain in drop_rx {});

    let config = EngineConfig::default();
    let sample_rate = config.sample_rate;
    let (mut core, mut monitor) = EngineCore::new(config, cmd_rx, drop_tx);

    // The graph builds on a background thread; render silence until it
    // installs.
    let mut block = vec![0.0_f32; 512 * 2];
    while !core.is_ready() {
        core.process(&mut block, 2);
        thread::sleep(Duration::from_millis(1));
    }
    println!("[Headless] Graph ready. Loading demo session...");

    cmd_tx.send(EngineCommand::LoadSession(demo_session()))?;
    cmd_tx.send(EngineCommand::SetGraphParam {
        param: GraphParam::ReverbWet,
        value: 0.15,
    })?;
    cmd_tx.send(EngineCommand::Play)?;

    // Render four seconds of audio, reporting positions and peak level.
    let blocks = (sample_rate * 4.0 / 512.0) as usize;
    let mut peak = 0.0_f32;
    for _ in 0..blocks {
        core.process(&mut block, 2);
        peak = block.iter().fold(peak, |m, s| m.max(s.abs()));
        while let Some(ev) = monitor.poll_position() {
            println!("[Headless] step {:2} playing={}", ev.step, ev.is_playing);
        }
    }

    cmd_tx.send(EngineCommand::Stop)?;
    core.process(&mut block, 2);
    while let Some(ev) = monitor.poll_position() {
        println!("[Headless] step {:2} playing={}", ev.step, ev.is_playing);
    }

    println!("[Headless] Done. Peak level {peak:.3}");
    Ok(())
}
