//! Engine core and audio stream.
//!
//! `EngineCore` owns every piece of mutable engine state and is driven
//! one render block at a time — by the cpal callback in production, or
//! directly by tests and the headless runner. The UI half holds only the
//! command sender and the read-side monitor.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;

use arc_swap::ArcSwap;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use uuid::Uuid;

use pulse_shared::session::{Session, TrackKind};

use crate::commands::{EngineCommand, PositionEvent};
use crate::graph::SignalGraph;
use crate::legacy::LegacyChain;
use crate::nodes::GraphParam;
use crate::scheduler::{NoteSpec, StepScheduler, TriggerSink};
use crate::store::{PatternStore, SynthParamId};
use crate::transport::{Tick, TransportClock};
use crate::voice_pool::{DEFAULT_VOICE_CAPACITY, VoicePool};

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub voice_capacity: usize,
    /// Capacity of the position-event ring buffer; overflow drops events
    /// rather than blocking the audio thread.
    pub position_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            voice_capacity: DEFAULT_VOICE_CAPACITY,
            position_capacity: 256,
        }
    }
}

/// Read surface handed to the UI/collaborator side.
pub struct EngineMonitor {
    position_rx: HeapCons<PositionEvent>,
    session: Arc<ArcSwap<Session>>,
    ready: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    current_step: Arc<AtomicU32>,
}

impl EngineMonitor {
    /// Drain one pending position event, oldest first.
    pub fn poll_position(&mut self) -> Option<PositionEvent> {
        self.position_rx.try_pop()
    }

    /// Latest published session snapshot (lock-free read).
    pub fn session(&self) -> Arc<Session> {
        self.session.load_full()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn current_step(&self) -> u32 {
        self.current_step.load(Ordering::Relaxed)
    }
}

/// Routes scheduler dispatches to the shared pool or a per-track chain.
struct TriggerRouter<'a> {
    pool: &'a mut VoicePool,
    legacy: &'a mut HashMap<Uuid, LegacyChain>,
}

impl TriggerSink for TriggerRouter<'_> {
    fn trigger(&mut self, track_id: Uuid, kind: TrackKind, spec: NoteSpec, velocity: f32, at: u64) {
        match kind {
            TrackKind::Pitched => self.pool.trigger(spec, velocity, at),
            TrackKind::Legacy => {
                if let Some(chain) = self.legacy.get_mut(&track_id) {
                    chain.trigger(spec, velocity, at);
                }
            }
        }
    }
}

pub struct EngineCore {
    store: PatternStore,
    clock: TransportClock,
    scheduler: StepScheduler,
    pool: VoicePool,
    graph: Option<SignalGraph>,
    graph_rx: Receiver<SignalGraph>,
    legacy: HashMap<Uuid, LegacyChain>,
    command_rx: Receiver<EngineCommand>,
    /// Removed chains are dropped on the reaper thread, not here.
    drop_tx: Sender<LegacyChain>,
    position_tx: HeapProd<PositionEvent>,
    session_cell: Arc<ArcSwap<Session>>,
    ready: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    current_step: Arc<AtomicU32>,
    ticks: Vec<Tick>,
    bus: Vec<f32>,
    sample_rate: f32,
}

impl EngineCore {
    /// Build a core and kick off graph construction on a background
    /// thread. The engine reports ready only once the built graph has
    /// been installed at a block boundary.
    pub fn new(
        config: EngineConfig,
        command_rx: Receiver<EngineCommand>,
        drop_tx: Sender<LegacyChain>,
    ) -> (Self, EngineMonitor) {
        let (graph_tx, graph_rx) = crossbeam_channel::bounded(1);
        let sample_rate = config.sample_rate;
        thread::spawn(move || {
            let graph = SignalGraph::build(sample_rate);
            let _ = graph_tx.send(graph);
        });
        Self::with_graph_channel(config, command_rx, drop_tx, graph_rx)
    }

    pub(crate) fn with_graph_channel(
        config: EngineConfig,
        command_rx: Receiver<EngineCommand>,
        drop_tx: Sender<LegacyChain>,
        graph_rx: Receiver<SignalGraph>,
    ) -> (Self, EngineMonitor) {
        let store = PatternStore::new();
        let session_cell = Arc::new(ArcSwap::from_pointee(store.session()));
        let ready = Arc::new(AtomicBool::new(false));
        let playing = Arc::new(AtomicBool::new(false));
        let current_step = Arc::new(AtomicU32::new(0));

        let (position_tx, position_rx) =
            HeapRb::<PositionEvent>::new(config.position_capacity.max(16)).split();

        let monitor = EngineMonitor {
            position_rx,
            session: session_cell.clone(),
            ready: ready.clone(),
            playing: playing.clone(),
            current_step: current_step.clone(),
        };

        let core = Self {
            clock: TransportClock::new(config.sample_rate as f64, store.tempo()),
            store,
            scheduler: StepScheduler::new(),
            pool: VoicePool::new(config.voice_capacity, config.sample_rate),
            graph: None,
            graph_rx,
            legacy: HashMap::new(),
            command_rx,
            drop_tx,
            position_tx,
            session_cell,
            ready,
            playing,
            current_step,
            ticks: Vec::with_capacity(16),
            bus: vec![0.0; 2048 * 2],
            sample_rate: config.sample_rate,
        };
        (core, monitor)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn install_pending_graph(&mut self) {
        if self.graph.is_some() {
            return;
        }
        if let Ok(mut graph) = self.graph_rx.try_recv() {
            graph.set_param(GraphParam::ReverbWet, self.store.reverb_wet);
            graph.set_param(GraphParam::DelayWet, self.store.delay_wet);
            graph.set_param(GraphParam::MasterGainDb, self.store.master_gain_db);
            self.graph = Some(graph);
            self.ready.store(true, Ordering::Release);
            log::info!("signal graph installed, engine ready");
        }
    }

    /// Render one block of interleaved output with `channels` channels.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        self.install_pending_graph();

        let mut dirty = false;
        while let Ok(cmd) = self.command_rx.try_recv() {
            dirty |= self.apply_command(cmd);
        }
        if dirty {
            self.publish_session();
        }

        let channels = channels.max(1);
        let frames = output.len() / channels;
        if self.bus.len() < frames * 2 {
            self.bus.resize(frames * 2, 0.0);
        }
        let block_start = self.clock.now();

        let mut ticks = std::mem::take(&mut self.ticks);
        self.clock.advance(frames, &mut ticks);
        let step_seconds = 60.0 / self.clock.tempo() / 4.0;
        for tick in &ticks {
            let mut router = TriggerRouter {
                pool: &mut self.pool,
                legacy: &mut self.legacy,
            };
            let step = self.scheduler.on_tick(
                self.store.tracks(),
                self.store.step_count(),
                step_seconds,
                *tick,
                &mut router,
            );
            self.current_step.store(step, Ordering::Relaxed);
            let _ = self.position_tx.try_push(PositionEvent {
                step,
                is_playing: true,
            });
        }
        self.ticks = ticks;

        // Voices keep rendering after a stop so release tails finish.
        let bus = &mut self.bus[..frames * 2];
        bus.fill(0.0);
        self.pool.render(bus, block_start);
        for chain in self.legacy.values_mut() {
            chain.render(bus, block_start);
        }
        if let Some(graph) = self.graph.as_mut() {
            graph.process(bus);
        }

        for i in 0..frames {
            let left = bus[i * 2];
            let right = bus[i * 2 + 1];
            match channels {
                1 => output[i] = (left + right) * 0.5,
                2 => {
                    output[i * 2] = left;
                    output[i * 2 + 1] = right;
                }
                n => {
                    let frame = &mut output[i * n..(i + 1) * n];
                    frame.fill(0.0);
                    frame[0] = left;
                    frame[1] = right;
                }
            }
        }
    }

    fn set_graph_param(&mut self, param: GraphParam, value: f32) {
        let Some(graph) = self.graph.as_mut() else {
            log::warn!("parameter change dropped, graph not ready: {param:?}");
            return;
        };
        graph.set_param(param, value);
        match param {
            GraphParam::ReverbWet => self.store.reverb_wet = value.clamp(0.0, 1.0),
            GraphParam::DelayWet => self.store.delay_wet = value.clamp(0.0, 1.0),
            GraphParam::MasterGainDb => self.store.master_gain_db = value.clamp(-60.0, 6.0),
            _ => {}
        }
    }

    fn publish_session(&self) {
        self.session_cell.store(Arc::new(self.store.session()));
    }

    /// Apply one editing command. Returns true when the store changed and
    /// the session snapshot needs republishing.
    fn apply_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Play => {
                if self.graph.is_none() {
                    log::warn!("play dropped, graph not ready");
                    return false;
                }
                if self.clock.is_playing() {
                    return false;
                }
                self.scheduler.reset();
                self.clock.start();
                self.playing.store(true, Ordering::Relaxed);
                false
            }
            EngineCommand::Stop => {
                self.clock.stop();
                self.scheduler.reset();
                let now = self.clock.now();
                self.pool.release_all(now);
                for chain in self.legacy.values_mut() {
                    chain.release(now);
                }
                self.playing.store(false, Ordering::Relaxed);
                self.current_step.store(0, Ordering::Relaxed);
                let _ = self.position_tx.try_push(PositionEvent {
                    step: 0,
                    is_playing: false,
                });
                false
            }
            EngineCommand::SetTempo(bpm) => {
                self.clock.set_tempo(bpm);
                self.store.set_tempo(bpm);
                true
            }
            EngineCommand::SetStepCount(n) => match self.store.set_step_count(n) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("step count rejected: {e}");
                    false
                }
            },
            EngineCommand::ToggleStep { track_id, index } => {
                let result = self.store.toggle_step(track_id, index);
                self.log_store(result)
            }
            EngineCommand::AddTrack(track) => {
                if track.kind == TrackKind::Legacy {
                    self.legacy.insert(
                        track.id,
                        LegacyChain::new(self.sample_rate, &track.synth, track.mixer.pan),
                    );
                }
                self.store.add_track(track);
                true
            }
            EngineCommand::RemoveTrack { track_id } => {
                match self.store.remove_track(track_id) {
                    Some(_) => {
                        if let Some(chain) = self.legacy.remove(&track_id) {
                            let _ = self.drop_tx.send(chain);
                        }
                        true
                    }
                    None => {
                        log::warn!("remove dropped, unknown track {track_id}");
                        false
                    }
                }
            }
            EngineCommand::ToggleMute { track_id } => {
                let result = self.store.toggle_mute(track_id);
                self.log_store(result)
            }
            EngineCommand::ToggleSolo { track_id } => {
                let result = self.store.toggle_solo(track_id);
                self.log_store(result)
            }
            EngineCommand::SetTrackVolume {
                track_id,
                volume_db,
            } => {
                let result = self.store.set_volume(track_id, volume_db);
                self.log_store(result)
            }
            EngineCommand::SetTrackPan { track_id, pan } => {
                let result = self.store.set_pan(track_id, pan);
                let changed = self.log_store(result);
                if changed {
                    if let Some(chain) = self.legacy.get_mut(&track_id) {
                        chain.set_pan(pan);
                    }
                }
                changed
            }
            EngineCommand::SetSynthParam {
                track_id,
                param,
                value,
            } => match self.store.set_synth_param(track_id, param, value) {
                Ok(synth) => {
                    let kind = self
                        .store
                        .tracks()
                        .iter()
                        .find(|t| t.id == track_id)
                        .map(|t| t.kind);
                    match kind {
                        Some(TrackKind::Legacy) => {
                            if let Some(chain) = self.legacy.get_mut(&track_id) {
                                chain.update_params(&synth);
                            }
                        }
                        Some(TrackKind::Pitched) => {
                            // Tone controls of pitched tracks land on the
                            // shared-bus stages; last write wins.
                            let forward = match param {
                                SynthParamId::Distortion => {
                                    Some((GraphParam::DistortionAmount, synth.distortion))
                                }
                                SynthParamId::FilterCutoffHz => {
                                    Some((GraphParam::FilterCutoffHz, synth.filter_cutoff_hz))
                                }
                                SynthParamId::FilterResonanceQ => {
                                    Some((GraphParam::FilterResonanceQ, synth.filter_resonance_q))
                                }
                                _ => None,
                            };
                            if let Some((p, v)) = forward {
                                self.set_graph_param(p, v);
                            }
                        }
                        None => {}
                    }
                    true
                }
                Err(e) => {
                    log::warn!("synth update dropped: {e}");
                    false
                }
            },
            EngineCommand::SetWaveform { track_id, waveform } => {
                let result = self.store.set_waveform(track_id, waveform);
                self.log_store(result)
            }
            EngineCommand::ReorderTracks { from, to } => {
                self.store.reorder_tracks(from, to);
                true
            }
            EngineCommand::LoadSession(session) => {
                if self.clock.is_playing() {
                    log::warn!("session load dropped while playing");
                    return false;
                }
                // Dispose chains of the outgoing session off-thread.
                for (_, chain) in self.legacy.drain() {
                    let _ = self.drop_tx.send(chain);
                }
                self.store.load_session(session);
                self.clock.set_tempo(self.store.tempo());
                for track in self.store.tracks() {
                    if track.kind == TrackKind::Legacy {
                        self.legacy.insert(
                            track.id,
                            LegacyChain::new(self.sample_rate, &track.synth, track.mixer.pan),
                        );
                    }
                }
                true
            }
            EngineCommand::SetGraphParam { param, value } => {
                self.set_graph_param(param, value);
                false
            }
            EngineCommand::GetSession(reply_tx) => {
                let _ = reply_tx.send(self.store.session());
                false
            }
        }
    }

    fn log_store(&self, result: Result<(), pulse_shared::EngineError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("edit dropped: {e}");
                false
            }
        }
    }
}

/// cpal-backed engine: wraps an [`EngineCore`] inside the output stream
/// callback and owns the stream plus the chain-reaper thread.
pub struct AudioEngine {
    stream: Option<cpal::Stream>,
    monitor: EngineMonitor,
    sample_rate: u32,
}

impl AudioEngine {
    pub fn new(command_rx: Receiver<EngineCommand>) -> Result<Self, anyhow::Error> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(anyhow::anyhow!("No output device available"))?;
        let config = device.default_output_config()?;

        let sample_rate = config.sample_rate();
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();

        if let cpal::SupportedBufferSize::Range { min, max } = config.buffer_size() {
            log::debug!("device buffer range: {min}-{max}");
        }

        let mut stream_config: cpal::StreamConfig = config.into();
        stream_config.buffer_size = cpal::BufferSize::Fixed(1024);

        // Reaper thread: removed legacy chains deallocate here, never on
        // the audio thread.
        let (drop_tx, drop_rx) = crossbeam_channel::unbounded::<LegacyChain>();
        thread::spawn(move || for _chain in drop_rx {});

        let engine_config = EngineConfig {
            sample_rate: sample_rate as f32,
            ..EngineConfig::default()
        };
        let (mut core, monitor) = EngineCore::new(engine_config, command_rx, drop_tx);

        let err_fn = |err: cpal::StreamError| {
            let s = err.to_string();
            // Under/overrun chatter is routine on small buffers.
            if !s.contains("underrun") && !s.contains("overrun") {
                log::warn!("stream error: {s}");
            }
        };

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    core.process(data, channels);
                },
                err_fn,
                None,
            )?,
            _ => return Err(anyhow::anyhow!("Unsupported sample format")),
        };

        stream.play()?;

        Ok(Self {
            stream: Some(stream),
            monitor,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_playing(&self) -> bool {
        self.monitor.is_playing()
    }

    pub fn is_ready(&self) -> bool {
        self.monitor.is_ready()
    }

    pub fn current_step(&self) -> u32 {
        self.monitor.current_step()
    }

    pub fn session(&self) -> Arc<Session> {
        self.monitor.session()
    }

    pub fn poll_position(&mut self) -> Option<PositionEvent> {
        self.monitor.poll_position()
    }

    /// Tear the stream down. Safe to call more than once; `Drop` calls it
    /// too, so every exit path releases the device.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("audio engine closed");
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.close();
    }
}
