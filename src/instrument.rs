// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The instrument: one output's voice pool, its scheduler, and its link to the worklet.
//!
//! Note events are handled synchronously against the voice table and turned
//! into parameter automation on the spot. Structural edits go to the engine
//! over the correlated request channel and are awaited.

use std::sync::Arc;
use std::time::Duration;

use midly::live::LiveEvent;
use midly::MidiMessage;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, span, warn, Instrument as _, Level};

use crate::config::{Config, ConfigError};
use crate::protocol::{
    link, spawn_response_pump, Command, Envelope, ModulationTransform, ModulationType, NodeType,
    ProtocolError, Response, WorkletClient,
};
use crate::voices::{
    note_to_frequency, Allocation, Scheduler, TraceSink, TriggerOptions, Voice, VoiceAllocator,
    VoiceTable,
};
use crate::worklet::{AudioClock, ParameterBank, SynthEngine, WorkletProcessor};

mod patch;

pub use patch::PatchSummary;

/// MIDI controller number for "all notes off".
const ALL_NOTES_OFF: u8 = 123;

#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Unreadable patch: {0}")]
    Patch(serde_json::Error),

    #[error("Invalid MIDI message: {0}")]
    Midi(#[from] midly::Error),

    #[error("Unexpected {operation} response: {response:?}")]
    UnexpectedResponse {
        operation: &'static str,
        response: Response,
    },
}

/// A connection request between two node ports.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub from_id: String,
    pub from_port: String,
    pub to_id: String,
    pub to_port: String,
    pub amount: f32,
    pub modulation_type: ModulationType,
    pub transform: ModulationTransform,
}

impl Route {
    /// A full strength, untransformed VCA connection.
    pub fn new(from_id: &str, from_port: &str, to_id: &str, to_port: &str) -> Route {
        Route {
            from_id: from_id.to_string(),
            from_port: from_port.to_string(),
            to_id: to_id.to_string(),
            to_port: to_port.to_string(),
            amount: 1.0,
            modulation_type: ModulationType::default(),
            transform: ModulationTransform::default(),
        }
    }

    pub fn with_amount(mut self, amount: f32) -> Route {
        self.amount = amount;
        self
    }

    pub fn with_modulation(mut self, modulation_type: ModulationType, transform: ModulationTransform) -> Route {
        self.modulation_type = modulation_type;
        self.transform = transform;
        self
    }
}

/// The table and the allocator change together, so they share a lock.
struct VoiceState {
    table: VoiceTable,
    allocator: VoiceAllocator,
}

/// A polyphonic instrument bound to one worklet.
pub struct Instrument {
    voices: Mutex<VoiceState>,
    scheduler: RwLock<Scheduler>,
    params: Arc<ParameterBank>,
    clock: AudioClock,
    client: WorkletClient,
    allow_duplicate_notes: bool,
    patch_timeout: Duration,
    response_pump: Mutex<Option<JoinHandle<()>>>,
}

impl Instrument {
    /// Creates an instrument that drives the given parameters and client.
    /// The parameter bank must cover the configured pool.
    pub fn new(
        config: &Config,
        client: WorkletClient,
        params: Arc<ParameterBank>,
        clock: AudioClock,
        trace: TraceSink,
    ) -> Result<Instrument, InstrumentError> {
        config.validate()?;
        let instrument = config.instrument();
        let table = VoiceTable::new(instrument.pool_size());
        let allocator = VoiceAllocator::new(instrument.release_guard()?, trace);
        let mut scheduler = Scheduler::new(
            instrument.gate_pulse_min()?,
            instrument.block_duration(),
            instrument.gate_policy(),
        );
        scheduler.set_patch(table.voice_limit(), 0.0);
        if params.voices() < table.pool_size() {
            warn!(
                params = params.voices(),
                pool_size = table.pool_size(),
                "Parameter bank smaller than the voice pool"
            );
        }

        Ok(Instrument {
            voices: Mutex::new(VoiceState { table, allocator }),
            scheduler: RwLock::new(scheduler),
            params,
            clock,
            client,
            allow_duplicate_notes: instrument.allow_duplicate_notes(),
            patch_timeout: config.protocol().patch_timeout()?,
            response_pump: Mutex::new(None),
        })
    }

    /// Wires an instrument to a worklet hosting the given engine: a command
    /// channel, a response pump, and a shared clock and parameter bank. The
    /// returned processor still has to be initialized and driven.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_engine<E: SynthEngine>(
        config: &Config,
        engine: E,
        trace: TraceSink,
    ) -> Result<(Instrument, WorkletProcessor<E>), InstrumentError> {
        let client = WorkletClient::from_config(config.protocol())?;
        let (transport, commands) = link();
        let (responses_tx, responses_rx) = tokio::sync::mpsc::unbounded_channel();
        client.attach(Arc::new(transport));

        let params = Arc::new(ParameterBank::new(config.instrument().pool_size()));
        let clock = AudioClock::new(config.instrument().sample_rate());
        let processor = WorkletProcessor::new(
            engine,
            commands,
            responses_tx,
            params.clone(),
            clock.clone(),
            config.instrument().block_size(),
        );

        let instrument = Instrument::new(config, client.clone(), params, clock, trace)?;
        *instrument.response_pump.lock() = Some(spawn_response_pump(client, responses_rx));
        Ok((instrument, processor))
    }

    /// Returns the request client.
    pub fn client(&self) -> &WorkletClient {
        &self.client
    }

    /// Returns the audio clock.
    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    /// Returns the parameter bank the scheduler writes to.
    pub fn params(&self) -> &Arc<ParameterBank> {
        &self.params
    }

    /// Returns the number of voices the current patch may use.
    pub fn voice_limit(&self) -> usize {
        self.voices.lock().table.voice_limit()
    }

    /// Returns a snapshot of the voices within the limit.
    pub fn voices(&self) -> Vec<Voice> {
        self.voices.lock().table.voices().to_vec()
    }

    /// Returns the notes currently held and the voices holding them.
    pub fn held_notes(&self) -> Vec<(u8, usize)> {
        let state = self.voices.lock();
        let registry = state.table.registry();
        registry
            .bound_voices()
            .into_iter()
            .filter_map(|voice| registry.note_for(voice).map(|note| (note, voice)))
            .collect()
    }

    /// Starts a note at the given audio time. Times already past start now.
    /// A zero velocity is a note off.
    pub fn note_on(&self, note: u8, velocity: u8, time: f64) -> Option<Allocation> {
        self.start_note(note, velocity, time, self.allow_duplicate_notes, true)
    }

    /// Releases every voice holding the note at the given audio time.
    /// Returns the released voices.
    pub fn note_off(&self, note: u8, time: f64) -> Vec<usize> {
        let time = time.max(self.clock.now());
        let released = {
            let mut state = self.voices.lock();
            let VoiceState { table, allocator } = &mut *state;
            allocator.release_note(table, note, time)
        };

        let scheduler = self.scheduler.read();
        for voice in released.iter() {
            scheduler.release(self.params.as_ref(), *voice, time);
        }
        if released.is_empty() {
            debug!(note, "Note off for a note that is not held");
        }
        released
    }

    /// Schedules a complete note for pattern playback. Scheduled notes may
    /// share a pitch with held notes and never glide.
    pub fn schedule_note(&self, note: u8, velocity: u8, start: f64, duration: f64) -> Option<Allocation> {
        let allocation = self.start_note(note, velocity, start, true, false)?;
        let end = start.max(self.clock.now()) + duration.max(0.0);

        let released = {
            let mut state = self.voices.lock();
            let VoiceState { table, allocator } = &mut *state;
            allocator.release(table, allocation.voice_index, end)
        };
        if released.is_some() {
            self.scheduler
                .read()
                .release(self.params.as_ref(), allocation.voice_index, end);
        }
        Some(allocation)
    }

    fn start_note(
        &self,
        note: u8,
        velocity: u8,
        time: f64,
        allow_duplicate: bool,
        legato_allowed: bool,
    ) -> Option<Allocation> {
        if note > 127 || velocity > 127 {
            warn!(note, velocity, "Ignoring out of range note");
            return None;
        }
        if velocity == 0 {
            self.note_off(note, time);
            return None;
        }

        let time = time.max(self.clock.now());
        let allocation = {
            let mut state = self.voices.lock();
            let VoiceState { table, allocator } = &mut *state;
            allocator.allocate(table, note, allow_duplicate, time)
        };

        let options = TriggerOptions {
            retrigger: allocation.is_retrigger || allocation.stolen_note.is_some(),
            legato_allowed,
        };
        let action = self.scheduler.read().trigger(
            self.params.as_ref(),
            allocation.voice_index,
            note_to_frequency(note),
            velocity,
            time,
            options,
        );
        debug!(
            note,
            velocity,
            voice = allocation.voice_index,
            ?action,
            "Note started"
        );
        Some(allocation)
    }

    /// Handles a raw MIDI message at the given audio time. Only note on, note
    /// off, and all notes off are acted on.
    pub fn handle_midi(&self, raw: &[u8], time: f64) -> Result<(), InstrumentError> {
        let LiveEvent::Midi { message, .. } = LiveEvent::parse(raw)? else {
            debug!("Ignoring non channel MIDI message");
            return Ok(());
        };

        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => {
                self.note_off(key.as_int(), time);
            }
            MidiMessage::NoteOn { key, vel } => {
                self.note_on(key.as_int(), vel.as_int(), time);
            }
            MidiMessage::NoteOff { key, .. } => {
                self.note_off(key.as_int(), time);
            }
            MidiMessage::Controller { controller, .. } if controller.as_int() == ALL_NOTES_OFF => {
                self.stop_all();
            }
            other => debug!(message = ?other, "Ignoring MIDI message"),
        }
        Ok(())
    }

    /// Silences every voice now and forgets all held notes. Scheduled notes
    /// still sounding are ended too.
    pub fn stop_all(&self) {
        let now = self.clock.now();
        let (stopped, pool_size) = {
            let mut state = self.voices.lock();
            let VoiceState { table, allocator } = &mut *state;
            (allocator.stop_all(table, now), table.pool_size())
        };
        self.scheduler
            .read()
            .stop_all(self.params.as_ref(), pool_size, now);
        info!(voices = stopped.len(), at = now, "All voices stopped");
    }

    /// Cancels every scheduled note. This is the same global stop as [`Instrument::stop_all`].
    pub fn cancel_scheduled_notes(&self) {
        self.stop_all();
    }

    /// Loads a patch into the engine and adopts the voice count it reports.
    /// Returns the voice limit in effect afterwards.
    pub async fn load_patch(&self, patch: &str) -> Result<usize, InstrumentError> {
        self.apply_patch(patch)
            .instrument(span!(Level::INFO, "load patch"))
            .await
    }

    async fn apply_patch(&self, patch: &str) -> Result<usize, InstrumentError> {
        let summary = PatchSummary::parse(patch).map_err(InstrumentError::Patch)?;
        let response = self
            .client
            .send(
                Envelope::new(Command::LoadPatch {
                    patch: patch.to_string(),
                }),
                self.patch_timeout,
            )
            .await?;

        let requested = match response.as_ref() {
            None => summary.voices().unwrap_or(1),
            Some(value) => value
                .as_u64()
                .map(|voices| voices as usize)
                .ok_or_else(|| InstrumentError::UnexpectedResponse {
                    operation: "loadPatch",
                    response: response.clone(),
                })?,
        };

        let now = self.clock.now();
        let (voice_limit, pool_size) = {
            let mut state = self.voices.lock();
            let voice_limit = state.table.set_voice_limit(requested);
            state.allocator.set_release_time(summary.longest_release());
            (voice_limit, state.table.pool_size())
        };
        {
            let mut scheduler = self.scheduler.write();
            scheduler.set_patch(voice_limit, summary.glide());
            scheduler.stop_all(self.params.as_ref(), pool_size, now);
        }

        if voice_limit != requested {
            warn!(requested, voice_limit, "Patch voice count clamped to the pool");
        }
        info!(
            voice_limit,
            longest_release = summary.longest_release(),
            glide = summary.glide(),
            "Patch loaded"
        );
        Ok(voice_limit)
    }

    /// Creates a node, returning its id.
    pub async fn create_node(&self, node_type: NodeType) -> Result<String, InstrumentError> {
        match self.client.request(Command::CreateNode { node_type }).await? {
            Some(Value::String(node_id)) => Ok(node_id),
            response => Err(InstrumentError::UnexpectedResponse {
                operation: "createNode",
                response,
            }),
        }
    }

    /// Replaces a node's state.
    pub async fn update_node(&self, node_id: &str, state: Value) -> Result<(), InstrumentError> {
        self.client
            .request(Command::UpdateNode {
                node_id: node_id.to_string(),
                state,
            })
            .await?;
        Ok(())
    }

    /// Connects two node ports, optionally as a modulation route.
    pub async fn connect(&self, route: Route) -> Result<(), InstrumentError> {
        self.client
            .request(Command::Connect {
                from_id: route.from_id,
                from_port: route.from_port,
                to_id: route.to_id,
                to_port: route.to_port,
                amount: route.amount,
                modulation_type: route.modulation_type,
                transform: route.transform,
            })
            .await?;
        Ok(())
    }

    /// Removes the connection between two nodes on the given port.
    pub async fn remove_connection(&self, from_id: &str, to_id: &str, port: &str) -> Result<(), InstrumentError> {
        self.client
            .request(Command::RemoveConnection {
                from_id: from_id.to_string(),
                to_id: to_id.to_string(),
                port: port.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Deletes a node and its connections.
    pub async fn delete_node(&self, node_id: &str) -> Result<(), InstrumentError> {
        self.client
            .request(Command::DeleteNode {
                node_id: node_id.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Reads back the engine's state. Its shape belongs to the engine.
    pub async fn current_state(&self) -> Result<Value, InstrumentError> {
        Ok(self
            .client
            .request(Command::GetCurrentState)
            .await?
            .unwrap_or(Value::Null))
    }

    /// Returns the engine's reported processing load.
    pub async fn cpu_usage(&self) -> Result<f32, InstrumentError> {
        let response = self.client.request(Command::GetCpuUsage).await?;
        match response.as_ref().and_then(Value::as_f64) {
            Some(usage) => Ok(usage as f32),
            None => Err(InstrumentError::UnexpectedResponse {
                operation: "getCpuUsage",
                response,
            }),
        }
    }

    /// Returns up to `length` preview samples of a node's waveform.
    pub async fn waveform_preview(&self, node_id: &str, length: usize) -> Result<Vec<f32>, InstrumentError> {
        let response = self
            .client
            .request(Command::GetWaveformPreview {
                node_id: node_id.to_string(),
                length,
            })
            .await?;
        match response {
            Some(Value::Array(samples)) => Ok(samples
                .iter()
                .filter_map(Value::as_f64)
                .map(|sample| sample as f32)
                .collect()),
            response => Err(InstrumentError::UnexpectedResponse {
                operation: "getWaveformPreview",
                response,
            }),
        }
    }

    /// Exports the engine's data for saving.
    pub async fn export_data(&self) -> Result<Value, InstrumentError> {
        Ok(self
            .client
            .request(Command::ExportData)
            .await?
            .unwrap_or(Value::Null))
    }

    /// Sends an asset to the engine without waiting for it to be taken.
    pub fn import_asset(&self, name: &str, data: Vec<u8>) {
        self.client.send_fire_and_forget(Command::ImportAsset {
            name: name.to_string(),
            data,
        });
    }

    /// Sets a macro knob.
    pub fn set_macro(&self, index: usize, value: f32) {
        self.params.set_macro(index, value);
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.params.set_master_gain(gain);
    }

    /// Rejects every outstanding request and stops listening to the worklet.
    pub fn shutdown(&self) {
        self.client.clear();
        if let Some(pump) = self.response_pump.lock().take() {
            pump.abort();
        }
        info!("Instrument shut down");
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        if let Some(pump) = self.response_pump.lock().take() {
            pump.abort();
        }
    }
}
