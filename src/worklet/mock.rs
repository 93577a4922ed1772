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
use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::engine::{BlockParams, Connection, EngineError, SynthEngine};
use crate::protocol::NodeType;

/// What the mock engine has seen, readable after the engine has moved to the
/// audio thread.
#[derive(Debug, Default)]
struct Observations {
    calls: Vec<String>,
    last_block: Option<BlockParams>,
    blocks: u64,
}

/// A shared view of a mock engine's activity.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    observations: Arc<Mutex<Observations>>,
}

impl Probe {
    /// Returns the engine calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.observations.lock().calls.clone()
    }

    /// Returns the parameters of the most recently rendered block.
    pub fn last_block(&self) -> Option<BlockParams> {
        self.observations.lock().last_block.clone()
    }

    /// Returns the number of blocks rendered.
    pub fn blocks(&self) -> u64 {
        self.observations.lock().blocks
    }

    fn record(&self, call: impl Into<String>) {
        self.observations.lock().calls.push(call.into());
    }
}

#[derive(Debug, Clone)]
struct Node {
    node_type: NodeType,
    state: Value,
}

/// A mock engine. Keeps the patch graph in memory and renders a sine per open voice.
#[derive(Debug)]
pub struct Engine {
    probe: Probe,
    initialized: bool,
    fail_initialize: bool,
    sample_rate: u32,
    voices: usize,
    next_node: u64,
    nodes: BTreeMap<String, Node>,
    connections: Vec<Value>,
    assets: BTreeMap<String, usize>,
    phases: Vec<f64>,
    load: f32,
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            probe: Probe::default(),
            initialized: false,
            fail_initialize: false,
            sample_rate: 0,
            voices: 1,
            next_node: 1,
            nodes: BTreeMap::new(),
            connections: Vec::new(),
            assets: BTreeMap::new(),
            phases: Vec::new(),
            load: 0.0,
        }
    }

    /// An engine whose initialization always fails.
    pub fn failing() -> Engine {
        Engine {
            fail_initialize: true,
            ..Engine::new()
        }
    }

    /// Returns a probe that observes this engine.
    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }

    fn ensure_initialized(&self) -> Result<(), EngineError> {
        if self.initialized {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    fn ensure_node(&self, node_id: &str) -> Result<(), EngineError> {
        if self.nodes.contains_key(node_id) {
            Ok(())
        } else {
            Err(EngineError::NodeNotFound(node_id.to_string()))
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl SynthEngine for Engine {
    fn initialize(&mut self, sample_rate: u32, block_size: usize) -> Result<(), EngineError> {
        self.probe.record("initialize");
        if self.fail_initialize {
            return Err(EngineError::Rejected("mock engine refused to start".to_string()));
        }
        info!(sample_rate, block_size, "Mock engine initialized");
        self.sample_rate = sample_rate;
        self.initialized = true;
        Ok(())
    }

    fn load_patch(&mut self, patch: &str) -> Result<usize, EngineError> {
        self.ensure_initialized()?;
        self.probe.record("loadPatch");
        let patch: Value =
            serde_json::from_str(patch).map_err(|e| EngineError::InvalidPatch(e.to_string()))?;
        if !patch.is_object() {
            return Err(EngineError::InvalidPatch("patch must be an object".to_string()));
        }

        self.voices = patch
            .get("voices")
            .and_then(Value::as_u64)
            .map(|voices| voices as usize)
            .unwrap_or(1);
        self.nodes.clear();
        self.connections.clear();
        debug!(voices = self.voices, "Mock patch loaded");
        Ok(self.voices)
    }

    fn create_node(&mut self, node_type: NodeType) -> Result<String, EngineError> {
        self.ensure_initialized()?;
        self.probe.record("createNode");
        let node_id = format!("node-{}", self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            node_id.clone(),
            Node {
                node_type,
                state: json!({}),
            },
        );
        Ok(node_id)
    }

    fn update_node(&mut self, node_id: &str, state: &Value) -> Result<(), EngineError> {
        self.probe.record("updateNode");
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| EngineError::NodeNotFound(node_id.to_string()))?;
        node.state = state.clone();
        Ok(())
    }

    fn connect(&mut self, connection: Connection<'_>) -> Result<(), EngineError> {
        self.probe.record("connect");
        self.ensure_node(connection.from_id)?;
        self.ensure_node(connection.to_id)?;
        self.connections.push(json!({
            "fromId": connection.from_id,
            "fromPort": connection.from_port,
            "toId": connection.to_id,
            "toPort": connection.to_port,
            "amount": connection.amount,
            "modulationType": connection.modulation_type,
            "transform": connection.transform,
        }));
        Ok(())
    }

    fn remove_connection(&mut self, from_id: &str, to_id: &str, port: &str) -> Result<(), EngineError> {
        self.probe.record("removeConnection");
        let before = self.connections.len();
        self.connections.retain(|c| {
            !(c["fromId"] == from_id && c["toId"] == to_id && c["toPort"] == port)
        });
        if self.connections.len() == before {
            return Err(EngineError::Rejected(format!(
                "no connection from {} to {}.{}",
                from_id, to_id, port
            )));
        }
        Ok(())
    }

    fn delete_node(&mut self, node_id: &str) -> Result<(), EngineError> {
        self.probe.record("deleteNode");
        if self.nodes.remove(node_id).is_none() {
            return Err(EngineError::NodeNotFound(node_id.to_string()));
        }
        self.connections
            .retain(|c| c["fromId"] != node_id && c["toId"] != node_id);
        Ok(())
    }

    fn process_audio_block(&mut self, params: &BlockParams, out: &mut [f32]) -> Result<(), EngineError> {
        self.ensure_initialized()?;
        let started = Instant::now();

        self.phases.resize(params.voices.len(), 0.0);
        out.fill(0.0);
        for (voice, phase) in params.voices.iter().zip(self.phases.iter_mut()) {
            if voice.gate <= 0.0 {
                continue;
            }
            let step = voice.frequency as f64 / self.sample_rate as f64;
            for frame in out.chunks_mut(2) {
                let sample = (*phase * TAU).sin() as f32 * voice.gain * params.master_gain;
                frame.iter_mut().for_each(|s| *s += sample);
                *phase = (*phase + step).fract();
            }
        }

        let budget = params.frames as f64 / self.sample_rate as f64;
        self.load = (started.elapsed().as_secs_f64() / budget).min(1.0) as f32;

        let mut observations = self.probe.observations.lock();
        observations.blocks += 1;
        observations.last_block = Some(params.clone());
        Ok(())
    }

    fn current_state(&self) -> Result<Value, EngineError> {
        self.probe.record("getCurrentState");
        Ok(json!({
            "voices": self.voices,
            "nodes": self
                .nodes
                .iter()
                .map(|(id, node)| json!({"id": id, "type": node.node_type, "state": node.state}))
                .collect::<Vec<_>>(),
            "connections": self.connections,
        }))
    }

    fn cpu_usage(&self) -> Result<f32, EngineError> {
        self.probe.record("getCpuUsage");
        Ok(self.load)
    }

    fn waveform_preview(&mut self, node_id: &str, length: usize) -> Result<Vec<f32>, EngineError> {
        self.probe.record("getWaveformPreview");
        self.ensure_node(node_id)?;
        Ok((0..length)
            .map(|i| (TAU * i as f64 / length as f64).sin() as f32)
            .collect())
    }

    fn import_asset(&mut self, name: &str, data: &[u8]) -> Result<(), EngineError> {
        self.probe.record("importAsset");
        self.assets.insert(name.to_string(), data.len());
        Ok(())
    }

    fn export_data(&self) -> Result<Value, EngineError> {
        self.probe.record("exportData");
        Ok(json!({
            "voices": self.voices,
            "nodes": self.nodes.len(),
            "connections": self.connections.len(),
            "assets": self.assets,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worklet::engine::{VoiceParams, MACRO_COUNT};

    fn started() -> Engine {
        let mut engine = Engine::new();
        engine.initialize(48000, 128).expect("initialize");
        engine
    }

    #[test]
    fn test_requires_initialize() {
        let mut engine = Engine::new();
        assert_eq!(engine.load_patch("{}"), Err(EngineError::NotInitialized));
        assert!(Engine::failing().initialize(48000, 128).is_err());
    }

    #[test]
    fn test_patch_graph() {
        let mut engine = started();
        assert_eq!(engine.load_patch(r#"{"voices": 4}"#), Ok(4));

        let osc = engine.create_node(NodeType::Oscillator).expect("osc");
        let filter = engine.create_node(NodeType::Filter).expect("filter");
        engine
            .connect(Connection {
                from_id: &osc,
                from_port: "output",
                to_id: &filter,
                to_port: "input",
                amount: 1.0,
                modulation_type: Default::default(),
                transform: Default::default(),
            })
            .expect("connect");
        assert_eq!(engine.current_state().expect("state")["connections"].as_array().map(Vec::len), Some(1));

        engine.delete_node(&osc).expect("delete");
        assert_eq!(engine.export_data().expect("export")["connections"], 0);
        assert_eq!(
            engine.delete_node(&osc),
            Err(EngineError::NodeNotFound(osc.clone()))
        );
        assert_eq!(
            engine.probe().calls().first().map(String::as_str),
            Some("initialize")
        );
    }

    #[test]
    fn test_renders_open_voices_only() {
        let mut engine = started();
        let params = BlockParams {
            time: 0.0,
            frames: 128,
            voices: vec![
                VoiceParams {
                    gate: 1.0,
                    frequency: 440.0,
                    gain: 0.5,
                },
                VoiceParams::default(),
            ],
            macros: [0.0; MACRO_COUNT],
            master_gain: 1.0,
        };
        let mut out = vec![0.0; 256];
        engine.process_audio_block(&params, &mut out).expect("render");
        assert!(out.iter().any(|s| s.abs() > 0.0));
        assert!(out.iter().all(|s| s.abs() <= 0.5 + f32::EPSILON));

        let silent = BlockParams {
            voices: vec![VoiceParams::default(); 2],
            ..params
        };
        engine.process_audio_block(&silent, &mut out).expect("render");
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(engine.probe().blocks(), 2);
    }
}
