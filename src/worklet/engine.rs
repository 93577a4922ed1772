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
use serde_json::Value;

use crate::protocol::{ModulationTransform, ModulationType, NodeType};

/// The number of macro knobs exposed to the engine.
pub const MACRO_COUNT: usize = 4;

/// Errors reported by the engine. Their text is relayed to the requester verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("{0}")]
    Rejected(String),
}

/// A connection between two node ports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection<'a> {
    pub from_id: &'a str,
    pub from_port: &'a str,
    pub to_id: &'a str,
    pub to_port: &'a str,
    pub amount: f32,
    pub modulation_type: ModulationType,
    pub transform: ModulationTransform,
}

/// The parameter values of one voice for a block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoiceParams {
    pub gate: f32,
    pub frequency: f32,
    pub gain: f32,
}

/// Everything the engine reads from outside for one processing block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockParams {
    /// Audio clock time of the block's first frame, in seconds.
    pub time: f64,
    pub frames: usize,
    pub voices: Vec<VoiceParams>,
    pub macros: [f32; MACRO_COUNT],
    pub master_gain: f32,
}

/// The DSP engine hosted by the worklet. It owns the patch graph and renders
/// audio; everything here runs on the audio thread.
pub trait SynthEngine: Send + 'static {
    /// Prepares the engine for processing.
    fn initialize(&mut self, sample_rate: u32, block_size: usize) -> Result<(), EngineError>;

    /// Replaces the patch, returning the number of voices it plays.
    fn load_patch(&mut self, patch: &str) -> Result<usize, EngineError>;

    /// Creates a node, returning its id.
    fn create_node(&mut self, node_type: NodeType) -> Result<String, EngineError>;

    fn update_node(&mut self, node_id: &str, state: &Value) -> Result<(), EngineError>;

    fn connect(&mut self, connection: Connection<'_>) -> Result<(), EngineError>;

    fn remove_connection(&mut self, from_id: &str, to_id: &str, port: &str) -> Result<(), EngineError>;

    fn delete_node(&mut self, node_id: &str) -> Result<(), EngineError>;

    /// Renders one block of interleaved stereo into `out`.
    fn process_audio_block(&mut self, params: &BlockParams, out: &mut [f32]) -> Result<(), EngineError>;

    fn current_state(&self) -> Result<Value, EngineError>;

    /// Returns the share of the block budget spent rendering, from 0 to 1.
    fn cpu_usage(&self) -> Result<f32, EngineError>;

    fn waveform_preview(&mut self, node_id: &str, length: usize) -> Result<Vec<f32>, EngineError>;

    fn import_asset(&mut self, name: &str, data: &[u8]) -> Result<(), EngineError>;

    fn export_data(&self) -> Result<Value, EngineError>;
}
