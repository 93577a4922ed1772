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
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ProtocolError;

/// The kinds of node the engine can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Oscillator,
    WavetableOscillator,
    Noise,
    Sampler,
    Envelope,
    Lfo,
    Filter,
    Mixer,
    Delay,
    Reverb,
    Chorus,
    Convolver,
    GlobalFrequency,
    GlobalVelocity,
    GateMixer,
}

/// How a modulation source is applied to its target port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationType {
    #[default]
    Vca,
    Bipolar,
    Additive,
}

/// A shaping function applied to a modulation signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationTransform {
    #[default]
    None,
    Invert,
    Square,
    Cube,
}

/// A structural operation on the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Replaces the whole patch. Answers with the patch's voice count.
    LoadPatch { patch: String },
    /// Creates a node. Answers with the new node id.
    CreateNode { node_type: NodeType },
    /// Replaces a node's typed state.
    UpdateNode { node_id: String, state: Value },
    /// Removes a node and its connections.
    DeleteNode { node_id: String },
    /// Connects a node output to another node's input port.
    Connect {
        from_id: String,
        from_port: String,
        to_id: String,
        to_port: String,
        amount: f32,
        #[serde(default)]
        modulation_type: ModulationType,
        #[serde(default)]
        transform: ModulationTransform,
    },
    /// Removes a connection.
    RemoveConnection {
        from_id: String,
        to_id: String,
        port: String,
    },
    /// Reads back the engine's current state.
    GetCurrentState,
    /// Reads back the engine's CPU load.
    GetCpuUsage,
    /// Renders a short waveform preview of a node.
    GetWaveformPreview { node_id: String, length: usize },
    /// Exports the engine's patch data.
    ExportData,
    /// Transfers an asset (sample, impulse response, wavetable) to the engine.
    ImportAsset { name: String, data: Vec<u8> },
}

impl Command {
    /// Returns the message type name.
    pub fn operation(&self) -> &'static str {
        match self {
            Command::LoadPatch { .. } => "loadPatch",
            Command::CreateNode { .. } => "createNode",
            Command::UpdateNode { .. } => "updateNode",
            Command::DeleteNode { .. } => "deleteNode",
            Command::Connect { .. } => "connect",
            Command::RemoveConnection { .. } => "removeConnection",
            Command::GetCurrentState => "getCurrentState",
            Command::GetCpuUsage => "getCpuUsage",
            Command::GetWaveformPreview { .. } => "getWaveformPreview",
            Command::ExportData => "exportData",
            Command::ImportAsset { .. } => "importAsset",
        }
    }

    /// Checks that the message is well formed before it enters the channel.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let operation = self.operation();
        let non_empty = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(ProtocolError::Validation {
                    operation,
                    reason: format!("{} must not be empty", field),
                })
            } else {
                Ok(())
            }
        };

        match self {
            Command::LoadPatch { patch } => non_empty("patch", patch),
            Command::CreateNode { .. }
            | Command::GetCurrentState
            | Command::GetCpuUsage
            | Command::ExportData => Ok(()),
            Command::UpdateNode { node_id, state } => {
                non_empty("nodeId", node_id)?;
                if !state.is_object() {
                    return Err(ProtocolError::Validation {
                        operation,
                        reason: "state must be an object".to_string(),
                    });
                }
                Ok(())
            }
            Command::DeleteNode { node_id } => non_empty("nodeId", node_id),
            Command::Connect {
                from_id,
                from_port,
                to_id,
                to_port,
                amount,
                ..
            } => {
                non_empty("fromId", from_id)?;
                non_empty("fromPort", from_port)?;
                non_empty("toId", to_id)?;
                non_empty("toPort", to_port)?;
                if !amount.is_finite() || !(-1.0..=1.0).contains(amount) {
                    return Err(ProtocolError::Validation {
                        operation,
                        reason: format!("amount must be within -1..=1, got {}", amount),
                    });
                }
                Ok(())
            }
            Command::RemoveConnection { from_id, to_id, port } => {
                non_empty("fromId", from_id)?;
                non_empty("toId", to_id)?;
                non_empty("port", port)
            }
            Command::GetWaveformPreview { node_id, length } => {
                non_empty("nodeId", node_id)?;
                if *length == 0 {
                    return Err(ProtocolError::Validation {
                        operation,
                        reason: "length must be positive".to_string(),
                    });
                }
                Ok(())
            }
            Command::ImportAsset { name, .. } => non_empty("name", name),
        }
    }
}

/// The outbound wire message: a command plus its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub command: Command,
}

impl Envelope {
    /// Wraps a command. An id is generated when the envelope is sent.
    pub fn new(command: Command) -> Envelope {
        Envelope {
            message_id: None,
            command,
        }
    }

    /// Wraps a command with a caller chosen id.
    pub fn with_id(command: Command, message_id: impl Into<String>) -> Envelope {
        Envelope {
            message_id: Some(message_id.into()),
            command,
        }
    }
}

/// Messages the engine side posts back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineMessage {
    /// The engine finished initializing and accepts commands.
    Ready,
    /// The outcome of a correlated command.
    OperationResponse {
        message_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl EngineMessage {
    /// A successful response.
    pub fn success(message_id: impl Into<String>, data: Option<Value>) -> EngineMessage {
        EngineMessage::OperationResponse {
            message_id: message_id.into(),
            success: true,
            data,
            error: None,
        }
    }

    /// A failed response carrying the engine's error text.
    pub fn failure(message_id: impl Into<String>, error: impl Into<String>) -> EngineMessage {
        EngineMessage::OperationResponse {
            message_id: message_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
