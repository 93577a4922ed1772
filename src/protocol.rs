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

//! The request/response protocol between the instrument and the worklet.
//!
//! This module provides:
//! - A closed set of typed commands and the engine's replies
//! - A correlating client with pre-ready queueing and per-request timeouts
//! - A JSON channel transport and the pump that feeds replies back

mod client;
mod error;
mod message;
mod transport;

pub use client::{Response, WorkletClient};
pub use error::ProtocolError;
pub use message::{Command, EngineMessage, Envelope, ModulationTransform, ModulationType, NodeType};
pub use transport::{link, spawn_response_pump, ChannelTransport, Transport, TransportError};
