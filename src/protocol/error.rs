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

/// Every way a correlated request can fail. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid {operation} message: {reason}")]
    Validation {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} timed out after {elapsed_ms} ms")]
    Timeout {
        operation: &'static str,
        elapsed_ms: u128,
    },

    #[error("Transport unavailable for {operation}: {reason}")]
    Transport {
        operation: &'static str,
        reason: String,
    },

    #[error("{message}")]
    Engine {
        operation: &'static str,
        message: String,
    },

    #[error("Request queue full: {capacity} requests already waiting for the engine")]
    QueueFull { capacity: usize },

    #[error("{operation} cancelled: worklet channel cleared")]
    Cleared { operation: &'static str },

    #[error("Message encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}
