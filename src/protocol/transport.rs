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
use crossbeam_channel::{Receiver, Sender};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tracing::{debug, span, warn, Instrument, Level};

use super::client::WorkletClient;
use super::message::Envelope;

/// Errors raised while handing a message to the channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("worklet channel closed")]
    Closed,

    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An ordered, at-most-once channel towards the worklet.
pub trait Transport: Send + Sync + 'static {
    /// Posts the envelope. Never blocks.
    fn post(&self, envelope: &Envelope) -> Result<(), TransportError>;
}

/// Posts JSON encoded envelopes into an in-process channel read by the worklet.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: Sender<String>,
}

impl ChannelTransport {
    /// Creates a transport that posts into the given sender.
    pub fn new(tx: Sender<String>) -> ChannelTransport {
        ChannelTransport { tx }
    }
}

impl Transport for ChannelTransport {
    fn post(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let encoded = serde_json::to_string(envelope)?;
        self.tx.send(encoded).map_err(|_| TransportError::Closed)
    }
}

/// Creates a transport and the receiving end the worklet drains.
pub fn link() -> (ChannelTransport, Receiver<String>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ChannelTransport::new(tx), rx)
}

/// Feeds every message the worklet posts back into the client until the
/// worklet side hangs up.
pub fn spawn_response_pump(
    client: WorkletClient,
    mut responses: UnboundedReceiver<String>,
) -> JoinHandle<()> {
    let span = span!(Level::INFO, "worklet responses");
    tokio::spawn(
        async move {
            while let Some(raw) = responses.recv().await {
                if let Err(e) = client.handle_raw(&raw) {
                    warn!(error = %e, "Unreadable message from worklet");
                }
            }
            debug!("Worklet response channel closed");
        }
        .instrument(span),
    )
}
