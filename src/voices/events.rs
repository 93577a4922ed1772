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
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Trace events are dropped rather than blocking once this many are unread.
const TRACE_CAPACITY: usize = 1024;

/// Why a sounding voice was taken for a new note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealReason {
    /// The voice's release tail had already finished.
    CompletedRelease,
    /// The voice was still releasing.
    InRelease,
    /// The voice was still held.
    Active,
}

/// A single allocation decision, emitted for observers and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// A held note was struck again on the voice it already owns.
    Retriggered { note: u8, voice: usize },
    /// A never-used voice was assigned.
    Allocated { note: u8, voice: usize },
    /// A used voice was reassigned.
    Stolen {
        note: u8,
        voice: usize,
        stolen_note: Option<u8>,
        reason: StealReason,
    },
    /// No voice could be classified and voice 0 was used instead.
    InvariantViolation { note: u8 },
    /// A voice entered its release.
    Released { note: u8, voice: usize, at: f64 },
    /// A release arrived for a voice that no longer holds a note.
    ReleaseIgnored { voice: usize },
    /// Every voice was silenced.
    AllStopped { at: f64, voices: usize },
}

/// A non-blocking sink for voice events. A disabled sink discards everything.
#[derive(Clone, Debug, Default)]
pub struct TraceSink {
    tx: Option<Sender<VoiceEvent>>,
}

impl TraceSink {
    /// Creates a sink that discards events.
    pub fn disabled() -> TraceSink {
        TraceSink { tx: None }
    }

    /// Creates a sink along with the receiver its events are delivered to.
    pub fn channel() -> (TraceSink, Receiver<VoiceEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(TRACE_CAPACITY);
        (TraceSink { tx: Some(tx) }, rx)
    }

    /// Emits an event without ever blocking the caller.
    pub fn emit(&self, event: VoiceEvent) {
        if let Some(tx) = &self.tx {
            match tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("Voice trace full, dropping event");
                }
            }
        }
    }
}
