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

//! Voice allocation policy.
//!
//! Handles retriggering, round-robin reuse, release-aware stealing, and note-off.

use std::time::Duration;

use tracing::{debug, error};

use super::events::{StealReason, TraceSink, VoiceEvent};
use super::table::{Voice, VoiceTable};

/// The result of allocating a voice for a note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    /// The voice that will play the note.
    pub voice_index: usize,
    /// The held note displaced from that voice, if any.
    pub stolen_note: Option<u8>,
    /// True if the note already owned the voice.
    pub is_retrigger: bool,
}

/// Decides which voice plays each note. Holds no voice state of its own; every
/// decision is computed from the [`VoiceTable`] it is handed.
#[derive(Debug, Clone)]
pub struct VoiceAllocator {
    /// Longest envelope release plus the guard band, in milliseconds.
    max_release_time_ms: f64,
    /// Guard band added to every patch's longest release, in milliseconds.
    release_guard_ms: f64,
    trace: TraceSink,
}

impl VoiceAllocator {
    /// Creates a new allocator. Until a patch is loaded the release window is
    /// just the guard band.
    pub fn new(release_guard: Duration, trace: TraceSink) -> VoiceAllocator {
        let release_guard_ms = release_guard.as_secs_f64() * 1000.0;
        VoiceAllocator {
            max_release_time_ms: release_guard_ms,
            release_guard_ms,
            trace,
        }
    }

    /// Sets the release window from the longest envelope release of a newly loaded patch.
    pub fn set_release_time(&mut self, longest_release_secs: f64) {
        self.max_release_time_ms = longest_release_secs.max(0.0) * 1000.0 + self.release_guard_ms;
        debug!(
            max_release_time_ms = self.max_release_time_ms,
            "Release window updated"
        );
    }

    /// Returns how long a released voice is avoided before reuse, in milliseconds.
    pub fn max_release_time_ms(&self) -> f64 {
        self.max_release_time_ms
    }

    /// Chooses a voice for the note. Never fails and never blocks.
    pub fn allocate(
        &mut self,
        table: &mut VoiceTable,
        note: u8,
        allow_duplicate: bool,
        scheduled_time: f64,
    ) -> Allocation {
        if !allow_duplicate {
            if let Some(&voice_index) = table.registry().voices_for(note).first() {
                if let Some(voice) = table.voice_mut(voice_index) {
                    voice.touch(scheduled_time);
                }
                debug!(note, voice = voice_index, "Retriggering held note");
                self.trace.emit(VoiceEvent::Retriggered {
                    note,
                    voice: voice_index,
                });
                return Allocation {
                    voice_index,
                    stolen_note: None,
                    is_retrigger: true,
                };
            }
        }

        if let Some(voice_index) = Self::find_free(table) {
            table.advance_cursor_past(voice_index);
            Self::claim(table, voice_index, note, scheduled_time);
            debug!(note, voice = voice_index, "Allocated free voice");
            self.trace.emit(VoiceEvent::Allocated {
                note,
                voice: voice_index,
            });
            return Allocation {
                voice_index,
                stolen_note: None,
                is_retrigger: false,
            };
        }

        match self.find_steal(table, scheduled_time) {
            Some((voice_index, reason)) => {
                let stolen_note = Self::claim(table, voice_index, note, scheduled_time);
                debug!(
                    note,
                    voice = voice_index,
                    ?stolen_note,
                    ?reason,
                    "Stealing voice"
                );
                self.trace.emit(VoiceEvent::Stolen {
                    note,
                    voice: voice_index,
                    stolen_note,
                    reason,
                });
                Allocation {
                    voice_index,
                    stolen_note,
                    is_retrigger: false,
                }
            }
            None => {
                error!(
                    note,
                    voice_limit = table.voice_limit(),
                    "Allocation invariant violated: no voice could be classified, using voice 0"
                );
                self.trace.emit(VoiceEvent::InvariantViolation { note });
                let stolen_note = Self::claim(table, 0, note, scheduled_time);
                Allocation {
                    voice_index: 0,
                    stolen_note,
                    is_retrigger: false,
                }
            }
        }
    }

    /// Releases the voice at the given time, returning the note it held.
    ///
    /// A voice that no longer holds a note is left untouched, so a repeated
    /// release never moves the release start time.
    pub fn release(&mut self, table: &mut VoiceTable, voice_index: usize, at: f64) -> Option<u8> {
        if table.voice(voice_index).is_none() {
            debug!(voice = voice_index, "Release for voice outside the limit");
            return None;
        }

        let note = match table.registry_mut().unbind(voice_index) {
            Some(note) => note,
            None => {
                debug!(voice = voice_index, "Voice already released");
                self.trace
                    .emit(VoiceEvent::ReleaseIgnored { voice: voice_index });
                return None;
            }
        };

        if let Some(voice) = table.voice_mut(voice_index) {
            voice.start_release(at);
        }
        self.trace.emit(VoiceEvent::Released {
            note,
            voice: voice_index,
            at,
        });
        Some(note)
    }

    /// Releases every voice playing the note. Returns the released voices.
    pub fn release_note(&mut self, table: &mut VoiceTable, note: u8, at: f64) -> Vec<usize> {
        let voices = table.registry().voices_for(note).to_vec();
        voices
            .into_iter()
            .filter(|voice| self.release(table, *voice, at).is_some())
            .collect()
    }

    /// Forgets every held note and marks every sounding voice as releasing,
    /// including scheduled notes whose release was still pending. Returns
    /// those voices.
    pub fn stop_all(&mut self, table: &mut VoiceTable, at: f64) -> Vec<usize> {
        let mut stopped = table.registry().bound_voices();
        stopped.extend(
            table
                .voices()
                .iter()
                .filter(|voice| voice.is_sounding_at(at))
                .map(Voice::index),
        );
        stopped.sort_unstable();
        stopped.dedup();

        for voice_index in stopped.iter() {
            if let Some(voice) = table.voice_mut(*voice_index) {
                voice.start_release(at);
            }
        }
        table.registry_mut().clear();
        self.trace.emit(VoiceEvent::AllStopped {
            at,
            voices: stopped.len(),
        });
        stopped
    }

    /// Round-robin scan for a never-used voice starting at the table cursor.
    fn find_free(table: &VoiceTable) -> Option<usize> {
        let limit = table.voice_limit();
        let cursor = table.cursor();
        (0..limit)
            .map(|offset| (cursor + offset) % limit)
            .find(|index| table.voices()[*index].is_free())
    }

    /// Picks a voice to steal: finished releases first, then releasing voices,
    /// then held voices, oldest first within each class.
    fn find_steal(&self, table: &VoiceTable, scheduled_time: f64) -> Option<(usize, StealReason)> {
        let release_window = self.max_release_time_ms / 1000.0;
        let oldest = |reason: StealReason| {
            table
                .voices()
                .iter()
                .filter(|voice| Self::classify(voice, scheduled_time, release_window) == Some(reason))
                .min_by(|a, b| a.last_used_time().total_cmp(&b.last_used_time()))
                .map(|voice| (voice.index(), reason))
        };

        oldest(StealReason::CompletedRelease)
            .or_else(|| oldest(StealReason::InRelease))
            .or_else(|| oldest(StealReason::Active))
    }

    /// A voice whose release is still pending at the scheduled time counts as active.
    fn classify(voice: &Voice, scheduled_time: f64, release_window: f64) -> Option<StealReason> {
        if voice.is_sounding_at(scheduled_time) {
            Some(StealReason::Active)
        } else if voice.is_releasing() {
            if scheduled_time - voice.release_start_time() >= release_window {
                Some(StealReason::CompletedRelease)
            } else {
                Some(StealReason::InRelease)
            }
        } else {
            None
        }
    }

    /// Assigns the voice to the note, returning the note it displaced while
    /// still sounding. That is either a held note or a scheduled note whose
    /// release has not started yet.
    fn claim(table: &mut VoiceTable, voice_index: usize, note: u8, time: f64) -> Option<u8> {
        let stolen_note = table.registry_mut().unbind(voice_index).or_else(|| {
            table
                .voice(voice_index)
                .filter(|voice| voice.is_sounding_at(time))
                .and_then(Voice::assigned_note)
        });
        if let Some(voice) = table.voice_mut(voice_index) {
            voice.assign(note, time);
        }
        table.registry_mut().bind(note, voice_index);
        stolen_note
    }
}
