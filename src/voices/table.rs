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

//! The fixed voice pool and the per-voice bookkeeping the allocator reads.

use super::registry::NoteRegistry;
use crate::config::MAX_POOL_SIZE;

/// One hardware voice.
///
/// `assigned_note` keeps the last note played until the voice is reassigned,
/// so a released voice is never mistaken for a free one. Whether the voice is
/// still held is answered by the [`NoteRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    /// Position of this voice in the pool.
    index: usize,
    /// The note this voice last started.
    assigned_note: Option<u8>,
    /// Audio clock time (seconds) of the last allocation or retrigger.
    last_used_time: f64,
    /// Audio clock time (seconds) the release began, or 0 if not releasing.
    release_start_time: f64,
}

impl Voice {
    fn new(index: usize) -> Voice {
        Voice {
            index,
            assigned_note: None,
            last_used_time: 0.0,
            release_start_time: 0.0,
        }
    }

    /// Returns the voice index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the note this voice last started.
    pub fn assigned_note(&self) -> Option<u8> {
        self.assigned_note
    }

    /// Returns when the voice was last allocated or retriggered.
    pub fn last_used_time(&self) -> f64 {
        self.last_used_time
    }

    /// Returns when the release began, 0 if the voice is not releasing.
    pub fn release_start_time(&self) -> f64 {
        self.release_start_time
    }

    /// Returns true if the voice has never played since the last reset.
    pub fn is_free(&self) -> bool {
        self.assigned_note.is_none()
    }

    /// Returns true if the voice has a release start recorded, past or pending.
    pub fn is_releasing(&self) -> bool {
        self.release_start_time > 0.0
    }

    /// Returns true if the voice's gate is still high at the given time. A
    /// scheduled note keeps sounding until its pending release starts.
    pub fn is_sounding_at(&self, time: f64) -> bool {
        self.assigned_note.is_some() && (!self.is_releasing() || time < self.release_start_time)
    }

    pub(super) fn assign(&mut self, note: u8, time: f64) {
        self.assigned_note = Some(note);
        self.last_used_time = time;
        self.release_start_time = 0.0;
    }

    pub(super) fn touch(&mut self, time: f64) {
        self.last_used_time = time;
    }

    pub(super) fn start_release(&mut self, at: f64) {
        // Zero means "not releasing", so a release at the clock origin is nudged forward.
        self.release_start_time = at.max(f64::MIN_POSITIVE);
    }

    fn reset(&mut self) {
        *self = Voice::new(self.index);
    }
}

/// The voice pool plus the note registry, owned by one instrument.
#[derive(Debug, Clone)]
pub struct VoiceTable {
    voices: Vec<Voice>,
    registry: NoteRegistry,
    voice_limit: usize,
    cursor: usize,
}

impl VoiceTable {
    /// Creates a table with the given pool size, clamped to 1..=8 voices.
    pub fn new(pool_size: usize) -> VoiceTable {
        let pool_size = pool_size.clamp(1, MAX_POOL_SIZE);
        VoiceTable {
            voices: (0..pool_size).map(Voice::new).collect(),
            registry: NoteRegistry::new(),
            voice_limit: pool_size,
            cursor: 0,
        }
    }

    /// Returns the number of voices in the pool.
    pub fn pool_size(&self) -> usize {
        self.voices.len()
    }

    /// Returns how many voices the active patch may use.
    pub fn voice_limit(&self) -> usize {
        self.voice_limit
    }

    /// Sets the voice limit for a newly loaded patch and resets every voice.
    /// Returns the clamped limit.
    pub fn set_voice_limit(&mut self, limit: usize) -> usize {
        self.voice_limit = limit.clamp(1, self.pool_size());
        self.reset();
        self.voice_limit
    }

    /// Frees every voice and forgets every note.
    pub fn reset(&mut self) {
        self.voices.iter_mut().for_each(Voice::reset);
        self.registry.clear();
        self.cursor = 0;
    }

    /// Returns the voices usable under the current limit.
    pub fn voices(&self) -> &[Voice] {
        &self.voices[..self.voice_limit]
    }

    /// Returns the voice at the given index.
    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.voices().get(index)
    }

    /// Returns the note registry.
    pub fn registry(&self) -> &NoteRegistry {
        &self.registry
    }

    pub(super) fn voice_mut(&mut self, index: usize) -> Option<&mut Voice> {
        self.voices[..self.voice_limit].get_mut(index)
    }

    pub(super) fn registry_mut(&mut self) -> &mut NoteRegistry {
        &mut self.registry
    }

    pub(super) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(super) fn advance_cursor_past(&mut self, index: usize) {
        self.cursor = (index + 1) % self.voice_limit;
    }
}
