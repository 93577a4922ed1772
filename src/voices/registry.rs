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
use std::collections::HashMap;

/// Maps each sounding note to the voices currently playing it.
///
/// A voice belongs to at most one note at a time, and a note with no voices
/// has no entry.
#[derive(Debug, Default, Clone)]
pub struct NoteRegistry {
    notes: HashMap<u8, Vec<usize>>,
}

impl NoteRegistry {
    /// Creates an empty registry.
    pub fn new() -> NoteRegistry {
        NoteRegistry::default()
    }

    /// Binds the voice to the note, removing it from whatever note held it before.
    pub fn bind(&mut self, note: u8, voice: usize) {
        self.unbind(voice);
        self.notes.entry(note).or_default().push(voice);
    }

    /// Unbinds the voice, returning the note it was bound to.
    pub fn unbind(&mut self, voice: usize) -> Option<u8> {
        let note = self.notes.iter_mut().find_map(|(note, voices)| {
            voices.iter().position(|v| *v == voice).map(|pos| {
                voices.remove(pos);
                *note
            })
        })?;

        if self.notes.get(&note).is_some_and(Vec::is_empty) {
            self.notes.remove(&note);
        }
        Some(note)
    }

    /// Returns the voices playing the note, oldest binding first.
    pub fn voices_for(&self, note: u8) -> &[usize] {
        self.notes.get(&note).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the note the voice is bound to.
    pub fn note_for(&self, voice: usize) -> Option<u8> {
        self.notes
            .iter()
            .find(|(_, voices)| voices.contains(&voice))
            .map(|(note, _)| *note)
    }

    /// Returns true if the voice is bound to any note.
    pub fn is_bound(&self, voice: usize) -> bool {
        self.note_for(voice).is_some()
    }

    /// Returns every bound voice.
    pub fn bound_voices(&self) -> Vec<usize> {
        let mut voices: Vec<usize> = self.notes.values().flatten().copied().collect();
        voices.sort_unstable();
        voices
    }

    /// Returns the number of sounding notes.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Returns true if no note is sounding.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Removes every binding.
    pub fn clear(&mut self) {
        self.notes.clear();
    }
}
