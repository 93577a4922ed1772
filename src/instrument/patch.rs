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
use serde::Deserialize;

/// An envelope in a patch. Only the release matters to voice allocation.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EnvelopeSummary {
    /// Release time in seconds.
    #[serde(default)]
    release: f64,
}

/// The parts of a patch the instrument needs. The rest of the document is
/// opaque and only the engine interprets it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchSummary {
    /// The voice count the patch asks for.
    #[serde(default)]
    voices: Option<usize>,
    #[serde(default)]
    envelopes: Vec<EnvelopeSummary>,
    /// Portamento time in seconds.
    #[serde(default)]
    glide: f64,
}

impl PatchSummary {
    /// Reads the summary out of a serialized patch.
    pub fn parse(patch: &str) -> Result<PatchSummary, serde_json::Error> {
        serde_json::from_str(patch)
    }

    pub fn voices(&self) -> Option<usize> {
        self.voices
    }

    /// Returns the longest envelope release in seconds, 0 without envelopes.
    pub fn longest_release(&self) -> f64 {
        self.envelopes
            .iter()
            .map(|envelope| envelope.release)
            .filter(|release| release.is_finite())
            .fold(0.0, f64::max)
    }

    pub fn glide(&self) -> f64 {
        if self.glide.is_finite() {
            self.glide.max(0.0)
        } else {
            0.0
        }
    }
}
