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
use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

fn default_tail() -> f64 {
    1.0
}

/// A performance to play through the simulator.
#[derive(Deserialize, Debug)]
pub struct Script {
    /// The patch to load before playing, as the engine's JSON document.
    #[serde(default)]
    pub patch: Option<String>,
    /// Seconds to keep rendering after the last event.
    #[serde(default = "default_tail")]
    pub tail: f64,
    #[serde(default)]
    pub events: Vec<ScriptEvent>,
}

/// A single timed action.
#[derive(Deserialize, Debug)]
pub struct ScriptEvent {
    /// Audio clock time in seconds.
    pub at: f64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    Schedule { note: u8, velocity: u8, duration: f64 },
    Midi { bytes: Vec<u8> },
    StopAll,
}

impl Script {
    /// Parse a script from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Script, Box<dyn Error>> {
        Ok(serde_yml::from_str(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script() {
        let script: Script = serde_yml::from_str(
            r#"
patch: '{"voices": 2, "envelopes": [{"release": 0.2}]}'
events:
  - at: 0.0
    action: note_on
    note: 60
    velocity: 100
  - at: 0.5
    action: midi
    bytes: [128, 60, 0]
  - at: 1.0
    action: stop_all
"#,
        )
        .expect("parse");

        assert_eq!(script.tail, 1.0);
        assert_eq!(script.events.len(), 3);
        assert_eq!(
            script.events[0].action,
            Action::NoteOn {
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(script.events[2].action, Action::StopAll);
    }
}
