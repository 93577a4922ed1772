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
use std::path::Path;

use config::{File, FileFormat};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod instrument;
pub mod protocol;

pub use error::ConfigError;
pub use instrument::{GatePolicy, InstrumentConfig, MAX_POOL_SIZE};
pub use protocol::ProtocolConfig;

/// The top level configuration for an instrument and its worklet link.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    /// Voice pool and scheduling settings.
    #[serde(default)]
    instrument: InstrumentConfig,

    /// Request/response settings for the worklet channel.
    #[serde(default)]
    protocol: ProtocolConfig,
}

impl Config {
    /// Creates a new configuration from its sections.
    pub fn new(instrument: InstrumentConfig, protocol: ProtocolConfig) -> Config {
        Config {
            instrument,
            protocol,
        }
    }

    /// Parse a configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Config, ConfigError> {
        let config = config::Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Config, ConfigError> {
        let config = config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section for out of range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.instrument.validate()?;
        self.protocol.validate()
    }

    /// Returns the instrument section.
    pub fn instrument(&self) -> &InstrumentConfig {
        &self.instrument
    }

    /// Returns the protocol section.
    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }
}
