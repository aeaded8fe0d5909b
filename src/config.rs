// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! YAML configuration: the server's edge/velocity thresholds and client
//! bindings, the client's reconnection policy, the chosen display backend,
//! and logging.

use std::collections::HashMap;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::geometry::Direction;
use crate::prelude::*;

fn fallback_config_parent_dir() -> Result<PathBuf> {
    Ok(Path::join(
        &home::home_dir().ok_or_else(|| anyhow!("unable to determine home dir"))?,
        ".config",
    ))
}

pub fn default_config_file_dir() -> PathBuf {
    Path::join(
        &env::var("XDG_CONFIG_HOME")
            .log(loc!())
            .ok()
            .map(Into::into)
            .or_else(|| fallback_config_parent_dir().log(loc!()).ok())
            .unwrap_or_else(|| "/etc".into()),
        "tx2tx",
    )
}

pub fn default_config_file() -> PathBuf {
    Path::join(&default_config_file_dir(), "tx2tx.yaml")
}

/// One of the four cardinal positions a client can be bound to. Distinct
/// from [`crate::geometry::Direction`] (the tracker's internal vocabulary)
/// so the wire-facing config schema stays stable even if the internal
/// representation changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientPosition {
    West,
    East,
    North,
    South,
}

impl ClientPosition {
    pub fn to_direction(self) -> Direction {
        match self {
            ClientPosition::West => Direction::Left,
            ClientPosition::East => Direction::Right,
            ClientPosition::North => Direction::Top,
            ClientPosition::South => Direction::Bottom,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEntry {
    pub name: String,
    pub position: ClientPosition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub edge_threshold: i32,
    pub velocity_threshold: f64,
    pub poll_interval_ms: u64,
    /// Name of the panic key, e.g. `"scroll_lock"`. Resolved to a keycode by
    /// [`crate::hotkey::well_known_keycode`].
    pub panic_key: String,
    /// Jump-prefix chord, e.g. `"ctrl+/"`.
    pub jump_hotkey: String,
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7717,
            edge_threshold: 0,
            velocity_threshold: 50.0,
            poll_interval_ms: 20,
            panic_key: "scroll_lock".to_string(),
            jump_hotkey: "ctrl+/".to_string(),
            max_clients: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay_seconds: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            delay_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_address: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:7717".to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Reads and validates a config file. `None` if the path doesn't exist —
    /// callers fall back to [`Config::default`].
    pub fn read_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).with_context(loc!(), || format!("reading config file {path:?}"))?;
        let config: Self =
            serde_yaml::from_str(&raw).with_context(loc!(), || format!("parsing config file {path:?}"))?;
        config.validate().with_context(loc!(), || format!("config file {path:?} is invalid"))?;
        Ok(Some(config))
    }

    /// Open Question (c): two clients sharing a position is undefined in the
    /// source; this spec forbids it at config load time.
    pub fn validate(&self) -> Result<()> {
        let mut seen_positions = HashSet::new();
        let mut seen_names = HashSet::new();
        for client in &self.clients {
            if !seen_positions.insert(client.position) {
                bail!("duplicate client position {:?} (client {:?})", client.position, client.name);
            }
            if !seen_names.insert(client.name.clone()) {
                bail!("duplicate client name {:?}", client.name);
            }
        }
        Ok(())
    }

    /// The `Direction -> client name` binding the network layer and
    /// transition controller need, built once at startup.
    pub fn position_for_name(&self) -> HashMap<String, Direction> {
        self.clients
            .iter()
            .map(|c| (c.name.clone(), c.position.to_direction()))
            .collect()
    }

    pub fn print_default_and_exit() -> ! {
        println!(
            "{}",
            serde_yaml::to_string(&Config::default()).expect("default config must be serializable")
        );
        std::process::exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.server.port, config.server.port);
    }

    #[test]
    fn duplicate_position_is_rejected() {
        let config = Config {
            clients: vec![
                ClientEntry {
                    name: "a".to_string(),
                    position: ClientPosition::West,
                },
                ClientEntry {
                    name: "b".to_string(),
                    position: ClientPosition::West,
                },
            ],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let config = Config {
            clients: vec![
                ClientEntry {
                    name: "a".to_string(),
                    position: ClientPosition::West,
                },
                ClientEntry {
                    name: "a".to_string(),
                    position: ClientPosition::East,
                },
            ],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn distinct_positions_and_names_are_accepted() {
        let config = Config {
            clients: vec![
                ClientEntry {
                    name: "a".to_string(),
                    position: ClientPosition::West,
                },
                ClientEntry {
                    name: "b".to_string(),
                    position: ClientPosition::East,
                },
            ],
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_returns_none() {
        let result = Config::read_from_file(Path::new("/nonexistent/tx2tx.yaml")).unwrap();
        assert!(result.is_none());
    }
}
