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

//! CLI surface (§6). A single binary selects its role by the presence of
//! `--server`: absent runs as the server, present runs as a client
//! connecting to `HOST:PORT`.

use std::path::PathBuf;

use clap::Parser;
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum BackendKind {
    X11,
    Wayland,
}

#[derive(Debug, Parser)]
#[command(name = "tx2tx", about = "Software KVM: forward pointer and keyboard input to remote displays")]
pub struct Args {
    /// Run as a client connecting to the given server address; omit to run
    /// as the server.
    #[arg(long, value_name = "HOST:PORT")]
    pub server: Option<String>,

    /// This client's configured identity (client role only).
    #[arg(long)]
    pub name: Option<String>,

    /// Overrides `server.port` from the config file.
    #[arg(long)]
    pub port: Option<u16>,

    /// Overrides `server.host` from the config file.
    #[arg(long)]
    pub host: Option<String>,

    /// Selects the display backend.
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Overrides config file discovery.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Prints the default config to stdout and exits.
    #[arg(long)]
    pub print_default_config: bool,
}

impl Args {
    pub fn is_client(&self) -> bool {
        self.server.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_server_flag_selects_server_role() {
        let args = Args::parse_from(["tx2tx"]);
        assert!(!args.is_client());
    }

    #[test]
    fn server_flag_selects_client_role() {
        let args = Args::parse_from(["tx2tx", "--server", "10.0.0.2:7717", "--name", "C_west"]);
        assert!(args.is_client());
        assert_eq!(args.server.as_deref(), Some("10.0.0.2:7717"));
        assert_eq!(args.name.as_deref(), Some("C_west"));
    }

    #[test]
    fn backend_flag_parses_enum() {
        let args = Args::parse_from(["tx2tx", "--backend", "wayland"]);
        assert_eq!(args.backend, Some(BackendKind::Wayland));
    }
}
