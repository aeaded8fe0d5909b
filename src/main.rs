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

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use tx2tx::args::Args;
use tx2tx::args::BackendKind;
use tx2tx::backend::wayland::default_socket_path;
use tx2tx::backend::wayland::WaylandHelperBackend;
use tx2tx::backend::x11::X11Backend;
use tx2tx::backend::DisplayBackend;
use tx2tx::client;
use tx2tx::config::default_config_file;
use tx2tx::config::Config;
use tx2tx::prelude::*;
use tx2tx::server;
use tx2tx::utils;

fn log_level(name: &str) -> Level {
    name.parse().unwrap_or_else(|_| {
        eprintln!("unrecognized logging.level {name:?}, defaulting to info");
        Level::INFO
    })
}

fn resolve_backend_kind(args: &Args, config: &Config) -> BackendKind {
    if let Some(kind) = args.backend {
        return kind;
    }
    match config.backend.name.to_ascii_lowercase().as_str() {
        "wayland" => BackendKind::Wayland,
        _ => BackendKind::X11,
    }
}

fn build_backend(kind: BackendKind) -> Result<Box<dyn DisplayBackend>> {
    match kind {
        BackendKind::X11 => {
            let backend = X11Backend::connect().with_context(loc!(), || "connecting to X11 display")?;
            Ok(Box::new(backend))
        },
        BackendKind::Wayland => {
            let socket_path = default_socket_path().with_context(loc!(), || "resolving wayland helper socket path")?;
            let backend = WaylandHelperBackend::connect(&socket_path)
                .with_context(loc!(), || format!("connecting to wayland helper at {}", socket_path.display()))?;
            Ok(Box::new(backend))
        },
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        Config::print_default_and_exit();
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_file);
    let mut config = Config::read_from_file(&config_path)
        .with_context(loc!(), || format!("loading config from {config_path:?}"))?
        .unwrap_or_default();

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    config.validate().with_context(loc!(), || format!("config at {config_path:?} is invalid"))?;

    utils::configure_tracing(log_level(&config.logging.level), None::<&str>, log_level(&config.logging.level))
        .with_context(loc!(), || "configuring tracing")?;
    utils::exit_on_thread_panic();

    let backend_kind = resolve_backend_kind(&args, &config);
    let backend = build_backend(backend_kind).with_context(loc!(), || "initializing display backend")?;

    if let Some(server_address) = &args.server {
        let name = args
            .name
            .clone()
            .ok_or_else(|| anyhow!("--name is required when running as a client"))?;
        client::run(&config.client, &name, server_address, backend)
    } else {
        server::run(&config, backend)
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tx2tx: {e:?}");
            ExitCode::FAILURE
        },
    }
}
