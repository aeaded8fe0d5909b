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

//! The server role's main tick loop (§5): a plain `while` loop driven by a
//! sleep, dispatching to the CENTER edge-detector or the REMOTE forwarder
//! depending on `state.context`, and owning the graceful-shutdown path.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGTERM;
use signal_hook::flag;

use crate::backend::DisplayBackend;
use crate::config::Config;
use crate::forwarder::Forwarder;
use crate::forwarder::ForwarderConfig;
use crate::hotkey::well_known_keycode;
use crate::hotkey::parse_chord;
use crate::hotkey::HotkeyConfig;
use crate::hotkey::HotkeyDispatcher;
use crate::hotkey::JumpTarget;
use crate::network::Network;
use crate::network::NetworkEvent;
use crate::prelude::*;
use crate::state::ServerState;
use crate::tracker::PointerTracker;
use crate::transition::TransitionConfig;
use crate::transition::TransitionController;

fn build_hotkey_config(config: &Config) -> Result<HotkeyConfig> {
    let panic_keycode = well_known_keycode(&config.server.panic_key)
        .ok_or_else(|| anyhow!("unknown panic_key {:?}", config.server.panic_key))?;
    let (jump_keycode, jump_requires_ctrl) =
        parse_chord(&config.server.jump_hotkey).map_err(|e| anyhow!("invalid jump_hotkey: {e}"))?;

    let mut hotkey_config = HotkeyConfig::new(panic_keycode, jump_keycode, jump_requires_ctrl);
    for (name, target) in [
        ("0", JumpTarget::Center),
        ("1", JumpTarget::West),
        ("2", JumpTarget::East),
        ("3", JumpTarget::North),
        ("4", JumpTarget::South),
    ] {
        let keycode = well_known_keycode(name).expect("digit keys are always in the well-known table");
        hotkey_config = hotkey_config.with_jump_action(keycode, target);
    }
    Ok(hotkey_config)
}

/// Runs the server role until SIGINT/SIGTERM, then performs the make-safe
/// sequence so the host desktop is never left grabbed on exit.
pub fn run(config: &Config, mut backend: Box<dyn DisplayBackend>) -> Result<()> {
    let geometry = backend.geometry_get().with_context(loc!(), || "querying initial screen geometry")?;
    info!("server screen geometry: {}x{}", geometry.width, geometry.height);

    if config.clients.len() > config.server.max_clients {
        bail!(
            "{} clients configured, exceeds max_clients={}",
            config.clients.len(),
            config.server.max_clients
        );
    }

    let network = Network::bind(&config.server.host, config.server.port, config.position_for_name())
        .with_context(loc!(), || format!("binding {}:{}", config.server.host, config.server.port))?;
    info!("listening on {}", network.local_addr());

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGINT, shutdown.clone()).location(loc!())?;
    flag::register(SIGTERM, shutdown.clone()).location(loc!())?;

    let transitions = TransitionController::new(TransitionConfig::default());
    let forwarder = Forwarder::new(ForwarderConfig {
        edge_threshold: config.server.edge_threshold,
        vel_threshold: config.server.velocity_threshold,
    });
    let mut hotkeys = HotkeyDispatcher::new(build_hotkey_config(config)?);

    let mut state = ServerState::new(Instant::now());
    let mut tracker = PointerTracker::new();
    let poll_interval = Duration::from_millis(config.server.poll_interval_ms);

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();

        drain_network_events(&network, &transitions, backend.as_mut(), &mut state, &mut tracker, geometry, now);

        if state.context.is_center() {
            tick_center(backend.as_mut(), &network, &transitions, &mut state, &mut tracker, geometry, now, config);
        } else {
            forwarder.tick(
                backend.as_mut(),
                &mut state,
                &mut tracker,
                &network,
                &transitions,
                &mut hotkeys,
                geometry,
                now,
            );
        }

        thread::sleep(poll_interval);
    }

    info!("shutdown signal received");
    transitions.force_center(backend.as_mut(), &mut state, &mut tracker);
    Ok(())
}

/// CENTER-context tick: just edge detection, since there is nothing to
/// forward while the server drives its own desktop.
#[allow(clippy::too_many_arguments)]
fn tick_center(
    backend: &mut dyn DisplayBackend,
    network: &Network,
    transitions: &TransitionController,
    state: &mut ServerState,
    tracker: &mut PointerTracker,
    geometry: crate::geometry::ScreenGeometry,
    now: Instant,
    config: &Config,
) {
    let pos = backend.pointer_query();
    tracker.sample_push(pos, now);
    if let Some(transition) =
        tracker.boundary_detect(pos, geometry, config.server.velocity_threshold, config.server.edge_threshold)
    {
        transitions.try_enter(backend, state, tracker, network, transition, geometry, now);
    }
}

/// Drains handshake/disconnect notifications from the network layer. A
/// disconnect of the currently-active client forces an immediate return
/// (§7: "if the disconnected client is the currently active one, the
/// controller forces a return to CENTER").
#[allow(clippy::too_many_arguments)]
fn drain_network_events(
    network: &Network,
    transitions: &TransitionController,
    backend: &mut dyn DisplayBackend,
    state: &mut ServerState,
    tracker: &mut PointerTracker,
    geometry: crate::geometry::ScreenGeometry,
    now: Instant,
) {
    while let Some(event) = network.try_recv() {
        match event {
            NetworkEvent::Connected { name } => info!("client {name} connected"),
            NetworkEvent::Disconnected { name } => {
                info!("client {name} disconnected");
                let active_client = state.context.entry_direction().and_then(|dir| network.client_for_position(dir));
                if active_client.as_deref() == Some(name.as_str()) {
                    let pos = backend.pointer_query();
                    transitions.execute_return(backend, state, tracker, network, pos, geometry, now);
                }
            },
            NetworkEvent::Message { name, message } => debug!("message from {name}: {message:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotkey_config_builds_from_default_server_config() {
        let config = Config::default();
        let hotkey_config = build_hotkey_config(&config).unwrap();
        assert_eq!(hotkey_config.jump_actions.len(), 5);
    }

    #[test]
    fn unknown_panic_key_is_rejected() {
        let mut config = Config::default();
        config.server.panic_key = "not_a_real_key".to_string();
        assert!(build_hotkey_config(&config).is_err());
    }

    // Scenario tests exercising the CENTER/REMOTE dispatch this module owns,
    // without the sleep/signal-handling loop in `run` itself.
    mod scenarios {
        use std::collections::HashMap;
        use std::time::Duration;

        use super::*;
        use crate::backend::mock::MockBackend;
        use crate::geometry::Direction;
        use crate::geometry::Position;
        use crate::geometry::ScreenGeometry;
        use crate::state::ScreenContext;

        fn geom() -> ScreenGeometry {
            ScreenGeometry::new(1920, 1080)
        }

        fn network_with(name: &str, dir: Direction) -> Network {
            let mut positions = HashMap::new();
            positions.insert(name.to_string(), dir);
            Network::bind("127.0.0.1", 0, positions).unwrap()
        }

        fn server_config() -> Config {
            let mut config = Config::default();
            config.server.edge_threshold = 0;
            config.server.velocity_threshold = 50.0;
            config
        }

        /// S1: entry left, forward while moving, return right.
        #[test]
        fn entry_forward_return_round_trip() {
            let config = server_config();
            let transitions = TransitionController::new(TransitionConfig::default());
            let forwarder = Forwarder::new(ForwarderConfig {
                edge_threshold: config.server.edge_threshold,
                vel_threshold: config.server.velocity_threshold,
            });
            let mut hk = HotkeyDispatcher::new(build_hotkey_config(&config).unwrap());
            let mut backend = MockBackend::new(geom());
            let mut state = ServerState::new(Instant::now());
            state.last_center_switch_time = Instant::now() - crate::transition::HYSTERESIS_DELAY * 2;
            let mut tracker = PointerTracker::new();
            let network = network_with("C_west", Direction::Left);

            // Pointer sweeps from center to the left edge fast enough to cross.
            let t0 = Instant::now();
            backend.move_pointer(Position::new(960, 540));
            tick_center(&mut backend, &network, &transitions, &mut state, &mut tracker, geom(), t0, &config);
            backend.move_pointer(Position::new(100, 540));
            tick_center(
                &mut backend,
                &network,
                &transitions,
                &mut state,
                &mut tracker,
                geom(),
                t0 + Duration::from_millis(20),
                &config,
            );
            backend.move_pointer(Position::new(0, 540));
            tick_center(
                &mut backend,
                &network,
                &transitions,
                &mut state,
                &mut tracker,
                geom(),
                t0 + Duration::from_millis(40),
                &config,
            );
            assert_eq!(state.context, ScreenContext::West);
            assert!(backend.pointer_grabbed);

            // Forward a few ticks while stationary inside REMOTE.
            forwarder.tick(
                &mut backend,
                &mut state,
                &mut tracker,
                &network,
                &transitions,
                &mut hk,
                geom(),
                t0 + Duration::from_millis(60),
            );
            assert!(state.last_sent_position.is_some());

            // Sweep back toward the right edge fast enough to trigger return.
            backend.move_pointer(Position::new(1919, 540));
            tracker.sample_push(Position::new(1600, 540), t0 + Duration::from_millis(80));
            let fired = forwarder.tick(
                &mut backend,
                &mut state,
                &mut tracker,
                &network,
                &transitions,
                &mut hk,
                geom(),
                t0 + Duration::from_millis(100),
            );
            assert!(fired);
            assert_eq!(state.context, ScreenContext::Center);
            assert!(!backend.pointer_grabbed);
            assert!(backend.cursor_visible);
        }

        /// S5: the active client disconnecting mid-REMOTE forces a return.
        #[test]
        fn active_client_disconnect_forces_return() {
            let transitions = TransitionController::new(TransitionConfig::default());
            let mut backend = MockBackend::new(geom());
            let mut state = ServerState::new(Instant::now());
            state.context = ScreenContext::East;
            backend.pointer_grab().unwrap();
            backend.keyboard_grab().unwrap();
            let mut tracker = PointerTracker::new();
            let network = network_with("C_east", Direction::Right);

            let first = connect_test_client(&network, "C_east");
            wait_connected(&network, "C_east");
            drop(first);
            wait_disconnected(&network, "C_east");

            drain_network_events(&network, &transitions, &mut backend, &mut state, &mut tracker, geom(), Instant::now());

            assert_eq!(state.context, ScreenContext::Center);
            assert!(!backend.pointer_grabbed);
        }

        /// A disconnect of a client that is *not* currently active must not
        /// perturb the active context.
        #[test]
        fn inactive_client_disconnect_does_not_force_return() {
            let transitions = TransitionController::new(TransitionConfig::default());
            let mut backend = MockBackend::new(geom());
            let mut state = ServerState::new(Instant::now());
            state.context = ScreenContext::East;
            backend.pointer_grab().unwrap();
            let mut tracker = PointerTracker::new();

            let mut positions = HashMap::new();
            positions.insert("C_east".to_string(), Direction::Right);
            positions.insert("C_west".to_string(), Direction::Left);
            let network = Network::bind("127.0.0.1", 0, positions).unwrap();

            let bystander = connect_test_client(&network, "C_west");
            wait_connected(&network, "C_west");
            drop(bystander);
            wait_disconnected(&network, "C_west");

            drain_network_events(&network, &transitions, &mut backend, &mut state, &mut tracker, geom(), Instant::now());

            assert_eq!(state.context, ScreenContext::East);
            assert!(backend.pointer_grabbed);
        }

        fn connect_test_client(network: &Network, name: &str) -> std::net::TcpStream {
            use crate::network::framing::Framed;
            use crate::network::protocol::Message;
            let mut stream = std::net::TcpStream::connect(network.local_addr()).unwrap();
            Message::hello(name, None).framed_write(&mut stream).unwrap();
            let _ = Message::framed_read(&mut stream).unwrap();
            stream
        }

        fn wait_connected(network: &Network, name: &str) {
            let start = Instant::now();
            while !network.is_connected(name) {
                assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for connect");
                thread::sleep(Duration::from_millis(5));
            }
        }

        fn wait_disconnected(network: &Network, name: &str) {
            let start = Instant::now();
            while network.is_connected(name) {
                assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for disconnect");
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
}
