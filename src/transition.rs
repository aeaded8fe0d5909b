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

//! Entry and return transitions. Every path through
//! [`TransitionController::try_enter`] and [`TransitionController::execute_return`]
//! funnels back to `ScreenContext::Center` on failure, so the host desktop is
//! never left grabbed — the "make-safe" helper required by the error-handling
//! design is [`TransitionController::force_center`] itself, not a separate
//! function.

use std::time::Duration;
use std::time::Instant;

use crate::backend::DisplayBackend;
use crate::geometry::Direction;
use crate::geometry::NormalizedPoint;
use crate::geometry::Position;
use crate::geometry::ScreenGeometry;
use crate::network::protocol::Message;
use crate::network::Network;
use crate::prelude::*;
use crate::state::ScreenContext;
use crate::state::ServerState;
use crate::tracker::PointerTracker;
use crate::tracker::Transition;

/// Places the pointer just inside the opposite edge on entry/return so it
/// does not immediately re-trigger the boundary detector.
pub const EDGE_ENTRY_OFFSET: i32 = 2;

/// Minimum time between a return and the next entry; suppresses edge bounce.
pub const HYSTERESIS_DELAY: Duration = Duration::from_millis(200);

/// Bound on how many ticks the forwarder re-issues a deferred warp before
/// giving up and forwarding anyway (~0.5s at the default 20ms tick).
pub const DEFERRED_WARP_MAX_TICKS: u32 = 25;

/// A warp is considered confirmed once the backend reports a position within
/// this many pixels of the target.
pub const DEFERRED_WARP_TOLERANCE_PX: i32 = 10;

/// Target pixel position on entry into `dir`, per the direction/context/warp
/// table: the pointer lands just inside the edge opposite the one it left
/// through, preserving the other axis.
pub fn entry_warp_target(dir: Direction, pos: Position, geom: ScreenGeometry) -> Position {
    let offset = EDGE_ENTRY_OFFSET;
    match dir {
        Direction::Left => Position::new(geom.width as i32 - 1 - offset, pos.y),
        Direction::Right => Position::new(offset, pos.y),
        Direction::Top => Position::new(pos.x, geom.height as i32 - 1 - offset),
        Direction::Bottom => Position::new(pos.x, offset),
    }
}

/// Target pixel position on return from `context`, mirroring
/// [`entry_warp_target`] for the opposite edge.
pub fn return_warp_target(context: ScreenContext, pos: Position, geom: ScreenGeometry) -> Position {
    let offset = EDGE_ENTRY_OFFSET;
    match context {
        ScreenContext::West => Position::new(offset, pos.y),
        ScreenContext::East => Position::new(geom.width as i32 - 1 - offset, pos.y),
        ScreenContext::North => Position::new(pos.x, offset),
        ScreenContext::South => Position::new(pos.x, geom.height as i32 - 1 - offset),
        ScreenContext::Center => pos,
    }
}

/// Whether a platform's warp primitive is trusted to land where asked. When
/// `false`, the entry transition arms the deferred-warp protocol (§4.4) and
/// the forwarder re-issues the warp each tick until it is confirmed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionConfig {
    pub deferred_warp: bool,
}

pub struct TransitionController {
    config: TransitionConfig,
}

impl TransitionController {
    pub fn new(config: TransitionConfig) -> Self {
        Self { config }
    }

    /// Attempts the CENTER → {WEST,EAST,NORTH,SOUTH} entry sequence (§4.4).
    /// Returns `false` (state untouched beyond best-effort cleanup) if a
    /// precondition fails, a client isn't bound to the direction, or a grab
    /// is refused. Never panics on grab failure; that is the expected,
    /// recoverable path.
    pub fn try_enter(
        &self,
        backend: &mut dyn DisplayBackend,
        state: &mut ServerState,
        tracker: &mut PointerTracker,
        network: &Network,
        transition: Transition,
        geometry: ScreenGeometry,
        now: Instant,
    ) -> bool {
        if now.saturating_duration_since(state.last_center_switch_time) < HYSTERESIS_DELAY {
            debug!("entry suppressed by hysteresis");
            return false;
        }
        self.enter_inner(backend, state, tracker, network, transition, geometry, now)
    }

    /// A jump hotkey bypasses the edge-crossing hysteresis gate — it is an
    /// explicit user action, not a pointer graze that bounce-suppression
    /// needs to guard against. Used only by [`Self::jump`].
    fn enter_inner(
        &self,
        backend: &mut dyn DisplayBackend,
        state: &mut ServerState,
        tracker: &mut PointerTracker,
        network: &Network,
        transition: Transition,
        geometry: ScreenGeometry,
        now: Instant,
    ) -> bool {
        if !state.context.is_center() {
            return false;
        }

        let Some(client_name) = network.client_for_position(transition.direction) else {
            debug!("no client bound to {:?}; ignoring edge crossing", transition.direction);
            return false;
        };

        // Step 1: compute target warp.
        let target = entry_warp_target(transition.direction, transition.position, geometry);

        // Step 2: calculated entry coordinate sent first, so correctness
        // never depends on the warp being visible (Open Question (a)).
        network.send(&client_name, Message::mouse_move(geometry.normalize(target)));

        // Step 3: grabs, each rolled back on the other's failure.
        if let Err(e) = backend.pointer_grab() {
            debug!("entry aborted: pointer grab failed: {e}");
            backend.cursor_show();
            return false;
        }
        if let Err(e) = backend.keyboard_grab() {
            debug!("entry aborted: keyboard grab failed: {e}");
            backend.pointer_ungrab();
            backend.cursor_show();
            return false;
        }

        // Step 4.
        backend.cursor_hide();

        // Step 5: may silently no-op on uncooperative compositors.
        backend.pointer_warp(target);

        // Step 6.
        tracker.reset();
        state.context = ScreenContext::from_direction(transition.direction);
        state.clear_forwarding_state();
        state.last_center_switch_time = now;
        if self.config.deferred_warp {
            state.boundary_crossed = true;
            state.target_warp_position = Some(target);
        }

        info!("entered {:?} (client {client_name:?})", state.context);
        true
    }

    /// Executes the REMOTE → CENTER return sequence (§4.4). Safe to call
    /// unconditionally (panic return, disconnect, fatal shutdown): every
    /// step is best-effort and a no-op if the corresponding resource was
    /// never acquired.
    pub fn execute_return(
        &self,
        backend: &mut dyn DisplayBackend,
        state: &mut ServerState,
        tracker: &mut PointerTracker,
        network: &Network,
        pos: Position,
        geometry: ScreenGeometry,
        now: Instant,
    ) {
        if state.context.is_center() {
            return;
        }
        let prev_context = state.context;

        // Step 1: hide signal to the currently-active client, if any.
        if let Some(dir) = prev_context.entry_direction() {
            if let Some(name) = network.client_for_position(dir) {
                network.send(&name, Message::hide_signal());
            }
        }

        // Step 2.
        backend.keyboard_ungrab();
        backend.pointer_ungrab();

        // Step 3.
        backend.cursor_show();

        // Step 4.
        let return_pos = return_warp_target(prev_context, pos, geometry);
        backend.pointer_warp(return_pos);

        // Step 5.
        tracker.reset();
        state.context = ScreenContext::Center;
        state.clear_forwarding_state();
        state.last_center_switch_time = now;

        info!("returned to CENTER from {prev_context:?}");
    }

    /// The make-safe helper (§7): funnels every uncaught error path through
    /// ungrab + cursor-show + return-to-CENTER, without attempting a warp
    /// (the pointer's true position may not be knowable after a failure, so
    /// it is left where it is).
    pub fn force_center(&self, backend: &mut dyn DisplayBackend, state: &mut ServerState, tracker: &mut PointerTracker) {
        if state.context.is_center() {
            return;
        }
        warn!("forcing CENTER from {:?} after unrecoverable error", state.context);
        backend.keyboard_ungrab();
        backend.pointer_ungrab();
        backend.cursor_show();
        tracker.reset();
        state.context = ScreenContext::Center;
        state.clear_forwarding_state();
    }

    /// The panic path: unconditional return regardless of pointer position.
    /// Always safe — it only ungrabs and shows, never grabs.
    pub fn panic_return(
        &self,
        backend: &mut dyn DisplayBackend,
        state: &mut ServerState,
        tracker: &mut PointerTracker,
        network: &Network,
        geometry: ScreenGeometry,
        now: Instant,
    ) {
        let pos = backend.pointer_query();
        self.execute_return(backend, state, tracker, network, pos, geometry, now);
    }

    /// Synthesizes a jump-hotkey transition (§4.6): forces CENTER first if a
    /// context was already active, then enters `target` directly from the
    /// pointer's current position, ignoring the entry hysteresis gate (it is
    /// a deliberate user action, not an edge graze). A jump to `Center` from
    /// `Center` is a no-op.
    pub fn jump(
        &self,
        backend: &mut dyn DisplayBackend,
        state: &mut ServerState,
        tracker: &mut PointerTracker,
        network: &Network,
        target: crate::hotkey::JumpTarget,
        geometry: ScreenGeometry,
        now: Instant,
    ) {
        if !state.context.is_center() {
            let pos = backend.pointer_query();
            self.execute_return(backend, state, tracker, network, pos, geometry, now);
        }
        if let Some(dir) = target.direction() {
            let pos = backend.pointer_query();
            let transition = Transition { direction: dir, position: pos };
            self.enter_inner(backend, state, tracker, network, transition, geometry, now);
        }
    }

    /// Returns the normalized entry coordinate that frame-1 on the client is
    /// expected to receive, for tests that want to assert against §4.3's
    /// table without duplicating the arithmetic.
    pub fn expected_entry_point(dir: Direction, pos: Position, geometry: ScreenGeometry) -> NormalizedPoint {
        geometry.normalize(entry_warp_target(dir, pos, geometry))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::backend::mock::MockBackend;

    fn geom() -> ScreenGeometry {
        ScreenGeometry::new(1920, 1080)
    }

    fn network_with(name: &str, dir: Direction) -> Network {
        let mut positions = HashMap::new();
        positions.insert(name.to_string(), dir);
        Network::bind("127.0.0.1", 0, positions).unwrap()
    }

    #[test]
    fn entry_table_matches_spec() {
        let g = geom();
        let pos = Position::new(960, 540);
        assert_eq!(entry_warp_target(Direction::Left, pos, g), Position::new(1917, 540));
        assert_eq!(entry_warp_target(Direction::Right, pos, g), Position::new(2, 540));
        assert_eq!(entry_warp_target(Direction::Top, pos, g), Position::new(960, 1077));
        assert_eq!(entry_warp_target(Direction::Bottom, pos, g), Position::new(960, 2));
    }

    #[test]
    fn return_table_matches_spec() {
        let g = geom();
        let pos = Position::new(960, 540);
        assert_eq!(return_warp_target(ScreenContext::West, pos, g), Position::new(2, 540));
        assert_eq!(return_warp_target(ScreenContext::East, pos, g), Position::new(1917, 540));
        assert_eq!(return_warp_target(ScreenContext::North, pos, g), Position::new(960, 2));
        assert_eq!(return_warp_target(ScreenContext::South, pos, g), Position::new(960, 1077));
    }

    #[test]
    fn entry_transitions_context_and_grabs_backend() {
        let controller = TransitionController::new(TransitionConfig::default());
        let mut backend = MockBackend::new(geom());
        let mut state = ServerState::new(Instant::now());
        let mut tracker = PointerTracker::new();
        let network = network_with("C_west", Direction::Left);

        state.last_center_switch_time = Instant::now() - HYSTERESIS_DELAY * 2;
        let transition = Transition {
            direction: Direction::Left,
            position: Position::new(0, 540),
        };
        let ok = controller.try_enter(
            &mut backend,
            &mut state,
            &mut tracker,
            &network,
            transition,
            geom(),
            Instant::now(),
        );

        assert!(ok);
        assert_eq!(state.context, ScreenContext::West);
        assert!(backend.pointer_grabbed);
        assert!(backend.keyboard_grabbed);
        assert!(!backend.cursor_visible);
        assert_eq!(state.last_sent_position, None);
    }

    #[test]
    fn grab_failure_aborts_entry_and_shows_cursor() {
        let controller = TransitionController::new(TransitionConfig::default());
        let mut backend = MockBackend::new(geom());
        backend.fail_pointer_grab = true;
        let mut state = ServerState::new(Instant::now());
        let mut tracker = PointerTracker::new();
        let network = network_with("C_west", Direction::Left);

        state.last_center_switch_time = Instant::now() - HYSTERESIS_DELAY * 2;
        let transition = Transition {
            direction: Direction::Left,
            position: Position::new(0, 540),
        };
        let ok = controller.try_enter(
            &mut backend,
            &mut state,
            &mut tracker,
            &network,
            transition,
            geom(),
            Instant::now(),
        );

        assert!(!ok);
        assert_eq!(state.context, ScreenContext::Center);
        assert!(backend.cursor_visible);
        assert!(!backend.pointer_grabbed);
    }

    #[test]
    fn hysteresis_blocks_immediate_re_entry() {
        let controller = TransitionController::new(TransitionConfig::default());
        let mut backend = MockBackend::new(geom());
        let mut state = ServerState::new(Instant::now());
        let mut tracker = PointerTracker::new();
        let network = network_with("C_west", Direction::Left);

        let transition = Transition {
            direction: Direction::Left,
            position: Position::new(0, 540),
        };
        let ok = controller.try_enter(
            &mut backend,
            &mut state,
            &mut tracker,
            &network,
            transition,
            geom(),
            Instant::now(),
        );
        assert!(!ok, "entry right after startup should be blocked by hysteresis");
        assert_eq!(state.context, ScreenContext::Center);
    }

    #[test]
    fn return_ungrabs_and_resets_to_center() {
        let controller = TransitionController::new(TransitionConfig::default());
        let mut backend = MockBackend::new(geom());
        backend.pointer_grab().unwrap();
        backend.keyboard_grab().unwrap();
        backend.cursor_hide();
        let mut state = ServerState::new(Instant::now());
        state.context = ScreenContext::West;
        let mut tracker = PointerTracker::new();
        let network = network_with("C_west", Direction::Left);

        controller.execute_return(
            &mut backend,
            &mut state,
            &mut tracker,
            &network,
            Position::new(1919, 540),
            geom(),
            Instant::now(),
        );

        assert_eq!(state.context, ScreenContext::Center);
        assert!(!backend.pointer_grabbed);
        assert!(!backend.keyboard_grabbed);
        assert!(backend.cursor_visible);
        assert_eq!(state.last_sent_position, None);
    }

    /// A real connected client (not just a `position_for_name` binding): the
    /// entry transition's `network.send` actually reaches the write loop and
    /// onto the socket, so this exercises the true wire path rather than
    /// only `state`/`MockBackend` side effects.
    fn connect_test_client(network: &Network, name: &str) -> std::net::TcpStream {
        use crate::network::framing::Framed;

        let mut stream = std::net::TcpStream::connect(network.local_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Message::hello(name, None).framed_write(&mut stream).unwrap();
        let _ = Message::framed_read(&mut stream).unwrap();

        let start = Instant::now();
        while !network.is_connected(name) {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for connect");
            std::thread::sleep(Duration::from_millis(5));
        }
        stream
    }

    #[test]
    fn entry_sends_expected_coordinates_to_the_real_connected_client() {
        use crate::network::framing::Framed;

        let controller = TransitionController::new(TransitionConfig::default());
        let mut backend = MockBackend::new(geom());
        let mut state = ServerState::new(Instant::now());
        let mut tracker = PointerTracker::new();
        let network = network_with("C_west", Direction::Left);
        let mut client = connect_test_client(&network, "C_west");

        state.last_center_switch_time = Instant::now() - HYSTERESIS_DELAY * 2;
        let transition = Transition {
            direction: Direction::Left,
            position: Position::new(0, 540),
        };
        let ok = controller.try_enter(
            &mut backend,
            &mut state,
            &mut tracker,
            &network,
            transition,
            geom(),
            Instant::now(),
        );
        assert!(ok);

        let expected = TransitionController::expected_entry_point(Direction::Left, Position::new(0, 540), geom());
        let received = Message::framed_read(&mut client).unwrap();
        match received {
            Message::MouseEvent { event, norm_x, norm_y, .. } => {
                assert_eq!(event, crate::network::protocol::MouseEventKind::Move);
                assert!((norm_x - expected.nx).abs() < 1e-9);
                assert!((norm_y - expected.ny).abs() < 1e-9);
            },
            other => panic!("expected a mouse_event, got {other:?}"),
        }
    }

    #[test]
    fn panic_return_sends_hide_signal_to_the_real_connected_client() {
        use crate::network::framing::Framed;

        let controller = TransitionController::new(TransitionConfig::default());
        let mut backend = MockBackend::new(geom());
        backend.pointer_grab().unwrap();
        backend.keyboard_grab().unwrap();
        backend.cursor_hide();
        let mut state = ServerState::new(Instant::now());
        state.context = ScreenContext::West;
        let mut tracker = PointerTracker::new();
        let network = network_with("C_west", Direction::Left);
        let mut client = connect_test_client(&network, "C_west");

        controller.panic_return(&mut backend, &mut state, &mut tracker, &network, geom(), Instant::now());
        assert_eq!(state.context, ScreenContext::Center);

        let received = Message::framed_read(&mut client).unwrap();
        match received {
            Message::MouseEvent { event, norm_x, norm_y, .. } => {
                assert_eq!(event, crate::network::protocol::MouseEventKind::Move);
                assert_eq!(norm_x, -1.0);
                assert_eq!(norm_y, -1.0);
            },
            other => panic!("expected exactly one hide-signal mouse_event, got {other:?}"),
        }
    }

    #[test]
    fn panic_return_works_even_without_prior_grab() {
        let controller = TransitionController::new(TransitionConfig::default());
        let mut backend = MockBackend::new(geom());
        let mut state = ServerState::new(Instant::now());
        state.context = ScreenContext::West;
        let mut tracker = PointerTracker::new();
        let network = network_with("C_west", Direction::Left);

        controller.panic_return(&mut backend, &mut state, &mut tracker, &network, geom(), Instant::now());

        assert_eq!(state.context, ScreenContext::Center);
        assert!(backend.cursor_visible);
    }
}
