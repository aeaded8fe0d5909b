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

//! The server-wide state machine. `ServerState` is process-wide but is
//! passed around as an explicit value rather than stored as a module-level
//! singleton: only the main thread touches it, so it needs no locking.

use std::time::Instant;

use crate::geometry::Direction;
use crate::geometry::NormalizedPoint;
use crate::geometry::Position;

/// Exactly one of these is active at any time. Invariant: the cursor is
/// visible and ungrabbed iff the context is `Center`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenContext {
    Center,
    West,
    East,
    North,
    South,
}

impl ScreenContext {
    pub fn is_center(&self) -> bool {
        matches!(self, ScreenContext::Center)
    }

    pub fn from_direction(dir: Direction) -> Self {
        match dir {
            Direction::Left => ScreenContext::West,
            Direction::Right => ScreenContext::East,
            Direction::Top => ScreenContext::North,
            Direction::Bottom => ScreenContext::South,
        }
    }

    /// The edge that, when crossed while in this (non-`Center`) context,
    /// triggers a return to `Center`. `None` for `Center` itself.
    pub fn return_edge(&self) -> Option<Direction> {
        match self {
            ScreenContext::West => Some(Direction::Right),
            ScreenContext::East => Some(Direction::Left),
            ScreenContext::North => Some(Direction::Bottom),
            ScreenContext::South => Some(Direction::Top),
            ScreenContext::Center => None,
        }
    }

    /// The entry direction bound to this context at config load time — the
    /// inverse of [`Self::from_direction`]. Used to look up the active
    /// client's name via the position binding built at config load.
    pub fn entry_direction(&self) -> Option<Direction> {
        match self {
            ScreenContext::West => Some(Direction::Left),
            ScreenContext::East => Some(Direction::Right),
            ScreenContext::North => Some(Direction::Top),
            ScreenContext::South => Some(Direction::Bottom),
            ScreenContext::Center => None,
        }
    }
}

/// Process-wide transition state. Mutated only by the transition controller
/// and the forwarder; created at startup and destroyed at shutdown.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub context: ScreenContext,
    pub last_center_switch_time: Instant,
    /// Deferred-warp protocol: set by the entry transition when the backend
    /// may silently drop a warp; the forwarder re-issues the warp each tick
    /// until the flag clears.
    pub boundary_crossed: bool,
    pub target_warp_position: Option<Position>,
    /// Last position sent to the active client, used for forwarder
    /// change-detection. `None` immediately after every context change.
    pub last_sent_position: Option<NormalizedPoint>,
}

impl ServerState {
    pub fn new(now: Instant) -> Self {
        Self {
            context: ScreenContext::Center,
            last_center_switch_time: now,
            boundary_crossed: false,
            target_warp_position: None,
            last_sent_position: None,
        }
    }

    /// Invariant (I4): `last_sent_position` is `None` immediately after every
    /// context change.
    pub fn clear_forwarding_state(&mut self) {
        self.last_sent_position = None;
        self.boundary_crossed = false;
        self.target_warp_position = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_edge_is_opposite_of_entry_edge() {
        assert_eq!(ScreenContext::West.return_edge(), Some(Direction::Right));
        assert_eq!(ScreenContext::East.return_edge(), Some(Direction::Left));
        assert_eq!(ScreenContext::North.return_edge(), Some(Direction::Bottom));
        assert_eq!(ScreenContext::South.return_edge(), Some(Direction::Top));
        assert_eq!(ScreenContext::Center.return_edge(), None);
    }

    #[test]
    fn from_direction_matches_entry_table() {
        assert_eq!(ScreenContext::from_direction(Direction::Left), ScreenContext::West);
        assert_eq!(ScreenContext::from_direction(Direction::Right), ScreenContext::East);
        assert_eq!(ScreenContext::from_direction(Direction::Top), ScreenContext::North);
        assert_eq!(ScreenContext::from_direction(Direction::Bottom), ScreenContext::South);
    }
}
