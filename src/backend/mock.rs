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

//! A deterministic, in-memory [`DisplayBackend`] used by the transition
//! controller and forwarder tests (and available to integration tests that
//! want to script a session without a real display server).

use std::collections::VecDeque;

use crate::backend::DisplayBackend;
use crate::backend::GrabFailed;
use crate::backend::RawInputEvent;
use crate::geometry::Position;
use crate::geometry::ScreenGeometry;

#[derive(Debug, Clone)]
pub struct MockBackend {
    geometry: ScreenGeometry,
    pointer: Position,
    pub pointer_grabbed: bool,
    pub keyboard_grabbed: bool,
    pub cursor_visible: bool,
    pub warp_history: Vec<Position>,
    /// If set, `pointer_warp` is a silent no-op, simulating an uncooperative
    /// compositor that drops warp requests.
    pub drop_warps: bool,
    pub fail_pointer_grab: bool,
    pub fail_keyboard_grab: bool,
    pending_events: VecDeque<RawInputEvent>,
    pub injected_events: Vec<RawInputEvent>,
}

impl MockBackend {
    pub fn new(geometry: ScreenGeometry) -> Self {
        Self {
            geometry,
            pointer: Position::new(geometry.width as i32 / 2, geometry.height as i32 / 2),
            pointer_grabbed: false,
            keyboard_grabbed: false,
            cursor_visible: true,
            warp_history: Vec::new(),
            drop_warps: false,
            fail_pointer_grab: false,
            fail_keyboard_grab: false,
            pending_events: VecDeque::new(),
            injected_events: Vec::new(),
        }
    }

    /// Test helper: moves the simulated pointer without going through a warp.
    pub fn move_pointer(&mut self, pos: Position) {
        self.pointer = self.geometry.clamp(pos);
    }

    pub fn push_event(&mut self, event: RawInputEvent) {
        self.pending_events.push_back(event);
    }

    /// No grab held and the cursor visible: the invariant the server state
    /// machine must hold whenever the context is `Center`.
    pub fn is_fully_released(&self) -> bool {
        !self.pointer_grabbed && !self.keyboard_grabbed && self.cursor_visible
    }
}

impl DisplayBackend for MockBackend {
    fn geometry_get(&mut self) -> crate::prelude::Result<ScreenGeometry> {
        Ok(self.geometry)
    }

    fn pointer_query(&mut self) -> Position {
        self.pointer
    }

    fn pointer_warp(&mut self, pos: Position) {
        self.warp_history.push(pos);
        if self.drop_warps {
            return;
        }
        self.pointer = self.geometry.clamp(pos);
    }

    fn pointer_grab(&mut self) -> std::result::Result<(), GrabFailed> {
        if self.fail_pointer_grab {
            return Err(GrabFailed("mock pointer grab denied".to_string()));
        }
        self.pointer_grabbed = true;
        Ok(())
    }

    fn pointer_ungrab(&mut self) {
        self.pointer_grabbed = false;
    }

    fn keyboard_grab(&mut self) -> std::result::Result<(), GrabFailed> {
        if self.fail_keyboard_grab {
            return Err(GrabFailed("mock keyboard grab denied".to_string()));
        }
        self.keyboard_grabbed = true;
        Ok(())
    }

    fn keyboard_ungrab(&mut self) {
        self.keyboard_grabbed = false;
    }

    fn cursor_hide(&mut self) {
        self.cursor_visible = false;
    }

    fn cursor_show(&mut self) {
        self.cursor_visible = true;
    }

    fn events_drain(&mut self) -> Vec<RawInputEvent> {
        self.pending_events.drain(..).collect()
    }

    fn inject_event(&mut self, event: RawInputEvent) {
        self.injected_events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_fully_released() {
        let backend = MockBackend::new(ScreenGeometry::new(1920, 1080));
        assert!(backend.is_fully_released());
    }

    #[test]
    fn grab_then_ungrab_restores_release() {
        let mut backend = MockBackend::new(ScreenGeometry::new(1920, 1080));
        backend.pointer_grab().unwrap();
        backend.keyboard_grab().unwrap();
        backend.cursor_hide();
        assert!(!backend.is_fully_released());
        backend.pointer_ungrab();
        backend.keyboard_ungrab();
        backend.cursor_show();
        assert!(backend.is_fully_released());
    }

    #[test]
    fn dropped_warp_does_not_move_pointer() {
        let mut backend = MockBackend::new(ScreenGeometry::new(1920, 1080));
        backend.drop_warps = true;
        let before = backend.pointer_query();
        backend.pointer_warp(Position::new(0, 0));
        assert_eq!(backend.pointer_query(), before);
        assert_eq!(backend.warp_history, vec![Position::new(0, 0)]);
    }
}
