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

//! The narrow interface the core speaks to the display server through.
//!
//! Two implementations satisfy [`DisplayBackend`]: a native X11 backend
//! ([`x11::X11Backend`]) and an out-of-process helper-mediated backend for
//! Wayland compositors ([`wayland::WaylandHelperBackend`]). A third,
//! [`mock::MockBackend`], is a deterministic test double used by the
//! transition controller and forwarder unit tests.

pub mod mock;
pub mod wayland;
pub mod x11;

use serde::Deserialize;
use serde::Serialize;

use crate::geometry::Position;
use crate::geometry::ScreenGeometry;
use crate::prelude::*;

/// Returned by `pointer_grab`/`keyboard_grab` when the display server refuses
/// the grab (another client already holds it, or the call is otherwise
/// rejected). Recoverable: the entry transition aborts and falls back to
/// `Center`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabFailed(pub String);

impl std::fmt::Display for GrabFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grab failed: {}", self.0)
    }
}

impl std::error::Error for GrabFailed {}

/// Discriminant for a raw input event read from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputEventKind {
    ButtonPress,
    ButtonRelease,
    KeyPress,
    KeyRelease,
    Scroll,
}

/// Modifier state accompanying a raw input event. Mirrors the wire
/// protocol's modifier bitset but is independent of it, since the core does
/// not perform modifier translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub logo: bool,
}

/// A single input event read from the backend's event queue. OS-specific
/// codes are normalized to a portable set where feasible; keycodes are
/// passed through otherwise (the backend's job, not the core's).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInputEvent {
    pub kind: InputEventKind,
    /// Button code for button/scroll events, keycode for key events.
    pub code: u32,
    /// Platform keysym, only meaningful for key events.
    pub keysym: Option<u32>,
    /// Scroll delta, only meaningful for scroll events.
    pub scroll_delta: Option<i32>,
    pub modifiers: Modifiers,
}

impl RawInputEvent {
    pub fn key(kind: InputEventKind, keycode: u32, keysym: Option<u32>, modifiers: Modifiers) -> Self {
        Self {
            kind,
            code: keycode,
            keysym,
            scroll_delta: None,
            modifiers,
        }
    }

    pub fn button(kind: InputEventKind, button: u32, modifiers: Modifiers) -> Self {
        Self {
            kind,
            code: button,
            keysym: None,
            scroll_delta: None,
            modifiers,
        }
    }

    pub fn scroll(delta: i32, modifiers: Modifiers) -> Self {
        Self {
            kind: InputEventKind::Scroll,
            code: 0,
            keysym: None,
            scroll_delta: Some(delta),
            modifiers,
        }
    }
}

/// The capability set the core drives the display server through. Never
/// throws from best-effort operations; transient failures are logged and
/// swallowed by the implementation, per the contract in the component design.
pub trait DisplayBackend {
    /// Queried once at startup. Fatal if it fails.
    fn geometry_get(&mut self) -> Result<ScreenGeometry>;

    /// Returns the last-known position on transient failure; logs but never
    /// fails the tick.
    fn pointer_query(&mut self) -> Position;

    /// May silently no-op on uncooperative compositors. Never fails the
    /// caller; the forwarder does not depend on the warp being visible.
    fn pointer_warp(&mut self, pos: Position);

    fn pointer_grab(&mut self) -> std::result::Result<(), GrabFailed>;

    /// Best-effort; errors are logged, not propagated.
    fn pointer_ungrab(&mut self);

    fn keyboard_grab(&mut self) -> std::result::Result<(), GrabFailed>;

    /// Best-effort; errors are logged, not propagated.
    fn keyboard_ungrab(&mut self);

    /// May silently no-op. Never fatal.
    fn cursor_hide(&mut self);

    /// May silently no-op. Never fatal.
    fn cursor_show(&mut self);

    /// Never blocks; returns whatever is queued since the last call.
    fn events_drain(&mut self) -> Vec<RawInputEvent>;

    /// Injects a synthetic input event on the local display — the client
    /// role's counterpart to `events_drain`. Best-effort, like
    /// `pointer_warp`; never fails the caller.
    fn inject_event(&mut self, event: RawInputEvent);
}
