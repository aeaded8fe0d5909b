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

//! Coordinate types shared by the tracker, the transition controller, and the
//! wire protocol.

use serde::Deserialize;
use serde::Serialize;

/// A pixel position on the server's screen.
///
/// Not bounds-checked on construction; callers clamp against
/// [`ScreenGeometry`] where it matters (see [`ScreenGeometry::clamp`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// The sentinel normalized point that instructs a client to hide its cursor
/// and stop injecting input until the next real coordinate arrives.
pub const HIDE_SIGNAL: NormalizedPoint = NormalizedPoint {
    nx: -1.0,
    ny: -1.0,
};

/// A position expressed as a fraction of screen width/height, in `[0.0, 1.0]`,
/// with `(-1.0, -1.0)` reserved as [`HIDE_SIGNAL`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub nx: f64,
    pub ny: f64,
}

impl NormalizedPoint {
    pub fn new(nx: f64, ny: f64) -> Self {
        Self { nx, ny }
    }

    pub fn is_hide_signal(&self) -> bool {
        *self == HIDE_SIGNAL
    }
}

/// The server's screen dimensions in pixels, queried once from the backend at
/// startup and treated as immutable for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
}

impl ScreenGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        assert!(width > 0 && height > 0, "screen geometry must be non-empty");
        Self { width, height }
    }

    /// Normalizes a pixel position to `[0, 1]^2`, clamping out-of-bounds
    /// coordinates rather than producing values outside the wire contract.
    pub fn normalize(&self, pos: Position) -> NormalizedPoint {
        let nx = (pos.x as f64 / (self.width - 1).max(1) as f64).clamp(0.0, 1.0);
        let ny = (pos.y as f64 / (self.height - 1).max(1) as f64).clamp(0.0, 1.0);
        NormalizedPoint::new(nx, ny)
    }

    /// Inverse of [`Self::normalize`], used by tests and by clients mapping a
    /// received point back onto pixels.
    pub fn denormalize(&self, np: NormalizedPoint) -> Position {
        let x = (np.nx * (self.width - 1).max(1) as f64).round() as i32;
        let y = (np.ny * (self.height - 1).max(1) as f64).round() as i32;
        Position::new(
            x.clamp(0, self.width as i32 - 1),
            y.clamp(0, self.height as i32 - 1),
        )
    }

    pub fn clamp(&self, pos: Position) -> Position {
        Position::new(
            pos.x.clamp(0, self.width as i32 - 1),
            pos.y.clamp(0, self.height as i32 - 1),
        )
    }
}

/// A cardinal direction relative to the server screen. Strictly internal:
/// used only by the tracker and the entry transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
    Top,
    Bottom,
}
