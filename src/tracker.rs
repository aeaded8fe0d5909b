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

//! Turns a stream of `(position, time)` samples into a velocity estimate and
//! raises a [`Transition`] when the pointer touches an outer edge fast enough.

use std::time::Instant;

use crate::geometry::Direction;
use crate::geometry::Position;
use crate::geometry::ScreenGeometry;

/// Size of the sample ring. Large enough to smooth a single warp-induced
/// sample out of the velocity estimate, small enough to stay responsive.
pub const POSITION_HISTORY_SIZE: usize = 5;

/// Minimum number of samples before a velocity estimate is produced.
pub const MIN_SAMPLES_FOR_VELOCITY: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct PointerSample {
    pub position: Position,
    pub time: Instant,
}

/// A boundary crossing: which edge, and where the pointer was when it
/// crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub direction: Direction,
    pub position: Position,
}

/// A fixed-size ring of recent pointer samples.
///
/// Pure: it never touches the display backend. `sample_push` overwrites the
/// oldest entry once the ring is full.
#[derive(Debug, Clone)]
pub struct PointerTracker {
    samples: [Option<PointerSample>; POSITION_HISTORY_SIZE],
    next: usize,
    len: usize,
}

impl PointerTracker {
    pub fn new() -> Self {
        Self {
            samples: [None; POSITION_HISTORY_SIZE],
            next: 0,
            len: 0,
        }
    }

    /// O(1). Overwrites the oldest of [`POSITION_HISTORY_SIZE`] samples.
    pub fn sample_push(&mut self, position: Position, time: Instant) {
        self.samples[self.next] = Some(PointerSample { position, time });
        self.next = (self.next + 1) % POSITION_HISTORY_SIZE;
        self.len = (self.len + 1).min(POSITION_HISTORY_SIZE);
    }

    fn oldest(&self) -> Option<PointerSample> {
        if self.len == 0 {
            return None;
        }
        // When the ring isn't full, the oldest sample is at index 0; once
        // full, it's the slot about to be overwritten next.
        let idx = if self.len < POSITION_HISTORY_SIZE {
            0
        } else {
            self.next
        };
        self.samples[idx]
    }

    fn newest(&self) -> Option<PointerSample> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.next + POSITION_HISTORY_SIZE - 1) % POSITION_HISTORY_SIZE;
        self.samples[idx]
    }

    /// Manhattan distance between the oldest and newest samples divided by
    /// their time delta, in pixels/second. Zero if there are fewer than
    /// [`MIN_SAMPLES_FOR_VELOCITY`] samples or the time delta is zero.
    pub fn velocity_get(&self) -> f64 {
        if self.len < MIN_SAMPLES_FOR_VELOCITY {
            return 0.0;
        }
        let (Some(oldest), Some(newest)) = (self.oldest(), self.newest()) else {
            return 0.0;
        };
        let dt = newest.time.saturating_duration_since(oldest.time).as_secs_f64();
        if dt == 0.0 {
            return 0.0;
        }
        let manhattan = (newest.position.x - oldest.position.x).unsigned_abs()
            + (newest.position.y - oldest.position.y).unsigned_abs();
        manhattan as f64 / dt
    }

    /// `Some` iff `pos` is within `edge_threshold` pixels of an outer edge
    /// and the computed velocity is at least `vel_threshold`. In a corner,
    /// horizontal edges (top/bottom) take precedence over vertical ones.
    pub fn boundary_detect(
        &self,
        pos: Position,
        geom: ScreenGeometry,
        vel_threshold: f64,
        edge_threshold: i32,
    ) -> Option<Transition> {
        let direction = edge_of(pos, geom, edge_threshold)?;
        if self.velocity_get() < vel_threshold {
            return None;
        }
        Some(Transition { direction, position: pos })
    }

    /// Clears the ring. Called immediately after any warp and after every
    /// context change so the warp itself is never mistaken for high-velocity
    /// motion.
    pub fn reset(&mut self) {
        self.samples = [None; POSITION_HISTORY_SIZE];
        self.next = 0;
        self.len = 0;
    }
}

impl Default for PointerTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Edge test, independent of velocity. Inclusive: `x <= edge_threshold` is
/// the left edge, `x >= width - 1 - edge_threshold` is the right edge
/// (likewise `y` for top/bottom). Horizontal edges (top/bottom) win ties in
/// a corner.
fn edge_of(pos: Position, geom: ScreenGeometry, edge_threshold: i32) -> Option<Direction> {
    let edge_threshold = edge_threshold.max(0);
    if pos.y <= edge_threshold {
        return Some(Direction::Top);
    }
    if pos.y >= geom.height as i32 - 1 - edge_threshold {
        return Some(Direction::Bottom);
    }
    if pos.x <= edge_threshold {
        return Some(Direction::Left);
    }
    if pos.x >= geom.width as i32 - 1 - edge_threshold {
        return Some(Direction::Right);
    }
    None
}
