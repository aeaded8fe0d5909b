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

//! Sits in front of the forwarder's event drain and recognizes the panic key
//! and the jump-prefix sequence. Consumed events never reach the forwarder;
//! everything else passes through unaltered.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use crate::backend::InputEventKind;
use crate::backend::RawInputEvent;
use crate::geometry::Direction;

/// Default prefix-to-follow-up window. The source's prefix sequence is
/// unusable if held open indefinitely, so an unanswered prefix is released
/// to the forwarder rather than silently eaten forever.
pub const DEFAULT_JUMP_TIMEOUT: Duration = Duration::from_secs(1);

/// Maps a handful of configured key names to Linux evdev keycodes. The core
/// treats keycodes as opaque backend-normalized values (see
/// [`crate::backend::RawInputEvent`]), so a small fixed table is sufficient —
/// a full keysym database is display-backend territory, not the core's.
pub fn well_known_keycode(name: &str) -> Option<u32> {
    Some(match name.to_ascii_lowercase().as_str() {
        "scroll_lock" | "scrolllock" => 70,
        "slash" | "/" => 61,
        "0" => 11,
        "1" => 2,
        "2" => 3,
        "3" => 4,
        "4" => 5,
        "5" => 6,
        "6" => 7,
        "7" => 8,
        "8" => 9,
        "9" => 10,
        _ => return None,
    })
}

/// Parses a chord like `"ctrl+/"` into `(keycode, requires_ctrl)`. The only
/// modifier the jump prefix recognizes is `ctrl`; anything else in the chord
/// is ignored beyond requiring ctrl to be held.
pub fn parse_chord(chord: &str) -> Result<(u32, bool), String> {
    let mut requires_ctrl = false;
    let mut key_name = None;
    for part in chord.split('+') {
        if part.eq_ignore_ascii_case("ctrl") {
            requires_ctrl = true;
        } else {
            key_name = Some(part);
        }
    }
    let key_name = key_name.ok_or_else(|| format!("chord {chord:?} has no key"))?;
    let keycode = well_known_keycode(key_name).ok_or_else(|| format!("unknown key name {key_name:?} in chord {chord:?}"))?;
    Ok((keycode, requires_ctrl))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTarget {
    Center,
    West,
    East,
    North,
    South,
}

impl JumpTarget {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            JumpTarget::Center => None,
            JumpTarget::West => Some(Direction::Left),
            JumpTarget::East => Some(Direction::Right),
            JumpTarget::North => Some(Direction::Top),
            JumpTarget::South => Some(Direction::Bottom),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    Panic,
    Jump(JumpTarget),
}

#[derive(Debug, Clone)]
pub struct HotkeyConfig {
    pub panic_keycode: u32,
    pub jump_prefix_keycode: u32,
    pub jump_prefix_requires_ctrl: bool,
    pub jump_timeout: Duration,
    pub jump_actions: HashMap<u32, JumpTarget>,
}

impl HotkeyConfig {
    pub fn new(panic_keycode: u32, jump_prefix_keycode: u32, jump_prefix_requires_ctrl: bool) -> Self {
        Self {
            panic_keycode,
            jump_prefix_keycode,
            jump_prefix_requires_ctrl,
            jump_timeout: DEFAULT_JUMP_TIMEOUT,
            jump_actions: HashMap::new(),
        }
    }

    pub fn with_jump_action(mut self, keycode: u32, target: JumpTarget) -> Self {
        self.jump_actions.insert(keycode, target);
        self
    }
}

/// Result of feeding one raw event through [`HotkeyDispatcher::dispatch`].
pub struct HotkeyDispatch {
    pub action: Option<HotkeyAction>,
    /// Events to hand the forwarder unchanged, in order. May contain a
    /// buffered prefix keypress released after a timeout or a non-matching
    /// follow-up, in addition to (or instead of) the event just fed in.
    pub passthrough: Vec<RawInputEvent>,
}

/// Stateful recognizer. One instance per session; fed every raw event the
/// backend produces while in a non-`Center` context.
pub struct HotkeyDispatcher {
    config: HotkeyConfig,
    awaiting_since: Option<Instant>,
    pending_prefix_event: Option<RawInputEvent>,
}

impl HotkeyDispatcher {
    pub fn new(config: HotkeyConfig) -> Self {
        Self {
            config,
            awaiting_since: None,
            pending_prefix_event: None,
        }
    }

    pub fn dispatch(&mut self, event: RawInputEvent, now: Instant) -> HotkeyDispatch {
        let mut passthrough = Vec::new();

        if let Some(since) = self.awaiting_since {
            if now.saturating_duration_since(since) > self.config.jump_timeout {
                if let Some(buffered) = self.pending_prefix_event.take() {
                    passthrough.push(buffered);
                }
                self.awaiting_since = None;
            }
        }

        if event.kind != InputEventKind::KeyPress {
            passthrough.push(event);
            return HotkeyDispatch { action: None, passthrough };
        }

        if event.code == self.config.panic_keycode {
            self.awaiting_since = None;
            self.pending_prefix_event = None;
            return HotkeyDispatch {
                action: Some(HotkeyAction::Panic),
                passthrough,
            };
        }

        if self.awaiting_since.is_some() {
            self.awaiting_since = None;
            let buffered = self.pending_prefix_event.take();
            return match self.config.jump_actions.get(&event.code).copied() {
                Some(target) => HotkeyDispatch {
                    action: Some(HotkeyAction::Jump(target)),
                    passthrough,
                },
                None => {
                    if let Some(buffered) = buffered {
                        passthrough.push(buffered);
                    }
                    passthrough.push(event);
                    HotkeyDispatch { action: None, passthrough }
                },
            };
        }

        if event.code == self.config.jump_prefix_keycode
            && (!self.config.jump_prefix_requires_ctrl || event.modifiers.ctrl)
        {
            self.awaiting_since = Some(now);
            self.pending_prefix_event = Some(event);
            return HotkeyDispatch { action: None, passthrough };
        }

        passthrough.push(event);
        HotkeyDispatch { action: None, passthrough }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Modifiers;

    #[test]
    fn parses_ctrl_slash_chord() {
        assert_eq!(parse_chord("ctrl+/"), Ok((61, true)));
    }

    #[test]
    fn rejects_unknown_key_name() {
        assert!(parse_chord("ctrl+nonsense").is_err());
    }

    fn key(code: u32, modifiers: Modifiers) -> RawInputEvent {
        RawInputEvent::key(InputEventKind::KeyPress, code, None, modifiers)
    }

    fn config() -> HotkeyConfig {
        HotkeyConfig::new(78 /* ScrollLock */, 61 /* '/' */, true)
            .with_jump_action(2, JumpTarget::West)
            .with_jump_action(3, JumpTarget::East)
            .with_jump_action(11, JumpTarget::Center)
    }

    #[test]
    fn panic_key_is_consumed_and_recognized() {
        let mut dispatcher = HotkeyDispatcher::new(config());
        let dispatch = dispatcher.dispatch(key(78, Modifiers::default()), Instant::now());
        assert_eq!(dispatch.action, Some(HotkeyAction::Panic));
        assert!(dispatch.passthrough.is_empty());
    }

    #[test]
    fn jump_prefix_then_action_within_timeout_produces_jump() {
        let mut dispatcher = HotkeyDispatcher::new(config());
        let now = Instant::now();
        let prefix = dispatcher.dispatch(key(61, Modifiers { ctrl: true, ..Default::default() }), now);
        assert_eq!(prefix.action, None);
        assert!(prefix.passthrough.is_empty());

        let action = dispatcher.dispatch(key(2, Modifiers::default()), now + Duration::from_millis(100));
        assert_eq!(action.action, Some(HotkeyAction::Jump(JumpTarget::West)));
        assert!(action.passthrough.is_empty());
    }

    #[test]
    fn prefix_without_ctrl_is_not_recognized() {
        let mut dispatcher = HotkeyDispatcher::new(config());
        let dispatch = dispatcher.dispatch(key(61, Modifiers::default()), Instant::now());
        assert_eq!(dispatch.action, None);
        assert_eq!(dispatch.passthrough.len(), 1);
    }

    #[test]
    fn unanswered_prefix_is_released_unchanged_after_timeout() {
        let mut dispatcher = HotkeyDispatcher::new(config());
        let now = Instant::now();
        let prefix_event = key(61, Modifiers { ctrl: true, ..Default::default() });
        let prefix = dispatcher.dispatch(prefix_event, now);
        assert!(prefix.passthrough.is_empty());

        let other = key(40, Modifiers::default());
        let later = dispatcher.dispatch(other, now + Duration::from_secs(2));
        assert_eq!(later.action, None);
        assert_eq!(later.passthrough, vec![prefix_event, other]);
    }

    #[test]
    fn non_matching_follow_up_releases_both_events() {
        let mut dispatcher = HotkeyDispatcher::new(config());
        let now = Instant::now();
        let prefix_event = key(61, Modifiers { ctrl: true, ..Default::default() });
        dispatcher.dispatch(prefix_event, now);

        let other = key(99, Modifiers::default());
        let dispatch = dispatcher.dispatch(other, now + Duration::from_millis(50));
        assert_eq!(dispatch.action, None);
        assert_eq!(dispatch.passthrough, vec![prefix_event, other]);
    }

    #[test]
    fn non_key_events_pass_through_immediately() {
        let mut dispatcher = HotkeyDispatcher::new(config());
        let event = RawInputEvent::button(InputEventKind::ButtonPress, 1, Modifiers::default());
        let dispatch = dispatcher.dispatch(event, Instant::now());
        assert_eq!(dispatch.action, None);
        assert_eq!(dispatch.passthrough, vec![event]);
    }
}
