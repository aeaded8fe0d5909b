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

//! Wire message types. One JSON object per message, tagged by `msg_type`.

use serde::Deserialize;
use serde::Serialize;

use crate::geometry::NormalizedPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseEventKind {
    Move,
    Press,
    Release,
    Scroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEventKind {
    Press,
    Release,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum Message {
    Hello {
        name: String,
        version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screen: Option<ScreenInfo>,
    },
    ScreenInfo {
        width: u32,
        height: u32,
    },
    MouseEvent {
        event: MouseEventKind,
        norm_x: f64,
        norm_y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        button: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<i32>,
    },
    KeyEvent {
        event: KeyEventKind,
        keycode: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keysym: Option<u32>,
    },
    Keepalive,
    Error {
        message: String,
    },
}

/// Protocol version advertised in `hello`. Bumped when a wire-incompatible
/// change is made to [`Message`].
pub const PROTOCOL_VERSION: &str = "1";

impl Message {
    pub fn hello(name: impl Into<String>, screen: Option<ScreenInfo>) -> Self {
        Message::Hello {
            name: name.into(),
            version: PROTOCOL_VERSION.to_string(),
            screen,
        }
    }

    pub fn mouse_move(np: NormalizedPoint) -> Self {
        Message::MouseEvent {
            event: MouseEventKind::Move,
            norm_x: np.nx,
            norm_y: np.ny,
            button: None,
            delta: None,
        }
    }

    /// The sentinel move that tells the client to hide its cursor and stop
    /// injecting input until the next real coordinate arrives.
    pub fn hide_signal() -> Self {
        Self::mouse_move(crate::geometry::HIDE_SIGNAL)
    }

    pub fn mouse_button(event: MouseEventKind, np: NormalizedPoint, button: u32) -> Self {
        Message::MouseEvent {
            event,
            norm_x: np.nx,
            norm_y: np.ny,
            button: Some(button),
            delta: None,
        }
    }

    pub fn mouse_scroll(np: NormalizedPoint, delta: i32) -> Self {
        Message::MouseEvent {
            event: MouseEventKind::Scroll,
            norm_x: np.nx,
            norm_y: np.ny,
            button: None,
            delta: Some(delta),
        }
    }

    pub fn key(event: KeyEventKind, keycode: u32, keysym: Option<u32>) -> Self {
        Message::KeyEvent {
            event,
            keycode,
            keysym,
        }
    }
}
