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

//! Native X11 backend, built directly on the core protocol via `x11rb`.
//!
//! Grabs are done against the root window with `owner_events = false` so
//! that, once grabbed, every pointer/keyboard event is delivered to us
//! regardless of which client's window the cursor sits over. Cursor
//! visibility uses the Xfixes extension, which does not require destroying
//! and recreating a cursor resource.

use std::collections::VecDeque;

use x11rb::connection::Connection;
use x11rb::protocol::xfixes;
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto;
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::protocol::Event as X11Event;
use x11rb::rust_connection::RustConnection;

use crate::backend::DisplayBackend;
use crate::backend::GrabFailed;
use crate::backend::InputEventKind;
use crate::backend::Modifiers;
use crate::backend::RawInputEvent;
use crate::geometry::Position;
use crate::geometry::ScreenGeometry;
use crate::prelude::*;

/// X11 keycodes are evdev keycodes shifted by 8 under the XKB keymaps every
/// modern server uses; `well_known_keycode` deals in the evdev numbering.
const X11_KEYCODE_OFFSET: u32 = 8;

pub struct X11Backend {
    conn: RustConnection,
    root: xproto::Window,
    last_known_position: Position,
    pending_events: VecDeque<RawInputEvent>,
}

impl X11Backend {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).location(loc!())?;
        let root = conn.setup().roots[screen_num].root;

        let xfixes_version = conn
            .xfixes_query_version(5, 0)
            .location(loc!())?
            .reply()
            .location(loc!())?;
        debug!(
            "xfixes version {}.{}",
            xfixes_version.major_version, xfixes_version.minor_version
        );

        Ok(Self {
            conn,
            root,
            last_known_position: Position::new(0, 0),
            pending_events: VecDeque::new(),
        })
    }

    fn translate_event(&self, event: X11Event) -> Option<RawInputEvent> {
        match event {
            X11Event::ButtonPress(ev) => Some(RawInputEvent::button(
                InputEventKind::ButtonPress,
                ev.detail as u32,
                modifiers_from_state(ev.state),
            )),
            X11Event::ButtonRelease(ev) => Some(RawInputEvent::button(
                InputEventKind::ButtonRelease,
                ev.detail as u32,
                modifiers_from_state(ev.state),
            )),
            X11Event::KeyPress(ev) => Some(RawInputEvent::key(
                InputEventKind::KeyPress,
                ev.detail as u32,
                None,
                modifiers_from_state(ev.state),
            )),
            X11Event::KeyRelease(ev) => Some(RawInputEvent::key(
                InputEventKind::KeyRelease,
                ev.detail as u32,
                None,
                modifiers_from_state(ev.state),
            )),
            _ => None,
        }
    }

    fn fake_input(&self, type_: u8, detail: u8) {
        let result = self
            .conn
            .xtest_fake_input(type_, detail, x11rb::CURRENT_TIME, self.root, 0, 0, 0)
            .and_then(|cookie| {
                self.conn.flush().ok();
                Ok(cookie)
            });
        if let Err(e) = result {
            debug!("xtest_fake_input({type_}, {detail}) failed: {e:?}");
        }
    }
}

fn modifiers_from_state(state: u16) -> Modifiers {
    let state = xproto::KeyButMask::from(state);
    Modifiers {
        shift: state.contains(xproto::KeyButMask::SHIFT),
        ctrl: state.contains(xproto::KeyButMask::CONTROL),
        alt: state.contains(xproto::KeyButMask::MOD1),
        logo: state.contains(xproto::KeyButMask::MOD4),
    }
}

impl DisplayBackend for X11Backend {
    fn geometry_get(&mut self) -> Result<ScreenGeometry> {
        let geom = self
            .conn
            .get_geometry(self.root)
            .location(loc!())?
            .reply()
            .location(loc!())?;
        Ok(ScreenGeometry::new(geom.width as u32, geom.height as u32))
    }

    fn pointer_query(&mut self) -> Position {
        match self
            .conn
            .query_pointer(self.root)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
        {
            Some(reply) => {
                self.last_known_position = Position::new(reply.root_x as i32, reply.root_y as i32);
                self.last_known_position
            },
            None => {
                debug!("pointer_query failed transiently; returning last-known position");
                self.last_known_position
            },
        }
    }

    fn pointer_warp(&mut self, pos: Position) {
        if let Err(e) = self
            .conn
            .warp_pointer(
                x11rb::NONE,
                self.root,
                0,
                0,
                0,
                0,
                pos.x as i16,
                pos.y as i16,
            )
            .and_then(|cookie| {
                self.conn.flush().ok();
                Ok(cookie)
            })
        {
            debug!("pointer_warp request failed (compositor may have dropped it): {e:?}");
        }
    }

    fn pointer_grab(&mut self) -> std::result::Result<(), GrabFailed> {
        let events = xproto::EventMask::BUTTON_PRESS
            | xproto::EventMask::BUTTON_RELEASE
            | xproto::EventMask::POINTER_MOTION;
        let reply = self
            .conn
            .grab_pointer(
                false,
                self.root,
                events,
                xproto::GrabMode::ASYNC,
                xproto::GrabMode::ASYNC,
                x11rb::NONE,
                x11rb::NONE,
                x11rb::CURRENT_TIME,
            )
            .map_err(|e| GrabFailed(e.to_string()))?
            .reply()
            .map_err(|e| GrabFailed(e.to_string()))?;

        if reply.status != xproto::GrabStatus::SUCCESS {
            return Err(GrabFailed(format!("pointer grab status: {:?}", reply.status)));
        }
        Ok(())
    }

    fn pointer_ungrab(&mut self) {
        if let Err(e) = self.conn.ungrab_pointer(x11rb::CURRENT_TIME) {
            debug!("pointer_ungrab failed: {e:?}");
        }
        let _ = self.conn.flush();
    }

    fn keyboard_grab(&mut self) -> std::result::Result<(), GrabFailed> {
        let reply = self
            .conn
            .grab_keyboard(
                false,
                self.root,
                x11rb::CURRENT_TIME,
                xproto::GrabMode::ASYNC,
                xproto::GrabMode::ASYNC,
            )
            .map_err(|e| GrabFailed(e.to_string()))?
            .reply()
            .map_err(|e| GrabFailed(e.to_string()))?;

        if reply.status != xproto::GrabStatus::SUCCESS {
            return Err(GrabFailed(format!("keyboard grab status: {:?}", reply.status)));
        }
        Ok(())
    }

    fn keyboard_ungrab(&mut self) {
        if let Err(e) = self.conn.ungrab_keyboard(x11rb::CURRENT_TIME) {
            debug!("keyboard_ungrab failed: {e:?}");
        }
        let _ = self.conn.flush();
    }

    fn cursor_hide(&mut self) {
        if let Err(e) = self.conn.xfixes_hide_cursor(self.root) {
            debug!("cursor_hide failed (non-fatal): {e:?}");
        }
        let _ = self.conn.flush();
    }

    fn cursor_show(&mut self) {
        if let Err(e) = self.conn.xfixes_show_cursor(self.root) {
            debug!("cursor_show failed (non-fatal): {e:?}");
        }
        let _ = self.conn.flush();
    }

    fn events_drain(&mut self) -> Vec<RawInputEvent> {
        while let Ok(Some(event)) = self.conn.poll_for_event() {
            if let Some(translated) = self.translate_event(event) {
                self.pending_events.push_back(translated);
            }
        }
        self.pending_events.drain(..).collect()
    }

    fn inject_event(&mut self, event: RawInputEvent) {
        match event.kind {
            InputEventKind::ButtonPress => self.fake_input(xproto::BUTTON_PRESS_EVENT, event.code as u8),
            InputEventKind::ButtonRelease => self.fake_input(xproto::BUTTON_RELEASE_EVENT, event.code as u8),
            InputEventKind::KeyPress => {
                self.fake_input(xproto::KEY_PRESS_EVENT, (event.code + X11_KEYCODE_OFFSET) as u8)
            },
            InputEventKind::KeyRelease => {
                self.fake_input(xproto::KEY_RELEASE_EVENT, (event.code + X11_KEYCODE_OFFSET) as u8)
            },
            InputEventKind::Scroll => {
                let button = if event.scroll_delta.unwrap_or(0) < 0 { 5 } else { 4 };
                self.fake_input(xproto::BUTTON_PRESS_EVENT, button);
                self.fake_input(xproto::BUTTON_RELEASE_EVENT, button);
            },
        }
    }
}

#[allow(dead_code)]
fn xfixes_extension_present(conn: &RustConnection) -> Result<bool> {
    Ok(conn
        .extension_information(xfixes::X11_EXTENSION_NAME)
        .location(loc!())?
        .is_some())
}
