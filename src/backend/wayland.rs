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

//! Helper-mediated backend for Wayland compositors.
//!
//! No stable Wayland protocol grants an ordinary client global pointer warp,
//! a global grab, or synthetic input injection outside its own surfaces,
//! so on Wayland the actual work is done by a small privileged helper
//! (a layer-shell/virtual-input client, typically running under the
//! compositor's input method or a portal) running as its own process. This
//! backend only speaks a length-delimited JSON request/response protocol to
//! that helper over a local Unix-domain socket; it carries none of the
//! Wayland protocol logic itself.
//!
//! The request/response framing mirrors [`crate::network`]'s wire framing
//! deliberately: same length-prefix shape, same blocking-io style, so a
//! reader who has seen one has seen the other.

use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::backend::DisplayBackend;
use crate::backend::GrabFailed;
use crate::backend::RawInputEvent;
use crate::geometry::Position;
use crate::geometry::ScreenGeometry;
use crate::prelude::*;

const MAX_FRAME_BYTES: u32 = 1 << 20;
const HELPER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
enum HelperRequest {
    GeometryGet,
    PointerQuery,
    PointerWarp { x: i32, y: i32 },
    PointerGrab,
    PointerUngrab,
    KeyboardGrab,
    KeyboardUngrab,
    CursorHide,
    CursorShow,
    EventsDrain,
    InjectEvent { event: RawInputEvent },
}

#[derive(Debug, Serialize, Deserialize)]
enum HelperResponse {
    Geometry { width: u32, height: u32 },
    Position { x: i32, y: i32 },
    GrabResult { ok: bool, reason: Option<String> },
    Events { events: Vec<RawInputEvent> },
    Ack,
}

fn write_frame(stream: &mut UnixStream, req: &HelperRequest) -> Result<()> {
    let payload = serde_json::to_vec(req).location(loc!())?;
    let len = u32::try_from(payload.len()).location(loc!())?;
    stream.write_all(&len.to_be_bytes()).location(loc!())?;
    stream.write_all(&payload).location(loc!())?;
    stream.flush().location(loc!())?;
    Ok(())
}

fn read_frame(stream: &mut UnixStream) -> Result<HelperResponse> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).location(loc!())?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        bail!("helper frame of {len} bytes exceeds {MAX_FRAME_BYTES}");
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).location(loc!())?;
    serde_json::from_slice(&payload).location(loc!())
}

/// Talks to an out-of-process input helper over a Unix-domain socket.
pub struct WaylandHelperBackend {
    stream: UnixStream,
    socket_path: PathBuf,
}

impl WaylandHelperBackend {
    pub fn connect<P: AsRef<Path>>(socket_path: P) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path)
            .with_context(loc!(), || format!("connecting to wayland helper at {}", socket_path.display()))?;
        stream.set_read_timeout(Some(HELPER_TIMEOUT)).location(loc!())?;
        stream.set_write_timeout(Some(HELPER_TIMEOUT)).location(loc!())?;
        Ok(Self { stream, socket_path })
    }

    fn roundtrip(&mut self, req: HelperRequest) -> Result<HelperResponse> {
        write_frame(&mut self.stream, &req)
            .with_context(loc!(), || format!("writing request to helper at {}", self.socket_path.display()))?;
        read_frame(&mut self.stream)
            .with_context(loc!(), || format!("reading response from helper at {}", self.socket_path.display()))
    }
}

impl DisplayBackend for WaylandHelperBackend {
    fn geometry_get(&mut self) -> Result<ScreenGeometry> {
        match self.roundtrip(HelperRequest::GeometryGet).location(loc!())? {
            HelperResponse::Geometry { width, height } => Ok(ScreenGeometry::new(width, height)),
            other => bail!("unexpected helper response to GeometryGet: {other:?}"),
        }
    }

    fn pointer_query(&mut self) -> Position {
        match self.roundtrip(HelperRequest::PointerQuery) {
            Ok(HelperResponse::Position { x, y }) => Position::new(x, y),
            Ok(other) => {
                debug!("unexpected helper response to PointerQuery: {other:?}");
                Position::new(0, 0)
            },
            Err(e) => {
                debug!("pointer_query roundtrip with helper failed: {e:?}");
                Position::new(0, 0)
            },
        }
    }

    fn pointer_warp(&mut self, pos: Position) {
        if let Err(e) = self.roundtrip(HelperRequest::PointerWarp { x: pos.x, y: pos.y }) {
            debug!("pointer_warp roundtrip with helper failed: {e:?}");
        }
    }

    fn pointer_grab(&mut self) -> std::result::Result<(), GrabFailed> {
        match self.roundtrip(HelperRequest::PointerGrab) {
            Ok(HelperResponse::GrabResult { ok: true, .. }) => Ok(()),
            Ok(HelperResponse::GrabResult { ok: false, reason }) => {
                Err(GrabFailed(reason.unwrap_or_else(|| "helper denied pointer grab".to_string())))
            },
            Ok(other) => Err(GrabFailed(format!("unexpected helper response: {other:?}"))),
            Err(e) => Err(GrabFailed(e.to_string())),
        }
    }

    fn pointer_ungrab(&mut self) {
        if let Err(e) = self.roundtrip(HelperRequest::PointerUngrab) {
            debug!("pointer_ungrab roundtrip with helper failed: {e:?}");
        }
    }

    fn keyboard_grab(&mut self) -> std::result::Result<(), GrabFailed> {
        match self.roundtrip(HelperRequest::KeyboardGrab) {
            Ok(HelperResponse::GrabResult { ok: true, .. }) => Ok(()),
            Ok(HelperResponse::GrabResult { ok: false, reason }) => {
                Err(GrabFailed(reason.unwrap_or_else(|| "helper denied keyboard grab".to_string())))
            },
            Ok(other) => Err(GrabFailed(format!("unexpected helper response: {other:?}"))),
            Err(e) => Err(GrabFailed(e.to_string())),
        }
    }

    fn keyboard_ungrab(&mut self) {
        if let Err(e) = self.roundtrip(HelperRequest::KeyboardUngrab) {
            debug!("keyboard_ungrab roundtrip with helper failed: {e:?}");
        }
    }

    fn cursor_hide(&mut self) {
        if let Err(e) = self.roundtrip(HelperRequest::CursorHide) {
            debug!("cursor_hide roundtrip with helper failed: {e:?}");
        }
    }

    fn cursor_show(&mut self) {
        if let Err(e) = self.roundtrip(HelperRequest::CursorShow) {
            debug!("cursor_show roundtrip with helper failed: {e:?}");
        }
    }

    fn events_drain(&mut self) -> Vec<RawInputEvent> {
        match self.roundtrip(HelperRequest::EventsDrain) {
            Ok(HelperResponse::Events { events }) => events,
            Ok(other) => {
                debug!("unexpected helper response to EventsDrain: {other:?}");
                Vec::new()
            },
            Err(e) => {
                debug!("events_drain roundtrip with helper failed: {e:?}");
                Vec::new()
            },
        }
    }

    fn inject_event(&mut self, event: RawInputEvent) {
        if let Err(e) = self.roundtrip(HelperRequest::InjectEvent { event }) {
            debug!("inject_event roundtrip with helper failed: {e:?}");
        }
    }
}

/// Default socket path the bundled helper binds to, under the user's
/// runtime directory.
pub fn default_socket_path() -> Result<PathBuf> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").location(loc!())?;
    Ok(PathBuf::from(runtime_dir).join("tx2tx-wayland-helper.sock"))
}
